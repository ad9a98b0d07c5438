//! Dispatch fan-out
//!
//! Every numeric [`Reading`] is handed to all registered consumers. Each
//! invocation runs in its own tokio task, so a slow, failing or panicking
//! consumer never stalls the read loop or the other consumers. Invocation
//! order and completion order are unspecified.
//!
//! Consumers receive the current label context, a handle to the shared
//! [`DerivedState`]. The labels they read are the most recent ones at the
//! time the consumer runs, not necessarily those at decode time.

use async_trait::async_trait;
use smartmeter_core::{DerivedState, MeterResult, Reading};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Consumer of numeric readings
///
/// Implementations must tolerate concurrent and reentrant invocation.
/// Failures are logged by the dispatcher and never retried.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Handle one reading
    async fn handle(&self, labels: &DerivedState, reading: &Reading) -> MeterResult<()>;
}

/// Consumer backed by a plain closure
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&DerivedState, &Reading) -> MeterResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> ConsumerHandler for FnHandler<F>
where
    F: Fn(&DerivedState, &Reading) -> MeterResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, labels: &DerivedState, reading: &Reading) -> MeterResult<()> {
        (self.func)(labels, reading)
    }
}

/// Snapshot of the dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatistics {
    /// Readings handed to the dispatcher
    pub readings: u64,
    /// Consumer invocations started
    pub invocations: u64,
    /// Invocations that returned an error
    pub failures: u64,
    /// Invocations cancelled by the timeout
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    readings: AtomicU64,
    invocations: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

/// Fan-out of readings to the registered consumers
///
/// Consumers are registered while the dispatcher is built; once it is
/// shared behind an `Arc` the list is fixed.
pub struct Dispatcher {
    handlers: Vec<Arc<dyn ConsumerHandler>>,
    labels: DerivedState,
    timeout: Option<Duration>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    /// Create a dispatcher passing `labels` to every consumer
    pub fn new(labels: DerivedState) -> Self {
        Self {
            handlers: Vec::new(),
            labels,
            timeout: None,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// Cancel consumer invocations running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a consumer
    pub fn register(&mut self, handler: Arc<dyn ConsumerHandler>) {
        log::debug!("Registered consumer {}", handler.name());
        self.handlers.push(handler);
    }

    /// Register a closure as consumer
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&DerivedState, &Reading) -> MeterResult<()> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnHandler::new(name, func)));
    }

    /// Number of registered consumers
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Hand `reading` to every consumer
    ///
    /// Returns immediately. The returned handles complete when the
    /// corresponding invocation has finished; callers are free to drop them.
    pub fn dispatch(&self, reading: Reading) -> Vec<JoinHandle<()>> {
        self.counters.readings.fetch_add(1, Ordering::Relaxed);
        let reading = Arc::new(reading);

        self.handlers
            .iter()
            .map(|handler| {
                let handler = Arc::clone(handler);
                let reading = Arc::clone(&reading);
                let labels = self.labels.clone();
                let counters = Arc::clone(&self.counters);
                let timeout = self.timeout;
                counters.invocations.fetch_add(1, Ordering::Relaxed);

                tokio::spawn(async move {
                    let result = match timeout {
                        Some(timeout) => {
                            match tokio::time::timeout(timeout, handler.handle(&labels, &reading)).await {
                                Ok(result) => result,
                                Err(_) => {
                                    counters.timeouts.fetch_add(1, Ordering::Relaxed);
                                    log::warn!(
                                        "Consumer {} timed out after {:?} handling {}",
                                        handler.name(),
                                        timeout,
                                        reading.code
                                    );
                                    return;
                                }
                            }
                        }
                        None => handler.handle(&labels, &reading).await,
                    };

                    if let Err(e) = result {
                        counters.failures.fetch_add(1, Ordering::Relaxed);
                        log::warn!("Consumer {} failed handling {}: {}", handler.name(), reading.code, e);
                    }
                })
            })
            .collect()
    }

    /// Current counter values
    pub fn statistics(&self) -> DispatchStatistics {
        DispatchStatistics {
            readings: self.counters.readings.load(Ordering::Relaxed),
            invocations: self.counters.invocations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartmeter_core::{MappingRule, MeterError, MetricDescriptor, ObisCode};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn reading(code: &str, value: f64) -> Reading {
        Reading {
            code: ObisCode::new(code),
            rule: Arc::new(MappingRule::numeric(MetricDescriptor {
                name: "verbrauch_wh_total".to_string(),
                help: String::new(),
            })),
            value,
        }
    }

    async fn join_all(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn test_all_consumers_invoked_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = Dispatcher::new(DerivedState::new());
        for name in ["metrics", "mqtt", "log"] {
            let seen = Arc::clone(&seen);
            dispatcher.register_fn(name, move |_, reading| {
                seen.lock().unwrap().push((name, reading.code.to_string(), reading.value));
                Ok(())
            });
        }

        join_all(dispatcher.dispatch(reading("1-0:1.8.0*255", 768.2))).await;

        let seen: HashSet<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|(name, code, value)| (*name, code.clone(), value.to_bits()))
            .collect();
        let expected: HashSet<_> = ["metrics", "mqtt", "log"]
            .into_iter()
            .map(|name| (name, "1-0:1.8.0*255".to_string(), 768.2f64.to_bits()))
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(
            dispatcher.statistics(),
            DispatchStatistics {
                readings: 1,
                invocations: 3,
                failures: 0,
                timeouts: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failing_consumer_is_isolated() {
        let count = Arc::new(AtomicU64::new(0));
        let mut dispatcher = Dispatcher::new(DerivedState::new());
        dispatcher.register_fn("broken", |_, _| Err(MeterError::Sink("broker down".to_string())));
        dispatcher.register_fn("panicking", |_, _| panic!("consumer bug"));
        let counter = Arc::clone(&count);
        dispatcher.register_fn("counting", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        for value in [1.0, 2.0] {
            join_all(dispatcher.dispatch(reading("1-0:16.7.0*255", value))).await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 2);
        let stats = dispatcher.statistics();
        assert_eq!(stats.invocations, 6);
        assert_eq!(stats.failures, 2);
    }

    struct Stuck;

    #[async_trait]
    impl ConsumerHandler for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn handle(&self, _: &DerivedState, _: &Reading) -> MeterResult<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blocking_consumer_times_out() {
        let mut dispatcher = Dispatcher::new(DerivedState::new()).with_timeout(Some(Duration::from_millis(20)));
        dispatcher.register(Arc::new(Stuck));
        dispatcher.register_fn("fast", |_, _| Ok(()));

        join_all(dispatcher.dispatch(reading("1-0:2.8.0*255", 3.0))).await;

        let stats = dispatcher.statistics();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_consumer_reads_labels() {
        let labels = DerivedState::new();
        labels.set("server_id", "AB CD EF");
        let seen = Arc::new(Mutex::new(None));
        let mut dispatcher = Dispatcher::new(labels);
        let slot = Arc::clone(&seen);
        dispatcher.register_fn("labels", move |labels, _| {
            *slot.lock().unwrap() = labels.get("server_id");
            Ok(())
        });

        join_all(dispatcher.dispatch(reading("1-0:1.8.0*255", 1.0))).await;
        assert_eq!(seen.lock().unwrap().as_deref(), Some("AB CD EF"));
    }

    #[tokio::test]
    async fn test_dispatch_without_consumers() {
        let dispatcher = Dispatcher::new(DerivedState::new());
        assert_eq!(dispatcher.handler_count(), 0);
        assert!(dispatcher.dispatch(reading("1-0:1.8.0*255", 1.0)).is_empty());
        assert_eq!(dispatcher.statistics().readings, 1);
    }
}
