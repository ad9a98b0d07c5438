//! Stream supervisor
//!
//! Owns the read loop over the input source and keeps it alive:
//!
//! ```text
//!            open ok                 EOF / read error
//! Closed --> Opening --------> Reading ----------------> Closed
//!   ^           | open failed                              |
//!   +-----------+<------------- backoff delay <------------+
//! ```
//!
//! There is no terminal state. Open failures, read failures, end of stream
//! and decoder subprocess exits all lead back to `Closed`, and after the
//! backoff delay the source is opened again.

use crate::processor::RecordProcessor;
use crate::source::{DecodedUnit, RecordSource};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// State of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorState {
    #[default]
    Closed,
    Opening,
    Reading,
}

/// Shortest delay between attempts
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Capped exponential backoff
///
/// Starts at `initial` and doubles after every unproductive session, up to
/// `max`. Setting both to the same value yields a flat delay. A zero
/// `initial` is raised to one millisecond.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(MIN_DELAY);
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Flat delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over at the initial delay
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

/// Supervisor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStatistics {
    /// Sessions successfully opened
    pub sessions: u64,
    /// Failed open attempts
    pub open_failures: u64,
    /// Sessions ended by a read error
    pub read_failures: u64,
    /// Records decoded
    pub records: u64,
    /// Malformed units discarded
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct SupervisorStatus {
    state: SupervisorState,
    statistics: SupervisorStatistics,
}

/// Cloneable view of a running supervisor
#[derive(Debug, Clone, Default)]
pub struct SupervisorHandle {
    status: Arc<Mutex<SupervisorStatus>>,
}

impl SupervisorHandle {
    pub fn state(&self) -> SupervisorState {
        self.lock().state
    }

    pub fn statistics(&self) -> SupervisorStatistics {
        self.lock().statistics
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SupervisorState) {
        self.lock().state = state;
    }

    fn update(&self, f: impl FnOnce(&mut SupervisorStatistics)) {
        f(&mut self.lock().statistics);
    }
}

/// Resilient read loop over one record source
pub struct StreamSupervisor {
    source: Box<dyn RecordSource>,
    processor: RecordProcessor,
    backoff: Backoff,
    handle: SupervisorHandle,
}

impl StreamSupervisor {
    pub fn new(source: Box<dyn RecordSource>, processor: RecordProcessor, backoff: Backoff) -> Self {
        Self {
            source,
            processor,
            backoff,
            handle: SupervisorHandle::default(),
        }
    }

    /// Handle for observing state and counters
    pub fn handle(&self) -> SupervisorHandle {
        self.handle.clone()
    }

    /// Run one open-read-close cycle
    ///
    /// Returns true if the session produced at least one unit.
    pub async fn run_session(&mut self) -> bool {
        let description = self.source.describe();
        self.handle.set_state(SupervisorState::Opening);

        if let Err(e) = self.source.open().await {
            log::warn!("Failed to open {}: {}", description, e);
            self.handle.update(|s| s.open_failures += 1);
            self.handle.set_state(SupervisorState::Closed);
            return false;
        }

        log::info!("Reading from {}", description);
        self.handle.update(|s| s.sessions += 1);
        self.handle.set_state(SupervisorState::Reading);

        let mut productive = false;
        loop {
            match self.source.next_unit().await {
                Ok(Some(DecodedUnit::Record(record))) => {
                    productive = true;
                    self.handle.update(|s| s.records += 1);
                    self.processor.process(record);
                }
                Ok(Some(DecodedUnit::Malformed)) => {
                    productive = true;
                    self.handle.update(|s| s.malformed += 1);
                }
                Ok(None) => {
                    log::info!("End of stream from {}", description);
                    break;
                }
                Err(e) => {
                    log::warn!("Error reading from {}: {}", description, e);
                    self.handle.update(|s| s.read_failures += 1);
                    break;
                }
            }
        }

        self.source.close().await;
        self.handle.set_state(SupervisorState::Closed);
        productive
    }

    /// Run sessions forever, waiting the backoff delay in between
    pub async fn run(mut self) {
        loop {
            if self.run_session().await {
                self.backoff.reset();
            }
            let delay = self.backoff.next_delay();
            log::info!("Reopening {} in {:?}", self.source.describe(), delay);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_fixed_backoff() {
        let mut backoff = Backoff::fixed(Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_delay_still_grows() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::from_millis(8));
        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 8]);

        let mut flat = Backoff::fixed(Duration::ZERO);
        assert_eq!(flat.next_delay(), MIN_DELAY);
    }

    #[test]
    fn test_handle_starts_closed() {
        let handle = SupervisorHandle::default();
        assert_eq!(handle.state(), SupervisorState::Closed);
        assert_eq!(handle.statistics(), SupervisorStatistics::default());
    }
}
