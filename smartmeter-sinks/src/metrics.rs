//! Prometheus metrics sink

use async_trait::async_trait;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use smartmeter_core::{CodeMappingTable, DerivedState, MeterError, MeterResult, Reading};
use smartmeter_reader::ConsumerHandler;
use std::collections::HashMap;
use std::sync::Mutex;

enum MetricGauge {
    Labelled(GaugeVec),
    Plain(Gauge),
}

/// Exports readings as Prometheus gauges
///
/// All gauges are registered up front from the mapping table in a private
/// registry, so the exposition only contains meter values. With a label
/// variable every gauge carries one label of that name whose value is read
/// from the derived state at the time the reading is handled. When that
/// value changes, the series under the previous value is removed, so each
/// gauge exposes only the current meter.
pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<String, MetricGauge>,
    label_variable: Option<String>,
    /// Label value last written per gauge
    current_labels: Mutex<HashMap<String, String>>,
}

impl PrometheusSink {
    pub fn new(table: &CodeMappingTable, label_variable: Option<&str>) -> MeterResult<Self> {
        let registry = Registry::new();
        let mut gauges = HashMap::new();

        for (code, metric) in table.metric_rules() {
            let help = if metric.help.is_empty() {
                metric.name.as_str()
            } else {
                metric.help.as_str()
            };
            let opts = Opts::new(metric.name.as_str(), help);
            let gauge = match label_variable {
                Some(label) => {
                    let gauge = GaugeVec::new(opts, &[label]).map_err(|e| metric_error(&metric.name, e))?;
                    registry
                        .register(Box::new(gauge.clone()))
                        .map_err(|e| metric_error(&metric.name, e))?;
                    MetricGauge::Labelled(gauge)
                }
                None => {
                    let gauge = Gauge::with_opts(opts).map_err(|e| metric_error(&metric.name, e))?;
                    registry
                        .register(Box::new(gauge.clone()))
                        .map_err(|e| metric_error(&metric.name, e))?;
                    MetricGauge::Plain(gauge)
                }
            };
            log::debug!("Registered gauge {} for {}", metric.name, code);
            gauges.insert(metric.name.clone(), gauge);
        }

        Ok(Self {
            registry,
            gauges,
            label_variable: label_variable.map(str::to_string),
            current_labels: Mutex::new(HashMap::new()),
        })
    }

    /// Registry holding the gauges
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current values in the text exposition format
    pub fn gather_text(&self) -> MeterResult<String> {
        encode_text(&self.registry)
    }
}

fn metric_error(name: &str, e: prometheus::Error) -> MeterError {
    MeterError::Config(format!("Invalid metric {}: {}", name, e))
}

/// Encode all metrics of `registry` in the text exposition format
pub fn encode_text(registry: &Registry) -> MeterResult<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| MeterError::Sink(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MeterError::Sink(e.to_string()))
}

#[async_trait]
impl ConsumerHandler for PrometheusSink {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn handle(&self, labels: &DerivedState, reading: &Reading) -> MeterResult<()> {
        let Some(metric) = &reading.rule.metric else {
            return Ok(());
        };
        let gauge = self
            .gauges
            .get(&metric.name)
            .ok_or_else(|| MeterError::Sink(format!("No gauge registered for {}", metric.name)))?;

        match gauge {
            MetricGauge::Labelled(gauge) => {
                let variable = self.label_variable.as_deref().unwrap_or_default();
                let label = labels.get_or_empty(variable);
                let mut current = self.current_labels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                gauge
                    .get_metric_with_label_values(&[label.as_str()])
                    .map_err(|e| MeterError::Sink(e.to_string()))?
                    .set(reading.value);
                match current.insert(metric.name.clone(), label.clone()) {
                    Some(previous) if previous != label => {
                        log::debug!("{} label changed from {:?} to {:?}", metric.name, previous, label);
                        let _ = gauge.remove_label_values(&[previous.as_str()]);
                    }
                    _ => {}
                }
            }
            MetricGauge::Plain(gauge) => gauge.set(reading.value),
        }
        Ok(())
    }
}
