//! Consumers for meter readings
//!
//! - `metrics`: Prometheus gauges, one per mapped metric
//! - `exporter`: HTTP endpoint serving the gauges for scraping
//! - `mqtt`: publishes readings with a topic to an MQTT broker

pub mod metrics;
pub mod exporter;
pub mod mqtt;

pub use smartmeter_core::{MeterError, MeterResult};
pub use metrics::PrometheusSink;
pub use exporter::MetricsExporter;
pub use mqtt::{MqttSettings, MqttSink};
