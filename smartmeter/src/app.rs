//! Startup wiring

use crate::settings::{Settings, SourceSettings};
use anyhow::Context;
use smartmeter_core::{CodeMappingTable, DerivedState};
use smartmeter_reader::{Dispatcher, RecordProcessor, RecordSource, StreamSupervisor, build_source};
use smartmeter_sinks::{MetricsExporter, MqttSink, PrometheusSink};
use smartmeter_transport::{FileTransport, ProcessTransport, SerialTransport, TcpTransport, TransportLayer};
use std::path::Path;
use std::sync::Arc;

/// Load the mapping file, or the built-in table if none is given
pub fn load_mapping(path: Option<&Path>) -> anyhow::Result<CodeMappingTable> {
    let Some(path) = path else {
        log::info!("No mapping file given, using the built-in table");
        return Ok(CodeMappingTable::default_table());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file {}", path.display()))?;
    CodeMappingTable::from_yaml_str(&content)
        .with_context(|| format!("Invalid mapping file {}", path.display()))
}

pub fn build_transport(source: &SourceSettings) -> Box<dyn TransportLayer> {
    match source {
        SourceSettings::Subprocess(settings) => Box::new(ProcessTransport::new(settings.clone())),
        SourceSettings::Serial(settings) => Box::new(SerialTransport::new(settings.clone())),
        SourceSettings::File(settings) => Box::new(FileTransport::new(settings.clone())),
        SourceSettings::Tcp(settings) => Box::new(TcpTransport::new(settings.clone())),
    }
}

pub fn build_record_source(settings: &Settings) -> Box<dyn RecordSource> {
    build_source(settings.format, build_transport(&settings.source), settings.verify_crc)
}

/// Start the supervisor and serve metrics until the process ends
///
/// Returns only on startup errors or if the metrics endpoint fails.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let table = Arc::new(load_mapping(settings.mapping.as_deref())?);
    log::info!("Loaded {} mapping rules", table.len());

    let state = DerivedState::new();
    let mut dispatcher = Dispatcher::new(state.clone()).with_timeout(settings.dispatch_timeout);

    let metrics = PrometheusSink::new(&table, settings.label_variable.as_deref())
        .context("Failed to register metrics")?;
    let exporter = MetricsExporter::bind(&settings.metrics_address, metrics.registry().clone())
        .await
        .with_context(|| format!("Failed to listen on {}", settings.metrics_address))?;
    dispatcher.register(Arc::new(metrics));

    if let Some(mqtt) = &settings.mqtt {
        dispatcher.register(Arc::new(MqttSink::connect(mqtt)));
    }

    log::info!("Dispatching readings to {} consumers", dispatcher.handler_count());
    let processor = RecordProcessor::new(table, state, Arc::new(dispatcher));
    let supervisor = StreamSupervisor::new(build_record_source(&settings), processor, settings.backoff.clone());
    tokio::spawn(supervisor.run());

    exporter.serve().await.context("Metrics endpoint failed")
}
