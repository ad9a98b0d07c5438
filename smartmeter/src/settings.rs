//! Validated runtime settings

use crate::cli::{Args, SourceKind};
use smartmeter_core::{MeterError, MeterResult};
use smartmeter_reader::{Backoff, SourceFormat};
use smartmeter_sinks::MqttSettings;
use smartmeter_transport::{FileSettings, ProcessSettings, SerialSettings, TcpSettings};
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Input source with its transport settings
#[derive(Debug, Clone)]
pub enum SourceSettings {
    Subprocess(ProcessSettings),
    Serial(SerialSettings),
    File(FileSettings),
    Tcp(TcpSettings),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub source: SourceSettings,
    pub format: SourceFormat,
    pub verify_crc: bool,
    pub mapping: Option<PathBuf>,
    pub metrics_address: String,
    pub label_variable: Option<String>,
    pub mqtt: Option<MqttSettings>,
    pub backoff: Backoff,
    pub dispatch_timeout: Option<Duration>,
}

impl Settings {
    /// Validate the command line
    ///
    /// A missing or nonexistent input source is an error.
    pub fn from_args(args: &Args) -> MeterResult<Self> {
        let input = args.serial.as_deref().unwrap_or_default();
        let read_timeout = non_zero(Duration::from_secs(args.read_timeout_secs));

        let source = match args.source {
            SourceKind::Tcp => {
                let address = input
                    .to_socket_addrs()
                    .ok()
                    .and_then(|mut addrs| addrs.next())
                    .ok_or_else(|| MeterError::Config(format!("No or invalid TCP address given: {}", input)))?;
                SourceSettings::Tcp(TcpSettings::new(address).with_timeout(read_timeout))
            }
            kind => {
                if input.is_empty() || !Path::new(input).exists() {
                    return Err(MeterError::Config(format!("No or invalid serial device given: {}", input)));
                }
                match kind {
                    SourceKind::Serial => SourceSettings::Serial(
                        SerialSettings::new(input.to_string(), args.baud_rate).with_timeout(read_timeout),
                    ),
                    SourceKind::File => SourceSettings::File(FileSettings::new(input).with_timeout(read_timeout)),
                    _ => SourceSettings::Subprocess(
                        ProcessSettings::new(args.sml_server.as_str(), vec![input.to_string()])
                            .with_timeout(read_timeout),
                    ),
                }
            }
        };

        let mqtt = match args.mqtt_server.as_deref().filter(|s| !s.is_empty()) {
            Some(server) => Some(
                MqttSettings::from_server(server, args.mqtt_topic_prefix.as_str())?
                    .with_credentials(args.mqtt_username.clone(), args.mqtt_password.clone()),
            ),
            None => None,
        };

        Ok(Self {
            source,
            format: args.format,
            verify_crc: !args.no_crc_check,
            mapping: args.mapping.clone(),
            metrics_address: normalize_listen_address(&args.metrics_address),
            label_variable: Some(args.label_variable.clone()).filter(|v| !v.is_empty()),
            mqtt,
            backoff: Backoff::new(
                Duration::from_millis(args.retry_initial_ms),
                Duration::from_millis(args.retry_max_ms),
            ),
            dispatch_timeout: non_zero(Duration::from_millis(args.dispatch_timeout_ms)),
        })
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

/// Accept the `:9761` shorthand for all interfaces
fn normalize_listen_address(address: &str) -> String {
    match address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => address.to_string(),
    }
}
