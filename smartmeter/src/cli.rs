//! Command line interface

use clap::{Parser, ValueEnum};
use smartmeter_reader::SourceFormat;
use std::path::PathBuf;

/// How the meter stream is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// Run the SML decoder program on the device and read its output
    Subprocess,
    /// Read the serial device directly
    Serial,
    /// Read a device file, FIFO or capture file
    File,
    /// Connect to a TCP endpoint such as ser2net (`--serial host:port`)
    Tcp,
}

#[derive(Debug, Parser)]
#[command(name = "smartmeter", version, about = "Exports smart meter readings to Prometheus and MQTT")]
pub struct Args {
    /// Serial device to read from (host:port for --source tcp)
    #[arg(long)]
    pub serial: Option<String>,

    /// SML decoder program run with the serial device as argument
    #[arg(long, default_value = "sml_server")]
    pub sml_server: String,

    #[arg(long, value_enum, default_value_t = SourceKind::Subprocess)]
    pub source: SourceKind,

    #[arg(long, value_enum, default_value_t = SourceFormat::Text)]
    pub format: SourceFormat,

    /// Baud rate for --source serial
    #[arg(long, default_value_t = 9600)]
    pub baud_rate: u32,

    /// Accept SML transmissions with a wrong checksum
    #[arg(long)]
    pub no_crc_check: bool,

    /// The address to listen on for HTTP requests
    #[arg(long, default_value = "0.0.0.0:9761")]
    pub metrics_address: String,

    /// MQTT server to publish values to as they are received
    #[arg(long)]
    pub mqtt_server: Option<String>,

    #[arg(long)]
    pub mqtt_username: Option<String>,

    #[arg(long)]
    pub mqtt_password: Option<String>,

    /// MQTT topic prefix for publishing values
    #[arg(long, default_value = "smartmeter")]
    pub mqtt_topic_prefix: String,

    /// YAML file mapping OBIS codes to metrics, topics and variables
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Derived variable used as gauge label, empty for unlabelled gauges
    #[arg(long, default_value = "server_id")]
    pub label_variable: String,

    /// First delay before reopening the source
    #[arg(long, default_value_t = 1000)]
    pub retry_initial_ms: u64,

    /// Upper bound of the reopen delay
    #[arg(long, default_value_t = 60_000)]
    pub retry_max_ms: u64,

    /// Cancel consumer invocations after this long, 0 disables
    #[arg(long, default_value_t = 10_000)]
    pub dispatch_timeout_ms: u64,

    /// Reopen the source when no data arrives for this long, 0 disables
    #[arg(long, default_value_t = 30)]
    pub read_timeout_secs: u64,

    /// Default log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
