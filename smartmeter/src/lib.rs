//! Smart meter telemetry bridge
//!
//! Wires the layers together: command line parsing, settings validation,
//! mapping file loading, the consumers and the stream supervisor.

pub mod cli;
pub mod settings;
pub mod app;

pub use cli::Args;
pub use settings::{Settings, SourceSettings};
