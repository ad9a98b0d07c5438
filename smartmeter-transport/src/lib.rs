//! Transport layer for meter byte streams
//!
//! This crate provides the input sources the bridge reads telemetry from:
//! a serial port, a plain device file or FIFO, the standard output of a
//! decoder subprocess, and a TCP endpoint such as ser2net.

pub mod stream;
pub mod serial;
pub mod file;
pub mod process;
pub mod tcp;

pub use smartmeter_core::{MeterError, MeterResult};
pub use stream::{StreamAccessor, TransportLayer};
pub use serial::{SerialSettings, SerialTransport};
pub use file::{FileSettings, FileTransport};
pub use process::{ProcessSettings, ProcessTransport};
pub use tcp::{TcpSettings, TcpTransport};
