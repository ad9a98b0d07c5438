//! Stream accessor traits for the transport layer

use async_trait::async_trait;
use smartmeter_core::{MeterError, MeterResult};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read-only access to a physical stream coming from a meter
#[async_trait]
pub trait StreamAccessor: Send {
    /// Read data from the stream
    ///
    /// # Arguments
    ///
    /// * `buf` - Buffer to read into
    ///
    /// # Returns
    ///
    /// Number of bytes read, or 0 if EOF
    async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize>;

    /// Check if the stream is closed
    fn is_closed(&self) -> bool;

    /// Close the stream
    async fn close(&mut self) -> MeterResult<()>;
}

/// Transport layer trait that extends StreamAccessor
#[async_trait]
pub trait TransportLayer: StreamAccessor {
    /// Open the physical layer connection
    ///
    /// Opening an already opened transport is an error.
    async fn open(&mut self) -> MeterResult<()>;

    /// Human readable description of the source, used in logs
    fn describe(&self) -> String;
}

/// Read from `reader`, applying an optional timeout
///
/// Shared by all transports. The caller marks itself closed on EOF and on
/// error.
pub(crate) async fn read_with_timeout<R>(
    reader: &mut R,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> MeterResult<usize>
where
    R: AsyncRead + Unpin + Send,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, reader.read(buf))
            .await
            .map_err(|_| MeterError::Timeout)?
            .map_err(MeterError::Connection),
        None => reader.read(buf).await.map_err(MeterError::Connection),
    }
}

pub(crate) fn already_open() -> MeterError {
    MeterError::Connection(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        "Connection has already been opened",
    ))
}

pub(crate) fn not_connected(what: &str) -> MeterError {
    MeterError::Connection(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("{} not connected", what),
    ))
}
