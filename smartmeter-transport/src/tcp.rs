//! TCP transport implementation
//!
//! Connects to a serial-to-network bridge such as ser2net that forwards the
//! meter's byte stream unchanged.

use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected, read_with_timeout};
use async_trait::async_trait;
use smartmeter_core::{MeterError, MeterResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    pub connect_timeout: Duration,
    pub timeout: Option<Duration>,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: Duration::from_secs(10),
            timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Set the read timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    settings: TcpSettings,
    closed: bool,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            closed: true,
        }
    }

    /// Create TCP transport from address string
    pub fn from_address(address: &str) -> MeterResult<Self> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| MeterError::InvalidData(format!("Invalid TCP address: {}", e)))?;
        Ok(Self::new(TcpSettings::new(addr)))
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> MeterResult<()> {
        if !self.closed {
            return Err(already_open());
        }

        let stream = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect(self.settings.address),
        )
        .await
        .map_err(|_| MeterError::Timeout)??;

        self.stream = Some(stream);
        self.closed = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp {}", self.settings.address)
    }
}

#[async_trait]
impl StreamAccessor for TcpTransport {
    async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize> {
        let stream = self.stream.as_mut().ok_or_else(|| not_connected("TCP stream"))?;

        match read_with_timeout(stream, buf, self.settings.timeout).await {
            Ok(0) => {
                self.closed = true;
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.closed = true;
                Err(e)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> MeterResult<()> {
        self.stream = None;
        self.closed = true;
        Ok(())
    }
}
