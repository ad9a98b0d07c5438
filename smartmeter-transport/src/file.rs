//! Plain file transport
//!
//! Reads a device special file, FIFO or regular file as is, without any
//! serial line configuration. Useful when another process already set up
//! the tty, or when the decoded stream is written into a named pipe.

use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected, read_with_timeout};
use async_trait::async_trait;
use smartmeter_core::MeterResult;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;

/// File transport settings
#[derive(Debug, Clone)]
pub struct FileSettings {
    pub path: PathBuf,
    pub timeout: Option<Duration>,
}

impl FileSettings {
    /// Create settings for the given path, without read timeout
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
        }
    }

    /// Set the read timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transport reading a file path
#[derive(Debug)]
pub struct FileTransport {
    file: Option<File>,
    settings: FileSettings,
    closed: bool,
}

impl FileTransport {
    /// Create a new file transport
    pub fn new(settings: FileSettings) -> Self {
        Self {
            file: None,
            settings,
            closed: true,
        }
    }
}

#[async_trait]
impl TransportLayer for FileTransport {
    async fn open(&mut self) -> MeterResult<()> {
        if !self.closed {
            return Err(already_open());
        }
        let file = File::open(&self.settings.path).await?;
        self.file = Some(file);
        self.closed = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.settings.path.display())
    }
}

#[async_trait]
impl StreamAccessor for FileTransport {
    async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize> {
        let file = self.file.as_mut().ok_or_else(|| not_connected("File"))?;

        match read_with_timeout(file, buf, self.settings.timeout).await {
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
        self.file = None;
        self.closed = true;
        Ok(())
    }
}
