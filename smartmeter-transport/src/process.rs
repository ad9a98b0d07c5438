//! Subprocess transport
//!
//! Runs a decoder program (for example `sml_server /dev/ttyUSB0`) and reads
//! its standard output. The child's standard error is passed through to ours.
//! End of its output, or the child exiting, ends the stream.

use crate::stream::{StreamAccessor, TransportLayer, already_open, not_connected, read_with_timeout};
use async_trait::async_trait;
use smartmeter_core::{MeterError, MeterResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};

/// Subprocess transport settings
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl ProcessSettings {
    /// Create settings for `program` with arguments, without read timeout
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    /// Set the read timeout. `None` waits forever.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Transport reading the standard output of a child process
#[derive(Debug)]
pub struct ProcessTransport {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    settings: ProcessSettings,
    closed: bool,
}

impl ProcessTransport {
    /// Create a new subprocess transport
    pub fn new(settings: ProcessSettings) -> Self {
        Self {
            child: None,
            stdout: None,
            settings,
            closed: true,
        }
    }

    /// Reap the child after its output ended
    async fn reap(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            match child.wait().await {
                Ok(status) => log::info!("{} exited: {}", self.settings.program, status),
                Err(e) => log::warn!("Failed to wait for {}: {}", self.settings.program, e),
            }
        }
    }
}

#[async_trait]
impl TransportLayer for ProcessTransport {
    async fn open(&mut self) -> MeterResult<()> {
        if !self.closed {
            return Err(already_open());
        }

        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MeterError::Connection(std::io::Error::new(
                    e.kind(),
                    format!("Failed to start {}: {}", self.settings.command_line(), e),
                ))
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MeterError::Connection(std::io::Error::other("Failed to create pipe for sub process"))
        })?;

        log::info!("Started {}", self.settings.command_line());
        self.child = Some(child);
        self.stdout = Some(stdout);
        self.closed = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("process {}", self.settings.command_line())
    }
}

#[async_trait]
impl StreamAccessor for ProcessTransport {
    async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize> {
        let stdout = self.stdout.as_mut().ok_or_else(|| not_connected("Process output"))?;

        match read_with_timeout(stdout, buf, self.settings.timeout).await {
            Ok(0) => {
                self.closed = true;
                self.reap().await;
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
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            // The child may already be gone, nothing to do then
            let _ = child.start_kill();
            match child.wait().await {
                Ok(status) => log::info!("{} exited: {}", self.settings.program, status),
                Err(e) => log::warn!("Failed to wait for {}: {}", self.settings.program, e),
            }
        }
        self.closed = true;
        Ok(())
    }
}
