//! Scripted transport shared by the integration tests

use async_trait::async_trait;
use smartmeter_core::{MeterError, MeterResult};
use smartmeter_transport::{StreamAccessor, TransportLayer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport that fails the first `failing_opens` open attempts and then
/// serves `data` once per session
pub struct ScriptedTransport {
    data: Vec<u8>,
    pending: VecDeque<u8>,
    failing_opens: usize,
    broken_sessions: usize,
    break_after: usize,
    sessions: usize,
    fail_at_end: bool,
    pub opens: Arc<AtomicUsize>,
    open: bool,
}

impl ScriptedTransport {
    pub fn new(data: &[u8], failing_opens: usize) -> Self {
        Self {
            data: data.to_vec(),
            pending: VecDeque::new(),
            failing_opens,
            broken_sessions: 0,
            break_after: 0,
            sessions: 0,
            fail_at_end: false,
            opens: Arc::new(AtomicUsize::new(0)),
            open: false,
        }
    }

    /// The first `sessions` sessions fail with a read error after `bytes` bytes
    #[allow(dead_code)]
    pub fn with_broken_sessions(mut self, sessions: usize, bytes: usize) -> Self {
        self.broken_sessions = sessions;
        self.break_after = bytes;
        self
    }
}

#[async_trait]
impl StreamAccessor for ScriptedTransport {
    async fn read(&mut self, buf: &mut [u8]) -> MeterResult<usize> {
        if self.pending.is_empty() && self.fail_at_end {
            self.open = false;
            return Err(MeterError::Connection(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "line dropped",
            )));
        }
        let n = buf.len().min(self.pending.len()).min(7);
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        if n == 0 {
            self.open = false;
        }
        Ok(n)
    }

    fn is_closed(&self) -> bool {
        !self.open
    }

    async fn close(&mut self) -> MeterResult<()> {
        self.open = false;
        Ok(())
    }
}

#[async_trait]
impl TransportLayer for ScriptedTransport {
    async fn open(&mut self) -> MeterResult<()> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failing_opens {
            return Err(MeterError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "meter unplugged",
            )));
        }
        self.sessions += 1;
        self.fail_at_end = self.sessions <= self.broken_sessions;
        let len = if self.fail_at_end {
            self.break_after.min(self.data.len())
        } else {
            self.data.len()
        };
        self.pending = self.data[..len].iter().copied().collect();
        self.open = true;
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted meter".to_string()
    }
}
