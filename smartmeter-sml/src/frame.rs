//! SML transport framing
//!
//! A transmission ("SML file") looks like:
//!
//! ```text
//! 1b 1b 1b 1b 01 01 01 01   start sequence
//! ... messages ...          payload, padded to a multiple of 4 bytes
//! 1b 1b 1b 1b 1a pp cc cc   end sequence: padding count, CRC-16/X.25
//! ```
//!
//! Four `0x1b` bytes inside the payload are sent twice. The checksum covers
//! everything from the start sequence up to and including the padding
//! count, as transmitted (escaped).

use crate::crc::Crc16;
use bytes::{Buf, BytesMut};
use smartmeter_core::{MeterError, MeterResult};

const ESCAPE: [u8; 4] = [0x1B; 4];
const START: [u8; 4] = [0x01; 4];
const END_MARK: u8 = 0x1A;

/// Upper bound for one payload; meters send a few hundred bytes
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Incremental decoder turning a raw byte stream into SML payloads
///
/// Bytes are fed with [`push`](Self::push) as they arrive and complete
/// payloads are taken out with [`next_frame`](Self::next_frame). Garbage
/// between transmissions is skipped. A corrupt transmission yields one
/// error and the decoder resynchronises on the next start sequence.
#[derive(Debug)]
pub struct SmlFrameDecoder {
    buffer: BytesMut,
    in_frame: bool,
    payload: Vec<u8>,
    crc: Crc16,
    verify_crc: bool,
}

impl SmlFrameDecoder {
    /// Create a decoder that verifies checksums
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            in_frame: false,
            payload: Vec::new(),
            crc: Crc16::new(),
            verify_crc: true,
        }
    }

    /// Enable or disable checksum verification
    ///
    /// Some older meters send wrong checksums; their data is still usable.
    pub fn with_crc_check(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    /// Append raw bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Drop any partial transmission, e.g. after the stream was reopened
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.abort_frame();
    }

    /// Take the next complete payload
    ///
    /// # Returns
    ///
    /// - `None` if more bytes are needed
    /// - `Some(Ok(payload))` for a valid transmission, padding removed
    /// - `Some(Err(_))` for a corrupt transmission
    pub fn next_frame(&mut self) -> Option<MeterResult<Vec<u8>>> {
        loop {
            if !self.in_frame {
                if !self.seek_start() {
                    return None;
                }
                continue;
            }

            if self.buffer.len() < 4 {
                return None;
            }
            if self.buffer[..4] != ESCAPE {
                self.crc.update_bytes(&self.buffer[..4]);
                self.payload.extend_from_slice(&self.buffer[..4]);
                self.buffer.advance(4);
                if self.payload.len() > MAX_PAYLOAD_SIZE {
                    self.abort_frame();
                    return Some(Err(MeterError::FrameInvalid(format!(
                        "SML payload exceeds {} bytes",
                        MAX_PAYLOAD_SIZE
                    ))));
                }
                continue;
            }

            if self.buffer.len() < 8 {
                return None;
            }
            let next = [self.buffer[4], self.buffer[5], self.buffer[6], self.buffer[7]];

            if next == ESCAPE {
                self.crc.update_bytes(&self.buffer[..8]);
                self.payload.extend_from_slice(&ESCAPE);
                self.buffer.advance(8);
            } else if next == START {
                log::warn!("SML start sequence inside transmission, discarding {} bytes", self.payload.len());
                self.begin_frame();
                self.buffer.advance(8);
            } else if next[0] == END_MARK {
                self.crc.update_bytes(&self.buffer[..6]);
                self.buffer.advance(8);
                let result = self.finish_frame(next[1], [next[2], next[3]]);
                self.abort_frame();
                return Some(result);
            } else {
                self.buffer.advance(8);
                self.abort_frame();
                return Some(Err(MeterError::FrameInvalid(format!(
                    "Invalid SML escape sequence {:02X?}",
                    next
                ))));
            }
        }
    }

    /// Skip to the next start sequence, returns true if one was found
    fn seek_start(&mut self) -> bool {
        let found = self
            .buffer
            .windows(8)
            .position(|w| w[..4] == ESCAPE && w[4..] == START);
        match found {
            Some(pos) => {
                self.buffer.advance(pos + 8);
                self.begin_frame();
                true
            }
            None => {
                // Keep a possible partial start sequence
                let keep = self.buffer.len().min(7);
                let skip = self.buffer.len() - keep;
                self.buffer.advance(skip);
                false
            }
        }
    }

    fn begin_frame(&mut self) {
        self.in_frame = true;
        self.payload.clear();
        self.crc.reset();
        self.crc.update_bytes(&ESCAPE);
        self.crc.update_bytes(&START);
    }

    fn abort_frame(&mut self) {
        self.in_frame = false;
        self.payload.clear();
        self.crc.reset();
    }

    fn finish_frame(&mut self, padding: u8, received: [u8; 2]) -> MeterResult<Vec<u8>> {
        let expected = self.crc.value_bytes();
        if self.verify_crc && received != expected {
            return Err(MeterError::FrameInvalid(format!(
                "SML checksum mismatch: received {:02X}{:02X}, expected {:02X}{:02X}",
                received[0], received[1], expected[0], expected[1]
            )));
        }

        let padding = padding as usize;
        if padding > 3 || padding > self.payload.len() {
            return Err(MeterError::FrameInvalid(format!("Invalid SML padding {}", padding)));
        }
        let mut payload = std::mem::take(&mut self.payload);
        payload.truncate(payload.len() - padding);
        Ok(payload)
    }
}

impl Default for SmlFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a payload into a complete SML transmission
///
/// Pads the payload to a multiple of four bytes, escapes embedded escape
/// sequences and appends the end sequence with its checksum.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let padding = (4 - payload.len() % 4) % 4;
    let mut padded = payload.to_vec();
    padded.resize(payload.len() + padding, 0x00);

    let mut out = Vec::with_capacity(padded.len() + 16);
    out.extend_from_slice(&ESCAPE);
    out.extend_from_slice(&START);
    for chunk in padded.chunks(4) {
        if chunk == ESCAPE {
            out.extend_from_slice(&ESCAPE);
        }
        out.extend_from_slice(chunk);
    }
    out.extend_from_slice(&ESCAPE);
    out.push(END_MARK);
    out.push(padding as u8);

    let mut crc = Crc16::new();
    crc.update_bytes(&out);
    out.extend_from_slice(&crc.value_bytes());
    out
}
