//! SML type-length-value encoding
//!
//! Every SML value starts with one or more TL bytes:
//!
//! ```text
//!  bit 7    : another TL byte follows
//!  bits 6-4 : type (000 octet string, 100 boolean, 101 integer,
//!             110 unsigned, 111 list)
//!  bits 3-0 : length nibble
//! ```
//!
//! For lists the length is the number of elements. For all other types it
//! is the total size in bytes, TL bytes included. `0x00` marks the end of a
//! message and `0x01` an omitted optional value.

use smartmeter_core::{MeterError, MeterResult};

const TYPE_OCTET_STRING: u8 = 0b000;
const TYPE_BOOLEAN: u8 = 0b100;
const TYPE_INTEGER: u8 = 0b101;
const TYPE_UNSIGNED: u8 = 0b110;
const TYPE_LIST: u8 = 0b111;

const MAX_DEPTH: usize = 16;

/// A decoded SML value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmlValue {
    OctetString(Vec<u8>),
    Bool(bool),
    Int(i64),
    UInt(u64),
    List(Vec<SmlValue>),
    /// Omitted optional value (`0x01`)
    None,
    /// End of message marker (`0x00`)
    EndOfMessage,
}

impl SmlValue {
    /// Numeric value as unsigned, if it is one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Numeric value as signed, if it is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Elements of a list
    pub fn as_list(&self) -> Option<&[SmlValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Encode the value, appending to `out`
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::EndOfMessage => out.push(0x00),
            Self::None => out.push(0x01),
            Self::OctetString(bytes) => {
                encode_sized_tl(TYPE_OCTET_STRING, bytes.len(), out);
                out.extend_from_slice(bytes);
            }
            Self::Bool(b) => {
                out.push(0x42);
                out.push(if *b { 0x01 } else { 0x00 });
            }
            Self::Int(v) => {
                let size = match *v {
                    -0x80..=0x7F => 1,
                    -0x8000..=0x7FFF => 2,
                    -0x8000_0000..=0x7FFF_FFFF => 4,
                    _ => 8,
                };
                out.push((TYPE_INTEGER << 4) | (size as u8 + 1));
                out.extend_from_slice(&v.to_be_bytes()[8 - size..]);
            }
            Self::UInt(v) => {
                let size = match *v {
                    0..=0xFF => 1,
                    0x100..=0xFFFF => 2,
                    0x1_0000..=0xFFFF_FFFF => 4,
                    _ => 8,
                };
                out.push((TYPE_UNSIGNED << 4) | (size as u8 + 1));
                out.extend_from_slice(&v.to_be_bytes()[8 - size..]);
            }
            Self::List(items) => {
                encode_tl(TYPE_LIST, items.len(), out);
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Encode the value into a new buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// TL bytes for a type whose length counts the TL bytes themselves
fn encode_sized_tl(ty: u8, data_len: usize, out: &mut Vec<u8>) {
    let mut tl_len = 1;
    while data_len + tl_len >= 1usize << (4 * tl_len) {
        tl_len += 1;
    }
    encode_tl_nibbles(ty, data_len + tl_len, tl_len, out);
}

fn encode_tl(ty: u8, len: usize, out: &mut Vec<u8>) {
    let mut tl_len = 1;
    while len >= 1usize << (4 * tl_len) {
        tl_len += 1;
    }
    encode_tl_nibbles(ty, len, tl_len, out);
}

fn encode_tl_nibbles(ty: u8, len: usize, tl_len: usize, out: &mut Vec<u8>) {
    for i in 0..tl_len {
        let nibble = ((len >> (4 * (tl_len - 1 - i))) & 0x0F) as u8;
        let more = if i + 1 < tl_len { 0x80 } else { 0x00 };
        let ty_bits = if i == 0 { ty << 4 } else { 0x00 };
        out.push(more | ty_bits | nibble);
    }
}

/// SML decoder over a byte buffer
pub struct SmlParser<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> SmlParser<'a> {
    /// Create a new parser
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Check if all input has been consumed
    pub fn is_empty(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Current position in the buffer
    pub fn position(&self) -> usize {
        self.position
    }

    /// Decode the next value
    pub fn parse_value(&mut self) -> MeterResult<SmlValue> {
        self.parse_at_depth(0)
    }

    fn parse_at_depth(&mut self, depth: usize) -> MeterResult<SmlValue> {
        if depth > MAX_DEPTH {
            return Err(MeterError::Protocol(format!(
                "SML nesting deeper than {} at offset {}",
                MAX_DEPTH, self.position
            )));
        }

        let start = self.position;
        let first = self.read_byte()?;
        match first {
            0x00 => return Ok(SmlValue::EndOfMessage),
            0x01 => return Ok(SmlValue::None),
            _ => {}
        }

        let ty = (first >> 4) & 0x07;
        let mut len = (first & 0x0F) as usize;
        let mut more = first & 0x80 != 0;
        while more {
            let next = self.read_byte()?;
            if next & 0x70 != 0 {
                return Err(MeterError::Protocol(format!(
                    "Invalid TL continuation byte 0x{:02X} at offset {}",
                    next,
                    self.position - 1
                )));
            }
            more = next & 0x80 != 0;
            len = len
                .checked_mul(16)
                .map(|len| len | (next & 0x0F) as usize)
                .ok_or_else(|| MeterError::Protocol(format!("SML length overflows at offset {}", start)))?;
        }
        let tl_len = self.position - start;

        if ty == TYPE_LIST {
            // Every element takes at least one byte
            let remaining = self.buffer.len() - self.position;
            if len > remaining {
                return Err(MeterError::Protocol(format!(
                    "SML list of {} elements exceeds the {} remaining bytes at offset {}",
                    len, remaining, start
                )));
            }
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(self.parse_at_depth(depth + 1)?);
            }
            return Ok(SmlValue::List(items));
        }

        let data_len = len.checked_sub(tl_len).ok_or_else(|| {
            MeterError::Protocol(format!("SML length {} shorter than its TL field at offset {}", len, start))
        })?;
        let data = self.read_bytes(data_len)?;

        match ty {
            TYPE_OCTET_STRING => Ok(SmlValue::OctetString(data.to_vec())),
            TYPE_BOOLEAN => Ok(SmlValue::Bool(data.iter().any(|b| *b != 0))),
            TYPE_INTEGER => Ok(SmlValue::Int(decode_signed(data, start)?)),
            TYPE_UNSIGNED => Ok(SmlValue::UInt(decode_unsigned(data, start)?)),
            other => Err(MeterError::Protocol(format!(
                "Unknown SML type {:03b} at offset {}",
                other, start
            ))),
        }
    }

    fn read_byte(&mut self) -> MeterResult<u8> {
        let byte = *self.buffer.get(self.position).ok_or_else(|| {
            MeterError::Protocol(format!("Unexpected end of SML data at offset {}", self.position))
        })?;
        self.position += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> MeterResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                MeterError::Protocol(format!(
                    "SML value of {} bytes exceeds buffer at offset {}",
                    len, self.position
                ))
            })?;
        let data = &self.buffer[self.position..end];
        self.position = end;
        Ok(data)
    }
}

fn check_integer_size(data: &[u8], offset: usize) -> MeterResult<()> {
    if data.is_empty() || data.len() > 8 {
        return Err(MeterError::Protocol(format!(
            "Invalid SML integer size {} at offset {}",
            data.len(),
            offset
        )));
    }
    Ok(())
}

fn decode_unsigned(data: &[u8], offset: usize) -> MeterResult<u64> {
    check_integer_size(data, offset)?;
    Ok(data.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

fn decode_signed(data: &[u8], offset: usize) -> MeterResult<i64> {
    check_integer_size(data, offset)?;
    let unsigned = decode_unsigned(data, offset)?;
    let shift = 64 - 8 * data.len() as u32;
    // Sign-extend from the top bit of the encoded width
    Ok(((unsigned << shift) as i64) >> shift)
}
