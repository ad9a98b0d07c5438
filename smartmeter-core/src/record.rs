//! Decoded records and readings
//!
//! A [`RawRecord`] is what a decoder extracts from one protocol unit. It only
//! lives while that unit is processed. A [`Reading`] is a classified numeric
//! value ready to be handed to consumers.

use crate::error::{MeterError, MeterResult};
use crate::mapping::MappingRule;
use crate::obis_code::ObisCode;
use std::fmt::Write;
use std::sync::Arc;

/// Value carried by a structured stream entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryValue {
    /// Octet string (device identifiers, manufacturer tags, ...)
    Octets(Vec<u8>),
    /// Boolean flag
    Bool(bool),
    /// Signed integer with a decimal scaler
    Signed { value: i64, scaler: i8 },
    /// Unsigned integer with a decimal scaler
    Unsigned { value: u64, scaler: i8 },
}

impl EntryValue {
    /// Floating-point representation, with the scaler applied
    pub fn as_f64(&self) -> MeterResult<f64> {
        match self {
            Self::Octets(_) => Err(MeterError::InvalidData(
                "Octet string has no numeric representation".to_string(),
            )),
            Self::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Self::Signed { value, scaler } => Ok(scale(*value as f64, *scaler)),
            Self::Unsigned { value, scaler } => Ok(scale(*value as f64, *scaler)),
        }
    }

    /// String representation
    ///
    /// Printable octet strings are returned as text, other octet strings as
    /// upper-case hex pairs separated by spaces.
    pub fn as_text(&self) -> String {
        match self {
            Self::Octets(bytes) => {
                if !bytes.is_empty() && bytes.iter().all(|b| (0x20..=0x7E).contains(b)) {
                    String::from_utf8_lossy(bytes).into_owned()
                } else {
                    hex_pairs(bytes)
                }
            }
            Self::Bool(b) => b.to_string(),
            Self::Signed { scaler: 0, value } => value.to_string(),
            Self::Unsigned { scaler: 0, value } => value.to_string(),
            Self::Signed { value, scaler } => scale(*value as f64, *scaler).to_string(),
            Self::Unsigned { value, scaler } => scale(*value as f64, *scaler).to_string(),
        }
    }
}

/// Divide for negative scalers so that e.g. 7682 * 10^-1 yields exactly 768.2
fn scale(value: f64, scaler: i8) -> f64 {
    if scaler < 0 {
        value / 10f64.powi(-(scaler as i32))
    } else {
        value * 10f64.powi(scaler as i32)
    }
}

fn hex_pairs(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Raw value of a record, as produced by one of the decoding strategies
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Value segment of a textual line
    Text(String),
    /// Value of a structured stream entry
    Entry(EntryValue),
}

impl RawValue {
    /// String representation, trimmed of surrounding whitespace
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(s) => s.trim().to_string(),
            Self::Entry(v) => v.as_text(),
        }
    }

    /// Floating-point representation
    ///
    /// # Returns
    ///
    /// `Err(MeterError::InvalidData)` if the value is not numeric
    pub fn as_f64(&self) -> MeterResult<f64> {
        match self {
            Self::Text(s) => s.trim().parse::<f64>().map_err(|e| {
                MeterError::InvalidData(format!("Invalid numeric value {:?}: {}", s, e))
            }),
            Self::Entry(v) => v.as_f64(),
        }
    }
}

/// One decoded `(code, value, unit)` triple
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub code: ObisCode,
    pub value: RawValue,
    pub unit: Option<String>,
}

impl RawRecord {
    /// Create a record from a textual line's segments
    pub fn text(code: impl Into<String>, value: impl Into<String>, unit: Option<String>) -> Self {
        Self {
            code: ObisCode::new(code),
            value: RawValue::Text(value.into()),
            unit,
        }
    }

    /// Create a record from a structured stream entry
    pub fn entry(code: ObisCode, value: EntryValue, unit: Option<String>) -> Self {
        Self {
            code,
            value: RawValue::Entry(value),
            unit,
        }
    }
}

/// A classified numeric value, the unit of dispatch to consumers
#[derive(Debug, Clone)]
pub struct Reading {
    pub code: ObisCode,
    pub rule: Arc<MappingRule>,
    pub value: f64,
}
