use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// OBIS (Object Identification System) code identifying a metering value
///
/// Codes are kept in their textual form, e.g. `1-0:1.8.0*255`, and are
/// compared as opaque keys. No value group is interpreted for lookups;
/// two codes are equal only if their strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObisCode(String);

impl ObisCode {
    /// Create an OBIS code from its textual form
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Build an OBIS code from the six value group bytes of a binary stream
    ///
    /// The bytes are rendered as `A-B:C.D.E*F` in decimal, which is the
    /// same form the textual decoders emit.
    ///
    /// # Arguments
    ///
    /// * `bytes` - Value groups A to F
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let [a, b, c, d, e, f] = bytes;
        Self(format!("{}-{}:{}.{}.{}*{}", a, b, c, d, e, f))
    }

    /// Get the textual form of the code
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ObisCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObisCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}
