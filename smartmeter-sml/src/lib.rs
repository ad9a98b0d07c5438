//! Smart Message Language (SML) decoding
//!
//! SML is the binary push protocol spoken by German smart meters on their
//! optical interface. This crate implements the pieces needed to turn the
//! raw byte stream into metering entries:
//!
//! - `crc`: CRC-16/X.25 used by the SML transport layer
//! - `frame`: transport framing (escape sequences, padding, checksum)
//! - `tlv`: type-length-value encoding of SML data
//! - `message`: extraction of `GetListResponse` list entries
//! - `unit`: DLMS unit codes to symbols

pub mod crc;
pub mod frame;
pub mod tlv;
pub mod message;
pub mod unit;

pub use smartmeter_core::{MeterError, MeterResult};
pub use frame::SmlFrameDecoder;
pub use message::{SmlListEntry, parse_list_entries};
pub use tlv::{SmlParser, SmlValue};
