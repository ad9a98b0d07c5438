//! Core types for the smart meter telemetry bridge
//!
//! This crate provides the types shared by every layer of the bridge:
//! OBIS codes, decoded records and readings, the code mapping table and
//! the derived state store used to label readings.

pub mod error;
pub mod obis_code;
pub mod record;
pub mod mapping;
pub mod state;

pub use error::{MeterError, MeterResult};
pub use obis_code::ObisCode;
pub use record::{EntryValue, RawRecord, RawValue, Reading};
pub use mapping::{CodeMappingTable, MappingConfig, MappingRule, MetricDescriptor, RuleConfig, ValueKind};
pub use state::DerivedState;
