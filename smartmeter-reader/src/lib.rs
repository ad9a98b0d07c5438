//! Telemetry extraction and routing engine
//!
//! Reads protocol units from an input source, decodes them into records,
//! classifies them through the code mapping table and fans numeric readings
//! out to registered consumers.
//!
//! # Control flow
//!
//! ```text
//! StreamSupervisor -> RecordSource (decoder) -> RecordProcessor
//!     -> CodeMappingTable lookup -> DerivedState update | Dispatcher -> consumers
//! ```

pub mod decoder;
pub mod source;
pub mod processor;
pub mod dispatch;
pub mod supervisor;

pub use smartmeter_core::{MeterError, MeterResult};
pub use decoder::{StructuredDecoder, TextLineDecoder};
pub use source::{DecodedUnit, RecordSource, SourceFormat, StructuredEntrySource, TextLineSource, build_source};
pub use processor::{ProcessOutcome, RecordProcessor};
pub use dispatch::{ConsumerHandler, DispatchStatistics, Dispatcher, FnHandler};
pub use supervisor::{Backoff, StreamSupervisor, SupervisorHandle, SupervisorState, SupervisorStatistics};
