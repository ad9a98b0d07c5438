//! Record classification
//!
//! Routes a decoded record according to its mapping rule: string values
//! update the derived state, numeric values become readings and are
//! dispatched, everything else is dropped silently.

use crate::dispatch::Dispatcher;
use smartmeter_core::{CodeMappingTable, DerivedState, RawRecord, Reading, ValueKind};
use std::sync::Arc;

/// What happened to a processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// No rule for the code
    Unmapped,
    /// The rule ignores the code, or a string rule lacks its variable
    Ignored,
    /// A derived state variable was set
    StateUpdated,
    /// A reading was handed to the dispatcher
    Dispatched,
    /// The value of a numeric rule could not be parsed
    Dropped,
}

/// Classifies records and routes them to state or dispatch
#[derive(Clone)]
pub struct RecordProcessor {
    table: Arc<CodeMappingTable>,
    state: DerivedState,
    dispatcher: Arc<Dispatcher>,
}

impl RecordProcessor {
    pub fn new(table: Arc<CodeMappingTable>, state: DerivedState, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            table,
            state,
            dispatcher,
        }
    }

    /// Derived state updated by string rules
    pub fn state(&self) -> &DerivedState {
        &self.state
    }

    /// Dispatcher receiving numeric readings
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process one record
    ///
    /// Never fails; every problem is confined to the record at hand.
    pub fn process(&self, record: RawRecord) -> ProcessOutcome {
        let Some(rule) = self.table.lookup(record.code.as_str()) else {
            log::trace!("Unmapped code {}", record.code);
            return ProcessOutcome::Unmapped;
        };

        match rule.value_kind {
            ValueKind::Ignored => ProcessOutcome::Ignored,
            ValueKind::String => match &rule.variable {
                Some(variable) => {
                    let value = record.value.as_text();
                    log::debug!("{} = {:?} ({})", variable, value, record.code);
                    self.state.set(variable.as_str(), value);
                    ProcessOutcome::StateUpdated
                }
                None => ProcessOutcome::Ignored,
            },
            ValueKind::Numeric => match record.value.as_f64() {
                Ok(value) => {
                    log::debug!(
                        "{} = {} {}",
                        record.code,
                        value,
                        record.unit.as_deref().unwrap_or_default()
                    );
                    self.dispatcher.dispatch(Reading {
                        code: record.code,
                        rule: Arc::clone(rule),
                        value,
                    });
                    ProcessOutcome::Dispatched
                }
                Err(e) => {
                    log::warn!("Dropping reading for {}: {}", record.code, e);
                    ProcessOutcome::Dropped
                }
            },
        }
    }
}
