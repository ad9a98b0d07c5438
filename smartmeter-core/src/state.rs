//! Derived state store
//!
//! Holds the last seen string value per variable name, e.g. the meter's
//! server id carried by `1-0:96.1.0*255`, so consumers can attach it as a
//! label to numeric readings.
//!
//! # Consistency
//!
//! Writes happen on the decode path while consumers read concurrently from
//! their own tasks. A read always observes either the previous or the new
//! value, never a partial one. There is no ordering between a write and a
//! reading that is already being dispatched: the label a consumer sees is
//! the most recent value at the time it looks, not the value current when
//! the reading was decoded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared map of variable name to last string value
///
/// Cloning is cheap and every clone refers to the same store.
#[derive(Debug, Clone, Default)]
pub struct DerivedState {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl DerivedState {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the value of a variable
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(name.into(), value.into());
    }

    /// Get the current value of a variable
    pub fn get(&self, name: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(name).cloned()
    }

    /// Get the current value of a variable, or an empty string if unset
    pub fn get_or_empty(&self, name: &str) -> String {
        self.get(name).unwrap_or_default()
    }

    /// Copy of all current values
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_set_overwrites() {
        let state = DerivedState::new();
        assert_eq!(state.get("server_id"), None);
        assert_eq!(state.get_or_empty("server_id"), "");

        state.set("server_id", "AB CD");
        state.set("server_id", "EF 01");
        assert_eq!(state.get("server_id").as_deref(), Some("EF 01"));
        assert_eq!(state.snapshot().len(), 1);
    }

    #[test]
    fn test_clones_share_values() {
        let state = DerivedState::new();
        let reader = state.clone();
        state.set("server_id", "AB");
        assert_eq!(reader.get("server_id").as_deref(), Some("AB"));
    }

    #[test]
    fn test_concurrent_reads_see_whole_values() {
        let state = DerivedState::new();
        state.set("server_id", "old");

        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                for i in 0..1000 {
                    state.set("server_id", if i % 2 == 0 { "new" } else { "old" });
                }
            })
        };
        for _ in 0..1000 {
            let value = state.get_or_empty("server_id");
            assert!(value == "old" || value == "new");
        }
        writer.join().unwrap();
    }
}
