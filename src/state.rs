//! Per-session mutable state.
//!
//! One `SessionState` exists per encounter attempt. It is created when the
//! session starts, replaced on wipe or zone change, and only ever touched by
//! the engine's serial loop, so it needs no interior locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::direction::DirectionBin;
use crate::error::{CalloutError, CalloutResult, ExecutionError};
use crate::event::{ActorId, ActorState};
use crate::value::StateValue;

/// Key/value store plus monotonic counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    values: BTreeMap<String, StateValue>,
    counters: BTreeMap<String, u64>,
}

impl SessionState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a value.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    /// Writes a value, returning the previous one.
    pub fn write(&mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Option<StateValue> {
        self.values.insert(key.into(), value.into())
    }

    /// Removes a value, returning it if it was set.
    pub fn delete(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    /// Returns true if `key` currently holds a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Increments a counter and returns its new value.
    ///
    /// Counters never decrease within a session; they only reset with it.
    pub fn increment(&mut self, key: &str) -> u64 {
        let slot = self.counters.entry(key.to_string()).or_insert(0);
        *slot = slot.saturating_add(1);
        *slot
    }

    /// Declares a counter at zero. An existing count is left as it is.
    pub fn init_counter(&mut self, key: &str) {
        self.counters.entry(key.to_string()).or_insert(0);
    }

    /// Returns true once a counter has been declared or incremented.
    #[must_use]
    pub fn has_counter(&self, key: &str) -> bool {
        self.counters.contains_key(key)
    }

    /// Current counter value (0 if never incremented).
    #[must_use]
    pub fn counter(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    /// Reads a value that must be present.
    pub fn require(&self, key: &str) -> CalloutResult<&StateValue> {
        self.values.get(key).ok_or_else(|| CalloutError::missing(key))
    }

    /// Reads a text value, `None` if unset.
    pub fn text(&self, key: &str) -> CalloutResult<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v.as_text().map(Some).ok_or_else(|| mismatch(key, "text", v)),
        }
    }

    /// Reads an actor id, `None` if unset. Combatant snapshots read as their id.
    pub fn actor(&self, key: &str) -> CalloutResult<Option<ActorId>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v.as_actor().map(Some).ok_or_else(|| mismatch(key, "actor", v)),
        }
    }

    /// Reads a direction, `None` if unset.
    pub fn direction(&self, key: &str) -> CalloutResult<Option<DirectionBin>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v.as_direction().map(Some).ok_or_else(|| mismatch(key, "direction", v)),
        }
    }

    /// Reads a combatant snapshot, `None` if unset.
    pub fn combatant(&self, key: &str) -> CalloutResult<Option<&ActorState>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(v) => v.as_combatant().map(Some).ok_or_else(|| mismatch(key, "combatant", v)),
        }
    }

    /// Drops every value and counter.
    pub fn clear(&mut self) {
        self.values.clear();
        self.counters.clear();
    }

    /// Number of stored values (counters excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if no values are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(key: &str, expected: &'static str, actual: &StateValue) -> CalloutError {
    CalloutError::Execution(ExecutionError::TypeMismatch {
        key: key.to_string(),
        expected,
        actual: actual.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_delete() {
        let mut state = SessionState::new();
        assert!(state.read("mech").is_none());

        assert_eq!(state.write("mech", "out"), None);
        assert_eq!(state.text("mech").unwrap(), Some("out"));

        let prev = state.write("mech", "in");
        assert_eq!(prev, Some(StateValue::Text("out".to_string())));

        assert_eq!(state.delete("mech"), Some(StateValue::Text("in".to_string())));
        assert!(!state.contains("mech"));
        assert_eq!(state.text("mech").unwrap(), None);
    }

    #[test]
    fn counters_start_at_zero_and_increment_by_one() {
        let mut state = SessionState::new();
        assert_eq!(state.counter("hits"), 0);
        assert_eq!(state.increment("hits"), 1);
        assert_eq!(state.increment("hits"), 2);
        assert_eq!(state.counter("hits"), 2);
        assert_eq!(state.counter("other"), 0);
    }

    #[test]
    fn init_counter_never_lowers_a_count() {
        let mut state = SessionState::new();
        assert!(!state.has_counter("hits"));
        state.init_counter("hits");
        assert!(state.has_counter("hits"));
        assert_eq!(state.counter("hits"), 0);

        state.increment("hits");
        state.init_counter("hits");
        assert_eq!(state.counter("hits"), 1);
    }

    #[test]
    fn counters_and_values_are_separate() {
        let mut state = SessionState::new();
        state.increment("n");
        state.write("n", 10i64);
        assert_eq!(state.counter("n"), 1);
        assert_eq!(state.read("n").and_then(StateValue::as_int), Some(10));
    }

    #[test]
    fn require_reports_missing_key() {
        let state = SessionState::new();
        let err = state.require("asuraImageId").unwrap_err();
        assert_eq!(err, CalloutError::missing("asuraImageId"));
    }

    #[test]
    fn typed_read_reports_mismatch() {
        let mut state = SessionState::new();
        state.write("loc", DirectionBin::East);
        let err = state.text("loc").unwrap_err();
        let CalloutError::Execution(ExecutionError::TypeMismatch { expected, actual, .. }) = err else {
            panic!("expected TypeMismatch, got {err:?}");
        };
        assert_eq!(expected, "text");
        assert_eq!(actual, "direction");
        assert_eq!(state.direction("loc").unwrap(), Some(DirectionBin::East));
    }

    #[test]
    fn clear_resets_everything() {
        let mut state = SessionState::new();
        state.write("a", true);
        state.increment("c");
        state.clear();
        assert!(state.is_empty());
        assert_eq!(state.counter("c"), 0);
    }
}
