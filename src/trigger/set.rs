//! Trigger set registry.
//!
//! A `TriggerSet` is the static, validated table of definitions for one
//! encounter, indexed by identity and by event type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::direction::Position;
use crate::error::ValidationError;
use crate::event::EventType;
use crate::state::SessionState;

use super::definition::{TriggerDefinition, TriggerId};

/// Seeds session state at every session (re)start.
pub type InitStateFn = Arc<dyn Fn(&mut SessionState) + Send + Sync>;

/// Validated, immutable collection of trigger definitions.
#[derive(Clone)]
pub struct TriggerSet {
    id: String,
    zone_id: Option<u32>,
    center: Position,
    init_state: Option<InitStateFn>,
    definitions: Vec<TriggerDefinition>,
    by_id: HashMap<TriggerId, usize>,
    by_type: HashMap<EventType, Vec<usize>>,
}

impl TriggerSet {
    /// Starts building a set.
    #[must_use]
    pub fn builder(id: impl Into<String>) -> TriggerSetBuilder {
        TriggerSetBuilder {
            id: id.into(),
            zone_id: None,
            center: Position::new(0.0, 0.0),
            init_state: None,
            definitions: Vec::new(),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn zone_id(&self) -> Option<u32> {
        self.zone_id
    }

    /// Reference center handed to callbacks.
    #[must_use]
    pub const fn center(&self) -> Position {
        self.center
    }

    /// Definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> &[TriggerDefinition] {
        &self.definitions
    }

    /// Looks a definition up by identity.
    #[must_use]
    pub fn get(&self, id: &TriggerId) -> Option<&TriggerDefinition> {
        self.by_id.get(id).map(|&idx| &self.definitions[idx])
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if the set has no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Fresh session state with the set's initial values applied.
    #[must_use]
    pub fn initial_state(&self) -> SessionState {
        let mut state = SessionState::new();
        if let Some(init) = &self.init_state {
            init(&mut state);
        }
        state
    }

    pub(crate) fn candidates(&self, event_type: EventType) -> &[usize] {
        match self.by_type.get(&event_type) {
            Some(indices) => indices,
            None => &[],
        }
    }

    pub(crate) fn definition(&self, idx: usize) -> &TriggerDefinition {
        &self.definitions[idx]
    }
}

impl fmt::Debug for TriggerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerSet")
            .field("id", &self.id)
            .field("zone_id", &self.zone_id)
            .field("center", &self.center)
            .field("definitions", &self.definitions.len())
            .finish_non_exhaustive()
    }
}

/// Builder for `TriggerSet`.
pub struct TriggerSetBuilder {
    id: String,
    zone_id: Option<u32>,
    center: Position,
    init_state: Option<InitStateFn>,
    definitions: Vec<TriggerDefinition>,
}

impl TriggerSetBuilder {
    #[allow(missing_docs)]
    #[must_use]
    pub fn zone_id(mut self, zone_id: u32) -> Self {
        self.zone_id = Some(zone_id);
        self
    }

    /// Arena center used for direction resolution.
    #[must_use]
    pub fn center(mut self, center: Position) -> Self {
        self.center = center;
        self
    }

    /// Seeds every new session's state.
    #[must_use]
    pub fn init_state<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SessionState) + Send + Sync + 'static,
    {
        self.init_state = Some(Arc::new(f));
        self
    }

    /// Appends a definition.
    #[must_use]
    pub fn trigger(mut self, definition: TriggerDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Validates identities and builds the indexes.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::DuplicateTrigger` if two definitions share an id.
    pub fn build(self) -> Result<TriggerSet, ValidationError> {
        let mut by_id = HashMap::with_capacity(self.definitions.len());
        let mut by_type: HashMap<EventType, Vec<usize>> = HashMap::new();

        for (idx, def) in self.definitions.iter().enumerate() {
            if by_id.insert(def.id.clone(), idx).is_some() {
                return Err(ValidationError::DuplicateTrigger {
                    id: def.id.to_string(),
                });
            }
            by_type.entry(def.event_type).or_default().push(idx);
        }

        Ok(TriggerSet {
            id: self.id,
            zone_id: self.zone_id,
            center: self.center,
            init_state: self.init_state,
            definitions: self.definitions,
            by_id,
            by_type,
        })
    }
}
