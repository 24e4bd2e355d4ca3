//! Event matching.
//!
//! The matcher is stateless: it tests one event against every definition of
//! the set registered for that event type and returns the matches in
//! registration order. Session state is only read, by the optional condition.

use std::sync::Arc;

use crate::event::LogEvent;
use crate::state::SessionState;

use super::definition::TriggerDefinition;
use super::set::TriggerSet;

/// Why a definition did not match.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    EventType,
    Field(String),
    Source,
    Target,
    Condition,
}

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutput {
    NoMatch(MissReason),
    Match,
}

impl MatchOutput {
    #[allow(missing_docs)]
    #[must_use]
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct EventMatcher {
    set: Arc<TriggerSet>,
}

impl EventMatcher {
    #[must_use]
    pub fn new(set: Arc<TriggerSet>) -> Self {
        Self { set }
    }

    /// The trigger set being matched against.
    #[must_use]
    pub fn set(&self) -> &Arc<TriggerSet> {
        &self.set
    }

    /// Indices of every matching definition, in registration order.
    #[must_use]
    pub fn matches(&self, event: &LogEvent, state: &SessionState) -> Vec<usize> {
        self.set
            .candidates(event.event_type)
            .iter()
            .copied()
            .filter(|&idx| Self::evaluate(self.set.definition(idx), event, state).is_match())
            .collect()
    }

    /// Tests one definition against one event.
    ///
    /// Filters are checked cheapest first; the condition only runs once every
    /// declarative filter has passed.
    #[must_use]
    pub fn evaluate(def: &TriggerDefinition, event: &LogEvent, state: &SessionState) -> MatchOutput {
        if def.event_type != event.event_type {
            return MatchOutput::NoMatch(MissReason::EventType);
        }

        if let Some(source) = &def.source {
            if event.source.as_deref() != Some(source.as_str()) {
                return MatchOutput::NoMatch(MissReason::Source);
            }
        }
        if let Some(target) = &def.target {
            if event.target.as_deref() != Some(target.as_str()) {
                return MatchOutput::NoMatch(MissReason::Target);
            }
        }

        for (name, matcher) in &def.fields {
            let Some(value) = event.get(name) else {
                return MatchOutput::NoMatch(MissReason::Field(name.clone()));
            };
            if !matcher.matches(value) {
                return MatchOutput::NoMatch(MissReason::Field(name.clone()));
            }
        }

        if let Some(condition) = &def.condition {
            if !condition(state, event) {
                return MatchOutput::NoMatch(MissReason::Condition);
            }
        }

        MatchOutput::Match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;

    use crate::event::EventType;
    use crate::trigger::definition::FieldPattern;

    fn set() -> Arc<TriggerSet> {
        Arc::new(
            TriggerSet::builder("test")
                .trigger(
                    TriggerDefinition::builder("Cleave", EventType::StartsUsing)
                        .id("8CA0")
                        .source("Asura")
                        .build()
                        .unwrap(),
                )
                .trigger(
                    TriggerDefinition::builder("Faces", EventType::StartsUsing)
                        .id_matches(FieldPattern::any_of(["8C90", "8C92"]))
                        .build()
                        .unwrap(),
                )
                .trigger(
                    TriggerDefinition::builder("Gated", EventType::StartsUsing)
                        .id_matches(FieldPattern::regex("8C9[0-9]"))
                        .condition(|state, _| state.counter("n") >= 1)
                        .build()
                        .unwrap(),
                )
                .trigger(
                    TriggerDefinition::builder("Marker", EventType::HeadMarker)
                        .id_matches(FieldPattern::Numeric(0x1C7))
                        .target("Player One")
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        )
    }

    fn starts_using(id: &str, source: &str) -> LogEvent {
        LogEvent::new(EventType::StartsUsing, id, Utc::now()).with_source("40000001", source)
    }

    #[test]
    fn exact_id_and_source() {
        let matcher = EventMatcher::new(set());
        let state = SessionState::new();
        assert_eq!(matcher.matches(&starts_using("8CA0", "Asura"), &state), vec![0]);
        assert!(matcher.matches(&starts_using("8CA0", "Asura Image"), &state).is_empty());
    }

    #[test]
    fn any_of_and_condition() {
        let matcher = EventMatcher::new(set());
        let mut state = SessionState::new();
        let ev = starts_using("8C92", "Asura");

        assert_eq!(matcher.matches(&ev, &state), vec![1]);
        state.increment("n");
        assert_eq!(matcher.matches(&ev, &state), vec![1, 2]);
        assert!(matcher.matches(&starts_using("8C91", "Asura"), &SessionState::new()).is_empty());
    }

    #[test]
    fn miss_reasons() {
        let set = set();
        let state = SessionState::new();
        let cleave = set.definition(0);
        let gated = set.definition(2);
        let marker = set.definition(3);

        assert_eq!(
            EventMatcher::evaluate(cleave, &starts_using("8CA1", "Asura"), &state),
            MatchOutput::NoMatch(MissReason::Field("id".to_string()))
        );
        assert_eq!(
            EventMatcher::evaluate(cleave, &starts_using("8CA0", "Phantom Asura"), &state),
            MatchOutput::NoMatch(MissReason::Source)
        );
        assert_eq!(
            EventMatcher::evaluate(gated, &starts_using("8C95", "Asura"), &state),
            MatchOutput::NoMatch(MissReason::Condition)
        );
        assert_eq!(
            EventMatcher::evaluate(marker, &starts_using("01C7", "Asura"), &state),
            MatchOutput::NoMatch(MissReason::EventType)
        );

        let ev = LogEvent::new(EventType::HeadMarker, "01c7", Utc::now()).with_target("10000001", "Player Two");
        assert_eq!(EventMatcher::evaluate(marker, &ev, &state), MatchOutput::NoMatch(MissReason::Target));
    }

    #[test]
    fn matching_is_deterministic() {
        let matcher = EventMatcher::new(set());
        let mut state = SessionState::new();
        state.increment("n");
        let ev = starts_using("8C90", "Asura");
        let first = matcher.matches(&ev, &state);
        for _ in 0..10 {
            assert_eq!(matcher.matches(&ev, &state), first);
        }
    }
}
