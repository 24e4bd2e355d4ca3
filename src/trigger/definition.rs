//! Trigger definitions.
//!
//! A definition is a fixed set of declarative filters (event type, field
//! patterns, actor names) plus named callbacks for the parts that need code:
//! an optional condition over session state, the output computation and the
//! state mutation. Definitions are immutable once built and are shared between
//! engines through `Arc<TriggerSet>`.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::MAX_TIMING_SECS;
use crate::direction::Position;
use crate::error::{CalloutResult, ValidationError};
use crate::event::{ActorState, EventType, LogEvent};
use crate::output::{AlertLevel, InstanceId, TriggerOutput};
use crate::state::SessionState;

/// Stable identity of a trigger definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    /// Wraps a trigger name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The trigger name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

/// How a single event field must look for a definition to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldPattern {
    /// Exact, case-sensitive string equality.
    Exact(String),
    /// Hex identifier compared numerically (case and leading zeros ignored).
    Numeric(u64),
    /// Any of an explicit set of exact strings.
    AnyOf(Vec<String>),
    /// Regular expression anchored to the whole field.
    Regex(String),
}

impl FieldPattern {
    /// Exact match shorthand.
    #[must_use]
    pub fn exact(v: impl Into<String>) -> Self {
        Self::Exact(v.into())
    }

    /// Any-of shorthand.
    #[must_use]
    pub fn any_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AnyOf(values.into_iter().map(Into::into).collect())
    }

    /// Regex shorthand.
    #[must_use]
    pub fn regex(v: impl Into<String>) -> Self {
        Self::Regex(v.into())
    }

    fn compile(&self, trigger: &str, field: &str) -> Result<FieldMatcher, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidFieldPattern {
            trigger: trigger.to_string(),
            field: field.to_string(),
            reason,
        };

        match self {
            Self::Exact(v) => Ok(FieldMatcher::Exact(v.clone())),
            Self::Numeric(v) => Ok(FieldMatcher::Numeric(*v)),
            Self::AnyOf(values) => {
                if values.is_empty() {
                    return Err(invalid("any-of set is empty".to_string()));
                }
                Ok(FieldMatcher::AnyOf(values.clone()))
            }
            Self::Regex(pattern) => {
                if pattern.is_empty() {
                    return Err(invalid("regex is empty".to_string()));
                }
                Regex::new(&format!("^(?:{pattern})$"))
                    .map(FieldMatcher::Regex)
                    .map_err(|e| invalid(e.to_string()))
            }
        }
    }
}

/// Parses bare hex digits; signs and other prefixes are rejected.
fn parse_hex(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(value, 16).ok()
}

#[derive(Debug, Clone)]
pub(crate) enum FieldMatcher {
    Exact(String),
    Numeric(u64),
    AnyOf(Vec<String>),
    Regex(Regex),
}

impl FieldMatcher {
    pub(crate) fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(v) => v == value,
            Self::Numeric(v) => parse_hex(value).is_some_and(|n| n == *v),
            Self::AnyOf(values) => values.iter().any(|v| v == value),
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// Which part of the matching event keys suppression and replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "field", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// One slot per definition.
    #[default]
    None,
    /// One slot per source actor.
    SourceId,
    /// One slot per target actor.
    TargetId,
    /// One slot per value of a named field.
    Field(String),
}

impl CorrelationKey {
    /// The slot key for `event`.
    #[must_use]
    pub fn key_for(&self, event: &LogEvent) -> Option<String> {
        match self {
            Self::None => None,
            Self::SourceId => event.source_id.clone(),
            Self::TargetId => event.target_id.clone(),
            Self::Field(name) => event.get(name).map(str::to_string),
        }
    }
}

/// Which actors to request when a definition fetches live data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum ActorSelector {
    /// The matching event's target.
    EventTarget,
    /// The matching event's source.
    EventSource,
    /// The matching event's `id` field.
    EventId,
    /// The actor id currently stored under a session key.
    State(String),
}

/// Validation context snapshotted when a fetch is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum FetchGuard {
    /// The session value under the key must be unchanged when the result arrives.
    Unchanged(String),
    /// Every fetched actor must be the actor currently tracked under the key.
    TracksActor(String),
}

impl FetchGuard {
    /// The guarded session key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Unchanged(key) | Self::TracksActor(key) => key,
        }
    }
}

/// Live data a definition needs before its output can be computed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSpec {
    pub actors: ActorSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<FetchGuard>,
}

impl FetchSpec {
    /// Fetch the selected actors without a staleness guard.
    #[must_use]
    pub const fn new(actors: ActorSelector) -> Self {
        Self { actors, guard: None }
    }

    /// Attach a staleness guard.
    #[must_use]
    pub fn guarded(mut self, guard: FetchGuard) -> Self {
        self.guard = Some(guard);
        self
    }
}

/// Inputs available to output and mutation callbacks when an instance fires.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy)]
pub struct FireContext<'a> {
    pub instance_id: InstanceId,
    pub event: &'a LogEvent,
    /// Actors fetched for this instance; empty when the definition does not fetch.
    pub fetched: &'a [ActorState],
    pub fired_at: DateTime<Utc>,
    /// Reference center of the arena this trigger set belongs to.
    pub center: Position,
}

/// Predicate over session state and the matched event.
pub type ConditionFn = Arc<dyn Fn(&SessionState, &LogEvent) -> bool + Send + Sync>;
/// Computes the symbolic output of a firing.
pub type OutputFn = Arc<dyn Fn(&SessionState, &FireContext<'_>) -> CalloutResult<Option<TriggerOutput>> + Send + Sync>;
/// Mutates session state after a firing.
pub type MutationFn = Arc<dyn Fn(&mut SessionState, &FireContext<'_>) -> CalloutResult<()> + Send + Sync>;

/// A registered trigger definition.
#[derive(Clone)]
pub struct TriggerDefinition {
    pub(crate) id: TriggerId,
    pub(crate) event_type: EventType,
    pub(crate) fields: Vec<(String, FieldMatcher)>,
    pub(crate) source: Option<String>,
    pub(crate) target: Option<String>,
    pub(crate) condition: Option<ConditionFn>,
    pub(crate) delay: Duration,
    pub(crate) duration: Option<Duration>,
    pub(crate) suppress: Option<Duration>,
    pub(crate) correlation: CorrelationKey,
    pub(crate) fetch: Option<FetchSpec>,
    pub(crate) level: AlertLevel,
    pub(crate) output: Option<OutputFn>,
    pub(crate) mutation: Option<MutationFn>,
}

impl TriggerDefinition {
    /// Starts building a definition.
    #[must_use]
    pub fn builder(id: impl Into<String>, event_type: EventType) -> TriggerDefinitionBuilder {
        TriggerDefinitionBuilder::new(id, event_type)
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn id(&self) -> &TriggerId {
        &self.id
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.duration
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn suppress(&self) -> Option<Duration> {
        self.suppress
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn fetch(&self) -> Option<&FetchSpec> {
        self.fetch.as_ref()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn correlation(&self) -> &CorrelationKey {
        &self.correlation
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn level(&self) -> AlertLevel {
        self.level
    }
}

impl fmt::Debug for TriggerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDefinition")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("fields", &self.fields.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("source", &self.source)
            .field("target", &self.target)
            .field("has_condition", &self.condition.is_some())
            .field("delay", &self.delay)
            .field("duration", &self.duration)
            .field("suppress", &self.suppress)
            .field("correlation", &self.correlation)
            .field("fetch", &self.fetch)
            .field("level", &self.level)
            .field("has_output", &self.output.is_some())
            .field("has_mutation", &self.mutation.is_some())
            .finish()
    }
}

/// Builder for `TriggerDefinition`.
pub struct TriggerDefinitionBuilder {
    id: String,
    event_type: EventType,
    fields: Vec<(String, FieldPattern)>,
    source: Option<String>,
    target: Option<String>,
    condition: Option<ConditionFn>,
    delay_secs: Option<f64>,
    duration_secs: Option<f64>,
    suppress_secs: Option<f64>,
    correlation: CorrelationKey,
    fetch: Option<FetchSpec>,
    level: AlertLevel,
    output: Option<OutputFn>,
    mutation: Option<MutationFn>,
}

impl TriggerDefinitionBuilder {
    fn new(id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: id.into(),
            event_type,
            fields: Vec::new(),
            source: None,
            target: None,
            condition: None,
            delay_secs: None,
            duration_secs: None,
            suppress_secs: None,
            correlation: CorrelationKey::None,
            fetch: None,
            level: AlertLevel::Info,
            output: None,
            mutation: None,
        }
    }

    /// Requires a field to match a pattern.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, pattern: FieldPattern) -> Self {
        self.fields.push((name.into(), pattern));
        self
    }

    /// Requires the `id` field to match a pattern.
    #[must_use]
    pub fn id_matches(self, pattern: FieldPattern) -> Self {
        self.field("id", pattern)
    }

    /// Requires the `id` field to equal one value.
    #[must_use]
    pub fn id(self, id: impl Into<String>) -> Self {
        self.field("id", FieldPattern::Exact(id.into()))
    }

    /// Requires the source actor name.
    #[must_use]
    pub fn source(mut self, name: impl Into<String>) -> Self {
        self.source = Some(name.into());
        self
    }

    /// Requires the target actor name.
    #[must_use]
    pub fn target(mut self, name: impl Into<String>) -> Self {
        self.target = Some(name.into());
        self
    }

    /// Adds a pure predicate over session state and the event.
    #[must_use]
    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionState, &LogEvent) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    /// Seconds between match and firing.
    #[must_use]
    pub fn delay_secs(mut self, secs: f64) -> Self {
        self.delay_secs = Some(secs);
        self
    }

    /// Seconds the output stays valid.
    #[must_use]
    pub fn duration_secs(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Minimum seconds between firings of the same slot.
    #[must_use]
    pub fn suppress_secs(mut self, secs: f64) -> Self {
        self.suppress_secs = Some(secs);
        self
    }

    /// Keys suppression and replacement by part of the event.
    #[must_use]
    pub fn correlate(mut self, key: CorrelationKey) -> Self {
        self.correlation = key;
        self
    }

    /// Fetches live actor data before firing.
    #[must_use]
    pub fn fetch(mut self, spec: FetchSpec) -> Self {
        self.fetch = Some(spec);
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn level(mut self, level: AlertLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the output computation.
    #[must_use]
    pub fn output<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionState, &FireContext<'_>) -> CalloutResult<Option<TriggerOutput>> + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(f));
        self
    }

    /// Emits a fixed output variant on every firing.
    #[must_use]
    pub fn response(self, variant: &'static str) -> Self {
        self.output(move |_, _| Ok(Some(TriggerOutput::new(variant))))
    }

    /// Sets the state mutation run after the output is computed.
    #[must_use]
    pub fn run<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut SessionState, &FireContext<'_>) -> CalloutResult<()> + Send + Sync + 'static,
    {
        self.mutation = Some(Arc::new(f));
        self
    }

    /// Validates filters and timing and compiles field patterns.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::EmptyTriggerId`, `InvalidFieldPattern` for a
    /// malformed pattern, or `InvalidTiming` for seconds that are negative,
    /// non-finite or longer than `MAX_TIMING_SECS`.
    pub fn build(self) -> Result<TriggerDefinition, ValidationError> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(ValidationError::EmptyTriggerId);
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, pattern) in &self.fields {
            fields.push((name.clone(), pattern.compile(&id, name)?));
        }

        let delay = seconds(&id, "delay", self.delay_secs)?.unwrap_or_else(Duration::zero);
        let duration = seconds(&id, "duration", self.duration_secs)?;
        let suppress = seconds(&id, "suppress", self.suppress_secs)?;

        Ok(TriggerDefinition {
            id: TriggerId(id),
            event_type: self.event_type,
            fields,
            source: self.source,
            target: self.target,
            condition: self.condition,
            delay,
            duration,
            suppress,
            correlation: self.correlation,
            fetch: self.fetch,
            level: self.level,
            output: self.output,
            mutation: self.mutation,
        })
    }
}

fn seconds(trigger: &str, field: &str, secs: Option<f64>) -> Result<Option<Duration>, ValidationError> {
    let Some(secs) = secs else {
        return Ok(None);
    };
    if !secs.is_finite() || !(0.0..=MAX_TIMING_SECS).contains(&secs) {
        return Err(ValidationError::InvalidTiming {
            trigger: trigger.to_string(),
            field: field.to_string(),
            value: secs,
        });
    }
    Ok(Some(Duration::milliseconds((secs * 1000.0).round() as i64)))
}
