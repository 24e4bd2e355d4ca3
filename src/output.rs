//! Symbolic trigger output.
//!
//! The engine never renders text. A firing produces a `TriggerOutput`: the
//! name of an output variant plus named placeholder values, which an external
//! composer localizes.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::direction::{DirectionBin, Qualifier, SafeZone, SafeZoneResolution};
use crate::trigger::TriggerId;

/// Unique identifier for an emitted alert.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Create a new random alert id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one trigger instance (one match of one definition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    /// The raw sequence number.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How loudly an alert should be presented.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    Info,
    Alert,
    Alarm,
}

/// A placeholder value.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutputValue {
    Direction(DirectionBin),
    Directions(Vec<DirectionBin>),
    Qualifier(Qualifier),
    Count(u64),
    Text(String),
}

impl From<DirectionBin> for OutputValue {
    fn from(v: DirectionBin) -> Self {
        Self::Direction(v)
    }
}

impl From<Vec<DirectionBin>> for OutputValue {
    fn from(v: Vec<DirectionBin>) -> Self {
        Self::Directions(v)
    }
}

impl From<SafeZone> for OutputValue {
    fn from(v: SafeZone) -> Self {
        Self::Directions(v.directions())
    }
}

impl From<Qualifier> for OutputValue {
    fn from(v: Qualifier) -> Self {
        Self::Qualifier(v)
    }
}

impl From<u64> for OutputValue {
    fn from(v: u64) -> Self {
        Self::Count(v)
    }
}

impl From<&str> for OutputValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Output variant plus placeholder values.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerOutput {
    pub variant: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, OutputValue>,
}

impl TriggerOutput {
    /// Creates an output with no placeholders.
    #[must_use]
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a placeholder value.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OutputValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Adds `dirs` and `spot` placeholders from a resolved safe zone.
    #[must_use]
    pub fn with_safe_zone(self, resolution: SafeZoneResolution) -> Self {
        self.with("dirs", resolution.zone).with("spot", resolution.qualifier)
    }

    /// Reads a placeholder.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&OutputValue> {
        self.params.get(name)
    }

    /// Reads a direction-list placeholder.
    #[must_use]
    pub fn directions(&self, name: &str) -> Option<&[DirectionBin]> {
        match self.params.get(name)? {
            OutputValue::Directions(v) => Some(v),
            _ => None,
        }
    }

    /// Reads a single-direction placeholder.
    #[must_use]
    pub fn direction(&self, name: &str) -> Option<DirectionBin> {
        match self.params.get(name)? {
            OutputValue::Direction(v) => Some(*v),
            _ => None,
        }
    }
}

/// A fired trigger, ready for the output composer.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: AlertId,
    pub trigger_id: TriggerId,
    pub instance_id: InstanceId,
    pub level: AlertLevel,
    pub output: TriggerOutput,
    pub fired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// A still-valid alert of the same slot that this one replaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<AlertId>,
}

/// Everything the engine can emit.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineOutput {
    Fired(Alert),
    Expired {
        alert_id: AlertId,
        trigger_id: TriggerId,
        at: DateTime<Utc>,
    },
    SessionReset {
        epoch: u64,
        at: DateTime<Utc>,
    },
}

impl EngineOutput {
    /// The fired alert, if this is one.
    #[must_use]
    pub const fn as_alert(&self) -> Option<&Alert> {
        match self {
            Self::Fired(alert) => Some(alert),
            _ => None,
        }
    }
}
