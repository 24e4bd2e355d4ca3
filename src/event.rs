//! Structured log events consumed by the engine.
//!
//! The upstream parser turns raw network log lines into `LogEvent`s. The
//! engine only needs a uniform way to look fields up by name, so common
//! fields (`id`, `source`, `sourceId`, `target`, `targetId`) are first-class
//! and everything else lives in `fields`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::direction::Position;

/// Identifier of an in-game actor (32-bit, rendered as 8 hex digits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(u32);

impl ActorId {
    /// Wraps a raw actor id.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Parses a hex actor id such as `4000A1B2`.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(s, 16).ok().map(Self)
    }

    /// The raw id.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Line types understood by trigger definitions.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    StartsUsing,
    Ability,
    HeadMarker,
    CombatantMemory,
    GainsEffect,
    LosesEffect,
    Tether,
    AddedCombatant,
    RemovingCombatant,
    GameLog,
}

impl EventType {
    /// Returns the canonical line type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartsUsing => "StartsUsing",
            Self::Ability => "Ability",
            Self::HeadMarker => "HeadMarker",
            Self::CombatantMemory => "CombatantMemory",
            Self::GainsEffect => "GainsEffect",
            Self::LosesEffect => "LosesEffect",
            Self::Tether => "Tether",
            Self::AddedCombatant => "AddedCombatant",
            Self::RemovingCombatant => "RemovingCombatant",
            Self::GameLog => "GameLog",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped event from the stream.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_type: EventType,
    /// Ability / marker / actor id, depending on the line type.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    /// Creates an event with only a type and id.
    #[must_use]
    pub fn new(event_type: EventType, id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            id: id.into(),
            source_id: None,
            source: None,
            target_id: None,
            target: None,
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Sets the source actor.
    #[must_use]
    pub fn with_source(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self.source = Some(name.into());
        self
    }

    /// Sets the target actor.
    #[must_use]
    pub fn with_target(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.target_id = Some(id.into());
        self.target = Some(name.into());
        self
    }

    /// Adds a capture field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Looks a field up by name. Standard fields shadow capture fields.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "id" => Some(self.id.as_str()),
            "source" => self.source.as_deref(),
            "sourceId" => self.source_id.as_deref(),
            "target" => self.target.as_deref(),
            "targetId" => self.target_id.as_deref(),
            other => self.fields.get(other).map(String::as_str),
        }
    }

    /// Parses a field as a float.
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.trim().parse::<f64>().ok()
    }

    /// Parses a field as a hex actor id.
    #[must_use]
    pub fn get_actor(&self, name: &str) -> Option<ActorId> {
        ActorId::from_hex(self.get(name)?)
    }

    /// Reads a position from a pair of coordinate fields.
    #[must_use]
    pub fn position(&self, x_field: &str, y_field: &str) -> Option<Position> {
        Some(Position::new(self.get_f64(x_field)?, self.get_f64(y_field)?))
    }
}

/// Live actor state returned by the fetch transport.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    pub id: ActorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl ActorState {
    /// Creates an actor snapshot at a position.
    #[must_use]
    pub fn new(id: ActorId, position: Position) -> Self {
        Self {
            id,
            name: None,
            position,
            heading: None,
        }
    }
}
