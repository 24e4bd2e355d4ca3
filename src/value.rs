//! Values held in session state.
//!
//! Session state is a closed sum type rather than an open bag of dynamic
//! properties: every value is one of the variants below, and presence is
//! expressed by the key being set or not.

use serde::{Deserialize, Serialize};

use crate::direction::DirectionBin;
use crate::event::{ActorId, ActorState};

/// Possible values stored under a session key.
///
/// # Examples
///
/// ```
/// use callout::StateValue;
/// use callout::direction::DirectionBin;
///
/// let mech = StateValue::Text("out".to_string());
/// let dir = StateValue::Direction(DirectionBin::North);
///
/// assert!(mech.is_text());
/// assert_eq!(dir.as_direction(), Some(DirectionBin::North));
/// ```
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Actor(ActorId),
    Direction(DirectionBin),
    Combatant(ActorState),
}

#[allow(missing_docs)]
impl StateValue {
    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    pub const fn is_actor(&self) -> bool {
        matches!(self, Self::Actor(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub const fn as_actor(&self) -> Option<ActorId> {
        match self {
            Self::Actor(v) => Some(*v),
            Self::Combatant(state) => Some(state.id),
            _ => None,
        }
    }

    pub const fn as_direction(&self) -> Option<DirectionBin> {
        match self {
            Self::Direction(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_combatant(&self) -> Option<&ActorState> {
        match self {
            Self::Combatant(v) => Some(v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Actor(_) => "actor",
            Self::Direction(_) => "direction",
            Self::Combatant(_) => "combatant",
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Actor(v) => write!(f, "actor:{v}"),
            Self::Direction(v) => write!(f, "dir:{v}"),
            Self::Combatant(v) => write!(f, "combatant:{}@({}, {})", v.id, v.position.x, v.position.y),
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<ActorId> for StateValue {
    fn from(v: ActorId) -> Self {
        Self::Actor(v)
    }
}

impl From<DirectionBin> for StateValue {
    fn from(v: DirectionBin) -> Self {
        Self::Direction(v)
    }
}

impl From<ActorState> for StateValue {
    fn from(v: ActorState) -> Self {
        Self::Combatant(v)
    }
}
