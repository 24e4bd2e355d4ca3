//! # callout - Real-time encounter trigger engine
//!
//! callout consumes an ordered stream of structured combat log events and, for a
//! registered trigger set, decides which triggers fire, when, and with what
//! symbolic output. Some outputs depend on live actor data that is fetched
//! out-of-band; those fetches race the event stream and are validated before
//! their results are applied.
//!
//! ## Core Concepts
//!
//! - **TriggerDefinition**: declarative filters plus output / mutation callbacks
//! - **SessionState**: encounter-scoped values and counters
//! - **Engine**: deterministic core for matching, timers, suppression and fetch correlation
//! - **TriggerRuntime**: threaded host with a fetch worker pool and live clock
//! - **Direction resolver**: positions to compass bins to safe zones
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use callout::encounters::gilded_araya;
//! use callout::{DirectionBin, Engine, EngineConfig, EventType, LogEvent};
//! use chrono::Utc;
//!
//! let set = Arc::new(gilded_araya::trigger_set()?);
//! let mut engine = Engine::new(set, EngineConfig::default())?;
//!
//! let now = Utc::now();
//! engine.start_session(now);
//!
//! let cast = LogEvent::new(EventType::StartsUsing, "8C81", now).with_source("40000001", "Asura");
//! let out = engine.handle_event(cast);
//! let alert = out[0].as_alert().expect("pedestal purge fires");
//! assert_eq!(alert.output.variant, "noJump");
//! assert_eq!(alert.output.directions("dirs"), Some([DirectionBin::South].as_slice()));
//! # Ok::<(), callout::CalloutError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod config;
pub mod direction;
pub mod error;
pub mod event;
pub mod output;
pub mod state;
pub mod value;

// Triggers and execution
pub mod encounters;
pub mod engine;
pub mod trigger;

pub use config::{EngineConfig, RuntimeConfig};
pub use direction::{
    lookup_opposite, lookup_perpendicular_pair, position_to_direction, resolve_safe_zone, BinCount, DirectionBin,
    HazardShape, Position, Qualifier, SafeZone, SafeZoneResolution, SafeZoneTable,
};
pub use error::{CalloutError, CalloutResult, ExecutionError, ValidationError};
pub use event::{ActorId, ActorState, EventType, LogEvent};
pub use output::{Alert, AlertId, AlertLevel, EngineOutput, InstanceId, OutputValue, TriggerOutput};
pub use state::SessionState;
pub use value::StateValue;

pub use engine::{
    ActorFetcher, AlertStream, Engine, FetchCompletion, FetchError, FetchRequest, InstancePhase, TriggerRuntime,
};
pub use trigger::{
    ActorSelector, CorrelationKey, EventMatcher, FetchGuard, FetchSpec, FieldPattern, FireContext, TriggerDefinition,
    TriggerId, TriggerSet,
};
