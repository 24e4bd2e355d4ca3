//! Trigger definitions, the registry they live in, and the event matcher.

/// Definition types and builder.
pub mod definition;
/// Event matching.
pub mod matcher;
/// Trigger set registry.
pub mod set;

pub use definition::{
    ActorSelector, ConditionFn, CorrelationKey, FetchGuard, FetchSpec, FieldPattern, FireContext, MutationFn,
    OutputFn, TriggerDefinition, TriggerDefinitionBuilder, TriggerId,
};
pub use matcher::{EventMatcher, MatchOutput, MissReason};
pub use set::{InitStateFn, TriggerSet, TriggerSetBuilder};
