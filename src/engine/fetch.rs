//! Async fetch correlation.
//!
//! A definition that needs live actor data issues a `FetchRequest` when it
//! matches. The request is identified by the instance that issued it and the
//! session epoch, so a completion can always be routed back to exactly one
//! instance, or recognized as belonging to a session that no longer exists.
//!
//! When a request is issued, the correlator snapshots the session value named
//! by the definition's `FetchGuard`. On completion the guard is re-checked
//! against the current state; a result whose guard no longer holds is stale
//! and is discarded.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::error::{CalloutError, CalloutResult, ExecutionError};
use crate::event::{ActorId, ActorState, LogEvent};
use crate::output::InstanceId;
use crate::state::SessionState;
use crate::trigger::{ActorSelector, FetchGuard, FetchSpec, TriggerId};
use crate::value::StateValue;

/// Live actor data source.
///
/// Implementations may block; the runtime calls them from worker threads.
pub trait ActorFetcher: Send + Sync {
    /// Looks up the requested actors.
    ///
    /// # Errors
    ///
    /// Returns `FetchError` if the lookup cannot be completed.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<ActorState>, FetchError>;
}

/// Failure reported by an `ActorFetcher`.
#[allow(missing_docs)]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("no requested actor is present")]
    NotFound,

    #[error("fetch rejected: {reason}")]
    Rejected { reason: String },
}

/// Outgoing request for live actor data.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub instance_id: InstanceId,
    pub epoch: u64,
    pub trigger_id: TriggerId,
    pub actor_ids: Vec<ActorId>,
    pub issued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// Result of a `FetchRequest`, delivered back to the engine.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCompletion {
    pub instance_id: InstanceId,
    pub epoch: u64,
    pub result: Result<Vec<ActorState>, FetchError>,
}

impl FetchCompletion {
    /// Completion for `request` carrying `result`.
    #[must_use]
    pub fn for_request(request: &FetchRequest, result: Result<Vec<ActorState>, FetchError>) -> Self {
        Self {
            instance_id: request.instance_id,
            epoch: request.epoch,
            result,
        }
    }
}

/// What a pending fetch resolved to.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum FetchSlot {
    Unset,
    Resolved(Vec<ActorState>),
    Failed(ExecutionError),
}

#[derive(Debug, Clone)]
struct GuardSnapshot {
    guard: FetchGuard,
    value: Option<StateValue>,
}

/// A fetch that has been issued and not yet completed.
#[derive(Debug, Clone)]
pub struct PendingFetch {
    /// The issued request.
    pub request: FetchRequest,
    /// Outcome once resolved.
    pub slot: FetchSlot,
    guard: Option<GuardSnapshot>,
}

/// Tracks outstanding fetches for one engine.
#[derive(Debug)]
pub struct FetchCorrelator {
    pending: HashMap<InstanceId, PendingFetch>,
    outbox: Vec<FetchRequest>,
    max_pending: usize,
    timeout: Duration,
}

impl FetchCorrelator {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            outbox: Vec::new(),
            max_pending,
            timeout,
        }
    }

    /// Issues a fetch for `instance_id` and returns its deadline.
    ///
    /// # Errors
    ///
    /// Returns `TooManyFetches` when the pending limit is reached,
    /// `MissingData` / `TypeMismatch` when the actor selector cannot be resolved,
    /// and an internal error if the deadline does not fit the calendar.
    #[allow(clippy::too_many_arguments)]
    pub fn issue(
        &mut self,
        instance_id: InstanceId,
        epoch: u64,
        trigger_id: &TriggerId,
        spec: &FetchSpec,
        event: &LogEvent,
        state: &SessionState,
        now: DateTime<Utc>,
    ) -> CalloutResult<DateTime<Utc>> {
        if self.pending.len() >= self.max_pending {
            return Err(ExecutionError::TooManyFetches { max: self.max_pending }.into());
        }

        let actor_ids = vec![select_actor(&spec.actors, event, state)?];
        let deadline = now
            .checked_add_signed(self.timeout)
            .ok_or_else(|| CalloutError::internal("fetch deadline out of range"))?;
        let guard = spec.guard.as_ref().map(|guard| GuardSnapshot {
            guard: guard.clone(),
            value: state.read(guard.key()).cloned(),
        });

        let request = FetchRequest {
            instance_id,
            epoch,
            trigger_id: trigger_id.clone(),
            actor_ids,
            issued_at: now,
            deadline,
        };

        self.outbox.push(request.clone());
        self.pending.insert(
            instance_id,
            PendingFetch {
                request,
                slot: FetchSlot::Unset,
                guard,
            },
        );
        Ok(deadline)
    }

    /// Settles the pending fetch a completion belongs to.
    ///
    /// Returns `None` if nothing is pending for the completion's instance
    /// (already timed out, cancelled, or never issued). The caller is
    /// responsible for rejecting completions from an older epoch.
    ///
    /// Every returned actor must be one the request named; otherwise the
    /// result fails with `UnrequestedActor` before the guard is consulted.
    pub fn resolve(&mut self, completion: FetchCompletion, state: &SessionState) -> Option<PendingFetch> {
        let mut pending = self.pending.remove(&completion.instance_id)?;
        let instance = completion.instance_id.raw();

        pending.slot = match completion.result {
            Err(err) => FetchSlot::Failed(ExecutionError::FetchFailed {
                instance,
                reason: err.to_string(),
            }),
            Ok(actors) if actors.is_empty() => FetchSlot::Failed(ExecutionError::FetchFailed {
                instance,
                reason: FetchError::NotFound.to_string(),
            }),
            Ok(actors) => match (unrequested(&pending.request, &actors), &pending.guard) {
                (Some(actor), _) => FetchSlot::Failed(ExecutionError::UnrequestedActor {
                    instance,
                    actor: actor.to_string(),
                }),
                (None, Some(snapshot)) if !guard_holds(snapshot, &actors, state) => {
                    FetchSlot::Failed(ExecutionError::StaleResult {
                        instance,
                        key: snapshot.guard.key().to_string(),
                    })
                }
                _ => FetchSlot::Resolved(actors),
            },
        };
        Some(pending)
    }

    /// Abandons a fetch whose deadline passed.
    pub fn expire(&mut self, instance_id: InstanceId) -> Option<PendingFetch> {
        let mut pending = self.pending.remove(&instance_id)?;
        pending.slot = FetchSlot::Failed(ExecutionError::FetchTimeout {
            instance: instance_id.raw(),
            timeout_ms: u64::try_from(self.timeout.num_milliseconds()).unwrap_or(0),
        });
        Some(pending)
    }

    /// Takes requests issued since the last call.
    pub fn drain_requests(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.outbox)
    }

    /// Forgets every pending and unsent request.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
        self.outbox.clear();
    }

    /// Number of fetches awaiting completion.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if a fetch for `instance_id` is outstanding.
    #[must_use]
    pub fn is_pending(&self, instance_id: InstanceId) -> bool {
        self.pending.contains_key(&instance_id)
    }
}

fn select_actor(selector: &ActorSelector, event: &LogEvent, state: &SessionState) -> CalloutResult<ActorId> {
    let from_event = |field: &str| event.get_actor(field).ok_or_else(|| CalloutError::missing(field));
    match selector {
        ActorSelector::EventTarget => from_event("targetId"),
        ActorSelector::EventSource => from_event("sourceId"),
        ActorSelector::EventId => from_event("id"),
        ActorSelector::State(key) => state.actor(key)?.ok_or_else(|| CalloutError::missing(key.as_str())),
    }
}

/// First returned actor the request did not ask for.
fn unrequested(request: &FetchRequest, actors: &[ActorState]) -> Option<ActorId> {
    actors
        .iter()
        .map(|actor| actor.id)
        .find(|id| !request.actor_ids.contains(id))
}

fn guard_holds(snapshot: &GuardSnapshot, actors: &[ActorState], state: &SessionState) -> bool {
    let current = state.read(snapshot.guard.key());
    match &snapshot.guard {
        FetchGuard::Unchanged(_) => current == snapshot.value.as_ref(),
        FetchGuard::TracksActor(_) => {
            let Some(tracked) = current.and_then(StateValue::as_actor) else {
                return false;
            };
            actors.iter().all(|actor| actor.id == tracked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::direction::Position;
    use crate::event::EventType;

    fn marker(target: &str) -> LogEvent {
        LogEvent::new(EventType::HeadMarker, "01C7", Utc::now()).with_target(target, "Player")
    }

    fn actor(hex: &str) -> ActorState {
        ActorState::new(ActorId::from_hex(hex).unwrap(), Position::new(90.0, 100.0))
    }

    fn correlator() -> FetchCorrelator {
        FetchCorrelator::new(4, Duration::seconds(2))
    }

    #[test]
    fn issue_records_request_and_deadline() {
        let mut fetches = correlator();
        let now = Utc::now();
        let deadline = fetches
            .issue(
                InstanceId(7),
                1,
                &TriggerId::from("LC2"),
                &FetchSpec::new(ActorSelector::EventTarget),
                &marker("10000001"),
                &SessionState::new(),
                now,
            )
            .unwrap();

        assert_eq!(deadline, now + Duration::seconds(2));
        assert!(fetches.is_pending(InstanceId(7)));
        let sent = fetches.drain_requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].actor_ids, vec![ActorId::new(0x1000_0001)]);
        assert_eq!(sent[0].epoch, 1);
        assert!(fetches.drain_requests().is_empty());
    }

    #[test]
    fn issue_rejects_unresolvable_selector() {
        let mut fetches = correlator();
        let err = fetches
            .issue(
                InstanceId(1),
                1,
                &TriggerId::from("t"),
                &FetchSpec::new(ActorSelector::State("image".to_string())),
                &marker("10000001"),
                &SessionState::new(),
                Utc::now(),
            )
            .unwrap_err();
        assert_eq!(err, CalloutError::missing("image"));
        assert_eq!(fetches.pending_count(), 0);
    }

    #[test]
    fn issue_enforces_pending_limit() {
        let mut fetches = FetchCorrelator::new(1, Duration::seconds(2));
        let spec = FetchSpec::new(ActorSelector::EventTarget);
        let state = SessionState::new();
        let id = TriggerId::from("t");
        fetches
            .issue(InstanceId(1), 1, &id, &spec, &marker("10000001"), &state, Utc::now())
            .unwrap();
        let err = fetches
            .issue(InstanceId(2), 1, &id, &spec, &marker("10000002"), &state, Utc::now())
            .unwrap_err();
        assert_eq!(err, CalloutError::Execution(ExecutionError::TooManyFetches { max: 1 }));
    }

    #[test]
    fn tracks_actor_guard_rejects_replaced_actor() {
        let mut fetches = correlator();
        let mut state = SessionState::new();
        state.write("image", ActorId::new(0x4000_0001));
        let spec = FetchSpec::new(ActorSelector::State("image".to_string()))
            .guarded(FetchGuard::TracksActor("image".to_string()));
        let ev = LogEvent::new(EventType::Ability, "8C80", Utc::now());

        fetches
            .issue(InstanceId(1), 1, &TriggerId::from("t"), &spec, &ev, &state, Utc::now())
            .unwrap();

        // A newer image replaced the tracked one while the fetch was in flight.
        state.write("image", ActorId::new(0x4000_0002));
        let done = fetches
            .resolve(
                FetchCompletion {
                    instance_id: InstanceId(1),
                    epoch: 1,
                    result: Ok(vec![actor("40000001")]),
                },
                &state,
            )
            .unwrap();
        assert_eq!(
            done.slot,
            FetchSlot::Failed(ExecutionError::StaleResult {
                instance: 1,
                key: "image".to_string(),
            })
        );
    }

    #[test]
    fn unchanged_guard_accepts_matching_state() {
        let mut fetches = correlator();
        let mut state = SessionState::new();
        state.write("mech", "out");
        let spec = FetchSpec::new(ActorSelector::EventTarget).guarded(FetchGuard::Unchanged("mech".to_string()));

        fetches
            .issue(InstanceId(3), 1, &TriggerId::from("t"), &spec, &marker("10000001"), &state, Utc::now())
            .unwrap();
        let done = fetches
            .resolve(
                FetchCompletion {
                    instance_id: InstanceId(3),
                    epoch: 1,
                    result: Ok(vec![actor("10000001")]),
                },
                &state,
            )
            .unwrap();
        assert_eq!(done.slot, FetchSlot::Resolved(vec![actor("10000001")]));
    }

    #[test]
    fn failures_and_empty_results_fail_the_slot() {
        let mut fetches = correlator();
        let state = SessionState::new();
        let spec = FetchSpec::new(ActorSelector::EventTarget);
        let id = TriggerId::from("t");
        for n in 1..=2 {
            fetches
                .issue(InstanceId(n), 1, &id, &spec, &marker("10000001"), &state, Utc::now())
                .unwrap();
        }

        let failed = fetches
            .resolve(
                FetchCompletion {
                    instance_id: InstanceId(1),
                    epoch: 1,
                    result: Err(FetchError::Transport {
                        message: "socket closed".to_string(),
                    }),
                },
                &state,
            )
            .unwrap();
        assert!(matches!(failed.slot, FetchSlot::Failed(ExecutionError::FetchFailed { instance: 1, .. })));

        let empty = fetches
            .resolve(
                FetchCompletion {
                    instance_id: InstanceId(2),
                    epoch: 1,
                    result: Ok(Vec::new()),
                },
                &state,
            )
            .unwrap();
        assert!(matches!(empty.slot, FetchSlot::Failed(ExecutionError::FetchFailed { instance: 2, .. })));
    }

    #[test]
    fn result_for_unrequested_actor_is_rejected() {
        let mut fetches = correlator();
        let mut state = SessionState::new();
        // Guard on a key that nothing changes, so only the identity check can catch it.
        state.write("mech", "out");
        let spec = FetchSpec::new(ActorSelector::EventTarget).guarded(FetchGuard::Unchanged("mech".to_string()));

        fetches
            .issue(InstanceId(5), 1, &TriggerId::from("t"), &spec, &marker("10000002"), &state, Utc::now())
            .unwrap();
        let done = fetches
            .resolve(
                FetchCompletion {
                    instance_id: InstanceId(5),
                    epoch: 1,
                    result: Ok(vec![actor("10000002"), actor("10000009")]),
                },
                &state,
            )
            .unwrap();
        assert_eq!(
            done.slot,
            FetchSlot::Failed(ExecutionError::UnrequestedActor {
                instance: 5,
                actor: "10000009".to_string(),
            })
        );
        assert!(!fetches.is_pending(InstanceId(5)));
    }

    #[test]
    fn deadline_past_calendar_end_is_an_error() {
        let mut fetches = correlator();
        let err = fetches
            .issue(
                InstanceId(1),
                1,
                &TriggerId::from("t"),
                &FetchSpec::new(ActorSelector::EventTarget),
                &marker("10000001"),
                &SessionState::new(),
                DateTime::<Utc>::MAX_UTC,
            )
            .unwrap_err();
        assert!(err.is_internal());
        assert_eq!(fetches.pending_count(), 0);
        assert!(fetches.drain_requests().is_empty());
    }

    #[test]
    fn expire_and_cancel() {
        let mut fetches = correlator();
        let state = SessionState::new();
        let spec = FetchSpec::new(ActorSelector::EventTarget);
        let id = TriggerId::from("t");
        fetches
            .issue(InstanceId(1), 1, &id, &spec, &marker("10000001"), &state, Utc::now())
            .unwrap();
        fetches
            .issue(InstanceId(2), 1, &id, &spec, &marker("10000001"), &state, Utc::now())
            .unwrap();

        let expired = fetches.expire(InstanceId(1)).unwrap();
        assert_eq!(
            expired.slot,
            FetchSlot::Failed(ExecutionError::FetchTimeout {
                instance: 1,
                timeout_ms: 2000,
            })
        );
        assert!(fetches.expire(InstanceId(1)).is_none());

        fetches.cancel_all();
        assert_eq!(fetches.pending_count(), 0);
        assert!(fetches.drain_requests().is_empty());
        let late = FetchCompletion {
            instance_id: InstanceId(2),
            epoch: 1,
            result: Ok(vec![actor("10000001")]),
        };
        assert!(fetches.resolve(late, &state).is_none());
    }
}
