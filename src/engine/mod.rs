//! Trigger engine.
//!
//! `Engine` is the deterministic, single-threaded core: it consumes log events,
//! clock advances and fetch completions, and returns everything they caused as
//! `EngineOutput`s. It never reads the wall clock and never blocks; time only
//! moves when an event timestamp or an explicit `advance_to` says so.
//!
//! `TriggerRuntime` hosts an engine on a dispatcher thread with a fetch worker
//! pool and a live clock.

/// Async fetch correlation.
pub mod fetch;
/// Threaded runtime host.
pub mod runtime;
/// Alert stream handed out by the runtime.
pub mod stream;
/// Timers, suppression and replacement.
pub mod timing;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{CalloutResult, ExecutionError};
use crate::event::{ActorState, LogEvent};
use crate::output::{Alert, AlertId, EngineOutput, InstanceId};
use crate::state::SessionState;
use crate::trigger::{EventMatcher, FireContext, TriggerSet};

pub use fetch::{ActorFetcher, FetchCompletion, FetchCorrelator, FetchError, FetchRequest, FetchSlot, PendingFetch};
pub use runtime::TriggerRuntime;
pub use stream::AlertStream;
pub use timing::{SlotKey, TimerKind, TimingController};

/// Lifecycle of one trigger instance.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstancePhase {
    /// Waiting for a fetch result.
    FetchPending,
    /// Ready to fire once its delay elapses.
    Ready,
}

#[derive(Debug)]
struct TriggerInstance {
    def_idx: usize,
    slot: SlotKey,
    event: Arc<LogEvent>,
    phase: InstancePhase,
    fetched: Vec<ActorState>,
    /// The delay elapsed while the fetch was still pending.
    due: bool,
}

/// Deterministic trigger engine for one trigger set.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    matcher: EventMatcher,
    state: SessionState,
    timing: TimingController,
    fetches: FetchCorrelator,
    instances: HashMap<InstanceId, TriggerInstance>,
    default_duration: Option<Duration>,
    next_instance: u64,
    epoch: u64,
    active: bool,
    clock: Option<DateTime<Utc>>,
}

impl Engine {
    /// Creates an inactive engine. Call `start_session` before feeding events.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidConfig` if `config` is out of range.
    pub fn new(set: Arc<TriggerSet>, config: EngineConfig) -> CalloutResult<Self> {
        config.validate()?;

        let timeout = Duration::milliseconds(i64::try_from(config.fetch_timeout_ms).unwrap_or(i64::MAX));
        let default_duration = config
            .default_duration_secs
            .map(|secs| Duration::milliseconds((secs * 1000.0).round() as i64));

        Ok(Self {
            state: set.initial_state(),
            matcher: EventMatcher::new(set),
            timing: TimingController::new(),
            fetches: FetchCorrelator::new(config.max_pending_fetches, timeout),
            instances: HashMap::new(),
            default_duration,
            next_instance: 1,
            epoch: 0,
            active: false,
            clock: None,
            config,
        })
    }

    /// The trigger set this engine runs.
    #[must_use]
    pub fn trigger_set(&self) -> &Arc<TriggerSet> {
        self.matcher.set()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Session epoch; bumped by every start and end.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns true between `start_session` and `end_session`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// The engine clock: the latest time it has been advanced to.
    #[must_use]
    pub const fn now(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    /// Earliest time at which `advance_to` would do work.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timing.next_deadline()
    }

    /// Instances matched but not yet fired or discarded.
    #[must_use]
    pub fn armed_instances(&self) -> usize {
        self.instances.len()
    }

    /// Fetches awaiting completion.
    #[must_use]
    pub fn pending_fetches(&self) -> usize {
        self.fetches.pending_count()
    }

    /// Phase of a live instance.
    #[must_use]
    pub fn instance_phase(&self, id: InstanceId) -> Option<InstancePhase> {
        self.instances.get(&id).map(|inst| inst.phase)
    }

    /// Fetch requests issued since the last call, for the transport to send.
    pub fn drain_fetch_requests(&mut self) -> Vec<FetchRequest> {
        self.fetches.drain_requests()
    }

    /// Starts (or restarts) a session: all state, timers and fetches are reset.
    pub fn start_session(&mut self, at: DateTime<Utc>) -> Vec<EngineOutput> {
        let reset = self.reset(at);
        self.active = true;
        debug!(epoch = self.epoch, set = %self.trigger_set().id(), "session started");
        vec![reset]
    }

    /// Ends the session. Events are ignored until the next `start_session`.
    pub fn end_session(&mut self, at: DateTime<Utc>) -> Vec<EngineOutput> {
        let reset = self.reset(at);
        self.active = false;
        debug!(epoch = self.epoch, "session ended");
        vec![reset]
    }

    fn reset(&mut self, at: DateTime<Utc>) -> EngineOutput {
        let now = self.clamp(at);
        self.epoch += 1;
        self.state = self.matcher.set().initial_state();
        self.timing.clear();
        self.fetches.cancel_all();
        self.instances.clear();
        self.clock = Some(now);
        EngineOutput::SessionReset { epoch: self.epoch, at: now }
    }

    /// Processes one log event.
    ///
    /// Timers due before the event's timestamp run first. Every definition the
    /// event matches is then armed, and instances with no delay fire before
    /// this call returns.
    pub fn handle_event(&mut self, event: LogEvent) -> Vec<EngineOutput> {
        if !self.active {
            debug!(event_type = %event.event_type, id = %event.id, "no active session; event ignored");
            return Vec::new();
        }

        let now = self.clamp(event.timestamp);
        let mut out = self.advance_to(now);

        let matched = self.matcher.matches(&event, &self.state);
        if matched.is_empty() {
            return out;
        }

        let event = Arc::new(event);
        for idx in matched {
            self.arm(idx, &event, now);
        }

        out.extend(self.advance_to(now));
        out
    }

    fn arm(&mut self, def_idx: usize, event: &Arc<LogEvent>, now: DateTime<Utc>) {
        let set = Arc::clone(self.matcher.set());
        let def = set.definition(def_idx);
        let slot: SlotKey = (def.id.clone(), def.correlation.key_for(event));

        if self.timing.is_suppressed(&slot, def.suppress, now) {
            debug!(trigger = %def.id, key = ?slot.1, "match suppressed");
            return;
        }

        let Some(fire_at) = now.checked_add_signed(def.delay) else {
            warn!(trigger = %def.id, "fire time out of range; match dropped");
            return;
        };

        let id = InstanceId(self.next_instance);
        self.next_instance += 1;

        let mut phase = InstancePhase::Ready;
        if let Some(spec) = &def.fetch {
            match self
                .fetches
                .issue(id, self.epoch, &def.id, spec, event, &self.state, now)
            {
                Ok(deadline) => {
                    self.timing.schedule(deadline, TimerKind::FetchDeadline(id));
                    phase = InstancePhase::FetchPending;
                }
                Err(err) => {
                    warn!(trigger = %def.id, instance = %id, error = %err, "fetch not issued; instance dropped");
                    return;
                }
            }
        }

        debug!(trigger = %def.id, instance = %id, delay_ms = def.delay.num_milliseconds(), "instance armed");
        self.timing.arm(&slot);
        self.timing.schedule(fire_at, TimerKind::Fire(id));
        self.instances.insert(
            id,
            TriggerInstance {
                def_idx,
                slot,
                event: Arc::clone(event),
                phase,
                fetched: Vec::new(),
                due: false,
            },
        );
    }

    /// Moves the engine clock forward, running every timer due by `now`.
    ///
    /// The clock never moves backwards; an earlier `now` is treated as the
    /// current clock.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Vec<EngineOutput> {
        let now = self.clamp(now);
        let mut out = Vec::new();

        while let Some((due, kind)) = self.timing.pop_due(now) {
            self.clock = Some(self.clamp(due));
            match kind {
                TimerKind::Fire(id) => self.on_fire_due(id, due, &mut out),
                TimerKind::FetchDeadline(id) => self.on_fetch_deadline(id),
                TimerKind::Expire { slot, alert_id } => {
                    if self.timing.expire(&slot, alert_id) {
                        debug!(trigger = %slot.0, alert = %alert_id, "alert expired");
                        out.push(EngineOutput::Expired {
                            alert_id,
                            trigger_id: slot.0,
                            at: due,
                        });
                    }
                }
            }
        }

        self.clock = Some(now);
        out
    }

    /// Delivers a fetch result.
    ///
    /// Completions from an earlier session, for unknown instances, or whose
    /// guard no longer holds are discarded. A result that arrives after the
    /// instance's delay has elapsed fires it immediately.
    pub fn complete_fetch(&mut self, completion: FetchCompletion, now: DateTime<Utc>) -> Vec<EngineOutput> {
        let mut out = self.advance_to(now);
        let now = self.clamp(now);

        if completion.epoch != self.epoch {
            debug!(
                instance = %completion.instance_id,
                epoch = completion.epoch,
                current = self.epoch,
                "fetch result from an earlier session discarded"
            );
            return out;
        }

        let Some(pending) = self.fetches.resolve(completion, &self.state) else {
            debug!("fetch result for an unknown instance discarded");
            return out;
        };

        let id = pending.request.instance_id;
        match pending.slot {
            FetchSlot::Resolved(actors) => {
                let Some(inst) = self.instances.get_mut(&id) else {
                    return out;
                };
                inst.fetched = actors;
                inst.phase = InstancePhase::Ready;
                if inst.due {
                    self.fire(id, now, &mut out);
                }
            }
            FetchSlot::Failed(err @ (ExecutionError::StaleResult { .. } | ExecutionError::UnrequestedActor { .. })) => {
                debug!(instance = %id, error = %err, "stale fetch result discarded");
                self.discard(id);
            }
            FetchSlot::Failed(err) => {
                warn!(instance = %id, error = %err, "fetch failed; instance dropped");
                self.discard(id);
            }
            FetchSlot::Unset => self.discard(id),
        }
        out
    }

    fn on_fire_due(&mut self, id: InstanceId, at: DateTime<Utc>, out: &mut Vec<EngineOutput>) {
        let Some(inst) = self.instances.get_mut(&id) else {
            return;
        };
        if inst.phase == InstancePhase::FetchPending {
            inst.due = true;
            return;
        }
        self.fire(id, at, out);
    }

    fn on_fetch_deadline(&mut self, id: InstanceId) {
        if let Some(pending) = self.fetches.expire(id) {
            if let FetchSlot::Failed(err) = &pending.slot {
                warn!(trigger = %pending.request.trigger_id, instance = %id, error = %err, "fetch timed out; instance dropped");
            }
            self.discard(id);
        }
    }

    fn discard(&mut self, id: InstanceId) {
        if let Some(inst) = self.instances.remove(&id) {
            self.timing.disarm(&inst.slot);
        }
    }

    fn fire(&mut self, id: InstanceId, at: DateTime<Utc>, out: &mut Vec<EngineOutput>) {
        let Some(inst) = self.instances.remove(&id) else {
            return;
        };
        let set = Arc::clone(self.matcher.set());
        let def = set.definition(inst.def_idx);

        self.timing.disarm(&inst.slot);
        self.timing.record_fire(&inst.slot, at);

        let ctx = FireContext {
            instance_id: id,
            event: &inst.event,
            fetched: &inst.fetched,
            fired_at: at,
            center: set.center(),
        };

        // Output sees the state as it was before this firing's mutation.
        let output = match &def.output {
            Some(compute) => match compute(&self.state, &ctx) {
                Ok(output) => output,
                Err(err) => {
                    warn!(trigger = %def.id, instance = %id, error = %err, "output skipped");
                    None
                }
            },
            None => None,
        };

        if let Some(mutate) = &def.mutation {
            if let Err(err) = mutate(&mut self.state, &ctx) {
                warn!(trigger = %def.id, instance = %id, error = %err, "state mutation failed");
            }
        }

        let Some(output) = output else {
            debug!(trigger = %def.id, instance = %id, "fired without output");
            return;
        };

        let alert_id = AlertId::new();
        let expires_at = def.duration.or(self.default_duration).and_then(|d| at.checked_add_signed(d));
        let supersedes = expires_at.and_then(|exp| self.timing.activate(&inst.slot, alert_id, at, exp));

        debug!(trigger = %def.id, instance = %id, variant = %output.variant, "fired");
        out.push(EngineOutput::Fired(Alert {
            alert_id,
            trigger_id: def.id.clone(),
            instance_id: id,
            level: def.level,
            output,
            fired_at: at,
            expires_at,
            supersedes,
        }));
    }

    fn clamp(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.clock.map_or(t, |clock| clock.max(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::direction::Position;
    use crate::error::CalloutError;
    use crate::event::{ActorId, EventType};
    use crate::output::TriggerOutput;
    use crate::trigger::{ActorSelector, CorrelationKey, FetchGuard, FetchSpec, TriggerDefinition};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-07-01T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    fn ability(id: &str, ms: i64) -> LogEvent {
        LogEvent::new(EventType::Ability, id, at(ms)).with_source("40000001", "Boss")
    }

    fn engine(set: TriggerSet) -> Engine {
        let mut engine = Engine::new(Arc::new(set), EngineConfig::default()).unwrap();
        engine.start_session(t0());
        engine
    }

    fn fired(out: &[EngineOutput]) -> Vec<&str> {
        out.iter()
            .filter_map(EngineOutput::as_alert)
            .map(|a| a.output.variant.as_str())
            .collect()
    }

    #[test]
    fn events_ignored_without_session() {
        let set = TriggerSet::builder("s")
            .trigger(TriggerDefinition::builder("A", EventType::Ability).response("a").build().unwrap())
            .build()
            .unwrap();
        let mut engine = Engine::new(Arc::new(set), EngineConfig::default()).unwrap();
        assert!(engine.handle_event(ability("1", 0)).is_empty());

        let out = engine.start_session(t0());
        assert_eq!(out, vec![EngineOutput::SessionReset { epoch: 1, at: t0() }]);
        assert_eq!(fired(&engine.handle_event(ability("1", 0))), vec!["a"]);

        engine.end_session(at(10));
        assert!(!engine.is_active());
        assert!(engine.handle_event(ability("1", 20)).is_empty());
    }

    #[test]
    fn delayed_instances_fire_in_due_order() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Slow", EventType::Ability)
                    .id("1")
                    .delay_secs(3.0)
                    .response("slow")
                    .build()
                    .unwrap(),
            )
            .trigger(
                TriggerDefinition::builder("Fast", EventType::Ability)
                    .id("2")
                    .delay_secs(1.0)
                    .response("fast")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);

        assert!(engine.handle_event(ability("1", 0)).is_empty());
        assert!(engine.handle_event(ability("2", 500)).is_empty());
        assert_eq!(engine.next_deadline(), Some(at(1500)));

        let out = engine.advance_to(at(5000));
        assert_eq!(fired(&out), vec!["fast", "slow"]);
        let times: Vec<_> = out.iter().filter_map(EngineOutput::as_alert).map(|a| a.fired_at).collect();
        assert_eq!(times, vec![at(1500), at(3000)]);
    }

    #[test]
    fn later_event_runs_earlier_timers_first() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Delayed", EventType::Ability)
                    .id("1")
                    .delay_secs(2.0)
                    .response("delayed")
                    .build()
                    .unwrap(),
            )
            .trigger(TriggerDefinition::builder("Now", EventType::Ability).id("2").response("now").build().unwrap())
            .build()
            .unwrap();
        let mut engine = engine(set);

        engine.handle_event(ability("1", 0));
        let out = engine.handle_event(ability("2", 2500));
        assert_eq!(fired(&out), vec!["delayed", "now"]);
    }

    #[test]
    fn suppression_window_and_armed_instance() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Clones", EventType::Ability)
                    .id("8C96")
                    .suppress_secs(2.0)
                    .response("avoidClones")
                    .build()
                    .unwrap(),
            )
            .trigger(
                TriggerDefinition::builder("Delayed", EventType::Ability)
                    .id("8C97")
                    .delay_secs(1.0)
                    .suppress_secs(0.5)
                    .response("delayed")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);

        assert_eq!(fired(&engine.handle_event(ability("8C96", 0))), vec!["avoidClones"]);
        assert!(engine.handle_event(ability("8C96", 100)).is_empty());
        assert!(engine.handle_event(ability("8C96", 1900)).is_empty());
        assert_eq!(fired(&engine.handle_event(ability("8C96", 2000))), vec!["avoidClones"]);

        // Second match while the first is still armed is dropped.
        engine.handle_event(ability("8C97", 3000));
        engine.handle_event(ability("8C97", 3200));
        assert_eq!(engine.armed_instances(), 1);
        assert_eq!(fired(&engine.advance_to(at(4500))), vec!["delayed"]);
    }

    #[test]
    fn suppression_is_keyed_by_correlation() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("PerSource", EventType::Ability)
                    .id("1")
                    .suppress_secs(5.0)
                    .correlate(CorrelationKey::SourceId)
                    .response("hit")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);

        let a = LogEvent::new(EventType::Ability, "1", at(0)).with_source("40000001", "Image");
        let b = LogEvent::new(EventType::Ability, "1", at(10)).with_source("40000002", "Image");
        let a_again = LogEvent::new(EventType::Ability, "1", at(20)).with_source("40000001", "Image");
        assert_eq!(fired(&engine.handle_event(a)), vec!["hit"]);
        assert_eq!(fired(&engine.handle_event(b)), vec!["hit"]);
        assert!(engine.handle_event(a_again).is_empty());
    }

    #[test]
    fn duration_supersedes_and_expires() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Khadga", EventType::StartsUsing)
                    .id("8C88")
                    .duration_secs(10.0)
                    .response("text")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);
        let ev = |ms| LogEvent::new(EventType::StartsUsing, "8C88", at(ms));

        let first = engine.handle_event(ev(0));
        let first = first[0].as_alert().unwrap().clone();
        assert_eq!(first.expires_at, Some(at(10_000)));
        assert_eq!(first.supersedes, None);

        let second = engine.handle_event(ev(4000));
        let second = second[0].as_alert().unwrap().clone();
        assert_eq!(second.supersedes, Some(first.alert_id));

        // Only the replacement reports expiry.
        let out = engine.advance_to(at(20_000));
        assert_eq!(
            out,
            vec![EngineOutput::Expired {
                alert_id: second.alert_id,
                trigger_id: "Khadga".into(),
                at: at(14_000),
            }]
        );
    }

    #[test]
    fn default_duration_applies_when_unset() {
        let set = TriggerSet::builder("s")
            .trigger(TriggerDefinition::builder("A", EventType::Ability).response("a").build().unwrap())
            .build()
            .unwrap();
        let config = EngineConfig {
            default_duration_secs: Some(3.0),
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(Arc::new(set), config).unwrap();
        engine.start_session(t0());
        let out = engine.handle_event(ability("x", 0));
        assert_eq!(out[0].as_alert().unwrap().expires_at, Some(at(3000)));
    }

    #[test]
    fn output_sees_state_before_mutation() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Count", EventType::Ability)
                    .output(|state, _| Ok(Some(TriggerOutput::new("count").with("n", state.counter("hits")))))
                    .run(|state, _| {
                        state.increment("hits");
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);

        let out = engine.handle_event(ability("1", 0));
        assert_eq!(out[0].as_alert().unwrap().output.param("n"), Some(&0u64.into()));
        let out = engine.handle_event(ability("1", 10));
        assert_eq!(out[0].as_alert().unwrap().output.param("n"), Some(&1u64.into()));
        assert_eq!(engine.state().counter("hits"), 2);
    }

    #[test]
    fn missing_data_skips_output_but_runs_mutation() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Needs", EventType::Ability)
                    .output(|state, _| {
                        let mech = state.text("mech")?.ok_or_else(|| CalloutError::missing("mech"))?;
                        Ok(Some(TriggerOutput::new(mech)))
                    })
                    .run(|state, _| {
                        state.increment("ran");
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);

        assert!(engine.handle_event(ability("1", 0)).is_empty());
        assert_eq!(engine.state().counter("ran"), 1);
    }

    fn fetching_set() -> TriggerSet {
        TriggerSet::builder("s")
            .center(Position::new(100.0, 100.0))
            .trigger(
                TriggerDefinition::builder("Collect", EventType::Ability)
                    .id("8C80")
                    .run(|state, ctx| {
                        let id = ctx.event.get_actor("sourceId").ok_or_else(|| CalloutError::missing("sourceId"))?;
                        state.write("image", id);
                        Ok(())
                    })
                    .build()
                    .unwrap(),
            )
            .trigger(
                TriggerDefinition::builder("Locate", EventType::Ability)
                    .id("8C81")
                    .delay_secs(1.0)
                    .fetch(
                        FetchSpec::new(ActorSelector::State("image".to_string()))
                            .guarded(FetchGuard::TracksActor("image".to_string())),
                    )
                    .output(|_, ctx| {
                        let x = ctx.fetched.first().map(|a| a.position.x).unwrap_or_default();
                        Ok(Some(TriggerOutput::new(if x < ctx.center.x { "west" } else { "east" })))
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn image_event(source: &str, ms: i64) -> LogEvent {
        LogEvent::new(EventType::Ability, "8C80", at(ms)).with_source(source, "Asura Image")
    }

    fn image_at(hex: &str, x: f64) -> ActorState {
        ActorState::new(ActorId::from_hex(hex).unwrap(), Position::new(x, 100.0))
    }

    #[test]
    fn fetch_resolves_before_delay() {
        let mut engine = engine(fetching_set());
        engine.handle_event(image_event("40000001", 0));
        assert!(engine.handle_event(ability("8C81", 100)).is_empty());

        let requests = engine.drain_fetch_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].actor_ids, vec![ActorId::new(0x4000_0001)]);
        assert_eq!(engine.instance_phase(requests[0].instance_id), Some(InstancePhase::FetchPending));

        let done = FetchCompletion::for_request(&requests[0], Ok(vec![image_at("40000001", 85.0)]));
        assert!(engine.complete_fetch(done, at(300)).is_empty());
        assert_eq!(engine.instance_phase(requests[0].instance_id), Some(InstancePhase::Ready));

        assert_eq!(fired(&engine.advance_to(at(1100))), vec!["west"]);
    }

    #[test]
    fn late_fetch_fires_on_arrival() {
        let mut engine = engine(fetching_set());
        engine.handle_event(image_event("40000001", 0));
        engine.handle_event(ability("8C81", 0));
        let request = engine.drain_fetch_requests().remove(0);

        assert!(engine.advance_to(at(1500)).is_empty());
        let out = engine.complete_fetch(
            FetchCompletion::for_request(&request, Ok(vec![image_at("40000001", 120.0)])),
            at(1800),
        );
        let alert = out[0].as_alert().unwrap();
        assert_eq!(alert.output.variant, "east");
        assert_eq!(alert.fired_at, at(1800));
    }

    #[test]
    fn stale_fetch_is_discarded() {
        let mut engine = engine(fetching_set());
        engine.handle_event(image_event("40000001", 0));
        engine.handle_event(ability("8C81", 0));
        let request = engine.drain_fetch_requests().remove(0);

        // A newer image replaces the tracked one while the fetch is in flight.
        engine.handle_event(image_event("40000002", 200));
        let out = engine.complete_fetch(
            FetchCompletion::for_request(&request, Ok(vec![image_at("40000001", 85.0)])),
            at(300),
        );
        assert!(out.is_empty());
        assert_eq!(engine.armed_instances(), 0);
        assert!(fired(&engine.advance_to(at(5000))).is_empty());
    }

    #[test]
    fn failed_and_timed_out_fetches_drop_the_instance() {
        let mut engine = engine(fetching_set());
        engine.handle_event(image_event("40000001", 0));

        engine.handle_event(ability("8C81", 0));
        let failed = engine.drain_fetch_requests().remove(0);
        engine.complete_fetch(FetchCompletion::for_request(&failed, Err(FetchError::NotFound)), at(50));
        assert_eq!(engine.armed_instances(), 0);

        engine.handle_event(ability("8C81", 100));
        let slow = engine.drain_fetch_requests().remove(0);
        assert!(engine.advance_to(at(2100)).is_empty());
        assert_eq!(engine.pending_fetches(), 0);
        assert_eq!(engine.armed_instances(), 0);

        let out = engine.complete_fetch(
            FetchCompletion::for_request(&slow, Ok(vec![image_at("40000001", 85.0)])),
            at(2200),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn unresolvable_fetch_target_drops_instance() {
        let mut engine = engine(fetching_set());
        assert!(engine.handle_event(ability("8C81", 0)).is_empty());
        assert!(engine.drain_fetch_requests().is_empty());
        assert_eq!(engine.armed_instances(), 0);
    }

    #[test]
    fn session_reset_cancels_everything() {
        let mut engine = engine(fetching_set());
        engine.handle_event(image_event("40000001", 0));
        engine.handle_event(ability("8C81", 0));
        let request = engine.drain_fetch_requests().remove(0);
        assert_eq!(engine.epoch(), 1);

        let out = engine.start_session(at(500));
        assert_eq!(out, vec![EngineOutput::SessionReset { epoch: 2, at: at(500) }]);
        assert!(engine.state().is_empty());
        assert_eq!(engine.pending_fetches(), 0);
        assert!(engine.next_deadline().is_none());

        // The old session's completion is ignored even if the instance id were reused.
        let out = engine.complete_fetch(
            FetchCompletion::for_request(&request, Ok(vec![image_at("40000001", 85.0)])),
            at(600),
        );
        assert!(out.is_empty());
        assert!(engine.advance_to(at(5000)).is_empty());
    }

    #[test]
    fn clock_never_moves_backwards() {
        let set = TriggerSet::builder("s")
            .trigger(TriggerDefinition::builder("A", EventType::Ability).response("a").build().unwrap())
            .build()
            .unwrap();
        let mut engine = engine(set);
        engine.advance_to(at(1000));
        let out = engine.handle_event(ability("1", 500));
        assert_eq!(out[0].as_alert().unwrap().fired_at, at(1000));
        assert_eq!(engine.now(), Some(at(1000)));
    }

    #[test]
    fn schedules_past_calendar_end_are_dropped() {
        let set = TriggerSet::builder("s")
            .trigger(
                TriggerDefinition::builder("Late", EventType::Ability)
                    .id("1")
                    .delay_secs(1.0)
                    .response("late")
                    .build()
                    .unwrap(),
            )
            .trigger(
                TriggerDefinition::builder("Lingering", EventType::Ability)
                    .id("2")
                    .duration_secs(5.0)
                    .response("lingering")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let mut engine = engine(set);
        let end = DateTime::<Utc>::MAX_UTC;

        let late = LogEvent::new(EventType::Ability, "1", end).with_source("40000001", "Boss");
        assert!(engine.handle_event(late).is_empty());
        assert_eq!(engine.armed_instances(), 0);

        // Fires, but the expiry cannot be represented.
        let lingering = LogEvent::new(EventType::Ability, "2", end).with_source("40000001", "Boss");
        let out = engine.handle_event(lingering);
        assert_eq!(out[0].as_alert().unwrap().expires_at, None);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let set = Arc::new(TriggerSet::builder("s").build().unwrap());
        let config = EngineConfig {
            max_pending_fetches: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::new(set, config).unwrap_err().is_validation());
    }
}
