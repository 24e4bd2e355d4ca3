//! Timing controller.
//!
//! Owns every timer the engine schedules (delayed firings, fetch deadlines,
//! alert expiries) plus the per-slot bookkeeping behind suppression and
//! replacement. A slot is a (definition, correlation key) pair.
//!
//! Timers are cancelled lazily: the engine drops the instance or alert a timer
//! refers to, and the timer is ignored when it comes due.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::output::{AlertId, InstanceId};
use crate::trigger::TriggerId;

/// Suppression / replacement slot.
pub type SlotKey = (TriggerId, Option<String>);

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// The instance's delay has elapsed.
    Fire(InstanceId),
    /// The instance's fetch has been outstanding too long.
    FetchDeadline(InstanceId),
    /// The alert's duration has elapsed.
    Expire { slot: SlotKey, alert_id: AlertId },
}

#[derive(Debug)]
struct Timer {
    due: DateTime<Utc>,
    seq: u64,
    kind: TimerKind,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Equal due times keep scheduling order.
    fn cmp(&self, other: &Self) -> Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveAlert {
    alert_id: AlertId,
    expires_at: DateTime<Utc>,
}

#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct TimingController {
    timers: BinaryHeap<Reverse<Timer>>,
    seq: u64,
    last_fired: HashMap<SlotKey, DateTime<Utc>>,
    in_flight: HashMap<SlotKey, usize>,
    active: HashMap<SlotKey, ActiveAlert>,
}

impl TimingController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a new match for `slot` must be dropped.
    ///
    /// Only definitions that declare a window are ever suppressed. Within the
    /// window after the last firing, or while another instance of the slot is
    /// still armed, new matches are ignored.
    #[must_use]
    pub fn is_suppressed(&self, slot: &SlotKey, window: Option<Duration>, now: DateTime<Utc>) -> bool {
        let Some(window) = window else {
            return false;
        };
        if self.in_flight.get(slot).copied().unwrap_or(0) > 0 {
            return true;
        }
        self.last_fired
            .get(slot)
            .is_some_and(|&last| now.signed_duration_since(last) < window)
    }

    /// Marks one more instance of `slot` as armed.
    pub fn arm(&mut self, slot: &SlotKey) {
        *self.in_flight.entry(slot.clone()).or_insert(0) += 1;
    }

    /// Marks one instance of `slot` as no longer armed.
    pub fn disarm(&mut self, slot: &SlotKey) {
        if let Some(count) = self.in_flight.get_mut(slot) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.in_flight.remove(slot);
            }
        }
    }

    /// Number of armed instances of `slot`.
    #[must_use]
    pub fn armed(&self, slot: &SlotKey) -> usize {
        self.in_flight.get(slot).copied().unwrap_or(0)
    }

    /// Records a firing for future suppression checks.
    pub fn record_fire(&mut self, slot: &SlotKey, at: DateTime<Utc>) {
        self.last_fired.insert(slot.clone(), at);
    }

    /// When `slot` last fired.
    #[must_use]
    pub fn last_fired(&self, slot: &SlotKey) -> Option<DateTime<Utc>> {
        self.last_fired.get(slot).copied()
    }

    /// Schedules a timer.
    pub fn schedule(&mut self, due: DateTime<Utc>, kind: TimerKind) {
        let seq = self.seq;
        self.seq += 1;
        self.timers.push(Reverse(Timer { due, seq, kind }));
    }

    /// Pops the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, TimerKind)> {
        if self.timers.peek().is_some_and(|Reverse(t)| t.due <= now) {
            self.timers.pop().map(|Reverse(t)| (t.due, t.kind))
        } else {
            None
        }
    }

    /// Due time of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.timers.peek().map(|Reverse(t)| t.due)
    }

    /// Makes `alert_id` the valid output of `slot` until `expires_at` and
    /// schedules its expiry. Returns the alert it replaces, if one was still valid.
    pub fn activate(
        &mut self,
        slot: &SlotKey,
        alert_id: AlertId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Option<AlertId> {
        let previous = self
            .active
            .insert(slot.clone(), ActiveAlert { alert_id, expires_at })
            .filter(|prev| prev.expires_at > now)
            .map(|prev| prev.alert_id);

        self.schedule(
            expires_at,
            TimerKind::Expire {
                slot: slot.clone(),
                alert_id,
            },
        );
        previous
    }

    /// Ends `alert_id` if it is still the valid output of `slot`.
    pub fn expire(&mut self, slot: &SlotKey, alert_id: AlertId) -> bool {
        match self.active.get(slot) {
            Some(active) if active.alert_id == alert_id => {
                self.active.remove(slot);
                true
            }
            _ => false,
        }
    }

    /// Number of alerts still inside their duration window.
    #[must_use]
    pub fn active_alerts(&self) -> usize {
        self.active.len()
    }

    /// Cancels every timer and forgets all slot history.
    pub fn clear(&mut self) {
        self.timers.clear();
        self.last_fired.clear();
        self.in_flight.clear();
        self.active.clear();
    }
}
