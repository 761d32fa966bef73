//! Observation log shared by every simulated node.
//!
//! Callbacks installed by the workload record what they did and when; the
//! world records one [`StepRecord`] per crank. The oracle checks both.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use vtime_core::VirtualClock;
use vtime_env::{AppId, ClockView, TimePoint};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// An immediate task was enqueued
    TaskPosted { task: u64 },

    /// An immediate task ran
    TaskRan { task: u64 },

    /// A timer wait was registered
    WaitArmed { wait: u64, deadline: TimePoint },

    /// The workload cancelled or rearmed over a wait that was still pending
    WaitSuperseded { wait: u64 },

    /// A wait completed normally
    WaitFired { wait: u64 },

    /// A wait's handler received a cancellation
    WaitCancelled { wait: u64 },
}

impl EventKind {
    /// True for observations produced by a callback the scheduler invoked
    /// (each invoked callback produces exactly one of these).
    pub fn is_completion(&self) -> bool {
        matches!(
            self,
            EventKind::TaskRan { .. } | EventKind::WaitFired { .. } | EventKind::WaitCancelled { .. }
        )
    }

    /// True for completions that run from an application's immediate queue.
    pub fn is_immediate(&self) -> bool {
        matches!(self, EventKind::TaskRan { .. } | EventKind::WaitCancelled { .. })
    }
}

/// A timestamped observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    /// Application the event belongs to
    pub app: AppId,

    /// Virtual time at which it was recorded
    pub time: TimePoint,

    /// The event itself
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What one crank call did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Application that was cranked
    pub app: AppId,

    /// Clock before the crank
    pub before: TimePoint,

    /// Clock after the crank
    pub after: TimePoint,

    /// Tasks queued across the whole group before the crank
    pub queued_before: usize,

    /// Tasks queued on the cranked application before the crank
    pub own_queued_before: usize,

    /// Value returned by `crank`
    pub returned: usize,

    /// Observations recorded during the crank: `log[start..end]`
    pub start: usize,
    pub end: usize,
}

/// Shared, append-only observation log.
///
/// Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct EventLog {
    clock: VirtualClock,
    entries: Rc<RefCell<Vec<Observation>>>,
    next_id: Rc<Cell<u64>>,
}

impl EventLog {
    /// Creates an empty log stamping entries with `clock`.
    pub fn new(clock: &VirtualClock) -> Self {
        Self {
            clock: clock.clone(),
            entries: Rc::new(RefCell::new(Vec::new())),
            next_id: Rc::new(Cell::new(0)),
        }
    }

    /// Allocates a unique id for a task or wait.
    pub fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Appends an observation stamped with the current virtual time.
    pub fn record(&self, app: AppId, kind: EventKind) {
        let time = ClockView::now(&self.clock);
        self.entries.borrow_mut().push(Observation { app, time, kind });
    }

    /// Number of observations so far.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the observations out.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.entries.borrow().clone()
    }

    /// Order-sensitive digest of the log, for comparing two runs.
    pub fn digest(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.entries.borrow().hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_stamps_with_clock() {
        let clock = VirtualClock::new();
        let log = EventLog::new(&clock);
        assert!(log.is_empty());

        log.record(AppId(0), EventKind::TaskPosted { task: 0 });
        clock.advance_to(TimePoint::from_nanos(9));
        log.record(AppId(0), EventKind::TaskRan { task: 0 });

        let entries = log.snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].time, TimePoint::EPOCH);
        assert_eq!(entries[1].time.as_nanos(), 9);
    }

    #[test]
    fn test_ids_are_unique_across_clones() {
        let log = EventLog::new(&VirtualClock::new());
        let other = log.clone();
        assert_eq!(log.next_id(), 0);
        assert_eq!(other.next_id(), 1);
        assert_eq!(log.next_id(), 2);
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let clock = VirtualClock::new();
        let a = EventLog::new(&clock);
        let b = EventLog::new(&clock);

        a.record(AppId(0), EventKind::TaskRan { task: 1 });
        a.record(AppId(1), EventKind::TaskRan { task: 2 });
        b.record(AppId(1), EventKind::TaskRan { task: 2 });
        b.record(AppId(0), EventKind::TaskRan { task: 1 });

        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_observation_json_shape() {
        let obs = Observation {
            app: AppId(2),
            time: TimePoint::from_nanos(5),
            kind: EventKind::WaitFired { wait: 7 },
        };
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["kind"], "wait_fired");
        assert_eq!(json["wait"], 7);
        assert_eq!(json["time"], 5);
    }
}
