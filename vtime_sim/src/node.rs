//! SimNode - an application plus the workload primitives the harness drives.
//!
//! Every callback installed here records exactly one completion observation
//! (`TaskRan`, `WaitFired` or `WaitCancelled`) so the oracle can match what
//! the scheduler invoked against what each crank reported.

use crate::events::{EventKind, EventLog};

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use vtime_core::{AppHandle, AppId, Application, VirtualClock, VirtualTimer};

/// Work a task performs after recording that it ran.
pub enum FollowUp {
    /// Nothing more
    None,

    /// Post another (terminal) task to an application
    Task(AppHandle),

    /// Arm a fresh timer on an application, relative to the time the task runs
    Timer(AppHandle, Duration),
}

/// A timer together with the id of its most recent wait.
pub struct TimerSlot {
    timer: VirtualTimer,
    current: Cell<Option<u64>>,
    log: EventLog,
}

impl TimerSlot {
    /// Creates an unarmed timer on `app`.
    pub fn new(app: &AppHandle, log: &EventLog) -> Rc<Self> {
        Rc::new(Self {
            timer: VirtualTimer::on(app),
            current: Cell::new(None),
            log: log.clone(),
        })
    }

    /// Owning application.
    pub fn app_id(&self) -> AppId {
        self.timer.app_id()
    }

    /// Arms the timer `delay` from now and registers a wait.
    ///
    /// If a previous wait was still pending it is recorded as superseded.
    /// When the new wait fires and `victim` is set, the handler tries to
    /// cancel the victim's pending wait.
    pub fn arm(self: &Rc<Self>, delay: Duration, victim: Option<Rc<TimerSlot>>) {
        let superseded = self.timer.expires_from_now(delay);
        self.note_superseded(superseded);

        let wait = self.log.next_id();
        let app = self.app_id();
        self.current.set(Some(wait));
        self.log.record(app, EventKind::WaitArmed { wait, deadline: self.timer.expiry() });

        // The handler keeps the slot alive until it has run
        let slot = Rc::clone(self);
        self.timer.async_wait(move |result| {
            match result {
                Ok(()) => {
                    slot.log.record(app, EventKind::WaitFired { wait });
                    if let Some(victim) = victim {
                        victim.cancel();
                    }
                }
                Err(_) => slot.log.record(app, EventKind::WaitCancelled { wait }),
            }
        });
    }

    /// Cancels the pending wait, if any.
    pub fn cancel(&self) {
        let cancelled = self.timer.cancel();
        self.note_superseded(cancelled);
    }

    /// Number of waits still pending on the timer.
    pub fn pending(&self) -> usize {
        self.timer.pending()
    }

    fn note_superseded(&self, cancelled: usize) {
        if cancelled == 0 {
            return;
        }
        if let Some(wait) = self.current.get() {
            self.log.record(self.app_id(), EventKind::WaitSuperseded { wait });
        }
    }
}

/// A simulated node: one application and the timers armed on it.
pub struct SimNode {
    app: Application,
    log: EventLog,
    timers: Vec<Rc<TimerSlot>>,
}

impl SimNode {
    /// Creates a node with a fresh application on `clock`.
    pub fn new(clock: &VirtualClock, index: usize, log: &EventLog) -> Self {
        Self {
            app: Application::named(clock, format!("node-{}", index)),
            log: log.clone(),
            timers: Vec::new(),
        }
    }

    /// Returns the node's application.
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Returns the node's application id.
    pub fn id(&self) -> AppId {
        self.app.id()
    }

    /// Posts a task to `target` that records itself, then runs `follow_up`.
    pub fn post_task(log: &EventLog, target: &AppHandle, follow_up: FollowUp) {
        let task = log.next_id();
        let app = target.id();
        log.record(app, EventKind::TaskPosted { task });

        let log = log.clone();
        target.post(move || {
            log.record(app, EventKind::TaskRan { task });
            match follow_up {
                FollowUp::None => {}
                FollowUp::Task(next) => SimNode::post_task(&log, &next, FollowUp::None),
                FollowUp::Timer(owner, delay) => TimerSlot::new(&owner, &log).arm(delay, None),
            }
        });
    }

    /// Creates a timer slot owned by this node.
    pub fn add_timer(&mut self) -> Rc<TimerSlot> {
        let slot = TimerSlot::new(&self.app.handle(), &self.log);
        self.timers.push(Rc::clone(&slot));
        slot
    }

    /// Timer slots created through [`add_timer`](Self::add_timer).
    pub fn timers(&self) -> &[Rc<TimerSlot>] {
        &self.timers
    }

    /// Returns true if the node has no queued tasks and no pending waits.
    pub fn is_quiescent(&self) -> bool {
        self.app.is_idle() && self.app.pending_timers() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(log: &EventLog) -> Vec<EventKind> {
        log.snapshot().into_iter().map(|o| o.kind).collect()
    }

    #[test]
    fn test_task_follow_up_timer() {
        let clock = VirtualClock::new();
        let log = EventLog::new(&clock);
        let node = SimNode::new(&clock, 0, &log);

        SimNode::post_task(
            &log,
            &node.app().handle(),
            FollowUp::Timer(node.app().handle(), Duration::from_millis(4)),
        );
        assert!(!node.is_quiescent());

        while clock.crank_all(false) > 0 {}

        assert!(node.is_quiescent());
        assert_eq!(
            kinds(&log),
            vec![
                EventKind::TaskPosted { task: 0 },
                EventKind::TaskRan { task: 0 },
                EventKind::WaitArmed { wait: 1, deadline: vtime_core::TimePoint::from_nanos(4_000_000) },
                EventKind::WaitFired { wait: 1 },
            ]
        );
    }

    #[test]
    fn test_rearm_records_superseded_wait() {
        let clock = VirtualClock::new();
        let log = EventLog::new(&clock);
        let mut node = SimNode::new(&clock, 0, &log);

        let slot = node.add_timer();
        slot.arm(Duration::from_millis(1), None);
        slot.arm(Duration::from_millis(2), None);
        assert_eq!(slot.pending(), 1);

        while clock.crank_all(false) > 0 {}

        let kinds = kinds(&log);
        assert!(kinds.contains(&EventKind::WaitSuperseded { wait: 0 }));
        assert!(kinds.contains(&EventKind::WaitCancelled { wait: 0 }));
        assert!(kinds.contains(&EventKind::WaitFired { wait: 1 }));
        assert!(!kinds.contains(&EventKind::WaitFired { wait: 0 }));
        assert_eq!(node.timers().len(), 1);
    }

    #[test]
    fn test_fired_handler_cancels_victim() {
        let clock = VirtualClock::new();
        let log = EventLog::new(&clock);
        let mut node = SimNode::new(&clock, 0, &log);

        let early = node.add_timer();
        let late = node.add_timer();
        late.arm(Duration::from_millis(5), None);
        early.arm(Duration::from_millis(1), Some(Rc::clone(&late)));

        while clock.crank_all(false) > 0 {}

        let kinds = kinds(&log);
        assert!(kinds.contains(&EventKind::WaitSuperseded { wait: 0 }));
        assert!(kinds.contains(&EventKind::WaitCancelled { wait: 0 }));
        assert_eq!(clock.now(), vtime_core::TimePoint::from_nanos(1_000_000));
    }
}
