//! Application - a single-threaded reactor bound to a shared virtual clock.
//!
//! Each application owns a FIFO queue of immediate tasks and the pending
//! waits of its timers. [`Application::crank`] is the only way anything
//! runs: it either drains the application's own queue, or, when the entire
//! shared-time group is idle, advances the clock to the nearest deadline and
//! fires every wait that has become due.
//!
//! # Crank Step
//!
//! ```text
//! crank(block)
//!   ├─ own queue non-empty ──► run snapshot of queue, return count
//!   ├─ a peer queue non-empty ─► return 0 (time is held)
//!   └─ whole group idle
//!        ├─ no pending waits ──► return 0
//!        └─ advance clock to min deadline, fire all due waits
//!           in (deadline, registration) order, return count
//! ```

use crate::clock::VirtualClock;

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};
use vtime_env::{AppId, TimePoint, WaitError};

/// An immediate task.
pub(crate) type Task = Box<dyn FnOnce()>;

/// A timer completion handler.
pub(crate) type WaitHandler = Box<dyn FnOnce(Result<(), WaitError>)>;

/// Identifies a timer within its owning application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerId(pub(crate) u64);

/// Ordering key of a pending wait: deadline first, then group-wide
/// registration sequence.
type WaitKey = (TimePoint, u64);

/// A wait registered by `VirtualTimer::async_wait`.
pub(crate) struct PendingWait {
    timer: TimerId,
    handler: WaitHandler,
}

/// Shared state behind an [`Application`].
pub(crate) struct AppState {
    id: AppId,
    name: String,
    clock: VirtualClock,
    queue: RefCell<VecDeque<Task>>,
    waits: RefCell<BTreeMap<WaitKey, PendingWait>>,
    next_timer_id: Cell<u64>,
    /// Set once the owning `Application` is dropped
    closed: Cell<bool>,
}

impl AppState {
    pub(crate) fn id(&self) -> AppId {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn next_deadline(&self) -> Option<TimePoint> {
        self.waits.borrow().keys().next().map(|(deadline, _)| *deadline)
    }

    /// Queues a task. Returns false, dropping the task, once closed.
    pub(crate) fn enqueue(&self, task: Task) -> bool {
        if self.is_closed() {
            return false;
        }
        self.queue.borrow_mut().push_back(task);
        true
    }

    pub(crate) fn allocate_timer_id(&self) -> TimerId {
        let id = self.next_timer_id.get();
        self.next_timer_id.set(id + 1);
        TimerId(id)
    }

    /// Registers a wait for `timer` at `deadline`. Dropped unrun once closed.
    pub(crate) fn schedule(&self, timer: TimerId, deadline: TimePoint, handler: WaitHandler) {
        if self.is_closed() {
            trace!(app = %self.id, timer = timer.0, "wait on a closed application, dropped");
            return;
        }
        let seq = self.clock.next_sequence();
        trace!(app = %self.id, timer = timer.0, deadline_ns = deadline.as_nanos(), seq, "wait registered");
        self.waits
            .borrow_mut()
            .insert((deadline, seq), PendingWait { timer, handler });
    }

    /// Removes every pending wait of `timer` and posts its cancellation.
    ///
    /// Returns the number of waits cancelled. Waits already collected by a
    /// crank step are no longer here and are unaffected.
    pub(crate) fn cancel_timer(&self, timer: TimerId) -> usize {
        let cancelled: Vec<PendingWait> = {
            let mut waits = self.waits.borrow_mut();
            let keys: Vec<WaitKey> = waits
                .iter()
                .filter(|(_, wait)| wait.timer == timer)
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| waits.remove(key)).collect()
        };

        let count = cancelled.len();
        for wait in cancelled {
            let handler = wait.handler;
            self.enqueue(Box::new(move || handler(Err(WaitError::Cancelled))));
        }
        if count > 0 {
            trace!(app = %self.id, timer = timer.0, count, "waits cancelled");
        }
        count
    }

    pub(crate) fn pending_for(&self, timer: TimerId) -> usize {
        self.waits
            .borrow()
            .values()
            .filter(|wait| wait.timer == timer)
            .count()
    }

    /// Removes and returns every wait whose deadline is at or before `now`.
    fn take_due(&self, now: TimePoint) -> Vec<(WaitKey, PendingWait)> {
        let mut waits = self.waits.borrow_mut();
        let mut due = Vec::new();
        while let Some((key, _)) = waits.first_key_value() {
            if key.0 > now {
                break;
            }
            if let Some(entry) = waits.pop_first() {
                due.push(entry);
            }
        }
        due
    }

    /// Closes the application and drops its queued tasks and pending waits
    /// without running them.
    ///
    /// Both collections are moved out before they are dropped, so handlers
    /// whose captures touch this application again (a `VirtualTimer` being
    /// dropped, say) see it already empty.
    fn close(&self) -> (usize, usize) {
        self.closed.set(true);
        let queue = std::mem::take(&mut *self.queue.borrow_mut());
        let waits = std::mem::take(&mut *self.waits.borrow_mut());
        let discarded = (queue.len(), waits.len());
        drop(queue);
        drop(waits);
        discarded
    }

    /// One scheduling step on behalf of this application.
    pub(crate) fn crank(&self, block: bool) -> usize {
        let ready: Vec<Task> = self.queue.borrow_mut().drain(..).collect();
        if !ready.is_empty() {
            let count = ready.len();
            trace!(app = %self.id, count, "running immediate tasks");
            for task in ready {
                task();
            }
            return count;
        }

        let group = self.clock.live_apps();
        if let Some(busy) = group.iter().find(|app| !app.is_idle()) {
            trace!(app = %self.id, peer = %busy.id(), "peer has queued work, time held");
            return 0;
        }

        let Some(deadline) = group.iter().filter_map(|app| app.next_deadline()).min() else {
            if block {
                warn!(app = %self.id, "blocking crank on an idle group, nothing to wait for");
            }
            return 0;
        };

        let now = self.clock.now().max(deadline);
        self.clock.advance_to(now);

        let mut due: Vec<(WaitKey, PendingWait)> =
            group.iter().flat_map(|app| app.take_due(now)).collect();
        due.sort_by_key(|(key, _)| *key);

        let fired = due.len();
        debug!(app = %self.id, now_ns = now.as_nanos(), fired, "timers fired");
        for (_, wait) in due {
            (wait.handler)(Ok(()));
        }
        fired
    }
}

/// A reactor participating in a shared-time group.
///
/// `Application` is the only owning handle. Callbacks that need to post
/// back to an application capture an [`AppHandle`] instead, which does not
/// keep it alive. Dropping the `Application` discards everything still
/// queued or pending on it, unrun, and removes it from the group.
pub struct Application {
    state: Rc<AppState>,
}

impl Application {
    /// Creates an application bound to `clock`.
    pub fn new(clock: &VirtualClock) -> Self {
        Self::build(clock, None)
    }

    /// Creates an application with a name used in logs.
    pub fn named(clock: &VirtualClock, name: impl Into<String>) -> Self {
        Self::build(clock, Some(name.into()))
    }

    fn build(clock: &VirtualClock, name: Option<String>) -> Self {
        let id = clock.allocate_app_id();
        let state = Rc::new(AppState {
            id,
            name: name.unwrap_or_else(|| id.to_string()),
            clock: clock.clone(),
            queue: RefCell::new(VecDeque::new()),
            waits: RefCell::new(BTreeMap::new()),
            next_timer_id: Cell::new(0),
            closed: Cell::new(false),
        });
        clock.register(Rc::downgrade(&state));
        debug!(app = %id, name = %state.name, "application created");
        Self { state }
    }

    /// Returns a non-owning handle for callbacks to capture.
    pub fn handle(&self) -> AppHandle {
        AppHandle {
            state: Rc::downgrade(&self.state),
            id: self.state.id,
            clock: self.state.clock.clone(),
        }
    }

    /// Returns this application's id within its group.
    pub fn id(&self) -> AppId {
        self.state.id
    }

    /// Returns the application's name.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Returns the shared clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.state.clock
    }

    /// Enqueues an immediate task. It runs on a later `crank` of this
    /// application, never on another application's crank.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + 'static,
    {
        self.state.enqueue(Box::new(task));
    }

    /// Number of tasks waiting in the immediate queue.
    pub fn queue_len(&self) -> usize {
        self.state.queue.borrow().len()
    }

    /// Returns true if the immediate queue is empty.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Number of timer waits registered on this application.
    pub fn pending_timers(&self) -> usize {
        self.state.waits.borrow().len()
    }

    /// Earliest deadline among this application's pending waits.
    pub fn next_deadline(&self) -> Option<TimePoint> {
        self.state.next_deadline()
    }

    /// Runs one scheduling step and returns the number of callbacks invoked.
    ///
    /// Priority order:
    /// 1. If this application has queued tasks, run the tasks present at
    ///    entry (tasks they post wait for the next call).
    /// 2. Otherwise, if every application on the clock is idle, advance the
    ///    clock to the earliest pending deadline in the group and fire all
    ///    waits now due, on any application.
    /// 3. Otherwise a peer still has queued work; nothing happens.
    ///
    /// Returns 0 when nothing could run. `block` has no wall-clock meaning
    /// here; blocking on a group with nothing pending is reported as a
    /// warning.
    pub fn crank(&self, block: bool) -> usize {
        self.state.crank(block)
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        let (tasks, waits) = self.state.close();
        self.state.clock.prune();
        debug!(
            app = %self.state.id,
            tasks,
            waits,
            "application dropped, pending work discarded"
        );
    }
}

/// Non-owning handle to an [`Application`].
///
/// Cheap to clone and safe to capture in the application's own tasks and
/// timer handlers. Once the application is dropped, posts are discarded.
#[derive(Clone)]
pub struct AppHandle {
    state: Weak<AppState>,
    id: AppId,
    clock: VirtualClock,
}

impl AppHandle {
    /// Id of the application this handle refers to.
    pub fn id(&self) -> AppId {
        self.id
    }

    /// Returns the shared clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Returns true while the application exists.
    pub fn is_alive(&self) -> bool {
        self.state.upgrade().is_some_and(|state| !state.is_closed())
    }

    /// Enqueues an immediate task on the application.
    ///
    /// Returns false, dropping the task unrun, if the application is gone.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + 'static,
    {
        match self.state.upgrade() {
            Some(state) => state.enqueue(Box::new(task)),
            None => false,
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Rc<AppState>> {
        self.state.upgrade().filter(|state| !state.is_closed())
    }
}

impl std::fmt::Debug for AppHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("id", &self.state.id)
            .field("name", &self.state.name)
            .field("queue_len", &self.queue_len())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}
