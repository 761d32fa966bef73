//! Virtual Clock - the single time authority of a shared-time group.
//!
//! A [`VirtualClock`] is a cheap handle; every clone observes the same
//! current time. Applications constructed against a clock register
//! themselves in its group registry so that any one of them can ask whether
//! the whole group is idle before virtual time is allowed to move.
//!
//! ```text
//!        VirtualClock (now = T)
//!        ┌──────────────────────────────┐
//!        │ registry: [Weak<app-0>,      │
//!        │            Weak<app-1>, ...] │
//!        └──────────────────────────────┘
//!          ▲              ▲
//!     app-0.crank()  app-1.crank()
//!     advances T only when every registered app has an empty queue
//! ```

use crate::application::AppState;

use chrono::{DateTime, NaiveDateTime, Utc};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::SystemTime;
use tracing::{debug, warn};
use vtime_env::{AppId, ClockError, ClockView, TimePoint};

/// Format used for rendering and parsing time points.
const ISO8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A virtual clock shared by a group of applications.
///
/// Time starts at the epoch and only moves forward, and only through
/// [`advance_to`](Self::advance_to). In normal use that call is made by an
/// application's crank step once the whole group is idle.
#[derive(Clone, Default)]
pub struct VirtualClock {
    inner: Rc<ClockInner>,
}

#[derive(Default)]
struct ClockInner {
    /// Current virtual time
    now: Cell<TimePoint>,

    /// Next application id to hand out
    next_app_id: Cell<u64>,

    /// Group-wide timer registration counter (tie-break for equal deadlines)
    next_sequence: Cell<u64>,

    /// Applications sharing this clock, in construction order
    apps: RefCell<Vec<Weak<AppState>>>,
}

impl VirtualClock {
    /// Creates a clock at the epoch with no applications.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current time point.
    pub fn now(&self) -> TimePoint {
        self.inner.now.get()
    }

    /// Moves the clock to `t`.
    ///
    /// # Panics
    /// Panics if `t` is earlier than [`now`](Self::now). A backward move would
    /// break every time-dependent protocol running on the clock.
    pub fn advance_to(&self, t: TimePoint) {
        let now = self.now();
        if t < now {
            panic!(
                "virtual clock cannot move backwards: now={}ns, target={}ns",
                now.as_nanos(),
                t.as_nanos()
            );
        }
        if t > now {
            debug!(
                from_ns = now.as_nanos(),
                to_ns = t.as_nanos(),
                "virtual time advanced"
            );
        }
        self.inner.now.set(t);
    }

    /// Returns the current time mapped onto the wall-clock timeline.
    pub fn system_time(&self) -> SystemTime {
        self.now().to_system_time()
    }

    /// Renders `t` as `YYYY-MM-DDThh:mm:ssZ` (UTC, sub-seconds truncated).
    pub fn format_iso8601(t: TimePoint) -> String {
        let secs = i64::try_from(t.as_unix_secs()).unwrap_or(i64::MAX);
        // u64 nanoseconds stay far inside chrono's range
        let dt = DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_default();
        dt.format(ISO8601_FORMAT).to_string()
    }

    /// Parses a `YYYY-MM-DDThh:mm:ssZ` string back into a time point.
    ///
    /// # Errors
    /// - [`ClockError::InvalidTimestamp`] if the string is malformed or the
    ///   instant is beyond the representable range
    /// - [`ClockError::BeforeEpoch`] for instants before 1970-01-01
    pub fn parse_iso8601(s: &str) -> Result<TimePoint, ClockError> {
        let naive = NaiveDateTime::parse_from_str(s, ISO8601_FORMAT)
            .map_err(|_| ClockError::invalid(s))?;
        let secs = naive.and_utc().timestamp();
        if secs < 0 {
            return Err(ClockError::BeforeEpoch(secs));
        }

        u64::try_from(secs)
            .ok()
            .and_then(|s| s.checked_mul(1_000_000_000))
            .map(TimePoint::from_nanos)
            .ok_or_else(|| ClockError::invalid(s))
    }

    /// Number of live applications sharing this clock.
    pub fn app_count(&self) -> usize {
        self.live_apps().len()
    }

    /// Cranks every live application once, in construction order.
    ///
    /// Returns the total number of callbacks run. A return of 0 means the
    /// whole group is idle: no queued tasks and no pending timers.
    pub fn crank_all(&self, block: bool) -> usize {
        self.live_apps()
            .into_iter()
            .map(|state| state.crank(block))
            .sum()
    }

    /// Repeats [`crank_all`](Self::crank_all) until a round does nothing or
    /// `max_rounds` rounds have run. Returns the total callbacks run.
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_rounds {
            let ran = self.crank_all(false);
            if ran == 0 {
                return total;
            }
            total += ran;
        }
        warn!(max_rounds, total, "group still busy after round limit");
        total
    }

    /// Returns true if both handles refer to the same clock.
    pub fn ptr_eq(&self, other: &VirtualClock) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn allocate_app_id(&self) -> AppId {
        let id = self.inner.next_app_id.get();
        self.inner.next_app_id.set(id + 1);
        AppId(id)
    }

    pub(crate) fn register(&self, app: Weak<AppState>) {
        self.inner.apps.borrow_mut().push(app);
    }

    pub(crate) fn next_sequence(&self) -> u64 {
        let seq = self.inner.next_sequence.get();
        self.inner.next_sequence.set(seq + 1);
        seq
    }

    /// Upgrades the registry, pruning applications that have been dropped.
    pub(crate) fn live_apps(&self) -> Vec<Rc<AppState>> {
        let mut apps = self.inner.apps.borrow_mut();
        let mut live = Vec::with_capacity(apps.len());
        apps.retain(|weak| match weak.upgrade() {
            Some(app) if !app.is_closed() => {
                live.push(app);
                true
            }
            _ => false,
        });
        live
    }

    /// Drops registry entries for closed or destroyed applications.
    pub(crate) fn prune(&self) {
        self.inner
            .apps
            .borrow_mut()
            .retain(|weak| weak.upgrade().is_some_and(|app| !app.is_closed()));
    }
}

impl ClockView for VirtualClock {
    fn now(&self) -> TimePoint {
        VirtualClock::now(self)
    }

    fn system_time(&self) -> SystemTime {
        VirtualClock::system_time(self)
    }

    fn format(&self, t: TimePoint) -> String {
        VirtualClock::format_iso8601(t)
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("now_ns", &self.now().as_nanos())
            .field("apps", &self.inner.apps.borrow().len())
            .finish()
    }
}
