//! VirtualTimer - one-shot deadlines on an application's virtual clock.

use crate::application::{AppHandle, Application, TimerId};

use std::cell::Cell;
use std::time::Duration;
use tracing::trace;
use vtime_env::{AppId, TimePoint, WaitError};

/// A timer owned by one application and scheduled against its clock.
///
/// Arm it with [`expires_from_now`](Self::expires_from_now) or
/// [`expires_at`](Self::expires_at), then register completion handlers with
/// [`async_wait`](Self::async_wait). Handlers run only from inside a crank:
/// with `Ok(())` once the deadline is reached, or with
/// `Err(WaitError::Cancelled)` if the wait is cancelled first.
///
/// Rearming cancels every outstanding wait, so a superseded handler can
/// never complete normally even if its original deadline has since passed.
/// Dropping the timer cancels as well.
///
/// The timer does not keep its application alive. Once the application is
/// gone, arming still records the expiry but waits are dropped unrun.
pub struct VirtualTimer {
    /// Owning application
    app: AppHandle,

    /// Identity of this timer within the application
    id: TimerId,

    /// Deadline used by the next `async_wait`
    expiry: Cell<TimePoint>,
}

impl VirtualTimer {
    /// Creates an unarmed timer on `app`. Its expiry is the current time.
    pub fn new(app: &Application) -> Self {
        Self::on(&app.handle())
    }

    /// Creates an unarmed timer on the application behind `app`.
    ///
    /// Usable from inside callbacks, which only hold handles. If the
    /// application is already gone the timer is inert.
    pub fn on(app: &AppHandle) -> Self {
        let id = app
            .upgrade()
            .map(|state| state.allocate_timer_id())
            .unwrap_or(TimerId(0));
        Self {
            app: app.clone(),
            id,
            expiry: Cell::new(app.clock().now()),
        }
    }

    /// Arms the timer `d` from the current virtual time.
    ///
    /// Cancels any waits still pending on this timer and returns how many.
    ///
    /// # Panics
    /// Panics if the deadline overflows the time point range.
    pub fn expires_from_now(&self, d: Duration) -> usize {
        self.expires_at(self.app.clock().now() + d)
    }

    /// Arms the timer at the absolute time `t`.
    ///
    /// Cancels any waits still pending on this timer and returns how many.
    pub fn expires_at(&self, t: TimePoint) -> usize {
        let cancelled = self.cancel();
        self.expiry.set(t);
        cancelled
    }

    /// Registers `handler` to run once the expiry is reached.
    ///
    /// The handler is never called from inside this method.
    pub fn async_wait<F>(&self, handler: F)
    where
        F: FnOnce(Result<(), WaitError>) + 'static,
    {
        match self.app.upgrade() {
            Some(app) => app.schedule(self.id, self.expiry.get(), Box::new(handler)),
            None => trace!(app = %self.app.id(), "wait on a timer whose application is gone, dropped"),
        }
    }

    /// Cancels every pending wait. Each cancelled handler is posted to the
    /// application's queue and receives `Err(WaitError::Cancelled)` on a
    /// later crank.
    ///
    /// Returns the number of waits cancelled; 0 if they already fired.
    pub fn cancel(&self) -> usize {
        self.app
            .upgrade()
            .map(|app| app.cancel_timer(self.id))
            .unwrap_or(0)
    }

    /// Returns the deadline the next wait will use.
    pub fn expiry(&self) -> TimePoint {
        self.expiry.get()
    }

    /// Number of waits registered and not yet fired or cancelled.
    pub fn pending(&self) -> usize {
        self.app
            .upgrade()
            .map(|app| app.pending_for(self.id))
            .unwrap_or(0)
    }

    /// Id of the owning application.
    pub fn app_id(&self) -> AppId {
        self.app.id()
    }
}

impl Drop for VirtualTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for VirtualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualTimer")
            .field("app", &self.app.id())
            .field("expiry_ns", &self.expiry.get().as_nanos())
            .field("pending", &self.pending())
            .finish()
    }
}
