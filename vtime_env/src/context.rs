//! Read-only clock interface for scheduler collaborators.

use crate::types::TimePoint;
use std::time::SystemTime;

/// The view of time that node components are allowed to see.
///
/// Networking, protocol logic and diagnostics read time through this trait
/// only. Advancing time is reserved to the scheduler's crank step, so the
/// trait has no mutating methods.
///
/// # Implementations
///
/// - `vtime_core::VirtualClock` - the shared virtual clock
pub trait ClockView {
    /// Returns the current time point.
    fn now(&self) -> TimePoint;

    /// Returns the current time mapped onto the wall-clock timeline.
    ///
    /// Useful for stamping values that other code expects as `SystemTime`.
    fn system_time(&self) -> SystemTime {
        self.now().to_system_time()
    }

    /// Renders a time point as `YYYY-MM-DDThh:mm:ssZ`.
    fn format(&self, t: TimePoint) -> String;

    /// Renders the current time as `YYYY-MM-DDThh:mm:ssZ`.
    fn format_now(&self) -> String {
        self.format(self.now())
    }
}
