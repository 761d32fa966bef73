//! vtime core - deterministic virtual-time scheduling
//!
//! This library lets node software run under full program control:
//! 1. **Virtual Clock**: a monotonic time authority that moves only when told
//! 2. **Timers**: one-shot deadlines whose handlers run from a crank step
//! 3. **Applications**: cooperative reactors that share a clock and only let
//!    time advance once every one of them is idle. An `Application` owns its
//!    work; callbacks capture an `AppHandle` to post back without keeping it
//!    alive
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use vtime_core::{Application, VirtualClock, VirtualTimer};
//!
//! let clock = VirtualClock::new();
//! let app = Application::new(&clock);
//!
//! let timer = VirtualTimer::new(&app);
//! timer.expires_from_now(Duration::from_secs(30));
//! timer.async_wait(|result| assert!(result.is_ok()));
//!
//! while app.crank(false) > 0 {}
//! assert_eq!(VirtualClock::format_iso8601(clock.now()), "1970-01-01T00:00:30Z");
//! ```

pub mod clock;
pub mod timer;
pub mod application;

// Re-export key types for convenience
pub use clock::VirtualClock;
pub use timer::VirtualTimer;
pub use application::{AppHandle, Application};
pub use vtime_env::{AppId, ClockError, ClockView, TimePoint, WaitError};
