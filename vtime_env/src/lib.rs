//! Virtual-time environment vocabulary
//!
//! This crate holds the types shared between the scheduler (`vtime_core`),
//! the simulation harness (`vtime_sim`) and any node component that needs to
//! read time without being able to move it.
//!
//! # Core Concept
//!
//! Node software never looks at the wall clock. It reads time through
//! [`ClockView`], schedules work through an application's reactor, and the
//! test driver decides when virtual time advances.
//!
//! # Example
//!
//! ```ignore
//! use vtime_env::ClockView;
//!
//! fn log_line<C: ClockView>(clock: &C, msg: &str) -> String {
//!     format!("{} {}", clock.format_now(), msg)
//! }
//! ```

mod context;
mod types;
mod error;

pub use context::ClockView;
pub use types::{AppId, TimePoint};
pub use error::{ClockError, WaitError};
