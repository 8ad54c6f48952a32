//! Single-threaded hashed deadline timer wheel.
//!
//! Timers are bare `i64` deadlines stored in a flat array of
//! `ticks_per_wheel × tick_allocation` slots. Scheduling hashes a deadline
//! into a spoke by tick, cancellation is O(1) through the returned
//! [`TimerId`], and [`DeadlineWheel::poll`] expires due timers incrementally
//! with a caller-supplied cap on work per call. The caller owns the clock;
//! the wheel never blocks or reads time itself.
//!
//! ```
//! use hashwheel::DeadlineWheel;
//!
//! let mut wheel = DeadlineWheel::new(0, 16, 256).unwrap();
//! let id = wheel.schedule(100).unwrap();
//!
//! let mut fired = Vec::new();
//! let mut now = 0;
//! while fired.is_empty() {
//!     now += 16;
//!     wheel.poll(now, usize::MAX, |_, now, id| {
//!         fired.push((now, id));
//!         true
//!     });
//! }
//! // Deadline 100 sits in the tick spanning 96..112, so it expires at the
//! // first poll past the end of that tick.
//! assert_eq!(fired, vec![(112, id)]);
//! ```

mod id;
pub mod table;
mod wheel;

pub use id::TimerId;
pub use table::CapacityExceeded;
pub use wheel::{DeadlineWheel, Iter, NotPowerOfTwo, WheelNotEmpty};

/// Sentinel stored in empty slots. No scheduled timer ever reports it as a
/// deadline.
pub const NULL_DEADLINE: i64 = i64::MAX;

/// Slots per spoke when construction does not specify an allocation.
pub const DEFAULT_TICK_ALLOCATION: usize = 16;
