//! Monotonic time seam.

/// A node's local clock, in seconds.
///
/// Reads must be cheap and monotonic between [`set_time`](Clock::set_time)
/// calls. `set_time` exists solely for slot-timing slaves: a received sync
/// packet nudges the local clock toward the sender's.
pub trait Clock {
    /// Current local time in seconds.
    fn now(&self) -> f64;

    /// Adjust the local clock. Only the sync-packet handler calls this.
    fn set_time(&mut self, secs: f64);
}
