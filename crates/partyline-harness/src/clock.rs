//! Simulated per-node clocks.
//!
//! Each node owns a tick counter advanced by the bench, converted to
//! seconds through a per-node tick rate. Rates differ by a few parts per
//! million across nodes, which is exactly the skew the sync protocol has
//! to fight.

use std::cell::RefCell;
use std::rc::Rc;

use partyline_core::Clock;

#[derive(Debug)]
struct ClockState {
    ticks: u64,
    ticks_per_sec: f64,
}

/// Shared handle to one node's simulated clock.
///
/// Clones share state: the bench keeps one handle to advance ticks, the
/// node keeps another to read (and, on sync, set) the time.
#[derive(Debug, Clone)]
pub struct SimClock {
    state: Rc<RefCell<ClockState>>,
}

impl SimClock {
    /// A clock ticking `ticks_per_sec` times per simulated second,
    /// starting at zero.
    pub fn new(ticks_per_sec: f64) -> Self {
        Self { state: Rc::new(RefCell::new(ClockState { ticks: 0, ticks_per_sec })) }
    }

    /// Advance the tick counter.
    pub fn advance(&self, ticks: u64) {
        self.state.borrow_mut().ticks += ticks;
    }

    /// Current tick count.
    pub fn ticks(&self) -> u64 {
        self.state.borrow().ticks
    }
}

impl Clock for SimClock {
    fn now(&self) -> f64 {
        let state = self.state.borrow();
        state.ticks as f64 / state.ticks_per_sec
    }

    fn set_time(&mut self, secs: f64) {
        let mut state = self.state.borrow_mut();
        state.ticks = (secs * state.ticks_per_sec) as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_convert_to_seconds() {
        let clock = SimClock::new(1_000_000.0);
        clock.advance(1_500_000);
        assert!((clock.now() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn set_time_rewrites_ticks() {
        let mut clock = SimClock::new(1_000_000.0);
        clock.advance(2_000_000);
        clock.set_time(1.0005);
        assert_eq!(clock.ticks(), 1_000_500);
    }

    #[test]
    fn clones_share_state() {
        let clock = SimClock::new(1000.0);
        let handle = clock.clone();
        handle.advance(500);
        assert!((clock.now() - 0.5).abs() < 1e-9);
    }
}
