//! Shared search deadline.
//!
//! Both search levels poll the same deadline at every recursive entry and
//! unwind cleanly once it passes. The timer is `Copy` so tasks can carry
//! it by value; there is nothing to stop or reset.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// A timer that never expires.
    pub fn unbounded() -> Self {
        Timer { deadline: None }
    }

    /// Deadline `seconds` from now. A non-positive budget means unbounded,
    /// matching the `time_to_solve 0` configuration.
    pub fn from_seconds(seconds: f64) -> Self {
        if seconds <= 0.0 {
            return Self::unbounded();
        }
        Timer {
            deadline: Some(Instant::now() + Duration::from_secs_f64(seconds)),
        }
    }

    #[inline]
    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Time left before the deadline; `Duration::MAX` when unbounded and
    /// zero once expired.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_expires() {
        let timer = Timer::unbounded();
        assert!(!timer.expired());
        assert_eq!(timer.remaining(), Duration::MAX);
    }

    #[test]
    fn zero_budget_means_unbounded() {
        assert!(!Timer::from_seconds(0.0).expired());
    }

    #[test]
    fn tiny_budget_expires() {
        let timer = Timer::from_seconds(1e-9);
        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.expired());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }
}
