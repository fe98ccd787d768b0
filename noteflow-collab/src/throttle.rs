//! Trailing-edge push throttle.
//!
//! The first request in a quiet period arms a deadline one window out;
//! requests made while armed fold into it. The owner sleeps until
//! [`Throttle::deadline`] and then calls [`Throttle::take_due`].

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Request a call. Returns when it will happen.
    pub fn schedule(&mut self, now: Instant) -> Instant {
        let window = self.window;
        *self.deadline.get_or_insert(now + window)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm and return true if the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_fold_into_one_deadline() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));

        let first = throttle.schedule(start);
        let second = throttle.schedule(start + Duration::from_millis(300));
        assert_eq!(first, start + Duration::from_secs(1));
        assert_eq!(first, second);
    }

    #[test]
    fn test_take_due() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.schedule(start);

        assert!(!throttle.take_due(start + Duration::from_millis(999)));
        assert!(throttle.is_pending());
        assert!(throttle.take_due(start + Duration::from_secs(1)));
        assert!(!throttle.is_pending());
        assert!(!throttle.take_due(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_rearms_after_firing() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_secs(1));
        throttle.schedule(start);
        assert!(throttle.take_due(start + Duration::from_secs(1)));

        let later = start + Duration::from_millis(1100);
        assert_eq!(throttle.schedule(later), later + Duration::from_secs(1));

        throttle.cancel();
        assert_eq!(throttle.deadline(), None);
    }
}
