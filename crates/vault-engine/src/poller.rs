//! Status poll timing.

use std::time::{Duration, Instant};

use vault_common::STATUS_POLL_INTERVAL_MS;

/// Decides when the periodic status probe is due.
#[derive(Debug)]
pub struct StatusPoller {
    interval: Duration,
    last: Option<Instant>,
}

impl StatusPoller {
    /// Creates a poller with the standard 500 ms interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interval: Duration::from_millis(STATUS_POLL_INTERVAL_MS),
            last: None,
        }
    }

    /// True when a probe should be sent at `now`; arms the next interval.
    pub fn poll_due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_poll_is_due() {
        let mut p = StatusPoller::new();
        assert!(p.poll_due(Instant::now()));
    }

    #[test]
    fn test_interval_respected() {
        let mut p = StatusPoller::new();
        let t0 = Instant::now();
        assert!(p.poll_due(t0));
        assert!(!p.poll_due(t0 + Duration::from_millis(499)));
        assert!(p.poll_due(t0 + Duration::from_millis(500)));
    }
}
