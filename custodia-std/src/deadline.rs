//! A plain [`Instant`]-based deadline, usable without pulling in an async
//! runtime. The drive loop wraps this with a cancellable sleep in
//! `custodia-tokio`; this module only tracks "how much time is left".

use std::time::{Duration, Instant};

/// The default amount of time the drive loop gives a payment to reach a
/// terminal status before giving up and surfacing `DeadlineExceeded`.
pub const DEFAULT_DRIVE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// A point in time by which some operation must complete.
#[derive(Copy, Clone, Debug)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    /// Starts a new deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// A deadline `DEFAULT_DRIVE_DEADLINE` from now.
    pub fn default_drive_deadline() -> Self {
        Self::after(DEFAULT_DRIVE_DEADLINE)
    }

    /// Returns `true` if `Instant::now()` is at or past the deadline.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// The time remaining until the deadline, or `Duration::ZERO` if it has
    /// already passed.
    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_deadline_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining() > Duration::from_secs(0));
    }

    #[test]
    fn zero_deadline_expires_immediately() {
        let deadline = Deadline::after(Duration::from_millis(0));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::from_secs(0));
    }

    #[test]
    fn default_is_five_minutes() {
        assert_eq!(DEFAULT_DRIVE_DEADLINE, Duration::from_secs(300));
    }
}
