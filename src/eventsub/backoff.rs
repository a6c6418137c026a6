//! Reconnect delay for the event-feed socket.

use std::time::Duration;

/// Lowest reconnect delay.
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(5);

/// Highest reconnect delay.
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Exponential backoff that doubles on failure and decays on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BACKOFF_FLOOR, BACKOFF_CAP)
    }
}

impl Backoff {
    /// Backoff starting at `floor`, never exceeding `cap`.
    #[must_use]
    pub fn new(floor: Duration, cap: Duration) -> Self {
        Self {
            floor,
            cap: cap.max(floor),
            current: floor,
        }
    }

    /// Delay the next reconnect would wait.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the delay for this attempt and double it for the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// A socket opened: decay toward the floor.
    pub fn on_open(&mut self) {
        self.current = (self.current / 3).max(self.floor);
    }
}
