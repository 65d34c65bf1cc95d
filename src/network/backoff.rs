//! Reconnect delay policy

use std::time::Duration;

/// First reconnect delay
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delays never grow past this
pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

/// Exponential backoff: 1s, 2s, 4s, ... capped at [`MAX_BACKOFF`]
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_limits(INITIAL_BACKOFF, MAX_BACKOFF)
    }

    pub fn with_limits(initial: Duration, max: Duration) -> Self {
        Self { current: initial, max }
    }

    /// Delay to wait after the latest failure; doubles the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
