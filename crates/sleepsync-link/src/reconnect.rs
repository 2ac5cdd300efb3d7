//! Reconnection policy for the serial link.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection state of the link, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected and pumping frames.
    Connected,
    /// Connection lost; waiting out the retry delay.
    Reconnecting,
}

impl LinkState {
    /// Whether the device is currently reachable.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Options controlling reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay when backoff is enabled.
    pub max_delay: Duration,
    /// Maximum number of consecutive failed attempts before giving up.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Double the delay after each failed attempt, up to `max_delay`.
    pub use_exponential_backoff: bool,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        // A fixed short delay keeps the bridge responsive to replugging
        // the board, which is the common failure in practice.
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
            use_exponential_backoff: false,
        }
    }
}

impl ReconnectOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial retry delay.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Limit the number of consecutive failed attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Enable exponential backoff.
    pub fn exponential_backoff(mut self, enabled: bool) -> Self {
        self.use_exponential_backoff = enabled;
        self
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.initial_delay;
        }
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}
