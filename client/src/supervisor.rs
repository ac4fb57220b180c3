//! Reconnection policy: exponential backoff behind a single-loop guard.

use crate::config::ClientConfig;
use log::{info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Why the session is being rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    Watchdog,
    CommandTimeouts,
    Transport,
    AuthRejected,
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ReconnectReason::Watchdog => "watchdog expired",
            ReconnectReason::CommandTimeouts => "repeated command timeouts",
            ReconnectReason::Transport => "socket error",
            ReconnectReason::AuthRejected => "login rejected",
        };
        f.write_str(reason)
    }
}

/// Doubling delay capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Returns the delay for the next attempt and doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

pub struct ReconnectSupervisor {
    backoff: Backoff,
    reconnecting: bool,
    attempts: u32,
    attempt_at: Option<Instant>,
}

impl ReconnectSupervisor {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            backoff: Backoff::new(initial, max),
            reconnecting: false,
            attempts: 0,
            attempt_at: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.initial_backoff, config.max_backoff)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts a reconnect loop. Returns the time of the first attempt, or
    /// `None` if a loop is already running.
    pub fn request(&mut self, reason: ReconnectReason, now: Instant) -> Option<Instant> {
        if self.reconnecting {
            info!("Reconnect already in progress, ignoring {}", reason);
            return None;
        }

        self.reconnecting = true;
        self.attempts = 0;
        let delay = self.backoff.next_delay();
        warn!("Connection lost ({}), reconnecting in {:?}", reason, delay);
        let at = now + delay;
        self.attempt_at = Some(at);
        Some(at)
    }

    /// Consumes a due attempt. The caller opens a new session when this
    /// returns true.
    pub fn take_due_attempt(&mut self, now: Instant) -> bool {
        match self.attempt_at {
            Some(at) if now >= at => {
                self.attempt_at = None;
                self.attempts += 1;
                info!("Reconnect attempt {}", self.attempts);
                true
            }
            _ => false,
        }
    }

    /// Schedules the next attempt after a failed one.
    pub fn attempt_failed(&mut self, now: Instant) -> Instant {
        self.reconnecting = true;
        let delay = self.backoff.next_delay();
        warn!(
            "Reconnect attempt {} failed, retrying in {:?}",
            self.attempts, delay
        );
        let at = now + delay;
        self.attempt_at = Some(at);
        at
    }

    pub fn on_login_success(&mut self) {
        if self.reconnecting {
            info!("Reconnected after {} attempts", self.attempts);
        }
        self.reconnecting = false;
        self.attempts = 0;
        self.attempt_at = None;
        self.backoff.reset();
    }

    /// Abandons any scheduled attempt, e.g. on shutdown.
    pub fn cancel(&mut self) {
        self.reconnecting = false;
        self.attempt_at = None;
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.attempt_at
    }
}
