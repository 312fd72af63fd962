//! Cooldown gate
//!
//! Rate-limits adaptation actions so a burst of signals cannot make the
//! displayed content flicker.

use chrono::{DateTime, Duration, Utc};

/// Default minimum spacing between two adaptation actions (milliseconds)
pub const DEFAULT_COOLDOWN_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct CooldownGate {
    window: Duration,
    last_action_at: Option<DateTime<Utc>>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_COOLDOWN_MS as i64))
    }
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_action_at: None,
        }
    }

    /// Take the gate at `now` if the window has elapsed.
    ///
    /// A denied attempt leaves the recorded action time untouched.
    pub fn try_acquire(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_open(now) {
            return false;
        }
        self.last_action_at = Some(now);
        true
    }

    /// Whether an action at `now` would be permitted
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        match self.last_action_at {
            None => true,
            Some(last) => now - last >= self.window,
        }
    }

    /// Time left before the gate opens again
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.last_action_at {
            None => Duration::zero(),
            Some(last) => (self.window - (now - last)).max(Duration::zero()),
        }
    }

    pub fn last_action_at(&self) -> Option<DateTime<Utc>> {
        self.last_action_at
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Forget the last action, so the next attempt always succeeds
    pub fn reset(&mut self) {
        self.last_action_at = None;
    }
}
