//! Break scheduler
//!
//! Two-state machine (`Idle`, `OnBreak`) for "take a break" suggestions.
//! Every break gets its own session id; the automatic end of a break is
//! addressed to that id so a late timer can never end a newer break.
//! Expiry is also checked lazily against `now`, which keeps the scheduler
//! correct when no timer is running at all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default break length (milliseconds)
pub const DEFAULT_BREAK_MS: u64 = 5 * 60 * 1000;

/// An active break
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl BreakSession {
    /// Instant the break elapses; saturates instead of overflowing
    pub fn ends_at(&self) -> DateTime<Utc> {
        Duration::try_milliseconds(self.duration_ms)
            .and_then(|d| self.started_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.ends_at() - now).num_milliseconds().max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BreakState {
    Idle,
    OnBreak(BreakSession),
}

#[derive(Debug, Clone)]
pub struct BreakScheduler {
    duration: Duration,
    state: BreakState,
}

impl Default for BreakScheduler {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_BREAK_MS as i64))
    }
}

impl BreakScheduler {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: BreakState::Idle,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start a break at `now`. Returns the new session, or `None` if a break
    /// is already running.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Option<BreakSession> {
        self.expire_due(now);
        if let BreakState::OnBreak(_) = self.state {
            return None;
        }

        let session = BreakSession {
            id: Uuid::new_v4(),
            started_at: now,
            duration_ms: self.duration.num_milliseconds(),
        };
        self.state = BreakState::OnBreak(session.clone());
        Some(session)
    }

    /// Manual dismissal. A no-op when no break is running.
    pub fn dismiss(&mut self) -> Option<BreakSession> {
        self.end()
    }

    /// Automatic end for a specific session. Ignored when that session is no
    /// longer the active one (already dismissed, or replaced).
    pub fn expire(&mut self, session_id: Uuid) -> Option<BreakSession> {
        match &self.state {
            BreakState::OnBreak(session) if session.id == session_id => self.end(),
            _ => None,
        }
    }

    /// End the running break if its duration has elapsed at `now`
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Option<BreakSession> {
        match &self.state {
            BreakState::OnBreak(session) if now >= session.ends_at() => self.end(),
            _ => None,
        }
    }

    /// Whether a break is running at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.active_session(now).is_some()
    }

    pub fn active_session(&self, now: DateTime<Utc>) -> Option<&BreakSession> {
        match &self.state {
            BreakState::OnBreak(session) if now < session.ends_at() => Some(session),
            _ => None,
        }
    }

    /// Drop any running break without regard to time
    pub fn reset(&mut self) -> Option<BreakSession> {
        self.end()
    }

    fn end(&mut self) -> Option<BreakSession> {
        match std::mem::replace(&mut self.state, BreakState::Idle) {
            BreakState::OnBreak(session) => Some(session),
            BreakState::Idle => None,
        }
    }
}
