//! Client-side countdown that mirrors the server's cooldown between polls.

use std::time::{Duration, Instant};

use crate::cooldown::RefreshStatus;

pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TimerMirror {
    seeded_remaining: i64,
    synced_at: Instant,
    last_attempt: Instant,
    resync_every: Duration,
}

impl TimerMirror {
    pub fn new(status: &RefreshStatus, at: Instant) -> Self {
        Self::with_resync_interval(status, at, DEFAULT_RESYNC_INTERVAL)
    }

    pub fn with_resync_interval(status: &RefreshStatus, at: Instant, resync_every: Duration) -> Self {
        Self {
            seeded_remaining: status.seconds_remaining.max(0),
            synced_at: at,
            last_attempt: at,
            resync_every,
        }
    }

    /// Estimate derived from elapsed wall time, so missed ticks do not drift.
    pub fn seconds_remaining(&self, at: Instant) -> i64 {
        let elapsed = at.saturating_duration_since(self.synced_at).as_secs() as i64;
        (self.seeded_remaining - elapsed).max(0)
    }

    pub fn can_refresh(&self, at: Instant) -> bool {
        self.seconds_remaining(at) == 0
    }

    /// Due once per resync interval since the last attempt, and once when the
    /// counter crosses zero.
    pub fn needs_resync(&self, at: Instant) -> bool {
        if at.saturating_duration_since(self.last_attempt) >= self.resync_every {
            return true;
        }
        if self.seeded_remaining == 0 {
            return false;
        }
        match self.synced_at.checked_add(Duration::from_secs(self.seeded_remaining as u64)) {
            Some(crossed_at) => at >= crossed_at && self.last_attempt < crossed_at,
            None => false,
        }
    }

    /// Record a failed status poll; the next one waits a full interval.
    pub fn mark_attempt(&mut self, at: Instant) {
        self.last_attempt = at;
    }

    /// Reseed from the server and return the drift (local estimate minus server value).
    pub fn resync(&mut self, status: &RefreshStatus, at: Instant) -> i64 {
        let drift = self.seconds_remaining(at) - status.seconds_remaining.max(0);
        self.seeded_remaining = status.seconds_remaining.max(0);
        self.synced_at = at;
        self.last_attempt = at;
        drift
    }

    pub fn display(&self, at: Instant) -> String {
        format_countdown(self.seconds_remaining(at))
    }
}

/// `m:ss`, e.g. `14:05`.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}
