//! Cooldown arithmetic shared by the server coordinator and the client mirror.

use serde::{Deserialize, Serialize};

/// Minimum interval between calls to the quota-limited social API.
pub const DEFAULT_COOLDOWN_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownState {
    /// Epoch seconds of the last refresh that counted against the cooldown
    pub last_refresh: Option<i64>,
    pub duration: i64,
}

/// Outcome of checking the cooldown at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub remaining: i64,
    pub allowed: bool,
}

/// Metadata-only view served by the status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub seconds_remaining: i64,
    pub allowed: bool,
    pub last_refresh: Option<i64>,
}

impl CooldownState {
    /// A fresh state with no refresh on record, so the first fetch is allowed.
    pub fn new(duration: i64) -> Self {
        Self {
            last_refresh: None,
            duration,
        }
    }

    #[cfg(test)]
    fn with_last_refresh(duration: i64, last_refresh: Option<i64>) -> Self {
        Self {
            last_refresh,
            duration,
        }
    }

    pub fn remaining(&self, now: i64) -> i64 {
        match self.last_refresh {
            None => 0,
            Some(last) => self.duration.saturating_sub(now.saturating_sub(last)).max(0),
        }
    }

    pub fn check(&self, now: i64, force: bool) -> Decision {
        let remaining = self.remaining(now);
        Decision {
            remaining,
            allowed: remaining == 0 || force,
        }
    }

    /// Restart the cooldown at `now`. Never moves the timestamp backwards.
    pub fn record(&mut self, now: i64) {
        self.last_refresh = Some(self.last_refresh.map_or(now, |last| last.max(now)));
    }

    pub fn status(&self, now: i64) -> RefreshStatus {
        let decision = self.check(now, false);
        RefreshStatus {
            seconds_remaining: decision.remaining,
            allowed: decision.allowed,
            last_refresh: self.last_refresh,
        }
    }
}
