//! Rate-limited refresh coordination.
//!
//! A [`Coordinator`] owns one upstream source and decides, on every request,
//! whether the cooldown permits an upstream call. The cooldown timestamp and
//! the last good payload live in the SQLite store so every instance sharing the
//! database agrees on them; an in-memory copy covers store failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::cooldown::{CooldownState, RefreshStatus};
use crate::db::Database;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream rate limit exceeded")]
    RateLimited { reset_at: Option<i64> },

    #[error("upstream not configured: {0}")]
    Unconfigured(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to parse upstream response: {0}")]
    Parse(String),
}

/// A remote source of items whose calls are gated by a cooldown.
pub trait Upstream: Send + Sync + 'static {
    type Item: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn fetch(&self) -> impl Future<Output = Result<Vec<Self::Item>, UpstreamError>> + Send;
}

/// Last successfully fetched items.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload<T> {
    pub items: Vec<T>,
    pub fetched_at: Option<i64>,
}

impl<T> Default for CachedPayload<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            fetched_at: None,
        }
    }
}

/// Response of [`Coordinator::request_refresh`].
///
/// `seconds_remaining` and `allowed` describe the cooldown after the call, so
/// clients can seed their countdown straight from it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome<T> {
    pub items: Vec<T>,
    pub seconds_remaining: i64,
    pub allowed: bool,
    pub last_refresh: Option<i64>,
    pub fetched_at: Option<i64>,
    /// Upstream was called and returned fresh items
    pub refreshed: bool,
    pub rate_limited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Snapshot<T> {
    cooldown: CooldownState,
    payload: CachedPayload<T>,
}

pub struct Coordinator<U: Upstream> {
    source: String,
    upstream: U,
    db: Arc<Database>,
    last_known: RwLock<Snapshot<U::Item>>,
    flight: Mutex<()>,
}

impl<U: Upstream> Coordinator<U> {
    pub fn new(source: impl Into<String>, upstream: U, db: Arc<Database>, cooldown_seconds: i64) -> Self {
        Self {
            source: source.into(),
            upstream,
            db,
            last_known: RwLock::new(Snapshot {
                cooldown: CooldownState::new(cooldown_seconds),
                payload: CachedPayload::default(),
            }),
            flight: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub async fn status(&self) -> RefreshStatus {
        self.status_at(Utc::now().timestamp()).await
    }

    pub async fn status_at(&self, now: i64) -> RefreshStatus {
        self.load_cooldown().await.status(now)
    }

    pub async fn request_refresh(&self, force: bool) -> RefreshOutcome<U::Item> {
        self.request_refresh_at(Utc::now().timestamp(), force).await
    }

    pub async fn request_refresh_at(&self, now: i64, force: bool) -> RefreshOutcome<U::Item> {
        let seen = self.load_cooldown().await;
        if !seen.check(now, force).allowed {
            debug!("Cooldown active for '{}', serving cache", self.source);
            return self.serve_cached(seen, now, None, false).await;
        }

        let _flight = self.flight.lock().await;

        // another caller finished a refresh while we waited for the lock
        let cooldown = self.load_cooldown().await;
        if cooldown.last_refresh != seen.last_refresh {
            debug!("Refresh of '{}' completed by a concurrent request", self.source);
            return self.serve_cached(cooldown, now, None, false).await;
        }

        info!("Refreshing '{}' from upstream (force: {})", self.source, force);
        match self.upstream.fetch().await {
            Ok(items) => {
                info!("Fetched {} items for '{}'", items.len(), self.source);
                let payload = CachedPayload {
                    items,
                    fetched_at: Some(now),
                };
                let cooldown = self.store_refresh(now, Some(&payload)).await;
                self.outcome(cooldown, payload, now, true, false, None)
            }
            Err(UpstreamError::RateLimited { reset_at }) => {
                warn!(
                    "Upstream for '{}' is rate limited (reset at {:?}), restarting cooldown",
                    self.source, reset_at
                );
                // counts as a refresh: the cooldown restarts and `rate_limited` carries the signal
                let cooldown = self.store_refresh(now, None).await;
                self.serve_cached(cooldown, now, None, true).await
            }
            Err(e) => {
                error!("Failed to refresh '{}': {}", self.source, e);
                self.serve_cached(cooldown, now, Some(e.to_string()), false).await
            }
        }
    }

    /// Read the cooldown from the store, falling back to the in-memory copy.
    async fn load_cooldown(&self) -> CooldownState {
        match self.db.get_last_refresh(&self.source).await {
            Ok(stored) => {
                let mut snapshot = self.last_known.write().await;
                if let Some(at) = stored {
                    snapshot.cooldown.record(at);
                }
                snapshot.cooldown
            }
            Err(e) => {
                warn!("Cooldown store unavailable for '{}': {}", self.source, e);
                self.last_known.read().await.cooldown
            }
        }
    }

    async fn load_payload(&self) -> CachedPayload<U::Item> {
        let stored = match self.db.get_payload(&self.source).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Payload store unavailable for '{}': {}", self.source, e);
                None
            }
        };

        let mut snapshot = self.last_known.write().await;
        if let Some(stored) = stored {
            let newer = snapshot
                .payload
                .fetched_at
                .map_or(true, |known| stored.fetched_at >= known);
            if newer {
                match serde_json::from_str::<Vec<U::Item>>(&stored.items) {
                    Ok(items) => {
                        snapshot.payload = CachedPayload {
                            items,
                            fetched_at: Some(stored.fetched_at),
                        };
                    }
                    Err(e) => warn!("Discarding unreadable cache for '{}': {}", self.source, e),
                }
            }
        }
        snapshot.payload.clone()
    }

    async fn store_refresh(
        &self,
        now: i64,
        payload: Option<&CachedPayload<U::Item>>,
    ) -> CooldownState {
        let cooldown = {
            let mut snapshot = self.last_known.write().await;
            snapshot.cooldown.record(now);
            if let Some(payload) = payload {
                snapshot.payload = payload.clone();
            }
            snapshot.cooldown
        };

        if let Err(e) = self.db.record_refresh(&self.source, now).await {
            warn!("Failed to persist cooldown for '{}': {}", self.source, e);
        }

        if let Some(payload) = payload {
            match serde_json::to_string(&payload.items) {
                Ok(json) => {
                    if let Err(e) = self.db.save_payload(&self.source, &json, now).await {
                        warn!("Failed to persist payload for '{}': {}", self.source, e);
                    }
                }
                Err(e) => warn!("Failed to serialize payload for '{}': {}", self.source, e),
            }
        }

        cooldown
    }

    async fn serve_cached(
        &self,
        cooldown: CooldownState,
        now: i64,
        error: Option<String>,
        rate_limited: bool,
    ) -> RefreshOutcome<U::Item> {
        let payload = self.load_payload().await;
        self.outcome(cooldown, payload, now, false, rate_limited, error)
    }

    fn outcome(
        &self,
        cooldown: CooldownState,
        payload: CachedPayload<U::Item>,
        now: i64,
        refreshed: bool,
        rate_limited: bool,
        error: Option<String>,
    ) -> RefreshOutcome<U::Item> {
        let status = cooldown.status(now);
        RefreshOutcome {
            items: payload.items,
            seconds_remaining: status.seconds_remaining,
            allowed: status.allowed,
            last_refresh: status.last_refresh,
            fetched_at: payload.fetched_at,
            refreshed,
            rate_limited,
            error,
        }
    }
}

/// Periodically request a non-forced refresh; the cooldown still gates the call.
pub async fn start_background_refresh<U: Upstream>(coordinator: Arc<Coordinator<U>>, interval: Duration) {
    info!(
        "Starting background refresh for '{}' every {:?}",
        coordinator.source(),
        interval
    );

    loop {
        let outcome = coordinator.request_refresh(false).await;
        if let Some(e) = &outcome.error {
            error!("Background refresh of '{}' failed: {}", coordinator.source(), e);
        } else if outcome.rate_limited {
            warn!(
                "Background refresh of '{}' hit the upstream rate limit, next attempt in {}s",
                coordinator.source(),
                outcome.seconds_remaining
            );
        } else if outcome.refreshed {
            info!(
                "Background refresh of '{}' stored {} items",
                coordinator.source(),
                outcome.items.len()
            );
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000;
    const DURATION: i64 = 900;

    /// Replays canned responses; repeats the last one once the script runs out.
    struct ScriptedUpstream {
        calls: Arc<AtomicUsize>,
        script: std::sync::Mutex<VecDeque<Result<Vec<String>, UpstreamError>>>,
        delay: Duration,
    }

    impl ScriptedUpstream {
        fn new(script: Vec<Result<Vec<String>, UpstreamError>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let upstream = Self {
                calls: calls.clone(),
                script: std::sync::Mutex::new(script.into()),
                delay: Duration::ZERO,
            };
            (upstream, calls)
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    impl Upstream for ScriptedUpstream {
        type Item = String;

        async fn fetch(&self) -> Result<Vec<String>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            next.unwrap_or_else(|| Ok(vec!["default".to_string()]))
        }
    }

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    async fn create_test_db() -> Arc<Database> {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        Arc::new(db)
    }

    async fn coordinator(
        script: Vec<Result<Vec<String>, UpstreamError>>,
    ) -> (Coordinator<ScriptedUpstream>, Arc<AtomicUsize>, Arc<Database>) {
        let db = create_test_db().await;
        let (upstream, calls) = ScriptedUpstream::new(script);
        (Coordinator::new("social", upstream, db.clone(), DURATION), calls, db)
    }

    mod allowed_tests {
        use super::*;

        #[tokio::test]
        async fn test_first_request_calls_upstream() {
            let (coordinator, calls, _db) = coordinator(vec![Ok(items(&["a", "b"]))]).await;

            let outcome = coordinator.request_refresh_at(T0, false).await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(outcome.refreshed);
            assert_eq!(outcome.items, items(&["a", "b"]));
            assert_eq!(outcome.fetched_at, Some(T0));
            assert!(outcome.error.is_none());
        }

        #[tokio::test]
        async fn test_after_success_cooldown_is_full() {
            let (coordinator, _calls, _db) = coordinator(vec![Ok(items(&["a"]))]).await;

            let outcome = coordinator.request_refresh_at(T0, false).await;
            assert!(!outcome.allowed);
            assert_eq!(outcome.seconds_remaining, DURATION);
            assert_eq!(outcome.last_refresh, Some(T0));

            let status = coordinator.status_at(T0).await;
            assert!(!status.allowed);
            assert_eq!(status.seconds_remaining, DURATION);
        }

        #[tokio::test]
        async fn test_success_is_persisted() {
            let (coordinator, _calls, db) = coordinator(vec![Ok(items(&["a"]))]).await;

            coordinator.request_refresh_at(T0, false).await;

            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(T0));
            let payload = db.get_payload("social").await.unwrap().unwrap();
            assert_eq!(payload.items, r#"["a"]"#);
            assert_eq!(payload.fetched_at, T0);
        }

        #[tokio::test]
        async fn test_refresh_allowed_again_after_duration() {
            let (coordinator, calls, _db) =
                coordinator(vec![Ok(items(&["a"])), Ok(items(&["b"]))]).await;

            coordinator.request_refresh_at(T0, false).await;
            let outcome = coordinator.request_refresh_at(T0 + DURATION, false).await;

            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(outcome.refreshed);
            assert_eq!(outcome.items, items(&["b"]));
            assert_eq!(outcome.last_refresh, Some(T0 + DURATION));
        }
    }

    mod cooldown_active_tests {
        use super::*;

        #[tokio::test]
        async fn test_serves_cache_without_upstream_call() {
            let (coordinator, calls, _db) = coordinator(vec![Ok(items(&["a"]))]).await;

            coordinator.request_refresh_at(T0, false).await;
            let outcome = coordinator.request_refresh_at(T0 + 899, false).await;

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(!outcome.refreshed);
            assert!(!outcome.allowed);
            assert_eq!(outcome.seconds_remaining, 1);
            assert_eq!(outcome.items, items(&["a"]));
            assert_eq!(outcome.fetched_at, Some(T0));
        }

        #[tokio::test]
        async fn test_status_boundary() {
            let (coordinator, _calls, db) = coordinator(vec![]).await;
            db.record_refresh("social", T0).await.unwrap();

            let before = coordinator.status_at(T0 + 899).await;
            assert!(!before.allowed);
            assert_eq!(before.seconds_remaining, 1);

            let at = coordinator.status_at(T0 + 900).await;
            assert!(at.allowed);
            assert_eq!(at.seconds_remaining, 0);
        }

        #[tokio::test]
        async fn test_status_does_not_call_upstream() {
            let (coordinator, calls, _db) = coordinator(vec![]).await;

            let status = coordinator.status_at(T0).await;

            assert!(status.allowed);
            assert!(status.last_refresh.is_none());
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }
    }

    mod force_tests {
        use super::*;

        #[tokio::test]
        async fn test_force_bypasses_cooldown() {
            let (coordinator, calls, _db) =
                coordinator(vec![Ok(items(&["a"])), Ok(items(&["b"]))]).await;

            coordinator.request_refresh_at(T0, false).await;
            let outcome = coordinator.request_refresh_at(T0 + 10, true).await;

            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(outcome.refreshed);
            assert_eq!(outcome.items, items(&["b"]));
        }

        #[tokio::test]
        async fn test_force_resets_timer_identically() {
            let (coordinator, _calls, _db) =
                coordinator(vec![Ok(items(&["a"])), Ok(items(&["b"]))]).await;

            coordinator.request_refresh_at(T0, false).await;
            let outcome = coordinator.request_refresh_at(T0 + 10, true).await;

            assert!(!outcome.allowed);
            assert_eq!(outcome.seconds_remaining, DURATION);
            assert_eq!(outcome.last_refresh, Some(T0 + 10));
        }
    }

    mod failure_tests {
        use super::*;

        #[tokio::test]
        async fn test_rate_limit_restarts_cooldown_and_serves_cache() {
            let (coordinator, calls, db) = coordinator(vec![
                Ok(items(&["cached"])),
                Err(UpstreamError::RateLimited { reset_at: None }),
            ])
            .await;

            coordinator.request_refresh_at(T0, false).await;
            let call_time = T0 + DURATION + 30;
            let outcome = coordinator.request_refresh_at(call_time, false).await;

            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(outcome.rate_limited);
            assert!(outcome.error.is_none());
            assert!(!outcome.refreshed);
            assert_eq!(outcome.items, items(&["cached"]));
            assert_eq!(outcome.fetched_at, Some(T0));
            assert_eq!(outcome.last_refresh, Some(call_time));
            assert_eq!(outcome.seconds_remaining, DURATION);
            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(call_time));
        }

        #[tokio::test]
        async fn test_rate_limit_keeps_previous_payload_in_store() {
            let (coordinator, _calls, db) = coordinator(vec![
                Ok(items(&["cached"])),
                Err(UpstreamError::RateLimited { reset_at: Some(T0 + 5_000) }),
            ])
            .await;

            coordinator.request_refresh_at(T0, false).await;
            coordinator.request_refresh_at(T0 + 10, true).await;

            let payload = db.get_payload("social").await.unwrap().unwrap();
            assert_eq!(payload.items, r#"["cached"]"#);
            assert_eq!(payload.fetched_at, T0);
        }

        #[tokio::test]
        async fn test_rate_limit_on_first_call_returns_empty_items() {
            let (coordinator, _calls, _db) =
                coordinator(vec![Err(UpstreamError::RateLimited { reset_at: None })]).await;

            let outcome = coordinator.request_refresh_at(T0, false).await;

            assert!(outcome.items.is_empty());
            assert!(outcome.rate_limited);
            assert_eq!(outcome.seconds_remaining, DURATION);
        }

        #[tokio::test]
        async fn test_unavailable_upstream_flags_error_without_restarting() {
            let (coordinator, calls, _db) =
                coordinator(vec![Err(UpstreamError::Status(503)), Ok(items(&["a"]))]).await;

            let outcome = coordinator.request_refresh_at(T0, false).await;
            assert_eq!(outcome.error.as_deref(), Some("upstream returned HTTP 503"));
            assert!(!outcome.rate_limited);
            assert!(outcome.allowed);
            assert_eq!(outcome.seconds_remaining, 0);
            assert!(outcome.last_refresh.is_none());

            // a retry right away is still permitted
            let retry = coordinator.request_refresh_at(T0 + 1, false).await;
            assert_eq!(calls.load(Ordering::SeqCst), 2);
            assert!(retry.refreshed);
        }

        #[tokio::test]
        async fn test_unconfigured_upstream_serves_stale_items() {
            let (coordinator, _calls, _db) = coordinator(vec![
                Ok(items(&["stale"])),
                Err(UpstreamError::Unconfigured("missing token".to_string())),
            ])
            .await;

            coordinator.request_refresh_at(T0, false).await;
            let outcome = coordinator.request_refresh_at(T0 + DURATION, false).await;

            assert_eq!(outcome.items, items(&["stale"]));
            assert!(outcome.error.unwrap().contains("missing token"));
            assert!(outcome.allowed);
        }
    }

    mod concurrency_tests {
        use super::*;

        #[tokio::test]
        async fn test_concurrent_refreshes_share_one_upstream_call() {
            let db = create_test_db().await;
            let (upstream, calls) = ScriptedUpstream::new(vec![Ok(items(&["a"]))]);
            let upstream = upstream.with_delay(Duration::from_millis(50));
            let coordinator = Coordinator::new("social", upstream, db, DURATION);

            let (first, second) = tokio::join!(
                coordinator.request_refresh_at(T0, false),
                coordinator.request_refresh_at(T0, false)
            );

            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(first.items, items(&["a"]));
            assert_eq!(second.items, items(&["a"]));
            assert!(first.refreshed ^ second.refreshed);
        }
    }

    mod persistence_tests {
        use super::*;

        #[tokio::test]
        async fn test_new_instance_sees_stored_cooldown() {
            let db = create_test_db().await;

            let (upstream, _) = ScriptedUpstream::new(vec![Ok(items(&["a"]))]);
            let first = Coordinator::new("social", upstream, db.clone(), DURATION);
            first.request_refresh_at(T0, false).await;

            let (upstream, calls) = ScriptedUpstream::new(vec![Ok(items(&["b"]))]);
            let second = Coordinator::new("social", upstream, db, DURATION);
            let outcome = second.request_refresh_at(T0 + 60, false).await;

            assert_eq!(calls.load(Ordering::SeqCst), 0);
            assert_eq!(outcome.items, items(&["a"]));
            assert_eq!(outcome.seconds_remaining, DURATION - 60);
        }

        #[tokio::test]
        async fn test_store_failure_falls_back_to_memory() {
            // tables never created: every store call fails
            let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
            let (upstream, calls) = ScriptedUpstream::new(vec![Ok(items(&["a"]))]);
            let coordinator = Coordinator::new("social", upstream, db, DURATION);

            let first = coordinator.request_refresh_at(T0, false).await;
            assert!(first.refreshed);

            let second = coordinator.request_refresh_at(T0 + 1, false).await;
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(second.items, items(&["a"]));
            assert_eq!(second.seconds_remaining, DURATION - 1);
        }
    }
}
