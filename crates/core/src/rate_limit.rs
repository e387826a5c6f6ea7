//! Fixed-window request counters keyed by `prefix:identifier`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::errors::GovernanceError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub key_prefix: String,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64, key_prefix: impl Into<String>) -> Self {
        Self { max_requests, window_secs, key_prefix: key_prefix.into() }
    }

    pub fn query_execution() -> Self {
        Self::new(10, 60, "query")
    }

    pub fn config_generation() -> Self {
        Self::new(5, 60, "config")
    }

    pub fn pipeline_deploy() -> Self {
        Self::new(3, 60, "pipeline")
    }

    pub fn approval_request() -> Self {
        Self::new(20, 60, "approval")
    }

    pub fn pii_access() -> Self {
        Self::new(5, 60, "pii")
    }

    /// Windows too long for `chrono` saturate at its maximum duration.
    fn window(&self) -> chrono::Duration {
        i64::try_from(self.window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    fn reset_after(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start.checked_add_signed(self.window()).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

const MAX_SWEEP_PERIOD_SECS: u64 = 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RateLimitDecision {
    pub fn into_result(self) -> Result<Self, GovernanceError> {
        if self.allowed {
            return Ok(self);
        }
        Err(GovernanceError::RateLimited {
            reason: self.reason.unwrap_or_else(|| "Rate limit exceeded".to_string()),
            reset_time: self.reset_time,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u32,
    reset_time: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, windows: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn key(&self, identifier: &str) -> String {
        format!("{}:{identifier}", self.config.key_prefix)
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        match self.windows.lock() {
            Ok(windows) => windows,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Utc::now())
    }

    /// Test-and-increment for one request observed at `now`.
    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let key = self.key(identifier);
        let max = self.config.max_requests;
        let mut windows = self.windows();

        let window = windows
            .entry(key)
            .and_modify(|window| {
                if now >= window.reset_time {
                    *window = Window { count: 0, reset_time: self.config.reset_after(now) };
                }
            })
            .or_insert_with(|| Window { count: 0, reset_time: self.config.reset_after(now) });

        if window.count >= max {
            let reason = format!(
                "Rate limit exceeded. Max {max} requests per {}s",
                self.config.window_secs
            );
            tracing::info!(
                event_name = "rate_limit.denied",
                prefix = %self.config.key_prefix,
                identifier,
                "rate limit exceeded"
            );
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_time: window.reset_time,
                reason: Some(reason),
            };
        }

        window.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: max - window.count,
            reset_time: window.reset_time,
            reason: None,
        }
    }

    pub fn reset_limit(&self, identifier: &str) {
        self.windows().remove(&self.key(identifier));
    }

    pub fn remaining_quota(&self, identifier: &str) -> u32 {
        self.remaining_quota_at(identifier, Utc::now())
    }

    pub fn remaining_quota_at(&self, identifier: &str, now: DateTime<Utc>) -> u32 {
        match self.windows().get(&self.key(identifier)) {
            Some(window) if now < window.reset_time => {
                self.config.max_requests.saturating_sub(window.count)
            }
            _ => self.config.max_requests,
        }
    }

    /// Drops windows that expired at least one full window ago. Returns the
    /// number of evicted keys.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, entry| now < self.config.reset_after(entry.reset_time));
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows().len()
    }

    /// Runs `sweep_expired` once per window, at least daily, on the current
    /// tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period =
            Duration::from_secs(limiter.config.window_secs.clamp(1, MAX_SWEEP_PERIOD_SECS));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = limiter.sweep_expired(Utc::now());
                if evicted > 0 {
                    tracing::debug!(
                        event_name = "rate_limit.swept",
                        prefix = %limiter.config.key_prefix,
                        evicted,
                        "expired rate limit windows evicted"
                    );
                }
            }
        })
    }
}

/// One limiter per operation class.
#[derive(Clone, Debug)]
pub struct RateLimiters {
    pub query: Arc<RateLimiter>,
    pub config: Arc<RateLimiter>,
    pub pipeline: Arc<RateLimiter>,
    pub approval: Arc<RateLimiter>,
    pub pii: Arc<RateLimiter>,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(
            RateLimitConfig::query_execution(),
            RateLimitConfig::config_generation(),
            RateLimitConfig::pipeline_deploy(),
            RateLimitConfig::approval_request(),
            RateLimitConfig::pii_access(),
        )
    }
}

impl RateLimiters {
    pub fn new(
        query: RateLimitConfig,
        config: RateLimitConfig,
        pipeline: RateLimitConfig,
        approval: RateLimitConfig,
        pii: RateLimitConfig,
    ) -> Self {
        Self {
            query: Arc::new(RateLimiter::new(query)),
            config: Arc::new(RateLimiter::new(config)),
            pipeline: Arc::new(RateLimiter::new(pipeline)),
            approval: Arc::new(RateLimiter::new(approval)),
            pii: Arc::new(RateLimiter::new(pii)),
        }
    }

    pub fn all(&self) -> [&Arc<RateLimiter>; 5] {
        [&self.query, &self.config, &self.pipeline, &self.approval, &self.pii]
    }

    pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
        self.all().into_iter().map(RateLimiter::spawn_sweeper).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{RateLimitConfig, RateLimiter, RateLimiters};
    use crate::errors::GovernanceError;

    #[test]
    fn denies_after_max_and_reports_reason() {
        let limiter = RateLimiter::new(RateLimitConfig::pipeline_deploy());
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("valid timestamp");

        let remaining: Vec<u32> =
            (0..3).map(|_| limiter.check_at("u-1", now).remaining).collect();
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_at("u-1", now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reason.as_deref(), Some("Rate limit exceeded. Max 3 requests per 60s"));
        assert_eq!(denied.reset_time, now + Duration::seconds(60));
        assert!(matches!(
            denied.into_result(),
            Err(GovernanceError::RateLimited { ref reason, .. }) if reason.contains("Max 3")
        ));
    }

    #[test]
    fn window_resets_at_reset_time_and_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 10, "t"));
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("valid timestamp");

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now + Duration::seconds(9)).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(limiter.check_at("a", now + Duration::seconds(10)).allowed);
    }

    #[test]
    fn reset_and_remaining_quota() {
        let limiter = RateLimiter::new(RateLimitConfig::query_execution());
        limiter.check("analyst-1");
        limiter.check("analyst-1");
        assert_eq!(limiter.remaining_quota("analyst-1"), 8);
        assert_eq!(limiter.remaining_quota("someone-else"), 10);

        limiter.reset_limit("analyst-1");
        assert_eq!(limiter.remaining_quota("analyst-1"), 10);
    }

    #[test]
    fn sweep_evicts_windows_one_window_past_reset() {
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 60, "t"));
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("valid timestamp");
        limiter.check_at("old", now);
        limiter.check_at("new", now + Duration::seconds(90));

        assert_eq!(limiter.sweep_expired(now + Duration::seconds(119)), 0);
        assert_eq!(limiter.sweep_expired(now + Duration::seconds(120)), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn oversized_window_saturates_instead_of_overflowing() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, u64::MAX, "forever"));
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().expect("valid timestamp");

        let first = limiter.check_at("u-1", now);
        assert!(first.allowed);
        assert_eq!(first.reset_time, DateTime::<Utc>::MAX_UTC);

        let second = limiter.check_at("u-1", now + Duration::days(365));
        assert!(!second.allowed);
        assert_eq!(limiter.remaining_quota_at("u-1", now), 0);
        assert_eq!(limiter.sweep_expired(now + Duration::days(365)), 0);
    }

    #[test]
    fn concurrent_burst_admits_exactly_max() {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(10, 60, "burst")));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    (0..4).filter(|_| limiter.check("shared").allowed).count()
                })
            })
            .collect();

        let admitted: usize =
            handles.into_iter().map(|handle| handle.join().expect("thread panicked")).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn presets_use_distinct_prefixes() {
        let limiters = RateLimiters::default();
        let prefixes: Vec<&str> =
            limiters.all().iter().map(|limiter| limiter.config().key_prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["query", "config", "pipeline", "approval", "pii"]);
        assert_eq!(limiters.approval.config().max_requests, 20);
    }
}
