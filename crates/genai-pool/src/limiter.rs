//! Per-key throughput limiting
//!
//! Tracks request timestamps per key across two tumbling windows (minute,
//! hour) anchored at the first request seen, plus a minimum spacing between
//! consecutive requests. Checks run in strict order — hourly cap first (the
//! hard backstop against provider-side quota burn), then minimum interval,
//! then the per-minute cap — so a coarse limit is never masked by a finer
//! one. Counters reset to zero when a window rolls; they are never
//! decremented.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::StatusFn;
use crate::error::{Error, Result, format_wait};
use crate::key::ApiKey;

/// Limiter configuration. Defaults match the provider's free-tier ceilings
/// with headroom.
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Minimum spacing between two requests on the same key.
    pub min_interval: Duration,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
    pub minute_window: Duration,
    pub hour_window: Duration,
    /// Safety valve: `wait_for_slot` gives up after this many denied checks.
    pub max_wait_iterations: u32,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(5000),
            max_per_minute: 6,
            max_per_hour: 200,
            minute_window: Duration::from_secs(60),
            hour_window: Duration::from_secs(3600),
            max_wait_iterations: 100,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { wait: Duration, reason: DenyReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    HourlyCap,
    MinInterval,
    PerMinuteCap,
}

impl DenyReason {
    pub fn label(&self) -> &'static str {
        match self {
            DenyReason::HourlyCap => "hourly cap",
            DenyReason::MinInterval => "min interval",
            DenyReason::PerMinuteCap => "per-minute cap",
        }
    }
}

/// Per-key usage bookkeeping. Windows are anchored at the first request for
/// the key, not calendar-aligned.
#[derive(Debug)]
struct UsageRecord {
    last_request: Option<Instant>,
    minute_start: Instant,
    minute_count: u32,
    hour_start: Instant,
    hour_count: u32,
}

impl UsageRecord {
    fn new(now: Instant) -> Self {
        Self {
            last_request: None,
            minute_start: now,
            minute_count: 0,
            hour_start: now,
            hour_count: 0,
        }
    }
}

/// Read-only usage snapshot for diagnostics and pre-flight heuristics.
#[derive(Debug, Clone, Copy)]
pub struct UsageStats {
    pub minute_count: u32,
    pub hour_count: u32,
    pub max_per_minute: u32,
    pub max_per_hour: u32,
}

impl UsageStats {
    /// Fraction of the hourly budget already spent (0.0 – 1.0).
    pub fn hour_used_ratio(&self) -> f64 {
        if self.max_per_hour == 0 {
            return 1.0;
        }
        f64::from(self.hour_count) / f64::from(self.max_per_hour)
    }
}

/// Throughput limiter shared by all callers of the pool.
pub struct ThroughputLimiter {
    config: LimiterConfig,
    records: Mutex<HashMap<ApiKey, UsageRecord>>,
}

impl ThroughputLimiter {
    pub fn new(config: LimiterConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request on `key` may proceed now, recording it if so.
    ///
    /// Evaluation order: hour roll → hourly cap → minute roll → minimum
    /// interval → per-minute cap → record.
    pub async fn check_and_record(&self, key: &ApiKey) -> Admission {
        let mut records = self.records.lock().await;
        let now = Instant::now();
        let rec = records
            .entry(key.clone())
            .or_insert_with(|| UsageRecord::new(now));

        let hour_elapsed = now.duration_since(rec.hour_start);
        if hour_elapsed >= self.config.hour_window {
            rec.hour_start = now;
            rec.hour_count = 0;
        }
        if rec.hour_count >= self.config.max_per_hour {
            let wait = self.config.hour_window - now.duration_since(rec.hour_start);
            return Admission::Denied {
                wait,
                reason: DenyReason::HourlyCap,
            };
        }

        let minute_elapsed = now.duration_since(rec.minute_start);
        if minute_elapsed >= self.config.minute_window {
            rec.minute_start = now;
            rec.minute_count = 0;
        }

        if let Some(last) = rec.last_request {
            let since_last = now.duration_since(last);
            if since_last < self.config.min_interval {
                return Admission::Denied {
                    wait: self.config.min_interval - since_last,
                    reason: DenyReason::MinInterval,
                };
            }
        }

        if rec.minute_count >= self.config.max_per_minute {
            let wait = self.config.minute_window - now.duration_since(rec.minute_start);
            return Admission::Denied {
                wait,
                reason: DenyReason::PerMinuteCap,
            };
        }

        rec.last_request = Some(now);
        rec.minute_count += 1;
        rec.hour_count += 1;
        Admission::Allowed
    }

    /// Block until a slot opens for `key`.
    ///
    /// Loops check/sleep, reporting each wait through the status callback.
    /// The iteration cap is a guard against clock skew or a misconfigured
    /// window, not an expected path — exceeding it is `RateLimitTimeout`.
    pub async fn wait_for_slot(&self, key: &ApiKey, on_status: Option<&StatusFn>) -> Result<()> {
        for _ in 0..self.config.max_wait_iterations {
            match self.check_and_record(key).await {
                Admission::Allowed => return Ok(()),
                Admission::Denied { wait, reason } => {
                    if let Some(cb) = on_status {
                        cb(&format!(
                            "key {key} throttled ({}), waiting {}",
                            reason.label(),
                            format_wait(&wait)
                        ));
                    }
                    debug!(key = %key, reason = reason.label(), wait_ms = wait.as_millis() as u64, "throttled, waiting for slot");
                    sleep(wait).await;
                }
            }
        }
        Err(Error::RateLimitTimeout { key: key.masked() })
    }

    /// Usage snapshot with expired windows zeroed. Does not mutate the
    /// record — diagnostics may race with writers and see slightly stale
    /// counts, which is fine.
    pub async fn stats(&self, key: &ApiKey) -> UsageStats {
        let records = self.records.lock().await;
        let now = Instant::now();
        let (minute_count, hour_count) = match records.get(key) {
            Some(rec) => {
                let minute = if now.duration_since(rec.minute_start) >= self.config.minute_window {
                    0
                } else {
                    rec.minute_count
                };
                let hour = if now.duration_since(rec.hour_start) >= self.config.hour_window {
                    0
                } else {
                    rec.hour_count
                };
                (minute, hour)
            }
            None => (0, 0),
        };
        UsageStats {
            minute_count,
            hour_count,
            max_per_minute: self.config.max_per_minute,
            max_per_hour: self.config.max_per_hour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> ApiKey {
        ApiKey::parse("AIzaTestKey00000000000000000000000000000").unwrap()
    }

    /// Config with interval spacing disabled, for cap-focused tests.
    fn no_interval(max_per_minute: u32, max_per_hour: u32) -> LimiterConfig {
        LimiterConfig {
            min_interval: Duration::ZERO,
            max_per_minute,
            max_per_hour,
            ..LimiterConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn six_allowed_seventh_denied() {
        let limiter = ThroughputLimiter::new(no_interval(6, 200));
        let key = test_key();
        for i in 0..6 {
            assert_eq!(
                limiter.check_and_record(&key).await,
                Admission::Allowed,
                "call {i} should be allowed"
            );
        }
        match limiter.check_and_record(&key).await {
            Admission::Denied { wait, reason } => {
                assert_eq!(reason, DenyReason::PerMinuteCap);
                assert!(wait > Duration::ZERO);
            }
            Admission::Allowed => panic!("seventh call must be denied"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_denies_with_remaining_wait() {
        let limiter = ThroughputLimiter::new(LimiterConfig::default());
        let key = test_key();
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);

        tokio::time::advance(Duration::from_millis(1000)).await;
        match limiter.check_and_record(&key).await {
            Admission::Denied { wait, reason } => {
                assert_eq!(reason, DenyReason::MinInterval);
                assert_eq!(wait, Duration::from_millis(4000));
            }
            Admission::Allowed => panic!("second call within min interval must be denied"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hourly_cap_checked_before_minute_state() {
        let limiter = ThroughputLimiter::new(no_interval(10, 2));
        let key = test_key();
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        match limiter.check_and_record(&key).await {
            Admission::Denied { reason, .. } => assert_eq!(reason, DenyReason::HourlyCap),
            Admission::Allowed => panic!("hourly cap must deny"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn minute_window_roll_resets_count() {
        let limiter = ThroughputLimiter::new(no_interval(2, 200));
        let key = test_key();
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        assert!(matches!(
            limiter.check_and_record(&key).await,
            Admission::Denied { .. }
        ));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn hour_window_roll_resets_count() {
        let limiter = ThroughputLimiter::new(no_interval(100, 2));
        let key = test_key();
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
        assert!(matches!(
            limiter.check_and_record(&key).await,
            Admission::Denied { .. }
        ));

        tokio::time::advance(Duration::from_secs(3601)).await;
        assert_eq!(limiter.check_and_record(&key).await, Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_limited_independently() {
        let limiter = ThroughputLimiter::new(no_interval(1, 200));
        let a = test_key();
        let b = ApiKey::parse("AIzaOtherKey0000000000000000000000000000").unwrap();
        assert_eq!(limiter.check_and_record(&a).await, Admission::Allowed);
        assert_eq!(limiter.check_and_record(&b).await, Admission::Allowed);
        assert!(matches!(
            limiter.check_and_record(&a).await,
            Admission::Denied { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_slot_sleeps_until_interval_passes() {
        let limiter = ThroughputLimiter::new(LimiterConfig::default());
        let key = test_key();
        limiter.wait_for_slot(&key, None).await.unwrap();

        let before = Instant::now();
        limiter.wait_for_slot(&key, None).await.unwrap();
        let waited = Instant::now().duration_since(before);
        assert_eq!(waited, Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_slot_reports_status() {
        use std::sync::{Arc, Mutex as StdMutex};

        let limiter = ThroughputLimiter::new(LimiterConfig::default());
        let key = test_key();
        limiter.wait_for_slot(&key, None).await.unwrap();

        let messages: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = messages.clone();
        let cb = move |msg: &str| sink.lock().unwrap().push(msg.to_string());
        limiter.wait_for_slot(&key, Some(&cb)).await.unwrap();

        let messages = messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("min interval"), "got: {}", messages[0]);
        // Status text must carry the masked key, never the raw value.
        assert!(messages[0].contains("..."));
        assert!(!messages[0].contains("AIzaTestKey00000000000000"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_loop_cap_is_a_rate_limit_timeout() {
        // An hourly cap of zero can never admit a request; the loop must
        // give up instead of spinning forever.
        let config = LimiterConfig {
            max_wait_iterations: 3,
            ..no_interval(10, 0)
        };
        let limiter = ThroughputLimiter::new(config);
        let err = limiter.wait_for_slot(&test_key(), None).await.unwrap_err();
        assert!(matches!(err, Error::RateLimitTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_snapshot_does_not_mutate() {
        let limiter = ThroughputLimiter::new(no_interval(6, 200));
        let key = test_key();
        limiter.check_and_record(&key).await;
        limiter.check_and_record(&key).await;

        let stats = limiter.stats(&key).await;
        assert_eq!(stats.minute_count, 2);
        assert_eq!(stats.hour_count, 2);

        // Reading stats repeatedly must not change anything.
        let again = limiter.stats(&key).await;
        assert_eq!(again.minute_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_zeroes_expired_windows() {
        let limiter = ThroughputLimiter::new(no_interval(6, 200));
        let key = test_key();
        limiter.check_and_record(&key).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        let stats = limiter.stats(&key).await;
        assert_eq!(stats.minute_count, 0);
        assert_eq!(stats.hour_count, 1);
    }

    #[test]
    fn hour_used_ratio() {
        let stats = UsageStats {
            minute_count: 0,
            hour_count: 150,
            max_per_minute: 6,
            max_per_hour: 200,
        };
        assert!((stats.hour_used_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_for_unseen_key_is_zero() {
        let limiter = ThroughputLimiter::new(LimiterConfig::default());
        let stats = limiter.stats(&test_key()).await;
        assert_eq!(stats.minute_count, 0);
        assert_eq!(stats.hour_count, 0);
    }
}
