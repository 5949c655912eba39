//! Retry orchestration across the key pool
//!
//! `run` wraps one caller-supplied provider operation: it selects a key,
//! admits the call through the serializer and limiter, invokes the
//! operation, and on failure updates pool state and decides between
//! retrying the same key, rotating to another, waiting out a provider
//! hint, or failing. The orchestrator itself keeps no state beyond the
//! attempt loop's locals — every durable effect goes through the pool or
//! the limiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use genai_client::CallError;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::classify::{FailureClass, classify};
use crate::error::{Error, Result, format_wait};
use crate::key::ApiKey;
use crate::limiter::ThroughputLimiter;
use crate::pool::CredentialPool;
use crate::serializer::CallSerializer;

/// Retry and throttling policy. Every knob is configuration, including the
/// threshold that separates short-term throttling from quota exhaustion on
/// a 429 hint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Top-level attempt budget per `run` call.
    pub max_attempts: u32,
    /// Same-key retry budget for transient (5xx) failures.
    pub max_key_retries: u32,
    /// Fixed pause before retrying on a different key after 401/403.
    pub switch_delay: Duration,
    /// Base of the exponential backoff for transient failures.
    pub backoff_base: Duration,
    /// Ceiling of the exponential backoff.
    pub backoff_cap: Duration,
    /// 429 retry-delay hints at or above this many seconds mean quota
    /// exhaustion rather than momentary throttling.
    pub quota_threshold_secs: u64,
    /// Hourly usage ratio above which extra pre-flight delay is injected.
    pub soft_throttle_ratio: f64,
    /// Hourly usage ratio above which the orchestrator proactively rotates
    /// to another available key instead of calling.
    pub switch_ratio: f64,
    /// Ceiling for the injected pre-flight delay.
    pub soft_delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            max_key_retries: 3,
            switch_delay: Duration::from_millis(500),
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(10_000),
            quota_threshold_secs: 3600,
            soft_throttle_ratio: 0.70,
            switch_ratio: 0.85,
            soft_delay_cap: Duration::from_secs(10),
        }
    }
}

/// Progress callback invoked with human-readable retry/wait reasons.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call options for `run`.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Override of the policy's attempt budget.
    pub max_attempts: Option<u32>,
    /// Queue priority; higher values are served first.
    pub priority: i32,
    pub on_status: Option<StatusCallback>,
}

/// Drives provider calls through the pool, serializer, and limiter.
pub struct Orchestrator {
    pool: Arc<CredentialPool>,
    limiter: Arc<ThroughputLimiter>,
    serializer: Arc<CallSerializer>,
    policy: RetryPolicy,
}

/// What one admitted attempt produced: the operation's value, or its failure
/// to be classified.
enum Attempt<T> {
    Ok(T),
    CallFailed(CallError),
}

impl Orchestrator {
    pub fn new(
        pool: Arc<CredentialPool>,
        limiter: Arc<ThroughputLimiter>,
        serializer: Arc<CallSerializer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            limiter,
            serializer,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<ThroughputLimiter> {
        &self.limiter
    }

    pub fn serializer(&self) -> &Arc<CallSerializer> {
        &self.serializer
    }

    /// Run `operation` reliably: rotate keys, respect throughput limits, and
    /// retry per failure class until it succeeds or the attempt budget is
    /// spent.
    pub async fn run<T, Op, Fut>(&self, operation: Op, opts: RunOptions) -> Result<T>
    where
        Op: Fn(ApiKey) -> Fut,
        Fut: Future<Output = genai_client::Result<T>>,
    {
        let max_attempts = opts.max_attempts.unwrap_or(self.policy.max_attempts).max(1);
        let mut current: Option<ApiKey> = None;
        let mut key_retries: u32 = 0;
        let mut last_failure: Option<(ApiKey, CallError)> = None;

        for attempt in 1..=max_attempts {
            let mut key = match current.take() {
                Some(k) => k,
                None => {
                    key_retries = 0;
                    self.pool.next_key().await?
                }
            };

            // Pre-flight throttling heuristic on the hourly budget: rotate
            // away from a nearly spent key, or pace calls on a warm one.
            let ratio = self.limiter.stats(&key).await.hour_used_ratio();
            if ratio > self.policy.switch_ratio {
                if self.pool.another_available(&key).await {
                    emit(
                        &opts,
                        &format!(
                            "key {key} at {:.0}% of hourly budget, rotating early",
                            ratio * 100.0
                        ),
                    );
                    key = self.pool.next_key().await?;
                    key_retries = 0;
                }
            } else if ratio > self.policy.soft_throttle_ratio {
                let span = 1.0 - self.policy.soft_throttle_ratio;
                let frac = ((ratio - self.policy.soft_throttle_ratio) / span).clamp(0.0, 1.0);
                let delay = self.policy.soft_delay_cap.mul_f64(frac);
                if !delay.is_zero() {
                    emit(
                        &opts,
                        &format!(
                            "key {key} at {:.0}% of hourly budget, pacing for {}",
                            ratio * 100.0,
                            format_wait(&delay)
                        ),
                    );
                    sleep(delay).await;
                }
            }

            debug!(key = %key, attempt, max_attempts, "dispatching provider call");
            let outcome = self
                .serializer
                .execute(&key, opts.priority, || async {
                    self.limiter
                        .wait_for_slot(&key, opts.on_status.as_deref())
                        .await?;
                    match operation(key.clone()).await {
                        Ok(value) => Ok::<_, Error>(Attempt::Ok(value)),
                        Err(e) => Ok(Attempt::CallFailed(e)),
                    }
                })
                .await??;

            let failure = match outcome {
                Attempt::Ok(value) => {
                    if attempt > 1 {
                        info!(key = %key, attempt, "provider call recovered");
                    }
                    return Ok(value);
                }
                Attempt::CallFailed(e) => e,
            };

            let class = classify(&failure, self.policy.quota_threshold_secs);
            warn!(key = %key, attempt, class = ?class, error = %failure, "provider call failed");

            match class {
                FailureClass::LeakedKey => {
                    self.pool
                        .mark_permanently_failed(&key, failure.message())
                        .await;
                    if self.pool.has_other_candidate(&key).await {
                        emit(
                            &opts,
                            &format!("key {key} reported leaked, permanently disabled; rotating"),
                        );
                    } else {
                        return Err(Error::AllKeysUnavailable);
                    }
                }
                FailureClass::Forbidden | FailureClass::AuthFailure => {
                    self.pool.mark_failed(&key).await;
                    emit(&opts, &format!("key {key} rejected, rotating"));
                    sleep(self.policy.switch_delay).await;
                }
                FailureClass::Throttled { retry_delay_secs } => {
                    // Short-term throttling: no pool mutation, no budget
                    // consumed. Rotate if something else is free, otherwise
                    // wait out the hint on the same key.
                    if self.pool.another_available(&key).await {
                        emit(
                            &opts,
                            &format!("key {key} throttled for {retry_delay_secs}s, rotating"),
                        );
                    } else {
                        emit(
                            &opts,
                            &format!("key {key} throttled, waiting {retry_delay_secs}s"),
                        );
                        sleep(Duration::from_secs(retry_delay_secs)).await;
                        current = Some(key.clone());
                    }
                }
                FailureClass::QuotaLimited {
                    confirmed,
                    retry_delay_secs,
                } => {
                    self.pool
                        .mark_quota_limited(&key, confirmed, retry_delay_secs)
                        .await;
                    if confirmed {
                        if self.pool.another_available(&key).await {
                            emit(&opts, &format!("key {key} quota exhausted, rotating"));
                        } else {
                            let min_wait =
                                self.pool.min_quota_wait().await.unwrap_or_default();
                            return Err(Error::AllKeysQuotaLimited { min_wait });
                        }
                    } else {
                        emit(
                            &opts,
                            &format!("key {key} rate limited without detail, rotating"),
                        );
                        sleep(self.policy.switch_delay).await;
                    }
                }
                FailureClass::Transient => {
                    key_retries += 1;
                    if key_retries > self.policy.max_key_retries {
                        self.pool.mark_failed(&key).await;
                        emit(
                            &opts,
                            &format!("key {key} failing repeatedly, rotating"),
                        );
                    } else {
                        let backoff = transient_backoff(&self.policy, key_retries);
                        emit(
                            &opts,
                            &format!(
                                "transient provider error, retry {key_retries} on key {key} in {}",
                                format_wait(&backoff)
                            ),
                        );
                        sleep(backoff).await;
                        current = Some(key.clone());
                    }
                }
                FailureClass::Unknown => return Err(Error::Call(failure)),
            }

            last_failure = Some((key, failure));
        }

        match last_failure {
            Some((key, source)) => Err(Error::AttemptsExhausted {
                attempts: max_attempts,
                key: key.masked(),
                source,
            }),
            // Unreachable: the loop either returns or records a failure.
            None => Err(Error::AllKeysUnavailable),
        }
    }
}

/// Exponential backoff for transient failures:
/// min(base · 2^(retry−1), cap).
fn transient_backoff(policy: &RetryPolicy, retry: u32) -> Duration {
    let factor = 1u32 << (retry.saturating_sub(1)).min(16);
    policy
        .backoff_base
        .saturating_mul(factor)
        .min(policy.backoff_cap)
}

fn emit(opts: &RunOptions, message: &str) {
    if let Some(cb) = &opts.on_status {
        cb(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::LimiterConfig;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn raw_key(n: usize) -> String {
        format!("AIzaTestKey{n:029}")
    }

    /// Limiter that never throttles, so orchestration timing is observable
    /// in isolation.
    fn permissive_limiter() -> Arc<ThroughputLimiter> {
        Arc::new(ThroughputLimiter::new(LimiterConfig {
            min_interval: Duration::ZERO,
            max_per_minute: u32::MAX,
            max_per_hour: u32::MAX,
            ..LimiterConfig::default()
        }))
    }

    fn orchestrator(keys: usize) -> Orchestrator {
        let pool = Arc::new(CredentialPool::new((0..keys).map(raw_key), None).unwrap());
        Orchestrator::new(
            pool,
            permissive_limiter(),
            Arc::new(CallSerializer::new()),
            RetryPolicy::default(),
        )
    }

    fn http(status: u16, retry_delay_secs: Option<u64>, message: &str) -> CallError {
        CallError::Http {
            status,
            retry_delay_secs,
            message: message.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt() {
        let orch = orchestrator(2);
        let result: String = orch
            .run(|_key| async { Ok("title".to_string()) }, RunOptions::default())
            .await
            .unwrap();
        assert_eq!(result, "title");
    }

    #[tokio::test(start_paused = true)]
    async fn quota_429_switches_key_and_succeeds() {
        let orch = orchestrator(2);
        let bad = orch.pool().key_at(0).unwrap().clone();
        let attempts = Arc::new(AtomicU32::new(0));

        let attempts2 = attempts.clone();
        let bad2 = bad.clone();
        let result = orch
            .run(
                move |key| {
                    let attempts = attempts2.clone();
                    let bad = bad2.clone();
                    async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        if key == bad {
                            Err(http(429, Some(7200), "Resource has been exhausted"))
                        } else {
                            Ok("page copy".to_string())
                        }
                    }
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, "page copy");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(orch.pool().quota_limited_count().await, 1);
        assert!(!orch.pool().is_expired(&bad).await);
    }

    #[tokio::test(start_paused = true)]
    async fn short_throttle_waits_without_marking() {
        let orch = orchestrator(1);
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let calls2 = calls.clone();
        let result = orch
            .run(
                move |_key| {
                    let calls = calls2.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(http(429, Some(30), "please slow down"))
                        } else {
                            Ok(())
                        }
                    }
                },
                RunOptions::default(),
            )
            .await;

        assert!(result.is_ok());
        assert!(Instant::now().duration_since(started) >= Duration::from_secs(30));
        // Short-term throttling must not leave a quota record behind.
        assert_eq!(orch.pool().quota_limited_count().await, 0);
        assert_eq!(orch.pool().available_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_backoff_sequence_then_exhaustion() {
        let orch = orchestrator(1);
        let invocations: Arc<StdMutex<Vec<Instant>>> = Arc::new(StdMutex::new(Vec::new()));

        let invocations2 = invocations.clone();
        let result: Result<()> = orch
            .run(
                move |_key| {
                    let invocations = invocations2.clone();
                    async move {
                        invocations.lock().unwrap().push(Instant::now());
                        Err(http(503, None, "service unavailable"))
                    }
                },
                RunOptions::default(),
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::AttemptsExhausted { attempts: 5, .. }));

        let times = invocations.lock().unwrap();
        assert_eq!(times.len(), 5);
        let gaps: Vec<u64> = times
            .windows(2)
            .map(|w| w[1].duration_since(w[0]).as_millis() as u64)
            .collect();
        // Backoff 1s, 2s, 4s on the same key; the fourth failure exhausts
        // the same-key budget and rotation is immediate.
        assert_eq!(&gaps[..3], &[1000, 2000, 4000]);
        assert_eq!(gaps[3], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leaked_key_fails_immediately_with_single_key() {
        let orch = orchestrator(1);
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let result: Result<()> = orch
            .run(
                move |_key| {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(http(403, None, "This API key was reported as leaked"))
                    }
                },
                RunOptions::default(),
            )
            .await;

        assert!(matches!(result.unwrap_err(), Error::AllKeysUnavailable));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let statuses = orch.pool().statuses().await;
        assert_eq!(statuses[0].state, "permanently_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn leaked_key_rotates_when_another_exists() {
        let orch = orchestrator(2);
        let bad = orch.pool().key_at(0).unwrap().clone();

        let bad2 = bad.clone();
        let result = orch
            .run(
                move |key| {
                    let bad = bad2.clone();
                    async move {
                        if key == bad {
                            Err(http(403, None, "key was leaked"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert!(matches!(
            orch.pool().status_of(&bad).await.unwrap(),
            crate::pool::KeyState::PermanentlyFailed { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_rotates_after_switch_delay() {
        let orch = orchestrator(2);
        let bad = orch.pool().key_at(0).unwrap().clone();
        let started = Instant::now();

        let bad2 = bad.clone();
        let result = orch
            .run(
                move |key| {
                    let bad = bad2.clone();
                    async move {
                        if key == bad {
                            Err(http(403, None, "access denied for this model"))
                        } else {
                            Ok("ok")
                        }
                    }
                },
                RunOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(result, "ok");
        assert!(Instant::now().duration_since(started) >= Duration::from_millis(500));
        assert!(matches!(
            orch.pool().status_of(&bad).await.unwrap(),
            crate::pool::KeyState::TemporarilyFailed
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_401_rotates() {
        let orch = orchestrator(2);
        let bad = orch.pool().key_at(0).unwrap().clone();

        let bad2 = bad.clone();
        let result = orch
            .run(
                move |key| {
                    let bad = bad2.clone();
                    async move {
                        if key == bad {
                            Err(http(401, None, "invalid authentication credentials"))
                        } else {
                            Ok(1)
                        }
                    }
                },
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(result, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_error_propagates_without_retry() {
        let orch = orchestrator(2);
        let calls = Arc::new(AtomicU32::new(0));

        let calls2 = calls.clone();
        let result: Result<()> = orch
            .run(
                move |_key| {
                    let calls = calls2.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(CallError::Network("connection reset".to_string()))
                    }
                },
                RunOptions::default(),
            )
            .await;

        assert!(matches!(result.unwrap_err(), Error::Call(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No key state should have changed.
        assert_eq!(orch.pool().available_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn all_quota_limited_surfaces_min_wait() {
        let orch = orchestrator(1);
        let result: Result<()> = orch
            .run(
                |_key| async { Err(http(429, Some(7200), "Resource has been exhausted")) },
                RunOptions::default(),
            )
            .await;

        match result.unwrap_err() {
            Error::AllKeysQuotaLimited { min_wait } => {
                assert_eq!(min_wait.as_secs(), 7200);
            }
            other => panic!("expected AllKeysQuotaLimited, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_rotates_off_hot_key() {
        let pool = Arc::new(CredentialPool::new((0..2).map(raw_key), None).unwrap());
        let limiter = Arc::new(ThroughputLimiter::new(LimiterConfig {
            min_interval: Duration::ZERO,
            max_per_minute: u32::MAX,
            max_per_hour: 10,
            ..LimiterConfig::default()
        }));
        let orch = Orchestrator::new(
            pool.clone(),
            limiter.clone(),
            Arc::new(CallSerializer::new()),
            RetryPolicy::default(),
        );

        // Burn 9/10 of the first key's hourly budget.
        let hot = pool.key_at(0).unwrap().clone();
        for _ in 0..9 {
            limiter.check_and_record(&hot).await;
        }

        let used: Arc<StdMutex<Vec<ApiKey>>> = Arc::new(StdMutex::new(Vec::new()));
        let used2 = used.clone();
        orch.run(
            move |key| {
                let used = used2.clone();
                async move {
                    used.lock().unwrap().push(key);
                    Ok(())
                }
            },
            RunOptions::default(),
        )
        .await
        .unwrap();

        let used = used.lock().unwrap();
        assert_eq!(used.len(), 1);
        assert_ne!(used[0], hot, "orchestrator must rotate off the hot key");
    }

    #[tokio::test(start_paused = true)]
    async fn status_callback_receives_progress() {
        let orch = orchestrator(2);
        let bad = orch.pool().key_at(0).unwrap().clone();
        let messages: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

        let sink = messages.clone();
        let on_status: StatusCallback = Arc::new(move |msg: &str| {
            sink.lock().unwrap().push(msg.to_string());
        });

        let bad2 = bad.clone();
        orch.run(
            move |key| {
                let bad = bad2.clone();
                async move {
                    if key == bad {
                        Err(http(503, None, "unavailable"))
                    } else {
                        Ok(())
                    }
                }
            },
            RunOptions {
                on_status: Some(on_status),
                ..RunOptions::default()
            },
        )
        .await
        .unwrap();

        let messages = messages.lock().unwrap();
        assert!(!messages.is_empty());
        assert!(messages.iter().any(|m| m.contains("transient")));
        // Raw key material must never reach status messages.
        assert!(messages.iter().all(|m| !m.contains(&raw_key(0))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(transient_backoff(&policy, 1), Duration::from_millis(1000));
        assert_eq!(transient_backoff(&policy, 2), Duration::from_millis(2000));
        assert_eq!(transient_backoff(&policy, 3), Duration::from_millis(4000));
        assert_eq!(transient_backoff(&policy, 5), Duration::from_millis(10_000));
        assert_eq!(transient_backoff(&policy, 30), Duration::from_millis(10_000));
    }
}
