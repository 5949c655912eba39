//! Key state machine and rotation
//!
//! The pool owns per-key health state (Available, TemporarilyFailed,
//! PermanentlyFailed, QuotaLimited) and selects keys on demand: the priority
//! key first when it is usable, otherwise round-robin from a cursor. Quota
//! expiry is lazy — a QuotaLimited key transitions back to Available when it
//! is next looked at past its expiry, never from a timer.
//!
//! When every key is skipped and none is quota limited, the pool clears all
//! temporary failures and hands out the first usable key anyway. That
//! liveness fallback can mask a saturated pool, so it logs a warning and
//! bumps `pool_fallback_total`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Days, LocalResult, Local, TimeZone};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, format_wait};
use crate::key::ApiKey;

/// Health state of one key.
///
/// Transitions:
/// - Available → TemporarilyFailed (403/401, unconfirmed 429)
/// - Available/TemporarilyFailed → QuotaLimited (confirmed 429)
/// - any → PermanentlyFailed (leak report; admin clear is the only way out,
///   and no such operation exists — the pool is rebuilt on restart)
/// - QuotaLimited → Available (expiry observed on access)
/// - TemporarilyFailed → Available (admin reset or liveness fallback)
#[derive(Debug, Clone)]
pub enum KeyState {
    Available,
    TemporarilyFailed,
    PermanentlyFailed { reason: String },
    QuotaLimited {
        flagged_at: Instant,
        expires_at: Instant,
    },
}

impl KeyState {
    /// Status label for diagnostics and logging.
    pub fn label(&self) -> &'static str {
        match self {
            KeyState::Available => "available",
            KeyState::TemporarilyFailed => "temporarily_failed",
            KeyState::PermanentlyFailed { .. } => "permanently_failed",
            KeyState::QuotaLimited { .. } => "quota_limited",
        }
    }

    fn is_unexpired_quota(&self, now: Instant) -> bool {
        matches!(self, KeyState::QuotaLimited { expires_at, .. } if now < *expires_at)
    }
}

/// Diagnostic view of one key for admin surfaces. Never carries the raw key.
#[derive(Debug, Clone)]
pub struct KeyStatus {
    pub index: usize,
    pub masked: String,
    pub is_priority: bool,
    pub state: &'static str,
    pub detail: String,
}

/// Pool of validated API keys with health tracking and rotation.
///
/// The key list is fixed at construction; only state changes afterwards.
/// Uses an `AtomicUsize` cursor for round-robin and `RwLock` for the state
/// vector, mirroring one-logical-step-per-operation semantics.
#[derive(Debug)]
pub struct CredentialPool {
    keys: Vec<ApiKey>,
    priority_idx: Option<usize>,
    states: RwLock<Vec<KeyState>>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Build a pool from raw key strings plus an optional priority key.
    ///
    /// Entries are deduplicated (first occurrence wins) and validated;
    /// malformed entries are dropped with a warning. The priority key is
    /// added to the pool if it is not already in the list. Fails with
    /// `NoValidCredentials` when nothing survives validation.
    pub fn new(raw_keys: impl IntoIterator<Item = String>, priority: Option<String>) -> Result<Self> {
        let mut keys: Vec<ApiKey> = Vec::new();
        let mut dropped = 0usize;

        let mut push = |raw: &str, keys: &mut Vec<ApiKey>| -> Option<usize> {
            match ApiKey::parse(raw) {
                Ok(key) => {
                    if let Some(pos) = keys.iter().position(|k| *k == key) {
                        Some(pos)
                    } else {
                        keys.push(key);
                        Some(keys.len() - 1)
                    }
                }
                Err(e) => {
                    warn!(key = %common::mask_key(raw.trim()), error = %e, "dropping malformed API key");
                    None
                }
            }
        };

        for raw in raw_keys {
            if push(&raw, &mut keys).is_none() {
                dropped += 1;
            }
        }

        let priority_idx = priority.as_deref().and_then(|raw| push(raw, &mut keys));

        if keys.is_empty() {
            return Err(Error::NoValidCredentials);
        }

        let states = vec![KeyState::Available; keys.len()];
        info!(
            keys = keys.len(),
            dropped,
            priority = priority_idx.is_some(),
            "key pool initialized"
        );
        Ok(Self {
            keys,
            priority_idx,
            states: RwLock::new(states),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of keys in the pool (fixed for the process lifetime).
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Select the next usable key.
    ///
    /// Order: priority key if Available; then round-robin from the cursor,
    /// skipping permanently failed, temporarily failed, and unexpired
    /// quota-limited keys (expired quota records transition to Available on
    /// the spot). If the scan finds nothing, the liveness fallback clears
    /// temporary failures and returns the first key that is neither
    /// permanently failed nor still quota limited; failing that, the error
    /// reports whether the pool is quota limited (with the minimum remaining
    /// wait) or plain unavailable.
    pub async fn next_key(&self) -> Result<ApiKey> {
        let n = self.keys.len();
        let mut states = self.states.write().await;
        let now = Instant::now();

        // Lazy quota expiry across the pool
        for (idx, state) in states.iter_mut().enumerate() {
            if let KeyState::QuotaLimited { expires_at, .. } = state
                && now >= *expires_at
            {
                info!(key = %self.keys[idx], "quota limit expired, key available again");
                *state = KeyState::Available;
            }
        }

        if let Some(p) = self.priority_idx
            && matches!(states[p], KeyState::Available)
        {
            debug!(key = %self.keys[p], "selected priority key");
            return Ok(self.keys[p].clone());
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        for offset in 0..(2 * n) {
            let idx = (start + offset) % n;
            if matches!(states[idx], KeyState::Available) {
                debug!(key = %self.keys[idx], "selected key (round-robin)");
                return Ok(self.keys[idx].clone());
            }
        }

        if states.iter().all(|s| s.is_unexpired_quota(now)) {
            let min_wait = min_quota_wait_locked(&states, now).unwrap_or_default();
            return Err(Error::AllKeysQuotaLimited { min_wait });
        }

        // Liveness fallback: every key is failed or quota limited, but not
        // all are quota limited. Clear temporary failures and hand out the
        // first key that is actually usable again.
        let cleared = states
            .iter_mut()
            .filter(|s| matches!(s, KeyState::TemporarilyFailed))
            .map(|s| *s = KeyState::Available)
            .count();
        warn!(
            cleared,
            "all keys exhausted; clearing temporary failures (liveness fallback)"
        );
        metrics::counter!("pool_fallback_total").increment(1);

        if let Some(idx) = states
            .iter()
            .position(|s| matches!(s, KeyState::Available))
        {
            return Ok(self.keys[idx].clone());
        }

        // Only permanently failed and quota-limited keys remain.
        match min_quota_wait_locked(&states, now) {
            Some(min_wait) => Err(Error::AllKeysQuotaLimited { min_wait }),
            None => Err(Error::AllKeysUnavailable),
        }
    }

    /// Mark a key temporarily failed. Idempotent; never downgrades a
    /// permanent failure.
    pub async fn mark_failed(&self, key: &ApiKey) {
        let Some(idx) = self.index_of(key) else {
            debug!(key = %key, "mark_failed for unknown key ignored");
            return;
        };
        let mut states = self.states.write().await;
        if matches!(states[idx], KeyState::PermanentlyFailed { .. }) {
            return;
        }
        if !matches!(states[idx], KeyState::TemporarilyFailed) {
            info!(key = %key, "key marked temporarily failed");
            metrics::counter!("pool_key_state_total", "state" => "temporarily_failed").increment(1);
        }
        states[idx] = KeyState::TemporarilyFailed;
    }

    /// Permanently disable a key. Terminal: no automatic recovery, and the
    /// key is never returned by `next_key` again.
    pub async fn mark_permanently_failed(&self, key: &ApiKey, reason: &str) {
        let Some(idx) = self.index_of(key) else {
            debug!(key = %key, "mark_permanently_failed for unknown key ignored");
            return;
        };
        let mut states = self.states.write().await;
        warn!(key = %key, reason, "key permanently disabled");
        metrics::counter!("pool_key_state_total", "state" => "permanently_failed").increment(1);
        states[idx] = KeyState::PermanentlyFailed {
            reason: reason.to_string(),
        };
    }

    /// Record a quota limit on a key.
    ///
    /// Unconfirmed reports degrade to `mark_failed`. Confirmed reports set
    /// the expiry to now + the provider-supplied delay or, absent a hint, to
    /// the start of the next local calendar day. Any previous quota record
    /// is replaced; a temporary-failure flag is cleared (the two states are
    /// mutually exclusive).
    pub async fn mark_quota_limited(
        &self,
        key: &ApiKey,
        confirmed: bool,
        retry_delay_secs: Option<u64>,
    ) {
        if !confirmed {
            self.mark_failed(key).await;
            return;
        }
        let Some(idx) = self.index_of(key) else {
            debug!(key = %key, "mark_quota_limited for unknown key ignored");
            return;
        };
        let mut states = self.states.write().await;
        if matches!(states[idx], KeyState::PermanentlyFailed { .. }) {
            return;
        }
        let wait = match retry_delay_secs {
            Some(secs) => Duration::from_secs(secs),
            None => until_next_local_midnight(Local::now()),
        };
        let now = Instant::now();
        info!(key = %key, resets_in = %format_wait(&wait), "key quota limited");
        metrics::counter!("pool_key_state_total", "state" => "quota_limited").increment(1);
        states[idx] = KeyState::QuotaLimited {
            flagged_at: now,
            expires_at: now + wait,
        };
    }

    /// True when the key has no quota record, or its record has expired.
    pub async fn is_expired(&self, key: &ApiKey) -> bool {
        let Some(idx) = self.index_of(key) else {
            return true;
        };
        let states = self.states.read().await;
        !states[idx].is_unexpired_quota(Instant::now())
    }

    /// Current state of a key, with lazy expiry applied to the returned view
    /// (the stored state is not mutated — diagnostics are pure reads).
    pub async fn status_of(&self, key: &ApiKey) -> Option<KeyState> {
        let idx = self.index_of(key)?;
        let states = self.states.read().await;
        Some(effective_state(&states[idx], Instant::now()))
    }

    /// Count of keys that would be usable right now.
    pub async fn available_count(&self) -> usize {
        let states = self.states.read().await;
        let now = Instant::now();
        states
            .iter()
            .filter(|s| matches!(effective_state(s, now), KeyState::Available))
            .count()
    }

    /// Count of keys under an unexpired quota limit.
    pub async fn quota_limited_count(&self) -> usize {
        let states = self.states.read().await;
        let now = Instant::now();
        states.iter().filter(|s| s.is_unexpired_quota(now)).count()
    }

    /// True when some other key in the pool is Available right now.
    pub async fn another_available(&self, key: &ApiKey) -> bool {
        let states = self.states.read().await;
        let now = Instant::now();
        self.keys.iter().zip(states.iter()).any(|(k, s)| {
            k != key && matches!(effective_state(s, now), KeyState::Available)
        })
    }

    /// True when some other key is not permanently failed — the "is there
    /// anything left worth switching to" check after a leak report.
    pub async fn has_other_candidate(&self, key: &ApiKey) -> bool {
        let states = self.states.read().await;
        self.keys
            .iter()
            .zip(states.iter())
            .any(|(k, s)| k != key && !matches!(s, KeyState::PermanentlyFailed { .. }))
    }

    /// Minimum remaining quota wait across the pool, if any key is limited.
    pub async fn min_quota_wait(&self) -> Option<Duration> {
        let states = self.states.read().await;
        min_quota_wait_locked(&states, Instant::now())
    }

    /// Diagnostic listing for admin surfaces: masked key, state label, and a
    /// human-readable detail per key.
    pub async fn statuses(&self) -> Vec<KeyStatus> {
        let states = self.states.read().await;
        let now = Instant::now();
        self.keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let state = effective_state(&states[index], now);
                let detail = match &state {
                    KeyState::Available => String::new(),
                    KeyState::TemporarilyFailed => "awaiting rotation or reset".to_string(),
                    KeyState::PermanentlyFailed { reason } => reason.clone(),
                    KeyState::QuotaLimited { expires_at, .. } => {
                        format!("resets in {}", format_wait(&(*expires_at - now)))
                    }
                };
                KeyStatus {
                    index,
                    masked: key.masked(),
                    is_priority: self.priority_idx == Some(index),
                    state: state.label(),
                    detail,
                }
            })
            .collect()
    }

    /// Clear all quota limits (expired or not). Returns the number cleared.
    /// Never touches permanently failed keys.
    pub async fn clear_all_quota_limits(&self) -> usize {
        let mut states = self.states.write().await;
        let cleared = states
            .iter_mut()
            .filter(|s| matches!(s, KeyState::QuotaLimited { .. }))
            .map(|s| *s = KeyState::Available)
            .count();
        info!(cleared, "admin reset: quota limits cleared");
        cleared
    }

    /// Clear all temporary failures. Returns the number cleared.
    pub async fn clear_all_temporary_failures(&self) -> usize {
        let mut states = self.states.write().await;
        let cleared = states
            .iter_mut()
            .filter(|s| matches!(s, KeyState::TemporarilyFailed))
            .map(|s| *s = KeyState::Available)
            .count();
        info!(cleared, "admin reset: temporary failures cleared");
        cleared
    }

    /// Clear quota limits and temporary failures together.
    pub async fn clear_all(&self) -> usize {
        let mut states = self.states.write().await;
        let cleared = states
            .iter_mut()
            .filter(|s| {
                matches!(
                    s,
                    KeyState::TemporarilyFailed | KeyState::QuotaLimited { .. }
                )
            })
            .map(|s| *s = KeyState::Available)
            .count();
        info!(cleared, "admin reset: all recoverable key state cleared");
        cleared
    }

    /// Key at a given pool index (admin queue operations address keys by
    /// index so raw values never travel through the API).
    pub fn key_at(&self, index: usize) -> Option<&ApiKey> {
        self.keys.get(index)
    }

    fn index_of(&self, key: &ApiKey) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }
}

/// State as an observer should see it: an expired quota record reads as
/// Available even before the next mutating access rolls it over.
fn effective_state(state: &KeyState, now: Instant) -> KeyState {
    match state {
        KeyState::QuotaLimited { expires_at, .. } if now >= *expires_at => KeyState::Available,
        other => other.clone(),
    }
}

fn min_quota_wait_locked(states: &[KeyState], now: Instant) -> Option<Duration> {
    states
        .iter()
        .filter_map(|s| match s {
            KeyState::QuotaLimited { expires_at, .. } if now < *expires_at => {
                Some(*expires_at - now)
            }
            _ => None,
        })
        .min()
}

/// Wall-clock duration until the start of the next local calendar day — the
/// quota expiry default when the provider sends no retry-delay hint.
fn until_next_local_midnight(now_local: DateTime<Local>) -> Duration {
    let fallback = Duration::from_secs(24 * 3600);
    let Some(tomorrow) = now_local.date_naive().checked_add_days(Days::new(1)) else {
        return fallback;
    };
    let Some(midnight) = tomorrow.and_hms_opt(0, 0, 0) else {
        return fallback;
    };
    let target = match Local.from_local_datetime(&midnight) {
        LocalResult::Single(t) => t,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => return fallback,
    };
    (target - now_local).to_std().unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_key(n: usize) -> String {
        format!("AIzaTestKey{n:029}")
    }

    fn pool_of(n: usize) -> CredentialPool {
        CredentialPool::new((0..n).map(raw_key), None).unwrap()
    }

    async fn key(pool: &CredentialPool, n: usize) -> ApiKey {
        pool.key_at(n).unwrap().clone()
    }

    #[test]
    fn construction_rejects_empty_list() {
        let err = CredentialPool::new(Vec::new(), None).unwrap_err();
        assert!(matches!(err, Error::NoValidCredentials));
    }

    #[test]
    fn construction_drops_malformed_and_dedupes() {
        let pool = CredentialPool::new(
            vec![
                raw_key(0),
                "not-a-key".to_string(),
                raw_key(0),
                raw_key(1),
            ],
            None,
        )
        .unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn construction_fails_when_all_malformed() {
        let err =
            CredentialPool::new(vec!["bad".to_string(), "worse".to_string()], None).unwrap_err();
        assert!(matches!(err, Error::NoValidCredentials));
    }

    #[tokio::test]
    async fn round_robin_cycles_through_keys() {
        let pool = pool_of(2);
        let a = pool.next_key().await.unwrap();
        let b = pool.next_key().await.unwrap();
        let c = pool.next_key().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[tokio::test]
    async fn priority_key_tried_first() {
        let pool = CredentialPool::new((0..3).map(raw_key), Some(raw_key(2))).unwrap();
        let expected = key(&pool, 2).await;
        for _ in 0..4 {
            assert_eq!(pool.next_key().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn priority_key_skipped_when_failed() {
        let pool = CredentialPool::new((0..2).map(raw_key), Some(raw_key(1))).unwrap();
        let priority = key(&pool, 1).await;
        pool.mark_failed(&priority).await;
        let selected = pool.next_key().await.unwrap();
        assert_ne!(selected, priority);
    }

    #[tokio::test]
    async fn next_key_always_returns_something_with_one_valid_key() {
        let pool = pool_of(1);
        let only = key(&pool, 0).await;
        // Exhaust it repeatedly; the fallback must keep the pool live.
        for _ in 0..5 {
            let selected = pool.next_key().await.unwrap();
            assert_eq!(selected, only);
            pool.mark_failed(&selected).await;
        }
    }

    #[tokio::test]
    async fn permanently_failed_key_never_returned() {
        let pool = pool_of(2);
        let dead = key(&pool, 0).await;
        pool.mark_permanently_failed(&dead, "reported as leaked").await;
        for _ in 0..6 {
            assert_ne!(pool.next_key().await.unwrap(), dead);
        }
        // Admin resets must not resurrect it either.
        pool.clear_all().await;
        for _ in 0..6 {
            assert_ne!(pool.next_key().await.unwrap(), dead);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quota_limit_expires_lazily() {
        let pool = pool_of(1);
        let k = key(&pool, 0).await;
        pool.mark_quota_limited(&k, true, Some(7200)).await;
        assert!(!pool.is_expired(&k).await);
        assert!(matches!(
            pool.next_key().await.unwrap_err(),
            Error::AllKeysQuotaLimited { .. }
        ));

        tokio::time::advance(Duration::from_secs(7201)).await;
        assert!(pool.is_expired(&k).await);
        assert_eq!(pool.next_key().await.unwrap(), k);
        assert!(matches!(
            pool.status_of(&k).await.unwrap(),
            KeyState::Available
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn all_quota_limited_reports_min_wait() {
        let pool = pool_of(2);
        let a = key(&pool, 0).await;
        let b = key(&pool, 1).await;
        pool.mark_quota_limited(&a, true, Some(7200)).await;
        pool.mark_quota_limited(&b, true, Some(600)).await;

        match pool.next_key().await.unwrap_err() {
            Error::AllKeysQuotaLimited { min_wait } => {
                assert_eq!(min_wait.as_secs(), 600);
            }
            other => panic!("expected AllKeysQuotaLimited, got {other}"),
        }
    }

    #[tokio::test]
    async fn unconfirmed_quota_degrades_to_temporary_failure() {
        let pool = pool_of(1);
        let k = key(&pool, 0).await;
        pool.mark_quota_limited(&k, false, Some(7200)).await;
        assert!(matches!(
            pool.status_of(&k).await.unwrap(),
            KeyState::TemporarilyFailed
        ));
        assert_eq!(pool.quota_limited_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_record_replaced_on_remark() {
        let pool = pool_of(1);
        let k = key(&pool, 0).await;
        pool.mark_quota_limited(&k, true, Some(600)).await;
        pool.mark_quota_limited(&k, true, Some(7200)).await;
        let wait = pool.min_quota_wait().await.unwrap();
        assert_eq!(wait.as_secs(), 7200);
    }

    #[tokio::test]
    async fn quota_mark_clears_temporary_failure() {
        let pool = pool_of(1);
        let k = key(&pool, 0).await;
        pool.mark_failed(&k).await;
        pool.mark_quota_limited(&k, true, Some(60)).await;
        assert!(matches!(
            pool.status_of(&k).await.unwrap(),
            KeyState::QuotaLimited { .. }
        ));
    }

    #[tokio::test]
    async fn fallback_clears_temporary_failures() {
        let pool = pool_of(3);
        for i in 0..3 {
            let k = key(&pool, i).await;
            pool.mark_failed(&k).await;
        }
        // Nothing available, nothing quota limited: the fallback must clear
        // and return a key.
        let selected = pool.next_key().await.unwrap();
        assert_eq!(selected, key(&pool, 0).await);
        assert_eq!(pool.available_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn mixed_permfailed_and_quota_reports_quota_wait() {
        let pool = pool_of(2);
        let a = key(&pool, 0).await;
        let b = key(&pool, 1).await;
        pool.mark_permanently_failed(&a, "leaked").await;
        pool.mark_quota_limited(&b, true, Some(1800)).await;
        match pool.next_key().await.unwrap_err() {
            Error::AllKeysQuotaLimited { min_wait } => assert_eq!(min_wait.as_secs(), 1800),
            other => panic!("expected AllKeysQuotaLimited, got {other}"),
        }
    }

    #[tokio::test]
    async fn all_permanently_failed_reports_unavailable() {
        let pool = pool_of(2);
        for i in 0..2 {
            let k = key(&pool, i).await;
            pool.mark_permanently_failed(&k, "leaked").await;
        }
        assert!(matches!(
            pool.next_key().await.unwrap_err(),
            Error::AllKeysUnavailable
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_quota_limits_allows_reuse_before_expiry() {
        let pool = pool_of(1);
        let k = key(&pool, 0).await;
        pool.mark_quota_limited(&k, true, Some(7200)).await;
        assert!(pool.next_key().await.is_err());

        assert_eq!(pool.clear_all_quota_limits().await, 1);
        assert_eq!(pool.next_key().await.unwrap(), k);
    }

    #[tokio::test]
    async fn resets_are_idempotent() {
        let pool = pool_of(2);
        let k = key(&pool, 0).await;
        pool.mark_failed(&k).await;
        assert_eq!(pool.clear_all_temporary_failures().await, 1);
        assert_eq!(pool.clear_all_temporary_failures().await, 0);
        assert_eq!(pool.clear_all().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_reflect_states() {
        let pool = pool_of(3);
        pool.mark_failed(&key(&pool, 0).await).await;
        pool.mark_quota_limited(&key(&pool, 1).await, true, Some(600))
            .await;
        assert_eq!(pool.available_count().await, 1);
        assert_eq!(pool.quota_limited_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_are_masked_and_detailed() {
        let pool = CredentialPool::new((0..2).map(raw_key), Some(raw_key(0))).unwrap();
        pool.mark_quota_limited(&key(&pool, 1).await, true, Some(3900))
            .await;
        let statuses = pool.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].is_priority);
        assert_eq!(statuses[0].state, "available");
        assert_eq!(statuses[1].state, "quota_limited");
        assert!(statuses[1].detail.contains("resets in 1h"));
        for s in &statuses {
            assert!(s.masked.contains("..."));
            assert!(!s.masked.contains("TestKey0000"));
        }
    }

    #[tokio::test]
    async fn another_available_and_other_candidate() {
        let pool = pool_of(2);
        let a = key(&pool, 0).await;
        let b = key(&pool, 1).await;
        assert!(pool.another_available(&a).await);
        pool.mark_failed(&b).await;
        assert!(!pool.another_available(&a).await);
        assert!(pool.has_other_candidate(&a).await);
        pool.mark_permanently_failed(&b, "leaked").await;
        assert!(!pool.has_other_candidate(&a).await);
    }

    #[test]
    fn next_midnight_is_within_a_day() {
        let d = until_next_local_midnight(Local::now());
        assert!(d <= Duration::from_secs(24 * 3600));
        assert!(d > Duration::ZERO);
    }

    #[test]
    fn next_midnight_from_fixed_time() {
        let now = Local.with_ymd_and_hms(2026, 3, 4, 22, 30, 0).unwrap();
        let d = until_next_local_midnight(now);
        assert_eq!(d, Duration::from_secs(90 * 60));
    }
}
