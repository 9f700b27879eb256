use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{CacheEvent, SecretCache};
use crate::expiry::{Evaluation, evaluate};

use pkg_constants::tokens::{
    DELETE_RETRY_BASE_MS, DELETE_RETRY_MAX_SECS, STORE_CALL_TIMEOUT_SECS,
};
use pkg_state::secrets::{DeleteOutcome, SecretStore};
use pkg_types::secret::SecretKey;

/// A re-check armed for a future instant.
///
/// Ordered by `when` first so the min-heap surfaces the earliest check.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledCheck {
    when: DateTime<Utc>,
    key: SecretKey,
}

/// Controller that deletes bootstrap token secrets once they expire.
///
/// All decisions run on one loop: cache work events, due scheduled checks,
/// and the periodic safety-net resync feed the same per-key evaluation
/// path. Processing always re-fetches the secret from the cache before
/// acting, so a stale snapshot can never trigger a delete.
pub struct TokenCleaner {
    cache: SecretCache,
    store: Arc<dyn SecretStore>,
    resync_interval: Duration,
    store_call_timeout: Duration,
    /// Currently-armed re-check instant per key. Heap entries that no
    /// longer match this map are stale and skipped when they surface.
    armed: HashMap<SecretKey, DateTime<Utc>>,
    checks: BinaryHeap<Reverse<ScheduledCheck>>,
    /// Consecutive delete failures per key, for backoff.
    retries: HashMap<SecretKey, u32>,
}

impl TokenCleaner {
    pub fn new(cache: SecretCache, store: Arc<dyn SecretStore>, resync_interval: Duration) -> Self {
        Self {
            cache,
            store,
            resync_interval,
            store_call_timeout: Duration::from_secs(STORE_CALL_TIMEOUT_SECS),
            armed: HashMap::new(),
            checks: BinaryHeap::new(),
            retries: HashMap::new(),
        }
    }

    /// Start the controller loop as a background task.
    pub fn start(self, events_rx: mpsc::UnboundedReceiver<CacheEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(events_rx))
    }

    /// Run the controller loop until the cache event stream closes.
    pub async fn run(mut self, mut events_rx: mpsc::UnboundedReceiver<CacheEvent>) {
        info!(
            "TokenCleaner started (resync={}s)",
            self.resync_interval.as_secs()
        );

        // Full pass first so no already-expired token survives a restart.
        self.full_pass().await;

        let first_tick = tokio::time::Instant::now() + self.resync_interval;
        let mut resync = tokio::time::interval_at(first_tick, self.resync_interval);

        loop {
            let wakeup = self.next_wakeup();
            let has_checks = !self.checks.is_empty();

            tokio::select! {
                _ = resync.tick() => {
                    self.full_pass().await;
                }
                event = events_rx.recv() => match event {
                    Some(CacheEvent::Upsert(key)) => self.process_key(&key).await,
                    Some(CacheEvent::Remove(key)) => self.forget(&key),
                    None => {
                        info!("Cache event stream closed — TokenCleaner stopping");
                        break;
                    }
                },
                _ = tokio::time::sleep(wakeup), if has_checks => {
                    self.fire_due().await;
                }
            }
        }
    }

    /// Evaluate every cached secret once.
    async fn full_pass(&mut self) {
        for key in self.cache.keys().await {
            self.process_key(&key).await;
        }
    }

    /// Re-fetch, re-evaluate, and act on one secret.
    async fn process_key(&mut self, key: &SecretKey) {
        let Some(secret) = self.cache.get(key).await else {
            // Gone from the cache — nothing left to do.
            self.forget(key);
            return;
        };

        match evaluate(&secret, Utc::now()) {
            Evaluation::Keep => self.forget(key),
            Evaluation::DeleteAt(when) => self.arm(key.clone(), when),
            Evaluation::DeleteNow => self.delete(key).await,
        }
    }

    /// Issue the delete through the store client, bounded by a timeout.
    async fn delete(&mut self, key: &SecretKey) {
        let store = Arc::clone(&self.store);
        let call = store.delete_secret(&key.namespace, &key.name);
        let result = tokio::time::timeout(self.store_call_timeout, call).await;
        match result {
            Ok(Ok(DeleteOutcome::Deleted)) => {
                info!("Expired token secret {} deleted", key);
                self.forget(key);
            }
            Ok(Ok(DeleteOutcome::NotFound)) => {
                // Another actor removed it first — success either way.
                info!("Token secret {} already gone", key);
                self.forget(key);
            }
            Ok(Err(e)) => self.retry_later(key, &format!("{e:#}")),
            Err(_) => self.retry_later(key, "store call timed out"),
        }
    }

    /// Arm (or re-arm) a transient-failure retry. Retries repeat until the
    /// delete succeeds or the secret leaves the cache.
    fn retry_later(&mut self, key: &SecretKey, reason: &str) {
        let attempt = {
            let n = self.retries.entry(key.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let delay = delete_backoff(attempt);
        warn!(
            "Failed to delete token secret {}: {} — retry in {:?} (attempt {})",
            key, reason, delay, attempt
        );
        let when = Utc::now()
            + chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(DELETE_RETRY_MAX_SECS as i64));
        self.arm(key.clone(), when);
    }

    /// Schedule a re-check of `key` at `when`, superseding any prior one.
    fn arm(&mut self, key: SecretKey, when: DateTime<Utc>) {
        if self.armed.get(&key) == Some(&when) {
            return; // already armed for this instant
        }
        self.armed.insert(key.clone(), when);
        self.checks.push(Reverse(ScheduledCheck { when, key }));
    }

    /// Drop all scheduling and retry state for a key.
    fn forget(&mut self, key: &SecretKey) {
        self.armed.remove(key);
        self.retries.remove(key);
    }

    /// Process every scheduled check whose instant has passed.
    /// Stale heap entries (superseded or forgotten) are discarded.
    async fn fire_due(&mut self) {
        let now = Utc::now();
        let mut due = Vec::new();

        loop {
            match self.checks.peek() {
                Some(Reverse(check)) if check.when <= now => {}
                _ => break,
            }
            if let Some(Reverse(check)) = self.checks.pop() {
                if self.armed.get(&check.key) == Some(&check.when) {
                    self.armed.remove(&check.key);
                    due.push(check.key);
                }
            }
        }

        for key in due {
            self.process_key(&key).await;
        }
    }

    /// Time until the earliest heap entry, or a long idle sleep when the
    /// heap is empty (that branch is disabled anyway).
    fn next_wakeup(&self) -> Duration {
        match self.checks.peek() {
            Some(Reverse(check)) => (check.when - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
            None => Duration::from_secs(3600),
        }
    }
}

/// Exponential backoff for failed deletes: 500ms, 1s, 2s, ... capped at 30s.
fn delete_backoff(attempt: u32) -> Duration {
    let base = Duration::from_millis(DELETE_RETRY_BASE_MS);
    let max = Duration::from_secs(DELETE_RETRY_MAX_SECS);
    let shift = attempt.clamp(1, 16) - 1;
    base.saturating_mul(1 << shift).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use pkg_constants::tokens::TOKEN_EXPIRATION_ANNOTATION;
    use pkg_types::secret::TokenSecret;
    use std::collections::{HashMap as StdHashMap, VecDeque};
    use std::sync::Mutex;

    /// Store client fake that records delete actions and pops scripted
    /// outcomes (defaulting to `Deleted` once the script runs out).
    #[derive(Default)]
    struct RecordingStore {
        actions: Mutex<Vec<(String, String)>>,
        outcomes: Mutex<VecDeque<anyhow::Result<DeleteOutcome>>>,
    }

    impl RecordingStore {
        fn with_outcomes(outcomes: Vec<anyhow::Result<DeleteOutcome>>) -> Self {
            Self {
                actions: Mutex::new(Vec::new()),
                outcomes: Mutex::new(outcomes.into()),
            }
        }

        fn actions(&self) -> Vec<(String, String)> {
            self.actions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SecretStore for RecordingStore {
        async fn delete_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> anyhow::Result<DeleteOutcome> {
            self.actions
                .lock()
                .unwrap()
                .push((namespace.to_string(), name.to_string()));
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(DeleteOutcome::Deleted))
        }
    }

    fn make_token_secret(token_id: &str) -> TokenSecret {
        let mut data = StdHashMap::new();
        data.insert("token-id".to_string(), token_id.to_string());
        data.insert("token-secret".to_string(), "c2VjcmV0".to_string());
        TokenSecret {
            id: format!("{token_id}-id"),
            name: format!("bootstrap-token-{token_id}"),
            namespace: "kube-system".to_string(),
            data,
            annotations: StdHashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn with_expiration(mut secret: TokenSecret, when: DateTime<Utc>) -> TokenSecret {
        secret.annotations.insert(
            TOKEN_EXPIRATION_ANNOTATION.to_string(),
            when.to_rfc3339(),
        );
        secret
    }

    fn make_cleaner(store: Arc<RecordingStore>) -> (TokenCleaner, SecretCache) {
        let cache = SecretCache::new();
        let cleaner = TokenCleaner::new(cache.clone(), store, Duration::from_secs(30));
        (cleaner, cache)
    }

    #[tokio::test]
    async fn no_expiration_issues_no_actions() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let secret = make_token_secret("abc123");
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;

        assert!(store.actions().is_empty());
        assert!(cleaner.armed.is_empty());
    }

    #[tokio::test]
    async fn expired_secret_is_deleted_once() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let secret = with_expiration(
            make_token_secret("abc123"),
            Utc::now() - ChronoDuration::hours(1),
        );
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;

        assert_eq!(
            store.actions(),
            vec![(
                "kube-system".to_string(),
                "bootstrap-token-abc123".to_string()
            )]
        );
        assert!(cleaner.armed.is_empty());

        // Cache delete event follows; afterwards evaluation is a no-op.
        cache.remove(&key).await;
        cleaner.process_key(&key).await;
        assert_eq!(store.actions().len(), 1);
    }

    #[tokio::test]
    async fn future_expiration_arms_a_recheck() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let expires = Utc::now() + ChronoDuration::hours(1);
        let secret = with_expiration(make_token_secret("abc123"), expires);
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;

        assert!(store.actions().is_empty());
        let armed_at = cleaner.armed.get(&key).copied().expect("check armed");
        assert_eq!(
            armed_at,
            DateTime::parse_from_rfc3339(&expires.to_rfc3339())
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[tokio::test]
    async fn malformed_expiration_issues_no_actions() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let mut secret = make_token_secret("abc123");
        secret.annotations.insert(
            TOKEN_EXPIRATION_ANNOTATION.to_string(),
            "not-a-timestamp".to_string(),
        );
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;

        assert!(store.actions().is_empty());
        assert!(cleaner.armed.is_empty());
    }

    #[tokio::test]
    async fn not_found_counts_as_success() {
        let store = Arc::new(RecordingStore::with_outcomes(vec![Ok(
            DeleteOutcome::NotFound,
        )]));
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let secret = with_expiration(
            make_token_secret("abc123"),
            Utc::now() - ChronoDuration::hours(1),
        );
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;

        assert_eq!(store.actions().len(), 1);
        assert!(cleaner.armed.is_empty(), "no retry armed");
        assert!(cleaner.retries.is_empty());
    }

    #[tokio::test]
    async fn transient_error_retries_until_secret_disappears() {
        let store = Arc::new(RecordingStore::with_outcomes(vec![
            Err(anyhow::anyhow!("connection refused")),
            Err(anyhow::anyhow!("connection refused")),
        ]));
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let secret = with_expiration(
            make_token_secret("abc123"),
            Utc::now() - ChronoDuration::hours(1),
        );
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;
        assert_eq!(store.actions().len(), 1);
        assert_eq!(cleaner.retries.get(&key), Some(&1));
        let first_retry = cleaner.armed.get(&key).copied().expect("retry armed");
        assert!(first_retry > Utc::now() - ChronoDuration::seconds(1));

        // Second attempt fails too; backoff grows.
        cleaner.process_key(&key).await;
        assert_eq!(store.actions().len(), 2);
        assert_eq!(cleaner.retries.get(&key), Some(&2));

        // Externally deleted: the cache event clears all pending state.
        cache.remove(&key).await;
        cleaner.process_key(&key).await;
        assert_eq!(store.actions().len(), 2, "no further delete attempts");
        assert!(cleaner.armed.is_empty());
        assert!(cleaner.retries.is_empty());
    }

    #[tokio::test]
    async fn transient_error_eventually_succeeds() {
        let store = Arc::new(RecordingStore::with_outcomes(vec![Err(anyhow::anyhow!(
            "server error"
        ))]));
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let secret = with_expiration(
            make_token_secret("abc123"),
            Utc::now() - ChronoDuration::hours(1),
        );
        let key = secret.key();
        cache.upsert(secret).await;

        cleaner.process_key(&key).await;
        assert_eq!(cleaner.retries.get(&key), Some(&1));

        // Script exhausted: next attempt reports Deleted.
        cleaner.process_key(&key).await;
        assert_eq!(store.actions().len(), 2);
        assert!(cleaner.retries.is_empty());
        assert!(cleaner.armed.is_empty());
    }

    #[tokio::test]
    async fn newer_schedule_supersedes_older() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        let expires = Utc::now() + ChronoDuration::hours(1);
        let secret = with_expiration(make_token_secret("abc123"), expires);
        let key = secret.key();
        cache.upsert(secret).await;

        // Two checks for the same key: the later one wins.
        cleaner.arm(key.clone(), Utc::now() - ChronoDuration::seconds(2));
        cleaner.arm(key.clone(), Utc::now() - ChronoDuration::seconds(1));
        assert_eq!(cleaner.checks.len(), 2);

        cleaner.fire_due().await;

        // The superseded entry was skipped; re-evaluation saw the future
        // expiration and armed one fresh check at that instant.
        assert!(store.actions().is_empty());
        let armed_at = cleaner.armed.get(&key).copied().expect("check armed");
        assert_eq!(
            armed_at,
            DateTime::parse_from_rfc3339(&expires.to_rfc3339())
                .unwrap()
                .with_timezone(&Utc)
        );
        assert_eq!(cleaner.checks.len(), 1);
    }

    #[tokio::test]
    async fn fire_due_reevaluates_before_acting() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, _cache) = make_cleaner(store.clone());

        // Arm a check that is already due.
        let key = SecretKey::new("kube-system", "bootstrap-token-abc123");
        cleaner.arm(key.clone(), Utc::now() - ChronoDuration::seconds(1));

        // The secret never made it into the cache (or vanished): no delete.
        cleaner.fire_due().await;
        assert!(store.actions().is_empty());
        assert!(cleaner.armed.is_empty());
    }

    #[tokio::test]
    async fn full_pass_deletes_only_expired_secrets() {
        let store = Arc::new(RecordingStore::default());
        let (mut cleaner, cache) = make_cleaner(store.clone());

        cache
            .upsert(with_expiration(
                make_token_secret("expired"),
                Utc::now() - ChronoDuration::hours(1),
            ))
            .await;
        cache
            .upsert(with_expiration(
                make_token_secret("fresh"),
                Utc::now() + ChronoDuration::hours(1),
            ))
            .await;
        cache.upsert(make_token_secret("forever")).await;

        cleaner.full_pass().await;

        assert_eq!(
            store.actions(),
            vec![(
                "kube-system".to_string(),
                "bootstrap-token-expired".to_string()
            )]
        );
        assert_eq!(cleaner.armed.len(), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(delete_backoff(1), Duration::from_millis(500));
        assert_eq!(delete_backoff(2), Duration::from_secs(1));
        assert_eq!(delete_backoff(3), Duration::from_secs(2));
        assert_eq!(delete_backoff(10), Duration::from_secs(30));
        assert_eq!(delete_backoff(u32::MAX), Duration::from_secs(30));
    }
}
