use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use pkg_state::client::StateStore;
use pkg_state::secrets::{namespace_secrets_prefix, parse_secret_key};
use pkg_state::watch::{EventType, WatchEvent};
use pkg_types::secret::{SecretKey, TokenSecret};

/// Change notification forwarded to the cleaner's work queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The secret was created or updated; re-evaluate it.
    Upsert(SecretKey),
    /// The secret is gone; cancel any pending work for it.
    Remove(SecretKey),
}

/// Local, eventually-consistent mirror of all token secrets in one namespace.
///
/// The syncer is the only writer; the cleaner only reads `Arc` snapshots
/// and never mutates an entry in place.
#[derive(Clone, Default)]
pub struct SecretCache {
    inner: Arc<RwLock<HashMap<SecretKey, Arc<TokenSecret>>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret, keyed by its identity. Idempotent.
    pub async fn upsert(&self, secret: TokenSecret) {
        let key = secret.key();
        self.inner.write().await.insert(key, Arc::new(secret));
    }

    /// Remove a secret by identity. Idempotent.
    pub async fn remove(&self, key: &SecretKey) {
        self.inner.write().await.remove(key);
    }

    /// Snapshot of the secret for `key`, if currently cached.
    pub async fn get(&self, key: &SecretKey) -> Option<Arc<TokenSecret>> {
        self.inner.read().await.get(key).cloned()
    }

    /// All currently-cached identities.
    pub async fn keys(&self) -> Vec<SecretKey> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Replace the whole cache with `fresh` and return the keys that vanished.
    async fn replace_all(&self, fresh: HashMap<SecretKey, Arc<TokenSecret>>) -> Vec<SecretKey> {
        let mut inner = self.inner.write().await;
        let removed: Vec<SecretKey> = inner
            .keys()
            .filter(|k| !fresh.contains_key(*k))
            .cloned()
            .collect();
        *inner = fresh;
        removed
    }
}

/// Keeps a [`SecretCache`] current against the store's watch stream and
/// forwards per-key work events to the cleaner.
///
/// Subscribes before the initial list so no mutation is lost in between;
/// a lagged subscription triggers a full relist-and-diff.
pub struct CacheSyncer {
    store: StateStore,
    cache: SecretCache,
    prefix: String,
    events_tx: mpsc::UnboundedSender<CacheEvent>,
}

impl CacheSyncer {
    pub fn new(
        store: StateStore,
        cache: SecretCache,
        namespace: &str,
        events_tx: mpsc::UnboundedSender<CacheEvent>,
    ) -> Self {
        Self {
            store,
            cache,
            prefix: namespace_secrets_prefix(namespace),
            events_tx,
        }
    }

    /// Start the sync loop as a background task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("CacheSyncer started (prefix={})", self.prefix);
            let mut event_rx = self.store.event_log.subscribe();

            if let Err(e) = self.resync().await {
                warn!("CacheSyncer initial list error: {}", e);
            }

            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        apply_event(&self.cache, &self.events_tx, &self.prefix, &event).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Watch stream lagged by {} events — full resync", missed);
                        if let Err(e) = self.resync().await {
                            warn!("CacheSyncer resync error: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("Watch stream closed — CacheSyncer stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Full relist: replace the cache with the store's current contents,
    /// emitting `Remove` for vanished keys and `Upsert` for everything else.
    async fn resync(&self) -> anyhow::Result<()> {
        let entries = self.store.list_prefix(&self.prefix).await?;
        let mut fresh: HashMap<SecretKey, Arc<TokenSecret>> = HashMap::new();

        for (registry_key, value) in entries {
            let secret: TokenSecret = match serde_json::from_slice(&value) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Undecodable secret at {}: {} — skipping", registry_key, e);
                    continue;
                }
            };
            fresh.insert(secret.key(), Arc::new(secret));
        }

        info!("Cache resync: {} secrets under {}", fresh.len(), self.prefix);

        let upserted: Vec<SecretKey> = fresh.keys().cloned().collect();
        let removed = self.cache.replace_all(fresh).await;
        for key in removed {
            let _ = self.events_tx.send(CacheEvent::Remove(key));
        }
        for key in upserted {
            let _ = self.events_tx.send(CacheEvent::Upsert(key));
        }
        Ok(())
    }
}

/// Apply one watch event to the cache, forwarding a work event on change.
/// Events outside `prefix` and undecodable values are ignored.
async fn apply_event(
    cache: &SecretCache,
    events_tx: &mpsc::UnboundedSender<CacheEvent>,
    prefix: &str,
    event: &WatchEvent,
) {
    if !event.key.starts_with(prefix) {
        return;
    }
    let Some(key) = parse_secret_key(&event.key) else {
        return;
    };

    match event.event_type {
        EventType::Put => {
            let Some(value) = event.value.as_deref() else {
                warn!("Put event without value for {} — ignoring", event.key);
                return;
            };
            let secret: TokenSecret = match serde_json::from_slice(value) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Undecodable secret at {}: {} — ignoring event", event.key, e);
                    return;
                }
            };
            cache.upsert(secret).await;
            let _ = events_tx.send(CacheEvent::Upsert(key));
        }
        EventType::Delete => {
            cache.remove(&key).await;
            let _ = events_tx.send(CacheEvent::Remove(key));
        }
    }
}
