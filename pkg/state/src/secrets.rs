use async_trait::async_trait;
use tracing::info;

use crate::client::StateStore;

use pkg_constants::state::REGISTRY_SECRETS_PREFIX;
use pkg_types::secret::SecretKey;

/// Outcome of a delete call against the secret store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The secret existed and was removed.
    Deleted,
    /// The secret was already gone. Not an error: another actor removed it.
    NotFound,
}

/// Client-side contract for mutating secrets in the control-plane store.
///
/// `Err` from any method means a transient failure (connectivity, server
/// error) that callers may retry; "already gone" is reported in-band as
/// [`DeleteOutcome::NotFound`].
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn delete_secret(&self, namespace: &str, name: &str) -> anyhow::Result<DeleteOutcome>;
}

/// Registry key for a secret: `/registry/secrets/<namespace>/<name>`.
pub fn secret_registry_key(namespace: &str, name: &str) -> String {
    format!("{REGISTRY_SECRETS_PREFIX}{namespace}/{name}")
}

/// Registry key prefix covering all secrets in a namespace.
pub fn namespace_secrets_prefix(namespace: &str) -> String {
    format!("{REGISTRY_SECRETS_PREFIX}{namespace}/")
}

/// Parse a registry key back into a [`SecretKey`].
/// Returns `None` for keys outside the secrets prefix.
pub fn parse_secret_key(registry_key: &str) -> Option<SecretKey> {
    let rest = registry_key.strip_prefix(REGISTRY_SECRETS_PREFIX)?;
    let (namespace, name) = rest.split_once('/')?;
    if namespace.is_empty() || name.is_empty() {
        return None;
    }
    Some(SecretKey::new(namespace, name))
}

/// Secret store backed directly by the SlateDB registry.
#[derive(Clone)]
pub struct RegistrySecrets {
    store: StateStore,
}

impl RegistrySecrets {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SecretStore for RegistrySecrets {
    async fn delete_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<DeleteOutcome> {
        let key = secret_registry_key(namespace, name);
        if self.store.get(&key).await?.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }
        self.store.delete(&key).await?;
        info!("Deleted secret {}/{}", namespace, name);
        Ok(DeleteOutcome::Deleted)
    }
}
