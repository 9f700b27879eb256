use chrono::{DateTime, Utc};
use pkg_constants::tokens::TOKEN_EXPIRATION_ANNOTATION;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A bootstrap token secret as stored under `/registry/secrets/<ns>/<name>`.
///
/// The token payload (`token-id`, `token-secret`) lives in `data` as
/// base64-encoded values and is opaque to the cleaner. The expiration
/// instant, if any, is carried as metadata in `annotations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSecret {
    pub id: String,
    pub name: String,
    pub namespace: String,
    /// Secret data stored as base64-encoded values.
    pub data: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl TokenSecret {
    /// The raw expiration annotation, if present. Absent means the token
    /// never expires.
    pub fn expiration(&self) -> Option<&str> {
        self.annotations
            .get(TOKEN_EXPIRATION_ANNOTATION)
            .map(String::as_str)
    }

    /// Identity of this secret within the store.
    pub fn key(&self) -> SecretKey {
        SecretKey {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// Unique identity of a secret: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl SecretKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
