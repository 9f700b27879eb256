//! Bootstrap token constants.

/// Namespace that holds bootstrap token secrets.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Annotation holding the token expiration instant as an RFC3339 timestamp.
/// Absent means the token never expires.
pub const TOKEN_EXPIRATION_ANNOTATION: &str = "bootstrap.kubernetes.io/token-expiration";

/// Data key for the public token identifier (base64-encoded).
pub const TOKEN_ID_KEY: &str = "token-id";

/// Data key for the secret token value (base64-encoded).
pub const TOKEN_SECRET_KEY: &str = "token-secret";

/// Prefix of bootstrap token secret names: `bootstrap-token-<token-id>`.
pub const TOKEN_SECRET_NAME_PREFIX: &str = "bootstrap-token-";

/// How often the cleaner re-scans the full cache as a safety net, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Upper bound on any single store call issued by the cleaner.
pub const STORE_CALL_TIMEOUT_SECS: u64 = 10;

/// Base delay before retrying a failed delete, in milliseconds.
pub const DELETE_RETRY_BASE_MS: u64 = 500;

/// Cap on the delete retry backoff, in seconds.
pub const DELETE_RETRY_MAX_SECS: u64 = 30;
