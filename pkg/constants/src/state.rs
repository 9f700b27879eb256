//! State store / leader election constants.

/// etcd-style key prefix under which all secrets live.
/// Full key = `REGISTRY_SECRETS_PREFIX + namespace + "/" + name`.
pub const REGISTRY_SECRETS_PREFIX: &str = "/registry/secrets/";

/// etcd-style key for the cleaner leader lease.
pub const LEADER_LEASE_KEY: &str = "/registry/leases/token-cleaner-leader";

/// How long a leader lease is valid, in seconds.
pub const LEADER_LEASE_TTL_SECS: u64 = 15;

/// The lease is renewed every `TTL / LEADER_RENEW_INTERVAL_DIVISOR` seconds.
pub const LEADER_RENEW_INTERVAL_DIVISOR: u64 = 3;

/// Capacity of the in-memory watch event ring buffer.
pub const EVENT_LOG_CAPACITY: usize = 4096;
