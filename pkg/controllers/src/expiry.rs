use chrono::{DateTime, Utc};
use pkg_types::secret::TokenSecret;
use tracing::warn;

/// Decision for one secret at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// No usable expiration: leave the secret alone.
    Keep,
    /// Expiration has passed: delete immediately.
    DeleteNow,
    /// Expiration is in the future: re-check at this instant.
    DeleteAt(DateTime<Utc>),
}

/// Evaluate a secret's expiration annotation against `now`.
///
/// A missing annotation means the token never expires. An annotation that
/// fails to parse as RFC3339 is a data-quality problem, not a reason to
/// destroy the secret: it is reported and the secret kept. Expiration
/// exactly equal to `now` counts as expired.
pub fn evaluate(secret: &TokenSecret, now: DateTime<Utc>) -> Evaluation {
    let Some(raw) = secret.expiration() else {
        return Evaluation::Keep;
    };

    let expires_at = match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            warn!(
                "Secret {} has unparseable expiration {:?}: {} — keeping it",
                secret.key(),
                raw,
                e
            );
            return Evaluation::Keep;
        }
    };

    if expires_at <= now {
        Evaluation::DeleteNow
    } else {
        Evaluation::DeleteAt(expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pkg_constants::tokens::TOKEN_EXPIRATION_ANNOTATION;
    use std::collections::HashMap;

    fn make_token_secret(token_id: &str) -> TokenSecret {
        let mut data = HashMap::new();
        data.insert("token-id".to_string(), token_id.to_string());
        data.insert("token-secret".to_string(), "c2VjcmV0".to_string());
        TokenSecret {
            id: format!("{token_id}-id"),
            name: format!("bootstrap-token-{token_id}"),
            namespace: "kube-system".to_string(),
            data,
            annotations: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn with_expiration(mut secret: TokenSecret, raw: &str) -> TokenSecret {
        secret
            .annotations
            .insert(TOKEN_EXPIRATION_ANNOTATION.to_string(), raw.to_string());
        secret
    }

    #[test]
    fn no_expiration_is_kept() {
        let secret = make_token_secret("abc123");
        assert_eq!(evaluate(&secret, Utc::now()), Evaluation::Keep);
    }

    #[test]
    fn past_expiration_is_deleted_now() {
        let now = Utc::now();
        let secret = with_expiration(
            make_token_secret("abc123"),
            &(now - Duration::hours(1)).to_rfc3339(),
        );
        assert_eq!(evaluate(&secret, now), Evaluation::DeleteNow);
    }

    #[test]
    fn boundary_equal_counts_as_expired() {
        let now = Utc::now();
        let secret = with_expiration(make_token_secret("abc123"), &now.to_rfc3339());
        assert_eq!(evaluate(&secret, now), Evaluation::DeleteNow);
    }

    #[test]
    fn future_expiration_schedules_recheck() {
        let now = Utc::now();
        let expires = now + Duration::hours(1);
        let secret = with_expiration(make_token_secret("abc123"), &expires.to_rfc3339());
        match evaluate(&secret, now) {
            Evaluation::DeleteAt(when) => assert_eq!(when, expires),
            other => panic!("expected DeleteAt, got {other:?}"),
        }
    }

    #[test]
    fn malformed_expiration_is_kept() {
        let secret = with_expiration(make_token_secret("abc123"), "not-a-timestamp");
        assert_eq!(evaluate(&secret, Utc::now()), Evaluation::Keep);
    }

    #[test]
    fn offset_timestamps_are_normalized() {
        let secret = with_expiration(make_token_secret("abc123"), "2020-01-01T12:00:00+02:00");
        // 10:00 UTC, long past.
        assert_eq!(evaluate(&secret, Utc::now()), Evaluation::DeleteNow);
    }
}
