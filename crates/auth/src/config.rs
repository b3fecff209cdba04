//! Credential policy configuration.

use chrono::Duration;

pub const DEFAULT_SESSION_TTL_SECS: i64 = 3600;
pub const DEFAULT_IMPERSONATION_TTL_SECS: i64 = 3600;
/// Longest accepted credential lifetime (30 days).
pub const MAX_TTL_SECS: i64 = 30 * 24 * 3600;

const DEV_SECRET: &str = "dev-secret";

/// Signing key and lifetimes for issued credentials.
#[derive(Clone)]
pub struct TokenPolicy {
    pub secret: String,
    pub session_ttl: Duration,
    /// Lifetime of impersonation credentials, independent of `session_ttl`.
    pub impersonation_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            secret: DEV_SECRET.to_string(),
            session_ttl: Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            impersonation_ttl: Duration::seconds(DEFAULT_IMPERSONATION_TTL_SECS),
        }
    }
}

impl core::fmt::Debug for TokenPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenPolicy")
            .field("secret", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("impersonation_ttl", &self.impersonation_ttl)
            .finish()
    }
}

impl TokenPolicy {
    /// Read `CLASSROOM_JWT_SECRET`, `CLASSROOM_SESSION_TTL_SECS` and
    /// `CLASSROOM_IMPERSONATION_TTL_SECS`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let secret = lookup("CLASSROOM_JWT_SECRET").unwrap_or_else(|| {
            tracing::warn!("CLASSROOM_JWT_SECRET not set; using insecure dev default");
            defaults.secret.clone()
        });

        Self {
            secret,
            session_ttl: ttl_from(&lookup, "CLASSROOM_SESSION_TTL_SECS", defaults.session_ttl),
            impersonation_ttl: ttl_from(
                &lookup,
                "CLASSROOM_IMPERSONATION_TTL_SECS",
                defaults.impersonation_ttl,
            ),
        }
    }
}

fn ttl_from(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(secs) if (1..=MAX_TTL_SECS).contains(&secs) => Duration::try_seconds(secs).unwrap_or(default),
        _ => {
            tracing::warn!(key, value = %raw, "invalid ttl; using default");
            default
        }
    }
}
