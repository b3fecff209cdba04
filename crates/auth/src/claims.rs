use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use classroom_core::SubjectId;

/// Which kind of credential a token is.
///
/// Impersonation credentials are a separate kind with their own expiry so a
/// support session can never inherit the lifetime of a regular login.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Session,
    Impersonation,
}

/// Credential claims model (transport-agnostic).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// Acting subject ("current" identity).
    pub sub: SubjectId,

    pub kind: CredentialKind,

    /// Authenticated subject behind an impersonation ("original" identity).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_sub: Option<SubjectId>,

    /// When the impersonation began; carried across refreshes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonation_started_at: Option<DateTime<Utc>>,

    pub jti: Uuid,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
}

impl CredentialClaims {
    pub fn session(sub: SubjectId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            sub,
            kind: CredentialKind::Session,
            original_sub: None,
            impersonation_started_at: None,
            jti: Uuid::now_v7(),
            iat: now,
            exp: expiry(now, ttl),
        }
    }

    pub fn impersonation(
        target: SubjectId,
        original: SubjectId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: target,
            kind: CredentialKind::Impersonation,
            original_sub: Some(original),
            impersonation_started_at: Some(now),
            jti: Uuid::now_v7(),
            iat: now,
            exp: expiry(now, ttl),
        }
    }

    pub fn is_impersonation(&self) -> bool {
        self.kind == CredentialKind::Impersonation
    }
}

/// `now + ttl`, saturating at the latest representable instant.
fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("inconsistent claims: {0}")]
    InvalidShape(&'static str),

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Deterministically validate credential claims.
///
/// Validates the claims only; signature checks live in [`crate::token`].
pub fn validate_claims(claims: &CredentialClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenError::Expired);
    }
    match (claims.kind, &claims.original_sub) {
        (CredentialKind::Session, None) => Ok(()),
        (CredentialKind::Session, Some(_)) => {
            Err(TokenError::InvalidShape("session credential carries an original subject"))
        }
        (CredentialKind::Impersonation, None) => {
            Err(TokenError::InvalidShape("impersonation credential without original subject"))
        }
        (CredentialKind::Impersonation, Some(original)) if *original == claims.sub => {
            Err(TokenError::InvalidShape("impersonation credential targets its own subject"))
        }
        (CredentialKind::Impersonation, Some(_)) => Ok(()),
    }
}
