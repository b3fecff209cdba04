//! Seam to the remote authentication service.
//!
//! The session layer never talks to the network itself; it drives an
//! [`AuthService`] and trusts nothing it returns without checking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use classroom_auth::UserRecord;
use classroom_core::SubjectId;

/// Opaque bearer credential. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// What the service knows about a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introspection {
    /// Acting subject.
    pub active: UserRecord,
    /// Authenticated subject when `active` is being impersonated.
    #[serde(default)]
    pub original: Option<UserRecord>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a credential exchange: the replacement credential and the
/// identities it encodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialGrant {
    pub credential: Credential,
    pub session: Introspection,
}

/// Candidate for the impersonation picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: SubjectId,
    pub display_name: String,
    pub email: Option<String>,
    pub global_roles: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("user '{0}' not found")]
    NotFound(String),

    #[error("forbidden")]
    Forbidden,

    #[error("already impersonating")]
    AlreadyImpersonating,

    #[error("not impersonating")]
    NotImpersonating,

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn introspect(&self, credential: &Credential) -> Result<Introspection, RemoteError>;

    /// Exchange `credential` for one encoding both `target` and the caller.
    async fn start_impersonation(
        &self,
        credential: &Credential,
        target: &SubjectId,
    ) -> Result<CredentialGrant, RemoteError>;

    /// Exchange an impersonation credential for the caller's own.
    async fn stop_impersonation(&self, credential: &Credential) -> Result<CredentialGrant, RemoteError>;

    /// Admin-only user directory lookup.
    async fn list_users(&self, credential: &Credential) -> Result<Vec<DirectoryEntry>, RemoteError>;
}
