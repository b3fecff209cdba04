//! Identity context of a signed-in session.
//!
//! A context is an immutable value. Transitions build the next context and
//! leave the current one untouched, so a failed exchange never needs undoing.

use chrono::{DateTime, Utc};
use serde::Serialize;

use classroom_auth::{Role, Subject};
use classroom_core::SubjectId;

use crate::error::SessionError;

/// An active impersonation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Impersonation {
    pub effective_identity: Subject,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authenticated identity plus, optionally, the identity being impersonated.
///
/// # Invariants
/// - The effective identity is never the true identity.
/// - Impersonations do not nest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    true_identity: Subject,
    impersonation: Option<Impersonation>,
}

impl SessionContext {
    pub fn new(true_identity: Subject) -> Self {
        Self {
            true_identity,
            impersonation: None,
        }
    }

    /// The identity every access decision is made for.
    pub fn active_subject(&self) -> &Subject {
        self.impersonation
            .as_ref()
            .map(|i| &i.effective_identity)
            .unwrap_or(&self.true_identity)
    }

    /// The authenticated identity. Impersonation rights are checked against this.
    pub fn true_identity(&self) -> &Subject {
        &self.true_identity
    }

    pub fn is_impersonating(&self) -> bool {
        self.impersonation.is_some()
    }

    pub fn impersonation(&self) -> Option<&Impersonation> {
        self.impersonation.as_ref()
    }

    /// Context acting as `target`.
    pub fn begin_impersonation(
        &self,
        target: Subject,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Self, SessionError> {
        if self.is_impersonating() {
            return Err(SessionError::AlreadyImpersonating);
        }
        if target.id == self.true_identity.id {
            return Err(SessionError::InvalidTarget("cannot impersonate yourself".to_string()));
        }
        Ok(Self {
            true_identity: self.true_identity.clone(),
            impersonation: Some(Impersonation {
                effective_identity: target,
                started_at,
                expires_at,
            }),
        })
    }

    /// Context back on the true identity, as freshly reported by the service.
    pub fn end_impersonation(&self, refreshed_true_identity: Subject) -> Result<Self, SessionError> {
        if !self.is_impersonating() {
            return Err(SessionError::NotImpersonating);
        }
        if refreshed_true_identity.id != self.true_identity.id {
            return Err(SessionError::InconsistentState(format!(
                "restored identity '{}' does not match '{}'",
                refreshed_true_identity.id, self.true_identity.id
            )));
        }
        Ok(Self::new(refreshed_true_identity))
    }

    pub fn status(&self) -> ImpersonationStatus {
        ImpersonationStatus {
            is_impersonating: self.is_impersonating(),
            acting_as: IdentitySummary::of(self.active_subject()),
            signed_in_as: IdentitySummary::of(&self.true_identity),
            started_at: self.impersonation.as_ref().map(|i| i.started_at),
            expires_at: self.impersonation.as_ref().and_then(|i| i.expires_at),
        }
    }
}

/// Display-oriented view of a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub id: SubjectId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub global_roles: Vec<Role>,
}

impl IdentitySummary {
    pub fn of(subject: &Subject) -> Self {
        Self {
            id: subject.id.clone(),
            display_name: subject.label().to_string(),
            email: subject.email.clone(),
            global_roles: subject.global_roles.iter().copied().collect(),
        }
    }
}

/// Snapshot for the "you are viewing as ..." banner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpersonationStatus {
    pub is_impersonating: bool,
    pub acting_as: IdentitySummary,
    pub signed_in_as: IdentitySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(id: &str) -> Subject {
        Subject::new(SubjectId::parse(id).unwrap())
    }

    #[test]
    fn active_subject_is_true_identity_without_impersonation() {
        let ctx = SessionContext::new(subject("admin").with_global_role(Role::Admin));
        assert_eq!(ctx.active_subject().id, "admin");
        assert!(!ctx.is_impersonating());
        assert!(ctx.impersonation().is_none());
    }

    #[test]
    fn begin_impersonation_switches_active_subject_only() {
        let ctx = SessionContext::new(subject("admin").with_global_role(Role::Admin));
        let next = ctx.begin_impersonation(subject("s1"), Utc::now(), None).unwrap();

        assert_eq!(next.active_subject().id, "s1");
        assert_eq!(next.true_identity().id, "admin");
        assert!(next.is_impersonating());
        // Original value is untouched.
        assert!(!ctx.is_impersonating());
    }

    #[test]
    fn nested_impersonation_is_rejected() {
        let ctx = SessionContext::new(subject("admin"))
            .begin_impersonation(subject("s1"), Utc::now(), None)
            .unwrap();
        let err = ctx.begin_impersonation(subject("s2"), Utc::now(), None).unwrap_err();
        assert_eq!(err, SessionError::AlreadyImpersonating);
    }

    #[test]
    fn self_impersonation_is_rejected() {
        let ctx = SessionContext::new(subject("admin"));
        let err = ctx.begin_impersonation(subject("admin"), Utc::now(), None).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTarget(_)));
    }

    #[test]
    fn end_impersonation_restores_refreshed_identity() {
        let ctx = SessionContext::new(subject("admin").with_global_role(Role::Admin))
            .begin_impersonation(subject("s1"), Utc::now(), None)
            .unwrap();
        let refreshed = subject("admin");
        let restored = ctx.end_impersonation(refreshed.clone()).unwrap();

        assert!(!restored.is_impersonating());
        // Roles come from the refreshed record, not the stale one.
        assert_eq!(restored.true_identity(), &refreshed);
    }

    #[test]
    fn end_impersonation_requires_active_impersonation() {
        let ctx = SessionContext::new(subject("admin"));
        assert_eq!(
            ctx.end_impersonation(subject("admin")).unwrap_err(),
            SessionError::NotImpersonating
        );
    }

    #[test]
    fn end_impersonation_rejects_foreign_identity() {
        let ctx = SessionContext::new(subject("admin"))
            .begin_impersonation(subject("s1"), Utc::now(), None)
            .unwrap();
        let err = ctx.end_impersonation(subject("someone-else")).unwrap_err();
        assert!(matches!(err, SessionError::InconsistentState(_)));
    }

    #[test]
    fn status_describes_both_identities() {
        let started = Utc::now();
        let ctx = SessionContext::new(subject("admin").with_display_name("Ada"))
            .begin_impersonation(subject("s1"), started, None)
            .unwrap();
        let status = ctx.status();

        assert!(status.is_impersonating);
        assert_eq!(status.acting_as.id, "s1");
        assert_eq!(status.signed_in_as.display_name, "Ada");
        assert_eq!(status.started_at, Some(started));
    }
}
