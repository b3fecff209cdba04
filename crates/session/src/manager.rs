//! Impersonation lifecycle.
//!
//! The manager owns the remote exchanges that change who the session acts
//! as. Every transition follows the same shape: check locally, exchange
//! remotely, verify the grant, then swap credential and context in one step.
//! A failed exchange changes nothing; a grant that contradicts local state
//! revokes the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use classroom_auth::Subject;
use classroom_core::SubjectId;

use crate::context::SessionContext;
use crate::error::SessionError;
use crate::service::{AuthService, Credential, CredentialGrant, DirectoryEntry, Introspection, RemoteError};
use crate::session::Session;

/// Holds the in-flight flag for the duration of one transition.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| SessionError::OperationInFlight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ImpersonationManager<S: AuthService> {
    service: Arc<S>,
    session: Arc<Session>,
    in_flight: AtomicBool,
}

impl<S: AuthService> ImpersonationManager<S> {
    /// Introspect `credential` and build the session it describes.
    ///
    /// A credential that already encodes an impersonation yields a session
    /// that is impersonating from the start.
    pub async fn establish(service: Arc<S>, credential: Credential) -> Result<Self, SessionError> {
        let introspection = service.introspect(&credential).await?;
        let context = context_from_introspection(&introspection)?;
        tracing::info!(
            subject = %context.true_identity().id,
            impersonating = context.is_impersonating(),
            "session established"
        );
        Ok(Self {
            service,
            session: Arc::new(Session::new(credential, context)),
            in_flight: AtomicBool::new(false),
        })
    }

    /// Read handle for guards and views.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Act as `target` until [`stop_impersonation`](Self::stop_impersonation).
    ///
    /// Returns the effective identity now in use.
    pub async fn start_impersonation(&self, target: &str) -> Result<Subject, SessionError> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let (credential, context) = self.session.current()?;

        let caller = context.true_identity();
        if !caller.is_admin() {
            tracing::warn!(subject = %caller.id, "impersonation refused: not an administrator");
            return Err(SessionError::Forbidden);
        }
        if context.is_impersonating() {
            return Err(SessionError::AlreadyImpersonating);
        }
        let target = SubjectId::parse(target)
            .map_err(|_| SessionError::InvalidTarget("target id is empty".to_string()))?;
        if target == caller.id {
            return Err(SessionError::InvalidTarget("cannot impersonate yourself".to_string()));
        }

        let grant = match self.service.start_impersonation(&credential, &target).await {
            Ok(grant) => grant,
            Err(RemoteError::AlreadyImpersonating) => {
                return Err(self.revoke(
                    "service reports an impersonation this session does not hold".to_string(),
                ));
            }
            Err(e) => {
                tracing::warn!(target_id = %target, "start impersonation exchange failed: {}", e);
                return Err(e.into());
            }
        };

        let next = match verify_start(&context, &target, &grant) {
            Ok(next) => next,
            Err(reason) => return Err(self.revoke(reason)),
        };
        let effective = next.active_subject().clone();
        self.session.replace(grant.credential, next);

        tracing::info!(admin = %caller.id, target_id = %effective.id, "impersonation started");
        Ok(effective)
    }

    /// Return to the true identity, with roles as the service reports them now.
    pub async fn stop_impersonation(&self) -> Result<Subject, SessionError> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let (credential, context) = self.session.current()?;
        let Some(impersonation) = context.impersonation() else {
            return Err(SessionError::NotImpersonating);
        };
        let effective_id = impersonation.effective_identity.id.clone();

        let grant = match self.service.stop_impersonation(&credential).await {
            Ok(grant) => grant,
            Err(RemoteError::NotFound(id)) => {
                return Err(self.revoke(format!("original user '{}' no longer exists", id)));
            }
            Err(RemoteError::NotImpersonating) => {
                return Err(self.revoke(format!(
                    "service reports no impersonation of '{}'",
                    effective_id
                )));
            }
            Err(e) => {
                tracing::warn!("stop impersonation exchange failed: {}", e);
                return Err(e.into());
            }
        };

        let next = match verify_stop(&context, &grant) {
            Ok(next) => next,
            Err(reason) => return Err(self.revoke(reason)),
        };
        let restored = next.true_identity().clone();
        self.session.replace(grant.credential, next);

        tracing::info!(admin = %restored.id, target_id = %effective_id, "impersonation stopped");
        Ok(restored)
    }

    /// Re-read both identities from the service, keeping the credential.
    pub async fn refresh(&self) -> Result<(), SessionError> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let (credential, context) = self.session.current()?;

        let introspection = self.service.introspect(&credential).await?;
        let next = match context_from_introspection(&introspection) {
            Ok(next) => next,
            Err(e) => return Err(self.revoke(e.to_string())),
        };
        if next.true_identity().id != context.true_identity().id
            || next.active_subject().id != context.active_subject().id
        {
            return Err(self.revoke(format!(
                "credential now describes '{}' acting as '{}'",
                next.true_identity().id,
                next.active_subject().id
            )));
        }

        self.session.replace(credential, next);
        tracing::debug!(subject = %context.true_identity().id, "session refreshed");
        Ok(())
    }

    /// Users the signed-in admin may impersonate, excluding themselves.
    pub async fn impersonation_candidates(&self) -> Result<Vec<DirectoryEntry>, SessionError> {
        let (credential, context) = self.session.current()?;
        if !context.true_identity().is_admin() {
            return Err(SessionError::Forbidden);
        }
        let self_id = &context.true_identity().id;
        let users = self.service.list_users(&credential).await?;
        Ok(users.into_iter().filter(|u| &u.id != self_id).collect())
    }

    /// End the session. Outstanding [`Session`] handles deny from now on.
    pub fn logout(self) {
        let subject = self.session.true_identity().id;
        self.session.revoke("signed out");
        tracing::info!(subject = %subject, "signed out");
    }

    fn revoke(&self, reason: String) -> SessionError {
        tracing::warn!("revoking session: {}", reason);
        self.session.revoke(reason.clone());
        SessionError::InconsistentState(reason)
    }
}

fn context_from_introspection(introspection: &Introspection) -> Result<SessionContext, SessionError> {
    let active = Subject::from_record(&introspection.active)?;
    let Some(original) = &introspection.original else {
        return Ok(SessionContext::new(active));
    };
    let true_identity = Subject::from_record(original)?;
    let started_at = introspection.started_at.ok_or_else(|| {
        SessionError::InconsistentState("impersonation credential has no start time".to_string())
    })?;
    SessionContext::new(true_identity).begin_impersonation(active, started_at, introspection.expires_at)
}

fn verify_start(context: &SessionContext, target: &SubjectId, grant: &CredentialGrant) -> Result<SessionContext, String> {
    let session = &grant.session;
    let Some(original) = &session.original else {
        return Err("impersonation grant does not name the original user".to_string());
    };
    let true_identity = Subject::from_record(original).map_err(|e| e.to_string())?;
    let effective = Subject::from_record(&session.active).map_err(|e| e.to_string())?;
    if true_identity.id != context.true_identity().id {
        return Err(format!(
            "impersonation grant names '{}' as original user, expected '{}'",
            true_identity.id,
            context.true_identity().id
        ));
    }
    if &effective.id != target {
        return Err(format!(
            "impersonation grant acts as '{}', expected '{}'",
            effective.id, target
        ));
    }

    let started_at = session.started_at.unwrap_or_else(Utc::now);
    SessionContext::new(true_identity)
        .begin_impersonation(effective, started_at, session.expires_at)
        .map_err(|e| e.to_string())
}

fn verify_stop(context: &SessionContext, grant: &CredentialGrant) -> Result<SessionContext, String> {
    let session = &grant.session;
    if session.original.is_some() {
        return Err("stop grant still encodes an impersonation".to_string());
    }
    let restored = Subject::from_record(&session.active).map_err(|e| e.to_string())?;
    context.end_impersonation(restored).map_err(|e| e.to_string())
}
