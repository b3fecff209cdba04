//! Shared, read-mostly session state.
//!
//! Route guards and views read through [`Session`]; only the
//! [`ImpersonationManager`](crate::ImpersonationManager) writes. Credential and
//! context always change together under one lock, so no reader sees one
//! without the other.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::watch;

use classroom_auth::{AccessExplanation, AccessQuery, Subject, can_access, can_access_in_class, explain_access};
use classroom_core::ClassId;

use crate::context::{ImpersonationStatus, SessionContext};
use crate::error::SessionError;
use crate::service::Credential;

#[derive(Debug)]
struct Slot {
    credential: Option<Credential>,
    context: SessionContext,
    revoked: Option<String>,
}

#[derive(Debug)]
pub struct Session {
    slot: RwLock<Slot>,
    epoch: watch::Sender<u64>,
}

/// Session status, including whether the user must sign in again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub identity: ImpersonationStatus,
    pub requires_reauthentication: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_reason: Option<String>,
}

impl Session {
    pub fn new(credential: Credential, context: SessionContext) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            slot: RwLock::new(Slot {
                credential: Some(credential),
                context,
                revoked: None,
            }),
            epoch,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Access check against the active subject. Always denies once revoked.
    pub fn can_access(&self, query: &AccessQuery) -> bool {
        let slot = self.read();
        slot.revoked.is_none() && can_access(Some(slot.context.active_subject()), query)
    }

    pub fn can_access_in_class(&self, class_id: &ClassId, query: &AccessQuery) -> bool {
        let slot = self.read();
        slot.revoked.is_none() && can_access_in_class(Some(slot.context.active_subject()), class_id, query)
    }

    pub fn explain(&self, query: &AccessQuery) -> AccessExplanation {
        let slot = self.read();
        let subject = slot.revoked.is_none().then(|| slot.context.active_subject());
        explain_access(subject, query)
    }

    pub fn active_subject(&self) -> Subject {
        self.read().context.active_subject().clone()
    }

    pub fn true_identity(&self) -> Subject {
        self.read().context.true_identity().clone()
    }

    pub fn is_impersonating(&self) -> bool {
        self.read().context.is_impersonating()
    }

    pub fn context(&self) -> SessionContext {
        self.read().context.clone()
    }

    pub fn credential(&self) -> Option<Credential> {
        self.read().credential.clone()
    }

    pub fn requires_reauthentication(&self) -> bool {
        self.read().revoked.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        let slot = self.read();
        SessionStatus {
            identity: slot.context.status(),
            requires_reauthentication: slot.revoked.is_some(),
            revoked_reason: slot.revoked.clone(),
        }
    }

    /// Receives the new epoch after every identity change, so cached
    /// authorization decisions can be recomputed.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Credential and context for a remote call.
    pub(crate) fn current(&self) -> Result<(Credential, SessionContext), SessionError> {
        let slot = self.read();
        match (&slot.revoked, &slot.credential) {
            (None, Some(credential)) => Ok((credential.clone(), slot.context.clone())),
            (Some(reason), _) => Err(SessionError::InconsistentState(reason.clone())),
            (None, None) => Err(SessionError::InconsistentState("no credential".to_string())),
        }
    }

    pub(crate) fn replace(&self, credential: Credential, context: SessionContext) {
        {
            let mut slot = self.write();
            slot.credential = Some(credential);
            slot.context = context;
            slot.revoked = None;
        }
        self.bump();
    }

    /// Drop the credential and deny everything until the user signs in again.
    pub(crate) fn revoke(&self, reason: impl Into<String>) {
        {
            let mut slot = self.write();
            slot.credential = None;
            slot.revoked = Some(reason.into());
        }
        self.bump();
    }

    fn bump(&self) {
        self.epoch.send_modify(|epoch| *epoch += 1);
    }
}
