//! In-process [`AuthService`] backed by a user map and HS256 credentials.
//!
//! Used for local development and tests. Faults can be queued to exercise
//! the manager's failure handling.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use classroom_auth::{CredentialClaims, Hs256TokenCodec, Subject, TokenCodec, TokenPolicy, UserRecord};
use classroom_core::SubjectId;

use crate::service::{AuthService, Credential, CredentialGrant, DirectoryEntry, Introspection, RemoteError};

/// A fault applied to the next credential exchange.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail the exchange with this error.
    Fail(RemoteError),
    /// Succeed, but report this record as the acting user.
    MisreportActive(UserRecord),
    /// Succeed, but omit the original user from the grant.
    DropOriginal,
}

#[derive(Debug)]
pub struct InMemoryAuthService {
    codec: Hs256TokenCodec,
    policy: TokenPolicy,
    users: Mutex<BTreeMap<String, UserRecord>>,
    faults: Mutex<VecDeque<Fault>>,
    latency: Mutex<Option<Duration>>,
    exchanges: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryAuthService {
    pub fn new(policy: TokenPolicy) -> Self {
        Self {
            codec: Hs256TokenCodec::new(&policy.secret),
            policy,
            users: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            exchanges: AtomicUsize::new(0),
        }
    }

    pub fn with_users(self, users: impl IntoIterator<Item = UserRecord>) -> Self {
        {
            let mut map = lock(&self.users);
            for user in users {
                map.insert(user.id.clone(), user);
            }
        }
        self
    }

    pub fn upsert_user(&self, user: UserRecord) {
        lock(&self.users).insert(user.id.clone(), user);
    }

    pub fn remove_user(&self, id: &str) -> Option<UserRecord> {
        lock(&self.users).remove(id)
    }

    /// Issue a plain session credential, as a password login would.
    pub fn login(&self, id: &str) -> Result<Credential, RemoteError> {
        let record = self.user(id)?;
        let sub = SubjectId::parse(&record.id).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        self.issue(&CredentialClaims::session(sub, Utc::now(), self.policy.session_ttl))
    }

    /// Queue a fault for a later start/stop exchange.
    pub fn inject(&self, fault: Fault) {
        lock(&self.faults).push_back(fault);
    }

    /// Delay every exchange by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Start/stop exchanges received so far, including failed ones.
    pub fn exchange_count(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn user(&self, id: &str) -> Result<UserRecord, RemoteError> {
        lock(&self.users)
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    fn issue(&self, claims: &CredentialClaims) -> Result<Credential, RemoteError> {
        self.codec
            .issue(claims)
            .map(Credential::new)
            .map_err(|e| RemoteError::Unavailable(e.to_string()))
    }

    fn claims(&self, credential: &Credential) -> Result<CredentialClaims, RemoteError> {
        self.codec
            .validate(credential.expose(), Utc::now())
            .map_err(|e| RemoteError::Unauthenticated(e.to_string()))
    }

    fn require_admin(&self, id: &str) -> Result<UserRecord, RemoteError> {
        let record = self
            .user(id)
            .map_err(|_| RemoteError::Unauthenticated(format!("unknown user '{}'", id)))?;
        let subject = Subject::from_record(&record).map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        if subject.is_admin() {
            Ok(record)
        } else {
            Err(RemoteError::Forbidden)
        }
    }

    async fn begin_exchange(&self) -> Option<Fault> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        lock(&self.faults).pop_front()
    }

    fn apply(fault: Option<Fault>, mut grant: CredentialGrant) -> Result<CredentialGrant, RemoteError> {
        match fault {
            None => {}
            Some(Fault::Fail(e)) => return Err(e),
            Some(Fault::MisreportActive(record)) => grant.session.active = record,
            Some(Fault::DropOriginal) => grant.session.original = None,
        }
        Ok(grant)
    }
}

#[async_trait]
impl AuthService for InMemoryAuthService {
    async fn introspect(&self, credential: &Credential) -> Result<Introspection, RemoteError> {
        let claims = self.claims(credential)?;
        let active = self
            .user(claims.sub.as_str())
            .map_err(|_| RemoteError::Unauthenticated(format!("unknown user '{}'", claims.sub)))?;
        let original = claims
            .original_sub
            .as_ref()
            .map(|id| self.user(id.as_str()))
            .transpose()?;
        Ok(Introspection {
            active,
            original,
            started_at: claims.impersonation_started_at,
            expires_at: claims.is_impersonation().then_some(claims.exp),
        })
    }

    async fn start_impersonation(
        &self,
        credential: &Credential,
        target: &SubjectId,
    ) -> Result<CredentialGrant, RemoteError> {
        let fault = self.begin_exchange().await;
        let claims = self.claims(credential)?;
        if claims.is_impersonation() {
            return Err(RemoteError::AlreadyImpersonating);
        }
        let admin = self.require_admin(claims.sub.as_str())?;
        if target == &claims.sub {
            return Err(RemoteError::Forbidden);
        }
        let target_record = self.user(target.as_str())?;

        let now = Utc::now();
        let issued = CredentialClaims::impersonation(
            target.clone(),
            claims.sub.clone(),
            now,
            self.policy.impersonation_ttl,
        );
        let grant = CredentialGrant {
            credential: self.issue(&issued)?,
            session: Introspection {
                active: target_record,
                original: Some(admin),
                started_at: Some(now),
                expires_at: Some(issued.exp),
            },
        };
        tracing::info!(admin = %claims.sub, target_id = %target, "issued impersonation credential");
        Self::apply(fault, grant)
    }

    async fn stop_impersonation(&self, credential: &Credential) -> Result<CredentialGrant, RemoteError> {
        let fault = self.begin_exchange().await;
        let claims = self.claims(credential)?;
        let Some(original) = claims.original_sub.as_ref().filter(|_| claims.is_impersonation()) else {
            return Err(RemoteError::NotImpersonating);
        };
        let record = self.user(original.as_str())?;

        let issued = CredentialClaims::session(original.clone(), Utc::now(), self.policy.session_ttl);
        let grant = CredentialGrant {
            credential: self.issue(&issued)?,
            session: Introspection {
                active: record,
                original: None,
                started_at: None,
                expires_at: None,
            },
        };
        Self::apply(fault, grant)
    }

    async fn list_users(&self, credential: &Credential) -> Result<Vec<DirectoryEntry>, RemoteError> {
        let claims = self.claims(credential)?;
        let caller = claims.original_sub.as_ref().unwrap_or(&claims.sub);
        self.require_admin(caller.as_str())?;

        let users = lock(&self.users);
        let entries = users
            .values()
            .filter_map(|record| {
                let subject = Subject::from_record(record).ok()?;
                Some(DirectoryEntry {
                    display_name: subject.label().to_string(),
                    email: subject.email.clone(),
                    global_roles: subject.global_roles.iter().map(|r| r.as_str().to_string()).collect(),
                    id: subject.id,
                })
            })
            .collect();
        Ok(entries)
    }
}
