//! Report builders behind the `classroom-authz` commands.
//!
//! Each function turns parsed input into a serializable report; `main.rs`
//! only handles argument parsing, file I/O and printing.

use std::sync::Arc;

use anyhow::{Context, bail};
use serde::Serialize;

use classroom_auth::roles::{ALL_ROLES, EffectiveGrants, effective_permissions as role_permissions, inherited_roles};
use classroom_auth::{
    AccessExplanation, AccessQuery, ClassMembership, Inconsistency, MembershipIssue, Permission, Role,
    Subject, TokenPolicy, UserRecord, can_access_in_class, check_consistency, explain_access,
    role_for_class, validate_memberships,
};
use classroom_core::ClassId;
use classroom_session::{ImpersonationManager, InMemoryAuthService, SessionStatus};

pub fn parse_record(json: &str) -> anyhow::Result<UserRecord> {
    serde_json::from_str(json).context("parsing user record")
}

pub fn parse_directory(json: &str) -> anyhow::Result<Vec<UserRecord>> {
    serde_json::from_str(json).context("parsing user directory (expected a JSON array of records)")
}

pub fn build_query(role: Option<&str>, permission: Option<&str>) -> anyhow::Result<AccessQuery> {
    let mut query = AccessQuery::authenticated();
    if let Some(role) = role {
        query.required_role = Some(Role::parse(role)?);
    }
    if let Some(permission) = permission {
        query.required_permission = Some(Permission::parse(permission)?);
    }
    Ok(query)
}

#[derive(Debug, Serialize)]
pub struct ClassCheck {
    pub class_id: ClassId,
    pub granted: bool,
    pub role_in_class: Option<Role>,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    #[serde(flatten)]
    pub explanation: AccessExplanation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_check: Option<ClassCheck>,
}

pub fn check(record: &UserRecord, query: &AccessQuery, class_id: Option<&str>) -> anyhow::Result<CheckReport> {
    let subject = Subject::from_record(record)?;
    let class_check = class_id
        .map(ClassId::parse)
        .transpose()?
        .map(|class_id| ClassCheck {
            granted: can_access_in_class(Some(&subject), &class_id, query),
            role_in_class: role_for_class(&subject, &class_id),
            class_id,
        });
    Ok(CheckReport {
        explanation: explain_access(Some(&subject), query),
        class_check,
    })
}

#[derive(Debug, Serialize)]
pub struct NormalizeReport {
    pub subject: Subject,
    pub memberships: Vec<ClassMembership>,
    pub issues: Vec<MembershipIssue>,
    pub inconsistencies: Vec<Inconsistency>,
}

pub fn normalize(record: &UserRecord) -> anyhow::Result<NormalizeReport> {
    let subject = Subject::from_record(record)?;
    Ok(NormalizeReport {
        memberships: subject.memberships().to_vec(),
        issues: record.modern_memberships().map(validate_memberships).unwrap_or_default(),
        inconsistencies: check_consistency(record),
        subject,
    })
}

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub role: Role,
    pub description: &'static str,
    pub inherits: Vec<Role>,
    pub wildcard: bool,
    pub permissions: Vec<&'static str>,
}

pub fn catalog() -> Vec<CatalogEntry> {
    ALL_ROLES
        .iter()
        .map(|&role| {
            let (wildcard, permissions) = match role_permissions(role) {
                EffectiveGrants::All => (true, Vec::new()),
                EffectiveGrants::Only(list) => (false, list),
            };
            CatalogEntry {
                role,
                description: role.description(),
                inherits: inherited_roles(role).iter().copied().filter(|r| *r != role).collect(),
                wildcard,
                permissions,
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct ImpersonationReport {
    pub started: SessionStatus,
    pub stopped: SessionStatus,
}

/// Run a full start/stop cycle against an in-memory directory.
pub async fn rehearse_impersonation(
    users: Vec<UserRecord>,
    policy: TokenPolicy,
    admin: &str,
    target: &str,
) -> anyhow::Result<ImpersonationReport> {
    if !users.iter().any(|u| u.id == admin) {
        bail!("user '{}' is not in the directory", admin);
    }
    let service = Arc::new(InMemoryAuthService::new(policy).with_users(users));
    let credential = service.login(admin)?;
    let manager = ImpersonationManager::establish(service, credential).await?;

    manager.start_impersonation(target).await?;
    let started = manager.session().status();
    manager.stop_impersonation().await?;
    let stopped = manager.session().status();

    manager.logout();
    Ok(ImpersonationReport { started, stopped })
}
