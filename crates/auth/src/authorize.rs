use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use classroom_core::{ClassId, SubjectId};

use crate::roles::{Grants, inherited_roles, permissions_granted_by};
use crate::{Permission, Role, Subject};

/// A role and/or permission requirement.
///
/// Omitting both means "any authenticated subject". When both are present,
/// each must be satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_permission: Option<Permission>,
}

impl AccessQuery {
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn role(role: Role) -> Self {
        Self {
            required_role: Some(role),
            required_permission: None,
        }
    }

    pub fn permission(permission: Permission) -> Self {
        Self {
            required_role: None,
            required_permission: Some(permission),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.required_role = Some(role);
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.required_permission = Some(permission);
        self
    }
}

/// Where a held role comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldRole<'a> {
    class_id: Option<&'a ClassId>,
    role: Role,
}

fn held_roles<'a>(subject: &'a Subject, scope: Option<&ClassId>) -> Vec<HeldRole<'a>> {
    let global = subject
        .global_roles
        .iter()
        .map(|role| HeldRole { class_id: None, role: *role });
    let classes = subject
        .memberships()
        .iter()
        .filter(|m| scope.is_none_or(|c| &m.class_id == c))
        .map(|m| HeldRole { class_id: Some(&m.class_id), role: m.role });
    global.chain(classes).collect()
}

/// The source that satisfied (part of) a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum GrantSource {
    AdminWildcard,
    Authenticated,
    GlobalRole { role: Role },
    ClassRole { class_id: ClassId, role: Role },
    DirectGrant { permission: Permission },
}

impl GrantSource {
    fn from_held(held: &HeldRole<'_>) -> Self {
        match held.class_id {
            Some(class_id) => GrantSource::ClassRole { class_id: class_id.clone(), role: held.role },
            None => GrantSource::GlobalRole { role: held.role },
        }
    }
}

fn role_source(held: &[HeldRole<'_>], required: Role) -> Option<GrantSource> {
    held.iter()
        .find(|h| inherited_roles(h.role).contains(&required))
        .map(GrantSource::from_held)
}

fn permission_source(
    subject: &Subject,
    held: &[HeldRole<'_>],
    required: &Permission,
) -> Option<GrantSource> {
    let by_role = held.iter().find(|h| {
        inherited_roles(h.role)
            .iter()
            .any(|r| permissions_granted_by(*r).contains(required.as_str()))
    });
    if let Some(h) = by_role {
        return Some(GrantSource::from_held(h));
    }
    subject
        .direct_permissions()
        .contains(required)
        .then(|| GrantSource::DirectGrant { permission: required.clone() })
}

#[derive(Debug)]
struct Evaluation {
    granted: bool,
    matched: Vec<GrantSource>,
    missing_role: Option<Role>,
    missing_permission: Option<Permission>,
}

fn evaluate(subject: Option<&Subject>, query: &AccessQuery, scope: Option<&ClassId>) -> Evaluation {
    let Some(subject) = subject else {
        return Evaluation {
            granted: false,
            matched: Vec::new(),
            missing_role: query.required_role,
            missing_permission: query.required_permission.clone(),
        };
    };

    if subject.is_admin() {
        return Evaluation {
            granted: true,
            matched: vec![GrantSource::AdminWildcard],
            missing_role: None,
            missing_permission: None,
        };
    }

    let held = held_roles(subject, scope);
    let mut eval = Evaluation {
        granted: true,
        matched: Vec::new(),
        missing_role: None,
        missing_permission: None,
    };

    if let Some(required) = query.required_role {
        match role_source(&held, required) {
            Some(source) => eval.matched.push(source),
            None => {
                eval.granted = false;
                eval.missing_role = Some(required);
            }
        }
    }

    if let Some(required) = &query.required_permission {
        match permission_source(subject, &held, required) {
            Some(source) => eval.matched.push(source),
            None => {
                eval.granted = false;
                eval.missing_permission = Some(required.clone());
            }
        }
    }

    if eval.granted && eval.matched.is_empty() {
        eval.matched.push(GrantSource::Authenticated);
    }
    eval
}

/// Decide whether `subject` satisfies `query`.
///
/// - No subject: denied.
/// - Global admin: granted, whatever the query.
/// - Role requirement: met by the closure of any global role or of any single
///   class membership's role, regardless of which class is in context.
/// - Permission requirement: met by any role in the full closure, or a direct grant.
///
/// Pure and allocation-light; safe to call on every render.
pub fn can_access(subject: Option<&Subject>, query: &AccessQuery) -> bool {
    evaluate(subject, query, None).granted
}

/// String-typed entry point for route guards.
///
/// A role or permission name that does not parse can never be held, so it
/// denies everyone except admins.
pub fn can_access_named(
    subject: Option<&Subject>,
    required_role: Option<&str>,
    required_permission: Option<&str>,
) -> bool {
    let Some(subject) = subject else {
        return false;
    };
    if subject.is_admin() {
        return true;
    }

    let mut query = AccessQuery::authenticated();
    if let Some(name) = required_role {
        match Role::parse(name) {
            Ok(role) => query.required_role = Some(role),
            Err(_) => return false,
        }
    }
    if let Some(name) = required_permission {
        match Permission::parse(name) {
            Ok(permission) => query.required_permission = Some(permission),
            Err(_) => return false,
        }
    }
    can_access(Some(subject), &query)
}

/// Class-scoped variant of [`can_access`]: only global roles, the membership
/// for `class_id`, and direct grants count.
pub fn can_access_in_class(subject: Option<&Subject>, class_id: &ClassId, query: &AccessQuery) -> bool {
    evaluate(subject, query, Some(class_id)).granted
}

/// The subject's role in one class. Global admins act as instructors everywhere.
pub fn role_for_class(subject: &Subject, class_id: &ClassId) -> Option<Role> {
    if subject.is_admin() {
        return Some(Role::Instructor);
    }
    subject.membership(class_id).map(|m| m.role)
}

/// Classes whose membership role is at least `min_role`, in membership order.
pub fn classes_with_role(subject: &Subject, min_role: Role) -> Vec<ClassId> {
    subject
        .memberships()
        .iter()
        .filter(|m| m.role.inherits(min_role))
        .map(|m| m.class_id.clone())
        .collect()
}

/// Every role reachable from the subject's global and class roles.
pub fn role_closure(subject: &Subject) -> BTreeSet<Role> {
    held_roles(subject, None)
        .iter()
        .flat_map(|h| inherited_roles(h.role).iter().copied())
        .collect()
}

/// Effective permissions of a subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    All,
    Only(BTreeSet<Permission>),
}

impl PermissionSet {
    pub fn contains(&self, permission: &Permission) -> bool {
        match self {
            PermissionSet::All => true,
            PermissionSet::Only(set) => set.contains(permission),
        }
    }

    pub fn names(&self) -> Vec<String> {
        match self {
            PermissionSet::All => vec![crate::permissions::WILDCARD.to_string()],
            PermissionSet::Only(set) => set.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Union of role grants over the full closure, plus direct grants.
pub fn effective_permissions(subject: &Subject) -> PermissionSet {
    let mut set: BTreeSet<Permission> = BTreeSet::new();
    for role in role_closure(subject) {
        match permissions_granted_by(role) {
            Grants::All => return PermissionSet::All,
            Grants::Only(list) => set.extend(list.iter().map(|p| Permission::from_static(p))),
        }
    }
    set.extend(subject.direct_permissions().iter().cloned());
    PermissionSet::Only(set)
}

// ─────────────────────────────────────────────────────────────────────────────
// Access Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed, serializable explanation of an access decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub query: AccessQuery,
    pub granted: bool,
    pub reason: String,
    /// Sources that satisfied each part of the query.
    pub matched: Vec<GrantSource>,
    pub subject: Option<SubjectState>,
    pub denial_reason: Option<DenialReason>,
}

/// Authorization-relevant state of the subject being checked.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectState {
    pub subject_id: SubjectId,
    pub global_roles: Vec<Role>,
    pub class_roles: Vec<(ClassId, Role)>,
    pub role_closure: Vec<Role>,
    pub effective_permissions: Vec<String>,
    pub has_wildcard: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    Unauthenticated,
    MissingRole,
    MissingPermission,
    MissingRoleAndPermission,
}

/// Explain why `can_access(subject, query)` returns what it does.
pub fn explain_access(subject: Option<&Subject>, query: &AccessQuery) -> AccessExplanation {
    let eval = evaluate(subject, query, None);

    let Some(subject) = subject else {
        return AccessExplanation {
            query: query.clone(),
            granted: false,
            reason: "No authenticated subject".to_string(),
            matched: Vec::new(),
            subject: None,
            denial_reason: Some(DenialReason {
                kind: DenialKind::Unauthenticated,
                message: "Access requires an authenticated subject".to_string(),
                suggestions: vec!["Sign in before requesting this resource".to_string()],
            }),
        };
    };

    let permissions = effective_permissions(subject);
    let state = SubjectState {
        subject_id: subject.id.clone(),
        global_roles: subject.global_roles.iter().copied().collect(),
        class_roles: subject
            .memberships()
            .iter()
            .map(|m| (m.class_id.clone(), m.role))
            .collect(),
        role_closure: role_closure(subject).into_iter().collect(),
        has_wildcard: permissions == PermissionSet::All,
        effective_permissions: permissions.names(),
    };

    if eval.granted {
        let reason = match eval.matched.first() {
            Some(GrantSource::AdminWildcard) => {
                "Subject holds the global admin role (wildcard permission)".to_string()
            }
            Some(GrantSource::Authenticated) => "Subject is authenticated".to_string(),
            _ => format!("Granted by {}", describe_sources(&eval.matched)),
        };
        return AccessExplanation {
            query: query.clone(),
            granted: true,
            reason,
            matched: eval.matched,
            subject: Some(state),
            denial_reason: None,
        };
    }

    let mut suggestions = Vec::new();
    let mut missing = Vec::new();
    if let Some(role) = eval.missing_role {
        missing.push(format!("role '{}'", role));
        suggestions.push(format!(
            "Assign the '{}' role (or a role inheriting it) globally or in a class",
            role
        ));
    }
    if let Some(permission) = &eval.missing_permission {
        missing.push(format!("permission '{}'", permission));
        let granting: Vec<&str> = crate::roles::ALL_ROLES
            .iter()
            .rev()
            .filter(|r| !permissions_granted_by(**r).is_wildcard())
            .filter(|r| permissions_granted_by(**r).contains(permission.as_str()))
            .map(|r| r.as_str())
            .collect();
        if !granting.is_empty() {
            suggestions.push(format!("Roles granting '{}': {:?}", permission, granting));
        }
        suggestions.push(format!("Grant the '{}' permission directly", permission));
    }
    let kind = match (eval.missing_role.is_some(), eval.missing_permission.is_some()) {
        (true, true) => DenialKind::MissingRoleAndPermission,
        (true, false) => DenialKind::MissingRole,
        _ => DenialKind::MissingPermission,
    };

    AccessExplanation {
        query: query.clone(),
        granted: false,
        reason: format!("Subject is missing {}", missing.join(" and ")),
        matched: eval.matched,
        subject: Some(state),
        denial_reason: Some(DenialReason {
            kind,
            message: format!("Missing required {}", missing.join(" and ")),
            suggestions,
        }),
    }
}

fn describe_sources(sources: &[GrantSource]) -> String {
    sources
        .iter()
        .map(|s| match s {
            GrantSource::AdminWildcard => "admin wildcard".to_string(),
            GrantSource::Authenticated => "authentication".to_string(),
            GrantSource::GlobalRole { role } => format!("global role '{}'", role),
            GrantSource::ClassRole { class_id, role } => {
                format!("role '{}' in class '{}'", role, class_id)
            }
            GrantSource::DirectGrant { permission } => format!("direct grant '{}'", permission),
        })
        .collect::<Vec<_>>()
        .join(" and ")
}
