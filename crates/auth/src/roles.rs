//! Role-Permission Catalog.
//!
//! Roles form a single inheritance chain: admin ⊇ instructor ⊇ ta ⊇ student.
//! The tables below are fixed at build time; every lookup is a total function.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions;

/// Role identifier used for RBAC.
///
/// Ordered from least to most privileged, so `Role::Ta < Role::Instructor`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Ta,
    Instructor,
    Admin,
}

/// All roles, most privileged first.
pub const ALL_ROLES: [Role; 4] = [Role::Admin, Role::Instructor, Role::Ta, Role::Student];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Instructor => "instructor",
            Role::Ta => "ta",
            Role::Student => "student",
        }
    }

    /// Parse a stored role name.
    ///
    /// Case-insensitive. Accepts the legacy names `user` (student) and
    /// `grader` (ta) still present in older user records.
    pub fn parse(raw: &str) -> Result<Self, UnknownRole> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "instructor" => Ok(Role::Instructor),
            "ta" | "grader" => Ok(Role::Ta),
            "student" | "user" => Ok(Role::Student),
            _ => Err(UnknownRole(raw.to_string())),
        }
    }

    /// Whether this role's closure contains `other`.
    pub fn inherits(&self, other: Role) -> bool {
        inherited_roles(*self).contains(&other)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Global administrator with every permission in every class",
            Role::Instructor => "Runs a class: quizzes, enrollment, grading and TA assignment",
            Role::Ta => "Assists a class: authors quizzes and views student work",
            Role::Student => "Takes quizzes and views their own data",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Permissions granted directly by a role (before inheritance).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Grants {
    /// Wildcard: every permission, including ones not in the catalog.
    All,
    Only(&'static [&'static str]),
}

impl Grants {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Grants::All)
    }

    pub fn contains(&self, permission: &str) -> bool {
        match self {
            Grants::All => true,
            Grants::Only(list) => list.contains(&permission),
        }
    }

    /// Explicitly enumerated permissions (empty for the wildcard).
    pub fn listed(&self) -> &'static [&'static str] {
        match self {
            Grants::All => &[],
            Grants::Only(list) => list,
        }
    }
}

const STUDENT_GRANTS: &[&str] = &[
    permissions::QUIZ_VIEW,
    permissions::QUIZ_ATTEMPT,
    permissions::OWN_DATA_VIEW,
];

const TA_GRANTS: &[&str] = &[
    permissions::QUIZ_VIEW,
    permissions::QUIZ_CREATE,
    permissions::QUIZ_MODIFY,
    permissions::STUDENT_VIEW,
];

const INSTRUCTOR_GRANTS: &[&str] = &[
    permissions::QUIZ_VIEW,
    permissions::QUIZ_CREATE,
    permissions::QUIZ_MODIFY,
    permissions::QUIZ_DELETE,
    permissions::STUDENT_VIEW,
    permissions::STUDENT_MANAGE,
    permissions::CLASS_MANAGE_ENROLLMENT,
    permissions::ROLE_GRANT_TA,
    permissions::CLASS_ADD_INSTRUCTOR,
];

/// Roles inherited by `role`, the role itself first, then descending privilege.
pub fn inherited_roles(role: Role) -> &'static [Role] {
    match role {
        Role::Admin => &[Role::Admin, Role::Instructor, Role::Ta, Role::Student],
        Role::Instructor => &[Role::Instructor, Role::Ta, Role::Student],
        Role::Ta => &[Role::Ta, Role::Student],
        Role::Student => &[Role::Student],
    }
}

/// Permissions granted directly by `role`. Only admin holds the wildcard.
pub fn permissions_granted_by(role: Role) -> Grants {
    match role {
        Role::Admin => Grants::All,
        Role::Instructor => Grants::Only(INSTRUCTOR_GRANTS),
        Role::Ta => Grants::Only(TA_GRANTS),
        Role::Student => Grants::Only(STUDENT_GRANTS),
    }
}

/// Union of the grants of every role in `role`'s closure, in catalog order.
///
/// Returns `Grants::All` when the closure contains admin.
pub fn effective_permissions(role: Role) -> EffectiveGrants {
    let mut listed: Vec<&'static str> = Vec::new();
    for inherited in inherited_roles(role) {
        match permissions_granted_by(*inherited) {
            Grants::All => return EffectiveGrants::All,
            Grants::Only(list) => {
                for perm in list {
                    if !listed.contains(perm) {
                        listed.push(perm);
                    }
                }
            }
        }
    }
    EffectiveGrants::Only(listed)
}

/// Owned counterpart of [`Grants`] for computed unions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveGrants {
    All,
    Only(Vec<&'static str>),
}

impl EffectiveGrants {
    pub fn contains(&self, permission: &str) -> bool {
        match self {
            EffectiveGrants::All => true,
            EffectiveGrants::Only(list) => list.contains(&permission),
        }
    }
}

/// Name-based variant of [`inherited_roles`]: unknown names yield an empty set.
pub fn inherited_roles_by_name(name: &str) -> Vec<Role> {
    Role::parse(name)
        .map(|role| inherited_roles(role).to_vec())
        .unwrap_or_default()
}

/// Name-based variant of [`permissions_granted_by`]: unknown names grant nothing.
pub fn permissions_granted_by_name(name: &str) -> Grants {
    Role::parse(name)
        .map(permissions_granted_by)
        .unwrap_or(Grants::Only(&[]))
}
