//! Canonical subject model.
//!
//! A [`Subject`] is what every authorization decision runs against. It is
//! rebuilt from the latest fetched [`UserRecord`] each time; nothing here is
//! meant to be cached across requests.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use classroom_core::{ClassId, DomainError, SubjectId};

use crate::membership::memberships_from_record;
use crate::record::UserRecord;
use crate::{Permission, Role};

/// A role held within one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassMembership {
    pub class_id: ClassId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,
}

impl ClassMembership {
    pub fn new(class_id: ClassId, role: Role) -> Self {
        Self {
            class_id,
            role,
            assigned_at: None,
            assigned_by: None,
        }
    }
}

/// Normalized user for authorization purposes.
///
/// # Invariants
/// - Memberships are unique by `class_id` and keep their normalized order.
/// - Direct permissions never contain the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: SubjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub global_roles: BTreeSet<Role>,
    memberships: Vec<ClassMembership>,
    direct_permissions: BTreeSet<Permission>,
}

impl Subject {
    pub fn new(id: SubjectId) -> Self {
        Self {
            id,
            display_name: None,
            email: None,
            global_roles: BTreeSet::new(),
            memberships: Vec::new(),
            direct_permissions: BTreeSet::new(),
        }
    }

    /// Build a subject from a raw directory record.
    ///
    /// Unknown roles, malformed permissions and unusable memberships are
    /// dropped (and logged); only a missing id fails.
    pub fn from_record(record: &UserRecord) -> Result<Self, DomainError> {
        let id = SubjectId::parse(&record.id)?;
        let mut subject = Subject::new(id);
        subject.display_name = record.display_name.clone().filter(|n| !n.trim().is_empty());
        subject.email = record.email.clone().filter(|e| !e.trim().is_empty());

        for name in record.roles.iter().chain(record.role.iter()) {
            match Role::parse(name) {
                Ok(role) => {
                    subject.global_roles.insert(role);
                }
                Err(e) => tracing::warn!(subject = %subject.id, "dropping global role: {}", e),
            }
        }

        for membership in memberships_from_record(record) {
            subject.push_membership(membership);
        }

        for raw in &record.permissions {
            match Permission::parse(raw) {
                Ok(permission) if permission.is_wildcard() => {
                    tracing::warn!(subject = %subject.id, "ignoring direct wildcard grant");
                }
                Ok(permission) => {
                    subject.direct_permissions.insert(permission);
                }
                Err(e) => tracing::warn!(subject = %subject.id, "dropping direct permission: {}", e),
            }
        }

        Ok(subject)
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_global_role(mut self, role: Role) -> Self {
        self.global_roles.insert(role);
        self
    }

    /// Adds a membership, replacing any existing one for the same class.
    pub fn with_membership(mut self, membership: ClassMembership) -> Self {
        match self
            .memberships
            .iter_mut()
            .find(|m| m.class_id == membership.class_id)
        {
            Some(existing) => *existing = membership,
            None => self.memberships.push(membership),
        }
        self
    }

    /// Adds a direct grant. The wildcard is only reachable through the admin
    /// role, so it is ignored here.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        if !permission.is_wildcard() {
            self.direct_permissions.insert(permission);
        }
        self
    }

    fn push_membership(&mut self, membership: ClassMembership) {
        if self.membership(&membership.class_id).is_none() {
            self.memberships.push(membership);
        }
    }

    pub fn memberships(&self) -> &[ClassMembership] {
        &self.memberships
    }

    pub fn membership(&self, class_id: &ClassId) -> Option<&ClassMembership> {
        self.memberships.iter().find(|m| &m.class_id == class_id)
    }

    pub fn direct_permissions(&self) -> &BTreeSet<Permission> {
        &self.direct_permissions
    }

    pub fn is_admin(&self) -> bool {
        self.global_roles.contains(&Role::Admin)
    }

    /// Display name, falling back to the id.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(self.id.as_str())
    }
}
