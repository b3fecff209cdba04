//! `classroom-auth` — authorization resolution for the classroom tool.
//!
//! Pure policy: no IO, no sessions. Subjects are built from raw user records
//! at the boundary and every access decision is a plain function call.

pub mod authorize;
pub mod claims;
pub mod config;
pub mod membership;
pub mod permissions;
pub mod record;
pub mod roles;
pub mod subject;
pub mod token;

pub use authorize::{
    AccessExplanation, AccessQuery, GrantSource, PermissionSet, can_access, can_access_in_class,
    can_access_named, classes_with_role, effective_permissions, explain_access, role_closure,
    role_for_class,
};
pub use claims::{CredentialClaims, CredentialKind, TokenError, validate_claims};
pub use config::TokenPolicy;
pub use membership::{
    Inconsistency, MembershipIssue, check_consistency, normalize_memberships, validate_memberships,
};
pub use permissions::Permission;
pub use record::{LegacyClassRoles, MembershipEntry, MembershipField, UserRecord};
pub use roles::{Grants, Role, inherited_roles, permissions_granted_by};
pub use subject::{ClassMembership, Subject};
pub use token::{Hs256TokenCodec, TokenCodec};
