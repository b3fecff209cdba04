use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel meaning "every permission". Only the admin role carries it.
pub const WILDCARD: &str = "*";

pub const QUIZ_VIEW: &str = "quiz.view";
pub const QUIZ_ATTEMPT: &str = "quiz.attempt";
pub const QUIZ_CREATE: &str = "quiz.create";
pub const QUIZ_MODIFY: &str = "quiz.modify";
pub const QUIZ_DELETE: &str = "quiz.delete";
pub const STUDENT_VIEW: &str = "student.view";
pub const STUDENT_MANAGE: &str = "student.manage";
pub const CLASS_MANAGE_ENROLLMENT: &str = "class.manage_enrollment";
pub const CLASS_ADD_INSTRUCTOR: &str = "class.add_instructor";
pub const ROLE_GRANT_TA: &str = "role.grant_ta";
pub const OWN_DATA_VIEW: &str = "own_data.view";

/// Permission identifier in `category.action` form (e.g. `"quiz.delete"`).
///
/// Nested actions (`"admin.users.list"`) are allowed; the category is the
/// first segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission is empty")]
    Empty,

    #[error("permission '{0}' is not in category.action form")]
    Malformed(String),
}

impl Permission {
    /// Catalog constructor for known-good static names.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Parse and validate a permission name. The wildcard is accepted here;
    /// callers that must not hand it out check [`Permission::is_wildcard`].
    pub fn parse(raw: &str) -> Result<Self, PermissionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PermissionError::Empty);
        }
        if trimmed == WILDCARD {
            return Ok(Self::wildcard());
        }
        let mut segments = trimmed.split('.');
        let well_formed = trimmed.contains('.')
            && segments.all(|s| !s.is_empty() && !s.chars().any(char::is_whitespace));
        if !well_formed {
            return Err(PermissionError::Malformed(trimmed.to_string()));
        }
        Ok(Self(Cow::Owned(trimmed.to_string())))
    }

    pub const fn wildcard() -> Self {
        Self::from_static(WILDCARD)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == WILDCARD
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_names() {
        assert_eq!(Permission::parse(" quiz.delete ").unwrap().as_str(), "quiz.delete");
        assert_eq!(Permission::parse("admin.users.list").unwrap().as_str(), "admin.users.list");
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(Permission::parse("  "), Err(PermissionError::Empty));
        assert!(matches!(Permission::parse("quiz"), Err(PermissionError::Malformed(_))));
        assert!(matches!(Permission::parse("quiz."), Err(PermissionError::Malformed(_))));
        assert!(matches!(Permission::parse(".delete"), Err(PermissionError::Malformed(_))));
        assert!(matches!(Permission::parse("quiz. delete"), Err(PermissionError::Malformed(_))));
    }

    #[test]
    fn wildcard_is_recognized() {
        let p = Permission::parse("*").unwrap();
        assert!(p.is_wildcard());
        assert_eq!(p, Permission::wildcard());
    }
}
