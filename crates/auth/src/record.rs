//! Raw user record as fetched from the user directory.
//!
//! Records accumulated three membership shapes over the years:
//! - `class_memberships`: `[{class_id, role, assigned_at, assigned_by}]` (current),
//!   or an older `{class_id: role}` map stored under the same key
//! - `classRoles`: `{class_id: role}` or `{class_id: {role}}` (legacy)
//! - `accessible_classes`: `[class_id]` with no role at all (oldest)
//!
//! This type only mirrors what is stored. Nothing outside the normalizer
//! should read it; see [`crate::Subject::from_record`].

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Role assigned when a stored membership omits it.
pub const DEFAULT_MEMBERSHIP_ROLE: &str = "student";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, alias = "displayName", alias = "name", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Global roles. Some records store a single string here.
    #[serde(default, deserialize_with = "one_or_many")]
    pub roles: Vec<String>,

    /// Legacy single global role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, rename = "classRoles", skip_serializing_if = "Option::is_none")]
    pub class_roles: Option<LegacyClassRoles>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_memberships: Option<MembershipField>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessible_classes: Vec<String>,

    /// Directly granted permissions, outside role inheritance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
}

impl UserRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// The modern membership list, if the record stores one.
    pub fn modern_memberships(&self) -> Option<&[MembershipEntry]> {
        match &self.class_memberships {
            Some(MembershipField::List(entries)) => Some(entries),
            _ => None,
        }
    }
}

/// The `class_memberships` field: either the current list shape or the older map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MembershipField {
    List(Vec<MembershipEntry>),
    Map(LegacyClassRoles),
}

/// One entry of the modern membership list, as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipEntry {
    #[serde(default)]
    pub class_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub assigned_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,
}

impl MembershipEntry {
    pub fn new(class_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            role: Some(role.into()),
            ..Default::default()
        }
    }

    pub fn role_name(&self) -> &str {
        match self.role.as_deref() {
            Some(role) if !role.trim().is_empty() => role,
            _ => DEFAULT_MEMBERSHIP_ROLE,
        }
    }
}

/// Legacy `class_id -> role_name` mapping, in stored order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyClassRoles(Vec<(String, String)>);

impl LegacyClassRoles {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut roles = Self::default();
        for (class_id, role) in pairs {
            roles.insert(class_id.into(), role.into());
        }
        roles
    }

    /// Map semantics: a repeated key overwrites in place.
    fn insert(&mut self, class_id: String, role: String) {
        match self.0.iter_mut().find(|(existing, _)| *existing == class_id) {
            Some(slot) => slot.1 = role,
            None => self.0.push((class_id, role)),
        }
    }

    pub fn get(&self, class_id: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == class_id)
            .map(|(_, role)| role.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(c, r)| (c.as_str(), r.as_str()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyRoleValue {
    Name(String),
    Nested {
        #[serde(default)]
        role: Option<String>,
    },
}

impl Serialize for LegacyClassRoles {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (class_id, role) in &self.0 {
            map.serialize_entry(class_id, role)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LegacyClassRoles {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = LegacyClassRoles;

            fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("a map of class id to role")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut roles = LegacyClassRoles::default();
                while let Some((class_id, value)) =
                    access.next_entry::<String, Option<LegacyRoleValue>>()?
                {
                    let role = match value {
                        Some(LegacyRoleValue::Name(name)) => Some(name),
                        Some(LegacyRoleValue::Nested { role }) => role,
                        None => None,
                    }
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MEMBERSHIP_ROLE.to_string());
                    roles.insert(class_id, role);
                }
                Ok(roles)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<Option<String>>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(role)) => vec![role],
        Some(OneOrMany::Many(roles)) => roles.into_iter().flatten().collect(),
    })
}

/// Accepts RFC 3339, or naive ISO-8601 (assumed UTC) as written by older
/// tooling. Anything else reads as absent rather than failing the record.
fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    Ok(parse_timestamp(&raw))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_map_keeps_stored_order() {
        let roles: LegacyClassRoles =
            serde_json::from_str(r#"{"zeta": "ta", "alpha": "student", "mid": {"role": "instructor"}}"#)
                .unwrap();
        let order: Vec<_> = roles.iter().collect();
        assert_eq!(order, vec![("zeta", "ta"), ("alpha", "student"), ("mid", "instructor")]);
    }

    #[test]
    fn legacy_map_defaults_missing_roles_to_student() {
        let roles: LegacyClassRoles =
            serde_json::from_value(json!({"a": "", "b": null, "c": {}})).unwrap();
        assert!(roles.iter().all(|(_, role)| role == "student"));
    }

    #[test]
    fn record_accepts_every_historical_shape() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "jdoe12",
            "name": "Jane Doe",
            "roles": "instructor",
            "role": "user",
            "classRoles": {"bmi200": "instructor"},
            "class_memberships": [
                {"class_id": "bmi101", "role": "ta", "assigned_at": "2024-08-01T12:30:00.123456", "assigned_by": "admin1"}
            ],
            "accessible_classes": ["fhir22"],
            "permissions": ["quiz.delete"]
        }))
        .unwrap();

        assert_eq!(record.display_name.as_deref(), Some("Jane Doe"));
        assert_eq!(record.roles, vec!["instructor".to_string()]);
        let modern = record.modern_memberships().unwrap();
        assert_eq!(modern[0].class_id, "bmi101");
        assert!(modern[0].assigned_at.is_some());
        assert_eq!(record.class_roles.as_ref().unwrap().get("bmi200"), Some("instructor"));
    }

    #[test]
    fn older_map_shaped_memberships_are_recognized() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "old",
            "class_memberships": {"fhir22": {"role": "ta"}}
        }))
        .unwrap();
        assert!(matches!(record.class_memberships, Some(MembershipField::Map(_))));
        assert!(record.modern_memberships().is_none());
    }

    #[test]
    fn unparseable_timestamp_reads_as_absent() {
        let entry: MembershipEntry =
            serde_json::from_value(json!({"class_id": "x", "assigned_at": "last tuesday"})).unwrap();
        assert_eq!(entry.assigned_at, None);
        assert_eq!(entry.role_name(), "student");
    }
}
