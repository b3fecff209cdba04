//! Subject Model Normalizer.
//!
//! Folds the stored membership shapes into one canonical, class-unique list.
//! Precedence: modern entries first (stored order, audit metadata kept), then
//! legacy-only classes (stored order). When a class appears in both, the
//! modern role wins.

use std::collections::BTreeSet;

use serde::Serialize;

use classroom_core::ClassId;

use crate::Role;
use crate::record::{LegacyClassRoles, MembershipEntry, MembershipField, UserRecord};
use crate::subject::ClassMembership;

/// Merge the legacy map and the modern list into canonical memberships.
///
/// Neither input is mutated. Entries with an empty class id or an unknown
/// role are dropped. A class repeated inside the modern list keeps its first
/// entry. A class named by the modern list never takes its role from the
/// legacy map, even when the modern entry itself was dropped.
pub fn normalize_memberships(
    legacy: Option<&LegacyClassRoles>,
    modern: Option<&[MembershipEntry]>,
) -> Vec<ClassMembership> {
    let mut out: Vec<ClassMembership> = Vec::new();
    let mut claimed: BTreeSet<ClassId> = BTreeSet::new();

    for entry in modern.unwrap_or_default() {
        let Some(class_id) = parse_class(&entry.class_id) else {
            continue;
        };
        if !claimed.insert(class_id.clone()) {
            tracing::warn!(class_id = %class_id, "duplicate modern membership ignored");
            continue;
        }
        let Some(role) = parse_role(&class_id, entry.role_name()) else {
            continue;
        };
        out.push(ClassMembership {
            class_id,
            role,
            assigned_at: entry.assigned_at,
            assigned_by: entry.assigned_by.clone(),
        });
    }

    for (raw_class, raw_role) in legacy.into_iter().flat_map(|l| l.iter()) {
        let Some(class_id) = parse_class(raw_class) else {
            continue;
        };
        if claimed.contains(&class_id) || out.iter().any(|m| m.class_id == class_id) {
            continue;
        }
        let Some(role) = parse_role(&class_id, raw_role) else {
            continue;
        };
        out.push(ClassMembership::new(class_id, role));
    }

    out
}

/// Canonical memberships for a whole record.
///
/// An older map stored under `class_memberships` counts as legacy and is
/// consulted ahead of `classRoles`. The role-less `accessible_classes` list is
/// only used when no other shape yields a membership.
pub(crate) fn memberships_from_record(record: &UserRecord) -> Vec<ClassMembership> {
    let legacy = combined_legacy(record);
    let mut memberships = normalize_memberships(Some(&legacy), record.modern_memberships());

    if memberships.is_empty() && !record.accessible_classes.is_empty() {
        let inferred = infer_accessible_class_role(record.role.as_deref());
        for raw in &record.accessible_classes {
            let Some(class_id) = parse_class(raw) else {
                continue;
            };
            if memberships.iter().all(|m| m.class_id != class_id) {
                memberships.push(ClassMembership::new(class_id, inferred));
            }
        }
    }

    memberships
}

fn combined_legacy(record: &UserRecord) -> LegacyClassRoles {
    let older_map = match &record.class_memberships {
        Some(MembershipField::Map(map)) => Some(map),
        _ => None,
    };
    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for (class_id, role) in older_map
        .into_iter()
        .chain(record.class_roles.as_ref())
        .flat_map(|l| l.iter())
    {
        if pairs.iter().all(|(seen, _)| *seen != class_id) {
            pairs.push((class_id, role));
        }
    }
    LegacyClassRoles::from_pairs(pairs)
}

/// Role for a class listed only in `accessible_classes`, inferred from the
/// legacy global role the way older tooling did.
pub fn infer_accessible_class_role(legacy_global_role: Option<&str>) -> Role {
    match legacy_global_role.map(Role::parse) {
        Some(Ok(Role::Admin | Role::Instructor)) => Role::Instructor,
        Some(Ok(Role::Ta)) => Role::Ta,
        _ => Role::Student,
    }
}

fn parse_class(raw: &str) -> Option<ClassId> {
    match ClassId::parse(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!("membership with empty class id dropped");
            None
        }
    }
}

fn parse_role(class_id: &ClassId, raw: &str) -> Option<Role> {
    match Role::parse(raw) {
        Ok(role) => Some(role),
        Err(e) => {
            tracing::warn!(class_id = %class_id, "membership dropped: {}", e);
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MembershipIssueKind {
    EmptyClassId,
    InvalidRole { role: String },
    DuplicateClassId { class_id: String },
}

/// A problem with one stored membership entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipIssue {
    pub index: usize,
    #[serde(flatten)]
    pub kind: MembershipIssueKind,
}

impl core::fmt::Display for MembershipIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.kind {
            MembershipIssueKind::EmptyClassId => write!(f, "entry {}: class_id cannot be empty", self.index),
            MembershipIssueKind::InvalidRole { role } => {
                write!(f, "entry {}: invalid role '{}'", self.index, role)
            }
            MembershipIssueKind::DuplicateClassId { class_id } => {
                write!(f, "entry {}: duplicate class_id '{}'", self.index, class_id)
            }
        }
    }
}

/// Report every entry the normalizer would drop or shadow.
pub fn validate_memberships(entries: &[MembershipEntry]) -> Vec<MembershipIssue> {
    let mut issues = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for (index, entry) in entries.iter().enumerate() {
        let class_id = entry.class_id.trim();
        if class_id.is_empty() {
            issues.push(MembershipIssue { index, kind: MembershipIssueKind::EmptyClassId });
            continue;
        }
        if Role::parse(entry.role_name()).is_err() {
            issues.push(MembershipIssue {
                index,
                kind: MembershipIssueKind::InvalidRole { role: entry.role_name().to_string() },
            });
        }
        if !seen.insert(class_id) {
            issues.push(MembershipIssue {
                index,
                kind: MembershipIssueKind::DuplicateClassId { class_id: class_id.to_string() },
            });
        }
    }

    issues
}

// ─────────────────────────────────────────────────────────────────────────────
// Cross-shape consistency (migration tooling)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Representation {
    ClassMemberships,
    ClassRoles,
    AccessibleClasses,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Inconsistency {
    MissingClasses {
        representation: Representation,
        classes: Vec<String>,
    },
    RoleMismatch {
        class_id: String,
        class_memberships: String,
        class_roles: String,
    },
}

/// Compare the stored shapes of one record against each other.
///
/// Every representation is expected to list the same classes, and the modern
/// list and `classRoles` are expected to agree on each class's role.
pub fn check_consistency(record: &UserRecord) -> Vec<Inconsistency> {
    let modern: Vec<(&str, &str)> = record
        .modern_memberships()
        .unwrap_or_default()
        .iter()
        .filter(|e| !e.class_id.trim().is_empty())
        .map(|e| (e.class_id.trim(), e.role_name()))
        .collect();
    let legacy: Vec<(&str, &str)> = record
        .class_roles
        .as_ref()
        .map(|l| l.iter().collect())
        .unwrap_or_default();
    let accessible: BTreeSet<&str> = record
        .accessible_classes
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    let modern_set: BTreeSet<&str> = modern.iter().map(|(c, _)| *c).collect();
    let legacy_set: BTreeSet<&str> = legacy.iter().map(|(c, _)| *c).collect();
    let all: BTreeSet<&str> = modern_set
        .iter()
        .chain(legacy_set.iter())
        .chain(accessible.iter())
        .copied()
        .collect();

    let mut out = Vec::new();
    for (representation, present) in [
        (Representation::ClassMemberships, &modern_set),
        (Representation::ClassRoles, &legacy_set),
        (Representation::AccessibleClasses, &accessible),
    ] {
        let missing: Vec<String> = all.difference(present).map(|c| c.to_string()).collect();
        if !missing.is_empty() {
            out.push(Inconsistency::MissingClasses { representation, classes: missing });
        }
    }

    for (class_id, legacy_role) in &legacy {
        if let Some((_, modern_role)) = modern.iter().find(|(c, _)| c == class_id) {
            if !modern_role.eq_ignore_ascii_case(legacy_role) {
                out.push(Inconsistency::RoleMismatch {
                    class_id: class_id.to_string(),
                    class_memberships: modern_role.to_string(),
                    class_roles: legacy_role.to_string(),
                });
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(memberships: &[ClassMembership]) -> Vec<(&str, Role)> {
        memberships.iter().map(|m| (m.class_id.as_str(), m.role)).collect()
    }

    #[test]
    fn modern_wins_and_legacy_only_entries_are_kept() {
        let modern = vec![MembershipEntry::new("bmi101", "ta")];
        let legacy = LegacyClassRoles::from_pairs([("bmi101", "student"), ("bmi200", "instructor")]);

        let out = normalize_memberships(Some(&legacy), Some(&modern));

        assert_eq!(ids(&out), vec![("bmi101", Role::Ta), ("bmi200", Role::Instructor)]);
        assert_eq!(legacy.get("bmi101"), Some("student"));
    }

    #[test]
    fn ordering_is_modern_then_legacy_in_input_order() {
        let modern = vec![MembershipEntry::new("c3", "student"), MembershipEntry::new("c1", "ta")];
        let legacy = LegacyClassRoles::from_pairs([("c9", "ta"), ("c1", "student"), ("c2", "student")]);

        let out = normalize_memberships(Some(&legacy), Some(&modern));

        let order: Vec<_> = out.iter().map(|m| m.class_id.as_str()).collect();
        assert_eq!(order, vec!["c3", "c1", "c9", "c2"]);
    }

    #[test]
    fn audit_metadata_survives_only_for_modern_entries() {
        let mut entry = MembershipEntry::new("bmi101", "ta");
        entry.assigned_by = Some("admin1".into());
        let legacy = LegacyClassRoles::from_pairs([("bmi200", "student")]);

        let out = normalize_memberships(Some(&legacy), Some(&[entry]));

        assert_eq!(out[0].assigned_by.as_deref(), Some("admin1"));
        assert_eq!(out[1].assigned_by, None);
    }

    #[test]
    fn unparseable_modern_role_does_not_fall_back_to_legacy() {
        let modern = vec![MembershipEntry::new("bmi101", "studnet")];
        let legacy = LegacyClassRoles::from_pairs([("bmi101", "instructor"), ("bmi200", "ta")]);

        let out = normalize_memberships(Some(&legacy), Some(&modern));

        assert_eq!(ids(&out), vec![("bmi200", Role::Ta)]);
    }

    #[test]
    fn later_modern_duplicate_does_not_replace_a_dropped_first_entry() {
        let modern = vec![
            MembershipEntry::new("bmi101", "superuser"),
            MembershipEntry::new("bmi101", "instructor"),
        ];

        assert!(normalize_memberships(None, Some(&modern)).is_empty());
    }

    #[test]
    fn absent_inputs_yield_no_memberships() {
        assert!(normalize_memberships(None, None).is_empty());
    }

    #[test]
    fn unknown_roles_and_empty_ids_are_dropped() {
        let modern = vec![MembershipEntry::new("", "ta"), MembershipEntry::new("x", "owner")];
        let out = normalize_memberships(None, Some(&modern));
        assert!(out.is_empty());
    }

    #[test]
    fn accessible_classes_are_a_last_resort() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "old",
            "role": "grader",
            "accessible_classes": ["fhir22", "fhir22", "bmi101"]
        }))
        .unwrap();
        let out = memberships_from_record(&record);
        assert_eq!(ids(&out), vec![("fhir22", Role::Ta), ("bmi101", Role::Ta)]);

        let record: UserRecord = serde_json::from_value(json!({
            "id": "mixed",
            "classRoles": {"bmi200": "student"},
            "accessible_classes": ["fhir22"]
        }))
        .unwrap();
        assert_eq!(ids(&memberships_from_record(&record)), vec![("bmi200", Role::Student)]);
    }

    #[test]
    fn older_map_shape_precedes_class_roles() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "u",
            "class_memberships": {"bmi101": "instructor"},
            "classRoles": {"bmi101": "student", "bmi200": "ta"}
        }))
        .unwrap();
        assert_eq!(
            ids(&memberships_from_record(&record)),
            vec![("bmi101", Role::Instructor), ("bmi200", Role::Ta)]
        );
    }

    #[test]
    fn validation_reports_each_bad_entry() {
        let entries = vec![
            MembershipEntry::new("bmi101", "ta"),
            MembershipEntry::new(" ", "ta"),
            MembershipEntry::new("bmi101", "student"),
            MembershipEntry::new("bmi300", "owner"),
        ];
        let issues = validate_memberships(&entries);
        assert_eq!(
            issues,
            vec![
                MembershipIssue { index: 1, kind: MembershipIssueKind::EmptyClassId },
                MembershipIssue {
                    index: 2,
                    kind: MembershipIssueKind::DuplicateClassId { class_id: "bmi101".into() }
                },
                MembershipIssue {
                    index: 3,
                    kind: MembershipIssueKind::InvalidRole { role: "owner".into() }
                },
            ]
        );
        assert_eq!(issues[0].to_string(), "entry 1: class_id cannot be empty");
    }

    #[test]
    fn consistency_check_finds_missing_classes_and_role_mismatch() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "u",
            "class_memberships": [{"class_id": "bmi101", "role": "ta"}],
            "classRoles": {"bmi101": "student", "bmi200": "ta"},
            "accessible_classes": ["bmi101", "bmi200"]
        }))
        .unwrap();

        let found = check_consistency(&record);

        assert!(found.contains(&Inconsistency::MissingClasses {
            representation: Representation::ClassMemberships,
            classes: vec!["bmi200".into()],
        }));
        assert!(found.contains(&Inconsistency::RoleMismatch {
            class_id: "bmi101".into(),
            class_memberships: "ta".into(),
            class_roles: "student".into(),
        }));
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn consistent_record_reports_nothing() {
        let record: UserRecord = serde_json::from_value(json!({
            "id": "u",
            "class_memberships": [{"class_id": "bmi101", "role": "ta"}],
            "classRoles": {"bmi101": "TA"},
            "accessible_classes": ["bmi101"]
        }))
        .unwrap();
        assert!(check_consistency(&record).is_empty());
    }
}
