//! Audit row shapes: per-entity snapshots and collection membership events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::revision::RevisionNumber;

/// What kind of change an audit row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RevisionType {
    /// Entity was created (begins a lifetime).
    Add,
    /// Entity was modified.
    Mod,
    /// Entity was deleted (ends the lifetime; tombstone).
    Del,
}

impl RevisionType {
    /// Convert to the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Mod => "MOD",
            Self::Del => "DEL",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(Self::Add),
            "MOD" => Some(Self::Mod),
            "DEL" => Some(Self::Del),
            _ => None,
        }
    }
}

/// A stored snapshot of one entity's scalar state as of one revision.
///
/// For a fixed (entity_type, entity_id) rows are totally ordered by
/// revision, at most one row per revision; the first row of a lifetime is
/// always `Add`. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRow {
    pub entity_type: String,
    pub entity_id: String,
    pub revision: RevisionNumber,
    pub revision_type: RevisionType,
    /// Scalar attribute values at this revision.
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl AuditRow {
    /// Create a row; `fields` is empty for `Del` rows.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        revision: RevisionNumber,
        revision_type: RevisionType,
        fields: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            revision,
            revision_type,
            fields,
        }
    }
}

/// Direction of one membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MembershipOp {
    /// Element joined the owner's collection.
    Add,
    /// Element left the owner's collection.
    Del,
}

impl MembershipOp {
    /// Convert to the stored string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }

    /// Parse from the stored string form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(Self::Add),
            "DEL" => Some(Self::Del),
            _ => None,
        }
    }
}

/// One membership-change event: an element added to or removed from an
/// owner's collection at a revision.
///
/// For a fixed (owner_type, owner_id, element_type, element_id) key, events
/// alternate Add/Del starting from Add. The same event carries the
/// membership fact for both ends of a bidirectional association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub owner_type: String,
    pub owner_id: String,
    pub element_type: String,
    pub element_id: String,
    pub revision: RevisionNumber,
    pub op: MembershipOp,
}

impl CollectionEvent {
    pub fn new(
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
        element_type: impl Into<String>,
        element_id: impl Into<String>,
        revision: RevisionNumber,
        op: MembershipOp,
    ) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
            element_type: element_type.into(),
            element_id: element_id.into(),
            revision,
            op,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_type_round_trip() {
        for rt in [RevisionType::Add, RevisionType::Mod, RevisionType::Del] {
            assert_eq!(RevisionType::from_str(rt.as_str()), Some(rt));
        }
        assert_eq!(RevisionType::from_str("UPSERT"), None);
    }

    #[test]
    fn test_membership_op_round_trip() {
        for op in [MembershipOp::Add, MembershipOp::Del] {
            assert_eq!(MembershipOp::from_str(op.as_str()), Some(op));
        }
        assert_eq!(MembershipOp::from_str("MOD"), None);
    }

    #[test]
    fn test_audit_row_serde() {
        let mut fields = HashMap::new();
        fields.insert("data".to_string(), serde_json::json!("x"));
        let row = AuditRow::new("Order", "o-1", 3, RevisionType::Mod, fields);

        let json = serde_json::to_string(&row).unwrap();
        let back: AuditRow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
        assert!(json.contains("\"MOD\""));
    }
}
