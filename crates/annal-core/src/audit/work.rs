//! Buffering of one transaction's changes before they become a revision.
//!
//! A [`WorkUnit`] collects entity writes and collection membership changes,
//! collapses repeated writes to the same target, and appends the net result
//! to the store under a single freshly issued revision. A unit that nets to
//! nothing produces no revision at all.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::audit::row::{AuditRow, CollectionEvent, MembershipOp, RevisionType};
use crate::audit::store::AuditStore;
use crate::error::AnnalResult;
use crate::revision::{Revision, RevisionClock};

/// Net pending change for one entity within a unit.
#[derive(Debug, Clone, PartialEq)]
enum PendingChange {
    Add(HashMap<String, serde_json::Value>),
    Mod(HashMap<String, serde_json::Value>),
    Del,
}

type EntityKey = (String, String);
type MembershipKey = (String, String, String, String);

/// One transaction's worth of audited changes.
///
/// Writes collapse as they arrive, so the unit always holds at most one
/// pending row per entity and at most one pending event per membership pair:
/// create followed by modify stays a create with the final fields, modify
/// followed by delete becomes a delete, create followed by delete cancels
/// out, delete followed by create nets to a modify, and paired add/remove of
/// the same membership cancel out. Writes to an entity already pending
/// deletion are discarded; deletion is terminal within a unit.
#[derive(Debug, Default)]
pub struct WorkUnit {
    entities: BTreeMap<EntityKey, PendingChange>,
    memberships: BTreeMap<MembershipKey, MembershipOp>,
}

impl WorkUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record creation of an entity with its initial field values.
    pub fn create(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        fields: HashMap<String, serde_json::Value>,
    ) {
        let key = (entity_type.into(), entity_id.into());
        let next = match self.entities.get(&key) {
            // Creating over a pending delete, or over a pending modify of a
            // live entity, nets to a modify carrying the new fields.
            Some(PendingChange::Del) | Some(PendingChange::Mod(_)) => PendingChange::Mod(fields),
            _ => PendingChange::Add(fields),
        };
        self.entities.insert(key, next);
    }

    /// Record a change to an entity's field values.
    pub fn modify(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        fields: HashMap<String, serde_json::Value>,
    ) {
        let key = (entity_type.into(), entity_id.into());
        let next = match self.entities.get(&key) {
            Some(PendingChange::Add(_)) => PendingChange::Add(fields),
            Some(PendingChange::Del) => return,
            _ => PendingChange::Mod(fields),
        };
        self.entities.insert(key, next);
    }

    /// Record deletion of an entity.
    pub fn delete(&mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) {
        let key = (entity_type.into(), entity_id.into());
        match self.entities.get(&key) {
            // Created and deleted in the same unit: never happened.
            Some(PendingChange::Add(_)) => {
                self.entities.remove(&key);
            }
            _ => {
                self.entities.insert(key, PendingChange::Del);
            }
        }
    }

    /// Record an element joining an owner's collection.
    pub fn collection_add(
        &mut self,
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
        element_type: impl Into<String>,
        element_id: impl Into<String>,
    ) {
        let key = (
            owner_type.into(),
            owner_id.into(),
            element_type.into(),
            element_id.into(),
        );
        match self.memberships.get(&key) {
            Some(MembershipOp::Del) => {
                self.memberships.remove(&key);
            }
            _ => {
                self.memberships.insert(key, MembershipOp::Add);
            }
        }
    }

    /// Record an element leaving an owner's collection.
    pub fn collection_remove(
        &mut self,
        owner_type: impl Into<String>,
        owner_id: impl Into<String>,
        element_type: impl Into<String>,
        element_id: impl Into<String>,
    ) {
        let key = (
            owner_type.into(),
            owner_id.into(),
            element_type.into(),
            element_id.into(),
        );
        match self.memberships.get(&key) {
            Some(MembershipOp::Add) => {
                self.memberships.remove(&key);
            }
            _ => {
                self.memberships.insert(key, MembershipOp::Del);
            }
        }
    }

    /// Whether the unit holds no net changes.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.memberships.is_empty()
    }

    /// Commit the unit: allocate one revision from the clock and append all
    /// pending rows and events atomically.
    ///
    /// An empty unit returns `Ok(None)` without ticking the clock.
    pub fn commit(
        self,
        store: &dyn AuditStore,
        clock: &RevisionClock,
    ) -> AnnalResult<Option<Revision>> {
        self.commit_inner(store, clock, None)
    }

    /// Commit with opaque metadata recorded on the revision.
    pub fn commit_with_metadata(
        self,
        store: &dyn AuditStore,
        clock: &RevisionClock,
        metadata: serde_json::Value,
    ) -> AnnalResult<Option<Revision>> {
        self.commit_inner(store, clock, Some(metadata))
    }

    fn commit_inner(
        self,
        store: &dyn AuditStore,
        clock: &RevisionClock,
        metadata: Option<serde_json::Value>,
    ) -> AnnalResult<Option<Revision>> {
        if self.is_empty() {
            debug!("Skipping commit of empty audit unit");
            return Ok(None);
        }

        let revision = match metadata {
            Some(m) => clock.next_revision_with(m),
            None => clock.next_revision(),
        };

        let rows: Vec<AuditRow> = self
            .entities
            .into_iter()
            .map(|((entity_type, entity_id), change)| {
                let (revision_type, fields) = match change {
                    PendingChange::Add(fields) => (RevisionType::Add, fields),
                    PendingChange::Mod(fields) => (RevisionType::Mod, fields),
                    PendingChange::Del => (RevisionType::Del, HashMap::new()),
                };
                AuditRow::new(entity_type, entity_id, revision.number, revision_type, fields)
            })
            .collect();

        let events: Vec<CollectionEvent> = self
            .memberships
            .into_iter()
            .map(|((owner_type, owner_id, element_type, element_id), op)| {
                CollectionEvent::new(
                    owner_type,
                    owner_id,
                    element_type,
                    element_id,
                    revision.number,
                    op,
                )
            })
            .collect();

        debug!(
            revision = revision.number,
            rows = rows.len(),
            events = events.len(),
            "Committing audit unit"
        );
        store.append_unit(&revision, &rows, &events)?;
        Ok(Some(revision))
    }
}
