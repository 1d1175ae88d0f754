//! Point-in-time reconstruction: snapshot selection and membership replay.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{AuditRow, AuditStore, CollectionEvent, MembershipOp, RevisionType};
use crate::error::{AnnalError, AnnalResult};
use crate::revision::RevisionNumber;
use crate::schema::{AuditSchema, CollectionSide};

/// A reconstructed view of one entity as of one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_type: String,
    pub entity_id: String,
    /// The revision the snapshot was requested at, which is not necessarily
    /// the revision of the entity's last change.
    pub revision: RevisionNumber,
    /// Scalar attribute values, restricted to declared attributes.
    pub fields: HashMap<String, serde_json::Value>,
    /// Membership of each declared collection, keyed by association name.
    pub collections: BTreeMap<String, BTreeSet<String>>,
}

/// Replays stored history into point-in-time state.
///
/// All reads are pure functions of the store contents; the same call with no
/// intervening writes returns the same snapshot.
pub struct Reconstructor<'a> {
    store: &'a dyn AuditStore,
    schema: &'a AuditSchema,
}

impl<'a> Reconstructor<'a> {
    pub fn new(store: &'a dyn AuditStore, schema: &'a AuditSchema) -> Self {
        Self { store, schema }
    }

    /// All revisions at which the entity changed: direct audit rows plus
    /// membership events naming it on either side, deduplicated, ascending.
    ///
    /// An unknown entity type is a compilation error; an id with no history
    /// yields an empty list.
    pub fn get_revisions(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AnnalResult<Vec<RevisionNumber>> {
        self.schema.entity(entity_type)?;

        let rows = self.store.rows(entity_type, entity_id, None)?;
        validate_lifetimes(entity_type, entity_id, &rows)?;

        let mut revisions: BTreeSet<RevisionNumber> =
            rows.iter().map(|row| row.revision).collect();
        revisions.extend(self.store.collection_revisions(entity_type, entity_id)?);
        Ok(revisions.into_iter().collect())
    }

    /// Reconstruct the entity as of the given revision.
    ///
    /// Fails with a not-found error when the entity did not exist yet or had
    /// been deleted by then. All-or-nothing: a failure reconstructing any
    /// collection fails the whole call.
    pub fn find(
        &self,
        entity_type: &str,
        entity_id: &str,
        revision: RevisionNumber,
    ) -> AnnalResult<Snapshot> {
        let descriptor = self.schema.entity(entity_type)?;
        debug!(entity_type, entity_id, revision, "Reconstructing snapshot");

        let row = self
            .store
            .snapshot_row(entity_type, entity_id, revision)?
            .ok_or_else(|| AnnalError::not_found(entity_type, entity_id, revision))?;
        if row.revision_type == RevisionType::Del {
            return Err(AnnalError::not_found(entity_type, entity_id, revision));
        }

        // Only declared attributes make it into the snapshot.
        let mut fields = HashMap::new();
        for name in &descriptor.fields {
            if let Some(value) = row.fields.get(name) {
                fields.insert(name.clone(), value.clone());
            }
        }

        let mut collections = BTreeMap::new();
        for collection in &descriptor.collections {
            let members = match collection.side {
                CollectionSide::Owning => {
                    let events = self.store.collection_events_for_owner(
                        entity_type,
                        entity_id,
                        &collection.element_type,
                    )?;
                    replay_membership(&events, revision, |event| event.element_id.clone())?
                }
                CollectionSide::Inverse => {
                    let events = self.store.collection_events_for_element(
                        &collection.element_type,
                        entity_type,
                        entity_id,
                    )?;
                    replay_membership(&events, revision, |event| event.owner_id.clone())?
                }
            };
            collections.insert(collection.name.clone(), members);
        }

        Ok(Snapshot {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            revision,
            fields,
            collections,
        })
    }
}

/// Check the per-entity row state machine: rows strictly ascending, the
/// first row of each lifetime an ADD, MOD/DEL only while live.
fn validate_lifetimes(
    entity_type: &str,
    entity_id: &str,
    rows: &[AuditRow],
) -> AnnalResult<()> {
    let mut live = false;
    let mut previous: Option<RevisionNumber> = None;

    for row in rows {
        if let Some(prev) = previous {
            if row.revision <= prev {
                return Err(AnnalError::invariant(format!(
                    "audit rows for {entity_type}#{entity_id} out of order at revision {}",
                    row.revision
                )));
            }
        }

        match row.revision_type {
            RevisionType::Add => {
                if live {
                    return Err(AnnalError::invariant(format!(
                        "ADD row for {entity_type}#{entity_id} at revision {} over a live lifetime",
                        row.revision
                    )));
                }
                live = true;
            }
            RevisionType::Mod => {
                if !live {
                    return Err(AnnalError::invariant(format!(
                        "MOD row for {entity_type}#{entity_id} at revision {} without a live lifetime",
                        row.revision
                    )));
                }
            }
            RevisionType::Del => {
                if !live {
                    return Err(AnnalError::invariant(format!(
                        "DEL row for {entity_type}#{entity_id} at revision {} without a live lifetime",
                        row.revision
                    )));
                }
                live = false;
            }
        }
        previous = Some(row.revision);
    }
    Ok(())
}

/// Fold revision-ordered membership events into the member set as of `at`:
/// per far-side key, the latest event at or before the target wins, ADD
/// meaning present and DEL absent. Alternation is checked over the whole
/// stream; corrupt history surfaces instead of being patched.
fn replay_membership<F>(
    events: &[CollectionEvent],
    at: RevisionNumber,
    far_key: F,
) -> AnnalResult<BTreeSet<String>>
where
    F: Fn(&CollectionEvent) -> String,
{
    let mut member_now: BTreeMap<String, bool> = BTreeMap::new();
    let mut member_at: BTreeMap<String, bool> = BTreeMap::new();

    for event in events {
        let key = far_key(event);
        let member = member_now.entry(key.clone()).or_insert(false);
        match event.op {
            MembershipOp::Add => {
                if *member {
                    return Err(AnnalError::invariant(format!(
                        "double ADD membership event for {}#{} -> {}#{} at revision {}",
                        event.owner_type,
                        event.owner_id,
                        event.element_type,
                        event.element_id,
                        event.revision
                    )));
                }
                *member = true;
            }
            MembershipOp::Del => {
                if !*member {
                    return Err(AnnalError::invariant(format!(
                        "DEL membership event without membership for {}#{} -> {}#{} at revision {}",
                        event.owner_type,
                        event.owner_id,
                        event.element_type,
                        event.element_id,
                        event.revision
                    )));
                }
                *member = false;
            }
        }

        if event.revision <= at {
            member_at.insert(key, *member);
        }
    }

    Ok(member_at
        .into_iter()
        .filter(|(_, member)| *member)
        .map(|(key, _)| key)
        .collect())
}
