//! Read-side facade: revision lists, snapshots, queries, and revision lookup.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::audit::AuditStore;
use crate::config::AuditConfig;
use crate::criteria::Criterion;
use crate::error::{AnnalError, AnnalResult};
use crate::query::QueryBuilder;
use crate::reader::reconstruct::{Reconstructor, Snapshot};
use crate::revision::{Revision, RevisionNumber};
use crate::schema::AuditSchema;

/// Read-side entry point over a shared audit store.
///
/// A reader is cheap to construct and never writes; any number of readers
/// may coexist with writers on the same store.
pub struct AuditReader {
    store: Arc<dyn AuditStore>,
    schema: AuditSchema,
    entity_table: String,
    collection_table: String,
}

impl AuditReader {
    /// Create a reader over a store, naming tables the way the store's
    /// config does.
    pub fn new(store: Arc<dyn AuditStore>, schema: AuditSchema, config: &AuditConfig) -> Self {
        Self {
            store,
            schema,
            entity_table: config.entity_table.clone(),
            collection_table: config.collection_table.clone(),
        }
    }

    fn reconstructor(&self) -> Reconstructor<'_> {
        Reconstructor::new(self.store.as_ref(), &self.schema)
    }

    /// All revisions at which the entity changed, directly or through
    /// either side of an association, ascending.
    pub fn get_revisions(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AnnalResult<Vec<RevisionNumber>> {
        self.reconstructor().get_revisions(entity_type, entity_id)
    }

    /// Reconstruct one entity as of the given revision.
    pub fn find(
        &self,
        entity_type: &str,
        entity_id: &str,
        revision: RevisionNumber,
    ) -> AnnalResult<Snapshot> {
        self.reconstructor().find(entity_type, entity_id, revision)
    }

    /// Entities of a type matching a criterion as of the given revision,
    /// reconstructed and ordered by entity id.
    pub fn query(
        &self,
        entity_type: &str,
        criterion: &Criterion,
        revision: RevisionNumber,
    ) -> AnnalResult<Vec<Snapshot>> {
        let mut builder = QueryBuilder::new(
            &self.schema,
            entity_type,
            &self.entity_table,
            &self.collection_table,
            revision,
        )?;
        let root = builder.root_scope();
        criterion.add_to_query(&mut builder, root)?;
        let compiled = builder.compile();
        debug!(entity_type, revision, sql = %compiled.sql, "Executing criteria query");

        let ids = self.store.select_ids(&compiled)?;
        ids.iter()
            .map(|id| self.find(entity_type, id, revision))
            .collect()
    }

    /// The stored record of one revision: number, timestamp, metadata.
    pub fn revision_info(&self, number: RevisionNumber) -> AnnalResult<Revision> {
        self.store
            .revision_info(number)?
            .ok_or_else(|| AnnalError::revision_not_found(number))
    }

    /// The number of the most recent revision at or before the given
    /// instant.
    pub fn revision_at(&self, timestamp: DateTime<Utc>) -> AnnalResult<RevisionNumber> {
        self.store
            .revision_at(timestamp)?
            .ok_or_else(|| AnnalError::no_revision_at(&timestamp))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::audit::{SqliteAuditStore, WorkUnit};
    use crate::revision::RevisionClock;
    use crate::schema::EntityDescriptor;

    fn schema() -> AuditSchema {
        AuditSchema::builder()
            .entity(EntityDescriptor::new("Owning").field("data"))
            .build()
            .unwrap()
    }

    fn reader_over(store: SqliteAuditStore) -> AuditReader {
        AuditReader::new(Arc::new(store), schema(), &AuditConfig::in_memory())
    }

    fn fields(value: &str) -> HashMap<String, serde_json::Value> {
        HashMap::from([("data".to_string(), serde_json::json!(value))])
    }

    #[test]
    fn test_query_orders_by_entity_id() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let clock = RevisionClock::new();
        let mut unit = WorkUnit::new();
        unit.create("Owning", "b", fields("x"));
        unit.create("Owning", "a", fields("x"));
        unit.create("Owning", "c", fields("other"));
        unit.commit(&store, &clock).unwrap();

        let reader = reader_over(store);
        let matches = reader
            .query("Owning", &Criterion::eq("data", serde_json::json!("x")), 1)
            .unwrap();
        let ids: Vec<&str> = matches.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_revision_info_for_unissued_number() {
        let reader = reader_over(SqliteAuditStore::in_memory().unwrap());
        let err = reader.revision_info(7).unwrap_err();
        assert!(matches!(err, AnnalError::RevisionNotFound { .. }));
    }

    #[test]
    fn test_revision_at_before_first_commit() {
        let reader = reader_over(SqliteAuditStore::in_memory().unwrap());
        let err = reader.revision_at(Utc::now()).unwrap_err();
        assert!(matches!(err, AnnalError::RevisionNotFound { .. }));
    }

    #[test]
    fn test_revision_info_round_trip() {
        let store = SqliteAuditStore::in_memory().unwrap();
        let clock = RevisionClock::new();
        let mut unit = WorkUnit::new();
        unit.create("Owning", "a", fields("x"));
        let committed = unit
            .commit_with_metadata(&store, &clock, serde_json::json!({"user": "amy"}))
            .unwrap()
            .unwrap();

        let reader = reader_over(store);
        let info = reader.revision_info(committed.number).unwrap();
        assert_eq!(info.number, committed.number);
        assert_eq!(info.metadata, Some(serde_json::json!({"user": "amy"})));
        assert_eq!(reader.revision_at(Utc::now()).unwrap(), committed.number);
    }
}
