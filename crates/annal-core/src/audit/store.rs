//! Audit storage layer with point-in-time query support.
//!
//! Provides SQLite-backed persistence for entity audit rows, collection
//! membership events, and revision records.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::audit::row::{AuditRow, CollectionEvent, MembershipOp, RevisionType};
use crate::config::AuditConfig;
use crate::error::{AnnalError, AnnalResult};
use crate::query::CompiledQuery;
use crate::revision::{Revision, RevisionNumber};

/// Trait for audit storage operations
pub trait AuditStore: Send + Sync {
    /// Get all audit rows for an entity, ordered by revision, optionally
    /// capped at an upper revision bound (inclusive)
    fn rows(
        &self,
        entity_type: &str,
        entity_id: &str,
        up_to: Option<RevisionNumber>,
    ) -> AnnalResult<Vec<AuditRow>>;

    /// Get the latest audit row at or before the given revision
    fn snapshot_row(
        &self,
        entity_type: &str,
        entity_id: &str,
        at: RevisionNumber,
    ) -> AnnalResult<Option<AuditRow>>;

    /// Get membership events for one owner's collection of the given
    /// element type, ordered by revision
    fn collection_events_for_owner(
        &self,
        owner_type: &str,
        owner_id: &str,
        element_type: &str,
    ) -> AnnalResult<Vec<CollectionEvent>>;

    /// Get membership events naming an entity on the element side,
    /// restricted to owners of the given type, ordered by revision
    fn collection_events_for_element(
        &self,
        owner_type: &str,
        element_type: &str,
        element_id: &str,
    ) -> AnnalResult<Vec<CollectionEvent>>;

    /// Get the distinct revisions of membership events naming an entity on
    /// either side, ordered ascending
    fn collection_revisions(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AnnalResult<Vec<RevisionNumber>>;

    /// Execute a compiled point-in-time query, returning matching entity ids
    fn select_ids(&self, query: &CompiledQuery) -> AnnalResult<Vec<String>>;

    /// Append one committed unit of change atomically: the revision record
    /// plus its audit rows and membership events
    fn append_unit(
        &self,
        revision: &Revision,
        rows: &[AuditRow],
        events: &[CollectionEvent],
    ) -> AnnalResult<()>;

    /// Get the highest revision number ever recorded
    fn max_revision(&self) -> AnnalResult<Option<RevisionNumber>>;

    /// Get the stored revision record for a revision number
    fn revision_info(&self, number: RevisionNumber) -> AnnalResult<Option<Revision>>;

    /// Get the most recent revision at or before the given instant
    fn revision_at(&self, timestamp: DateTime<Utc>) -> AnnalResult<Option<RevisionNumber>>;
}

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
    revision_table: String,
    entity_table: String,
    collection_table: String,
}

impl SqliteAuditStore {
    /// Open (or create) a store described by the given configuration
    pub fn open(config: &AuditConfig) -> AnnalResult<Self> {
        config.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = if config.db_path.to_str() == Some(":memory:") {
            debug!("Opening in-memory audit store");
            Connection::open_in_memory()?
        } else {
            debug!(path = %config.db_path.display(), "Opening file-backed audit store");
            Connection::open(&config.db_path)?
        };

        let store = Self {
            conn: Mutex::new(conn),
            revision_table: config.revision_table.clone(),
            entity_table: config.entity_table.clone(),
            collection_table: config.collection_table.clone(),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store with default table names (for testing)
    pub fn in_memory() -> AnnalResult<Self> {
        Self::open(&AuditConfig::in_memory())
    }

    fn init_schema(&self) -> AnnalResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {rev} (
                revision INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                metadata TEXT
            );

            CREATE TABLE IF NOT EXISTS {ent} (
                entity_type TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                revision_type TEXT NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (entity_type, entity_id, revision)
            );

            -- Index for snapshot-row selection across all ids of a type
            CREATE INDEX IF NOT EXISTS idx_{ent}_type_rev
                ON {ent}(entity_type, revision);

            CREATE TABLE IF NOT EXISTS {coll} (
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                element_type TEXT NOT NULL,
                element_id TEXT NOT NULL,
                revision INTEGER NOT NULL,
                op TEXT NOT NULL,
                PRIMARY KEY (owner_type, owner_id, element_type, element_id, revision)
            );

            -- Index for element-side (inverse) replay
            CREATE INDEX IF NOT EXISTS idx_{coll}_element
                ON {coll}(element_type, element_id, revision);
        "#,
            rev = self.revision_table,
            ent = self.entity_table,
            coll = self.collection_table,
        ))?;
        Ok(())
    }

    fn serialize_fields(fields: &HashMap<String, serde_json::Value>) -> AnnalResult<String> {
        Ok(serde_json::to_string(fields)?)
    }

    fn row_to_audit(row: &rusqlite::Row<'_>) -> AnnalResult<AuditRow> {
        let entity_type: String = row.get(0)?;
        let entity_id: String = row.get(1)?;
        let revision: RevisionNumber = row.get(2)?;
        let revision_type: String = row.get(3)?;
        let fields: String = row.get(4)?;

        Ok(AuditRow {
            entity_type,
            entity_id,
            revision,
            revision_type: RevisionType::from_str(&revision_type).ok_or_else(|| {
                AnnalError::database(format!("unknown revision type '{revision_type}'"))
            })?,
            fields: serde_json::from_str(&fields)?,
        })
    }

    fn row_to_event(row: &rusqlite::Row<'_>) -> AnnalResult<CollectionEvent> {
        let owner_type: String = row.get(0)?;
        let owner_id: String = row.get(1)?;
        let element_type: String = row.get(2)?;
        let element_id: String = row.get(3)?;
        let revision: RevisionNumber = row.get(4)?;
        let op: String = row.get(5)?;

        Ok(CollectionEvent {
            owner_type,
            owner_id,
            element_type,
            element_id,
            revision,
            op: MembershipOp::from_str(&op)
                .ok_or_else(|| AnnalError::database(format!("unknown membership op '{op}'")))?,
        })
    }

    /// Convert a JSON bind value to its SQLite representation.
    fn bind_value(value: &serde_json::Value) -> rusqlite::types::Value {
        use rusqlite::types::Value as Sql;
        match value {
            serde_json::Value::Null => Sql::Null,
            serde_json::Value::Bool(b) => Sql::Integer(*b as i64),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Sql::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    Sql::Real(f)
                } else {
                    Sql::Text(n.to_string())
                }
            }
            serde_json::Value::String(s) => Sql::Text(s.clone()),
            other => Sql::Text(other.to_string()),
        }
    }

    /// Whether the entity currently has a live lifetime (latest row is not DEL).
    fn lifetime_is_live(
        &self,
        conn: &Connection,
        entity_type: &str,
        entity_id: &str,
    ) -> AnnalResult<bool> {
        let latest: Option<String> = conn
            .query_row(
                &format!(
                    r#"SELECT revision_type FROM {}
                       WHERE entity_type = ?1 AND entity_id = ?2
                       ORDER BY revision DESC
                       LIMIT 1"#,
                    self.entity_table
                ),
                params![entity_type, entity_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(matches!(latest.as_deref(), Some("ADD") | Some("MOD")))
    }

    /// Whether the element is currently a member of the owner's collection
    /// (latest event for the pair is ADD).
    fn pair_is_member(&self, conn: &Connection, event: &CollectionEvent) -> AnnalResult<bool> {
        let latest: Option<String> = conn
            .query_row(
                &format!(
                    r#"SELECT op FROM {}
                       WHERE owner_type = ?1 AND owner_id = ?2
                         AND element_type = ?3 AND element_id = ?4
                       ORDER BY revision DESC
                       LIMIT 1"#,
                    self.collection_table
                ),
                params![
                    event.owner_type,
                    event.owner_id,
                    event.element_type,
                    event.element_id,
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(latest.as_deref() == Some("ADD"))
    }
}

impl AuditStore for SqliteAuditStore {
    fn rows(
        &self,
        entity_type: &str,
        entity_id: &str,
        up_to: Option<RevisionNumber>,
    ) -> AnnalResult<Vec<AuditRow>> {
        let conn = self.conn.lock().unwrap();
        match up_to {
            Some(at) => {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT entity_type, entity_id, revision, revision_type, fields
                       FROM {}
                       WHERE entity_type = ?1 AND entity_id = ?2 AND revision <= ?3
                       ORDER BY revision ASC"#,
                    self.entity_table
                ))?;
                let results =
                    stmt.query_map(params![entity_type, entity_id, at], |row| {
                        Ok(Self::row_to_audit(row))
                    })?;
                results
                    .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
                    .collect()
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT entity_type, entity_id, revision, revision_type, fields
                       FROM {}
                       WHERE entity_type = ?1 AND entity_id = ?2
                       ORDER BY revision ASC"#,
                    self.entity_table
                ))?;
                let results = stmt.query_map(params![entity_type, entity_id], |row| {
                    Ok(Self::row_to_audit(row))
                })?;
                results
                    .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
                    .collect()
            }
        }
    }

    fn snapshot_row(
        &self,
        entity_type: &str,
        entity_id: &str,
        at: RevisionNumber,
    ) -> AnnalResult<Option<AuditRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT entity_type, entity_id, revision, revision_type, fields
               FROM {}
               WHERE entity_type = ?1 AND entity_id = ?2 AND revision <= ?3
               ORDER BY revision DESC
               LIMIT 1"#,
            self.entity_table
        ))?;

        stmt.query_row(params![entity_type, entity_id, at], |row| {
            Ok(Self::row_to_audit(row))
        })
        .optional()?
        .transpose()
    }

    fn collection_events_for_owner(
        &self,
        owner_type: &str,
        owner_id: &str,
        element_type: &str,
    ) -> AnnalResult<Vec<CollectionEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT owner_type, owner_id, element_type, element_id, revision, op
               FROM {}
               WHERE owner_type = ?1 AND owner_id = ?2 AND element_type = ?3
               ORDER BY revision ASC, element_id ASC"#,
            self.collection_table
        ))?;

        let results = stmt.query_map(params![owner_type, owner_id, element_type], |row| {
            Ok(Self::row_to_event(row))
        })?;
        results
            .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
            .collect()
    }

    fn collection_events_for_element(
        &self,
        owner_type: &str,
        element_type: &str,
        element_id: &str,
    ) -> AnnalResult<Vec<CollectionEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT owner_type, owner_id, element_type, element_id, revision, op
               FROM {}
               WHERE owner_type = ?1 AND element_type = ?2 AND element_id = ?3
               ORDER BY revision ASC, owner_id ASC"#,
            self.collection_table
        ))?;

        let results = stmt.query_map(params![owner_type, element_type, element_id], |row| {
            Ok(Self::row_to_event(row))
        })?;
        results
            .map(|r| r.map_err(|e| e.into()).and_then(|inner| inner))
            .collect()
    }

    fn collection_revisions(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> AnnalResult<Vec<RevisionNumber>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            r#"SELECT DISTINCT revision FROM {}
               WHERE (owner_type = ?1 AND owner_id = ?2)
                  OR (element_type = ?1 AND element_id = ?2)
               ORDER BY revision ASC"#,
            self.collection_table
        ))?;

        let results = stmt.query_map(params![entity_type, entity_id], |row| row.get(0))?;
        results.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    fn select_ids(&self, query: &CompiledQuery) -> AnnalResult<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&query.sql)?;
        let binds: Vec<rusqlite::types::Value> =
            query.binds.iter().map(Self::bind_value).collect();

        let results = stmt.query_map(rusqlite::params_from_iter(binds), |row| row.get(0))?;
        results.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    fn append_unit(
        &self,
        revision: &Revision,
        rows: &[AuditRow],
        events: &[CollectionEvent],
    ) -> AnnalResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Ordering is a precondition of the committing layer; surface a
        // violation rather than reordering.
        let stored_max: Option<RevisionNumber> = tx.query_row(
            &format!("SELECT MAX(revision) FROM {}", self.revision_table),
            [],
            |row| row.get(0),
        )?;
        if let Some(max) = stored_max {
            if revision.number <= max {
                return Err(AnnalError::invariant(format!(
                    "revision {} is not greater than the stored maximum {}",
                    revision.number, max
                )));
            }
        }

        let metadata = revision
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (revision, created_at, metadata) VALUES (?1, ?2, ?3)",
                self.revision_table
            ),
            params![revision.number, revision.timestamp.to_rfc3339(), metadata],
        )?;

        for row in rows {
            if row.revision != revision.number {
                return Err(AnnalError::invariant(format!(
                    "audit row for {}#{} carries revision {} inside unit {}",
                    row.entity_type, row.entity_id, row.revision, revision.number
                )));
            }

            let live = self.lifetime_is_live(&tx, &row.entity_type, &row.entity_id)?;
            match row.revision_type {
                RevisionType::Add => {
                    if live {
                        return Err(AnnalError::invariant(format!(
                            "ADD for {}#{} over a live lifetime",
                            row.entity_type, row.entity_id
                        )));
                    }
                }
                RevisionType::Mod | RevisionType::Del => {
                    if !live {
                        return Err(AnnalError::invariant(format!(
                            "{} for {}#{} without a live lifetime",
                            row.revision_type.as_str(),
                            row.entity_type,
                            row.entity_id
                        )));
                    }
                }
            }

            tx.execute(
                &format!(
                    r#"INSERT INTO {}
                       (entity_type, entity_id, revision, revision_type, fields)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    self.entity_table
                ),
                params![
                    row.entity_type,
                    row.entity_id,
                    row.revision,
                    row.revision_type.as_str(),
                    Self::serialize_fields(&row.fields)?,
                ],
            )?;
        }

        for event in events {
            if event.revision != revision.number {
                return Err(AnnalError::invariant(format!(
                    "membership event for {}#{} carries revision {} inside unit {}",
                    event.owner_type, event.owner_id, event.revision, revision.number
                )));
            }

            // Drop events that would not change membership, keeping the
            // stored stream strictly alternating per pair.
            let member = self.pair_is_member(&tx, event)?;
            let redundant = match event.op {
                MembershipOp::Add => member,
                MembershipOp::Del => !member,
            };
            if redundant {
                debug!(
                    owner = %format!("{}#{}", event.owner_type, event.owner_id),
                    element = %format!("{}#{}", event.element_type, event.element_id),
                    op = event.op.as_str(),
                    "Suppressing redundant membership event"
                );
                continue;
            }

            tx.execute(
                &format!(
                    r#"INSERT INTO {}
                       (owner_type, owner_id, element_type, element_id, revision, op)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    self.collection_table
                ),
                params![
                    event.owner_type,
                    event.owner_id,
                    event.element_type,
                    event.element_id,
                    event.revision,
                    event.op.as_str(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn max_revision(&self) -> AnnalResult<Option<RevisionNumber>> {
        let conn = self.conn.lock().unwrap();
        let max: Option<RevisionNumber> = conn.query_row(
            &format!("SELECT MAX(revision) FROM {}", self.revision_table),
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn revision_info(&self, number: RevisionNumber) -> AnnalResult<Option<Revision>> {
        let conn = self.conn.lock().unwrap();
        let record: Option<(String, Option<String>)> = conn
            .query_row(
                &format!(
                    "SELECT created_at, metadata FROM {} WHERE revision = ?1",
                    self.revision_table
                ),
                params![number],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((created_at, metadata)) = record else {
            return Ok(None);
        };
        Ok(Some(Revision {
            number,
            timestamp: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    AnnalError::database(format!("invalid timestamp in revision table: {e}"))
                })?,
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        }))
    }

    fn revision_at(&self, timestamp: DateTime<Utc>) -> AnnalResult<Option<RevisionNumber>> {
        let conn = self.conn.lock().unwrap();
        let number: Option<RevisionNumber> = conn
            .query_row(
                &format!(
                    r#"SELECT revision FROM {}
                       WHERE created_at <= ?1
                       ORDER BY revision DESC
                       LIMIT 1"#,
                    self.revision_table
                ),
                params![timestamp.to_rfc3339()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn commit(
        store: &SqliteAuditStore,
        number: RevisionNumber,
        rows: Vec<AuditRow>,
        events: Vec<CollectionEvent>,
    ) -> Revision {
        let revision = Revision::new(number);
        store.append_unit(&revision, &rows, &events).unwrap();
        revision
    }

    #[test]
    fn test_append_and_read_rows() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(
            &store,
            1,
            vec![AuditRow::new(
                "Order",
                "o-1",
                1,
                RevisionType::Add,
                fields(&[("status", serde_json::json!("open"))]),
            )],
            vec![],
        );
        commit(
            &store,
            2,
            vec![AuditRow::new(
                "Order",
                "o-1",
                2,
                RevisionType::Mod,
                fields(&[("status", serde_json::json!("shipped"))]),
            )],
            vec![],
        );

        let all = store.rows("Order", "o-1", None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].revision, 1);
        assert_eq!(all[0].revision_type, RevisionType::Add);
        assert_eq!(all[1].revision, 2);

        let capped = store.rows("Order", "o-1", Some(1)).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_snapshot_row_picks_latest_at_or_before() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(
            &store,
            1,
            vec![AuditRow::new(
                "Order",
                "o-1",
                1,
                RevisionType::Add,
                fields(&[("status", serde_json::json!("open"))]),
            )],
            vec![],
        );
        commit(
            &store,
            3,
            vec![AuditRow::new(
                "Order",
                "o-1",
                3,
                RevisionType::Mod,
                fields(&[("status", serde_json::json!("shipped"))]),
            )],
            vec![],
        );

        let at_2 = store.snapshot_row("Order", "o-1", 2).unwrap().unwrap();
        assert_eq!(at_2.revision, 1);
        assert_eq!(at_2.fields["status"], serde_json::json!("open"));

        let at_9 = store.snapshot_row("Order", "o-1", 9).unwrap().unwrap();
        assert_eq!(at_9.revision, 3);

        assert!(store.snapshot_row("Order", "o-2", 9).unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_stale_revision() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(&store, 2, vec![], vec![]);

        let err = store
            .append_unit(&Revision::new(2), &[], &[])
            .unwrap_err();
        assert!(matches!(err, AnnalError::InvariantViolation { .. }));

        // The failed unit must not have recorded anything.
        assert_eq!(store.max_revision().unwrap(), Some(2));
    }

    #[test]
    fn test_append_rejects_mod_without_lifetime() {
        let store = SqliteAuditStore::in_memory().unwrap();

        let row = AuditRow::new("Order", "ghost", 1, RevisionType::Mod, HashMap::new());
        let err = store
            .append_unit(&Revision::new(1), &[row], &[])
            .unwrap_err();
        assert!(matches!(err, AnnalError::InvariantViolation { .. }));
    }

    #[test]
    fn test_append_rejects_add_over_live_lifetime() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(
            &store,
            1,
            vec![AuditRow::new(
                "Order",
                "o-1",
                1,
                RevisionType::Add,
                HashMap::new(),
            )],
            vec![],
        );

        let dup = AuditRow::new("Order", "o-1", 2, RevisionType::Add, HashMap::new());
        let err = store
            .append_unit(&Revision::new(2), &[dup], &[])
            .unwrap_err();
        assert!(matches!(err, AnnalError::InvariantViolation { .. }));
    }

    #[test]
    fn test_add_after_del_begins_new_lifetime() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(
            &store,
            1,
            vec![AuditRow::new(
                "Order",
                "o-1",
                1,
                RevisionType::Add,
                HashMap::new(),
            )],
            vec![],
        );
        commit(
            &store,
            2,
            vec![AuditRow::new(
                "Order",
                "o-1",
                2,
                RevisionType::Del,
                HashMap::new(),
            )],
            vec![],
        );
        commit(
            &store,
            3,
            vec![AuditRow::new(
                "Order",
                "o-1",
                3,
                RevisionType::Add,
                HashMap::new(),
            )],
            vec![],
        );

        let all = store.rows("Order", "o-1", None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].revision_type, RevisionType::Add);
    }

    #[test]
    fn test_redundant_membership_events_suppressed() {
        let store = SqliteAuditStore::in_memory().unwrap();

        // DEL of a pair that was never a member changes nothing.
        commit(
            &store,
            1,
            vec![],
            vec![CollectionEvent::new(
                "Order", "o-1", "Item", "i-1", 1, MembershipOp::Del,
            )],
        );
        commit(
            &store,
            2,
            vec![],
            vec![CollectionEvent::new(
                "Order", "o-1", "Item", "i-1", 2, MembershipOp::Add,
            )],
        );
        // ADD while already a member changes nothing.
        commit(
            &store,
            3,
            vec![],
            vec![CollectionEvent::new(
                "Order", "o-1", "Item", "i-1", 3, MembershipOp::Add,
            )],
        );

        let events = store
            .collection_events_for_owner("Order", "o-1", "Item")
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].revision, 2);
        assert_eq!(events[0].op, MembershipOp::Add);
    }

    #[test]
    fn test_collection_revisions_cover_both_sides() {
        let store = SqliteAuditStore::in_memory().unwrap();

        commit(
            &store,
            1,
            vec![],
            vec![CollectionEvent::new(
                "Order", "o-1", "Item", "i-1", 1, MembershipOp::Add,
            )],
        );
        commit(
            &store,
            4,
            vec![],
            vec![CollectionEvent::new(
                "Order", "o-2", "Item", "i-1", 4, MembershipOp::Add,
            )],
        );

        assert_eq!(store.collection_revisions("Order", "o-1").unwrap(), vec![1]);
        assert_eq!(
            store.collection_revisions("Item", "i-1").unwrap(),
            vec![1, 4]
        );

        let element_side = store
            .collection_events_for_element("Order", "Item", "i-1")
            .unwrap();
        assert_eq!(element_side.len(), 2);
        assert_eq!(element_side[0].owner_id, "o-1");
        assert_eq!(element_side[1].owner_id, "o-2");
    }

    #[test]
    fn test_revision_info_round_trip() {
        let store = SqliteAuditStore::in_memory().unwrap();

        let revision =
            Revision::new(1).with_metadata(serde_json::json!({"author": "housekeeping"}));
        store.append_unit(&revision, &[], &[]).unwrap();

        let info = store.revision_info(1).unwrap().unwrap();
        assert_eq!(info.number, 1);
        assert_eq!(info.metadata, revision.metadata);
        assert!(store.revision_info(9).unwrap().is_none());
    }

    #[test]
    fn test_revision_at_timestamp() {
        let store = SqliteAuditStore::in_memory().unwrap();

        let mut r1 = Revision::new(1);
        r1.timestamp = Utc::now() - chrono::Duration::hours(2);
        store.append_unit(&r1, &[], &[]).unwrap();

        let mut r2 = Revision::new(2);
        r2.timestamp = Utc::now() - chrono::Duration::hours(1);
        store.append_unit(&r2, &[], &[]).unwrap();

        let at = store
            .revision_at(Utc::now() - chrono::Duration::minutes(90))
            .unwrap();
        assert_eq!(at, Some(1));

        assert_eq!(store.revision_at(Utc::now()).unwrap(), Some(2));
        assert_eq!(
            store
                .revision_at(Utc::now() - chrono::Duration::hours(3))
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_max_revision_empty_store() {
        let store = SqliteAuditStore::in_memory().unwrap();
        assert_eq!(store.max_revision().unwrap(), None);
    }
}
