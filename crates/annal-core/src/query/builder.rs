//! Builds point-in-time SQL over the audit tables.
//!
//! One builder compiles one criterion tree against one entity type and one
//! target revision. The builder owns the scope arena, issues table aliases,
//! and emits the implicit snapshot frame; criteria only append conditions
//! through it.

use std::collections::HashMap;

use crate::error::{AnnalError, AnnalResult};
use crate::query::params::{Connective, Parameters, ScopeId};
use crate::revision::RevisionNumber;
use crate::schema::{AuditSchema, CollectionSide, EntityDescriptor};

/// A compiled query: SQL text plus bind values in placeholder order.
///
/// Executed by the store, which converts the JSON bind values to SQLite
/// parameters. The query selects matching entity ids, ordered ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub binds: Vec<serde_json::Value>,
}

/// Compilation state for one query.
#[derive(Debug)]
pub struct QueryBuilder<'a> {
    entity: &'a EntityDescriptor,
    entity_table: &'a str,
    collection_table: &'a str,
    target: RevisionNumber,
    params: Parameters,
    root: ScopeId,
    aliases: HashMap<String, usize>,
}

impl<'a> QueryBuilder<'a> {
    /// Start a query against one entity type at one target revision.
    ///
    /// Emits the implicit frame into the root scope: restrict to the entity
    /// type, pick each id's latest audit row at or before the target, and
    /// drop rows whose snapshot is a deletion.
    pub fn new(
        schema: &'a AuditSchema,
        entity_type: &str,
        entity_table: &'a str,
        collection_table: &'a str,
        target: RevisionNumber,
    ) -> AnnalResult<Self> {
        let entity = schema.entity(entity_type)?;
        let (params, root) = Parameters::new(Connective::And);
        let mut builder = Self {
            entity,
            entity_table,
            collection_table,
            target,
            params,
            root,
            aliases: HashMap::new(),
        };
        builder.push_frame();
        Ok(builder)
    }

    fn push_frame(&mut self) {
        self.params.add_condition(
            self.root,
            "e.entity_type = ?",
            vec![serde_json::Value::String(self.entity.name.clone())],
        );

        let a = self.alias("e");
        self.params.add_condition(
            self.root,
            format!(
                "e.revision = (SELECT MAX({a}.revision) FROM {t} {a} \
                 WHERE {a}.entity_type = e.entity_type AND {a}.entity_id = e.entity_id \
                 AND {a}.revision <= ?)",
                t = self.entity_table
            ),
            vec![serde_json::Value::from(self.target)],
        );

        self.params
            .add_condition(self.root, "e.revision_type != 'DEL'", vec![]);
    }

    /// The root scope criteria are added into.
    pub fn root_scope(&self) -> ScopeId {
        self.root
    }

    /// Issue a fresh table alias with the given prefix. Counters are per
    /// prefix, so repeated references to the same table stay distinct.
    pub fn alias(&mut self, prefix: &str) -> String {
        let counter = self.aliases.entry(prefix.to_string()).or_insert(0);
        let alias = format!("{prefix}{counter}");
        *counter += 1;
        alias
    }

    /// Append a condition to a scope.
    pub fn add_condition(
        &mut self,
        scope: ScopeId,
        sql: impl Into<String>,
        binds: Vec<serde_json::Value>,
    ) {
        self.params.add_condition(scope, sql, binds);
    }

    /// Open an OR-joined child scope.
    pub fn or_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.params.add_scope(parent, Connective::Or)
    }

    /// Open an AND-joined child scope.
    pub fn and_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.params.add_scope(parent, Connective::And)
    }

    /// Open a child scope rendered under `NOT (...)`.
    pub fn negated_scope(&mut self, parent: ScopeId) -> ScopeId {
        self.params.add_negated_scope(parent, Connective::And)
    }

    /// SQL expression reading one audited attribute off the snapshot row.
    /// The attribute must be declared on the entity descriptor.
    pub fn property_expr(&self, name: &str) -> AnnalResult<String> {
        if !self.entity.has_field(name) {
            return Err(AnnalError::unknown_attribute(&self.entity.name, name));
        }
        Ok(format!("json_extract(e.fields, '$.{name}')"))
    }

    /// SQL expression for the snapshot row's entity id.
    pub fn id_expr(&self) -> &'static str {
        "e.entity_id"
    }

    /// SQL expression for the snapshot row's revision.
    pub fn revision_expr(&self) -> &'static str {
        "e.revision"
    }

    /// Push "the entity's collection contains this element at the target
    /// revision" for a declared association, on whichever side it is.
    pub fn contains_condition(
        &mut self,
        scope: ScopeId,
        association: &str,
        element_id: &str,
    ) -> AnnalResult<()> {
        let descriptor = self
            .entity
            .collection(association)
            .ok_or_else(|| AnnalError::unknown_association(&self.entity.name, association))?;

        let outer = self.alias("ce");
        let inner = self.alias("ce");

        // Membership holds when the pair's latest event at or before the
        // target is an ADD. Events are read from the queried side's
        // perspective; the stored key is always (owner, element).
        let (key_sql, mut binds) = match descriptor.side {
            CollectionSide::Owning => (
                format!(
                    "{outer}.owner_type = ? AND {outer}.owner_id = e.entity_id \
                     AND {outer}.element_type = ? AND {outer}.element_id = ?"
                ),
                vec![
                    serde_json::Value::String(self.entity.name.clone()),
                    serde_json::Value::String(descriptor.element_type.clone()),
                    serde_json::Value::String(element_id.to_string()),
                ],
            ),
            CollectionSide::Inverse => (
                format!(
                    "{outer}.owner_type = ? AND {outer}.owner_id = ? \
                     AND {outer}.element_type = ? AND {outer}.element_id = e.entity_id"
                ),
                vec![
                    serde_json::Value::String(descriptor.element_type.clone()),
                    serde_json::Value::String(element_id.to_string()),
                    serde_json::Value::String(self.entity.name.clone()),
                ],
            ),
        };

        let sql = format!(
            "EXISTS (SELECT 1 FROM {t} {outer} WHERE {key_sql} \
             AND {outer}.op = 'ADD' \
             AND {outer}.revision = (SELECT MAX({inner}.revision) FROM {t} {inner} \
             WHERE {inner}.owner_type = {outer}.owner_type \
             AND {inner}.owner_id = {outer}.owner_id \
             AND {inner}.element_type = {outer}.element_type \
             AND {inner}.element_id = {outer}.element_id \
             AND {inner}.revision <= ?))",
            t = self.collection_table
        );
        binds.push(serde_json::Value::from(self.target));
        self.params.add_condition(scope, sql, binds);
        Ok(())
    }

    /// Push "an ADD row for the entity exists at or before the given
    /// revision".
    pub fn created_condition(&mut self, scope: ScopeId, revision: RevisionNumber) {
        let a = self.alias("e");
        let sql = format!(
            "EXISTS (SELECT 1 FROM {t} {a} \
             WHERE {a}.entity_type = e.entity_type AND {a}.entity_id = e.entity_id \
             AND {a}.revision_type = 'ADD' AND {a}.revision <= ?)",
            t = self.entity_table
        );
        self.params
            .add_condition(scope, sql, vec![serde_json::Value::from(revision)]);
    }

    /// Push "the entity's latest row at or before the given revision exists
    /// and is not a deletion".
    pub fn alive_condition(&mut self, scope: ScopeId, revision: RevisionNumber) {
        let a = self.alias("e");
        let sql = format!(
            "COALESCE((SELECT {a}.revision_type FROM {t} {a} \
             WHERE {a}.entity_type = e.entity_type AND {a}.entity_id = e.entity_id \
             AND {a}.revision <= ? \
             ORDER BY {a}.revision DESC LIMIT 1), 'DEL') != 'DEL'",
            t = self.entity_table
        );
        self.params
            .add_condition(scope, sql, vec![serde_json::Value::from(revision)]);
    }

    /// Render the accumulated scopes into the final id-selection query.
    pub fn compile(self) -> CompiledQuery {
        let (where_sql, binds) = self.params.render(self.root);
        CompiledQuery {
            sql: format!(
                "SELECT e.entity_id FROM {} e WHERE {} ORDER BY e.entity_id ASC",
                self.entity_table, where_sql
            ),
            binds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityDescriptor;

    fn schema() -> AuditSchema {
        AuditSchema::builder()
            .entity(
                EntityDescriptor::new("Owning")
                    .field("data")
                    .owned_collection("references", "Owned"),
            )
            .entity(
                EntityDescriptor::new("Owned")
                    .field("data")
                    .inverse_collection("referencing", "Owning"),
            )
            .build()
            .unwrap()
    }

    fn builder<'a>(schema: &'a AuditSchema, entity_type: &str) -> QueryBuilder<'a> {
        QueryBuilder::new(schema, entity_type, "entity_audit", "collection_audit", 5).unwrap()
    }

    #[test]
    fn test_frame_selects_live_snapshot_rows() {
        let schema = schema();
        let query = builder(&schema, "Owning").compile();

        assert!(query.sql.starts_with("SELECT e.entity_id FROM entity_audit e WHERE "));
        assert!(query.sql.contains("e.entity_type = ?"));
        assert!(query.sql.contains("e.revision = (SELECT MAX(e0.revision)"));
        assert!(query.sql.contains("e.revision_type != 'DEL'"));
        assert!(query.sql.ends_with("ORDER BY e.entity_id ASC"));
        assert_eq!(
            query.binds,
            vec![serde_json::json!("Owning"), serde_json::json!(5)]
        );
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let schema = schema();
        let err =
            QueryBuilder::new(&schema, "Ghost", "entity_audit", "collection_audit", 1).unwrap_err();
        assert!(matches!(err, AnnalError::Compilation { .. }));
    }

    #[test]
    fn test_property_expr_validates_attribute() {
        let schema = schema();
        let qb = builder(&schema, "Owning");

        assert_eq!(
            qb.property_expr("data").unwrap(),
            "json_extract(e.fields, '$.data')"
        );
        assert!(matches!(
            qb.property_expr("color").unwrap_err(),
            AnnalError::Compilation { .. }
        ));
    }

    #[test]
    fn test_aliases_stay_distinct_per_prefix() {
        let schema = schema();
        let mut qb = builder(&schema, "Owning");

        assert_eq!(qb.alias("ce"), "ce0");
        assert_eq!(qb.alias("ce"), "ce1");
        assert_eq!(qb.alias("ce"), "ce2");
        // The frame consumed e0 already.
        assert_eq!(qb.alias("e"), "e1");
    }

    #[test]
    fn test_two_contains_conditions_use_distinct_aliases() {
        let schema = schema();
        let mut qb = builder(&schema, "Owning");
        let root = qb.root_scope();
        qb.contains_condition(root, "references", "ed-1").unwrap();
        qb.contains_condition(root, "references", "ed-2").unwrap();
        let query = qb.compile();

        assert!(query.sql.contains("ce0.owner_type"));
        assert!(query.sql.contains("ce2.owner_type"));
    }

    #[test]
    fn test_inverse_contains_binds_owner_side() {
        let schema = schema();
        let mut qb = builder(&schema, "Owned");
        let root = qb.root_scope();
        qb.contains_condition(root, "referencing", "ing-1").unwrap();
        let query = qb.compile();

        assert!(query.sql.contains("ce0.element_id = e.entity_id"));
        // Frame binds first, then owner type + owner id + element type + target.
        assert_eq!(
            &query.binds[2..],
            &[
                serde_json::json!("Owning"),
                serde_json::json!("ing-1"),
                serde_json::json!("Owned"),
                serde_json::json!(5),
            ]
        );
    }

    #[test]
    fn test_unknown_association_rejected() {
        let schema = schema();
        let mut qb = builder(&schema, "Owning");
        let root = qb.root_scope();
        let err = qb.contains_condition(root, "phantoms", "x").unwrap_err();
        assert!(matches!(err, AnnalError::Compilation { .. }));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let schema = schema();

        let compile = || {
            let mut qb = builder(&schema, "Owning");
            let root = qb.root_scope();
            qb.contains_condition(root, "references", "ed-1").unwrap();
            let or = qb.or_scope(root);
            qb.add_condition(
                or,
                format!("{} = ?", qb.property_expr("data").unwrap()),
                vec![serde_json::json!("x")],
            );
            qb.compile()
        };

        assert_eq!(compile(), compile());
    }
}
