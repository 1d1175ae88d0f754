//! Composable point-in-time predicates.
//!
//! A [`Criterion`] is an immutable tree of atoms and combinators. Building
//! one never touches storage; compiling one appends conditions to a
//! [`QueryBuilder`] scope by scope, validating every referenced attribute and
//! association against the schema on the way.

use serde::{Deserialize, Serialize};

use crate::error::AnnalResult;
use crate::query::{QueryBuilder, ScopeId};
use crate::revision::RevisionNumber;

/// Comparison applied to one audited attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOp {
    /// Equal to.
    Eq(serde_json::Value),
    /// Not equal to.
    Ne(serde_json::Value),
    /// Greater than.
    Gt(serde_json::Value),
    /// Greater than or equal to.
    Gte(serde_json::Value),
    /// Less than.
    Lt(serde_json::Value),
    /// Less than or equal to.
    Lte(serde_json::Value),
    /// In list.
    In(Vec<serde_json::Value>),
    /// Between range (inclusive).
    Between {
        min: serde_json::Value,
        max: serde_json::Value,
    },
    /// SQL LIKE pattern match.
    Like(String),
}

/// One attribute comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCondition {
    /// Attribute name to compare.
    pub name: String,
    /// Comparison to apply.
    pub op: PropertyOp,
}

/// Comparison applied to the snapshot row's revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl RevisionOp {
    fn sql_op(&self) -> &'static str {
        match self {
            RevisionOp::Eq => "=",
            RevisionOp::Lt => "<",
            RevisionOp::Lte => "<=",
            RevisionOp::Gt => ">",
            RevisionOp::Gte => ">=",
        }
    }
}

/// A point-in-time predicate over one entity type.
///
/// Combinators own their children; constructors return new nodes and never
/// mutate existing ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criterion {
    /// Attribute comparison on the snapshot row.
    Property(PropertyCondition),
    /// Entity id equality.
    Id { id: String },
    /// Revision comparison on the snapshot row.
    Revision {
        op: RevisionOp,
        revision: RevisionNumber,
    },
    /// The entity had been created at or before the given revision.
    CreatedOnOrBefore { revision: RevisionNumber },
    /// The entity existed and was not deleted as of the given revision.
    AliveAt { revision: RevisionNumber },
    /// The named collection contains the given element id.
    Contains {
        association: String,
        element_id: String,
    },
    /// All children hold.
    And(Vec<Criterion>),
    /// At least one child holds.
    Or(Vec<Criterion>),
    /// The child does not hold.
    Not(Box<Criterion>),
}

impl Criterion {
    /// Create an attribute equality criterion.
    pub fn eq(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Eq(value.into()))
    }

    /// Create an attribute inequality criterion.
    pub fn ne(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Ne(value.into()))
    }

    /// Create a greater-than criterion.
    pub fn gt(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Gt(value.into()))
    }

    /// Create a greater-than-or-equal criterion.
    pub fn gte(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Gte(value.into()))
    }

    /// Create a less-than criterion.
    pub fn lt(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Lt(value.into()))
    }

    /// Create a less-than-or-equal criterion.
    pub fn lte(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::Lte(value.into()))
    }

    /// Create an inclusive range criterion.
    pub fn between(
        name: impl Into<String>,
        min: impl Into<serde_json::Value>,
        max: impl Into<serde_json::Value>,
    ) -> Self {
        Self::property(
            name,
            PropertyOp::Between {
                min: min.into(),
                max: max.into(),
            },
        )
    }

    /// Create an in-list criterion.
    pub fn in_list(name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self::property(name, PropertyOp::In(values))
    }

    /// Create a LIKE pattern criterion.
    pub fn like(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::property(name, PropertyOp::Like(pattern.into()))
    }

    fn property(name: impl Into<String>, op: PropertyOp) -> Self {
        Criterion::Property(PropertyCondition {
            name: name.into(),
            op,
        })
    }

    /// Create an entity-id equality criterion.
    pub fn id_eq(id: impl Into<String>) -> Self {
        Criterion::Id { id: id.into() }
    }

    /// Create a snapshot-revision equality criterion.
    pub fn revision_eq(revision: RevisionNumber) -> Self {
        Criterion::Revision {
            op: RevisionOp::Eq,
            revision,
        }
    }

    /// Create a snapshot-revision less-than criterion.
    pub fn revision_lt(revision: RevisionNumber) -> Self {
        Criterion::Revision {
            op: RevisionOp::Lt,
            revision,
        }
    }

    /// Create a snapshot-revision less-than-or-equal criterion.
    pub fn revision_lte(revision: RevisionNumber) -> Self {
        Criterion::Revision {
            op: RevisionOp::Lte,
            revision,
        }
    }

    /// Create a snapshot-revision greater-than criterion.
    pub fn revision_gt(revision: RevisionNumber) -> Self {
        Criterion::Revision {
            op: RevisionOp::Gt,
            revision,
        }
    }

    /// Create a snapshot-revision greater-than-or-equal criterion.
    pub fn revision_gte(revision: RevisionNumber) -> Self {
        Criterion::Revision {
            op: RevisionOp::Gte,
            revision,
        }
    }

    /// Create a "created at or before this revision" criterion.
    pub fn created_on_or_before(revision: RevisionNumber) -> Self {
        Criterion::CreatedOnOrBefore { revision }
    }

    /// Create an "existed, not yet deleted, as of this revision" criterion.
    pub fn alive_at(revision: RevisionNumber) -> Self {
        Criterion::AliveAt { revision }
    }

    /// Create a collection membership criterion.
    pub fn contains(association: impl Into<String>, element_id: impl Into<String>) -> Self {
        Criterion::Contains {
            association: association.into(),
            element_id: element_id.into(),
        }
    }

    /// Create an AND combinator.
    pub fn and(criteria: Vec<Criterion>) -> Self {
        Criterion::And(criteria)
    }

    /// Create an OR combinator.
    pub fn or(criteria: Vec<Criterion>) -> Self {
        Criterion::Or(criteria)
    }

    /// Create a NOT combinator.
    pub fn not(criterion: Criterion) -> Self {
        Criterion::Not(Box::new(criterion))
    }

    /// Compile this node into the given scope.
    ///
    /// Atoms append one condition. AND opens an AND-joined child scope, OR
    /// an OR-joined one, and NOT a negated one, so nesting in the tree maps
    /// one-to-one onto parenthesized SQL. A combinator with no children is
    /// not an error: an empty AND constrains nothing and an empty OR matches
    /// nothing.
    pub fn add_to_query(&self, qb: &mut QueryBuilder<'_>, scope: ScopeId) -> AnnalResult<()> {
        match self {
            Criterion::Property(condition) => {
                let expr = qb.property_expr(&condition.name)?;
                let (sql, binds) = match &condition.op {
                    PropertyOp::Eq(v) => (format!("{expr} = ?"), vec![v.clone()]),
                    PropertyOp::Ne(v) => (format!("{expr} != ?"), vec![v.clone()]),
                    PropertyOp::Gt(v) => (format!("{expr} > ?"), vec![v.clone()]),
                    PropertyOp::Gte(v) => (format!("{expr} >= ?"), vec![v.clone()]),
                    PropertyOp::Lt(v) => (format!("{expr} < ?"), vec![v.clone()]),
                    PropertyOp::Lte(v) => (format!("{expr} <= ?"), vec![v.clone()]),
                    PropertyOp::Between { min, max } => (
                        format!("{expr} BETWEEN ? AND ?"),
                        vec![min.clone(), max.clone()],
                    ),
                    PropertyOp::In(values) => {
                        if values.is_empty() {
                            ("1=0".to_string(), vec![])
                        } else {
                            let placeholders = vec!["?"; values.len()].join(", ");
                            (format!("{expr} IN ({placeholders})"), values.clone())
                        }
                    }
                    PropertyOp::Like(pattern) => (
                        format!("{expr} LIKE ?"),
                        vec![serde_json::Value::String(pattern.clone())],
                    ),
                };
                qb.add_condition(scope, sql, binds);
                Ok(())
            }
            Criterion::Id { id } => {
                let sql = format!("{} = ?", qb.id_expr());
                qb.add_condition(scope, sql, vec![serde_json::Value::String(id.clone())]);
                Ok(())
            }
            Criterion::Revision { op, revision } => {
                let sql = format!("{} {} ?", qb.revision_expr(), op.sql_op());
                qb.add_condition(scope, sql, vec![serde_json::Value::from(*revision)]);
                Ok(())
            }
            Criterion::CreatedOnOrBefore { revision } => {
                qb.created_condition(scope, *revision);
                Ok(())
            }
            Criterion::AliveAt { revision } => {
                qb.alive_condition(scope, *revision);
                Ok(())
            }
            Criterion::Contains {
                association,
                element_id,
            } => qb.contains_condition(scope, association, element_id),
            Criterion::And(children) => {
                let and = qb.and_scope(scope);
                for child in children {
                    child.add_to_query(qb, and)?;
                }
                Ok(())
            }
            Criterion::Or(children) => {
                let or = qb.or_scope(scope);
                for child in children {
                    child.add_to_query(qb, or)?;
                }
                Ok(())
            }
            Criterion::Not(inner) => {
                let not = qb.negated_scope(scope);
                inner.add_to_query(qb, not)
            }
        }
    }
}
