//! annal-core - Temporal audit engine.
//!
//! This crate records every change to registered entities as append-only
//! audit history, grouped into numbered revisions, and reconstructs any
//! entity, or query over entities, as of any past revision.
//!
//! # Example
//!
//! ```ignore
//! use annal_core::{AuditConfig, AuditReader, AuditSchema, Criterion, EntityDescriptor};
//! use annal_core::{RevisionClock, SqliteAuditStore, WorkUnit};
//!
//! let schema = AuditSchema::builder()
//!     .entity(EntityDescriptor::new("Account").field("balance"))
//!     .build()?;
//! let config = AuditConfig::in_memory();
//! let store = std::sync::Arc::new(SqliteAuditStore::open(&config)?);
//! let clock = RevisionClock::new();
//!
//! // Record a change
//! let mut unit = WorkUnit::new();
//! unit.create("Account", "acct-1", fields);
//! let revision = unit.commit(store.as_ref(), &clock)?;
//!
//! // Read it back as of that revision
//! let reader = AuditReader::new(store, schema, &config);
//! let snapshot = reader.find("Account", "acct-1", 1)?;
//! let matching = reader.query("Account", &Criterion::gt("balance", 100.into()), 1)?;
//! ```

pub mod audit;
pub mod config;
pub mod criteria;
pub mod error;
pub mod query;
pub mod reader;
pub mod revision;
pub mod schema;

// Re-export commonly used types
pub use audit::{AuditRow, AuditStore, CollectionEvent, MembershipOp, RevisionType, SqliteAuditStore, WorkUnit};
pub use config::AuditConfig;
pub use criteria::{Criterion, PropertyCondition, PropertyOp, RevisionOp};
pub use error::{AnnalError, AnnalResult};
pub use query::{CompiledQuery, QueryBuilder};
pub use reader::{AuditReader, Snapshot};
pub use revision::{Revision, RevisionClock, RevisionNumber};
pub use schema::{AuditSchema, CollectionDescriptor, CollectionSide, EntityDescriptor};
