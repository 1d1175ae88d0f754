//! Audit history storage: append-only rows, membership events, and the
//! committing boundary that turns buffered changes into revisions.

mod row;
mod store;
mod work;

pub use row::{AuditRow, CollectionEvent, MembershipOp, RevisionType};
pub use store::{AuditStore, SqliteAuditStore};
pub use work::WorkUnit;
