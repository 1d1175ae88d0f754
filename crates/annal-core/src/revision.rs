//! Revision numbers, revision metadata, and the issuing clock.
//!
//! A revision is an immutable, strictly ordered checkpoint identifying one
//! committed batch of changes. All entity types share a single revision
//! sequence.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of one revision. Strictly increasing, globally ordered across
/// all entity types.
pub type RevisionNumber = u64;

/// Metadata recorded for one committed revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Revision number issued by the clock.
    pub number: RevisionNumber,
    /// When the revision was issued.
    pub timestamp: DateTime<Utc>,
    /// Optional opaque caller data (user id, request id, ...). Stored
    /// verbatim and returned by revision lookups; never inspected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Revision {
    /// Create a revision stamped with the current time and no metadata.
    pub fn new(number: RevisionNumber) -> Self {
        Self {
            number,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Builder: attach opaque metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Issues monotonically increasing revision numbers.
///
/// The clock hands out numbers; it does not decide transaction boundaries.
/// One revision per committed unit of change is a precondition the committing
/// layer upholds, and the store's append path asserts it.
#[derive(Debug)]
pub struct RevisionClock {
    next: AtomicU64,
}

impl RevisionClock {
    /// Create a clock that issues revisions starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Create a clock resuming after the given last issued revision, e.g.
    /// from [`AuditStore::max_revision`](crate::audit::AuditStore::max_revision)
    /// when reopening a file-backed store.
    pub fn resuming(last_issued: Option<RevisionNumber>) -> Self {
        Self {
            next: AtomicU64::new(last_issued.map_or(1, |n| n + 1)),
        }
    }

    /// Issue the next revision, stamped with the current time.
    pub fn next_revision(&self) -> Revision {
        Revision::new(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Issue the next revision carrying opaque metadata.
    pub fn next_revision_with(&self, metadata: serde_json::Value) -> Revision {
        self.next_revision().with_metadata(metadata)
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}
