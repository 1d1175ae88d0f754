//! Error types for annal operations.

use thiserror::Error;

use crate::revision::RevisionNumber;

/// Result type alias for annal operations.
pub type AnnalResult<T> = Result<T, AnnalError>;

/// Main error type for all annal operations.
#[derive(Error, Debug)]
pub enum AnnalError {
    /// No live snapshot of the entity exists at the requested revision.
    ///
    /// Covers both "the entity did not exist yet" and "the entity had been
    /// deleted by then" - deletion is an ordinary terminal state, not a
    /// distinguishable fault.
    #[error("no snapshot of {entity_type}#{entity_id} at revision {revision}")]
    NotFound {
        entity_type: String,
        entity_id: String,
        revision: RevisionNumber,
    },

    /// The requested revision was never issued, whether looked up by number
    /// or by instant.
    #[error("revision not found: {message}")]
    RevisionNotFound { message: String },

    /// A criterion referenced an attribute, association, or entity type
    /// unknown to the audited-entity schema.
    #[error("criteria compilation error: {message}")]
    Compilation { message: String },

    /// Stored history violated an ordering invariant (e.g. a MOD row before
    /// any ADD, or a double-ADD membership event). Surfaced to the caller
    /// rather than patched, since it indicates corrupted history.
    #[error("audit history invariant violated: {message}")]
    InvariantViolation { message: String },

    /// Database operation failed.
    #[error("database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnnalError {
    /// Create a not found error for a point-in-time lookup.
    pub fn not_found(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        revision: RevisionNumber,
    ) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            revision,
        }
    }

    /// Not found error for a revision-number lookup.
    pub fn revision_not_found(revision: RevisionNumber) -> Self {
        Self::RevisionNotFound {
            message: format!("revision {revision} was never issued"),
        }
    }

    /// Not found error for a timestamp lookup preceding all revisions.
    pub fn no_revision_at(timestamp: &chrono::DateTime<chrono::Utc>) -> Self {
        Self::RevisionNotFound {
            message: format!("no revision at or before {}", timestamp.to_rfc3339()),
        }
    }

    /// Create a compilation error.
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation {
            message: message.into(),
        }
    }

    /// Compilation error for an attribute missing from an entity descriptor.
    pub fn unknown_attribute(entity_type: &str, attribute: &str) -> Self {
        Self::Compilation {
            message: format!("entity '{entity_type}' has no audited attribute '{attribute}'"),
        }
    }

    /// Compilation error for an association missing from an entity descriptor.
    pub fn unknown_association(entity_type: &str, association: &str) -> Self {
        Self::Compilation {
            message: format!("entity '{entity_type}' has no audited association '{association}'"),
        }
    }

    /// Compilation error for an entity type missing from the schema.
    pub fn unknown_entity(entity_type: &str) -> Self {
        Self::Compilation {
            message: format!("entity type '{entity_type}' is not registered in the audit schema"),
        }
    }

    /// Create an invariant violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }
}

impl From<rusqlite::Error> for AnnalError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = AnnalError::not_found("Order", "o-17", 4);
        assert_eq!(err.to_string(), "no snapshot of Order#o-17 at revision 4");
    }

    #[test]
    fn test_unknown_attribute_is_compilation() {
        let err = AnnalError::unknown_attribute("Order", "color");
        assert!(matches!(err, AnnalError::Compilation { .. }));
        assert!(err.to_string().contains("color"));
    }

    #[test]
    fn test_invariant_message() {
        let err = AnnalError::invariant("MOD row before any ADD");
        assert!(err.to_string().contains("invariant violated"));
    }
}
