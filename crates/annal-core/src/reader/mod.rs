//! Read side of the audit engine: point-in-time reconstruction and the
//! reader facade over history queries.

mod main;
mod reconstruct;

pub use main::AuditReader;
pub use reconstruct::{Reconstructor, Snapshot};
