//! Criterion compilation into point-in-time SQL.

mod builder;
mod params;

pub use builder::{CompiledQuery, QueryBuilder};
pub use params::{Connective, Parameters, ScopeId};
