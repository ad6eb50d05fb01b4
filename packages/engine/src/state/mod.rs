//! Tiered state storage and the resolved-state query builders.

pub mod cache_router;
pub mod history;
pub mod inheritance;
pub mod keys;
pub mod resolved;
pub(crate) mod tables;

pub use cache_router::{route_cache_tables, schema_key_filter, SchemaKeyFilter};
pub use history::{build_history_query, HistoryColumn, HistoryPredicate, HistoryRequest};
pub use inheritance::{ClosureEdge, VersionGraph};
pub use keys::{composite_entity_id, parse_resolved_pk, resolved_pk, ResolvedPk, TierTag};
pub use resolved::{build_resolved_state_query, PushdownPredicate, ResolvedStateRequest, StateColumn};
pub use tables::cache_table_name;

/// Logical relation names intercepted by the preprocessor.
pub const STATE_RELATION: &str = "state";
pub const STATE_BY_VERSION_RELATION: &str = "state_by_version";
pub const STATE_HISTORY_RELATION: &str = "state_history";
