//! Schema-backed entity views: read projections and write interception.

mod read;
pub(crate) mod values;
mod write;

pub(crate) use read::{
    build_entity_view_query, ViewReference, HISTORY_OPERATIONAL_COLUMNS,
    STATE_OPERATIONAL_COLUMNS,
};
pub(crate) use write::EntityViewInterceptor;
