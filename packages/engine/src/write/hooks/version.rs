use async_trait::async_trait;

use crate::builtin_schema::VERSION_SCHEMA_KEY;
use crate::errors::{integrity_error, traversal_error};
use crate::StrataError;

use super::super::context::{ExecutionSession, StateRow, GLOBAL_VERSION_ID};
use super::super::state_write::{EntityDelete, EntityWrite};
use super::{snapshot_text, SchemaHook};

pub(super) struct VersionHook;

#[async_trait(?Send)]
impl SchemaHook for VersionHook {
    fn schema_key(&self) -> &'static str {
        VERSION_SCHEMA_KEY
    }

    async fn before_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        let Some(parent_id) = snapshot_text(&write.snapshot, "inherits_from_version_id") else {
            return Ok(());
        };
        if write.entity_id == GLOBAL_VERSION_ID {
            return Err(integrity_error("the global version cannot inherit from another version"));
        }
        if !session.state.versions.contains(parent_id) {
            return Err(integrity_error(&format!(
                "version `{}` inherits from unknown version `{parent_id}`",
                write.entity_id
            )));
        }
        if session
            .state
            .versions
            .would_create_cycle(&write.entity_id, parent_id)
        {
            return Err(traversal_error(&format!(
                "version `{}` inheriting from `{parent_id}` would create a cycle",
                write.entity_id
            )));
        }
        Ok(())
    }

    async fn after_write(
        &self,
        session: &mut ExecutionSession<'_>,
        _write: &EntityWrite,
    ) -> Result<(), StrataError> {
        session.refresh_versions().await
    }

    async fn before_delete(
        &self,
        session: &mut ExecutionSession<'_>,
        row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        if row.entity_id == GLOBAL_VERSION_ID {
            return Err(integrity_error("the global version cannot be deleted"));
        }
        if row.entity_id == session.state.active_version_id {
            return Err(integrity_error(&format!(
                "version `{}` is active; switch to another version before deleting it",
                row.entity_id
            )));
        }
        let children = session.state.versions.children(&row.entity_id);
        if !children.is_empty() {
            return Err(integrity_error(&format!(
                "version `{}` cannot be deleted while `{}` inherit from it",
                row.entity_id,
                children.join("`, `")
            )));
        }
        Ok(Vec::new())
    }

    async fn after_delete(
        &self,
        session: &mut ExecutionSession<'_>,
        _row: &StateRow,
    ) -> Result<(), StrataError> {
        session.refresh_versions().await
    }
}
