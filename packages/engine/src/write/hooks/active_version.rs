use async_trait::async_trait;

use crate::builtin_schema::ACTIVE_VERSION_SCHEMA_KEY;
use crate::errors::integrity_error;
use crate::StrataError;

use super::super::context::{ExecutionSession, StateRow};
use super::super::state_write::{EntityDelete, EntityWrite};
use super::{snapshot_text, SchemaHook};

pub(super) struct ActiveVersionHook;

#[async_trait(?Send)]
impl SchemaHook for ActiveVersionHook {
    fn schema_key(&self) -> &'static str {
        ACTIVE_VERSION_SCHEMA_KEY
    }

    async fn before_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        let version_id = snapshot_text(&write.snapshot, "version_id").unwrap_or_default();
        if session.state.versions.contains(version_id) {
            Ok(())
        } else {
            Err(integrity_error(&format!(
                "cannot activate unknown version `{version_id}`"
            )))
        }
    }

    async fn after_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &EntityWrite,
    ) -> Result<(), StrataError> {
        if let Some(version_id) = snapshot_text(&write.snapshot, "version_id") {
            tracing::debug!(target: "strata::write", version_id, "switched active version");
            session.state.active_version_id = version_id.to_string();
        }
        Ok(())
    }

    async fn before_delete(
        &self,
        _session: &mut ExecutionSession<'_>,
        _row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        Err(integrity_error("the active version pointer cannot be deleted"))
    }
}
