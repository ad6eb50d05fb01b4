use async_trait::async_trait;

use crate::builtin_schema::{is_builtin_schema_key, STORED_SCHEMA_KEY};
use crate::errors::{integrity_error, schema_error};
use crate::schema::SchemaDefinition;
use crate::StrataError;

use super::super::context::{ExecutionSession, StateRow};
use super::super::state_write::{EntityDelete, EntityWrite};
use super::{snapshot_text, SchemaHook};

pub(super) struct StoredSchemaHook;

fn definition_of(write: &EntityWrite) -> Result<SchemaDefinition, StrataError> {
    let value = write
        .snapshot
        .get("value")
        .cloned()
        .ok_or_else(|| schema_error("stored schema is missing its definition"))?;
    SchemaDefinition::parse(value)
}

#[async_trait(?Send)]
impl SchemaHook for StoredSchemaHook {
    fn schema_key(&self) -> &'static str {
        STORED_SCHEMA_KEY
    }

    async fn before_write(
        &self,
        _session: &mut ExecutionSession<'_>,
        write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        let definition = definition_of(write)?;
        let key = snapshot_text(&write.snapshot, "key");
        let version = snapshot_text(&write.snapshot, "version");
        if key != Some(definition.key.as_str()) || version != Some(definition.version.as_str()) {
            return Err(schema_error(&format!(
                "stored schema row ({}, {}) does not match its definition ({}, {})",
                key.unwrap_or_default(),
                version.unwrap_or_default(),
                definition.key,
                definition.version
            )));
        }
        if is_builtin_schema_key(&definition.key) {
            return Err(schema_error(&format!(
                "schema key `{}` is reserved for a built-in schema",
                definition.key
            )));
        }
        Ok(())
    }

    async fn after_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &EntityWrite,
    ) -> Result<(), StrataError> {
        let definition = session.state.registry.register(definition_of(write)?)?;
        tracing::debug!(
            target: "strata::write",
            schema_key = %definition.key,
            schema_version = %definition.version,
            "registered schema"
        );
        Ok(())
    }

    async fn before_delete(
        &self,
        _session: &mut ExecutionSession<'_>,
        row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        Err(integrity_error(&format!(
            "stored schema `{}` cannot be deleted",
            row.entity_id
        )))
    }
}
