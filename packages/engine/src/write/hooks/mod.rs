//! Schema-specific rules that run around the generic entity write path.

mod active_version;
mod filesystem;
mod stored_schema;
mod version;

use async_trait::async_trait;

use crate::StrataError;

use super::context::{ExecutionSession, StateRow};
use super::state_write::{EntityDelete, EntityWrite};

#[async_trait(?Send)]
pub(crate) trait SchemaHook: Sync {
    fn schema_key(&self) -> &'static str;

    /// May rewrite the snapshot before validation.
    async fn before_write(
        &self,
        _session: &mut ExecutionSession<'_>,
        _write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        Ok(())
    }

    async fn after_write(
        &self,
        _session: &mut ExecutionSession<'_>,
        _write: &EntityWrite,
    ) -> Result<(), StrataError> {
        Ok(())
    }

    /// Returns further entities the deletion of `row` cascades to.
    async fn before_delete(
        &self,
        _session: &mut ExecutionSession<'_>,
        _row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        Ok(Vec::new())
    }

    async fn after_delete(
        &self,
        _session: &mut ExecutionSession<'_>,
        _row: &StateRow,
    ) -> Result<(), StrataError> {
        Ok(())
    }
}

const HOOKS: &[&dyn SchemaHook] = &[
    &filesystem::DirectoryHook,
    &filesystem::FileHook,
    &version::VersionHook,
    &active_version::ActiveVersionHook,
    &stored_schema::StoredSchemaHook,
];

fn hook_for(schema_key: &str) -> Option<&'static dyn SchemaHook> {
    HOOKS
        .iter()
        .copied()
        .find(|hook| hook.schema_key() == schema_key)
}

pub(super) async fn before_write(
    session: &mut ExecutionSession<'_>,
    write: &mut EntityWrite,
    previous: Option<&StateRow>,
) -> Result<(), StrataError> {
    match hook_for(&write.schema.key) {
        Some(hook) => hook.before_write(session, write, previous).await,
        None => Ok(()),
    }
}

pub(super) async fn after_write(
    session: &mut ExecutionSession<'_>,
    write: &EntityWrite,
) -> Result<(), StrataError> {
    match hook_for(&write.schema.key) {
        Some(hook) => hook.after_write(session, write).await,
        None => Ok(()),
    }
}

pub(super) async fn before_delete(
    session: &mut ExecutionSession<'_>,
    row: &StateRow,
) -> Result<Vec<EntityDelete>, StrataError> {
    match hook_for(&row.schema_key) {
        Some(hook) => hook.before_delete(session, row).await,
        None => Ok(Vec::new()),
    }
}

pub(super) async fn after_delete(
    session: &mut ExecutionSession<'_>,
    row: &StateRow,
) -> Result<(), StrataError> {
    match hook_for(&row.schema_key) {
        Some(hook) => hook.after_delete(session, row).await,
        None => Ok(()),
    }
}

/// Reads a string property from a snapshot, treating JSON null as absent.
pub(super) fn snapshot_text<'a>(snapshot: &'a serde_json::Value, property: &str) -> Option<&'a str> {
    snapshot.get(property).and_then(serde_json::Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::hook_for;
    use crate::builtin_schema::{
        ACTIVE_VERSION_SCHEMA_KEY, DIRECTORY_SCHEMA_KEY, FILE_SCHEMA_KEY, KEY_VALUE_SCHEMA_KEY,
        STORED_SCHEMA_KEY, VERSION_SCHEMA_KEY,
    };

    #[test]
    fn hooks_are_registered_per_schema_key() {
        for key in [
            DIRECTORY_SCHEMA_KEY,
            FILE_SCHEMA_KEY,
            VERSION_SCHEMA_KEY,
            ACTIVE_VERSION_SCHEMA_KEY,
            STORED_SCHEMA_KEY,
        ] {
            assert_eq!(hook_for(key).map(|hook| hook.schema_key()), Some(key));
        }
        assert!(hook_for(KEY_VALUE_SCHEMA_KEY).is_none());
    }
}
