use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::builtin_schema::{DIRECTORY_SCHEMA_KEY, FILE_SCHEMA_KEY};
use crate::errors::integrity_error;
use crate::filesystem::path::normalize_path_segment;
use crate::StrataError;

use super::super::context::{ExecutionSession, StateRow};
use super::super::state_write::{EntityDelete, EntityWrite};
use super::{snapshot_text, SchemaHook};

pub(super) struct DirectoryHook;
pub(super) struct FileHook;

#[async_trait(?Send)]
impl SchemaHook for DirectoryHook {
    fn schema_key(&self) -> &'static str {
        DIRECTORY_SCHEMA_KEY
    }

    async fn before_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        let name = normalize_name(&mut write.snapshot)?;
        let parent_id = snapshot_text(&write.snapshot, "parent_id").map(str::to_string);
        if let Some(parent_id) = &parent_id {
            if parent_id == &write.entity_id {
                return Err(integrity_error(&format!(
                    "directory `{}` cannot be its own parent",
                    write.entity_id
                )));
            }
            ensure_directory_exists(session, parent_id, &write.version_id).await?;
            reject_cycle(session, &write.entity_id, parent_id, &write.version_id).await?;
        }
        ensure_location_free(
            session,
            &write.version_id,
            parent_id.as_deref(),
            &name,
            (DIRECTORY_SCHEMA_KEY, &write.entity_id),
        )
        .await
    }

    async fn before_delete(
        &self,
        session: &mut ExecutionSession<'_>,
        row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        let mut children = Vec::new();
        for (schema_key, parent_property) in
            [(DIRECTORY_SCHEMA_KEY, "parent_id"), (FILE_SCHEMA_KEY, "directory_id")]
        {
            children.extend(
                session
                    .load_entities(schema_key, &row.version_id)
                    .await?
                    .iter()
                    .filter(|child| {
                        snapshot_text(&child.snapshot, parent_property) == Some(&row.entity_id)
                    })
                    .map(EntityDelete::of),
            );
        }
        Ok(children)
    }
}

#[async_trait(?Send)]
impl SchemaHook for FileHook {
    fn schema_key(&self) -> &'static str {
        FILE_SCHEMA_KEY
    }

    async fn before_write(
        &self,
        session: &mut ExecutionSession<'_>,
        write: &mut EntityWrite,
        _previous: Option<&StateRow>,
    ) -> Result<(), StrataError> {
        let name = normalize_name(&mut write.snapshot)?;
        let directory_id = snapshot_text(&write.snapshot, "directory_id").map(str::to_string);
        if let Some(directory_id) = &directory_id {
            ensure_directory_exists(session, directory_id, &write.version_id).await?;
        }
        ensure_location_free(
            session,
            &write.version_id,
            directory_id.as_deref(),
            &name,
            (FILE_SCHEMA_KEY, &write.entity_id),
        )
        .await
    }

    /// A file owns every entity stored under its id, including its blob.
    async fn before_delete(
        &self,
        session: &mut ExecutionSession<'_>,
        row: &StateRow,
    ) -> Result<Vec<EntityDelete>, StrataError> {
        Ok(session
            .load_file_entities(&row.entity_id, &row.version_id)
            .await?
            .iter()
            .map(EntityDelete::of)
            .collect())
    }
}

fn normalize_name(snapshot: &mut JsonValue) -> Result<String, StrataError> {
    let raw = snapshot_text(snapshot, "name").unwrap_or_default();
    let name = normalize_path_segment(raw)?;
    snapshot["name"] = JsonValue::String(name.clone());
    Ok(name)
}

async fn ensure_directory_exists(
    session: &ExecutionSession<'_>,
    directory_id: &str,
    version_id: &str,
) -> Result<(), StrataError> {
    let exists = session
        .load_entity(DIRECTORY_SCHEMA_KEY, directory_id, None, version_id)
        .await?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(integrity_error(&format!(
            "parent directory `{directory_id}` does not exist in version `{version_id}`"
        )))
    }
}

/// Walks up from `parent_id`; reaching `directory_id` means the move would
/// put a directory below itself.
async fn reject_cycle(
    session: &ExecutionSession<'_>,
    directory_id: &str,
    parent_id: &str,
    version_id: &str,
) -> Result<(), StrataError> {
    let mut seen = BTreeSet::new();
    let mut cursor = Some(parent_id.to_string());
    while let Some(current) = cursor {
        if current == directory_id || !seen.insert(current.clone()) {
            return Err(integrity_error(&format!(
                "moving directory `{directory_id}` below `{parent_id}` would create a cycle"
            )));
        }
        cursor = session
            .load_entity(DIRECTORY_SCHEMA_KEY, &current, None, version_id)
            .await?
            .and_then(|row| snapshot_text(&row.snapshot, "parent_id").map(str::to_string));
    }
    Ok(())
}

/// Files and directories share one namespace per parent directory.
async fn ensure_location_free(
    session: &ExecutionSession<'_>,
    version_id: &str,
    parent_id: Option<&str>,
    name: &str,
    (own_schema, own_id): (&str, &str),
) -> Result<(), StrataError> {
    for (schema_key, parent_property) in
        [(DIRECTORY_SCHEMA_KEY, "parent_id"), (FILE_SCHEMA_KEY, "directory_id")]
    {
        let rows = session.load_entities(schema_key, version_id).await?;
        let occupant = rows.iter().find(|row| {
            !(schema_key == own_schema && row.entity_id == own_id)
                && snapshot_text(&row.snapshot, parent_property) == parent_id
                && snapshot_text(&row.snapshot, "name") == Some(name)
        });
        if let Some(occupant) = occupant {
            return Err(integrity_error(&format!(
                "`{name}` already exists in this directory as {schema_key} `{}`",
                occupant.entity_id
            )));
        }
    }
    Ok(())
}
