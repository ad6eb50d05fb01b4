//! File content stored as entities: plugins split file bytes into entities
//! keyed by the file id, and the blob fallback keeps the raw bytes.

pub(crate) mod path;

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use crate::builtin_schema::{DIRECTORY_SCHEMA_KEY, FILE_BLOB_SCHEMA_KEY, FILE_SCHEMA_KEY};
use crate::errors::{integrity_error, plugin_error, schema_error, traversal_error, ErrorCode};
use crate::plugin::fallback::{blob_bytes, blob_snapshot, BLOB_ENTITY_ID, BLOB_PLUGIN_KEY};
use crate::plugin::{DetectedChange, FilePlugin, PluginEntity, PluginFile};
use crate::write::{delete_entity, write_entity, EntityDelete, EntityWrite, ExecutionSession, StateRow};
use crate::StrataError;

use path::{compose_directory_path, compose_file_path};

/// The file entity stored under `file_id`.
async fn load_file(
    session: &ExecutionSession<'_>,
    file_id: &str,
    version_id: &str,
) -> Result<StateRow, StrataError> {
    session
        .load_entity(FILE_SCHEMA_KEY, file_id, None, version_id)
        .await?
        .ok_or_else(|| {
            integrity_error(&format!(
                "file `{file_id}` does not exist in version `{version_id}`"
            ))
        })
}

fn text<'a>(snapshot: &'a JsonValue, property: &str) -> Option<&'a str> {
    snapshot.get(property).and_then(JsonValue::as_str)
}

/// The absolute path of a file entity, built from its directory chain.
pub(crate) async fn file_path(
    session: &ExecutionSession<'_>,
    file: &StateRow,
) -> Result<String, StrataError> {
    let mut segments = Vec::new();
    let mut seen = BTreeSet::new();
    let mut cursor = text(&file.snapshot, "directory_id").map(str::to_string);
    while let Some(directory_id) = cursor {
        if !seen.insert(directory_id.clone()) {
            return Err(traversal_error(&format!(
                "directory `{directory_id}` is its own ancestor"
            )));
        }
        let directory = session
            .load_entity(DIRECTORY_SCHEMA_KEY, &directory_id, None, &file.version_id)
            .await?
            .ok_or_else(|| {
                integrity_error(&format!(
                    "directory `{directory_id}` of file `{}` does not exist",
                    file.entity_id
                ))
            })?;
        segments.push(text(&directory.snapshot, "name").unwrap_or_default().to_string());
        cursor = text(&directory.snapshot, "parent_id").map(str::to_string);
    }
    segments.reverse();
    Ok(compose_file_path(
        &compose_directory_path(&segments),
        text(&file.snapshot, "name").unwrap_or_default(),
    ))
}

/// Stores `data` as the content of `file_id`: through the plugin matching
/// the file's path when it can detect changes, otherwise as a blob.
pub(crate) async fn write_file_data(
    session: &mut ExecutionSession<'_>,
    file_id: &str,
    version_id: &str,
    data: &[u8],
) -> Result<(), StrataError> {
    let file = load_file(session, file_id, version_id).await?;
    let path = file_path(session, &file).await?;
    let after = PluginFile {
        id: file_id,
        path: &path,
        data,
    };

    if let Some(plugin) = session.plugins().for_path(&path) {
        let before = match read_file_data(session, file_id, version_id).await {
            Ok(before) => before,
            Err(err) if err.is(ErrorCode::Plugin) => {
                tracing::warn!(
                    target: "strata::plugin",
                    plugin = plugin.key(),
                    path = %path,
                    error = %err.description,
                    "previous file content could not be rebuilt"
                );
                None
            }
            Err(err) => return Err(err),
        };
        let before = before.as_deref().map(|data| PluginFile {
            id: file_id,
            path: &path,
            data,
        });
        match plugin.detect_changes(before, after) {
            Some(changes) => {
                let changes = changes?;
                tracing::debug!(
                    target: "strata::plugin",
                    plugin = plugin.key(),
                    path = %path,
                    changes = changes.len(),
                    "detected file changes"
                );
                apply_detected_changes(session, plugin.as_ref(), &file, changes).await?;
                return remove_blob(session, &file).await;
            }
            None => tracing::warn!(
                target: "strata::plugin",
                plugin = plugin.key(),
                path = %path,
                "plugin has no detect_changes handler; storing the file as a blob"
            ),
        }
    }

    let schema = session
        .state
        .registry
        .get(FILE_BLOB_SCHEMA_KEY)
        .cloned()
        .ok_or_else(|| schema_error("the file_blob schema is not registered"))?;
    let previous = session
        .load_entity(FILE_BLOB_SCHEMA_KEY, BLOB_ENTITY_ID, Some(file_id), version_id)
        .await?;
    write_entity(
        session,
        EntityWrite {
            schema,
            entity_id: BLOB_ENTITY_ID.to_string(),
            file_id: file_id.to_string(),
            version_id: version_id.to_string(),
            plugin_key: BLOB_PLUGIN_KEY.to_string(),
            snapshot: blob_snapshot(data),
            metadata: None,
            untracked: file.untracked,
        },
        previous,
    )
    .await
}

async fn apply_detected_changes(
    session: &mut ExecutionSession<'_>,
    plugin: &dyn FilePlugin,
    file: &StateRow,
    changes: Vec<DetectedChange>,
) -> Result<(), StrataError> {
    for change in changes {
        let target = EntityDelete {
            schema_key: change.schema_key,
            entity_id: change.entity_id,
            file_id: file.entity_id.clone(),
            version_id: file.version_id.clone(),
        };
        let Some(snapshot) = change.snapshot else {
            delete_entity(session, target).await?;
            continue;
        };
        let schema = session
            .state
            .registry
            .get(&target.schema_key)
            .cloned()
            .ok_or_else(|| {
                plugin_error(&format!(
                    "plugin `{}` emitted an entity of unregistered schema `{}`",
                    plugin.key(),
                    target.schema_key
                ))
            })?;
        let previous = session
            .load_entity(
                &target.schema_key,
                &target.entity_id,
                Some(&target.file_id),
                &target.version_id,
            )
            .await?;
        write_entity(
            session,
            EntityWrite {
                schema,
                entity_id: target.entity_id,
                file_id: target.file_id,
                version_id: target.version_id,
                plugin_key: plugin.key().to_string(),
                snapshot,
                metadata: None,
                untracked: file.untracked,
            },
            previous,
        )
        .await?;
    }
    Ok(())
}

/// Drops a blob left over from before a plugin took the file over.
async fn remove_blob(session: &mut ExecutionSession<'_>, file: &StateRow) -> Result<(), StrataError> {
    let target = EntityDelete {
        schema_key: FILE_BLOB_SCHEMA_KEY.to_string(),
        entity_id: BLOB_ENTITY_ID.to_string(),
        file_id: file.entity_id.clone(),
        version_id: file.version_id.clone(),
    };
    delete_entity(session, target).await?;
    Ok(())
}

/// Rebuilds the bytes of `file_id`. `None` when no content was ever written.
pub(crate) async fn read_file_data(
    session: &ExecutionSession<'_>,
    file_id: &str,
    version_id: &str,
) -> Result<Option<Vec<u8>>, StrataError> {
    let entities = session.load_file_entities(file_id, version_id).await?;
    if let Some(blob) = entities
        .iter()
        .find(|row| row.schema_key == FILE_BLOB_SCHEMA_KEY && row.entity_id == BLOB_ENTITY_ID)
    {
        return blob_bytes(&blob.snapshot).map(Some);
    }
    let Some(first) = entities.first() else {
        return Ok(None);
    };

    let plugin = session.plugins().by_key(&first.plugin_key).ok_or_else(|| {
        plugin_error(&format!(
            "file `{file_id}` was written by plugin `{}`, which is not registered",
            first.plugin_key
        ))
    })?;
    let file = load_file(session, file_id, version_id).await?;
    let path = file_path(session, &file).await?;
    let stored: Vec<PluginEntity> = entities
        .into_iter()
        .map(|row| PluginEntity {
            schema_key: row.schema_key,
            entity_id: row.entity_id,
            snapshot: row.snapshot,
        })
        .collect();
    let file = PluginFile {
        id: file_id,
        path: &path,
        data: &[],
    };
    match plugin.apply_changes(file, &stored) {
        Some(bytes) => bytes.map(Some),
        None => Err(plugin_error(&format!(
            "plugin `{}` has no apply_changes handler to rebuild `{path}`",
            plugin.key()
        ))),
    }
}
