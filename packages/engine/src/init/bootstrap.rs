use crate::builtin_schema::{builtin_schemas, STORED_SCHEMA_KEY};
use crate::errors::schema_error;
use crate::schema::SchemaDefinition;
use crate::state::tables::create_cache_table;
use crate::write::{ExecutionSession, GLOBAL_VERSION_ID};
use crate::StrataError;

pub(super) async fn register_builtin_schemas(
    session: &mut ExecutionSession<'_>,
) -> Result<(), StrataError> {
    for schema in builtin_schemas()? {
        session.state.registry.register(schema.clone())?;
        if !session.state.registry.has_cache_table(&schema.key) {
            create_cache_table(session.backend(), &schema.key).await?;
            session.state.registry.mark_cache_table(&schema.key);
        }
    }
    Ok(())
}

/// Registers every schema previously stored through `stored_schema`.
pub(super) async fn load_stored_schemas(
    session: &mut ExecutionSession<'_>,
) -> Result<(), StrataError> {
    let stored = session
        .load_entities(STORED_SCHEMA_KEY, GLOBAL_VERSION_ID)
        .await?;
    for row in stored {
        let raw = row.snapshot.get("value").cloned().ok_or_else(|| {
            schema_error(&format!(
                "stored schema `{}` has no definition",
                row.entity_id
            ))
        })?;
        let schema = session.state.registry.register(SchemaDefinition::parse(raw)?)?;
        tracing::debug!(
            target: "strata::engine",
            schema_key = %schema.key,
            schema_version = %schema.version,
            "loaded stored schema"
        );
    }
    Ok(())
}

/// Schemas of the entities registered plugins emit. They live for the
/// engine's lifetime and are not stored.
pub(super) fn register_plugin_schemas(session: &mut ExecutionSession<'_>) -> Result<(), StrataError> {
    let plugins = session.plugins();
    for plugin in plugins.plugins() {
        for raw in plugin.schemas() {
            let schema = SchemaDefinition::parse(raw).map_err(|err| {
                schema_error(&format!(
                    "plugin `{}` declares an invalid schema: {}",
                    plugin.key(),
                    err.description
                ))
            })?;
            session.state.registry.register(schema)?;
        }
    }
    Ok(())
}

