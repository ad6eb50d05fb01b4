//! First-run setup: physical tables, schema registration and the default
//! versions. Every step is a no-op on an already initialized database.

mod active_version;
mod bootstrap;
mod seed;

use crate::engine::BootKeyValue;
use crate::errors::unknown_error;
use crate::sql::parse_statement;
use crate::state::tables::{base_ddl, discover_cache_tables};
use crate::write::{execute_write, ExecutionSession};
use crate::{StrataBackend, StrataError, Value};

pub(crate) async fn initialize(
    session: &mut ExecutionSession<'_>,
    key_values: &[BootKeyValue],
) -> Result<(), StrataError> {
    init_backend(session.backend()).await?;
    for schema_key in discover_cache_tables(session.backend()).await? {
        session.state.registry.mark_cache_table(&schema_key);
    }
    bootstrap::register_builtin_schemas(session).await?;
    bootstrap::load_stored_schemas(session).await?;
    bootstrap::register_plugin_schemas(session)?;
    session.refresh_versions().await?;
    seed::seed_default_versions(session).await?;
    active_version::load_or_seed_active_version(session).await?;
    seed::seed_boot_key_values(session, key_values).await
}

pub(crate) async fn init_backend(backend: &dyn StrataBackend) -> Result<(), StrataError> {
    for statement in base_ddl() {
        backend.execute(statement, &[]).await?;
    }
    Ok(())
}

/// Runs an engine-authored write against a logical relation.
async fn execute_internal_write(
    session: &mut ExecutionSession<'_>,
    sql: &str,
    params: &[Value],
) -> Result<usize, StrataError> {
    let statement = parse_statement(sql)?;
    execute_write(session, &statement, params)
        .await?
        .ok_or_else(|| unknown_error(&format!("`{sql}` does not write a logical relation")))
}
