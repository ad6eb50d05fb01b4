use crate::builtin_schema::ACTIVE_VERSION_SCHEMA_KEY;
use crate::errors::integrity_error;
use crate::write::{ExecutionSession, GLOBAL_VERSION_ID};
use crate::{StrataError, Value};

use super::execute_internal_write;
use super::seed::DEFAULT_ACTIVE_VERSION_ID;

const ACTIVE_VERSION_ENTITY_ID: &str = "active";

/// Points the session at the stored active version, seeding `main` as the
/// active version on first run.
pub(super) async fn load_or_seed_active_version(
    session: &mut ExecutionSession<'_>,
) -> Result<(), StrataError> {
    let stored = session
        .load_entity(
            ACTIVE_VERSION_SCHEMA_KEY,
            ACTIVE_VERSION_ENTITY_ID,
            None,
            GLOBAL_VERSION_ID,
        )
        .await?;
    match stored {
        Some(row) => {
            let version_id = row
                .snapshot
                .get("version_id")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| integrity_error("the active version pointer has no version_id"))?;
            if !session.state.versions.contains(version_id) {
                return Err(integrity_error(&format!(
                    "the active version `{version_id}` does not exist"
                )));
            }
            session.state.active_version_id = version_id.to_string();
        }
        None => {
            execute_internal_write(
                session,
                "INSERT INTO active_version (version_id) VALUES (?1)",
                &[Value::from(DEFAULT_ACTIVE_VERSION_ID)],
            )
            .await?;
        }
    }
    Ok(())
}
