use crate::engine::BootKeyValue;
use crate::write::{ExecutionSession, GLOBAL_VERSION_ID};
use crate::{StrataError, Value};

use super::execute_internal_write;

pub(crate) const DEFAULT_ACTIVE_VERSION_ID: &str = "main";

/// Seeds the root `global` version and `main` on top of it.
pub(super) async fn seed_default_versions(
    session: &mut ExecutionSession<'_>,
) -> Result<(), StrataError> {
    let defaults = [
        (GLOBAL_VERSION_ID, None),
        (DEFAULT_ACTIVE_VERSION_ID, Some(GLOBAL_VERSION_ID)),
    ];
    for (version_id, parent) in defaults {
        if session.state.versions.contains(version_id) {
            continue;
        }
        execute_internal_write(
            session,
            "INSERT INTO version (id, name, inherits_from_version_id, hidden) \
             VALUES (?1, ?2, ?3, ?4)",
            &[
                Value::from(version_id),
                Value::from(version_id),
                Value::from(parent.map(str::to_string)),
                Value::Integer(0),
            ],
        )
        .await?;
        tracing::debug!(target: "strata::engine", version_id, "seeded version");
    }
    Ok(())
}

/// Upserts the boot key values; they win over values stored by earlier runs.
pub(super) async fn seed_boot_key_values(
    session: &mut ExecutionSession<'_>,
    key_values: &[BootKeyValue],
) -> Result<(), StrataError> {
    for key_value in key_values {
        let snapshot = serde_json::json!({
            "key": key_value.key,
            "value": key_value.value,
        });
        let version_id = key_value.version_id.as_deref().unwrap_or(GLOBAL_VERSION_ID);
        execute_internal_write(
            session,
            "INSERT INTO key_value_all (strata_snapshot_content, strata_version_id) \
             VALUES (?1, ?2) \
             ON CONFLICT DO UPDATE SET strata_snapshot_content = excluded.strata_snapshot_content",
            &[Value::Text(snapshot.to_string()), Value::from(version_id)],
        )
        .await?;
    }
    Ok(())
}
