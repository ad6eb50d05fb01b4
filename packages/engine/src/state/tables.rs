//! Physical table names and DDL.

use std::collections::BTreeSet;

use crate::{StrataBackend, StrataError, Value};

pub(crate) const TRANSACTION_TABLE: &str = "strata_internal_transaction_state";
pub(crate) const UNTRACKED_TABLE: &str = "strata_internal_state_untracked";
pub(crate) const CHANGE_TABLE: &str = "strata_internal_change";
pub(crate) const COMMIT_TABLE: &str = "strata_internal_commit";
pub(crate) const VERSION_HEAD_TABLE: &str = "strata_internal_version_head";
pub(crate) const WRITER_TABLE: &str = "strata_internal_state_writer";
pub(crate) const CACHE_TABLE_PREFIX: &str = "strata_internal_state_cache_v1_";
pub(crate) const INTERNAL_TABLE_PREFIX: &str = "strata_internal_";

pub(crate) const VERSION_CLOSURE_CTE: &str = "strata_version_closure";
pub(crate) const COMMIT_LINEAGE_CTE: &str = "strata_commit_lineage";

pub fn cache_table_name(schema_key: &str) -> String {
    format!("{CACHE_TABLE_PREFIX}{schema_key}")
}

pub(crate) fn is_internal_table(name: &str) -> bool {
    name.to_ascii_lowercase().starts_with(INTERNAL_TABLE_PREFIX)
}

const BASE_DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS strata_internal_transaction_state (\
     entity_id TEXT NOT NULL, \
     schema_key TEXT NOT NULL, \
     file_id TEXT NOT NULL, \
     version_id TEXT NOT NULL, \
     plugin_key TEXT NOT NULL, \
     snapshot_content TEXT, \
     schema_version TEXT NOT NULL, \
     metadata TEXT, \
     writer_key TEXT, \
     change_id TEXT NOT NULL, \
     created_at TEXT NOT NULL, \
     updated_at TEXT NOT NULL, \
     PRIMARY KEY (entity_id, schema_key, file_id, version_id)\
     ) WITHOUT ROWID",
    "CREATE TABLE IF NOT EXISTS strata_internal_state_untracked (\
     entity_id TEXT NOT NULL, \
     schema_key TEXT NOT NULL, \
     file_id TEXT NOT NULL, \
     version_id TEXT NOT NULL, \
     plugin_key TEXT NOT NULL, \
     snapshot_content TEXT, \
     schema_version TEXT NOT NULL, \
     is_tombstone INTEGER NOT NULL DEFAULT 0, \
     metadata TEXT, \
     writer_key TEXT, \
     created_at TEXT NOT NULL, \
     updated_at TEXT NOT NULL, \
     PRIMARY KEY (entity_id, schema_key, file_id, version_id)\
     ) WITHOUT ROWID",
    "CREATE TABLE IF NOT EXISTS strata_internal_change (\
     id TEXT PRIMARY KEY, \
     entity_id TEXT NOT NULL, \
     schema_key TEXT NOT NULL, \
     schema_version TEXT NOT NULL, \
     file_id TEXT NOT NULL, \
     plugin_key TEXT NOT NULL, \
     version_id TEXT NOT NULL, \
     snapshot_content TEXT, \
     metadata TEXT, \
     commit_id TEXT NOT NULL, \
     created_at TEXT NOT NULL\
     )",
    "CREATE INDEX IF NOT EXISTS strata_internal_change_commit_idx \
     ON strata_internal_change (commit_id)",
    "CREATE TABLE IF NOT EXISTS strata_internal_commit (\
     id TEXT PRIMARY KEY, \
     version_id TEXT NOT NULL, \
     parent_commit_id TEXT, \
     change_count INTEGER NOT NULL, \
     created_at TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS strata_internal_version_head (\
     version_id TEXT PRIMARY KEY, \
     commit_id TEXT NOT NULL\
     )",
    "CREATE TABLE IF NOT EXISTS strata_internal_state_writer (\
     entity_id TEXT NOT NULL, \
     schema_key TEXT NOT NULL, \
     file_id TEXT NOT NULL, \
     version_id TEXT NOT NULL, \
     writer_key TEXT NOT NULL, \
     PRIMARY KEY (entity_id, schema_key, file_id, version_id)\
     ) WITHOUT ROWID",
];

pub(crate) fn base_ddl() -> &'static [&'static str] {
    BASE_DDL
}

pub(crate) fn cache_table_ddl(schema_key: &str) -> [String; 2] {
    let table = cache_table_name(schema_key);
    [
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             entity_id TEXT NOT NULL, \
             schema_key TEXT NOT NULL, \
             file_id TEXT NOT NULL, \
             version_id TEXT NOT NULL, \
             plugin_key TEXT NOT NULL, \
             snapshot_content TEXT, \
             schema_version TEXT NOT NULL, \
             is_tombstone INTEGER NOT NULL DEFAULT 0, \
             change_id TEXT, \
             commit_id TEXT, \
             created_at TEXT NOT NULL, \
             updated_at TEXT NOT NULL, \
             PRIMARY KEY (entity_id, file_id, version_id)\
             ) WITHOUT ROWID"
        ),
        format!("CREATE INDEX IF NOT EXISTS {table}_version_idx ON {table} (version_id)"),
    ]
}

pub(crate) async fn create_cache_table(
    backend: &dyn StrataBackend,
    schema_key: &str,
) -> Result<(), StrataError> {
    for ddl in cache_table_ddl(schema_key) {
        backend.execute(&ddl, &[]).await?;
    }
    Ok(())
}

/// Schema keys that already have a cache table.
pub(crate) async fn discover_cache_tables(
    backend: &dyn StrataBackend,
) -> Result<BTreeSet<String>, StrataError> {
    let result = backend
        .execute(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ESCAPE '\\'",
            &[Value::Text(format!(
                "{}%",
                CACHE_TABLE_PREFIX.replace('_', "\\_")
            ))],
        )
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.first().and_then(Value::as_text))
        .filter_map(|name| name.strip_prefix(CACHE_TABLE_PREFIX))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::{cache_table_ddl, cache_table_name, is_internal_table};

    #[test]
    fn cache_tables_are_named_per_schema_key() {
        assert_eq!(
            cache_table_name("key_value"),
            "strata_internal_state_cache_v1_key_value"
        );
        let [table, index] = cache_table_ddl("key_value");
        assert!(table.contains("PRIMARY KEY (entity_id, file_id, version_id)"));
        assert!(index.contains("ON strata_internal_state_cache_v1_key_value (version_id)"));
    }

    #[test]
    fn recognizes_internal_tables_case_insensitively() {
        assert!(is_internal_table("STRATA_INTERNAL_CHANGE"));
        assert!(!is_internal_table("state"));
    }
}
