use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MaterializationScope {
    #[default]
    Full,
    Versions(BTreeSet<String>),
}

impl MaterializationScope {
    pub fn includes(&self, version_id: &str) -> bool {
        match self {
            MaterializationScope::Full => true,
            MaterializationScope::Versions(versions) => versions.contains(version_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializationWriteOp {
    Upsert,
    Tombstone,
}

/// One cache row rebuilt from the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationWrite {
    pub schema_key: String,
    pub entity_id: String,
    pub file_id: String,
    pub version_id: String,
    pub op: MaterializationWriteOp,
    pub snapshot_content: Option<String>,
    pub schema_version: String,
    pub plugin_key: String,
    pub change_id: String,
    pub commit_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationPlan {
    pub scope: MaterializationScope,
    /// Versions with a head commit, in scope.
    pub versions: Vec<String>,
    /// Changes read across all traversed lineages.
    pub changes_scanned: usize,
    pub writes: Vec<MaterializationWrite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializationApplyReport {
    pub rows_deleted: usize,
    pub rows_written: usize,
    pub tables_touched: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializationReport {
    pub plan: MaterializationPlan,
    pub apply: MaterializationApplyReport,
}
