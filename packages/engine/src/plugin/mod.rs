//! File plugins translate file bytes into entities and back.

pub(crate) mod fallback;
mod matching;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::StrataError;

pub(crate) use matching::glob_matches_path;

/// A file as a plugin sees it.
#[derive(Debug, Clone, Copy)]
pub struct PluginFile<'a> {
    pub id: &'a str,
    pub path: &'a str,
    pub data: &'a [u8],
}

/// One entity change detected in a file. `snapshot: None` deletes it.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedChange {
    pub schema_key: String,
    pub entity_id: String,
    pub snapshot: Option<JsonValue>,
}

/// A stored entity handed back to a plugin to rebuild file bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginEntity {
    pub schema_key: String,
    pub entity_id: String,
    pub snapshot: JsonValue,
}

/// Returning `None` from a handler means the plugin does not implement it;
/// the engine then falls back to storing the raw bytes.
pub trait FilePlugin: Send + Sync {
    fn key(&self) -> &str;

    /// Schemas of the entities this plugin emits, registered at boot.
    fn schemas(&self) -> Vec<JsonValue> {
        Vec::new()
    }

    fn detect_changes(
        &self,
        _before: Option<PluginFile<'_>>,
        _after: PluginFile<'_>,
    ) -> Option<Result<Vec<DetectedChange>, StrataError>> {
        None
    }

    fn apply_changes(
        &self,
        _file: PluginFile<'_>,
        _entities: &[PluginEntity],
    ) -> Option<Result<Vec<u8>, StrataError>> {
        None
    }
}

#[derive(Clone)]
pub struct PluginRegistration {
    /// Paths matching this glob are handled by `plugin`.
    pub glob: String,
    pub plugin: Arc<dyn FilePlugin>,
}

impl PluginRegistration {
    pub fn new(glob: impl Into<String>, plugin: Arc<dyn FilePlugin>) -> Self {
        Self {
            glob: glob.into(),
            plugin,
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct PluginRegistry {
    registrations: Vec<PluginRegistration>,
}

impl PluginRegistry {
    pub(crate) fn new(registrations: Vec<PluginRegistration>) -> Self {
        Self { registrations }
    }

    /// The plugin whose glob matches `path` most specifically.
    pub(crate) fn for_path(&self, path: &str) -> Option<&Arc<dyn FilePlugin>> {
        matching::select_best_glob_match(path, &self.registrations, |registration| {
            registration.glob.as_str()
        })
        .map(|registration| &registration.plugin)
    }

    pub(crate) fn by_key(&self, key: &str) -> Option<&Arc<dyn FilePlugin>> {
        self.registrations
            .iter()
            .map(|registration| &registration.plugin)
            .find(|plugin| plugin.key() == key)
    }

    pub(crate) fn plugins(&self) -> impl Iterator<Item = &Arc<dyn FilePlugin>> {
        self.registrations.iter().map(|registration| &registration.plugin)
    }
}
