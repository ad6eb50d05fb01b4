use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::errors::schema_error;
use crate::StrataError;

use super::SchemaDefinition;

/// Which surface of an entity view a relation name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityViewVariant {
    /// `<key>`: the active version.
    Active,
    /// `<key>_all`: every version, with an explicit version column.
    All,
    /// `<key>_history`: read-only change lineage.
    History,
}

/// Maps schema keys to their definitions and tracks which schema keys have
/// a physical cache table.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<SchemaDefinition>>,
    versions: BTreeMap<(String, String), Arc<SchemaDefinition>>,
    cache_tables: BTreeSet<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema`. The highest version of a key backs its views;
    /// re-registering an existing version with different content is an error.
    pub fn register(&mut self, schema: SchemaDefinition) -> Result<Arc<SchemaDefinition>, StrataError> {
        let version_key = (schema.key.clone(), schema.version.clone());
        if let Some(existing) = self.versions.get(&version_key) {
            if existing.raw != schema.raw {
                return Err(schema_error(&format!(
                    "schema `{}` version {} is already registered with a different definition",
                    schema.key, schema.version
                )));
            }
            return Ok(existing.clone());
        }

        let schema = Arc::new(schema);
        self.versions.insert(version_key, schema.clone());
        let replaces = match self.schemas.get(&schema.key) {
            Some(current) => version_number(&schema.version) > version_number(&current.version),
            None => true,
        };
        if replaces {
            self.schemas.insert(schema.key.clone(), schema.clone());
        }
        Ok(schema)
    }

    pub fn get(&self, key: &str) -> Option<&Arc<SchemaDefinition>> {
        self.schemas.get(key)
    }

    pub fn get_version(&self, key: &str, version: &str) -> Option<&Arc<SchemaDefinition>> {
        self.versions.get(&(key.to_string(), version.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.schemas.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &Arc<SchemaDefinition>> {
        self.schemas.values()
    }

    pub fn mark_cache_table(&mut self, key: &str) {
        self.cache_tables.insert(key.to_string());
    }

    pub fn has_cache_table(&self, key: &str) -> bool {
        self.cache_tables.contains(key)
    }

    pub fn cache_table_keys(&self) -> &BTreeSet<String> {
        &self.cache_tables
    }

    /// Resolves a relation name such as `file_all` to its entity view.
    pub fn resolve_view(&self, relation: &str) -> Option<(Arc<SchemaDefinition>, EntityViewVariant)> {
        let relation = relation.to_ascii_lowercase();
        if let Some(schema) = self.schemas.get(&relation) {
            return Some((schema.clone(), EntityViewVariant::Active));
        }
        if let Some(base) = relation.strip_suffix("_all") {
            if let Some(schema) = self.schemas.get(base) {
                return Some((schema.clone(), EntityViewVariant::All));
            }
        }
        if let Some(base) = relation.strip_suffix("_history") {
            if let Some(schema) = self.schemas.get(base) {
                return Some((schema.clone(), EntityViewVariant::History));
            }
        }
        None
    }
}

fn version_number(version: &str) -> u64 {
    version.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{EntityViewVariant, SchemaRegistry};
    use crate::schema::SchemaDefinition;
    use serde_json::json;

    fn schema(version: &str, extra: Option<&str>) -> SchemaDefinition {
        let mut properties = json!({ "id": { "type": "string" } });
        if let Some(extra) = extra {
            properties[extra] = json!({ "type": "string" });
        }
        SchemaDefinition::parse(json!({
            "x-strata-key": "note",
            "x-strata-version": version,
            "x-strata-primary-key": ["/id"],
            "type": "object",
            "properties": properties
        }))
        .expect("schema")
    }

    #[test]
    fn resolves_view_variants() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("1", None)).expect("register");
        assert_eq!(
            registry.resolve_view("note").map(|(_, variant)| variant),
            Some(EntityViewVariant::Active)
        );
        assert_eq!(
            registry.resolve_view("NOTE_ALL").map(|(_, variant)| variant),
            Some(EntityViewVariant::All)
        );
        assert_eq!(
            registry.resolve_view("note_history").map(|(_, variant)| variant),
            Some(EntityViewVariant::History)
        );
        assert!(registry.resolve_view("notes").is_none());
    }

    #[test]
    fn newest_version_backs_the_view() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("2", Some("title"))).expect("register v2");
        registry.register(schema("1", None)).expect("register v1");
        assert_eq!(registry.get("note").map(|s| s.version.as_str()), Some("2"));
        assert!(registry.get_version("note", "1").is_some());

        registry
            .register(schema("2", Some("title")))
            .expect("identical re-register is a no-op");
        let err = registry
            .register(schema("2", Some("body")))
            .expect_err("conflicting definition");
        assert_eq!(err.code, "STRATA_ERROR_SCHEMA");
    }

    #[test]
    fn tracks_cache_tables_separately() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema("1", None)).expect("register");
        assert!(!registry.has_cache_table("note"));
        registry.mark_cache_table("note");
        assert!(registry.has_cache_table("note"));
        assert_eq!(registry.cache_table_keys().len(), 1);
    }
}
