use serde::{Deserialize, Serialize};

use crate::errors::validation_error;
use crate::StrataError;

/// How the cache router treats a `schema_key` predicate it cannot resolve
/// to literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheRouting {
    /// Reject the query with a planning error.
    Strict,
    /// Union every known cache table.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on inheritance hops before traversal is treated as cyclic.
    pub max_inheritance_depth: usize,
    /// Upper bound on commit lineage depth for history relations.
    pub max_history_depth: u32,
    /// Routing policy for public queries. Internal lookups are always strict.
    pub cache_routing: CacheRouting,
    pub allow_internal_tables: bool,
    /// Sequential ids and timestamps for reproducible runs.
    pub deterministic: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inheritance_depth: 64,
            max_history_depth: 10_000,
            cache_routing: CacheRouting::Fallback,
            allow_internal_tables: false,
            deterministic: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json(raw: &str) -> Result<Self, StrataError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| validation_error(&format!("invalid engine config: {err}")))?;
        if config.max_inheritance_depth == 0 {
            return Err(validation_error(
                "invalid engine config: max_inheritance_depth must be at least 1",
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheRouting, EngineConfig};

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = EngineConfig::from_json(r#"{"cache_routing":"strict"}"#).expect("parse");
        assert_eq!(config.cache_routing, CacheRouting::Strict);
        assert_eq!(config.max_inheritance_depth, 64);
        assert!(!config.allow_internal_tables);
    }

    #[test]
    fn rejects_zero_inheritance_depth() {
        let err = EngineConfig::from_json(r#"{"max_inheritance_depth":0}"#)
            .expect_err("zero depth should be rejected");
        assert_eq!(err.code, "STRATA_ERROR_VALIDATION");
    }

    #[test]
    fn rejects_unknown_routing_mode() {
        assert!(EngineConfig::from_json(r#"{"cache_routing":"loose"}"#).is_err());
    }
}
