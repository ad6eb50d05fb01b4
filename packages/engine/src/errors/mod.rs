use crate::StrataError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Parse,
    Schema,
    Planning,
    Integrity,
    Traversal,
    Validation,
    TableNotFound,
    InternalTableAccessDenied,
    ReadOnlyViewWriteDenied,
    Transaction,
    Plugin,
    Backend,
    Unknown,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "STRATA_ERROR_PARSE",
            Self::Schema => "STRATA_ERROR_SCHEMA",
            Self::Planning => "STRATA_ERROR_PLANNING",
            Self::Integrity => "STRATA_ERROR_INTEGRITY",
            Self::Traversal => "STRATA_ERROR_TRAVERSAL",
            Self::Validation => "STRATA_ERROR_VALIDATION",
            Self::TableNotFound => "STRATA_ERROR_TABLE_NOT_FOUND",
            Self::InternalTableAccessDenied => "STRATA_ERROR_INTERNAL_TABLE_ACCESS_DENIED",
            Self::ReadOnlyViewWriteDenied => "STRATA_ERROR_READ_ONLY_VIEW_WRITE_DENIED",
            Self::Transaction => "STRATA_ERROR_TRANSACTION",
            Self::Plugin => "STRATA_ERROR_PLUGIN",
            Self::Backend => "STRATA_ERROR_BACKEND",
            Self::Unknown => "STRATA_ERROR_UNKNOWN",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::Parse,
            Self::Schema,
            Self::Planning,
            Self::Integrity,
            Self::Traversal,
            Self::Validation,
            Self::TableNotFound,
            Self::InternalTableAccessDenied,
            Self::ReadOnlyViewWriteDenied,
            Self::Transaction,
            Self::Plugin,
            Self::Backend,
            Self::Unknown,
        ]
    }
}

fn build_error(code: ErrorCode, title: &str, description: &str) -> StrataError {
    StrataError::new(code.as_str(), title, description)
}

pub(crate) fn parse_error(description: &str) -> StrataError {
    build_error(ErrorCode::Parse, "SQL parse error", description)
}

pub(crate) fn schema_error(description: &str) -> StrataError {
    build_error(ErrorCode::Schema, "Invalid schema", description)
}

pub(crate) fn planning_error(description: &str) -> StrataError {
    build_error(ErrorCode::Planning, "Query planning failed", description)
}

pub(crate) fn ambiguous_schema_key_filter_error(relation: &str) -> StrataError {
    planning_error(&format!(
        "ambiguous schema_key filter on `{relation}`: internal reads require literal schema_key predicates"
    ))
}

pub(crate) fn integrity_error(description: &str) -> StrataError {
    build_error(ErrorCode::Integrity, "Integrity violation", description)
}

pub(crate) fn traversal_error(description: &str) -> StrataError {
    build_error(
        ErrorCode::Traversal,
        "Version inheritance traversal failed",
        description,
    )
}

pub(crate) fn validation_error(description: &str) -> StrataError {
    build_error(ErrorCode::Validation, "Validation failed", description)
}

pub(crate) fn table_not_found_error(table: &str) -> StrataError {
    build_error(
        ErrorCode::TableNotFound,
        "Table does not exist",
        &format!("`{table}` is not a known relation. Try: state, state_by_version, state_history or an entity view."),
    )
}

pub(crate) fn internal_table_access_denied_error() -> StrataError {
    build_error(
        ErrorCode::InternalTableAccessDenied,
        "Internal table access denied",
        "Queries against `strata_internal_*` are not allowed. Use the state relations or entity views.",
    )
}

pub(crate) fn read_only_view_write_error(view_name: &str, operation: &str) -> StrataError {
    let guidance = if view_name == "state_history" {
        "Use `state` or `state_by_version` for writes.".to_string()
    } else if let Some(base_view) = view_name.strip_suffix("_history") {
        format!("Use `{base_view}` or `{base_view}_all` for writes.")
    } else {
        "Use the corresponding writable view for writes.".to_string()
    };
    build_error(
        ErrorCode::ReadOnlyViewWriteDenied,
        "View is read-only",
        &format!("`{view_name}` is read-only. `{operation}` is not supported. {guidance}"),
    )
}

pub(crate) fn transaction_error(description: &str) -> StrataError {
    build_error(ErrorCode::Transaction, "Transaction error", description)
}

pub(crate) fn plugin_error(description: &str) -> StrataError {
    build_error(ErrorCode::Plugin, "Plugin error", description)
}

pub(crate) fn backend_error(description: impl std::fmt::Display) -> StrataError {
    build_error(
        ErrorCode::Backend,
        "Backend error",
        &description.to_string(),
    )
}

pub(crate) fn unknown_error(description: &str) -> StrataError {
    build_error(ErrorCode::Unknown, "Unknown error", description)
}
