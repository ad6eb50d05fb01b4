use crate::errors::{table_not_found_error, ErrorCode};
use crate::StrataError;

const MISSING_TABLE_PREFIX: &str = "no such table: ";

pub(crate) fn is_missing_relation_error(err: &StrataError) -> bool {
    err.description.to_lowercase().contains("no such table")
}

/// The table named by a backend "no such table" message.
fn missing_relation_name(err: &StrataError) -> Option<&str> {
    let start = err.description.find(MISSING_TABLE_PREFIX)? + MISSING_TABLE_PREFIX.len();
    let name = err.description[start..]
        .split(|c: char| c.is_whitespace() || c == ',' || c == ')')
        .next()?;
    (!name.is_empty()).then_some(name)
}

/// Maps backend failures that have a dedicated code onto it.
pub(crate) fn classify_backend_error(err: StrataError) -> StrataError {
    if !err.is(ErrorCode::Backend) || !is_missing_relation_error(&err) {
        return err;
    }
    match missing_relation_name(&err) {
        Some(name) => table_not_found_error(name),
        None => err,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_backend_error, is_missing_relation_error};
    use crate::errors::{backend_error, planning_error, ErrorCode};

    #[test]
    fn classifies_missing_relation_messages() {
        assert!(is_missing_relation_error(&backend_error("no such table: foo")));
        assert!(!is_missing_relation_error(&backend_error(
            "CHECK constraint failed"
        )));
    }

    #[test]
    fn missing_tables_become_table_not_found() {
        let err = classify_backend_error(backend_error("no such table: notes"));
        assert!(err.is(ErrorCode::TableNotFound));
        assert!(err.description.contains("notes"));

        let err = classify_backend_error(backend_error("UNIQUE constraint failed: t.id"));
        assert!(err.is(ErrorCode::Backend));

        let err = classify_backend_error(planning_error("no such table: x"));
        assert!(err.is(ErrorCode::Planning));
    }
}
