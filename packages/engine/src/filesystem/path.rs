use unicode_normalization::UnicodeNormalization;

use crate::errors::validation_error;
use crate::StrataError;

/// NFC-normalizes one file or directory name and rejects names that cannot
/// appear as a single path segment.
pub(crate) fn normalize_path_segment(raw: &str) -> Result<String, StrataError> {
    let normalized = raw.nfc().collect::<String>();
    if normalized.is_empty() {
        return Err(validation_error("path segment must not be empty"));
    }
    if normalized == "." || normalized == ".." {
        return Err(validation_error("path segment cannot be '.' or '..'"));
    }
    if normalized.contains('/') || normalized.contains('\\') {
        return Err(validation_error(&format!(
            "path segment `{normalized}` must not contain slashes"
        )));
    }
    Ok(normalized)
}

/// `/a/b/` for the segments `["a", "b"]`; `/` for none.
pub(crate) fn compose_directory_path(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

pub(crate) fn compose_file_path(directory_path: &str, name: &str) -> String {
    format!("{directory_path}{name}")
}

/// Splits an absolute file path into its directory segments and file name.
pub(crate) fn split_file_path(path: &str) -> Result<(Vec<String>, String), StrataError> {
    let normalized = path.nfc().collect::<String>();
    if !normalized.starts_with('/')
        || normalized.ends_with('/')
        || normalized.contains("//")
        || normalized.contains('\\')
    {
        return Err(validation_error(&format!("invalid file path `{path}`")));
    }
    let mut segments = normalized
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(normalize_path_segment)
        .collect::<Result<Vec<_>, _>>()?;
    let name = segments
        .pop()
        .ok_or_else(|| validation_error(&format!("invalid file path `{path}`")))?;
    Ok((segments, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_nfc_normalized() {
        let decomposed = "Cafe\u{301}";
        assert_eq!(normalize_path_segment(decomposed).unwrap(), "Caf\u{e9}");
        assert!(normalize_path_segment("").is_err());
        assert!(normalize_path_segment("..").is_err());
        assert!(normalize_path_segment("a/b").is_err());
    }

    #[test]
    fn composes_and_splits_paths() {
        let directory = compose_directory_path(&["docs".to_string(), "guides".to_string()]);
        assert_eq!(directory, "/docs/guides/");
        assert_eq!(compose_file_path(&directory, "a.md"), "/docs/guides/a.md");
        assert_eq!(compose_file_path(&compose_directory_path(&[]), "a.md"), "/a.md");

        let (segments, name) = split_file_path("/docs/guides/a.md").expect("split");
        assert_eq!(segments, vec!["docs", "guides"]);
        assert_eq!(name, "a.md");
        assert!(split_file_path("docs/a.md").is_err());
        assert!(split_file_path("/docs/").is_err());
        assert!(split_file_path("/docs//a.md").is_err());
    }
}
