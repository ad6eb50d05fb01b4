use globset::GlobBuilder;

/// Picks the candidate whose glob matches `path` most specifically. Ties keep
/// the earlier candidate.
pub(crate) fn select_best_glob_match<'a, T>(
    path: &str,
    candidates: &'a [T],
    glob: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    let mut selected: Option<(&T, (u8, i32))> = None;
    for candidate in candidates {
        let pattern = glob(candidate);
        if !glob_matches_path(pattern, path) {
            continue;
        }
        let rank = glob_specificity_rank(pattern);
        match selected {
            Some((_, existing)) if rank <= existing => {}
            _ => selected = Some((candidate, rank)),
        }
    }
    selected.map(|(candidate, _)| candidate)
}

pub(crate) fn glob_matches_path(glob: &str, path: &str) -> bool {
    let glob = glob.trim();
    let path = path.trim();
    if glob.is_empty() || path.is_empty() {
        return false;
    }
    if is_catch_all_glob(glob) {
        return true;
    }
    GlobBuilder::new(glob)
        .literal_separator(false)
        .case_insensitive(true)
        .build()
        .map(|compiled| compiled.compile_matcher().is_match(path))
        .unwrap_or(false)
}

fn glob_specificity_rank(glob: &str) -> (u8, i32) {
    let glob = glob.trim();
    if is_catch_all_glob(glob) {
        return (0, i32::MIN);
    }
    let mut literal_chars = 0i32;
    let mut wildcard_chars = 0i32;
    for ch in glob.chars() {
        match ch {
            '*' | '?' | '[' | ']' | '{' | '}' => wildcard_chars += 1,
            _ => literal_chars += 1,
        }
    }
    (1, literal_chars - wildcard_chars)
}

fn is_catch_all_glob(glob: &str) -> bool {
    matches!(glob, "*" | "**" | "**/*")
}
