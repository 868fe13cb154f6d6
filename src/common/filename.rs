//! File name sanitising for anything derived from user input.

const MAX_STEM_LEN: usize = 100;

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`.
///
/// Leading dots are stripped so a sanitised name can never be `.` / `..` or a
/// hidden file, and the result is truncated to a bounded length.
pub fn safe_filename(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    cleaned.chars().take(MAX_STEM_LEN).collect()
}

/// Stem of the last path segment of a URL or file name, sanitised.
pub fn source_stem(name: &str) -> String {
    let last = name
        .split(['/', '\\'])
        .rfind(|s| !s.is_empty())
        .unwrap_or("");
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };
    let safe = safe_filename(stem);
    if safe.is_empty() {
        "source".to_string()
    } else {
        safe
    }
}

/// `<prefix>_<stem>.<extension>`, prefix optional.
pub fn output_file_name(prefix: Option<&str>, stem: &str, extension: &str) -> String {
    let stem = match prefix.map(safe_filename).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}_{}", prefix, stem),
        None => stem.to_string(),
    };
    format!("{}.{}", stem, extension)
}
