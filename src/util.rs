use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

/// Compile a regex once per call site. Yields `None` (and logs) if the pattern is invalid.
macro_rules! static_regex {
    ($pattern:expr) => {{
        static CELL: std::sync::OnceLock<Option<regex::Regex>> = std::sync::OnceLock::new();
        $crate::util::cached_regex(&CELL, $pattern)
    }};
}

pub fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::error!(pattern, error = %err, "invalid built-in regex");
            None
        }
    })
    .as_ref()
}

pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

/// Keep the last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect::<String>()
}

/// Canonical identity of an artifact path: forward slashes, no leading `./` or `/`, lowercase.
pub fn normalize_path(path: &str) -> String {
    let mut p = path.trim().replace('\\', "/");
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest.to_string();
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest.to_string();
        } else {
            break;
        }
    }
    p.to_lowercase()
}

pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

pub fn extension(path: &str) -> Option<&str> {
    let name = basename(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext)
}

pub fn is_test_file(path: &str) -> bool {
    let p = normalize_path(path);
    p.contains(".test.") || p.contains(".spec.") || p.contains("__tests__")
}

/// Join a relative artifact path onto `root`, refusing absolute paths and `..` segments.
pub fn resolve_relative_path(root: &Path, candidate: &str) -> Result<PathBuf, String> {
    let cleaned = candidate.trim().replace('\\', "/");
    if cleaned.is_empty() {
        return Err("Path is empty".to_string());
    }
    let candidate_path = Path::new(&cleaned);
    if candidate_path.is_absolute() || cleaned.starts_with('/') {
        return Err(format!("Absolute paths are not allowed: {}", candidate));
    }

    let mut relative = PathBuf::new();
    for component in candidate_path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("Parent traversal is not allowed: {}", candidate));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Absolute paths are not allowed: {}", candidate));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(format!("Path has no file component: {}", candidate));
    }

    Ok(root.join(relative))
}

/// Whether `path` stays inside whatever root it is later joined onto.
pub fn check_relative_path(path: &str) -> Result<(), String> {
    resolve_relative_path(Path::new(""), path).map(|_| ())
}
