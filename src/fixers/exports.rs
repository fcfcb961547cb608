use super::target_file;
use crate::diagnostic::{Diagnostic, FileSet, Fix};
use regex::Captures;

pub(crate) fn has_default_export(content: &str) -> bool {
    static_regex!(r"(?m)^\s*export\s+default\b")
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

/// First top-level component-like declaration that can be default-exported.
fn exportable_name(content: &str) -> Option<String> {
    let function = static_regex!(r"(?m)^(?:export\s+)?(?:async\s+)?function\s+(\w+)");
    let arrow = static_regex!(r"(?m)^(?:export\s+)?const\s+([A-Z]\w*)\s*(?::[^=\n]+)?=\s*(?:async\s*)?(?:\(|\w+\s*=>)");
    [function, arrow]
        .into_iter()
        .flatten()
        .find_map(|re| re.captures(content))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub(super) fn fix_default_export(
    diag: &Diagnostic,
    _caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let file = target_file(diag, files)?;
    if has_default_export(&file.content) {
        return None;
    }
    let name = exportable_name(&file.content)?;
    let content = format!("{}\n\nexport default {};\n", file.content.trim_end(), name);
    Some(Fix::replace(
        file.path.clone(),
        content,
        format!("Added default export of '{}' to {}", name, file.path),
    ))
}
