use super::target_file;
use crate::diagnostic::{Diagnostic, FileSet, Fix};
use regex::{Captures, Regex};

fn rewrite_whole_file(
    diag: &Diagnostic,
    files: &FileSet,
    re: Option<&Regex>,
    replacement: &str,
    what: &str,
) -> Option<Fix> {
    let re = re?;
    let file = target_file(diag, files)?;
    let updated = re.replace_all(&file.content, replacement);
    if updated.as_ref() == file.content.as_str() {
        return None;
    }
    Some(Fix::replace(
        file.path.clone(),
        updated.into_owned(),
        format!("Replaced {} in {}", what, file.path),
    ))
}

pub(super) fn fix_class_attribute(
    diag: &Diagnostic,
    _caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    rewrite_whole_file(
        diag,
        files,
        static_regex!(r#"\bclass\s*=\s*(["'{])"#),
        "className=$1",
        "class= with className=",
    )
}

pub(super) fn fix_for_attribute(
    diag: &Diagnostic,
    _caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    rewrite_whole_file(
        diag,
        files,
        static_regex!(r#"\bfor\s*=\s*(["'])"#),
        "htmlFor=$1",
        "for= with htmlFor=",
    )
}
