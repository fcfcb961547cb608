use super::{line_index, replace_line, target_file, HEURISTIC_CONFIDENCE};
use crate::diagnostic::{Diagnostic, FileSet, Fix};
use regex::Captures;

/// Byte offset of a one-based character column within `line`.
fn column_offset(line: &str, column: Option<u32>) -> usize {
    let Some(col) = column.and_then(|c| (c as usize).checked_sub(1)) else {
        return 0;
    };
    line.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn line_at(content: &str, index: usize) -> Option<&str> {
    content.split('\n').nth(index).map(|l| l.trim_end_matches('\r'))
}

/// Turn `a.b` into `a?.b` on the reported line.
pub(super) fn fix_possibly_undefined(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let file = target_file(diag, files)?;
    let index = line_index(diag)?;
    let line = line_at(&file.content, index)?;

    let updated = match caps.and_then(|c| c.get(1)).map(|m| m.as_str()) {
        Some(expr) => {
            let needle = format!("{}.", expr);
            let at = line.find(&needle)?;
            let dot = at + expr.len();
            if line[..dot].ends_with('?') {
                return None;
            }
            format!("{}?{}", &line[..dot], &line[dot..])
        }
        None => {
            let re = static_regex!(r"([A-Za-z_$][\w$]*)\.([A-Za-z_$])")?;
            let start = column_offset(line, diag.column);
            let search = |from: usize| {
                re.captures_at(line, from)
                    .and_then(|c| c.get(1))
                    .map(|m| m.end())
            };
            let dot = search(start).or_else(|| search(0))?;
            format!("{}?{}", &line[..dot], &line[dot..])
        }
    };

    let content = replace_line(&file.content, index, &updated)?;
    Some(
        Fix::replace(
            file.path.clone(),
            content,
            format!(
                "Added optional chaining on line {} of {}",
                index + 1,
                file.path
            ),
        )
        .with_confidence(HEURISTIC_CONFIDENCE),
    )
}

/// Annotate an untyped parameter with `: any`.
pub(super) fn fix_implicit_any(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let param = caps?.get(1)?.as_str();
    let file = target_file(diag, files)?;
    let index = line_index(diag)?;
    let line = line_at(&file.content, index)?;

    let start = column_offset(line, diag.column);
    let at = if find_identifier(&line[start..], param) == Some(0) {
        start
    } else {
        find_identifier(line, param)?
    };
    let end = at + param.len();
    let rest = line[end..].trim_start();
    if rest.starts_with(':') || rest.starts_with('?') {
        return None;
    }

    // A parameter directly followed by `=>` is a bare arrow parameter.
    let updated = if rest.starts_with("=>") {
        format!("{}({}: any){}", &line[..at], param, &line[end..])
    } else {
        format!("{}{}: any{}", &line[..at], param, &line[end..])
    };

    let content = replace_line(&file.content, index, &updated)?;
    Some(Fix::replace(
        file.path.clone(),
        content,
        format!(
            "Annotated parameter '{}' as any on line {} of {}",
            param,
            index + 1,
            file.path
        ),
    ))
}

/// Byte offset of `name` as a whole identifier in `line`.
fn find_identifier(line: &str, name: &str) -> Option<usize> {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    line.match_indices(name).map(|(i, _)| i).find(|&i| {
        let before_ok = line[..i].chars().next_back().is_none_or(|c| !is_ident(c));
        let after_ok = line[i + name.len()..].chars().next().is_none_or(|c| !is_ident(c));
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::{DiagnosticKind, FileArtifact};
    use crate::fixers::FixerRegistry;

    fn files(content: &str) -> FileSet {
        FileSet::from_artifacts(vec![FileArtifact::new("src/a.ts", content)])
    }

    #[test]
    fn test_optional_chaining_uses_named_expression() {
        let set = files("const n = user.name;\nconst m = profile.bio;");
        let diag = Diagnostic::new(DiagnosticKind::Type, "src/a.ts", "'profile' is possibly 'undefined'.")
            .at(2, 11)
            .with_code("TS18048");
        let fix = FixerRegistry::global().try_fix(&diag, &set).unwrap();
        assert_eq!(fix.new_content.as_deref(), Some("const n = user.name;\nconst m = profile?.bio;"));
        assert!((fix.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_optional_chaining_from_column() {
        let set = files("const n = Math.max(1, data.items.length);");
        let diag = Diagnostic::new(DiagnosticKind::Type, "src/a.ts", "Object is possibly 'undefined'.")
            .at(1, 23)
            .with_code("TS2532");
        let fix = FixerRegistry::global().try_fix(&diag, &set).unwrap();
        assert_eq!(
            fix.new_content.as_deref(),
            Some("const n = Math.max(1, data?.items.length);")
        );
    }

    #[test]
    fn test_implicit_any_in_parens() {
        let set = files("function add(a, b) {\n  return a + b;\n}");
        let diag = Diagnostic::new(
            DiagnosticKind::Type,
            "src/a.ts",
            "Parameter 'b' implicitly has an 'any' type.",
        )
        .at(1, 17)
        .with_code("TS7006");
        let fix = FixerRegistry::global().try_fix(&diag, &set).unwrap();
        assert_eq!(
            fix.new_content.as_deref(),
            Some("function add(a, b: any) {\n  return a + b;\n}")
        );
    }

    #[test]
    fn test_implicit_any_bare_arrow() {
        let set = files("const f = items.map(item => item.id);");
        let diag = Diagnostic::new(
            DiagnosticKind::Type,
            "src/a.ts",
            "Parameter 'item' implicitly has an 'any' type.",
        )
        .with_line(1)
        .with_code("TS7006");
        let fix = FixerRegistry::global().try_fix(&diag, &set).unwrap();
        assert_eq!(
            fix.new_content.as_deref(),
            Some("const f = items.map((item: any) => item.id);")
        );
    }

    #[test]
    fn test_find_identifier_whole_word() {
        assert_eq!(find_identifier("(items, item)", "item"), Some(8));
        assert_eq!(find_identifier("(items)", "item"), None);
    }
}
