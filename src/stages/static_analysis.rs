//! In-process checks that need no toolchain: bracket balance, relative
//! import resolution, default-export rules and JSX attribute misuse.

use crate::diagnostic::{Diagnostic, DiagnosticKind, FileArtifact, FileSet};
use crate::fixers::exports::has_default_export;
use crate::util::{basename, normalize_path};
use rayon::prelude::*;

/// Unclosed openers reported per file.
const MAX_UNCLOSED_REPORTED: usize = 3;

const SKIPPED_EXTENSIONS: &[&str] = &[
    ".css", ".scss", ".less", ".md", ".json", ".svg", ".png", ".jpg", ".jpeg", ".gif", ".ico",
    ".txt", ".env", ".gitignore", ".lock", ".yaml", ".yml",
];

const SKIPPED_CONFIG_PREFIXES: &[&str] = &["tailwind.config", "postcss.config", "next.config"];

pub const RESOLVE_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".tsx",
    ".js",
    ".jsx",
    "/index.ts",
    "/index.tsx",
    "/index.js",
    "/index.jsx",
];

pub fn should_validate(path: &str) -> bool {
    let key = normalize_path(path);
    let name = basename(&key);
    if SKIPPED_EXTENSIONS.iter().any(|ext| key.ends_with(ext)) || name.starts_with(".env") {
        return false;
    }
    !SKIPPED_CONFIG_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Run every static check over the set, one file per rayon task.
pub fn analyze(files: &FileSet) -> Vec<Diagnostic> {
    files
        .as_slice()
        .par_iter()
        .filter(|f| f.language.is_script() && should_validate(&f.path))
        .map(|f| analyze_file(f, files))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

pub fn analyze_file(file: &FileArtifact, files: &FileSet) -> Vec<Diagnostic> {
    let code_only = strip_literals(&file.content, Strip::CommentsAndStrings);
    let no_comments = strip_literals(&file.content, Strip::Comments);

    let mut out = check_brackets(&file.path, &code_only);
    out.extend(check_imports(&file.path, &no_comments, files));
    out.extend(check_default_exports(&file.path, &no_comments));
    if file.language.is_markup() {
        out.extend(check_markup(&file.path, &no_comments));
    }
    out
}

/// `path:line:col: [CODE] message`, one per line.
pub fn render(diags: &[Diagnostic]) -> String {
    diags
        .iter()
        .map(|d| {
            let code = d.code.as_deref().map(|c| format!("[{}] ", c)).unwrap_or_default();
            format!(
                "{}:{}:{}: {}{}",
                d.file,
                d.line.unwrap_or(1),
                d.column.unwrap_or(1),
                code,
                d.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════
//  Literal stripping
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strip {
    Comments,
    CommentsAndStrings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Code,
    Single,
    Double,
    Template,
    LineComment,
    BlockComment,
}

/// Blank out comments (and optionally string bodies) with spaces.
///
/// Newlines survive so line/column positions stay valid. Quotes and
/// backticks are kept so the output still tokenizes. `'` and `"` strings
/// end at a newline; template literals nest through `${...}`.
pub fn strip_literals(content: &str, strip: Strip) -> String {
    let blank_strings = strip == Strip::CommentsAndStrings;
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut mode = Mode::Code;
    // Brace depth at which each open `${` resumes its template.
    let mut template_stack: Vec<usize> = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;

    let keep_or_blank = |c: char, blank: bool| -> char {
        if c == '\n' || !blank {
            c
        } else {
            ' '
        }
    };

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match mode {
            Mode::Code => match c {
                '/' if next == Some('/') => {
                    mode = Mode::LineComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                '/' if next == Some('*') => {
                    mode = Mode::BlockComment;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                '\'' => {
                    mode = Mode::Single;
                    out.push(c);
                }
                '"' => {
                    mode = Mode::Double;
                    out.push(c);
                }
                '`' => {
                    mode = Mode::Template;
                    out.push(c);
                }
                '{' => {
                    depth += 1;
                    out.push(c);
                }
                '}' => {
                    if template_stack.last() == Some(&depth) {
                        template_stack.pop();
                        mode = Mode::Template;
                        out.push(keep_or_blank(c, blank_strings));
                    } else {
                        depth = depth.saturating_sub(1);
                        out.push(c);
                    }
                }
                _ => out.push(c),
            },
            Mode::Single | Mode::Double => {
                let quote = if mode == Mode::Single { '\'' } else { '"' };
                if c == '\\' && next.is_some_and(|n| n != '\n') {
                    out.push(keep_or_blank(c, blank_strings));
                    out.push(keep_or_blank(chars[i + 1], blank_strings));
                    i += 2;
                    continue;
                }
                if c == quote {
                    mode = Mode::Code;
                    out.push(c);
                } else if c == '\n' {
                    mode = Mode::Code;
                    out.push('\n');
                } else {
                    out.push(keep_or_blank(c, blank_strings));
                }
            }
            Mode::Template => {
                if c == '\\' && next.is_some() {
                    out.push(keep_or_blank(c, blank_strings));
                    out.push(keep_or_blank(chars[i + 1], blank_strings));
                    i += 2;
                    continue;
                }
                if c == '`' {
                    mode = Mode::Code;
                    out.push(c);
                } else if c == '$' && next == Some('{') {
                    template_stack.push(depth);
                    mode = Mode::Code;
                    out.push(keep_or_blank(c, blank_strings));
                    out.push(keep_or_blank('{', blank_strings));
                    i += 2;
                    continue;
                } else {
                    out.push(keep_or_blank(c, blank_strings));
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    out.push_str("  ");
                    i += 2;
                    continue;
                }
                out.push(if c == '\n' { '\n' } else { ' ' });
            }
        }
        i += 1;
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
//  Checks
// ═══════════════════════════════════════════════════════════════════════════

fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

pub fn check_brackets(path: &str, stripped: &str) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut stack: Vec<(char, u32, u32)> = Vec::new();

    for (line_idx, line) in stripped.split('\n').enumerate() {
        let line_no = line_idx as u32 + 1;
        for (col_idx, c) in line.chars().enumerate() {
            let col = col_idx as u32 + 1;
            match c {
                '(' | '[' | '{' => stack.push((c, line_no, col)),
                ')' | ']' | '}' => match stack.pop() {
                    None => out.push(
                        Diagnostic::new(
                            DiagnosticKind::StaticSyntax,
                            path,
                            format!("Unmatched closing '{}'", c),
                        )
                        .at(line_no, col)
                        .with_code("UNBALANCED"),
                    ),
                    Some((open, open_line, _)) if closer_for(open) != c => out.push(
                        Diagnostic::new(
                            DiagnosticKind::StaticSyntax,
                            path,
                            format!(
                                "Mismatched closing '{}', expected '{}' for '{}' opened on line {}",
                                c,
                                closer_for(open),
                                open,
                                open_line
                            ),
                        )
                        .at(line_no, col)
                        .with_code("UNBALANCED"),
                    ),
                    Some(_) => {}
                },
                _ => {}
            }
        }
    }

    let unclosed = stack.len();
    for (open, line, col) in stack.into_iter().skip(unclosed.saturating_sub(MAX_UNCLOSED_REPORTED)) {
        out.push(
            Diagnostic::new(
                DiagnosticKind::StaticSyntax,
                path,
                format!("Unclosed '{}'", open),
            )
            .at(line, col)
            .with_code("UNBALANCED"),
        );
    }
    out
}

/// Import specifiers in `content` with the 1-based line each appears on.
pub fn import_specifiers(content: &str) -> Vec<(String, u32)> {
    let patterns = [
        static_regex!(r#"(?:import|export)\s[^'";]*?\bfrom\s*['"]([^'"]+)['"]"#),
        static_regex!(r#"(?m)^\s*import\s*['"]([^'"]+)['"]"#),
        static_regex!(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#),
        static_regex!(r#"\bimport\(\s*['"]([^'"]+)['"]\s*\)"#),
    ];
    let mut found: Vec<(usize, String)> = Vec::new();
    for re in patterns.into_iter().flatten() {
        for caps in re.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    found.sort_by_key(|(offset, _)| *offset);
    found.dedup_by_key(|(offset, _)| *offset);
    found
        .into_iter()
        .map(|(offset, spec)| (spec, line_of(content, offset)))
        .collect()
}

fn line_of(content: &str, offset: usize) -> u32 {
    content[..offset.min(content.len())].matches('\n').count() as u32 + 1
}

/// Normalized candidate paths an import specifier could refer to.
pub fn import_candidates(importer: &str, spec: &str) -> Vec<String> {
    let bases: Vec<String> = if let Some(rest) = spec.strip_prefix("@/").or_else(|| spec.strip_prefix("~/")) {
        vec![rest.to_string(), format!("src/{}", rest)]
    } else if spec.starts_with('.') {
        let dir = normalize_path(importer)
            .rsplit_once('/')
            .map(|(d, _)| d.to_string())
            .unwrap_or_default();
        match join_relative(&dir, spec) {
            Some(joined) => vec![joined],
            None => return Vec::new(),
        }
    } else {
        return Vec::new();
    };

    bases
        .iter()
        .flat_map(|base| RESOLVE_SUFFIXES.iter().map(move |s| normalize_path(&format!("{}{}", base, s))))
        .collect()
}

/// Lexically join `dir` and a `./` or `../` specifier. `None` if it climbs above the root.
fn join_relative(dir: &str, spec: &str) -> Option<String> {
    let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn check_imports(path: &str, content: &str, files: &FileSet) -> Vec<Diagnostic> {
    import_specifiers(content)
        .into_iter()
        .filter(|(spec, _)| spec.starts_with('.') || spec.starts_with("@/") || spec.starts_with("~/"))
        .filter(|(spec, _)| {
            let candidates = import_candidates(path, spec);
            !candidates.iter().any(|c| files.contains(c))
        })
        .map(|(spec, line)| {
            Diagnostic::new(
                DiagnosticKind::Import,
                path,
                format!("Cannot resolve import '{}'", spec),
            )
            .with_line(line)
            .with_code("UNRESOLVED_IMPORT")
        })
        .collect()
}

pub fn is_page_entry(path: &str) -> bool {
    let key = normalize_path(path);
    let name = basename(&key);
    if matches!(name, "page.tsx" | "page.ts" | "page.jsx" | "page.js") {
        return true;
    }
    let under_pages = key.starts_with("pages/") || key.contains("/pages/") || key.starts_with("src/pages/");
    under_pages
        && !key.contains("pages/api/")
        && !name.starts_with('_')
        && matches!(crate::util::extension(name), Some("tsx" | "jsx" | "js" | "ts"))
}

fn check_default_exports(path: &str, content: &str) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let Some(re) = static_regex!(r"(?m)^\s*export\s+default\b") else {
        return out;
    };
    let hits: Vec<usize> = re.find_iter(content).map(|m| m.start()).collect();
    if let Some(second) = hits.get(1) {
        out.push(
            Diagnostic::new(
                DiagnosticKind::Export,
                path,
                format!("Multiple default exports ({} found)", hits.len()),
            )
            .with_line(line_of(content, *second))
            .with_code("DUPLICATE_DEFAULT_EXPORT"),
        );
    }
    if hits.is_empty() && is_page_entry(path) && !has_default_export(content) {
        out.push(
            Diagnostic::new(DiagnosticKind::Export, path, "Page file has no default export")
                .with_code("NO_DEFAULT_EXPORT"),
        );
    }
    out
}

fn check_markup(path: &str, content: &str) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    if let Some(m) = static_regex!(r#"\bclass\s*=\s*["'{]"#).and_then(|re| re.find(content)) {
        out.push(
            Diagnostic::new(
                DiagnosticKind::StaticSyntax,
                path,
                "Use className instead of class in JSX",
            )
            .with_line(line_of(content, m.start()))
            .with_code("CLASS_ATTR"),
        );
    }
    if content.contains("<label") {
        if let Some(m) = static_regex!(r#"\bfor\s*=\s*["']"#).and_then(|re| re.find(content)) {
            out.push(
                Diagnostic::new(
                    DiagnosticKind::StaticSyntax,
                    path,
                    "Use htmlFor instead of for in JSX",
                )
                .with_line(line_of(content, m.start()))
                .with_code("FOR_ATTR"),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{parse, StageKind};

    fn set(files: &[(&str, &str)]) -> FileSet {
        FileSet::from_artifacts(files.iter().map(|(p, c)| FileArtifact::new(*p, *c)))
    }

    #[test]
    fn test_should_validate_skips_assets_and_configs() {
        assert!(should_validate("src/app.tsx"));
        assert!(!should_validate("app/globals.css"));
        assert!(!should_validate("tailwind.config.ts"));
        assert!(!should_validate("next.config.js"));
        assert!(!should_validate(".env.local"));
        assert!(!should_validate("public/logo.svg"));
    }

    #[test]
    fn test_strip_keeps_positions() {
        let src = "const a = \"(\"; // )\nconst b = `x ${ f(\"}\") } y`;\n/* [ */ call();";
        let stripped = strip_literals(src, Strip::CommentsAndStrings);
        assert_eq!(stripped.chars().count(), src.chars().count());
        assert_eq!(stripped.matches('\n').count(), 2);
        assert!(check_brackets("a.ts", &stripped).is_empty());
    }

    #[test]
    fn test_strip_comments_keeps_strings() {
        let src = "import x from 'y'; // import z from 'w'";
        let stripped = strip_literals(src, Strip::Comments);
        assert!(stripped.contains("'y'"));
        assert!(!stripped.contains("'w'"));
    }

    #[test]
    fn test_apostrophe_in_string_ends_at_newline() {
        let src = "const s = 'don\\'t';\nconst t = 'unterminated\nfoo(1);";
        let stripped = strip_literals(src, Strip::CommentsAndStrings);
        assert!(check_brackets("a.ts", &stripped).is_empty());
    }

    #[test]
    fn test_bracket_errors() {
        let diags = check_brackets("a.ts", "foo(]\n}\n{{{{");
        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert!(messages[0].starts_with("Mismatched closing ']'"));
        assert_eq!(messages[1], "Unmatched closing '}'");
        assert_eq!(diags[1].line, Some(2));
        let unclosed = diags.iter().filter(|d| d.message.starts_with("Unclosed")).count();
        assert_eq!(unclosed, 3);
        assert!(diags.iter().all(|d| d.code.as_deref() == Some("UNBALANCED")));
    }

    #[test]
    fn test_relative_import_resolution() {
        let files = set(&[
            ("src/app/page.tsx", "import Nav from '../components/Nav';\nimport { x } from './missing';\nimport u from '@/lib/utils';"),
            ("src/components/Nav/index.tsx", "export default function Nav() {}"),
            ("src/lib/utils.ts", "export const u = 1;"),
        ]);
        let page = files.get("src/app/page.tsx").unwrap();
        let diags = check_imports(&page.path, &page.content, &files);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "Cannot resolve import './missing'");
        assert_eq!(diags[0].line, Some(2));
        assert_eq!(diags[0].kind, DiagnosticKind::Import);
    }

    #[test]
    fn test_import_above_root_is_unresolved() {
        assert!(import_candidates("a.ts", "../../x").is_empty());
    }

    #[test]
    fn test_default_export_rules() {
        let dup = check_default_exports("src/a.tsx", "export default A;\nexport default B;");
        assert_eq!(dup.len(), 1);
        assert_eq!(dup[0].code.as_deref(), Some("DUPLICATE_DEFAULT_EXPORT"));
        assert_eq!(dup[0].line, Some(2));

        let missing = check_default_exports("app/about/page.tsx", "function About() {}");
        assert_eq!(missing[0].code.as_deref(), Some("NO_DEFAULT_EXPORT"));

        assert!(check_default_exports("src/util.ts", "export const a = 1;").is_empty());
        assert!(check_default_exports("pages/api/hello.ts", "export const a = 1;").is_empty());
        assert!(!check_default_exports("pages/about.jsx", "const A = 1;").is_empty());
    }

    #[test]
    fn test_markup_checks() {
        let diags = check_markup("a.tsx", "<label for=\"x\" class=\"y\">");
        let codes: Vec<_> = diags.iter().filter_map(|d| d.code.as_deref()).collect();
        assert_eq!(codes, vec!["CLASS_ATTR", "FOR_ATTR"]);
        assert!(check_markup("a.tsx", "for (let i = 0; i < 3; i++) {}").is_empty());
    }

    #[test]
    fn test_analyze_clean_project() {
        let files = set(&[
            ("app/page.tsx", "import Link from 'next/link';\nexport default function Home() {\n  return <Link href=\"/\">Home</Link>;\n}\n"),
            ("app/globals.css", "body { color: red; "),
            ("package.json", "{}"),
        ]);
        assert!(analyze(&files).is_empty());
    }

    #[test]
    fn test_render_parses_back() {
        let files = set(&[("app/page.tsx", "function Home() { return <div class=\"a\"/>; }")]);
        let diags = analyze(&files);
        let parsed = parse(&render(&diags), StageKind::Static);
        assert_eq!(parsed.len(), diags.len());
        assert_eq!(
            parsed.iter().map(|d| d.signature()).collect::<Vec<_>>(),
            diags
                .iter()
                .map(|d| {
                    let mut d = d.clone();
                    d.line.get_or_insert(1);
                    d.signature()
                })
                .collect::<Vec<_>>()
        );
    }
}
