use super::{line_index, replace_line, target_file};
use crate::diagnostic::{Diagnostic, FileSet, Fix};
use crate::parsers::is_bare_specifier;
use regex::Captures;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownSymbol {
    pub name: &'static str,
    pub module: &'static str,
    /// `import { name }` when true, `import name` otherwise.
    pub named: bool,
}

const fn sym(name: &'static str, module: &'static str, named: bool) -> KnownSymbol {
    KnownSymbol { name, module, named }
}

const KNOWN_SYMBOLS: &[KnownSymbol] = &[
    sym("useState", "react", true),
    sym("useEffect", "react", true),
    sym("useCallback", "react", true),
    sym("useMemo", "react", true),
    sym("useRef", "react", true),
    sym("useContext", "react", true),
    sym("useReducer", "react", true),
    sym("React", "react", false),
    sym("Link", "next/link", false),
    sym("Image", "next/image", false),
    sym("useRouter", "next/navigation", true),
    sym("usePathname", "next/navigation", true),
    sym("useSearchParams", "next/navigation", true),
    sym("redirect", "next/navigation", true),
    sym("notFound", "next/navigation", true),
    sym("NextRequest", "next/server", true),
    sym("NextResponse", "next/server", true),
    sym("cn", "@/lib/utils", true),
    sym("clsx", "clsx", false),
    sym("motion", "framer-motion", true),
    sym("AnimatePresence", "framer-motion", true),
];

pub fn known_symbol(name: &str) -> Option<&'static KnownSymbol> {
    KNOWN_SYMBOLS.iter().find(|s| s.name == name)
}

/// A single-line `import ... from '...'` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ImportLine {
    index: usize,
    default: Option<String>,
    named: Vec<String>,
    module: String,
    quote: char,
    semicolon: bool,
    indent: String,
}

impl ImportLine {
    fn render(&self) -> String {
        let mut clause = String::new();
        if let Some(default) = &self.default {
            clause.push_str(default);
        }
        if !self.named.is_empty() {
            if !clause.is_empty() {
                clause.push_str(", ");
            }
            clause.push_str(&format!("{{ {} }}", self.named.join(", ")));
        }
        format!(
            "{}import {} from {q}{}{q}{}",
            self.indent,
            clause,
            self.module,
            if self.semicolon { ";" } else { "" },
            q = self.quote
        )
    }
}

fn parse_imports(content: &str) -> Vec<ImportLine> {
    let Some(re) = static_regex!(
        r#"^(\s*)import\s+(type\s+)?(.+?)\s+from\s+(['"])([^'"]+)['"]\s*(;?)\s*$"#
    ) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (index, line) in content.split('\n').enumerate() {
        let line = line.trim_end_matches('\r');
        let Some(caps) = re.captures(line) else { continue };
        // Type-only and namespace imports are left alone.
        if caps.get(2).is_some() {
            continue;
        }
        let clause = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
        if clause.contains('*') {
            continue;
        }
        let Some((default, named)) = split_clause(clause) else {
            continue;
        };
        out.push(ImportLine {
            index,
            default,
            named,
            module: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
            quote: caps
                .get(4)
                .and_then(|m| m.as_str().chars().next())
                .unwrap_or('\''),
            semicolon: caps.get(6).is_some_and(|m| !m.as_str().is_empty()),
            indent: caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default(),
        });
    }
    out
}

/// `X`, `{ a, b }` or `X, { a }` into (default, named).
fn split_clause(clause: &str) -> Option<(Option<String>, Vec<String>)> {
    let (head, braces) = match clause.find('{') {
        Some(open) => {
            let close = clause.rfind('}')?;
            (clause[..open].trim().trim_end_matches(',').trim(), Some(&clause[open + 1..close]))
        }
        None => (clause.trim(), None),
    };
    let default = (!head.is_empty()).then(|| head.to_string());
    if default.as_deref().is_some_and(|d| !d.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$')) {
        return None;
    }
    let named = braces
        .map(|inner| {
            inner
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some((default, named))
}

/// Local binding introduced by a named specifier (`a as b` binds `b`).
fn binding(spec: &str) -> &str {
    spec.rsplit(" as ").next().unwrap_or(spec).trim()
}

/// Whether an import's specifier refers to the module named in a diagnostic.
///
/// The compiler reports relative modules by resolved path, so the last
/// segment is compared when an exact match fails.
fn same_module(import_spec: &str, reported: &str) -> bool {
    if import_spec == reported {
        return true;
    }
    let strip = |s: &str| -> String {
        let last = s.rsplit('/').next().unwrap_or(s);
        let last = last
            .trim_end_matches(".tsx")
            .trim_end_matches(".ts")
            .trim_end_matches(".jsx")
            .trim_end_matches(".js");
        if last == "index" {
            s.trim_end_matches("/index")
                .rsplit('/')
                .next()
                .unwrap_or(last)
                .to_string()
        } else {
            last.to_string()
        }
    };
    !is_bare_specifier(import_spec) && strip(import_spec) == strip(reported)
}

/// Prefer the import on the reported line, then the first candidate.
fn pick<'a>(candidates: Vec<&'a ImportLine>, diag: &Diagnostic) -> Option<&'a ImportLine> {
    let wanted = line_index(diag);
    candidates
        .iter()
        .find(|imp| Some(imp.index) == wanted)
        .copied()
        .or_else(|| candidates.first().copied())
}

/// `import { X } from 'm'` → `import X from 'm'` when `m` only has a default export.
pub(super) fn fix_named_to_default(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let caps = caps?;
    let module = caps.get(1)?.as_str();
    let member = caps.get(2)?.as_str();
    let file = target_file(diag, files)?;
    let imports = parse_imports(&file.content);
    let candidates: Vec<&ImportLine> = imports
        .iter()
        .filter(|imp| same_module(&imp.module, module))
        .filter(|imp| imp.default.is_none() && imp.named.len() == 1)
        .filter(|imp| binding(&imp.named[0]) == member || imp.named[0] == member)
        .collect();
    let import = pick(candidates, diag)?;
    // Mismatched names in an external package are typos, not shape errors.
    if is_bare_specifier(&import.module) && diag.code.as_deref() == Some("TS2305") {
        return None;
    }

    let mut rewritten = import.clone();
    rewritten.default = Some(binding(&import.named[0]).to_string());
    rewritten.named.clear();
    let content = replace_line(&file.content, import.index, &rewritten.render())?;
    Some(Fix::replace(
        file.path.clone(),
        content,
        format!(
            "Changed named import of '{}' to a default import from '{}' in {}",
            member, import.module, file.path
        ),
    ))
}

/// `import X from 'm'` → `import { X } from 'm'` when `m` has no default export.
pub(super) fn fix_default_to_named(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let module = caps?.get(1)?.as_str();
    let file = target_file(diag, files)?;
    let imports = parse_imports(&file.content);
    let candidates: Vec<&ImportLine> = imports
        .iter()
        .filter(|imp| imp.default.is_some() && same_module(&imp.module, module))
        .collect();
    let import = pick(candidates, diag)?;

    let mut rewritten = import.clone();
    let name = rewritten.default.take()?;
    rewritten.named.insert(0, name.clone());
    let content = replace_line(&file.content, import.index, &rewritten.render())?;
    Some(Fix::replace(
        file.path.clone(),
        content,
        format!(
            "Changed default import '{}' to a named import from '{}' in {}",
            name, import.module, file.path
        ),
    ))
}

/// Import a well-known framework identifier that is used but never imported.
pub(super) fn fix_undefined_name(
    diag: &Diagnostic,
    caps: Option<&Captures<'_>>,
    files: &FileSet,
) -> Option<Fix> {
    let name = caps?.get(1)?.as_str();
    let symbol = known_symbol(name)?;
    let file = target_file(diag, files)?;
    let imports = parse_imports(&file.content);

    let already = imports.iter().any(|imp| {
        imp.module == symbol.module
            && (imp.default.as_deref() == Some(name) || imp.named.iter().any(|n| binding(n) == name))
    });
    if already {
        return None;
    }

    // The module is imported but lacks this name: extend that import rather than skip.
    let merged = imports
        .iter()
        .find(|imp| imp.module == symbol.module)
        .and_then(|existing| {
            let mut updated = existing.clone();
            if symbol.named {
                updated.named.push(name.to_string());
            } else if updated.default.is_none() {
                updated.default = Some(name.to_string());
            } else {
                return None;
            }
            replace_line(&file.content, existing.index, &updated.render())
        });

    let content = match merged {
        Some(content) => content,
        None => insert_import(&file.content, &render_new_import(symbol)),
    };
    Some(Fix::replace(
        file.path.clone(),
        content,
        format!("Added import of '{}' from '{}' to {}", name, symbol.module, file.path),
    ))
}

fn render_new_import(symbol: &KnownSymbol) -> String {
    if symbol.named {
        format!("import {{ {} }} from '{}';", symbol.name, symbol.module)
    } else {
        format!("import {} from '{}';", symbol.name, symbol.module)
    }
}

/// Insert after the last import statement, or after a leading directive.
pub(crate) fn insert_import(content: &str, statement: &str) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let last_import = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with("import ") || l.trim_start().starts_with("import{"));

    let insert_at = match last_import {
        Some(idx) => end_of_statement(&lines, idx) + 1,
        None => lines
            .iter()
            .position(|l| {
                let t = l.trim();
                !(t.is_empty()
                    || t.starts_with("'use ")
                    || t.starts_with("\"use ")
                    || t.starts_with("//"))
            })
            .map(|first_code| {
                // Directives must stay first.
                lines[..first_code]
                    .iter()
                    .rposition(|l| l.trim().starts_with("'use ") || l.trim().starts_with("\"use "))
                    .map(|d| d + 1)
                    .unwrap_or(0)
            })
            .unwrap_or(0),
    };

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    out.extend_from_slice(&lines[..insert_at.min(lines.len())]);
    out.push(statement);
    if insert_at < lines.len() {
        out.extend_from_slice(&lines[insert_at..]);
    }
    out.join("\n")
}

/// Last line of a possibly multi-line import beginning at `start`.
fn end_of_statement(lines: &[&str], start: usize) -> usize {
    let first = lines[start];
    let complete = |l: &str| {
        l.contains(" from ") || l.contains("from'") || l.contains("from\"") || l.trim_end().ends_with(';')
    };
    if complete(first) || first.contains('\'') || first.contains('"') {
        return start;
    }
    lines[start + 1..]
        .iter()
        .position(|l| complete(l))
        .map(|offset| start + 1 + offset)
        .unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_imports_shapes() {
        let content = "import React, { useState } from 'react';\nimport Link from \"next/link\"\nimport * as z from 'zod';\nimport type { X } from './x';\n";
        let imports = parse_imports(content);
        assert_eq!(imports.len(), 2);
        assert_eq!(imports[0].default.as_deref(), Some("React"));
        assert_eq!(imports[0].named, vec!["useState".to_string()]);
        assert!(imports[0].semicolon);
        assert_eq!(imports[1].quote, '"');
        assert!(!imports[1].semicolon);
    }

    #[test]
    fn test_render_round_trip_preserves_style() {
        let imports = parse_imports("  import { a, b as c } from \"m\"");
        assert_eq!(imports[0].render(), "  import { a, b as c } from \"m\"");
    }

    #[test]
    fn test_insert_after_multiline_import() {
        let content = "import {\n  a,\n  b,\n} from 'x';\n\nexport const y = 1;";
        let out = insert_import(content, "import { useState } from 'react';");
        assert_eq!(
            out,
            "import {\n  a,\n  b,\n} from 'x';\nimport { useState } from 'react';\n\nexport const y = 1;"
        );
    }

    #[test]
    fn test_insert_respects_use_client() {
        let content = "'use client';\n\nexport default function A() {}";
        let out = insert_import(content, "import { useState } from 'react';");
        assert_eq!(
            out,
            "'use client';\nimport { useState } from 'react';\n\nexport default function A() {}"
        );
    }

    #[test]
    fn test_same_module_matches_resolved_paths() {
        assert!(same_module("./components/Button", "/tmp/ws/app/components/Button"));
        assert!(same_module("@/components/Card", "/abs/components/Card/index"));
        assert!(!same_module("react", "/abs/react"));
        assert!(same_module("react", "react"));
    }
}
