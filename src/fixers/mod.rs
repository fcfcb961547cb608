//! Deterministic fixers keyed by diagnostic code.
//!
//! A fixer inspects one diagnostic and the current files and returns at most
//! one `Fix`. `None` means there is no safe mechanical repair and the
//! diagnostic should be escalated.

pub(crate) mod exports;
mod imports;
pub mod manifest;
mod markup;
mod types;

use crate::apply::resolve_target;
use crate::diagnostic::{Diagnostic, DiagnosticKind, FileArtifact, FileSet, Fix};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, error};

pub use imports::{known_symbol, KnownSymbol};

pub type FixerFn = fn(&Diagnostic, Option<&Captures<'_>>, &FileSet) -> Option<Fix>;

/// Confidence for heuristic rewrites that may not be what the author meant.
pub const HEURISTIC_CONFIDENCE: f32 = 0.7;

struct Entry {
    name: &'static str,
    pattern: Option<Regex>,
    apply: Option<FixerFn>,
}

struct FallbackEntry {
    kinds: &'static [DiagnosticKind],
    needle: &'static str,
    entry: Entry,
}

/// A resolved registry row with a fixer attached.
#[derive(Clone, Copy)]
pub struct Fixer<'a> {
    pub name: &'static str,
    pattern: Option<&'a Regex>,
    apply: FixerFn,
}

impl Fixer<'_> {
    pub fn run(&self, diag: &Diagnostic, files: &FileSet) -> Option<Fix> {
        let caps = self.pattern.and_then(|re| re.captures(&diag.message));
        (self.apply)(diag, caps.as_ref(), files)
    }
}

pub struct FixerRegistry {
    by_code: HashMap<&'static str, Entry>,
    fallback: Vec<FallbackEntry>,
}

fn compile(pattern: Option<&str>) -> Option<Regex> {
    let pattern = pattern?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            error!(pattern, error = %err, "invalid fixer pattern");
            None
        }
    }
}

fn entry(name: &'static str, pattern: Option<&str>, apply: Option<FixerFn>) -> Entry {
    Entry {
        name,
        pattern: compile(pattern),
        apply,
    }
}

const CANNOT_FIND_MODULE: &str = r"Cannot find module '([^']+)'";
const CANNOT_FIND_NAME: &str = r"Cannot find name '([^']+)'";

impl FixerRegistry {
    /// Process-wide table, built on first use.
    pub fn global() -> &'static FixerRegistry {
        static REGISTRY: OnceLock<FixerRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FixerRegistry::build)
    }

    fn build() -> Self {
        use DiagnosticKind::*;

        let rows = vec![
            ("TS2307", entry("missing-dependency", Some(CANNOT_FIND_MODULE), Some(manifest::fix_missing_module))),
            ("TS2305", entry("named-to-default-import", Some(r#"['"]+([^'"]+)['"]+ has no exported member '([^']+)'"#), Some(imports::fix_named_to_default))),
            ("TS2614", entry("named-to-default-import", Some(r#"['"]+([^'"]+)['"]+ has no exported member(?: named)? '([^']+)'"#), Some(imports::fix_named_to_default))),
            ("TS1192", entry("default-to-named-import", Some(r#"['"]+([^'"]+)['"]+ has no default export"#), Some(imports::fix_default_to_named))),
            ("TS2613", entry("default-to-named-import", Some(r#"['"]+([^'"]+)['"]+ has no default export"#), Some(imports::fix_default_to_named))),
            ("TS2304", entry("import-known-symbol", Some(CANNOT_FIND_NAME), Some(imports::fix_undefined_name))),
            ("TS2552", entry("import-known-symbol", Some(CANNOT_FIND_NAME), Some(imports::fix_undefined_name))),
            ("TS2339", entry("property-missing", Some(r"Property '([^']+)' does not exist"), None)),
            ("TS2322", entry("type-not-assignable", Some(r"Type '(.+?)' is not assignable"), None)),
            ("TS2345", entry("argument-type", Some(r"Argument of type '(.+?)' is not assignable"), None)),
            ("TS1005", entry("token-expected", Some(r"'(.+?)' expected"), None)),
            ("TS1128", entry("declaration-expected", None, None)),
            ("TS2532", entry("optional-chaining", None, Some(types::fix_possibly_undefined))),
            ("TS18048", entry("optional-chaining", Some(r"'([^']+)' is possibly 'undefined'"), Some(types::fix_possibly_undefined))),
            ("TS7006", entry("implicit-any", Some(r"Parameter '([^']+)' implicitly has an 'any' type"), Some(types::fix_implicit_any))),
            ("ETARGET", entry("pin-latest", Some(r"No matching version found for ((?:@[^/\s]+/)?[^@\s]+)@"), Some(manifest::fix_no_matching_version))),
            ("E404", entry("unknown-package", None, None)),
            ("ERESOLVE", entry("peer-conflict", None, None)),
            ("MISSING_DEP", entry("missing-dependency", Some(r"Missing dependency: (\S+)"), Some(manifest::fix_missing_module))),
            ("CLASS_ATTR", entry("class-attribute", None, Some(markup::fix_class_attribute))),
            ("FOR_ATTR", entry("for-attribute", None, Some(markup::fix_for_attribute))),
            ("NO_DEFAULT_EXPORT", entry("default-export", None, Some(exports::fix_default_export))),
            ("DUPLICATE_DEFAULT_EXPORT", entry("duplicate-default-export", None, None)),
            ("UNBALANCED", entry("bracket-balance", None, None)),
            ("UNRESOLVED_IMPORT", entry("unresolved-import", None, None)),
        ];

        let fallback = vec![
            FallbackEntry {
                kinds: &[Dependency, Import, Test, Build],
                needle: "Cannot find module",
                entry: entry("missing-dependency", Some(CANNOT_FIND_MODULE), Some(manifest::fix_missing_module)),
            },
            FallbackEntry {
                kinds: &[Dependency],
                needle: "Missing dependency",
                entry: entry("missing-dependency", Some(r"Missing dependency: (\S+)"), Some(manifest::fix_missing_module)),
            },
            FallbackEntry {
                kinds: &[StaticSyntax, Build],
                needle: "className",
                entry: entry("class-attribute", None, Some(markup::fix_class_attribute)),
            },
            FallbackEntry {
                kinds: &[StaticSyntax, Build],
                needle: "htmlFor",
                entry: entry("for-attribute", None, Some(markup::fix_for_attribute)),
            },
            FallbackEntry {
                kinds: &[Export, Build],
                needle: "no default export",
                entry: entry("default-export", None, Some(exports::fix_default_export)),
            },
            FallbackEntry {
                kinds: &[Import, Type, Build],
                needle: "Cannot find name",
                entry: entry("import-known-symbol", Some(CANNOT_FIND_NAME), Some(imports::fix_undefined_name)),
            },
        ];

        Self {
            by_code: rows.into_iter().collect(),
            fallback,
        }
    }

    /// The fixer for a diagnostic, or `None` when it must be escalated.
    ///
    /// A known code with no fixer does not fall through to the substring table.
    pub fn lookup(&self, diag: &Diagnostic) -> Option<Fixer<'_>> {
        if diag.kind == DiagnosticKind::Unknown {
            return None;
        }
        let row = match diag.code.as_deref() {
            Some(code) => self.by_code.get(code)?,
            None => {
                &self
                    .fallback
                    .iter()
                    .find(|f| f.kinds.contains(&diag.kind) && diag.message.contains(f.needle))?
                    .entry
            }
        };
        Some(Fixer {
            name: row.name,
            pattern: row.pattern.as_ref(),
            apply: row.apply?,
        })
    }

    pub fn try_fix(&self, diag: &Diagnostic, files: &FileSet) -> Option<Fix> {
        let fixer = self.lookup(diag)?;
        let fix = fixer.run(diag, files);
        debug!(
            fixer = fixer.name,
            signature = %diag.signature(),
            produced = fix.is_some(),
            "deterministic fixer ran"
        );
        fix
    }
}

pub fn lookup(diag: &Diagnostic) -> Option<Fixer<'static>> {
    FixerRegistry::global().lookup(diag)
}

pub fn try_fix(diag: &Diagnostic, files: &FileSet) -> Option<Fix> {
    FixerRegistry::global().try_fix(diag, files)
}

/// The artifact a diagnostic points at.
pub(crate) fn target_file<'a>(diag: &Diagnostic, files: &'a FileSet) -> Option<&'a FileArtifact> {
    let (idx, _) = resolve_target(files, &diag.file)?;
    files.as_slice().get(idx)
}

/// Zero-based line index from a diagnostic's one-based line.
pub(crate) fn line_index(diag: &Diagnostic) -> Option<usize> {
    diag.line.and_then(|l| (l as usize).checked_sub(1))
}

/// Rebuild content after editing one line, keeping the original line endings.
pub(crate) fn replace_line(content: &str, index: usize, new_line: &str) -> Option<String> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let slot = lines.get_mut(index)?;
    let had_cr = slot.ends_with('\r');
    *slot = new_line.trim_end_matches('\r').to_string();
    if had_cr {
        slot.push('\r');
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests;
