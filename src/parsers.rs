//! Turn raw stage output into `Diagnostic`s.
//!
//! Every extractor is a regex over the whole output. Unmatched text is dropped;
//! nothing here returns an error. Extractors may overlap and their results are
//! concatenated as-is. Deduplication is the controller's job.

use crate::diagnostic::{Diagnostic, DiagnosticKind, Stage};
use regex::Captures;

/// Which grammar to apply to a blob of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Static,
    TypeCheck,
    Install,
    Dependency,
    Build,
    Test,
    Serve,
}

impl From<Stage> for StageKind {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Static => StageKind::Static,
            Stage::TypeCheck => StageKind::TypeCheck,
            Stage::Dependency => StageKind::Dependency,
            Stage::Build => StageKind::Build,
            Stage::Test => StageKind::Test,
            Stage::Serve => StageKind::Serve,
        }
    }
}

pub fn parse(raw: &str, kind: StageKind) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    match kind {
        StageKind::Static => parse_static(raw, &mut out),
        StageKind::TypeCheck => parse_typescript(raw, &mut out),
        StageKind::Install | StageKind::Dependency => {
            parse_install(raw, &mut out);
            parse_cannot_find_module(raw, "", &mut out);
        }
        StageKind::Build => parse_build(raw, &mut out),
        StageKind::Test => parse_test(raw, &mut out),
        StageKind::Serve => {
            parse_serve(raw, &mut out);
            parse_build(raw, &mut out);
        }
    }
    out
}

/// Kind implied by a TypeScript diagnostic code.
pub fn kind_for_ts_code(code: &str) -> DiagnosticKind {
    match code {
        "TS2307" => DiagnosticKind::Dependency,
        "TS2305" | "TS2614" | "TS1192" | "TS2613" | "TS2304" | "TS2552" => DiagnosticKind::Import,
        "TS1005" | "TS1128" | "TS1109" | "TS1161" => DiagnosticKind::StaticSyntax,
        "TS2528" | "TS2323" => DiagnosticKind::Export,
        _ => DiagnosticKind::Type,
    }
}

/// True for a specifier that names a package rather than a file.
pub fn is_bare_specifier(spec: &str) -> bool {
    !(spec.starts_with('.')
        || spec.starts_with('/')
        || spec.starts_with("@/")
        || spec.starts_with("~/"))
}

fn num(caps: &Captures<'_>, idx: usize) -> Option<u32> {
    caps.get(idx).and_then(|m| m.as_str().parse().ok())
}

fn text<'t>(caps: &Captures<'t>, idx: usize) -> &'t str {
    caps.get(idx).map(|m| m.as_str().trim()).unwrap_or_default()
}

fn clean_file(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}

// ═══════════════════════════════════════════════════════════════════════════
//  Static analysis text
// ═══════════════════════════════════════════════════════════════════════════

fn parse_static(raw: &str, out: &mut Vec<Diagnostic>) {
    let Some(re) = static_regex!(r"(?m)^([^\s:][^:\n]*):(\d+):(\d+):\s*(?:\[([A-Z0-9_]+)\]\s*)?(.+)$")
    else {
        return;
    };
    for caps in re.captures_iter(raw) {
        let message = text(&caps, 5).to_string();
        let code = caps.get(4).map(|m| m.as_str().to_string());
        let kind = static_kind(code.as_deref(), &message);
        let mut diag = Diagnostic::new(kind, clean_file(text(&caps, 1)), message)
            .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default());
        diag.line = num(&caps, 2);
        diag.column = num(&caps, 3);
        diag.code = code;
        out.push(diag);
    }
}

fn static_kind(code: Option<&str>, message: &str) -> DiagnosticKind {
    match code {
        Some("NO_DEFAULT_EXPORT") | Some("DUPLICATE_DEFAULT_EXPORT") => return DiagnosticKind::Export,
        Some("UNRESOLVED_IMPORT") => return DiagnosticKind::Import,
        Some("MISSING_DEP") => return DiagnosticKind::Dependency,
        Some(_) => return DiagnosticKind::StaticSyntax,
        None => {}
    }
    let lower = message.to_lowercase();
    if lower.contains("export") {
        DiagnosticKind::Export
    } else if lower.contains("import") {
        DiagnosticKind::Import
    } else {
        DiagnosticKind::StaticSyntax
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  TypeScript compiler
// ═══════════════════════════════════════════════════════════════════════════

fn parse_typescript(raw: &str, out: &mut Vec<Diagnostic>) {
    let plain = static_regex!(r"(?m)^(.+?)\((\d+),(\d+)\):\s*error\s+(TS\d+):\s*(.+)$");
    let pretty = static_regex!(r"(?m)^(\S.*?):(\d+):(\d+)\s+-\s+error\s+(TS\d+):\s*(.+)$");
    for re in [plain, pretty].into_iter().flatten() {
        for caps in re.captures_iter(raw) {
            let code = text(&caps, 4).to_string();
            let mut diag = Diagnostic::new(
                kind_for_ts_code(&code),
                clean_file(text(&caps, 1)),
                text(&caps, 5),
            )
            .with_code(code)
            .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default());
            diag.line = num(&caps, 2);
            diag.column = num(&caps, 3);
            out.push(diag);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Package installation
// ═══════════════════════════════════════════════════════════════════════════

fn parse_install(raw: &str, out: &mut Vec<Diagnostic>) {
    if let Some(re) = static_regex!(
        r"npm (?:ERR!|error) 404\s+'((?:@[^/'\s]+/)?[^@'\s]+)(?:@[^'\s]*)?' is not in (?:the npm|this) registry"
    ) {
        for caps in re.captures_iter(raw) {
            let name = text(&caps, 1);
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Dependency,
                    "package.json",
                    format!("Package not found: {}", name),
                )
                .with_code("E404")
                .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default()),
            );
        }
    }

    if let Some(re) =
        static_regex!(r"No matching version found for ((?:@[^/\s]+/)?[^@\s]+)@([^\s]+?)\.?(?:\s|$)")
    {
        for caps in re.captures_iter(raw) {
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Dependency,
                    "package.json",
                    format!("No matching version found for {}@{}", text(&caps, 1), text(&caps, 2)),
                )
                .with_code("ETARGET")
                .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default()),
            );
        }
    }

    if let Some(re) = static_regex!(r"(?m)npm (?:ERR!|error) code ERESOLVE") {
        if re.is_match(raw) {
            let detail = static_regex!(r"(?m)Could not resolve dependency:\s*\n?(?:npm (?:ERR!|error))?\s*(.+)$")
                .and_then(|d| d.captures(raw))
                .map(|c| text(&c, 1).to_string());
            let message = match detail {
                Some(d) => format!("Unable to resolve dependency tree: {}", d),
                None => "Unable to resolve dependency tree".to_string(),
            };
            out.push(
                Diagnostic::new(DiagnosticKind::Dependency, "package.json", message)
                    .with_code("ERESOLVE")
                    .with_raw(crate::util::tail_chars(raw, 2_000)),
            );
        }
    }

    if let Some(re) = static_regex!(r"No matching distribution found for ([A-Za-z0-9_.\-\[\]]+)") {
        for caps in re.captures_iter(raw) {
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Dependency,
                    "requirements.txt",
                    format!("No matching distribution found for {}", text(&caps, 1)),
                )
                .with_code("PIP_NOT_FOUND")
                .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default()),
            );
        }
    }
}

fn parse_cannot_find_module(raw: &str, file: &str, out: &mut Vec<Diagnostic>) {
    let Some(re) = static_regex!(r"Cannot find module '([^']+)'") else {
        return;
    };
    for caps in re.captures_iter(raw) {
        out.push(module_diagnostic(
            file,
            text(&caps, 1),
            caps.get(0).map(|m| m.as_str()).unwrap_or_default(),
        ));
    }
}

/// Missing package for bare specifiers, unresolved import otherwise.
fn module_diagnostic(file: &str, spec: &str, raw: &str) -> Diagnostic {
    let kind = if is_bare_specifier(spec) {
        DiagnosticKind::Dependency
    } else {
        DiagnosticKind::Import
    };
    Diagnostic::new(kind, clean_file(file), format!("Cannot find module '{}'", spec)).with_raw(raw)
}

// ═══════════════════════════════════════════════════════════════════════════
//  Production build
// ═══════════════════════════════════════════════════════════════════════════

fn parse_build(raw: &str, out: &mut Vec<Diagnostic>) {
    if let Some(re) = static_regex!(r"Error:\s*(.+?)\n\s*at\s+(.+?):(\d+):(\d+)") {
        for caps in re.captures_iter(raw) {
            let mut diag = Diagnostic::new(
                DiagnosticKind::Build,
                clean_file(text(&caps, 2)),
                text(&caps, 1),
            )
            .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default());
            diag.line = num(&caps, 3);
            diag.column = num(&caps, 4);
            out.push(diag);
        }
    }

    if let Some(re) = static_regex!(
        r"(?m)(?:^(\S+\.(?:tsx?|jsx?|mjs|cjs))(?::\d+:\d+)?\s*\n)?Module not found: (?:Error: )?Can't resolve '([^']+)'"
    ) {
        for caps in re.captures_iter(raw) {
            out.push(module_diagnostic(
                text(&caps, 1),
                text(&caps, 2),
                caps.get(0).map(|m| m.as_str()).unwrap_or_default(),
            ));
        }
    }

    if let Some(re) = static_regex!(r#"Failed to resolve import "([^"]+)" from "([^"]+)""#) {
        for caps in re.captures_iter(raw) {
            out.push(module_diagnostic(
                text(&caps, 2),
                text(&caps, 1),
                caps.get(0).map(|m| m.as_str()).unwrap_or_default(),
            ));
        }
    }

    if let Some(re) = static_regex!(r"(?m)^(\S+?):(\d+):(\d+)\s*\n\s*Type error:\s*(.+)$") {
        for caps in re.captures_iter(raw) {
            let mut diag = Diagnostic::new(
                DiagnosticKind::Type,
                clean_file(text(&caps, 1)),
                text(&caps, 4),
            )
            .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default());
            diag.line = num(&caps, 2);
            diag.column = num(&caps, 3);
            out.push(diag);
        }
    }

    parse_typescript(raw, out);
}

fn parse_serve(raw: &str, out: &mut Vec<Diagnostic>) {
    if let Some(re) = static_regex!(r"EADDRINUSE[^\n]*?:(\d+)") {
        if let Some(caps) = re.captures(raw) {
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Build,
                    "",
                    format!("Port {} already in use", text(&caps, 1)),
                )
                .with_code("EADDRINUSE")
                .with_raw(caps.get(0).map(|m| m.as_str()).unwrap_or_default()),
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
//  Test runner
// ═══════════════════════════════════════════════════════════════════════════

fn parse_test(raw: &str, out: &mut Vec<Diagnostic>) {
    let mut suites: Vec<(usize, String)> = Vec::new();
    if let Some(re) = static_regex!(r"FAIL\s+([^\s]+)") {
        for caps in re.captures_iter(raw) {
            let Some(whole) = caps.get(0) else { continue };
            let file = clean_file(text(&caps, 1));
            suites.push((whole.start(), file.clone()));
            out.push(
                Diagnostic::new(DiagnosticKind::Test, file.clone(), format!("Test suite failed: {}", file))
                    .with_raw(whole.as_str()),
            );
        }
    }
    // Assertions belong to the nearest preceding FAIL header.
    let suite_at = |offset: usize| -> String {
        suites
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .map(|(_, f)| f.clone())
            .unwrap_or_default()
    };

    if let Some(re) = static_regex!(r"expect\((.+?)\)\.(\w+)\((.*?)\)") {
        for caps in re.captures_iter(raw) {
            let Some(whole) = caps.get(0) else { continue };
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Test,
                    suite_at(whole.start()),
                    format!(
                        "Assertion failed: expect({}).{}({})",
                        text(&caps, 1),
                        text(&caps, 2),
                        text(&caps, 3)
                    ),
                )
                .with_raw(whole.as_str()),
            );
        }
    }

    if let Some(re) = static_regex!(r"(?i)Expected:?\s*(.+?)\s*Received:?\s*(.+?)(?:\n|$)") {
        for caps in re.captures_iter(raw) {
            let Some(whole) = caps.get(0) else { continue };
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Test,
                    suite_at(whole.start()),
                    format!("Expected {} but received {}", text(&caps, 1), text(&caps, 2)),
                )
                .with_raw(whole.as_str()),
            );
        }
    }

    if let Some(re) = static_regex!(r"Cannot find module '([^']+)'") {
        for caps in re.captures_iter(raw) {
            let Some(whole) = caps.get(0) else { continue };
            out.push(module_diagnostic(&suite_at(whole.start()), text(&caps, 1), whole.as_str()));
        }
    }
}
