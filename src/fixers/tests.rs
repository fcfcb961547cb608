use super::*;
use crate::diagnostic::FileArtifact;

fn set(files: &[(&str, &str)]) -> FileSet {
    FileSet::from_artifacts(files.iter().map(|(p, c)| FileArtifact::new(*p, *c)))
}

fn diag(kind: DiagnosticKind, file: &str, code: Option<&str>, message: &str) -> Diagnostic {
    let d = Diagnostic::new(kind, file, message);
    match code {
        Some(code) => d.with_code(code),
        None => d,
    }
}

#[test]
fn test_lookup_escalates_type_errors() {
    for code in ["TS2339", "TS2322", "TS2345", "TS1005", "TS1128", "E404", "UNBALANCED"] {
        let d = diag(DiagnosticKind::Type, "a.ts", Some(code), "anything");
        assert!(lookup(&d).is_none(), "{} should escalate", code);
    }
}

#[test]
fn test_unknown_kind_always_escalates() {
    let d = diag(DiagnosticKind::Unknown, "a.ts", None, "Cannot find module 'x'");
    assert!(lookup(&d).is_none());
}

#[test]
fn test_known_code_without_fixer_does_not_fall_back() {
    let d = diag(
        DiagnosticKind::Type,
        "a.ts",
        Some("TS2322"),
        "Cannot find module 'left-pad'",
    );
    assert!(lookup(&d).is_none());
}

#[test]
fn test_fallback_by_kind_and_substring() {
    let d = diag(
        DiagnosticKind::Dependency,
        "src/a.ts",
        None,
        "Cannot find module 'left-pad'",
    );
    assert_eq!(lookup(&d).map(|f| f.name), Some("missing-dependency"));
}

#[test]
fn test_missing_module_adds_dependency() {
    let files = set(&[
        ("package.json", r#"{"dependencies":{"react":"18.2.0"}}"#),
        ("src/a.ts", "import pad from 'left-pad/lib';"),
    ]);
    let d = diag(
        DiagnosticKind::Dependency,
        "src/a.ts",
        Some("TS2307"),
        "Cannot find module 'left-pad/lib' or its corresponding type declarations.",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(fix.target_path, "package.json");
    assert!(fix.new_content.unwrap().contains("\"left-pad\": \"latest\""));
    assert_eq!(fix.confidence, 1.0);
}

#[test]
fn test_missing_module_skips_relative() {
    let files = set(&[("package.json", "{}")]);
    let d = diag(
        DiagnosticKind::Import,
        "src/a.ts",
        Some("TS2307"),
        "Cannot find module './util'",
    );
    assert!(try_fix(&d, &files).is_none());
}

#[test]
fn test_class_attribute_rewrite() {
    let files = set(&[(
        "src/Card.tsx",
        "export const Card = () => <div class=\"card\"><span class={x}>a</span></div>;",
    )]);
    let d = diag(
        DiagnosticKind::StaticSyntax,
        "src/Card.tsx",
        Some("CLASS_ATTR"),
        "Use className instead of class",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(
        fix.new_content.as_deref(),
        Some("export const Card = () => <div className=\"card\"><span className={x}>a</span></div>;")
    );
}

#[test]
fn test_for_attribute_rewrite() {
    let files = set(&[("src/Form.jsx", "<label for='email'>Email</label>")]);
    let d = diag(DiagnosticKind::StaticSyntax, "src/Form.jsx", Some("FOR_ATTR"), "Use htmlFor");
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(fix.new_content.as_deref(), Some("<label htmlFor='email'>Email</label>"));
}

#[test]
fn test_default_export_appended() {
    let files = set(&[("app/page.tsx", "function Home() {\n  return <main/>;\n}\n\n")]);
    let d = diag(
        DiagnosticKind::Export,
        "app/page.tsx",
        Some("NO_DEFAULT_EXPORT"),
        "Page file has no default export",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(
        fix.new_content.as_deref(),
        Some("function Home() {\n  return <main/>;\n}\n\nexport default Home;\n")
    );
}

#[test]
fn test_default_export_skipped_when_present() {
    let files = set(&[("app/page.tsx", "export default function Home() {}")]);
    let d = diag(DiagnosticKind::Export, "app/page.tsx", Some("NO_DEFAULT_EXPORT"), "x");
    assert!(try_fix(&d, &files).is_none());
}

#[test]
fn test_known_symbol_import_inserted() {
    let files = set(&[(
        "app/page.tsx",
        "'use client';\nimport Link from 'next/link';\n\nexport default function P() {\n  const [a] = useState(0);\n}",
    )]);
    let d = diag(
        DiagnosticKind::Import,
        "app/page.tsx",
        Some("TS2304"),
        "Cannot find name 'useState'.",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(
        fix.new_content.as_deref(),
        Some("'use client';\nimport Link from 'next/link';\nimport { useState } from 'react';\n\nexport default function P() {\n  const [a] = useState(0);\n}")
    );
}

#[test]
fn test_known_symbol_merged_into_existing_import() {
    let files = set(&[("a.tsx", "import { useState } from 'react';\nuseEffect(() => {});")]);
    let d = diag(DiagnosticKind::Import, "a.tsx", Some("TS2304"), "Cannot find name 'useEffect'.");
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(
        fix.new_content.as_deref(),
        Some("import { useState, useEffect } from 'react';\nuseEffect(() => {});")
    );
}

#[test]
fn test_known_symbol_already_imported() {
    let files = set(&[("a.tsx", "import { useState } from 'react';\n")]);
    let d = diag(DiagnosticKind::Import, "a.tsx", Some("TS2304"), "Cannot find name 'useState'.");
    assert!(try_fix(&d, &files).is_none());
}

#[test]
fn test_unknown_symbol_escalates() {
    let files = set(&[("a.tsx", "fooBar();")]);
    let d = diag(DiagnosticKind::Import, "a.tsx", Some("TS2304"), "Cannot find name 'fooBar'.");
    assert!(try_fix(&d, &files).is_none());
}

#[test]
fn test_default_to_named_wrap() {
    let files = set(&[(
        "app/page.tsx",
        "import Button from \"./components/Button\";\nexport default function P() { return <Button/>; }",
    )]);
    let d = diag(
        DiagnosticKind::Import,
        "app/page.tsx",
        Some("TS1192"),
        "Module '\"/tmp/ws/app/components/Button\"' has no default export.",
    )
    .with_line(1);
    let fix = try_fix(&d, &files).unwrap();
    assert!(fix
        .new_content
        .unwrap()
        .starts_with("import { Button } from \"./components/Button\";\n"));
}

#[test]
fn test_named_to_default_unwrap() {
    let files = set(&[("src/App.tsx", "import { Header } from './Header'\n")]);
    let d = diag(
        DiagnosticKind::Import,
        "src/App.tsx",
        Some("TS2614"),
        "Module '\"./Header\"' has no exported member 'Header'. Did you mean to use 'import Header from \"./Header\"' instead?",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert_eq!(fix.new_content.as_deref(), Some("import Header from './Header'\n"));
}

#[test]
fn test_named_to_default_requires_single_specifier() {
    let files = set(&[("src/App.tsx", "import { Header, Footer } from './Header';\n")]);
    let d = diag(
        DiagnosticKind::Import,
        "src/App.tsx",
        Some("TS2305"),
        "Module '\"./Header\"' has no exported member 'Header'.",
    );
    assert!(try_fix(&d, &files).is_none());
}

#[test]
fn test_etarget_pins_latest() {
    let files = set(&[("package.json", r#"{"dependencies":{"react":"99.0.0"}}"#)]);
    let d = diag(
        DiagnosticKind::Dependency,
        "package.json",
        Some("ETARGET"),
        "No matching version found for react@99.0.0",
    );
    let fix = try_fix(&d, &files).unwrap();
    assert!(fix.new_content.unwrap().contains("\"react\": \"latest\""));
}

#[test]
fn test_replace_line_keeps_crlf() {
    let out = replace_line("a\r\nb\r\nc", 1, "B").unwrap();
    assert_eq!(out, "a\r\nB\r\nc");
    assert!(replace_line("a", 3, "x").is_none());
}
