//! Bare imports that `package.json` does not declare.

use super::static_analysis::{import_specifiers, strip_literals, Strip};
use crate::diagnostic::{Diagnostic, DiagnosticKind, FileSet};
use crate::fixers::manifest::{declared_dependencies, package_name, MANIFEST_PATH};
use std::collections::HashSet;

/// Packages assumed present: framework runtime and Node core modules.
const BUILTINS: &[&str] = &[
    "react",
    "react-dom",
    "next",
    "fs",
    "path",
    "http",
    "https",
    "url",
    "util",
    "os",
    "crypto",
    "stream",
    "events",
    "buffer",
    "child_process",
    "zlib",
    "assert",
    "querystring",
];

pub fn check_dependencies(files: &FileSet) -> Vec<Diagnostic> {
    let declared = declared_dependencies(files);
    let mut reported = HashSet::new();
    let mut out = Vec::new();

    for file in files.iter().filter(|f| f.language.is_script()) {
        let content = strip_literals(&file.content, Strip::Comments);
        for (spec, line) in import_specifiers(&content) {
            if spec.starts_with("node:") {
                continue;
            }
            let Some(name) = package_name(&spec) else {
                continue;
            };
            if BUILTINS.contains(&name.as_str()) || declared.contains(&name) {
                continue;
            }
            if !reported.insert(name.clone()) {
                continue;
            }
            out.push(
                Diagnostic::new(
                    DiagnosticKind::Dependency,
                    MANIFEST_PATH,
                    format!("Missing dependency: {}", name),
                )
                .with_code("MISSING_DEP")
                .with_raw(format!("'{}' imported by {}:{}", spec, file.path, line)),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::FileArtifact;

    fn set(files: &[(&str, &str)]) -> FileSet {
        FileSet::from_artifacts(files.iter().map(|(p, c)| FileArtifact::new(*p, *c)))
    }

    #[test]
    fn test_reports_each_missing_package_once() {
        let files = set(&[
            ("package.json", r#"{"dependencies":{"clsx":"2.0.0"},"devDependencies":{"vitest":"1"}}"#),
            ("src/a.ts", "import axios from 'axios';\nimport { z } from 'zod/lib';\nimport clsx from 'clsx';"),
            ("src/b.ts", "const a = require('axios');\nimport 'vitest';\nimport fs from 'node:fs';"),
            ("src/c.tsx", "import { useState } from 'react';\nimport x from './x';\nimport u from '@/lib/u';"),
        ]);
        let diags = check_dependencies(&files);
        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["Missing dependency: axios", "Missing dependency: zod"]);
        assert!(diags.iter().all(|d| d.file == "package.json"));
        assert!(diags[0].raw.contains("src/a.ts:1"));
    }

    #[test]
    fn test_scoped_package() {
        let files = set(&[("a.ts", "import { Button } from '@radix-ui/react-button/dist';")]);
        let diags = check_dependencies(&files);
        assert_eq!(diags[0].message, "Missing dependency: @radix-ui/react-button");
        assert_eq!(diags[0].code.as_deref(), Some("MISSING_DEP"));
    }

    #[test]
    fn test_commented_import_ignored() {
        let files = set(&[("a.ts", "// import x from 'ghost';\n/* require('phantom') */")]);
        assert!(check_dependencies(&files).is_empty());
    }
}
