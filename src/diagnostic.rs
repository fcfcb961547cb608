//! Core data types shared by every stage of the repair loop.

use crate::util::{extension, normalize_path, truncate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Characters of the message that participate in a signature.
const SIGNATURE_MESSAGE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    StaticSyntax,
    Import,
    Export,
    Type,
    Dependency,
    Build,
    Test,
    Unknown,
}

impl DiagnosticKind {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticKind::StaticSyntax => "syntax",
            DiagnosticKind::Import => "import",
            DiagnosticKind::Export => "export",
            DiagnosticKind::Type => "type",
            DiagnosticKind::Dependency => "dependency",
            DiagnosticKind::Build => "build",
            DiagnosticKind::Test => "test",
            DiagnosticKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub code: Option<String>,
    pub message: String,
    pub raw: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, file: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            file: file.into(),
            line: None,
            column: None,
            code: None,
            raw: message.clone(),
            message,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    /// Deduplication key: `file:line:code:message-prefix`.
    pub fn signature(&self) -> String {
        let line = self.line.map(|l| l.to_string()).unwrap_or_default();
        let code = self.code.as_deref().unwrap_or_default();
        let prefix: String = self.message.chars().take(SIGNATURE_MESSAGE_CHARS).collect();
        format!("{}:{}:{}:{}", self.file, line, code, prefix)
    }

    /// One-line human summary used in reports.
    pub fn summary(&self) -> String {
        let mut location = self.file.clone();
        if let Some(line) = self.line {
            location.push_str(&format!(":{}", line));
            if let Some(col) = self.column {
                location.push_str(&format!(":{}", col));
            }
        }
        match &self.code {
            Some(code) => format!("[{}] {} {}: {}", self.kind.label(), location, code, self.message),
            None => format!("[{}] {}: {}", self.kind.label(), location, self.message),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    ReplaceContent,
    Create,
    Delete,
}

/// A proposed change to exactly one file. Applying it is the only way content changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub target_path: String,
    pub action: FixAction,
    pub description: String,
    pub new_content: Option<String>,
    pub confidence: f32,
}

impl Fix {
    pub fn replace(
        target_path: impl Into<String>,
        new_content: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            action: FixAction::ReplaceContent,
            description: description.into(),
            new_content: Some(new_content.into()),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Json,
    Css,
    Html,
    Python,
    Markdown,
    Other,
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        match extension(path).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("ts") | Some("mts") | Some("cts") => Language::TypeScript,
            Some("tsx") => Language::Tsx,
            Some("js") | Some("mjs") | Some("cjs") => Language::JavaScript,
            Some("jsx") => Language::Jsx,
            Some("json") => Language::Json,
            Some("css") | Some("scss") | Some("less") => Language::Css,
            Some("html") | Some("htm") => Language::Html,
            Some("py") => Language::Python,
            Some("md") => Language::Markdown,
            _ => Language::Other,
        }
    }

    pub fn is_typed(&self) -> bool {
        matches!(self, Language::TypeScript | Language::Tsx)
    }

    pub fn is_script(&self) -> bool {
        matches!(
            self,
            Language::TypeScript | Language::Tsx | Language::JavaScript | Language::Jsx
        )
    }

    pub fn is_markup(&self) -> bool {
        matches!(self, Language::Tsx | Language::Jsx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub path: String,
    pub content: String,
    #[serde(default = "language_other")]
    pub language: Language,
}

fn language_other() -> Language {
    Language::Other
}

impl FileArtifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let language = Language::from_path(&path);
        Self {
            path,
            content: content.into(),
            language,
        }
    }

    pub fn key(&self) -> String {
        normalize_path(&self.path)
    }

    /// Fills in the language tag from the extension when the producer left it blank.
    pub fn with_detected_language(mut self) -> Self {
        if self.language == Language::Other {
            self.language = Language::from_path(&self.path);
        }
        self
    }
}

/// Ordered artifact collection holding at most one entry per normalized path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: Vec<FileArtifact>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set, collapsing entries that share a normalized path (last wins).
    pub fn from_artifacts(artifacts: impl IntoIterator<Item = FileArtifact>) -> Self {
        let mut set = Self::new();
        for artifact in artifacts {
            let path = artifact.path.clone();
            if set.insert(artifact.with_detected_language()) {
                warn!(path = %path, "duplicate artifact path; keeping the later copy");
            }
        }
        set
    }

    /// Insert or replace by identity. Returns true when an existing entry was replaced.
    pub fn insert(&mut self, artifact: FileArtifact) -> bool {
        let key = artifact.key();
        match self.files.iter_mut().find(|f| f.key() == key) {
            Some(existing) => {
                *existing = artifact;
                true
            }
            None => {
                self.files.push(artifact);
                false
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&FileArtifact> {
        let key = normalize_path(path);
        self.files.iter().find(|f| f.key() == key)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn remove_at(&mut self, index: usize) -> Option<FileArtifact> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn get_mut_at(&mut self, index: usize) -> Option<&mut FileArtifact> {
        self.files.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileArtifact> {
        self.files.iter()
    }

    pub fn as_slice(&self) -> &[FileArtifact] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn has_typed_sources(&self) -> bool {
        self.files.iter().any(|f| f.language.is_typed())
    }

    pub fn into_vec(self) -> Vec<FileArtifact> {
        self.files
    }
}

impl<'a> IntoIterator for &'a FileSet {
    type Item = &'a FileArtifact;
    type IntoIter = std::slice::Iter<'a, FileArtifact>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Static,
    TypeCheck,
    Dependency,
    Build,
    Test,
    Serve,
}

impl Stage {
    pub const ORDER: [Stage; 6] = [
        Stage::Static,
        Stage::TypeCheck,
        Stage::Dependency,
        Stage::Build,
        Stage::Test,
        Stage::Serve,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Static => "static",
            Stage::TypeCheck => "typecheck",
            Stage::Dependency => "dependency",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Serve => "serve",
        }
    }

    /// Stages that need the files on disk and a child process.
    pub fn needs_process(&self) -> bool {
        !matches!(self, Stage::Static | Stage::Dependency)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl StageResult {
    pub fn passed(stage: Stage) -> Self {
        Self {
            stage,
            success: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(stage: Stage, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            stage,
            success: false,
            diagnostics,
        }
    }

    /// Failed stage whose output yielded nothing parseable.
    pub fn failed_unparsed(stage: Stage, output: &str) -> Self {
        Self::failed(stage, vec![unknown_from_output(stage, output)])
    }
}

const UNKNOWN_RAW_TAIL_CHARS: usize = 2_000;

pub fn unknown_from_output(stage: Stage, output: &str) -> Diagnostic {
    let raw = crate::util::tail_chars(output, UNKNOWN_RAW_TAIL_CHARS);
    let message = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate(l, 200))
        .unwrap_or_else(|| format!("{} failed", stage));
    Diagnostic::new(DiagnosticKind::Unknown, "", message).with_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let diag = Diagnostic::new(DiagnosticKind::Type, "src/a.ts", "Type 'x' is not assignable")
            .at(4, 2)
            .with_code("TS2322");
        assert_eq!(diag.signature(), "src/a.ts:4:TS2322:Type 'x' is not assignable");

        let bare = Diagnostic::new(DiagnosticKind::Unknown, "", "boom");
        assert_eq!(bare.signature(), ":::boom");
    }

    #[test]
    fn test_signature_truncates_message() {
        let long = "x".repeat(80);
        let diag = Diagnostic::new(DiagnosticKind::Build, "a", long).with_line(1);
        assert_eq!(diag.signature(), format!("a:1::{}", "x".repeat(50)));
    }

    #[test]
    fn test_file_set_replaces_on_collision() {
        let mut set = FileSet::new();
        assert!(!set.insert(FileArtifact::new("src/App.tsx", "one")));
        assert!(set.insert(FileArtifact::new("./src/app.tsx", "two")));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("SRC/APP.TSX").map(|f| f.content.as_str()), Some("two"));
    }

    #[test]
    fn test_from_artifacts_collapses_duplicates() {
        let set = FileSet::from_artifacts(vec![
            FileArtifact::new("a.ts", "1"),
            FileArtifact::new("b.ts", "2"),
            FileArtifact::new("/a.ts", "3"),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a.ts").map(|f| f.content.as_str()), Some("3"));
    }

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path("app/page.tsx"), Language::Tsx);
        assert_eq!(Language::from_path("index.mjs"), Language::JavaScript);
        assert_eq!(Language::from_path("README.md"), Language::Markdown);
        assert_eq!(Language::from_path("Dockerfile"), Language::Other);
        assert!(Language::Tsx.is_markup());
        assert!(!Language::TypeScript.is_markup());
    }

    #[test]
    fn test_unknown_from_output_uses_first_line() {
        let diag = unknown_from_output(Stage::Build, "\n\n  something broke\nmore");
        assert_eq!(diag.kind, DiagnosticKind::Unknown);
        assert_eq!(diag.message, "something broke");

        let empty = unknown_from_output(Stage::Test, "");
        assert_eq!(empty.message, "test failed");
    }
}
