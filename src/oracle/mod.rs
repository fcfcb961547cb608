//! Escalation to an external fix oracle for diagnostics no deterministic
//! fixer can handle.
//!
//! Every failure mode (disabled, transport, timeout, malformed reply,
//! cancellation) degrades to "no fix".

mod client;
mod parse;

pub use client::{NoOracle, OpenRouterOracle};
pub use parse::parse_response;

use crate::apply::resolve_target;
use crate::config::Config;
use crate::diagnostic::{Diagnostic, FileArtifact, FileSet, Fix};
use crate::error::OracleError;
use crate::util::{check_relative_path, is_test_file, normalize_path, truncate};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const TEST_FILE_CONSTRAINT: &str = "do not modify test files";

/// Confidence stamped on oracle-produced fixes.
pub const ORACLE_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleRequest {
    pub diagnostic_text: String,
    pub file_path: String,
    pub file_content: String,
    pub constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OracleResponse {
    #[serde(alias = "file_path")]
    pub target_path: String,
    #[serde(alias = "fixed_content")]
    pub new_content: String,
    #[serde(default)]
    pub explanation: String,
}

#[async_trait]
pub trait FixOracle: Send + Sync {
    async fn propose(&self, request: OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// The configured oracle, or `NoOracle` when no API key is set or it fails to build.
pub fn from_config(config: &Config) -> Arc<dyn FixOracle> {
    match OpenRouterOracle::from_env(config) {
        Some(Ok(oracle)) => Arc::new(oracle),
        Some(Err(err)) => {
            warn!(error = %err, "oracle unavailable; escalations will produce no fixes");
            Arc::new(NoOracle)
        }
        None => {
            info!("no oracle API key; escalations will produce no fixes");
            Arc::new(NoOracle)
        }
    }
}

/// Source file a test file most likely exercises.
fn sibling_source(path: &str) -> Option<String> {
    let key = normalize_path(path);
    let candidate = key
        .replace("__tests__/", "")
        .replace(".test.", ".")
        .replace(".spec.", ".");
    (candidate != key).then_some(candidate)
}

fn diagnostic_text(diag: &Diagnostic) -> String {
    if diag.raw.is_empty() || diag.raw == diag.message {
        diag.summary()
    } else {
        format!("{}\n{}", diag.summary(), diag.raw)
    }
}

/// Bounded, cancellable fan-out of oracle requests.
pub struct EscalationClient {
    oracle: Arc<dyn FixOracle>,
    batch: usize,
    content_budget: usize,
    timeout: Duration,
}

impl EscalationClient {
    pub fn new(oracle: Arc<dyn FixOracle>, config: &Config) -> Self {
        Self {
            oracle,
            batch: config.escalation_batch,
            content_budget: config.oracle_content_budget,
            timeout: Duration::from_secs(config.oracle_timeout_secs),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// The file the oracle should rewrite for `diag`, never a test file.
    pub fn target_for<'a>(&self, diag: &Diagnostic, files: &'a FileSet) -> Option<&'a FileArtifact> {
        let non_test = |f: &&FileArtifact| !is_test_file(&f.path);

        if !diag.file.is_empty() {
            if let Some((idx, _)) = resolve_target(files, &diag.file) {
                let file = files.as_slice().get(idx)?;
                if !is_test_file(&file.path) {
                    return Some(file);
                }
                if let Some(source) = sibling_source(&file.path).and_then(|p| files.get(&p)) {
                    return Some(source);
                }
            }
        }

        let haystack = format!("{}\n{}", diag.message, diag.raw).to_lowercase();
        files
            .iter()
            .filter(non_test)
            .find(|f| haystack.contains(&f.key()))
    }

    pub fn request_for(&self, diag: &Diagnostic, files: &FileSet) -> Option<OracleRequest> {
        let target = self.target_for(diag, files)?;
        Some(OracleRequest {
            diagnostic_text: diagnostic_text(diag),
            file_path: target.path.clone(),
            file_content: truncate(&target.content, self.content_budget),
            constraint: TEST_FILE_CONSTRAINT.to_string(),
        })
    }

    /// Ask the oracle about at most one batch of diagnostics, concurrently.
    pub async fn fix(
        &self,
        diags: &[Diagnostic],
        files: &FileSet,
        cancel: &CancellationToken,
    ) -> Vec<Fix> {
        let requests: Vec<OracleRequest> = diags
            .iter()
            .take(self.batch)
            .filter_map(|d| {
                let request = self.request_for(d, files);
                if request.is_none() {
                    debug!(signature = %d.signature(), "no file to send to the oracle");
                }
                request
            })
            .collect();
        if requests.is_empty() {
            return Vec::new();
        }

        let timeout = self.timeout;
        let calls = requests.into_iter().map(|request| {
            let oracle = Arc::clone(&self.oracle);
            async move {
                let path = request.file_path.clone();
                let result = match tokio::time::timeout(timeout, oracle.propose(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Timeout(timeout.as_secs())),
                };
                (path, result)
            }
        });

        let results = tokio::select! {
            results = join_all(calls) => results,
            () = cancel.cancelled() => {
                info!("oracle batch cancelled");
                return Vec::new();
            }
        };

        results
            .into_iter()
            .filter_map(|(requested, result)| match result {
                Ok(response) => self.accept(&requested, response, files),
                Err(OracleError::Disabled) => None,
                Err(err) => {
                    warn!(file = %requested, error = %err, "oracle produced no fix");
                    None
                }
            })
            .collect()
    }

    /// Turn a reply into a fix for `requested`, or reject it.
    fn accept(&self, requested: &str, response: OracleResponse, files: &FileSet) -> Option<Fix> {
        let target = response.target_path.trim();
        if let Err(reason) = check_relative_path(target) {
            warn!(requested, target, %reason, "oracle reply targets a path outside the project; rejected");
            return None;
        }
        if is_test_file(target) {
            warn!(target, "oracle tried to edit a test file; rejected");
            return None;
        }
        let wanted = normalize_path(requested);
        let names_request = normalize_path(target) == wanted
            || resolve_target(files, target)
                .and_then(|(idx, _)| files.as_slice().get(idx))
                .is_some_and(|f| f.key() == wanted);
        if !names_request {
            warn!(requested, target, "oracle reply is for a file that was not requested; rejected");
            return None;
        }
        if response.new_content.trim().is_empty() {
            warn!(target, "oracle returned empty content; rejected");
            return None;
        }
        let explanation = response.explanation.trim();
        let description = if explanation.is_empty() {
            format!("Oracle rewrote {}", requested)
        } else {
            format!("Oracle rewrote {}: {}", requested, truncate(explanation, 200))
        };
        debug!(requested, target, "oracle fix accepted");
        Some(Fix::replace(requested, response.new_content, description).with_confidence(ORACLE_CONFIDENCE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticKind;
    use std::sync::Mutex;

    struct Scripted {
        reply: Box<dyn Fn(&OracleRequest) -> Result<OracleResponse, OracleError> + Send + Sync>,
        seen: Mutex<Vec<OracleRequest>>,
    }

    #[async_trait]
    impl FixOracle for Scripted {
        async fn propose(&self, request: OracleRequest) -> Result<OracleResponse, OracleError> {
            let reply = (self.reply)(&request);
            self.seen.lock().unwrap().push(request);
            reply
        }
    }

    fn scripted(
        reply: impl Fn(&OracleRequest) -> Result<OracleResponse, OracleError> + Send + Sync + 'static,
    ) -> Arc<Scripted> {
        Arc::new(Scripted {
            reply: Box::new(reply),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn set(files: &[(&str, &str)]) -> FileSet {
        FileSet::from_artifacts(files.iter().map(|(p, c)| FileArtifact::new(*p, *c)))
    }

    fn config() -> Config {
        Config {
            oracle_content_budget: 10,
            ..Config::default()
        }
    }

    #[test]
    fn test_target_prefers_source_over_test() {
        let files = set(&[
            ("src/sum.ts", "export const sum = 1;"),
            ("src/sum.test.ts", "expect(sum).toBe(2)"),
            ("src/__tests__/util.ts", "x"),
            ("src/util.ts", "y"),
        ]);
        let client = EscalationClient::new(Arc::new(NoOracle), &config());

        let d = Diagnostic::new(DiagnosticKind::Test, "src/sum.test.ts", "Assertion failed");
        assert_eq!(client.target_for(&d, &files).map(|f| f.path.as_str()), Some("src/sum.ts"));

        let d = Diagnostic::new(DiagnosticKind::Test, "src/__tests__/util.ts", "boom");
        assert_eq!(client.target_for(&d, &files).map(|f| f.path.as_str()), Some("src/util.ts"));

        let d = Diagnostic::new(DiagnosticKind::Unknown, "", "crash")
            .with_raw("at Object.<anonymous> (src/util.ts:3:1)");
        assert_eq!(client.target_for(&d, &files).map(|f| f.path.as_str()), Some("src/util.ts"));

        let d = Diagnostic::new(DiagnosticKind::Unknown, "", "build failed");
        assert!(client.target_for(&d, &files).is_none());
    }

    #[test]
    fn test_request_truncates_content() {
        let files = set(&[("a.ts", "0123456789abcdefghij")]);
        let client = EscalationClient::new(Arc::new(NoOracle), &config());
        let d = Diagnostic::new(DiagnosticKind::Type, "a.ts", "bad").with_code("TS2339");
        let request = client.request_for(&d, &files).unwrap();
        assert!(request.file_content.chars().count() <= 13);
        assert_eq!(request.constraint, TEST_FILE_CONSTRAINT);
    }

    #[tokio::test]
    async fn test_fix_batches_and_rejects_test_targets() {
        let oracle = scripted(|req| {
            let target = if req.file_path == "b.ts" {
                "b.test.ts".to_string()
            } else {
                req.file_path.clone()
            };
            Ok(OracleResponse {
                target_path: target,
                new_content: "fixed".into(),
                explanation: "done".into(),
            })
        });
        let files = set(&[("a.ts", "a"), ("b.ts", "b"), ("c.ts", "c"), ("d.ts", "d")]);
        let client = EscalationClient::new(oracle.clone(), &config());
        let diags: Vec<Diagnostic> = ["a.ts", "b.ts", "c.ts", "d.ts"]
            .iter()
            .map(|f| Diagnostic::new(DiagnosticKind::Type, *f, "bad"))
            .collect();

        let fixes = client.fix(&diags, &files, &CancellationToken::new()).await;
        assert_eq!(oracle.seen.lock().unwrap().len(), 3);
        let targets: Vec<&str> = fixes.iter().map(|f| f.target_path.as_str()).collect();
        assert_eq!(targets, vec!["a.ts", "c.ts"]);
        assert!(fixes.iter().all(|f| (f.confidence - ORACLE_CONFIDENCE).abs() < f32::EPSILON));
    }

    #[tokio::test]
    async fn test_replies_outside_the_request_rejected() {
        let oracle = scripted(|req| {
            let target = match req.file_path.as_str() {
                "src/a.ts" => "../escape.ts",
                "src/b.ts" => "/etc/passwd",
                "src/c.ts" => "src/d.ts",
                "src/e.ts" => "src/e.test.ts",
                _ => "./src/f.ts",
            };
            Ok(OracleResponse {
                target_path: target.into(),
                new_content: "export const fixed = true;".into(),
                explanation: String::new(),
            })
        });
        let files = set(&[
            ("src/a.ts", "a"),
            ("src/b.ts", "b"),
            ("src/c.ts", "c"),
            ("src/d.ts", "d"),
            ("src/e.ts", "e"),
            ("src/f.ts", "f"),
        ]);
        let client = EscalationClient::new(
            oracle.clone(),
            &Config {
                escalation_batch: 5,
                ..config()
            },
        );
        let diags: Vec<Diagnostic> = ["src/a.ts", "src/b.ts", "src/c.ts", "src/e.ts", "src/f.ts"]
            .iter()
            .map(|f| Diagnostic::new(DiagnosticKind::Type, *f, "bad"))
            .collect();

        let fixes = client.fix(&diags, &files, &CancellationToken::new()).await;
        assert_eq!(oracle.seen.lock().unwrap().len(), 5);
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].target_path, "src/f.ts");
        assert_eq!(fixes[0].description, "Oracle rewrote src/f.ts");
    }

    #[tokio::test]
    async fn test_errors_degrade_to_no_fix() {
        let oracle = scripted(|_| Err(OracleError::Malformed("nope".into())));
        let files = set(&[("a.ts", "a")]);
        let client = EscalationClient::new(oracle, &config());
        let diags = vec![Diagnostic::new(DiagnosticKind::Type, "a.ts", "bad")];
        assert!(client.fix(&diags, &files, &CancellationToken::new()).await.is_empty());

        let disabled = EscalationClient::new(Arc::new(NoOracle), &config());
        assert!(disabled.fix(&diags, &files, &CancellationToken::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_batch_yields_nothing() {
        struct Hang;
        #[async_trait]
        impl FixOracle for Hang {
            async fn propose(&self, _r: OracleRequest) -> Result<OracleResponse, OracleError> {
                std::future::pending().await
            }
        }
        let token = CancellationToken::new();
        token.cancel();
        let files = set(&[("a.ts", "a")]);
        let client = EscalationClient::new(Arc::new(Hang), &config());
        let diags = vec![Diagnostic::new(DiagnosticKind::Type, "a.ts", "bad")];
        assert!(client.fix(&diags, &files, &token).await.is_empty());
    }
}
