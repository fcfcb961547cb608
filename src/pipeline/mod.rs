//! The validate → fix → revalidate loop.
//!
//! Each pass runs every stage in order until one fails. Fresh diagnostics
//! go to the deterministic fixers first, the remainder (one bounded batch)
//! to the oracle, and the pass restarts from the first stage. The loop ends
//! on success, on a pass with nothing new to try, on cancellation, or when
//! the iteration budget runs out.

use crate::apply::apply;
use crate::config::Config;
use crate::diagnostic::{Diagnostic, FileArtifact, FileSet, StageResult};
use crate::error::WorkspaceError;
use crate::fixers;
use crate::oracle::{self, EscalationClient, FixOracle};
use crate::stages::{ProcessStageRunner, StageRunner};
use crate::supervisor::RunningServer;
use crate::util::check_relative_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairRequest {
    pub files: Vec<FileArtifact>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Success,
    Exhausted,
    Aborted,
    Cancelled,
    SetupFailed,
}

#[derive(Debug, Serialize)]
pub struct RepairReport {
    pub success: bool,
    pub files: Vec<FileArtifact>,
    pub fixes_applied: Vec<String>,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remaining_diagnostics: Vec<String>,
    pub termination: Termination,
    /// Live dev server after a successful serve stage; the caller shuts it down.
    #[serde(skip)]
    pub server: Option<RunningServer>,
}

impl RepairReport {
    fn setup_failed(files: Vec<FileArtifact>, reason: String) -> Self {
        Self {
            success: false,
            files,
            fixes_applied: Vec::new(),
            iterations: 0,
            remaining_diagnostics: vec![reason],
            termination: Termination::SetupFailed,
            server: None,
        }
    }
}

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Split off artifacts whose paths would land outside the workspace.
fn drop_unsafe_paths(files: FileSet) -> (FileSet, Vec<String>) {
    let mut dropped = Vec::new();
    let mut kept = Vec::new();
    for file in files.into_vec() {
        match check_relative_path(&file.path) {
            Ok(()) => kept.push(file),
            Err(reason) => {
                warn!(path = %file.path, %reason, "dropping artifact with unsafe path");
                dropped.push(format!("Dropped artifact '{}': {}", file.path, reason));
            }
        }
    }
    (FileSet::from_artifacts(kept), dropped)
}

enum Validation {
    Passed,
    Failed(StageResult),
    Cancelled,
}

pub struct Pipeline {
    config: Config,
    runner: Box<dyn StageRunner>,
    escalation: EscalationClient,
}

impl Pipeline {
    pub fn new(config: Config, runner: Box<dyn StageRunner>, oracle: Arc<dyn FixOracle>) -> Self {
        let escalation = EscalationClient::new(oracle, &config);
        Self {
            config,
            runner,
            escalation,
        }
    }

    /// Write `files` out, retrying I/O failures. Unsafe paths are not retried.
    async fn persist(&mut self, files: &FileSet) -> Result<(), WorkspaceError> {
        let mut attempt = 1;
        loop {
            match self.runner.persist(files).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if attempt < PERSIST_ATTEMPTS
                        && !matches!(err, WorkspaceError::UnsafePath { .. }) =>
                {
                    warn!(attempt, error = %err, "could not write files; retrying");
                    attempt += 1;
                    tokio::time::sleep(PERSIST_RETRY_DELAY).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn validate(&mut self, files: &FileSet, cancel: &CancellationToken) -> Validation {
        let mut persisted = false;
        for stage in self.runner.stages(files) {
            if cancel.is_cancelled() {
                return Validation::Cancelled;
            }
            if stage.needs_process() && !persisted {
                if let Err(err) = self.persist(files).await {
                    warn!(stage = %stage, error = %err, "could not write files; failing the stage");
                    let output = format!("Could not write project files: {}", err);
                    return Validation::Failed(StageResult::failed_unparsed(stage, &output));
                }
                persisted = true;
            }
            let result = self.runner.run(stage, files, cancel).await;
            if cancel.is_cancelled() {
                return Validation::Cancelled;
            }
            if !result.success {
                info!(stage = %stage, diagnostics = result.diagnostics.len(), "stage failed");
                return Validation::Failed(result);
            }
            debug!(stage = %stage, "stage passed");
        }
        Validation::Passed
    }

    /// Drive `files` to a fixed point or until a terminal condition.
    pub async fn run(
        mut self,
        files: FileSet,
        max_iterations: Option<u32>,
        cancel: &CancellationToken,
    ) -> RepairReport {
        let budget = max_iterations.unwrap_or(self.config.max_iterations).max(1);
        let (mut files, dropped) = drop_unsafe_paths(files);
        let mut seen: HashSet<String> = HashSet::new();
        let mut fixes_applied: Vec<String> = Vec::new();
        let mut remaining: Vec<Diagnostic> = Vec::new();
        let mut iterations = 0;

        let termination = loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            if iterations == budget {
                break Termination::Exhausted;
            }
            iterations += 1;
            info!(iteration = iterations, budget, files = files.len(), "validation pass");

            let failed = match self.validate(&files, cancel).await {
                Validation::Passed => {
                    remaining.clear();
                    break Termination::Success;
                }
                Validation::Cancelled => break Termination::Cancelled,
                Validation::Failed(result) => result,
            };

            remaining = failed.diagnostics.clone();
            let mut in_pass = HashSet::new();
            let fresh: Vec<Diagnostic> = failed
                .diagnostics
                .into_iter()
                .filter(|d| {
                    let signature = d.signature();
                    !seen.contains(&signature) && in_pass.insert(signature)
                })
                .collect();

            if fresh.is_empty() {
                warn!(iteration = iterations, stage = %failed.stage, "no new diagnostics; giving up");
                break Termination::Aborted;
            }

            let (next, applied) = self.fix_pass(files, fresh, &mut seen, cancel).await;
            files = next;
            info!(iteration = iterations, applied = applied.len(), "fixes applied");
            fixes_applied.extend(applied);
        };

        let server = self.runner.finish().await;
        let server = match (termination, server) {
            (Termination::Success, server) => server,
            (_, Some(stray)) => {
                stray.shutdown().await;
                None
            }
            (_, None) => None,
        };

        info!(?termination, iterations, fixes = fixes_applied.len(), "repair finished");
        RepairReport {
            success: termination == Termination::Success,
            files: files.into_vec(),
            fixes_applied,
            iterations,
            remaining_diagnostics: dropped
                .into_iter()
                .chain(remaining.iter().map(Diagnostic::summary))
                .collect(),
            termination,
            server,
        }
    }

    /// Deterministic fixes one at a time, then one oracle batch for the rest.
    async fn fix_pass(
        &self,
        files: FileSet,
        fresh: Vec<Diagnostic>,
        seen: &mut HashSet<String>,
        cancel: &CancellationToken,
    ) -> (FileSet, Vec<String>) {
        let mut working = files;
        let mut applied = Vec::new();
        let mut unfixed = Vec::new();

        for diag in fresh {
            match fixers::try_fix(&diag, &working) {
                Some(fix) => {
                    debug!(signature = %diag.signature(), fix = %fix.description, "deterministic fix");
                    let outcome = apply(working, std::slice::from_ref(&fix));
                    working = outcome.files;
                    applied.extend(outcome.applied);
                    seen.insert(diag.signature());
                }
                None => unfixed.push(diag),
            }
        }

        let batch: Vec<Diagnostic> = unfixed.into_iter().take(self.escalation.batch_size()).collect();
        if !batch.is_empty() {
            info!(count = batch.len(), "escalating to oracle");
            let oracle_fixes = self.escalation.fix(&batch, &working, cancel).await;
            seen.extend(batch.iter().map(Diagnostic::signature));
            if !oracle_fixes.is_empty() {
                let outcome = apply(working, &oracle_fixes);
                working = outcome.files;
                applied.extend(outcome.applied);
            }
        }
        (working, applied)
    }
}

/// Build the real runner and oracle from `config` and repair `request`.
pub async fn repair(request: RepairRequest, config: Config, cancel: &CancellationToken) -> RepairReport {
    let oracle = oracle::from_config(&config);
    repair_with(request, config, oracle, cancel).await
}

/// Like [`repair`], with a caller-chosen oracle.
pub async fn repair_with(
    request: RepairRequest,
    config: Config,
    oracle: Arc<dyn FixOracle>,
    cancel: &CancellationToken,
) -> RepairReport {
    let files = FileSet::from_artifacts(request.files);
    let runner = match ProcessStageRunner::create(config.clone(), &files, request.framework.as_deref()) {
        Ok(runner) => runner,
        Err(err) => {
            warn!(error = %err, "workspace setup failed");
            return RepairReport::setup_failed(files.into_vec(), err.to_string());
        }
    };
    info!(flavor = ?runner.flavor(), "runner ready");
    Pipeline::new(config, Box::new(runner), oracle)
        .run(files, request.max_iterations, cancel)
        .await
}
