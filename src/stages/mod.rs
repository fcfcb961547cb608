//! Validation stages and the runner that executes them against a workspace.

pub mod dependency;
pub mod static_analysis;

use crate::config::Config;
use crate::diagnostic::{FileSet, Stage, StageResult};
use crate::error::WorkspaceError;
use crate::parsers::{parse, StageKind};
use crate::supervisor::{
    allocate_port, install_inputs, launch_server, run_command, CommandPlan, CommandSpec,
    ProjectFlavor, RunningServer, ServerLaunch, Workspace,
};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executes validation stages for the iteration controller.
#[async_trait]
pub trait StageRunner: Send {
    /// Stages applicable to `files`, in execution order.
    fn stages(&self, files: &FileSet) -> Vec<Stage>;

    /// Materialize `files` for process stages.
    async fn persist(&mut self, files: &FileSet) -> Result<(), WorkspaceError>;

    async fn run(&mut self, stage: Stage, files: &FileSet, cancel: &CancellationToken) -> StageResult;

    /// End of run: hand back a live server if one was started, otherwise clean up.
    async fn finish(&mut self) -> Option<RunningServer>;
}

pub fn run_static(files: &FileSet) -> StageResult {
    let diagnostics = static_analysis::analyze(files);
    if diagnostics.is_empty() {
        StageResult::passed(Stage::Static)
    } else {
        StageResult::failed(Stage::Static, diagnostics)
    }
}

pub fn run_dependency_check(files: &FileSet) -> StageResult {
    let diagnostics = dependency::check_dependencies(files);
    if diagnostics.is_empty() {
        StageResult::passed(Stage::Dependency)
    } else {
        StageResult::failed(Stage::Dependency, diagnostics)
    }
}

/// Parsed failure for a process stage, or an `Unknown` diagnostic when nothing parses.
fn failure_from_output(stage: Stage, kind: StageKind, output: &str) -> StageResult {
    let diagnostics = parse(output, kind);
    if diagnostics.is_empty() {
        StageResult::failed_unparsed(stage, output)
    } else {
        StageResult::failed(stage, diagnostics)
    }
}

fn with_timeout_note(output: String, timed_out: bool, spec: &CommandSpec) -> String {
    if timed_out {
        format!("{}\n{} timed out after {}s", output, spec.name, spec.timeout.as_secs())
    } else {
        output
    }
}

fn fingerprint(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Runs stages for real: in-process checks plus child processes in a workspace.
pub struct ProcessStageRunner {
    config: Config,
    flavor: ProjectFlavor,
    port: u16,
    workspace: Option<Workspace>,
    persisted: HashSet<String>,
    installed: Option<u64>,
    server: Option<RunningServer>,
}

impl ProcessStageRunner {
    pub fn create(
        config: Config,
        files: &FileSet,
        framework: Option<&str>,
    ) -> Result<Self, WorkspaceError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let port = allocate_port(config.base_port, config.port_probe_count).map_err(WorkspaceError::Port)?;
        let workspace = Workspace::create(&run_id, port)?;
        let flavor = ProjectFlavor::detect(files, framework);
        info!(run_id = %run_id, ?flavor, port, "stage runner ready");
        Ok(Self {
            config,
            flavor,
            port,
            workspace: Some(workspace),
            persisted: HashSet::new(),
            installed: None,
            server: None,
        })
    }

    pub fn flavor(&self) -> ProjectFlavor {
        self.flavor
    }

    fn plan(&self, files: &FileSet) -> Option<CommandPlan> {
        let workspace = self.workspace.as_ref()?;
        Some(CommandPlan::resolve(files, self.flavor, workspace.path(), self.port, &self.config))
    }

    /// Reinstall when the dependency manifest changed. `Some` is a failed `Dependency` result.
    async fn ensure_installed(
        &mut self,
        plan: &CommandPlan,
        files: &FileSet,
        cancel: &CancellationToken,
    ) -> Option<StageResult> {
        let install = plan.install.as_ref()?;
        let hash = fingerprint(&install_inputs(files));
        if self.installed == Some(hash) {
            return None;
        }

        info!(command = %install.label(), "installing dependencies");
        match run_command(install, cancel).await {
            Ok(outcome) if outcome.success() => {
                self.installed = Some(hash);
                None
            }
            Ok(outcome) => {
                let output = with_timeout_note(outcome.output, outcome.timed_out, install);
                Some(failure_from_output(Stage::Dependency, StageKind::Install, &output))
            }
            Err(err) => Some(StageResult::failed_unparsed(Stage::Dependency, &err.to_string())),
        }
    }

    async fn serve(&mut self, spec: &CommandSpec, cancel: &CancellationToken) -> StageResult {
        if let Some(previous) = self.server.take() {
            previous.shutdown().await;
        }
        match launch_server(spec, self.port, cancel).await {
            Ok(ServerLaunch::Ready(server)) => {
                self.server = Some(server);
                StageResult::passed(Stage::Serve)
            }
            Ok(ServerLaunch::Failed { output, timed_out }) => {
                let output = with_timeout_note(output, timed_out, spec);
                let result = failure_from_output(Stage::Serve, StageKind::Serve, &output);
                if result
                    .diagnostics
                    .iter()
                    .any(|d| d.code.as_deref() == Some("EADDRINUSE"))
                {
                    self.reallocate_port();
                }
                result
            }
            Ok(ServerLaunch::Cancelled) => StageResult::failed_unparsed(Stage::Serve, "serve cancelled"),
            Err(err) => StageResult::failed_unparsed(Stage::Serve, &err.to_string()),
        }
    }

    fn reallocate_port(&mut self) {
        let base = self.port.saturating_add(1);
        match allocate_port(base, self.config.port_probe_count) {
            Ok(port) => {
                info!(old = self.port, new = port, "port taken; moving server");
                self.port = port;
            }
            Err(err) => warn!(error = %err, "could not move to another port"),
        }
    }
}

#[async_trait]
impl StageRunner for ProcessStageRunner {
    fn stages(&self, files: &FileSet) -> Vec<Stage> {
        let plan = self.plan(files);
        Stage::ORDER
            .into_iter()
            .filter(|stage| match stage {
                Stage::Static => true,
                Stage::Dependency => self.flavor.is_node(),
                process => plan.as_ref().is_some_and(|p| p.command(*process).is_some()),
            })
            .collect()
    }

    async fn persist(&mut self, files: &FileSet) -> Result<(), WorkspaceError> {
        let Some(workspace) = self.workspace.as_ref() else {
            return Ok(());
        };
        let current: HashSet<String> = files.iter().map(|f| f.path.clone()).collect();
        for stale in self.persisted.difference(&current) {
            debug!(path = %stale, "removing file that left the set");
            workspace.remove_file(stale)?;
        }
        workspace.write_files(files)?;
        self.persisted = current;
        Ok(())
    }

    async fn run(&mut self, stage: Stage, files: &FileSet, cancel: &CancellationToken) -> StageResult {
        match stage {
            Stage::Static => return run_static(files),
            Stage::Dependency => return run_dependency_check(files),
            _ => {}
        }

        let Some(plan) = self.plan(files) else {
            return StageResult::failed_unparsed(stage, "workspace is gone");
        };
        if let Some(failed) = self.ensure_installed(&plan, files, cancel).await {
            return failed;
        }
        let Some(spec) = plan.command(stage).cloned() else {
            return StageResult::passed(stage);
        };

        if stage == Stage::Serve {
            return self.serve(&spec, cancel).await;
        }

        match run_command(&spec, cancel).await {
            Ok(outcome) if outcome.success() => StageResult::passed(stage),
            Ok(outcome) if outcome.cancelled => {
                StageResult::failed_unparsed(stage, &format!("{} cancelled", stage))
            }
            Ok(outcome) => {
                let output = with_timeout_note(outcome.output, outcome.timed_out, &spec);
                failure_from_output(stage, StageKind::from(stage), &output)
            }
            Err(err) => StageResult::failed_unparsed(stage, &err.to_string()),
        }
    }

    async fn finish(&mut self) -> Option<RunningServer> {
        if let Some(mut server) = self.server.take() {
            if let Some(workspace) = self.workspace.take() {
                server.attach_workspace(workspace);
            }
            return Some(server);
        }
        if let Some(workspace) = self.workspace.take() {
            let outcome = tokio::task::spawn_blocking(move || workspace.teardown()).await;
            debug!(?outcome, "workspace torn down");
        }
        None
    }
}
