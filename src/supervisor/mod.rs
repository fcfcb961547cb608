//! Workspace, command and process management for one repair run.

pub mod ports;
pub mod process;
pub mod workspace;

pub use ports::allocate_port;
pub use process::{launch_server, run_command, CommandOutcome, RunningServer, ServerLaunch};
pub use workspace::{TeardownOutcome, Workspace};

use crate::config::Config;
use crate::diagnostic::{FileSet, Stage};
use crate::fixers::manifest::{declared_dependencies, script};
use crate::util::{basename, extension, normalize_path};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder `test` script written by `npm init`.
const NPM_TEST_STUB: &str = "no test specified";

const PYTHON_ENTRY_POINTS: &[&str] = &["main.py", "app.py", "server.py", "run.py"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectFlavor {
    Next,
    CreateReactApp,
    Vite,
    Static,
    Python,
    Unknown,
}

impl ProjectFlavor {
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "next" | "nextjs" | "next.js" => Some(Self::Next),
            "cra" | "create-react-app" | "react-scripts" => Some(Self::CreateReactApp),
            "vite" | "react" => Some(Self::Vite),
            "static" | "html" => Some(Self::Static),
            "python" | "py" => Some(Self::Python),
            _ => None,
        }
    }

    /// Flavor from the hint when recognized, otherwise from the file tree and manifest.
    pub fn detect(files: &FileSet, hint: Option<&str>) -> Self {
        if let Some(flavor) = hint.and_then(Self::from_hint) {
            return flavor;
        }

        let keys: Vec<String> = files.iter().map(|f| f.key()).collect();
        let deps = declared_dependencies(files);

        let next_tree = keys.iter().any(|k| {
            basename(k).starts_with("next.config.")
                || k.starts_with("pages/")
                || k.starts_with("app/")
                || k.starts_with("src/pages/")
                || k.starts_with("src/app/")
        });
        if next_tree || deps.contains("next") {
            return Self::Next;
        }
        if deps.contains("react-scripts") {
            return Self::CreateReactApp;
        }
        if deps.contains("vite") || deps.contains("react") {
            return Self::Vite;
        }
        if keys.iter().any(|k| extension(k) == Some("html")) {
            return Self::Static;
        }
        if keys.iter().any(|k| extension(k) == Some("py")) {
            return Self::Python;
        }
        Self::Unknown
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Self::Next | Self::CreateReactApp | Self::Vite | Self::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl PackageManager {
    pub fn detect(files: &FileSet) -> Self {
        if files.contains("pnpm-lock.yaml") {
            Self::Pnpm
        } else if files.contains("yarn.lock") {
            Self::Yarn
        } else if files.contains("bun.lockb") {
            Self::Bun
        } else {
            Self::Npm
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Bun => "bun",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
    pub kill_grace: Duration,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, cwd: impl AsRef<Path>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
            timeout: Duration::from_secs(120),
            env: Vec::new(),
            kill_grace: Duration::from_secs(2),
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.program, self.args.join(" ")).trim().to_string()
    }
}

/// Commands for every process step of a run, resolved once per manifest state.
#[derive(Debug, Clone)]
pub struct CommandPlan {
    pub flavor: ProjectFlavor,
    pub install: Option<CommandSpec>,
    pub typecheck: Option<CommandSpec>,
    pub build: Option<CommandSpec>,
    pub test: Option<CommandSpec>,
    pub serve: Option<CommandSpec>,
}

impl CommandPlan {
    pub fn resolve(
        files: &FileSet,
        flavor: ProjectFlavor,
        cwd: &Path,
        port: u16,
        config: &Config,
    ) -> Self {
        let grace = config.kill_grace();
        let spec = |name: &str, program: &str, secs: u64| {
            CommandSpec::new(name, cwd, program)
                .timeout_secs(secs)
                .kill_grace(grace)
        };
        let port_text = port.to_string();

        let mut plan = match flavor {
            ProjectFlavor::Static => Self {
                flavor,
                install: None,
                typecheck: None,
                build: None,
                test: None,
                serve: Some(
                    spec("serve", "python3", config.server_timeout_secs)
                        .args(&["-m", "http.server", &port_text, "--bind", "0.0.0.0"]),
                ),
            },
            ProjectFlavor::Python => Self {
                flavor,
                install: files.contains("requirements.txt").then(|| {
                    spec("install", "pip", config.install_timeout_secs)
                        .args(&["install", "-r", "requirements.txt"])
                }),
                typecheck: None,
                build: None,
                test: None,
                serve: PYTHON_ENTRY_POINTS
                    .iter()
                    .find(|entry| files.contains(entry))
                    .map(|entry| spec("serve", "python3", config.server_timeout_secs).arg(*entry)),
            },
            _ => Self::node(files, flavor, &spec, &port_text, config),
        };

        if let Some(serve) = plan.serve.take() {
            plan.serve = Some(
                serve
                    .env("PORT", port_text.clone())
                    .env("HOST", "0.0.0.0")
                    .env("HOSTNAME", "0.0.0.0")
                    .env("BROWSER", "none"),
            );
        }
        plan
    }

    fn node(
        files: &FileSet,
        flavor: ProjectFlavor,
        spec: &dyn Fn(&str, &str, u64) -> CommandSpec,
        port: &str,
        config: &Config,
    ) -> Self {
        let pm = PackageManager::detect(files);
        let run = pm.program();

        let install = match pm {
            PackageManager::Npm => spec("install", run, config.install_timeout_secs).args(&[
                "install",
                "--legacy-peer-deps",
                "--no-audit",
                "--no-fund",
                "--prefer-offline",
            ]),
            _ => spec("install", run, config.install_timeout_secs).args(&["install"]),
        };

        let typecheck = files.has_typed_sources().then(|| {
            spec("typecheck", "npx", config.typecheck_timeout_secs)
                .args(&["tsc", "--noEmit", "--pretty", "false"])
        });

        let build = script(files, "build")
            .map(|_| spec("build", run, config.build_timeout_secs).args(&["run", "build"]));

        let test = script(files, "test")
            .filter(|s| !s.contains(NPM_TEST_STUB))
            .map(|_| spec("test", run, config.test_timeout_secs).args(&["test"]).env("CI", "true"));

        let serve = spec("serve", run, config.server_timeout_secs);
        let serve = match flavor {
            ProjectFlavor::Next => serve.args(&["run", "dev", "--", "-H", "0.0.0.0", "-p", port]),
            ProjectFlavor::CreateReactApp => serve.args(&["start"]),
            _ => serve.args(&["run", "dev", "--", "--host", "0.0.0.0", "--port", port]),
        };

        Self {
            flavor,
            install: Some(install),
            typecheck,
            build,
            test,
            serve: Some(serve),
        }
    }

    /// The command backing a process stage, if the flavor has one.
    pub fn command(&self, stage: Stage) -> Option<&CommandSpec> {
        match stage {
            Stage::TypeCheck => self.typecheck.as_ref(),
            Stage::Build => self.build.as_ref(),
            Stage::Test => self.test.as_ref(),
            Stage::Serve => self.serve.as_ref(),
            Stage::Static | Stage::Dependency => None,
        }
    }
}

/// Files that decide whether dependencies must be reinstalled.
pub fn install_inputs(files: &FileSet) -> String {
    ["package.json", "requirements.txt"]
        .iter()
        .filter_map(|p| files.get(p))
        .map(|f| format!("{}\n{}", normalize_path(&f.path), f.content))
        .collect::<Vec<_>>()
        .join("\n")
}
