use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixpoint::config::Config;
use fixpoint::diagnostic::{FileArtifact, FileSet};
use fixpoint::logging;
use fixpoint::oracle::{FixOracle, NoOracle};
use fixpoint::pipeline::{self, RepairReport, RepairRequest, Termination};
use fixpoint::stages::{run_dependency_check, run_static};
use fixpoint::util::resolve_relative_path;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directories never read when loading a project from disk.
const SKIP_DIRS: &[&str] = &["node_modules", ".git", ".next", "dist", "build"];

#[derive(Parser, Debug)]
#[command(
    name = "fixpoint",
    about = "Validate a generated web project and repair it until it builds and serves",
    version
)]
struct Cli {
    /// Debug-level logging (overridden by FIXPOINT_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the validate/fix loop over a project directory or a JSON request
    Repair {
        /// Project directory or RepairRequest JSON file
        input: PathBuf,

        /// Framework hint (next, react, vite, static, python)
        #[arg(long)]
        framework: Option<String>,

        /// Maximum validate/fix passes
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Write the final files into this directory
        #[arg(long)]
        out: Option<PathBuf>,

        /// Keep the dev server running until Ctrl-C
        #[arg(long)]
        serve: bool,

        /// Never escalate to the fix oracle
        #[arg(long)]
        no_oracle: bool,
    },
    /// Run only the in-process checks and print their diagnostics
    Check {
        /// Project directory or RepairRequest JSON file
        input: PathBuf,
    },
    /// Show the config location and effective values
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Command::Repair {
            input,
            framework,
            max_iterations,
            json,
            out,
            serve,
            no_oracle,
        } => {
            let options = RepairOptions {
                framework,
                max_iterations,
                json,
                out,
                serve,
                no_oracle,
            };
            run_repair(&input, options).await
        }
        Command::Check { input } => run_check(&input),
        Command::Config => show_config(),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

struct RepairOptions {
    framework: Option<String>,
    max_iterations: Option<u32>,
    json: bool,
    out: Option<PathBuf>,
    serve: bool,
    no_oracle: bool,
}

async fn run_repair(input: &Path, options: RepairOptions) -> Result<ExitCode> {
    let config = Config::load();
    config.validate().context("invalid configuration")?;

    let mut request = load_request(input)?;
    if options.framework.is_some() {
        request.framework = options.framework;
    }
    if options.max_iterations.is_some() {
        request.max_iterations = options.max_iterations;
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            interrupt.cancel();
        }
    });

    let mut report = if options.no_oracle {
        let oracle: Arc<dyn FixOracle> = Arc::new(NoOracle);
        pipeline::repair_with(request, config, oracle, &cancel).await
    } else {
        pipeline::repair(request, config, &cancel).await
    };

    if let Some(out) = &options.out {
        write_files(out, &report.files)?;
        eprintln!("Wrote {} files to {}", report.files.len(), out.display());
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if let Some(server) = report.server.take() {
        if options.serve {
            eprintln!("Serving at {} (Ctrl-C to stop)", server.url);
            cancel.cancelled().await;
        }
        server.shutdown().await;
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_check(input: &Path) -> Result<ExitCode> {
    let files = FileSet::from_artifacts(load_request(input)?.files);
    let mut failures = 0;
    for result in [run_static(&files), run_dependency_check(&files)] {
        for diag in &result.diagnostics {
            println!("{}", diag.summary());
        }
        failures += result.diagnostics.len();
    }

    if failures == 0 {
        println!("No problems found in {} files", files.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} problem(s)", failures);
        Ok(ExitCode::from(1))
    }
}

fn show_config() -> Result<ExitCode> {
    let config = Config::load();
    println!("Config file: {}", Config::config_location());
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!(
        "Oracle API key: {}",
        if Config::oracle_api_key().is_some() {
            "set"
        } else {
            "not set"
        }
    );
    if let Err(err) = config.validate() {
        eprintln!("Warning: {}", err);
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn termination_label(termination: Termination) -> &'static str {
    match termination {
        Termination::Success => "success",
        Termination::Exhausted => "iteration budget exhausted",
        Termination::Aborted => "no new diagnostics to fix",
        Termination::Cancelled => "cancelled",
        Termination::SetupFailed => "setup failed",
    }
}

fn print_summary(report: &RepairReport) {
    println!(
        "{} after {} iteration(s): {}",
        if report.success { "✓ Repaired" } else { "✗ Not repaired" },
        report.iterations,
        termination_label(report.termination)
    );
    for fix in &report.fixes_applied {
        println!("  fixed: {}", fix);
    }
    for diag in &report.remaining_diagnostics {
        println!("  remaining: {}", diag);
    }
}

/// A directory of sources, or a serialized `RepairRequest`.
fn load_request(input: &Path) -> Result<RepairRequest> {
    if input.is_dir() {
        return Ok(RepairRequest {
            files: load_dir(input)?,
            ..RepairRequest::default()
        });
    }
    let text =
        fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid repair request", input.display()))
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

fn load_dir(root: &Path) -> Result<Vec<FileArtifact>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        if bytes.contains(&0) {
            debug!(path = %entry.path().display(), "skipping binary file");
            continue;
        }
        let Ok(content) = String::from_utf8(bytes) else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file");
            continue;
        };
        let relative = entry.path().strip_prefix(root)?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(FileArtifact::new(path, content));
    }
    Ok(files)
}

fn write_files(out: &Path, files: &[FileArtifact]) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("failed to create {}", out.display()))?;
    for file in files {
        let target = resolve_relative_path(out, &file.path).map_err(anyhow::Error::msg)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, &file.content)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_dir_skips_build_output_and_binaries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::create_dir_all(root.join(".next")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/index.ts"), "export {};").unwrap();
        fs::write(root.join("node_modules/react/index.js"), "x").unwrap();
        fs::write(root.join(".next/cache.json"), "{}").unwrap();
        fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0]).unwrap();

        let files = load_dir(root).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["package.json", "src/index.ts"]);
    }

    #[test]
    fn test_load_request_from_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request.json");
        fs::write(
            &path,
            r#"{"files":[{"path":"a.ts","content":"x"}],"framework":"vite","max_iterations":2}"#,
        )
        .unwrap();

        let request = load_request(&path).unwrap();
        assert_eq!(request.files.len(), 1);
        assert_eq!(request.framework.as_deref(), Some("vite"));
        assert_eq!(request.max_iterations, Some(2));
    }

    #[test]
    fn test_load_request_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("request.json");
        fs::write(&path, "not json").unwrap();
        assert!(load_request(&path).is_err());
    }

    #[test]
    fn test_write_files_refuses_traversal() {
        let dir = TempDir::new().unwrap();
        write_files(dir.path(), &[FileArtifact::new("src/a.ts", "x")]).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("src/a.ts")).unwrap(), "x");
        assert!(write_files(dir.path(), &[FileArtifact::new("../evil.ts", "x")]).is_err());
    }

    #[test]
    fn test_cli_parses_repair_flags() {
        let cli = Cli::try_parse_from([
            "fixpoint",
            "repair",
            "proj",
            "--max-iterations",
            "3",
            "--no-oracle",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Command::Repair {
                max_iterations,
                no_oracle,
                json,
                serve,
                ..
            } => {
                assert_eq!(max_iterations, Some(3));
                assert!(no_oracle && json && !serve);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
