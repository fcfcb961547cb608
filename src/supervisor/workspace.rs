use crate::diagnostic::FileSet;
use crate::error::WorkspaceError;
use crate::util::resolve_relative_path;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const RUNS_DIR: &str = "fixpoint-runs";
const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Removed,
    RenamedAside(PathBuf),
    Leaked,
}

/// Isolated directory the current file set is materialized into.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// `$TMPDIR/fixpoint-runs/app_<run-id prefix>_<port>`, emptied before use.
    pub fn create(run_id: &str, port: u16) -> Result<Self, WorkspaceError> {
        Self::create_in(&std::env::temp_dir().join(RUNS_DIR), run_id, port)
    }

    pub fn create_in(base: &Path, run_id: &str, port: u16) -> Result<Self, WorkspaceError> {
        let short: String = run_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect();
        let root = base.join(format!("app_{}_{}", short, port));

        if root.exists() {
            let stale = Workspace { root: root.clone() };
            if stale.teardown() == TeardownOutcome::Leaked {
                warn!(path = %root.display(), "stale workspace could not be cleared");
            }
        }
        std::fs::create_dir_all(&root).map_err(|source| WorkspaceError::Create {
            path: root.clone(),
            source,
        })?;
        info!(path = %root.display(), "workspace created");
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write every artifact under the root, creating parent directories.
    pub fn write_files(&self, files: &FileSet) -> Result<(), WorkspaceError> {
        for file in files {
            let dest = resolve_relative_path(&self.root, &file.path).map_err(|reason| {
                WorkspaceError::UnsafePath {
                    path: file.path.clone(),
                    reason,
                }
            })?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|source| WorkspaceError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&dest, &file.content).map_err(|source| WorkspaceError::Write {
                path: dest.clone(),
                source,
            })?;
        }
        debug!(count = files.len(), path = %self.root.display(), "files persisted");
        Ok(())
    }

    /// Delete a file that left the set since the last write.
    pub fn remove_file(&self, path: &str) -> Result<(), WorkspaceError> {
        let dest = resolve_relative_path(&self.root, path).map_err(|reason| {
            WorkspaceError::UnsafePath {
                path: path.to_string(),
                reason,
            }
        })?;
        match std::fs::remove_file(&dest) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(WorkspaceError::Write { path: dest, source }),
        }
    }

    /// Remove the workspace, retrying, then renaming it aside. Never fails.
    pub fn teardown(&self) -> TeardownOutcome {
        if !self.root.exists() {
            return TeardownOutcome::Removed;
        }
        make_writable(&self.root);

        for attempt in 1..=REMOVE_ATTEMPTS {
            match std::fs::remove_dir_all(&self.root) {
                Ok(()) => {
                    debug!(attempt, path = %self.root.display(), "workspace removed");
                    return TeardownOutcome::Removed;
                }
                Err(err) => {
                    warn!(attempt, error = %err, path = %self.root.display(), "workspace removal failed");
                    if attempt < REMOVE_ATTEMPTS {
                        std::thread::sleep(REMOVE_RETRY_DELAY);
                    }
                }
            }
        }

        let aside = PathBuf::from(format!(
            "{}_old_{}",
            self.root.display(),
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        ));
        match std::fs::rename(&self.root, &aside) {
            Ok(()) => {
                warn!(path = %aside.display(), "workspace renamed aside");
                TeardownOutcome::RenamedAside(aside)
            }
            Err(err) => {
                warn!(error = %err, path = %self.root.display(), "workspace leaked");
                TeardownOutcome::Leaked
            }
        }
    }
}

fn make_writable(root: &Path) {
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mut perms = meta.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            if let Err(err) = std::fs::set_permissions(entry.path(), perms) {
                debug!(error = %err, path = %entry.path().display(), "could not clear read-only flag");
            }
        }
    }
}
