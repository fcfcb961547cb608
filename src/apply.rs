//! Applies `Fix` values to a `FileSet`.
//!
//! Pure: takes a set, returns a new one. Writing to disk happens elsewhere.

use crate::diagnostic::{FileArtifact, FileSet, Fix, FixAction};
use crate::util::{basename, check_relative_path, normalize_path};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How a fix's target path was matched to an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Suffix,
    Basename,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyOutcome {
    pub files: FileSet,
    /// Descriptions of the fixes that changed something, in order.
    pub applied: Vec<String>,
}

/// Find the artifact a path refers to. Tiers are tried over the whole set in order.
pub fn resolve_target(files: &FileSet, path: &str) -> Option<(usize, MatchTier)> {
    let wanted = normalize_path(path);
    if wanted.is_empty() {
        return None;
    }

    if let Some(idx) = files.iter().position(|f| f.key() == wanted) {
        return Some((idx, MatchTier::Exact));
    }

    if let Some(idx) = files
        .iter()
        .position(|f| is_path_suffix(&f.key(), &wanted) || is_path_suffix(&wanted, &f.key()))
    {
        return Some((idx, MatchTier::Suffix));
    }

    let wanted_base = basename(&wanted);
    let idx = files.iter().position(|f| basename(&f.key()) == wanted_base)?;
    Some((idx, MatchTier::Basename))
}

/// True when `suffix` equals `full` or ends it on a segment boundary.
fn is_path_suffix(full: &str, suffix: &str) -> bool {
    if suffix.is_empty() || full.len() <= suffix.len() {
        return false;
    }
    full.ends_with(suffix) && full.as_bytes()[full.len() - suffix.len() - 1] == b'/'
}

pub fn apply(files: FileSet, fixes: &[Fix]) -> ApplyOutcome {
    let mut files = files;
    let mut applied = Vec::new();
    let mut touched: HashSet<String> = HashSet::new();

    for fix in fixes {
        let resolved = resolve_target(&files, &fix.target_path);
        if let Some((idx, MatchTier::Basename)) = resolved {
            let matched = files.as_slice().get(idx).map(|f| f.path.as_str()).unwrap_or_default();
            warn!(
                target = %fix.target_path,
                matched = %matched,
                "fix target matched by file name only"
            );
        }

        let changed_key = match fix.action {
            FixAction::Delete => match resolved {
                Some((idx, _)) => files.remove_at(idx).map(|removed| removed.key()),
                None => {
                    debug!(target = %fix.target_path, "delete target not found; skipping");
                    None
                }
            },
            FixAction::ReplaceContent | FixAction::Create => {
                let Some(content) = fix.new_content.as_ref() else {
                    warn!(target = %fix.target_path, "fix carries no content; skipping");
                    continue;
                };
                match resolved.and_then(|(idx, _)| files.get_mut_at(idx)) {
                    Some(existing) => {
                        if fix.action == FixAction::Create {
                            warn!(path = %existing.path, "create targets an existing file; replacing it");
                        }
                        existing.content = content.clone();
                        Some(existing.key())
                    }
                    None => {
                        if let Err(reason) = check_relative_path(&fix.target_path) {
                            warn!(target = %fix.target_path, %reason, "refusing to create file outside the project");
                            continue;
                        }
                        if fix.action == FixAction::ReplaceContent {
                            info!(path = %fix.target_path, "fix implies a missing file; creating it");
                        }
                        let artifact = FileArtifact::new(fix.target_path.trim_start_matches("./"), content.clone());
                        let key = artifact.key();
                        files.insert(artifact);
                        Some(key)
                    }
                }
            }
        };

        if let Some(key) = changed_key {
            if !touched.insert(key.clone()) {
                info!(path = %key, "file changed by more than one fix; most recent fix wins");
            }
            applied.push(fix.description.clone());
        }
    }

    ApplyOutcome { files, applied }
}
