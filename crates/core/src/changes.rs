//! Incremental build decisions.
//!
//! A package needs building when the identity tokens of its files differ from
//! the snapshot recorded after its last successful build, when any direct
//! dependency's snapshot file moved, when there is no snapshot to compare
//! against, or when the package is not in a git repository at all (degraded
//! mode: always build, never fail). The snapshot is only advanced by
//! `PendingBuild::commit`, so a skipped commit re-reports the same changes on
//! the next check instead of silently going stale.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::git::SnapshotCache;
use crate::types::{ScurryError, ScurryResult};
use crate::workspace::Workspace;

/// Snapshot file written to a package root after a successful build.
/// Always excluded from change listings.
pub const SNAPSHOT_FILE: &str = ".scurry-cache.json";

/// Classification of one changed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

impl ChangeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Modified => "modified",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            ChangeKind::Added => '+',
            ChangeKind::Deleted => '-',
            ChangeKind::Modified => '~',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

/// Persisted per-package state: file identity tokens plus the snapshot-file
/// mtimes of direct dependencies
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub deps: BTreeMap<String, u128>,
}

/// Decides whether packages need rebuilding, against an injected cache
pub struct ChangeDetector {
    cache: Arc<SnapshotCache>,
}

/// A positive build decision and the hook that advances the baseline
pub struct PendingBuild {
    pub is_git_repo: bool,
    pub changes: Vec<Change>,
    root: PathBuf,
    cache: Arc<SnapshotCache>,
}

impl ChangeDetector {
    pub fn new(cache: Arc<SnapshotCache>) -> ChangeDetector {
        ChangeDetector { cache }
    }

    /// `Some` when the package must build, `None` when nothing changed
    pub async fn needs_build(
        &self,
        root: &Path,
        workspace: &Workspace,
        force: bool,
    ) -> ScurryResult<Option<PendingBuild>> {
        let existing = if force {
            FileSnapshot::default()
        } else {
            load_snapshot(root)
        };

        let mut is_git_repo = true;
        let current = match package_snapshot(&self.cache, root, workspace).await {
            Ok(snapshot) => snapshot,
            Err(ScurryError::NoGitRepository(_)) => {
                is_git_repo = false;
                FileSnapshot::default()
            }
            Err(e) => return Err(e),
        };

        let changes = snapshot_diff(&existing, &current);
        let do_build = !changes.is_empty() || !is_git_repo || force || current.files.is_empty();
        if !do_build {
            return Ok(None);
        }
        Ok(Some(PendingBuild {
            is_git_repo,
            changes,
            root: root.to_path_buf(),
            cache: Arc::clone(&self.cache),
        }))
    }
}

impl PendingBuild {
    /// Record the just-built state so the next check can skip
    pub async fn commit(&self, workspace: &Workspace) -> ScurryResult<()> {
        if !self.is_git_repo {
            return Ok(());
        }
        self.cache.clear().await;
        let fresh = package_snapshot(&self.cache, &self.root, workspace).await?;
        std::fs::write(self.root.join(SNAPSHOT_FILE), serde_json::to_string(&fresh)?)?;
        Ok(())
    }
}

async fn package_snapshot(
    cache: &SnapshotCache,
    root: &Path,
    workspace: &Workspace,
) -> ScurryResult<FileSnapshot> {
    let files = cache.files_under(root).await?;
    Ok(FileSnapshot {
        files,
        deps: dependency_mtimes(root, workspace),
    })
}

fn load_snapshot(root: &Path) -> FileSnapshot {
    std::fs::read_to_string(root.join(SNAPSHOT_FILE))
        .ok()
        .and_then(|data| serde_json::from_str(&data).ok())
        .unwrap_or_default()
}

/// Snapshot-file mtimes of the package's direct dependencies; 0 when a
/// dependency has never recorded a build
fn dependency_mtimes(root: &Path, workspace: &Workspace) -> BTreeMap<String, u128> {
    let mut deps = BTreeMap::new();
    if let Some(pkg) = workspace.package_for_root(root) {
        for dep in workspace.direct_dependencies_of(&pkg.name) {
            if let Some(dep_pkg) = workspace.get(dep) {
                let mtime = std::fs::metadata(dep_pkg.root.join(SNAPSHOT_FILE))
                    .ok()
                    .and_then(|md| md.modified().ok())
                    .and_then(|st| st.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis())
                    .unwrap_or(0);
                deps.insert(dep.to_string(), mtime);
            }
        }
    }
    deps
}

/// Classify every difference between two snapshots
pub fn snapshot_diff(existing: &FileSnapshot, current: &FileSnapshot) -> Vec<Change> {
    let mut changes = Vec::new();

    let mut leftover: BTreeMap<&String, &String> = existing.files.iter().collect();
    for (file, token) in &current.files {
        match leftover.remove(file) {
            None => changes.push(Change {
                path: file.clone(),
                kind: ChangeKind::Added,
            }),
            Some(old) => {
                if old != token {
                    changes.push(Change {
                        path: file.clone(),
                        kind: ChangeKind::Modified,
                    });
                }
            }
        }
    }
    for file in leftover.keys() {
        changes.push(Change {
            path: (*file).clone(),
            kind: ChangeKind::Deleted,
        });
    }

    for (dep, mtime) in &current.deps {
        match existing.deps.get(dep) {
            None => changes.push(Change {
                path: dep.clone(),
                kind: ChangeKind::Added,
            }),
            Some(old) => {
                if *mtime == 0 || old != mtime {
                    changes.push(Change {
                        path: dep.clone(),
                        kind: ChangeKind::Modified,
                    });
                }
            }
        }
    }

    changes
}
