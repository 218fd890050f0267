//! Git-backed file listings used by change detection.
//!
//! One `git ls-files` invocation per repository root yields every cached,
//! modified, deleted and untracked path in a single pass. The raw listing is
//! cached for the duration of a run (`SnapshotCache`) and scoped per package
//! on demand. Identity tokens are the index object hash, extended with the
//! working-tree mtime for locally modified files (`<hash>.<mtime>`, or
//! `<hash>.del` when the file vanished), or the bare mtime for untracked
//! files.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::changes::SNAPSHOT_FILE;
use crate::manifest::find_up;
use crate::types::{ScurryError, ScurryResult};

/// Newline-delimited ignore patterns at the repository root
pub const IGNORE_FILE: &str = ".scurryignore";

/// Repository-relative path -> content identity token
pub type FileListing = BTreeMap<String, String>;

/// Nearest ancestor of `directory` containing a `.git` entry
pub fn repository_root(directory: &Path) -> ScurryResult<PathBuf> {
    find_up(".git", directory)
        .ok_or_else(|| ScurryError::NoGitRepository(directory.to_path_buf()))
}

/// Run-scoped cache of repository listings, injected into the change
/// detector. Populated once per repository root, cleared between runs.
#[derive(Default)]
pub struct SnapshotCache {
    listings: Mutex<HashMap<PathBuf, FileListing>>,
}

impl SnapshotCache {
    pub fn new() -> SnapshotCache {
        SnapshotCache::default()
    }

    /// Files under `directory` (relative to it), taken from the cached
    /// listing of the enclosing repository. The runner's own snapshot files
    /// and anything matched by the root ignore file are dropped.
    pub async fn files_under(&self, directory: &Path) -> ScurryResult<FileListing> {
        let root = repository_root(directory)?;

        // the lock is held across the git call so one listing per root is
        // computed even when packages check concurrently
        let mut listings = self.listings.lock().await;
        if !listings.contains_key(&root) {
            let listing = git_listing(&root).await?;
            listings.insert(root.clone(), listing);
        }

        let prefix = relative_dir(&root, directory);
        let ignore = load_ignore_globs(&root);
        let mut scoped = FileListing::new();
        if let Some(listing) = listings.get(&root) {
            for (file, token) in listing {
                let rel = match strip_dir_prefix(file, &prefix) {
                    Some(rel) if !rel.is_empty() => rel,
                    _ => continue,
                };
                if rel.ends_with(SNAPSHOT_FILE) {
                    continue;
                }
                if let Some(set) = &ignore {
                    if set.is_match(file.as_str()) {
                        continue;
                    }
                }
                scoped.insert(rel.to_string(), token.clone());
            }
        }
        Ok(scoped)
    }

    pub async fn clear(&self) {
        self.listings.lock().await.clear();
    }
}

async fn git_listing(root: &Path) -> ScurryResult<FileListing> {
    let output = Command::new("git")
        .args(["ls-files", "--full-name", "-s", "-d", "-c", "-m", "-o", "--directory", "-t"])
        .current_dir(root)
        .output()
        .await?;
    if !output.status.success() {
        return Err(ScurryError::Task(format!(
            "git ls-files failed in {}: {}",
            root.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_listing(&String::from_utf8_lossy(&output.stdout), root))
}

/// Parse the tagged `ls-files` output into identity tokens
pub fn parse_listing(data: &str, root: &Path) -> FileListing {
    let mut files = FileListing::new();
    for line in data.lines() {
        if let Some((tag, hash, path)) = parse_index_line(line) {
            let mut token = hash.to_string();
            if tag == 'C' {
                // content differs from the index: key the token on the
                // working-tree mtime as well
                match mtime_millis(&root.join(path)) {
                    Some(mtime) => {
                        token.push('.');
                        token.push_str(&mtime.to_string());
                    }
                    None => token.push_str(".del"),
                }
            }
            files.insert(path.to_string(), token);
        } else if line.len() > 2 {
            // `<tag> <path>` lines: untracked and deleted entries
            let path = &line[2..];
            if let Some(mtime) = mtime_millis(&root.join(path)) {
                files.insert(path.to_string(), mtime.to_string());
            }
        }
    }
    files
}

/// `<tag> <mode> <hash> <stage>\t<path>` index lines
fn parse_index_line(line: &str) -> Option<(char, &str, &str)> {
    let tag = line.chars().next()?;
    if !(tag.is_ascii_uppercase() || tag == '?') {
        return None;
    }
    let rest = line[tag.len_utf8()..].trim_start();
    let (mode, rest) = rest.split_once(char::is_whitespace)?;
    if mode.len() != 6 || !mode.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = rest.trim_start();
    let (hash, rest) = rest.split_once(char::is_whitespace)?;
    if hash.len() != 40
        || !hash
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase())
    {
        return None;
    }
    let rest = rest.trim_start();
    let (stage, path) = rest.split_once(char::is_whitespace)?;
    if stage.is_empty() || !stage.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let path = path.trim_start();
    if path.is_empty() {
        return None;
    }
    Some((tag, hash, path))
}

fn mtime_millis(path: &Path) -> Option<u128> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis())
}

fn relative_dir(root: &Path, directory: &Path) -> String {
    directory
        .strip_prefix(root)
        .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

/// Strip `prefix` as a whole path component, not a string prefix
fn strip_dir_prefix<'a>(file: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(file);
    }
    let rest = file.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

fn load_ignore_globs(root: &Path) -> Option<GlobSet> {
    let data = std::fs::read_to_string(root.join(IGNORE_FILE)).ok()?;
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // bare names match at any depth, patterns with a slash stay anchored
        let pattern = if line.contains('/') {
            line.trim_end_matches('/').to_string()
        } else {
            format!("**/{}", line)
        };
        for candidate in [pattern.clone(), format!("{}/**", pattern)] {
            if let Ok(glob) = Glob::new(&candidate) {
                builder.add(glob);
                any = true;
            }
        }
    }
    if any {
        builder.build().ok()
    } else {
        None
    }
}
