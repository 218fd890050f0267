//! Package manifest parsing and workspace-root discovery helpers

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::ScurryResult;

/// File name of a package manifest
pub const MANIFEST_FILE: &str = "package.json";
/// File name of the pnpm workspace definition
pub const PNPM_WORKSPACE_FILE: &str = "pnpm-workspace.yaml";

/// The subset of a `package.json` this runner consumes
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, String>,
    /// Member globs of an npm/yarn workspace root, absent for plain packages
    pub workspaces: Option<WorkspaceGlobs>,
    /// Runner settings embedded in the manifest under a `scurry` key
    #[serde(default)]
    pub scurry: RunnerConfig,
}

/// Per-package runner settings
#[derive(Debug, Default, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Scripts whose top-level commands are dispatched concurrently
    #[serde(default)]
    pub concurrent: Vec<String>,
}

/// `workspaces` accepts either a bare glob list or an object with `packages`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum WorkspaceGlobs {
    Plain(Vec<String>),
    Scoped { packages: Vec<String> },
}

impl WorkspaceGlobs {
    pub fn patterns(&self) -> &[String] {
        match self {
            WorkspaceGlobs::Plain(patterns) => patterns,
            WorkspaceGlobs::Scoped { packages } => packages,
        }
    }
}

/// `pnpm-workspace.yaml` member globs
#[derive(Debug, Deserialize, Serialize, JsonSchema, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PnpmWorkspace {
    #[serde(default)]
    pub packages: Vec<String>,
}

pub fn parse_manifest(json_str: &str) -> ScurryResult<PackageManifest> {
    let manifest: PackageManifest = serde_json::from_str(json_str)?;
    Ok(manifest)
}

pub fn parse_pnpm_workspace(yaml_str: &str) -> ScurryResult<PnpmWorkspace> {
    let config: PnpmWorkspace = serde_yaml::from_str(yaml_str)?;
    Ok(config)
}

/// Read and parse the manifest directly under `dir`
pub fn read_manifest(dir: &Path) -> ScurryResult<PackageManifest> {
    let data = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    parse_manifest(&data)
}

/// Walk up from `cwd` and return the first directory containing `name`
pub fn find_up(name: &str, cwd: &Path) -> Option<PathBuf> {
    let mut dir = Some(cwd);
    while let Some(current) = dir {
        if current.join(name).exists() {
            return Some(current.to_path_buf());
        }
        dir = current.parent();
    }
    None
}

/// Package manager in charge of a workspace, detected from its lockfile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn detect(root: &Path) -> Option<Self> {
        if root.join("yarn.lock").exists() {
            Some(PackageManager::Yarn)
        } else if root.join("pnpm-lock.yaml").exists() {
            Some(PackageManager::Pnpm)
        } else if root.join("package-lock.json").exists() {
            Some(PackageManager::Npm)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest_maps_camel_case_fields() {
        let manifest = parse_manifest(
            r#"{
                "name": "web",
                "scripts": { "build": "tsc" },
                "dependencies": { "shared": "1.0.0" },
                "devDependencies": { "eslint": "^8.0.0" }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.name.as_deref(), Some("web"));
        assert_eq!(manifest.scripts.get("build").map(String::as_str), Some("tsc"));
        assert!(manifest.dependencies.contains_key("shared"));
        assert!(manifest.dev_dependencies.contains_key("eslint"));
    }

    #[test]
    fn test_workspaces_accepts_both_shapes() {
        let plain = parse_manifest(r#"{ "workspaces": ["packages/*"] }"#).unwrap();
        let scoped =
            parse_manifest(r#"{ "workspaces": { "packages": ["apps/*", "libs/*"] } }"#).unwrap();

        assert_eq!(plain.workspaces.unwrap().patterns(), ["packages/*"]);
        assert_eq!(scoped.workspaces.unwrap().patterns(), ["apps/*", "libs/*"]);
    }

    #[test]
    fn test_runner_config_defaults_to_empty() {
        let plain = parse_manifest(r#"{ "name": "a" }"#).unwrap();
        assert!(plain.scurry.concurrent.is_empty());

        let tuned = parse_manifest(
            r#"{ "name": "a", "scurry": { "concurrent": ["dev"] } }"#,
        )
        .unwrap();
        assert_eq!(tuned.scurry.concurrent, vec!["dev"]);
    }

    #[test]
    fn test_parse_pnpm_workspace() {
        let config = parse_pnpm_workspace("packages:\n  - 'packages/*'\n  - 'tools/*'\n").unwrap();
        assert_eq!(config.packages, vec!["packages/*", "tools/*"]);
    }

    #[test]
    fn test_find_up_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let found = find_up(MANIFEST_FILE, &nested).unwrap();
        assert_eq!(found, dir.path());
        assert!(find_up("definitely-not-here.xyz", &nested).is_none());
    }

    #[test]
    fn test_package_manager_detection_prefers_yarn_lock() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(PackageManager::detect(dir.path()), None);

        std::fs::write(dir.path().join("package-lock.json"), "{}").unwrap();
        assert_eq!(PackageManager::detect(dir.path()), Some(PackageManager::Npm));

        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(PackageManager::detect(dir.path()), Some(PackageManager::Yarn));
    }
}
