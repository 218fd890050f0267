//! Read-only views of the workspace, shaped for the listing commands.

use std::path::PathBuf;

use crate::manifest::PackageManager;
use crate::workspace::{Package, Workspace};

/// One row of `list`: a package and its runnable scripts
#[derive(Debug, Clone)]
pub struct PackageListing {
    pub name: String,
    /// Workspace-relative root, `.` for the root package
    pub path: String,
    pub scripts: Vec<String>,
}

impl PackageListing {
    pub fn from_package(workspace: &Workspace, pkg: &Package) -> PackageListing {
        PackageListing {
            name: pkg.name.clone(),
            path: display_path(workspace, pkg),
            scripts: pkg.scripts.keys().cloned().collect(),
        }
    }
}

/// The `info` report: workspace shape plus anything worth flagging
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub root: PathBuf,
    pub package_manager: String,
    pub packages: Vec<PackageInfo>,
    pub dependency_cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub path: String,
    pub dependencies: Vec<String>,
}

impl WorkspaceInfo {
    pub fn collect(workspace: &Workspace, selected: &[&Package]) -> WorkspaceInfo {
        let package_manager = PackageManager::detect(&workspace.root)
            .unwrap_or(PackageManager::Npm)
            .label()
            .to_string();
        let packages = selected
            .iter()
            .map(|pkg| PackageInfo {
                name: pkg.name.clone(),
                path: display_path(workspace, pkg),
                dependencies: workspace
                    .direct_dependencies_of(&pkg.name)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect();
        WorkspaceInfo {
            root: workspace.root.clone(),
            package_manager,
            packages,
            dependency_cycles: workspace.dependency_cycles.clone(),
        }
    }
}

fn display_path(workspace: &Workspace, pkg: &Package) -> String {
    let path = workspace.relative_root(pkg);
    if path.is_empty() {
        ".".to_string()
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn package(name: &str, deps: &[&str], scripts: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            root: PathBuf::from("/ws").join(name),
            scripts: scripts
                .iter()
                .map(|s| (s.to_string(), "true".to_string()))
                .collect(),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), "*".to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
            concurrent_scripts: Vec::new(),
        }
    }

    #[test]
    fn test_listing_shows_relative_paths_and_sorted_scripts() {
        let mut root_pkg = package("top", &[], &["z", "a"]);
        root_pkg.root = PathBuf::from("/ws");
        let ws = Workspace::from_packages(
            PathBuf::from("/ws"),
            vec![root_pkg, package("lib", &[], &["build"])],
        );

        let top = ws.get("top").unwrap();
        let listing = PackageListing::from_package(&ws, top);
        assert_eq!(listing.path, ".");
        assert_eq!(listing.scripts, vec!["a", "z"]);

        let lib = ws.get("lib").unwrap();
        assert_eq!(PackageListing::from_package(&ws, lib).path, "lib");
    }

    #[test]
    fn test_info_carries_dependencies_and_cycles() {
        let ws = Workspace::from_packages(
            PathBuf::from("/ws"),
            vec![
                package("a", &["b"], &[]),
                package("b", &["a"], &[]),
                package("c", &["a"], &[]),
            ],
        );
        let selected = ws.filter_packages(None, &ws.root).unwrap();
        let info = WorkspaceInfo::collect(&ws, &selected);

        assert_eq!(info.packages.len(), 3);
        let c = info.packages.iter().find(|p| p.name == "c").unwrap();
        assert_eq!(c.dependencies, vec!["a"]);
        assert_eq!(
            info.dependency_cycles,
            vec![vec!["a".to_string(), "b".to_string()]]
        );
    }
}
