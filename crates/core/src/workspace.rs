//! Workspace model: packages, the inter-package dependency graph and the
//! execution order derived from it.
//!
//! A workspace is discovered from npm/yarn `workspaces` globs or a
//! `pnpm-workspace.yaml`, or falls back to the nearest manifest as a
//! single-package workspace. Dependency edges only exist between workspace
//! members; anything else in a manifest's dependency maps is ignored.
//!
//! Cycles never abort anything. The execution order is produced by a
//! depth-first walk with an already-seen guard, so it terminates and stays
//! valid for the acyclic part of the graph, while strongly-connected
//! components with more than one member are recorded in `dependency_cycles`
//! for callers that want to surface them.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::manifest::{
    find_up, parse_pnpm_workspace, read_manifest, PackageManifest, MANIFEST_FILE,
    PNPM_WORKSPACE_FILE,
};
use crate::types::{ScurryError, ScurryResult};

/// Directories never traversed while expanding member globs
const DEFAULT_EXCLUDE_GLOBS: [&str; 3] = ["**/.git", "**/node_modules", "**/dist"];

/// Index of a package in the workspace arena
pub type PackageId = usize;

/// A single workspace member
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    /// Absolute root directory of the package
    pub root: PathBuf,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
    pub dev_dependencies: BTreeMap<String, String>,
    /// Scripts marked concurrent in the manifest's runner settings
    pub concurrent_scripts: Vec<String>,
}

impl Package {
    pub(crate) fn from_manifest(
        root: PathBuf,
        workspace_root: &Path,
        manifest: PackageManifest,
    ) -> Package {
        let fallback = root
            .strip_prefix(workspace_root)
            .ok()
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .filter(|rel| !rel.is_empty())
            .unwrap_or_else(|| "root".to_string());
        Package {
            name: manifest.name.unwrap_or(fallback),
            root,
            scripts: manifest.scripts,
            dependencies: manifest.dependencies,
            dev_dependencies: manifest.dev_dependencies,
            concurrent_scripts: manifest.scurry.concurrent,
        }
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }
}

/// All packages of a monorepo plus the derived ordering data
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    packages: Vec<Package>,
    index: HashMap<String, PackageId>,
    /// Direct in-workspace dependencies per package, self excluded
    direct: Vec<Vec<PackageId>>,
    /// Topological execution order (dependencies first)
    order: Vec<PackageId>,
    /// Position of each package in `order`
    order_index: Vec<usize>,
    /// Strongly-connected components with more than one member, sorted
    pub dependency_cycles: Vec<Vec<String>>,
}

impl Workspace {
    /// Build a workspace from already-loaded package records
    pub fn from_packages(root: PathBuf, packages: Vec<Package>) -> Workspace {
        let mut sorted = packages;
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut arena: Vec<Package> = Vec::new();
        let mut index: HashMap<String, PackageId> = HashMap::new();
        for pkg in sorted {
            if index.contains_key(&pkg.name) {
                continue;
            }
            index.insert(pkg.name.clone(), arena.len());
            arena.push(pkg);
        }

        let direct: Vec<Vec<PackageId>> = arena
            .iter()
            .map(|pkg| {
                let mut deps: Vec<PackageId> = pkg
                    .dependencies
                    .keys()
                    .chain(pkg.dev_dependencies.keys())
                    .filter(|dep| dep.as_str() != pkg.name)
                    .filter_map(|dep| index.get(dep.as_str()).copied())
                    .collect();
                deps.sort_unstable();
                deps.dedup();
                deps
            })
            .collect();

        let mut order: Vec<PackageId> = Vec::new();
        for id in 0..arena.len() {
            let mut seen: Vec<PackageId> = Vec::new();
            push_dep_tree(id, &direct, &mut seen, &mut order);
            if !order.contains(&id) {
                order.push(id);
            }
        }
        let mut order_index = vec![0usize; arena.len()];
        for (position, &id) in order.iter().enumerate() {
            order_index[id] = position;
        }

        let dependency_cycles = detect_cycles(&arena, &direct);

        Workspace {
            root,
            packages: arena,
            index,
            direct,
            order,
            order_index,
            dependency_cycles,
        }
    }

    /// Locate and load the workspace governing `cwd`
    pub fn discover(cwd: &Path, include_root: bool) -> ScurryResult<Workspace> {
        if let Some((root, patterns)) = find_workspace_root(cwd)? {
            let mut packages = collect_members(&root, &patterns)?;
            if include_root {
                if let Ok(manifest) = read_manifest(&root) {
                    packages.push(Package::from_manifest(root.clone(), &root, manifest));
                }
            }
            return Ok(Workspace::from_packages(root, packages));
        }

        let single_root = find_up(MANIFEST_FILE, cwd).ok_or_else(|| {
            ScurryError::Workspace(
                "Could not find packages in your workspace. Supported: npm, yarn, pnpm".to_string(),
            )
        })?;
        let manifest = read_manifest(&single_root)?;
        let package = Package::from_manifest(single_root.clone(), &single_root, manifest);
        Ok(Workspace::from_packages(single_root, vec![package]))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.index.get(name).map(|&id| &self.packages[id])
    }

    /// Packages in execution order
    pub fn ordered_packages(&self) -> impl Iterator<Item = &Package> {
        self.order.iter().map(|&id| &self.packages[id])
    }

    /// Package names in execution order
    pub fn topological_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&id| self.packages[id].name.as_str())
            .collect()
    }

    /// Declared in-workspace dependencies of `name`, self excluded
    pub fn direct_dependencies_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&id) => self.direct[id]
                .iter()
                .map(|&dep| self.packages[dep].name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Transitive in-workspace dependencies of `name` in execution order
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&id) => self
                .transitive_ids(id)
                .into_iter()
                .map(|dep| self.packages[dep].name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// The member whose root directory is exactly `root`
    pub fn package_for_root(&self, root: &Path) -> Option<&Package> {
        self.id_for_root(root).map(|id| &self.packages[id])
    }

    /// Root directory of `pkg` relative to the workspace root, `/`-separated
    pub fn relative_root(&self, pkg: &Package) -> String {
        let rel = pkg.root.strip_prefix(&self.root).unwrap_or(&pkg.root);
        rel.to_string_lossy().replace('\\', "/")
    }

    pub fn has_cycles(&self) -> bool {
        !self.dependency_cycles.is_empty()
    }

    /// Select packages by glob over name or workspace-relative path.
    ///
    /// A leading `+` additionally pulls in the transitive dependency closure
    /// of every match; a bare `+` (or `+.`) selects the package in the
    /// current working directory.
    pub fn filter_packages(
        &self,
        filter: Option<&str>,
        cwd: &Path,
    ) -> ScurryResult<Vec<&Package>> {
        let raw = match filter {
            Some(raw) if !raw.is_empty() => raw,
            _ => {
                return Ok(self.order.iter().map(|&id| &self.packages[id]).collect());
            }
        };

        let (with_deps, pattern) = match raw.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let seeds: Vec<PackageId> = if with_deps && (pattern.is_empty() || pattern == ".") {
            let manifest_root = find_up(MANIFEST_FILE, cwd).ok_or_else(|| {
                ScurryError::Config(format!(
                    "'--filter {}' requires a {} in the current working directory",
                    raw, MANIFEST_FILE
                ))
            })?;
            self.id_for_root(&manifest_root).into_iter().collect()
        } else {
            let matcher = Glob::new(pattern)
                .map_err(|e| ScurryError::Config(format!("Invalid filter '{}': {}", raw, e)))?
                .compile_matcher();
            (0..self.packages.len())
                .filter(|&id| {
                    let pkg = &self.packages[id];
                    matcher.is_match(&pkg.name) || matcher.is_match(self.relative_root(pkg))
                })
                .collect()
        };

        let mut selected: HashSet<PackageId> = seeds.iter().copied().collect();
        if with_deps {
            for &id in &seeds {
                selected.extend(self.transitive_ids(id));
            }
        }

        if selected.is_empty() {
            return Err(ScurryError::Config(format!(
                "No packages matched filter '{}'",
                raw
            )));
        }

        let mut ids: Vec<PackageId> = selected.into_iter().collect();
        ids.sort_by_key(|&id| self.order_index[id]);
        Ok(ids.into_iter().map(|id| &self.packages[id]).collect())
    }

    // Private helper methods

    fn id_for_root(&self, root: &Path) -> Option<PackageId> {
        (0..self.packages.len()).find(|&id| self.packages[id].root == root)
    }

    fn transitive_ids(&self, id: PackageId) -> Vec<PackageId> {
        let mut visited: HashSet<PackageId> = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for &dep in &self.direct[current] {
                if dep != id && visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        let mut ids: Vec<PackageId> = visited.into_iter().collect();
        ids.sort_by_key(|&dep| self.order_index[dep]);
        ids
    }
}

/// Depth-first placement of `id`'s dependency tree into `order`. The seen
/// guard breaks cycles instead of erroring on them.
fn push_dep_tree(
    id: PackageId,
    direct: &[Vec<PackageId>],
    seen: &mut Vec<PackageId>,
    order: &mut Vec<PackageId>,
) {
    for &dep in &direct[id] {
        if seen.contains(&dep) {
            continue;
        }
        seen.push(dep);
        push_dep_tree(dep, direct, seen, order);
        if !order.contains(&dep) {
            order.push(dep);
        }
    }
}

fn detect_cycles(packages: &[Package], direct: &[Vec<PackageId>]) -> Vec<Vec<String>> {
    let mut graph = DiGraph::<PackageId, ()>::new();
    let nodes: Vec<NodeIndex> = (0..packages.len()).map(|id| graph.add_node(id)).collect();
    for (id, deps) in direct.iter().enumerate() {
        for &dep in deps {
            graph.add_edge(nodes[id], nodes[dep], ());
        }
    }

    let mut cycles: Vec<Vec<String>> = kosaraju_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .map(|component| {
            let mut names: Vec<String> = component
                .iter()
                .map(|node| packages[graph[*node]].name.clone())
                .collect();
            names.sort();
            names
        })
        .collect();
    cycles.sort();
    cycles
}

/// Walk up from `cwd` looking for a directory that defines workspace members
fn find_workspace_root(cwd: &Path) -> ScurryResult<Option<(PathBuf, Vec<String>)>> {
    let mut dir = Some(cwd);
    while let Some(current) = dir {
        if current.join(MANIFEST_FILE).exists() {
            let manifest = read_manifest(current)?;
            if let Some(globs) = manifest.workspaces {
                return Ok(Some((current.to_path_buf(), globs.patterns().to_vec())));
            }
        }
        let pnpm = current.join(PNPM_WORKSPACE_FILE);
        if pnpm.exists() {
            let config = parse_pnpm_workspace(&std::fs::read_to_string(pnpm)?)?;
            return Ok(Some((current.to_path_buf(), config.packages)));
        }
        dir = current.parent();
    }
    Ok(None)
}

/// Expand member globs into package records by walking the tree under `root`
fn collect_members(root: &Path, patterns: &[String]) -> ScurryResult<Vec<Package>> {
    let mut include = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern.trim_end_matches('/')).map_err(|e| {
            ScurryError::Workspace(format!("Invalid workspace glob '{}': {}", pattern, e))
        })?;
        include.add(glob);
    }
    let include = include
        .build()
        .map_err(|e| ScurryError::Workspace(e.to_string()))?;

    let mut exclude = GlobSetBuilder::new();
    for pattern in DEFAULT_EXCLUDE_GLOBS {
        if let Ok(glob) = Glob::new(pattern) {
            exclude.add(glob);
        }
    }
    let exclude = exclude
        .build()
        .map_err(|e| ScurryError::Workspace(e.to_string()))?;

    let mut packages = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(root) {
                if exclude.is_match(rel) {
                    continue;
                }
                if include.is_match(rel) && path.join(MANIFEST_FILE).exists() {
                    let manifest = read_manifest(&path)?;
                    packages.push(Package::from_manifest(path.clone(), root, manifest));
                }
            }
            queue.push_back(path);
        }
    }
    Ok(packages)
}
