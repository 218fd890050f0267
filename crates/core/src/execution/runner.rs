//! The scheduler.
//!
//! `Runner` walks a command tree and turns it into child processes. Groups
//! dispatch their children either strictly in order or concurrently in
//! batches; `pre`-scripts always run inline and `post`-scripts wait for every
//! prior sibling to settle. A global semaphore bounds how many processes are
//! alive at once across the whole tree, independent of nesting.
//!
//! Failure policy: the first error wins and propagates up. A failed node
//! never fulfils its completion signal, so packages gated on it fail with an
//! interruption instead of hanging, while already-running siblings settle on
//! their own.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::changes::{ChangeDetector, ChangeKind, PendingBuild};
use crate::command::{CommandNode, GroupSpec, NodeKind, NodeSync};
use crate::execution::plan::build_workspace_plan;
use crate::execution::process::{ProcessRegistry, ProcessRunner};
use crate::git::SnapshotCache;
use crate::manifest::{find_up, read_manifest, MANIFEST_FILE};
use crate::output::{format_duration, next_node_id, NodeId, NodeStatus, OutputRouter};
use crate::parser::{split_words, CommandParser};
use crate::results::{PackageListing, WorkspaceInfo};
use crate::types::{ScurryError, ScurryResult};
use crate::workspace::{Package, Workspace};

/// Processes allowed to run at once unless overridden
pub const DEFAULT_CONCURRENCY: usize = 10;

const DEFAULT_BUILD_SCRIPT: &str = "build";

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Maximum processes alive at once; clamped to at least 1
    pub concurrency: usize,
    /// Package selection glob, `+` prefix pulls in dependencies
    pub filter: Option<String>,
    /// Treat the invoked script as the build script
    pub build: bool,
    /// Ignore recorded snapshots and rebuild everything
    pub rebuild: bool,
    /// Walk the tree and report, but spawn nothing
    pub dry_run: bool,
    /// Pass child stdio through untouched
    pub raw: bool,
    /// No summary output; failures carry the transcript instead
    pub silent: bool,
    /// Include the workspace root package itself
    pub root: bool,
    /// Where to resolve the workspace from; defaults to the current directory
    pub cwd: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            concurrency: DEFAULT_CONCURRENCY,
            filter: None,
            build: false,
            rebuild: false,
            dry_run: false,
            raw: false,
            silent: false,
            root: false,
            cwd: None,
        }
    }
}

/// Immutable state shared by every node of one run
struct RunContext {
    workspace: Workspace,
    build_command: String,
}

/// Executes command trees against a workspace
#[derive(Clone)]
pub struct Runner {
    options: RunnerOptions,
    router: OutputRouter,
    cache: Arc<SnapshotCache>,
    process: ProcessRunner,
    semaphore: Arc<Semaphore>,
}

impl Runner {
    pub fn new(
        mut options: RunnerOptions,
        router: OutputRouter,
        registry: Arc<ProcessRegistry>,
        cache: Arc<SnapshotCache>,
    ) -> Runner {
        options.concurrency = options.concurrency.max(1);
        let process = ProcessRunner::new(
            registry,
            router.clone(),
            options.raw,
            options.silent,
        );
        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        Runner {
            options,
            router,
            cache,
            process,
            semaphore,
        }
    }

    /// Run `cmd` across every selected package of the surrounding workspace,
    /// dependencies before dependents
    pub async fn run_recursive(&self, cmd: &str) -> ScurryResult<()> {
        let cwd = self.working_dir()?;
        let workspace = Workspace::discover(&cwd, self.options.root)?;
        let selected = workspace.filter_packages(self.options.filter.as_deref(), &cwd)?;
        let plan = build_workspace_plan(&workspace, &selected, cmd);
        let ctx = RunContext {
            workspace,
            build_command: self.build_command(cmd),
        };
        self.execute(plan, Arc::new(ctx)).await
    }

    /// Run `cmd` for the package in the current directory only
    pub async fn run(&self, cmd: &str) -> ScurryResult<()> {
        let cwd = self.working_dir()?;
        let pkg = match find_up(MANIFEST_FILE, &cwd) {
            Some(dir) => {
                let manifest = read_manifest(&dir)?;
                Package::from_manifest(dir.clone(), &dir, manifest)
            }
            // no manifest anywhere: still run, scripts just never expand
            None => Package {
                name: String::new(),
                root: cwd.clone(),
                scripts: BTreeMap::new(),
                dependencies: BTreeMap::new(),
                dev_dependencies: BTreeMap::new(),
                concurrent_scripts: Vec::new(),
            },
        };
        let plan = CommandParser::new(&pkg).parse(cmd);
        let ctx = RunContext {
            workspace: Workspace::from_packages(pkg.root.clone(), vec![pkg]),
            build_command: self.build_command(cmd),
        };
        self.execute(plan, Arc::new(ctx)).await
    }

    /// Selected packages with their script names
    pub fn list(&self) -> ScurryResult<Vec<PackageListing>> {
        let cwd = self.working_dir()?;
        let workspace = Workspace::discover(&cwd, self.options.root)?;
        let selected = workspace.filter_packages(self.options.filter.as_deref(), &cwd)?;
        Ok(selected
            .iter()
            .map(|pkg| PackageListing::from_package(&workspace, pkg))
            .collect())
    }

    /// Workspace shape: package manager, members, dependency edges and cycles
    pub fn info(&self) -> ScurryResult<WorkspaceInfo> {
        let cwd = self.working_dir()?;
        let workspace = Workspace::discover(&cwd, true)?;
        let selected = workspace.filter_packages(self.options.filter.as_deref(), &cwd)?;
        Ok(WorkspaceInfo::collect(&workspace, &selected))
    }

    // Private helper methods

    async fn execute(&self, plan: CommandNode, ctx: Arc<RunContext>) -> ScurryResult<()> {
        let started = Instant::now();
        self.run_node(plan, &ctx, -1, None).await?;
        if !self.options.silent {
            let what = if self.options.dry_run {
                "Dry-run done"
            } else {
                "Done"
            };
            println!(
                "{} ✨ {} in {}",
                "success".green(),
                what,
                format_duration(started.elapsed())
            );
        }
        Ok(())
    }

    fn working_dir(&self) -> ScurryResult<PathBuf> {
        match &self.options.cwd {
            Some(cwd) => Ok(cwd.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn build_command(&self, cmd: &str) -> String {
        if self.options.build {
            split_words(cmd)
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_BUILD_SCRIPT.to_string())
        } else {
            DEFAULT_BUILD_SCRIPT.to_string()
        }
    }

    /// Recursion point; boxing keeps the future sized and lets concurrent
    /// children move onto their own tasks
    fn run_node(
        &self,
        node: CommandNode,
        ctx: &Arc<RunContext>,
        level: i32,
        parent: Option<NodeId>,
    ) -> BoxFuture<'static, ScurryResult<()>> {
        let runner = self.clone();
        let ctx = Arc::clone(ctx);
        Box::pin(async move {
            match &node.kind {
                NodeKind::Op(_) => Ok(()),
                NodeKind::Process(_) => runner.run_process(node, level, parent).await,
                NodeKind::Group(_) => runner.run_group(node, &ctx, level, parent).await,
            }
        })
    }

    async fn run_process(
        &self,
        node: CommandNode,
        level: i32,
        parent: Option<NodeId>,
    ) -> ScurryResult<()> {
        let CommandNode {
            name,
            package,
            cwd,
            mut sync,
            kind,
        } = node;
        let NodeKind::Process(spec) = kind else {
            return Ok(());
        };

        wait_for_gates(&mut sync).await?;

        // a bare environment capture or a skipped package: nothing to spawn,
        // but dependents must still be released
        if spec.argv.is_empty() {
            fulfil(&sync);
            return Ok(());
        }

        let id = next_node_id();
        let display = spec.argv.join(" ");
        if !self.options.raw {
            self.router
                .started(id, &display, package.as_deref(), level, parent, false);
        }
        let started = Instant::now();

        if self.options.dry_run {
            if !self.options.raw {
                self.router
                    .finished(id, NodeStatus::Success, started.elapsed());
            }
            fulfil(&sync);
            return Ok(());
        }

        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ScurryError::Task("run was shut down".to_string()))?;
        let result = self.process.run(id, &name, &spec, cwd.as_deref()).await;
        drop(permit);

        match result {
            Ok(outcome) => {
                if !self.options.raw {
                    self.router.finished(id, outcome.status, outcome.elapsed);
                }
                fulfil(&sync);
                Ok(())
            }
            Err(e) => {
                if !self.options.raw {
                    self.router
                        .finished(id, NodeStatus::Error, started.elapsed());
                }
                Err(e)
            }
        }
    }

    async fn run_group(
        &self,
        node: CommandNode,
        ctx: &Arc<RunContext>,
        level: i32,
        parent: Option<NodeId>,
    ) -> ScurryResult<()> {
        let CommandNode {
            name,
            package,
            cwd,
            mut sync,
            kind,
        } = node;
        let NodeKind::Group(group) = kind else {
            return Ok(());
        };

        // build scripts decide on changes before waiting on anything, so the
        // decision reflects the state this run started from
        let is_build_script = group.script && name == ctx.build_command;
        let pending_build = if is_build_script {
            let dir = cwd.clone().unwrap_or_else(|| ctx.workspace.root.clone());
            ChangeDetector::new(Arc::clone(&self.cache))
                .needs_build(&dir, &ctx.workspace, self.options.rebuild)
                .await?
        } else {
            None
        };

        wait_for_gates(&mut sync).await?;

        let id = next_node_id();
        let show = group.script && level >= 0 && !self.options.raw;
        if show {
            self.router
                .started(id, &name, package.as_deref(), level, parent, true);
        }
        let started = Instant::now();
        if is_build_script {
            self.report_changes(id, pending_build.as_ref());
        }

        let child_parent = if show { Some(id) } else { parent };
        let result = if !is_build_script || pending_build.is_some() {
            self.run_children(group, ctx, level, child_parent).await
        } else {
            Ok(())
        };

        if let Err(e) = result {
            if show {
                self.router
                    .finished(id, NodeStatus::Error, started.elapsed());
            }
            return Err(e);
        }

        if show {
            self.router
                .finished(id, NodeStatus::Success, started.elapsed());
        }
        fulfil(&sync);

        if !self.options.dry_run {
            if let Some(pending) = pending_build {
                pending.commit(&ctx.workspace).await?;
            }
        }
        Ok(())
    }

    async fn run_children(
        &self,
        group: GroupSpec,
        ctx: &Arc<RunContext>,
        level: i32,
        parent: Option<NodeId>,
    ) -> ScurryResult<()> {
        let concurrent = group.concurrent;
        let mut pending: Vec<JoinHandle<ScurryResult<()>>> = Vec::new();
        for child in group.children {
            if child.is_post_script() {
                settle(&mut pending).await?;
            }
            let inline = !concurrent || child.is_pre_script();
            let fut = self.run_node(child, ctx, level + 1, parent);
            if inline {
                fut.await?;
            } else {
                pending.push(tokio::spawn(fut));
                if pending.len() >= self.options.concurrency {
                    settle(&mut pending).await?;
                }
            }
        }
        settle(&mut pending).await
    }

    fn report_changes(&self, id: NodeId, pending: Option<&PendingBuild>) {
        match pending {
            None => self.router.line(id, "No changes. Skipping build..."),
            Some(pending) if !pending.is_git_repo => {
                self.router.line(
                    id,
                    format!(
                        "{} Not a Git repository, so build change detection is disabled. Forcing full rebuild.",
                        "warning".red()
                    ),
                );
            }
            Some(pending) => {
                self.router.line(id, "changes:".blue().to_string());
                for change in &pending.changes {
                    let symbol = match change.kind {
                        ChangeKind::Added => "+".green(),
                        ChangeKind::Deleted => "-".red(),
                        ChangeKind::Modified => "~".yellow(),
                    };
                    self.router.line(id, format!("  {} {}", symbol, change.path));
                }
            }
        }
    }
}

async fn wait_for_gates(sync: &mut NodeSync) -> ScurryResult<()> {
    for (name, waiter) in &mut sync.gates {
        if waiter.wait_for(|done| *done).await.is_err() {
            return Err(ScurryError::Task(format!(
                "Dependency '{}' was interrupted before completing",
                name
            )));
        }
    }
    Ok(())
}

fn fulfil(sync: &NodeSync) {
    if let Some(done) = &sync.done {
        let _ = done.send(true);
    }
}

/// Wait for every spawned child of the oldest batch; the first error wins
/// and later handles are left to settle detached
async fn settle(pending: &mut Vec<JoinHandle<ScurryResult<()>>>) -> ScurryResult<()> {
    let handles: Vec<_> = pending.drain(..).collect();
    futures::future::try_join_all(handles.into_iter().map(flatten)).await?;
    Ok(())
}

async fn flatten(handle: JoinHandle<ScurryResult<()>>) -> ScurryResult<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(ScurryError::Task(format!("runner task failed: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputEvent;
    use serde_json::json;
    use std::path::Path;
    use std::process::Command;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn write_manifest(dir: &Path, body: serde_json::Value) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("package.json"), body.to_string()).unwrap();
    }

    fn git_init(root: &Path) {
        let status = Command::new("git")
            .args(["init", "-q"])
            .current_dir(root)
            .status()
            .expect("git must be installed for this test");
        assert!(status.success(), "git init failed");
    }

    fn runner_at(
        cwd: &Path,
        configure: impl FnOnce(&mut RunnerOptions),
    ) -> (Runner, UnboundedReceiver<OutputEvent>) {
        let mut options = RunnerOptions {
            cwd: Some(cwd.to_path_buf()),
            silent: true,
            ..RunnerOptions::default()
        };
        configure(&mut options);
        let (router, events) = OutputRouter::channel();
        let runner = Runner::new(
            options,
            router,
            Arc::new(ProcessRegistry::new()),
            Arc::new(SnapshotCache::new()),
        );
        (runner, events)
    }

    fn drain_events(events: &mut UnboundedReceiver<OutputEvent>) -> Vec<OutputEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_concurrency_limit_batches_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_manifest(root, json!({ "name": "root", "workspaces": ["packages/*"] }));
        for name in ["p1", "p2", "p3", "p4"] {
            write_manifest(
                &root.join("packages").join(name),
                json!({ "name": name, "scripts": { "go": "sleep 0.3" } }),
            );
        }

        let (runner, _events) = runner_at(root, |options| options.concurrency = 2);
        let started = Instant::now();
        runner.run_recursive("go").await.unwrap();
        let elapsed = started.elapsed();

        // four 300ms sleeps, two at a time: two batches
        assert!(elapsed >= Duration::from_millis(550), "too parallel: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1150), "too sequential: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_concurrency_zero_clamps_to_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_manifest(root, json!({ "name": "root", "workspaces": ["packages/*"] }));
        for name in ["p1", "p2"] {
            write_manifest(
                &root.join("packages").join(name),
                json!({ "name": name, "scripts": { "go": "sleep 0.25" } }),
            );
        }

        let (runner, _events) = runner_at(root, |options| options.concurrency = 0);
        let started = Instant::now();
        runner.run_recursive("go").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(480));
    }

    #[tokio::test]
    async fn test_dependents_wait_for_their_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let flag = root.join("a-done");
        write_manifest(root, json!({ "name": "root", "workspaces": ["packages/*"] }));
        write_manifest(
            &root.join("packages/a"),
            json!({
                "name": "a",
                "scripts": { "go": format!("sh -c 'sleep 0.3; touch {}'", flag.display()) }
            }),
        );
        write_manifest(
            &root.join("packages/b"),
            json!({
                "name": "b",
                "dependencies": { "a": "*" },
                "scripts": { "go": format!("test -f {}", flag.display()) }
            }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        runner.run_recursive("go").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_dependency_interrupts_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let marker = root.join("b-ran");
        write_manifest(root, json!({ "name": "root", "workspaces": ["packages/*"] }));
        write_manifest(
            &root.join("packages/a"),
            json!({ "name": "a", "scripts": { "go": "false" } }),
        );
        write_manifest(
            &root.join("packages/b"),
            json!({
                "name": "b",
                "dependencies": { "a": "*" },
                "scripts": { "go": format!("touch {}", marker.display()) }
            }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        let err = runner.run_recursive("go").await.unwrap_err().to_string();
        assert!(err.contains("exit code 1"), "{}", err);

        // the gated package settles without ever spawning its command
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_sequential_groups_stop_at_the_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let after = root.join("after");
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": { "go": format!("false && touch {}", after.display()) }
            }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        assert!(runner.run("go").await.is_err());
        assert!(!after.exists());
    }

    #[tokio::test]
    async fn test_pre_scripts_gate_concurrent_groups() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let pre_flag = root.join("pre-done");
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": {
                    "go": format!("test -f {}", pre_flag.display()),
                    "prego": format!("sh -c 'sleep 0.25; touch {}'", pre_flag.display())
                },
                "scurry": { "concurrent": ["go"] }
            }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        runner.run("go").await.unwrap();
    }

    #[tokio::test]
    async fn test_post_scripts_wait_for_all_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let main_flag = root.join("main-done");
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": {
                    "go": format!("sh -c 'sleep 0.25; touch {}'", main_flag.display()),
                    "postgo": format!("test -f {}", main_flag.display())
                },
                "scurry": { "concurrent": ["go"] }
            }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        runner.run("go").await.unwrap();
    }

    #[tokio::test]
    async fn test_build_scripts_skip_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let root = dir.path();
        let log = out.path().join("log");
        git_init(root);
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": { "build": format!("sh -c 'echo x >> {}'", log.display()) }
            }),
        );
        std::fs::write(root.join("src.txt"), "source").unwrap();

        let build_count = |log: &Path| -> usize {
            std::fs::read_to_string(log)
                .map(|text| text.lines().count())
                .unwrap_or(0)
        };

        let (runner, _events) = runner_at(root, |_| {});
        runner.run("build").await.unwrap();
        assert_eq!(build_count(&log), 1);

        // fresh runner, nothing changed: the build is skipped but succeeds
        let (runner, _events) = runner_at(root, |_| {});
        runner.run("build").await.unwrap();
        assert_eq!(build_count(&log), 1);

        // rebuild ignores the snapshot
        let (runner, _events) = runner_at(root, |options| options.rebuild = true);
        runner.run("build").await.unwrap();
        assert_eq!(build_count(&log), 2);
    }

    #[tokio::test]
    async fn test_dry_run_previews_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let root = dir.path();
        let log = out.path().join("log");
        git_init(root);
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": { "build": format!("sh -c 'echo x >> {}'", log.display()) }
            }),
        );

        let (runner, mut events) = runner_at(root, |options| options.dry_run = true);
        runner.run("build").await.unwrap();

        assert!(!log.exists());
        assert!(!root.join(crate::changes::SNAPSHOT_FILE).exists());
        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|event| matches!(event, OutputEvent::Started { name, .. } if name == "build")));
    }

    #[tokio::test]
    async fn test_single_run_executes_plain_commands() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_manifest(root, json!({ "name": "solo" }));

        let (runner, mut events) = runner_at(root, |_| {});
        runner.run("echo direct").await.unwrap();

        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|event| matches!(event, OutputEvent::Line { line, .. } if line == "direct")));
    }

    #[tokio::test]
    async fn test_env_captures_flow_into_script_children() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_manifest(
            root,
            json!({
                "name": "solo",
                "scripts": { "show": "sh -c 'echo mode=$MODE'" }
            }),
        );

        let (runner, mut events) = runner_at(root, |_| {});
        runner.run("MODE=fast show").await.unwrap();

        let events = drain_events(&mut events);
        assert!(events
            .iter()
            .any(|event| matches!(event, OutputEvent::Line { line, .. } if line == "mode=fast")));
    }

    #[tokio::test]
    async fn test_list_and_info_describe_the_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_manifest(root, json!({ "name": "root", "workspaces": ["packages/*"] }));
        write_manifest(
            &root.join("packages/a"),
            json!({ "name": "a", "scripts": { "build": "tsc", "test": "jest" } }),
        );
        write_manifest(
            &root.join("packages/b"),
            json!({ "name": "b", "dependencies": { "a": "*" } }),
        );

        let (runner, _events) = runner_at(root, |_| {});
        let listings = runner.list().unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "a");
        assert_eq!(listings[0].scripts, vec!["build", "test"]);
        assert_eq!(listings[1].path, "packages/b");

        let info = runner.info().unwrap();
        assert_eq!(info.package_manager, "npm");
        assert!(info.dependency_cycles.is_empty());
        let b = info
            .packages
            .iter()
            .find(|pkg| pkg.name == "b")
            .expect("b listed");
        assert_eq!(b.dependencies, vec!["a"]);
    }
}
