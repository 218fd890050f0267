//! From a filtered workspace to one runnable tree.
//!
//! Each selected package contributes one child to a concurrent root group.
//! Packages defining the invoked script expand through the parser; packages
//! without it still get a placeholder node so their completion signal exists
//! and dependents are released. Direct dependencies inside the selection are
//! wired as gates on the dependent's node; dependencies outside it are not
//! waited for.

use std::collections::HashMap;

use crate::command::{completion_signal, CommandNode, DoneWaiter, GroupSpec, ProcessSpec};
use crate::parser::{split_words, CommandParser};
use crate::workspace::{Package, Workspace};

/// Build the cross-package execution tree for `cmd`
pub fn build_workspace_plan(
    workspace: &Workspace,
    packages: &[&Package],
    cmd: &str,
) -> CommandNode {
    let words = split_words(cmd);
    let script = words.first().cloned().unwrap_or_default();
    let extra = words.get(1..).unwrap_or(&[]);

    let mut signals: HashMap<&str, DoneWaiter> = HashMap::new();
    let mut nodes = Vec::new();
    for pkg in packages {
        let mut node = if !script.is_empty() && pkg.has_script(&script) {
            CommandParser::new(pkg).script_node(&script, extra)
        } else {
            placeholder(pkg, &script)
        };
        let (done, waiter) = completion_signal();
        node.sync.done = Some(done);
        signals.insert(pkg.name.as_str(), waiter);
        nodes.push(node);
    }

    // gates can only be wired once every signal exists
    for (node, pkg) in nodes.iter_mut().zip(packages.iter()) {
        for dep in workspace.direct_dependencies_of(&pkg.name) {
            if let Some(waiter) = signals.get(dep) {
                node.sync.gates.push((dep.to_string(), waiter.clone()));
            }
        }
    }

    let mut root = CommandNode::group(
        cmd.trim(),
        GroupSpec {
            children: nodes,
            concurrent: true,
            script: false,
        },
    );
    root.cwd = Some(workspace.root.clone());
    root
}

/// A package that lacks the script still completes, so dependents can start
fn placeholder(pkg: &Package, script: &str) -> CommandNode {
    let mut node = CommandNode::process(script, ProcessSpec::default());
    node.package = Some(pkg.name.clone());
    node.cwd = Some(pkg.root.clone());
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::NodeKind;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn package(name: &str, deps: &[&str], scripts: &[(&str, &str)]) -> Package {
        Package {
            name: name.to_string(),
            root: PathBuf::from("/ws").join(name),
            scripts: scripts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            dependencies: deps
                .iter()
                .map(|d| (d.to_string(), "*".to_string()))
                .collect(),
            dev_dependencies: BTreeMap::new(),
            concurrent_scripts: Vec::new(),
        }
    }

    fn demo_workspace() -> Workspace {
        Workspace::from_packages(
            PathBuf::from("/ws"),
            vec![
                package("a", &[], &[("build", "tsc")]),
                package("b", &["a"], &[("build", "tsc")]),
            ],
        )
    }

    fn gate_names(node: &CommandNode) -> Vec<&str> {
        node.sync.gates.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[test]
    fn test_gates_follow_direct_dependencies() {
        let ws = demo_workspace();
        let selected = ws.filter_packages(None, &ws.root).unwrap();
        let plan = build_workspace_plan(&ws, &selected, "build");

        assert!(matches!(&plan.kind, NodeKind::Group(g) if g.concurrent));
        let children = plan.children();
        assert_eq!(children.len(), 2);

        // topological order puts the dependency first
        assert_eq!(children[0].package.as_deref(), Some("a"));
        assert!(gate_names(&children[0]).is_empty());
        assert_eq!(gate_names(&children[1]), vec!["a"]);

        for child in children {
            assert!(child.sync.done.is_some());
        }
    }

    #[test]
    fn test_dependencies_outside_the_selection_are_not_gated() {
        let ws = demo_workspace();
        let selected = ws.filter_packages(Some("b"), &ws.root).unwrap();
        let plan = build_workspace_plan(&ws, &selected, "build");

        assert_eq!(plan.children().len(), 1);
        assert!(gate_names(&plan.children()[0]).is_empty());
    }

    #[test]
    fn test_missing_script_becomes_a_placeholder() {
        let ws = Workspace::from_packages(
            PathBuf::from("/ws"),
            vec![
                package("lib", &[], &[]),
                package("app", &["lib"], &[("build", "tsc")]),
            ],
        );
        let selected = ws.filter_packages(None, &ws.root).unwrap();
        let plan = build_workspace_plan(&ws, &selected, "build");

        let lib = &plan.children()[0];
        assert_eq!(lib.package.as_deref(), Some("lib"));
        match &lib.kind {
            NodeKind::Process(spec) => assert!(spec.argv.is_empty()),
            other => panic!("expected placeholder process, got {:?}", other),
        }
        assert!(lib.sync.done.is_some());
    }

    #[test]
    fn test_extra_arguments_reach_the_script_body() {
        let ws = demo_workspace();
        let selected = ws.filter_packages(Some("a"), &ws.root).unwrap();
        let plan = build_workspace_plan(&ws, &selected, "build --watch");

        let script = &plan.children()[0];
        assert!(script.is_script_group());
        match &script.children()[0].kind {
            NodeKind::Process(spec) => {
                assert_eq!(spec.argv, vec!["tsc".to_string(), "--watch".to_string()]);
            }
            other => panic!("expected process, got {:?}", other),
        }
    }
}
