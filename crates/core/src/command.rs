//! Runnable command tree: process leaves, sequential/concurrent groups and
//! the structural separators between them.
//!
//! Cross-package ordering is expressed directly on the nodes: a node owns the
//! receiver ends of the completion signals it must wait for (`gates`) and the
//! sender end of its own completion signal (`done`). The executor awaits the
//! gates before starting the node and fulfils `done` once the node and all of
//! its descendants have settled. A node that fails drops its sender
//! unfulfilled, which downstream waiters observe as an interruption.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::watch;

/// Waiter half of a completion signal
pub type DoneWaiter = watch::Receiver<bool>;
/// Sender half of a completion signal
pub type DoneSignal = watch::Sender<bool>;

/// A fresh, unfulfilled completion signal pair
pub fn completion_signal() -> (DoneSignal, DoneWaiter) {
    watch::channel(false)
}

/// Cross-package synchronization attached to a node
#[derive(Debug, Default)]
pub struct NodeSync {
    /// Completion signals of upstream dependencies, awaited before the node starts
    pub gates: Vec<(String, DoneWaiter)>,
    /// The node's own completion signal
    pub done: Option<DoneSignal>,
}

/// Structural separator between commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Seq,
    And,
    Or,
}

impl OpKind {
    pub fn parse(token: &str) -> Option<OpKind> {
        match token {
            ";" => Some(OpKind::Seq),
            "&&" => Some(OpKind::And),
            "||" => Some(OpKind::Or),
            _ => None,
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            OpKind::Seq => ";",
            OpKind::And => "&&",
            OpKind::Or => "||",
        }
    }
}

/// A single spawnable invocation
#[derive(Debug, Default)]
pub struct ProcessSpec {
    /// Command and arguments; an empty vector makes the node a no-op
    pub argv: Vec<String>,
    /// Environment overrides captured from leading `VAR=value` assignments
    pub env: BTreeMap<String, String>,
    /// Resolved workspace binary path, replaces `argv[0]` when spawning
    pub bin: Option<PathBuf>,
}

/// An ordered list of child nodes
#[derive(Debug, Default)]
pub struct GroupSpec {
    pub children: Vec<CommandNode>,
    /// Children are dispatched in parallel up to the global limit
    pub concurrent: bool,
    /// The group wraps a named manifest script
    pub script: bool,
}

#[derive(Debug)]
pub enum NodeKind {
    Process(ProcessSpec),
    Group(GroupSpec),
    /// Never dispatched
    Op(OpKind),
}

/// One node of the runnable command tree
#[derive(Debug)]
pub struct CommandNode {
    /// Display name; the script name for script groups, `argv[0]` for processes
    pub name: String,
    /// Owning workspace package, when built for one
    pub package: Option<String>,
    /// Working directory for spawned descendants
    pub cwd: Option<PathBuf>,
    pub sync: NodeSync,
    pub kind: NodeKind,
}

impl CommandNode {
    pub fn process(name: impl Into<String>, spec: ProcessSpec) -> CommandNode {
        CommandNode {
            name: name.into(),
            package: None,
            cwd: None,
            sync: NodeSync::default(),
            kind: NodeKind::Process(spec),
        }
    }

    pub fn group(name: impl Into<String>, spec: GroupSpec) -> CommandNode {
        CommandNode {
            name: name.into(),
            package: None,
            cwd: None,
            sync: NodeSync::default(),
            kind: NodeKind::Group(spec),
        }
    }

    pub fn op(kind: OpKind) -> CommandNode {
        CommandNode {
            name: kind.token().to_string(),
            package: None,
            cwd: None,
            sync: NodeSync::default(),
            kind: NodeKind::Op(kind),
        }
    }

    pub fn is_script_group(&self) -> bool {
        matches!(&self.kind, NodeKind::Group(group) if group.script)
    }

    /// `pre`-prefixed scripts run inline even inside a concurrent group
    pub fn is_pre_script(&self) -> bool {
        self.is_script_group() && self.name.starts_with("pre")
    }

    /// `post`-prefixed scripts wait for every prior sibling to settle
    pub fn is_post_script(&self) -> bool {
        self.is_script_group() && self.name.starts_with("post")
    }

    pub fn children(&self) -> &[CommandNode] {
        match &self.kind {
            NodeKind::Group(group) => &group.children,
            _ => &[],
        }
    }
}
