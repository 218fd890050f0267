//! Run output as an event stream.
//!
//! Executors never print. They emit `OutputEvent`s through an `OutputRouter`
//! and the consumer decides presentation, so the same run can feed a colored
//! terminal renderer or a test collector. Process output is assembled into
//! whole lines to keep interleaved packages readable; bytes left unterminated
//! at EOF are flushed as a chunk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use colored::Color;
use tokio::sync::mpsc;

pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique id for one node in one run
pub fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Terminal state of a node. `Warning` is a success whose transcript
/// matched the warning keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub enum OutputEvent {
    Started {
        id: NodeId,
        name: String,
        package: Option<String>,
        level: i32,
        parent: Option<NodeId>,
        /// Whether the node is a named script group rather than a process
        script: bool,
    },
    Line {
        id: NodeId,
        line: String,
    },
    Chunk {
        id: NodeId,
        chunk: String,
    },
    Finished {
        id: NodeId,
        status: NodeStatus,
        elapsed: Duration,
    },
}

/// Cloneable sending half of the run's event stream
#[derive(Clone)]
pub struct OutputRouter {
    sender: mpsc::UnboundedSender<OutputEvent>,
}

impl OutputRouter {
    pub fn channel() -> (OutputRouter, mpsc::UnboundedReceiver<OutputEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (OutputRouter { sender }, receiver)
    }

    /// Delivery is best-effort: a closed consumer must never fail a run
    pub fn emit(&self, event: OutputEvent) {
        let _ = self.sender.send(event);
    }

    pub fn started(
        &self,
        id: NodeId,
        name: &str,
        package: Option<&str>,
        level: i32,
        parent: Option<NodeId>,
        script: bool,
    ) {
        self.emit(OutputEvent::Started {
            id,
            name: name.to_string(),
            package: package.map(ToString::to_string),
            level,
            parent,
            script,
        });
    }

    pub fn line(&self, id: NodeId, line: impl Into<String>) {
        self.emit(OutputEvent::Line {
            id,
            line: line.into(),
        });
    }

    pub fn chunk(&self, id: NodeId, chunk: impl Into<String>) {
        self.emit(OutputEvent::Chunk {
            id,
            chunk: chunk.into(),
        });
    }

    pub fn finished(&self, id: NodeId, status: NodeStatus, elapsed: Duration) {
        self.emit(OutputEvent::Finished {
            id,
            status,
            elapsed,
        });
    }
}

/// Reassembles a byte stream into lines regardless of read boundaries
#[derive(Default)]
pub struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> LineAssembler {
        LineAssembler { buf: Vec::new() }
    }

    /// Feed bytes, returning every completed line with its terminator removed
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is still buffered at EOF
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(tail)
    }
}

/// Post-hoc warning sniffing over a finished transcript
pub fn contains_warning(text: &str) -> bool {
    text.to_ascii_lowercase().contains("warning")
}

const PACKAGE_PALETTE: [Color; 8] = [
    Color::Cyan,
    Color::Magenta,
    Color::Blue,
    Color::Yellow,
    Color::Green,
    Color::BrightCyan,
    Color::BrightMagenta,
    Color::BrightBlue,
];

/// Stable per-name tint for prefixed output
pub fn package_color(name: &str) -> Color {
    let hash = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    PACKAGE_PALETTE[hash % PACKAGE_PALETTE.len()]
}

pub fn format_duration(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{:.3}s", elapsed.as_secs_f64())
    }
}
