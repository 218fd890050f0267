//! Turns run events into terminal output.
//!
//! The runner emits structured events; this module is the only place that
//! decides how they look. Script groups get a `❯ name` heading and a status
//! glyph when they finish, processes get a `$ cmd` line, and captured child
//! output is prefixed with its package name in a stable per-package color.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use colored::*;
use scurry_core::output::{format_duration, package_color, NodeId, NodeStatus, OutputEvent};
use tokio::sync::mpsc::UnboundedReceiver;

struct NodeView {
    name: String,
    package: Option<String>,
    level: i32,
    script: bool,
}

/// Drains the event channel until every sender is gone
pub async fn consume(mut events: UnboundedReceiver<OutputEvent>, silent: bool) {
    let mut nodes: HashMap<NodeId, NodeView> = HashMap::new();
    while let Some(event) = events.recv().await {
        if silent {
            continue;
        }
        match event {
            OutputEvent::Started {
                id,
                name,
                package,
                level,
                script,
                ..
            } => {
                let view = NodeView {
                    name,
                    package,
                    level,
                    script,
                };
                print_started(&view);
                nodes.insert(id, view);
            }
            OutputEvent::Line { id, line } => {
                println!("{}{}", line_prefix(nodes.get(&id)), line);
            }
            OutputEvent::Chunk { id, chunk } => {
                println!("{}{}", line_prefix(nodes.get(&id)), chunk);
            }
            OutputEvent::Finished {
                id,
                status,
                elapsed,
            } => {
                if let Some(view) = nodes.remove(&id) {
                    if view.script {
                        print_finished(&view, status, elapsed);
                    }
                }
            }
        }
    }
}

fn print_started(view: &NodeView) {
    let indent = indent(view.level);
    let package = match view.package.as_deref() {
        Some(name) => format!(" {}", format!("({})", name).dimmed()),
        None => String::new(),
    };
    if view.script {
        println!("{}{} {}{}", indent, "❯".cyan(), view.name.bold(), package);
    } else {
        println!("{}{}{}", indent, format_command(&view.name), package);
    }
}

fn print_finished(view: &NodeView, status: NodeStatus, elapsed: Duration) {
    let glyph = match status {
        NodeStatus::Success => "✓".green().bold(),
        NodeStatus::Warning => "⚠".yellow().bold(),
        NodeStatus::Error => "✖".red().bold(),
    };
    println!(
        "{}{} {} {}",
        indent(view.level),
        glyph,
        view.name,
        format_duration(elapsed).dimmed()
    );
}

fn indent(level: i32) -> String {
    "  ".repeat(level.max(0) as usize)
}

/// Captured child output carries its package name as a colored prefix, so
/// interleaved lines from concurrent packages stay attributable
fn line_prefix(view: Option<&NodeView>) -> String {
    match view.and_then(|v| v.package.as_deref()) {
        Some(package) => format!("{} ", format!("{}:", package).color(package_color(package))),
        None => "  ".to_string(),
    }
}

/// `$ cmd` with flags, existing paths and globs tinted
fn format_command(display: &str) -> String {
    let mut words = display.split_whitespace();
    let head = match words.next() {
        Some(word) => word,
        None => return String::new(),
    };
    let mut out = format!("$ {}", head).dimmed().to_string();
    for word in words {
        let painted = if word.starts_with('-') {
            word.cyan().to_string()
        } else if Path::new(word).exists() {
            word.magenta().to_string()
        } else if word.contains('*') {
            word.yellow().to_string()
        } else {
            word.to_string()
        };
        out.push(' ');
        out.push_str(&painted);
    }
    out
}
