use std::sync::Arc;

use anyhow::Result;
use colored::*;
use scurry_core::execution::{ProcessRegistry, Runner, RunnerOptions};
use scurry_core::git::SnapshotCache;
use scurry_core::output::OutputRouter;

pub fn execute(filter: Option<String>) -> Result<()> {
    let options = RunnerOptions {
        filter,
        ..Default::default()
    };
    let (router, _events) = OutputRouter::channel();
    let runner = Runner::new(
        options,
        router,
        Arc::new(ProcessRegistry::new()),
        Arc::new(SnapshotCache::new()),
    );
    let info = runner.info()?;

    println!(
        "{} {}",
        "Workspace root:".bold(),
        info.root.display().to_string().blue()
    );
    println!(
        "{} {}",
        "Package manager:".bold(),
        info.package_manager.magenta()
    );
    println!();

    for package in &info.packages {
        println!(
            "{} {} {}",
            package.name.green().bold(),
            "at".dimmed(),
            package.path.blue()
        );
        if package.dependencies.is_empty() {
            println!("  {}", "no workspace dependencies".dimmed());
        } else {
            println!(
                "  {} {}",
                "depends on:".dimmed(),
                package.dependencies.join(", ")
            );
        }
    }

    if !info.dependency_cycles.is_empty() {
        let cycles_description = info
            .dependency_cycles
            .iter()
            .map(|cycle| {
                let mut path = cycle.clone();
                if let Some(first) = path.first().cloned() {
                    path.push(first);
                }
                path.join(" -> ")
            })
            .collect::<Vec<_>>()
            .join("; ");

        println!();
        println!(
            "{} {}",
            "Warning:".yellow().bold(),
            format!("Circular dependencies detected: {}", cycles_description).yellow()
        );
    }

    Ok(())
}
