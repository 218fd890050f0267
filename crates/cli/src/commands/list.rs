use std::sync::Arc;

use anyhow::Result;
use colored::*;
use scurry_core::execution::{ProcessRegistry, Runner, RunnerOptions};
use scurry_core::git::SnapshotCache;
use scurry_core::output::OutputRouter;

pub fn execute(filter: Option<String>, root: bool) -> Result<()> {
    let options = RunnerOptions {
        filter,
        root,
        ..Default::default()
    };
    let (router, _events) = OutputRouter::channel();
    let runner = Runner::new(
        options,
        router,
        Arc::new(ProcessRegistry::new()),
        Arc::new(SnapshotCache::new()),
    );
    let listings = runner.list()?;

    if listings.is_empty() {
        println!("  {}", "No packages found".dimmed());
        return Ok(());
    }

    for (counter, listing) in listings.iter().enumerate() {
        println!(
            "{} {} {} {}",
            format!(" {} ", counter).bright_cyan().on_bright_black(),
            listing.name.green().bold(),
            "at".dimmed(),
            listing.path.blue()
        );
        for script in &listing.scripts {
            println!("   {} {}", "❯".dimmed(), script);
        }
    }

    Ok(())
}
