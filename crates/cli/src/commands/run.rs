use std::sync::Arc;

use anyhow::Result;
use scurry_core::execution::{ProcessRegistry, Runner, RunnerOptions};
use scurry_core::git::SnapshotCache;
use scurry_core::output::OutputRouter;
use scurry_core::types::{ScurryError, ScurryResult};

use crate::render;

pub async fn execute(options: RunnerOptions, cmd: &str, recursive: bool) -> Result<()> {
    let registry = Arc::new(ProcessRegistry::new());
    let cache = Arc::new(SnapshotCache::new());
    let (router, events) = OutputRouter::channel();
    let renderer = tokio::spawn(render::consume(events, options.silent));

    let runner = Runner::new(options, router, Arc::clone(&registry), cache);
    let result = tokio::select! {
        result = dispatch(&runner, cmd, recursive) => result,
        _ = tokio::signal::ctrl_c() => {
            registry.kill_all().await;
            Err(ScurryError::Task("Aborted".to_string()))
        }
    };

    // Dropping the runner closes the last event sender, letting the
    // renderer drain whatever is still queued and exit.
    drop(runner);
    let _ = renderer.await;

    result.map_err(|e| anyhow::anyhow!("{}", e))
}

async fn dispatch(runner: &Runner, cmd: &str, recursive: bool) -> ScurryResult<()> {
    if recursive {
        runner.run_recursive(cmd).await
    } else {
        runner.run(cmd).await
    }
}
