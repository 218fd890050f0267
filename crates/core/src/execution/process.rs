//! Child process supervision.
//!
//! `ProcessRunner` owns the common setup for every spawned command: working
//! directory, environment overlay, stdio wiring, registration with the kill
//! registry, and stream pumping into the output event stream. Executors above
//! it only decide *what* to run and *when*.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Mutex};

use crate::command::ProcessSpec;
use crate::output::{contains_warning, LineAssembler, NodeId, NodeStatus, OutputRouter};
use crate::types::{ScurryError, ScurryResult};

/// Kill switches for every child currently running.
///
/// `kill_all` is idempotent: switches drain on first use and exited children
/// deregister themselves, so late or repeated calls find nothing to do.
pub struct ProcessRegistry {
    switches: Mutex<HashMap<u64, watch::Sender<bool>>>,
    next_key: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> ProcessRegistry {
        ProcessRegistry {
            switches: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(1),
        }
    }

    async fn register(&self) -> (u64, watch::Receiver<bool>) {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        self.switches.lock().await.insert(key, tx);
        (key, rx)
    }

    async fn deregister(&self, key: u64) {
        self.switches.lock().await.remove(&key);
    }

    /// Signal every live child to terminate
    pub async fn kill_all(&self) {
        let mut switches = self.switches.lock().await;
        for (_, switch) in switches.drain() {
            let _ = switch.send(true);
        }
    }

    #[cfg(test)]
    async fn live_count(&self) -> usize {
        self.switches.lock().await.len()
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        ProcessRegistry::new()
    }
}

/// What a finished (zero exit) process left behind
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: NodeStatus,
    pub transcript: String,
    pub elapsed: Duration,
}

/// Spawns one command with consistent wiring and supervises it to exit
#[derive(Clone)]
pub struct ProcessRunner {
    registry: Arc<ProcessRegistry>,
    router: OutputRouter,
    raw: bool,
    silent: bool,
}

impl ProcessRunner {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        router: OutputRouter,
        raw: bool,
        silent: bool,
    ) -> ProcessRunner {
        ProcessRunner {
            registry,
            router,
            raw,
            silent,
        }
    }

    /// Run `spec` to completion. A non-zero exit becomes `ProcessFailed`; a
    /// spawn refusal becomes `SpawnFailed`. Zero exits are classified as
    /// `Warning` when the transcript mentions one.
    pub async fn run(
        &self,
        id: NodeId,
        name: &str,
        spec: &ProcessSpec,
        cwd: Option<&Path>,
    ) -> ScurryResult<ProcessOutcome> {
        let program = match &spec.bin {
            Some(bin) => bin.to_string_lossy().into_owned(),
            None => match spec.argv.first() {
                Some(first) => first.clone(),
                None => {
                    return Ok(ProcessOutcome {
                        status: NodeStatus::Success,
                        transcript: String::new(),
                        elapsed: Duration::ZERO,
                    })
                }
            },
        };

        let mut command = tokio::process::Command::new(&program);
        command.args(spec.argv.iter().skip(1));
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }
        command.kill_on_drop(true);
        if self.raw {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| ScurryError::SpawnFailed {
            name: program_basename(&program),
            source,
        })?;

        let mut pumps = Vec::new();
        if let Some(stream) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_stream(stream, self.router.clone(), id)));
        }
        if let Some(stream) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_stream(stream, self.router.clone(), id)));
        }

        let (key, mut kill_switch) = self.registry.register().await;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_switch.changed() => {
                let _ = child.start_kill();
                child.wait().await
            }
        };
        self.registry.deregister(key).await;
        let status = status?;

        let mut transcript = String::new();
        for pump in pumps {
            if let Ok(part) = pump.await {
                transcript.push_str(&part);
            }
        }
        let elapsed = started.elapsed();

        if status.success() {
            let node_status = if contains_warning(&transcript) {
                NodeStatus::Warning
            } else {
                NodeStatus::Success
            };
            return Ok(ProcessOutcome {
                status: node_status,
                transcript,
                elapsed,
            });
        }

        // live renderers already showed the output; only buried runs need it
        // replayed inside the error text
        let output = if self.silent && !transcript.is_empty() {
            format!("{}\n", transcript.trim_end())
        } else {
            String::new()
        };
        Err(ScurryError::ProcessFailed {
            name: program_basename(name),
            code: status.code().unwrap_or(-1),
            output,
        })
    }
}

/// Read one stdio stream to EOF, emitting assembled lines as events and
/// returning the accumulated transcript
async fn pump_stream<R: AsyncRead + Unpin>(
    mut stream: R,
    router: OutputRouter,
    id: NodeId,
) -> String {
    let mut assembler = LineAssembler::new();
    let mut transcript = String::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                for line in assembler.push(&buf[..n]) {
                    transcript.push_str(&line);
                    transcript.push('\n');
                    router.line(id, line);
                }
            }
        }
    }
    if let Some(tail) = assembler.finish() {
        transcript.push_str(&tail);
        router.chunk(id, tail);
    }
    transcript
}

fn program_basename(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}
