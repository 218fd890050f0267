use std::path::PathBuf;

use thiserror::Error;

/// The main error type for scurry operations
#[derive(Debug, Error)]
pub enum ScurryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Task error: {0}")]
    Task(String),

    /// A spawned command exited with a non-zero status. `output` carries the
    /// buffered transcript when the run was silent, otherwise it is empty.
    #[error("{output}Command '{name}' failed with exit code {code}")]
    ProcessFailed {
        name: String,
        code: i32,
        output: String,
    },

    /// The command could not be launched at all.
    #[error("Command '{name}' failed with {source}. Is the command on your path?")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The directory is not inside a git work tree. Callers treat this as a
    /// degraded mode, not a fatal error.
    #[error("Not a git repository: {0}")]
    NoGitRepository(PathBuf),
}

/// Result type alias for scurry operations
pub type ScurryResult<T> = Result<T, ScurryError>;
