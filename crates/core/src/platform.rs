//! Platform detection utilities for cross-platform binary resolution

use std::env;

/// File names a package binary shim may have, in probe order
#[derive(Debug, Clone)]
pub struct BinShim {
    /// Candidate file names inside a `node_modules/.bin` directory
    pub candidates: Vec<String>,
}

impl BinShim {
    /// Candidate names for the running platform
    pub fn current(bin: &str) -> Self {
        Self::from_os(env::consts::OS, bin)
    }

    /// Candidate names for an OS string as reported by `std::env::consts::OS`
    pub fn from_os(os: &str, bin: &str) -> Self {
        match os {
            // package managers install .cmd / .exe wrappers next to the shim
            "windows" => Self {
                candidates: vec![
                    format!("{}.cmd", bin),
                    format!("{}.exe", bin),
                    bin.to_string(),
                ],
            },
            _ => Self {
                candidates: vec![bin.to_string()],
            },
        }
    }
}
