//! Resolver implementations.
//!
//! - [`python`]: a persistent Python worker introspecting the live environment.
//! - [`table`]: a JSON lookup table, for offline serving and tests.

use thiserror::Error;

pub mod python;
pub mod table;

pub use python::{PythonEmbedder, PythonResolver, PythonWorker};
pub use table::{Table, TableError, TableResolver};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker exited unexpectedly")]
    Closed,
    #[error("malformed worker message: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("worker error: {0}")]
    Remote(String),
}
