use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the pipeline. Every variant is local to one stage or
/// one artifact; none of them aborts the orchestrator.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("[{stage}] '{binary}' binary not found")]
    ToolNotFound { stage: String, binary: String },

    #[error("[{stage}] launch failed: {reason}")]
    LaunchFailed { stage: String, reason: String },

    #[error("[{stage}] timed out after {secs}s")]
    TimedOut { stage: String, secs: u64 },

    #[error("failed to parse {}: {reason}", path.display())]
    ParseError { path: PathBuf, reason: String },

    #[error("failed to read producer {}: {source}", path.display())]
    MergeIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReconError>;
