use std::io;
use std::path::PathBuf;

/// Every way setup or teardown can fail. Each variant names the operation.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("fstat {path}: {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("mmap {path}: {source}")]
    Map { path: PathBuf, source: io::Error },

    #[error("empty mapping {path}: nothing to probe")]
    EmptyMapping { path: PathBuf },

    #[error("mlock {path}: {source}")]
    Pin { path: PathBuf, source: io::Error },

    #[error("munlock {path}: {source}")]
    Unpin { path: PathBuf, source: io::Error },

    #[error("{tool}: {reason}")]
    Tool { tool: String, reason: String },

    #[error("cpu frequency: {0}")]
    Frequency(String),

    #[error("write {path}: {source}")]
    Output { path: PathBuf, source: io::Error },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
