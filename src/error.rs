use std::path::PathBuf;

use thiserror::Error;

/// The closed error taxonomy for the BiReUS patch pipeline.
///
/// CLI binaries wrap these in `anyhow::Error` at the top level; internal
/// plumbing propagates `BireusError` directly so callers can match on the
/// specific failure (e.g. to decide whether a checkout left the working
/// tree untouched).
#[derive(Debug, Error)]
pub enum BireusError {
    #[error("download from {url} failed: {cause}")]
    DownloadError { cause: String, url: String },

    #[error("CRC mismatch for {file}: expected {expected}, actual {actual}")]
    CrcMismatch {
        file: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("patch archive protocol {seen} is not supported (supported: {supported})")]
    ProtocolMismatch { seen: u32, supported: u32 },

    #[error("checkout failed: {reason}")]
    CheckoutError { reason: CheckoutErrorReason },

    #[error("invalid strategy config: {0}")]
    InvalidStrategyConfig(String),

    #[error("repository not found at {0}")]
    RepositoryNotFound(PathBuf),

    #[error("invalid repository path: {0}")]
    InvalidRepositoryPath(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutErrorReason {
    UnknownVersion,
    NoPath,
}

impl std::fmt::Display for CheckoutErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutErrorReason::UnknownVersion => write!(f, "unknown_version"),
            CheckoutErrorReason::NoPath => write!(f, "no_path"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BireusError>;
