use std::io;
use std::path::PathBuf;

use crate::diagnostics;

/// Errors surfaced by the environment index and its lock.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("[VX800] failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("[VX801] failed to encode environment record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("[VX802] environment {env_path} is already indexed")]
    DuplicateEnv { env_path: String },
    #[error("[VX810] failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "[VX811] advisory locks are not supported for {}; set VX_LOCK_STRATEGY=exclusive-create",
        path.display()
    )]
    LockUnsupported { path: PathBuf },
    #[error("[VX820] failed to format usage timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}

impl CacheError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => diagnostics::cache::IO_FAILURE,
            Self::Encode(_) => diagnostics::cache::ENCODE_FAILURE,
            Self::DuplicateEnv { .. } => diagnostics::cache::DUPLICATE_ENV,
            Self::Lock { .. } => diagnostics::cache::LOCK_FAILURE,
            Self::LockUnsupported { .. } => diagnostics::cache::LOCK_UNSUPPORTED,
            Self::Timestamp(_) => diagnostics::cache::TIMESTAMP_FAILURE,
        }
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
