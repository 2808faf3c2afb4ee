//! Error types for the publishing pipeline.

use std::path::PathBuf;

/// Coarse classification of a [`PublishError`], so callers can branch on
/// the kind of failure without matching on payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Different content already lives at a pool path.
    PoolConflict,
    /// A file was expected in the pool but is not there.
    NotInPool,
    /// A Release manifest references an index that was never generated.
    MissingIndexFile,
    /// The external indexer exited unsuccessfully.
    SubprocessFailure,
    /// The archive is over its quota.
    QuotaExceeded,
    /// The run was interrupted by the operator.
    Interrupted,
    /// Bad configuration or invalid input names.
    Configuration,
    /// The publication store failed.
    Store,
    /// The signing collaborator failed.
    Signing,
    /// Filesystem or encoding failure.
    Io,
    /// One or more archives failed in a batch run.
    Batch,
}

/// Errors that can occur while publishing an archive.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Different content already exists at a pool path.
    #[error("{} already exists in the pool with different content", path.display())]
    PoolConflict {
        /// Path of the conflicting pool file.
        path: PathBuf,
    },

    /// A file expected in the pool is missing.
    #[error("{} is not in the pool", path.display())]
    NotInPool {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// A Release manifest references an index file that does not exist.
    #[error("Release for {suite} references {path}, which was never generated")]
    MissingIndexFile {
        /// Suite whose Release was being written.
        suite: String,
        /// Path relative to the suite directory.
        path: String,
    },

    /// One or more indexer invocations exited with a non-zero status.
    #[error("Failure(s) from {command}: {}", describe_failures(.failures))]
    SubprocessFailure {
        /// Program that was run.
        command: String,
        /// `(tag, return code)` for every failing invocation.
        failures: Vec<(String, i32)>,
    },

    /// The archive's pool has grown past its authorized size.
    #[error("Archive {archive} is over quota ({used} of {quota} bytes used)")]
    QuotaExceeded {
        /// Archive name.
        archive: String,
        /// Bytes used in the pool.
        used: u64,
        /// Authorized size in bytes.
        quota: u64,
    },

    /// The run was interrupted.
    #[error("Publication interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Publication store failure.
    #[error("Publication store error: {0}")]
    Store(String),

    /// Signing failure.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisting a temporary file failed.
    #[error("Failed to persist temporary file: {0}")]
    Persist(#[from] tempfile::PersistError),

    /// Index or manifest writing failed.
    #[error(transparent)]
    Repository(#[from] apt_repository::AptRepositoryError),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Directory traversal failed.
    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Some archives in a batch failed to publish.
    #[error("{} archive(s) failed to publish: {}", failures.len(), describe_batch(.failures))]
    Batch {
        /// `(archive name, error message)` for each failed archive.
        failures: Vec<(String, String)>,
    },
}

fn describe_failures(failures: &[(String, i32)]) -> String {
    failures
        .iter()
        .map(|(tag, code)| format!("{} (returned {})", tag, code))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_batch(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(archive, message)| format!("{}: {}", archive, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PublishError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PublishError::PoolConflict { .. } => ErrorKind::PoolConflict,
            PublishError::NotInPool { .. } => ErrorKind::NotInPool,
            PublishError::MissingIndexFile { .. } => ErrorKind::MissingIndexFile,
            PublishError::SubprocessFailure { .. } => ErrorKind::SubprocessFailure,
            PublishError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            PublishError::Interrupted => ErrorKind::Interrupted,
            PublishError::Configuration(_) => ErrorKind::Configuration,
            PublishError::Store(_) => ErrorKind::Store,
            PublishError::Signing(_) => ErrorKind::Signing,
            PublishError::Io(_)
            | PublishError::Persist(_)
            | PublishError::Repository(_)
            | PublishError::Json(_)
            | PublishError::Walk(_) => ErrorKind::Io,
            PublishError::Batch { .. } => ErrorKind::Batch,
        }
    }

    /// Whether this error rejects a single publication rather than aborting
    /// the archive's run.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PoolConflict | ErrorKind::QuotaExceeded
        )
    }
}

/// Result type for publishing operations.
pub type PublishResult<T> = Result<T, PublishError>;
