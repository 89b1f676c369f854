//! Model store error types.
//!
//! Startup treats every [`BootstrapError`] as fatal. [`FetchError`] is the
//! registry-side failure and is always kept as the `source` of
//! [`BootstrapError::Fetch`].

use std::path::PathBuf;

use thiserror::Error;

/// Boxed source error from the registry client.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from a snapshot fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The registry client could not be constructed.
    #[error("registry client init failed: {source}")]
    Client {
        /// Underlying client error.
        source: BoxError,
    },

    /// Listing the repository failed (not found, unauthorized, network).
    #[error("could not list files of `{repo_id}`: {source}")]
    Listing {
        /// Repository that was queried.
        repo_id: String,
        /// Underlying client error.
        source: BoxError,
    },

    /// A single file failed to download.
    #[error("download failed for `{file}`: {source}")]
    Download {
        /// Repository-relative filename.
        file: String,
        /// Underlying client error.
        source: BoxError,
    },

    /// An allow-pattern is not a valid glob.
    #[error("invalid allow pattern `{pattern}`: {source}")]
    Pattern {
        /// The offending pattern.
        pattern: String,
        /// Glob parse error.
        source: globset::Error,
    },

    /// Writing into the local directory failed.
    #[error("failed to write {}: {source}", path.display())]
    Io {
        /// Destination path.
        path: PathBuf,
        /// I/O error.
        source: std::io::Error,
    },
}

/// Errors from [`ensure_ready`](crate::ensure_ready).
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The store root could not be created.
    #[error("cannot create model store root {}: {source}", path.display())]
    CreateRoot {
        /// Store root.
        path: PathBuf,
        /// I/O error.
        source: std::io::Error,
    },

    /// Artifacts are required locally but absent, and downloading is off.
    #[error("model artifacts missing in {} and download is disabled", repo_dir.display())]
    ArtifactsMissing {
        /// Directory that was checked.
        repo_dir: PathBuf,
    },

    /// The snapshot fetch failed.
    #[error("snapshot fetch of `{repo_id}` into {} failed", repo_dir.display())]
    Fetch {
        /// Repository that was fetched.
        repo_id: String,
        /// Destination directory.
        repo_dir: PathBuf,
        /// What went wrong.
        #[source]
        source: FetchError,
    },

    /// The fetch reported success but the expected artifacts are still absent.
    #[error("download completed but model artifacts missing in {}", repo_dir.display())]
    EmptyAfterFetch {
        /// Directory that was checked.
        repo_dir: PathBuf,
    },

    /// The blocking fetch task panicked or was cancelled.
    #[error("snapshot task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
