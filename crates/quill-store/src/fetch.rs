//! Snapshot fetching from the model registry.
//!
//! [`SnapshotFetcher`] is synchronous: the registry client does blocking HTTP,
//! so callers run it on `spawn_blocking`.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use tracing::{debug, info};

use crate::errors::FetchError;
use crate::layout::partial_path;

/// Everything a fetch needs, built once from settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Registry repository, e.g. `org/name`.
    pub repo_id: String,
    /// Directory the files are materialised into.
    pub local_dir: PathBuf,
    /// Registry download cache. On the same filesystem as `local_dir`,
    /// artifacts are hard-linked out of it rather than copied.
    pub cache_dir: PathBuf,
    /// fnmatch-style patterns; empty means every file.
    pub allow_patterns: Vec<String>,
    /// Access token for gated repositories.
    pub token: Option<String>,
    /// Re-download even when the file is already cached.
    pub force_download: bool,
}

/// Materialises a repository snapshot into a local directory.
pub trait SnapshotFetcher: Send + Sync {
    /// Fetch the snapshot and return the number of files written.
    fn fetch(&self, request: &SnapshotRequest) -> Result<usize, FetchError>;
}

/// Fetcher backed by the Hugging Face Hub.
///
/// Files land in [`SnapshotRequest::cache_dir`] first and are then placed
/// into [`SnapshotRequest::local_dir`] under their repository-relative paths.
/// Placement goes through a `.incomplete` staging file and a rename, so an
/// interrupted fetch never leaves a truncated artifact under its final name.
#[derive(Debug, Default)]
pub struct HubFetcher;

impl SnapshotFetcher for HubFetcher {
    fn fetch(&self, request: &SnapshotRequest) -> Result<usize, FetchError> {
        let allow = allow_set(&request.allow_patterns)?;
        let api = ApiBuilder::new()
            .with_progress(false)
            .with_cache_dir(request.cache_dir.clone())
            .with_token(request.token.clone())
            .build()
            .map_err(|e| FetchError::Client { source: e.into() })?;
        let repo = api.model(request.repo_id.clone());

        let listing = repo.info().map_err(|e| FetchError::Listing {
            repo_id: request.repo_id.clone(),
            source: e.into(),
        })?;
        let files: Vec<String> = listing
            .siblings
            .into_iter()
            .map(|sibling| sibling.rfilename)
            .filter(|name| allow.as_ref().is_none_or(|set| set.is_match(name)))
            .collect();
        info!(
            repo_id = %request.repo_id,
            files = files.len(),
            force = request.force_download,
            "fetching snapshot"
        );

        let mut written = 0;
        for file in &files {
            if fetch_file(&repo, file, &request.local_dir, request.force_download)? {
                written += 1;
            }
        }
        info!(repo_id = %request.repo_id, written, dir = %request.local_dir.display(), "snapshot ready");
        Ok(written)
    }
}

/// Compile allow-patterns. `None` means no filtering.
fn allow_set(patterns: &[String]) -> Result<Option<GlobSet>, FetchError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| FetchError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        let _ = builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|source| FetchError::Pattern {
            pattern: patterns.join(","),
            source,
        })
}

/// Download one file and place it. Returns whether it was written.
fn fetch_file(repo: &ApiRepo, file: &str, local_dir: &Path, force: bool) -> Result<bool, FetchError> {
    let target = local_dir.join(file);
    if target.is_file() && !force {
        debug!(file, "skipping (already present)");
        return Ok(false);
    }

    let fetched = if force {
        repo.download(file)
    } else {
        repo.get(file)
    };
    let cached = fetched.map_err(|e| FetchError::Download {
        file: file.to_string(),
        source: e.into(),
    })?;

    place_file(&cached, &target)?;
    debug!(file, "downloaded");
    Ok(true)
}

/// Materialise `source` at `target` atomically.
///
/// The cache entry is usually a symlink into the blob store, so it is
/// resolved first. A hard link is tried before falling back to a copy.
fn place_file(source: &Path, target: &Path) -> Result<(), FetchError> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let source = std::fs::canonicalize(source).map_err(io_error(source))?;
    if std::fs::canonicalize(target).is_ok_and(|existing| existing == source) {
        return Ok(());
    }

    let staging = partial_path(target);
    match std::fs::remove_file(&staging) {
        Ok(()) => debug!(path = %staging.display(), "removed stale partial file"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(io_error(&staging)(error)),
    }

    if let Err(error) = std::fs::hard_link(&source, &staging) {
        debug!(%error, "hard link failed, copying");
        let _ = std::fs::copy(&source, &staging).map_err(io_error(&staging))?;
    }
    std::fs::rename(&staging, target).map_err(io_error(target))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FetchError + use<> {
    let path = path.to_path_buf();
    move |source| FetchError::Io { path, source }
}
