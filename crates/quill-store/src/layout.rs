//! On-disk layout of the model store.
//!
//! ```text
//! <root>/
//!   .model_store_ready          advisory, zero bytes
//!   .hub_cache/                 registry download cache
//!   <org>--<name>/              one directory per repository
//!     config.json
//!     model-00001-of-00002.safetensors
//!     model-00002-of-00002.safetensors.incomplete   interrupted, ignored
//! ```
//!
//! Readiness is always decided by looking at the files, never by the marker.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use globset::GlobBuilder;
use quill_settings::Settings;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Name of the advisory readiness marker inside the store root.
pub const READY_MARKER: &str = ".model_store_ready";

/// Registry cache directory inside the store root. Keeping it on the same
/// filesystem lets artifacts be hard-linked instead of copied.
pub const HUB_CACHE_DIR: &str = ".hub_cache";

/// Suffix of a file still being written. Such files are never artifacts.
pub const PARTIAL_SUFFIX: &str = ".incomplete";

/// Absolute store root.
pub fn store_root(settings: &Settings) -> PathBuf {
    let root = &settings.model_store_dir;
    std::path::absolute(root).unwrap_or_else(|_| root.clone())
}

/// Directory holding the artifacts of the configured repository.
pub fn resolve_repo_dir(settings: &Settings) -> PathBuf {
    repo_dir_under(&store_root(settings), &settings.model_repo_id)
}

pub(crate) fn repo_dir_under(root: &Path, repo_id: &str) -> PathBuf {
    root.join(repo_id.replace('/', "--"))
}

/// Staging path for `target` while it is being written.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Whether the expected artifacts exist under `repo_dir`.
///
/// With no pattern any regular file counts. With a pattern, see
/// [`find_model_file`].
pub fn has_expected_artifacts(repo_dir: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pattern) => find_model_file(repo_dir, pattern).is_some(),
        None => files_under(repo_dir).next().is_some(),
    }
}

/// Locate the first artifact matching `pattern`.
///
/// A pattern without wildcards is first tried as an exact relative path.
/// Otherwise (or if that misses) the whole tree is searched with `**/{pattern}`
/// and the lexicographically first match wins.
pub fn find_model_file(repo_dir: &Path, pattern: &str) -> Option<PathBuf> {
    if !pattern.contains(['*', '?', '[']) {
        let exact = repo_dir.join(pattern);
        if exact.is_file() {
            return Some(exact);
        }
    }

    let glob = match GlobBuilder::new(&format!("**/{pattern}"))
        .literal_separator(true)
        .build()
    {
        Ok(glob) => glob.compile_matcher(),
        Err(error) => {
            warn!(pattern, %error, "invalid model filename pattern");
            return None;
        }
    };

    let mut matches: Vec<PathBuf> = files_under(repo_dir)
        .filter(|path| {
            path.strip_prefix(repo_dir)
                .is_ok_and(|relative| glob.is_match(relative))
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}

/// Touch the readiness marker. Failure is logged and otherwise ignored.
pub(crate) fn write_marker(root: &Path) {
    let marker = root.join(READY_MARKER);
    match OpenOptions::new().create(true).append(true).open(&marker) {
        Ok(_) => debug!(marker = %marker.display(), "readiness marker written"),
        Err(error) => warn!(marker = %marker.display(), %error, "could not write readiness marker"),
    }
}

fn files_under(dir: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().ends_with(PARTIAL_SUFFIX))
        .map(walkdir::DirEntry::into_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn repo_dir_replaces_slashes() {
        let settings = Settings {
            model_store_dir: PathBuf::from("/srv/store"),
            model_repo_id: "allenai/olmOCR-2-7B-1025-FP8".into(),
            ..Settings::default()
        };
        assert_eq!(
            resolve_repo_dir(&settings),
            PathBuf::from("/srv/store/allenai--olmOCR-2-7B-1025-FP8")
        );
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let settings = Settings {
            model_store_dir: PathBuf::from("model_store"),
            ..Settings::default()
        };
        assert!(store_root(&settings).is_absolute());
    }

    #[test]
    fn missing_dir_has_no_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!has_expected_artifacts(&tmp.path().join("absent"), None));
    }

    #[test]
    fn empty_dirs_do_not_count() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        assert!(!has_expected_artifacts(tmp.path(), None));
    }

    #[test]
    fn any_nested_file_counts_without_pattern() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("deep/nested/config.json"));
        assert!(has_expected_artifacts(tmp.path(), None));
    }

    #[test]
    fn interrupted_download_is_not_an_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&partial_path(&tmp.path().join("model.safetensors")));
        assert!(!has_expected_artifacts(tmp.path(), None));
        assert!(!has_expected_artifacts(tmp.path(), Some("*.safetensors")));
        assert!(!has_expected_artifacts(tmp.path(), Some("model.safetensors")));
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/store/a/model.safetensors")),
            PathBuf::from("/store/a/model.safetensors.incomplete")
        );
    }

    #[test]
    fn exact_name_match() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("model.safetensors"));
        assert_eq!(
            find_model_file(tmp.path(), "model.safetensors"),
            Some(tmp.path().join("model.safetensors"))
        );
        assert!(find_model_file(tmp.path(), "other.bin").is_none());
    }

    #[test]
    fn plain_name_also_found_nested() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("sub/model.safetensors"));
        assert_eq!(
            find_model_file(tmp.path(), "model.safetensors"),
            Some(tmp.path().join("sub/model.safetensors"))
        );
    }

    #[test]
    fn glob_picks_first_sorted_match() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("model-00002.safetensors"));
        touch(&tmp.path().join("model-00001.safetensors"));
        touch(&tmp.path().join("config.json"));
        assert_eq!(
            find_model_file(tmp.path(), "*.safetensors"),
            Some(tmp.path().join("model-00001.safetensors"))
        );
        assert!(has_expected_artifacts(tmp.path(), Some("*.safetensors")));
        assert!(!has_expected_artifacts(tmp.path(), Some("*.gguf")));
    }

    #[test]
    fn glob_searches_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("weights/fp8/model.safetensors"));
        assert!(find_model_file(tmp.path(), "*.safetensors").is_some());
    }

    #[test]
    fn invalid_glob_matches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("a.bin"));
        assert!(find_model_file(tmp.path(), "[").is_none());
    }

    #[test]
    fn marker_is_created_and_rewritable() {
        let tmp = tempfile::tempdir().unwrap();
        write_marker(tmp.path());
        write_marker(tmp.path());
        let marker = tmp.path().join(READY_MARKER);
        assert!(marker.is_file());
        assert_eq!(fs::metadata(marker).unwrap().len(), 0);
    }

    #[test]
    fn marker_failure_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let not_a_dir = tmp.path().join("file");
        touch(&not_a_dir);
        write_marker(&not_a_dir);
        assert!(!not_a_dir.join(READY_MARKER).exists());
    }
}
