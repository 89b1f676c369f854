//! Startup guarantee that a usable local snapshot exists.

use std::path::PathBuf;
use std::sync::Arc;

use quill_settings::Settings;
use tracing::{debug, info};

use crate::errors::BootstrapError;
use crate::fetch::{SnapshotFetcher, SnapshotRequest};
use crate::layout::{
    HUB_CACHE_DIR, has_expected_artifacts, repo_dir_under, store_root, write_marker,
};

/// Make sure the configured model snapshot is present on disk.
///
/// Returns the store root when artifacts are (now) present, or `None` when
/// store management is switched off. Safe to re-run: with unchanged settings
/// and no force-refresh, a second call never touches the network.
///
/// Single-writer only. Two processes bootstrapping the same root at once may
/// race on the placement step.
pub async fn ensure_ready(
    settings: &Settings,
    fetcher: Arc<dyn SnapshotFetcher>,
) -> Result<Option<PathBuf>, BootstrapError> {
    let force = settings.model_force_download;
    let auto_download = settings.auto_download_model_store;
    let require_local = settings.require_local_model_store;

    if !(require_local || auto_download || force) {
        debug!("model store management disabled");
        return Ok(None);
    }

    let root = store_root(settings);
    std::fs::create_dir_all(&root).map_err(|source| BootstrapError::CreateRoot {
        path: root.clone(),
        source,
    })?;

    let repo_dir = repo_dir_under(&root, &settings.model_repo_id);
    let pattern = settings.model_filename.as_deref();

    if !force && has_expected_artifacts(&repo_dir, pattern) {
        info!(
            model_repo_id = %settings.model_repo_id,
            dir = %repo_dir.display(),
            "model artifacts present"
        );
        write_marker(&root);
        return Ok(Some(root));
    }

    if !force && !auto_download {
        if require_local {
            return Err(BootstrapError::ArtifactsMissing { repo_dir });
        }
        return Ok(None);
    }

    let request = SnapshotRequest {
        repo_id: settings.model_repo_id.clone(),
        local_dir: repo_dir.clone(),
        cache_dir: root.join(HUB_CACHE_DIR),
        allow_patterns: pattern.map(str::to_string).into_iter().collect(),
        token: settings.hf_token.clone(),
        force_download: force,
    };
    info!(
        model_repo_id = %request.repo_id,
        dir = %repo_dir.display(),
        force,
        "downloading model snapshot"
    );
    let written = tokio::task::spawn_blocking(move || fetcher.fetch(&request))
        .await?
        .map_err(|source| BootstrapError::Fetch {
            repo_id: settings.model_repo_id.clone(),
            repo_dir: repo_dir.clone(),
            source,
        })?;

    if !has_expected_artifacts(&repo_dir, pattern) {
        return Err(BootstrapError::EmptyAfterFetch { repo_dir });
    }

    info!(model_repo_id = %settings.model_repo_id, written, "model snapshot ready");
    write_marker(&root);
    Ok(Some(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::layout::READY_MARKER;
    use assert_matches::assert_matches;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Write(&'static str),
        WriteNothing,
        Fail,
    }

    struct StubFetcher {
        behaviour: Behaviour,
        calls: AtomicUsize,
        last: Mutex<Option<SnapshotRequest>>,
    }

    impl StubFetcher {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_request(&self) -> SnapshotRequest {
            self.last.lock().unwrap().clone().unwrap()
        }
    }

    impl SnapshotFetcher for StubFetcher {
        fn fetch(&self, request: &SnapshotRequest) -> Result<usize, FetchError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request.clone());
            match self.behaviour {
                Behaviour::Write(name) => {
                    let path = request.local_dir.join(name);
                    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                    std::fs::write(path, b"weights").unwrap();
                    Ok(1)
                }
                Behaviour::WriteNothing => Ok(0),
                Behaviour::Fail => Err(FetchError::Listing {
                    repo_id: request.repo_id.clone(),
                    source: "404 Not Found".into(),
                }),
            }
        }
    }

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            model_store_dir: dir.join("store"),
            model_repo_id: "org/model".into(),
            ..Settings::default()
        }
    }

    fn seed(settings: &Settings, name: &str) {
        let path = crate::resolve_repo_dir(settings).join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"weights").unwrap();
    }

    #[tokio::test]
    async fn disabled_store_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            require_local_model_store: false,
            auto_download_model_store: false,
            model_force_download: false,
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::Fail);

        let result = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        assert!(result.is_none());
        assert_eq!(fetcher.calls(), 0);
        assert!(!settings.model_store_dir.exists());
    }

    #[tokio::test]
    async fn interrupted_download_is_fetched_again() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            ..settings_in(tmp.path())
        };
        seed(&settings, "model.safetensors.incomplete");
        let fetcher = StubFetcher::new(Behaviour::Write("model.safetensors"));

        let root = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        assert!(root.is_some());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn present_artifacts_skip_the_network() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            ..settings_in(tmp.path())
        };
        seed(&settings, "config.json");
        let fetcher = StubFetcher::new(Behaviour::Fail);

        let root = ensure_ready(&settings, fetcher.clone()).await.unwrap().unwrap();
        assert_eq!(root, store_root(&settings));
        assert!(root.join(READY_MARKER).is_file());
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn required_but_missing_without_download_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        let fetcher = StubFetcher::new(Behaviour::Write("model.safetensors"));

        let err = ensure_ready(&settings, fetcher.clone()).await.unwrap_err();
        assert_matches!(err, BootstrapError::ArtifactsMissing { repo_dir } if repo_dir.ends_with("org--model"));
        assert_eq!(fetcher.calls(), 0);
        assert!(!store_root(&settings).join(READY_MARKER).exists());
    }

    #[tokio::test]
    async fn second_run_does_not_fetch_again() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::Write("model.safetensors"));

        let first = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        let second = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn force_refresh_always_fetches() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            model_force_download: true,
            ..settings_in(tmp.path())
        };
        seed(&settings, "model.safetensors");
        let fetcher = StubFetcher::new(Behaviour::Write("model.safetensors"));

        let _ = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        let _ = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(fetcher.last_request().force_download);
    }

    #[tokio::test]
    async fn fetch_request_carries_pattern_and_token() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            model_filename: Some("*.safetensors".into()),
            hf_token: Some("hf_secret".into()),
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::Write("fp8/model-00001.safetensors"));

        let root = ensure_ready(&settings, fetcher.clone()).await.unwrap();
        assert!(root.is_some());

        let request = fetcher.last_request();
        assert_eq!(request.repo_id, "org/model");
        assert_eq!(request.local_dir, crate::resolve_repo_dir(&settings));
        assert!(request.cache_dir.starts_with(root.unwrap()));
        assert_eq!(request.allow_patterns, vec!["*.safetensors".to_string()]);
        assert_eq!(request.token.as_deref(), Some("hf_secret"));
        assert!(!request.force_download);
    }

    #[tokio::test]
    async fn pattern_mismatch_after_fetch_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            model_filename: Some("*.gguf".into()),
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::Write("model.safetensors"));

        let err = ensure_ready(&settings, fetcher).await.unwrap_err();
        assert_matches!(err, BootstrapError::EmptyAfterFetch { .. });
    }

    #[tokio::test]
    async fn empty_fetch_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::WriteNothing);

        let err = ensure_ready(&settings, fetcher).await.unwrap_err();
        assert_matches!(err, BootstrapError::EmptyAfterFetch { .. });
        assert!(!store_root(&settings).join(READY_MARKER).exists());
    }

    #[tokio::test]
    async fn fetch_failure_preserves_source() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings {
            auto_download_model_store: true,
            ..settings_in(tmp.path())
        };
        let fetcher = StubFetcher::new(Behaviour::Fail);

        let err = ensure_ready(&settings, fetcher).await.unwrap_err();
        assert_matches!(
            err,
            BootstrapError::Fetch { repo_id, source: FetchError::Listing { .. }, .. } if repo_id == "org/model"
        );
    }

    #[tokio::test]
    async fn unwritable_root_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("store");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let settings = settings_in(tmp.path());

        let err = ensure_ready(&settings, StubFetcher::new(Behaviour::Fail))
            .await
            .unwrap_err();
        assert_matches!(err, BootstrapError::CreateRoot { .. });
    }
}
