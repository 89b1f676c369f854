//! The configuration snapshot.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// Instruction text sent with every transcription call.
pub const DEFAULT_PROMPT: &str = include_str!("prompts/transcription.md");

/// Room for multipart framing on top of the file ceiling.
pub const UPLOAD_FRAMING_BYTES: usize = 1024 * 1024;

const MIB: u64 = 1024 * 1024;

/// Display name reported in responses and logs.
const DEFAULT_MODEL_NAME: &str = "Quill-OCR";

/// Weight dtype passed to the backend launcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendDtype {
    /// Let the backend pick.
    Auto,
    /// Alias for float16.
    Half,
    /// 16-bit IEEE float.
    Float16,
    /// bfloat16.
    #[default]
    Bfloat16,
    /// Alias for float32.
    Float,
    /// 32-bit IEEE float.
    Float32,
}

impl BackendDtype {
    /// The backend's CLI spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Half => "half",
            Self::Float16 => "float16",
            Self::Bfloat16 => "bfloat16",
            Self::Float => "float",
            Self::Float32 => "float32",
        }
    }
}

/// Operational parameters for one process.
///
/// Built once by [`load_settings`](crate::load_settings) and never mutated.
/// Tests and one-shot commands derive scoped copies with struct update
/// syntax (`Settings { model_force_download: true, ..settings.clone() }`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Service ─────────────────────────────────────────────────────
    /// Display name of the model, echoed in every success response.
    pub model_name: String,
    /// Bind address for the HTTP API.
    pub api_host: String,
    /// Port for the HTTP API.
    pub api_port: u16,
    /// Base log level (`trace`, `debug`, `info`, `warn`, `error`).
    pub log_level: String,
    /// Forces `debug` logging regardless of `log_level`.
    pub verbose_logs: bool,

    // ── Model store ─────────────────────────────────────────────────
    /// Root directory of the local model store.
    pub model_store_dir: PathBuf,
    /// Fail startup when artifacts are missing and cannot be fetched.
    pub require_local_model_store: bool,
    /// Fetch a snapshot when artifacts are missing.
    pub auto_download_model_store: bool,
    /// Re-fetch even when artifacts already exist.
    pub model_force_download: bool,
    /// Remote registry repository, e.g. `allenai/olmOCR-2-7B-1025-FP8`.
    pub model_repo_id: String,
    /// Optional exact filename or glob restricting which artifacts count.
    pub model_filename: Option<String>,
    /// Registry access token for gated repositories.
    pub hf_token: Option<String>,

    // ── Inference backend ───────────────────────────────────────────
    /// Probe the backend for image input support at startup.
    pub startup_compat_check: bool,
    /// Base URL of the OpenAI-compatible backend (no trailing slash).
    pub backend_base_url: String,
    /// Bearer token for the backend.
    pub backend_api_key: String,
    /// Model id the backend serves the snapshot under.
    pub backend_model_id: String,
    /// Per-call HTTP timeout for backend requests.
    pub backend_timeout_secs: u64,
    /// Timeout for the startup probe.
    pub backend_startup_timeout_secs: u64,

    // ── Backend launch (process handoff) ────────────────────────────
    /// Executable that starts the backend server.
    pub backend_launcher: String,
    /// Host the launched backend binds.
    pub backend_host: String,
    /// Port the launched backend binds.
    pub backend_port: u16,
    /// Weight dtype.
    pub backend_dtype: BackendDtype,
    /// Maximum context length.
    pub backend_max_model_len: u32,
    /// Tensor-parallel degree.
    pub backend_tensor_parallel_size: u32,
    /// Fraction of GPU memory the backend may claim, in `(0, 1]`.
    pub backend_gpu_memory_utilization: f32,
    /// Pass `--trust-remote-code`.
    pub backend_trust_remote_code: bool,
    /// Pass `--enforce-eager`.
    pub backend_enforce_eager: bool,
    /// Pass `--disable-mm-preprocessor-cache`.
    pub backend_disable_mm_preprocessor_cache: bool,
    /// Extra launcher arguments, split with shell quoting rules.
    pub backend_additional_args: Option<String>,

    // ── Sampling ────────────────────────────────────────────────────
    /// Sampling temperature.
    pub temperature: f32,
    /// Top-k sampling, at least 1.
    pub top_k: u32,
    /// Nucleus sampling, in `(0, 1]`.
    pub top_p: f32,
    /// Completion token budget.
    pub max_tokens: u32,

    // ── Request pipeline ────────────────────────────────────────────
    /// Deadline for one transcription call.
    pub inference_timeout_secs: u64,
    /// Upload size ceiling in MiB.
    pub max_upload_megabytes: u64,
    /// Accepted upload content types.
    #[serde(deserialize_with = "string_or_list")]
    pub allowed_content_types: Vec<String>,
    /// Instruction text sent with every image.
    pub ocr_prompt: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            log_level: "info".to_string(),
            verbose_logs: false,

            model_store_dir: PathBuf::from("model_store"),
            require_local_model_store: true,
            auto_download_model_store: false,
            model_force_download: false,
            model_repo_id: "allenai/olmOCR-2-7B-1025-FP8".to_string(),
            model_filename: None,
            hf_token: None,

            startup_compat_check: true,
            backend_base_url: "http://127.0.0.1:8001".to_string(),
            backend_api_key: "EMPTY".to_string(),
            backend_model_id: DEFAULT_MODEL_NAME.to_string(),
            backend_timeout_secs: 120,
            backend_startup_timeout_secs: 600,

            backend_launcher: "vllm".to_string(),
            backend_host: "0.0.0.0".to_string(),
            backend_port: 8001,
            backend_dtype: BackendDtype::default(),
            backend_max_model_len: 8192,
            backend_tensor_parallel_size: 1,
            backend_gpu_memory_utilization: 0.90,
            backend_trust_remote_code: false,
            backend_enforce_eager: false,
            backend_disable_mm_preprocessor_cache: false,
            backend_additional_args: None,

            temperature: 0.0,
            top_k: 1,
            top_p: 1.0,
            max_tokens: 4096,

            inference_timeout_secs: 90,
            max_upload_megabytes: 15,
            allowed_content_types: vec![
                "image/jpeg".to_string(),
                "image/jpg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            ocr_prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

impl Settings {
    /// Level used for the tracing filter.
    pub fn effective_log_level(&self) -> &str {
        if self.verbose_logs {
            "debug"
        } else {
            &self.log_level
        }
    }

    /// Upload ceiling in bytes.
    ///
    /// Validated settings always fit; an unvalidated oversize value
    /// saturates instead of wrapping.
    pub fn max_upload_bytes(&self) -> usize {
        self.checked_upload_bytes()
            .unwrap_or(usize::MAX - UPLOAD_FRAMING_BYTES)
    }

    /// Request body ceiling: the upload ceiling plus multipart framing.
    pub fn request_body_limit(&self) -> usize {
        self.max_upload_bytes().saturating_add(UPLOAD_FRAMING_BYTES)
    }

    /// The upload ceiling in bytes, or `None` when it (plus framing) does
    /// not fit in `usize`.
    pub fn checked_upload_bytes(&self) -> Option<usize> {
        let bytes = self.max_upload_megabytes.checked_mul(MIB)?;
        let bytes = usize::try_from(bytes).ok()?;
        bytes.checked_add(UPLOAD_FRAMING_BYTES).map(|_| bytes)
    }

    /// Deadline for one transcription call.
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    /// Per-call HTTP timeout for the backend client.
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// Timeout for the startup probe.
    pub fn backend_startup_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_startup_timeout_secs)
    }

    /// Whether `content_type` is on the allow-list.
    ///
    /// Parameters (`; charset=...`) are ignored and the comparison is
    /// case-insensitive.
    pub fn allows_content_type(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }
}

/// Accept either a list or a comma-separated string.
///
/// Environment variables can only carry strings, so
/// `OCR_ALLOWED_CONTENT_TYPES=image/png,image/jpeg` has to work alongside
/// a JSON array in the config file.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::One(raw) => raw.split(',').map(str::to_string).collect(),
        StringOrList::Many(items) => items,
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect())
}
