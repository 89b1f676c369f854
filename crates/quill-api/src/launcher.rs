//! Handoff to the inference backend process.
//!
//! The argument list is built as data so it can be inspected and tested;
//! [`exec`] then replaces the current process with the launcher.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use quill_settings::Settings;

/// Variables that receive the registry token when not already set.
const TOKEN_VARS: [&str; 2] = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

/// A fully resolved backend command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendLaunch {
    /// Executable, resolved through `PATH`.
    pub program: String,
    /// Arguments after the program name.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Build the backend command for `model_dir`.
///
/// `is_set` reports whether a variable already exists in the environment;
/// existing values are never overridden. Additional arguments follow shell
/// quoting rules; unbalanced quotes are an error.
pub fn build_launch(
    settings: &Settings,
    model_dir: &Path,
    is_set: impl Fn(&str) -> bool,
) -> Result<BackendLaunch> {
    let mut args = vec![
        "serve".to_string(),
        model_dir.display().to_string(),
        "--host".to_string(),
        settings.backend_host.clone(),
        "--port".to_string(),
        settings.backend_port.to_string(),
        "--served-model-name".to_string(),
        settings.backend_model_id.clone(),
        "--dtype".to_string(),
        settings.backend_dtype.as_str().to_string(),
        "--max-model-len".to_string(),
        settings.backend_max_model_len.to_string(),
        "--tensor-parallel-size".to_string(),
        settings.backend_tensor_parallel_size.to_string(),
        "--gpu-memory-utilization".to_string(),
        settings.backend_gpu_memory_utilization.to_string(),
    ];
    for (enabled, flag) in [
        (settings.backend_trust_remote_code, "--trust-remote-code"),
        (settings.backend_enforce_eager, "--enforce-eager"),
        (
            settings.backend_disable_mm_preprocessor_cache,
            "--disable-mm-preprocessor-cache",
        ),
    ] {
        if enabled {
            args.push(flag.to_string());
        }
    }
    if let Some(extra) = &settings.backend_additional_args {
        let extra = shlex::split(extra).ok_or_else(|| {
            anyhow!("OCR_BACKEND_ADDITIONAL_ARGS has unbalanced quotes: {extra}")
        })?;
        args.extend(extra);
    }

    let env = match &settings.hf_token {
        Some(token) => TOKEN_VARS
            .iter()
            .filter(|var| !is_set(var))
            .map(|var| ((*var).to_string(), token.clone()))
            .collect(),
        None => Vec::new(),
    };

    Ok(BackendLaunch {
        program: settings.backend_launcher.clone(),
        args,
        env,
    })
}

/// Replace the current process with the backend.
///
/// Only returns on failure. Off unix the backend runs as a child and this
/// process exits with its status.
pub fn exec(launch: &BackendLaunch) -> Result<()> {
    let mut command = Command::new(&launch.program);
    let _ = command
        .args(&launch.args)
        .envs(launch.env.iter().map(|(key, value)| (key.as_str(), value.as_str())));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt as _;
        let error = command.exec();
        Err(error).with_context(|| format!("Failed to exec backend launcher `{}`", launch.program))
    }

    #[cfg(not(unix))]
    {
        let status = command
            .status()
            .with_context(|| format!("Failed to run backend launcher `{}`", launch.program))?;
        std::process::exit(status.code().unwrap_or(1));
    }
}
