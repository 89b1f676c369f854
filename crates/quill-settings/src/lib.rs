//! # quill-settings
//!
//! Validated configuration snapshot for the Quill transcription service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`Settings::default()`]
//! 2. **Config file**: optional JSON file passed with `--config`
//! 3. **Environment variables**: `OCR_*` overrides (highest priority)
//!
//! The result is validated once and then treated as immutable. There is no
//! global instance: the composition root builds one [`Settings`] and hands it
//! (usually behind an `Arc`) to every component that needs it.
//!
//! # Usage
//!
//! ```no_run
//! let settings = quill_settings::load_settings(None).expect("valid settings");
//! println!("backend: {}", settings.backend_base_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{ENV_PREFIX, load_settings, settings_from_figment};
pub use types::{BackendDtype, DEFAULT_PROMPT, Settings, UPLOAD_FRAMING_BYTES};
