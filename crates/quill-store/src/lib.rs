//! # quill-store
//!
//! Model artifact lifecycle: makes sure the inference backend has a usable
//! local snapshot before the service accepts any traffic.
//!
//! - [`ensure_ready`] runs the bootstrap decision table (present, missing,
//!   fetch, verify) and writes an advisory readiness marker.
//! - [`layout`] knows where artifacts live and how to recognise them.
//! - [`fetch`] materialises a registry snapshot through the [`SnapshotFetcher`]
//!   trait; [`HubFetcher`] is the Hugging Face Hub implementation.

#![deny(unsafe_code)]

pub mod errors;
pub mod fetch;
pub mod layout;
mod lifecycle;

pub use errors::{BootstrapError, FetchError};
pub use fetch::{HubFetcher, SnapshotFetcher, SnapshotRequest};
pub use layout::{
    HUB_CACHE_DIR, PARTIAL_SUFFIX, READY_MARKER, find_model_file, has_expected_artifacts,
    resolve_repo_dir,
};
pub use lifecycle::ensure_ready;
