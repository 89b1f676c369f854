//! # quill-gateway
//!
//! The single point of contact with the inference backend, an
//! OpenAI-compatible chat completions server such as vLLM.
//!
//! - [`InferenceGateway`]: the async trait the request pipeline depends on.
//! - [`HttpGateway`]: the `reqwest` implementation, one shared client per process.
//! - [`GatewayError`]: classified failures with status, latency and error class.

#![deny(unsafe_code)]

pub mod errors;
mod gateway;
mod http;
mod types;

pub use errors::GatewayError;
pub use gateway::InferenceGateway;
pub use http::HttpGateway;
pub use types::Sampling;
