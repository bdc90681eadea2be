//! Conventions for building JSON HTTP APIs on axum.
//!
//! - [`ApiError`] / [`ApiResponse`]: the error and success envelopes
//! - [`HandlerGuard`]: wraps async handlers, logs failures, answers with JSON
//! - [`Logger`]: `error.log` + `combined.log` + console, injected explicitly

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::{AppConfig, RuntimeMode};
pub use http::{ApiError, ApiResponse, ErrorDetail, HandlerError, HandlerGuard, HttpServer};
pub use lifecycle::Shutdown;
pub use observability::{ErrorSink, Logger};
