//! HTTP conventions subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (middleware: request id, trace, timeout, body limit)
//!     → guard.rs (Guarded handler: run, catch, log, answer)
//!         success → response.rs (ApiResponse envelope)
//!         failure → error.rs (ApiError / HandlerError) → JSON error body
//!     → Send to client
//! ```

pub mod error;
pub mod guard;
pub mod handlers;
pub mod response;
pub mod server;

pub use error::{ApiError, ErrorDetail, HandlerError};
pub use guard::{structured_errors, wrap, Guarded, HandlerGuard, RequestInfo, X_REQUEST_ID};
pub use response::ApiResponse;
pub use server::HttpServer;
