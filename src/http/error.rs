//! Structured API errors.
//!
//! # Responsibilities
//! - `ApiError`: a failed operation with status, message and sub-errors
//! - `HandlerError`: the closed set of failures a guarded handler may return
//! - Serialize errors into the JSON body contract
//!
//! # Design Decisions
//! - `success` is not stored; it is always `false` on the wire
//! - The stack is captured at construction from the caller's location
//! - Stack output is gated by `RuntimeMode`, passed in by the caller

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::panic::Location;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RuntimeMode;

/// Message used when none is supplied.
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong";

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// One auxiliary detail attached to an [`ApiError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorDetail {
    /// A field failed validation.
    Field { field: String, message: String },
    /// Free-form detail.
    Message { message: String },
}

impl ErrorDetail {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorDetail::Field {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        ErrorDetail::Message {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
enum Stack {
    Explicit(String),
    /// Frames below the `ApiError: <message>` header.
    Captured(String),
}

/// A structured application error.
///
/// The status code is not validated; codes outside the HTTP range are kept
/// as given and resolve to 500 when written to a response.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    status_code: u16,
    message: String,
    errors: Vec<ErrorDetail>,
    stack: Stack,
}

impl ApiError {
    /// Error with the default message and no details.
    #[track_caller]
    pub fn new(status_code: u16) -> Self {
        Self::build(status_code, None, Vec::new(), None)
    }

    /// Full constructor. `message` falls back to [`DEFAULT_ERROR_MESSAGE`];
    /// a missing or empty `stack` is captured from the caller.
    #[track_caller]
    pub fn build(
        status_code: u16,
        message: Option<String>,
        errors: Vec<ErrorDetail>,
        stack: Option<String>,
    ) -> Self {
        let stack = match stack.filter(|s| !s.is_empty()) {
            Some(explicit) => Stack::Explicit(explicit),
            None => Stack::Captured(capture_frames()),
        };
        Self {
            status_code,
            message: message.unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            errors,
            stack,
        }
    }

    #[track_caller]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::build(400, Some(message.into()), Vec::new(), None)
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::build(404, Some(message.into()), Vec::new(), None)
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::build(500, Some(message.into()), Vec::new(), None)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<ErrorDetail>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_error(mut self, detail: ErrorDetail) -> Self {
        self.errors.push(detail);
        self
    }

    /// Replace the captured stack. An empty string keeps the captured one.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        let stack = stack.into();
        if !stack.is_empty() {
            self.stack = Stack::Explicit(stack);
        }
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// The status code as an HTTP status, if it is a valid one.
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_u16(self.status_code).ok()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn errors(&self) -> &[ErrorDetail] {
        &self.errors
    }

    pub fn success(&self) -> bool {
        false
    }

    /// Diagnostic trace, either supplied or captured at construction.
    pub fn stack(&self) -> String {
        match &self.stack {
            Stack::Explicit(stack) => stack.clone(),
            Stack::Captured(frames) => format!("ApiError: {}\n{frames}", self.message),
        }
    }

    /// Wire view of this error. `stack` is present outside production only.
    pub fn body(&self, mode: RuntimeMode) -> ApiErrorBody<'_> {
        ApiErrorBody {
            status_code: self.status_code,
            message: &self.message,
            errors: &self.errors,
            success: false,
            stack: (!mode.is_production()).then(|| self.stack()),
        }
    }

    pub fn to_json(&self, mode: RuntimeMode) -> Value {
        serde_json::to_value(self.body(mode)).unwrap_or(Value::Null)
    }

    /// Respond with this error's own status and full body.
    pub fn into_response_with(self, mode: RuntimeMode) -> Response {
        let status = self.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body(mode))).into_response()
    }
}

impl PartialEq for ApiError {
    // The stack is diagnostic only.
    fn eq(&self, other: &Self) -> bool {
        self.status_code == other.status_code
            && self.message == other.message
            && self.errors == other.errors
    }
}

impl Eq for ApiError {}

/// Serialized form of an [`ApiError`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody<'a> {
    pub status_code: u16,
    pub message: &'a str,
    pub errors: &'a [ErrorDetail],
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

#[track_caller]
fn capture_frames() -> String {
    let mut frames = format!("    at {}", Location::caller());
    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        let _ = write!(frames, "\n{backtrace}");
    }
    frames
}

/// Failure returned by a guarded handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Intentional failure carrying its own status.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Arbitrary error with an explicit status.
    #[error("{source}")]
    WithStatus {
        status: StatusCode,
        #[source]
        source: BoxError,
    },

    /// Anything else; resolves to 500.
    #[error(transparent)]
    Unexpected(BoxError),

    /// The handler panicked.
    #[error("{message}")]
    Panicked { message: String },
}

impl HandlerError {
    pub fn unexpected(err: impl Into<BoxError>) -> Self {
        HandlerError::Unexpected(err.into())
    }

    pub fn with_status(status: StatusCode, err: impl Into<BoxError>) -> Self {
        HandlerError::WithStatus {
            status,
            source: err.into(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::new()
        };
        HandlerError::Panicked { message }
    }

    /// Status carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HandlerError::Api(err) => err.status(),
            HandlerError::WithStatus { status, .. } => Some(*status),
            HandlerError::Unexpected(_) | HandlerError::Panicked { .. } => None,
        }
    }

    /// Status to log and respond with.
    pub fn resolved_status(&self) -> StatusCode {
        self.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Diagnostic trace: the `ApiError` stack or the rendered cause chain.
    pub fn stack(&self) -> Option<String> {
        match self {
            HandlerError::Api(err) => Some(err.stack()),
            HandlerError::WithStatus { source, .. } | HandlerError::Unexpected(source) => {
                Some(render_chain(source.as_ref()))
            }
            HandlerError::Panicked { .. } => None,
        }
    }

    pub fn as_api_error(&self) -> Option<&ApiError> {
        match self {
            HandlerError::Api(err) => Some(err),
            _ => None,
        }
    }
}

impl From<BoxError> for HandlerError {
    fn from(err: BoxError) -> Self {
        HandlerError::Unexpected(err)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::Unexpected(Box::new(err))
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::Unexpected(Box::new(err))
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut next = err.source();
    while let Some(cause) = next {
        let _ = write!(out, "\n    caused by: {cause}");
        next = cause.source();
    }
    out
}
