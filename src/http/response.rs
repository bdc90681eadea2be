//! Structured success responses.
//!
//! `ApiResponse` is the body successful handlers send back. `success` is
//! fixed at construction from the status code; `data` is left out of the
//! JSON entirely when no payload was given.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard API response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T = Value> {
    status_code: u16,
    message: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Build a response. `success` is `status_code < 400`.
    pub fn new(status_code: u16, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status_code,
            message: message.into(),
            success: status_code < 400,
            data,
        }
    }

    /// 200 response carrying `data`.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::new(200, message, Some(data))
    }

    /// Response without a payload.
    pub fn empty(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(status_code, message, None)
    }

    /// Attach a payload. Any value counts, including a JSON `null`.
    pub fn with_data(mut self, data: T) -> Self {
        self.data = Some(data);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}
