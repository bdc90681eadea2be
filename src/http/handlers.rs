//! Sample guarded endpoints served by the binary.
//!
//! Each handler returns `Result<ApiResponse<_>, HandlerError>` and is
//! mounted through a [`HandlerGuard`], so failures take the guard's path.

use axum::extract::{Path, Request};
use axum::http::StatusCode;
use axum::routing::{get_service, post_service};
use axum::{RequestExt, Router};
use serde::Serialize;
use serde_json::Value;

use crate::http::error::{ApiError, ErrorDetail, HandlerError};
use crate::http::guard::HandlerGuard;
use crate::http::response::ApiResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: u32,
    pub name: &'static str,
}

const ITEMS: &[Item] = &[
    Item { id: 1, name: "widget" },
    Item { id: 2, name: "gadget" },
];

/// Mount the sample endpoints behind `guard`.
pub fn routes(guard: &HandlerGuard) -> Router {
    Router::new()
        .route("/status", get_service(guard.wrap(get_status)))
        .route("/echo", post_service(guard.wrap(echo)))
        .route("/items/{id}", get_service(guard.wrap(get_item)))
        .route("/fail", get_service(guard.wrap(fail)))
        .fallback_service(guard.wrap(not_found))
}

pub async fn get_status(_req: Request) -> Result<ApiResponse<SystemStatus>, HandlerError> {
    Ok(ApiResponse::ok(
        "Service is up",
        SystemStatus {
            version: env!("CARGO_PKG_VERSION"),
            status: "operational",
        },
    ))
}

/// Echo a JSON object back. It must carry a non-empty `message`.
pub async fn echo(req: Request) -> Result<ApiResponse<Value>, HandlerError> {
    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| HandlerError::with_status(StatusCode::BAD_REQUEST, e))?;

    let payload: Value = serde_json::from_slice(&bytes).map_err(|e| {
        ApiError::bad_request("Body must be JSON").with_error(ErrorDetail::message(e.to_string()))
    })?;

    match payload.get("message").and_then(Value::as_str) {
        Some(message) if !message.is_empty() => Ok(ApiResponse::ok("Echo", payload)),
        _ => Err(ApiError::bad_request("Invalid input")
            .with_error(ErrorDetail::field("message", "is required"))
            .into()),
    }
}

pub async fn get_item(mut req: Request) -> Result<ApiResponse<Item>, HandlerError> {
    let Path(id) = req
        .extract_parts::<Path<u32>>()
        .await
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    ITEMS
        .iter()
        .find(|item| item.id == id)
        .map(|item| ApiResponse::ok("Item found", item.clone()))
        .ok_or_else(|| ApiError::not_found(format!("Item {id} not found")).into())
}

/// Always fails with an error that carries no status.
pub async fn fail(_req: Request) -> Result<ApiResponse, HandlerError> {
    Err(HandlerError::unexpected(std::io::Error::other(
        "upstream connection reset",
    )))
}

pub async fn not_found(req: Request) -> Result<ApiResponse, HandlerError> {
    Err(ApiError::not_found(format!("No route for {}", req.uri().path())).into())
}
