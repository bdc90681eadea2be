//! Guarded request handlers.
//!
//! # Responsibilities
//! - Run a fallible async handler for one request
//! - Log every failure once through the configured `ErrorSink`
//! - Turn the failure into a JSON body with the resolved status
//! - Never write a second body once the response is committed
//!
//! # Data Flow
//! ```text
//! Request
//!     → RequestInfo captured (method, original URI, x-request-id)
//!     → handler(request)
//!         Ok(response)  → returned untouched (streaming bodies are watched,
//!                         a failing first chunk counts as Err)
//!         Err(error)    → sink.error("[METHOD] url - message", meta)
//!                       → status = error.status() or 500
//!                       → body   = format_error(error, info) or default
//!         panic         → treated as an error without status
//! ```
//!
//! # Design Decisions
//! - `Guarded<F>` is a `tower::Service` with `Error = Infallible`, so it
//!   mounts on any axum route via `get_service`/`route_service`
//! - Status comes from the error's own status code, never a side field
//! - A streaming response is held until its first chunk is ready. A stream
//!   that fails before that point has sent nothing, so it is answered like
//!   any other failure. Once the first chunk is handed to the server the
//!   status and headers are committed; a later stream failure is logged and
//!   passed on as a body error, which aborts the connection instead of
//!   writing another body

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, HttpBody};
use axum::extract::{OriginalUri, Request};
use axum::http::{Method, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::future::{self, BoxFuture};
use futures_util::{stream, FutureExt, StreamExt};
use serde_json::{json, Value};
use tower::Service;

use crate::config::RuntimeMode;
use crate::http::error::{ApiError, HandlerError};
use crate::observability::sink::{ErrorMeta, ErrorSink};

/// Message written when the failure has none.
pub const DEFAULT_BODY_MESSAGE: &str = "Internal Server Error";

/// Header carrying the request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Custom error body builder.
pub type ErrorFormatter = dyn Fn(&HandlerError, &RequestInfo) -> Value + Send + Sync;

/// What the guard remembers about a request after the handler consumed it.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    /// URI as the client sent it, before any router nesting stripped a prefix.
    pub uri: Uri,
    pub request_id: Option<String>,
}

impl RequestInfo {
    pub fn from_request<B>(req: &axum::http::Request<B>) -> Self {
        let uri = req
            .extensions()
            .get::<OriginalUri>()
            .map(|original| original.0.clone())
            .unwrap_or_else(|| req.uri().clone());
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Self {
            method: req.method().clone(),
            uri,
            request_id,
        }
    }

    /// Path and query, e.g. `/items/7?full=1`.
    pub fn original_url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    fn log_line(&self, error: &dyn fmt::Display) -> String {
        format!("[{}] {} - {}", self.method, self.original_url(), error)
    }
}

/// Error handling and logging policy shared by guarded handlers.
#[derive(Clone)]
pub struct HandlerGuard {
    logger: Arc<dyn ErrorSink>,
    format_error: Option<Arc<ErrorFormatter>>,
}

impl HandlerGuard {
    /// Guard that logs through `logger` and writes the default body.
    pub fn new(logger: impl ErrorSink) -> Self {
        Self {
            logger: Arc::new(logger),
            format_error: None,
        }
    }

    /// Replace the logger.
    pub fn with_logger(mut self, logger: impl ErrorSink) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Build error bodies with `format` instead of the default shape.
    pub fn format_error<F>(mut self, format: F) -> Self
    where
        F: Fn(&HandlerError, &RequestInfo) -> Value + Send + Sync + 'static,
    {
        self.format_error = Some(Arc::new(format));
        self
    }

    /// Wrap `handler` so its failures are logged and answered.
    pub fn wrap<F>(&self, handler: F) -> Guarded<F> {
        Guarded {
            handler,
            guard: self.clone(),
        }
    }

    async fn run<F, Fut, R>(&self, handler: F, req: Request) -> Response
    where
        F: Fn(Request) -> Fut,
        Fut: Future<Output = Result<R, HandlerError>>,
        R: IntoResponse,
    {
        let info = RequestInfo::from_request(&req);

        let outcome = AssertUnwindSafe(async move { handler(req).await })
            .catch_unwind()
            .await;
        let returned = match outcome {
            Ok(Ok(response)) => Ok(response.into_response()),
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(HandlerError::from_panic(panic)),
        };
        let err = match returned {
            Ok(response) => match self.commit(response, &info).await {
                Ok(response) => return response,
                Err(err) => err,
            },
            Err(err) => err,
        };

        let status = err.resolved_status();
        self.logger.error(
            &info.log_line(&err),
            &ErrorMeta {
                stack: err.stack(),
                status: status.as_u16(),
                request_id: info.request_id.clone(),
            },
        );

        let body = self.render_body(&err, &info);
        (status, Json(body)).into_response()
    }

    fn render_body(&self, err: &HandlerError, info: &RequestInfo) -> Value {
        let Some(format) = &self.format_error else {
            return default_body(err);
        };
        match catch_unwind(AssertUnwindSafe(|| format(err, info))) {
            Ok(body) => body,
            Err(_) => {
                self.logger.warn(&format!(
                    "[{}] {} - error formatter panicked, writing default body",
                    info.method,
                    info.original_url()
                ));
                default_body(err)
            }
        }
    }

    /// Pass `response` through once its status and headers can be committed.
    ///
    /// Bodies of known size are complete already. A streaming body is polled
    /// for its first chunk here; if that fails nothing has been sent yet and
    /// the failure is returned for the usual error path. Failures after the
    /// first chunk are logged once and forwarded to the server.
    async fn commit(&self, response: Response, info: &RequestInfo) -> Result<Response, HandlerError> {
        let (parts, body) = response.into_parts();
        if body.size_hint().exact().is_some() {
            return Ok(Response::from_parts(parts, body));
        }

        let mut chunks = body.into_data_stream();
        let first = match chunks.next().await {
            Some(Ok(first)) => first,
            Some(Err(err)) => return Err(HandlerError::unexpected(err)),
            None => return Ok(Response::from_parts(parts, Body::empty())),
        };

        let logger = self.logger.clone();
        let info = info.clone();
        let rest = chunks.scan(false, move |failed, chunk| {
            if *failed {
                return future::ready(None);
            }
            if let Err(err) = &chunk {
                *failed = true;
                logger.error(
                    &info.log_line(err),
                    &ErrorMeta {
                        stack: None,
                        status: 500,
                        request_id: info.request_id.clone(),
                    },
                );
            }
            future::ready(Some(chunk))
        });
        let body = stream::once(future::ready(Ok(first))).chain(rest);

        Ok(Response::from_parts(parts, Body::from_stream(body)))
    }
}

impl fmt::Debug for HandlerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerGuard")
            .field("custom_formatter", &self.format_error.is_some())
            .finish_non_exhaustive()
    }
}

/// Wrap `handler` with `guard`.
pub fn wrap<F>(handler: F, guard: &HandlerGuard) -> Guarded<F> {
    guard.wrap(handler)
}

/// `{ "status": "error", "message": ... }`
pub fn default_body(err: &HandlerError) -> Value {
    let message = err.message();
    let message = if message.is_empty() {
        DEFAULT_BODY_MESSAGE
    } else {
        message.as_str()
    };
    json!({ "status": "error", "message": message })
}

/// Formatter writing `ApiError`-shaped bodies for every failure.
///
/// `ApiError`s are written as they are; other failures are reshaped with
/// their resolved status. Stacks appear outside production only.
pub fn structured_errors(mode: RuntimeMode) -> impl Fn(&HandlerError, &RequestInfo) -> Value + Clone + Send + Sync + 'static {
    move |err: &HandlerError, _info: &RequestInfo| match err.as_api_error() {
        Some(api) => api.to_json(mode),
        None => {
            let message = err.message();
            let message = if message.is_empty() {
                DEFAULT_BODY_MESSAGE.to_string()
            } else {
                message
            };
            let stack = err.stack().unwrap_or_else(|| format!("{}: {message}", kind(err)));
            ApiError::build(err.resolved_status().as_u16(), Some(message), Vec::new(), Some(stack))
                .to_json(mode)
        }
    }
}

fn kind(err: &HandlerError) -> &'static str {
    match err {
        HandlerError::Api(_) => "ApiError",
        HandlerError::WithStatus { .. } => "Error",
        HandlerError::Unexpected(_) => "Error",
        HandlerError::Panicked { .. } => "Panic",
    }
}

/// A handler wrapped by a [`HandlerGuard`].
#[derive(Clone)]
pub struct Guarded<F> {
    handler: F,
    guard: HandlerGuard,
}

impl<F> fmt::Debug for Guarded<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guarded").field("guard", &self.guard).finish_non_exhaustive()
    }
}

impl<F, Fut, R> Service<Request> for Guarded<F>
where
    F: Fn(Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let handler = self.handler.clone();
        let guard = self.guard.clone();
        Box::pin(async move { Ok(guard.run(handler, req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::error::ErrorDetail;
    use crate::http::response::ApiResponse;
    use crate::observability::sink::MemorySink;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use std::time::Duration;
    use tower::ServiceExt;

    fn get(uri: &str) -> Request {
        axum::http::Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_success_is_untouched() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            Ok::<_, HandlerError>(ApiResponse::ok("OK", json!({"id": 1})))
        };

        let direct = ApiResponse::ok("OK", json!({"id": 1})).into_response();
        let res = guard.wrap(handler).oneshot(get("/items/1")).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers(), direct.headers());
        assert_eq!(res.body().size_hint().exact(), direct.body().size_hint().exact());
        assert_eq!(json_body(res).await, json_body(direct).await);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_api_error_keeps_its_status() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(ApiError::not_found("Not found").into())
        };

        let res = guard.wrap(handler).oneshot(get("/items/7")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(res).await, json!({"status": "error", "message": "Not found"}));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "[GET] /items/7 - Not found");
        assert_eq!(records[0].1.status, 404);
        assert!(records[0].1.stack.as_deref().unwrap().starts_with("ApiError: Not found"));
    }

    #[tokio::test]
    async fn test_error_without_status_is_500() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(std::io::Error::other("db unreachable").into())
        };

        let res = guard.wrap(handler).oneshot(get("/users?page=2")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, json!({"status": "error", "message": "db unreachable"}));
        let records = sink.records();
        assert_eq!(records[0].0, "[GET] /users?page=2 - db unreachable");
        assert_eq!(records[0].1.status, 500);
    }

    #[tokio::test]
    async fn test_empty_message_falls_back() {
        let guard = HandlerGuard::new(MemorySink::new());
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(HandlerError::with_status(StatusCode::BAD_GATEWAY, ""))
        };

        let res = guard.wrap(handler).oneshot(get("/")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            json_body(res).await,
            json!({"status": "error", "message": "Internal Server Error"})
        );
    }

    #[tokio::test]
    async fn test_custom_formatter_body_is_used_verbatim() {
        let guard = HandlerGuard::new(MemorySink::new()).format_error(|err, info| {
            json!({ "error": err.message(), "path": info.original_url() })
        });
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(ApiError::bad_request("Invalid input").into())
        };

        let res = guard.wrap(handler).oneshot(get("/echo")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(res).await, json!({"error": "Invalid input", "path": "/echo"}));
    }

    #[tokio::test]
    async fn test_panicking_formatter_falls_back_to_default() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone())
            .format_error(|_err, _info| panic!("formatter bug"));
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(ApiError::internal("boom").into())
        };

        let res = guard.wrap(handler).oneshot(get("/")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, json!({"status": "error", "message": "boom"}));
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.warnings(),
            vec!["[GET] / - error formatter panicked, writing default body".to_string()]
        );
    }

    #[tokio::test]
    async fn test_handler_panic_is_answered() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            if true {
                panic!("index out of range");
            }
            Ok::<ApiResponse, HandlerError>(ApiResponse::empty(200, "unreachable"))
        };

        let res = guard.wrap(handler).oneshot(get("/panic")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(res).await,
            json!({"status": "error", "message": "index out of range"})
        );
        assert_eq!(sink.records()[0].0, "[GET] /panic - index out of range");
    }

    #[tokio::test]
    async fn test_committed_stream_failure_is_forwarded_once() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            let chunks = futures_util::stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"partial")),
                Err(std::io::Error::other("disk gone")),
                Ok(Bytes::from_static(b"never")),
            ]);
            Ok::<_, HandlerError>(Response::new(Body::from_stream(chunks)))
        };

        let res = guard.wrap(handler).oneshot(get("/download")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(sink.is_empty(), "nothing fails until the body is read");

        let read = axum::body::to_bytes(res.into_body(), usize::MAX).await;
        assert!(read.is_err());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].0.starts_with("[GET] /download - "));
        assert!(records[0].0.contains("disk gone"));
        assert_eq!(records[0].1.status, 500);
    }

    #[tokio::test]
    async fn test_stream_failing_before_first_chunk_is_answered() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            let chunks = futures_util::stream::iter(vec![
                Err::<Bytes, _>(std::io::Error::other("disk gone")),
                Ok(Bytes::from_static(b"never")),
            ]);
            Ok::<_, HandlerError>(Response::new(Body::from_stream(chunks)))
        };

        let res = guard.wrap(handler).oneshot(get("/download")).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(res).await, json!({"status": "error", "message": "disk gone"}));
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, "[GET] /download - disk gone");
        assert_eq!(records[0].1.status, 500);
    }

    #[tokio::test]
    async fn test_empty_stream_is_passed_through() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            let chunks = futures_util::stream::empty::<Result<Bytes, std::io::Error>>();
            Ok::<_, HandlerError>((StatusCode::NO_CONTENT, Body::from_stream(chunks)))
        };

        let res = guard.wrap(handler).oneshot(get("/nothing")).await.unwrap();

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_successful_stream_is_passed_through() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            let chunks = futures_util::stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::from_static(b"a,")),
                Ok(Bytes::from_static(b"b")),
            ]);
            Ok::<_, HandlerError>(Response::new(Body::from_stream(chunks)))
        };

        let res = guard.wrap(handler).oneshot(get("/export")).await.unwrap();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();

        assert_eq!(&bytes[..], b"a,b");
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_original_uri_and_request_id_are_logged() {
        let sink = MemorySink::new();
        let guard = HandlerGuard::new(sink.clone());
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(ApiError::not_found("Not found").into())
        };

        let mut req = axum::http::Request::builder()
            .method(Method::DELETE)
            .uri("/7")
            .header(X_REQUEST_ID, "req-123")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(OriginalUri(Uri::from_static("/api/items/7?hard=true")));

        guard.wrap(handler).oneshot(req).await.unwrap();

        let records = sink.records();
        assert_eq!(records[0].0, "[DELETE] /api/items/7?hard=true - Not found");
        assert_eq!(records[0].1.request_id.as_deref(), Some("req-123"));
    }

    #[tokio::test]
    async fn test_with_logger_overrides_sink() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let guard = HandlerGuard::new(first.clone()).with_logger(second.clone());
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(ApiError::new(500).into())
        };

        wrap(handler, &guard).oneshot(get("/")).await.unwrap();

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn test_structured_errors_formatter() {
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(
                ApiError::bad_request("Invalid input")
                    .with_error(ErrorDetail::field("name", "is required"))
                    .into(),
            )
        };

        let prod = HandlerGuard::new(MemorySink::new())
            .format_error(structured_errors(RuntimeMode::Production));
        let body = json_body(prod.wrap(handler).oneshot(get("/")).await.unwrap()).await;
        assert_eq!(
            body,
            json!({
                "statusCode": 400,
                "message": "Invalid input",
                "errors": [{"kind": "field", "field": "name", "message": "is required"}],
                "success": false,
            })
        );

        let dev = HandlerGuard::new(MemorySink::new())
            .format_error(structured_errors(RuntimeMode::Development));
        let body = json_body(dev.wrap(handler).oneshot(get("/")).await.unwrap()).await;
        assert!(body["stack"].as_str().unwrap().starts_with("ApiError: Invalid input"));
    }

    #[tokio::test]
    async fn test_structured_errors_reshapes_plain_errors() {
        let guard = HandlerGuard::new(MemorySink::new())
            .format_error(structured_errors(RuntimeMode::Production));
        let handler = |_req: Request| async {
            Err::<ApiResponse, HandlerError>(std::io::Error::other("").into())
        };

        let res = guard.wrap(handler).oneshot(get("/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(res).await,
            json!({
                "statusCode": 500,
                "message": "Internal Server Error",
                "errors": [],
                "success": false,
            })
        );
    }

    #[tokio::test]
    async fn test_waiting_handler_does_not_block_others() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let guard = HandlerGuard::new(MemorySink::new());
        let handler = move |_req: Request| {
            let barrier = barrier.clone();
            async move {
                barrier.wait().await;
                Ok::<_, HandlerError>(ApiResponse::<Value>::empty(200, "OK"))
            }
        };
        let svc = guard.wrap(handler);

        let both = async {
            tokio::join!(svc.clone().oneshot(get("/a")), svc.clone().oneshot(get("/b")))
        };
        let (a, b) = tokio::time::timeout(Duration::from_secs(5), both)
            .await
            .expect("requests should not block each other");

        assert_eq!(a.unwrap().status(), StatusCode::OK);
        assert_eq!(b.unwrap().status(), StatusCode::OK);
    }
}
