//! Error sink seam used by the handler guard.

use std::sync::{Arc, Mutex, PoisonError};

/// Structured side channel attached to an error record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorMeta {
    /// Diagnostic trace of the failure, if one exists.
    pub stack: Option<String>,
    /// HTTP status the failure resolved to.
    pub status: u16,
    /// `x-request-id` of the failing request.
    pub request_id: Option<String>,
}

/// Anything that can record an error line.
///
/// Recording must not fail; implementations swallow their own I/O problems.
pub trait ErrorSink: Send + Sync + 'static {
    fn error(&self, message: &str, meta: &ErrorMeta);

    /// Record a problem the guard recovered from on its own.
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

impl<T: ErrorSink + ?Sized> ErrorSink for Arc<T> {
    fn error(&self, message: &str, meta: &ErrorMeta) {
        (**self).error(message, meta)
    }

    fn warn(&self, message: &str) {
        (**self).warn(message)
    }
}

/// Sink that forwards to whatever `tracing` subscriber is current.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn error(&self, message: &str, meta: &ErrorMeta) {
        emit_error(message, meta);
    }
}

pub(crate) fn emit_error(message: &str, meta: &ErrorMeta) {
    tracing::error!(
        stack = meta.stack.as_deref(),
        status = meta.status,
        request_id = meta.request_id.as_deref(),
        "{message}"
    );
}

/// Sink that keeps records in memory, for tests and diagnostics endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<(String, ErrorMeta)>>>,
    warnings: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<(String, ErrorMeta)> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for MemorySink {
    fn error(&self, message: &str, meta: &ErrorMeta) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message.to_string(), meta.clone()));
    }

    fn warn(&self, message: &str) {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_string());
    }
}
