//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded handlers and the server produce:
//!     → sink.rs (ErrorSink seam: message + ErrorMeta)
//!     → logging.rs (Logger: private tracing Dispatch)
//!     → format.rs (one `[timestamp] level: message` line per record)
//!
//! Destinations:
//!     → logs/error.log     (error only)
//!     → logs/combined.log  (configured level and up)
//!     → stdout             (colorized, outside production)
//! ```

pub mod format;
pub mod logging;
pub mod sink;

pub use logging::{Logger, LoggingError};
pub use sink::{ErrorMeta, ErrorSink, MemorySink, TracingSink};
