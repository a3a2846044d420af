//! Worker log records and the ordered log relay for restorekit.
//!
//! The restore worker reports progress as newline-delimited JSON on stdout.
//! This crate decodes those lines into [`LogRecord`]s and forwards them to a
//! [`HostLogger`] through a [`LogRelay`], one line at a time, in the order the
//! worker emitted them.
//!
//! # Usage
//!
//! ```rust,ignore
//! use restorekit_events::{LogRelay, TracingLogger};
//! use std::sync::Arc;
//!
//! let relay = LogRelay::start(Arc::new(TracingLogger));
//! relay.enqueue(r#"{"MessageType":"Message","Importance":"High","Message":"Restoring"}"#)?;
//! let summary = relay.finish().await?;
//! ```

mod error;
pub mod logger;
pub mod record;
pub mod relay;

pub use error::{Error, Result};
pub use logger::{
    ErrorFlag, ErrorTrackingLogger, HostLogger, LoggedEntry, MemoryLogger, TracingLogger,
};
pub use record::{
    Diagnostic, DiagnosticSeverity, Importance, LineDecision, LogRecord, MESSAGE_TYPE_FIELD,
    decode_line,
};
pub use relay::{LogRelay, RelaySender, RelaySummary};

// ============================================================================
// Emit Macros
// ============================================================================

/// Emit a worker started event.
///
/// # Example
/// ```rust,ignore
/// emit_worker_started!("dotnet", "stream", 4321);
/// ```
#[macro_export]
macro_rules! emit_worker_started {
    ($program:expr, $transport:expr, $pid:expr) => {
        ::tracing::info!(
            target: "restorekit::worker",
            event_type = "worker.started",
            program = %$program,
            transport = %$transport,
            pid = $pid,
        )
    };
}

/// Emit a worker output event for a raw line.
///
/// # Example
/// ```rust,ignore
/// emit_worker_output!("stderr", "Unhandled exception");
/// ```
#[macro_export]
macro_rules! emit_worker_output {
    ($stream:expr, $content:expr) => {
        ::tracing::trace!(
            target: "restorekit::worker",
            event_type = "worker.output",
            stream = $stream,
            content = %$content,
        )
    };
}

/// Emit a worker exited event.
///
/// # Example
/// ```rust,ignore
/// emit_worker_exited!("succeeded", Some(0), 1234);
/// ```
#[macro_export]
macro_rules! emit_worker_exited {
    ($status:expr, $exit_code:expr, $duration_ms:expr) => {
        ::tracing::info!(
            target: "restorekit::worker",
            event_type = "worker.exited",
            status = %$status,
            exit_code = ?$exit_code,
            duration_ms = $duration_ms,
        )
    };
}
