//! The host logger boundary.
//!
//! Everything the worker reports ends up in a [`HostLogger`]. The relay and
//! the launcher only ever talk to this trait; converting to the host's own
//! event types happens in the implementations.

use crate::record::{Diagnostic, DiagnosticSeverity, Importance};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Sink for worker output.
pub trait HostLogger: Send + Sync {
    /// Forward an informational message.
    fn log_message(&self, importance: Importance, text: &str);

    /// Forward a warning or error with its source span.
    fn log_diagnostic(&self, diagnostic: &Diagnostic);

    /// Forward a bare error line.
    fn log_error(&self, text: &str) {
        self.log_diagnostic(&Diagnostic::error(text));
    }
}

/// Logger that turns worker output into `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl HostLogger for TracingLogger {
    fn log_message(&self, importance: Importance, text: &str) {
        match importance {
            Importance::High => tracing::info!(target: "restorekit::worker", "{text}"),
            Importance::Normal => tracing::debug!(target: "restorekit::worker", "{text}"),
            Importance::Low => tracing::trace!(target: "restorekit::worker", "{text}"),
        }
    }

    fn log_diagnostic(&self, diagnostic: &Diagnostic) {
        let code = diagnostic.code.as_deref().unwrap_or_default();
        let file = diagnostic.file.as_deref().unwrap_or_default();
        let subcategory = diagnostic.subcategory.as_deref().unwrap_or_default();
        let help_keyword = diagnostic.help_keyword.as_deref().unwrap_or_default();
        match diagnostic.severity {
            DiagnosticSeverity::Warning => tracing::warn!(
                target: "restorekit::worker",
                code,
                file,
                line = diagnostic.line,
                column = diagnostic.column,
                end_line = diagnostic.end_line,
                end_column = diagnostic.end_column,
                subcategory,
                help_keyword,
                "{}",
                diagnostic.text
            ),
            DiagnosticSeverity::Error => tracing::error!(
                target: "restorekit::worker",
                code,
                file,
                line = diagnostic.line,
                column = diagnostic.column,
                end_line = diagnostic.end_line,
                end_column = diagnostic.end_column,
                subcategory,
                help_keyword,
                "{}",
                diagnostic.text
            ),
        }
    }
}

/// One call recorded by [`MemoryLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedEntry {
    /// A `log_message` call
    Message {
        /// Importance passed by the caller
        importance: Importance,
        /// Message text
        text: String,
    },
    /// A `log_diagnostic` or `log_error` call
    Diagnostic(Diagnostic),
}

impl LoggedEntry {
    /// Text of the entry regardless of kind.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Message { text, .. } => text,
            Self::Diagnostic(diagnostic) => &diagnostic.text,
        }
    }
}

/// Logger that keeps every call in memory, in order.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    entries: Mutex<Vec<LoggedEntry>>,
}

impl MemoryLogger {
    /// Create an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: LoggedEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Snapshot of every recorded call.
    #[must_use]
    pub fn entries(&self) -> Vec<LoggedEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recorded diagnostics of the given severity.
    #[must_use]
    pub fn diagnostics(&self, severity: DiagnosticSeverity) -> Vec<Diagnostic> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                LoggedEntry::Diagnostic(diagnostic) if diagnostic.severity == severity => {
                    Some(diagnostic)
                }
                _ => None,
            })
            .collect()
    }

    /// Recorded errors.
    #[must_use]
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.diagnostics(DiagnosticSeverity::Error)
    }

    /// Recorded warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.diagnostics(DiagnosticSeverity::Warning)
    }

    /// Text of every recorded message, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match entry {
                LoggedEntry::Message { text, .. } => Some(text),
                LoggedEntry::Diagnostic(_) => None,
            })
            .collect()
    }
}

impl HostLogger for MemoryLogger {
    fn log_message(&self, importance: Importance, text: &str) {
        self.push(LoggedEntry::Message {
            importance,
            text: text.to_string(),
        });
    }

    fn log_diagnostic(&self, diagnostic: &Diagnostic) {
        self.push(LoggedEntry::Diagnostic(diagnostic.clone()));
    }
}

/// Shared flag recording whether any error reached the host logger.
#[derive(Debug, Clone, Default)]
pub struct ErrorFlag(Arc<AtomicBool>);

impl ErrorFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an error was logged.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether an error was logged.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Logger wrapper that raises an [`ErrorFlag`] on every error it forwards.
#[derive(Clone)]
pub struct ErrorTrackingLogger {
    inner: Arc<dyn HostLogger>,
    flag: ErrorFlag,
}

impl ErrorTrackingLogger {
    /// Wrap `inner`, raising `flag` on errors.
    #[must_use]
    pub fn new(inner: Arc<dyn HostLogger>, flag: ErrorFlag) -> Self {
        Self { inner, flag }
    }

    /// The flag raised by this logger.
    #[must_use]
    pub fn flag(&self) -> &ErrorFlag {
        &self.flag
    }
}

impl std::fmt::Debug for ErrorTrackingLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorTrackingLogger")
            .field("errors_logged", &self.flag.is_raised())
            .finish_non_exhaustive()
    }
}

impl HostLogger for ErrorTrackingLogger {
    fn log_message(&self, importance: Importance, text: &str) {
        self.inner.log_message(importance, text);
    }

    fn log_diagnostic(&self, diagnostic: &Diagnostic) {
        if diagnostic.is_error() {
            self.flag.raise();
        }
        self.inner.log_diagnostic(diagnostic);
    }

    fn log_error(&self, text: &str) {
        self.flag.raise();
        self.inner.log_error(text);
    }
}
