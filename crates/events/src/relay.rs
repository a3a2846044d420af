//! Ordered relay from worker stdout to the host logger.
//!
//! Producers enqueue raw lines from any thread through [`RelaySender`]
//! handles. A single consumer task decodes and forwards them strictly in
//! arrival order.

use crate::error::{Error, Result};
use crate::logger::HostLogger;
use crate::record::{Importance, LineDecision, LogRecord, decode_line};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the relay observed once all input was processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySummary {
    /// Files the worker asked to embed, in the order requested
    pub embedded_files: Vec<PathBuf>,
    /// Number of error diagnostics forwarded to the logger
    pub errors_logged: usize,
    /// Number of lines taken off the queue and decoded
    pub lines_processed: usize,
}

/// Single-consumer ordered log relay.
pub struct LogRelay {
    /// Input side. Set to `None` once input is closed.
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    consumer: JoinHandle<Result<RelaySummary>>,
}

impl LogRelay {
    /// Start the relay's consumer task, forwarding to `logger`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(logger: Arc<dyn HostLogger>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<String>();
        let consumer = tokio::spawn(consume(receiver, logger));
        Self {
            sender: Mutex::new(Some(sender)),
            consumer,
        }
    }

    /// Get a cloneable handle for enqueuing lines.
    ///
    /// Returns `None` once input has been closed.
    #[must_use]
    pub fn sender(&self) -> Option<RelaySender> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|inner| RelaySender {
                inner: inner.clone(),
            })
    }

    /// Enqueue one line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayClosed`] after input was closed.
    pub fn enqueue(&self, line: impl Into<String>) -> Result<()> {
        self.sender().ok_or(Error::RelayClosed)?.send(line)
    }

    /// Stop accepting input from this handle.
    ///
    /// Safe to call more than once. Outstanding [`RelaySender`] clones keep
    /// the queue open until they are dropped.
    pub fn close(&self) {
        let _ = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Close input and wait until every enqueued line has been processed.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation if the worker emitted an unknown
    /// message type, or [`Error::ConsumerFailed`] if the consumer task died.
    pub async fn finish(self) -> Result<RelaySummary> {
        self.close();
        match self.consumer.await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(Error::ConsumerFailed {
                message: join_error.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for LogRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRelay")
            .field("finished", &self.consumer.is_finished())
            .finish_non_exhaustive()
    }
}

/// Cloneable input handle for a [`LogRelay`].
#[derive(Debug, Clone)]
pub struct RelaySender {
    inner: mpsc::UnboundedSender<String>,
}

impl RelaySender {
    /// Enqueue one line. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayClosed`] if the consumer is gone.
    pub fn send(&self, line: impl Into<String>) -> Result<()> {
        self.inner.send(line.into()).map_err(|_| Error::RelayClosed)
    }

    /// Whether the consumer has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

async fn consume(
    mut receiver: mpsc::UnboundedReceiver<String>,
    logger: Arc<dyn HostLogger>,
) -> Result<RelaySummary> {
    let mut summary = RelaySummary::default();
    let mut violation: Option<Error> = None;

    while let Some(line) = receiver.recv().await {
        // Input after a violation is drained so producers never see a closed queue.
        if violation.is_some() {
            continue;
        }
        summary.lines_processed += 1;

        match decode_line(&line) {
            Ok(LineDecision::Ignore) => {}
            Ok(LineDecision::Verbatim(text)) => logger.log_message(Importance::Low, &text),
            Ok(LineDecision::Record(record)) => forward(record, logger.as_ref(), &mut summary),
            Err(err) => {
                tracing::error!(error = %err, "Worker protocol violation");
                logger.log_error(&err.to_string());
                summary.errors_logged += 1;
                violation = Some(err);
            }
        }
    }

    tracing::debug!(
        lines = summary.lines_processed,
        errors = summary.errors_logged,
        embedded = summary.embedded_files.len(),
        "Log relay drained"
    );

    match violation {
        Some(err) => Err(err),
        None => Ok(summary),
    }
}

fn forward(record: LogRecord, logger: &dyn HostLogger, summary: &mut RelaySummary) {
    match record {
        LogRecord::Message { importance, text } => logger.log_message(importance, &text),
        LogRecord::Diagnostic(diagnostic) => {
            if diagnostic.is_error() {
                summary.errors_logged += 1;
            }
            logger.log_diagnostic(&diagnostic);
        }
        LogRecord::EmbedFile { path } => summary.embedded_files.push(path),
    }
}
