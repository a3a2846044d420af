//! Error types for the restorekit-worker crate

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while preparing or supervising a restore worker
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Graph collection, reconciliation or assembly failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] restorekit_graph::Error),

    /// The log relay failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Events(#[from] restorekit_events::Error),

    /// The worker process could not be started
    #[error("Failed to start restore worker '{program}': {source}")]
    #[diagnostic(
        code(restorekit_worker::launch_failed),
        help("Check that the worker executable exists and is runnable")
    )]
    WorkerLaunchFailure {
        /// Program that was being started
        program: String,
        /// The operating system error
        #[source]
        source: std::io::Error,
    },

    /// The worker emitted a record type this host does not understand
    #[error("Restore worker sent unrecognized message type '{message_type}': {line}")]
    #[diagnostic(
        code(restorekit_worker::protocol_violation),
        help("The worker and this host were built against different protocol versions")
    )]
    WorkerProtocolViolation {
        /// The unknown discriminator
        message_type: String,
        /// The offending stdout line
        line: String,
    },

    /// The worker exited with a failure code without reporting why
    #[error("Restore worker exited unexpectedly with code {exit_code} and reported no errors")]
    #[diagnostic(code(restorekit_worker::unexpected_exit))]
    WorkerUnexpectedExit {
        /// Process exit code, -1 when terminated by a signal
        exit_code: i32,
    },

    /// Property payload could not be encoded or decoded
    #[error("Property codec error: {message}")]
    #[diagnostic(code(restorekit_worker::codec))]
    Codec {
        /// What went wrong
        message: String,
    },

    /// I/O error with path context
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(restorekit_worker::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// The path where the I/O error occurred, if applicable
        path: Option<Box<std::path::Path>>,
        /// Description of the operation that failed
        operation: String,
    },
}

impl Error {
    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create an I/O error with context
    pub fn io(source: std::io::Error, path: Option<PathBuf>, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: path.map(|p| p.into_boxed_path()),
            operation: operation.into(),
        }
    }

    /// Convert a relay failure, lifting protocol violations to the worker level
    #[must_use]
    pub fn from_relay(err: restorekit_events::Error) -> Self {
        match err {
            restorekit_events::Error::ProtocolViolation { message_type, line } => {
                Self::WorkerProtocolViolation { message_type, line }
            }
            other => Self::Events(other),
        }
    }
}

/// Result type for worker operations
pub type Result<T> = std::result::Result<T, Error>;
