//! Error types for the restorekit-events crate

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while relaying worker output
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The worker emitted a record with a message type this host does not know
    #[error("Unrecognized worker message type '{message_type}' in line: {line}")]
    #[diagnostic(
        code(restorekit_events::protocol_violation),
        help("The worker and the host were built against different protocol versions")
    )]
    ProtocolViolation {
        /// The unknown `MessageType` discriminator
        message_type: String,
        /// The raw line that carried it
        line: String,
    },

    /// A line was submitted after the relay stopped accepting input
    #[error("The log relay is closed")]
    #[diagnostic(code(restorekit_events::relay_closed))]
    RelayClosed,

    /// The relay consumer task ended abnormally
    #[error("The log relay consumer failed: {message}")]
    #[diagnostic(code(restorekit_events::consumer_failed))]
    ConsumerFailed {
        /// Description of the failure
        message: String,
    },
}

impl Error {
    /// Create a protocol violation error
    pub fn protocol_violation(message_type: impl Into<String>, line: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message_type: message_type.into(),
            line: line.into(),
        }
    }

    /// Whether this error signals host/worker protocol skew
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;
