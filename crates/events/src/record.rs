//! Structured records decoded from the worker's stdout.
//!
//! The worker writes one JSON object per line. Each object carries a
//! `MessageType` discriminator (`Message`, `Warning`, `Error` or
//! `EmbedInBinlog`) and the fields for that record kind.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Field holding the record discriminator.
pub const MESSAGE_TYPE_FIELD: &str = "MessageType";

/// Importance of an informational worker message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Importance {
    /// Shown at normal host verbosity
    High,
    /// Shown at detailed host verbosity
    #[default]
    Normal,
    /// Shown at diagnostic host verbosity
    Low,
}

impl Importance {
    /// Wire name of this importance.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Normal => "Normal",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a worker diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticSeverity {
    /// A warning
    Warning,
    /// An error
    Error,
}

impl DiagnosticSeverity {
    /// Wire discriminator for this severity.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Error => "Error",
        }
    }
}

/// A warning or error reported by the worker, with its source span.
///
/// Line and column numbers are 1-based; 0 means "not specified".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Warning or error
    pub severity: DiagnosticSeverity,
    /// Stable diagnostic code (e.g. `NU1101`)
    pub code: Option<String>,
    /// Free-form subcategory
    pub subcategory: Option<String>,
    /// File the diagnostic points at
    pub file: Option<String>,
    /// Start line
    pub line: u32,
    /// Start column
    pub column: u32,
    /// End line
    pub end_line: u32,
    /// End column
    pub end_column: u32,
    /// Help keyword for documentation lookup
    pub help_keyword: Option<String>,
    /// Message text
    pub text: String,
}

impl Diagnostic {
    /// A diagnostic with only a severity and text.
    pub fn new(severity: DiagnosticSeverity, text: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            subcategory: None,
            file: None,
            line: 0,
            column: 0,
            end_line: 0,
            end_column: 0,
            help_keyword: None,
            text: text.into(),
        }
    }

    /// An error with only text.
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Error, text)
    }

    /// A warning with only text.
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(DiagnosticSeverity::Warning, text)
    }

    /// Set the diagnostic code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the file and start position.
    #[must_use]
    pub fn with_location(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.file = Some(file.into());
        self.line = line;
        self.column = column;
        self
    }

    /// Whether this diagnostic is an error.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// One decoded worker log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Informational message
    Message {
        /// How prominently the host should show it
        importance: Importance,
        /// Message text
        text: String,
    },
    /// Warning or error
    Diagnostic(Diagnostic),
    /// A file the worker wants bundled with the build log
    EmbedFile {
        /// Path of the file to embed
        path: PathBuf,
    },
}

impl LogRecord {
    /// Serialize this record as one line of the worker stdout protocol.
    #[must_use]
    pub fn to_json_line(&self) -> String {
        let mut object = Map::new();
        match self {
            Self::Message { importance, text } => {
                object.insert(MESSAGE_TYPE_FIELD.into(), "Message".into());
                object.insert("Importance".into(), importance.as_str().into());
                object.insert("Message".into(), text.as_str().into());
            }
            Self::Diagnostic(diagnostic) => {
                object.insert(MESSAGE_TYPE_FIELD.into(), diagnostic.severity.as_str().into());
                insert_optional(&mut object, "Code", diagnostic.code.as_deref());
                insert_optional(&mut object, "File", diagnostic.file.as_deref());
                object.insert("LineNumber".into(), diagnostic.line.into());
                object.insert("ColumnNumber".into(), diagnostic.column.into());
                object.insert("EndLineNumber".into(), diagnostic.end_line.into());
                object.insert("EndColumnNumber".into(), diagnostic.end_column.into());
                insert_optional(&mut object, "Subcategory", diagnostic.subcategory.as_deref());
                insert_optional(&mut object, "HelpKeyword", diagnostic.help_keyword.as_deref());
                object.insert("Message".into(), diagnostic.text.as_str().into());
            }
            Self::EmbedFile { path } => {
                object.insert(MESSAGE_TYPE_FIELD.into(), "EmbedInBinlog".into());
                object.insert("Path".into(), path.to_string_lossy().into_owned().into());
            }
        }
        Value::Object(object).to_string()
    }
}

fn insert_optional(object: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        object.insert(key.to_string(), value.into());
    }
}

/// What the relay should do with one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDecision {
    /// Blank line, nothing to forward
    Ignore,
    /// Unstructured output, forwarded as-is at low importance
    Verbatim(String),
    /// A decoded record
    Record(LogRecord),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireMessage {
    #[serde(default)]
    importance: Importance,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDiagnostic {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line_number: u32,
    #[serde(default)]
    column_number: u32,
    #[serde(default)]
    end_line_number: u32,
    #[serde(default)]
    end_column_number: u32,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    help_keyword: Option<String>,
    message: String,
}

impl WireDiagnostic {
    fn into_diagnostic(self, severity: DiagnosticSeverity) -> Diagnostic {
        Diagnostic {
            severity,
            code: self.code,
            subcategory: self.subcategory,
            file: self.file,
            line: self.line_number,
            column: self.column_number,
            end_line: self.end_line_number,
            end_column: self.end_column_number,
            help_keyword: self.help_keyword,
            text: self.message,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEmbed {
    path: PathBuf,
}

/// Classify and decode one line of worker stdout.
///
/// # Errors
///
/// Returns [`Error::ProtocolViolation`] when the line is a JSON object whose
/// `MessageType` is not one this host understands.
pub fn decode_line(line: &str) -> Result<LineDecision> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(LineDecision::Ignore);
    }
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return Ok(LineDecision::Verbatim(line.to_string()));
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Ok(LineDecision::Verbatim(line.to_string()));
    };
    let Some(message_type) = value.get(MESSAGE_TYPE_FIELD).and_then(Value::as_str) else {
        return Ok(LineDecision::Verbatim(line.to_string()));
    };

    let record = match message_type {
        "Message" => serde_json::from_value::<WireMessage>(value)
            .ok()
            .map(|wire| LogRecord::Message {
                importance: wire.importance,
                text: wire.message,
            }),
        "Warning" => serde_json::from_value::<WireDiagnostic>(value)
            .ok()
            .map(|wire| LogRecord::Diagnostic(wire.into_diagnostic(DiagnosticSeverity::Warning))),
        "Error" => serde_json::from_value::<WireDiagnostic>(value)
            .ok()
            .map(|wire| LogRecord::Diagnostic(wire.into_diagnostic(DiagnosticSeverity::Error))),
        "EmbedInBinlog" => serde_json::from_value::<WireEmbed>(value)
            .ok()
            .map(|wire| LogRecord::EmbedFile { path: wire.path }),
        other => return Err(Error::protocol_violation(other, line)),
    };

    Ok(record.map_or_else(
        || LineDecision::Verbatim(line.to_string()),
        LineDecision::Record,
    ))
}
