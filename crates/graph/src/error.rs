//! Error types for the restorekit-graph crate

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for restore graph operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A raw build declaration could not be turned into a graph item
    #[error("Invalid {category} declaration '{declaration}': {reason}")]
    #[diagnostic(code(restorekit_graph::declaration::invalid))]
    InvalidDeclaration {
        /// The item category being collected (e.g. `PackageDownload`)
        category: String,
        /// The offending declaration as written
        declaration: String,
        /// Why the declaration was rejected
        reason: String,
    },

    /// Duplicate items were found and the category does not tolerate them
    #[error("[{code}] Duplicate {category} items found in project '{project_key}': {}", members.join(", "))]
    #[diagnostic(code(restorekit_graph::duplicate))]
    DuplicateItems {
        /// Stable diagnostic code for the duplicate category
        code: String,
        /// The item category being collected
        category: String,
        /// Project the duplicates belong to
        project_key: String,
        /// Every duplicate member, rendered as `id` or `id version`
        members: Vec<String>,
    },

    /// The assembled graph has nothing to restore
    #[error("The restore graph contains no restorable projects")]
    #[diagnostic(
        code(restorekit_graph::empty),
        help("Make sure the entry project declares at least one project to restore")
    )]
    EmptyGraph,

    /// An item is missing a property its kind requires
    #[error("{kind} item for project '{project_key}' is missing required property '{property}'")]
    #[diagnostic(code(restorekit_graph::item::missing_property))]
    MissingProperty {
        /// Kind of the item being built
        kind: String,
        /// Owning project
        project_key: String,
        /// Name of the missing property
        property: String,
    },

    /// Project references form a cycle
    #[error("Cycle detected in project references involving '{project}'")]
    #[diagnostic(code(restorekit_graph::cycle))]
    CycleDetected {
        /// A project on the cycle
        project: String,
    },

    /// The project expansion collaborator failed
    #[error("Failed to expand referenced project '{project}': {message}")]
    #[diagnostic(code(restorekit_graph::expand))]
    ProjectExpansion {
        /// Project that could not be expanded
        project: String,
        /// Error message from the expander
        message: String,
    },

    /// I/O error with path context
    #[error("I/O error during {operation}: {source}")]
    #[diagnostic(code(restorekit_graph::io))]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// The path where the I/O error occurred, if applicable
        path: Option<Box<std::path::Path>>,
        /// Description of the operation that failed
        operation: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(restorekit_graph::serialization))]
    Serialization {
        /// The error message describing the serialization issue
        message: String,
    },
}

impl Error {
    /// Create an invalid declaration error
    pub fn invalid_declaration(
        category: impl Into<String>,
        declaration: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDeclaration {
            category: category.into(),
            declaration: declaration.into(),
            reason: reason.into(),
        }
    }

    /// Create a project expansion error
    pub fn project_expansion(project: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProjectExpansion {
            project: project.into(),
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

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether this error is the no-op "nothing to restore" condition
    #[must_use]
    pub fn is_empty_graph(&self) -> bool {
        matches!(self, Self::EmptyGraph)
    }
}

/// Result type for restore graph operations
pub type Result<T> = std::result::Result<T, Error>;
