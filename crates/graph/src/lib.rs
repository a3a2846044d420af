//! Restore graph model for restorekit.
//!
//! This crate turns per-project build declarations into a single canonical
//! restore graph:
//! - [`GraphItem`]: typed, property-bagged records keyed by project
//! - [`collect`]: one pure collector per declaration category
//! - [`reconcile`]: duplicate detection with hard-fail and warn modes
//! - [`assemble`]: merges batches, expands referenced projects, persists the graph
//!
//! # Example
//!
//! ```ignore
//! use restorekit_graph::{BuildItem, Category, CollectorContext, DuplicateMode, WarningPolicy};
//!
//! let ctx = CollectorContext::new("/src/app/app.csproj");
//! let collected = restorekit_graph::collect(
//!     Category::PackageReference,
//!     &[BuildItem::new("Serilog").with_metadata("Version", "3.1.1")],
//!     &ctx,
//!     DuplicateMode::Warn,
//!     &WarningPolicy::default(),
//! )?;
//! ```

pub mod assemble;
pub mod collect;
mod error;
pub mod item;
pub mod reconcile;

pub use assemble::{AggregateGraph, GRAPH_FILE_FORMAT, NoExpansion, ProjectExpander, assemble};
pub use collect::{Category, Collected, collect, parse_pair_specs};
pub use error::{Error, Result};
pub use item::{
    BuildItem, CollectorContext, GraphItem, GraphItemBuilder, GraphItemKind, TARGET_FRAMEWORKS,
};
pub use reconcile::{
    DedupKey, Disposition, DuplicateGroup, DuplicateMode, GraphDiagnostic, Reconciliation,
    Severity, WarningPolicy, reconcile, reconcile_batch,
};
