//! Restore worker invocation and supervision for restorekit.
//!
//! This crate runs the out-of-process restore worker:
//! - [`codec`]: length-prefixed binary encoding of the global property map
//! - [`invocation`]: command construction and the argv/stream transport switch
//! - [`launcher`]: process lifecycle, log relay wiring, exit interpretation
//! - [`restore`]: graph assembly, graph file persistence and worker launch
//!
//! # Example
//!
//! ```ignore
//! use restorekit_worker::{RestoreOrchestrator, RestoreRequest, HostCapabilities};
//! use restorekit_events::TracingLogger;
//!
//! let orchestrator = RestoreOrchestrator::new(Arc::new(TracingLogger), HostCapabilities::default());
//! let report = orchestrator.run(request, &NoExpansion, &cancel).await?;
//! ```

pub mod codec;
mod error;
pub mod invocation;
pub mod launcher;
pub mod restore;

pub use codec::TextEncoding;
pub use error::{Error, Result};
pub use invocation::{
    LaunchPlan, MAX_COMMAND_LINE_LENGTH, RestoreOptions, Transport, WorkerExecutable,
    WorkerInvocation, global_properties_for_worker, parse_property_string,
};
pub use launcher::{RestoreStatus, WorkerLauncher, WorkerReport, WorkerState};
pub use restore::{HostCapabilities, RestoreOrchestrator, RestoreRequest, generate_graph_file};
