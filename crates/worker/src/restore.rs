//! Restore orchestration: assemble the graph, persist it, run the worker.

use crate::error::{Error, Result};
use crate::invocation::{RESTORE_GRAPH_PATH, WorkerInvocation};
use crate::launcher::{RestoreStatus, WorkerLauncher, WorkerReport};
use restorekit_events::{HostLogger, Importance};
use restorekit_graph::{AggregateGraph, GraphItem, ProjectExpander, assemble};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

/// Optional host features, declared by the host integration up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostCapabilities {
    /// The host keeps a binary build log that can embed files
    pub binary_log: bool,
    /// The host can show interactive authentication prompts
    pub interactive: bool,
}

/// One restore operation.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    /// Collected graph items, one batch per collector run
    pub batches: Vec<Vec<GraphItem>>,
    /// How to start the worker
    pub invocation: WorkerInvocation,
    /// Where to write the graph; a temporary file is used when unset
    pub graph_file: Option<PathBuf>,
}

/// Drives graph assembly and the worker for restore requests.
#[derive(Clone)]
pub struct RestoreOrchestrator {
    launcher: WorkerLauncher,
    logger: Arc<dyn HostLogger>,
    capabilities: HostCapabilities,
}

impl std::fmt::Debug for RestoreOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreOrchestrator")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl RestoreOrchestrator {
    /// Create an orchestrator reporting to `logger`.
    #[must_use]
    pub fn new(logger: Arc<dyn HostLogger>, capabilities: HostCapabilities) -> Self {
        Self {
            launcher: WorkerLauncher::new(Arc::clone(&logger)),
            logger,
            capabilities,
        }
    }

    /// Run one restore.
    ///
    /// An empty graph is a no-op: the report is `Succeeded` and no worker is
    /// started.
    ///
    /// # Errors
    ///
    /// Returns graph errors before any worker is started, and the launcher's
    /// errors afterwards. Each is logged before it is returned.
    pub async fn run(
        &self,
        request: RestoreRequest,
        expander: &dyn ProjectExpander,
        cancel: &CancellationToken,
    ) -> Result<WorkerReport> {
        let RestoreRequest {
            batches,
            mut invocation,
            graph_file,
        } = request;

        if cancel.is_cancelled() {
            return Ok(WorkerReport::not_started(RestoreStatus::Canceled));
        }

        let graph = match assemble(batches, invocation.options.recursive, expander) {
            Ok(graph) => graph,
            Err(e) if e.is_empty_graph() => {
                self.logger.log_message(Importance::High, "Nothing to restore");
                return Ok(WorkerReport::no_op());
            }
            Err(e) => {
                self.logger.log_error(&e.to_string());
                return Err(e.into());
            }
        };

        let (graph_path, _temp_guard) = self.persist(&graph, graph_file)?;
        invocation.global_properties.insert(
            RESTORE_GRAPH_PATH.to_string(),
            graph_path.to_string_lossy().into_owned(),
        );
        self.apply_capabilities(&mut invocation);

        tracing::info!(
            entry = %invocation.entry_project.display(),
            items = graph.len(),
            projects = graph.projects().len(),
            graph = %graph_path.display(),
            "Starting restore worker"
        );

        let report = self.launcher.launch(&invocation, cancel).await?;

        if !self.capabilities.binary_log {
            for path in &report.embedded_files {
                self.logger.log_message(
                    Importance::Low,
                    &format!("Not embedding '{}': no binary log", path.display()),
                );
            }
        }
        Ok(report)
    }

    fn persist(
        &self,
        graph: &AggregateGraph,
        graph_file: Option<PathBuf>,
    ) -> Result<(PathBuf, Option<NamedTempFile>)> {
        let persisted = match graph_file {
            Some(path) => graph.write_to_file(&path).map(|()| (path, None)),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("restorekit-")
                    .suffix(".graph.json")
                    .tempfile()
                    .map_err(|e| Error::io(e, None, "create temporary graph file"))?;
                let path = temp.path().to_path_buf();
                graph.write_to_file(&path).map(|()| (path, Some(temp)))
            }
        };
        persisted.map_err(|e| {
            self.logger.log_error(&e.to_string());
            Error::from(e)
        })
    }

    fn apply_capabilities(&self, invocation: &mut WorkerInvocation) {
        let options = &mut invocation.options;
        if options.embed_files_in_binlog && !self.capabilities.binary_log {
            tracing::debug!("Host has no binary log, not asking the worker for files to embed");
            options.embed_files_in_binlog = false;
        }
        if options.interactive && !self.capabilities.interactive {
            tracing::debug!("Host cannot prompt, disabling interactive restore");
            options.interactive = false;
        }
    }
}

/// Assemble the graph and write it to `path` without starting a worker.
///
/// # Errors
///
/// Returns [`restorekit_graph::Error::EmptyGraph`] when there is nothing to
/// restore, and any collection or I/O error.
pub fn generate_graph_file(
    batches: Vec<Vec<GraphItem>>,
    recursive: bool,
    expander: &dyn ProjectExpander,
    path: &Path,
) -> Result<AggregateGraph> {
    let graph = assemble(batches, recursive, expander)?;
    graph.write_to_file(path)?;
    tracing::info!(path = %path.display(), items = graph.len(), "Wrote restore graph");
    Ok(graph)
}
