//! Worker process supervision.
//!
//! A launch spawns the worker with piped stdout and stderr, feeds the stream
//! payload to stdin when the plan calls for it, relays stdout through a fresh
//! [`LogRelay`], reports every stderr line as an error, and waits for exit
//! under a cancellation token.

use crate::error::{Error, Result};
use crate::invocation::{LaunchPlan, Transport, WorkerInvocation};
use bytes::Bytes;
use restorekit_events::{
    ErrorFlag, ErrorTrackingLogger, HostLogger, LogRelay, emit_worker_exited, emit_worker_output,
    emit_worker_started,
};
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    /// Not spawned yet
    NotStarted,
    /// Exited on its own with this code (-1 when ended by a signal)
    Completed(i32),
    /// Killed after cancellation
    Killed,
    /// Waiting on the process failed
    Faulted(String),
}

/// Overall outcome of a restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoreStatus {
    /// The worker finished successfully, or there was nothing to restore
    Succeeded,
    /// The worker failed; errors were logged
    Failed,
    /// Cancellation was requested before the worker finished
    Canceled,
}

impl RestoreStatus {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one launch.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Overall outcome
    pub status: RestoreStatus,
    /// Final process state
    pub state: WorkerState,
    /// Transport used for global properties, `None` when no worker ran
    pub transport: Option<Transport>,
    /// Files the worker asked to embed in the build log
    pub embedded_files: Vec<PathBuf>,
    /// Whether any error reached the host logger during the run
    pub errors_logged: bool,
    /// Number of stdout lines relayed
    pub lines_relayed: usize,
    /// Wall-clock time from spawn to exit
    pub duration: Duration,
}

impl WorkerReport {
    /// Report for a run that had nothing to do.
    #[must_use]
    pub fn no_op() -> Self {
        Self::not_started(RestoreStatus::Succeeded)
    }

    pub(crate) fn not_started(status: RestoreStatus) -> Self {
        Self {
            status,
            state: WorkerState::NotStarted,
            transport: None,
            embedded_files: Vec::new(),
            errors_logged: false,
            lines_relayed: 0,
            duration: Duration::ZERO,
        }
    }

    /// Exit code of a worker that exited on its own.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self.state {
            WorkerState::Completed(code) => Some(code),
            _ => None,
        }
    }

    /// Whether the run should be reported as a build failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == RestoreStatus::Failed
    }
}

/// Starts worker processes and relays their output to a host logger.
///
/// Every [`launch`](Self::launch) gets its own process, relay and error flag.
#[derive(Clone)]
pub struct WorkerLauncher {
    logger: Arc<dyn HostLogger>,
}

impl fmt::Debug for WorkerLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerLauncher").finish_non_exhaustive()
    }
}

impl WorkerLauncher {
    /// Create a launcher reporting to `logger`.
    #[must_use]
    pub fn new(logger: Arc<dyn HostLogger>) -> Self {
        Self { logger }
    }

    /// Run the worker described by `invocation` to completion or cancellation.
    ///
    /// Worker failures are reported through the logger and the returned
    /// [`WorkerReport`]. Only spawn failures and protocol violations are errors.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerLaunchFailure`] if the process cannot be started
    /// - [`Error::WorkerProtocolViolation`] if the worker emitted an unknown record type
    /// - [`Error::Codec`] if the stream payload cannot be encoded
    pub async fn launch(
        &self,
        invocation: &WorkerInvocation,
        cancel: &CancellationToken,
    ) -> Result<WorkerReport> {
        if cancel.is_cancelled() {
            tracing::info!("Restore canceled before the worker started");
            return Ok(WorkerReport::not_started(RestoreStatus::Canceled));
        }

        let plan = LaunchPlan::new(invocation)?;
        let flag = ErrorFlag::new();
        let tracking: Arc<dyn HostLogger> =
            Arc::new(ErrorTrackingLogger::new(Arc::clone(&self.logger), flag.clone()));

        let mut child = spawn(&plan, invocation).map_err(|source| {
            let err = Error::WorkerLaunchFailure {
                program: plan.program.display().to_string(),
                source,
            };
            tracking.log_error(&err.to_string());
            err
        })?;
        let start_time = Instant::now();
        emit_worker_started!(
            plan.program.display(),
            plan.transport,
            child.id().unwrap_or_default()
        );

        let relay = LogRelay::start(Arc::clone(&tracking));
        let stdout_task = relay_stdout(&mut child, &relay, Arc::clone(&tracking));
        let stderr_task = report_stderr(&mut child, Arc::clone(&tracking));
        relay.close();

        let stdin_task = plan
            .stdin_payload
            .clone()
            .map(|payload| write_payload(&mut child, payload, Arc::clone(&tracking)));

        let state = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => WorkerState::Completed(exit_code(status)),
                Err(e) => {
                    tracking.log_error(&format!("Failed waiting for restore worker: {e}"));
                    WorkerState::Faulted(e.to_string())
                }
            },
            () = cancel.cancelled() => {
                kill(&mut child).await;
                WorkerState::Killed
            }
        };

        if state == WorkerState::Killed {
            // Orphaned grandchildren may still hold the pipes open.
            stdout_task.abort();
            stderr_task.abort();
            if let Some(task) = &stdin_task {
                task.abort();
            }
        }
        if let Some(task) = stdin_task {
            join_io_task("stdin writer", task, tracking.as_ref()).await;
        }
        join_io_task("stdout reader", stdout_task, tracking.as_ref()).await;
        join_io_task("stderr reader", stderr_task, tracking.as_ref()).await;

        let summary = relay.finish().await.map_err(Error::from_relay)?;
        let duration = start_time.elapsed();

        let status = match &state {
            WorkerState::Killed => RestoreStatus::Canceled,
            WorkerState::Completed(0) => RestoreStatus::Succeeded,
            WorkerState::Completed(code) => {
                if !flag.is_raised() {
                    let err = Error::WorkerUnexpectedExit { exit_code: *code };
                    tracking.log_error(&err.to_string());
                }
                RestoreStatus::Failed
            }
            WorkerState::Faulted(_) | WorkerState::NotStarted => {
                RestoreStatus::Failed
            }
        };

        emit_worker_exited!(
            status,
            match state {
                WorkerState::Completed(code) => Some(code),
                _ => None,
            },
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        );
        if summary.embedded_files.is_empty() {
            tracing::debug!(lines = summary.lines_processed, "Worker output relayed");
        } else {
            tracing::debug!(
                lines = summary.lines_processed,
                embedded = summary.embedded_files.len(),
                "Worker output relayed with files to embed"
            );
        }

        Ok(WorkerReport {
            status,
            state,
            transport: Some(plan.transport),
            embedded_files: summary.embedded_files,
            errors_logged: flag.is_raised(),
            lines_relayed: summary.lines_processed,
            duration,
        })
    }
}

fn spawn(plan: &LaunchPlan, invocation: &WorkerInvocation) -> std::io::Result<Child> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if plan.stdin_payload.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    if let Some(dir) = &invocation.working_directory {
        cmd.current_dir(dir);
    }
    cmd.spawn()
}

fn relay_stdout(
    child: &mut Child,
    relay: &LogRelay,
    logger: Arc<dyn HostLogger>,
) -> JoinHandle<()> {
    let stdout = child.stdout.take();
    let sender = relay.sender();
    tokio::spawn(async move {
        let (Some(stdout), Some(sender)) = (stdout, sender) else {
            return;
        };
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            match next_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    emit_worker_output!("stdout", line);
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    logger.log_error(&format!("Failed reading restore worker output: {e}"));
                    break;
                }
            }
        }
    })
}

fn report_stderr(child: &mut Child, logger: Arc<dyn HostLogger>) -> JoinHandle<()> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let Some(stderr) = stderr else {
            return;
        };
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            match next_line(&mut reader, &mut buf).await {
                Ok(Some(line)) => {
                    emit_worker_output!("stderr", line);
                    if !line.trim().is_empty() {
                        logger.log_error(&line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    logger.log_error(&format!("Failed reading restore worker errors: {e}"));
                    break;
                }
            }
        }
    })
}

/// Read one line without its terminator. Invalid UTF-8 is replaced, not fatal.
async fn next_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn join_io_task(name: &str, task: JoinHandle<()>, logger: &dyn HostLogger) {
    // Aborted tasks after a kill are expected.
    if let Err(e) = task.await
        && e.is_panic()
    {
        logger.log_error(&format!("Restore worker {name} task panicked: {e}"));
    }
}

fn write_payload(child: &mut Child, payload: Bytes, logger: Arc<dyn HostLogger>) -> JoinHandle<()> {
    let stdin = child.stdin.take();
    tokio::spawn(async move {
        let Some(mut stdin) = stdin else {
            return;
        };
        let written = async {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        }
        .await;
        // Dropping the handle closes the pipe.
        drop(stdin);

        match written {
            Ok(()) => tracing::debug!(bytes = payload.len(), "Sent global properties on stdin"),
            Err(e) => logger.log_error(&format!(
                "Failed to write global properties to restore worker: {e}"
            )),
        }
    })
}

async fn kill(child: &mut Child) {
    tracing::info!(pid = ?child.id(), "Cancellation requested, killing restore worker");
    if let Err(e) = child.start_kill() {
        // Already exited.
        tracing::debug!(error = %e, "Restore worker was not running when killed");
    }
    let _ = child.wait().await;
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::WorkerExecutable;
    use restorekit_events::MemoryLogger;

    #[test]
    fn test_no_op_report() {
        let report = WorkerReport::no_op();
        assert_eq!(report.status, RestoreStatus::Succeeded);
        assert_eq!(report.state, WorkerState::NotStarted);
        assert!(report.transport.is_none());
        assert_eq!(report.exit_code(), None);
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_canceled_before_start() {
        let logger = Arc::new(MemoryLogger::new());
        let launcher = WorkerLauncher::new(logger.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let invocation = WorkerInvocation::new(
            WorkerExecutable::new("/nonexistent/worker"),
            "/sdk/MSBuild.dll",
            "app.csproj",
        );
        let report = launcher.launch(&invocation, &cancel).await.unwrap();
        assert_eq!(report.status, RestoreStatus::Canceled);
        assert_eq!(report.state, WorkerState::NotStarted);
        assert!(logger.entries().is_empty());
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_failure() {
        let logger = Arc::new(MemoryLogger::new());
        let launcher = WorkerLauncher::new(logger.clone());
        let invocation = WorkerInvocation::new(
            WorkerExecutable::new("/nonexistent/restorekit-worker"),
            "/sdk/MSBuild.dll",
            "app.csproj",
        );

        let err = launcher
            .launch(&invocation, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkerLaunchFailure { .. }));
        assert_eq!(logger.errors().len(), 1);
        assert!(logger.errors()[0].text.contains("/nonexistent/restorekit-worker"));
    }

    #[tokio::test]
    async fn test_next_line_replaces_invalid_utf8() {
        let mock = tokio_test::io::Builder::new()
            .read(b"crash \xff\xfe fragment\r\n")
            .read(b"{\"MessageType\":\"Message\"}\nlast")
            .build();
        let mut reader = BufReader::new(mock);
        let mut buf = Vec::new();

        let first = next_line(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(first, "crash \u{FFFD}\u{FFFD} fragment");
        let second = next_line(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(second, r#"{"MessageType":"Message"}"#);
        let last = next_line(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(last, "last");
        assert!(next_line(&mut reader, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panicking_reader_is_reported() {
        let logger = MemoryLogger::new();
        let task: JoinHandle<()> = tokio::spawn(async { panic!("reader bug") });
        join_io_task("stdout reader", task, &logger).await;

        let errors = logger.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.contains("stdout reader task panicked"));
    }

    #[tokio::test]
    async fn test_aborted_reader_is_not_reported() {
        let logger = MemoryLogger::new();
        let task = tokio::spawn(std::future::pending::<()>());
        task.abort();
        join_io_task("stderr reader", task, &logger).await;
        assert!(logger.entries().is_empty());
    }

    #[test]
    fn test_status_names() {
        assert_eq!(RestoreStatus::Canceled.to_string(), "canceled");
        assert_eq!(RestoreStatus::Failed.as_str(), "failed");
    }
}
