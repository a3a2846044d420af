use crate::tracing::{LogLevel, TracingFormat};
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, Report};
use restorekit_worker::{RestoreOptions, Transport};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Restore succeeded, had nothing to do, or was canceled
pub const EXIT_OK: i32 = 0;
/// Restore ran and failed
pub const EXIT_FAILED: i32 = 1;
/// CLI, declaration, or graph error before a worker ran
pub const EXIT_CLI: i32 = 2;

/// CLI-specific error types with exit code mapping
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Invalid arguments or declarations
    #[error("Configuration error: {message}")]
    #[diagnostic(code(restorekit::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// The restore itself failed to run
    #[error(transparent)]
    #[diagnostic(transparent)]
    Restore(#[from] restorekit_worker::Error),
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

impl From<restorekit_graph::Error> for CliError {
    fn from(err: restorekit_graph::Error) -> Self {
        Self::Restore(err.into())
    }
}

/// Map CLI error to an exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Restore(restorekit_worker::Error::Graph(_)) => EXIT_CLI,
        CliError::Restore(_) => EXIT_FAILED,
    }
}

/// Render an error through miette on stderr
#[allow(clippy::print_stderr)]
pub fn render_error(err: CliError) {
    let report = Report::new(err);
    eprintln!("{report:?}");
    let _ = io::stderr().flush();
}

/// Restore packages for a project by driving an external restore worker.
#[derive(Parser, Debug)]
#[command(name = "restorekit")]
#[command(about = "Restore package dependencies through an external restore worker")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        global = true,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(
        long,
        global = true,
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub format: TracingFormat,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Assemble the restore graph and run the restore worker.
    #[command(about = "Assemble the restore graph and run the restore worker")]
    Restore(Box<RestoreArgs>),

    /// Assemble the restore graph and write it to a file.
    #[command(about = "Write the restore graph to a file without restoring")]
    Graph {
        /// Declaration file describing the projects to restore.
        #[arg(long, short = 'd', value_name = "FILE")]
        declarations: PathBuf,
        /// Destination of the graph file.
        #[arg(long, short = 'o', value_name = "FILE")]
        output: PathBuf,
        /// Follow project references into referenced projects.
        #[arg(long)]
        recursive: bool,
    },
}

/// Worker transport selection.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum TransportArg {
    /// Pass global properties as a command-line argument
    #[default]
    Argv,
    /// Pass global properties as a binary stream on stdin
    Stream,
}

impl From<TransportArg> for Transport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Argv => Self::Argv,
            TransportArg::Stream => Self::Stream,
        }
    }
}

/// Arguments of `restorekit restore`.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RestoreArgs {
    /// Declaration file describing the projects to restore.
    #[arg(long, short = 'd', value_name = "FILE")]
    pub declarations: PathBuf,

    /// Restore worker executable.
    #[arg(long, env = "RESTOREKIT_WORKER", value_name = "PROGRAM")]
    pub worker: PathBuf,

    /// Argument placed before the restore arguments (e.g. a runtime selector).
    #[arg(long = "worker-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub worker_args: Vec<String>,

    /// Path of the build engine the worker loads.
    #[arg(long, env = "RESTOREKIT_BUILD_ENGINE", value_name = "PATH")]
    pub build_engine: PathBuf,

    /// Entry project or solution file.
    #[arg(long, value_name = "PATH")]
    pub entry: PathBuf,

    /// Global property passed to the worker, as KEY=VALUE.
    #[arg(long = "property", short = 'p', value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub properties: Vec<(String, String)>,

    /// Solution the entry project belongs to.
    #[arg(long, value_name = "PATH")]
    pub solution: Option<String>,

    /// How global properties reach the worker.
    #[arg(
        long,
        env = "RESTOREKIT_TRANSPORT",
        value_enum,
        default_value_t = TransportArg::Argv
    )]
    pub transport: TransportArg,

    /// Keep the restore graph at this path instead of a temporary file.
    #[arg(long, env = "RESTOREKIT_GRAPH_FILE", value_name = "FILE")]
    pub graph_file: Option<PathBuf>,

    /// Restore referenced projects as well.
    #[arg(long)]
    pub recursive: bool,
    /// Do not use the HTTP cache.
    #[arg(long)]
    pub no_cache: bool,
    /// Treat package source failures as warnings.
    #[arg(long)]
    pub ignore_failed_sources: bool,
    /// Allow the worker to prompt for credentials.
    #[arg(long)]
    pub interactive: bool,
    /// Re-resolve all dependencies.
    #[arg(long)]
    pub force: bool,
    /// Re-evaluate all dependencies even when a lock file exists.
    #[arg(long)]
    pub force_evaluate: bool,
    /// Suppress warnings and errors from the worker.
    #[arg(long)]
    pub hide_warnings_and_errors: bool,
    /// Restore projects one at a time.
    #[arg(long)]
    pub disable_parallel: bool,
    /// Ask the worker to report files for the binary log.
    #[arg(long)]
    pub embed_files_in_binlog: bool,

    /// The host records a binary log.
    #[arg(long)]
    pub binary_log: bool,
}

impl RestoreArgs {
    /// Worker options from the flags.
    #[must_use]
    pub fn options(&self) -> RestoreOptions {
        RestoreOptions {
            recursive: self.recursive,
            no_cache: self.no_cache,
            ignore_failed_sources: self.ignore_failed_sources,
            interactive: self.interactive,
            force: self.force,
            force_evaluate: self.force_evaluate,
            hide_warnings_and_errors: self.hide_warnings_and_errors,
            disable_parallel: self.disable_parallel,
            embed_files_in_binlog: self.embed_files_in_binlog,
            ..RestoreOptions::default()
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse command line arguments into a CLI structure.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
