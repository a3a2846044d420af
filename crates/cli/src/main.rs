//! restorekit CLI Application
//!
//! Collects a project's build declarations into a restore graph and hands
//! the graph to an external restore worker, relaying the worker's log
//! records back to the terminal.

mod cli;
mod commands;
mod declarations;
mod shutdown;
mod tracing;

use crate::tracing::{TracingConfig, init_tracing};
use cli::{CliError, EXIT_CLI, exit_code_for, render_error};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::parse();

    let config = TracingConfig {
        format: cli.format,
        level: cli.level.into(),
        ..TracingConfig::default()
    };
    if let Err(e) = init_tracing(config) {
        render_error(CliError::config(format!("{e:?}")));
        return exit_code(EXIT_CLI);
    }

    ::tracing::debug!(command = ?cli.command, "Starting restorekit");

    match commands::execute(cli.command).await {
        Ok(code) => exit_code(code),
        Err(err) => {
            let code = exit_code_for(&err);
            render_error(err);
            exit_code(code)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
