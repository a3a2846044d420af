//! Command execution for the restorekit CLI

use crate::cli::{CliError, Commands, EXIT_FAILED, EXIT_OK, RestoreArgs};
use crate::declarations::DeclarationFile;
use crate::shutdown::install_signal_handlers;
use restorekit_events::{HostLogger, TracingLogger};
use restorekit_worker::{
    HostCapabilities, RestoreOrchestrator, RestoreRequest, RestoreStatus, WorkerExecutable,
    WorkerInvocation, WorkerReport, generate_graph_file,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Run a parsed command and return the process exit code.
pub async fn execute(command: Commands) -> Result<i32, CliError> {
    match command {
        Commands::Restore(args) => execute_restore(&args).await,
        Commands::Graph {
            declarations,
            output,
            recursive,
        } => execute_graph(&declarations, &output, recursive),
    }
}

#[instrument(name = "restore", skip_all, fields(entry = %args.entry.display()))]
async fn execute_restore(args: &RestoreArgs) -> Result<i32, CliError> {
    let logger: Arc<dyn HostLogger> = Arc::new(TracingLogger);
    let file = DeclarationFile::load(&args.declarations)?;
    let batches = file.collect_batches(logger.as_ref())?;

    let request = RestoreRequest {
        batches,
        invocation: build_invocation(args),
        graph_file: args.graph_file.clone(),
    };
    let capabilities = HostCapabilities {
        binary_log: args.binary_log,
        interactive: args.interactive,
    };
    let orchestrator = RestoreOrchestrator::new(Arc::clone(&logger), capabilities);

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    let report = orchestrator
        .run(request, &file.expander(logger.as_ref()), &cancel)
        .await?;
    Ok(exit_code_for_report(&report))
}

fn build_invocation(args: &RestoreArgs) -> WorkerInvocation {
    let executable = args
        .worker_args
        .iter()
        .fold(WorkerExecutable::new(&args.worker), |exe, arg| {
            exe.with_selector_arg(arg)
        });

    let mut invocation = WorkerInvocation::new(executable, &args.build_engine, &args.entry);
    invocation.options = args.options();
    invocation.global_properties = args.properties.iter().cloned().collect();
    invocation.solution_path.clone_from(&args.solution);
    invocation.transport = args.transport.into();
    invocation
}

fn exit_code_for_report(report: &WorkerReport) -> i32 {
    info!(
        status = %report.status,
        exit_code = ?report.exit_code(),
        duration_ms = report.duration.as_millis(),
        "Restore finished"
    );
    match report.status {
        RestoreStatus::Succeeded | RestoreStatus::Canceled => EXIT_OK,
        RestoreStatus::Failed => EXIT_FAILED,
    }
}

#[instrument(name = "graph", skip_all, fields(output = %output.display()))]
fn execute_graph(declarations: &Path, output: &Path, recursive: bool) -> Result<i32, CliError> {
    let logger = TracingLogger;
    let file = DeclarationFile::load(declarations)?;
    let batches = file.collect_batches(&logger)?;
    let graph = generate_graph_file(batches, recursive, &file.expander(&logger), output)?;

    #[allow(clippy::print_stdout)]
    {
        println!(
            "Wrote restore graph with {} project(s) to {}",
            graph.projects().len(),
            output.display()
        );
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use restorekit_graph::AggregateGraph;
    use restorekit_worker::Transport;

    const DECLARATIONS: &str = r#"{
        "projects": [{
            "projectPath": "/src/app/app.csproj",
            "items": {
                "PackageReference": [{ "identity": "Serilog", "metadata": { "Version": "3.1.1" } }]
            }
        }]
    }"#;

    fn parse_restore(extra: &[&str]) -> RestoreArgs {
        let mut argv = vec![
            "restorekit",
            "restore",
            "-d",
            "decl.json",
            "--worker",
            "dotnet",
            "--worker-arg",
            "exec",
            "--worker-arg",
            "/sdk/NuGet.Build.Tasks.Console.dll",
            "--build-engine",
            "/sdk/MSBuild.dll",
            "--entry",
            "/src/app/app.csproj",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Restore(args) => *args,
            Commands::Graph { .. } => panic!("expected restore"),
        }
    }

    #[test]
    fn test_build_invocation() {
        let args = parse_restore(&[
            "-p",
            "Configuration=Release",
            "--solution",
            "/src/app.sln",
            "--transport",
            "stream",
            "--no-cache",
        ]);
        let invocation = build_invocation(&args);

        assert_eq!(
            invocation.executable.selector_args,
            vec!["exec", "/sdk/NuGet.Build.Tasks.Console.dll"]
        );
        assert_eq!(invocation.transport, Transport::Stream);
        assert_eq!(invocation.solution_path.as_deref(), Some("/src/app.sln"));
        assert_eq!(invocation.global_properties["Configuration"], "Release");
        assert!(invocation.options.no_cache);
    }

    #[test]
    fn test_graph_command_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let declarations = dir.path().join("declarations.json");
        let output = dir.path().join("obj").join("restore.graph.json");
        std::fs::write(&declarations, DECLARATIONS).unwrap();

        let code = execute_graph(&declarations, &output, false).unwrap();
        assert_eq!(code, EXIT_OK);

        let graph = AggregateGraph::read_from_file(&output).unwrap();
        assert_eq!(graph.entry_points(), vec!["/src/app/app.csproj"]);
    }

    #[test]
    fn test_graph_command_rejects_bad_declarations() {
        let dir = tempfile::tempdir().unwrap();
        let declarations = dir.path().join("declarations.json");
        std::fs::write(&declarations, "{ not json").unwrap();

        let err = execute_graph(&declarations, &dir.path().join("out.json"), false).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }

    #[tokio::test]
    async fn test_restore_with_missing_worker_fails() {
        let dir = tempfile::tempdir().unwrap();
        let declarations = dir.path().join("declarations.json");
        std::fs::write(&declarations, DECLARATIONS).unwrap();
        let declarations = declarations.display().to_string();

        let mut args = parse_restore(&[]);
        args.declarations = declarations.into();
        args.worker = dir.path().join("no-such-worker");

        let err = execute_restore(&args).await.unwrap_err();
        assert!(matches!(
            err,
            CliError::Restore(restorekit_worker::Error::WorkerLaunchFailure { .. })
        ));
    }
}
