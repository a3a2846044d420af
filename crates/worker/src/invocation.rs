//! Worker command construction and property transport selection.
//!
//! The worker is invoked as
//! `<program> [selector args] "<options>" "<build-engine>" "<entry>" ["<properties>"]`.
//! Global properties travel on the command line unless the quoted command
//! line would exceed [`MAX_COMMAND_LINE_LENGTH`] characters or the caller asked
//! for stream transport, in which case they are written to the worker's stdin
//! with the binary property codec.

use crate::codec;
use crate::error::{Error, Result};
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Longest command line, in characters, that still carries properties inline.
pub const MAX_COMMAND_LINE_LENGTH: usize = 8000;

/// Sentinel the host build engine uses for an unset solution path.
pub const UNDEFINED_SOLUTION: &str = "*Undefined*";

/// Property always injected so the worker skips package-provided imports.
pub const EXCLUDE_RESTORE_PACKAGE_IMPORTS: &str = "ExcludeRestorePackageImports";

/// Property carrying the directory the host build was started from.
pub const ORIGINAL_STARTUP_DIRECTORY: &str = "OriginalMSBuildStartupDirectory";

/// Property carrying the solution being restored.
pub const SOLUTION_PATH: &str = "SolutionPath";

/// Property carrying the location of the written restore graph.
pub const RESTORE_GRAPH_PATH: &str = "RestoreGraphPath";

/// The executable that runs the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExecutable {
    /// Program to start
    pub program: PathBuf,
    /// Arguments placed before everything else, e.g. the worker assembly
    /// when the program is a runtime host
    #[serde(default)]
    pub selector_args: Vec<String>,
}

impl WorkerExecutable {
    /// An executable started directly.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            selector_args: Vec::new(),
        }
    }

    /// Add a selector argument.
    #[must_use]
    pub fn with_selector_arg(mut self, arg: impl Into<String>) -> Self {
        self.selector_args.push(arg.into());
        self
    }
}

/// How global properties reach the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Last command-line argument
    #[default]
    Argv,
    /// Codec payload on stdin
    Stream,
}

impl Transport {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Argv => "argv",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restore switches passed to the worker as its options argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestoreOptions {
    /// Restore referenced projects too
    pub recursive: bool,
    /// Bypass the HTTP cache
    pub no_cache: bool,
    /// Treat unreachable sources as warnings
    pub ignore_failed_sources: bool,
    /// Allow interactive authentication prompts
    pub interactive: bool,
    /// Re-resolve even when outputs are up to date
    pub force: bool,
    /// Re-evaluate projects even when the graph is unchanged
    pub force_evaluate: bool,
    /// Do not print worker warnings and errors
    pub hide_warnings_and_errors: bool,
    /// Restore one project at a time
    pub disable_parallel: bool,
    /// Ask the worker to report files to embed in the build log
    pub embed_files_in_binlog: bool,
    /// Additional options appended verbatim
    pub extra: IndexMap<String, String>,
}

impl RestoreOptions {
    /// The ordered `key=value` map the worker receives.
    #[must_use]
    pub fn to_option_map(&self) -> IndexMap<String, String> {
        let switches = [
            ("Recursive", self.recursive),
            ("NoCache", self.no_cache),
            ("IgnoreFailedSources", self.ignore_failed_sources),
            ("Interactive", self.interactive),
            ("Force", self.force),
            ("ForceEvaluate", self.force_evaluate),
            ("HideWarningsAndErrors", self.hide_warnings_and_errors),
            ("DisableParallel", self.disable_parallel),
            ("EmbedFilesInBinlog", self.embed_files_in_binlog),
        ];
        let mut map: IndexMap<String, String> = switches
            .into_iter()
            .map(|(key, on)| (key.to_string(), bool_value(on).to_string()))
            .collect();
        for (key, value) in &self.extra {
            map.insert(key.clone(), value.clone());
        }
        map
    }
}

const fn bool_value(value: bool) -> &'static str {
    if value { "True" } else { "False" }
}

/// Everything needed to start one worker process.
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    /// Program and selector arguments
    pub executable: WorkerExecutable,
    /// Worker switches
    pub options: RestoreOptions,
    /// Path to the host build engine binary
    pub build_engine_path: PathBuf,
    /// Entry project or solution
    pub entry_project: PathBuf,
    /// Host global properties, before worker-specific injection
    pub global_properties: IndexMap<String, String>,
    /// Directory the host build was started from
    pub startup_directory: PathBuf,
    /// Solution path as reported by the host, possibly the undefined sentinel
    pub solution_path: Option<String>,
    /// Requested transport. `Argv` still switches to `Stream` for long command lines.
    pub transport: Transport,
    /// Working directory for the worker
    pub working_directory: Option<PathBuf>,
}

impl WorkerInvocation {
    /// An invocation with no global properties, argv transport, and the
    /// current directory as startup directory.
    pub fn new(
        executable: WorkerExecutable,
        build_engine_path: impl Into<PathBuf>,
        entry_project: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable,
            options: RestoreOptions::default(),
            build_engine_path: build_engine_path.into(),
            entry_project: entry_project.into(),
            global_properties: IndexMap::new(),
            startup_directory: std::env::current_dir().unwrap_or_default(),
            solution_path: None,
            transport: Transport::Argv,
            working_directory: None,
        }
    }

    /// Global properties as the worker must see them.
    #[must_use]
    pub fn worker_global_properties(&self) -> IndexMap<String, String> {
        global_properties_for_worker(
            &self.global_properties,
            &self.startup_directory,
            self.solution_path.as_deref(),
        )
    }
}

/// Add the properties every worker run requires to the host's global properties.
///
/// `SolutionPath` is set only when `solution_path` is defined and is not
/// [`UNDEFINED_SOLUTION`]; otherwise any inherited value is removed.
#[must_use]
pub fn global_properties_for_worker(
    host_properties: &IndexMap<String, String>,
    startup_directory: &Path,
    solution_path: Option<&str>,
) -> IndexMap<String, String> {
    let mut properties = host_properties.clone();
    properties.insert(EXCLUDE_RESTORE_PACKAGE_IMPORTS.to_string(), "true".to_string());
    properties.insert(
        ORIGINAL_STARTUP_DIRECTORY.to_string(),
        startup_directory.to_string_lossy().into_owned(),
    );
    match solution_path.map(str::trim) {
        Some(path) if !path.is_empty() && !path.eq_ignore_ascii_case(UNDEFINED_SOLUTION) => {
            properties.insert(SOLUTION_PATH.to_string(), path.to_string());
        }
        _ => {
            properties.shift_remove(SOLUTION_PATH);
        }
    }
    properties
}

/// Escape a key or value for a `key=value;...` property string.
#[must_use]
pub fn escape_property(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ';' => escaped.push_str("%3B"),
            '"' => escaped.push_str("%22"),
            '=' => escaped.push_str("%3D"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape_property`]. Unknown escapes are kept as written.
#[must_use]
pub fn unescape_property(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = match tail.get(..3) {
            Some(code) if code.eq_ignore_ascii_case("%25") => Some('%'),
            Some(code) if code.eq_ignore_ascii_case("%3B") => Some(';'),
            Some(code) if code.eq_ignore_ascii_case("%22") => Some('"'),
            Some(code) if code.eq_ignore_ascii_case("%3D") => Some('='),
            _ => None,
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Join a map into an escaped `key=value;key=value` string.
#[must_use]
pub fn format_property_string(properties: &IndexMap<String, String>) -> String {
    properties
        .iter()
        .map(|(key, value)| format!("{}={}", escape_property(key), escape_property(value)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a string produced by [`format_property_string`].
///
/// # Errors
///
/// Fails on a segment without `=`.
pub fn parse_property_string(text: &str) -> Result<IndexMap<String, String>> {
    let mut properties = IndexMap::new();
    for segment in text.split(';').filter(|s| !s.is_empty()) {
        let (key, value) = segment
            .split_once('=')
            .ok_or_else(|| Error::codec(format!("property segment '{segment}' has no '='")))?;
        properties.insert(unescape_property(key), unescape_property(value));
    }
    Ok(properties)
}

fn quoted_length(arg: &str) -> usize {
    arg.chars().count() + 2
}

/// Length of the command line with every argument quoted and space separated.
#[must_use]
pub fn command_line_length(program: &Path, args: &[String]) -> usize {
    let program = program.to_string_lossy();
    args.iter()
        .fold(quoted_length(&program), |total, arg| total + 1 + quoted_length(arg))
}

/// The resolved argv and stdin payload for one launch.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    /// Program to start
    pub program: PathBuf,
    /// Arguments in worker order
    pub args: Vec<String>,
    /// Transport actually used
    pub transport: Transport,
    /// Codec payload for stdin under stream transport
    pub stdin_payload: Option<Bytes>,
    /// Length of the command line with properties inline
    pub measured_length: usize,
    /// Properties the worker receives, through either transport
    pub global_properties: IndexMap<String, String>,
}

impl LaunchPlan {
    /// Build the command line and choose the transport.
    ///
    /// # Errors
    ///
    /// Fails if the stream payload cannot be encoded.
    pub fn new(invocation: &WorkerInvocation) -> Result<Self> {
        let global_properties = invocation.worker_global_properties();

        let mut args = invocation.executable.selector_args.clone();
        args.push(format_property_string(&invocation.options.to_option_map()));
        args.push(invocation.build_engine_path.to_string_lossy().into_owned());
        args.push(invocation.entry_project.to_string_lossy().into_owned());

        let property_arg = format_property_string(&global_properties);
        let measured_length = command_line_length(&invocation.executable.program, &args)
            + 1
            + quoted_length(&property_arg);

        let transport = if invocation.transport == Transport::Stream
            || measured_length > MAX_COMMAND_LINE_LENGTH
        {
            Transport::Stream
        } else {
            Transport::Argv
        };

        let stdin_payload = match transport {
            Transport::Argv => {
                args.push(property_arg);
                None
            }
            Transport::Stream => Some(codec::encode(&global_properties)?),
        };

        tracing::debug!(
            program = %invocation.executable.program.display(),
            %transport,
            measured_length,
            properties = global_properties.len(),
            "Planned worker launch"
        );

        Ok(Self {
            program: invocation.executable.program.clone(),
            args,
            transport,
            stdin_payload,
            measured_length,
            global_properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> WorkerInvocation {
        let mut invocation = WorkerInvocation::new(
            WorkerExecutable::new("/usr/bin/dotnet").with_selector_arg("/sdk/restore-worker.dll"),
            "/sdk/MSBuild.dll",
            "/src/app/app.csproj",
        );
        invocation.startup_directory = PathBuf::from("/src");
        invocation
            .global_properties
            .insert("Configuration".to_string(), "Release".to_string());
        invocation
    }

    #[test]
    fn test_required_properties_are_injected() {
        let properties = invocation().worker_global_properties();
        assert_eq!(properties["ExcludeRestorePackageImports"], "true");
        assert_eq!(properties["OriginalMSBuildStartupDirectory"], "/src");
        assert_eq!(properties["Configuration"], "Release");
        assert!(!properties.contains_key("SolutionPath"));
    }

    #[test]
    fn test_solution_path_only_when_defined() {
        let host = IndexMap::from([("SolutionPath".to_string(), "*Undefined*".to_string())]);
        let startup = Path::new("/src");

        let properties = global_properties_for_worker(&host, startup, Some("*Undefined*"));
        assert!(!properties.contains_key("SolutionPath"));

        let properties = global_properties_for_worker(&host, startup, None);
        assert!(!properties.contains_key("SolutionPath"));

        let properties = global_properties_for_worker(&host, startup, Some("/src/app.sln"));
        assert_eq!(properties["SolutionPath"], "/src/app.sln");
    }

    #[test]
    fn test_argument_order() {
        let mut invocation = invocation();
        invocation.options.recursive = true;
        let plan = LaunchPlan::new(&invocation).unwrap();

        assert_eq!(plan.transport, Transport::Argv);
        assert!(plan.stdin_payload.is_none());
        assert_eq!(plan.args.len(), 5);
        assert_eq!(plan.args[0], "/sdk/restore-worker.dll");
        assert!(plan.args[1].starts_with("Recursive=True;NoCache=False"));
        assert_eq!(plan.args[2], "/sdk/MSBuild.dll");
        assert_eq!(plan.args[3], "/src/app/app.csproj");
        assert_eq!(
            parse_property_string(&plan.args[4]).unwrap(),
            plan.global_properties
        );
    }

    #[test]
    fn test_long_command_line_switches_to_stream() {
        let mut invocation = invocation();
        invocation
            .global_properties
            .insert("RestoreSources".to_string(), "s".repeat(9000));
        let plan = LaunchPlan::new(&invocation).unwrap();

        assert!(plan.measured_length > MAX_COMMAND_LINE_LENGTH);
        assert_eq!(plan.transport, Transport::Stream);
        assert_eq!(plan.args.len(), 4);
        assert!(plan.args.iter().all(|arg| !arg.contains("RestoreSources")));

        let payload = plan.stdin_payload.unwrap();
        let decoded = codec::decode(&payload, codec::TextEncoding::Plain).unwrap();
        assert_eq!(decoded, plan.global_properties);
    }

    #[test]
    fn test_preselected_stream_transport() {
        let mut invocation = invocation();
        invocation.transport = Transport::Stream;
        let plan = LaunchPlan::new(&invocation).unwrap();
        assert_eq!(plan.transport, Transport::Stream);
        assert_eq!(plan.args.len(), 4);
        assert!(plan.stdin_payload.is_some());
    }

    #[test]
    fn test_length_boundary() {
        let program = Path::new("w");
        let args = vec!["a".to_string(), "bc".to_string()];
        // "w" "a" "bc"
        assert_eq!(command_line_length(program, &args), 3 + 1 + 3 + 1 + 4);
    }

    #[test]
    fn test_property_string_escaping() {
        let properties = IndexMap::from([
            ("A".to_string(), "x;y".to_string()),
            ("B".to_string(), "50%".to_string()),
            ("C".to_string(), "say \"hi\"".to_string()),
            ("D".to_string(), "k=v".to_string()),
            ("E".to_string(), String::new()),
        ]);
        let text = format_property_string(&properties);
        assert!(!text.contains('"'));
        assert_eq!(text.matches(';').count(), 4);
        assert_eq!(parse_property_string(&text).unwrap(), properties);
    }

    #[test]
    fn test_unescape_keeps_unknown_sequences() {
        assert_eq!(unescape_property("100%"), "100%");
        assert_eq!(unescape_property("%41%3b"), "%41;");
    }

    #[test]
    fn test_option_map_order_and_extras() {
        let mut options = RestoreOptions {
            no_cache: true,
            ..RestoreOptions::default()
        };
        options
            .extra
            .insert("CleanupAssetsForUnsupportedProjects".to_string(), "True".to_string());
        let map = options.to_option_map();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys[0], "Recursive");
        assert_eq!(keys.last(), Some(&"CleanupAssetsForUnsupportedProjects"));
        assert_eq!(map["NoCache"], "True");
        assert_eq!(map["Force"], "False");
    }
}
