//! Declaration files: the build engine's evaluated items, as JSON.
//!
//! ```json
//! {
//!   "duplicateMode": "warn",
//!   "warningPolicy": { "noWarn": ["NU1504"] },
//!   "projects": [{
//!     "projectPath": "/src/app/app.csproj",
//!     "targetFrameworks": ["net8.0"],
//!     "properties": { "PackageId": "App" },
//!     "items": {
//!       "PackageReference": [{ "identity": "Serilog", "metadata": { "Version": "3.1.1" } }]
//!     }
//!   }],
//!   "referencedProjects": []
//! }
//! ```

use crate::cli::CliError;
use indexmap::IndexMap;
use restorekit_events::{Diagnostic, HostLogger};
use restorekit_graph::collect::{project_spec, restore_spec};
use restorekit_graph::{
    BuildItem, Category, CollectorContext, DuplicateMode, GraphDiagnostic, GraphItem,
    ProjectExpander, Severity, WarningPolicy, collect,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_duplicate_mode() -> DuplicateMode {
    DuplicateMode::Warn
}

/// Top-level declaration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclarationFile {
    #[serde(default = "default_duplicate_mode")]
    pub duplicate_mode: DuplicateMode,
    #[serde(default)]
    pub warning_policy: WarningPolicy,
    /// Projects to restore
    pub projects: Vec<ProjectDeclarations>,
    /// Projects only reachable through references, used for recursive restores
    #[serde(default)]
    pub referenced_projects: Vec<ProjectDeclarations>,
}

/// Evaluated declarations of one project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeclarations {
    pub project_path: PathBuf,
    #[serde(default)]
    pub target_frameworks: Vec<String>,
    /// Project-level properties (`PackageId`, `RestoreOutputPath`, ...)
    #[serde(default)]
    pub properties: IndexMap<String, String>,
    #[serde(default)]
    pub items: IndexMap<Category, Vec<BuildItem>>,
}

impl DeclarationFile {
    /// Load and parse a declaration file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!(
                "Failed to read declaration file {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text).map_err(|e| {
            CliError::config_with_help(
                format!("Invalid declaration file {}: {e}", path.display()),
                "Declaration files are JSON objects with a `projects` array",
            )
        })
    }

    /// Parse declaration file contents.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Collect every declared project into graph item batches.
    ///
    /// Duplicate warnings that survive the warning policy are sent to `logger`.
    pub fn collect_batches(
        &self,
        logger: &dyn HostLogger,
    ) -> restorekit_graph::Result<Vec<Vec<GraphItem>>> {
        let mut batches = Vec::new();
        for project in &self.projects {
            batches.extend(project.collect(
                true,
                self.duplicate_mode,
                &self.warning_policy,
                logger,
            )?);
        }
        Ok(batches)
    }

    /// Expander over the file's referenced projects.
    pub fn expander<'a>(&'a self, logger: &'a dyn HostLogger) -> DeclarationExpander<'a> {
        DeclarationExpander {
            file: self,
            logger,
        }
    }
}

impl ProjectDeclarations {
    fn project_key(&self) -> String {
        self.project_path.display().to_string()
    }

    fn context(&self) -> CollectorContext {
        CollectorContext::new(self.project_key())
            .with_project_path(&self.project_path)
            .with_target_frameworks(&self.target_frameworks)
    }

    fn collect(
        &self,
        entry_point: bool,
        mode: DuplicateMode,
        policy: &WarningPolicy,
        logger: &dyn HostLogger,
    ) -> restorekit_graph::Result<Vec<Vec<GraphItem>>> {
        let ctx = self.context();

        let declaration = BuildItem {
            identity: self.project_key(),
            metadata: self.properties.clone(),
        };
        let mut roots = vec![project_spec(&declaration, &ctx)?];
        if entry_point {
            roots.push(restore_spec(&ctx)?);
        }

        let mut batches = vec![roots];
        for category in Category::ALL {
            let Some(declarations) = self.items.get(&category) else {
                continue;
            };
            let collected = collect(category, declarations, &ctx, mode, policy)?;
            if let Some(diagnostic) = &collected.diagnostic {
                logger.log_diagnostic(&to_host_diagnostic(diagnostic, &self.project_path));
            }
            batches.push(collected.items);
        }
        Ok(batches)
    }
}

fn to_host_diagnostic(diagnostic: &GraphDiagnostic, project_path: &Path) -> Diagnostic {
    let host = match diagnostic.severity {
        Severity::Warning => Diagnostic::warning(&diagnostic.message),
        Severity::Error => Diagnostic::error(&diagnostic.message),
    };
    let mut host = host.with_code(&diagnostic.code);
    host.file = Some(project_path.display().to_string());
    host
}

/// Expands referenced projects from a declaration file.
pub struct DeclarationExpander<'a> {
    file: &'a DeclarationFile,
    logger: &'a dyn HostLogger,
}

impl ProjectExpander for DeclarationExpander<'_> {
    fn expand(&self, project_path: &str) -> restorekit_graph::Result<Vec<GraphItem>> {
        let project = self
            .file
            .referenced_projects
            .iter()
            .chain(&self.file.projects)
            .find(|p| p.project_path == Path::new(project_path))
            .ok_or_else(|| {
                restorekit_graph::Error::project_expansion(
                    project_path,
                    "the project is not listed in the declaration file",
                )
            })?;

        let batches = project.collect(
            false,
            self.file.duplicate_mode,
            &self.file.warning_policy,
            self.logger,
        )?;
        Ok(batches.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restorekit_events::MemoryLogger;
    use restorekit_graph::{GraphItemKind, assemble};

    const FILE: &str = r#"{
        "projects": [{
            "projectPath": "/src/app/app.csproj",
            "targetFrameworks": ["net8.0"],
            "properties": { "PackageId": "App" },
            "items": {
                "PackageReference": [
                    { "identity": "Serilog", "metadata": { "Version": "3.1.1" } },
                    { "identity": "serilog", "metadata": { "Version": "4.0.0" } }
                ],
                "ProjectReference": [
                    { "identity": "../lib/lib.csproj" }
                ]
            }
        }],
        "referencedProjects": [{
            "projectPath": "/src/lib/lib.csproj",
            "targetFrameworks": ["net8.0"],
            "items": {
                "PackageReference": [
                    { "identity": "Newtonsoft.Json", "metadata": { "Version": "13.0.3" } }
                ]
            }
        }]
    }"#;

    #[test]
    fn test_collect_batches_warns_on_duplicates() {
        let file = DeclarationFile::parse(FILE).unwrap();
        assert_eq!(file.duplicate_mode, DuplicateMode::Warn);

        let logger = MemoryLogger::new();
        let batches = file.collect_batches(&logger).unwrap();
        let items: Vec<&GraphItem> = batches.iter().flatten().collect();

        let dependencies: Vec<&&GraphItem> = items
            .iter()
            .filter(|i| i.kind() == GraphItemKind::Dependency)
            .collect();
        assert_eq!(dependencies.len(), 1);
        assert_eq!(dependencies[0].property("VersionRange"), Some("3.1.1"));

        let warnings = logger.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code.as_deref(), Some("NU1504"));
        assert_eq!(warnings[0].file.as_deref(), Some("/src/app/app.csproj"));
    }

    #[test]
    fn test_no_warn_policy_suppresses_duplicate_warning() {
        let mut file = DeclarationFile::parse(FILE).unwrap();
        file.warning_policy.no_warn.insert("NU1504".to_string());
        let logger = MemoryLogger::new();
        file.collect_batches(&logger).unwrap();
        assert!(logger.warnings().is_empty());
    }

    #[test]
    fn test_hard_fail_mode_rejects_duplicates() {
        let mut file = DeclarationFile::parse(FILE).unwrap();
        file.duplicate_mode = DuplicateMode::HardFail;
        let err = file.collect_batches(&MemoryLogger::new()).unwrap_err();
        assert!(matches!(err, restorekit_graph::Error::DuplicateItems { .. }));
    }

    #[test]
    fn test_recursive_assembly_expands_referenced_projects() {
        let file = DeclarationFile::parse(FILE).unwrap();
        let logger = MemoryLogger::new();
        let batches = file.collect_batches(&logger).unwrap();
        let graph = assemble(batches, true, &file.expander(&logger)).unwrap();

        assert_eq!(graph.entry_points(), vec!["/src/app/app.csproj"]);
        let projects = graph.projects();
        assert!(projects.contains_key("/src/lib/lib.csproj"));
        assert!(graph.items_of(GraphItemKind::Dependency).any(|i| i.id() == Some("Newtonsoft.Json")));
    }

    #[test]
    fn test_unknown_referenced_project_fails_expansion() {
        let file = DeclarationFile::parse(FILE).unwrap();
        let logger = MemoryLogger::new();
        let err = file.expander(&logger).expand("/src/missing/missing.csproj").unwrap_err();
        assert!(matches!(err, restorekit_graph::Error::ProjectExpansion { .. }));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = DeclarationFile::load(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, CliError::Config { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declarations.json");
        std::fs::write(&path, FILE).unwrap();
        let file = DeclarationFile::load(&path).unwrap();
        assert_eq!(file.projects.len(), 1);
        assert_eq!(file.referenced_projects.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_category() {
        let text = r#"{"projects":[{"projectPath":"/a.csproj","items":{"Compile":[]}}]}"#;
        assert!(DeclarationFile::parse(text).is_err());
    }
}
