//! Collectors turning raw build declarations into graph items.
//!
//! Each collector is a pure function over one batch of declarations. Blank
//! identifiers are skipped, optional metadata is copied only when present,
//! and framework-scoped categories carry `TargetFrameworks` when the context
//! names frameworks. Any "seen" bookkeeping lives inside a single call.

use crate::item::{BuildItem, CollectorContext, GraphItem, GraphItemKind};
use crate::reconcile::{
    DedupKey, DuplicateCheck, DuplicateMode, GraphDiagnostic, WarningPolicy, reconcile_batch,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Optional project metadata copied onto a `ProjectSpec` item.
const PROJECT_SPEC_PROPERTIES: &[&str] = &[
    "ProjectStyle",
    "OutputPath",
    "PackagesPath",
    "Sources",
    "FallbackFolders",
    "ConfigFilePaths",
    "CrossTargeting",
    "TargetFrameworks",
    "ProjectVersion",
    "RestorePackagesWithLockFile",
    "RestoreLockedMode",
    "NuGetLockFilePath",
    "CentralPackageVersionsManagementEnabled",
];

/// Optional package reference metadata copied onto a `Dependency` item.
const DEPENDENCY_PROPERTIES: &[&str] = &[
    "IncludeAssets",
    "ExcludeAssets",
    "PrivateAssets",
    "NoWarn",
    "IsImplicitlyDefined",
    "GeneratePathProperty",
    "Aliases",
    "VersionOverride",
];

/// Optional project reference metadata copied onto a `ProjectReference` item.
const PROJECT_REFERENCE_PROPERTIES: &[&str] = &["IncludeAssets", "ExcludeAssets", "PrivateAssets"];

/// A declaration category, one per collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// `ProjectReference` items.
    ProjectReference,
    /// `PackageReference` items.
    PackageReference,
    /// `FrameworkReference` items.
    FrameworkReference,
    /// `PackageDownload` items.
    PackageDownload,
    /// `PackageVersion` items (central version pins).
    PackageVersion,
    /// `FrameworkAssembly` items.
    FrameworkAssembly,
    /// `NuGetAuditSuppress` items.
    NuGetAuditSuppress,
}

impl Category {
    /// All categories.
    pub const ALL: [Self; 7] = [
        Self::ProjectReference,
        Self::PackageReference,
        Self::FrameworkReference,
        Self::PackageDownload,
        Self::PackageVersion,
        Self::FrameworkAssembly,
        Self::NuGetAuditSuppress,
    ];

    /// The build item name this category is declared with.
    #[must_use]
    pub fn item_name(self) -> &'static str {
        match self {
            Self::ProjectReference => "ProjectReference",
            Self::PackageReference => "PackageReference",
            Self::FrameworkReference => "FrameworkReference",
            Self::PackageDownload => "PackageDownload",
            Self::PackageVersion => "PackageVersion",
            Self::FrameworkAssembly => "FrameworkAssembly",
            Self::NuGetAuditSuppress => "NuGetAuditSuppress",
        }
    }

    /// The graph item kind this category produces.
    #[must_use]
    pub fn kind(self) -> GraphItemKind {
        match self {
            Self::ProjectReference => GraphItemKind::ProjectReference,
            Self::PackageReference => GraphItemKind::Dependency,
            Self::FrameworkReference => GraphItemKind::FrameworkReference,
            Self::PackageDownload => GraphItemKind::DownloadDependency,
            Self::PackageVersion => GraphItemKind::CentralPackageVersion,
            Self::FrameworkAssembly => GraphItemKind::FrameworkAssembly,
            Self::NuGetAuditSuppress => GraphItemKind::NuGetAuditSuppress,
        }
    }

    /// The identity duplicates are detected on.
    #[must_use]
    pub fn dedup_key(self) -> DedupKey {
        match self {
            Self::PackageReference
            | Self::FrameworkReference
            | Self::PackageVersion
            | Self::NuGetAuditSuppress => DedupKey::Identifier,
            Self::PackageDownload => DedupKey::IdentifierAndVersion,
            Self::ProjectReference | Self::FrameworkAssembly => DedupKey::None,
        }
    }

    /// Stable code of the duplicate diagnostic.
    #[must_use]
    pub fn duplicate_code(self) -> &'static str {
        match self {
            Self::PackageReference => "NU1504",
            Self::PackageDownload => "NU1505",
            Self::PackageVersion => "NU1506",
            Self::FrameworkReference => "NU1507",
            Self::NuGetAuditSuppress => "NU1508",
            Self::ProjectReference | Self::FrameworkAssembly => "NU1500",
        }
    }

    /// Whether declarations may be scoped to a subset of target frameworks.
    #[must_use]
    pub fn is_framework_scoped(self) -> bool {
        !matches!(self, Self::NuGetAuditSuppress)
    }

    /// Run this category's collector without duplicate reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDeclaration`] for malformed declarations.
    pub fn collect_raw(
        self,
        declarations: &[BuildItem],
        ctx: &CollectorContext,
    ) -> Result<Vec<GraphItem>> {
        match self {
            Self::ProjectReference => project_references(declarations, ctx),
            Self::PackageReference => package_references(declarations, ctx),
            Self::FrameworkReference => framework_references(declarations, ctx),
            Self::PackageDownload => package_downloads(declarations, ctx),
            Self::PackageVersion => central_package_versions(declarations, ctx),
            Self::FrameworkAssembly => framework_assemblies(declarations, ctx),
            Self::NuGetAuditSuppress => audit_suppressions(declarations, ctx),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.item_name())
    }
}

/// Items collected for one category, after reconciliation.
#[derive(Debug, Clone)]
pub struct Collected {
    /// Surviving items in collection order.
    pub items: Vec<GraphItem>,
    /// Duplicate warning, when one was raised and not suppressed.
    pub diagnostic: Option<GraphDiagnostic>,
}

/// Collect a category and reconcile its duplicates.
///
/// # Errors
///
/// Returns [`Error::InvalidDeclaration`] for malformed input and
/// [`Error::DuplicateItems`] when duplicates fail the batch.
pub fn collect(
    category: Category,
    declarations: &[BuildItem],
    ctx: &CollectorContext,
    mode: DuplicateMode,
    policy: &WarningPolicy,
) -> Result<Collected> {
    let raw = category.collect_raw(declarations, ctx)?;
    debug!(
        category = %category,
        project = %ctx.project_key,
        count = raw.len(),
        "Collected declarations"
    );

    let check = DuplicateCheck {
        code: category.duplicate_code(),
        category: category.item_name(),
        project_key: &ctx.project_key,
        mode,
    };
    let (items, diagnostic) =
        reconcile_batch(raw, category.dedup_key(), check, policy).into_result()?;
    Ok(Collected { items, diagnostic })
}

fn scoped(
    category: Category,
    ctx: &CollectorContext,
) -> impl Fn(crate::item::GraphItemBuilder) -> crate::item::GraphItemBuilder + '_ {
    move |builder| {
        if category.is_framework_scoped() {
            builder.target_frameworks(&ctx.target_frameworks)
        } else {
            builder
        }
    }
}

/// Build the `ProjectSpec` item describing the owning project.
///
/// The project name falls back from `PackageId` to `AssemblyName` to
/// `MSBuildProjectName`.
///
/// # Errors
///
/// Returns an error when the project path cannot be determined.
pub fn project_spec(project: &BuildItem, ctx: &CollectorContext) -> Result<GraphItem> {
    let project_path = project
        .get("ProjectPath")
        .map(str::to_string)
        .or_else(|| project.identifier().map(str::to_string))
        .or_else(|| ctx.project_path.as_ref().map(|p| p.display().to_string()))
        .ok_or_else(|| {
            Error::invalid_declaration("ProjectSpec", &ctx.project_key, "no project path")
        })?;

    let name = project
        .get("PackageId")
        .or_else(|| project.get("AssemblyName"))
        .or_else(|| project.get("MSBuildProjectName"))
        .or_else(|| project.get("ProjectName"));

    let mut builder = GraphItem::builder(GraphItemKind::ProjectSpec, &ctx.project_key)
        .property("ProjectUniqueName", &ctx.project_key)
        .property("ProjectPath", project_path)
        .property_if_present("ProjectName", name);
    for property in PROJECT_SPEC_PROPERTIES {
        builder = builder.property_if_present(*property, project.get(property));
    }
    if project.get("TargetFrameworks").is_none() {
        builder = builder.target_frameworks(&ctx.target_frameworks);
    }
    builder.build()
}

/// Build the `RestoreSpec` item marking the owning project as an entry point.
///
/// # Errors
///
/// Infallible in practice; returns `Result` for parity with other collectors.
pub fn restore_spec(ctx: &CollectorContext) -> Result<GraphItem> {
    GraphItem::builder(GraphItemKind::RestoreSpec, &ctx.project_key)
        .property("ProjectUniqueName", &ctx.project_key)
        .build()
}

/// Collect `ProjectReference` declarations.
///
/// Targets are resolved against the owning project's directory and lexically
/// normalised. References with `ReferenceOutputAssembly=false` are skipped.
/// Duplicates are left to the build engine.
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn project_references(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::ProjectReference, ctx);
    let mut items = Vec::with_capacity(declarations.len());

    for declaration in declarations {
        let Some(include) = declaration.identifier() else {
            continue;
        };
        if !declaration.is_true("ReferenceOutputAssembly", true) {
            debug!(reference = include, "Skipping reference without output assembly");
            continue;
        }

        let full_path = declaration
            .get("FullPath")
            .map(PathBuf::from)
            .unwrap_or_else(|| resolve_reference_path(ctx.project_directory(), include));
        let full_path = full_path.display().to_string();

        let mut builder = GraphItem::builder(GraphItemKind::ProjectReference, &ctx.project_key)
            .property("ProjectPath", &full_path)
            .property("ProjectReferenceUniqueName", &full_path);
        for name in PROJECT_REFERENCE_PROPERTIES {
            builder = builder.property_if_present(*name, declaration.get(name));
        }
        items.push(scope(builder).build()?);
    }

    Ok(items)
}

/// Collect `PackageReference` declarations into `Dependency` items.
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn package_references(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::PackageReference, ctx);
    let mut items = Vec::with_capacity(declarations.len());

    for declaration in declarations {
        let Some(id) = declaration.identifier() else {
            continue;
        };
        let mut builder = GraphItem::builder(GraphItemKind::Dependency, &ctx.project_key)
            .property("Id", id)
            .property_if_present("VersionRange", declaration.get("Version"));
        for name in DEPENDENCY_PROPERTIES {
            builder = builder.property_if_present(*name, declaration.get(name));
        }
        items.push(scope(builder).build()?);
    }

    Ok(items)
}

/// Collect `FrameworkReference` declarations.
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn framework_references(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::FrameworkReference, ctx);
    declarations
        .iter()
        .filter_map(|d| d.identifier().map(|id| (id, d)))
        .map(|(id, declaration)| {
            scope(
                GraphItem::builder(GraphItemKind::FrameworkReference, &ctx.project_key)
                    .property("Id", id)
                    .property_if_present("PrivateAssets", declaration.get("PrivateAssets")),
            )
            .build()
        })
        .collect()
}

/// Collect `PackageDownload` declarations.
///
/// A declaration's `Version` may list several ranges separated by `;`; each
/// yields its own item and each must be an exact `[x.y.z]` pin.
///
/// # Errors
///
/// Returns [`Error::InvalidDeclaration`] when a version is missing or not exact.
pub fn package_downloads(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::PackageDownload, ctx);
    let mut items = Vec::new();

    for declaration in declarations {
        let Some(id) = declaration.identifier() else {
            continue;
        };
        let Some(versions) = declaration.get("Version") else {
            return Err(Error::invalid_declaration(
                Category::PackageDownload.item_name(),
                id,
                "a version is required",
            ));
        };

        for range in versions.split(';').map(str::trim).filter(|v| !v.is_empty()) {
            if !is_exact_version_range(range) {
                return Err(Error::invalid_declaration(
                    Category::PackageDownload.item_name(),
                    format!("{id}/{range}"),
                    "only exact versions such as [1.0.0] are allowed",
                ));
            }
            items.push(
                scope(
                    GraphItem::builder(GraphItemKind::DownloadDependency, &ctx.project_key)
                        .property("Id", id)
                        .property("VersionRange", range),
                )
                .build()?,
            );
        }
    }

    Ok(items)
}

/// Collect `PackageVersion` declarations into central version pins.
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn central_package_versions(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::PackageVersion, ctx);
    declarations
        .iter()
        .filter_map(|d| d.identifier().map(|id| (id, d)))
        .map(|(id, declaration)| {
            scope(
                GraphItem::builder(GraphItemKind::CentralPackageVersion, &ctx.project_key)
                    .property("Id", id)
                    .property_if_present("VersionRange", declaration.get("Version")),
            )
            .build()
        })
        .collect()
}

/// Collect `FrameworkAssembly` declarations.
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn framework_assemblies(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::FrameworkAssembly, ctx);
    declarations
        .iter()
        .filter_map(|d| d.identifier().map(|id| (id, d)))
        .map(|(id, declaration)| {
            scope(
                GraphItem::builder(GraphItemKind::FrameworkAssembly, &ctx.project_key)
                    .property("Id", id)
                    .property_if_present("AssemblyName", declaration.get("AssemblyName")),
            )
            .build()
        })
        .collect()
}

/// Collect `NuGetAuditSuppress` declarations (advisory URLs).
///
/// # Errors
///
/// Returns an error if an item cannot be built.
pub fn audit_suppressions(
    declarations: &[BuildItem],
    ctx: &CollectorContext,
) -> Result<Vec<GraphItem>> {
    let scope = scoped(Category::NuGetAuditSuppress, ctx);
    declarations
        .iter()
        .filter_map(BuildItem::identifier)
        .map(|id| {
            scope(
                GraphItem::builder(GraphItemKind::NuGetAuditSuppress, &ctx.project_key)
                    .property("Id", id),
            )
            .build()
        })
        .collect()
}

/// Parse pair-shaped specs of the form `Id/VersionRange` into declarations.
///
/// Blank specs are skipped. The version part becomes the `Version` metadata.
///
/// # Errors
///
/// Returns [`Error::InvalidDeclaration`] when a spec does not split into
/// exactly two parts, failing the whole batch.
pub fn parse_pair_specs<S: AsRef<str>>(category: Category, specs: &[S]) -> Result<Vec<BuildItem>> {
    let mut declarations = Vec::with_capacity(specs.len());
    for spec in specs {
        let spec = spec.as_ref().trim();
        if spec.is_empty() {
            continue;
        }
        let parts: Vec<&str> = spec.split('/').collect();
        let [id, version] = parts.as_slice() else {
            return Err(Error::invalid_declaration(
                category.item_name(),
                spec,
                format!("expected 'Id/VersionRange' but found {} part(s)", parts.len()),
            ));
        };
        declarations.push(BuildItem::new(id.trim()).with_metadata("Version", version.trim()));
    }
    Ok(declarations)
}

/// `[1.0.0]` or `[1.0.0, 1.0.0]`.
fn is_exact_version_range(range: &str) -> bool {
    let Some(inner) = range
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return false;
    };
    match inner.split_once(',') {
        None => !inner.trim().is_empty(),
        Some((min, max)) => {
            let min = min.trim();
            !min.is_empty() && min.eq_ignore_ascii_case(max.trim())
        }
    }
}

fn resolve_reference_path(base: Option<&Path>, include: &str) -> PathBuf {
    let include = if std::path::MAIN_SEPARATOR == '/' {
        include.replace('\\', "/")
    } else {
        include.to_string()
    };
    let joined = match base {
        Some(dir) => dir.join(&include),
        None => PathBuf::from(&include),
    };
    let absolute = std::path::absolute(&joined).unwrap_or(joined);
    normalize_lexically(&absolute)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::TARGET_FRAMEWORKS;
    use crate::reconcile::Severity;

    fn ctx() -> CollectorContext {
        CollectorContext::new("/src/app/app.csproj").with_project_path("/src/app/app.csproj")
    }

    #[test]
    fn test_blank_identifiers_are_skipped() {
        let items = package_references(
            &[BuildItem::new(""), BuildItem::new("  "), BuildItem::new("A")],
            &ctx(),
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].project_key(), "/src/app/app.csproj");
    }

    #[test]
    fn test_package_reference_copies_present_metadata_only() {
        let declaration = BuildItem::new("Serilog")
            .with_metadata("Version", "3.1.1")
            .with_metadata("PrivateAssets", "all")
            .with_metadata("ExcludeAssets", "");
        let items = package_references(&[declaration], &ctx()).unwrap();
        let item = &items[0];
        assert_eq!(item.kind(), GraphItemKind::Dependency);
        assert_eq!(item.property("VersionRange"), Some("3.1.1"));
        assert_eq!(item.property("PrivateAssets"), Some("all"));
        assert!(!item.properties().contains_key("ExcludeAssets"));
        assert!(!item.properties().contains_key("IncludeAssets"));
        assert!(!item.properties().contains_key(TARGET_FRAMEWORKS));
    }

    #[test]
    fn test_framework_scope_is_attached() {
        let ctx = ctx().with_target_frameworks(["net8.0", "net472"]);
        let items = framework_references(&[BuildItem::new("Microsoft.NETCore.App")], &ctx).unwrap();
        assert_eq!(items[0].property(TARGET_FRAMEWORKS), Some("net8.0;net472"));

        let audits = audit_suppressions(&[BuildItem::new("https://example.test/GHSA-1")], &ctx)
            .unwrap();
        assert_eq!(audits[0].property(TARGET_FRAMEWORKS), None);
    }

    #[test]
    fn test_project_reference_resolves_relative_path() {
        let declarations = vec![
            BuildItem::new("../lib/lib.csproj"),
            BuildItem::new("../tool/tool.csproj").with_metadata("ReferenceOutputAssembly", "false"),
        ];
        let items = project_references(&declarations, &ctx()).unwrap();
        assert_eq!(items.len(), 1);
        let expected = Path::new("/src/lib/lib.csproj").display().to_string();
        assert_eq!(items[0].property("ProjectPath"), Some(expected.as_str()));
    }

    #[test]
    fn test_package_download_expands_versions() {
        let declaration = BuildItem::new("Tool").with_metadata("Version", "[1.0.0];[2.0.0]");
        let items = package_downloads(&[declaration], &ctx()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].property("VersionRange"), Some("[2.0.0]"));
    }

    #[test]
    fn test_package_download_rejects_missing_and_floating_versions() {
        let missing = package_downloads(&[BuildItem::new("Tool")], &ctx()).unwrap_err();
        assert!(matches!(missing, Error::InvalidDeclaration { .. }));

        let floating = BuildItem::new("Tool").with_metadata("Version", "1.0.0");
        let err = package_downloads(&[floating], &ctx()).unwrap_err();
        assert!(err.to_string().contains("Tool/1.0.0"));

        let pinned = BuildItem::new("Tool").with_metadata("Version", "[1.0.0, 1.0.0]");
        assert!(package_downloads(&[pinned], &ctx()).is_ok());
    }

    #[test]
    fn test_parse_pair_specs() {
        let declarations =
            parse_pair_specs(Category::PackageDownload, &["A/[1.0.0]", "", "B/[2.0.0]"]).unwrap();
        assert_eq!(declarations.len(), 2);
        assert_eq!(declarations[0].identity, "A");
        assert_eq!(declarations[0].get("Version"), Some("[1.0.0]"));

        let err = parse_pair_specs(Category::PackageDownload, &["A/[1.0.0]", "B"]).unwrap_err();
        assert!(matches!(err, Error::InvalidDeclaration { .. }));
        let err = parse_pair_specs(Category::PackageDownload, &["A/1/2"]).unwrap_err();
        assert!(err.to_string().contains("3 part(s)"));
    }

    #[test]
    fn test_collect_dependency_duplicates_warn_keeps_first() {
        let declarations = vec![
            BuildItem::new("A").with_metadata("Version", "1.0.0"),
            BuildItem::new("A").with_metadata("Version", "2.0.0"),
        ];
        let collected = collect(
            Category::PackageReference,
            &declarations,
            &ctx(),
            DuplicateMode::Warn,
            &WarningPolicy::default(),
        )
        .unwrap();

        assert_eq!(collected.items.len(), 1);
        assert_eq!(collected.items[0].property("VersionRange"), Some("1.0.0"));
        let diagnostic = collected.diagnostic.unwrap();
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert!(diagnostic.message.contains("1.0.0"));
        assert!(diagnostic.message.contains("2.0.0"));
    }

    #[test]
    fn test_collect_downloads_dedup_on_pair() {
        let declarations = vec![
            BuildItem::new("Tool").with_metadata("Version", "[1.0.0]"),
            BuildItem::new("tool").with_metadata("Version", "[1.0.0]"),
            BuildItem::new("Tool").with_metadata("Version", "[2.0.0]"),
        ];
        let collected = collect(
            Category::PackageDownload,
            &declarations,
            &ctx(),
            DuplicateMode::Warn,
            &WarningPolicy::default(),
        )
        .unwrap();
        assert_eq!(collected.items.len(), 2);
        assert_eq!(collected.diagnostic.unwrap().code, "NU1505");
    }

    #[test]
    fn test_collect_hard_fail_reports_error() {
        let declarations = vec![BuildItem::new("X"), BuildItem::new("x")];
        let err = collect(
            Category::FrameworkReference,
            &declarations,
            &ctx(),
            DuplicateMode::HardFail,
            &WarningPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateItems { ref code, .. } if code == "NU1507"));
    }

    #[test]
    fn test_project_spec_name_fallback() {
        let project = BuildItem::new("/src/app/app.csproj")
            .with_metadata("AssemblyName", "App")
            .with_metadata("MSBuildProjectName", "app")
            .with_metadata("ProjectStyle", "PackageReference");
        let item = project_spec(&project, &ctx()).unwrap();
        assert_eq!(item.property("ProjectName"), Some("App"));
        assert_eq!(item.property("ProjectStyle"), Some("PackageReference"));
        assert_eq!(item.property("ProjectUniqueName"), Some("/src/app/app.csproj"));

        let restore = restore_spec(&ctx()).unwrap();
        assert_eq!(restore.kind(), GraphItemKind::RestoreSpec);
    }
}
