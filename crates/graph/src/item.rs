//! Typed graph items and the raw build declarations they are collected from.

use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Property carrying the semicolon-joined frameworks a declaration is scoped to.
pub const TARGET_FRAMEWORKS: &str = "TargetFrameworks";

/// The closed set of restore graph item kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphItemKind {
    /// Restore metadata for one project.
    ProjectSpec,
    /// A reference from one project to another.
    ProjectReference,
    /// A package reference.
    Dependency,
    /// A shared framework reference.
    FrameworkReference,
    /// A package that is downloaded but not referenced.
    DownloadDependency,
    /// A centrally pinned package version.
    CentralPackageVersion,
    /// A framework assembly reference.
    FrameworkAssembly,
    /// A suppressed audit advisory.
    NuGetAuditSuppress,
    /// Marks a project as an entry point of the restore.
    RestoreSpec,
}

impl GraphItemKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::ProjectSpec,
        Self::ProjectReference,
        Self::Dependency,
        Self::FrameworkReference,
        Self::DownloadDependency,
        Self::CentralPackageVersion,
        Self::FrameworkAssembly,
        Self::NuGetAuditSuppress,
        Self::RestoreSpec,
    ];

    /// Property names an item of this kind must carry.
    #[must_use]
    pub fn required_properties(self) -> &'static [&'static str] {
        match self {
            Self::ProjectSpec => &["ProjectUniqueName", "ProjectPath"],
            Self::ProjectReference => &["ProjectPath"],
            Self::DownloadDependency => &["Id", "VersionRange"],
            Self::Dependency
            | Self::FrameworkReference
            | Self::CentralPackageVersion
            | Self::FrameworkAssembly
            | Self::NuGetAuditSuppress => &["Id"],
            Self::RestoreSpec => &[],
        }
    }

    /// The wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProjectSpec => "ProjectSpec",
            Self::ProjectReference => "ProjectReference",
            Self::Dependency => "Dependency",
            Self::FrameworkReference => "FrameworkReference",
            Self::DownloadDependency => "DownloadDependency",
            Self::CentralPackageVersion => "CentralPackageVersion",
            Self::FrameworkAssembly => "FrameworkAssembly",
            Self::NuGetAuditSuppress => "NuGetAuditSuppress",
            Self::RestoreSpec => "RestoreSpec",
        }
    }

    /// Whether items of this kind describe a restorable project.
    #[must_use]
    pub fn is_project_root(self) -> bool {
        matches!(self, Self::ProjectSpec | Self::RestoreSpec)
    }
}

impl fmt::Display for GraphItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dependency-graph fact produced by a collector.
///
/// Items are immutable. The `token` only keeps collection order stable and is
/// never used to decide whether two items are duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphItem {
    #[serde(skip, default = "Uuid::new_v4")]
    token: Uuid,
    #[serde(rename = "type")]
    kind: GraphItemKind,
    project_key: String,
    properties: IndexMap<String, String>,
}

impl GraphItem {
    /// Start building an item of `kind` owned by `project_key`.
    pub fn builder(kind: GraphItemKind, project_key: impl Into<String>) -> GraphItemBuilder {
        GraphItemBuilder::new(kind, project_key)
    }

    /// The opaque creation token.
    #[must_use]
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// The kind of this item.
    #[must_use]
    pub fn kind(&self) -> GraphItemKind {
        self.kind
    }

    /// The owning project's restore key.
    #[must_use]
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// All properties in insertion order.
    #[must_use]
    pub fn properties(&self) -> &IndexMap<String, String> {
        &self.properties
    }

    /// Look up a property by exact name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// The `Id` property, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.property("Id")
    }

    /// Produce a replacement item with one property set to `value`.
    #[must_use]
    pub fn with_property(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut properties = self.properties.clone();
        properties.insert(name.into(), value.into());
        Self {
            token: Uuid::new_v4(),
            kind: self.kind,
            project_key: self.project_key.clone(),
            properties,
        }
    }

    /// Compare kind, owner and properties, ignoring the creation token.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.project_key == other.project_key
            && self.properties == other.properties
    }
}

/// Builder for [`GraphItem`].
#[derive(Debug, Clone)]
pub struct GraphItemBuilder {
    kind: GraphItemKind,
    project_key: String,
    properties: IndexMap<String, String>,
}

impl GraphItemBuilder {
    /// Create a builder.
    pub fn new(kind: GraphItemKind, project_key: impl Into<String>) -> Self {
        Self {
            kind,
            project_key: project_key.into(),
            properties: IndexMap::new(),
        }
    }

    /// Set a property unconditionally.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set a property only when `value` is present and not blank.
    #[must_use]
    pub fn property_if_present(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            self.properties.insert(name.into(), value.to_string());
        }
        self
    }

    /// Attach the `TargetFrameworks` scope; an empty list leaves the item unscoped.
    #[must_use]
    pub fn target_frameworks(mut self, frameworks: &[String]) -> Self {
        if !frameworks.is_empty() {
            self.properties
                .insert(TARGET_FRAMEWORKS.to_string(), frameworks.join(";"));
        }
        self
    }

    /// Finish the item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingProperty`] when a property required by the kind
    /// is absent or blank.
    pub fn build(self) -> Result<GraphItem> {
        for required in self.kind.required_properties() {
            let present = self
                .properties
                .get(*required)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(Error::MissingProperty {
                    kind: self.kind.to_string(),
                    project_key: self.project_key,
                    property: (*required).to_string(),
                });
            }
        }

        Ok(GraphItem {
            token: Uuid::new_v4(),
            kind: self.kind,
            project_key: self.project_key,
            properties: self.properties,
        })
    }
}

/// A raw declaration as handed over by the build engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildItem {
    /// Primary identifier (the item's evaluated include).
    #[serde(default)]
    pub identity: String,
    /// Flat metadata bag.
    #[serde(default)]
    pub metadata: IndexMap<String, String>,
}

impl BuildItem {
    /// Create a declaration with no metadata.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            metadata: IndexMap::new(),
        }
    }

    /// Add a metadata value.
    #[must_use]
    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    /// The trimmed identity, or `None` when it is blank.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        let id = self.identity.trim();
        (!id.is_empty()).then_some(id)
    }

    /// Metadata lookup; names compare case-insensitively and blank values read as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.metadata
            .get(name)
            .or_else(|| {
                self.metadata
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Interpret a metadata value as a boolean, falling back to `default`.
    #[must_use]
    pub fn is_true(&self, name: &str, default: bool) -> bool {
        match self.get(name) {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => default,
        }
    }
}

/// Per-invocation context handed to every collector.
#[derive(Debug, Clone, Default)]
pub struct CollectorContext {
    /// Restore key of the owning project.
    pub project_key: String,
    /// Full path of the owning project file, used to resolve relative references.
    pub project_path: Option<PathBuf>,
    /// Frameworks the declarations are scoped to; empty means all frameworks.
    pub target_frameworks: Vec<String>,
}

impl CollectorContext {
    /// Context for a project keyed by `project_key`.
    pub fn new(project_key: impl Into<String>) -> Self {
        Self {
            project_key: project_key.into(),
            ..Self::default()
        }
    }

    /// Set the owning project path.
    #[must_use]
    pub fn with_project_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    /// Set the framework scope.
    #[must_use]
    pub fn with_target_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    /// Directory that relative references are resolved against.
    #[must_use]
    pub fn project_directory(&self) -> Option<&Path> {
        self.project_path.as_deref().and_then(Path::parent)
    }
}
