//! Duplicate detection for collector output.
//!
//! A collector batch must not contain two items with the same identity key.
//! Depending on the category, duplicates either fail the batch (the last item
//! of each group survives so later stages still see one representative) or
//! produce a single suppressible diagnostic (the first item survives).

use crate::item::GraphItem;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use tracing::{debug, error, warn};

/// How duplicates in a batch are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateMode {
    /// Any duplicate fails the batch; the last member of each group survives.
    HardFail,
    /// Duplicates raise one suppressible diagnostic; the first member survives.
    Warn,
}

/// Which identity a category deduplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    /// The `Id` property, case-insensitive.
    Identifier,
    /// The `Id` and `VersionRange` pair, both case-insensitive.
    IdentifierAndVersion,
    /// No deduplication.
    None,
}

impl DedupKey {
    /// Compute the key of `item`, or `None` when the category does not dedup.
    #[must_use]
    pub fn key_of(self, item: &GraphItem) -> Option<String> {
        match self {
            Self::Identifier => Some(item.id().unwrap_or_default().to_lowercase()),
            Self::IdentifierAndVersion => Some(format!(
                "{}/{}",
                item.id().unwrap_or_default().to_lowercase(),
                item.property("VersionRange").unwrap_or_default().to_lowercase()
            )),
            Self::None => None,
        }
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Reported but not fatal.
    Warning,
    /// Fails the operation.
    Error,
}

/// A diagnostic produced while building the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDiagnostic {
    /// Stable code, e.g. `NU1504`.
    pub code: String,
    /// Severity after the warning policy was applied.
    pub severity: Severity,
    /// Project the diagnostic refers to.
    pub project_key: String,
    /// Human readable text.
    pub message: String,
}

/// What the warning policy decided for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Dropped entirely.
    Suppressed,
    /// Reported as a warning.
    Warning,
    /// Escalated to an error.
    Error,
}

/// Warning suppression and escalation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WarningPolicy {
    /// Codes escalated to errors.
    pub warn_as_error: BTreeSet<String>,
    /// Codes dropped entirely.
    pub no_warn: BTreeSet<String>,
    /// Escalate every warning.
    pub treat_warnings_as_errors: bool,
    /// Codes never escalated.
    pub warn_not_as_error: BTreeSet<String>,
}

impl WarningPolicy {
    /// Decide what happens to a warning with `code`.
    ///
    /// The exclusion set is checked first and keeps the code a warning, then
    /// no-warn drops it, then the explicit set or the global flag escalate it.
    #[must_use]
    pub fn disposition(&self, code: &str) -> Disposition {
        if contains_code(&self.warn_not_as_error, code) {
            Disposition::Warning
        } else if contains_code(&self.no_warn, code) {
            Disposition::Suppressed
        } else if self.treat_warnings_as_errors || contains_code(&self.warn_as_error, code) {
            Disposition::Error
        } else {
            Disposition::Warning
        }
    }
}

fn contains_code(set: &BTreeSet<String>, code: &str) -> bool {
    set.iter().any(|c| c.trim().eq_ignore_ascii_case(code))
}

/// A set of items that share one identity key.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// The members, in collection order.
    pub members: Vec<GraphItem>,
}

impl DuplicateGroup {
    /// Render each member as `id` or `id version`.
    #[must_use]
    pub fn describe_members(&self) -> Vec<String> {
        self.members.iter().map(describe_item).collect()
    }
}

fn describe_item(item: &GraphItem) -> String {
    let id = item.id().unwrap_or_default();
    match item.property("VersionRange") {
        Some(version) => format!("{id} {version}"),
        None => id.to_string(),
    }
}

/// Group `items` by `identity_fn` and pick one survivor per key.
///
/// Survivors keep the position of their group's first occurrence. In
/// [`DuplicateMode::Warn`] the first member survives, in
/// [`DuplicateMode::HardFail`] the last one does.
pub fn reconcile<K, F>(
    items: Vec<GraphItem>,
    identity_fn: F,
    mode: DuplicateMode,
) -> (Vec<GraphItem>, Vec<DuplicateGroup>)
where
    K: Eq + Hash,
    F: Fn(&GraphItem) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<Vec<GraphItem>> = Vec::new();

    for item in items {
        let key = identity_fn(&item);
        match slots.get(&key) {
            Some(&slot) => groups[slot].push(item),
            None => {
                slots.insert(key, groups.len());
                groups.push(vec![item]);
            }
        }
    }

    let mut survivors = Vec::with_capacity(groups.len());
    let mut duplicates = Vec::new();
    for group in groups {
        if group.len() > 1 {
            let survivor = match mode {
                DuplicateMode::Warn => group.first().cloned(),
                DuplicateMode::HardFail => group.last().cloned(),
            };
            survivors.extend(survivor);
            duplicates.push(DuplicateGroup { members: group });
        } else {
            survivors.extend(group);
        }
    }

    (survivors, duplicates)
}

/// Describes the category a batch belongs to, for diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateCheck<'a> {
    /// Stable duplicate code for the category.
    pub code: &'a str,
    /// Category name as declared in the build (e.g. `PackageReference`).
    pub category: &'a str,
    /// Owning project.
    pub project_key: &'a str,
    /// Hard-fail or warn.
    pub mode: DuplicateMode,
}

/// Outcome of reconciling one batch.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// One item per identity key.
    pub survivors: Vec<GraphItem>,
    /// Every group with more than one member.
    pub duplicate_groups: Vec<DuplicateGroup>,
    /// The diagnostic to report, if any survived the warning policy.
    pub diagnostic: Option<GraphDiagnostic>,
    code: String,
    category: String,
    project_key: String,
}

impl Reconciliation {
    /// Whether the batch must be treated as failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.diagnostic
            .as_ref()
            .is_some_and(|d| d.severity == Severity::Error)
    }

    /// Convert into survivors plus an optional warning, or the duplicate error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateItems`] when the batch failed.
    pub fn into_result(self) -> Result<(Vec<GraphItem>, Option<GraphDiagnostic>)> {
        if self.is_failed() {
            return Err(Error::DuplicateItems {
                code: self.code,
                category: self.category,
                project_key: self.project_key,
                members: self
                    .duplicate_groups
                    .iter()
                    .flat_map(DuplicateGroup::describe_members)
                    .collect(),
            });
        }
        Ok((self.survivors, self.diagnostic))
    }
}

/// Reconcile a batch using a category's dedup key, mode and warning policy.
pub fn reconcile_batch(
    items: Vec<GraphItem>,
    key: DedupKey,
    check: DuplicateCheck<'_>,
    policy: &WarningPolicy,
) -> Reconciliation {
    let (survivors, duplicate_groups) = if key == DedupKey::None {
        (items, Vec::new())
    } else {
        reconcile(
            items,
            |item| key.key_of(item).unwrap_or_default(),
            check.mode,
        )
    };

    let diagnostic = if duplicate_groups.is_empty() {
        None
    } else {
        let members: Vec<String> = duplicate_groups
            .iter()
            .flat_map(DuplicateGroup::describe_members)
            .collect();
        let message = format!(
            "Found duplicate {} items in project '{}': {}",
            check.category,
            check.project_key,
            members.join(", ")
        );
        let severity = match check.mode {
            DuplicateMode::HardFail => Some(Severity::Error),
            DuplicateMode::Warn => match policy.disposition(check.code) {
                Disposition::Suppressed => None,
                Disposition::Warning => Some(Severity::Warning),
                Disposition::Error => Some(Severity::Error),
            },
        };
        match severity {
            Some(Severity::Error) => error!(code = check.code, "{}", message),
            Some(Severity::Warning) => warn!(code = check.code, "{}", message),
            None => debug!(code = check.code, "Suppressed: {}", message),
        }
        severity.map(|severity| GraphDiagnostic {
            code: check.code.to_string(),
            severity,
            project_key: check.project_key.to_string(),
            message,
        })
    };

    Reconciliation {
        survivors,
        duplicate_groups,
        diagnostic,
        code: check.code.to_string(),
        category: check.category.to_string(),
        project_key: check.project_key.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::GraphItemKind;

    fn dep(id: &str, version: &str) -> GraphItem {
        GraphItem::builder(GraphItemKind::Dependency, "app.csproj")
            .property("Id", id)
            .property("VersionRange", version)
            .build()
            .unwrap()
    }

    fn check(mode: DuplicateMode) -> DuplicateCheck<'static> {
        DuplicateCheck {
            code: "NU1504",
            category: "PackageReference",
            project_key: "app.csproj",
            mode,
        }
    }

    #[test]
    fn test_warn_mode_keeps_first_and_reports_both_versions() {
        let items = vec![dep("A", "1.0.0"), dep("a", "2.0.0")];
        let outcome = reconcile_batch(
            items,
            DedupKey::Identifier,
            check(DuplicateMode::Warn),
            &WarningPolicy::default(),
        );

        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].property("VersionRange"), Some("1.0.0"));
        assert!(!outcome.is_failed());

        let diagnostic = outcome.diagnostic.clone().unwrap();
        assert_eq!(diagnostic.code, "NU1504");
        assert_eq!(diagnostic.severity, Severity::Warning);
        assert!(diagnostic.message.contains("A 1.0.0"));
        assert!(diagnostic.message.contains("a 2.0.0"));
    }

    #[test]
    fn test_hard_fail_keeps_last_and_names_members() {
        let items = vec![dep("A", "1.0.0"), dep("B", "1.0.0"), dep("A", "2.0.0")];
        let outcome = reconcile_batch(
            items,
            DedupKey::Identifier,
            check(DuplicateMode::HardFail),
            &WarningPolicy::default(),
        );

        assert!(outcome.is_failed());
        assert_eq!(outcome.survivors.len(), 2);
        assert_eq!(outcome.survivors[0].property("VersionRange"), Some("2.0.0"));
        assert_eq!(outcome.survivors[1].id(), Some("B"));

        let err = outcome.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("A 1.0.0"));
        assert!(text.contains("A 2.0.0"));
    }

    #[test]
    fn test_pair_key_distinguishes_versions() {
        let items = vec![dep("A", "[1.0.0]"), dep("A", "[2.0.0]"), dep("a", "[1.0.0]")];
        let (survivors, groups) = reconcile(
            items,
            |item| DedupKey::IdentifierAndVersion.key_of(item),
            DuplicateMode::Warn,
        );
        assert_eq!(survivors.len(), 2);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn test_no_dedup_passes_everything_through() {
        let items = vec![dep("A", "1.0.0"), dep("A", "1.0.0")];
        let outcome = reconcile_batch(
            items,
            DedupKey::None,
            check(DuplicateMode::HardFail),
            &WarningPolicy::default(),
        );
        assert_eq!(outcome.survivors.len(), 2);
        assert!(outcome.diagnostic.is_none());
    }

    #[test]
    fn test_policy_precedence() {
        let mut policy = WarningPolicy {
            treat_warnings_as_errors: true,
            ..WarningPolicy::default()
        };
        assert_eq!(policy.disposition("NU1504"), Disposition::Error);

        policy.no_warn.insert("nu1504".to_string());
        assert_eq!(policy.disposition("NU1504"), Disposition::Suppressed);

        policy.warn_not_as_error.insert("NU1504".to_string());
        assert_eq!(policy.disposition("NU1504"), Disposition::Warning);

        let explicit = WarningPolicy {
            warn_as_error: ["NU1506".to_string()].into_iter().collect(),
            ..WarningPolicy::default()
        };
        assert_eq!(explicit.disposition("NU1506"), Disposition::Error);
        assert_eq!(explicit.disposition("NU1504"), Disposition::Warning);
    }

    #[test]
    fn test_escalated_warning_fails_batch_but_keeps_first() {
        let policy = WarningPolicy {
            warn_as_error: ["NU1504".to_string()].into_iter().collect(),
            ..WarningPolicy::default()
        };
        let outcome = reconcile_batch(
            vec![dep("A", "1.0.0"), dep("A", "2.0.0")],
            DedupKey::Identifier,
            check(DuplicateMode::Warn),
            &policy,
        );
        assert!(outcome.is_failed());
        assert_eq!(outcome.survivors[0].property("VersionRange"), Some("1.0.0"));
    }

    #[test]
    fn test_suppressed_warning_has_no_diagnostic() {
        let policy = WarningPolicy {
            no_warn: ["NU1504".to_string()].into_iter().collect(),
            ..WarningPolicy::default()
        };
        let outcome = reconcile_batch(
            vec![dep("A", "1.0.0"), dep("A", "2.0.0")],
            DedupKey::Identifier,
            check(DuplicateMode::Warn),
            &policy,
        );
        assert!(outcome.diagnostic.is_none());
        assert_eq!(outcome.duplicate_groups.len(), 1);
        assert_eq!(outcome.survivors.len(), 1);
    }
}
