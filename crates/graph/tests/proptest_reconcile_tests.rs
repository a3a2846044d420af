//! Property-based tests for duplicate reconciliation.
//!
//! These tests verify the behavioral contracts of the reconciler:
//! - Exactly one survivor per identity key
//! - Warn mode keeps the first member, hard-fail mode keeps the last
//! - Survivor order follows first occurrence

use proptest::prelude::*;
use restorekit_graph::{
    BuildItem, Category, CollectorContext, DedupKey, DuplicateMode, GraphItem, GraphItemKind,
    WarningPolicy, collect, reconcile,
};
use std::collections::{HashMap, HashSet};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Package ids drawn from a small pool, in random case, so duplicates are common.
fn id_strategy() -> impl Strategy<Value = String> {
    (
        proptest::sample::select(vec!["alpha", "beta", "gamma", "delta"]),
        any::<bool>(),
    )
        .prop_map(|(id, upper)| if upper { id.to_uppercase() } else { id.to_string() })
}

fn batch_strategy() -> impl Strategy<Value = Vec<(String, u8)>> {
    proptest::collection::vec((id_strategy(), 0u8..5), 0..20)
}

fn to_items(batch: &[(String, u8)]) -> Vec<GraphItem> {
    batch
        .iter()
        .map(|(id, version)| {
            GraphItem::builder(GraphItemKind::Dependency, "app.csproj")
                .property("Id", id)
                .property("VersionRange", format!("{version}.0.0"))
                .build()
                .unwrap()
        })
        .collect()
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn one_survivor_per_key(batch in batch_strategy()) {
        let items = to_items(&batch);
        let distinct: HashSet<String> = batch.iter().map(|(id, _)| id.to_lowercase()).collect();

        for mode in [DuplicateMode::Warn, DuplicateMode::HardFail] {
            let (survivors, groups) = reconcile(
                items.clone(),
                |item| DedupKey::Identifier.key_of(item),
                mode,
            );
            prop_assert_eq!(survivors.len(), distinct.len());

            let keys: HashSet<String> = survivors
                .iter()
                .map(|item| item.id().unwrap().to_lowercase())
                .collect();
            prop_assert_eq!(&keys, &distinct);
            prop_assert!(groups.iter().all(|g| g.members.len() > 1));
        }
    }

    #[test]
    fn survivor_selection_matches_mode(batch in batch_strategy()) {
        let items = to_items(&batch);
        let mut first: HashMap<String, String> = HashMap::new();
        let mut last: HashMap<String, String> = HashMap::new();
        for item in &items {
            let key = item.id().unwrap().to_lowercase();
            let version = item.property("VersionRange").unwrap().to_string();
            first.entry(key.clone()).or_insert_with(|| version.clone());
            last.insert(key, version);
        }

        let (warned, _) = reconcile(items.clone(), |i| DedupKey::Identifier.key_of(i), DuplicateMode::Warn);
        for item in &warned {
            let key = item.id().unwrap().to_lowercase();
            prop_assert_eq!(item.property("VersionRange"), Some(first[&key].as_str()));
        }

        let (failed, _) = reconcile(items, |i| DedupKey::Identifier.key_of(i), DuplicateMode::HardFail);
        for item in &failed {
            let key = item.id().unwrap().to_lowercase();
            prop_assert_eq!(item.property("VersionRange"), Some(last[&key].as_str()));
        }
    }

    #[test]
    fn survivors_follow_first_occurrence(batch in batch_strategy()) {
        let mut expected: Vec<String> = Vec::new();
        for (id, _) in &batch {
            let key = id.to_lowercase();
            if !expected.contains(&key) {
                expected.push(key);
            }
        }

        let (survivors, _) = reconcile(
            to_items(&batch),
            |i| DedupKey::Identifier.key_of(i),
            DuplicateMode::HardFail,
        );
        let order: Vec<String> = survivors.iter().map(|i| i.id().unwrap().to_lowercase()).collect();
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn collected_dependencies_are_unique(batch in batch_strategy()) {
        let declarations: Vec<BuildItem> = batch
            .iter()
            .map(|(id, version)| BuildItem::new(id).with_metadata("Version", format!("{version}.0.0")))
            .collect();
        let collected = collect(
            Category::PackageReference,
            &declarations,
            &CollectorContext::new("app.csproj"),
            DuplicateMode::Warn,
            &WarningPolicy::default(),
        )
        .unwrap();

        let mut seen = HashSet::new();
        for item in &collected.items {
            prop_assert!(seen.insert(item.id().unwrap().to_lowercase()));
        }
        let had_duplicates = seen.len() < declarations.len();
        prop_assert_eq!(collected.diagnostic.is_some(), had_duplicates);
    }
}
