//! Aggregate restore graph assembly.
//!
//! Batches from many collectors are concatenated in order. For a recursive
//! restore, every project reachable through `ProjectReference` items that has
//! no `ProjectSpec` yet is handed to a [`ProjectExpander`], transitively.

use crate::item::{GraphItem, GraphItemKind};
use crate::{Error, Result};
use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use tracing::{debug, info, warn};

/// Version of the persisted graph file layout.
pub const GRAPH_FILE_FORMAT: u32 = 1;

/// Supplies graph items for projects that are referenced but were not collected.
pub trait ProjectExpander {
    /// Return the `ProjectSpec` item and dependency items for `project_path`.
    ///
    /// # Errors
    ///
    /// Implementations return an error when the project cannot be evaluated.
    fn expand(&self, project_path: &str) -> Result<Vec<GraphItem>>;
}

/// Expander for non-recursive restores; it never adds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExpansion;

impl ProjectExpander for NoExpansion {
    fn expand(&self, _project_path: &str) -> Result<Vec<GraphItem>> {
        Ok(Vec::new())
    }
}

/// The ordered union of every graph item of one restore operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateGraph {
    items: Vec<GraphItem>,
}

#[derive(Serialize, Deserialize)]
struct GraphFile {
    format: u32,
    items: Vec<GraphItem>,
}

impl AggregateGraph {
    /// Wrap already ordered items.
    #[must_use]
    pub fn from_items(items: Vec<GraphItem>) -> Self {
        Self { items }
    }

    /// All items in order.
    #[must_use]
    pub fn items(&self) -> &[GraphItem] {
        &self.items
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the graph holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items of one kind, in order.
    pub fn items_of(&self, kind: GraphItemKind) -> impl Iterator<Item = &GraphItem> {
        self.items.iter().filter(move |item| item.kind() == kind)
    }

    /// Items grouped by project key, groups ordered by first appearance.
    #[must_use]
    pub fn projects(&self) -> IndexMap<&str, Vec<&GraphItem>> {
        let mut grouped: IndexMap<&str, Vec<&GraphItem>> = IndexMap::new();
        for item in &self.items {
            grouped.entry(item.project_key()).or_default().push(item);
        }
        grouped
    }

    /// Project keys marked as restore entry points.
    #[must_use]
    pub fn entry_points(&self) -> Vec<&str> {
        self.items_of(GraphItemKind::RestoreSpec)
            .map(GraphItem::project_key)
            .collect()
    }

    /// Whether any item describes a restorable project.
    #[must_use]
    pub fn has_restorable_projects(&self) -> bool {
        self.items.iter().any(|item| item.kind().is_project_root())
    }

    /// Projects ordered so that referenced projects come before their referrers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CycleDetected`] when project references form a cycle.
    pub fn project_order(&self) -> Result<Vec<String>> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
        let mut node_for = |graph: &mut DiGraph<String, ()>, key: &str| -> NodeIndex {
            *nodes
                .entry(key.to_string())
                .or_insert_with(|| graph.add_node(key.to_string()))
        };

        for spec in self.items_of(GraphItemKind::ProjectSpec) {
            node_for(&mut graph, spec.project_key());
        }
        for reference in self.items_of(GraphItemKind::ProjectReference) {
            let Some(target) = reference.property("ProjectPath") else {
                continue;
            };
            let from = node_for(&mut graph, reference.project_key());
            let to = node_for(&mut graph, target);
            graph.update_edge(to, from, ());
        }

        toposort(&graph, None)
            .map(|sorted| sorted.into_iter().map(|idx| graph[idx].clone()).collect())
            .map_err(|cycle| Error::CycleDetected {
                project: graph[cycle.node_id()].clone(),
            })
    }

    /// Serialize the graph to the versioned on-disk format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let file = GraphFile {
            format: GRAPH_FILE_FORMAT,
            items: self.items.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::serialization(format!("Failed to serialize graph: {e}")))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(e, Some(parent.to_path_buf()), "create_dir_all"))?;
        }
        std::fs::write(path, json).map_err(|e| Error::io(e, Some(path.to_path_buf()), "write"))?;

        debug!(path = %path.display(), items = self.items.len(), "Wrote restore graph");
        Ok(())
    }

    /// Load a graph written by [`AggregateGraph::write_to_file`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or has an
    /// unsupported format version.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(e, Some(path.to_path_buf()), "read"))?;
        let file: GraphFile = serde_json::from_str(&content)
            .map_err(|e| Error::serialization(format!("Failed to parse graph file: {e}")))?;
        if file.format != GRAPH_FILE_FORMAT {
            return Err(Error::serialization(format!(
                "Unsupported graph file format {} (expected {GRAPH_FILE_FORMAT})",
                file.format
            )));
        }
        Ok(Self { items: file.items })
    }
}

/// Merge collector batches into one graph.
///
/// # Errors
///
/// Returns [`Error::EmptyGraph`] when no `ProjectSpec` or `RestoreSpec` item
/// exists, or the expander's error when expansion fails.
pub fn assemble(
    batches: Vec<Vec<GraphItem>>,
    recursive: bool,
    expander: &dyn ProjectExpander,
) -> Result<AggregateGraph> {
    let mut items: Vec<GraphItem> = batches.into_iter().flatten().collect();

    if recursive {
        let added = expand_references(&mut items, expander)?;
        if added > 0 {
            info!(added, "Expanded referenced projects into the restore graph");
        }
    }

    let graph = AggregateGraph { items };
    if !graph.has_restorable_projects() {
        return Err(Error::EmptyGraph);
    }

    if let Err(Error::CycleDetected { project }) = graph.project_order() {
        warn!(project = %project, "Project references contain a cycle");
    }

    info!(
        items = graph.len(),
        projects = graph.projects().len(),
        "Assembled restore graph"
    );
    Ok(graph)
}

fn expand_references(items: &mut Vec<GraphItem>, expander: &dyn ProjectExpander) -> Result<usize> {
    let mut known: HashSet<String> = HashSet::new();
    let mut pending: VecDeque<String> = VecDeque::new();
    record_specs(items, &mut known);
    queue_references(items, &mut pending);

    let mut attempted: HashSet<String> = HashSet::new();
    let mut added = 0;

    while let Some(target) = pending.pop_front() {
        if known.contains(&target) || !attempted.insert(target.clone()) {
            continue;
        }

        debug!(project = %target, "Expanding referenced project");
        let expanded = expander.expand(&target)?;
        if !expanded.iter().any(|i| i.kind() == GraphItemKind::ProjectSpec) {
            warn!(project = %target, "Referenced project produced no project spec");
        }

        record_specs(&expanded, &mut known);
        queue_references(&expanded, &mut pending);
        added += expanded.len();
        items.extend(expanded);
    }

    Ok(added)
}

fn record_specs(items: &[GraphItem], known: &mut HashSet<String>) {
    for spec in items
        .iter()
        .filter(|i| i.kind() == GraphItemKind::ProjectSpec)
    {
        known.insert(spec.project_key().to_string());
        if let Some(path) = spec.property("ProjectPath") {
            known.insert(path.to_string());
        }
    }
}

fn queue_references(items: &[GraphItem], pending: &mut VecDeque<String>) {
    pending.extend(
        items
            .iter()
            .filter(|i| i.kind() == GraphItemKind::ProjectReference)
            .filter_map(|i| i.property("ProjectPath"))
            .map(str::to_string),
    );
}
