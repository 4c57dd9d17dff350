//! The directed dependency graph induced by resolving node inputs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// How a child waits on a parent edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// A plain reference (`@name`): the child waits for the parent to
    /// succeed, together with every other parent.
    WaitAll,
    /// A wait-any reference (`*@name`, `*#name`): the child proceeds as
    /// soon as any one designated parent succeeds.
    WaitAny,
    /// A batch reference (`#name`, `#@name`): the child waits for the
    /// parent's full batch, then expands over it.
    WaitBatch,
}

impl EdgeKind {
    /// Ranks edge kinds by the cardinality they impose; when several
    /// references connect the same pair of nodes, the strongest kind wins.
    const fn rank(self) -> u8 {
        match self {
            Self::WaitAll => 0,
            Self::WaitAny => 1,
            Self::WaitBatch => 2,
        }
    }

    /// Returns the stronger of two kinds.
    #[must_use]
    pub fn strongest(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitAll => write!(f, "waitAll"),
            Self::WaitAny => write!(f, "waitAny"),
            Self::WaitBatch => write!(f, "waitBatch"),
        }
    }
}

/// A validated, acyclic dependency graph over pipeline nodes.
///
/// Construction goes through [`build_graph`](super::build_graph), which
/// guarantees acyclicity and structural validity; the graph itself is
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node names in definition order.
    node_order: Vec<String>,
    /// target -> (source -> edge kind).
    parents: HashMap<String, HashMap<String, EdgeKind>>,
    /// source -> set of targets.
    children: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub(super) fn new(
        node_order: Vec<String>,
        parents: HashMap<String, HashMap<String, EdgeKind>>,
        children: HashMap<String, BTreeSet<String>>,
    ) -> Self {
        Self {
            node_order,
            parents,
            children,
        }
    }

    /// Node names in definition order.
    #[must_use]
    pub fn node_names(&self) -> &[String] {
        &self.node_order
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    /// Parent edges into a node, as `(source, kind)` pairs.
    #[must_use]
    pub fn parents(&self, node: &str) -> Vec<(&str, EdgeKind)> {
        self.parents
            .get(node)
            .map(|edges| {
                let mut pairs: Vec<(&str, EdgeKind)> =
                    edges.iter().map(|(n, k)| (n.as_str(), *k)).collect();
                pairs.sort_by_key(|(n, _)| *n);
                pairs
            })
            .unwrap_or_default()
    }

    /// Children of a node, in name order.
    #[must_use]
    pub fn children(&self, node: &str) -> Vec<&str> {
        self.children
            .get(node)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// The edge kind between a source and a target, if an edge exists.
    #[must_use]
    pub fn edge_kind(&self, source: &str, target: &str) -> Option<EdgeKind> {
        self.parents.get(target)?.get(source).copied()
    }

    /// Nodes with no incoming edges from other pipeline nodes; eligible to
    /// run at pipeline start.
    #[must_use]
    pub fn entry_nodes(&self) -> Vec<&str> {
        self.node_order
            .iter()
            .filter(|name| {
                self.parents
                    .get(name.as_str())
                    .map_or(true, HashMap::is_empty)
            })
            .map(String::as_str)
            .collect()
    }

    /// Always true for a constructed graph; the builder rejects cycles.
    #[must_use]
    pub fn is_acyclic(&self) -> bool {
        true
    }

    /// All edges as `(source, target, kind)` triples, deterministic order.
    #[must_use]
    pub fn edges(&self) -> Vec<(&str, &str, EdgeKind)> {
        let mut edges = Vec::new();
        for target in &self.node_order {
            for (source, kind) in self.parents(target) {
                edges.push((source, target.as_str(), kind));
            }
        }
        edges
    }
}
