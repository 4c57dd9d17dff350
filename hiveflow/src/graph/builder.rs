//! Graph construction and validation.
//!
//! Classifies every input element of every node (recursively) to discover
//! edges, then validates structural constraints and acyclicity. Build-time
//! failures abort pipeline construction entirely; nothing partially starts.

use super::dependency::{DependencyGraph, EdgeKind};
use crate::errors::{CyclicGraphError, HiveflowError, InvalidNodeInputError};
use crate::reference::{collect_refs, InputRef};
use crate::spec::PipelineDescriptor;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Builds the dependency graph for a validated pipeline definition.
///
/// # Errors
///
/// Returns `DuplicateNodeName`, `InvalidNodeInput` (undefined reference
/// target, several batch dimensions, batch mixed with wait-any) or
/// `CyclicGraph` naming the offending cycle.
pub fn build_graph(descriptor: &PipelineDescriptor) -> Result<DependencyGraph, HiveflowError> {
    descriptor.validate()?;

    let node_order: Vec<String> = descriptor
        .nodes
        .iter()
        .map(|n| n.node_name.clone())
        .collect();
    let known: HashSet<&str> = node_order.iter().map(String::as_str).collect();

    let mut parents: HashMap<String, HashMap<String, EdgeKind>> = HashMap::new();
    let mut children: HashMap<String, BTreeSet<String>> = HashMap::new();

    for node in &descriptor.nodes {
        let refs = classify_node_input(&node.input);
        validate_node_refs(&node.node_name, &refs, &known)?;

        let target_edges = parents.entry(node.node_name.clone()).or_default();
        for reference in &refs {
            let Some(source) = reference.node_name() else {
                continue;
            };
            let kind = edge_kind_of(reference);
            target_edges
                .entry(source.to_string())
                .and_modify(|existing| *existing = existing.strongest(kind))
                .or_insert(kind);
            children
                .entry(source.to_string())
                .or_default()
                .insert(node.node_name.clone());
        }
    }

    detect_cycles(&node_order, &parents)?;

    Ok(DependencyGraph::new(node_order, parents, children))
}

/// Every reference found anywhere in the node's input array.
fn classify_node_input(input: &[Value]) -> Vec<InputRef> {
    let mut refs = Vec::new();
    for element in input {
        collect_refs(element, &mut refs);
    }
    refs
}

fn edge_kind_of(reference: &InputRef) -> EdgeKind {
    match reference {
        InputRef::WaitAny { .. } => EdgeKind::WaitAny,
        InputRef::BatchCollection { .. } | InputRef::BatchElement { .. } => EdgeKind::WaitBatch,
        _ => EdgeKind::WaitAll,
    }
}

fn validate_node_refs(
    node: &str,
    refs: &[InputRef],
    known: &HashSet<&str>,
) -> Result<(), HiveflowError> {
    let mut batch_sources = 0usize;
    let mut has_wait_any = false;

    for reference in refs {
        if let Some(source) = reference.node_name() {
            if !known.contains(source) {
                return Err(InvalidNodeInputError::new(
                    node,
                    format!("input references undefined node '{source}'"),
                )
                .into());
            }
        }
        if reference.is_batch_source() {
            batch_sources += 1;
        }
        if reference.is_wait_any() {
            has_wait_any = true;
        }
    }

    if batch_sources > 1 {
        return Err(InvalidNodeInputError::new(
            node,
            "only one batch dimension per node is supported",
        )
        .into());
    }
    if batch_sources > 0 && has_wait_any {
        return Err(InvalidNodeInputError::new(
            node,
            "batch reference cannot be combined with wait-any (ambiguous cardinality)",
        )
        .into());
    }
    Ok(())
}

/// Depth-first cycle detection that reconstructs the offending path.
fn detect_cycles(
    node_order: &[String],
    parents: &HashMap<String, HashMap<String, EdgeKind>>,
) -> Result<(), CyclicGraphError> {
    fn visit(
        node: &str,
        parents: &HashMap<String, HashMap<String, EdgeKind>>,
        visited: &mut HashSet<String>,
        in_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<(), Vec<String>> {
        if in_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].to_vec();
            cycle.push(node.to_string());
            return Err(cycle);
        }
        if visited.contains(node) {
            return Ok(());
        }

        visited.insert(node.to_string());
        in_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(edges) = parents.get(node) {
            let mut sources: Vec<&String> = edges.keys().collect();
            sources.sort();
            for source in sources {
                visit(source, parents, visited, in_stack, path)?;
            }
        }

        in_stack.remove(node);
        path.pop();
        Ok(())
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    let mut path = Vec::new();

    for node in node_order {
        visit(node, parents, &mut visited, &mut in_stack, &mut path)
            .map_err(CyclicGraphError::new)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::PipelineNode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn descriptor(nodes: Vec<PipelineNode>) -> PipelineDescriptor {
        PipelineDescriptor::new("test", nodes)
    }

    #[test]
    fn test_single_node_entry_set() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!(1)])
        ]))
        .unwrap();

        assert_eq!(graph.entry_nodes(), vec!["A"]);
        assert!(graph.is_acyclic());
    }

    #[test]
    fn test_entry_nodes_are_those_without_parents() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!("@flowInput.x")]),
            PipelineNode::new("B", "alg"),
            PipelineNode::new("C", "alg").with_input(vec![json!("@A"), json!("@B")]),
        ]))
        .unwrap();

        assert_eq!(graph.entry_nodes(), vec!["A", "B"]);
        assert_eq!(graph.parents("C").len(), 2);
        assert_eq!(graph.children("A"), vec!["C"]);
    }

    #[test]
    fn test_cycle_detection_names_cycle() {
        let err = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!("@B")]),
            PipelineNode::new("B", "alg").with_input(vec![json!("@A")]),
        ]))
        .unwrap_err();

        match err {
            HiveflowError::CyclicGraph(e) => {
                assert_eq!(e.cycle_path.first(), e.cycle_path.last());
                assert!(e.cycle_path.contains(&"A".to_string()));
                assert!(e.cycle_path.contains(&"B".to_string()));
            }
            other => panic!("expected CyclicGraph, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!("@A.x")])
        ]))
        .unwrap_err();

        assert!(matches!(err, HiveflowError::CyclicGraph(_)));
    }

    #[test]
    fn test_undefined_reference_rejected() {
        let err = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!("@ghost")])
        ]))
        .unwrap_err();

        assert!(matches!(err, HiveflowError::InvalidNodeInput(_)));
    }

    #[test]
    fn test_batch_plus_wait_any_rejected() {
        let err = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg"),
            PipelineNode::new("B", "alg"),
            PipelineNode::new("C", "alg")
                .with_input(vec![json!("#A.items"), json!("*@B")]),
        ]))
        .unwrap_err();

        assert!(matches!(err, HiveflowError::InvalidNodeInput(_)));
    }

    #[test]
    fn test_two_batch_dimensions_rejected() {
        let err = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg"),
            PipelineNode::new("B", "alg"),
            PipelineNode::new("C", "alg")
                .with_input(vec![json!("#A.items"), json!("#B.items")]),
        ]))
        .unwrap_err();

        assert!(matches!(err, HiveflowError::InvalidNodeInput(_)));
    }

    #[test]
    fn test_flow_input_is_not_an_edge() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg").with_input(vec![json!("@flowInput.x")])
        ]))
        .unwrap();

        assert!(graph.parents("A").is_empty());
        assert_eq!(graph.entry_nodes(), vec!["A"]);
    }

    #[test]
    fn test_edge_kinds_recorded() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg"),
            PipelineNode::new("B", "alg").with_input(vec![json!("#A.items")]),
            PipelineNode::new("C", "alg").with_input(vec![json!("*@A")]),
            PipelineNode::new("D", "alg").with_input(vec![json!("@A")]),
        ]))
        .unwrap();

        assert_eq!(graph.edge_kind("A", "B"), Some(EdgeKind::WaitBatch));
        assert_eq!(graph.edge_kind("A", "C"), Some(EdgeKind::WaitAny));
        assert_eq!(graph.edge_kind("A", "D"), Some(EdgeKind::WaitAll));
        assert_eq!(graph.edge_kind("A", "ghost"), None);
    }

    #[test]
    fn test_strongest_kind_wins_between_same_pair() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg"),
            PipelineNode::new("B", "alg")
                .with_input(vec![json!("@A.meta"), json!("#A.items")]),
        ]))
        .unwrap();

        assert_eq!(graph.edge_kind("A", "B"), Some(EdgeKind::WaitBatch));
    }

    #[test]
    fn test_nested_references_discovered() {
        let graph = build_graph(&descriptor(vec![
            PipelineNode::new("A", "alg"),
            PipelineNode::new("B", "alg")
                .with_input(vec![json!({"wrapped": [{"deep": "@A.x"}]})]),
        ]))
        .unwrap();

        assert_eq!(graph.parents("B"), vec![("A", EdgeKind::WaitAll)]);
    }
}
