//! Pipeline node definition.

use crate::errors::InvalidNodeInputError;
use serde::{Deserialize, Serialize};

/// Whether a node holds state between invocations.
///
/// The engine only schedules stateless nodes differently for observability;
/// the flag travels with the task assignment unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateType {
    /// The node is a pure function of its input (default).
    #[default]
    Stateless,
    /// The node keeps internal state across invocations.
    Stateful,
}

/// A single named step in a pipeline definition.
///
/// Field names serialize in the camelCase form stored pipeline definitions
/// use (`nodeName`, `algorithmName`), so stored documents round-trip
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Unique name of the node within the pipeline.
    pub node_name: String,
    /// Name of the algorithm the node invokes.
    pub algorithm_name: String,
    /// Ordered input array; elements may be literals or reference strings.
    #[serde(default)]
    pub input: Vec<serde_json::Value>,
    /// Statefulness flag, passed through to workers.
    #[serde(default)]
    pub state_type: StateType,
    /// Allowed percentage of failed batch items before the node fails.
    ///
    /// Overrides the pipeline-level default when set. 0 means any failure
    /// fails the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_tolerance: Option<u8>,
    /// Whether this node's result is part of the pipeline result.
    ///
    /// Nodes with `false` are non-critical leaves: their failure does not
    /// fail the pipeline.
    #[serde(default = "default_include_in_result")]
    pub include_in_result: bool,
}

const fn default_include_in_result() -> bool {
    true
}

impl PipelineNode {
    /// Creates a new node with an empty input.
    #[must_use]
    pub fn new(node_name: impl Into<String>, algorithm_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            algorithm_name: algorithm_name.into(),
            input: Vec::new(),
            state_type: StateType::Stateless,
            batch_tolerance: None,
            include_in_result: true,
        }
    }

    /// Sets the input array.
    #[must_use]
    pub fn with_input(mut self, input: Vec<serde_json::Value>) -> Self {
        self.input = input;
        self
    }

    /// Sets the batch failure tolerance percentage.
    #[must_use]
    pub fn with_batch_tolerance(mut self, percent: u8) -> Self {
        self.batch_tolerance = Some(percent);
        self
    }

    /// Marks the node as a non-critical leaf.
    #[must_use]
    pub fn non_critical(mut self) -> Self {
        self.include_in_result = false;
        self
    }

    /// Validates the node definition in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error when the node name is empty or contains characters
    /// reserved by the reference grammar (`@`, `#`, `*`, `.`).
    pub fn validate(&self) -> Result<(), InvalidNodeInputError> {
        if self.node_name.is_empty() {
            return Err(InvalidNodeInputError::new(
                &self.node_name,
                "node name must not be empty",
            ));
        }
        if self.node_name.contains(['@', '#', '*', '.']) {
            return Err(InvalidNodeInputError::new(
                &self.node_name,
                "node name must not contain reference sigils or dots",
            ));
        }
        if self.algorithm_name.is_empty() {
            return Err(InvalidNodeInputError::new(
                &self.node_name,
                "algorithm name must not be empty",
            ));
        }
        if let Some(percent) = self.batch_tolerance {
            if percent > 100 {
                return Err(InvalidNodeInputError::new(
                    &self.node_name,
                    format!("batch tolerance {percent} exceeds 100 percent"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_builder_defaults() {
        let node = PipelineNode::new("green", "eval-alg");
        assert_eq!(node.node_name, "green");
        assert_eq!(node.algorithm_name, "eval-alg");
        assert!(node.input.is_empty());
        assert!(node.include_in_result);
        assert_eq!(node.batch_tolerance, None);
    }

    #[test]
    fn test_node_validate_rejects_sigils_in_name() {
        let node = PipelineNode::new("bad@name", "alg");
        assert!(node.validate().is_err());

        let node = PipelineNode::new("bad.name", "alg");
        assert!(node.validate().is_err());

        let node = PipelineNode::new("good-name_2", "alg");
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_node_validate_rejects_tolerance_over_100() {
        let node = PipelineNode::new("a", "alg").with_batch_tolerance(101);
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_node_deserializes_camel_case() {
        let node: PipelineNode = serde_json::from_value(serde_json::json!({
            "nodeName": "green",
            "algorithmName": "eval-alg",
            "input": ["@flowInput.files", 42],
            "batchTolerance": 20
        }))
        .unwrap();

        assert_eq!(node.node_name, "green");
        assert_eq!(node.batch_tolerance, Some(20));
        assert_eq!(node.input.len(), 2);
        assert!(node.include_in_result);
    }
}
