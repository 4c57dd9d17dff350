//! Pipeline descriptor: the document fetched from the pipeline source.

use super::PipelineNode;
use crate::errors::{DuplicateNodeNameError, HiveflowError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-run execution options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOptions {
    /// Pipeline-wide default batch failure tolerance percentage.
    #[serde(default)]
    pub batch_tolerance: u8,
    /// Maximum serialized size of an inline value before it is
    /// externalized to storage, in bytes.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: usize,
}

const fn default_inline_threshold() -> usize {
    64 * 1024
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_tolerance: 0,
            inline_threshold_bytes: default_inline_threshold(),
        }
    }
}

/// A complete pipeline definition as stored by the pipeline source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptor {
    /// Pipeline name.
    pub name: String,
    /// The node list.
    pub nodes: Vec<PipelineNode>,
    /// Static input object supplied at launch, addressable by dotted path.
    #[serde(default)]
    pub flow_input: serde_json::Value,
    /// Execution options.
    #[serde(default)]
    pub options: PipelineOptions,
}

impl PipelineDescriptor {
    /// Creates a descriptor with default flow input and options.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: Vec<PipelineNode>) -> Self {
        Self {
            name: name.into(),
            nodes,
            flow_input: serde_json::Value::Null,
            options: PipelineOptions::default(),
        }
    }

    /// Sets the flow input object.
    #[must_use]
    pub fn with_flow_input(mut self, flow_input: serde_json::Value) -> Self {
        self.flow_input = flow_input;
        self
    }

    /// Sets the execution options.
    #[must_use]
    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.node_name == name)
    }

    /// Effective tolerance for a node: per-node override or pipeline default.
    #[must_use]
    pub fn tolerance_for(&self, node: &PipelineNode) -> u8 {
        node.batch_tolerance.unwrap_or(self.options.batch_tolerance)
    }

    /// Validates the descriptor: every node in isolation, then name
    /// uniqueness across the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateNodeName` or the first per-node validation error.
    pub fn validate(&self) -> Result<(), HiveflowError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.node_name.as_str()) {
                return Err(DuplicateNodeNameError::new(&node.node_name).into());
            }
        }
        Ok(())
    }
}
