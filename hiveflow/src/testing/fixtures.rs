//! Ready-made pipeline definitions for tests.

use crate::spec::{PipelineDescriptor, PipelineNode};
use serde_json::json;

/// `first -> second -> third`, each passing its predecessor's result on.
#[must_use]
pub fn linear_pipeline() -> PipelineDescriptor {
    PipelineDescriptor::new(
        "linear",
        vec![
            PipelineNode::new("first", "first-alg").with_input(vec![json!("@flowInput.seed")]),
            PipelineNode::new("second", "second-alg").with_input(vec![json!("@first")]),
            PipelineNode::new("third", "third-alg").with_input(vec![json!("@second")]),
        ],
    )
    .with_flow_input(json!({"seed": 1}))
}

/// A diamond: `top` fans out to `left` and `right`, `bottom` joins them.
#[must_use]
pub fn diamond_pipeline() -> PipelineDescriptor {
    PipelineDescriptor::new(
        "diamond",
        vec![
            PipelineNode::new("top", "top-alg"),
            PipelineNode::new("left", "side-alg").with_input(vec![json!("@top")]),
            PipelineNode::new("right", "side-alg").with_input(vec![json!("@top")]),
            PipelineNode::new("bottom", "join-alg")
                .with_input(vec![json!("@left"), json!("@right")]),
        ],
    )
}

/// `scatter` produces a collection that `map` expands over and `reduce`
/// aggregates.
#[must_use]
pub fn batch_pipeline() -> PipelineDescriptor {
    PipelineDescriptor::new(
        "batch",
        vec![
            PipelineNode::new("scatter", "scatter-alg"),
            PipelineNode::new("map", "map-alg").with_input(vec![json!("#scatter.items")]),
            PipelineNode::new("reduce", "reduce-alg").with_input(vec![json!("@map")]),
        ],
    )
}
