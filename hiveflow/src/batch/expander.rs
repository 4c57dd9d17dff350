//! Batch expansion: one logical node into N concrete task inputs.

use crate::errors::{HiveflowError, InvalidNodeInputError};
use crate::reference::{
    classify, resolve_collection, resolve_value, set_at, InputRef, PathStep, ResolutionContext,
    ResolveMode,
};
use crate::spec::PipelineNode;
use serde_json::Value;

/// The result of expanding a node's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// An ordinary node: exactly one task with this input.
    Single(Value),
    /// A batch node: one task per element, in collection order. May be
    /// empty when the referenced collection is empty.
    Batch(Vec<Value>),
}

impl Expansion {
    /// The concrete inputs, in dispatch order.
    #[must_use]
    pub fn inputs(&self) -> &[Value] {
        match self {
            Self::Single(input) => std::slice::from_ref(input),
            Self::Batch(inputs) => inputs,
        }
    }

    /// True for the batch variant.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }
}

/// Expands a node's input against resolved upstream state.
///
/// Walks the input depth first (array order, then object entries in key
/// order) for the single batch-bearing path. All other references resolve
/// once against shared state and are copied identically into every clone;
/// the batch path is replaced, in order, by each collection element.
///
/// # Errors
///
/// `InvalidNodeInput` when more than one batch source is present (the graph
/// builder rejects this earlier; re-verified here), `UnresolvedReference`
/// when a strict reference or the batch collection itself cannot be
/// resolved, which is a task-level failure for the consuming node.
pub fn expand(
    node: &PipelineNode,
    ctx: ResolutionContext<'_>,
) -> Result<Expansion, HiveflowError> {
    let input = Value::Array(node.input.clone());

    let mut found = Vec::new();
    find_batch_refs(&input, &mut Vec::new(), &mut found);

    if found.len() > 1 {
        return Err(InvalidNodeInputError::new(
            &node.node_name,
            "only one batch dimension per node is supported",
        )
        .into());
    }

    let Some((batch_path, batch_ref)) = found.into_iter().next() else {
        let resolved = resolve_value(&input, ctx, ResolveMode::Strict, &node.node_name)?;
        return Ok(Expansion::Single(resolved));
    };

    let collection = resolve_collection(&batch_ref, ctx, &node.node_name)?;

    // Resolve the shared (non-batch) references once. Substitution keeps the
    // input shape, so the recorded batch path stays valid in the template.
    let mut template = input;
    set_at(&mut template, &batch_path, Value::Null);
    let template = resolve_value(&template, ctx, ResolveMode::Strict, &node.node_name)?;

    let inputs = collection
        .into_iter()
        .map(|element| {
            let mut concrete = template.clone();
            set_at(&mut concrete, &batch_path, element);
            concrete
        })
        .collect();

    Ok(Expansion::Batch(inputs))
}

/// Records the path of every batch-source reference, depth first.
fn find_batch_refs(
    value: &Value,
    steps: &mut Vec<PathStep>,
    found: &mut Vec<(Vec<PathStep>, InputRef)>,
) {
    match value {
        Value::String(s) => {
            let reference = classify(s);
            if reference.is_batch_source() {
                found.push((steps.clone(), reference));
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                steps.push(PathStep::Index(index));
                find_batch_refs(item, steps, found);
                steps.pop();
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                steps.push(PathStep::Key(key.clone()));
                find_batch_refs(item, steps, found);
                steps.pop();
            }
        }
        _ => {}
    }
}
