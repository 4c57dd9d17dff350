//! Syntactic classification of input elements.
//!
//! Classification is purely textual, over the leading sigil of a string
//! element (longest prefix first, case-sensitive):
//!
//! | prefix | meaning                                        |
//! |--------|------------------------------------------------|
//! | `#@`   | batch over an upstream node's per-task results |
//! | `*@`   | wait-any over a plain node                     |
//! | `*#`   | wait-any over a batch node                     |
//! | `#`    | batch over a collection inside one result      |
//! | `@`    | plain node reference (or flow-input reference) |
//!
//! Anything else, including nested objects and arrays, is a literal; string
//! leaves inside composites are re-classified recursively.

use serde_json::Value;
use std::collections::BTreeSet;

/// The reserved source name addressing the pipeline's static flow input.
pub const FLOW_INPUT: &str = "flowInput";

/// The classification of a single input element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef {
    /// A plain value with no reference semantics.
    Literal,
    /// `@flowInput` / `@flowInput.path`: into the static flow-input object.
    FlowInput {
        /// Dotted path below the flow-input root, if any.
        path: Option<String>,
    },
    /// `@name` / `@name.path`: the full result of an upstream node.
    Node {
        /// The referenced node.
        node: String,
        /// Dotted path into its result, if any.
        path: Option<String>,
    },
    /// `#name.path`: batch over the array found at `path` in one result.
    ///
    /// `name` may be `flowInput`, batching over a flow-input array.
    BatchCollection {
        /// The referenced source.
        node: String,
        /// Dotted path addressing the collection.
        path: Option<String>,
    },
    /// `#@name.path`: batch over an upstream batch node's ordered per-task
    /// results, `path` applied to each item.
    BatchElement {
        /// The referenced node.
        node: String,
        /// Dotted path into each item, if any.
        path: Option<String>,
    },
    /// `*@name` / `*#name`: satisfied by the first of the candidates.
    WaitAny {
        /// The referenced node.
        node: String,
        /// True for the `*#` batch variant.
        batch: bool,
    },
}

impl InputRef {
    /// The referenced node name, when the reference targets another node.
    ///
    /// Flow-input references and literals return `None`: no node produces
    /// them, so they are never graph edges.
    #[must_use]
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Literal | Self::FlowInput { .. } => None,
            Self::Node { node, .. }
            | Self::BatchCollection { node, .. }
            | Self::BatchElement { node, .. }
            | Self::WaitAny { node, .. } => (node != FLOW_INPUT).then_some(node.as_str()),
        }
    }

    /// True for the two batch-source forms (`#`, `#@`).
    #[must_use]
    pub fn is_batch_source(&self) -> bool {
        matches!(self, Self::BatchCollection { .. } | Self::BatchElement { .. })
    }

    /// True for the wait-any forms (`*@`, `*#`).
    #[must_use]
    pub fn is_wait_any(&self) -> bool {
        matches!(self, Self::WaitAny { .. })
    }
}

/// Splits `name.path` at the first dot. An empty name yields `None`.
fn split_target(body: &str) -> Option<(String, Option<String>)> {
    let (name, path) = match body.split_once('.') {
        Some((name, path)) => (name, Some(path.to_string())),
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    // A trailing dot ("@name.") addresses nothing.
    if matches!(&path, Some(p) if p.is_empty()) {
        return None;
    }
    Some((name.to_string(), path))
}

/// Classifies a string element by its leading sigil.
///
/// Strings whose sigil body is malformed (empty name, trailing dot) fall
/// back to `Literal`, matching the pass-through behavior stored definitions
/// rely on.
#[must_use]
pub fn classify(element: &str) -> InputRef {
    if let Some(body) = element.strip_prefix("#@") {
        if let Some((node, path)) = split_target(body) {
            return InputRef::BatchElement { node, path };
        }
    } else if let Some(body) = element.strip_prefix("*@") {
        if let Some((node, _)) = split_target(body) {
            return InputRef::WaitAny { node, batch: false };
        }
    } else if let Some(body) = element.strip_prefix("*#") {
        if let Some((node, _)) = split_target(body) {
            return InputRef::WaitAny { node, batch: true };
        }
    } else if let Some(body) = element.strip_prefix('#') {
        if let Some((node, path)) = split_target(body) {
            return InputRef::BatchCollection { node, path };
        }
    } else if let Some(body) = element.strip_prefix('@') {
        if let Some((node, path)) = split_target(body) {
            if node == FLOW_INPUT {
                return InputRef::FlowInput { path };
            }
            return InputRef::Node { node, path };
        }
    }
    InputRef::Literal
}

/// Classifies an arbitrary input element.
///
/// Only strings can be references; numbers, booleans, nulls, objects and
/// arrays are literals at the top level (their string leaves are discovered
/// by the recursive walks in this module).
#[must_use]
pub fn classify_value(element: &Value) -> InputRef {
    match element {
        Value::String(s) => classify(s),
        _ => InputRef::Literal,
    }
}

/// Collects every reference found anywhere inside a value, depth first.
///
/// Arrays are walked in order; object entries in key order.
pub fn collect_refs(value: &Value, out: &mut Vec<InputRef>) {
    match value {
        Value::String(s) => {
            let reference = classify(s);
            if reference != InputRef::Literal {
                out.push(reference);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Returns the de-duplicated set of node names referenced anywhere in an
/// input value. Flow-input references are not node references.
#[must_use]
pub fn extract_node_names(value: &Value) -> BTreeSet<String> {
    let mut refs = Vec::new();
    collect_refs(value, &mut refs);
    refs.iter()
        .filter_map(|r| r.node_name().map(ToString::to_string))
        .collect()
}
