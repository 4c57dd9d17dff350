//! Runtime substitution of references with resolved values.
//!
//! Two modes exist and their asymmetry is load-bearing: `Strict` is the
//! "must resolve before first use" check applied when a task input is
//! materialized, while `BestEffort` is the best-effort substitution used
//! during batch-key search, where a missing path leaves the original
//! reference string untouched.

use super::classify::{classify, InputRef, FLOW_INPUT};
use super::path::lookup_path;
use crate::errors::UnresolvedReferenceError;
use serde_json::Value;
use std::collections::HashMap;

/// How missing references are handled during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// A missing flow-input/node path is an `UnresolvedReference` error.
    Strict,
    /// A missing path resolves to the original string unchanged.
    BestEffort,
}

/// The runtime values references resolve against.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    /// The pipeline's static flow-input object.
    pub flow_input: &'a Value,
    /// Aggregate result per completed node: the bare result for a plain
    /// node, the ordered array of per-task results for a batch node.
    pub results: &'a HashMap<String, Value>,
}

impl<'a> ResolutionContext<'a> {
    /// Creates a new resolution context.
    #[must_use]
    pub fn new(flow_input: &'a Value, results: &'a HashMap<String, Value>) -> Self {
        Self {
            flow_input,
            results,
        }
    }

    fn source(&self, node: &str) -> Option<&'a Value> {
        if node == FLOW_INPUT {
            Some(self.flow_input)
        } else {
            self.results.get(node)
        }
    }
}

fn resolved_or_missing<'a>(
    base: Option<&'a Value>,
    path: Option<&str>,
) -> Option<&'a Value> {
    let base = base?;
    match path {
        Some(p) => lookup_path(base, p),
        None => Some(base),
    }
}

/// Resolves a single string element.
///
/// Wait-any references substitute the winner's result, or `null` while no
/// candidate has finished; the race outcome is not an error. Batch-source
/// references substitute the full resolved collection.
fn resolve_str(
    raw: &str,
    ctx: ResolutionContext<'_>,
    mode: ResolveMode,
    owner: &str,
) -> Result<Value, UnresolvedReferenceError> {
    let missing = |raw: &str| match mode {
        ResolveMode::Strict => Err(UnresolvedReferenceError::new(raw, owner)),
        ResolveMode::BestEffort => Ok(Value::String(raw.to_string())),
    };

    match classify(raw) {
        InputRef::Literal => Ok(Value::String(raw.to_string())),
        InputRef::FlowInput { path } => {
            match resolved_or_missing(Some(ctx.flow_input), path.as_deref()) {
                Some(v) => Ok(v.clone()),
                None => missing(raw),
            }
        }
        InputRef::Node { node, path } => {
            match resolved_or_missing(ctx.results.get(&node), path.as_deref()) {
                Some(v) => Ok(v.clone()),
                None => missing(raw),
            }
        }
        InputRef::WaitAny { node, .. } => {
            Ok(ctx.results.get(&node).cloned().unwrap_or(Value::Null))
        }
        reference @ (InputRef::BatchCollection { .. } | InputRef::BatchElement { .. }) => {
            match resolve_collection(&reference, ctx, owner) {
                Ok(items) => Ok(Value::Array(items)),
                Err(_) if mode == ResolveMode::BestEffort => {
                    Ok(Value::String(raw.to_string()))
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Recursively substitutes every reference inside a value.
///
/// Composite literals may contain references at several different paths;
/// each string leaf is classified and resolved independently.
pub fn resolve_value(
    value: &Value,
    ctx: ResolutionContext<'_>,
    mode: ResolveMode,
    owner: &str,
) -> Result<Value, UnresolvedReferenceError> {
    match value {
        Value::String(s) => resolve_str(s, ctx, mode, owner),
        Value::Array(items) => {
            let resolved = items
                .iter()
                .map(|item| resolve_value(item, ctx, mode, owner))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, ctx, mode, owner)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolves a batch-source reference to its ordered collection.
///
/// `#name.path` addresses an array inside a single result (or inside the
/// flow input). `#@name.path` fans out over the upstream batch node's
/// ordered per-task results, applying `path` to each item.
pub fn resolve_collection(
    reference: &InputRef,
    ctx: ResolutionContext<'_>,
    owner: &str,
) -> Result<Vec<Value>, UnresolvedReferenceError> {
    match reference {
        InputRef::BatchCollection { node, path } => {
            let raw = render_batch_ref(false, node, path.as_deref());
            let value = resolved_or_missing(ctx.source(node), path.as_deref())
                .ok_or_else(|| UnresolvedReferenceError::new(&raw, owner))?;
            match value {
                Value::Array(items) => Ok(items.clone()),
                _ => Err(UnresolvedReferenceError::new(&raw, owner)),
            }
        }
        InputRef::BatchElement { node, path } => {
            let raw = render_batch_ref(true, node, path.as_deref());
            let aggregate = ctx
                .source(node)
                .ok_or_else(|| UnresolvedReferenceError::new(&raw, owner))?;
            let items = aggregate
                .as_array()
                .ok_or_else(|| UnresolvedReferenceError::new(&raw, owner))?;

            items
                .iter()
                .map(|item| match path.as_deref() {
                    Some(p) => lookup_path(item, p)
                        .cloned()
                        .ok_or_else(|| UnresolvedReferenceError::new(&raw, owner)),
                    None => Ok(item.clone()),
                })
                .collect()
        }
        _ => Err(UnresolvedReferenceError::new(
            "<not a batch reference>",
            owner,
        )),
    }
}

fn render_batch_ref(element: bool, node: &str, path: Option<&str>) -> String {
    let sigil = if element { "#@" } else { "#" };
    match path {
        Some(p) => format!("{sigil}{node}.{p}"),
        None => format!("{sigil}{node}"),
    }
}
