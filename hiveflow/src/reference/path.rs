//! Dotted-path addressing into JSON values.
//!
//! Stored pipeline definitions address into the flow-input object and into
//! node results with dotted paths (`files.0.link`). Numeric segments index
//! arrays; everything else is an object key.

use serde_json::Value;

/// One step of a concrete path inside a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Array index.
    Index(usize),
    /// Object key.
    Key(String),
}

impl std::fmt::Display for PathStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Key(k) => write!(f, "{k}"),
        }
    }
}

/// Looks up a dotted path inside a value.
///
/// Returns `None` when any segment is missing. A numeric segment indexes an
/// array; against an object it is treated as a plain key.
#[must_use]
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Reads the value at a concrete step path.
#[must_use]
pub fn get_at<'a>(value: &'a Value, steps: &[PathStep]) -> Option<&'a Value> {
    let mut current = value;
    for step in steps {
        current = match (current, step) {
            (Value::Object(map), PathStep::Key(k)) => map.get(k)?,
            (Value::Array(items), PathStep::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Replaces the value at a concrete step path, returning whether the path
/// existed.
pub fn set_at(value: &mut Value, steps: &[PathStep], new: Value) -> bool {
    let Some((last, prefix)) = steps.split_last() else {
        *value = new;
        return true;
    };

    let mut current = value;
    for step in prefix {
        current = match (current, step) {
            (Value::Object(map), PathStep::Key(k)) => match map.get_mut(k) {
                Some(v) => v,
                None => return false,
            },
            (Value::Array(items), PathStep::Index(i)) => match items.get_mut(*i) {
                Some(v) => v,
                None => return false,
            },
            _ => return false,
        };
    }

    match (current, last) {
        (Value::Object(map), PathStep::Key(k)) => {
            map.insert(k.clone(), new);
            true
        }
        (Value::Array(items), PathStep::Index(i)) => {
            if let Some(slot) = items.get_mut(*i) {
                *slot = new;
                true
            } else {
                false
            }
        }
        _ => false,
    }
}
