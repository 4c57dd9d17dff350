//! Transparent externalization of oversized values.
//!
//! Values whose serialized form exceeds the inlining threshold are written
//! to the external value storage and replaced by a pointer object. The
//! pointer is recognizable by its discriminator key, so downstream
//! consumers know to call `get_value` before processing.

use crate::errors::HiveflowError;
use crate::interfaces::ValueStorage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The discriminator key marking a storage pointer object.
pub const STORAGE_MARKER: &str = "$hiveflow-storage";

/// Pointer to an externally stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    /// Backend-specific location of the stored value.
    pub path: String,
    /// Serialized size in bytes.
    pub size: usize,
}

impl StorageInfo {
    /// Creates a new storage pointer.
    #[must_use]
    pub fn new(path: impl Into<String>, size: usize) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

/// Wraps a pointer into its on-the-wire object form.
#[must_use]
pub fn pointer_value(info: &StorageInfo) -> Value {
    serde_json::json!({ STORAGE_MARKER: info })
}

/// Recognizes a pointer object, returning the pointer it carries.
#[must_use]
pub fn as_pointer(value: &Value) -> Option<StorageInfo> {
    let inner = value.as_object()?.get(STORAGE_MARKER)?;
    serde_json::from_value(inner.clone()).ok()
}

/// Externalizes a value when its serialized size exceeds the threshold.
///
/// Values at or below the threshold (and values that already are pointers)
/// pass through unchanged.
///
/// # Errors
///
/// Propagates serialization and storage failures.
pub async fn maybe_externalize(
    value: Value,
    threshold_bytes: usize,
    storage: &dyn ValueStorage,
) -> Result<Value, HiveflowError> {
    if as_pointer(&value).is_some() {
        return Ok(value);
    }
    let size = serde_json::to_vec(&value)?.len();
    if size <= threshold_bytes {
        return Ok(value);
    }
    let info = storage.put_value(value).await?;
    Ok(pointer_value(&info))
}
