//! Batch expansion of nodes that fan out over upstream collections.

mod expander;

pub use expander::{expand, Expansion};
