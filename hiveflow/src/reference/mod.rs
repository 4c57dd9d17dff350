//! Reference classification and resolution.
//!
//! Parses the reference grammar used inside node input arrays (`@name`,
//! `#name`, `#@name`, `*@name`, `*#name`, `@flowInput.path`) and resolves
//! references against runtime values.

mod classify;
mod path;
mod resolve;

pub use classify::{classify, classify_value, collect_refs, extract_node_names, InputRef, FLOW_INPUT};
pub use path::{get_at, lookup_path, set_at, PathStep};
pub use resolve::{resolve_collection, resolve_value, ResolutionContext, ResolveMode};
