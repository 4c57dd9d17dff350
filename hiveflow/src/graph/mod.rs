//! Dependency graph construction and queries.

mod builder;
mod dependency;

pub use builder::build_graph;
pub use dependency::{DependencyGraph, EdgeKind};
