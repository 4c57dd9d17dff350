//! Static pipeline definition types.
//!
//! A pipeline definition declares named nodes, each with an algorithm and an
//! input array whose elements may be literal values or reference strings.
//! Definitions are created once at pipeline start and are immutable
//! thereafter.

mod descriptor;
mod node;

pub use descriptor::{PipelineDescriptor, PipelineOptions};
pub use node::{PipelineNode, StateType};
