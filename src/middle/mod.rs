//! The optimization pipeline: a fixed ordered sequence of pure tree-to-tree
//! rewrites over the IR.

pub mod bound_checks;
pub mod dead_loops;
pub mod loops;
pub mod offsets;
pub mod pipeline;
pub mod run_length;

pub use pipeline::{run, PipelineOptions};
