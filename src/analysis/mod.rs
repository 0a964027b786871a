//! Control-flow, dominance, loop and call-graph analyses (spec.md §4.2, §4.6).

pub mod callgraph;
pub mod cfg;
pub mod loops;
