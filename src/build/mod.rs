//! AST to SSA lowering (spec.md §4.1).

pub mod builder;

pub use builder::build_program;
