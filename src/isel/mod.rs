//! Instruction selection (spec.md §4.7): lowers SSA IR functions into `mach::MachineFunction`s.

pub mod divconst;
pub mod imm;
pub mod program;
pub mod select;

pub use divconst::DivConstConfig;
pub use program::select_program;
pub use select::select_function;
