//! Assembly emission (spec.md §4.10): the final pipeline stage, turning a finalized
//! `MachineProgram` into GNU `as` ARM assembly text.

pub mod asm;

pub use asm::emit_program;
