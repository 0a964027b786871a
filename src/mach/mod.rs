//! Machine-level IR (spec.md §3.3): the target of instruction selection and the input
//! to register allocation, post-allocation passes, and assembly emission.

pub mod function;
pub mod inst;
pub mod operand;

pub use function::{FixupKind, GlobalDatum, MachineBlock, MachineFunction, MachineProgram, SpFixup};
pub use inst::{AddrMode, AluOp, FmaOp, MachInst, Shift};
pub use operand::{Cond, LiveValue, Operand, Reg, VReg, NUM_COLORS};
