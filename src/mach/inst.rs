//! Machine instruction taxonomy (spec.md §3.3), one variant per ARM instruction shape
//! the selector emits. Every variant that touches a register exposes it through
//! `defs`/`uses` so liveness and the allocator never need to match on the variant
//! themselves.

use std::fmt;

use crate::mach::operand::{Cond, Operand, VReg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Rsb,
    And,
    Orr,
    Eor,
    Mul,
    Sdiv,
    Lsl,
    Lsr,
    Asr,
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::Rsb => "rsb",
            AluOp::And => "and",
            AluOp::Orr => "orr",
            AluOp::Eor => "eor",
            AluOp::Mul => "mul",
            AluOp::Sdiv => "sdiv",
            AluOp::Lsl => "lsl",
            AluOp::Lsr => "lsr",
            AluOp::Asr => "asr",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Lsl(u32),
    Lsr(u32),
    Asr(u32),
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shift::Lsl(n) => write!(f, "lsl #{n}"),
            Shift::Lsr(n) => write!(f, "lsr #{n}"),
            Shift::Asr(n) => write!(f, "asr #{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmaOp {
    Mla,
    Mls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    Offset,
    PreIndex,
    PostIndex,
}

/// One machine instruction. `dst`/`lhs`/`rhs`/etc are `Operand`s throughout allocation;
/// `target`/`symbol` name blocks or externs by string since those never get colored.
#[derive(Debug, Clone)]
pub enum MachInst {
    Alu { op: AluOp, dst: Operand, lhs: Operand, rhs: Operand, shift: Option<Shift> },
    /// 32x32->64 multiply, used only for the magic-constant multiply-high step of
    /// division-by-constant lowering (spec.md §4.7).
    LongMul { dst_hi: Operand, dst_lo: Operand, lhs: Operand, rhs: Operand },
    Fma { op: FmaOp, dst: Operand, mul_lhs: Operand, mul_rhs: Operand, addend: Operand },
    Mov { dst: Operand, src: Operand, cond: Cond, shift: Option<Shift> },
    Cmp { lhs: Operand, rhs: Operand },
    CondBranch { cond: Cond, target: String },
    Jump { target: String },
    /// `arg_regs` is how many of r0-r3 are live-in arguments (for liveness purposes);
    /// `returns_value` marks whether r0 is a def.
    Call { target: String, arg_regs: u32, returns_value: bool },
    Load { dst: Operand, base: Operand, offset: i32, shift: Option<Shift>, mode: AddrMode },
    Store { src: Operand, base: Operand, offset: i32, shift: Option<Shift>, mode: AddrMode },
    GlobalAddr { dst: Operand, symbol: String },
    Return,
    Comment(String),
    /// An access or FMA predicated by if-conversion (spec.md §4.9's if-to-cond): the
    /// instruction executes only when `cond` holds, leaving its destination unchanged
    /// otherwise. A wrapper rather than a `cond` field on every variant, since only
    /// this one post-allocation pass ever needs predication.
    Predicated { cond: Cond, inst: Box<MachInst> },
}

impl MachInst {
    pub fn defs(&self) -> Vec<Operand> {
        match self {
            MachInst::Alu { dst, .. } => vec![*dst],
            MachInst::LongMul { dst_hi, dst_lo, .. } => vec![*dst_hi, *dst_lo],
            MachInst::Fma { dst, .. } => vec![*dst],
            MachInst::Mov { dst, .. } => vec![*dst],
            MachInst::Load { dst, .. } => vec![*dst],
            MachInst::GlobalAddr { dst, .. } => vec![*dst],
            // Every caller-saved register is clobbered by `bl`, whether or not the
            // callee is void: this is what forces anything live across a call into a
            // callee-saved color or a spill slot.
            MachInst::Call { .. } => Self::caller_saved().map(Operand::PreColored).collect(),
            MachInst::Predicated { inst, .. } => inst.defs(),
            _ => vec![],
        }
    }

    fn caller_saved() -> impl Iterator<Item = crate::mach::operand::Reg> {
        use crate::mach::operand::Reg;
        (0..=3).map(Reg::R).chain([Reg::R(12), Reg::Lr])
    }

    pub fn uses(&self) -> Vec<Operand> {
        match self {
            MachInst::Alu { lhs, rhs, .. } => vec![*lhs, *rhs],
            MachInst::LongMul { lhs, rhs, .. } => vec![*lhs, *rhs],
            MachInst::Fma { mul_lhs, mul_rhs, addend, .. } => vec![*mul_lhs, *mul_rhs, *addend],
            MachInst::Mov { src, dst, cond, .. } => {
                // A conditional move also reads its own destination on the
                // condition-false path.
                if *cond == Cond::Al {
                    vec![*src]
                } else {
                    vec![*src, *dst]
                }
            }
            MachInst::Cmp { lhs, rhs } => vec![*lhs, *rhs],
            MachInst::Load { base, .. } => vec![*base],
            MachInst::Store { src, base, .. } => vec![*src, *base],
            MachInst::Call { arg_regs, .. } => {
                (0..*arg_regs).map(|i| Operand::PreColored(crate::mach::operand::Reg::R(i))).collect()
            }
            // Conditional execution may leave the old value in place, so the
            // destination is implicitly read as well as written.
            MachInst::Predicated { inst, .. } => inst.uses().into_iter().chain(inst.defs()).collect(),
            _ => vec![],
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, MachInst::Call { .. })
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, MachInst::CondBranch { .. } | MachInst::Jump { .. } | MachInst::Return)
    }

    /// In-place `Virtual(old) -> new` rewrite across every operand slot (the
    /// allocator's final coloring pass and spilling's fresh-vreg substitution both use
    /// this instead of reconstructing the instruction).
    pub fn rewrite_vreg(&mut self, old: VReg, new: Operand) {
        let r = |o: &mut Operand| o.rewrite(old, new);
        match self {
            MachInst::Alu { dst, lhs, rhs, .. } => {
                r(dst);
                r(lhs);
                r(rhs);
            }
            MachInst::LongMul { dst_hi, dst_lo, lhs, rhs } => {
                r(dst_hi);
                r(dst_lo);
                r(lhs);
                r(rhs);
            }
            MachInst::Fma { dst, mul_lhs, mul_rhs, addend, .. } => {
                r(dst);
                r(mul_lhs);
                r(mul_rhs);
                r(addend);
            }
            MachInst::Mov { dst, src, .. } => {
                r(dst);
                r(src);
            }
            MachInst::Cmp { lhs, rhs } => {
                r(lhs);
                r(rhs);
            }
            MachInst::Load { dst, base, .. } => {
                r(dst);
                r(base);
            }
            MachInst::Store { src, base, .. } => {
                r(src);
                r(base);
            }
            MachInst::GlobalAddr { dst, .. } => r(dst),
            MachInst::Predicated { inst, .. } => inst.rewrite_vreg(old, new),
            MachInst::CondBranch { .. } | MachInst::Jump { .. } | MachInst::Call { .. } | MachInst::Return | MachInst::Comment(_) => {}
        }
    }
}
