//! Machine operand states (spec.md §3.3): a value lives as a `Virtual` register until
//! the allocator gives it an `Allocated` physical slot, or is forced into a concrete
//! register up front (`PreColored`, for ABI-mandated argument/return registers), or is
//! a plain signed immediate.

use std::fmt;

/// `r0..r12` plus `lr`, the 14 colors spec.md §4.8 allocates across.
pub const NUM_COLORS: u32 = 14;
pub const LR_COLOR: u32 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    R(u32),
    Lr,
    Sp,
    Pc,
}

impl Reg {
    pub fn from_color(c: u32) -> Reg {
        if c == LR_COLOR {
            Reg::Lr
        } else {
            Reg::R(c)
        }
    }

    pub fn color(self) -> Option<u32> {
        match self {
            Reg::R(n) if n < LR_COLOR => Some(n),
            Reg::Lr => Some(LR_COLOR),
            _ => None,
        }
    }

    /// `r4..r11` per the AAPCS-like convention spec.md's prologue/epilogue follows.
    pub fn is_callee_saved(self) -> bool {
        matches!(self, Reg::R(n) if (4..=11).contains(&n))
    }

    pub fn arg(i: u32) -> Reg {
        Reg::R(i)
    }

    pub fn ret() -> Reg {
        Reg::R(0)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reg::R(n) => write!(f, "r{n}"),
            Reg::Lr => write!(f, "lr"),
            Reg::Sp => write!(f, "sp"),
            Reg::Pc => write!(f, "pc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%v{}", self.0)
    }
}

/// A liveness-tracked storage location: either a not-yet-allocated virtual register or
/// a physical register already pinned (a call's argument registers interfere with
/// everything live across the call even though they're never `Virtual`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LiveValue {
    V(VReg),
    P(Reg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    PreColored(Reg),
    Allocated(Reg),
    Virtual(VReg),
    Immediate(i32),
}

impl Operand {
    pub fn vreg(self) -> Option<VReg> {
        match self {
            Operand::Virtual(v) => Some(v),
            _ => None,
        }
    }

    pub fn physical(self) -> Option<Reg> {
        match self {
            Operand::PreColored(r) | Operand::Allocated(r) => Some(r),
            _ => None,
        }
    }

    pub fn live_value(self) -> Option<LiveValue> {
        match self {
            Operand::Virtual(v) => Some(LiveValue::V(v)),
            Operand::PreColored(r) | Operand::Allocated(r) => Some(LiveValue::P(r)),
            Operand::Immediate(_) => None,
        }
    }

    /// Replace a `Virtual(old)` occurrence in place with `new` (the allocator's final
    /// color-assignment rewrite, or a spill's fresh-vreg substitution).
    pub fn rewrite(&mut self, old: VReg, new: Operand) {
        if *self == Operand::Virtual(old) {
            *self = new;
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::PreColored(r) | Operand::Allocated(r) => write!(f, "{r}"),
            Operand::Virtual(v) => write!(f, "{v}"),
            Operand::Immediate(i) => write!(f, "#{i}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Al,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Al => Cond::Al,
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Cond::Al => "",
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        }
    }

    pub fn from_ir(op: crate::ir::BinOp) -> Option<Cond> {
        use crate::ir::BinOp;
        Some(match op {
            BinOp::Lt => Cond::Lt,
            BinOp::Le => Cond::Le,
            BinOp::Gt => Cond::Gt,
            BinOp::Ge => Cond::Ge,
            BinOp::Eq => Cond::Eq,
            BinOp::Ne => Cond::Ne,
            _ => return None,
        })
    }
}
