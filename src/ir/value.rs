//! The SSA value and instruction taxonomy.
//!
//! Every value in the IR — constants, instructions, parameter references — is a
//! `ValueData` stored in a function's arena and addressed by `ValueId`. This keeps the
//! inherently cyclic def/use graph (an instruction refers to its operands; a value
//! refers back to every instruction that uses it) out of raw pointers and destructor
//! ordering, per the arena-of-indices design spec.md §9 recommends.

use std::fmt;

use crate::ast::Decl;
use std::rc::Rc;

/// Index into a `Function`'s value arena. `0` is never a real value — `ValueId::INVALID`
/// — so `Option<ValueId>` round-trips through raw storage cheaply where needed, though
/// in practice operand slots just use `ValueId` directly and rely on `Undef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Index into a `Function`'s block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, BinOp::Add | BinOp::Mul | BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or)
    }

    pub fn eval(self, a: i32, b: i32) -> Option<i32> {
        Some(match self {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return None;
                }
                a.wrapping_div(b)
            }
            BinOp::Mod => {
                if b == 0 {
                    return None;
                }
                a.wrapping_rem(b)
            }
            BinOp::Lt => (a < b) as i32,
            BinOp::Le => (a <= b) as i32,
            BinOp::Gt => (a > b) as i32,
            BinOp::Ge => (a >= b) as i32,
            BinOp::Eq => (a == b) as i32,
            BinOp::Ne => (a != b) as i32,
            BinOp::And => ((a != 0) && (b != 0)) as i32,
            BinOp::Or => ((a != 0) || (b != 0)) as i32,
        })
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
            BinOp::Lt => "lt",
            BinOp::Le => "le",
            BinOp::Gt => "gt",
            BinOp::Ge => "ge",
            BinOp::Eq => "eq",
            BinOp::Ne => "ne",
            BinOp::And => "and",
            BinOp::Or => "or",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// A function-level symbol this IR can call: either another SSA function or a builtin
/// declared by the runtime (`getint`, `putint`, `_sysy_starttime`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncRef {
    pub name: Rc<str>,
    pub is_void: bool,
    /// Builtins and any function the pass pipeline hasn't proven pure are impure:
    /// they may read/write global memory and cannot be value-numbered or reordered
    /// across stores.
    pub is_pure: bool,
}

/// The tagged union of everything a `ValueId` can denote, mirroring spec.md §3.2's
/// taxonomy (binary/unary/control/memory/shape/reference/Call).
#[derive(Debug, Clone)]
pub enum ValueKind {
    /// Interned integer constant. Construction goes through `Function::const_value`,
    /// which guarantees at most one live `Const` per integer value.
    Const(i32),
    /// Process-wide sentinel for an unset phi incoming value.
    Undef,
    /// Reference to an `int` parameter's incoming SSA value (after mem2reg promotes the
    /// parameter's alloca) — kept distinct from `ParamRef` so instruction selection
    /// knows to materialize it in a vreg once, at function entry.
    ParamRef { index: u32 },
    /// Reference to a global or local array's base address (the declaration itself has
    /// no runtime value; only `GetElementPtr`s off it do).
    GlobalRef(Rc<Decl>),

    Binary { op: BinOp, lhs: ValueId, rhs: ValueId },
    Unary { op: UnOp, operand: ValueId },
    /// A value-producing copy, introduced by passes (GVN replacement, phi lowering)
    /// that need an identity node distinct from its source.
    Mv(ValueId),

    /// Reserve `size` elements (`size == 1` for a scalar) on the current function's
    /// frame; the resulting value is the stack address.
    Alloca { size: u32 },
    /// `base + index * multiplier`, in units of one `int` (4 bytes at emission time).
    GetElementPtr { array: Rc<Decl>, base: ValueId, index: ValueId, multiplier: i32 },
    Load { lhs_sym: Rc<Decl>, addr: ValueId, mem_token: ValueId },
    Store { lhs_sym: Rc<Decl>, addr: ValueId, value: ValueId, mem_token: ValueId },

    Phi { incomings: Vec<(ValueId, BlockId)> },
    /// Memory SSA phi: merges incoming memory tokens at a join point. Lives in a
    /// block's `mem_phis` list, never in the ordinary instruction list, and is never
    /// lowered to a machine instruction.
    MemPhi { incomings: Vec<(ValueId, BlockId)> },
    /// Synthetic writer->load dependency edge inserted by memdep's second pass so later
    /// passes can see "hoisting this load above that store is illegal" without a real
    /// operand. `producer` is the writer (`Store`/`Call`), `load` is the `Load` it may
    /// feed.
    MemOp { producer: ValueId, load: ValueId },

    Call { func: FuncRef, args: Vec<ValueId> },

    Jump { target: BlockId },
    Branch { cond: ValueId, if_true: BlockId, if_false: BlockId },
    Return { value: Option<ValueId> },
}

impl ValueKind {
    pub fn is_terminator(&self) -> bool {
        matches!(self, ValueKind::Jump { .. } | ValueKind::Branch { .. } | ValueKind::Return { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, ValueKind::Phi { .. })
    }

    /// Side-effecting instructions are DCE roots and can never be deleted as dead.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            ValueKind::Store { .. }
                | ValueKind::Call { .. }
                | ValueKind::Jump { .. }
                | ValueKind::Branch { .. }
                | ValueKind::Return { .. }
        )
    }

    /// Instructions GVN/GCM are allowed to move or merge by value number.
    pub fn is_movable(&self) -> bool {
        matches!(
            self,
            ValueKind::Binary { .. }
                | ValueKind::Unary { .. }
                | ValueKind::GetElementPtr { .. }
                | ValueKind::Load { .. }
                | ValueKind::Mv(_)
        )
    }

    /// Operands read by this instruction, in a stable order. Does not include block
    /// targets (`Jump`/`Branch` successors) or the declaration/func symbols, only
    /// `ValueId`s that participate in def/use tracking.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            ValueKind::Const(_) | ValueKind::Undef | ValueKind::ParamRef { .. } | ValueKind::GlobalRef(_) => {
                vec![]
            }
            ValueKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ValueKind::Unary { operand, .. } => vec![*operand],
            ValueKind::Mv(v) => vec![*v],
            ValueKind::Alloca { .. } => vec![],
            ValueKind::GetElementPtr { base, index, .. } => vec![*base, *index],
            ValueKind::Load { addr, mem_token, .. } => vec![*addr, *mem_token],
            ValueKind::Store { addr, value, mem_token, .. } => vec![*addr, *value, *mem_token],
            ValueKind::Phi { incomings } | ValueKind::MemPhi { incomings } => {
                incomings.iter().map(|(v, _)| *v).collect()
            }
            ValueKind::MemOp { producer, load } => vec![*producer, *load],
            ValueKind::Call { args, .. } => args.clone(),
            ValueKind::Jump { .. } => vec![],
            ValueKind::Branch { cond, .. } => vec![*cond],
            ValueKind::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Rewrite operand `old` to `new` everywhere it appears in this instruction. Used by
    /// `Function::replace_all_uses_with` and point rewrites in GVN/mem2reg.
    pub fn replace_operand(&mut self, old: ValueId, new: ValueId) {
        let replace = |v: &mut ValueId| {
            if *v == old {
                *v = new;
            }
        };
        match self {
            ValueKind::Const(_) | ValueKind::Undef | ValueKind::ParamRef { .. } | ValueKind::GlobalRef(_) => {}
            ValueKind::Binary { lhs, rhs, .. } => {
                replace(lhs);
                replace(rhs);
            }
            ValueKind::Unary { operand, .. } => replace(operand),
            ValueKind::Mv(v) => replace(v),
            ValueKind::Alloca { .. } => {}
            ValueKind::GetElementPtr { base, index, .. } => {
                replace(base);
                replace(index);
            }
            ValueKind::Load { addr, mem_token, .. } => {
                replace(addr);
                replace(mem_token);
            }
            ValueKind::Store { addr, value, mem_token, .. } => {
                replace(addr);
                replace(value);
                replace(mem_token);
            }
            ValueKind::Phi { incomings } | ValueKind::MemPhi { incomings } => {
                for (v, _) in incomings.iter_mut() {
                    replace(v);
                }
            }
            ValueKind::MemOp { producer, load } => {
                replace(producer);
                replace(load);
            }
            ValueKind::Call { args, .. } => {
                for a in args.iter_mut() {
                    replace(a);
                }
            }
            ValueKind::Jump { .. } => {}
            ValueKind::Branch { cond, .. } => replace(cond),
            ValueKind::Return { value } => {
                if let Some(v) = value {
                    replace(v);
                }
            }
        }
    }
}

/// A value together with its static home: the block it's defined in (for
/// instructions), plus the use-list maintained as operands are written. Constants,
/// `Undef` and `ParamRef`s have no defining block (`block = None`) since they
/// logically dominate everything.
#[derive(Debug, Clone)]
pub struct ValueData {
    pub kind: ValueKind,
    pub block: Option<BlockId>,
    pub uses: Vec<ValueId>,
}

impl ValueData {
    pub fn new(kind: ValueKind, block: Option<BlockId>) -> Self {
        ValueData { kind, block, uses: Vec::new() }
    }
}
