//! Shared value-id/block-id remapping used when cloning instructions between functions
//! or between loop iterations (`inline`, `unroll`): both need "take this `ValueKind`
//! from the source and rewrite every operand/target through a substitution map".

use std::collections::HashMap;

use crate::ir::{BlockId, ValueId, ValueKind};

pub fn remap(value_map: &HashMap<ValueId, ValueId>, id: ValueId) -> ValueId {
    *value_map.get(&id).unwrap_or(&id)
}

/// Rewrite every `ValueId`/`BlockId` in `kind` through `value_map`/`block_map`, falling
/// back to `default_block` for any target not present in `block_map` (the clone's
/// single exit edge, when the source had none worth preserving).
pub fn remap_kind(
    kind: &ValueKind,
    value_map: &HashMap<ValueId, ValueId>,
    block_map: &HashMap<BlockId, BlockId>,
    default_block: BlockId,
) -> ValueKind {
    let v = |id: ValueId| remap(value_map, id);
    let b = |id: BlockId| *block_map.get(&id).unwrap_or(&default_block);
    match kind {
        ValueKind::Binary { op, lhs, rhs } => ValueKind::Binary { op: *op, lhs: v(*lhs), rhs: v(*rhs) },
        ValueKind::Unary { op, operand } => ValueKind::Unary { op: *op, operand: v(*operand) },
        ValueKind::Mv(x) => ValueKind::Mv(v(*x)),
        ValueKind::Alloca { size } => ValueKind::Alloca { size: *size },
        ValueKind::GetElementPtr { array, base, index, multiplier } => {
            ValueKind::GetElementPtr { array: array.clone(), base: v(*base), index: v(*index), multiplier: *multiplier }
        }
        ValueKind::Load { lhs_sym, addr, mem_token } => ValueKind::Load { lhs_sym: lhs_sym.clone(), addr: v(*addr), mem_token: v(*mem_token) },
        ValueKind::Store { lhs_sym, addr, value, mem_token } => {
            ValueKind::Store { lhs_sym: lhs_sym.clone(), addr: v(*addr), value: v(*value), mem_token: v(*mem_token) }
        }
        ValueKind::Phi { incomings } => ValueKind::Phi { incomings: incomings.iter().map(|(x, f)| (v(*x), b(*f))).collect() },
        ValueKind::MemPhi { incomings } => ValueKind::MemPhi { incomings: incomings.iter().map(|(x, f)| (v(*x), b(*f))).collect() },
        ValueKind::MemOp { producer, load } => ValueKind::MemOp { producer: v(*producer), load: v(*load) },
        ValueKind::Call { func, args } => ValueKind::Call { func: func.clone(), args: args.iter().map(|a| v(*a)).collect() },
        ValueKind::Jump { target } => ValueKind::Jump { target: b(*target) },
        ValueKind::Branch { cond, if_true, if_false } => ValueKind::Branch { cond: v(*cond), if_true: b(*if_true), if_false: b(*if_false) },
        ValueKind::Return { value } => ValueKind::Return { value: value.map(v) },
        ValueKind::Const(_) | ValueKind::Undef | ValueKind::ParamRef { .. } | ValueKind::GlobalRef(_) => kind.clone(),
    }
}
