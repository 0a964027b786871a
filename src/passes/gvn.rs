//! Global value numbering (spec.md §4.5): walk reverse post-order, assigning each
//! instruction a place in a `(key, representative)` table. A later instruction whose
//! key already has a representative is folded onto it via `replace_all_uses_with` and
//! left for `dce` to erase; this also means every operand a not-yet-visited
//! instruction reads is already canonical, so no separate "leader" map is needed.

use std::collections::HashMap;
use std::rc::Rc;

use crate::analysis::cfg;
use crate::ir::{BinOp, Function, ValueId, ValueKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct GvnStats {
    pub folded: usize,
}

#[derive(PartialEq, Eq, Hash)]
enum Key {
    AddConst(ValueId, i32),
    MulConst(ValueId, i32),
    Binary(BinOp, ValueId, ValueId),
    Gep(usize, ValueId, ValueId, i32),
    Load(ValueId, ValueId),
    Call(String, Vec<ValueId>),
}

pub fn run(func: &mut Function) -> GvnStats {
    let rpo = cfg::reverse_post_order(func);
    let mut table: HashMap<Key, ValueId> = HashMap::new();
    let mut dead = Vec::new();

    for b in rpo {
        for id in func.block(b).insts.clone() {
            if let Some(replacement) = fold_one(func, &mut table, id) {
                func.replace_all_uses_with(id, replacement);
                dead.push(id);
            }
        }
    }

    let folded = dead.len();
    for id in dead {
        func.erase(id);
    }
    GvnStats { folded }
}

fn fold_one(func: &mut Function, table: &mut HashMap<Key, ValueId>, id: ValueId) -> Option<ValueId> {
    match func.value(id).kind.clone() {
        ValueKind::Binary { op, lhs, rhs } => fold_binary(func, table, id, op, lhs, rhs),
        ValueKind::GetElementPtr { array, base, index, multiplier } => {
            let key = Key::Gep(Rc::as_ptr(&array) as usize, base, index, multiplier);
            dedup_or_insert(table, key, id)
        }
        ValueKind::Load { addr, mem_token, .. } => fold_load(func, table, id, addr, mem_token),
        ValueKind::Call { func: callee, args } if callee.is_pure => {
            let key = Key::Call(callee.name.to_string(), args);
            dedup_or_insert(table, key, id)
        }
        ValueKind::Phi { incomings } => fold_phi(id, &incomings),
        _ => None,
    }
}

fn dedup_or_insert(table: &mut HashMap<Key, ValueId>, key: Key, id: ValueId) -> Option<ValueId> {
    if let Some(&existing) = table.get(&key) {
        Some(existing)
    } else {
        table.insert(key, id);
        None
    }
}

fn const_of(func: &Function, id: ValueId) -> Option<i32> {
    match func.value(id).kind {
        ValueKind::Const(c) => Some(c),
        _ => None,
    }
}

/// Decompose `id` into `(root, offset)` such that `id == root + offset`, by peeling off
/// a chain of `Add`/`Sub`-by-constant instructions (spec.md's "fold chains of add/sub-
/// with-constant"). Returns `(id, 0)` when `id` isn't such a chain.
fn decompose_add_chain(func: &Function, id: ValueId) -> (ValueId, i32) {
    match &func.value(id).kind {
        ValueKind::Binary { op: BinOp::Add, lhs, rhs } => {
            if let Some(c) = const_of(func, *rhs) {
                let (root, off) = decompose_add_chain(func, *lhs);
                return (root, off.wrapping_add(c));
            }
            if let Some(c) = const_of(func, *lhs) {
                let (root, off) = decompose_add_chain(func, *rhs);
                return (root, off.wrapping_add(c));
            }
            (id, 0)
        }
        ValueKind::Binary { op: BinOp::Sub, lhs, rhs } => {
            if let Some(c) = const_of(func, *rhs) {
                let (root, off) = decompose_add_chain(func, *lhs);
                return (root, off.wrapping_sub(c));
            }
            (id, 0)
        }
        _ => (id, 0),
    }
}

/// Same idea for `Mul`-by-constant chains (spec.md's "mul-with-constant").
fn decompose_mul_chain(func: &Function, id: ValueId) -> (ValueId, i32) {
    match &func.value(id).kind {
        ValueKind::Binary { op: BinOp::Mul, lhs, rhs } => {
            if let Some(c) = const_of(func, *rhs) {
                let (root, mul) = decompose_mul_chain(func, *lhs);
                return (root, mul.wrapping_mul(c));
            }
            if let Some(c) = const_of(func, *lhs) {
                let (root, mul) = decompose_mul_chain(func, *rhs);
                return (root, mul.wrapping_mul(c));
            }
            (id, 1)
        }
        _ => (id, 1),
    }
}

fn fold_binary(func: &mut Function, table: &mut HashMap<Key, ValueId>, id: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId) -> Option<ValueId> {
    if let (Some(a), Some(b)) = (const_of(func, lhs), const_of(func, rhs)) {
        if let Some(result) = op.eval(a, b) {
            return Some(func.const_value(result));
        }
    }

    match op {
        BinOp::Add => {
            if const_of(func, rhs) == Some(0) {
                return Some(lhs);
            }
            if const_of(func, lhs) == Some(0) {
                return Some(rhs);
            }
        }
        BinOp::Sub => {
            if const_of(func, rhs) == Some(0) {
                return Some(lhs);
            }
        }
        BinOp::Mul => {
            if const_of(func, rhs) == Some(1) {
                return Some(lhs);
            }
            if const_of(func, lhs) == Some(1) {
                return Some(rhs);
            }
            if const_of(func, rhs) == Some(0) || const_of(func, lhs) == Some(0) {
                return Some(func.const_value(0));
            }
        }
        BinOp::Div => {
            if const_of(func, rhs) == Some(1) {
                return Some(lhs);
            }
        }
        _ => {}
    }

    let key = match op {
        BinOp::Add if const_of(func, rhs).is_some() => {
            let (root, off) = decompose_add_chain(func, lhs);
            Key::AddConst(root, off.wrapping_add(const_of(func, rhs).unwrap()))
        }
        BinOp::Add if const_of(func, lhs).is_some() => {
            let (root, off) = decompose_add_chain(func, rhs);
            Key::AddConst(root, off.wrapping_add(const_of(func, lhs).unwrap()))
        }
        BinOp::Sub if const_of(func, rhs).is_some() => {
            let (root, off) = decompose_add_chain(func, lhs);
            Key::AddConst(root, off.wrapping_sub(const_of(func, rhs).unwrap()))
        }
        BinOp::Mul if const_of(func, rhs).is_some() => {
            let (root, mul) = decompose_mul_chain(func, lhs);
            Key::MulConst(root, mul.wrapping_mul(const_of(func, rhs).unwrap()))
        }
        BinOp::Mul if const_of(func, lhs).is_some() => {
            let (root, mul) = decompose_mul_chain(func, rhs);
            Key::MulConst(root, mul.wrapping_mul(const_of(func, lhs).unwrap()))
        }
        _ if op.is_commutative() => {
            let (a, b) = if lhs.0 <= rhs.0 { (lhs, rhs) } else { (rhs, lhs) };
            Key::Binary(op, a, b)
        }
        _ => Key::Binary(op, lhs, rhs),
    };

    dedup_or_insert(table, key, id)
}

fn fold_load(func: &mut Function, table: &mut HashMap<Key, ValueId>, id: ValueId, addr: ValueId, mem_token: ValueId) -> Option<ValueId> {
    if let Some(c) = global_const_fold(func, addr) {
        return Some(func.const_value(c));
    }

    if let ValueKind::Store { addr: store_addr, value, .. } = &func.value(mem_token).kind {
        if *store_addr == addr {
            return Some(*value);
        }
    }

    dedup_or_insert(table, Key::Load(addr, mem_token), id)
}

/// Walk a `GetElementPtr` chain back to its root; if every index along the way is
/// constant and the root is a `const` global, fold the load to the literal from
/// `flatten_init` (spec.md §4.5).
fn global_const_fold(func: &Function, addr: ValueId) -> Option<i32> {
    let mut cur = addr;
    let mut offset: i64 = 0;
    loop {
        match &func.value(cur).kind {
            ValueKind::GetElementPtr { array, base, index, multiplier } => {
                if !array.is_const {
                    return None;
                }
                let idx = const_of(func, *index)?;
                offset += idx as i64 * *multiplier as i64;
                cur = *base;
            }
            ValueKind::GlobalRef(decl) => {
                if !decl.is_const {
                    return None;
                }
                return decl.flatten_init.get(usize::try_from(offset).ok()?).copied();
            }
            _ => return None,
        }
    }
}

fn fold_phi(id: ValueId, incomings: &[(ValueId, crate::ir::BlockId)]) -> Option<ValueId> {
    let distinct: std::collections::HashSet<ValueId> = incomings.iter().map(|(v, _)| *v).filter(|v| *v != id).collect();
    if distinct.len() == 1 {
        distinct.into_iter().next()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_identical_binary() {
        let mut f = Function::new("f", false, vec![]);
        let a = f.const_value(3);
        let b = f.const_value(4);
        let sum1 = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b });
        let sum2 = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b });
        let use_both = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Mul, lhs: sum1, rhs: sum2 });
        f.push_inst(f.entry, ValueKind::Return { value: Some(use_both) });

        let stats = run(&mut f);
        assert!(stats.folded >= 1);
    }

    #[test]
    fn folds_add_zero_identity() {
        let mut f = Function::new("f", false, vec![]);
        let x = f.param_ref(0);
        let zero = f.const_value(0);
        let y = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Add, lhs: x, rhs: zero });
        f.push_inst(f.entry, ValueKind::Return { value: Some(y) });

        run(&mut f);
        let ValueKind::Return { value } = &f.value(*f.block(f.entry).insts.last().unwrap()).kind else { panic!() };
        assert_eq!(*value, Some(x));
    }
}
