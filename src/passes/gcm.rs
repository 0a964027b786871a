//! Global code motion (spec.md §4.5): every movable instruction (binary, unary, GEP,
//! load, `Mv`) is first scheduled as early as dominance allows, then pulled back down
//! to the block with the smallest loop depth among its legal late positions. Requires
//! fresh dominance, a fresh DCE pass and a fresh `memdep` recomputation — the pass
//! manager is responsible for running those first.

use std::collections::HashMap;

use crate::analysis::cfg;
use crate::analysis::loops::{self, LoopInfo};
use crate::ir::{BlockId, Function, ValueId, ValueKind};

pub fn run(func: &mut Function) {
    cfg::compute_dominance(func);
    let info = loops::analyze_loops(func);

    let movable: Vec<ValueId> = func
        .blocks()
        .flat_map(|b| func.block(b).insts.clone())
        .filter(|&id| func.value(id).kind.is_movable())
        .collect();

    let mut early = HashMap::new();
    for &id in &movable {
        schedule_early(func, id, &mut early);
    }

    let mut late = HashMap::new();
    for &id in &movable {
        schedule_late(func, id, &early, &info, &mut late);
    }

    sink_compares(func);
}

fn fixed_block(func: &Function, id: ValueId) -> BlockId {
    func.value(id).block.unwrap_or(func.entry)
}

fn schedule_early(func: &Function, id: ValueId, memo: &mut HashMap<ValueId, BlockId>) -> BlockId {
    if let Some(&b) = memo.get(&id) {
        return b;
    }
    if !func.value(id).kind.is_movable() {
        let b = fixed_block(func, id);
        memo.insert(id, b);
        return b;
    }
    let operands = func.value(id).kind.operands();
    let best = operands
        .iter()
        .map(|&op| schedule_early(func, op, memo))
        .max_by_key(|&b| func.block(b).dom_level)
        .unwrap_or(func.entry);
    memo.insert(id, best);
    best
}

fn lca(func: &Function, a: BlockId, b: BlockId) -> BlockId {
    let (mut x, mut y) = (a, b);
    while func.block(x).dom_level > func.block(y).dom_level {
        x = func.block(x).idom.unwrap_or(x);
    }
    while func.block(y).dom_level > func.block(x).dom_level {
        y = func.block(y).idom.unwrap_or(y);
    }
    while x != y {
        x = func.block(x).idom.unwrap_or(x);
        y = func.block(y).idom.unwrap_or(y);
    }
    x
}

fn use_site(func: &mut Function, user: ValueId, def: ValueId, early: &HashMap<ValueId, BlockId>, info: &LoopInfo, late: &mut HashMap<ValueId, BlockId>) -> Vec<BlockId> {
    let is_phi = matches!(func.value(user).kind, ValueKind::Phi { .. });
    if is_phi {
        let ValueKind::Phi { incomings } = func.value(user).kind.clone() else { unreachable!() };
        incomings.iter().filter(|(v, _)| *v == def).map(|(_, from)| *from).collect()
    } else if early.contains_key(&user) {
        vec![schedule_late(func, user, early, info, late)]
    } else {
        vec![fixed_block(func, user)]
    }
}

fn schedule_late(func: &mut Function, id: ValueId, early: &HashMap<ValueId, BlockId>, info: &LoopInfo, late: &mut HashMap<ValueId, BlockId>) -> BlockId {
    if let Some(&b) = late.get(&id) {
        return b;
    }
    let users = func.value(id).uses.clone();
    let mut target: Option<BlockId> = None;
    for user in users {
        for site in use_site(func, user, id, early, info, late) {
            target = Some(match target {
                None => site,
                Some(t) => lca(func, t, site),
            });
        }
    }
    let early_pos = early[&id];
    let mut best = target.unwrap_or(early_pos);
    let mut cur = best;
    while cur != early_pos {
        let Some(idom) = func.block(cur).idom else { break };
        cur = idom;
        if loops_depth(info, cur) < loops_depth(info, best) {
            best = cur;
        }
    }

    late.insert(id, best);
    place_in_block(func, id, best);
    best
}

fn loops_depth(info: &LoopInfo, b: BlockId) -> u32 {
    info.loop_depth(b)
}

fn place_in_block(func: &mut Function, id: ValueId, block: BlockId) {
    if let Some(old) = func.value(id).block {
        func.block_mut(old).insts.retain(|&v| v != id);
    }
    func.value_mut(id).block = Some(block);

    let users: std::collections::HashSet<ValueId> = func.value(id).uses.iter().copied().collect();
    let insts_len = func.block(block).insts.len();
    let fallback = if insts_len == 0 { 0 } else { insts_len - 1 }; // before the terminator
    let insert_at = func.block(block).insts.iter().position(|u| users.contains(u)).unwrap_or(fallback);
    func.block_mut(block).insts.insert(insert_at, id);
}

/// Pull a comparison used only by one `Branch` to sit immediately before it (spec.md's
/// final re-schedule), undoing any instruction GCM happened to place between them.
fn sink_compares(func: &mut Function) {
    for b in func.blocks().collect::<Vec<_>>() {
        let Some(term) = func.terminator(b) else { continue };
        let cond = match &func.value(term).kind {
            ValueKind::Branch { cond, .. } => *cond,
            _ => continue,
        };
        if !matches!(func.value(cond).kind, ValueKind::Binary { .. }) {
            continue;
        }
        if func.value(cond).uses.len() != 1 || func.value(cond).block != Some(b) {
            continue;
        }
        func.block_mut(b).insts.retain(|&v| v != cond);
        let pos = func.block(b).insts.iter().position(|&v| v == term).unwrap();
        func.block_mut(b).insts.insert(pos, cond);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinOp;

    #[test]
    fn hoists_loop_invariant_out_of_loop() {
        let mut f = Function::new("f", true, vec![]);
        let header = f.new_block("header");
        let body = f.new_block("body");
        let end = f.new_block("end");

        let a = f.param_ref(0);
        let b = f.param_ref(1);
        f.push_inst(f.entry, ValueKind::Jump { target: header });

        let phi = f.new_value(ValueKind::Phi { incomings: vec![] }, Some(header));
        f.prepend_phi(header, phi);
        let bound = f.const_value(100);
        let cond = f.push_inst(header, ValueKind::Binary { op: BinOp::Lt, lhs: phi, rhs: bound });
        f.push_inst(header, ValueKind::Branch { cond, if_true: body, if_false: end });

        let invariant = f.push_inst(body, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b });
        let next = f.push_inst(body, ValueKind::Binary { op: BinOp::Add, lhs: phi, rhs: invariant });
        f.push_inst(body, ValueKind::Jump { target: header });

        let zero = f.const_value(0);
        f.add_phi_incoming(phi, zero, f.entry);
        f.add_phi_incoming(phi, next, body);
        f.push_inst(end, ValueKind::Return { value: None });
        f.recompute_preds();

        run(&mut f);
        assert_eq!(f.value(invariant).block, Some(f.entry));
    }

    #[test]
    fn sinks_compare_before_branch() {
        let mut f = Function::new("f", true, vec![]);
        let a = f.param_ref(0);
        let b = f.param_ref(1);
        let cond = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Lt, lhs: a, rhs: b });
        let filler = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b });
        let then_bb = f.new_block("then");
        let else_bb = f.new_block("else");
        f.push_inst(f.entry, ValueKind::Branch { cond, if_true: then_bb, if_false: else_bb });
        f.push_inst(then_bb, ValueKind::Return { value: Some(filler) });
        f.push_inst(else_bb, ValueKind::Return { value: None });
        f.recompute_preds();

        run(&mut f);
        let insts = &f.block(f.entry).insts;
        let cond_pos = insts.iter().position(|&v| v == cond).unwrap();
        let term_pos = insts.len() - 1;
        assert_eq!(cond_pos, term_pos - 1);
    }
}
