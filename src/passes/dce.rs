//! Dead code elimination (spec.md §4.6): mark roots (side-effecting instructions),
//! transitively mark their operands live, delete everything unmarked. Also removes
//! "useless loops" — a loop with a unique exit that writes nothing externally
//! observable and whose exit phis don't depend on which iteration left.

use std::collections::HashSet;

use crate::analysis::cfg;
use crate::analysis::loops::{self, LoopInfo};
use crate::ir::{BlockId, Function, ValueId, ValueKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct DceStats {
    pub values_removed: usize,
    pub loops_removed: usize,
}

pub fn run(func: &mut Function) -> DceStats {
    let mut stats = DceStats::default();
    stats.values_removed += sweep_dead_values(func);

    cfg::compute_dominance(func);
    let info = loops::analyze_loops(func);
    stats.loops_removed = remove_useless_loops(func, &info);
    if stats.loops_removed > 0 {
        func.recompute_preds();
        stats.values_removed += sweep_dead_values(func);
    }
    stats
}

fn sweep_dead_values(func: &mut Function) -> usize {
    let mut live: HashSet<ValueId> = HashSet::new();
    let mut worklist = Vec::new();

    for b in func.blocks() {
        for &id in &func.block(b).insts {
            if func.value(id).kind.has_side_effects() && live.insert(id) {
                worklist.push(id);
            }
        }
    }

    while let Some(id) = worklist.pop() {
        for operand in func.value(id).kind.operands() {
            if live.insert(operand) {
                worklist.push(operand);
            }
        }
    }

    let mut removed = 0;
    let blocks: Vec<BlockId> = func.blocks().collect();
    for b in blocks {
        let dead: Vec<ValueId> = func.block(b).insts.iter().copied().filter(|id| !live.contains(id)).collect();
        let dead_phis: Vec<ValueId> = func.block(b).mem_phis.iter().copied().filter(|id| !live.contains(id)).collect();
        for id in dead.into_iter().chain(dead_phis) {
            // Uses of a dead value may include other dead values not yet erased;
            // detach before erase so the debug_assert on an empty use list holds.
            detach_uses(func, id);
            func.erase(id);
            removed += 1;
        }
    }
    removed
}

fn detach_uses(func: &mut Function, id: ValueId) {
    let users = func.value(id).uses.clone();
    let undef = func.undef();
    for user in users {
        func.set_operand(user, id, undef);
    }
}

/// A loop qualifies for removal when: it has exactly one exit block reached from
/// inside the loop, nothing inside it stores to memory or calls an impure function,
/// and every phi in the exit block fed from inside the loop carries the same value on
/// every loop exit edge (so which iteration left doesn't matter).
fn remove_useless_loops(func: &mut Function, info: &LoopInfo) -> usize {
    let mut removed = 0;
    for lp in &info.loops {
        if has_side_effects_in_loop(func, &lp.blocks) {
            continue;
        }
        let exits = exit_edges(func, &lp.blocks);
        if exits.len() != 1 {
            continue;
        }
        let (_, exit_to) = exits[0];
        if !exit_phis_are_loop_invariant(func, exit_to, &lp.blocks) {
            continue;
        }
        // Rewire the loop's predecessors from outside the loop directly to the exit.
        let preheader_preds: Vec<BlockId> =
            func.block(lp.header).preds.iter().copied().filter(|p| !lp.blocks.contains(p)).collect();
        for pred in preheader_preds {
            if let Some(term) = func.terminator(pred) {
                retarget(func, term, lp.header, exit_to);
            }
        }
        removed += 1;
    }
    removed
}

/// Rewrite a terminator's branch target from `old` to `new`. Block targets aren't
/// tracked as SSA operands (spec.md §3.2 excludes them from use/def bookkeeping), so
/// this mutates `ValueKind` directly rather than going through `set_operand`.
fn retarget(func: &mut Function, term: ValueId, old: BlockId, new: BlockId) {
    match &mut func.value_mut(term).kind {
        ValueKind::Jump { target } if *target == old => *target = new,
        ValueKind::Branch { if_true, if_false, .. } => {
            if *if_true == old {
                *if_true = new;
            }
            if *if_false == old {
                *if_false = new;
            }
        }
        _ => {}
    }
}

fn has_side_effects_in_loop(func: &Function, blocks: &HashSet<BlockId>) -> bool {
    blocks.iter().any(|&b| {
        func.block(b).insts.iter().any(|&id| match &func.value(id).kind {
            ValueKind::Store { .. } => true,
            ValueKind::Call { func: f, .. } => !f.is_pure,
            _ => false,
        })
    })
}

fn exit_edges(func: &Function, blocks: &HashSet<BlockId>) -> Vec<(BlockId, BlockId)> {
    let mut exits = Vec::new();
    for &b in blocks {
        for succ in func.terminator_successors(b) {
            if !blocks.contains(&succ) {
                exits.push((b, succ));
            }
        }
    }
    exits
}

fn exit_phis_are_loop_invariant(func: &Function, exit_block: BlockId, loop_blocks: &HashSet<BlockId>) -> bool {
    func.block(exit_block).insts.iter().take_while(|id| func.value(**id).kind.is_phi()).all(|&id| {
        let ValueKind::Phi { incomings } = &func.value(id).kind else { return true };
        let from_loop: Vec<ValueId> = incomings.iter().filter(|(_, from)| loop_blocks.contains(from)).map(|(v, _)| *v).collect();
        from_loop.windows(2).all(|w| w[0] == w[1])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_instruction_with_no_live_uses() {
        let mut f = Function::new("f", false, vec![]);
        let a = f.const_value(1);
        let b = f.const_value(2);
        let dead = f.push_inst(f.entry, ValueKind::Binary { op: crate::ir::BinOp::Add, lhs: a, rhs: b });
        let _ = dead;
        let zero = f.const_value(0);
        f.push_inst(f.entry, ValueKind::Return { value: Some(zero) });

        let stats = run(&mut f);
        assert!(stats.values_removed >= 1);
        assert!(matches!(f.value(dead).kind, ValueKind::Undef));
    }
}
