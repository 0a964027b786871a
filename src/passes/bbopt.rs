//! Basic-block level cleanup (spec.md §4.6): fold branches with a constant condition
//! to a jump, merge a block that is only ever entered through an unconditional jump
//! into its sole predecessor, and drop blocks no longer reachable from entry.

use std::collections::HashSet;

use crate::ir::{BlockId, Function, ValueKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct BbOptStats {
    pub branches_folded: usize,
    pub blocks_merged: usize,
    pub blocks_removed: usize,
}

pub fn run(func: &mut Function) -> BbOptStats {
    let mut stats = BbOptStats::default();
    stats.branches_folded = fold_constant_branches(func);
    func.recompute_preds();
    stats.blocks_merged = merge_jump_only_chains(func);
    func.recompute_preds();
    stats.blocks_removed = remove_unreachable_blocks(func);
    stats
}

fn fold_constant_branches(func: &mut Function) -> usize {
    let mut folded = 0;
    for b in func.blocks().collect::<Vec<_>>() {
        let Some(term) = func.terminator(b) else { continue };
        let (cond, if_true, if_false) = match &func.value(term).kind {
            ValueKind::Branch { cond, if_true, if_false } => (*cond, *if_true, *if_false),
            _ => continue,
        };
        let c = match &func.value(cond).kind {
            ValueKind::Const(c) => *c,
            _ => continue,
        };
        let target = if c != 0 { if_true } else { if_false };
        func.value_mut(term).kind = ValueKind::Jump { target };
        folded += 1;
    }
    folded
}

/// A block with exactly one predecessor, which in turn has exactly one successor (an
/// unconditional jump into it), can be spliced directly into that predecessor.
fn merge_jump_only_chains(func: &mut Function) -> usize {
    let mut merged = 0;
    loop {
        let mut did_merge = false;
        for b in func.blocks().collect::<Vec<_>>() {
            if b == func.entry {
                continue;
            }
            let preds = func.block(b).preds.clone();
            if preds.len() != 1 {
                continue;
            }
            let pred = preds[0];
            if func.block(pred).succs.len() != 1 {
                continue;
            }
            if !func.block(b).insts.iter().take_while(|id| func.value(**id).kind.is_phi()).collect::<Vec<_>>().is_empty() {
                // A phi in `b` would need its single incoming value substituted in; skip
                // rather than risk an inconsistent rename (mem2reg/memdep already run
                // before bbopt in the fixed pipeline, so surviving phis are rare here).
                continue;
            }
            let Some(pred_term) = func.terminator(pred) else { continue };
            if !matches!(func.value(pred_term).kind, ValueKind::Jump { .. }) {
                continue;
            }
            // Splice: drop pred's Jump, append b's instructions (and mem phis, which
            // have no incoming-edge ambiguity since they follow `b`'s own def) to pred.
            func.block_mut(pred).insts.pop();
            let moved_insts = func.block(b).insts.clone();
            let moved_mem_phis = func.block(b).mem_phis.clone();
            func.block_mut(pred).insts.extend(moved_insts);
            func.block_mut(pred).mem_phis.extend(moved_mem_phis);
            func.block_mut(b).insts.clear();
            func.block_mut(b).mem_phis.clear();
            func.recompute_preds();
            merged += 1;
            did_merge = true;
            break;
        }
        if !did_merge {
            break;
        }
    }
    merged
}

fn remove_unreachable_blocks(func: &mut Function) -> usize {
    let mut reachable = HashSet::new();
    let mut worklist = vec![func.entry];
    while let Some(b) = worklist.pop() {
        if !reachable.insert(b) {
            continue;
        }
        worklist.extend(func.terminator_successors(b));
    }
    let mut removed = 0;
    for b in func.blocks().collect::<Vec<BlockId>>() {
        if !reachable.contains(&b) && !func.block(b).insts.is_empty() {
            func.block_mut(b).insts.clear();
            func.block_mut(b).mem_phis.clear();
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_true_branch_to_jump() {
        let mut f = Function::new("f", true, vec![]);
        let then_bb = f.new_block("then");
        let else_bb = f.new_block("else");
        let one = f.const_value(1);
        f.push_inst(f.entry, ValueKind::Branch { cond: one, if_true: then_bb, if_false: else_bb });
        f.push_inst(then_bb, ValueKind::Return { value: None });
        f.push_inst(else_bb, ValueKind::Return { value: None });
        f.recompute_preds();

        let stats = run(&mut f);
        assert_eq!(stats.branches_folded, 1);
        let term = f.terminator(f.entry).unwrap();
        assert!(matches!(f.value(term).kind, ValueKind::Jump { target } if target == then_bb));
    }
}
