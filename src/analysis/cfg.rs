//! Post-order/reverse-post-order numbering and dominance, per spec.md §4.2.
//!
//! Grounded in `seen_ir::cfg_builder`'s block-graph bookkeeping, generalized from a
//! `HashMap<String, BasicBlock>` control-flow graph to the arena's `BlockId` graph and
//! extended with the actual dominator/frontier computation spec.md §4.2 asks for
//! (the teacher crate never computed dominance; this is new code written in its idiom).

use std::collections::HashSet;

use crate::ir::{BlockId, Function};

/// Depth-first post-order over reachable blocks starting at `entry`.
pub fn post_order(func: &Function) -> Vec<BlockId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    post_order_visit(func, func.entry, &mut visited, &mut order);
    order
}

fn post_order_visit(func: &Function, b: BlockId, visited: &mut HashSet<BlockId>, order: &mut Vec<BlockId>) {
    if !visited.insert(b) {
        return;
    }
    for succ in func.block(b).succs.clone() {
        post_order_visit(func, succ, visited, order);
    }
    order.push(b);
}

pub fn reverse_post_order(func: &Function) -> Vec<BlockId> {
    let mut order = post_order(func);
    order.reverse();
    order
}

/// Iterative dominator computation (spec.md §4.2): initialize `dom_by` of the entry to
/// itself and every other reachable block to "all blocks", then refine by intersecting
/// predecessors' `dom_by` to a fixpoint. Unreachable blocks are left with an empty
/// `dom_by` and no `idom`.
pub fn compute_dominance(func: &mut Function) {
    let rpo = reverse_post_order(func);
    let reachable: HashSet<BlockId> = rpo.iter().copied().collect();
    let all: Vec<BlockId> = rpo.clone();

    let block_ids: Vec<BlockId> = func.blocks().collect();
    for b in block_ids {
        func.block_mut(b).dom_by.clear();
        func.block_mut(b).idom = None;
        func.block_mut(b).idom_children.clear();
        func.block_mut(b).dom_level = 0;
    }

    for &b in &all {
        if b == func.entry {
            func.block_mut(b).dom_by = vec![b];
        } else {
            func.block_mut(b).dom_by = all.clone();
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &b in &rpo {
            if b == func.entry {
                continue;
            }
            let preds: Vec<BlockId> = func.block(b).preds.iter().copied().filter(|p| reachable.contains(p)).collect();
            if preds.is_empty() {
                continue;
            }
            let mut new_dom: HashSet<BlockId> = func.block(preds[0]).dom_by.iter().copied().collect();
            for &p in &preds[1..] {
                let pd: HashSet<BlockId> = func.block(p).dom_by.iter().copied().collect();
                new_dom = new_dom.intersection(&pd).copied().collect();
            }
            new_dom.insert(b);
            let mut new_dom: Vec<BlockId> = new_dom.into_iter().collect();
            new_dom.sort_by_key(|b| b.0);
            if new_dom != func.block(b).dom_by {
                func.block_mut(b).dom_by = new_dom;
                changed = true;
            }
        }
    }

    compute_idom(func, &all);
    compute_dom_levels(func);
}

fn compute_idom(func: &mut Function, all: &[BlockId]) {
    for &b in all {
        if b == func.entry {
            continue;
        }
        let dom_by = func.block(b).dom_by.clone();
        // idom is the unique d in dom_by \ {b} that does not strictly dominate any
        // other strict dominator of b (spec.md §4.2).
        let strict: Vec<BlockId> = dom_by.iter().copied().filter(|d| *d != b).collect();
        let idom = strict.iter().copied().find(|&d| {
            strict.iter().all(|&other| other == d || !strictly_dominates(func, d, other))
        });
        if let Some(idom) = idom {
            func.block_mut(b).idom = Some(idom);
            func.block_mut(idom).idom_children.push(b);
        }
    }
}

fn strictly_dominates(func: &Function, d: BlockId, b: BlockId) -> bool {
    d != b && func.block(b).dom_by.contains(&d)
}

pub fn dominates(func: &Function, d: BlockId, b: BlockId) -> bool {
    func.block(b).dom_by.contains(&d)
}

fn compute_dom_levels(func: &mut Function) {
    fn visit(func: &mut Function, b: BlockId, level: u32) {
        func.block_mut(b).dom_level = level;
        for c in func.block(b).idom_children.clone() {
            visit(func, c, level + 1);
        }
    }
    visit(func, func.entry, 0);
}

/// Dominance frontier of every block: `DF[x]` includes `y` whenever some edge
/// `from -> y` has `x` dominating `from` but not strictly dominating `y` (spec.md
/// §4.2), computed by walking up `idom` from `from` for every edge.
pub fn dominance_frontier(func: &Function) -> std::collections::HashMap<BlockId, HashSet<BlockId>> {
    let mut df: std::collections::HashMap<BlockId, HashSet<BlockId>> = std::collections::HashMap::new();
    for y in func.blocks() {
        let preds = func.block(y).preds.clone();
        if preds.len() < 2 {
            continue;
        }
        for from in preds {
            let mut x = from;
            while !strictly_dominates(func, x, y) {
                df.entry(x).or_default().insert(y);
                match func.block(x).idom {
                    Some(idom) => x = idom,
                    None => break,
                }
            }
        }
    }
    df
}

/// Iterated dominance frontier of a set of blocks (spec.md's IDF, used by mem2reg and
/// memdep to place phis).
pub fn iterated_dominance_frontier(func: &Function, df: &std::collections::HashMap<BlockId, HashSet<BlockId>>, seeds: &HashSet<BlockId>) -> HashSet<BlockId> {
    let mut result = HashSet::new();
    let mut worklist: Vec<BlockId> = seeds.iter().copied().collect();
    while let Some(b) = worklist.pop() {
        if let Some(frontier) = df.get(&b) {
            for &y in frontier {
                if result.insert(y) {
                    worklist.push(y);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueKind;

    fn diamond() -> Function {
        let mut f = Function::new("f", true, vec![]);
        let then_bb = f.new_block("then");
        let else_bb = f.new_block("else");
        let end_bb = f.new_block("end");
        let c = f.const_value(1);
        f.push_inst(f.entry, ValueKind::Branch { cond: c, if_true: then_bb, if_false: else_bb });
        f.push_inst(then_bb, ValueKind::Jump { target: end_bb });
        f.push_inst(else_bb, ValueKind::Jump { target: end_bb });
        f.push_inst(end_bb, ValueKind::Return { value: None });
        f.recompute_preds();
        f
    }

    #[test]
    fn dominance_of_diamond() {
        let mut f = diamond();
        compute_dominance(&mut f);
        let blocks: Vec<BlockId> = f.blocks().collect();
        let end = blocks[3];
        assert_eq!(f.block(end).idom, Some(f.entry));
        let then_bb = blocks[1];
        assert_eq!(f.block(then_bb).idom, Some(f.entry));
    }

    #[test]
    fn dominance_frontier_of_diamond() {
        let mut f = diamond();
        compute_dominance(&mut f);
        let blocks: Vec<BlockId> = f.blocks().collect();
        let then_bb = blocks[1];
        let else_bb = blocks[2];
        let end = blocks[3];
        let df = dominance_frontier(&f);
        assert!(df.get(&then_bb).map(|s| s.contains(&end)).unwrap_or(false));
        assert!(df.get(&else_bb).map(|s| s.contains(&end)).unwrap_or(false));
    }
}
