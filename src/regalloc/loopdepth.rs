//! Loop-depth analysis over the machine CFG (spec.md §4.8's `loop_cnt`, the spill
//! heuristic's denominator): the same dominator/back-edge/nesting construction
//! `analysis::loops` runs on the IR, reworked for `MachineFunction`'s plain block
//! indices. Instruction selection's 1:1 block mapping (spec.md §4.7) means the IR's own
//! `LoopInfo` doesn't survive into machine IR, and `analyze_loops` is generic over
//! `ir::Function`/`BlockId` specifically, so this is a small standalone rebuild rather
//! than a reuse.

use std::collections::{HashMap, HashSet};

use crate::mach::MachineFunction;

/// Returns one loop-nesting depth per block index, `0` for blocks outside any loop.
pub fn compute(mf: &MachineFunction) -> Vec<u32> {
    let n = mf.blocks.len();
    if n == 0 {
        return Vec::new();
    }
    let dom_by = dominance(mf);

    // Headers ordered so an inner loop's header is processed before any loop that
    // encloses it: a header nested `k` levels deep is dominated by at least `k`
    // other blocks, so sorting by descending `dom_by` size approximates the
    // dominator-tree post-order `analysis::loops` walks explicitly. Good enough for a
    // heuristic input to the spill cost, not a correctness-sensitive invariant.
    let mut headers: Vec<usize> = (0..n).filter(|&h| mf.blocks[h].preds.iter().any(|&p| dom_by[p].contains(&h))).collect();
    headers.sort_by_key(|&h| std::cmp::Reverse(dom_by[h].len()));

    let mut loops: Vec<HashSet<usize>> = Vec::new();
    let mut parent: Vec<Option<usize>> = Vec::new();
    let mut block_loop: HashMap<usize, usize> = HashMap::new();

    for h in headers {
        let back_edges: Vec<usize> = mf.blocks[h].preds.iter().copied().filter(|&p| dom_by[p].contains(&h)).collect();
        let mut blocks = HashSet::new();
        blocks.insert(h);
        let mut worklist = back_edges;
        while let Some(b) = worklist.pop() {
            if !blocks.insert(b) {
                continue;
            }
            for &p in &mf.blocks[b].preds {
                if p != h {
                    worklist.push(p);
                }
            }
        }
        let idx = loops.len();
        let par = blocks.iter().filter_map(|b| block_loop.get(b)).copied().find(|&p| p != idx);
        for &b in &blocks {
            block_loop.entry(b).or_insert(idx);
        }
        loops.push(blocks);
        parent.push(par);
    }

    let mut depth = vec![0u32; n];
    for b in 0..n {
        let mut cur = block_loop.get(&b).copied();
        while let Some(i) = cur {
            depth[b] += 1;
            cur = parent[i];
        }
    }
    depth
}

/// Iterative forward dataflow, the same fixpoint `analysis::cfg::compute_dominance`
/// runs, over the machine CFG's plain `usize` block indices.
fn dominance(mf: &MachineFunction) -> Vec<HashSet<usize>> {
    let n = mf.blocks.len();
    let all: HashSet<usize> = (0..n).collect();
    let mut dom: Vec<HashSet<usize>> = vec![all; n];
    dom[mf.entry] = [mf.entry].into_iter().collect();

    let mut changed = true;
    while changed {
        changed = false;
        for b in 0..n {
            if b == mf.entry || mf.blocks[b].preds.is_empty() {
                continue;
            }
            let preds = &mf.blocks[b].preds;
            let mut new_dom = dom[preds[0]].clone();
            for &p in &preds[1..] {
                new_dom = new_dom.intersection(&dom[p]).copied().collect();
            }
            new_dom.insert(b);
            if new_dom != dom[b] {
                dom[b] = new_dom;
                changed = true;
            }
        }
    }
    dom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_single_back_edge_gives_the_loop_body_depth_one() {
        let mut mf = MachineFunction::new("f", false);
        let entry = mf.new_block("entry");
        let header = mf.new_block("header");
        let body = mf.new_block("body");
        let exit = mf.new_block("exit");
        mf.entry = entry;
        mf.blocks[entry].succs = vec![header];
        mf.blocks[header].succs = vec![body, exit];
        mf.blocks[body].succs = vec![header];
        mf.blocks[exit].succs = vec![];
        mf.recompute_preds();

        let depth = compute(&mf);
        assert_eq!(depth[entry], 0);
        assert_eq!(depth[header], 1);
        assert_eq!(depth[body], 1);
        assert_eq!(depth[exit], 0);
    }

    #[test]
    fn nested_loops_give_the_inner_body_depth_two() {
        let mut mf = MachineFunction::new("f", false);
        let entry = mf.new_block("entry");
        let outer = mf.new_block("outer");
        let inner = mf.new_block("inner");
        let exit = mf.new_block("exit");
        mf.entry = entry;
        mf.blocks[entry].succs = vec![outer];
        mf.blocks[outer].succs = vec![inner, exit];
        mf.blocks[inner].succs = vec![outer];
        mf.blocks[exit].succs = vec![];
        mf.recompute_preds();

        let depth = compute(&mf);
        assert_eq!(depth[outer], 1);
        assert_eq!(depth[inner], 2);
        assert_eq!(depth[exit], 0);
    }
}
