//! Natural-loop detection with nesting, per spec.md §4.2: collected in post-order on
//! the dominator tree; each header's back-edge predecessors seed a worklist that walks
//! predecessor chains without crossing the header; nested loops are linked into their
//! enclosing loop when discovered while walking an outer loop's predecessors.

use std::collections::HashSet;

use crate::analysis::cfg::dominates;
use crate::ir::{BlockId, Function};

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
    pub top_level: Vec<usize>,
    block_loop: std::collections::HashMap<BlockId, usize>,
}

impl LoopInfo {
    pub fn innermost_loop(&self, b: BlockId) -> Option<&Loop> {
        self.block_loop.get(&b).map(|&i| &self.loops[i])
    }

    pub fn loop_depth(&self, b: BlockId) -> u32 {
        let mut depth = 0;
        let mut cur = self.block_loop.get(&b).copied();
        while let Some(i) = cur {
            depth += 1;
            cur = self.loops[i].parent;
        }
        depth
    }
}

/// Build `LoopInfo` for `func`. Requires up-to-date dominance.
pub fn analyze_loops(func: &Function) -> LoopInfo {
    let mut info = LoopInfo::default();
    // Visit headers in dominator-tree post-order so inner loops are discovered before
    // their enclosing loops (spec.md §4.2).
    let mut dom_post_order = Vec::new();
    collect_dom_post_order(func, func.entry, &mut dom_post_order);

    for header in dom_post_order {
        let back_edges: Vec<BlockId> = func
            .block(header)
            .preds
            .iter()
            .copied()
            .filter(|&p| dominates(func, header, p))
            .collect();
        if back_edges.is_empty() {
            continue;
        }
        let mut blocks = HashSet::new();
        blocks.insert(header);
        let mut worklist: Vec<BlockId> = back_edges;
        while let Some(b) = worklist.pop() {
            if !blocks.insert(b) {
                continue;
            }
            for p in func.block(b).preds.clone() {
                if p != header {
                    worklist.push(p);
                }
            }
        }
        let idx = info.loops.len();
        // Link to an enclosing loop if any block of this loop already belongs to one.
        let parent = blocks.iter().filter_map(|b| info.block_loop.get(b)).copied().find(|&p| p != idx);
        info.loops.push(Loop { header, blocks: blocks.clone(), parent, children: Vec::new() });
        if let Some(parent) = parent {
            info.loops[parent].children.push(idx);
        } else {
            info.top_level.push(idx);
        }
        for b in blocks {
            // Innermost loop wins: since we process in post-order (inner loops first),
            // only set the mapping if not already claimed by a tighter loop.
            info.block_loop.entry(b).or_insert(idx);
        }
    }
    info
}

fn collect_dom_post_order(func: &Function, b: BlockId, out: &mut Vec<BlockId>) {
    for c in func.block(b).idom_children.clone() {
        collect_dom_post_order(func, c, out);
    }
    out.push(b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::compute_dominance;
    use crate::ir::ValueKind;

    #[test]
    fn detects_simple_loop() {
        let mut f = Function::new("f", true, vec![]);
        let header = f.new_block("header");
        let body = f.new_block("body");
        let end = f.new_block("end");
        let c = f.const_value(1);
        f.push_inst(f.entry, ValueKind::Jump { target: header });
        f.push_inst(header, ValueKind::Branch { cond: c, if_true: body, if_false: end });
        f.push_inst(body, ValueKind::Jump { target: header });
        f.push_inst(end, ValueKind::Return { value: None });
        f.recompute_preds();
        compute_dominance(&mut f);
        let info = analyze_loops(&f);
        assert_eq!(info.loops.len(), 1);
        assert_eq!(info.loops[0].header, header);
        assert!(info.loops[0].blocks.contains(&body));
        assert_eq!(info.loop_depth(body), 1);
        assert_eq!(info.loop_depth(end), 0);
    }
}
