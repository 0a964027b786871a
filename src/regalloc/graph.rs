//! Interference graph construction and iterated register coalescing (spec.md §2,
//! §4.8: "iterated register coalescing, Briggs-style"): 14 colors (`r0..r12`, `lr`),
//! precolored nodes fixed in place, a simplify/coalesce/freeze/spill worklist loop
//! following Appel's formulation of the Briggs/George algorithm, and greedy color
//! assignment on the select-stack pop order.

use std::collections::{BTreeMap, BTreeSet};

use crate::mach::{Cond, LiveValue, MachInst, MachineFunction, VReg, NUM_COLORS};
use crate::regalloc::loopdepth;

const K: i64 = NUM_COLORS as i64;

fn is_precolored(v: LiveValue) -> bool {
    matches!(v, LiveValue::P(_))
}

#[derive(Debug, Default)]
pub struct InterferenceGraph {
    adj: BTreeMap<LiveValue, BTreeSet<LiveValue>>,
    /// Candidate coalescing moves recorded while walking a block in reverse (spec.md
    /// §4.8): a trivial `d <- s` whose source was pulled out of `live` before the
    /// interference edges for this instruction's defs were added, so `d` and `s`
    /// never picked up an edge from this specific move.
    moves: BTreeSet<(LiveValue, LiveValue)>,
    /// `loop_cnt[n]` (spec.md §4.8's spill heuristic): the sum of the loop depth of
    /// every block `n` is live in.
    loop_cnt: BTreeMap<LiveValue, u32>,
}

impl InterferenceGraph {
    fn add_node(&mut self, v: LiveValue) {
        self.adj.entry(v).or_default();
    }

    fn add_edge(&mut self, a: LiveValue, b: LiveValue) {
        if a == b {
            return;
        }
        self.adj.entry(a).or_default().insert(b);
        self.adj.entry(b).or_default().insert(a);
    }
}

/// A trivial register-to-register move: unconditional, unshifted, both operands
/// already live values (never an immediate source).
fn trivial_move(inst: &MachInst) -> Option<(LiveValue, LiveValue)> {
    let MachInst::Mov { dst, src, cond: Cond::Al, shift: None } = inst else { return None };
    Some((dst.live_value()?, src.live_value()?))
}

pub fn build_interference(mf: &MachineFunction) -> InterferenceGraph {
    let loop_depth = loopdepth::compute(mf);
    let mut g = InterferenceGraph::default();

    for (bi, block) in mf.blocks.iter().enumerate() {
        let depth = loop_depth.get(bi).copied().unwrap_or(0);
        let mut touched: BTreeSet<LiveValue> = BTreeSet::new();
        let mut live: BTreeSet<LiveValue> = block.live_out.clone();
        for &v in &live {
            g.add_node(v);
        }
        touched.extend(&live);

        for inst in block.insts.iter().rev() {
            if let Some((d, s)) = trivial_move(inst) {
                g.moves.insert((d, s));
                live.remove(&s);
            }

            let defs: Vec<LiveValue> = inst.defs().into_iter().filter_map(|o| o.live_value()).collect();
            for &d in &defs {
                g.add_node(d);
                touched.insert(d);
                for &l in &live {
                    g.add_edge(d, l);
                }
            }
            for d in &defs {
                live.remove(d);
            }
            for u in inst.uses().into_iter().filter_map(|o| o.live_value()) {
                g.add_node(u);
                touched.insert(u);
                live.insert(u);
            }
        }

        if depth > 0 {
            for v in touched {
                *g.loop_cnt.entry(v).or_default() += depth;
            }
        }
    }
    g
}

/// Iterated register coalescing's mutable working state (spec.md §4.8): the
/// simplify/freeze/spill worklist partition plus the coalescing machinery (move
/// worklists, union-find `alias` over coalesced nodes, select stack) that Appel's
/// algorithm layers on top of plain Chaitin simplify/spill/color.
struct Coalescer {
    adj: BTreeMap<LiveValue, BTreeSet<LiveValue>>,
    loop_cnt: BTreeMap<LiveValue, u32>,
    degree: BTreeMap<LiveValue, i64>,
    move_list: BTreeMap<LiveValue, BTreeSet<(LiveValue, LiveValue)>>,

    simplify_worklist: BTreeSet<LiveValue>,
    freeze_worklist: BTreeSet<LiveValue>,
    spill_worklist: BTreeSet<LiveValue>,

    worklist_moves: BTreeSet<(LiveValue, LiveValue)>,
    active_moves: BTreeSet<(LiveValue, LiveValue)>,

    /// Nodes no longer part of the live graph: pushed to `select_stack` by simplify,
    /// or absorbed into another node by coalescing. `adjacent_live` excludes both.
    removed: BTreeSet<LiveValue>,
    coalesced_nodes: BTreeSet<LiveValue>,
    alias: BTreeMap<LiveValue, LiveValue>,

    select_stack: Vec<LiveValue>,
}

impl Coalescer {
    fn new(g: &InterferenceGraph) -> Self {
        let adj = g.adj.clone();
        let loop_cnt = g.loop_cnt.clone();

        let mut degree: BTreeMap<LiveValue, i64> = BTreeMap::new();
        for (&n, neighbors) in &adj {
            // Precolored nodes are never simplified, frozen, or spilled; giving them
            // a degree that can never drop below K keeps every worklist check that
            // already excludes them consistent without a second special case.
            degree.insert(n, if is_precolored(n) { K + adj.len() as i64 + 1 } else { neighbors.len() as i64 });
        }

        let mut move_list: BTreeMap<LiveValue, BTreeSet<(LiveValue, LiveValue)>> = BTreeMap::new();
        let mut worklist_moves = BTreeSet::new();
        for &(d, s) in &g.moves {
            move_list.entry(d).or_default().insert((d, s));
            move_list.entry(s).or_default().insert((d, s));
            worklist_moves.insert((d, s));
        }

        let mut simplify_worklist = BTreeSet::new();
        let mut freeze_worklist = BTreeSet::new();
        let mut spill_worklist = BTreeSet::new();
        for &n in adj.keys() {
            if is_precolored(n) {
                continue;
            }
            let d = degree[&n];
            if d >= K {
                spill_worklist.insert(n);
            } else if move_list.get(&n).is_some_and(|ms| !ms.is_empty()) {
                freeze_worklist.insert(n);
            } else {
                simplify_worklist.insert(n);
            }
        }

        Coalescer {
            adj,
            loop_cnt,
            degree,
            move_list,
            simplify_worklist,
            freeze_worklist,
            spill_worklist,
            worklist_moves,
            active_moves: BTreeSet::new(),
            removed: BTreeSet::new(),
            coalesced_nodes: BTreeSet::new(),
            alias: BTreeMap::new(),
            select_stack: Vec::new(),
        }
    }

    fn degree_of(&self, n: LiveValue) -> i64 {
        self.degree.get(&n).copied().unwrap_or(0)
    }

    fn get_alias(&self, mut n: LiveValue) -> LiveValue {
        while self.coalesced_nodes.contains(&n) {
            match self.alias.get(&n) {
                Some(&a) => n = a,
                None => break,
            }
        }
        n
    }

    fn adjacent_live(&self, n: LiveValue) -> Vec<LiveValue> {
        self.adj.get(&n).into_iter().flatten().copied().filter(|m| !self.removed.contains(m)).collect()
    }

    fn move_related(&self, n: LiveValue) -> bool {
        self.move_list.get(&n).is_some_and(|ms| ms.iter().any(|m| self.worklist_moves.contains(m) || self.active_moves.contains(m)))
    }

    fn enable_moves(&mut self, nodes: &[LiveValue]) {
        for &n in nodes {
            if let Some(ms) = self.move_list.get(&n).cloned() {
                for m in ms {
                    if self.active_moves.remove(&m) {
                        self.worklist_moves.insert(m);
                    }
                }
            }
        }
    }

    fn decrement_degree(&mut self, m: LiveValue) {
        let d = self.degree_of(m);
        self.degree.insert(m, d - 1);
        if is_precolored(m) || d != K {
            return;
        }
        let mut to_enable = self.adjacent_live(m);
        to_enable.push(m);
        self.enable_moves(&to_enable);
        self.spill_worklist.remove(&m);
        if self.move_related(m) {
            self.freeze_worklist.insert(m);
        } else {
            self.simplify_worklist.insert(m);
        }
    }

    fn add_worklist(&mut self, n: LiveValue) {
        if !is_precolored(n) && !self.move_related(n) && self.degree_of(n) < K {
            self.freeze_worklist.remove(&n);
            self.simplify_worklist.insert(n);
        }
    }

    /// George's conservative coalescing test: every neighbor of the non-precolored
    /// side already interferes with, or is subsumed by the degree of, the precolored
    /// side.
    fn ok(&self, t: LiveValue, r: LiveValue) -> bool {
        is_precolored(t) || self.adj.get(&t).is_some_and(|s| s.contains(&r)) || self.degree_of(t) < K
    }

    /// Briggs' conservative coalescing test: fewer than `K` of the combined
    /// neighborhood's nodes have significant degree, so the merged node is
    /// colorable regardless of how those neighbors end up colored.
    fn conservative(&self, nodes: &BTreeSet<LiveValue>) -> bool {
        (nodes.iter().filter(|&&n| self.degree_of(n) >= K).count() as i64) < K
    }

    fn add_edge_live(&mut self, a: LiveValue, b: LiveValue) {
        if a == b {
            return;
        }
        let new = self.adj.entry(a).or_default().insert(b);
        self.adj.entry(b).or_default().insert(a);
        if new {
            if !is_precolored(a) {
                let d = self.degree_of(a);
                self.degree.insert(a, d + 1);
            }
            if !is_precolored(b) {
                let d = self.degree_of(b);
                self.degree.insert(b, d + 1);
            }
        }
    }

    fn simplify(&mut self) -> bool {
        let Some(n) = self.simplify_worklist.iter().next().copied() else { return false };
        self.simplify_worklist.remove(&n);
        self.select_stack.push(n);
        self.removed.insert(n);
        for m in self.adjacent_live(n) {
            self.decrement_degree(m);
        }
        true
    }

    fn combine(&mut self, u: LiveValue, v: LiveValue) {
        if !self.freeze_worklist.remove(&v) {
            self.spill_worklist.remove(&v);
        }
        self.coalesced_nodes.insert(v);
        self.removed.insert(v);
        self.alias.insert(v, u);
        if let Some(v_moves) = self.move_list.get(&v).cloned() {
            self.move_list.entry(u).or_default().extend(v_moves);
        }
        self.enable_moves(&[v]);
        for t in self.adjacent_live(v) {
            self.add_edge_live(t, u);
            self.decrement_degree(t);
        }
        if self.degree_of(u) >= K && self.freeze_worklist.remove(&u) {
            self.spill_worklist.insert(u);
        }
    }

    fn coalesce(&mut self) -> bool {
        let Some(m) = self.worklist_moves.iter().next().copied() else { return false };
        self.worklist_moves.remove(&m);
        let (mx, my) = m;
        let x = self.get_alias(mx);
        let y = self.get_alias(my);
        let (u, v) = if is_precolored(y) { (y, x) } else { (x, y) };

        if u == v {
            self.add_worklist(u);
        } else if is_precolored(v) || self.adj.get(&u).is_some_and(|s| s.contains(&v)) {
            self.add_worklist(u);
            self.add_worklist(v);
        } else {
            let george = is_precolored(u) && self.adjacent_live(v).iter().all(|&t| self.ok(t, u));
            let briggs = !is_precolored(u) && {
                let mut combined: BTreeSet<LiveValue> = self.adjacent_live(u).into_iter().collect();
                combined.extend(self.adjacent_live(v));
                self.conservative(&combined)
            };
            if george || briggs {
                self.combine(u, v);
                self.add_worklist(u);
            } else {
                self.active_moves.insert(m);
            }
        }
        true
    }

    fn freeze_moves(&mut self, n: LiveValue) {
        let ms: Vec<(LiveValue, LiveValue)> = self
            .move_list
            .get(&n)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| self.active_moves.contains(m) || self.worklist_moves.contains(m))
            .collect();
        for m @ (x, y) in ms {
            self.active_moves.remove(&m);
            self.worklist_moves.remove(&m);
            let v = if self.get_alias(y) == self.get_alias(n) { self.get_alias(x) } else { self.get_alias(y) };
            if !is_precolored(v) && !self.move_related(v) && self.degree_of(v) < K {
                self.freeze_worklist.remove(&v);
                self.simplify_worklist.insert(v);
            }
        }
    }

    fn freeze(&mut self) -> bool {
        let Some(n) = self.freeze_worklist.iter().next().copied() else { return false };
        self.freeze_worklist.remove(&n);
        self.simplify_worklist.insert(n);
        self.freeze_moves(n);
        true
    }

    /// Spec.md §4.8's spill heuristic: maximize `degree[n] / 2^loop_cnt[n]`, so a
    /// node with plenty of interferences but little loop exposure is preferred over
    /// one buried in a hot loop.
    fn spill_priority(&self, n: LiveValue) -> f64 {
        let degree = self.degree_of(n).max(0) as f64;
        let loop_cnt = self.loop_cnt.get(&n).copied().unwrap_or(0);
        degree / 2f64.powi(loop_cnt as i32)
    }

    fn select_spill(&mut self) -> bool {
        let Some(n) = self.spill_worklist.iter().copied().max_by(|&a, &b| self.spill_priority(a).total_cmp(&self.spill_priority(b))) else {
            return false;
        };
        self.spill_worklist.remove(&n);
        self.simplify_worklist.insert(n);
        self.freeze_moves(n);
        true
    }

    fn run(&mut self) {
        loop {
            if self.simplify() || self.coalesce() || self.freeze() || self.select_spill() {
                continue;
            }
            break;
        }
    }

    /// Pop the select stack, greedily assigning the smallest color excluded by
    /// already-colored neighbors; nodes that run out of colors are real spills.
    /// Coalesced nodes are resolved to their representative's color at the end.
    fn finish(mut self) -> Result<BTreeMap<VReg, u32>, Vec<VReg>> {
        let mut colors: BTreeMap<LiveValue, u32> = BTreeMap::new();
        for &n in self.adj.keys() {
            if let LiveValue::P(reg) = n {
                if let Some(c) = reg.color() {
                    colors.insert(n, c);
                }
            }
        }

        let mut spilled = Vec::new();
        while let Some(n) = self.select_stack.pop() {
            let used: BTreeSet<u32> =
                self.adj.get(&n).into_iter().flatten().map(|&w| self.get_alias(w)).filter_map(|w| colors.get(&w).copied()).collect();
            match (0..NUM_COLORS).find(|c| !used.contains(c)) {
                Some(c) => {
                    colors.insert(n, c);
                }
                None => {
                    if let LiveValue::V(vr) = n {
                        spilled.push(vr);
                    }
                }
            }
        }

        for &v in &self.coalesced_nodes {
            let rep = self.get_alias(v);
            if let Some(&c) = colors.get(&rep) {
                colors.insert(v, c);
            }
        }

        if !spilled.is_empty() {
            return Err(spilled);
        }

        let mut out = BTreeMap::new();
        for (lv, c) in colors {
            if let LiveValue::V(vr) = lv {
                out.insert(vr, c);
            }
        }
        Ok(out)
    }
}

/// `Ok` maps every virtual to a color in `0..NUM_COLORS`. `Err` lists the virtuals
/// that couldn't be colored this round and must be spilled before retrying.
pub fn allocate_colors(g: &InterferenceGraph) -> Result<BTreeMap<VReg, u32>, Vec<VReg>> {
    let mut c = Coalescer::new(g);
    c.run();
    c.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AluOp, Cond, MachInst, Operand};

    #[test]
    fn disjoint_lifetimes_can_share_a_color() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let a = mf.new_vreg();
        let c = mf.new_vreg();
        mf.blocks[b].insts.push(MachInst::Mov { dst: Operand::Virtual(a), src: Operand::Immediate(1), cond: Cond::Al, shift: None });
        let new_dst = mf.new_vreg();
        mf.blocks[b].insts.push(MachInst::Mov {
            dst: Operand::Virtual(new_dst),
            src: Operand::Virtual(a),
            cond: Cond::Al,
            shift: None,
        });
        mf.blocks[b].insts.push(MachInst::Mov { dst: Operand::Virtual(c), src: Operand::Immediate(2), cond: Cond::Al, shift: None });

        crate::regalloc::liveness::analyze(&mut mf);
        let g = build_interference(&mf);
        let colors = allocate_colors(&g).expect("should color without spilling");
        assert!(colors.contains_key(&a));
        assert!(colors.contains_key(&c));
    }

    #[test]
    fn more_simultaneously_live_values_than_colors_forces_a_spill() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let mut vregs = Vec::new();
        for i in 0..(NUM_COLORS + 2) {
            let v = mf.new_vreg();
            mf.blocks[b].insts.push(MachInst::Mov { dst: Operand::Virtual(v), src: Operand::Immediate(i as i32), cond: Cond::Al, shift: None });
            vregs.push(v);
        }
        let mut sum = vregs[0];
        for &v in &vregs[1..] {
            let next = mf.new_vreg();
            mf.blocks[b].insts.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(next), lhs: Operand::Virtual(sum), rhs: Operand::Virtual(v), shift: None });
            sum = next;
        }
        mf.blocks[b].insts.push(MachInst::Return);

        crate::regalloc::liveness::analyze(&mut mf);
        let g = build_interference(&mf);
        assert!(allocate_colors(&g).is_err());
    }

    /// `a <- b` with `b` dead right after (its only other use is this move) is the
    /// textbook coalescing case: nothing else forces `a` and `b` apart, so the
    /// Briggs test should merge them onto the same color and the source virtual's
    /// color should already be visible before any spilling/coloring of `a` itself.
    #[test]
    fn a_move_between_otherwise_independent_values_coalesces_to_one_color() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let x = mf.new_vreg();
        let y = mf.new_vreg();
        mf.blocks[b].insts.push(MachInst::Mov { dst: Operand::Virtual(x), src: Operand::Immediate(7), cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Mov { dst: Operand::Virtual(y), src: Operand::Virtual(x), cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        crate::regalloc::liveness::analyze(&mut mf);
        let g = build_interference(&mf);
        assert!(g.moves.contains(&(LiveValue::V(y), LiveValue::V(x))));

        let colors = allocate_colors(&g).expect("should color without spilling");
        assert_eq!(colors.get(&x), colors.get(&y));
    }
}
