//! List instruction scheduler (spec.md §4.9): per block, builds a data-dependence DAG
//! over RAW/WAW/WAR hazards (registers and the implicit condition-flag "register" a
//! `Cmp` sets and a predicated instruction reads), ranks nodes by longest
//! latency-weighted path to a sink, and greedily reissues them across a fixed set of
//! Cortex-A72-shaped functional units. The block's terminator is never reordered —
//! everything else may move as long as dependencies are respected.

use std::collections::HashMap;

use crate::mach::{LiveValue, MachInst, MachineFunction, Operand};

#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerStats {
    pub blocks_scheduled: usize,
}

pub fn run(mf: &mut MachineFunction) -> SchedulerStats {
    let mut stats = SchedulerStats::default();
    for block in &mut mf.blocks {
        let (body, term) = split_terminator(&block.insts);
        if body.len() < 2 {
            continue;
        }
        let order = schedule(&body);
        let mut new_insts: Vec<MachInst> = order.into_iter().map(|i| body[i].clone()).collect();
        new_insts.extend(term);
        block.insts = new_insts;
        stats.blocks_scheduled += 1;
    }
    stats
}

fn split_terminator(insts: &[MachInst]) -> (Vec<MachInst>, Vec<MachInst>) {
    match insts.last() {
        Some(last) if last.is_terminator() => (insts[..insts.len() - 1].to_vec(), vec![last.clone()]),
        _ => (insts.to_vec(), vec![]),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FuClass {
    Branch,
    Integer,
    IntMul,
    Load,
    Store,
}

impl FuClass {
    fn of(inst: &MachInst) -> FuClass {
        match inst {
            MachInst::Load { .. } => FuClass::Load,
            MachInst::Store { .. } => FuClass::Store,
            MachInst::LongMul { .. } | MachInst::Fma { .. } => FuClass::IntMul,
            MachInst::Call { .. } | MachInst::Jump { .. } | MachInst::CondBranch { .. } | MachInst::Return => FuClass::Branch,
            MachInst::Predicated { inst, .. } => FuClass::of(inst),
            _ => FuClass::Integer,
        }
    }

    /// How many issue slots Cortex-A72 offers this class per cycle.
    fn width(self) -> usize {
        match self {
            FuClass::Branch => 1,
            FuClass::Integer => 2,
            FuClass::IntMul => 1,
            FuClass::Load => 1,
            FuClass::Store => 1,
        }
    }

    /// Cycles until the result is available; everything else is assumed single-cycle.
    fn latency(self) -> u32 {
        match self {
            FuClass::Load => 3,
            FuClass::IntMul => 3,
            _ => 1,
        }
    }
}

/// A register-like resource a `Cmp` defines and any conditional (non-`Al`) instruction
/// reads, so flag-setting and flag-consuming instructions never get reordered past
/// each other even though neither mentions a real register operand for it.
const CC: LiveValue = LiveValue::P(crate::mach::Reg::Pc);

fn defs_incl_cc(inst: &MachInst) -> Vec<LiveValue> {
    let mut d: Vec<LiveValue> = inst.defs().into_iter().filter_map(Operand::live_value).collect();
    if matches!(inst, MachInst::Cmp { .. }) {
        d.push(CC);
    }
    d
}

fn uses_incl_cc(inst: &MachInst) -> Vec<LiveValue> {
    let mut u: Vec<LiveValue> = inst.uses().into_iter().filter_map(Operand::live_value).collect();
    if reads_cc(inst) {
        u.push(CC);
    }
    u
}

fn reads_cc(inst: &MachInst) -> bool {
    match inst {
        MachInst::Mov { cond, .. } | MachInst::Predicated { cond, .. } => *cond != crate::mach::Cond::Al,
        _ => false,
    }
}

fn has_side_effect(inst: &MachInst) -> bool {
    matches!(inst, MachInst::Load { .. } | MachInst::Store { .. } | MachInst::Call { .. })
}

/// Returns a permutation of `0..body.len()` respecting every dependence edge.
fn schedule(body: &[MachInst]) -> Vec<usize> {
    let n = body.len();
    let mut succs: Vec<Vec<usize>> = vec![vec![]; n];
    let mut pred_count: Vec<usize> = vec![0; n];

    let mut last_def: HashMap<LiveValue, usize> = HashMap::new();
    let mut last_use: HashMap<LiveValue, Vec<usize>> = HashMap::new();
    let mut last_side_effect: Option<usize> = None;

    let mut add_edge = |succs: &mut Vec<Vec<usize>>, pred_count: &mut Vec<usize>, from: usize, to: usize| {
        if from != to && !succs[from].contains(&to) {
            succs[from].push(to);
            pred_count[to] += 1;
        }
    };

    for (i, inst) in body.iter().enumerate() {
        for u in uses_incl_cc(inst) {
            // RAW: the most recent writer of `u` must issue before `i`.
            if let Some(&d) = last_def.get(&u) {
                add_edge(&mut succs, &mut pred_count, d, i);
            }
        }
        for d in defs_incl_cc(inst) {
            // WAW: the previous writer must issue before this redefinition.
            if let Some(&prev) = last_def.get(&d) {
                add_edge(&mut succs, &mut pred_count, prev, i);
            }
            // WAR: every reader since the last definition must issue before the new one.
            if let Some(readers) = last_use.get(&d) {
                for &r in readers {
                    add_edge(&mut succs, &mut pred_count, r, i);
                }
            }
            last_def.insert(d, i);
            last_use.remove(&d);
        }
        for u in uses_incl_cc(inst) {
            last_use.entry(u).or_default().push(i);
        }
        if has_side_effect(inst) {
            if let Some(prev) = last_side_effect {
                add_edge(&mut succs, &mut pred_count, prev, i);
            }
            last_side_effect = Some(i);
        }
    }

    let priority = priorities(body, &succs);

    let mut ready: Vec<usize> = (0..n).filter(|&i| pred_count[i] == 0).collect();
    let mut scheduled = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        ready.sort_by(|&a, &b| priority[b].cmp(&priority[a]).then(a.cmp(&b)));
        let mut used: HashMap<FuClass, usize> = HashMap::new();
        let mut issued_this_cycle = Vec::new();

        for &i in &ready {
            if scheduled[i] {
                continue;
            }
            let class = FuClass::of(&body[i]);
            let slot = used.entry(class).or_insert(0);
            if *slot < class.width() {
                *slot += 1;
                scheduled[i] = true;
                issued_this_cycle.push(i);
            }
        }

        for i in issued_this_cycle {
            order.push(i);
            ready.retain(|&r| r != i);
            for &s in &succs[i] {
                pred_count[s] -= 1;
                if pred_count[s] == 0 {
                    ready.push(s);
                }
            }
        }
    }

    order
}

/// Longest latency-weighted path from each node to a sink, computed over nodes in
/// reverse of a valid topological order (here: the original program order already is
/// one, since every edge only ever points from an earlier index to a later one).
fn priorities(body: &[MachInst], succs: &[Vec<usize>]) -> Vec<u32> {
    let n = body.len();
    let mut priority = vec![0u32; n];
    for i in (0..n).rev() {
        let own = FuClass::of(&body[i]).latency();
        let best_succ = succs[i].iter().map(|&s| priority[s]).max().unwrap_or(0);
        priority[i] = own + best_succ;
    }
    priority
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AluOp, Cond, MachineFunction, Reg};

    fn alu(dst: Operand, lhs: Operand, rhs: Operand) -> MachInst {
        MachInst::Alu { op: AluOp::Add, dst, lhs, rhs, shift: None }
    }

    #[test]
    fn preserves_a_true_dependence_chain() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        let r0 = Operand::Allocated(Reg::R(0));
        let r1 = Operand::Allocated(Reg::R(1));
        mf.blocks[b].insts.push(alu(r0, r1, Operand::Immediate(1)));
        mf.blocks[b].insts.push(alu(r1, r0, Operand::Immediate(1)));
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert!(matches!(mf.blocks[b].insts[0], MachInst::Alu { dst: Operand::Allocated(Reg::R(0)), .. }));
        assert!(matches!(mf.blocks[b].insts[1], MachInst::Alu { dst: Operand::Allocated(Reg::R(1)), .. }));
        assert!(matches!(mf.blocks[b].insts[2], MachInst::Return));
    }

    #[test]
    fn never_reorders_the_terminator() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        let r0 = Operand::Allocated(Reg::R(0));
        mf.blocks[b].insts.push(alu(r0, r0, Operand::Immediate(1)));
        mf.blocks[b].insts.push(alu(r0, r0, Operand::Immediate(2)));
        mf.blocks[b].insts.push(MachInst::Jump { target: "exit".to_string() });

        run(&mut mf);

        assert!(matches!(mf.blocks[b].insts.last().unwrap(), MachInst::Jump { .. }));
    }

    #[test]
    fn a_cmp_orders_before_the_predicated_mov_that_reads_its_flags() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        let r0 = Operand::Allocated(Reg::R(0));
        let r1 = Operand::Allocated(Reg::R(1));
        mf.blocks[b].insts.push(MachInst::Mov { dst: r0, src: Operand::Immediate(9), cond: Cond::Eq, shift: None });
        mf.blocks[b].insts.push(MachInst::Cmp { lhs: r1, rhs: Operand::Immediate(0) });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        let cmp_pos = mf.blocks[b].insts.iter().position(|i| matches!(i, MachInst::Cmp { .. })).unwrap();
        let mov_pos = mf.blocks[b].insts.iter().position(|i| matches!(i, MachInst::Mov { cond: Cond::Eq, .. })).unwrap();
        assert!(cmp_pos < mov_pos);
    }
}
