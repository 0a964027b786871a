//! If-conversion (spec.md §4.9's if-to-cond): a short forward branch over a single
//! straight-line block of accesses/FMAs is replaced by predicating those instructions
//! with the branch's opposite condition and falling straight through, trading a
//! mispredictable branch for a few conditionally-executed instructions.

use crate::mach::{Cond, MachInst, MachineFunction};

#[derive(Debug, Default, Clone, Copy)]
pub struct IfToCondStats {
    pub converted: usize,
}

pub fn run(mf: &mut MachineFunction) -> IfToCondStats {
    let mut stats = IfToCondStats::default();
    let mut a = 0;
    while a < mf.blocks.len() {
        if try_convert(mf, a) {
            stats.converted += 1;
        } else {
            a += 1;
        }
    }
    mf.recompute_preds();
    stats
}

/// `a`'s own block index is never advanced on success so a chain of diamonds folds
/// away one at a time without re-deriving indices after each merge.
fn try_convert(mf: &mut MachineFunction, a: usize) -> bool {
    let Some((cond, target)) = branch_over_next_block(mf, a) else { return false };
    let x = a + 1;
    if x >= mf.blocks.len() || !is_fold_candidate(mf, a, x, target) {
        return false;
    }

    let straight_line = fold_body(mf, x, target).expect("is_fold_candidate just confirmed this");
    let neg = cond.negate();
    mf.blocks[a].insts.pop(); // the CondBranch
    for inst in straight_line {
        mf.blocks[a].insts.push(MachInst::Predicated { cond: neg, inst: Box::new(inst) });
    }
    let target_label = mf.blocks[target].label.clone();
    mf.blocks[a].insts.push(MachInst::Jump { target: target_label });
    mf.blocks[a].succs = vec![target];
    mf.blocks[x].insts.clear();
    mf.blocks[x].succs.clear();
    true
}

/// `a`'s last instruction is a `CondBranch`; returns its condition and target block
/// index if so.
fn branch_over_next_block(mf: &MachineFunction, a: usize) -> Option<(Cond, usize)> {
    let MachInst::CondBranch { cond, target } = mf.blocks[a].insts.last()? else { return None };
    let target_idx = mf.blocks.iter().position(|b| b.label == *target)?;
    Some((*cond, target_idx))
}

/// `x` must be reachable only by falling through from `a`, contain nothing but
/// accesses/FMAs, and rejoin the branch's own target so both paths provably converge
/// before anything else observes the difference.
fn is_fold_candidate(mf: &MachineFunction, a: usize, x: usize, target: usize) -> bool {
    if mf.blocks[x].preds.len() > 1 || (mf.blocks[x].preds.len() == 1 && mf.blocks[x].preds[0] != a) {
        return false;
    }
    match fold_body(mf, x, target) {
        Some(body) => body.iter().all(is_predicable),
        None => false,
    }
}

/// `x` rejoins `target` either with an explicit `Jump` or, since `select_jump` elides a
/// jump whose target is already the literal next block in layout order, by simply being
/// immediately followed by `target` with no terminator of its own at all. Either shape
/// returns the straight-line body to predicate; anything else (an early return, a nested
/// branch, landing somewhere else) returns `None`.
fn fold_body(mf: &MachineFunction, x: usize, target: usize) -> Option<Vec<MachInst>> {
    match mf.blocks[x].insts.last() {
        Some(MachInst::Jump { target: jump_target }) => {
            (*jump_target == mf.blocks[target].label).then(|| mf.blocks[x].insts[..mf.blocks[x].insts.len() - 1].to_vec())
        }
        Some(last) if last.is_terminator() => None,
        _ => (x + 1 == target).then(|| mf.blocks[x].insts.clone()),
    }
}

fn is_predicable(inst: &MachInst) -> bool {
    matches!(inst, MachInst::Alu { .. } | MachInst::Load { .. } | MachInst::Store { .. } | MachInst::Fma { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AluOp, Operand, Reg};

    fn alu(dst: Operand, lhs: Operand, rhs: Operand) -> MachInst {
        MachInst::Alu { op: AluOp::Add, dst, lhs, rhs, shift: None }
    }

    #[test]
    fn folds_a_branch_over_a_single_straight_line_block() {
        let mut mf = MachineFunction::new("f", false);
        let a = mf.new_block("a");
        let x = mf.new_block("x");
        let b = mf.new_block("b");
        mf.entry = a;

        mf.blocks[a].insts.push(MachInst::CondBranch { cond: Cond::Eq, target: "b".to_string() });
        mf.blocks[a].succs = vec![x, b];

        mf.blocks[x].insts.push(alu(Operand::Allocated(Reg::R(0)), Operand::Allocated(Reg::R(1)), Operand::Immediate(1)));
        mf.blocks[x].insts.push(MachInst::Jump { target: "b".to_string() });
        mf.blocks[x].succs = vec![b];

        mf.blocks[b].insts.push(MachInst::Return);
        mf.recompute_preds();

        let stats = run(&mut mf);
        assert_eq!(stats.converted, 1);

        assert!(mf.blocks[x].insts.is_empty());
        assert!(matches!(mf.blocks[a].insts[0], MachInst::Predicated { cond: Cond::Ne, .. }));
        assert!(matches!(mf.blocks[a].insts.last().unwrap(), MachInst::Jump { target } if target == "b"));
    }

    #[test]
    fn leaves_a_block_with_other_predecessors_alone() {
        let mut mf = MachineFunction::new("f", false);
        let a = mf.new_block("a");
        let x = mf.new_block("x");
        let b = mf.new_block("b");
        let c = mf.new_block("c");
        mf.entry = a;

        mf.blocks[a].insts.push(MachInst::CondBranch { cond: Cond::Eq, target: "b".to_string() });
        mf.blocks[a].succs = vec![x, b];
        mf.blocks[x].insts.push(alu(Operand::Allocated(Reg::R(0)), Operand::Allocated(Reg::R(1)), Operand::Immediate(1)));
        mf.blocks[x].insts.push(MachInst::Jump { target: "b".to_string() });
        mf.blocks[x].succs = vec![b];
        mf.blocks[b].insts.push(MachInst::Return);
        // `c` also branches straight into `x`, so it's not fold-safe.
        mf.blocks[c].succs = vec![x];
        mf.recompute_preds();

        let stats = run(&mut mf);
        assert_eq!(stats.converted, 0);
    }

    /// `select_jump` elides an unconditional jump whose target is already the next
    /// block in layout order, so `x` here ends with no terminator at all and relies on
    /// falling straight into `b`. This is the shape a simple no-else `if` actually
    /// produces, and the pass must still fold it.
    #[test]
    fn folds_a_block_that_relies_on_implicit_fallthrough() {
        let mut mf = MachineFunction::new("f", false);
        let a = mf.new_block("a");
        let x = mf.new_block("x");
        let b = mf.new_block("b");
        mf.entry = a;

        mf.blocks[a].insts.push(MachInst::CondBranch { cond: Cond::Eq, target: "b".to_string() });
        mf.blocks[a].succs = vec![x, b];

        mf.blocks[x].insts.push(alu(Operand::Allocated(Reg::R(0)), Operand::Allocated(Reg::R(1)), Operand::Immediate(1)));
        mf.blocks[x].succs = vec![b];

        mf.blocks[b].insts.push(MachInst::Return);
        mf.recompute_preds();

        let stats = run(&mut mf);
        assert_eq!(stats.converted, 1);

        assert!(mf.blocks[x].insts.is_empty());
        assert!(matches!(mf.blocks[a].insts[0], MachInst::Predicated { cond: Cond::Ne, .. }));
        assert!(matches!(mf.blocks[a].insts.last().unwrap(), MachInst::Jump { target } if target == "b"));
    }
}
