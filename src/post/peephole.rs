//! Post-allocation peephole cleanup (spec.md §4.9's asm-simplify). Once every operand
//! is a concrete register, phi resolution and spill rewriting leave behind a handful
//! of mechanically-recognizable redundancies the earlier passes had no way to see.

use crate::mach::{AluOp, Cond, MachInst, MachineFunction, Operand};

pub fn run(mf: &mut MachineFunction) {
    remove_jumps_to_next_block(mf);
    for block in &mut mf.blocks {
        simplify_block(&mut block.insts);
    }
}

fn simplify_block(insts: &mut Vec<MachInst>) {
    let mut i = 0;
    while i < insts.len() {
        if is_redundant_move(&insts[i]) || is_identity_alu(&insts[i]) {
            insts.remove(i);
            continue;
        }
        if i + 1 < insts.len() && shadows_next(&insts[i], &insts[i + 1]) {
            insts.remove(i);
            continue;
        }
        if i + 1 < insts.len() {
            if let Some(replacement) = store_then_load(&insts[i], &insts[i + 1]) {
                match replacement {
                    Some(mov) => insts[i + 1] = mov,
                    None => {
                        insts.remove(i + 1);
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
}

fn is_redundant_move(inst: &MachInst) -> bool {
    matches!(inst, MachInst::Mov { dst, src, cond: Cond::Al, shift: None } if same_register(*dst, *src))
}

/// `add`/`sub` by an immediate `0` into its own left-hand side changes nothing.
fn is_identity_alu(inst: &MachInst) -> bool {
    matches!(
        inst,
        MachInst::Alu { op: AluOp::Add | AluOp::Sub, dst, lhs, rhs: Operand::Immediate(0), shift: None }
            if same_register(*dst, *lhs)
    )
}

/// `mov d, x; mov d, y` -- the first write of `d` is dead as long as the second mov
/// doesn't itself read `d` (a conditional second mov implicitly does, via its
/// `cond`-false path; see `MachInst::uses`).
fn shadows_next(first: &MachInst, second: &MachInst) -> bool {
    let (MachInst::Mov { dst: d1, cond: Cond::Al, .. }, MachInst::Mov { dst: d2, cond: Cond::Al, src, .. }) = (first, second) else {
        return false;
    };
    same_register(*d1, *d2) && !same_register(*d1, *src)
}

/// A load immediately following a store to the same address yields exactly what was
/// just stored. Returns `Some(Some(mov))` to replace the load with a register copy,
/// `Some(None)` to drop it outright when source and destination already coincide, or
/// `None` when the pair doesn't match.
fn store_then_load(first: &MachInst, second: &MachInst) -> Option<Option<MachInst>> {
    let MachInst::Store { src, base: sb, offset: so, shift: ss, mode: sm } = first else { return None };
    let MachInst::Load { dst, base: lb, offset: lo, shift: ls, mode: lm } = second else { return None };
    if !same_register(*sb, *lb) || so != lo || ss != ls || sm != lm {
        return None;
    }
    if same_register(*dst, *src) {
        Some(None)
    } else {
        Some(Some(MachInst::Mov { dst: *dst, src: *src, cond: Cond::Al, shift: None }))
    }
}

fn same_register(a: Operand, b: Operand) -> bool {
    match (a.physical(), b.physical()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// A `b target` whose target is the block immediately following it in layout order
/// falls through anyway; spec.md's "unconditional jumps to the next block".
fn remove_jumps_to_next_block(mf: &mut MachineFunction) {
    let next_labels: Vec<Option<String>> = (0..mf.blocks.len()).map(|i| mf.blocks.get(i + 1).map(|b| b.label.clone())).collect();
    for (i, next) in next_labels.into_iter().enumerate() {
        let Some(next) = next else { continue };
        let drop = matches!(mf.blocks[i].insts.last(), Some(MachInst::Jump { target }) if *target == next);
        if drop {
            mf.blocks[i].insts.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AddrMode, MachineFunction, Reg};

    #[test]
    fn self_move_is_dropped() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.blocks[b].insts.push(MachInst::Mov {
            dst: Operand::Allocated(Reg::R(2)),
            src: Operand::Allocated(Reg::R(2)),
            cond: Cond::Al,
            shift: None,
        });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert_eq!(mf.blocks[b].insts.len(), 1);
        assert!(matches!(mf.blocks[b].insts[0], MachInst::Return));
    }

    #[test]
    fn identity_add_zero_is_dropped() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let r0 = Operand::Allocated(Reg::R(0));
        mf.blocks[b].insts.push(MachInst::Alu { op: AluOp::Add, dst: r0, lhs: r0, rhs: Operand::Immediate(0), shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert_eq!(mf.blocks[b].insts.len(), 1);
    }

    #[test]
    fn earlier_move_shadowed_by_the_next_is_dropped() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let r0 = Operand::Allocated(Reg::R(0));
        let r1 = Operand::Allocated(Reg::R(1));
        mf.blocks[b].insts.push(MachInst::Mov { dst: r0, src: r1, cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Mov { dst: r0, src: Operand::Immediate(9), cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert_eq!(mf.blocks[b].insts.len(), 2);
        assert!(matches!(mf.blocks[b].insts[0], MachInst::Mov { src: Operand::Immediate(9), .. }));
    }

    #[test]
    fn a_conditional_second_move_keeps_the_first_since_it_reads_its_own_destination() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let r0 = Operand::Allocated(Reg::R(0));
        let r1 = Operand::Allocated(Reg::R(1));
        mf.blocks[b].insts.push(MachInst::Mov { dst: r0, src: r1, cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Mov { dst: r0, src: Operand::Immediate(9), cond: Cond::Eq, shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert_eq!(mf.blocks[b].insts.len(), 3);
    }

    #[test]
    fn load_right_after_a_store_to_the_same_address_becomes_a_register_copy() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let r0 = Operand::Allocated(Reg::R(0));
        let r1 = Operand::Allocated(Reg::R(1));
        let sp = Operand::Allocated(Reg::Sp);
        mf.blocks[b].insts.push(MachInst::Store { src: r0, base: sp, offset: 4, shift: None, mode: AddrMode::Offset });
        mf.blocks[b].insts.push(MachInst::Load { dst: r1, base: sp, offset: 4, shift: None, mode: AddrMode::Offset });
        mf.blocks[b].insts.push(MachInst::Return);

        run(&mut mf);

        assert!(matches!(mf.blocks[b].insts[1], MachInst::Mov { dst: Operand::Allocated(Reg::R(1)), src: Operand::Allocated(Reg::R(0)), .. }));
    }

    #[test]
    fn jump_to_the_immediately_following_block_is_removed() {
        let mut mf = MachineFunction::new("f", false);
        let a = mf.new_block("a");
        let _next = mf.new_block("b");
        mf.entry = a;
        mf.blocks[a].insts.push(MachInst::Jump { target: "b".to_string() });

        run(&mut mf);

        assert!(mf.blocks[a].insts.is_empty());
    }
}
