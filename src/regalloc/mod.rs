//! Register allocation (spec.md §4.8): liveness, iterated register coalescing
//! (Briggs-style) over the 14 available colors, and a spill-and-retry loop until every
//! virtual has a physical home. The public entry point, `allocate`, mutates a
//! `MachineFunction` in place, leaving every `Virtual` operand rewritten to `Allocated`.

pub mod graph;
pub mod liveness;
pub mod loopdepth;

use std::collections::BTreeMap;

use crate::mach::{AddrMode, MachInst, MachineFunction, MachineProgram, Operand, Reg, VReg};

pub fn allocate_program(mp: &mut MachineProgram) {
    for func in &mut mp.functions {
        allocate(func);
    }
}

pub fn allocate(mf: &mut MachineFunction) {
    loop {
        liveness::analyze(mf);
        let ig = graph::build_interference(mf);
        match graph::allocate_colors(&ig) {
            Ok(colors) => {
                apply_colors(mf, &colors);
                record_frame_registers(mf, &colors);
                return;
            }
            Err(spilled) => {
                for vr in spilled {
                    insert_spill_code(mf, vr);
                }
            }
        }
    }
}

fn apply_colors(mf: &mut MachineFunction, colors: &BTreeMap<VReg, u32>) {
    for block in &mut mf.blocks {
        for inst in &mut block.insts {
            for (&vr, &c) in colors {
                inst.rewrite_vreg(vr, Operand::Allocated(Reg::from_color(c)));
            }
        }
    }
}

fn record_frame_registers(mf: &mut MachineFunction, colors: &BTreeMap<VReg, u32>) {
    mf.used_callee_saved.clear();
    // A `bl` always overwrites `lr` with its own return address, so any function that
    // itself calls out must save the caller's `lr` across that clobber even if
    // coloring never picked `lr` for a virtual.
    mf.uses_lr = mf.blocks.iter().any(|b| b.insts.iter().any(MachInst::is_call));
    for &c in colors.values() {
        let r = Reg::from_color(c);
        if r.is_callee_saved() {
            mf.used_callee_saved.insert(r);
        }
        if r == Reg::Lr {
            mf.uses_lr = true;
        }
    }
}

/// "Spill everywhere": every instruction that reads or writes `vr` gets its own fresh
/// vreg, reloaded from `vr`'s slot just before (if it reads) and stored back just
/// after (if it writes). Simple and always correct; the caller reruns liveness and
/// coloring afterward, so a fresh vreg with a tiny live range colors easily even if
/// `vr` itself never would have.
fn insert_spill_code(mf: &mut MachineFunction, vr: VReg) {
    let slot = mf.new_spill_slot();
    for bi in 0..mf.blocks.len() {
        let old_insts = std::mem::take(&mut mf.blocks[bi].insts);
        let mut new_insts = Vec::with_capacity(old_insts.len());
        for mut inst in old_insts {
            let reads = inst.uses().iter().any(|o| o.vreg() == Some(vr));
            let writes = inst.defs().iter().any(|o| o.vreg() == Some(vr));
            if !reads && !writes {
                new_insts.push(inst);
                continue;
            }
            let fresh = mf.new_vreg();
            inst.rewrite_vreg(vr, Operand::Virtual(fresh));
            if reads {
                new_insts.push(MachInst::Load {
                    dst: Operand::Virtual(fresh),
                    base: Operand::PreColored(Reg::Sp),
                    offset: slot,
                    shift: None,
                    mode: AddrMode::Offset,
                });
            }
            new_insts.push(inst);
            if writes {
                new_insts.push(MachInst::Store {
                    src: Operand::Virtual(fresh),
                    base: Operand::PreColored(Reg::Sp),
                    offset: slot,
                    shift: None,
                    mode: AddrMode::Offset,
                });
            }
        }
        mf.blocks[bi].insts = new_insts;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AluOp, Cond, Operand as Op};

    #[test]
    fn heavy_register_pressure_still_allocates_without_virtuals_left_over() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let mut vregs = Vec::new();
        for i in 0..20 {
            let v = mf.new_vreg();
            mf.blocks[b].insts.push(MachInst::Mov { dst: Op::Virtual(v), src: Op::Immediate(i), cond: Cond::Al, shift: None });
            vregs.push(v);
        }
        let mut sum = vregs[0];
        for &v in &vregs[1..] {
            let next = mf.new_vreg();
            mf.blocks[b].insts.push(MachInst::Alu { op: AluOp::Add, dst: Op::Virtual(next), lhs: Op::Virtual(sum), rhs: Op::Virtual(v), shift: None });
            sum = next;
        }
        mf.blocks[b].insts.push(MachInst::Mov { dst: Op::PreColored(Reg::R(0)), src: Op::Virtual(sum), cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        allocate(&mut mf);

        for inst in &mf.blocks[b].insts {
            for o in inst.defs().into_iter().chain(inst.uses()) {
                assert!(o.vreg().is_none(), "virtual register left unallocated: {o:?}");
            }
        }
    }
}
