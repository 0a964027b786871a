//! Stack-frame finalization (spec.md §4.9): once the register allocator has settled
//! how many spill slots a function needed, patch every deferred `[sp, #offset]`
//! fixup instruction selection left behind and compute the frame size the prologue
//! and epilogue will use.

use crate::mach::{FixupKind, MachInst, MachineFunction, Operand};

fn align8(n: i32) -> i32 {
    (n + 7) & !7
}

/// The prologue saves callee-saved registers (and `lr`, if the function itself calls
/// out) with a separate `push`/`pop` ahead of the `sub sp, sp, #stack_size` that makes
/// room for locals and spills. A beyond-4th-parameter read sits above both regions; a
/// local's address only needs to skip the spill region directly below it.
pub fn compute_stack_info(mf: &mut MachineFunction) {
    let spill_bytes = mf.spill_slots as i32 * 4;
    mf.stack_size = align8(mf.frame_locals_size + spill_bytes);
    let saved_bytes = 4 * (mf.used_callee_saved.len() as i32 + i32::from(mf.uses_lr));
    let params_fixup = mf.stack_size + saved_bytes;

    let fixups = std::mem::take(&mut mf.sp_fixups);
    for fx in fixups {
        let delta = match fx.kind {
            FixupKind::Locals => spill_bytes,
            FixupKind::Params => params_fixup,
        };
        let inst = &mut mf.blocks[fx.block].insts[fx.inst];
        add_to_immediate(inst, delta);
    }
}

fn add_to_immediate(inst: &mut MachInst, delta: i32) {
    match inst {
        MachInst::Alu { rhs: Operand::Immediate(k), .. } => *k += delta,
        MachInst::Load { offset, .. } | MachInst::Store { offset, .. } => *offset += delta,
        other => unreachable!("sp fixup recorded against a non-offset instruction: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{AluOp, Reg, SpFixup};

    #[test]
    fn locals_fixup_only_adds_the_spill_region() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        let dst = mf.new_vreg();
        mf.blocks[b].insts.push(MachInst::Alu {
            op: AluOp::Add,
            dst: Operand::Allocated(Reg::R(0)),
            lhs: Operand::PreColored(Reg::Sp),
            rhs: Operand::Immediate(0),
            shift: None,
        });
        let _ = dst;
        mf.sp_fixups.push(SpFixup { block: b, inst: 0, kind: FixupKind::Locals });
        mf.spill_slots = 3;
        mf.frame_locals_size = 8;

        compute_stack_info(&mut mf);

        let MachInst::Alu { rhs: Operand::Immediate(k), .. } = mf.blocks[b].insts[0] else { panic!() };
        assert_eq!(k, 12);
        assert_eq!(mf.stack_size, 20);
    }
}
