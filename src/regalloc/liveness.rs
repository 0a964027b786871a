//! Liveness analysis over `LiveValue` (spec.md §4.8): a backward dataflow fixed point
//! per block. Tracking pinned physical registers alongside virtuals matters here: a
//! call clobbers its argument/return registers, and anything else live across that
//! call must be colored away from them, which only works if the liveness domain
//! includes `LiveValue::P` alongside `LiveValue::V`.

use std::collections::BTreeSet;

use crate::mach::MachineFunction;

pub fn analyze(mf: &mut MachineFunction) {
    for block in &mut mf.blocks {
        block.live_use.clear();
        block.live_def.clear();
        let mut defined = BTreeSet::new();
        for inst in &block.insts {
            for u in inst.uses() {
                if let Some(lv) = u.live_value() {
                    if !defined.contains(&lv) && !block.live_use.contains(&lv) {
                        block.live_use.push(lv);
                    }
                }
            }
            for d in inst.defs() {
                if let Some(lv) = d.live_value() {
                    defined.insert(lv);
                    if !block.live_def.contains(&lv) {
                        block.live_def.push(lv);
                    }
                }
            }
        }
    }

    let n = mf.blocks.len();
    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..n).rev() {
            let mut live_out = BTreeSet::new();
            for &s in &mf.blocks[i].succs {
                live_out.extend(mf.blocks[s].live_in.iter().copied());
            }
            let mut live_in = live_out.clone();
            for d in &mf.blocks[i].live_def {
                live_in.remove(d);
            }
            for u in &mf.blocks[i].live_use {
                live_in.insert(*u);
            }
            if live_in != mf.blocks[i].live_in || live_out != mf.blocks[i].live_out {
                changed = true;
            }
            mf.blocks[i].live_in = live_in;
            mf.blocks[i].live_out = live_out;
        }
    }
}
