//! Machine-level functions and blocks (spec.md §3.3): one machine block per SSA block
//! (instruction selection is a 1:1 mapping, spec.md §4.7), plus the per-function
//! bookkeeping the allocator and the post-allocation passes share: a virtual-register
//! counter, the frame's growing stack size, which callee-saved registers actually got
//! used (so the prologue only spills those), and a list of "argument load" instructions
//! whose `[sp, #k]` offset needs `+= final stack size` once spilling has settled it.

use std::collections::BTreeSet;

use crate::mach::inst::MachInst;
use crate::mach::operand::{LiveValue, Reg, VReg};

#[derive(Debug, Clone, Default)]
pub struct MachineBlock {
    pub label: String,
    pub insts: Vec<MachInst>,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,

    pub live_use: Vec<LiveValue>,
    pub live_def: Vec<LiveValue>,
    pub live_in: BTreeSet<LiveValue>,
    pub live_out: BTreeSet<LiveValue>,
}

impl MachineBlock {
    pub fn new(label: impl Into<String>) -> Self {
        MachineBlock { label: label.into(), ..Default::default() }
    }
}

/// What a deferred `[sp, #offset]` fixup needs added to its immediate once the frame
/// is finalized (spec.md §4.9's compute-stack-info): a local's address sits just above
/// the spill region, so it only needs the spill region's final size; a caller-pushed
/// argument beyond the 4th sits above the whole callee frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    Locals,
    Params,
}

/// A `[sp, #offset]` access (a local's address computation, or a beyond-4th-parameter
/// load) whose offset was emitted relative to an incomplete frame and must be patched
/// once `compute_stack_info` knows the final layout.
#[derive(Debug, Clone, Copy)]
pub struct SpFixup {
    pub block: usize,
    pub inst: usize,
    pub kind: FixupKind,
}

#[derive(Debug, Clone)]
pub struct MachineFunction {
    pub name: String,
    pub blocks: Vec<MachineBlock>,
    pub entry: usize,
    pub is_void: bool,

    vreg_count: u32,
    pub stack_size: i32,
    pub frame_locals_size: i32,
    pub used_callee_saved: BTreeSet<Reg>,
    pub uses_lr: bool,
    pub sp_fixups: Vec<SpFixup>,
    pub spill_slots: u32,
}

impl MachineFunction {
    pub fn new(name: impl Into<String>, is_void: bool) -> Self {
        MachineFunction {
            name: name.into(),
            blocks: Vec::new(),
            entry: 0,
            is_void,
            vreg_count: 0,
            stack_size: 0,
            frame_locals_size: 0,
            used_callee_saved: BTreeSet::new(),
            uses_lr: false,
            sp_fixups: Vec::new(),
            spill_slots: 0,
        }
    }

    pub fn new_vreg(&mut self) -> VReg {
        let id = VReg(self.vreg_count);
        self.vreg_count += 1;
        id
    }

    pub fn vreg_count(&self) -> u32 {
        self.vreg_count
    }

    pub fn new_block(&mut self, label: impl Into<String>) -> usize {
        let id = self.blocks.len();
        self.blocks.push(MachineBlock::new(label));
        id
    }

    /// Allocate a fresh 4-byte spill slot at the bottom of the frame (closest to `sp`,
    /// needing no fixup once the frame is laid out) and return its `[sp, #offset]`
    /// offset. Called by the register allocator's spill step (spec.md §4.8).
    pub fn new_spill_slot(&mut self) -> i32 {
        let slot = self.spill_slots;
        self.spill_slots += 1;
        (slot * 4) as i32
    }

    /// Rebuild `preds` from each block's `succs` (instruction selection fills `succs`
    /// in directly from the SSA block-to-index mapping it already has).
    pub fn recompute_preds(&mut self) {
        for b in &mut self.blocks {
            b.preds.clear();
        }
        let succs: Vec<Vec<usize>> = self.blocks.iter().map(|b| b.succs.clone()).collect();
        for (i, list) in succs.into_iter().enumerate() {
            for s in list {
                self.blocks[s].preds.push(i);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalDatum {
    pub name: String,
    pub is_const: bool,
    pub values: Vec<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct MachineProgram {
    pub functions: Vec<MachineFunction>,
    pub globals: Vec<GlobalDatum>,
}

impl MachineProgram {
    pub fn new() -> Self {
        MachineProgram::default()
    }
}
