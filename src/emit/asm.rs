//! Assembly text emission (spec.md §4.10): renders a finalized `MachineProgram` as
//! GNU `as`-compatible ARM assembly. By the time a program reaches here, instruction
//! selection has chosen every opcode and register allocation/post-allocation have
//! finished every operand and stack offset, so this stage is a straight, lossless
//! textual rendering with no further decisions beyond prologue/epilogue shape.

use std::fmt::Write as _;

use crate::error::{bug, CompileResult};
use crate::isel::imm;
use crate::mach::{AddrMode, Cond, GlobalDatum, MachInst, MachineFunction, MachineProgram, Operand};

const PASS: &str = "emit";

/// Instructions between literal pools, interposed every `POOL_THRESHOLD` instructions
/// at the latest (spec.md §4.10/§6) so a `GlobalAddr`'s `ldr {dst}, ={symbol}` stays
/// within reach of the assembler's own pool placement in a long function.
const POOL_THRESHOLD: u32 = 1000;

/// Running count since the last literal pool, plus the next `_POOL_<n>` label index.
/// Shared across every function in the program so pool labels stay globally unique.
struct PoolState {
    since_pool: u32,
    index: u32,
}

impl PoolState {
    fn new() -> Self {
        PoolState { since_pool: 0, index: 0 }
    }
}

pub fn emit_program(mp: &MachineProgram) -> CompileResult<String> {
    let mut out = String::new();
    emit_data_sections(&mut out, &mp.globals);

    writeln!(out, "    .text").unwrap();
    let mut pool = PoolState::new();
    for func in &mp.functions {
        emit_function(&mut out, func, &mut pool)?;
    }
    Ok(out)
}

fn emit_data_sections(out: &mut String, globals: &[GlobalDatum]) {
    let (consts, mutables): (Vec<_>, Vec<_>) = globals.iter().partition(|g| g.is_const);

    if !consts.is_empty() {
        writeln!(out, "    .section .rodata").unwrap();
        for g in &consts {
            emit_datum(out, g);
        }
    }

    let (zero, nonzero): (Vec<_>, Vec<_>) = mutables.into_iter().partition(|g| g.values.iter().all(|&v| v == 0));

    if !nonzero.is_empty() {
        writeln!(out, "    .section .data").unwrap();
        for g in &nonzero {
            emit_datum(out, g);
        }
    }

    if !zero.is_empty() {
        writeln!(out, "    .section .bss").unwrap();
        for g in &zero {
            writeln!(out, "    .global {}", g.name).unwrap();
            writeln!(out, "    .align 2").unwrap();
            writeln!(out, "{}:", g.name).unwrap();
            writeln!(out, "    .space {}", g.values.len() * 4).unwrap();
        }
    }
}

fn emit_datum(out: &mut String, g: &GlobalDatum) {
    writeln!(out, "    .global {}", g.name).unwrap();
    writeln!(out, "    .align 2").unwrap();
    writeln!(out, "{}:", g.name).unwrap();
    for chunk in g.values.chunks(8) {
        let words: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
        writeln!(out, "    .word {}", words.join(", ")).unwrap();
    }
}

fn emit_function(out: &mut String, mf: &MachineFunction, pool: &mut PoolState) -> CompileResult<()> {
    writeln!(out, "    .global {}", mf.name).unwrap();
    writeln!(out, "{}:", mf.name).unwrap();
    emit_prologue(out, mf);
    for (i, block) in mf.blocks.iter().enumerate() {
        writeln!(out, "{}:", block_label(mf, i)).unwrap();
        for inst in &block.insts {
            emit_inst(out, mf, inst)?;
            pool.since_pool += 1;
            // `Jump`/`Return` never fall through, so a pool can be dropped right
            // there with no branch-around; anything else only gets one once the
            // threshold forces it.
            if matches!(inst, MachInst::Jump { .. } | MachInst::Return) {
                emit_literal_pool(out, pool, false);
            } else if pool.since_pool >= POOL_THRESHOLD {
                emit_literal_pool(out, pool, true);
            }
        }
    }
    Ok(())
}

/// `_BB_<id>` is already the mach block's own label (spec.md §6); `.L{name}` is
/// prepended only to keep labels unique across functions, since `MachineBlock`
/// indices are local per function and `f` and `main` could otherwise both produce a
/// `_BB_3`.
fn block_label(mf: &MachineFunction, idx: usize) -> String {
    format!(".L{}{}", mf.name, mf.blocks[idx].label)
}

/// Emits `_POOL_<n>` (spec.md §6) with a branch around it when the surrounding code
/// still falls through, or bare when the preceding instruction already diverted
/// control flow elsewhere.
fn emit_literal_pool(out: &mut String, pool: &mut PoolState, needs_branch_around: bool) {
    let n = pool.index;
    pool.index += 1;
    pool.since_pool = 0;
    if needs_branch_around {
        writeln!(out, "    b _POOL_{n}_after").unwrap();
    }
    writeln!(out, "_POOL_{n}:").unwrap();
    writeln!(out, "    .ltorg").unwrap();
    writeln!(out, "_POOL_{n}_after:").unwrap();
}

fn emit_prologue(out: &mut String, mf: &MachineFunction) {
    let save_list = save_reg_list(mf);
    if !save_list.is_empty() {
        writeln!(out, "    push {{{}}}", save_list.join(", ")).unwrap();
    }
    if mf.stack_size > 0 {
        emit_sp_adjust(out, "sub", mf.stack_size);
    }
}

fn emit_epilogue(out: &mut String, mf: &MachineFunction) {
    if mf.stack_size > 0 {
        emit_sp_adjust(out, "add", mf.stack_size);
    }
    let save_list = save_reg_list(mf);
    if !save_list.is_empty() {
        writeln!(out, "    pop {{{}}}", save_list.join(", ")).unwrap();
    }
    writeln!(out, "    bx lr").unwrap();
}

fn save_reg_list(mf: &MachineFunction) -> Vec<String> {
    let mut list: Vec<String> = mf.used_callee_saved.iter().map(|r| r.to_string()).collect();
    if mf.uses_lr {
        list.push("lr".to_string());
    }
    list
}

fn emit_sp_adjust(out: &mut String, op: &str, bytes: i32) {
    writeln!(out, "    {op} sp, sp, #{bytes}").unwrap();
}

fn emit_inst(out: &mut String, mf: &MachineFunction, inst: &MachInst) -> CompileResult<()> {
    match inst {
        MachInst::Alu { op, dst, lhs, rhs, shift } => {
            let shift_text = shift.map(|s| format!(", {s}")).unwrap_or_default();
            writeln!(out, "    {op} {dst}, {lhs}, {rhs}{shift_text}").unwrap();
        }
        MachInst::LongMul { dst_hi, dst_lo, lhs, rhs } => {
            writeln!(out, "    smull {dst_lo}, {dst_hi}, {lhs}, {rhs}").unwrap();
        }
        MachInst::Fma { op, dst, mul_lhs, mul_rhs, addend } => {
            let mnemonic = match op {
                crate::mach::FmaOp::Mla => "mla",
                crate::mach::FmaOp::Mls => "mls",
            };
            writeln!(out, "    {mnemonic} {dst}, {mul_lhs}, {mul_rhs}, {addend}").unwrap();
        }
        MachInst::Mov { dst, src, cond, shift } => {
            let shift_text = shift.map(|s| format!(", {s}")).unwrap_or_default();
            emit_mov(out, *dst, *src, *cond, &shift_text)?;
        }
        MachInst::Cmp { lhs, rhs } => writeln!(out, "    cmp {lhs}, {rhs}").unwrap(),
        MachInst::CondBranch { cond, target } => {
            writeln!(out, "    b{} .L{}{}", cond.suffix(), mf.name, target).unwrap();
        }
        MachInst::Jump { target } => writeln!(out, "    b .L{}{}", mf.name, target).unwrap(),
        MachInst::Call { target, .. } => writeln!(out, "    bl {target}").unwrap(),
        MachInst::Load { dst, base, offset, shift, mode } => emit_mem(out, "ldr", *dst, *base, *offset, *shift, *mode),
        MachInst::Store { src, base, offset, shift, mode } => emit_mem(out, "str", *src, *base, *offset, *shift, *mode),
        MachInst::GlobalAddr { dst, symbol } => writeln!(out, "    ldr {dst}, ={symbol}").unwrap(),
        MachInst::Return => emit_epilogue(out, mf),
        MachInst::Comment(text) => writeln!(out, "    @ {text}").unwrap(),
        MachInst::Predicated { cond, inst } => emit_predicated(out, *cond, inst)?,
    }
    Ok(())
}

/// Renders the four instruction kinds if-conversion ever predicates (spec.md §4.9's
/// if-to-cond), suffixing the mnemonic with `cond` instead of emitting a separate
/// `MachInst` shape for every conditional variant.
fn emit_predicated(out: &mut String, cond: Cond, inst: &MachInst) -> CompileResult<()> {
    let suffix = cond.suffix();
    match inst {
        MachInst::Alu { op, dst, lhs, rhs, shift } => {
            let shift_text = shift.map(|s| format!(", {s}")).unwrap_or_default();
            writeln!(out, "    {op}{suffix} {dst}, {lhs}, {rhs}{shift_text}").unwrap();
            Ok(())
        }
        MachInst::Fma { op, dst, mul_lhs, mul_rhs, addend } => {
            let mnemonic = match op {
                crate::mach::FmaOp::Mla => "mla",
                crate::mach::FmaOp::Mls => "mls",
            };
            writeln!(out, "    {mnemonic}{suffix} {dst}, {mul_lhs}, {mul_rhs}, {addend}").unwrap();
            Ok(())
        }
        MachInst::Load { dst, base, offset, shift, mode } => {
            emit_mem(out, &format!("ldr{suffix}"), *dst, *base, *offset, *shift, *mode);
            Ok(())
        }
        MachInst::Store { src, base, offset, shift, mode } => {
            emit_mem(out, &format!("str{suffix}"), *src, *base, *offset, *shift, *mode);
            Ok(())
        }
        other => bug!(PASS, "if-conversion predicated an instruction kind emit can't render: {other:?}"),
    }
}

/// A `mov` whose immediate doesn't fit ARM's rotated-8-bit encoding needs a `movw`/
/// `movt` pair (spec.md §4.10's "no literal pool for ordinary constants" choice,
/// recorded in DESIGN.md); everything else is a single instruction.
fn emit_mov(out: &mut String, dst: Operand, src: Operand, cond: Cond, shift_text: &str) -> CompileResult<()> {
    match src {
        Operand::Immediate(c) if !imm::is_encodable(c) && cond == Cond::Al && shift_text.is_empty() => {
            let lo = (c as u32) & 0xffff;
            let hi = ((c as u32) >> 16) & 0xffff;
            writeln!(out, "    movw {dst}, #{lo}").unwrap();
            if hi != 0 {
                writeln!(out, "    movt {dst}, #{hi}").unwrap();
            }
            Ok(())
        }
        Operand::Immediate(c) if !imm::is_encodable(c) => {
            bug!(PASS, "non-encodable immediate {c} reached a conditional/shifted mov")
        }
        _ => {
            writeln!(out, "    mov{} {dst}, {src}{shift_text}", cond.suffix()).unwrap();
            Ok(())
        }
    }
}

fn emit_mem(out: &mut String, mnemonic: &str, reg: Operand, base: Operand, offset: i32, shift: Option<crate::mach::Shift>, mode: AddrMode) {
    let shift_text = shift.map(|s| format!(", {s}")).unwrap_or_default();
    let addr = match mode {
        AddrMode::Offset if offset == 0 && shift.is_none() => format!("[{base}]"),
        AddrMode::Offset => format!("[{base}, #{offset}{shift_text}]"),
        AddrMode::PreIndex => format!("[{base}, #{offset}{shift_text}]!"),
        AddrMode::PostIndex => format!("[{base}], #{offset}{shift_text}"),
    };
    writeln!(out, "    {mnemonic} {reg}, {addr}").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach::{MachineFunction, Operand as Op, Reg};

    #[test]
    fn leaf_function_skips_push_pop_when_nothing_is_saved() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        mf.blocks[b].insts.push(MachInst::Mov { dst: Op::PreColored(Reg::R(0)), src: Op::Immediate(0), cond: Cond::Al, shift: None });
        mf.blocks[b].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(!out.contains("push"));
        assert!(!out.contains("pop"));
        assert!(out.contains("bx lr"));
    }

    #[test]
    fn callee_saved_use_forces_push_and_pop() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        mf.used_callee_saved.insert(Reg::R(4));
        mf.uses_lr = true;
        mf.blocks[b].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(out.contains("push {r4, lr}"));
        assert!(out.contains("pop {r4, lr}"));
    }

    #[test]
    fn non_encodable_constant_becomes_movw_movt() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        mf.blocks[b].insts.push(MachInst::Mov {
            dst: Op::PreColored(Reg::R(0)),
            src: Op::Immediate(0x1234_5678),
            cond: Cond::Al,
            shift: None,
        });
        mf.blocks[mf.entry].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(out.contains("movw r0, #22136"));
        assert!(out.contains("movt r0, #4660"));
    }

    #[test]
    fn block_labels_carry_the_bb_prefix_spec_names() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("_BB_0");
        mf.entry = b;
        mf.blocks[b].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(out.contains(".Lf_BB_0:"));
    }

    #[test]
    fn a_terminator_gets_a_literal_pool_with_no_branch_around() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        mf.blocks[b].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(out.contains("_POOL_0:"));
        assert!(out.contains(".ltorg"));
        assert!(!out.contains("b _POOL_0_after"));
    }

    #[test]
    fn a_thousand_instructions_without_a_terminator_forces_a_branch_around_pool() {
        let mut mf = MachineFunction::new("f", false);
        let b = mf.new_block("entry");
        mf.entry = b;
        for i in 0..1000 {
            mf.blocks[b].insts.push(MachInst::Mov { dst: Op::PreColored(Reg::R(0)), src: Op::Immediate(i % 200), cond: Cond::Al, shift: None });
        }
        mf.blocks[b].insts.push(MachInst::Return);

        let mut out = String::new();
        emit_function(&mut out, &mf, &mut PoolState::new()).unwrap();

        assert!(out.contains("b _POOL_0_after"));
        assert!(out.contains("_POOL_0:"));
        assert!(out.contains(".ltorg"));
    }

    #[test]
    fn pool_indices_stay_unique_across_functions_in_one_program() {
        let mut mf_a = MachineFunction::new("a", false);
        let ba = mf_a.new_block("entry");
        mf_a.entry = ba;
        mf_a.blocks[ba].insts.push(MachInst::Return);

        let mut mf_b = MachineFunction::new("b", false);
        let bb = mf_b.new_block("entry");
        mf_b.entry = bb;
        mf_b.blocks[bb].insts.push(MachInst::Return);

        let mut out = String::new();
        let mut pool = PoolState::new();
        emit_function(&mut out, &mf_a, &mut pool).unwrap();
        emit_function(&mut out, &mf_b, &mut pool).unwrap();

        assert!(out.contains("_POOL_0:"));
        assert!(out.contains("_POOL_1:"));
    }
}
