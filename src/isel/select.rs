//! Instruction selection (spec.md §4.7): one pass per function, SSA blocks mapped
//! 1:1 to machine blocks. Each SSA value is selected exactly once, in block order, and
//! memoized into an `Operand` so later instructions reference it directly instead of
//! re-selecting it.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Decl;
use crate::ir::{BinOp, BlockId, Function, UnOp, ValueId, ValueKind};
use crate::isel::divconst::{self, DivConstConfig, Strategy};
use crate::isel::imm;
use crate::mach::{AddrMode, AluOp, Cond, FixupKind, FmaOp, MachInst, MachineFunction, Operand, Reg, Shift, VReg};

pub fn select_function(func: &Function, cfg: &DivConstConfig) -> MachineFunction {
    let mut mf = MachineFunction::new(func.name.clone(), func.is_void);

    let mut block_map = HashMap::new();
    for b in func.blocks() {
        let idx = mf.new_block(format!("_BB_{}", b.0));
        block_map.insert(b, idx);
    }
    mf.entry = block_map[&func.entry];

    let mut sel = Selector {
        func,
        mf: &mut mf,
        block_map,
        values: HashMap::new(),
        allocas: HashMap::new(),
        next_local_offset: 0,
        globals: HashMap::new(),
        cur: 0,
        cfg,
    };

    sel.cur = sel.block_map[&func.entry];
    sel.emit_param_prologue();

    for b in func.blocks() {
        sel.cur = sel.block_map[&b];
        for &id in &func.block(b).insts {
            sel.select_inst(id);
        }
    }

    let frame_locals_size = sel.next_local_offset;
    drop(sel);
    mf.frame_locals_size = frame_locals_size;
    mf.recompute_preds();
    mf
}

struct Selector<'a> {
    func: &'a Function,
    mf: &'a mut MachineFunction,
    block_map: HashMap<BlockId, usize>,
    values: HashMap<ValueId, Operand>,
    allocas: HashMap<ValueId, i32>,
    next_local_offset: i32,
    globals: HashMap<usize, VReg>,
    cur: usize,
    cfg: &'a DivConstConfig,
}

impl<'a> Selector<'a> {
    fn push(&mut self, inst: MachInst) {
        self.mf.blocks[self.cur].insts.push(inst);
    }

    fn new_vreg(&mut self) -> VReg {
        self.mf.new_vreg()
    }

    /// Scalar parameters are copied out of their ABI register (or the stack, beyond
    /// the 4th) once at function entry (spec.md §4.7).
    fn emit_param_prologue(&mut self) {
        for (i, decl) in self.func.param_decls.clone().into_iter().enumerate() {
            if decl.is_array() {
                continue;
            }
            let dst = self.new_vreg();
            if i < 4 {
                self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::PreColored(Reg::arg(i as u32)), cond: Cond::Al, shift: None });
            } else {
                let inst_idx = self.mf.blocks[self.cur].insts.len();
                self.push(MachInst::Load {
                    dst: Operand::Virtual(dst),
                    base: Operand::PreColored(Reg::Sp),
                    offset: (i as i32 - 4) * 4,
                    shift: None,
                    mode: AddrMode::Offset,
                });
                self.mf.sp_fixups.push(crate::mach::SpFixup { block: self.cur, inst: inst_idx, kind: FixupKind::Params });
            }
            self.values.insert(self.param_ref_id(i as u32), Operand::Virtual(dst));
        }
    }

    /// `ParamRef` values don't carry their own `ValueId` discovery path other than by
    /// scanning, since the builder mints them ad hoc; find the one the entry block's
    /// instructions (or, for array params, the decl itself) would reference by
    /// re-deriving it the same way the builder did: `Function::param_ref` interns
    /// nothing, so instead we look it up by scanning every operand of every
    /// instruction for a `ParamRef { index }` match the first time it's used.
    fn param_ref_id(&self, index: u32) -> ValueId {
        for b in self.func.blocks() {
            for &id in &self.func.block(b).insts {
                for op in self.func.value(id).kind.operands() {
                    if matches!(self.func.value(op).kind, ValueKind::ParamRef { index: i } if i == index) {
                        return op;
                    }
                }
            }
        }
        // Never referenced: synthesize a placeholder id that nothing will look up.
        ValueId(u32::MAX)
    }

    fn global_addr(&mut self, decl: &Rc<Decl>) -> VReg {
        let key = Rc::as_ptr(decl) as usize;
        if let Some(&v) = self.globals.get(&key) {
            return v;
        }
        let dst = self.new_vreg();
        self.push(MachInst::GlobalAddr { dst: Operand::Virtual(dst), symbol: decl.name.clone() });
        self.globals.insert(key, dst);
        dst
    }

    fn alloca_addr(&mut self, id: ValueId, size: u32) -> Operand {
        if let Some(&off) = self.allocas.get(&id) {
            return self.addr_from_sp(off, FixupKind::Locals);
        }
        let off = self.next_local_offset;
        self.next_local_offset += 4 * size.max(1) as i32;
        self.allocas.insert(id, off);
        self.addr_from_sp(off, FixupKind::Locals)
    }

    fn addr_from_sp(&mut self, offset: i32, kind: FixupKind) -> Operand {
        let dst = self.new_vreg();
        let inst_idx = self.mf.blocks[self.cur].insts.len();
        self.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(dst), lhs: Operand::PreColored(Reg::Sp), rhs: Operand::Immediate(offset), shift: None });
        self.mf.sp_fixups.push(crate::mach::SpFixup { block: self.cur, inst: inst_idx, kind });
        Operand::Virtual(dst)
    }

    fn operand_of(&mut self, id: ValueId) -> Operand {
        if let Some(&op) = self.values.get(&id) {
            return op;
        }
        let op = match &self.func.value(id).kind {
            ValueKind::Const(c) => Operand::Immediate(*c),
            ValueKind::Undef => Operand::Immediate(0),
            ValueKind::ParamRef { .. } => {
                // Selected eagerly in `emit_param_prologue`; if we reach here the
                // value wasn't registered there (shouldn't happen for well-formed IR).
                Operand::Immediate(0)
            }
            ValueKind::GlobalRef(decl) => Operand::Virtual(self.global_addr(&decl.clone())),
            _ => {
                self.select_inst(id);
                *self.values.get(&id).unwrap_or(&Operand::Immediate(0))
            }
        };
        self.values.insert(id, op);
        op
    }

    /// Resolve an operand into something an ALU instruction's `rhs`/`Cmp`'s `rhs` slot
    /// can hold directly: a register, or an encodable immediate. Non-encodable
    /// immediates are pre-loaded with a `Mov` (spec.md §4.7).
    fn alu_operand(&mut self, id: ValueId) -> Operand {
        let op = self.operand_of(id);
        match op {
            Operand::Immediate(c) if !imm::is_encodable(c) => Operand::Virtual(self.materialize_const(c)),
            other => other,
        }
    }

    fn materialize_const(&mut self, c: i32) -> VReg {
        let dst = self.new_vreg();
        self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::Immediate(c), cond: Cond::Al, shift: None });
        dst
    }

    /// A register operand, forcing even an encodable immediate into a vreg (needed for
    /// the multiply/long-multiply forms, which never take an immediate operand).
    fn reg_operand(&mut self, id: ValueId) -> Operand {
        match self.operand_of(id) {
            Operand::Immediate(c) => Operand::Virtual(self.materialize_const(c)),
            other => other,
        }
    }

    fn select_inst(&mut self, id: ValueId) {
        if self.values.contains_key(&id) {
            return;
        }
        let kind = self.func.value(id).kind.clone();
        let result = match kind {
            ValueKind::Binary { op, lhs, rhs } => Some(self.select_binary(op, lhs, rhs)),
            ValueKind::Unary { op, operand } => Some(self.select_unary(op, operand)),
            ValueKind::Mv(v) => Some(self.operand_of(v)),
            ValueKind::Alloca { size } => Some(self.alloca_addr(id, size)),
            ValueKind::GetElementPtr { array, base, index, multiplier } => Some(self.select_gep(array, base, index, multiplier)),
            ValueKind::Load { addr, .. } => Some(self.select_load(addr)),
            ValueKind::Store { addr, value, .. } => {
                self.select_store(addr, value);
                None
            }
            ValueKind::Phi { .. } => {
                // Materialized by `resolve_phis` in the predecessor blocks; just
                // reserve its vreg here so other instructions in this block can
                // reference it before the parallel moves are emitted.
                Some(Operand::Virtual(self.new_vreg()))
            }
            ValueKind::Call { func: callee, args } => self.select_call(&callee, &args),
            ValueKind::Jump { target } => {
                self.select_jump(target);
                None
            }
            ValueKind::Branch { cond, if_true, if_false } => {
                self.select_branch(cond, if_true, if_false);
                None
            }
            ValueKind::Return { value } => {
                self.select_return(value);
                None
            }
            ValueKind::GlobalRef(_) | ValueKind::Const(_) | ValueKind::Undef | ValueKind::ParamRef { .. } => None,
            ValueKind::MemPhi { .. } | ValueKind::MemOp { .. } => None,
        };
        if let Some(op) = result {
            self.values.insert(id, op);
        }
    }

    fn select_unary(&mut self, op: UnOp, operand: ValueId) -> Operand {
        let src = self.alu_operand(operand);
        let dst = self.new_vreg();
        match op {
            UnOp::Neg => self.push(MachInst::Alu { op: AluOp::Rsb, dst: Operand::Virtual(dst), lhs: src, rhs: Operand::Immediate(0), shift: None }),
            UnOp::Not => {
                self.push(MachInst::Cmp { lhs: src, rhs: Operand::Immediate(0) });
                self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::Immediate(0), cond: Cond::Al, shift: None });
                self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::Immediate(1), cond: Cond::Eq, shift: None });
            }
        }
        Operand::Virtual(dst)
    }

    /// Detect `lhs` (or `rhs`) being a single-use `Mul` so `Add`/`Sub` can fuse into
    /// `mla`/`mls` instead of materializing the product first (spec.md §4.7).
    fn single_use_mul(&self, id: ValueId) -> Option<(ValueId, ValueId)> {
        if self.func.value(id).uses.len() != 1 {
            return None;
        }
        match &self.func.value(id).kind {
            ValueKind::Binary { op: BinOp::Mul, lhs, rhs } => Some((*lhs, *rhs)),
            _ => None,
        }
    }

    fn select_binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> Operand {
        match op {
            BinOp::Add => {
                if let Some((ml, mr)) = self.single_use_mul(lhs) {
                    return self.select_fma(FmaOp::Mla, ml, mr, rhs);
                }
                if let Some((ml, mr)) = self.single_use_mul(rhs) {
                    return self.select_fma(FmaOp::Mla, ml, mr, lhs);
                }
                self.select_add_sub(AluOp::Add, lhs, rhs, true)
            }
            BinOp::Sub => {
                if let Some((ml, mr)) = self.single_use_mul(rhs) {
                    return self.select_fma(FmaOp::Mls, ml, mr, lhs);
                }
                self.select_add_sub(AluOp::Sub, lhs, rhs, false)
            }
            BinOp::Mul => self.select_mul(lhs, rhs),
            BinOp::Div => self.select_div(lhs, rhs),
            BinOp::Mod => self.select_mod(lhs, rhs),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => self.select_compare(op, lhs, rhs),
            BinOp::And => self.select_bitlike(AluOp::And, lhs, rhs),
            BinOp::Or => self.select_bitlike(AluOp::Orr, lhs, rhs),
        }
    }

    /// `a + (-k)` folds to `a - k` and vice versa; both directions canonicalize the
    /// constant onto the rhs (spec.md §4.7).
    fn select_add_sub(&mut self, op: AluOp, lhs: ValueId, rhs: ValueId, commutative: bool) -> Operand {
        let (l, r, real_op) = if commutative {
            if matches!(self.func.value(lhs).kind, ValueKind::Const(_)) && !matches!(self.func.value(rhs).kind, ValueKind::Const(_)) {
                (rhs, lhs, op)
            } else {
                (lhs, rhs, op)
            }
        } else {
            (lhs, rhs, op)
        };
        let l_op = self.reg_operand(l);
        let r_op = match &self.func.value(r).kind {
            ValueKind::Const(c) if *c < 0 && op == AluOp::Add => {
                let dst = self.new_vreg();
                self.emit_alu_checked(AluOp::Sub, dst, l_op, -*c);
                return Operand::Virtual(dst);
            }
            ValueKind::Const(c) if *c < 0 && op == AluOp::Sub => {
                let dst = self.new_vreg();
                self.emit_alu_checked(AluOp::Add, dst, l_op, -*c);
                return Operand::Virtual(dst);
            }
            _ => self.alu_operand(r),
        };
        let dst = self.new_vreg();
        self.push(MachInst::Alu { op: real_op, dst: Operand::Virtual(dst), lhs: l_op, rhs: r_op, shift: None });
        Operand::Virtual(dst)
    }

    fn emit_alu_checked(&mut self, op: AluOp, dst: VReg, lhs: Operand, imm_val: i32) {
        let rhs = if imm::is_encodable(imm_val) { Operand::Immediate(imm_val) } else { Operand::Virtual(self.materialize_const(imm_val)) };
        self.push(MachInst::Alu { op, dst: Operand::Virtual(dst), lhs, rhs, shift: None });
    }

    fn select_bitlike(&mut self, op: AluOp, lhs: ValueId, rhs: ValueId) -> Operand {
        let l = self.alu_operand(lhs);
        let r = self.alu_operand(rhs);
        let dst = self.new_vreg();
        self.push(MachInst::Alu { op, dst: Operand::Virtual(dst), lhs: l, rhs: r, shift: None });
        Operand::Virtual(dst)
    }

    fn select_mul(&mut self, lhs: ValueId, rhs: ValueId) -> Operand {
        for (v, c) in [(lhs, rhs), (rhs, lhs)] {
            if let ValueKind::Const(k) = self.func.value(c).kind {
                if let Some(shift) = imm::log2_exact(k) {
                    let src = self.reg_operand(v);
                    let dst = self.new_vreg();
                    self.push(MachInst::Alu { op: AluOp::Lsl, dst: Operand::Virtual(dst), lhs: src, rhs: Operand::Immediate(shift as i32), shift: None });
                    return Operand::Virtual(dst);
                }
            }
        }
        let l = self.reg_operand(lhs);
        let r = self.reg_operand(rhs);
        let dst = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Mul, dst: Operand::Virtual(dst), lhs: l, rhs: r, shift: None });
        Operand::Virtual(dst)
    }

    fn select_fma(&mut self, op: FmaOp, mul_lhs: ValueId, mul_rhs: ValueId, addend: ValueId) -> Operand {
        let a = self.reg_operand(mul_lhs);
        let b = self.reg_operand(mul_rhs);
        let c = self.reg_operand(addend);
        let dst = self.new_vreg();
        self.push(MachInst::Fma { op, dst: Operand::Virtual(dst), mul_lhs: a, mul_rhs: b, addend: c });
        Operand::Virtual(dst)
    }

    fn select_div(&mut self, lhs: ValueId, rhs: ValueId) -> Operand {
        if let ValueKind::Const(d) = self.func.value(rhs).kind {
            match divconst::strategy_for(d, self.cfg) {
                Strategy::ShiftPow2 { shift, negative } if shift > 0 => {
                    return self.select_shift_div(lhs, shift, negative);
                }
                Strategy::Magic(magic) => return self.select_magic_div(lhs, magic),
                _ => {}
            }
        }
        let l = self.reg_operand(lhs);
        let r = self.reg_operand(rhs);
        let dst = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Sdiv, dst: Operand::Virtual(dst), lhs: l, rhs: r, shift: None });
        Operand::Virtual(dst)
    }

    /// `n / 2^k` for signed `n`: round toward zero by adding `2^k - 1` when `n` is
    /// negative before the arithmetic shift (spec.md §4.7).
    fn select_shift_div(&mut self, lhs: ValueId, shift: u32, negative: bool) -> Operand {
        let n = self.reg_operand(lhs);
        let bias = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Lsr, dst: Operand::Virtual(bias), lhs: n, rhs: Operand::Immediate(32 - shift as i32), shift: None });
        let biased = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(biased), lhs: n, rhs: Operand::Virtual(bias), shift: None });
        let q = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Asr, dst: Operand::Virtual(q), lhs: Operand::Virtual(biased), rhs: Operand::Immediate(shift as i32), shift: None });
        if negative {
            let dst = self.new_vreg();
            self.push(MachInst::Alu { op: AluOp::Rsb, dst: Operand::Virtual(dst), lhs: Operand::Virtual(q), rhs: Operand::Immediate(0), shift: None });
            Operand::Virtual(dst)
        } else {
            Operand::Virtual(q)
        }
    }

    fn select_magic_div(&mut self, lhs: ValueId, magic: divconst::Magic) -> Operand {
        let n = self.reg_operand(lhs);
        let m = Operand::Virtual(self.materialize_const(magic.m));
        let q_hi = self.new_vreg();
        let scratch_lo = self.new_vreg();
        self.push(MachInst::LongMul { dst_hi: Operand::Virtual(q_hi), dst_lo: Operand::Virtual(scratch_lo), lhs: n, rhs: m });
        let mut q = q_hi;
        if magic.add_n {
            let next = self.new_vreg();
            self.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(next), lhs: Operand::Virtual(q), rhs: n, shift: None });
            q = next;
        }
        if magic.shift > 0 {
            let next = self.new_vreg();
            self.push(MachInst::Alu { op: AluOp::Asr, dst: Operand::Virtual(next), lhs: Operand::Virtual(q), rhs: Operand::Immediate(magic.shift as i32), shift: None });
            q = next;
        }
        let sign_bit = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Lsr, dst: Operand::Virtual(sign_bit), lhs: Operand::Virtual(q), rhs: Operand::Immediate(31), shift: None });
        let dst = self.new_vreg();
        self.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(dst), lhs: Operand::Virtual(q), rhs: Operand::Virtual(sign_bit), shift: None });
        Operand::Virtual(dst)
    }

    /// `a % b` as `a - (a/b)*b` (fused into a single `mls` since the division result
    /// has exactly this one use).
    fn select_mod(&mut self, lhs: ValueId, rhs: ValueId) -> Operand {
        let div = self.select_div(lhs, rhs);
        let a = self.reg_operand(lhs);
        let b = self.reg_operand(rhs);
        let div = match div {
            Operand::Immediate(c) => Operand::Virtual(self.materialize_const(c)),
            other => other,
        };
        let dst = self.new_vreg();
        self.push(MachInst::Fma { op: FmaOp::Mls, dst: Operand::Virtual(dst), mul_lhs: div, mul_rhs: b, addend: a });
        Operand::Virtual(dst)
    }

    fn select_compare(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> Operand {
        let l = self.reg_operand(lhs);
        let r = self.alu_operand(rhs);
        self.push(MachInst::Cmp { lhs: l, rhs: r });
        let cond = Cond::from_ir(op).expect("comparison op");
        let dst = self.new_vreg();
        self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::Immediate(0), cond: Cond::Al, shift: None });
        self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::Immediate(1), cond, shift: None });
        Operand::Virtual(dst)
    }

    fn select_gep(&mut self, array: Rc<Decl>, base: ValueId, index: ValueId, multiplier: i32) -> Operand {
        let _ = &array;
        let base_op = self.operand_of(base);
        let byte_mult = multiplier * 4;

        if let ValueKind::Const(idx) = self.func.value(index).kind {
            let offset = idx.wrapping_mul(byte_mult);
            let dst = self.new_vreg();
            self.emit_alu_checked(AluOp::Add, dst, base_op, offset);
            return Operand::Virtual(dst);
        }

        let idx_op = self.reg_operand(index);
        if let Some(shift) = imm::log2_exact(byte_mult) {
            let dst = self.new_vreg();
            self.push(MachInst::Alu { op: AluOp::Add, dst: Operand::Virtual(dst), lhs: base_op, rhs: idx_op, shift: Some(Shift::Lsl(shift)) });
            return Operand::Virtual(dst);
        }

        let mult_op = Operand::Virtual(self.materialize_const(byte_mult));
        let dst = self.new_vreg();
        self.push(MachInst::Fma { op: FmaOp::Mla, dst: Operand::Virtual(dst), mul_lhs: idx_op, mul_rhs: mult_op, addend: base_op });
        Operand::Virtual(dst)
    }

    fn select_load(&mut self, addr: ValueId) -> Operand {
        let base = self.operand_of(addr);
        let dst = self.new_vreg();
        self.push(MachInst::Load { dst: Operand::Virtual(dst), base, offset: 0, shift: None, mode: AddrMode::Offset });
        Operand::Virtual(dst)
    }

    fn select_store(&mut self, addr: ValueId, value: ValueId) {
        let base = self.operand_of(addr);
        let src = self.reg_operand(value);
        self.push(MachInst::Store { src, base, offset: 0, shift: None, mode: AddrMode::Offset });
    }

    /// Beyond the 4th argument, the caller must carve out room below its own `sp`
    /// before storing args (ARM has no red zone: writing below `sp` without first
    /// moving it is unsafe) and give that room back once the call returns. The callee
    /// sees those slots at `[sp, #(i-4)*4 + stack_size]` after its own prologue
    /// (`emit_param_prologue`'s `FixupKind::Params`).
    fn select_call(&mut self, callee: &crate::ir::FuncRef, args: &[ValueId]) -> Option<Operand> {
        let extra = args.len().saturating_sub(4);
        if extra > 0 {
            self.adjust_sp(AluOp::Sub, (extra * 4) as i32);
            for (j, &a) in args.iter().enumerate().skip(4) {
                let v = self.reg_operand(a);
                self.push(MachInst::Store {
                    src: v,
                    base: Operand::PreColored(Reg::Sp),
                    offset: ((j - 4) * 4) as i32,
                    shift: None,
                    mode: AddrMode::Offset,
                });
            }
        }
        for (i, &a) in args.iter().enumerate().take(4) {
            let v = self.reg_operand(a);
            self.push(MachInst::Mov { dst: Operand::PreColored(Reg::arg(i as u32)), src: v, cond: Cond::Al, shift: None });
        }
        self.push(MachInst::Call { target: callee.name.to_string(), arg_regs: (args.len().min(4)) as u32, returns_value: !callee.is_void });
        if extra > 0 {
            self.adjust_sp(AluOp::Add, (extra * 4) as i32);
        }
        if callee.is_void {
            None
        } else {
            let dst = self.new_vreg();
            self.push(MachInst::Mov { dst: Operand::Virtual(dst), src: Operand::PreColored(Reg::ret()), cond: Cond::Al, shift: None });
            Some(Operand::Virtual(dst))
        }
    }

    fn adjust_sp(&mut self, op: AluOp, bytes: i32) {
        let rhs = if imm::is_encodable(bytes) { Operand::Immediate(bytes) } else { Operand::Virtual(self.materialize_const(bytes)) };
        self.push(MachInst::Alu { op, dst: Operand::PreColored(Reg::Sp), lhs: Operand::PreColored(Reg::Sp), rhs, shift: None });
    }

    fn select_jump(&mut self, target: BlockId) {
        self.resolve_phis(target);
        let idx = self.block_map[&target];
        self.mf.blocks[self.cur].succs.push(idx);
        // Fall-through elided when the target is the next block in layout order.
        if idx != self.cur + 1 {
            self.push(MachInst::Jump { target: self.mf.blocks[idx].label.clone() });
        }
    }

    fn select_branch(&mut self, cond: ValueId, if_true: BlockId, if_false: BlockId) {
        let cc = self.branch_condition(cond);
        let true_idx = self.block_map[&if_true];
        let false_idx = self.block_map[&if_false];

        // Phi resolution must happen on every outgoing edge, but this block has two
        // successors, so incoming values for each target are written just before the
        // corresponding branch/jump - false-edge moves first since they're
        // fall-through when possible.
        if false_idx == self.cur + 1 {
            self.push(MachInst::CondBranch { cond: cc, target: self.mf.blocks[true_idx].label.clone() });
            self.resolve_phis(if_false);
        } else if true_idx == self.cur + 1 {
            self.push(MachInst::CondBranch { cond: cc.negate(), target: self.mf.blocks[false_idx].label.clone() });
            self.resolve_phis(if_true);
        } else {
            self.push(MachInst::CondBranch { cond: cc, target: self.mf.blocks[true_idx].label.clone() });
            self.resolve_phis(if_false);
            self.push(MachInst::Jump { target: self.mf.blocks[false_idx].label.clone() });
        }
        self.mf.blocks[self.cur].succs.push(true_idx);
        self.mf.blocks[self.cur].succs.push(false_idx);
    }

    /// Elide the boolean materialization when `cond`'s only consumer is this branch
    /// (spec.md §4.7): emit the `Cmp` directly and let the branch read flags.
    fn branch_condition(&mut self, cond: ValueId) -> Cond {
        if self.func.value(cond).uses.len() == 1 {
            if let ValueKind::Binary { op, lhs, rhs } = self.func.value(cond).kind.clone() {
                if let Some(cc) = Cond::from_ir(op) {
                    if !self.values.contains_key(&cond) {
                        let l = self.reg_operand(lhs);
                        let r = self.alu_operand(rhs);
                        self.push(MachInst::Cmp { lhs: l, rhs: r });
                        self.values.insert(cond, Operand::Immediate(1)); // not reused: sole consumer is this branch
                        return cc;
                    }
                }
            }
        }
        let v = self.reg_operand(cond);
        self.push(MachInst::Cmp { lhs: v, rhs: Operand::Immediate(0) });
        Cond::Ne
    }

    fn select_return(&mut self, value: Option<ValueId>) {
        if let Some(v) = value {
            let op = self.reg_operand(v);
            self.push(MachInst::Mov { dst: Operand::PreColored(Reg::ret()), src: op, cond: Cond::Al, shift: None });
        }
        self.push(MachInst::Return);
    }

    /// Emit the parallel-move sequence for every phi at the start of `target`,
    /// sourced from this (predecessor) block's operands (spec.md §4.7).
    fn resolve_phis(&mut self, target: BlockId) {
        let mut moves = Vec::new();
        for &id in &self.func.block(target).insts {
            let ValueKind::Phi { incomings } = self.func.value(id).kind.clone() else { break };
            if let Some((v, _)) = incomings.iter().find(|(_, from)| *from == self.cur()) {
                let src = self.operand_of(*v);
                let dst_op = self.operand_of(id);
                if let Some(dst) = dst_op.vreg() {
                    moves.push((dst, src));
                }
            }
        }
        let seq = sequentialize_moves(self.mf, moves);
        for inst in seq {
            self.push(inst);
        }
    }

    fn cur(&self) -> BlockId {
        for (ssa, idx) in &self.block_map {
            if *idx == self.cur {
                return *ssa;
            }
        }
        unreachable!()
    }
}

/// Sequentialize a set of "all at once" register moves into an ordered list of plain
/// `Mov`s, breaking any cycle with one scratch register (the standard parallel-copy
/// construction spec.md §4.7 calls for in phi resolution).
fn sequentialize_moves(mf: &mut MachineFunction, mut pending: Vec<(VReg, Operand)>) -> Vec<MachInst> {
    let mut out = Vec::new();
    while !pending.is_empty() {
        let dsts: std::collections::HashSet<VReg> = pending.iter().map(|(d, _)| *d).collect();
        let ready = pending.iter().position(|(_, src)| src.vreg().map(|v| !dsts.contains(&v)).unwrap_or(true));
        match ready {
            Some(i) => {
                let (d, s) = pending.remove(i);
                out.push(MachInst::Mov { dst: Operand::Virtual(d), src: s, cond: Cond::Al, shift: None });
            }
            None => {
                let (d, s) = pending.remove(0);
                let scratch = mf.new_vreg();
                out.push(MachInst::Mov { dst: Operand::Virtual(scratch), src: Operand::Virtual(d), cond: Cond::Al, shift: None });
                for (_, src) in pending.iter_mut() {
                    if *src == Operand::Virtual(d) {
                        *src = Operand::Virtual(scratch);
                    }
                }
                out.push(MachInst::Mov { dst: Operand::Virtual(d), src: s, cond: Cond::Al, shift: None });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueKind as IrValueKind;

    #[test]
    fn constant_return_materializes_a_single_mov() {
        let mut f = Function::new("main", false, vec![]);
        let seven = f.const_value(7);
        f.push_inst(f.entry, IrValueKind::Return { value: Some(seven) });
        f.recompute_preds();

        let mf = select_function(&f, &DivConstConfig::default());
        let insts = &mf.blocks[mf.entry].insts;
        assert!(matches!(insts[0], MachInst::Mov { src: Operand::Immediate(7), .. }));
        assert!(matches!(insts.last(), Some(MachInst::Return)));
    }

    #[test]
    fn division_by_seven_avoids_sdiv() {
        let mut f = Function::new("main", false, vec![]);
        let n = f.param_ref(0);
        let seven = f.const_value(7);
        let d = f.push_inst(f.entry, IrValueKind::Binary { op: BinOp::Div, lhs: n, rhs: seven });
        f.push_inst(f.entry, IrValueKind::Return { value: Some(d) });
        f.recompute_preds();

        let mf = select_function(&f, &DivConstConfig::default());
        let insts = &mf.blocks[mf.entry].insts;
        assert!(!insts.iter().any(|i| matches!(i, MachInst::Alu { op: AluOp::Sdiv, .. })));
        assert!(insts.iter().any(|i| matches!(i, MachInst::LongMul { .. })));
    }
}
