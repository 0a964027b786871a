//! Arena-owned SSA functions: `Function` owns every `ValueId`/`BlockId` it mints, and
//! is the sole place operand writes happen, so use-list maintenance (spec.md §3.2's
//! "every operand write goes through a `set` operation") can never be skipped.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Decl;
use crate::ir::value::{BlockId, FuncRef, ValueData, ValueId, ValueKind};

/// One SSA basic block: an ordered instruction list (phis required to be a contiguous
/// prefix, checked by `Function::validate`), predecessor/successor lists recomputed
/// after CFG-changing rewrites, and dominance fields filled in by `analysis::cfg`.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub name: String,
    /// Memory phis live logically before `insts` but are never emitted as real
    /// instructions (spec.md §3.2).
    pub mem_phis: Vec<ValueId>,
    pub insts: Vec<ValueId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,

    pub dom_by: Vec<BlockId>,
    pub idom: Option<BlockId>,
    pub idom_children: Vec<BlockId>,
    pub dom_level: u32,
    pub visited: bool,
}

impl BasicBlock {
    pub fn new(name: impl Into<String>) -> Self {
        BasicBlock { name: name.into(), ..Default::default() }
    }

    /// "ends in a terminator", per spec.md §3.2's `valid()`.
    pub fn valid(&self, func: &Function) -> bool {
        matches!(self.insts.last(), Some(id) if func.value(*id).kind.is_terminator())
    }

    pub fn phi_prefix_len(&self, func: &Function) -> usize {
        self.insts.iter().take_while(|id| func.value(**id).kind.is_phi()).count()
    }
}

/// A function body: arenas of values and blocks plus bookkeeping shared by every pass.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub is_void: bool,
    pub param_decls: Vec<Rc<Decl>>,
    pub entry: BlockId,

    values: Vec<ValueData>,
    blocks: Vec<BasicBlock>,
    block_order: Vec<BlockId>,
    const_cache: HashMap<i32, ValueId>,
    undef: ValueId,
}

impl Function {
    pub fn new(name: impl Into<String>, is_void: bool, param_decls: Vec<Rc<Decl>>) -> Self {
        let mut f = Function {
            name: name.into(),
            is_void,
            param_decls,
            entry: BlockId(0),
            values: Vec::new(),
            blocks: Vec::new(),
            block_order: Vec::new(),
            const_cache: HashMap::new(),
            undef: ValueId(0),
        };
        f.undef = f.new_value(ValueKind::Undef, None);
        let entry = f.new_block("entry");
        f.entry = entry;
        f
    }

    // -- arena accessors --------------------------------------------------

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        &mut self.values[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0 as usize]
    }

    pub fn blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.block_order.iter().copied()
    }

    pub fn block_count(&self) -> usize {
        self.block_order.len()
    }

    pub fn undef(&self) -> ValueId {
        self.undef
    }

    // -- construction -------------------------------------------------------

    pub fn new_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(name));
        self.block_order.push(id);
        id
    }

    /// Raw value allocation; does not register operand uses. Prefer `push_inst`,
    /// `const_value`, or `param_ref` for anything with operands.
    pub fn new_value(&mut self, kind: ValueKind, block: Option<BlockId>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData::new(kind, block));
        self.register_uses(id);
        id
    }

    /// Interned constant lookup/creation (spec.md §3.2: "at most one `Const` per
    /// integer alive at any time").
    pub fn const_value(&mut self, i: i32) -> ValueId {
        if let Some(id) = self.const_cache.get(&i) {
            return *id;
        }
        let id = self.new_value(ValueKind::Const(i), None);
        self.const_cache.insert(i, id);
        id
    }

    pub fn param_ref(&mut self, index: u32) -> ValueId {
        self.new_value(ValueKind::ParamRef { index }, None)
    }

    pub fn global_ref(&mut self, decl: Rc<Decl>) -> ValueId {
        self.new_value(ValueKind::GlobalRef(decl), None)
    }

    /// Append an instruction to the end of `block`'s instruction list (before the
    /// terminator, if any — callers append terminators last and never append after).
    pub fn push_inst(&mut self, block: BlockId, kind: ValueKind) -> ValueId {
        let id = self.new_value(kind, Some(block));
        self.block_mut(block).insts.push(id);
        id
    }

    pub fn push_mem_phi(&mut self, block: BlockId, kind: ValueKind) -> ValueId {
        let id = self.new_value(kind, Some(block));
        self.block_mut(block).mem_phis.push(id);
        id
    }

    /// Insert phi `id` (already allocated) at the start of `block`'s instruction list,
    /// keeping the phi-prefix invariant (spec.md §3.2).
    pub fn prepend_phi(&mut self, block: BlockId, id: ValueId) {
        self.block_mut(block).insts.insert(0, id);
    }

    pub fn insert_before(&mut self, block: BlockId, before: ValueId, kind: ValueKind) -> ValueId {
        let id = self.new_value(kind, Some(block));
        let pos = self.block(block).insts.iter().position(|v| *v == before).expect("insert_before: anchor not in block");
        self.block_mut(block).insts.insert(pos, id);
        id
    }

    // -- use/def maintenance --------------------------------------------------

    /// Register `user`'s operands in each operand's use list. Called once at
    /// construction time; callers that later mutate operands must go through
    /// `set_operand`/`replace_all_uses_with`, never edit `ValueKind` fields directly,
    /// or the use lists will drift (spec.md §8.1's use/def consistency property).
    fn register_uses(&mut self, user: ValueId) {
        for operand in self.value(user).kind.operands() {
            let uses = &mut self.value_mut(operand).uses;
            if !uses.contains(&user) {
                uses.push(user);
            }
        }
    }

    fn unregister_uses(&mut self, user: ValueId) {
        for operand in self.value(user).kind.operands() {
            self.value_mut(operand).uses.retain(|u| *u != user);
        }
    }

    /// Rewrite every use of `old` (in live instructions only) to point at `new`. This
    /// is the one sanctioned way to change an operand: it keeps `old`'s use list and
    /// `new`'s use list consistent in the same pass.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        let users = self.value(old).uses.clone();
        for user in users {
            self.unregister_uses(user);
            self.value_mut(user).kind.replace_operand(old, new);
            self.register_uses(user);
        }
        self.value_mut(old).uses.clear();
    }

    /// Point-rewrite a single operand slot without touching every use of `old`
    /// (mem2reg's per-phi-slot writes need this, since not all uses of the alloca's
    /// current value change at once).
    pub fn set_operand(&mut self, user: ValueId, old: ValueId, new: ValueId) {
        self.unregister_uses_of(user, old);
        self.value_mut(user).kind.replace_operand(old, new);
        let uses = &mut self.value_mut(new).uses;
        if !uses.contains(&user) {
            uses.push(user);
        }
    }

    fn unregister_uses_of(&mut self, user: ValueId, operand: ValueId) {
        self.value_mut(operand).uses.retain(|u| *u != user);
    }

    /// Append a brand-new phi incoming pair, registering the use.
    pub fn add_phi_incoming(&mut self, phi: ValueId, value: ValueId, from: BlockId) {
        match &mut self.value_mut(phi).kind {
            ValueKind::Phi { incomings } | ValueKind::MemPhi { incomings } => {
                incomings.push((value, from));
            }
            _ => panic!("add_phi_incoming: not a phi"),
        }
        let uses = &mut self.value_mut(value).uses;
        if !uses.contains(&phi) {
            uses.push(phi);
        }
    }

    /// Remove an instruction from its block and destroy it. The caller must ensure its
    /// use list is already empty (DCE's contract) or this call would leave dangling
    /// uses behind, violating spec.md §8.1.
    pub fn erase(&mut self, id: ValueId) {
        debug_assert!(self.value(id).uses.is_empty(), "erase: value still has uses");
        self.unregister_uses(id);
        if let Some(block) = self.value(id).block {
            self.block_mut(block).insts.retain(|v| *v != id);
            self.block_mut(block).mem_phis.retain(|v| *v != id);
        }
        // The slot is left as a tombstone (Undef placeholder with no block) rather than
        // compacted, so every other ValueId already issued stays valid.
        self.value_mut(id).kind = ValueKind::Undef;
        self.value_mut(id).block = None;
    }

    /// Rebuild each block's predecessor list from every block's terminator. Called
    /// after SSA construction and after any pass that rewrites branches (spec.md
    /// §4.1: "clear every block's predecessor list, then recompute it").
    pub fn recompute_preds(&mut self) {
        for b in self.block_order.clone() {
            self.block_mut(b).preds.clear();
            self.block_mut(b).succs.clear();
        }
        for b in self.block_order.clone() {
            let succs = self.terminator_successors(b);
            self.block_mut(b).succs = succs.clone();
            for s in succs {
                self.block_mut(s).preds.push(b);
            }
        }
    }

    pub fn terminator_successors(&self, block: BlockId) -> Vec<BlockId> {
        let Some(&term) = self.block(block).insts.last() else { return vec![] };
        match &self.value(term).kind {
            ValueKind::Jump { target } => vec![*target],
            ValueKind::Branch { if_true, if_false, .. } => vec![*if_true, *if_false],
            _ => vec![],
        }
    }

    pub fn terminator(&self, block: BlockId) -> Option<ValueId> {
        self.block(block).insts.last().filter(|id| self.value(**id).kind.is_terminator()).copied()
    }

    /// Every reachable block ends in exactly one terminator and phis form a contiguous
    /// prefix (spec.md §8.1). Panics with a descriptive message identifying the
    /// violation, in keeping with spec.md §7 ("the affected pass aborts the process").
    pub fn validate(&self) {
        for b in self.blocks() {
            let blk = self.block(b);
            if blk.insts.is_empty() {
                continue;
            }
            let seen_non_phi = blk
                .insts
                .iter()
                .position(|id| !self.value(*id).kind.is_phi())
                .unwrap_or(blk.insts.len());
            for (i, id) in blk.insts.iter().enumerate() {
                if self.value(*id).kind.is_phi() && i > seen_non_phi {
                    panic!("function {}: block {} has a phi after non-phi instructions", self.name, blk.name);
                }
            }
        }
    }
}
