//! Function inlining (spec.md §4.6): a callee is a candidate when it is non-recursive,
//! under a small instruction-count ceiling, and takes no array-typed alloca whose
//! address could escape in a way the caller's memdep can't already see (any alloca is
//! fine here, since every alloca this crate builds is scalar or a fixed-size local
//! array already handled by the ordinary memdep alias rules). Each call site is
//! replaced by a clone of the callee's blocks spliced into the caller, parameters bound
//! to the call's arguments, and every `Return` turned into a `Jump` to a fresh
//! continuation block that phis the return value back together.

use std::collections::HashMap;

use crate::analysis::callgraph::CallGraph;
use crate::ir::{BlockId, Function, Program, ValueId, ValueKind};
use crate::passes::clone::{remap, remap_kind};

const MAX_CALLEE_INSTS: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineStats {
    pub call_sites_inlined: usize,
}

pub fn run(program: &mut Program) -> InlineStats {
    let cg = CallGraph::build(program);
    let mut stats = InlineStats::default();

    let candidates: Vec<String> = program
        .functions
        .iter()
        .filter(|f| !cg.is_recursive(&f.name) && inst_count(f) < MAX_CALLEE_INSTS)
        .map(|f| f.name.clone())
        .collect();

    loop {
        let mut did_inline = false;
        for i in 0..program.functions.len() {
            let caller_name = program.functions[i].name.clone();
            let Some(site) = find_inlinable_call(&program.functions[i], &candidates, &caller_name) else { continue };
            let callee = program.function(&site.callee_name).expect("candidate name resolves").clone();
            inline_call(&mut program.functions[i], &callee, site.call, site.block);
            stats.call_sites_inlined += 1;
            did_inline = true;
            break;
        }
        if !did_inline {
            break;
        }
    }

    stats
}

fn inst_count(f: &Function) -> usize {
    f.blocks().map(|b| f.block(b).insts.len() + f.block(b).mem_phis.len()).sum()
}

struct CallSite {
    block: BlockId,
    call: ValueId,
    callee_name: String,
}

fn find_inlinable_call(func: &Function, candidates: &[String], caller_name: &str) -> Option<CallSite> {
    for b in func.blocks() {
        for &id in &func.block(b).insts {
            if let ValueKind::Call { func: callee, .. } = &func.value(id).kind {
                if callee.name.as_ref() != caller_name && candidates.iter().any(|c| c == callee.name.as_ref()) {
                    return Some(CallSite { block: b, call: id, callee_name: callee.name.to_string() });
                }
            }
        }
    }
    None
}

/// Splice a clone of `callee` into `caller` at `call_inst`, which lives in `call_block`.
///
/// `call_block` is split at `call_inst`: everything before it stays, `call_inst` itself
/// and everything after moves into a new tail block. The callee's entry is jumped to
/// from the original `call_block`; every callee `Return` becomes a `Jump` to the tail,
/// with a phi in the tail collecting the returned value (omitted for a void callee).
fn inline_call(caller: &mut Function, callee: &Function, call_inst: ValueId, call_block: BlockId) {
    let tail = caller.new_block(format!("{}.inline.cont", callee.name));
    let pos = caller.block(call_block).insts.iter().position(|v| *v == call_inst).expect("call in its own block");
    let after: Vec<ValueId> = caller.block_mut(call_block).insts.split_off(pos + 1);
    caller.block_mut(call_block).insts.pop(); // drop the Call itself
    caller.block_mut(tail).insts = after;

    let args = match &caller.value(call_inst).kind {
        ValueKind::Call { args, .. } => args.clone(),
        _ => unreachable!(),
    };

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for b in callee.blocks() {
        block_map.insert(b, caller.new_block(format!("{}.{}", callee.name, callee.block(b).name)));
    }

    // `ParamRef`s have no defining block (like `Const`/`Undef`, they "dominate
    // everything"), so they never show up scanning block instruction lists; find them
    // by walking every instruction's operands instead.
    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for b in callee.blocks() {
        for &id in callee.block(b).insts.iter().chain(callee.block(b).mem_phis.iter()) {
            for operand in callee.value(id).kind.operands() {
                if let ValueKind::ParamRef { index } = &callee.value(operand).kind {
                    value_map.insert(operand, args[*index as usize]);
                }
            }
        }
    }

    // First pass: allocate a clone of every non-ParamRef value so phi incomings can
    // reference clones created later in program order.
    for b in callee.blocks() {
        for &id in &callee.block(b).mem_phis {
            if value_map.contains_key(&id) {
                continue;
            }
            let cloned = caller.push_mem_phi(block_map[&b], ValueKind::MemPhi { incomings: vec![] });
            value_map.insert(id, cloned);
        }
        for &id in &callee.block(b).insts {
            if value_map.contains_key(&id) {
                continue;
            }
            let placeholder = caller.new_value(ValueKind::Undef, Some(block_map[&b]));
            caller.block_mut(block_map[&b]).insts.push(placeholder);
            value_map.insert(id, placeholder);
        }
    }

    let mut return_sources: Vec<(ValueId, BlockId)> = Vec::new();
    for b in callee.blocks() {
        for &id in &callee.block(b).mem_phis {
            let ValueKind::MemPhi { incomings } = &callee.value(id).kind else { unreachable!() };
            for (v, from) in incomings.clone() {
                caller.add_phi_incoming(value_map[&id], remap(&value_map, v), block_map[&from]);
            }
        }
        for &id in &callee.block(b).insts {
            let cloned_id = value_map[&id];
            if matches!(callee.value(id).kind, ValueKind::ParamRef { .. }) {
                continue;
            }
            let new_kind = remap_kind(&callee.value(id).kind, &value_map, &block_map, tail);
            if let ValueKind::Return { value } = &new_kind {
                if let Some(v) = value {
                    return_sources.push((*v, block_map[&b]));
                }
                caller.value_mut(cloned_id).kind = ValueKind::Jump { target: tail };
            } else {
                caller.value_mut(cloned_id).kind = new_kind;
            }
        }
    }
    // Re-register uses for every clone now that final operand values are known; erase
    // and recreate isn't needed since `new_value`'s use-registration already ran against
    // `Undef` placeholders with no operands, so just re-run it against the real kind.
    for b in callee.blocks() {
        for &id in callee.block(b).insts.iter().chain(callee.block(b).mem_phis.iter()) {
            if matches!(callee.value(id).kind, ValueKind::ParamRef { .. }) {
                continue;
            }
            let cloned_id = value_map[&id];
            for operand in caller.value(cloned_id).kind.operands() {
                let uses = &mut caller.value_mut(operand).uses;
                if !uses.contains(&cloned_id) {
                    uses.push(cloned_id);
                }
            }
        }
    }

    let callee_entry = block_map[&callee.entry];
    let jump_inst = caller.new_value(ValueKind::Jump { target: callee_entry }, Some(call_block));
    caller.block_mut(call_block).insts.push(jump_inst);

    if !callee.is_void && !return_sources.is_empty() {
        let result = if return_sources.len() == 1 {
            return_sources[0].0
        } else {
            let phi = caller.new_value(ValueKind::Phi { incomings: vec![] }, Some(tail));
            caller.prepend_phi(tail, phi);
            for (v, from) in return_sources {
                caller.add_phi_incoming(phi, v, from);
            }
            phi
        };
        caller.replace_all_uses_with(call_inst, result);
    }
    caller.erase(call_inst);
    caller.recompute_preds();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FuncRef;
    use std::rc::Rc;

    #[test]
    fn inlines_small_leaf_call() {
        let mut program = Program::new();

        let mut callee = Function::new("double", false, vec![]);
        let p = callee.param_ref(0);
        let two = callee.const_value(2);
        let mul = callee.push_inst(callee.entry, ValueKind::Binary { op: crate::ir::BinOp::Mul, lhs: p, rhs: two });
        callee.push_inst(callee.entry, ValueKind::Return { value: Some(mul) });
        program.functions.push(callee);

        let mut caller = Function::new("main", true, vec![]);
        let arg = caller.const_value(21);
        let func_ref = FuncRef { name: Rc::from("double"), is_void: false, is_pure: true };
        let call = caller.push_inst(caller.entry, ValueKind::Call { func: func_ref, args: vec![arg] });
        caller.push_inst(caller.entry, ValueKind::Return { value: Some(call) });
        program.functions.push(caller);

        let stats = run(&mut program);
        assert_eq!(stats.call_sites_inlined, 1);
        assert!(program.function("main").unwrap().block_count() > 1);
    }
}
