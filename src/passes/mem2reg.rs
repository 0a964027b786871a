//! Promote scalar allocas to SSA phis (spec.md §4.3), following the classic
//! Cytron-et-al recipe: place phis at the iterated dominance frontier of each
//! promotable alloca's store set, then rename loads/stores to SSA values via a
//! dominator-tree walk. Grounded in `seen_ir::optimizer::IROptimizer`'s pass-stats
//! bookkeeping style, generalized since the teacher had no alloca/phi concept at all.

use std::collections::{HashMap, HashSet};

use crate::analysis::cfg;
use crate::ir::{BlockId, Function, ValueId, ValueKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct Mem2RegStats {
    pub promoted: usize,
    pub phis_inserted: usize,
}

struct PromoInfo {
    alloca: ValueId,
    phis: HashMap<BlockId, ValueId>,
}

/// Run mem2reg on `func`. Requires dominance to already be computed; recomputes it
/// itself to stay safe for callers that run this pass standalone.
pub fn promote_allocas(func: &mut Function) -> Mem2RegStats {
    cfg::compute_dominance(func);

    let candidates: Vec<ValueId> = func
        .block(func.entry)
        .insts
        .iter()
        .copied()
        .filter(|&id| matches!(func.value(id).kind, ValueKind::Alloca { size: 1 }) && is_promotable(func, id))
        .collect();

    if candidates.is_empty() {
        return Mem2RegStats::default();
    }

    let df = cfg::dominance_frontier(func);
    let mut stats = Mem2RegStats::default();
    let mut promos = Vec::new();

    for alloca in candidates {
        let def_blocks: HashSet<BlockId> = func
            .value(alloca)
            .uses
            .iter()
            .filter_map(|&user| match &func.value(user).kind {
                ValueKind::Store { addr, .. } if *addr == alloca => func.value(user).block,
                _ => None,
            })
            .collect();

        let placement_blocks = cfg::iterated_dominance_frontier(func, &df, &def_blocks);
        let mut phis = HashMap::new();
        for block in placement_blocks {
            let phi = func.new_value(ValueKind::Phi { incomings: vec![] }, Some(block));
            func.prepend_phi(block, phi);
            phis.insert(block, phi);
            stats.phis_inserted += 1;
        }
        stats.promoted += 1;
        promos.push(PromoInfo { alloca, phis });
    }

    let mut current = HashMap::new();
    rename(func, func.entry, &mut current, &promos);

    stats
}

/// An alloca is promotable only if every use is a direct `Load`/`Store` through it —
/// never passed to a call or used as the value being stored (spec.md §4.3's "the
/// address never escapes"). Array allocas never reach here since only scalar params
/// and locals get a bare `Alloca{size:1}` + `Store` in the first place.
fn is_promotable(func: &Function, alloca: ValueId) -> bool {
    func.value(alloca).uses.iter().all(|&user| {
        matches!(&func.value(user).kind,
            ValueKind::Load { addr, .. } if *addr == alloca)
            || matches!(&func.value(user).kind,
                ValueKind::Store { addr, .. } if *addr == alloca)
    })
}

fn rename(func: &mut Function, block: BlockId, current: &mut HashMap<ValueId, ValueId>, promos: &[PromoInfo]) {
    let snapshot = current.clone();

    for p in promos {
        if let Some(&phi) = p.phis.get(&block) {
            current.insert(p.alloca, phi);
        }
    }

    let undef = func.undef();
    for inst in func.block(block).insts.clone() {
        let target = promos.iter().find_map(|p| match &func.value(inst).kind {
            ValueKind::Load { addr, .. } if *addr == p.alloca => Some((p.alloca, true)),
            ValueKind::Store { addr, .. } if *addr == p.alloca => Some((p.alloca, false)),
            _ => None,
        });
        let Some((alloca, is_load)) = target else { continue };
        if is_load {
            let repl = *current.get(&alloca).unwrap_or(&undef);
            func.replace_all_uses_with(inst, repl);
            func.erase(inst);
        } else {
            let ValueKind::Store { value, .. } = &func.value(inst).kind else { unreachable!() };
            current.insert(alloca, *value);
            func.erase(inst);
        }
    }

    for succ in func.block(block).succs.clone() {
        for p in promos {
            if let Some(&phi) = p.phis.get(&succ) {
                let val = *current.get(&p.alloca).unwrap_or(&undef);
                func.add_phi_incoming(phi, val, block);
            }
        }
    }

    for child in func.block(block).idom_children.clone() {
        rename(func, child, current, promos);
    }

    *current = snapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotes_scalar_across_branch() {
        let mut f = Function::new("f", false, vec![]);
        let then_bb = f.new_block("then");
        let else_bb = f.new_block("else");
        let end_bb = f.new_block("end");

        let addr = f.push_inst(f.entry, ValueKind::Alloca { size: 1 });
        let one = f.const_value(1);
        let zero = f.const_value(0);
        let undef = f.undef();
        f.push_inst(f.entry, ValueKind::Branch { cond: one, if_true: then_bb, if_false: else_bb });

        f.push_inst(then_bb, ValueKind::Store { lhs_sym: dummy_decl(), addr, value: one, mem_token: undef });
        f.push_inst(then_bb, ValueKind::Jump { target: end_bb });

        f.push_inst(else_bb, ValueKind::Store { lhs_sym: dummy_decl(), addr, value: zero, mem_token: undef });
        f.push_inst(else_bb, ValueKind::Jump { target: end_bb });

        let load = f.push_inst(end_bb, ValueKind::Load { lhs_sym: dummy_decl(), addr, mem_token: undef });
        f.push_inst(end_bb, ValueKind::Return { value: Some(load) });
        f.recompute_preds();

        let stats = promote_allocas(&mut f);
        assert_eq!(stats.promoted, 1);
        assert_eq!(stats.phis_inserted, 1);

        // the Load in end_bb must have been replaced by a phi, not remain a Load.
        let term = f.terminator(end_bb).unwrap();
        let ValueKind::Return { value: Some(v) } = f.value(term).kind else { panic!("expected return") };
        assert!(matches!(f.value(v).kind, ValueKind::Phi { .. }));
    }

    fn dummy_decl() -> std::rc::Rc<crate::ast::Decl> {
        std::rc::Rc::new(crate::ast::Decl {
            is_const: false,
            is_glob: false,
            has_init: false,
            name: "x".to_string(),
            dims: vec![],
            init: None,
            flatten_init: vec![],
        })
    }
}
