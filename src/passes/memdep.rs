//! Memory dependence (spec.md §4.4): two SSA-style constructions over synthetic
//! "memory" values, one per loaded symbol, so loads know their nearest dominating
//! writer and writers know which loads they feed. Grounded in the same IDF machinery
//! `mem2reg` uses; the teacher crate had no alias analysis at all, so the alias rules
//! below are new code written in its terse, rule-table style.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::analysis::cfg;
use crate::ast::Decl;
use crate::ir::{BlockId, Function, ValueId, ValueKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct MemDepStats {
    pub mem_phis_inserted: usize,
    pub mem_phis_removed: usize,
    pub mem_ops_inserted: usize,
}

/// Two array declarations may alias, following spec.md §4.4's rule table.
pub fn may_alias(a: &Decl, b: &Decl) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    match (a.is_glob, b.is_glob) {
        (false, false) => {
            // Two distinct non-global decls sharing a name are either the same
            // parameter seen through two call sites (should alias) or two distinct
            // locals that happen to share a name across non-overlapping scopes (should
            // not, per spec.md §4.4, but treating them as aliasing is a safe
            // over-approximation rather than a correctness bug).
            a.name == b.name
        }
        (false, true) | (true, false) => {
            let (param, glob) = if a.is_glob { (b, a) } else { (a, b) };
            dims_postfix_compatible(&param.dims, &glob.dims)
        }
        (true, true) => std::ptr::eq(a, b),
    }
}

fn dims_postfix_compatible(a: &[Option<crate::ast::Expr>], b: &[Option<crate::ast::Expr>]) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let offset = long.len() - short.len();
    short.iter().zip(&long[offset..]).all(|(x, y)| match (x, y) {
        (None, _) | (_, None) => true,
        (Some(x), Some(y)) => x.result() == y.result(),
    })
}

fn call_aliases(decl: &Decl, call_args: &[ValueId], func: &Function) -> bool {
    if decl.is_glob {
        return true;
    }
    if decl.dims.is_empty() {
        // a scalar local's address is never taken, so a call can't touch it.
        return false;
    }
    // parameter array: aliases a call if one of the call's args is a GEP into an
    // aliasing array (or the parameter's own address, passed straight through).
    call_args.iter().any(|&arg| gep_root_decl(func, arg).map(|d| may_alias(decl, &d)).unwrap_or(false))
}

fn gep_root_decl(func: &Function, mut v: ValueId) -> Option<Rc<Decl>> {
    loop {
        match &func.value(v).kind {
            ValueKind::GetElementPtr { array, .. } => return Some(array.clone()),
            ValueKind::GlobalRef(decl) => return Some(decl.clone()),
            ValueKind::ParamRef { .. } => return None,
            ValueKind::Mv(inner) => v = *inner,
            _ => return None,
        }
    }
}

struct Writer {
    block: BlockId,
    inst: ValueId,
}

/// Run both memdep passes over `func`, one memory-SSA chain per loaded symbol name
/// (spec.md §4.4 reads as one chain per loaded symbol, since `Load`/`Store` already
/// carry `lhs_sym` directly, populated by the builder).
pub fn run(func: &mut Function) -> MemDepStats {
    cfg::compute_dominance(func);
    let df = cfg::dominance_frontier(func);

    let mut stats = MemDepStats::default();

    // Group loads by the symbol they read; only array accesses need memory tokens
    // (mem2reg already eliminated every scalar load/store).
    let mut loads_by_symbol: HashMap<String, Vec<ValueId>> = HashMap::new();
    let mut all_insts: Vec<(BlockId, ValueId)> = Vec::new();
    for b in func.blocks() {
        for &id in &func.block(b).insts {
            all_insts.push((b, id));
        }
    }

    for &(_, id) in &all_insts {
        if let ValueKind::Load { lhs_sym, .. } = &func.value(id).kind {
            loads_by_symbol.entry(lhs_sym.name.clone()).or_default().push(id);
        }
    }

    for (_sym_name, loads) in loads_by_symbol {
        let decl = match &func.value(loads[0]).kind {
            ValueKind::Load { lhs_sym, .. } => lhs_sym.clone(),
            _ => unreachable!(),
        };

        let writers = collect_writers(func, &decl, &all_insts);
        if writers.is_empty() {
            continue;
        }
        let writer_blocks: HashSet<BlockId> = writers.iter().map(|w| w.block).collect();
        let phi_blocks = cfg::iterated_dominance_frontier(func, &df, &writer_blocks);

        let mut mem_phis: HashMap<BlockId, ValueId> = HashMap::new();
        for block in &phi_blocks {
            let phi = func.push_mem_phi(*block, ValueKind::MemPhi { incomings: vec![] });
            mem_phis.insert(*block, phi);
            stats.mem_phis_inserted += 1;
        }

        let writer_by_block: HashMap<BlockId, ValueId> = writers.iter().map(|w| (w.block, w.inst)).collect();
        let undef = func.undef();
        let mut current = undef;
        rename_tokens(func, func.entry, &decl, &writer_by_block, &mem_phis, &mut current);

        // Second pass: writer -> load MemOp edges, so later passes can see that
        // hoisting a load above the writer that feeds it is illegal.
        for &load in &loads {
            let token = match &func.value(load).kind {
                ValueKind::Load { mem_token, .. } => *mem_token,
                _ => continue,
            };
            if token == undef {
                continue;
            }
            if !matches!(func.value(token).kind, ValueKind::MemPhi { .. }) {
                func.new_value(ValueKind::MemOp { producer: token, load }, None);
                stats.mem_ops_inserted += 1;
            }
        }
    }

    stats.mem_phis_removed = remove_useless_mem_phis(func);
    stats
}

fn collect_writers(func: &Function, decl: &Decl, all_insts: &[(BlockId, ValueId)]) -> Vec<Writer> {
    let mut writers = Vec::new();
    for &(block, id) in all_insts {
        match &func.value(id).kind {
            ValueKind::Store { lhs_sym, .. } if may_alias(decl, lhs_sym) => {
                writers.push(Writer { block, inst: id });
            }
            ValueKind::Call { args, .. } if call_aliases(decl, args, func) => {
                writers.push(Writer { block, inst: id });
            }
            _ => {}
        }
    }
    writers
}

fn rename_tokens(
    func: &mut Function,
    block: BlockId,
    decl: &Decl,
    writer_by_block: &HashMap<BlockId, ValueId>,
    mem_phis: &HashMap<BlockId, ValueId>,
    current: &mut ValueId,
) {
    let snapshot = *current;

    if let Some(&phi) = mem_phis.get(&block) {
        *current = phi;
    }

    for &id in &func.block(block).insts.clone() {
        let is_matching_load = matches!(&func.value(id).kind, ValueKind::Load { lhs_sym, .. } if lhs_sym.name == decl.name);
        if is_matching_load {
            let old_token = current_token_placeholder(func, id);
            func.set_operand(id, old_token, *current);
        }
        if writer_by_block.get(&block) == Some(&id) {
            *current = id;
        }
    }

    for succ in func.block(block).succs.clone() {
        if let Some(&phi) = mem_phis.get(&succ) {
            func.add_phi_incoming(phi, *current, block);
        }
    }

    for child in func.block(block).idom_children.clone() {
        rename_tokens(func, child, decl, writer_by_block, mem_phis, current);
    }

    *current = snapshot;
}

/// `Load`'s current `mem_token` operand, read just before `set_operand` overwrites it.
fn current_token_placeholder(func: &Function, load: ValueId) -> ValueId {
    match &func.value(load).kind {
        ValueKind::Load { mem_token, .. } => *mem_token,
        _ => unreachable!(),
    }
}

/// A `MemPhi` is trivial when every incoming edge (ignoring self-references) names the
/// same value; it's then replaced by that value and erased. Runs to fixpoint since
/// erasing one phi can make another, that used it, trivial too (spec.md §4.4).
fn remove_useless_mem_phis(func: &mut Function) -> usize {
    let mut removed = 0;
    loop {
        let mut changed = false;
        let blocks: Vec<BlockId> = func.blocks().collect();
        'outer: for b in blocks {
            for &phi in &func.block(b).mem_phis.clone() {
                let distinct: HashSet<ValueId> = match &func.value(phi).kind {
                    ValueKind::MemPhi { incomings } => {
                        incomings.iter().map(|(v, _)| *v).filter(|v| *v != phi).collect()
                    }
                    _ => continue,
                };
                if distinct.len() > 1 {
                    continue;
                }
                let replacement = distinct.into_iter().next().unwrap_or_else(|| func.undef());
                func.replace_all_uses_with(phi, replacement);
                func.erase(phi);
                removed += 1;
                changed = true;
                continue 'outer;
            }
        }
        if !changed {
            break;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Decl;
    use std::rc::Rc;

    fn global_array(name: &str) -> Rc<Decl> {
        Rc::new(Decl {
            is_const: false,
            is_glob: true,
            has_init: false,
            name: name.to_string(),
            dims: vec![Some(crate::ast::Expr::IntConst(4))],
            init: None,
            flatten_init: vec![0, 0, 0, 0],
        })
    }

    #[test]
    fn load_after_store_gets_store_token() {
        let g = global_array("a");
        let mut f = Function::new("f", false, vec![]);
        let addr = f.global_ref(g.clone());
        let idx = f.const_value(0);
        let gep = f.push_inst(f.entry, ValueKind::GetElementPtr { array: g.clone(), base: addr, index: idx, multiplier: 1 });
        let val = f.const_value(7);
        let undef = f.undef();
        let store = f.push_inst(f.entry, ValueKind::Store { lhs_sym: g.clone(), addr: gep, value: val, mem_token: undef });
        let load = f.push_inst(f.entry, ValueKind::Load { lhs_sym: g.clone(), addr: gep, mem_token: undef });
        f.push_inst(f.entry, ValueKind::Return { value: Some(load) });
        f.recompute_preds();

        run(&mut f);

        let ValueKind::Load { mem_token, .. } = &f.value(load).kind else { panic!("not a load") };
        assert_eq!(*mem_token, store);
    }

    #[test]
    fn alias_rule_same_name_params() {
        let p1 = Rc::new(Decl { is_const: false, is_glob: false, has_init: false, name: "a".to_string(), dims: vec![None], init: None, flatten_init: vec![] });
        let p2 = Rc::new(Decl { is_const: false, is_glob: false, has_init: false, name: "a".to_string(), dims: vec![None], init: None, flatten_init: vec![] });
        let p3 = Rc::new(Decl { is_const: false, is_glob: false, has_init: false, name: "b".to_string(), dims: vec![None], init: None, flatten_init: vec![] });
        assert!(may_alias(&p1, &p2));
        assert!(!may_alias(&p1, &p3));
    }
}
