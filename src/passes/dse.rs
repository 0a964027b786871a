//! dead-store-elim (spec.md §4.6): a `Store` is dead if, before any aliasing load or
//! side-effecting call, another `Store` overwrites the same `(base, index)` pair
//! within the same block. `addr` is always a `GetElementPtr` (or a bare global/param
//! ref for a scalar), so two stores share a slot exactly when they share the same
//! `addr` value number — no separate alias query is needed here, unlike memdep, which
//! must relate *different* address computations to each other.

use std::collections::HashMap;

use crate::ir::{Function, ValueId, ValueKind};

pub fn run(func: &mut Function) -> usize {
    let mut removed = 0;
    for b in func.blocks().collect::<Vec<_>>() {
        // last_store[(base, index)] = the most recent Store instruction to that exact
        // (base value number, index value number) pair seen so far in this block.
        let mut last_store: HashMap<(ValueId, ValueId), ValueId> = HashMap::new();
        let mut dead = Vec::new();

        for &id in &func.block(b).insts.clone() {
            match &func.value(id).kind {
                ValueKind::Store { addr, .. } => {
                    let addr = *addr;
                    if let Some(&prev) = last_store.get(&(addr, addr)) {
                        dead.push(prev);
                    }
                    last_store.insert((addr, addr), id);
                }
                ValueKind::Load { addr, .. } => {
                    last_store.remove(&(*addr, *addr));
                }
                ValueKind::Call { func: f, .. } if !f.is_pure => {
                    last_store.clear();
                }
                _ => {}
            }
        }

        for id in dead {
            if func.value(id).uses.is_empty() {
                func.erase(id);
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Decl;
    use std::rc::Rc;

    fn decl() -> Rc<Decl> {
        Rc::new(Decl { is_const: false, is_glob: true, has_init: false, name: "g".to_string(), dims: vec![Some(crate::ast::Expr::IntConst(4))], init: None, flatten_init: vec![0; 4] })
    }

    #[test]
    fn second_store_to_same_slot_kills_first() {
        let g = decl();
        let mut f = Function::new("f", true, vec![]);
        let base = f.global_ref(g.clone());
        let idx = f.const_value(0);
        let gep = f.push_inst(f.entry, ValueKind::GetElementPtr { array: g.clone(), base, index: idx, multiplier: 1 });
        let v1 = f.const_value(1);
        let v2 = f.const_value(2);
        let undef = f.undef();
        let s1 = f.push_inst(f.entry, ValueKind::Store { lhs_sym: g.clone(), addr: gep, value: v1, mem_token: undef });
        f.push_inst(f.entry, ValueKind::Store { lhs_sym: g.clone(), addr: gep, value: v2, mem_token: undef });
        f.push_inst(f.entry, ValueKind::Return { value: None });

        let removed = run(&mut f);
        assert_eq!(removed, 1);
        assert!(matches!(f.value(s1).kind, ValueKind::Undef));
    }
}
