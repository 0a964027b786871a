//! Loop unrolling by factor 2 (spec.md §4.6): a loop qualifies when it is exactly two
//! blocks (header + body), the header closes with a single induction phi, the branch
//! guarding the loop compares that phi against a loop-invariant bound, and the body is
//! small and free of calls/allocas. The unrolled form runs the body once, re-checks the
//! loop condition against the post-body induction value, and only then decides whether
//! to run a second, peeled copy before returning to the header — the "guarding `if`
//! around the peeled copy" spec.md calls for.

use std::collections::HashMap;

use crate::analysis::cfg;
use crate::analysis::loops;
use crate::ir::{BinOp, BlockId, Function, ValueId, ValueKind};
use crate::passes::clone::{remap, remap_kind};

const MAX_BODY_INSTS: usize = 16;

pub fn run(func: &mut Function) -> usize {
    cfg::compute_dominance(func);
    let info = loops::analyze_loops(func);

    let mut unrolled = 0;
    for lp in &info.loops {
        if lp.blocks.len() != 2 || !func.block(lp.header).mem_phis.is_empty() {
            continue;
        }
        let body = *lp.blocks.iter().find(|&&b| b != lp.header).unwrap();
        if try_unroll(func, lp.header, body) {
            unrolled += 1;
        }
    }
    unrolled
}

fn try_unroll(func: &mut Function, header: BlockId, body: BlockId) -> bool {
    let Some(shape) = match_shape(func, header, body) else { return false };

    let body2 = func.new_block(format!("{}.unroll2", func.block(body).name));

    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    value_map.insert(shape.phi, shape.latch_value);

    let body_insts = func.block(body).insts.clone();
    for &id in &body_insts[..body_insts.len() - 1] {
        let placeholder = func.new_value(ValueKind::Undef, Some(body2));
        func.block_mut(body2).insts.push(placeholder);
        value_map.insert(id, placeholder);
    }
    for &id in &body_insts[..body_insts.len() - 1] {
        let new_kind = remap_kind(&func.value(id).kind, &value_map, &HashMap::new(), header);
        func.value_mut(value_map[&id]).kind = new_kind;
    }
    for &id in &body_insts[..body_insts.len() - 1] {
        let cloned_id = value_map[&id];
        for operand in func.value(cloned_id).kind.operands() {
            let uses = &mut func.value_mut(operand).uses;
            if !uses.contains(&cloned_id) {
                uses.push(cloned_id);
            }
        }
    }
    let latch_value2 = remap(&value_map, shape.latch_value);
    let body2_term = func.new_value(ValueKind::Jump { target: header }, Some(body2));
    func.block_mut(body2).insts.push(body2_term);

    // `new_value` registers uses against the kind it's given at construction, so
    // `cond2` and `branch` below need no manual use-list bookkeeping (unlike the
    // clone loop above, which allocates `Undef` placeholders before filling them in).
    let cond2_other = remap(&value_map, shape.other_operand);
    let cond2 = if shape.phi_is_lhs {
        func.new_value(ValueKind::Binary { op: shape.cmp_op, lhs: shape.latch_value, rhs: cond2_other }, Some(body))
    } else {
        func.new_value(ValueKind::Binary { op: shape.cmp_op, lhs: cond2_other, rhs: shape.latch_value }, Some(body))
    };

    let body_term = *body_insts.last().unwrap();
    func.erase(body_term);
    let branch = func.new_value(ValueKind::Branch { cond: cond2, if_true: body2, if_false: header }, Some(body));
    func.block_mut(body).insts.push(branch);

    func.add_phi_incoming(shape.phi, latch_value2, body2);
    func.recompute_preds();
    true
}

struct LoopShape {
    phi: ValueId,
    latch_value: ValueId,
    cmp_op: BinOp,
    other_operand: ValueId,
    phi_is_lhs: bool,
}

fn match_shape(func: &Function, header: BlockId, body: BlockId) -> Option<LoopShape> {
    let phis: Vec<ValueId> = func.block(header).insts.iter().copied().take_while(|id| func.value(*id).kind.is_phi()).collect();
    if phis.len() != 1 {
        return None;
    }
    let phi = phis[0];

    let ValueKind::Phi { incomings } = &func.value(phi).kind else { return None };
    if incomings.len() != 2 {
        return None;
    }
    let latch_value = incomings.iter().find(|(_, from)| *from == body).map(|(v, _)| *v)?;

    let term = func.terminator(header)?;
    let ValueKind::Branch { cond, if_true, if_false } = &func.value(term).kind else { return None };
    if *if_true != body && *if_false != body {
        return None;
    }

    let ValueKind::Binary { op, lhs, rhs } = &func.value(*cond).kind else { return None };
    if !matches!(op, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne) {
        return None;
    }
    let (phi_is_lhs, other_operand) = if *lhs == phi {
        (true, *rhs)
    } else if *rhs == phi {
        (false, *lhs)
    } else {
        return None;
    };
    if func.value(other_operand).block == Some(header) || func.value(other_operand).block == Some(body) {
        return None;
    }

    let body_insts = &func.block(body).insts;
    if body_insts.len() >= MAX_BODY_INSTS + 1 {
        return None;
    }
    let Some((&term_id, rest)) = body_insts.split_last() else { return None };
    if !matches!(func.value(term_id).kind, ValueKind::Jump { target } if target == header) {
        return None;
    }
    if rest.iter().any(|&id| matches!(func.value(id).kind, ValueKind::Call { .. } | ValueKind::Alloca { .. })) {
        return None;
    }

    Some(LoopShape { phi, latch_value, cmp_op: *op, other_operand, phi_is_lhs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrolls_simple_counting_loop() {
        let mut f = Function::new("f", true, vec![]);
        let header = f.new_block("header");
        let body = f.new_block("body");
        let end = f.new_block("end");

        let zero = f.const_value(0);
        f.push_inst(f.entry, ValueKind::Jump { target: header });

        let phi = f.new_value(ValueKind::Phi { incomings: vec![] }, Some(header));
        f.prepend_phi(header, phi);
        let bound = f.const_value(1000);
        let cond = f.push_inst(header, ValueKind::Binary { op: BinOp::Lt, lhs: phi, rhs: bound });
        f.push_inst(header, ValueKind::Branch { cond, if_true: body, if_false: end });

        let one = f.const_value(1);
        let next = f.push_inst(body, ValueKind::Binary { op: BinOp::Add, lhs: phi, rhs: one });
        f.push_inst(body, ValueKind::Jump { target: header });

        f.add_phi_incoming(phi, zero, f.entry);
        f.add_phi_incoming(phi, next, body);
        f.push_inst(end, ValueKind::Return { value: None });
        f.recompute_preds();

        let unrolled = run(&mut f);
        assert_eq!(unrolled, 1);
        let term = f.terminator(body).unwrap();
        assert!(matches!(f.value(term).kind, ValueKind::Branch { .. }));
    }
}
