//! remove-identical-branch (spec.md §4.6): a `Branch` whose two targets are the same
//! block carries no information and is rewritten to an unconditional `Jump`; the
//! discarded `cond` operand is left for `dce` to clean up.

use crate::ir::{Function, ValueKind};

pub fn run(func: &mut Function) -> usize {
    let mut folded = 0;
    for b in func.blocks().collect::<Vec<_>>() {
        let Some(term) = func.terminator(b) else { continue };
        let target = match &func.value(term).kind {
            ValueKind::Branch { if_true, if_false, .. } if if_true == if_false => Some(*if_true),
            _ => None,
        };
        if let Some(target) = target {
            func.value_mut(term).kind = ValueKind::Jump { target };
            folded += 1;
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_to_same_block_becomes_jump() {
        let mut f = Function::new("f", true, vec![]);
        let end = f.new_block("end");
        let cond = f.const_value(1);
        f.push_inst(f.entry, ValueKind::Branch { cond, if_true: end, if_false: end });
        f.push_inst(end, ValueKind::Return { value: None });
        f.recompute_preds();

        let folded = run(&mut f);
        assert_eq!(folded, 1);
        let term = f.terminator(f.entry).unwrap();
        assert!(matches!(f.value(term).kind, ValueKind::Jump { target } if target == end));
    }
}
