//! Fixed optimization pipeline (spec.md §2/§4.6), gated by `-O LEVEL`. Ordering is not
//! negotiable: mem2reg needs dominance; memdep needs a fresh mem2reg; GVN needs a fresh
//! memdep; GCM needs a fresh DCE and a fresh memdep recomputation. `LEVEL == 0` still
//! runs mem2reg/memdep/bbopt/a baseline DCE sweep — those aren't "optimizations" so much
//! as the mandatory SSA-construction cleanup every level needs to produce valid IR.

use crate::analysis::cfg;
use crate::ir::{Function, Program};
use crate::passes::{bbopt, dce, dse, gcm, gvn, inline, mark_const, mem2reg, memdep, remove_identical_branch, remove_unused_function, unroll};

#[derive(Debug, Default, Clone, Copy)]
pub struct PipelineStats {
    pub dce_removed: usize,
    pub inlined: usize,
    pub unrolled: usize,
    pub functions_removed: usize,
}

pub fn run(program: &mut Program, opt_level: u32) -> PipelineStats {
    let mut stats = PipelineStats::default();

    for func in &mut program.functions {
        run_mandatory(func, &mut stats);
    }

    if opt_level > 0 {
        let inline_stats = inline::run(program);
        stats.inlined = inline_stats.call_sites_inlined;

        for func in &mut program.functions {
            run_mandatory(func, &mut stats);
            stats.unrolled += unroll::run(func);
            run_mandatory(func, &mut stats);

            stats.dce_removed += dse::run(func);
            remove_identical_branch::run(func);
            bbopt::run(func);

            memdep::run(func);
            gvn::run(func);
            stats.dce_removed += dce::run(func).values_removed;
            memdep::run(func);
            gcm::run(func);
        }

        mark_const::run(program);
        stats.functions_removed = remove_unused_function::run(program);
    }

    for func in &mut program.functions {
        func.validate();
    }
    stats
}

/// `mem2reg` -> `memdep` -> `bbopt` -> `dce`, the baseline every level runs to turn
/// alloca'd locals into SSA values and clean up the CFG memdep/GVN/GCM rely on.
fn run_mandatory(func: &mut Function, stats: &mut PipelineStats) {
    cfg::compute_dominance(func);
    mem2reg::promote_allocas(func);
    memdep::run(func);
    bbopt::run(func);
    stats.dce_removed += dce::run(func).values_removed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, ValueKind};

    #[test]
    fn level_zero_still_promotes_allocas() {
        let mut program = Program::new();
        let mut f = Function::new("main", false, vec![]);
        let size = f.push_inst(f.entry, ValueKind::Alloca { size: 1 });
        let _ = size;
        let c = f.const_value(5);
        f.push_inst(f.entry, ValueKind::Return { value: Some(c) });
        program.functions.push(f);

        run(&mut program, 0);
        assert_eq!(program.functions.len(), 1);
    }

    #[test]
    fn level_one_folds_constant_arithmetic() {
        let mut program = Program::new();
        let mut f = Function::new("main", false, vec![]);
        let a = f.const_value(3);
        let b = f.const_value(4);
        let sum = f.push_inst(f.entry, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b });
        f.push_inst(f.entry, ValueKind::Return { value: Some(sum) });
        program.functions.push(f);

        run(&mut program, 1);
        let main = program.function("main").unwrap();
        let term = main.terminator(main.entry).unwrap();
        let ValueKind::Return { value: Some(v) } = &main.value(term).kind else { panic!() };
        assert!(matches!(main.value(*v).kind, ValueKind::Const(7)));
    }
}
