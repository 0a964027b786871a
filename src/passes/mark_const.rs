//! mark-global-const (spec.md §4.6): a global with no `Store` anywhere and no
//! potentially-aliasing use in a side-effecting call is marked `const`, letting GVN
//! fold direct constant-index loads from it via `flatten_init`.

use crate::ir::{Function, Program, ValueId, ValueKind};
use crate::passes::memdep::may_alias;

pub fn run(program: &mut Program) -> usize {
    let mut marked = 0;
    let global_names: Vec<String> = program.globals.iter().map(|g| g.name.clone()).collect();

    for name in global_names {
        let is_written = program.functions.iter().any(|f| {
            f.blocks().any(|b| {
                f.block(b).insts.iter().any(|&id| match &f.value(id).kind {
                    ValueKind::Store { lhs_sym, .. } => lhs_sym.name == name,
                    ValueKind::Call { args, .. } => args.iter().any(|&a| call_arg_may_write(f, a, &name, program)),
                    _ => false,
                })
            })
        });
        if is_written {
            continue;
        }
        if let Some(g) = program.globals.iter().position(|g| g.name == name) {
            let decl = &program.globals[g];
            if !decl.is_const {
                let mut new_decl = (**decl).clone();
                new_decl.is_const = true;
                program.globals[g] = std::rc::Rc::new(new_decl);
                marked += 1;
            }
        }
    }
    marked
}

/// Whether passing `arg` (a GEP root) to an arbitrary callee could alias `name`: a
/// coarse but sound approximation since this crate has no interprocedural side-effect
/// summary (spec.md leaves that as an assumption, see the alias rules in §4.4).
fn call_arg_may_write(f: &Function, arg: ValueId, name: &str, program: &Program) -> bool {
    let root = match &f.value(arg).kind {
        ValueKind::GetElementPtr { array, .. } => array.clone(),
        ValueKind::GlobalRef(decl) => decl.clone(),
        _ => return false,
    };
    program.globals.iter().find(|g| g.name == name).map(|g| may_alias(g, &root)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Decl;
    use crate::ir::Function;
    use std::rc::Rc;

    #[test]
    fn marks_never_written_global_const() {
        let g = Rc::new(Decl { is_const: false, is_glob: true, has_init: false, name: "g".to_string(), dims: vec![], init: None, flatten_init: vec![0] });
        let mut program = Program::new();
        program.globals.push(g);
        program.functions.push(Function::new("f", true, vec![]));
        let marked = run(&mut program);
        assert_eq!(marked, 1);
        assert!(program.globals[0].is_const);
    }
}
