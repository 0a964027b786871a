//! remove-unused-function (spec.md §4.6): drop every function that is neither `main`
//! nor reachable from `main` through the call graph. Builtins have no `Function` entry
//! of their own, so this only ever prunes user-defined helpers.

use crate::analysis::callgraph::CallGraph;
use crate::ir::Program;

pub fn run(program: &mut Program) -> usize {
    let cg = CallGraph::build(program);
    let called = cg.called_functions();
    let before = program.functions.len();
    program.functions.retain(|f| f.name == "main" || called.contains(f.name.as_str()));
    before - program.functions.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, ValueKind};

    #[test]
    fn drops_function_never_called() {
        let mut program = Program::new();
        let mut main = Function::new("main", true, vec![]);
        main.push_inst(main.entry, ValueKind::Return { value: None });
        program.functions.push(main);

        let mut dead = Function::new("helper", true, vec![]);
        dead.push_inst(dead.entry, ValueKind::Return { value: None });
        program.functions.push(dead);

        let removed = run(&mut program);
        assert_eq!(removed, 1);
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name, "main");
    }
}
