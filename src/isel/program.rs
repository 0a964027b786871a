//! Whole-program instruction selection (spec.md §4.7): lowers every function and
//! flattens global declarations into the `.data`/`.bss`-shaped `GlobalDatum` list
//! `emit` consumes directly.

use crate::ir::Program;
use crate::isel::divconst::DivConstConfig;
use crate::isel::select::select_function;
use crate::mach::{GlobalDatum, MachineProgram};

pub fn select_program(program: &Program, cfg: &DivConstConfig) -> MachineProgram {
    let mut mp = MachineProgram::new();
    for decl in &program.globals {
        let len = decl.total_elements().max(1) as usize;
        let mut values = decl.flatten_init.clone();
        values.resize(len, 0);
        mp.globals.push(GlobalDatum { name: decl.name.clone(), is_const: decl.is_const, values });
    }
    for func in &program.functions {
        mp.functions.push(select_function(func, cfg));
    }
    mp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Decl;
    use crate::ir::Function;
    use std::rc::Rc;

    #[test]
    fn zero_initialized_global_gets_padded_with_zeros() {
        let mut program = Program::new();
        program.globals.push(Rc::new(Decl {
            is_const: false,
            is_glob: true,
            has_init: false,
            name: "counter".into(),
            dims: vec![],
            init: None,
            flatten_init: vec![],
        }));
        program.functions.push(Function::new("main", false, vec![]));

        let mp = select_program(&program, &DivConstConfig::default());
        assert_eq!(mp.globals.len(), 1);
        assert_eq!(mp.globals[0].values, vec![0]);
        assert_eq!(mp.functions.len(), 1);
    }
}
