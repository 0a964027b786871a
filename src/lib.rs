//! Ahead-of-time compiler from a small C-like language (spec.md §1) down to 32-bit
//! ARM assembly text. `compile` is the single entry point gluing every stage together
//! in spec.md §2's fixed order; the CLI binary (`src/bin/compiler.rs`) is a thin
//! wrapper around it.

pub mod analysis;
pub mod ast;
pub mod build;
pub mod emit;
pub mod error;
pub mod fixture;
pub mod ir;
pub mod isel;
pub mod mach;
pub mod passes;
pub mod post;
pub mod regalloc;

use error::CompileResult;
use isel::DivConstConfig;

/// One full run of the pipeline spec.md §2 lays out: SSA construction, the fixed
/// optimization pipeline gated by `opt_level`, instruction selection, register
/// allocation, post-allocation fixups, and assembly emission.
pub fn compile(program: &ast::Program, opt_level: u32, div_cfg: &DivConstConfig) -> CompileResult<String> {
    let mut ir_program = build::build_program(program)?;
    log::debug!("ssa-builder: lowered {} function(s)", ir_program.functions.len());

    let stats = passes::pass_manager::run(&mut ir_program, opt_level);
    log::debug!(
        "pass-manager: {} dce'd, {} inlined, {} unrolled, {} function(s) removed",
        stats.dce_removed,
        stats.inlined,
        stats.unrolled,
        stats.functions_removed
    );

    let mut machine_program = isel::select_program(&ir_program, div_cfg);
    log::debug!("isel: selected {} function(s)", machine_program.functions.len());

    regalloc::allocate_program(&mut machine_program);
    log::debug!("regalloc: allocated every function");

    post::run_post_passes(&mut machine_program);
    log::debug!("post: finalized stack frames");

    let asm = emit::emit_program(&machine_program)?;
    log::debug!("emit: produced {} bytes of assembly", asm.len());

    Ok(asm)
}

/// Same pipeline, stopping after the optimizer and returning the IR's text form
/// (spec.md §10's `--emit-ir`, grounded in the teacher's debug-dump convention).
pub fn compile_to_ir(program: &ast::Program, opt_level: u32) -> CompileResult<String> {
    let mut ir_program = build::build_program(program)?;
    passes::pass_manager::run(&mut ir_program, opt_level);
    Ok(ir_program.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn main_returning(n: i32) -> ast::Program {
        ast::Program {
            items: vec![ast::Item::Func(Rc::new(ast::FuncDecl {
                ret: ast::ValueKind::Int,
                name: "main".into(),
                params: vec![],
                body: ast::Block { stmts: vec![ast::Stmt::Return(Some(ast::Expr::IntConst(n)))] },
            }))],
        }
    }

    #[test]
    fn compiles_a_trivial_main_to_assembly_containing_its_label() {
        let asm = compile(&main_returning(42), 1, &DivConstConfig::default()).expect("compile");
        assert!(asm.contains("main:"));
        assert!(asm.contains("bx lr"));
    }

    #[test]
    fn emit_ir_roundtrips_without_panicking() {
        let ir_text = compile_to_ir(&main_returning(1), 0).expect("compile_to_ir");
        assert!(ir_text.contains("main"));
    }
}
