//! AST -> SSA lowering, grounded in `seen_ir::generator::IRGenerator`'s
//! `GenerationContext` (register/label counters, break/continue label stacks),
//! adapted to emit arena `ValueId`s directly instead of a textual `Instruction` vector,
//! and to follow spec.md §4.1's lowering recipe exactly (alloca+store for scalars,
//! branch+phi for `&&`/`||`, GEP chains for indexing, loop rotation for `while`).

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{self, Decl};
use crate::error::{bug, CompileResult};
use crate::ir::value::{BinOp as IrBinOp, FuncRef, UnOp as IrUnOp};
use crate::ir::{BlockId, Function, Program, ValueId, ValueKind};

const PASS: &str = "ssa-builder";

/// Zero-initialized array local with more than this many literal-zero elements gets a
/// `memset` call instead of a store per element (spec.md §4.1).
const MEMSET_ZERO_THRESHOLD: usize = 10;

pub fn build_program(ast: &ast::Program) -> CompileResult<Program> {
    let mut program = Program::new();
    for item in &ast.items {
        match item {
            ast::Item::Decl(decl) => program.globals.push(decl.clone()),
            ast::Item::Func(func_decl) => {
                let func = build_function(func_decl)?;
                program.functions.push(func);
            }
        }
    }
    Ok(program)
}

fn build_function(ast_func: &ast::FuncDecl) -> CompileResult<Function> {
    let is_void = matches!(ast_func.ret, ast::ValueKind::Void);
    let mut func = Function::new(ast_func.name.clone(), is_void, ast_func.params.clone());
    let entry = func.entry;

    let mut b = FunctionBuilder { func: &mut func, cur: entry, loop_stack: Vec::new(), symbols: HashMap::new() };

    for (i, param) in ast_func.params.iter().enumerate() {
        let pref = b.func.param_ref(i as u32);
        if param.is_array() {
            b.symbols.insert(decl_key(param), pref);
        } else {
            let addr = b.func.push_inst(b.cur, ValueKind::Alloca { size: 1 });
            let undef = b.func.undef();
            b.func.push_inst(b.cur, ValueKind::Store { lhs_sym: param.clone(), addr, value: pref, mem_token: undef });
            b.symbols.insert(decl_key(param), addr);
        }
    }

    b.lower_block(&ast_func.body)?;

    if !b.terminated() {
        if is_void {
            b.func.push_inst(b.cur, ValueKind::Return { value: None });
        } else {
            let zero = b.func.const_value(0);
            b.func.push_inst(b.cur, ValueKind::Return { value: Some(zero) });
        }
    }

    func.recompute_preds();
    Ok(func)
}

fn decl_key(decl: &Rc<Decl>) -> usize {
    Rc::as_ptr(decl) as usize
}

struct FunctionBuilder<'a> {
    func: &'a mut Function,
    cur: BlockId,
    loop_stack: Vec<(BlockId, BlockId)>,
    symbols: HashMap<usize, ValueId>,
}

impl<'a> FunctionBuilder<'a> {
    fn terminated(&self) -> bool {
        matches!(self.func.block(self.cur).insts.last(), Some(id) if self.func.value(*id).kind.is_terminator())
    }

    fn new_block(&mut self, name: &str) -> BlockId {
        self.func.new_block(name)
    }

    fn jump_if_fallthrough(&mut self, target: BlockId) {
        if !self.terminated() {
            self.func.push_inst(self.cur, ValueKind::Jump { target });
        }
    }

    // -- statements --------------------------------------------------

    fn lower_block(&mut self, block: &ast::Block) -> CompileResult<()> {
        for stmt in &block.stmts {
            if self.terminated() {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> CompileResult<()> {
        match stmt {
            ast::Stmt::Assign { target, value } => {
                let v = self.lower_expr(value)?;
                let ast::Expr::Index { decl, indices } = target else {
                    bug!(PASS, "assignment target is not an index expression");
                };
                let addr = self.lower_index_addr(decl, indices)?;
                let mem_token = self.func.undef();
                self.func.push_inst(self.cur, ValueKind::Store { lhs_sym: decl.clone(), addr, value: v, mem_token });
                Ok(())
            }
            ast::Stmt::ExprStmt(e) => {
                self.lower_expr(e)?;
                Ok(())
            }
            ast::Stmt::Decl(decls) => {
                for d in decls {
                    self.lower_local_decl(d)?;
                }
                Ok(())
            }
            ast::Stmt::Block(b) => self.lower_block(b),
            ast::Stmt::If { cond, then_branch, else_branch } => self.lower_if(cond, then_branch, else_branch.as_ref()),
            ast::Stmt::While { cond, body } => self.lower_while(cond, body),
            ast::Stmt::Break => {
                let Some(&(_, break_target)) = self.loop_stack.last() else {
                    bug!(PASS, "break outside of a loop");
                };
                self.func.push_inst(self.cur, ValueKind::Jump { target: break_target });
                Ok(())
            }
            ast::Stmt::Continue => {
                let Some(&(continue_target, _)) = self.loop_stack.last() else {
                    bug!(PASS, "continue outside of a loop");
                };
                self.func.push_inst(self.cur, ValueKind::Jump { target: continue_target });
                Ok(())
            }
            ast::Stmt::Return(value) => {
                let v = match value {
                    Some(e) => Some(self.lower_expr(e)?),
                    None => None,
                };
                self.func.push_inst(self.cur, ValueKind::Return { value: v });
                Ok(())
            }
        }
    }

    fn lower_local_decl(&mut self, decl: &Rc<Decl>) -> CompileResult<()> {
        let size = decl.total_elements().max(1) as u32;
        let addr = self.func.push_inst(self.cur, ValueKind::Alloca { size });
        self.symbols.insert(decl_key(decl), addr);

        match &decl.init {
            None => {}
            Some(ast::InitItem::Scalar(e)) => {
                let v = self.lower_expr(e)?;
                let mem_token = self.func.undef();
                self.func.push_inst(self.cur, ValueKind::Store { lhs_sym: decl.clone(), addr, value: v, mem_token });
            }
            Some(ast::InitItem::List(values)) => {
                let zero_count = values.iter().filter(|v| **v == 0).count();
                if zero_count > MEMSET_ZERO_THRESHOLD {
                    self.emit_memset_zero(addr, values.len() as i32);
                    for (i, val) in values.iter().enumerate() {
                        if *val != 0 {
                            self.store_flat(decl, addr, i, *val);
                        }
                    }
                } else {
                    for (i, val) in values.iter().enumerate() {
                        self.store_flat(decl, addr, i, *val);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_memset_zero(&mut self, addr: ValueId, element_count: i32) {
        let memset = FuncRef { name: Rc::from("memset"), is_void: true, is_pure: false };
        let zero = self.func.const_value(0);
        let bytes = self.func.const_value(element_count * 4);
        self.func.push_inst(self.cur, ValueKind::Call { func: memset, args: vec![addr, zero, bytes] });
    }

    fn store_flat(&mut self, decl: &Rc<Decl>, base: ValueId, flat_index: usize, val: i32) {
        let idx = self.func.const_value(flat_index as i32);
        let gep = self.func.push_inst(
            self.cur,
            ValueKind::GetElementPtr { array: decl.clone(), base, index: idx, multiplier: 1 },
        );
        let v = self.func.const_value(val);
        let mem_token = self.func.undef();
        self.func.push_inst(self.cur, ValueKind::Store { lhs_sym: decl.clone(), addr: gep, value: v, mem_token });
    }

    fn lower_if(&mut self, cond: &ast::Expr, then_branch: &ast::Block, else_branch: Option<&ast::Block>) -> CompileResult<()> {
        let then_bb = self.new_block("if.then");
        let else_bb = else_branch.map(|_| self.new_block("if.else"));
        let end_bb = self.new_block("if.end");

        let cond_val = self.lower_expr(cond)?;
        self.func.push_inst(
            self.cur,
            ValueKind::Branch { cond: cond_val, if_true: then_bb, if_false: else_bb.unwrap_or(end_bb) },
        );

        self.cur = then_bb;
        self.lower_block(then_branch)?;
        self.jump_if_fallthrough(end_bb);

        if let (Some(else_bb), Some(else_branch)) = (else_bb, else_branch) {
            self.cur = else_bb;
            self.lower_block(else_branch)?;
            self.jump_if_fallthrough(end_bb);
        }

        self.cur = end_bb;
        Ok(())
    }

    /// `while` lowers to four blocks so the natural-loop detector sees a single back
    /// edge (spec.md §4.1): `pre_cond` guards entry, `body` is the loop header, and
    /// `second_cond` re-evaluates the condition at the bottom of the loop and is the
    /// sole predecessor feeding the back edge into `body`.
    fn lower_while(&mut self, cond: &ast::Expr, body: &ast::Block) -> CompileResult<()> {
        let pre_cond = self.new_block("while.cond");
        let body_bb = self.new_block("while.body");
        let second_cond = self.new_block("while.cond2");
        let end_bb = self.new_block("while.end");

        self.func.push_inst(self.cur, ValueKind::Jump { target: pre_cond });

        self.cur = pre_cond;
        let c1 = self.lower_expr(cond)?;
        self.func.push_inst(self.cur, ValueKind::Branch { cond: c1, if_true: body_bb, if_false: end_bb });

        self.loop_stack.push((second_cond, end_bb));
        self.cur = body_bb;
        self.lower_block(body)?;
        self.jump_if_fallthrough(second_cond);
        self.loop_stack.pop();

        self.cur = second_cond;
        let c2 = self.lower_expr(cond)?;
        self.func.push_inst(self.cur, ValueKind::Branch { cond: c2, if_true: body_bb, if_false: end_bb });

        self.cur = end_bb;
        Ok(())
    }

    // -- expressions --------------------------------------------------

    fn lower_expr(&mut self, expr: &ast::Expr) -> CompileResult<ValueId> {
        match expr {
            ast::Expr::IntConst(v) => Ok(self.func.const_value(*v)),
            ast::Expr::Binary { op: ast::BinOp::And, lhs, rhs } => self.lower_short_circuit(true, lhs, rhs),
            ast::Expr::Binary { op: ast::BinOp::Or, lhs, rhs } => self.lower_short_circuit(false, lhs, rhs),
            ast::Expr::Binary { op: ast::BinOp::Mod, lhs, rhs } => self.lower_mod(lhs, rhs),
            ast::Expr::Binary { op, lhs, rhs } => {
                let l = self.lower_expr(lhs)?;
                let r = self.lower_expr(rhs)?;
                let ir_op = lower_binop(*op);
                Ok(self.func.push_inst(self.cur, ValueKind::Binary { op: ir_op, lhs: l, rhs: r }))
            }
            ast::Expr::Unary { op, operand } => {
                let v = self.lower_expr(operand)?;
                let ir_op = match op {
                    ast::UnOp::Neg => IrUnOp::Neg,
                    ast::UnOp::Not => IrUnOp::Not,
                };
                Ok(self.func.push_inst(self.cur, ValueKind::Unary { op: ir_op, operand: v }))
            }
            ast::Expr::Call { callee, args } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.lower_expr(a)?);
                }
                let is_void = matches!(callee.ret, ast::ValueKind::Void);
                let func_ref = FuncRef { name: Rc::from(callee.name.as_str()), is_void, is_pure: false };
                Ok(self.func.push_inst(self.cur, ValueKind::Call { func: func_ref, args: arg_vals }))
            }
            ast::Expr::Index { decl, indices } => self.lower_index_read(decl, indices),
        }
    }

    /// `a % b` lowers to `a - b*(a/b)` (spec.md §4.1).
    fn lower_mod(&mut self, lhs: &ast::Expr, rhs: &ast::Expr) -> CompileResult<ValueId> {
        let a = self.lower_expr(lhs)?;
        let b = self.lower_expr(rhs)?;
        let div = self.func.push_inst(self.cur, ValueKind::Binary { op: IrBinOp::Div, lhs: a, rhs: b });
        let mul = self.func.push_inst(self.cur, ValueKind::Binary { op: IrBinOp::Mul, lhs: b, rhs: div });
        Ok(self.func.push_inst(self.cur, ValueKind::Binary { op: IrBinOp::Sub, lhs: a, rhs: mul }))
    }

    fn lower_short_circuit(&mut self, is_and: bool, lhs: &ast::Expr, rhs: &ast::Expr) -> CompileResult<ValueId> {
        let lhs_val = self.lower_expr(lhs)?;
        let lhs_block = self.cur;

        let rhs_bb = self.new_block(if is_and { "and.rhs" } else { "or.rhs" });
        let after_bb = self.new_block(if is_and { "and.end" } else { "or.end" });

        if is_and {
            self.func.push_inst(self.cur, ValueKind::Branch { cond: lhs_val, if_true: rhs_bb, if_false: after_bb });
        } else {
            let not_lhs = self.func.push_inst(self.cur, ValueKind::Unary { op: IrUnOp::Not, operand: lhs_val });
            self.func.push_inst(self.cur, ValueKind::Branch { cond: not_lhs, if_true: rhs_bb, if_false: after_bb });
        }

        self.cur = rhs_bb;
        let rhs_val = self.lower_expr(rhs)?;
        let rhs_final_block = self.cur;
        self.func.push_inst(self.cur, ValueKind::Jump { target: after_bb });

        self.cur = after_bb;
        let phi = self.func.new_value(
            ValueKind::Phi { incomings: vec![(lhs_val, lhs_block), (rhs_val, rhs_final_block)] },
            Some(after_bb),
        );
        self.func.prepend_phi(after_bb, phi);
        // register_uses happened in new_value from the operand list captured at
        // construction time, so no extra bookkeeping is needed here.
        Ok(phi)
    }

    fn symbol_addr(&mut self, decl: &Rc<Decl>) -> CompileResult<ValueId> {
        if let Some(id) = self.symbols.get(&decl_key(decl)) {
            return Ok(*id);
        }
        if decl.is_glob {
            let id = self.func.global_ref(decl.clone());
            self.symbols.insert(decl_key(decl), id);
            return Ok(id);
        }
        bug!(PASS, "reference to undeclared symbol {}", decl.name)
    }

    fn lower_index_read(&mut self, decl: &Rc<Decl>, indices: &[ast::Expr]) -> CompileResult<ValueId> {
        if decl.dims.is_empty() {
            let addr = self.symbol_addr(decl)?;
            let mem_token = self.func.undef();
            return Ok(self.func.push_inst(self.cur, ValueKind::Load { lhs_sym: decl.clone(), addr, mem_token }));
        }
        let mut addr = self.symbol_addr(decl)?;
        if indices.is_empty() {
            let idx0 = self.func.const_value(0);
            let mult = decl.stride_at(0);
            return Ok(self.func.push_inst(
                self.cur,
                ValueKind::GetElementPtr { array: decl.clone(), base: addr, index: idx0, multiplier: mult },
            ));
        }
        for (i, idx_expr) in indices.iter().enumerate() {
            let idx_val = self.lower_expr(idx_expr)?;
            let mult = decl.stride_at(i);
            addr = self.func.push_inst(
                self.cur,
                ValueKind::GetElementPtr { array: decl.clone(), base: addr, index: idx_val, multiplier: mult },
            );
        }
        if indices.len() == decl.dims.len() {
            let mem_token = self.func.undef();
            Ok(self.func.push_inst(self.cur, ValueKind::Load { lhs_sym: decl.clone(), addr, mem_token }))
        } else {
            Ok(addr)
        }
    }

    fn lower_index_addr(&mut self, decl: &Rc<Decl>, indices: &[ast::Expr]) -> CompileResult<ValueId> {
        if decl.dims.is_empty() {
            return self.symbol_addr(decl);
        }
        let mut addr = self.symbol_addr(decl)?;
        for (i, idx_expr) in indices.iter().enumerate() {
            let idx_val = self.lower_expr(idx_expr)?;
            let mult = decl.stride_at(i);
            addr = self.func.push_inst(
                self.cur,
                ValueKind::GetElementPtr { array: decl.clone(), base: addr, index: idx_val, multiplier: mult },
            );
        }
        Ok(addr)
    }
}

fn lower_binop(op: ast::BinOp) -> IrBinOp {
    match op {
        ast::BinOp::Add => IrBinOp::Add,
        ast::BinOp::Sub => IrBinOp::Sub,
        ast::BinOp::Mul => IrBinOp::Mul,
        ast::BinOp::Div => IrBinOp::Div,
        ast::BinOp::Mod => unreachable!("Mod is lowered specially"),
        ast::BinOp::Lt => IrBinOp::Lt,
        ast::BinOp::Le => IrBinOp::Le,
        ast::BinOp::Gt => IrBinOp::Gt,
        ast::BinOp::Ge => IrBinOp::Ge,
        ast::BinOp::Eq => IrBinOp::Eq,
        ast::BinOp::Ne => IrBinOp::Ne,
        ast::BinOp::And => unreachable!("And is lowered specially"),
        ast::BinOp::Or => unreachable!("Or is lowered specially"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, Block, Decl, Expr, FuncDecl, InitItem, Stmt};

    fn int_decl(name: &str) -> Rc<Decl> {
        Rc::new(Decl { is_const: false, is_glob: false, has_init: false, name: name.to_string(), dims: vec![], init: None, flatten_init: vec![] })
    }

    #[test]
    fn return_constant() {
        let func = FuncDecl {
            ret: ast::ValueKind::Int,
            name: "main".to_string(),
            params: vec![],
            body: Block { stmts: vec![Stmt::Return(Some(Expr::Binary {
                op: BinOp::Add,
                lhs: Box::new(Expr::IntConst(1)),
                rhs: Box::new(Expr::Binary { op: BinOp::Mul, lhs: Box::new(Expr::IntConst(2)), rhs: Box::new(Expr::IntConst(3)) }),
            }))] },
        };
        let f = build_function(&func).expect("builds");
        assert_eq!(f.block_count(), 1);
        let entry = f.entry;
        let term = f.terminator(entry).unwrap();
        assert!(matches!(f.value(term).kind, ValueKind::Return { value: Some(_) }));
    }

    #[test]
    fn while_loop_has_four_blocks() {
        let i = int_decl("i");
        let func = FuncDecl {
            ret: ast::ValueKind::Int,
            name: "main".to_string(),
            params: vec![],
            body: Block {
                stmts: vec![
                    Stmt::Decl(vec![Rc::new(Decl { has_init: true, init: Some(InitItem::Scalar(Expr::IntConst(0))), ..(*i).clone() })]),
                    Stmt::While {
                        cond: Expr::Binary { op: BinOp::Lt, lhs: Box::new(Expr::Index { decl: i.clone(), indices: vec![] }), rhs: Box::new(Expr::IntConst(10)) },
                        body: Block {
                            stmts: vec![Stmt::Assign {
                                target: Expr::Index { decl: i.clone(), indices: vec![] },
                                value: Expr::Binary { op: BinOp::Add, lhs: Box::new(Expr::Index { decl: i.clone(), indices: vec![] }), rhs: Box::new(Expr::IntConst(1)) },
                            }],
                        },
                    },
                    Stmt::Return(Some(Expr::IntConst(0))),
                ],
            },
        };
        let f = build_function(&func).expect("builds");
        // entry + pre_cond + body + second_cond + end == 5
        assert_eq!(f.block_count(), 5);
    }

    #[test]
    fn short_circuit_and_creates_phi() {
        let func = FuncDecl {
            ret: ast::ValueKind::Int,
            name: "main".to_string(),
            params: vec![],
            body: Block {
                stmts: vec![Stmt::Return(Some(Expr::Binary {
                    op: BinOp::And,
                    lhs: Box::new(Expr::IntConst(1)),
                    rhs: Box::new(Expr::IntConst(0)),
                }))],
            },
        };
        let f = build_function(&func).expect("builds");
        // entry, and.rhs, and.end
        assert_eq!(f.block_count(), 3);
    }
}
