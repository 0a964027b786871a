//! A tiny S-expression reader for `ast::Program` (spec.md §6's CLI driver wiring):
//! since a real C-subset lexer/parser/type-checker is out of scope for this crate
//! (see `ast`'s module doc), the CLI binary and integration tests both need *some*
//! concrete textual format to drive the pipeline end to end. This is a direct textual
//! encoding of `ast::Program`'s own shape, not an attempt at SysY syntax — every
//! dimension/initializer is written exactly as the real frontend would have already
//! resolved it (folded constants, explicit array sizes), matching the guarantees
//! `ast` documents its input already satisfies.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{self, BinOp, Decl, Expr, FuncDecl, InitItem, Item, Program, Stmt, UnOp, ValueKind};
use crate::error::CompileError;

pub fn parse_program(src: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(src);
    let mut pos = 0;
    let top = parse_sexpr(&tokens, &mut pos).map_err(CompileError::Parse)?;
    if pos != tokens.len() {
        return Err(CompileError::Parse("trailing tokens after top-level form".into()));
    }
    let items = as_list(&top, "program")?;
    let mut ctx = Ctx { vars: HashMap::new(), funcs: HashMap::new() };
    let mut program = Program::default();
    for item in items.iter().skip(1) {
        program.items.push(ctx.parse_item(item)?);
    }
    Ok(program)
}

#[derive(Debug)]
enum Sexpr {
    Atom(String),
    List(Vec<Sexpr>),
}
use Sexpr::List;

fn tokenize(src: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in src.chars() {
        match c {
            '(' | ')' => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
                out.push(c.to_string());
            }
            c if c.is_whitespace() => {
                if !cur.is_empty() {
                    out.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_sexpr(tokens: &[String], pos: &mut usize) -> Result<Sexpr, String> {
    let tok = tokens.get(*pos).ok_or("unexpected end of input")?;
    if tok == "(" {
        *pos += 1;
        let mut items = Vec::new();
        loop {
            match tokens.get(*pos) {
                Some(t) if t == ")" => {
                    *pos += 1;
                    return Ok(List(items));
                }
                Some(_) => items.push(parse_sexpr(tokens, pos)?),
                None => return Err("unterminated list".into()),
            }
        }
    } else if tok == ")" {
        Err("unexpected ')'".into())
    } else {
        *pos += 1;
        Ok(Sexpr::Atom(tok.clone()))
    }
}

fn as_list<'a>(s: &'a Sexpr, what: &str) -> Result<&'a [Sexpr], CompileError> {
    match s {
        List(items) => Ok(items),
        Sexpr::Atom(a) => Err(CompileError::Parse(format!("expected a ({what} ...) form, found atom `{a}`"))),
    }
}

fn head(items: &[Sexpr]) -> Result<&str, CompileError> {
    match items.first() {
        Some(Sexpr::Atom(a)) => Ok(a.as_str()),
        _ => Err(CompileError::Parse("expected a leading form name".into())),
    }
}

fn atom(s: &Sexpr) -> Result<&str, CompileError> {
    match s {
        Sexpr::Atom(a) => Ok(a.as_str()),
        List(_) => Err(CompileError::Parse("expected an atom".into())),
    }
}

fn int_lit(s: &Sexpr) -> Result<i32, CompileError> {
    atom(s)?.parse().map_err(|_| CompileError::Parse(format!("expected an integer literal, found `{}`", atom(s).unwrap_or(""))))
}

fn nth<'a>(items: &'a [Sexpr], i: usize, form: &str) -> Result<&'a Sexpr, CompileError> {
    items.get(i).ok_or_else(|| CompileError::Parse(format!("`{form}` is missing an operand at position {i}")))
}

struct Ctx {
    vars: HashMap<String, Rc<Decl>>,
    funcs: HashMap<String, Rc<FuncDecl>>,
}

impl Ctx {
    fn parse_item(&mut self, s: &Sexpr) -> Result<Item, CompileError> {
        let items = as_list(s, "item")?;
        match head(items)? {
            "decl" | "const" | "arr" => {
                let decl = self.parse_decl(items, true)?;
                Ok(Item::Decl(decl))
            }
            "func" => Ok(Item::Func(self.parse_func(items)?)),
            other => Err(CompileError::Parse(format!("unknown top-level form `{other}`"))),
        }
    }

    /// `(decl int NAME [(init N)])`, `(const int NAME (init N))`, or
    /// `(arr int NAME SIZE [(init N0 N1 ...)])`.
    fn parse_decl(&mut self, items: &[Sexpr], is_glob: bool) -> Result<Rc<Decl>, CompileError> {
        let form = head(items)?;
        let is_const = form == "const";
        let is_arr = form == "arr";
        let min_len = if is_arr { 4 } else { 3 };
        if items.len() < min_len {
            return Err(CompileError::Parse(format!("`{form}` needs at least a type, a name{}", if is_arr { ", and a size" } else { "" })));
        }
        let name = atom(&items[2])?.to_string();

        let (dims, size, rest_start) = if is_arr {
            let size = int_lit(&items[3])?;
            (vec![Some(Expr::IntConst(size))], size.max(1) as usize, 4)
        } else {
            (vec![], 1, 3)
        };

        let mut has_init = false;
        let mut init = None;
        let mut flatten_init = vec![0; size];
        if let Some(init_form) = items.get(rest_start) {
            let init_items = as_list(init_form, "init")?;
            if head(init_items)? != "init" {
                return Err(CompileError::Parse("expected `(init ...)`".into()));
            }
            has_init = true;
            if is_arr {
                let values: Result<Vec<i32>, CompileError> = init_items[1..].iter().map(int_lit).collect();
                let mut values = values?;
                values.resize(size, 0);
                flatten_init = values.clone();
                init = Some(InitItem::List(values));
            } else {
                let v = int_lit(nth(init_items, 1, "init")?)?;
                flatten_init = vec![v];
                init = Some(InitItem::Scalar(Expr::IntConst(v)));
            }
        }

        let decl = Rc::new(Decl { is_const, is_glob, has_init, name: name.clone(), dims, init, flatten_init });
        self.vars.insert(name, decl.clone());
        Ok(decl)
    }

    /// `(func RET NAME (PARAMS...) BODY)`.
    fn parse_func(&mut self, items: &[Sexpr]) -> Result<Rc<FuncDecl>, CompileError> {
        if items.len() != 5 {
            return Err(CompileError::Parse("`func` needs a return type, name, param list, and body".into()));
        }
        let ret = match atom(&items[1])? {
            "int" => ValueKind::Int,
            "void" => ValueKind::Void,
            other => return Err(CompileError::Parse(format!("unknown return type `{other}`"))),
        };
        let name = atom(&items[2])?.to_string();

        let mut params = Vec::new();
        for p in as_list(&items[3], "params")? {
            let p_items = as_list(p, "param")?;
            let is_arr = head(p_items)? == "param-arr";
            let pname = atom(nth(p_items, 2, "param")?)?.to_string();
            let decl = Rc::new(Decl {
                is_const: false,
                is_glob: false,
                has_init: false,
                name: pname.clone(),
                dims: if is_arr { vec![None] } else { vec![] },
                init: None,
                flatten_init: vec![],
            });
            self.vars.insert(pname, decl.clone());
            params.push(decl);
        }

        let body = self.parse_block(&items[4])?;
        let func = Rc::new(FuncDecl { ret, name: name.clone(), params, body });
        self.funcs.insert(name, func.clone());
        Ok(func)
    }

    fn parse_block(&mut self, s: &Sexpr) -> Result<ast::Block, CompileError> {
        let items = as_list(s, "block")?;
        if head(items)? != "block" {
            return Err(CompileError::Parse("expected `(block ...)`".into()));
        }
        let mut stmts = Vec::new();
        for stmt in &items[1..] {
            stmts.push(self.parse_stmt(stmt)?);
        }
        Ok(ast::Block { stmts })
    }

    fn parse_stmt(&mut self, s: &Sexpr) -> Result<Stmt, CompileError> {
        let items = as_list(s, "stmt")?;
        match head(items)? {
            "decl" | "const" | "arr" => Ok(Stmt::Decl(vec![self.parse_decl(items, false)?])),
            "assign" => {
                let target = self.parse_expr(nth(items, 1, "assign")?)?;
                let value = self.parse_expr(nth(items, 2, "assign")?)?;
                Ok(Stmt::Assign { target, value })
            }
            "expr" => Ok(Stmt::ExprStmt(self.parse_expr(nth(items, 1, "expr")?)?)),
            "block" => Ok(Stmt::Block(self.parse_block(s)?)),
            "if" => {
                let cond = self.parse_expr(nth(items, 1, "if")?)?;
                let then_branch = self.parse_block(nth(items, 2, "if")?)?;
                let else_branch = items.get(3).map(|e| self.parse_block(e)).transpose()?;
                Ok(Stmt::If { cond, then_branch, else_branch })
            }
            "while" => {
                let cond = self.parse_expr(nth(items, 1, "while")?)?;
                let body = self.parse_block(nth(items, 2, "while")?)?;
                Ok(Stmt::While { cond, body })
            }
            "break" => Ok(Stmt::Break),
            "continue" => Ok(Stmt::Continue),
            "return" => Ok(Stmt::Return(items.get(1).map(|e| self.parse_expr(e)).transpose()?)),
            other => Err(CompileError::Parse(format!("unknown statement form `{other}`"))),
        }
    }

    fn parse_expr(&mut self, s: &Sexpr) -> Result<Expr, CompileError> {
        match s {
            Sexpr::Atom(a) => {
                if let Ok(v) = a.parse::<i32>() {
                    return Ok(Expr::IntConst(v));
                }
                let decl = self.vars.get(a).cloned().ok_or_else(|| CompileError::Parse(format!("undeclared name `{a}`")))?;
                Ok(Expr::Index { decl, indices: vec![] })
            }
            List(items) => {
                let op_name = head(items)?;
                if let Some(op) = binop(op_name) {
                    let lhs = Box::new(self.parse_expr(nth(items, 1, op_name)?)?);
                    let rhs = Box::new(self.parse_expr(nth(items, 2, op_name)?)?);
                    return Ok(Expr::Binary { op, lhs, rhs });
                }
                match op_name {
                    "-" if items.len() == 2 => Ok(Expr::Unary { op: UnOp::Neg, operand: Box::new(self.parse_expr(&items[1])?) }),
                    "!" => Ok(Expr::Unary { op: UnOp::Not, operand: Box::new(self.parse_expr(nth(items, 1, "!")?)?) }),
                    "call" => {
                        let name = atom(nth(items, 1, "call")?)?;
                        let callee = self.funcs.get(name).cloned().ok_or_else(|| CompileError::Parse(format!("undeclared function `{name}`")))?;
                        let args: Result<Vec<Expr>, CompileError> = items[2..].iter().map(|a| self.parse_expr(a)).collect();
                        Ok(Expr::Call { callee, args: args? })
                    }
                    "index" => {
                        let name = atom(nth(items, 1, "index")?)?;
                        let decl = self.vars.get(name).cloned().ok_or_else(|| CompileError::Parse(format!("undeclared name `{name}`")))?;
                        let indices: Result<Vec<Expr>, CompileError> = items[2..].iter().map(|a| self.parse_expr(a)).collect();
                        Ok(Expr::Index { decl, indices: indices? })
                    }
                    other => Err(CompileError::Parse(format!("unknown expression form `{other}`"))),
                }
            }
        }
    }
}

fn binop(name: &str) -> Option<BinOp> {
    Some(match name {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Mod,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_trivial_main_returning_a_constant() {
        let program = parse_program("(program (func int main () (block (return 42))))").expect("parse");
        assert_eq!(program.items.len(), 1);
        let Item::Func(f) = &program.items[0] else { panic!() };
        assert_eq!(f.name, "main");
        assert_eq!(f.body.stmts.len(), 1);
    }

    #[test]
    fn parses_a_global_array_with_an_initializer_list() {
        let program = parse_program(
            "(program (arr int table 3 (init 1 2 3)) (func void main () (block (return))))",
        )
        .expect("parse");
        let Item::Decl(d) = &program.items[0] else { panic!() };
        assert_eq!(d.flatten_init, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_a_call_to_an_undeclared_function() {
        let err = parse_program("(program (func int main () (block (return (call nope)))))").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
