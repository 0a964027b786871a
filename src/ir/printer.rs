//! A human-readable IR dump, grounded in `seen_ir::function::IRFunction`'s
//! `fmt::Display` impl. Used for `--emit-ir` and for eyeballing pass output in tests;
//! never parsed back in.

use std::fmt;

use crate::ir::function::Function;
use crate::ir::value::{BlockId, ValueId, ValueKind};

pub fn print_function(f: &mut fmt::Formatter<'_>, func: &Function) -> fmt::Result {
    write!(f, "fn {}(", func.name)?;
    for (i, p) in func.param_decls.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", p.name)?;
    }
    writeln!(f, ") -> {} {{", if func.is_void { "void" } else { "int" })?;
    for b in func.blocks() {
        print_block(f, func, b)?;
    }
    writeln!(f, "}}")
}

fn print_block(f: &mut fmt::Formatter<'_>, func: &Function, b: BlockId) -> fmt::Result {
    let block = func.block(b);
    writeln!(f, "{}:  ; preds = {:?}", block.name, block.preds)?;
    for id in &block.mem_phis {
        writeln!(f, "    {} = {}", id, format_kind(func, *id))?;
    }
    for id in &block.insts {
        writeln!(f, "    {} = {}", id, format_kind(func, *id))?;
    }
    Ok(())
}

fn format_kind(func: &Function, id: ValueId) -> String {
    match &func.value(id).kind {
        ValueKind::Const(v) => format!("const {v}"),
        ValueKind::Undef => "undef".to_string(),
        ValueKind::ParamRef { index } => format!("param {index}"),
        ValueKind::GlobalRef(d) => format!("global {}", d.name),
        ValueKind::Binary { op, lhs, rhs } => format!("{op} {lhs}, {rhs}"),
        ValueKind::Unary { op, operand } => format!("{}{}", if matches!(op, crate::ir::value::UnOp::Neg) { "neg " } else { "not " }, operand),
        ValueKind::Mv(v) => format!("mv {v}"),
        ValueKind::Alloca { size } => format!("alloca {size}"),
        ValueKind::GetElementPtr { array, base, index, multiplier } => {
            format!("gep {}[{index}]*{multiplier} + {base}", array.name)
        }
        ValueKind::Load { lhs_sym, addr, mem_token } => format!("load {} at {addr} ; mem {mem_token}", lhs_sym.name),
        ValueKind::Store { lhs_sym, addr, value, mem_token } => {
            format!("store {value} -> {} at {addr} ; mem {mem_token}", lhs_sym.name)
        }
        ValueKind::Phi { incomings } => {
            let parts: Vec<String> = incomings.iter().map(|(v, b)| format!("[{v}, {b}]")).collect();
            format!("phi {}", parts.join(", "))
        }
        ValueKind::MemPhi { incomings } => {
            let parts: Vec<String> = incomings.iter().map(|(v, b)| format!("[{v}, {b}]")).collect();
            format!("memphi {}", parts.join(", "))
        }
        ValueKind::MemOp { producer, load } => format!("memop {producer} -> {load}"),
        ValueKind::Call { func: callee, args } => {
            let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            format!("call {}({})", callee.name, parts.join(", "))
        }
        ValueKind::Jump { target } => format!("jump {target}"),
        ValueKind::Branch { cond, if_true, if_false } => format!("br {cond}, {if_true}, {if_false}"),
        ValueKind::Return { value } => match value {
            Some(v) => format!("ret {v}"),
            None => "ret void".to_string(),
        },
    }
}
