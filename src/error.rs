//! Crate-wide error type, grounded in `seen_ir::error::CodeGenError`'s use of
//! `thiserror` for per-stage variants. spec.md §7 distinguishes user-facing frontend
//! errors (exit codes 1-3) from internal compiler bugs (exit code 4); this enum
//! reserves variants for both even though this crate's own entry points only ever
//! produce `Io` and `Internal`, since the frontend stages are out of scope.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot open input: {0}")]
    Io(#[from] std::io::Error),

    /// Reserved for a future lexer/parser; exit code 2.
    #[error("parse error: {0}")]
    Parse(String),

    /// Reserved for a future type checker; exit code 3.
    #[error("type check error: {0}")]
    TypeCheck(String),

    /// An invariant the frontend is supposed to guarantee didn't hold, or a pass hit a
    /// state spec.md calls "cannot happen". Always a compiler bug, never user error.
    #[error("internal compiler error in {pass}: {message}")]
    Internal { pass: &'static str, message: String },
}

impl CompileError {
    pub fn internal(pass: &'static str, message: impl Into<String>) -> Self {
        CompileError::Internal { pass, message: message.into() }
    }

    /// Process exit code per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Io(_) => 1,
            CompileError::Parse(_) => 2,
            CompileError::TypeCheck(_) => 3,
            CompileError::Internal { .. } => 4,
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Raise an internal-compiler-error identifying the offending pass and construct, per
/// spec.md §7's "failure to encode an immediate ... all terminate compilation with a
/// diagnostic message identifying the pass and offending construct." Used in place of
/// `unwrap()`/`panic!` at pass boundaries that can observe a violated invariant.
macro_rules! bug {
    ($pass:expr, $($arg:tt)*) => {
        return Err($crate::error::CompileError::internal($pass, format!($($arg)*)))
    };
}

pub(crate) use bug;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(CompileError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).exit_code(), 1);
        assert_eq!(CompileError::Parse("x".into()).exit_code(), 2);
        assert_eq!(CompileError::TypeCheck("x".into()).exit_code(), 3);
        assert_eq!(CompileError::internal("isel", "bad").exit_code(), 4);
    }
}
