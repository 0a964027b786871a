//! Command-line driver (spec.md §6): `compiler [-S] [-o OUTPUT] [-O LEVEL] INPUT`.
//! Thin wrapper around `sysyc::compile` — every real decision lives in the library.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use sysyc::error::CompileError;
use sysyc::isel::DivConstConfig;

/// Ahead-of-time SysY-subset-to-ARM compiler.
#[derive(Parser)]
#[command(name = "compiler")]
struct Cli {
    /// Accepted and ignored: assembly output is the only mode this driver produces.
    #[arg(short = 'S')]
    assembly: bool,

    /// Output path; stdout if omitted.
    #[arg(short = 'o', value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Optimization level; 0 disables the optional passes.
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u32,

    /// Print the optimized SSA IR instead of assembly (spec.md §10 supplement).
    #[arg(long = "emit-ir")]
    emit_ir: bool,

    /// Source file, in this crate's textual AST fixture format (see `sysyc::fixture`).
    input: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => Ok(()),
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{err}");
            std::process::exit(code);
        }
    }
}

fn run(cli: &Cli) -> Result<(), CompileError> {
    let src = fs::read_to_string(&cli.input)?;
    let program = sysyc::fixture::parse_program(&src)?;

    let output = if cli.emit_ir {
        sysyc::compile_to_ir(&program, cli.opt_level)?
    } else {
        sysyc::compile(&program, cli.opt_level, &DivConstConfig::default())?
    };

    match &cli.output {
        Some(path) => fs::write(path, output)?,
        None => print!("{output}"),
    }
    Ok(())
}
