//! tauc: a compiler and interpreter for a small concatenative stack language.
//!
//! Source text goes through three stages shared by both backends:
//!
//! 1. [`lexer`] splits it into located tokens,
//! 2. [`opcode::decode`] maps every token to an [`Opcode`],
//! 3. [`resolver::resolve`] matches `if`/`else`/`while`/`do`/`end` and
//!    assigns the jump labels.
//!
//! The resulting [`ResolvedProgram`] is then either lowered to NASM assembly
//! by the [`Emitter`] or executed directly by the [`Interpreter`].

pub mod backend;
pub mod config;
pub mod emit;
pub mod error;
pub mod interp;
pub mod lexer;
pub mod opcode;
pub mod program;
pub mod resolver;
pub mod toolchain;

use std::io::Write;

pub use backend::Backend;
pub use config::Config;
pub use emit::{Artifact, Emitter};
pub use error::{Error, Loc, Result, RuntimeFault, StructuralError, SyntaxError};
pub use interp::{Halt, Interpreter};
pub use opcode::Opcode;
pub use program::{Instr, Program};
pub use resolver::{resolve, ResolvedProgram};

/// Decodes and resolves `src`, stopping at the first error.
pub fn prepare(src: &str) -> Result<ResolvedProgram> {
    let program = Program::parse(src)?;
    Ok(resolve(program)?)
}

/// Translates `src` to an assembly artifact without touching the filesystem.
pub fn compile_source(src: &str, config: &Config) -> Result<Artifact> {
    let resolved = prepare(src)?;
    Emitter::new(config).execute(&resolved)
}

/// Runs `src` in the interpreter, writing program output to `out`.
pub fn interpret_source<W: Write>(src: &str, config: &Config, out: W) -> Result<(Halt, W)> {
    let resolved = prepare(src)?;
    let mut interp = Interpreter::new(config, out);
    let halt = interp.execute(&resolved)?;
    Ok((halt, interp.into_output()))
}
