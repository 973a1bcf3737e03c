//! The seam both execution strategies plug into.
//!
//! A backend consumes a [`ResolvedProgram`]: the opcode sequence plus the
//! control action resolved for every block keyword. Label numbering and
//! block matching are settled before a backend sees the program, so the
//! emitter and the interpreter can never disagree about them.

use std::io::Write;

use crate::emit::{Artifact, Emitter};
use crate::error::Result;
use crate::interp::{Halt, Interpreter};
use crate::resolver::ResolvedProgram;

pub trait Backend {
    type Output;

    fn execute(&mut self, program: &ResolvedProgram) -> Result<Self::Output>;
}

impl Backend for Emitter {
    type Output = Artifact;

    fn execute(&mut self, program: &ResolvedProgram) -> Result<Artifact> {
        Ok(self.translate(program))
    }
}

impl<W: Write> Backend for Interpreter<W> {
    type Output = Halt;

    fn execute(&mut self, program: &ResolvedProgram) -> Result<Halt> {
        self.run(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::program::Program;
    use crate::resolver::resolve;

    fn drive<B: Backend>(backend: &mut B, src: &str) -> B::Output {
        let resolved = resolve(Program::parse(src).unwrap()).unwrap();
        backend.execute(&resolved).unwrap()
    }

    #[test]
    fn both_backends_accept_the_same_program() {
        let src = "1 if 10 else 20 end print";
        let config = Config::default();

        let artifact = drive(&mut Emitter::new(&config), src);
        assert!(artifact.text.contains("block_0:"));
        assert!(artifact.text.contains("block_1:"));

        let mut interp = Interpreter::new(&config, Vec::new());
        assert_eq!(drive(&mut interp, src), Halt::Finished);
        assert_eq!(interp.into_output(), b"10\n");
    }
}
