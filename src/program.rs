use tracing::debug;

use crate::error::{Error, Loc, Result};
use crate::lexer::tokenize;
use crate::opcode::{decode, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub op: Opcode,
    pub loc: Loc,
}

/// A decoded program. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    instrs: Vec<Instr>,
}

impl Program {
    pub fn parse(src: &str) -> Result<Self> {
        let instrs = tokenize(src)
            .into_iter()
            .map(|tok| {
                decode(tok.text)
                    .map(|op| Instr { op, loc: tok.loc })
                    .map_err(|source| Error::Syntax {
                        loc: tok.loc,
                        source,
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(ops = instrs.len(), "decoded program");
        Ok(Self { instrs })
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn ops(&self) -> impl Iterator<Item = Opcode> + '_ {
        self.instrs.iter().map(|i| i.op)
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}
