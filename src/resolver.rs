//! Block resolution for `if`/`else`/`end` and `while`/`do`/`end`.
//!
//! The language has no jump syntax. A [`BlockResolver`] walks the opcode
//! sequence with a LIFO stack of open blocks and mints a fresh label for
//! every jump target. Each block keyword resolves to one [`Control`] action
//! that both the emitter and the interpreter consume, so the two backends
//! cannot disagree about where a branch lands.

use std::fmt;

use tracing::{debug, trace};

use crate::error::{Loc, StructuralError};
use crate::opcode::Opcode;
use crate::program::Program;

pub type Label = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    If,
    Else,
    While,
    /// Loop body; `head` is the label defined at the matching `while`.
    Do { head: Label },
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::If => f.write_str("if"),
            BlockKind::Else => f.write_str("else"),
            BlockKind::While => f.write_str("while"),
            BlockKind::Do { .. } => f.write_str("do"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub label: Label,
    pub kind: BlockKind,
    pub opened_at: Loc,
}

/// What a block keyword lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Pop the condition; branch to `target` if it is zero.
    BranchIfZero { target: Label },
    /// Jump unconditionally to `target`, then define `define` here.
    Jump { target: Label, define: Label },
    /// Define `label` here.
    Define { label: Label },
}

impl Control {
    pub fn defined_label(&self) -> Option<Label> {
        match self {
            Control::BranchIfZero { .. } => None,
            Control::Jump { define, .. } => Some(*define),
            Control::Define { label } => Some(*label),
        }
    }
}

/// Per-run resolution state. Never shared between runs.
#[derive(Debug, Default)]
pub struct BlockResolver {
    blocks: Vec<BlockEntry>,
    next_label: Label,
}

impl BlockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_label(&mut self) -> Label {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn labels_minted(&self) -> u32 {
        self.next_label
    }

    pub fn open_blocks(&self) -> &[BlockEntry] {
        &self.blocks
    }

    pub fn begin_if(&mut self, loc: Loc) -> Control {
        let label = self.fresh_label();
        self.blocks.push(BlockEntry {
            label,
            kind: BlockKind::If,
            opened_at: loc,
        });
        trace!(label, %loc, "if");
        Control::BranchIfZero { target: label }
    }

    pub fn do_else(&mut self, loc: Loc) -> Result<Control, StructuralError> {
        let top = self
            .blocks
            .last()
            .copied()
            .ok_or(StructuralError::UnmatchedElse { loc })?;
        if top.kind != BlockKind::If {
            return Err(StructuralError::ElseWithoutIf {
                loc,
                kind: top.kind,
                opened_at: top.opened_at,
            });
        }
        self.blocks.pop();

        // close the true branch, open the false branch
        let end_label = self.fresh_label();
        self.blocks.push(BlockEntry {
            label: end_label,
            kind: BlockKind::Else,
            opened_at: loc,
        });
        trace!(else_label = top.label, end_label, %loc, "else");
        Ok(Control::Jump {
            target: end_label,
            define: top.label,
        })
    }

    pub fn begin_while(&mut self, loc: Loc) -> Control {
        let head = self.fresh_label();
        self.blocks.push(BlockEntry {
            label: head,
            kind: BlockKind::While,
            opened_at: loc,
        });
        trace!(head, %loc, "while");
        Control::Define { label: head }
    }

    pub fn begin_do(&mut self, loc: Loc) -> Result<Control, StructuralError> {
        let head = match self.blocks.last() {
            Some(BlockEntry {
                label,
                kind: BlockKind::While,
                ..
            }) => *label,
            _ => return Err(StructuralError::DoWithoutWhile { loc }),
        };
        let opened_at = self.blocks.pop().map(|b| b.opened_at).unwrap_or(loc);

        let exit = self.fresh_label();
        self.blocks.push(BlockEntry {
            label: exit,
            kind: BlockKind::Do { head },
            opened_at,
        });
        trace!(head, exit, %loc, "do");
        Ok(Control::BranchIfZero { target: exit })
    }

    pub fn end_block(&mut self, loc: Loc) -> Result<Control, StructuralError> {
        let entry = self
            .blocks
            .pop()
            .ok_or(StructuralError::UnmatchedEnd { loc })?;
        trace!(label = entry.label, kind = %entry.kind, %loc, "end");
        Ok(match entry.kind {
            BlockKind::If | BlockKind::Else | BlockKind::While => Control::Define {
                label: entry.label,
            },
            BlockKind::Do { head } => Control::Jump {
                target: head,
                define: entry.label,
            },
        })
    }

    /// Feeds one opcode; returns the control action for block keywords.
    pub fn step(&mut self, op: Opcode, loc: Loc) -> Result<Option<Control>, StructuralError> {
        Ok(match op {
            Opcode::If => Some(self.begin_if(loc)),
            Opcode::Else => Some(self.do_else(loc)?),
            Opcode::End => Some(self.end_block(loc)?),
            Opcode::While => Some(self.begin_while(loc)),
            Opcode::Do => Some(self.begin_do(loc)?),
            _ => None,
        })
    }

    /// Ends resolution; every opened block must have been closed.
    pub fn finish(self) -> Result<u32, StructuralError> {
        match self.blocks.last() {
            Some(innermost) => Err(StructuralError::Unterminated {
                count: self.blocks.len(),
                kind: innermost.kind,
                opened_at: innermost.opened_at,
            }),
            None => Ok(self.next_label),
        }
    }
}

/// A program together with its resolved control flow.
#[derive(Debug, Clone)]
pub struct ResolvedProgram {
    program: Program,
    controls: Vec<Option<Control>>,
    // label -> index of the first instruction after its definition point
    sites: Vec<usize>,
}

impl ResolvedProgram {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn control(&self, ip: usize) -> Option<Control> {
        self.controls.get(ip).copied().flatten()
    }

    pub fn label_count(&self) -> usize {
        self.sites.len()
    }

    /// Instruction index execution continues at after branching to `label`.
    ///
    /// Every label in a [`Control`] of this program has a site.
    pub(crate) fn site(&self, label: Label) -> usize {
        self.sites[label as usize]
    }
}

/// Runs a fresh [`BlockResolver`] over `program`.
pub fn resolve(program: Program) -> Result<ResolvedProgram, StructuralError> {
    let mut resolver = BlockResolver::new();
    let mut controls = Vec::with_capacity(program.len());
    let mut defined: Vec<(Label, usize)> = Vec::new();

    for (ip, instr) in program.instrs().iter().enumerate() {
        let control = resolver.step(instr.op, instr.loc)?;
        if let Some(label) = control.and_then(|c| c.defined_label()) {
            defined.push((label, ip + 1));
        }
        controls.push(control);
    }

    let labels = resolver.finish()?;
    let mut sites = vec![0usize; labels as usize];
    for (label, site) in defined {
        sites[label as usize] = site;
    }
    debug!(labels, "resolved blocks");

    Ok(ResolvedProgram {
        program,
        controls,
        sites,
    })
}
