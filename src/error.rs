//! Error taxonomy shared by the decoder, resolver and both backends.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::resolver::BlockKind;
use crate::toolchain::BuildError;

pub type Result<T> = std::result::Result<T, Error>;

/// 1-based position of a token in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Loc {
    pub line: usize,
    pub col: usize,
}

impl Loc {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("invalid token `{0}`")]
    UnknownToken(String),

    #[error("integer literal `{0}` does not fit in 64 bits")]
    IntegerOutOfRange(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("{loc}: `else` without an open `if` block")]
    UnmatchedElse { loc: Loc },

    #[error("{loc}: `end` without an open block")]
    UnmatchedEnd { loc: Loc },

    #[error("{loc}: `else` can only split an `if` block, but the innermost block is `{kind}` opened at {opened_at}")]
    ElseWithoutIf {
        loc: Loc,
        kind: BlockKind,
        opened_at: Loc,
    },

    #[error("{loc}: `do` must follow a `while`")]
    DoWithoutWhile { loc: Loc },

    #[error("unterminated conditional: {count} block(s) still open, innermost `{kind}` opened at {opened_at}")]
    Unterminated {
        count: usize,
        kind: BlockKind,
        opened_at: Loc,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeFault {
    #[error("{loc}: stack underflow in `{op}`: needs {needed} value(s), stack holds {available}")]
    StackUnderflow {
        op: &'static str,
        needed: usize,
        available: usize,
        loc: Loc,
    },

    #[error("{loc}: stack overflow in `{op}`: capacity is {capacity} value(s)")]
    StackOverflow {
        op: &'static str,
        capacity: usize,
        loc: Loc,
    },

    #[error("{loc}: division by zero in `{op}`")]
    DivisionByZero { op: &'static str, loc: Loc },

    #[error("{loc}: quotient of `{op}` overflows 64 bits")]
    DivisionOverflow { op: &'static str, loc: Loc },

    #[error("{loc}: `{op}` at address {addr} is outside the {capacity}-byte memory region")]
    MemoryOutOfBounds {
        op: &'static str,
        addr: i64,
        capacity: usize,
        loc: Loc,
    },

    #[error("{loc}: unsupported system call {number} via `{op}`")]
    UnsupportedSyscall {
        op: &'static str,
        number: i64,
        loc: Loc,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{loc}: syntax error: {source}")]
    Syntax {
        loc: Loc,
        #[source]
        source: SyntaxError,
    },

    #[error("structural error: {0}")]
    Structural(#[from] StructuralError),

    #[error("runtime fault: {0}")]
    Runtime(#[from] RuntimeFault),

    #[error("i/o error on `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output error: {0}")]
    Output(#[source] std::io::Error),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_reports_location_and_token() {
        let err = Error::Syntax {
            loc: Loc::new(3, 7),
            source: SyntaxError::UnknownToken("frob".into()),
        };
        assert_eq!(err.to_string(), "3:7: syntax error: invalid token `frob`");
    }

    #[test]
    fn unterminated_reports_count() {
        let err = StructuralError::Unterminated {
            count: 2,
            kind: BlockKind::Else,
            opened_at: Loc::new(1, 9),
        };
        assert!(err.to_string().contains("2 block(s) still open"));
        assert!(err.to_string().contains("`else` opened at 1:9"));
    }
}
