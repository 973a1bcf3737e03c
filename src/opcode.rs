//! The closed instruction set and the token decoder shared by both backends.

use std::fmt;

use crate::error::SyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Compare {
    /// Evaluates `lhs OP rhs`, where `rhs` was on top of the stack.
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Compare::Eq => lhs == rhs,
            Compare::Ne => lhs != rhs,
            Compare::Lt => lhs < rhs,
            Compare::Le => lhs <= rhs,
            Compare::Gt => lhs > rhs,
            Compare::Ge => lhs >= rhs,
        }
    }

    /// x86 condition-code suffix (`cmov<cc>`) for a signed comparison.
    pub fn condition_code(self) -> &'static str {
        match self {
            Compare::Eq => "e",
            Compare::Ne => "ne",
            Compare::Lt => "l",
            Compare::Le => "le",
            Compare::Gt => "g",
            Compare::Ge => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Push(i64),

    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,

    Compare(Compare),

    Dup,
    TwoDup,
    Swap,
    Over,
    Rot,
    Drop,

    Mem,
    Load8,
    Store8,
    Load64,
    Store64,

    /// Number of process arguments.
    Argc,
    /// Address of the argument pointer array.
    Argv,

    If,
    Else,
    End,
    While,
    Do,

    /// System call taking 0..=6 arguments.
    Syscall(u8),
    Print,
    Exit,
}

pub const MAX_SYSCALL_ARGS: u8 = 6;

const KEYWORDS: &[(&str, Opcode)] = &[
    ("+", Opcode::Add),
    ("-", Opcode::Sub),
    ("*", Opcode::Mul),
    ("/", Opcode::Div),
    ("%", Opcode::Mod),
    ("shl", Opcode::Shl),
    ("<<", Opcode::Shl),
    ("shr", Opcode::Shr),
    (">>", Opcode::Shr),
    ("and", Opcode::BitAnd),
    ("or", Opcode::BitOr),
    ("xor", Opcode::BitXor),
    ("not", Opcode::BitNot),
    ("=", Opcode::Compare(Compare::Eq)),
    ("!=", Opcode::Compare(Compare::Ne)),
    ("<", Opcode::Compare(Compare::Lt)),
    ("<=", Opcode::Compare(Compare::Le)),
    ("!>", Opcode::Compare(Compare::Le)),
    (">", Opcode::Compare(Compare::Gt)),
    (">=", Opcode::Compare(Compare::Ge)),
    ("!<", Opcode::Compare(Compare::Ge)),
    ("dup", Opcode::Dup),
    ("2dup", Opcode::TwoDup),
    ("swap", Opcode::Swap),
    ("over", Opcode::Over),
    ("rot", Opcode::Rot),
    ("drop", Opcode::Drop),
    ("mem", Opcode::Mem),
    (",", Opcode::Load8),
    ("load8", Opcode::Load8),
    (".", Opcode::Store8),
    ("store8", Opcode::Store8),
    (",64", Opcode::Load64),
    ("load64", Opcode::Load64),
    (".64", Opcode::Store64),
    ("store64", Opcode::Store64),
    ("argc", Opcode::Argc),
    ("argv", Opcode::Argv),
    ("if", Opcode::If),
    ("else", Opcode::Else),
    ("end", Opcode::End),
    ("while", Opcode::While),
    ("do", Opcode::Do),
    ("syscall0", Opcode::Syscall(0)),
    ("syscall1", Opcode::Syscall(1)),
    ("syscall2", Opcode::Syscall(2)),
    ("syscall3", Opcode::Syscall(3)),
    ("syscall4", Opcode::Syscall(4)),
    ("syscall5", Opcode::Syscall(5)),
    ("syscall6", Opcode::Syscall(6)),
    ("print", Opcode::Print),
    ("prn", Opcode::Print),
    ("dump", Opcode::Print),
    ("exit", Opcode::Exit),
];

/// Maps one token to its opcode.
///
/// A token is a numeral iff it is an optional `-` followed by one or more
/// ASCII digits; anything else must be a keyword.
pub fn decode(token: &str) -> Result<Opcode, SyntaxError> {
    if is_numeral(token) {
        return token
            .parse::<i64>()
            .map(Opcode::Push)
            .map_err(|_| SyntaxError::IntegerOutOfRange(token.to_string()));
    }
    KEYWORDS
        .iter()
        .find(|(kw, _)| *kw == token)
        .map(|(_, op)| *op)
        .ok_or_else(|| SyntaxError::UnknownToken(token.to_string()))
}

fn is_numeral(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

impl Opcode {
    /// Canonical keyword, used in diagnostics and emitted comments.
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Push(_) => "push",
            Opcode::Add => "+",
            Opcode::Sub => "-",
            Opcode::Mul => "*",
            Opcode::Div => "/",
            Opcode::Mod => "%",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::BitAnd => "and",
            Opcode::BitOr => "or",
            Opcode::BitXor => "xor",
            Opcode::BitNot => "not",
            Opcode::Compare(Compare::Eq) => "=",
            Opcode::Compare(Compare::Ne) => "!=",
            Opcode::Compare(Compare::Lt) => "<",
            Opcode::Compare(Compare::Le) => "<=",
            Opcode::Compare(Compare::Gt) => ">",
            Opcode::Compare(Compare::Ge) => ">=",
            Opcode::Dup => "dup",
            Opcode::TwoDup => "2dup",
            Opcode::Swap => "swap",
            Opcode::Over => "over",
            Opcode::Rot => "rot",
            Opcode::Drop => "drop",
            Opcode::Mem => "mem",
            Opcode::Load8 => "load8",
            Opcode::Store8 => "store8",
            Opcode::Load64 => "load64",
            Opcode::Store64 => "store64",
            Opcode::Argc => "argc",
            Opcode::Argv => "argv",
            Opcode::If => "if",
            Opcode::Else => "else",
            Opcode::End => "end",
            Opcode::While => "while",
            Opcode::Do => "do",
            Opcode::Syscall(0) => "syscall0",
            Opcode::Syscall(1) => "syscall1",
            Opcode::Syscall(2) => "syscall2",
            Opcode::Syscall(3) => "syscall3",
            Opcode::Syscall(4) => "syscall4",
            Opcode::Syscall(5) => "syscall5",
            Opcode::Syscall(_) => "syscall6",
            Opcode::Print => "print",
            Opcode::Exit => "exit",
        }
    }

    /// Stack effect as (values consumed, values produced).
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Opcode::Push(_) | Opcode::Mem | Opcode::Argc | Opcode::Argv => (0, 1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Mod
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::BitAnd
            | Opcode::BitOr
            | Opcode::BitXor
            | Opcode::Compare(_) => (2, 1),
            Opcode::BitNot | Opcode::Load8 | Opcode::Load64 => (1, 1),
            Opcode::Dup => (1, 2),
            Opcode::TwoDup => (2, 4),
            Opcode::Swap => (2, 2),
            Opcode::Over => (2, 3),
            Opcode::Rot => (3, 3),
            Opcode::Drop | Opcode::Print => (1, 0),
            Opcode::Store8 | Opcode::Store64 => (2, 0),
            Opcode::If | Opcode::Do => (1, 0),
            Opcode::Else | Opcode::End | Opcode::While | Opcode::Exit => (0, 0),
            Opcode::Syscall(n) => (*n as usize + 1, 1),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Push(v) => write!(f, "{}", v),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_numerals() {
        assert_eq!(decode("42"), Ok(Opcode::Push(42)));
        assert_eq!(decode("-2"), Ok(Opcode::Push(-2)));
        assert_eq!(decode("0"), Ok(Opcode::Push(0)));
        assert_eq!(
            decode("-9223372036854775808"),
            Ok(Opcode::Push(i64::MIN))
        );
    }

    #[test]
    fn minus_alone_is_the_operator() {
        assert_eq!(decode("-"), Ok(Opcode::Sub));
    }

    #[test]
    fn leading_plus_is_not_a_numeral() {
        assert_eq!(
            decode("+5"),
            Err(SyntaxError::UnknownToken("+5".to_string()))
        );
    }

    #[test]
    fn oversized_numeral_is_rejected() {
        assert_eq!(
            decode("99999999999999999999"),
            Err(SyntaxError::IntegerOutOfRange(
                "99999999999999999999".to_string()
            ))
        );
    }

    #[test]
    fn decodes_keywords_and_aliases() {
        assert_eq!(decode("if"), Ok(Opcode::If));
        assert_eq!(decode("syscall3"), Ok(Opcode::Syscall(3)));
        assert_eq!(decode("prn"), Ok(Opcode::Print));
        assert_eq!(decode("!>"), Ok(Opcode::Compare(Compare::Le)));
        assert_eq!(decode(",64"), Ok(Opcode::Load64));
        assert_eq!(decode("argv"), Ok(Opcode::Argv));
    }

    #[test]
    fn unknown_token_carries_its_text() {
        assert_eq!(
            decode("IF"),
            Err(SyntaxError::UnknownToken("IF".to_string()))
        );
    }

    #[test]
    fn decoding_is_repeatable() {
        for (kw, _) in KEYWORDS {
            assert_eq!(decode(kw), decode(kw));
        }
        assert_eq!(decode("17"), decode("17"));
    }

    #[test]
    fn every_syscall_name_round_trips() {
        for n in 0..=MAX_SYSCALL_ARGS {
            let op = Opcode::Syscall(n);
            assert_eq!(decode(op.name()), Ok(op));
            assert_eq!(op.stack_effect(), (n as usize + 1, 1));
        }
    }

    #[test]
    fn comparisons_read_second_against_top() {
        assert!(Compare::Gt.holds(2, 1));
        assert!(!Compare::Gt.holds(1, 2));
        assert!(Compare::Le.holds(3, 3));
    }
}
