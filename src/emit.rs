//! Lowering to NASM x86-64 assembly for Linux.
//!
//! The emitted program keeps the value stack on the machine stack: every
//! template pops its operands into registers and pushes its result. Nothing
//! here guards against division by zero, stack underflow or wild memory
//! accesses; the produced binary faults the way the hardware does.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::opcode::{Compare, Opcode};
use crate::resolver::{Control, Label, ResolvedProgram};

pub const ENTRY_SYMBOL: &str = "_start";
pub const MEMORY_SYMBOL: &str = "mem";
pub const PRINT_SYMBOL: &str = "print_num";
/// Holds the initial `rsp`, which points at `argc` on Linux.
pub const ARGS_SYMBOL: &str = "args_ptr";

const SYS_EXIT: i64 = 60;

// argument registers of the Linux syscall ABI, in order
const SYSCALL_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "r10", "r8", "r9"];

pub fn label_sym(label: Label) -> String {
    format!("block_{}", label)
}

struct AsmBuilder {
    out: String,
}

impl AsmBuilder {
    fn new() -> Self {
        Self { out: String::new() }
    }

    fn emit_line(&mut self, s: &str) {
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn emit_ins(&mut self, s: &str) {
        self.out.push_str("    ");
        self.emit_line(s);
    }

    fn emit_label(&mut self, sym: &str) {
        self.out.push_str(sym);
        self.emit_line(":");
    }
}

/// A complete, assembler-ready translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub text: String,
}

impl Artifact {
    /// Writes the artifact so that `path` either keeps its old content or
    /// holds the full new text, never a prefix of it.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(dir, e))?;
        let written = tmp.write_all(self.text.as_bytes()).and_then(|_| tmp.flush());
        written.map_err(|e| Error::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        debug!(path = %path.display(), bytes = self.text.len(), "artifact written");
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(Self { text })
    }
}

pub struct Emitter {
    b: AsmBuilder,
    memory_capacity: usize,
}

impl Emitter {
    pub fn new(config: &Config) -> Self {
        Self {
            b: AsmBuilder::new(),
            memory_capacity: config.memory_capacity,
        }
    }

    pub fn translate(&mut self, program: &ResolvedProgram) -> Artifact {
        self.emit_prelude();
        self.emit_print_routine();

        self.b.emit_line(&format!("global {}", ENTRY_SYMBOL));
        self.b.emit_label(ENTRY_SYMBOL);
        self.b.emit_ins(&format!("mov [{}], rsp", ARGS_SYMBOL));
        for (ip, instr) in program.program().instrs().iter().enumerate() {
            self.b
                .emit_ins(&format!(";; -- {} ({}) --", instr.op, instr.loc));
            match program.control(ip) {
                Some(control) => self.emit_control(control),
                None => self.emit_op(instr.op),
            }
        }
        self.b.emit_ins(";; -- fall off the end --");
        self.exit_with(0);

        self.emit_bss();
        debug!(
            ops = program.program().len(),
            labels = program.label_count(),
            "emitted assembly"
        );
        Artifact {
            text: std::mem::take(&mut self.b.out),
        }
    }

    fn emit_prelude(&mut self) {
        self.b.emit_line("; generated by tauc");
        self.b.emit_line("BITS 64");
        self.b.emit_line("section .text");
        self.b.emit_line("");
    }

    // Prints rdi as a signed decimal followed by a newline. Magnitude is
    // divided unsigned so that i64::MIN renders correctly after `neg`.
    fn emit_print_routine(&mut self) {
        self.b.emit_label(PRINT_SYMBOL);
        for ins in [
            "push rbx",
            "sub rsp, 32",
            "mov rax, rdi",
            "xor r8d, r8d",
            "test rax, rax",
            "jns .magnitude",
            "neg rax",
            "mov r8d, 1",
        ] {
            self.b.emit_ins(ins);
        }
        self.b.emit_label(".magnitude");
        for ins in [
            "lea rsi, [rsp + 32]",
            "dec rsi",
            "mov byte [rsi], 10",
            "mov rbx, 10",
        ] {
            self.b.emit_ins(ins);
        }
        self.b.emit_label(".digit");
        for ins in [
            "xor edx, edx",
            "div rbx",
            "add dl, '0'",
            "dec rsi",
            "mov [rsi], dl",
            "test rax, rax",
            "jnz .digit",
            "test r8d, r8d",
            "jz .write",
            "dec rsi",
            "mov byte [rsi], '-'",
        ] {
            self.b.emit_ins(ins);
        }
        self.b.emit_label(".write");
        for ins in [
            "mov rax, 1",
            "mov rdi, 1",
            "lea rdx, [rsp + 32]",
            "sub rdx, rsi",
            "syscall",
            "add rsp, 32",
            "pop rbx",
            "ret",
        ] {
            self.b.emit_ins(ins);
        }
        self.b.emit_line("");
    }

    fn emit_bss(&mut self) {
        self.b.emit_line("");
        self.b.emit_line("section .bss");
        self.b
            .emit_line(&format!("{}: resq 1", ARGS_SYMBOL));
        self.b
            .emit_line(&format!("{}: resb {}", MEMORY_SYMBOL, self.memory_capacity));
    }

    fn pop(&mut self, reg: &str) {
        self.b.emit_ins(&format!("pop {}", reg));
    }

    fn push(&mut self, reg: &str) {
        self.b.emit_ins(&format!("push {}", reg));
    }

    fn push_imm(&mut self, v: i64) {
        // push only takes a sign-extended imm32
        self.b.emit_ins(&format!("mov rax, {}", v));
        self.push("rax");
    }

    fn binop(&mut self, op: &str) {
        self.pop("rbx");
        self.pop("rax");
        self.b.emit_ins(&format!("{} rax, rbx", op));
        self.push("rax");
    }

    fn shift(&mut self, op: &str) {
        self.pop("rcx");
        self.pop("rax");
        self.b.emit_ins(&format!("{} rax, cl", op));
        self.push("rax");
    }

    fn div_mod(&mut self, is_mod: bool) {
        self.pop("rbx");
        self.pop("rax");
        self.b.emit_ins("cqo");
        self.b.emit_ins("idiv rbx"); // toward zero
        self.push(if is_mod { "rdx" } else { "rax" });
    }

    fn cmp_to_bool(&mut self, cmp: Compare) {
        self.b.emit_ins("xor ecx, ecx");
        self.b.emit_ins("mov edx, 1");
        self.pop("rbx");
        self.pop("rax");
        self.b.emit_ins("cmp rax, rbx");
        self.b
            .emit_ins(&format!("cmov{} rcx, rdx", cmp.condition_code()));
        self.push("rcx");
    }

    fn syscall(&mut self, arity: u8) {
        self.pop("rax");
        for reg in SYSCALL_REGS.iter().take(arity as usize) {
            self.pop(reg);
        }
        self.b.emit_ins("syscall");
        self.push("rax");
    }

    fn exit_with(&mut self, code: i64) {
        self.b.emit_ins(&format!("mov rax, {}", SYS_EXIT));
        self.b.emit_ins(&format!("mov rdi, {}", code));
        self.b.emit_ins("syscall");
    }

    fn emit_control(&mut self, control: Control) {
        match control {
            Control::BranchIfZero { target } => {
                self.pop("rax");
                self.b.emit_ins("test rax, rax");
                self.b.emit_ins(&format!("jz {}", label_sym(target)));
            }
            Control::Jump { target, define } => {
                self.b.emit_ins(&format!("jmp {}", label_sym(target)));
                self.b.emit_label(&label_sym(define));
            }
            Control::Define { label } => self.b.emit_label(&label_sym(label)),
        }
    }

    fn emit_op(&mut self, op: Opcode) {
        match op {
            Opcode::Push(v) => self.push_imm(v),

            Opcode::Add => self.binop("add"),
            Opcode::Sub => self.binop("sub"),
            Opcode::Mul => self.binop("imul"),
            Opcode::Div => self.div_mod(false),
            Opcode::Mod => self.div_mod(true),

            Opcode::Shl => self.shift("shl"),
            Opcode::Shr => self.shift("shr"),
            Opcode::BitAnd => self.binop("and"),
            Opcode::BitOr => self.binop("or"),
            Opcode::BitXor => self.binop("xor"),
            Opcode::BitNot => {
                self.pop("rax");
                self.b.emit_ins("not rax");
                self.push("rax");
            }

            Opcode::Compare(cmp) => self.cmp_to_bool(cmp),

            Opcode::Dup => {
                self.pop("rax");
                self.push("rax");
                self.push("rax");
            }
            Opcode::TwoDup => {
                self.pop("rbx");
                self.pop("rax");
                self.push("rax");
                self.push("rbx");
                self.push("rax");
                self.push("rbx");
            }
            Opcode::Swap => {
                self.pop("rax");
                self.pop("rbx");
                self.push("rax");
                self.push("rbx");
            }
            Opcode::Over => {
                self.pop("rax");
                self.pop("rbx");
                self.push("rbx");
                self.push("rax");
                self.push("rbx");
            }
            Opcode::Rot => {
                self.pop("rax");
                self.pop("rbx");
                self.pop("rcx");
                self.push("rbx");
                self.push("rax");
                self.push("rcx");
            }
            Opcode::Drop => self.pop("rax"),

            Opcode::Mem => {
                self.b.emit_ins(&format!("mov rax, {}", MEMORY_SYMBOL));
                self.push("rax");
            }
            Opcode::Argc => {
                self.b.emit_ins(&format!("mov rax, [{}]", ARGS_SYMBOL));
                self.b.emit_ins("mov rax, [rax]");
                self.push("rax");
            }
            Opcode::Argv => {
                self.b.emit_ins(&format!("mov rax, [{}]", ARGS_SYMBOL));
                self.b.emit_ins("add rax, 8");
                self.push("rax");
            }
            Opcode::Load8 => {
                self.pop("rax");
                self.b.emit_ins("movzx rbx, byte [rax]");
                self.push("rbx");
            }
            Opcode::Store8 => {
                self.pop("rbx");
                self.pop("rax");
                self.b.emit_ins("mov [rax], bl");
            }
            Opcode::Load64 => {
                self.pop("rax");
                self.b.emit_ins("mov rbx, [rax]");
                self.push("rbx");
            }
            Opcode::Store64 => {
                self.pop("rbx");
                self.pop("rax");
                self.b.emit_ins("mov [rax], rbx");
            }

            // lowered through their resolved control action
            Opcode::If | Opcode::Else | Opcode::End | Opcode::While | Opcode::Do => {}

            Opcode::Syscall(n) => self.syscall(n),
            Opcode::Print => {
                self.pop("rdi");
                self.b.emit_ins(&format!("call {}", PRINT_SYMBOL));
            }
            Opcode::Exit => self.exit_with(0),
        }
    }
}
