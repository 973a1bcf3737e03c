//! Direct execution over an explicit value stack.
//!
//! Unlike the emitted binary, the interpreter checks every operation before
//! performing it: stack depth against the opcode's stack effect, divisors,
//! and memory addresses. A failed check aborts the run with a
//! [`RuntimeFault`] and leaves the stack as it was before the operation.

use std::io::{self, Write};
use std::ops::Range;

use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Loc, Result, RuntimeFault};
use crate::opcode::Opcode;
use crate::program::Instr;
use crate::resolver::{Control, ResolvedProgram};

const SYS_WRITE: i64 = 1;
const SYS_EXIT: i64 = 60;
const EBADF: i64 = 9;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// Execution ran past the last instruction.
    Finished,
    /// `exit` or an exit system call.
    Exited(i32),
}

impl Halt {
    pub fn status(self) -> i32 {
        match self {
            Halt::Finished => 0,
            Halt::Exited(code) => code,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValueStack {
    values: Vec<i64>,
    capacity: usize,
}

impl ValueStack {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: Vec::new(),
            capacity,
        }
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Checks that `instr` can run to completion without leaving `[0, capacity]`.
    fn check(&self, instr: &Instr) -> std::result::Result<(), RuntimeFault> {
        let (pops, pushes) = instr.op.stack_effect();
        let available = self.values.len();
        if available < pops {
            return Err(RuntimeFault::StackUnderflow {
                op: instr.op.name(),
                needed: pops,
                available,
                loc: instr.loc,
            });
        }
        if available - pops + pushes > self.capacity {
            return Err(RuntimeFault::StackOverflow {
                op: instr.op.name(),
                capacity: self.capacity,
                loc: instr.loc,
            });
        }
        Ok(())
    }

    // Callers run `check` first, so the depth is always sufficient.
    fn take<const N: usize>(&mut self) -> [i64; N] {
        let start = self.values.len() - N;
        let mut out = [0i64; N];
        out.copy_from_slice(&self.values[start..]);
        self.values.truncate(start);
        out
    }

    fn peek_n(&self, n: usize) -> &[i64] {
        &self.values[self.values.len() - n..]
    }

    fn drop_n(&mut self, n: usize) {
        self.values.truncate(self.values.len() - n);
    }

    fn push(&mut self, v: i64) {
        self.values.push(v);
    }

    /// Bottom-to-top, space-separated, newline-terminated.
    pub fn render(&self) -> String {
        let mut s = self
            .values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        s.push('\n');
        s
    }
}

/// Byte-addressable space. The `mem` region starts at address 0; right after
/// it sits the argument vector, laid out as Linux leaves it above `rsp`: a
/// null-terminated table of 8-byte pointers followed by the NUL-terminated
/// strings they point at.
#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
    region: usize,
    argc: usize,
}

impl Memory {
    pub fn new(capacity: usize, args: &[String]) -> Self {
        let table = (args.len() + 1) * 8;
        let mut bytes = vec![0; capacity + table];
        for (i, arg) in args.iter().enumerate() {
            let slot = capacity + i * 8;
            let addr = bytes.len() as i64;
            bytes[slot..slot + 8].copy_from_slice(&addr.to_le_bytes());
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
        }
        Self {
            bytes,
            region: capacity,
            argc: args.len(),
        }
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    /// Address of the argument pointer table.
    pub fn argv(&self) -> usize {
        self.region
    }

    // an access may not straddle the end of the `mem` region
    fn range(
        &self,
        addr: i64,
        width: usize,
        op: &'static str,
        loc: Loc,
    ) -> std::result::Result<Range<usize>, RuntimeFault> {
        let fault = RuntimeFault::MemoryOutOfBounds {
            op,
            addr,
            capacity: self.region,
            loc,
        };
        let start = usize::try_from(addr).map_err(|_| fault.clone())?;
        match start.checked_add(width) {
            Some(end) if end <= self.bytes.len() && (end <= self.region || start >= self.region) => {
                Ok(start..end)
            }
            _ => Err(fault),
        }
    }
}

enum Flow {
    Next,
    Goto(usize),
    Halt(i32),
}

pub struct Interpreter<W: Write> {
    stack: ValueStack,
    memory: Memory,
    out: W,
}

impl<W: Write> Interpreter<W> {
    pub fn new(config: &Config, out: W) -> Self {
        Self {
            stack: ValueStack::new(config.stack_capacity),
            memory: Memory::new(config.memory_capacity, &config.args),
            out,
        }
    }

    pub fn stack(&self) -> &ValueStack {
        &self.stack
    }

    /// Current stack contents without consuming them.
    pub fn render_stack(&self) -> String {
        self.stack.render()
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn run(&mut self, program: &ResolvedProgram) -> Result<Halt> {
        let instrs = program.program().instrs();
        let mut ip = 0usize;
        let mut steps = 0u64;

        let halt = loop {
            let Some(instr) = instrs.get(ip) else {
                break Halt::Finished;
            };
            self.stack.check(instr)?;
            steps += 1;

            let flow = match program.control(ip) {
                Some(control) => self.exec_control(control, program),
                None => self.exec_op(instr)?,
            };
            match flow {
                Flow::Next => ip += 1,
                Flow::Goto(target) => ip = target,
                Flow::Halt(code) => break Halt::Exited(code),
            }
        };

        self.out.flush().map_err(Error::Output)?;
        debug!(steps, depth = self.stack.len(), ?halt, "interpreter halted");
        Ok(halt)
    }

    fn exec_control(&mut self, control: Control, program: &ResolvedProgram) -> Flow {
        match control {
            Control::BranchIfZero { target } => {
                let [cond] = self.stack.take();
                if cond == 0 {
                    Flow::Goto(program.site(target))
                } else {
                    Flow::Next
                }
            }
            Control::Jump { target, .. } => Flow::Goto(program.site(target)),
            Control::Define { .. } => Flow::Next,
        }
    }

    fn binop(&mut self, f: impl FnOnce(i64, i64) -> i64) {
        let [b, a] = self.stack.take();
        self.stack.push(f(b, a));
    }

    fn div_mod(&mut self, instr: &Instr) -> std::result::Result<(), RuntimeFault> {
        let op = instr.op.name();
        let [b, a] = self.stack.take();
        if a == 0 {
            self.stack.push(b);
            self.stack.push(a);
            return Err(RuntimeFault::DivisionByZero { op, loc: instr.loc });
        }
        let r = match instr.op {
            Opcode::Mod => b.checked_rem(a),
            _ => b.checked_div(a),
        };
        match r {
            Some(v) => {
                self.stack.push(v);
                Ok(())
            }
            None => {
                self.stack.push(b);
                self.stack.push(a);
                Err(RuntimeFault::DivisionOverflow { op, loc: instr.loc })
            }
        }
    }

    fn exec_op(&mut self, instr: &Instr) -> Result<Flow> {
        match instr.op {
            Opcode::Push(v) => self.stack.push(v),

            Opcode::Add => self.binop(i64::wrapping_add),
            Opcode::Sub => self.binop(i64::wrapping_sub),
            Opcode::Mul => self.binop(i64::wrapping_mul),
            Opcode::Div | Opcode::Mod => self.div_mod(instr)?,

            // the count is masked to 6 bits, as `shl r64, cl` does
            Opcode::Shl => self.binop(|b, a| (b as u64).wrapping_shl(a as u32) as i64),
            Opcode::Shr => self.binop(|b, a| (b as u64).wrapping_shr(a as u32) as i64),
            Opcode::BitAnd => self.binop(|b, a| b & a),
            Opcode::BitOr => self.binop(|b, a| b | a),
            Opcode::BitXor => self.binop(|b, a| b ^ a),
            Opcode::BitNot => {
                let [a] = self.stack.take();
                self.stack.push(!a);
            }

            Opcode::Compare(cmp) => self.binop(|b, a| cmp.holds(b, a) as i64),

            Opcode::Dup => {
                let [a] = self.stack.take();
                self.stack.push(a);
                self.stack.push(a);
            }
            Opcode::TwoDup => {
                let [b, a] = self.stack.take();
                for v in [b, a, b, a] {
                    self.stack.push(v);
                }
            }
            Opcode::Swap => {
                let [b, a] = self.stack.take();
                self.stack.push(a);
                self.stack.push(b);
            }
            Opcode::Over => {
                let [b, a] = self.stack.take();
                for v in [b, a, b] {
                    self.stack.push(v);
                }
            }
            Opcode::Rot => {
                let [c, b, a] = self.stack.take();
                for v in [b, a, c] {
                    self.stack.push(v);
                }
            }
            Opcode::Drop => {
                let [_] = self.stack.take();
            }

            Opcode::Mem => self.stack.push(0),
            Opcode::Argc => self.stack.push(self.memory.argc() as i64),
            Opcode::Argv => self.stack.push(self.memory.argv() as i64),
            Opcode::Load8 => {
                let [addr] = self.stack.take();
                let r = self.memory_range(addr, 1, instr, &[addr])?;
                self.stack.push(self.memory.bytes[r.start] as i64);
            }
            Opcode::Store8 => {
                let [addr, value] = self.stack.take();
                let r = self.memory_range(addr, 1, instr, &[addr, value])?;
                self.memory.bytes[r.start] = value as u8;
            }
            Opcode::Load64 => {
                let [addr] = self.stack.take();
                let r = self.memory_range(addr, 8, instr, &[addr])?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&self.memory.bytes[r]);
                self.stack.push(i64::from_le_bytes(buf));
            }
            Opcode::Store64 => {
                let [addr, value] = self.stack.take();
                let r = self.memory_range(addr, 8, instr, &[addr, value])?;
                self.memory.bytes[r].copy_from_slice(&value.to_le_bytes());
            }

            // handled through their resolved control action
            Opcode::If | Opcode::Else | Opcode::End | Opcode::While | Opcode::Do => {}

            Opcode::Syscall(arity) => return self.syscall(arity, instr),
            Opcode::Print => {
                let [a] = self.stack.take();
                writeln!(self.out, "{}", a).map_err(Error::Output)?;
            }
            Opcode::Exit => return Ok(Flow::Halt(0)),
        }
        Ok(Flow::Next)
    }

    // On failure the popped operands go back so the fault leaves the stack untouched.
    fn memory_range(
        &mut self,
        addr: i64,
        width: usize,
        instr: &Instr,
        operands: &[i64],
    ) -> std::result::Result<Range<usize>, RuntimeFault> {
        self.memory
            .range(addr, width, instr.op.name(), instr.loc)
            .map_err(|fault| {
                for v in operands {
                    self.stack.push(*v);
                }
                fault
            })
    }

    // Operands stay on the stack until the request has been carried out.
    fn syscall(&mut self, arity: u8, instr: &Instr) -> Result<Flow> {
        let n = arity as usize + 1;
        let (number, args) = {
            let operands = self.stack.peek_n(n);
            // register order: arg1 sits directly below the number
            let args: Vec<i64> = operands[..n - 1].iter().rev().copied().collect();
            (operands[n - 1], args)
        };

        match (number, args.as_slice()) {
            (SYS_WRITE, &[fd, buf, count]) => {
                let written = self.write_fd(fd, buf, count, instr)?;
                self.stack.drop_n(n);
                self.stack.push(written);
                Ok(Flow::Next)
            }
            (SYS_EXIT, &[code, ..]) => {
                self.stack.drop_n(n);
                Ok(Flow::Halt((code & 0xff) as i32))
            }
            _ => Err(RuntimeFault::UnsupportedSyscall {
                op: instr.op.name(),
                number,
                loc: instr.loc,
            }
            .into()),
        }
    }

    fn write_fd(&mut self, fd: i64, buf: i64, count: i64, instr: &Instr) -> Result<i64> {
        if fd != 1 && fd != 2 {
            return Ok(-EBADF);
        }
        let r = self
            .memory
            .range(buf, count.max(0) as usize, instr.op.name(), instr.loc)?;
        let bytes = &self.memory.bytes[r];
        let res = if fd == 1 {
            self.out.write_all(bytes)
        } else {
            io::stderr().write_all(bytes)
        };
        res.map_err(Error::Output)?;
        Ok(bytes.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use crate::resolver::resolve;

    fn run_with(src: &str, config: &Config) -> (Result<Halt>, Vec<i64>, String) {
        let resolved = resolve(Program::parse(src).unwrap()).unwrap();
        let mut interp = Interpreter::new(config, Vec::new());
        let res = interp.run(&resolved);
        let stack = interp.stack().as_slice().to_vec();
        let out = String::from_utf8(interp.into_output()).unwrap();
        (res, stack, out)
    }

    fn run(src: &str) -> (Result<Halt>, Vec<i64>, String) {
        run_with(src, &Config::default())
    }

    fn stack_of(src: &str) -> Vec<i64> {
        let (res, stack, _) = run(src);
        res.unwrap();
        stack
    }

    fn fault_of(src: &str) -> RuntimeFault {
        match run(src).0 {
            Err(Error::Runtime(f)) => f,
            other => panic!("expected a runtime fault, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic() {
        assert_eq!(stack_of("2 3 +"), vec![5]);
        assert_eq!(stack_of("7 2 /"), vec![3]);
        assert_eq!(stack_of("7 2 %"), vec![1]);
        assert_eq!(stack_of("5 -2 -"), vec![7]);
        assert_eq!(stack_of("6 -7 *"), vec![-42]);
    }

    #[test]
    fn division_truncates_toward_zero() {
        assert_eq!(stack_of("-7 2 /"), vec![-3]);
        assert_eq!(stack_of("-7 2 %"), vec![-1]);
        assert_eq!(stack_of("7 -2 %"), vec![1]);
    }

    #[test]
    fn addition_wraps() {
        assert_eq!(stack_of("9223372036854775807 1 +"), vec![i64::MIN]);
    }

    #[test]
    fn comparisons_push_one_or_zero() {
        assert_eq!(stack_of("2 1 > 1 2 > 3 3 <= 3 3 != 4 4 ="), vec![1, 0, 1, 0, 1]);
        assert_eq!(stack_of("-1 0 <"), vec![1]);
    }

    #[test]
    fn stack_words() {
        assert_eq!(stack_of("1 2 swap"), vec![2, 1]);
        assert_eq!(stack_of("1 2 over"), vec![1, 2, 1]);
        assert_eq!(stack_of("1 2 3 rot"), vec![2, 3, 1]);
        assert_eq!(stack_of("1 2 2dup"), vec![1, 2, 1, 2]);
        assert_eq!(stack_of("1 dup drop"), vec![1]);
    }

    #[test]
    fn bitwise_words() {
        assert_eq!(stack_of("1 4 shl 256 4 shr"), vec![16, 16]);
        assert_eq!(stack_of("-1 63 shr"), vec![1]);
        assert_eq!(stack_of("1 65 shl"), vec![2]);
        assert_eq!(stack_of("12 10 and 12 10 or 12 10 xor 0 not"), vec![8, 14, 6, -1]);
    }

    #[test]
    fn conditional_selects_branch() {
        assert_eq!(run("1 if 10 else 20 end print").2, "10\n");
        assert_eq!(run("0 if 10 else 20 end print").2, "20\n");
        assert_eq!(stack_of("0 if 10 end"), Vec::<i64>::new());
        assert_eq!(stack_of("5 if 10 end"), vec![10]);
    }

    #[test]
    fn nested_conditionals() {
        let src = "1 if 0 if 1 else 2 end else 3 end";
        assert_eq!(stack_of(src), vec![2]);
        let src = "0 if 0 if 1 else 2 end else 1 if 4 end end";
        assert_eq!(stack_of(src), vec![4]);
    }

    #[test]
    fn while_loop_counts_down() {
        let (res, _, out) = run("3 while dup 0 > do dup print 1 - end drop");
        assert_eq!(res.unwrap(), Halt::Finished);
        assert_eq!(out, "3\n2\n1\n");
    }

    #[test]
    fn print_renders_negative_and_zero() {
        assert_eq!(run("0 print -15 print").2, "0\n-15\n");
    }

    #[test]
    fn print_on_empty_stack_underflows() {
        assert_eq!(
            fault_of("print"),
            RuntimeFault::StackUnderflow {
                op: "print",
                needed: 1,
                available: 0,
                loc: Loc::new(1, 1),
            }
        );
    }

    #[test]
    fn underflow_leaves_stack_untouched() {
        let (res, stack, _) = run("1 +");
        assert!(matches!(
            res,
            Err(Error::Runtime(RuntimeFault::StackUnderflow { needed: 2, available: 1, .. }))
        ));
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn division_by_zero_faults() {
        assert!(matches!(
            fault_of("1 0 /"),
            RuntimeFault::DivisionByZero { op: "/", .. }
        ));
        assert!(matches!(
            fault_of("1 0 %"),
            RuntimeFault::DivisionByZero { op: "%", .. }
        ));
        let (_, stack, _) = run("1 0 /");
        assert_eq!(stack, vec![1, 0]);
    }

    #[test]
    fn min_divided_by_minus_one_faults() {
        assert!(matches!(
            fault_of("-9223372036854775808 -1 /"),
            RuntimeFault::DivisionOverflow { .. }
        ));
    }

    #[test]
    fn overflow_respects_configured_capacity() {
        let config = Config {
            stack_capacity: 2,
            ..Config::default()
        };
        let (res, stack, _) = run_with("1 2 3", &config);
        assert!(matches!(
            res,
            Err(Error::Runtime(RuntimeFault::StackOverflow { capacity: 2, .. }))
        ));
        assert_eq!(stack, vec![1, 2]);

        let (res, _, _) = run_with("1 2 dup", &config);
        assert!(res.is_err());
        let (res, _, _) = run_with("1 2 +", &config);
        assert!(res.is_ok());
    }

    #[test]
    fn memory_round_trips() {
        assert_eq!(stack_of("mem 300 store8 mem load8"), vec![44]);
        assert_eq!(
            stack_of("mem 8 + -5 store64 mem 8 + load64"),
            vec![-5]
        );
    }

    #[test]
    fn memory_access_is_bounds_checked() {
        let config = Config {
            memory_capacity: 16,
            ..Config::default()
        };
        let (res, stack, _) = run_with("mem 9 + load64", &config);
        assert!(matches!(
            res,
            Err(Error::Runtime(RuntimeFault::MemoryOutOfBounds { addr: 9, capacity: 16, .. }))
        ));
        assert_eq!(stack, vec![9]);
        assert!(matches!(
            fault_of("-1 load8"),
            RuntimeFault::MemoryOutOfBounds { addr: -1, .. }
        ));
    }

    #[test]
    fn write_syscall_copies_memory_to_output() {
        // "hi\n" at mem[0..3], then write(1, mem, 3)
        let src = "mem 104 . mem 1 + 105 . mem 2 + 10 . 3 mem 1 1 syscall3";
        let (res, stack, out) = run(src);
        res.unwrap();
        assert_eq!(out, "hi\n");
        assert_eq!(stack, vec![3]);
    }

    #[test]
    fn exit_syscall_halts_with_status() {
        let (res, stack, out) = run("1 print 7 60 syscall1 2 print");
        assert_eq!(res.unwrap(), Halt::Exited(7));
        assert_eq!(out, "1\n");
        assert!(stack.is_empty());
    }

    #[test]
    fn exit_stops_execution() {
        let (res, stack, _) = run("1 exit 2");
        assert_eq!(res.unwrap(), Halt::Exited(0));
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn unknown_syscall_faults() {
        assert!(matches!(
            fault_of("39 syscall0"),
            RuntimeFault::UnsupportedSyscall { number: 39, .. }
        ));
    }

    #[test]
    fn rejected_syscall_leaves_stack_untouched() {
        let (res, stack, _) = run("5 39 syscall0");
        assert!(matches!(
            res,
            Err(Error::Runtime(RuntimeFault::UnsupportedSyscall { number: 39, .. }))
        ));
        assert_eq!(stack, vec![5, 39]);

        // write with the wrong arity is not emulated
        let (res, stack, _) = run("1 1 syscall1");
        assert!(res.is_err());
        assert_eq!(stack, vec![1, 1]);
    }

    #[test]
    fn write_outside_memory_leaves_stack_untouched() {
        let (res, stack, out) = run("3 -1 1 1 syscall3");
        assert!(matches!(
            res,
            Err(Error::Runtime(RuntimeFault::MemoryOutOfBounds { op: "syscall3", addr: -1, .. }))
        ));
        assert_eq!(stack, vec![3, -1, 1, 1]);
        assert!(out.is_empty());
    }

    #[test]
    fn write_to_unknown_fd_returns_ebadf() {
        assert_eq!(stack_of("3 mem 7 1 syscall3"), vec![-9]);
    }

    #[test]
    fn arguments_are_visible_through_argc_and_argv() {
        let config = Config {
            args: vec!["prog".into(), "hi".into()],
            ..Config::default()
        };
        // argc, then the first byte of argv[1]
        let (res, stack, _) = run_with("argc argv 8 + load64 load8", &config);
        res.unwrap();
        assert_eq!(stack, vec![2, b'h' as i64]);

        // the pointer table is null-terminated
        let (_, stack, _) = run_with("argv 16 + load64", &config);
        assert_eq!(stack, vec![0]);

        // argv[0] can be written out directly
        let (_, _, out) = run_with("4 argv load64 1 1 syscall3 drop", &config);
        assert_eq!(out, "prog");
    }

    #[test]
    fn no_arguments_by_default() {
        let config = Config {
            memory_capacity: 16,
            ..Config::default()
        };
        assert_eq!(run_with("argc argv", &config).1, vec![0, 16]);
    }

    #[test]
    fn render_stack_peeks_bottom_to_top() {
        let resolved = resolve(Program::parse("1 2 3").unwrap()).unwrap();
        let mut interp = Interpreter::new(&Config::default(), Vec::new());
        interp.run(&resolved).unwrap();
        assert_eq!(interp.render_stack(), "1 2 3\n");
        assert_eq!(interp.stack().len(), 3);
    }
}
