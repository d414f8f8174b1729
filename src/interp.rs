//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The tree-walking interpreter giving the IL its operational semantics.
//!
//! Execution is deterministic: equal `(CFG, input)` pairs produce
//! bit-identical output and trace streams. The interpreter treats its CFG
//! as read-only and owns nothing but the register environment it builds.
//!
//! The CFG handed to [`Interp::new`] must satisfy the structural
//! invariants (every block terminated, phis consistent with predecessors);
//! run [`Cfg::validate`] first for anything that was not produced by the
//! reader. A missing terminator is a caller bug and panics.

use crate::ir::{ArithError, BinaryOp, Cfg, CmpOp, Inst, Operand, Value};
use crate::utility::SaHashMap;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A program counter: a block label plus an instruction index within it.
/// The index `num_insts()` denotes the terminator.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Pc {
    /// The current block's label
    pub block: String,
    /// The index into the block
    pub index: usize,
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}:{}", self.block, self.index)
    }
}

/// The runtime error taxonomy. Every failure is fatal to the run and
/// carries the program counter it occurred at.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InterpError {
    /// A phi had no entry (or several) for the block control arrived from,
    /// or control began in an entry block containing phis
    #[error("{pc}: phi cannot resolve an arrival from {}", from.as_deref().map(|f| format!("`@{f}`")).unwrap_or_else(|| "program start".to_string()))]
    UnboundPhi {
        /// Where the phi lives
        pc: Pc,
        /// The block control arrived from, `None` at program start
        from: Option<String>,
    },

    /// An instruction read a register that has never been assigned
    #[error("{pc}: register `%{name}` is undefined")]
    UndefinedRegister {
        /// Where the read happened
        pc: Pc,
        /// The undefined register
        name: String,
    },

    /// `/` or `%` with a zero divisor
    #[error("{pc}: division by zero")]
    DivByZero {
        /// Where the division happened
        pc: Pc,
    },

    /// `<<` or `>>` with a negative amount
    #[error("{pc}: negative shift amount")]
    NegativeShift {
        /// Where the shift happened
        pc: Pc,
    },

    /// `<<` with an amount too wide to materialize
    #[error("{pc}: shift amount too wide")]
    ShiftTooWide {
        /// Where the shift happened
        pc: Pc,
    },

    /// Input was malformed or exhausted, or an output write failed
    #[error("{pc}: i/o error: {message}")]
    Io {
        /// Where the `read`/`write` happened
        pc: Pc,
        /// The underlying failure
        message: String,
    },

    /// A terminator targeted a label that names no block
    #[error("{pc}: branch to unknown label `@{label}`")]
    InvalidLabel {
        /// Where the branch happened
        pc: Pc,
        /// The unknown label
        label: String,
    },

    /// The embedder's cancellation token fired
    #[error("{pc}: cancelled")]
    Cancelled {
        /// Where execution stopped
        pc: Pc,
    },
}

impl InterpError {
    fn arith(e: ArithError, pc: Pc) -> Self {
        match e {
            ArithError::DivByZero => Self::DivByZero { pc },
            ArithError::NegativeShift => Self::NegativeShift { pc },
            ArithError::ShiftTooWide => Self::ShiftTooWide { pc },
        }
    }
}

/// Yields the program's input integers. `Ok(None)` signals end of input,
/// which is an error only if a `read` still wants a value.
pub trait InputSource {
    /// Produces the next integer, `Ok(None)` at end of input.
    fn next_int(&mut self) -> io::Result<Option<Value>>;
}

/// Receives the program's output integers.
pub trait OutputSink {
    /// Accepts one output integer.
    fn put_int(&mut self, value: &Value) -> io::Result<()>;
}

/// Receives one record per executed instruction when tracing is enabled.
pub trait TraceSink {
    /// Accepts one `(block, index, kind)` record.
    fn record(&mut self, block: &str, index: usize, kind: &'static str);
}

/// Reads whitespace-separated decimal integers from any [`BufRead`].
pub struct TokenInput<R: BufRead> {
    reader: R,
    pending: std::collections::VecDeque<String>,
}

impl<R: BufRead> TokenInput<R> {
    /// Wraps a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: std::collections::VecDeque::new(),
        }
    }
}

impl<R: BufRead> InputSource for TokenInput<R> {
    fn next_int(&mut self) -> io::Result<Option<Value>> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return match Value::parse(&token) {
                    Some(v) => Ok(Some(v)),
                    None => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("`{token}` is not an integer"),
                    )),
                };
            }

            let mut line = String::new();

            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }

            self.pending
                .extend(line.split_whitespace().map(str::to_string));
        }
    }
}

/// An in-memory input source, mostly for tests and the batch drivers.
#[derive(Debug, Clone, Default)]
pub struct VecInput {
    values: std::collections::VecDeque<Value>,
}

impl VecInput {
    /// Builds a source yielding these values in order.
    pub fn from_ints(values: &[i64]) -> Self {
        Self {
            values: values.iter().map(|v| Value::from(*v)).collect(),
        }
    }
}

impl InputSource for VecInput {
    fn next_int(&mut self) -> io::Result<Option<Value>> {
        Ok(self.values.pop_front())
    }
}

/// Writes one decimal integer per line to any [`Write`].
pub struct LineOutput<W: Write> {
    writer: W,
}

impl<W: Write> LineOutput<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> OutputSink for LineOutput<W> {
    fn put_int(&mut self, value: &Value) -> io::Result<()> {
        writeln!(self.writer, "{value}")
    }
}

/// An in-memory output sink, mostly for tests and the batch drivers.
#[derive(Debug, Clone, Default)]
pub struct VecOutput {
    /// Everything written so far, in order.
    pub values: Vec<Value>,
}

impl OutputSink for VecOutput {
    fn put_int(&mut self, value: &Value) -> io::Result<()> {
        self.values.push(value.clone());
        Ok(())
    }
}

/// An in-memory trace sink.
#[derive(Debug, Clone, Default)]
pub struct VecTrace {
    /// One entry per executed instruction, in execution order.
    pub entries: Vec<(String, usize, &'static str)>,
}

impl TraceSink for VecTrace {
    fn record(&mut self, block: &str, index: usize, kind: &'static str) {
        self.entries.push((block.to_string(), index, kind));
    }
}

/// Writes trace records as `(@block, index, kind)` lines.
pub struct LineTrace<W: Write> {
    writer: W,
}

impl<W: Write> LineTrace<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> TraceSink for LineTrace<W> {
    fn record(&mut self, block: &str, index: usize, kind: &'static str) {
        let _ = writeln!(self.writer, "(@{block}, {index}, {kind})");
    }
}

/// A cooperative cancellation token shared between the embedder and a
/// running interpreter or pipeline. The core only ever reads it; timeouts
/// are an embedder concern built by flipping the token from outside.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation at the next check point.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a call to [`Interp::run`] came to a stop without an error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Halt {
    /// The program executed `exit`
    Exited,
    /// A breakpoint suspended execution; call `run` again to resume
    Breakpoint(BreakpointHit),
}

/// The snapshot handed to the embedder when a breakpoint fires. Register
/// values are queried from the suspended [`Interp`] itself.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BreakpointHit {
    /// The breakpoint's name
    pub name: String,
    /// Where it fired
    pub pc: Pc,
}

/// Interpreter configuration.
#[derive(Debug, Copy, Clone)]
pub struct InterpOptions {
    /// Whether `brkpt` suspends (true) or is a no-op (false)
    pub breakpoints: bool,
}

impl Default for InterpOptions {
    fn default() -> Self {
        Self { breakpoints: true }
    }
}

/// Executes one CFG against an input source and an output sink.
///
/// The interpreter is resumable: [`Self::run`] returns at breakpoints and
/// can be called again to continue. One `Interp` performs one program run;
/// build a fresh one to start over.
pub struct Interp<'a> {
    cfg: &'a Cfg,
    env: SaHashMap<String, Value>,
    block: String,
    index: usize,
    prev_block: Option<String>,
    started: bool,
    finished: bool,
    options: InterpOptions,
}

impl<'a> Interp<'a> {
    /// Prepares a run starting at the CFG's entry block.
    pub fn new(cfg: &'a Cfg, options: InterpOptions) -> Self {
        Self {
            cfg,
            env: SaHashMap::default(),
            block: cfg.entry().to_string(),
            index: 0,
            prev_block: None,
            started: false,
            finished: false,
            options,
        }
    }

    /// The current program counter.
    pub fn pc(&self) -> Pc {
        Pc {
            block: self.block.clone(),
            index: self.index,
        }
    }

    /// Whether the program has executed `exit`.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Reads a register, if it is defined.
    pub fn register(&self, name: &str) -> Option<&Value> {
        self.env.get(name)
    }

    /// All defined registers sorted by name, for breakpoint inspection.
    pub fn registers(&self) -> Vec<(&str, &Value)> {
        let mut all: Vec<_> = self.env.iter().map(|(k, v)| (k.as_str(), v)).collect();
        all.sort_unstable_by_key(|(k, _)| *k);

        all
    }

    /// Runs until `exit`, a breakpoint (when enabled), an error, or
    /// cancellation. Resumes where it stopped when called after a
    /// breakpoint.
    pub fn run(
        &mut self,
        input: &mut dyn InputSource,
        output: &mut dyn OutputSink,
        trace: Option<&mut dyn TraceSink>,
        cancel: &Cancellation,
    ) -> Result<Halt, InterpError> {
        let trace = &mut { trace };
        let cfg = self.cfg;

        if self.finished {
            return Ok(Halt::Exited);
        }

        if !self.started {
            self.started = true;

            // the entry block is entered from nowhere, so phis there have
            // no entry to select
            if cfg
                .block(&self.block)
                .is_some_and(|block| block.phi_len() > 0)
            {
                return Err(InterpError::UnboundPhi {
                    pc: self.pc(),
                    from: None,
                });
            }
        }

        loop {
            let block = match cfg.block(&self.block) {
                Some(block) => block,
                None => {
                    // only reachable with an unvalidated CFG whose entry
                    // label is missing
                    return Err(InterpError::InvalidLabel {
                        pc: self.pc(),
                        label: self.block.clone(),
                    });
                }
            };

            if self.index < block.num_insts() {
                let inst = &block.insts()[self.index];

                if let Some(t) = trace.as_deref_mut() {
                    t.record(&self.block, self.index, inst.kind());
                }

                if let Some(halt) = self.step(inst, input, output)? {
                    return Ok(halt);
                }

                continue;
            }

            // the terminator; this is also the cancellation check point
            if cancel.is_cancelled() {
                return Err(InterpError::Cancelled { pc: self.pc() });
            }

            let term = block
                .terminator()
                .unwrap_or_else(|| panic!("block `@{}` has no terminator", self.block));

            if let Some(t) = trace.as_deref_mut() {
                t.record(&self.block, self.index, term.kind());
            }

            let target = match term {
                Inst::Exit => {
                    self.finished = true;
                    return Ok(Halt::Exited);
                }
                Inst::Goto { target } => target.clone(),
                Inst::Branch {
                    cond,
                    iftrue,
                    iffalse,
                } => {
                    if self.read_register(cond)?.is_truthy() {
                        iftrue.clone()
                    } else {
                        iffalse.clone()
                    }
                }
                _ => unreachable!("non-terminator stored as terminator"),
            };

            self.transfer(target, trace)?;
        }
    }

    /// Executes one non-terminator instruction, advancing the index.
    /// Returns `Some(halt)` when a breakpoint suspends the run.
    fn step(
        &mut self,
        inst: &Inst,
        input: &mut dyn InputSource,
        output: &mut dyn OutputSink,
    ) -> Result<Option<Halt>, InterpError> {
        match inst {
            Inst::Mov { dst, src } => {
                let v = self.operand(src)?;
                self.env.insert(dst.clone(), v);
            }
            Inst::Phi { .. } => {
                // phis execute in parallel on block entry; stepping onto one
                // here means the entry-block check was bypassed
                return Err(InterpError::UnboundPhi {
                    pc: self.pc(),
                    from: self.prev_block.clone(),
                });
            }
            Inst::Binary { op, dst, lhs, rhs } => {
                let l = self.operand(lhs)?;
                let r = self.operand(rhs)?;

                let v = match op {
                    BinaryOp::Add => Ok(&l + &r),
                    BinaryOp::Sub => Ok(&l - &r),
                    BinaryOp::Mul => Ok(&l * &r),
                    BinaryOp::And => Ok(&l & &r),
                    BinaryOp::Or => Ok(&l | &r),
                    BinaryOp::Xor => Ok(&l ^ &r),
                    BinaryOp::Div => l.checked_div(&r),
                    BinaryOp::Rem => l.checked_rem(&r),
                    BinaryOp::Shl => l.checked_shl(&r),
                    BinaryOp::Shr => l.checked_shr(&r),
                }
                .map_err(|e| InterpError::arith(e, self.pc()))?;

                self.env.insert(dst.clone(), v);
            }
            Inst::Cmp { op, dst, lhs, rhs } => {
                let l = self.operand(lhs)?;
                let r = self.operand(rhs)?;

                let v = Value::from_bool(match op {
                    CmpOp::Eq => l == r,
                    CmpOp::Neq => l != r,
                    CmpOp::Lt => l < r,
                    CmpOp::Leq => l <= r,
                });

                self.env.insert(dst.clone(), v);
            }
            Inst::Read { dst } => {
                let v = match input.next_int() {
                    Ok(Some(v)) => v,
                    Ok(None) => {
                        return Err(InterpError::Io {
                            pc: self.pc(),
                            message: "end of input".to_string(),
                        })
                    }
                    Err(e) => {
                        return Err(InterpError::Io {
                            pc: self.pc(),
                            message: e.to_string(),
                        })
                    }
                };

                self.env.insert(dst.clone(), v);
            }
            Inst::Write { src } => {
                let v = self.operand(src)?;

                output.put_int(&v).map_err(|e| InterpError::Io {
                    pc: self.pc(),
                    message: e.to_string(),
                })?;
            }
            Inst::Brkpt { name } => {
                self.index += 1;

                if self.options.breakpoints {
                    return Ok(Some(Halt::Breakpoint(BreakpointHit {
                        name: name.clone(),
                        pc: self.pc(),
                    })));
                }

                return Ok(None);
            }
            Inst::Goto { .. } | Inst::Branch { .. } | Inst::Exit => {
                unreachable!("terminator in instruction list")
            }
        }

        self.index += 1;

        Ok(None)
    }

    /// Transfers control to `target`, evaluating its phis in parallel
    /// against the environment as it was before any of them committed.
    fn transfer(
        &mut self,
        target: String,
        trace: &mut Option<&mut dyn TraceSink>,
    ) -> Result<(), InterpError> {
        let cfg = self.cfg;
        let from = std::mem::replace(&mut self.block, target);
        self.prev_block = Some(from);
        self.index = 0;

        let block = match cfg.block(&self.block) {
            Some(block) => block,
            None => {
                let from = self.prev_block.clone().unwrap();
                let branch_index = cfg.block(&from).map_or(0, |b| b.num_insts());

                return Err(InterpError::InvalidLabel {
                    label: self.block.clone(),
                    pc: Pc {
                        block: from,
                        index: branch_index,
                    },
                });
            }
        };

        let prev = self.prev_block.as_deref().unwrap();
        let mut commits: Vec<(String, Value)> = Vec::with_capacity(block.phi_len());

        for (i, inst) in block.phis().iter().enumerate() {
            let Inst::Phi { dst, entries } = inst else {
                continue;
            };

            let mut matched = entries.iter().filter(|(_, label)| label == prev);
            let entry = matched.next();

            if entry.is_none() || matched.next().is_some() {
                return Err(InterpError::UnboundPhi {
                    pc: Pc {
                        block: self.block.clone(),
                        index: i,
                    },
                    from: Some(prev.to_string()),
                });
            }

            // reads sample the pre-entry environment: nothing commits
            // until every phi has been evaluated
            let value = self.operand_at(&entry.unwrap().0, i)?;

            if let Some(t) = trace.as_deref_mut() {
                t.record(&self.block, i, "phi");
            }

            commits.push((dst.clone(), value));
        }

        for (dst, value) in commits {
            self.env.insert(dst, value);
        }

        self.index = block.phi_len();

        Ok(())
    }

    fn operand(&self, operand: &Operand) -> Result<Value, InterpError> {
        self.operand_at(operand, self.index)
    }

    fn operand_at(&self, operand: &Operand, index: usize) -> Result<Value, InterpError> {
        match operand {
            Operand::Const(v) => Ok(v.clone()),
            Operand::Register(name) => {
                self.env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| InterpError::UndefinedRegister {
                        pc: Pc {
                            block: self.block.clone(),
                            index,
                        },
                        name: name.clone(),
                    })
            }
            Operand::Label(_) => unreachable!("label operand in value position"),
        }
    }

    fn read_register(&self, name: &str) -> Result<Value, InterpError> {
        self.operand(&Operand::Register(name.to_string()))
    }
}

/// Runs a CFG to completion with breakpoints disabled, collecting output.
/// This is the convenience entry point for callers that do not need
/// suspension, tracing or cancellation.
pub fn run_to_exit(
    cfg: &Cfg,
    input: &mut dyn InputSource,
    output: &mut dyn OutputSink,
) -> Result<(), InterpError> {
    let mut interp = Interp::new(cfg, InterpOptions { breakpoints: false });

    match interp.run(input, output, None, &Cancellation::new())? {
        Halt::Exited => Ok(()),
        Halt::Breakpoint(_) => unreachable!("breakpoints are disabled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_il;

    fn run_program(source: &str, input: &[i64]) -> Result<Vec<Value>, InterpError> {
        let cfg = parse_il(source).unwrap();
        let mut input = VecInput::from_ints(input);
        let mut output = VecOutput::default();

        run_to_exit(&cfg, &mut input, &mut output)?;

        Ok(output.values)
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    // division by repeated doubling: reads N and M, writes N/M then N%M
    const DIVISION: &str = r#"
@main:
    read %N
    read %M
    %q = 0
    %r = %N
@outer:
    %small = %r < %M
    branch %small ? @done : @double
@double:
    %d = %M
    %p = 1
@dloop:
    %d2 = %d << 1
    %past = %r < %d2
    branch %past ? @apply : @grow
@grow:
    %d = %d2
    %p = %p << 1
    goto @dloop
@apply:
    %r = %r - %d
    %q = %q + %p
    goto @outer
@done:
    write %q
    write %r
    exit
"#;

    // a^b mod m by square-and-multiply
    const MODEXP: &str = r#"
@main:
    read %a
    read %b
    read %m
    %res = 1
    %base = %a % %m
@loop:
    %zero = %b == 0
    branch %zero ? @fin : @body
@body:
    %bit = %b & 1
    branch %bit ? @mul : @next
@mul:
    %t = %res * %base
    %res = %t % %m
    goto @next
@next:
    %b = %b >> 1
    %sq = %base * %base
    %base = %sq % %m
    goto @loop
@fin:
    write %res
    exit
"#;

    // smallest a >= 1 with N = a^2 + b^2 and a <= b, else -1
    const SUM_OF_SQUARES: &str = r#"
@main:
    read %N
    %a = 1
@outer:
    %aa = %a * %a
    %lim = %aa + %aa
    %hopeless = %N < %lim
    branch %hopeless ? @fail : @inner
@inner:
    %rem = %N - %aa
    %b = %a
@bloop:
    %bb = %b * %b
    %low = %bb < %rem
    branch %low ? @binc : @bchk
@binc:
    %b = %b + 1
    goto @bloop
@bchk:
    %hit = %bb == %rem
    branch %hit ? @found : @anext
@anext:
    %a = %a + 1
    goto @outer
@found:
    write %a
    write %b
    exit
@fail:
    write -1
    exit
"#;

    // fizzbuzz surrogate over divisors 2 and 5 with sentinel constants
    const FIZZBUZZ: &str = r#"
@main:
    read %N
    %i = 1
@loop:
    %over = %N < %i
    branch %over ? @end : @body
@body:
    %m2 = %i % 2
    %m5 = %i % 5
    %f = %m2 == 0
    %z = %m5 == 0
    %both = %f & %z
    branch %both ? @fizzbuzz : @chk2
@chk2:
    branch %f ? @fizz : @chk5
@chk5:
    branch %z ? @buzz : @plain
@fizzbuzz:
    write 51228422
    goto @next
@fizz:
    write 5122
    goto @next
@buzz:
    write 8422
    goto @next
@plain:
    write 1
    goto @next
@next:
    %i = %i + 1
    goto @loop
@end:
    exit
"#;

    // interactive binary search over [0, 1024): writes a guess, reads the
    // oracle's answer (0 hit, positive go higher, negative go lower)
    const BINARY_SEARCH: &str = r#"
@main:
    %lo = 0
    %hi = 1024
@loop:
    %sum = %lo + %hi
    %mid = %sum >> 1
    write %mid
    read %r
    %hit = %r == 0
    branch %hit ? @found : @cmp
@cmp:
    %up = 0 < %r
    branch %up ? @higher : @lower
@higher:
    %lo = %mid + 1
    goto @loop
@lower:
    %hi = %mid
    goto @loop
@found:
    write 88
    exit
"#;

    #[test]
    fn s1_division_by_repeated_doubling() {
        assert_eq!(run_program(DIVISION, &[17, 5]).unwrap(), ints(&[3, 2]));
        assert_eq!(run_program(DIVISION, &[100, 10]).unwrap(), ints(&[10, 0]));
        assert_eq!(run_program(DIVISION, &[3, 7]).unwrap(), ints(&[0, 3]));
    }

    #[test]
    fn s2_modular_exponentiation() {
        assert_eq!(run_program(MODEXP, &[7, 13, 11]).unwrap(), ints(&[2]));
        assert_eq!(run_program(MODEXP, &[2, 10, 1000]).unwrap(), ints(&[24]));
    }

    #[test]
    fn s3_sum_of_squares() {
        assert_eq!(run_program(SUM_OF_SQUARES, &[25]).unwrap(), ints(&[3, 4]));
        assert_eq!(run_program(SUM_OF_SQUARES, &[3]).unwrap(), ints(&[-1]));
        assert_eq!(run_program(SUM_OF_SQUARES, &[2]).unwrap(), ints(&[1, 1]));
    }

    #[test]
    fn s4_fizzbuzz_surrogate() {
        assert_eq!(
            run_program(FIZZBUZZ, &[5]).unwrap(),
            ints(&[1, 5122, 1, 5122, 8422])
        );
        assert_eq!(run_program(FIZZBUZZ, &[0]).unwrap(), ints(&[]));
        assert_eq!(
            run_program(FIZZBUZZ, &[10]).unwrap(),
            ints(&[1, 5122, 1, 5122, 8422, 5122, 1, 5122, 1, 51228422])
        );
    }

    #[test]
    fn s5_interactive_binary_search() {
        // oracle script locating 742
        let answers = [1, -1, 1, 1, 1, -1, -1, 1, 0];
        let written = run_program(BINARY_SEARCH, &answers).unwrap();

        assert_eq!(*written.last().unwrap(), Value::from(88));
        assert!(written.len() - 1 <= 10, "took {} guesses", written.len() - 1);
        assert_eq!(written[written.len() - 2], Value::from(742));
    }

    #[test]
    fn s6_phi_in_entry_block_is_unbound() {
        let source = "@top:\n    %x = phi [ 0, @loop ]\n    goto @loop\n@loop:\n    goto @top\n";
        let err = run_program(source, &[]).unwrap_err();

        assert!(matches!(
            err,
            InterpError::UnboundPhi { from: None, .. }
        ));
    }

    #[test]
    fn phis_evaluate_in_parallel() {
        // the swap: %x and %y read each other's pre-entry values
        let source = r#"
@main:
    %x = 1
    %y = 2
    %first = 1
    goto @swap
@swap:
    %x = phi [ %y, @main ], [ %y, @again ]
    %y = phi [ %x, @main ], [ %x, @again ]
    branch %first ? @again : @out
@again:
    %first = 0
    goto @swap
@out:
    write %x
    write %y
    exit
"#;

        // two trips through @swap swap twice
        assert_eq!(run_program(source, &[]).unwrap(), ints(&[1, 2]));
    }

    #[test]
    fn branch_is_truthy_on_any_nonzero_value() {
        let source = r#"
@main:
    read %c
    branch %c ? @yes : @no
@yes:
    write 1
    exit
@no:
    write 0
    exit
"#;

        assert_eq!(run_program(source, &[5]).unwrap(), ints(&[1]));
        assert_eq!(run_program(source, &[-3]).unwrap(), ints(&[1]));
        assert_eq!(run_program(source, &[0]).unwrap(), ints(&[0]));
    }

    #[test]
    fn determinism_output_and_trace_are_reproducible() {
        let cfg = parse_il(DIVISION).unwrap();

        let mut runs = Vec::new();

        for _ in 0..2 {
            let mut input = VecInput::from_ints(&[17, 5]);
            let mut output = VecOutput::default();
            let mut trace = VecTrace::default();
            let mut interp = Interp::new(&cfg, InterpOptions { breakpoints: false });

            let halt = interp
                .run(
                    &mut input,
                    &mut output,
                    Some(&mut trace),
                    &Cancellation::new(),
                )
                .unwrap();

            assert_eq!(halt, Halt::Exited);
            runs.push((output.values, trace.entries));
        }

        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn trace_records_block_index_and_kind() {
        let cfg = parse_il("@a:\n    %x = 1\n    write %x\n    exit\n").unwrap();
        let mut input = VecInput::default();
        let mut output = VecOutput::default();
        let mut trace = VecTrace::default();
        let mut interp = Interp::new(&cfg, InterpOptions::default());

        interp
            .run(
                &mut input,
                &mut output,
                Some(&mut trace),
                &Cancellation::new(),
            )
            .unwrap();

        assert_eq!(
            trace.entries,
            [
                ("a".to_string(), 0, "mov"),
                ("a".to_string(), 1, "write"),
                ("a".to_string(), 2, "exit"),
            ]
        );
    }

    #[test]
    fn breakpoints_suspend_and_resume() {
        let source = r#"
@main:
    %x = 41
    brkpt !check
    %x = %x + 1
    write %x
    exit
"#;
        let cfg = parse_il(source).unwrap();
        let mut input = VecInput::default();
        let mut output = VecOutput::default();
        let cancel = Cancellation::new();
        let mut interp = Interp::new(&cfg, InterpOptions { breakpoints: true });

        let halt = interp.run(&mut input, &mut output, None, &cancel).unwrap();

        match halt {
            Halt::Breakpoint(hit) => {
                assert_eq!(hit.name, "check");
                assert_eq!(hit.pc.block, "main");
                assert_eq!(interp.register("x"), Some(&Value::from(41)));
                assert_eq!(interp.registers().len(), 1);
            }
            Halt::Exited => panic!("expected a breakpoint"),
        }

        let halt = interp.run(&mut input, &mut output, None, &cancel).unwrap();

        assert_eq!(halt, Halt::Exited);
        assert_eq!(output.values, ints(&[42]));
    }

    #[test]
    fn disabled_breakpoints_are_noops() {
        let source = "@main:\n    brkpt !skip\n    write 7\n    exit\n";

        assert_eq!(run_program(source, &[]).unwrap(), ints(&[7]));
    }

    #[test]
    fn undefined_register_is_reported_with_its_pc() {
        let err = run_program("@a:\n    write %ghost\n    exit\n", &[]).unwrap_err();

        match err {
            InterpError::UndefinedRegister { pc, name } => {
                assert_eq!(name, "ghost");
                assert_eq!(pc.block, "a");
                assert_eq!(pc.index, 0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn division_by_zero_fails() {
        let err = run_program("@a:\n    %x = 1 / 0\n    exit\n", &[]).unwrap_err();
        assert!(matches!(err, InterpError::DivByZero { .. }));

        let err = run_program("@a:\n    %x = 1 % 0\n    exit\n", &[]).unwrap_err();
        assert!(matches!(err, InterpError::DivByZero { .. }));
    }

    #[test]
    fn negative_shift_fails() {
        let err = run_program("@a:\n    %x = 1 << -1\n    exit\n", &[]).unwrap_err();
        assert!(matches!(err, InterpError::NegativeShift { .. }));
    }

    #[test]
    fn truncated_division_semantics() {
        let out = run_program(
            "@a:\n    %q = -7 / 2\n    %r = -7 % 2\n    write %q\n    write %r\n    exit\n",
            &[],
        )
        .unwrap();

        assert_eq!(out, ints(&[-3, -1]));
    }

    #[test]
    fn arithmetic_right_shift() {
        let out = run_program(
            "@a:\n    %x = -8 >> 1\n    write %x\n    exit\n",
            &[],
        )
        .unwrap();

        assert_eq!(out, ints(&[-4]));
    }

    #[test]
    fn end_of_input_during_read_is_an_io_error() {
        let err = run_program("@a:\n    read %x\n    exit\n", &[]).unwrap_err();

        assert!(matches!(err, InterpError::Io { .. }));
    }

    #[test]
    fn malformed_token_input_is_an_io_error() {
        let cfg = parse_il("@a:\n    read %x\n    exit\n").unwrap();
        let mut input = TokenInput::new("not-a-number\n".as_bytes());
        let mut output = VecOutput::default();

        let err = run_to_exit(&cfg, &mut input, &mut output).unwrap_err();
        assert!(matches!(err, InterpError::Io { .. }));
    }

    #[test]
    fn token_input_splits_on_any_whitespace() {
        let cfg = parse_il(
            "@a:\n    read %x\n    read %y\n    read %z\n    write %z\n    write %y\n    write %x\n    exit\n",
        )
        .unwrap();
        let mut input = TokenInput::new("1 2\n\t3\n".as_bytes());
        let mut output = VecOutput::default();

        run_to_exit(&cfg, &mut input, &mut output).unwrap();
        assert_eq!(output.values, ints(&[3, 2, 1]));
    }

    #[test]
    fn cancellation_stops_at_a_branch() {
        // an infinite loop; cancel before running
        let cfg = parse_il("@spin:\n    goto @spin\n").unwrap();
        let cancel = Cancellation::new();
        cancel.cancel();

        let mut interp = Interp::new(&cfg, InterpOptions::default());
        let mut input = VecInput::default();
        let mut output = VecOutput::default();

        let err = interp
            .run(&mut input, &mut output, None, &cancel)
            .unwrap_err();

        assert!(matches!(err, InterpError::Cancelled { .. }));
    }

    #[test]
    fn big_arithmetic_does_not_overflow() {
        // 2^128 via shifting
        let out = run_program(
            "@a:\n    %x = 1 << 128\n    write %x\n    exit\n",
            &[],
        )
        .unwrap();

        assert_eq!(
            out[0],
            Value::parse("340282366920938463463374607431768211456").unwrap()
        );
    }
}
