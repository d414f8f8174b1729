//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{IrError, Value};
use smallvec::{smallvec, SmallVec};
use std::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Checks that a register, label or breakpoint name is non-empty and made
/// of `[.\w]` characters. Names are stored without their `%`/`@` sigils.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

/// A single instruction operand.
///
/// Instructions constrain which kinds they accept in each position, e.g. a
/// `mov` source may be a constant or a register but never a label. The
/// builders on [`Inst`] enforce those constraints at construction.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Operand {
    /// An integer constant
    Const(Value),
    /// A virtual register, stored without the `%` sigil
    Register(String),
    /// A block label, stored without the `@` sigil
    Label(String),
}

impl Operand {
    /// Convenience constructor for a register operand.
    pub fn reg(name: impl Into<String>) -> Self {
        Self::Register(name.into())
    }

    /// Convenience constructor for a constant operand.
    pub fn int(v: i64) -> Self {
        Self::Const(Value::from(v))
    }

    /// Returns the register name if this is a register operand.
    pub fn as_register(&self) -> Option<&str> {
        match self {
            Self::Register(name) => Some(name),
            _ => None,
        }
    }

    /// Whether this operand may appear in a value position, i.e. it is a
    /// constant or a register.
    pub fn is_value(&self) -> bool {
        !matches!(self, Self::Label(_))
    }

    pub(in crate::ir) fn check_value(&self, what: &str) -> Result<(), IrError> {
        match self {
            Self::Const(_) => Ok(()),
            Self::Register(name) if !is_valid_name(name) => Err(IrError::MalformedInstruction(
                format!("invalid name `{name}` in {what}"),
            )),
            Self::Register(_) => Ok(()),
            Self::Label(name) => Err(IrError::MalformedInstruction(format!(
                "label `@{name}` cannot be used as a value in {what}"
            ))),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Register(name) => write!(f, "%{name}"),
            Self::Label(name) => write!(f, "@{name}"),
        }
    }
}

/// The binary arithmetic and bitwise operators.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, truncating toward zero
    Div,
    /// `%`, remainder matching truncated division
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`, arithmetic
    Shr,
}

impl BinaryOp {
    /// The surface-syntax spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }

    /// Whether swapping the operands preserves the result.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor
        )
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Shl => "shl",
            Self::Shr => "shr",
        }
    }
}

/// The comparison operators. `>`, `>=`, `-x` and `~x` are surface aliases
/// that the reader normalizes away, they are not distinct instructions.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Leq,
}

impl CmpOp {
    /// The surface-syntax spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Leq => "<=",
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Leq => "leq",
        }
    }
}

/// A single IL instruction.
///
/// Structural equality on these is derived: instructions carry no source
/// positions, those live with the reader. Metadata attached to an
/// instruction lives in its block slot, not here, so it survives
/// `replace` and moves with the instruction.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Inst {
    /// `%dst = src`
    Mov {
        /// The register being defined
        dst: String,
        /// The copied value, a constant or register
        src: Operand,
    },
    /// `%dst = phi [ v, @l ], ...`
    Phi {
        /// The register being defined
        dst: String,
        /// One `(value, predecessor label)` entry per predecessor
        entries: Vec<(Operand, String)>,
    },
    /// `%dst = lhs op rhs` for the arithmetic/bitwise operators
    Binary {
        /// The operator
        op: BinaryOp,
        /// The register being defined
        dst: String,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// `%dst = lhs op rhs` for the comparisons, yielding `0` or `1`
    Cmp {
        /// The operator
        op: CmpOp,
        /// The register being defined
        dst: String,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// `goto @target`
    Goto {
        /// The label jumped to
        target: String,
    },
    /// `branch %cond ? @iftrue : @iffalse`
    Branch {
        /// The condition register, true on any non-zero value
        cond: String,
        /// Taken when the condition is non-zero
        iftrue: String,
        /// Taken when the condition is zero
        iffalse: String,
    },
    /// `exit`, halts the program successfully
    Exit,
    /// `read %dst`, consumes the next input integer
    Read {
        /// The register being defined
        dst: String,
    },
    /// `write src`, emits an integer to the output
    Write {
        /// The emitted value, a constant or register
        src: Operand,
    },
    /// `brkpt !name`, a cooperative suspension point; a no-op for
    /// program state
    Brkpt {
        /// The breakpoint's name
        name: String,
    },
}

fn check_name(name: &str, what: &str) -> Result<(), IrError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(IrError::MalformedInstruction(format!(
            "invalid name `{name}` in {what}"
        )))
    }
}

impl Inst {
    /// Builds a `mov`. The source must be a constant or a register.
    pub fn mov(dst: impl Into<String>, src: Operand) -> Result<Self, IrError> {
        let dst = dst.into();
        check_name(&dst, "mov destination")?;
        src.check_value("mov source")?;

        Ok(Self::Mov { dst, src })
    }

    /// Builds a `phi`. At least one entry is required, the entry labels must
    /// be pairwise distinct, and every value must be a constant or register.
    pub fn phi(dst: impl Into<String>, entries: Vec<(Operand, String)>) -> Result<Self, IrError> {
        let dst = dst.into();
        check_name(&dst, "phi destination")?;

        if entries.is_empty() {
            return Err(IrError::MalformedInstruction(format!(
                "phi defining `%{dst}` has no entries"
            )));
        }

        for (value, label) in entries.iter() {
            value.check_value("phi entry")?;
            check_name(label, "phi entry label")?;
        }

        for (i, (_, label)) in entries.iter().enumerate() {
            if entries[..i].iter().any(|(_, other)| other == label) {
                return Err(IrError::MalformedInstruction(format!(
                    "phi defining `%{dst}` lists label `@{label}` twice"
                )));
            }
        }

        Ok(Self::Phi { dst, entries })
    }

    /// Builds an arithmetic or bitwise instruction.
    pub fn binary(
        op: BinaryOp,
        dst: impl Into<String>,
        lhs: Operand,
        rhs: Operand,
    ) -> Result<Self, IrError> {
        let dst = dst.into();
        check_name(&dst, "destination")?;
        lhs.check_value("left operand")?;
        rhs.check_value("right operand")?;

        Ok(Self::Binary { op, dst, lhs, rhs })
    }

    /// Builds a comparison instruction.
    pub fn cmp(
        op: CmpOp,
        dst: impl Into<String>,
        lhs: Operand,
        rhs: Operand,
    ) -> Result<Self, IrError> {
        let dst = dst.into();
        check_name(&dst, "destination")?;
        lhs.check_value("left operand")?;
        rhs.check_value("right operand")?;

        Ok(Self::Cmp { op, dst, lhs, rhs })
    }

    /// Builds a `goto`.
    pub fn goto(target: impl Into<String>) -> Result<Self, IrError> {
        let target = target.into();
        check_name(&target, "goto target")?;

        Ok(Self::Goto { target })
    }

    /// Builds a `branch`. Identical true/false targets are permitted; the
    /// interpreter degenerates to an unconditional transfer for them.
    pub fn branch(
        cond: impl Into<String>,
        iftrue: impl Into<String>,
        iffalse: impl Into<String>,
    ) -> Result<Self, IrError> {
        let (cond, iftrue, iffalse) = (cond.into(), iftrue.into(), iffalse.into());
        check_name(&cond, "branch condition")?;
        check_name(&iftrue, "branch target")?;
        check_name(&iffalse, "branch target")?;

        Ok(Self::Branch {
            cond,
            iftrue,
            iffalse,
        })
    }

    /// Builds a `read`.
    pub fn read(dst: impl Into<String>) -> Result<Self, IrError> {
        let dst = dst.into();
        check_name(&dst, "read destination")?;

        Ok(Self::Read { dst })
    }

    /// Builds a `write`. The source must be a constant or a register.
    pub fn write(src: Operand) -> Result<Self, IrError> {
        src.check_value("write source")?;

        Ok(Self::Write { src })
    }

    /// Builds a `brkpt`.
    pub fn brkpt(name: impl Into<String>) -> Result<Self, IrError> {
        let name = name.into();
        check_name(&name, "breakpoint name")?;

        Ok(Self::Brkpt { name })
    }

    /// The register this instruction defines, if any.
    pub fn def(&self) -> Option<&str> {
        match self {
            Self::Mov { dst, .. }
            | Self::Phi { dst, .. }
            | Self::Binary { dst, .. }
            | Self::Cmp { dst, .. }
            | Self::Read { dst } => Some(dst),
            _ => None,
        }
    }

    /// Every operand this instruction reads, including label operands of
    /// phis and terminators.
    pub fn uses(&self) -> SmallVec<[Operand; 2]> {
        match self {
            Self::Mov { src, .. } | Self::Write { src } => smallvec![src.clone()],
            Self::Phi { entries, .. } => entries
                .iter()
                .flat_map(|(value, label)| [value.clone(), Operand::Label(label.clone())])
                .collect(),
            Self::Binary { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => {
                smallvec![lhs.clone(), rhs.clone()]
            }
            Self::Goto { target } => smallvec![Operand::Label(target.clone())],
            Self::Branch {
                cond,
                iftrue,
                iffalse,
            } => smallvec![
                Operand::Register(cond.clone()),
                Operand::Label(iftrue.clone()),
                Operand::Label(iffalse.clone()),
            ],
            Self::Exit | Self::Read { .. } | Self::Brkpt { .. } => smallvec![],
        }
    }

    /// Whether this instruction ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Goto { .. } | Self::Branch { .. } | Self::Exit)
    }

    /// Whether this is a phi.
    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// The labels control may transfer to after this instruction. Empty for
    /// `exit` and for non-terminators.
    pub fn successors(&self) -> SmallVec<[&str; 2]> {
        match self {
            Self::Goto { target } => smallvec![target.as_str()],
            Self::Branch {
                iftrue, iffalse, ..
            } => smallvec![iftrue.as_str(), iffalse.as_str()],
            _ => smallvec![],
        }
    }

    /// Rewrites every use of register `old` to `new`. Definitions and
    /// labels are untouched. Substituting a non-register into a branch
    /// condition is malformed, conditions must stay registers.
    pub fn substitute(&mut self, old: &str, new: &Operand) -> Result<(), IrError> {
        new.check_value("substitution")?;

        let subst = |operand: &mut Operand| {
            if operand.as_register() == Some(old) {
                *operand = new.clone();
            }
        };

        match self {
            Self::Mov { src, .. } | Self::Write { src } => subst(src),
            Self::Phi { entries, .. } => {
                for (value, _) in entries.iter_mut() {
                    subst(value);
                }
            }
            Self::Binary { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => {
                subst(lhs);
                subst(rhs);
            }
            Self::Branch { cond, .. } if cond == old => match new {
                Operand::Register(name) => *cond = name.clone(),
                _ => {
                    return Err(IrError::MalformedInstruction(format!(
                        "branch condition `%{old}` cannot be replaced by `{new}`"
                    )))
                }
            },
            _ => {}
        }

        Ok(())
    }

    /// A short mnemonic for the instruction, used by trace records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Mov { .. } => "mov",
            Self::Phi { .. } => "phi",
            Self::Binary { op, .. } => op.mnemonic(),
            Self::Cmp { op, .. } => op.mnemonic(),
            Self::Goto { .. } => "goto",
            Self::Branch { .. } => "branch",
            Self::Exit => "exit",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Brkpt { .. } => "brkpt",
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mov { dst, src } => write!(f, "%{dst} = {src}"),
            Self::Phi { dst, entries } => {
                write!(f, "%{dst} = phi ")?;

                for (i, (value, label)) in entries.iter().enumerate() {
                    let sep = if i == 0 { "" } else { ", " };
                    write!(f, "{sep}[ {value}, @{label} ]")?;
                }

                Ok(())
            }
            Self::Binary { op, dst, lhs, rhs } => {
                write!(f, "%{dst} = {lhs} {} {rhs}", op.symbol())
            }
            Self::Cmp { op, dst, lhs, rhs } => write!(f, "%{dst} = {lhs} {} {rhs}", op.symbol()),
            Self::Goto { target } => write!(f, "goto @{target}"),
            Self::Branch {
                cond,
                iftrue,
                iffalse,
            } => write!(f, "branch %{cond} ? @{iftrue} : @{iffalse}"),
            Self::Exit => write!(f, "exit"),
            Self::Read { dst } => write!(f, "read %{dst}"),
            Self::Write { src } => write!(f, "write {src}"),
            Self::Brkpt { name } => write!(f, "brkpt !{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_kinds_are_enforced() {
        assert!(Inst::mov("x", Operand::int(1)).is_ok());
        assert!(Inst::mov("x", Operand::reg("y")).is_ok());
        assert!(Inst::mov("x", Operand::Label("l".into())).is_err());
        assert!(Inst::mov("", Operand::int(1)).is_err());
        assert!(Inst::write(Operand::Label("l".into())).is_err());
    }

    #[test]
    fn phi_labels_must_be_distinct() {
        let ok = Inst::phi(
            "x",
            vec![
                (Operand::int(0), "a".into()),
                (Operand::reg("y"), "b".into()),
            ],
        );
        assert!(ok.is_ok());

        let dup = Inst::phi(
            "x",
            vec![(Operand::int(0), "a".into()), (Operand::int(1), "a".into())],
        );
        assert!(dup.is_err());
        assert!(Inst::phi("x", vec![]).is_err());
    }

    #[test]
    fn identical_branch_targets_are_permitted() {
        assert!(Inst::branch("c", "same", "same").is_ok());
    }

    #[test]
    fn defs_and_uses() {
        let add = Inst::binary(BinaryOp::Add, "x", Operand::reg("a"), Operand::int(2)).unwrap();
        assert_eq!(add.def(), Some("x"));
        assert_eq!(add.uses().len(), 2);

        let br = Inst::branch("c", "t", "f").unwrap();
        assert_eq!(br.def(), None);
        assert!(br.is_terminator());
        assert_eq!(br.successors().as_slice(), &["t", "f"]);

        assert!(Inst::Exit.is_terminator());
        assert!(Inst::Exit.successors().is_empty());
        assert!(!add.is_terminator());
    }

    #[test]
    fn substitute_rewrites_uses_only() {
        let mut inst =
            Inst::binary(BinaryOp::Mul, "x", Operand::reg("x"), Operand::reg("y")).unwrap();
        inst.substitute("x", &Operand::int(3)).unwrap();

        assert_eq!(
            inst,
            Inst::binary(BinaryOp::Mul, "x", Operand::int(3), Operand::reg("y")).unwrap()
        );

        let mut br = Inst::branch("c", "t", "f").unwrap();
        br.substitute("c", &Operand::reg("d")).unwrap();
        assert_eq!(br, Inst::branch("d", "t", "f").unwrap());
        assert!(br.substitute("d", &Operand::int(0)).is_err());
    }

    #[test]
    fn display_matches_surface_syntax() {
        let phi = Inst::phi(
            "x",
            vec![
                (Operand::int(0), "a".into()),
                (Operand::reg("y"), "b".into()),
            ],
        )
        .unwrap();

        assert_eq!(phi.to_string(), "%x = phi [ 0, @a ], [ %y, @b ]");
        assert_eq!(
            Inst::branch("c", "t", "f").unwrap().to_string(),
            "branch %c ? @t : @f"
        );
        assert_eq!(Inst::brkpt("here").unwrap().to_string(), "brkpt !here");
    }
}
