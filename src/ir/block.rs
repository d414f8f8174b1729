//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{Inst, IrError, MetaMap, Operand};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A single basic block: a run of non-terminator instructions ended by
/// exactly one terminator, with phis restricted to the head of the run.
///
/// The block also carries the ordered list of its predecessors' labels.
/// That list is a cache mirroring the terminators of the rest of the CFG;
/// the [`Cfg`](crate::ir::Cfg) mutation operations keep it consistent and
/// [`Cfg::validate`](crate::ir::Cfg::validate) re-checks it.
///
/// Instruction indices used for metadata addressing run `0..num_insts()`,
/// with the terminator addressable at index `num_insts()`.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct BasicBlock {
    label: String,
    insts: Vec<Inst>,
    // one metadata map per instruction, kept index-aligned with `insts`
    inst_meta: Vec<MetaMap>,
    term: Option<Inst>,
    term_meta: MetaMap,
    preds: Vec<String>,
    meta: MetaMap,
}

impl BasicBlock {
    pub(in crate::ir) fn new(label: String) -> Self {
        Self {
            label,
            insts: Vec::new(),
            inst_meta: Vec::new(),
            term: None,
            term_meta: MetaMap::new(),
            preds: Vec::new(),
            meta: MetaMap::new(),
        }
    }

    /// The block's label, stored without the `@` sigil.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(in crate::ir) fn set_label(&mut self, label: String) {
        self.label = label;
    }

    /// The non-terminator instructions in order, phis first.
    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    /// The number of non-terminator instructions.
    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    /// The block's terminator, if one has been set yet. A complete CFG has
    /// a terminator in every block; `None` only occurs mid-edit.
    pub fn terminator(&self) -> Option<&Inst> {
        self.term.as_ref()
    }

    /// The instruction at `pos`, where `pos == num_insts()` addresses the
    /// terminator.
    pub fn inst(&self, pos: usize) -> Option<&Inst> {
        if pos == self.insts.len() {
            self.term.as_ref()
        } else {
            self.insts.get(pos)
        }
    }

    /// The number of leading phi instructions.
    pub fn phi_len(&self) -> usize {
        self.insts.iter().take_while(|i| i.is_phi()).count()
    }

    /// The phis at the head of the block.
    pub fn phis(&self) -> &[Inst] {
        &self.insts[..self.phi_len()]
    }

    /// The non-phi, non-terminator instructions.
    pub fn non_phis(&self) -> &[Inst] {
        &self.insts[self.phi_len()..]
    }

    /// Iterates every instruction including the terminator.
    pub fn iter_all(&self) -> impl Iterator<Item = &Inst> {
        self.insts.iter().chain(self.term.as_ref())
    }

    /// The ordered predecessor labels.
    pub fn preds(&self) -> &[String] {
        &self.preds
    }

    /// Appends an instruction. A terminator instruction becomes the block's
    /// terminator; anything else lands at the end of the instruction list.
    /// Both are rejected once a terminator is present.
    pub fn append(&mut self, inst: Inst) -> Result<(), IrError> {
        if self.term.is_some() {
            return Err(IrError::TerminatorPresent(self.label.clone()));
        }

        if inst.is_terminator() {
            self.term = Some(inst);
            return Ok(());
        }

        if inst.is_phi() && self.phi_len() != self.insts.len() {
            return Err(IrError::MalformedInstruction(format!(
                "phi after non-phi in block `@{}`",
                self.label
            )));
        }

        self.insts.push(inst);
        self.inst_meta.push(MetaMap::new());

        Ok(())
    }

    /// Inserts a non-terminator instruction at `pos`. Phis may only land in
    /// the phi prefix and non-phis only after it. Metadata at indices
    /// `>= pos` shifts up by one.
    pub fn insert(&mut self, pos: usize, inst: Inst) -> Result<(), IrError> {
        if inst.is_terminator() {
            return Err(IrError::MalformedInstruction(format!(
                "terminator inserted mid-block in `@{}`, use set_terminator",
                self.label
            )));
        }

        if pos > self.insts.len() {
            return Err(IrError::MalformedInstruction(format!(
                "position {pos} out of bounds in block `@{}`",
                self.label
            )));
        }

        let phi_len = self.phi_len();
        let in_range = if inst.is_phi() {
            pos <= phi_len
        } else {
            pos >= phi_len
        };

        if !in_range {
            return Err(IrError::MalformedInstruction(format!(
                "phi ordering violated at position {pos} in block `@{}`",
                self.label
            )));
        }

        self.insts.insert(pos, inst);
        self.inst_meta.insert(pos, MetaMap::new());

        Ok(())
    }

    /// Replaces the instruction at `pos` in place, retaining its metadata.
    /// Returns the replaced instruction.
    pub fn replace(&mut self, pos: usize, inst: Inst) -> Result<Inst, IrError> {
        if inst.is_terminator() || pos >= self.insts.len() {
            return Err(IrError::MalformedInstruction(format!(
                "cannot replace position {pos} of block `@{}` with `{inst}`",
                self.label
            )));
        }

        let phi_len = self.phi_len();
        let ok = if inst.is_phi() {
            // fine anywhere the result is still a phi prefix: replacing the
            // first non-phi with a phi extends the prefix contiguously
            pos <= phi_len
        } else {
            pos + 1 >= phi_len
        };

        if !ok {
            return Err(IrError::MalformedInstruction(format!(
                "phi ordering violated at position {pos} in block `@{}`",
                self.label
            )));
        }

        Ok(std::mem::replace(&mut self.insts[pos], inst))
    }

    /// Removes and returns the instruction at `pos`, dropping its metadata.
    /// Metadata at indices `> pos` shifts down by one.
    pub fn remove(&mut self, pos: usize) -> Result<Inst, IrError> {
        if pos >= self.insts.len() {
            return Err(IrError::MalformedInstruction(format!(
                "position {pos} out of bounds in block `@{}`",
                self.label
            )));
        }

        self.inst_meta.remove(pos);

        Ok(self.insts.remove(pos))
    }

    /// Sets the terminator, returning the previous one if any. The
    /// terminator's metadata is retained across replacement.
    pub fn set_terminator(&mut self, inst: Inst) -> Result<Option<Inst>, IrError> {
        if !inst.is_terminator() {
            return Err(IrError::MalformedInstruction(format!(
                "`{inst}` is not a terminator"
            )));
        }

        Ok(self.term.replace(inst))
    }

    pub(in crate::ir) fn terminator_mut(&mut self) -> Option<&mut Inst> {
        self.term.as_mut()
    }

    /// Registers `pred` as a predecessor and appends `(default, pred)` to
    /// every phi. Idempotent: a label already present changes nothing.
    pub fn add_pred(&mut self, pred: impl Into<String>, default: &Operand) -> Result<(), IrError> {
        let pred = pred.into();

        if self.preds.iter().any(|p| *p == pred) {
            return Ok(());
        }

        default.check_value("phi default")?;

        for inst in self.insts.iter_mut().take_while(|i| i.is_phi()) {
            if let Inst::Phi { entries, .. } = inst {
                entries.push((default.clone(), pred.clone()));
            }
        }

        self.preds.push(pred);

        Ok(())
    }

    /// Unregisters `pred`, dropping the matching entry from every phi.
    /// Returns whether the label was a predecessor.
    pub fn remove_pred(&mut self, pred: &str) -> bool {
        let Some(at) = self.preds.iter().position(|p| p == pred) else {
            return false;
        };

        self.preds.remove(at);

        for inst in self.insts.iter_mut().take_while(|i| i.is_phi()) {
            if let Inst::Phi { entries, .. } = inst {
                entries.retain(|(_, label)| label != pred);
            }
        }

        true
    }

    /// Renames a predecessor in place, rewriting the matching entry label
    /// of every phi. Used when control-flow edits move an incoming edge's
    /// source without changing the value that flows along it.
    pub fn rename_pred(&mut self, old: &str, new: &str) {
        for pred in self.preds.iter_mut() {
            if pred == old {
                *pred = new.to_string();
            }
        }

        for inst in self.insts.iter_mut().take_while(|i| i.is_phi()) {
            if let Inst::Phi { entries, .. } = inst {
                for (_, label) in entries.iter_mut() {
                    if label == old {
                        *label = new.to_string();
                    }
                }
            }
        }
    }

    pub(in crate::ir) fn set_preds(&mut self, preds: Vec<String>) {
        self.preds = preds;
    }

    /// Block-scoped metadata.
    pub fn meta(&self) -> &MetaMap {
        &self.meta
    }

    /// Block-scoped metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut MetaMap {
        &mut self.meta
    }

    /// Metadata of the instruction at `pos`; `pos == num_insts()` addresses
    /// the terminator.
    pub fn inst_meta(&self, pos: usize) -> Option<&MetaMap> {
        if pos == self.insts.len() {
            self.term.as_ref().map(|_| &self.term_meta)
        } else {
            self.inst_meta.get(pos)
        }
    }

    /// Metadata of the instruction at `pos`, mutable.
    pub fn inst_meta_mut(&mut self, pos: usize) -> Option<&mut MetaMap> {
        if pos == self.insts.len() {
            self.term.as_ref()?;
            Some(&mut self.term_meta)
        } else {
            self.inst_meta.get_mut(pos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    fn block() -> BasicBlock {
        BasicBlock::new("b".into())
    }

    fn add(dst: &str) -> Inst {
        Inst::binary(BinaryOp::Add, dst, Operand::reg("a"), Operand::int(1)).unwrap()
    }

    fn phi(dst: &str, labels: &[&str]) -> Inst {
        Inst::phi(
            dst,
            labels
                .iter()
                .map(|l| (Operand::int(0), l.to_string()))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn append_stops_at_terminator() {
        let mut b = block();
        b.append(add("x")).unwrap();
        b.append(Inst::Exit).unwrap();

        assert!(b.append(add("y")).is_err());
        assert!(b.append(Inst::Exit).is_err());
        assert_eq!(b.terminator(), Some(&Inst::Exit));
    }

    #[test]
    fn phis_must_stay_at_the_head() {
        let mut b = block();
        b.append(phi("x", &["p"])).unwrap();
        b.append(add("y")).unwrap();

        assert!(b.append(phi("z", &["p"])).is_err());
        assert!(b.insert(2, phi("z", &["p"])).is_err());
        b.insert(1, phi("z", &["p"])).unwrap();

        assert_eq!(b.phi_len(), 2);
        assert_eq!(b.non_phis().len(), 1);
        assert!(b.insert(0, add("w")).is_err());
    }

    #[test]
    fn replace_retains_metadata_remove_drops_it() {
        let mut b = block();
        b.append(add("x")).unwrap();
        b.append(add("y")).unwrap();
        b.inst_meta_mut(0).unwrap().set("k", ["v"]);
        b.inst_meta_mut(1).unwrap().set("other", ["w"]);

        b.replace(0, add("z")).unwrap();
        assert!(b.inst_meta(0).unwrap().get("k").is_some());

        b.remove(0).unwrap();
        assert_eq!(b.insts()[0], add("y"));
        assert!(b.inst_meta(0).unwrap().get("other").is_some());
        assert!(b.inst_meta(0).unwrap().get("k").is_none());
    }

    #[test]
    fn insert_shifts_instruction_metadata() {
        let mut b = block();
        b.append(add("x")).unwrap();
        b.append(add("y")).unwrap();
        b.inst_meta_mut(1).unwrap().set("k", ["v"]);

        b.insert(1, add("mid")).unwrap();

        // the entry that was at index 1 is now at index 2
        assert!(b.inst_meta(1).unwrap().get("k").is_none());
        assert!(b.inst_meta(2).unwrap().get("k").is_some());
    }

    #[test]
    fn pred_changes_keep_phis_consistent() {
        let mut b = block();
        b.append(phi("x", &["p"])).unwrap();
        b.set_preds(vec!["p".into()]);

        b.add_pred("q", &Operand::int(0)).unwrap();
        // idempotent
        b.add_pred("q", &Operand::int(0)).unwrap();

        match &b.insts()[0] {
            Inst::Phi { entries, .. } => assert_eq!(entries.len(), 2),
            _ => unreachable!(),
        }

        assert!(b.remove_pred("p"));
        assert!(!b.remove_pred("p"));

        match &b.insts()[0] {
            Inst::Phi { entries, .. } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].1, "q");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn terminator_metadata_is_addressable_past_the_end() {
        let mut b = block();
        b.append(add("x")).unwrap();
        b.append(Inst::Exit).unwrap();

        b.inst_meta_mut(1).unwrap().set("k", ["v"]);
        assert!(b.inst_meta(1).unwrap().get("k").is_some());
        assert!(b.inst_meta(2).is_none());
    }
}
