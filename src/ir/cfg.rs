//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{is_valid_name, BasicBlock, Inst, IrError, MetaMap, MetaPath, Operand};
use crate::utility::{SaHashMap, SaHashSet};
use smallvec::SmallVec;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// The control-flow graph of one program: an insertion-ordered registry of
/// basic blocks keyed by label, with a designated entry block.
///
/// Edges are always derived from terminators. The per-block predecessor
/// lists are a cache of the inverse relation: the mutation operations here
/// keep them consistent, and [`Self::validate`] re-checks everything after
/// a pass has been editing.
///
/// Blocks are owned by the registry and referenced by label everywhere
/// else, so cyclic control flow needs no cyclic ownership.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Cfg {
    order: Vec<String>,
    blocks: SaHashMap<String, BasicBlock>,
    entry: String,
    meta: MetaMap,
}

impl Cfg {
    /// Creates a CFG containing a single empty block that is the entry.
    pub fn new(entry: impl Into<String>) -> Result<Self, IrError> {
        let entry = entry.into();

        let mut cfg = Self {
            order: Vec::new(),
            blocks: SaHashMap::default(),
            entry: entry.clone(),
            meta: MetaMap::new(),
        };

        cfg.add_block(entry)?;

        Ok(cfg)
    }

    /// The entry block's label.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Re-designates the entry block.
    pub fn set_entry(&mut self, label: &str) -> Result<(), IrError> {
        if !self.blocks.contains_key(label) {
            return Err(IrError::NoSuchBlock(label.to_string()));
        }

        self.entry = label.to_string();

        Ok(())
    }

    /// The number of blocks.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the CFG has no blocks. Only transiently possible, a usable
    /// CFG always has at least its entry block.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether a block with this label exists.
    pub fn contains(&self, label: &str) -> bool {
        self.blocks.contains_key(label)
    }

    /// The block labels in registry (insertion) order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// The blocks in registry order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.order.iter().map(|label| &self.blocks[label])
    }

    /// Looks up a block by label.
    pub fn block(&self, label: &str) -> Option<&BasicBlock> {
        self.blocks.get(label)
    }

    /// Looks up a block by label, mutably.
    pub fn block_mut(&mut self, label: &str) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(label)
    }

    /// CFG-scoped metadata.
    pub fn meta(&self) -> &MetaMap {
        &self.meta
    }

    /// CFG-scoped metadata, mutable.
    pub fn meta_mut(&mut self) -> &mut MetaMap {
        &mut self.meta
    }

    /// Iterates every metadata map in the CFG with its scope path:
    /// CFG-scope first, then per block (in registry order) the block map
    /// followed by its instruction maps.
    pub fn iter_all_meta(&self) -> impl Iterator<Item = (MetaPath, &MetaMap)> {
        let blocks = self.blocks().flat_map(|block| {
            let label = block.label().to_string();
            let insts = (0..=block.num_insts()).filter_map({
                let label = label.clone();
                move |i| {
                    block
                        .inst_meta(i)
                        .map(|m| (MetaPath::Inst(label.clone(), i), m))
                }
            });

            std::iter::once((MetaPath::Block(label), block.meta())).chain(insts)
        });

        std::iter::once((MetaPath::Cfg, &self.meta)).chain(blocks)
    }

    /// Adds a fresh, empty block.
    pub fn add_block(&mut self, label: impl Into<String>) -> Result<&mut BasicBlock, IrError> {
        let label = label.into();

        if !is_valid_name(&label) {
            return Err(IrError::MalformedInstruction(format!(
                "invalid block label `{label}`"
            )));
        }

        if self.blocks.contains_key(&label) {
            return Err(IrError::DuplicateLabel(label));
        }

        self.order.push(label.clone());
        self.blocks
            .insert(label.clone(), BasicBlock::new(label.clone()));

        Ok(self.blocks.get_mut(&label).unwrap())
    }

    /// Removes a block. Rejected while other blocks still branch to it (a
    /// self-loop does not count) and for the entry block.
    pub fn remove_block(&mut self, label: &str) -> Result<BasicBlock, IrError> {
        let block = self
            .blocks
            .get(label)
            .ok_or_else(|| IrError::NoSuchBlock(label.to_string()))?;

        if block.preds().iter().any(|p| p != label) {
            return Err(IrError::HasPredecessors(label.to_string()));
        }

        if label == self.entry {
            return Err(IrError::MalformedCfg {
                issues: vec![format!("cannot remove the entry block `@{label}`")],
            });
        }

        let successors: SmallVec<[String; 2]> = block
            .terminator()
            .map(|t| t.successors().iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        for succ in successors {
            if let Some(s) = self.blocks.get_mut(&succ) {
                s.remove_pred(label);
            }
        }

        self.order.retain(|l| l != label);

        Ok(self.blocks.remove(label).unwrap())
    }

    /// Renames a block, rewriting every terminator target, phi label and
    /// predecessor entry that referenced the old name.
    pub fn rename_block(&mut self, old: &str, new: impl Into<String>) -> Result<(), IrError> {
        let new = new.into();

        if !is_valid_name(&new) {
            return Err(IrError::MalformedInstruction(format!(
                "invalid block label `{new}`"
            )));
        }

        if self.blocks.contains_key(&new) {
            return Err(IrError::DuplicateLabel(new));
        }

        let mut block = self
            .blocks
            .remove(old)
            .ok_or_else(|| IrError::NoSuchBlock(old.to_string()))?;

        block.set_label(new.clone());
        self.blocks.insert(new.clone(), block);

        for slot in self.order.iter_mut() {
            if slot == old {
                *slot = new.clone();
            }
        }

        if self.entry == old {
            self.entry = new.clone();
        }

        for label in self.order.clone() {
            let block = self.blocks.get_mut(&label).unwrap();
            block.rename_pred(old, &new);
            retarget_terminator(block, old, &new);
        }

        Ok(())
    }

    /// Rewrites the edge `from -> old_target` into `from -> new_target`,
    /// maintaining predecessor lists and phis on both targets.
    ///
    /// When `new_target` contains phis and `from` was not already one of
    /// its predecessors, `phi_default` supplies the value its phis receive
    /// for the new edge; omitting it is an error then.
    pub fn redirect(
        &mut self,
        from: &str,
        old_target: &str,
        new_target: &str,
        phi_default: Option<&Operand>,
    ) -> Result<(), IrError> {
        for label in [from, old_target, new_target] {
            if !self.blocks.contains_key(label) {
                return Err(IrError::NoSuchBlock(label.to_string()));
            }
        }

        let source = self.blocks.get_mut(from).unwrap();
        let had_edge = source
            .terminator()
            .is_some_and(|t| t.successors().iter().any(|s| *s == old_target));

        if !had_edge {
            return Err(IrError::NoSuchEdge {
                from: from.to_string(),
                to: old_target.to_string(),
            });
        }

        retarget_terminator(source, old_target, new_target);

        // `from` may still reach old_target through the other arm of a branch
        let still_reaches_old = source
            .terminator()
            .is_some_and(|t| t.successors().iter().any(|s| *s == old_target));

        if !still_reaches_old && old_target != new_target {
            self.blocks.get_mut(old_target).unwrap().remove_pred(from);
        }

        let target = self.blocks.get_mut(new_target).unwrap();

        if !target.preds().iter().any(|p| p == from) {
            if target.phi_len() > 0 {
                let Some(default) = phi_default else {
                    return Err(IrError::MissingPredecessorInPhi {
                        block: new_target.to_string(),
                        pred: from.to_string(),
                    });
                };

                target.add_pred(from, default)?;
            } else {
                target.add_pred(from, &Operand::int(0))?;
            }
        }

        Ok(())
    }

    /// Splits the edge `u -> v` by inserting a fresh block between the two.
    /// Every occurrence of `v` in `u`'s terminator is retargeted, `v`'s phi
    /// entries for `u` are relabeled to the new block, and the new block's
    /// label is returned.
    pub fn split_edge(&mut self, u: &str, v: &str) -> Result<String, IrError> {
        for label in [u, v] {
            if !self.blocks.contains_key(label) {
                return Err(IrError::NoSuchBlock(label.to_string()));
            }
        }

        let has_edge = self.blocks[u]
            .terminator()
            .is_some_and(|t| t.successors().iter().any(|s| *s == v));

        if !has_edge {
            return Err(IrError::NoSuchEdge {
                from: u.to_string(),
                to: v.to_string(),
            });
        }

        let mid = self.fresh_label(&format!("{u}.{v}"));

        let block = self.add_block(mid.clone())?;
        block.set_terminator(Inst::goto(v)?)?;
        block.set_preds(vec![u.to_string()]);

        retarget_terminator(self.blocks.get_mut(u).unwrap(), v, &mid);

        let target = self.blocks.get_mut(v).unwrap();
        target.rename_pred(u, &mid);

        Ok(mid)
    }

    /// Generates a label of the form `<prefix>.<n>` that is not yet in use.
    pub fn fresh_label(&self, prefix: &str) -> String {
        let mut counter = 0usize;

        loop {
            let candidate = format!("{prefix}.{counter}");

            if !self.blocks.contains_key(&candidate) {
                return candidate;
            }

            counter += 1;
        }
    }

    /// The successor labels of a block, read off its terminator. May
    /// contain duplicates for a branch with identical arms.
    pub fn successors(&self, label: &str) -> Result<SmallVec<[&str; 2]>, IrError> {
        let block = self
            .blocks
            .get(label)
            .ok_or_else(|| IrError::NoSuchBlock(label.to_string()))?;

        Ok(block.terminator().map(|t| t.successors()).unwrap_or_default())
    }

    /// The predecessor labels of a block.
    pub fn predecessors(&self, label: &str) -> Result<&[String], IrError> {
        self.blocks
            .get(label)
            .map(BasicBlock::preds)
            .ok_or_else(|| IrError::NoSuchBlock(label.to_string()))
    }

    /// The labels reachable from the entry in reverse postorder. Blocks
    /// unreachable from the entry do not appear.
    pub fn blocks_in_reverse_postorder(&self) -> Vec<String> {
        enum Visit<'a> {
            Pre(&'a str),
            Post(&'a str),
        }

        let mut stack = vec![Visit::Pre(self.entry.as_str())];
        let mut seen = SaHashSet::default();
        let mut postorder = Vec::with_capacity(self.order.len());

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Pre(label) => {
                    if !seen.insert(label) {
                        continue;
                    }

                    stack.push(Visit::Post(label));

                    if let Some(block) = self.blocks.get(label) {
                        if let Some(term) = block.terminator() {
                            // reversed so the first successor is explored first
                            for &succ in term.successors().iter().rev() {
                                if !seen.contains(succ) {
                                    stack.push(Visit::Pre(succ));
                                }
                            }
                        }
                    }
                }
                Visit::Post(label) => postorder.push(label.to_string()),
            }
        }

        postorder.reverse();
        postorder
    }

    /// Discards every predecessor list and rebuilds them from the
    /// terminators. Targets that do not name a block are skipped here and
    /// reported by [`Self::validate`].
    pub fn recompute_preds(&mut self) {
        let mut preds: SaHashMap<String, Vec<String>> = self
            .order
            .iter()
            .map(|label| (label.clone(), Vec::new()))
            .collect();

        for label in self.order.iter() {
            let mut pushed: SmallVec<[&str; 2]> = SmallVec::new();

            if let Some(term) = self.blocks[label].terminator() {
                for succ in term.successors() {
                    if pushed.contains(&succ) {
                        continue;
                    }

                    pushed.push(succ);

                    if let Some(list) = preds.get_mut(succ) {
                        list.push(label.clone());
                    }
                }
            }
        }

        for (label, list) in preds {
            self.blocks.get_mut(&label).unwrap().set_preds(list);
        }
    }

    /// Re-asserts every structural invariant, collecting all violations.
    ///
    /// Checked per block: exactly one terminator; phis strictly before
    /// non-phis; terminator targets exist; the predecessor list matches the
    /// edges derived from terminators; each phi has exactly one entry per
    /// predecessor and no entry for a non-predecessor. Checked globally:
    /// the entry exists and every non-entry block has at least one
    /// predecessor.
    pub fn validate(&self) -> Result<(), IrError> {
        let mut issues = Vec::new();

        if !self.blocks.contains_key(&self.entry) {
            issues.push(format!("entry block `@{}` does not exist", self.entry));
        }

        // derive the true predecessor relation from terminators
        let mut derived: SaHashMap<&str, Vec<&str>> = SaHashMap::default();

        for label in self.labels() {
            derived.entry(label).or_default();
        }

        for block in self.blocks() {
            match block.terminator() {
                None => issues.push(format!("block `@{}` has no terminator", block.label())),
                Some(term) => {
                    let mut seen: SmallVec<[&str; 2]> = SmallVec::new();

                    for succ in term.successors() {
                        if !self.blocks.contains_key(succ) {
                            issues.push(format!(
                                "block `@{}` branches to unknown label `@{succ}`",
                                block.label()
                            ));
                            continue;
                        }

                        if !seen.contains(&succ) {
                            seen.push(succ);
                            derived.get_mut(succ).unwrap().push(block.label());
                        }
                    }
                }
            }

            let phi_len = block.phi_len();

            if block.insts()[phi_len..].iter().any(Inst::is_phi) {
                issues.push(format!(
                    "block `@{}` has a phi after a non-phi instruction",
                    block.label()
                ));
            }
        }

        for block in self.blocks() {
            let label = block.label();
            let mut cached: Vec<&str> = block.preds().iter().map(String::as_str).collect();
            let mut true_preds = derived.remove(label).unwrap_or_default();

            cached.sort_unstable();
            true_preds.sort_unstable();

            if cached != true_preds {
                issues.push(format!(
                    "block `@{label}` caches predecessors [{}] but terminators give [{}]",
                    cached.join(", "),
                    true_preds.join(", ")
                ));
            }

            if label != self.entry && true_preds.is_empty() {
                issues.push(format!("block `@{label}` is not the entry and has no predecessors"));
            }

            for inst in block.phis() {
                let Inst::Phi { dst, entries } = inst else {
                    continue;
                };

                for pred in true_preds.iter() {
                    let count = entries.iter().filter(|(_, l)| l == pred).count();

                    if count != 1 {
                        issues.push(format!(
                            "phi `%{dst}` in `@{label}` has {count} entries for predecessor `@{pred}`"
                        ));
                    }
                }

                for (_, entry_label) in entries.iter() {
                    if !true_preds.contains(&entry_label.as_str()) {
                        issues.push(format!(
                            "phi `%{dst}` in `@{label}` lists `@{entry_label}` which is not a predecessor"
                        ));
                    }
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(IrError::MalformedCfg { issues })
        }
    }
}

fn retarget_terminator(block: &mut BasicBlock, old: &str, new: &str) {
    if let Some(term) = block.terminator_mut() {
        match term {
            Inst::Goto { target } if target == old => *target = new.to_string(),
            Inst::Branch {
                iftrue, iffalse, ..
            } => {
                if iftrue == old {
                    *iftrue = new.to_string();
                }

                if iffalse == old {
                    *iffalse = new.to_string();
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, CmpOp};

    // entry -> loop -> (loop | done)
    fn diamond_free_loop() -> Cfg {
        let mut cfg = Cfg::new("entry").unwrap();

        let entry = cfg.block_mut("entry").unwrap();
        entry
            .append(Inst::mov("i", Operand::int(0)).unwrap())
            .unwrap();
        entry.append(Inst::goto("loop").unwrap()).unwrap();

        let body = cfg.add_block("loop").unwrap();
        body.append(
            Inst::binary(BinaryOp::Add, "i", Operand::reg("i"), Operand::int(1)).unwrap(),
        )
        .unwrap();
        body.append(Inst::cmp(CmpOp::Lt, "c", Operand::reg("i"), Operand::int(10)).unwrap())
            .unwrap();
        body.append(Inst::branch("c", "loop", "done").unwrap())
            .unwrap();

        let done = cfg.add_block("done").unwrap();
        done.append(Inst::write(Operand::reg("i")).unwrap()).unwrap();
        done.append(Inst::Exit).unwrap();

        cfg.recompute_preds();
        cfg.validate().unwrap();

        cfg
    }

    #[test]
    fn edges_are_derived_from_terminators() {
        let cfg = diamond_free_loop();

        assert_eq!(cfg.successors("entry").unwrap().as_slice(), &["loop"]);
        assert_eq!(cfg.successors("loop").unwrap().as_slice(), &["loop", "done"]);
        assert!(cfg.successors("done").unwrap().is_empty());

        assert_eq!(cfg.predecessors("loop").unwrap(), &["entry", "loop"]);
        assert_eq!(cfg.predecessors("done").unwrap(), &["loop"]);
        assert!(cfg.predecessors("entry").unwrap().is_empty());
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let mut cfg = diamond_free_loop();

        assert!(matches!(
            cfg.add_block("loop"),
            Err(IrError::DuplicateLabel(_))
        ));
        assert!(cfg.add_block("bad label").is_err());
    }

    #[test]
    fn remove_block_requires_no_incoming_edges() {
        let mut cfg = diamond_free_loop();

        assert!(matches!(
            cfg.remove_block("done"),
            Err(IrError::HasPredecessors(_))
        ));

        // detach the edge first, then removal is fine
        let body = cfg.block_mut("loop").unwrap();
        body.set_terminator(Inst::goto("loop").unwrap()).unwrap();
        cfg.recompute_preds();

        cfg.remove_block("done").unwrap();
        assert!(!cfg.contains("done"));
        assert!(matches!(
            cfg.remove_block("done"),
            Err(IrError::NoSuchBlock(_))
        ));
    }

    #[test]
    fn rename_rewrites_every_reference() {
        let mut cfg = diamond_free_loop();
        cfg.block_mut("done")
            .unwrap()
            .insert(
                0,
                Inst::phi("p", vec![(Operand::reg("i"), "loop".into())]).unwrap(),
            )
            .unwrap();

        cfg.rename_block("loop", "body").unwrap();

        assert!(!cfg.contains("loop"));
        assert!(cfg.contains("body"));
        assert_eq!(cfg.successors("entry").unwrap().as_slice(), &["body"]);
        assert_eq!(cfg.successors("body").unwrap().as_slice(), &["body", "done"]);

        match &cfg.block("done").unwrap().insts()[0] {
            Inst::Phi { entries, .. } => assert_eq!(entries[0].1, "body"),
            _ => unreachable!(),
        }

        cfg.validate().unwrap();
    }

    #[test]
    fn rename_to_existing_label_is_rejected() {
        let mut cfg = diamond_free_loop();
        assert!(matches!(
            cfg.rename_block("loop", "done"),
            Err(IrError::DuplicateLabel(_))
        ));
    }

    #[test]
    fn redirect_updates_preds_and_phis() {
        let mut cfg = diamond_free_loop();

        // give `done` a phi so the redirect needs a default
        cfg.block_mut("done")
            .unwrap()
            .insert(
                0,
                Inst::phi("p", vec![(Operand::reg("i"), "loop".into())]).unwrap(),
            )
            .unwrap();

        // retarget entry's goto from `loop` to `done`
        assert!(matches!(
            cfg.redirect("entry", "loop", "done", None),
            Err(IrError::MissingPredecessorInPhi { .. })
        ));

        cfg.redirect("entry", "loop", "done", Some(&Operand::int(0)))
            .unwrap();

        assert_eq!(cfg.successors("entry").unwrap().as_slice(), &["done"]);
        assert!(!cfg.predecessors("loop").unwrap().contains(&"entry".into()));
        assert!(cfg.predecessors("done").unwrap().contains(&"entry".into()));

        match &cfg.block("done").unwrap().insts()[0] {
            Inst::Phi { entries, .. } => assert_eq!(entries.len(), 2),
            _ => unreachable!(),
        }

        cfg.validate().unwrap();
    }

    #[test]
    fn redirect_requires_the_edge() {
        let mut cfg = diamond_free_loop();
        assert!(matches!(
            cfg.redirect("entry", "done", "loop", None),
            Err(IrError::NoSuchEdge { .. })
        ));
    }

    #[test]
    fn split_edge_preserves_phi_semantics() {
        let mut cfg = diamond_free_loop();
        cfg.block_mut("done")
            .unwrap()
            .insert(
                0,
                Inst::phi("p", vec![(Operand::reg("i"), "loop".into())]).unwrap(),
            )
            .unwrap();

        let mid = cfg.split_edge("loop", "done").unwrap();

        assert!(cfg.contains(&mid));
        assert_eq!(cfg.successors(&mid).unwrap().as_slice(), &["done"]);
        assert_eq!(cfg.predecessors(&mid).unwrap(), &["loop"]);
        assert_eq!(cfg.predecessors("done").unwrap(), &[mid.clone()]);

        match &cfg.block("done").unwrap().insts()[0] {
            Inst::Phi { entries, .. } => assert_eq!(entries[0].1, mid),
            _ => unreachable!(),
        }

        cfg.validate().unwrap();
    }

    #[test]
    fn reverse_postorder_starts_at_entry() {
        let cfg = diamond_free_loop();
        let rpo = cfg.blocks_in_reverse_postorder();

        assert_eq!(rpo, ["entry", "loop", "done"]);
    }

    #[test]
    fn validate_reports_all_issues() {
        let mut cfg = diamond_free_loop();

        // orphan block with no terminator
        cfg.add_block("orphan").unwrap();

        let err = cfg.validate().unwrap_err();

        match err {
            IrError::MalformedCfg { issues } => {
                assert!(issues.iter().any(|i| i.contains("no terminator")));
                assert!(issues.iter().any(|i| i.contains("no predecessors")));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn validate_checks_phi_pred_agreement() {
        let mut cfg = diamond_free_loop();

        // phi in `done` listing a non-predecessor
        cfg.block_mut("done")
            .unwrap()
            .insert(
                0,
                Inst::phi("p", vec![(Operand::int(1), "entry".into())]).unwrap(),
            )
            .unwrap();

        let err = cfg.validate().unwrap_err();

        match err {
            IrError::MalformedCfg { issues } => {
                assert!(issues.iter().any(|i| i.contains("not a predecessor")));
                assert!(issues.iter().any(|i| i.contains("0 entries")));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn stale_pred_cache_is_detected() {
        let mut cfg = diamond_free_loop();
        cfg.block_mut("done").unwrap().set_preds(vec![]);

        assert!(cfg.validate().is_err());
        cfg.recompute_preds();
        cfg.validate().unwrap();
    }

    #[test]
    fn metadata_scopes_are_iterable() {
        let mut cfg = diamond_free_loop();
        cfg.meta_mut().set("who", ["cfg"]);
        cfg.block_mut("loop").unwrap().meta_mut().set("who", ["block"]);
        cfg.block_mut("loop")
            .unwrap()
            .inst_meta_mut(0)
            .unwrap()
            .set("who", ["inst"]);

        let tagged: Vec<_> = cfg
            .iter_all_meta()
            .filter(|(_, m)| !m.is_empty())
            .map(|(path, _)| path)
            .collect();

        assert_eq!(
            tagged,
            [
                MetaPath::Cfg,
                MetaPath::Block("loop".into()),
                MetaPath::Inst("loop".into(), 0)
            ]
        );
    }
}
