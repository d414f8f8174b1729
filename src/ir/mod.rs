//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The IL data model: values, instructions, basic blocks, the CFG and its
//! metadata side-tables.
//!
//! Everything in here is purely structural. Operational semantics live in
//! [`crate::interp`], and orchestration of analyses/transformations lives
//! in [`crate::pass`].

mod block;
mod cfg;
mod instruction;
mod metadata;
mod value;

pub use block::*;
pub use cfg::*;
pub use instruction::*;
pub use metadata::*;
pub use value::*;

/// The structural error taxonomy: everything that can be wrong with an
/// instruction, block or CFG as data, independent of any execution.
///
/// These are raised at construction or by [`Cfg::validate`] and are not
/// recoverable without editing the IR.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum IrError {
    /// An instruction was built with the wrong operand kinds or names
    #[error("malformed instruction: {0}")]
    MalformedInstruction(String),

    /// One or more CFG invariants do not hold; every violation found is
    /// listed
    #[error("malformed CFG:\n  {}", issues.join("\n  "))]
    MalformedCfg {
        /// One human-readable line per violation
        issues: Vec<String>,
    },

    /// A label was defined (or renamed to) twice
    #[error("label `@{0}` is already defined")]
    DuplicateLabel(String),

    /// A phi needed an entry for a predecessor and no default was supplied
    #[error("block `@{block}` has phis but no entry value for predecessor `@{pred}`")]
    MissingPredecessorInPhi {
        /// The block containing the phis
        block: String,
        /// The predecessor lacking an entry
        pred: String,
    },

    /// An operation referenced a label that names no block
    #[error("no block labeled `@{0}`")]
    NoSuchBlock(String),

    /// An edge-editing operation referenced an edge that does not exist
    #[error("no edge from `@{from}` to `@{to}`")]
    NoSuchEdge {
        /// The edge's claimed source block
        from: String,
        /// The edge's claimed target block
        to: String,
    },

    /// A block could not be removed because other blocks still branch to it
    #[error("block `@{0}` still has incoming edges")]
    HasPredecessors(String),

    /// An append hit a block whose terminator is already set
    #[error("block `@{0}` already has a terminator")]
    TerminatorPresent(String),
}
