//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

#![allow(dead_code)]
#![deny(
    unreachable_pub,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links
)]
#![warn(missing_docs, rust_2018_idioms)]

//! # Opal
//!
//! A compiler middle-end workbench for a small assembly-like IL:
//! programs are control-flow graphs of labeled basic blocks over
//! arbitrary-precision integers, with phis, branches and integer I/O.
//!
//! The crate is built around three pieces:
//!
//!   1. The IL data model ([`ir`]): instructions, blocks, the CFG with
//!      its invariants and mutation discipline, and the metadata
//!      side-tables passes communicate through.
//!   2. The interpreter ([`interp`]): deterministic execution of a CFG
//!      against an integer input stream, with tracing, breakpoints and
//!      cooperative cancellation.
//!   3. The pass manager ([`pass`]): a string-addressed registry of
//!      parameterized analyses and transformations with instance
//!      memoization, dependency resolution and invalidation tracking.
//!
//! The [`reader`] and [`writer`] modules round-trip the textual form,
//! and [`passes`] ships a small set of working passes.

pub mod interp;
pub mod ir;
pub mod pass;
pub mod passes;
pub mod reader;
pub mod utility;
pub mod writer;

#[cfg(feature = "dev-tools")]
pub mod cli;

use crate::interp::Cancellation;
use crate::ir::Cfg;
use crate::pass::{PassError, PassManager};

pub use reader::parse_il;
pub use writer::write_il;

/// A helper that handles "run these passes specified by the user" in a
/// way that multiple tools can use.
///
/// This is not intended for pre-determined pass pipelines; it is the
/// driver behind `opalo`-style tools.
///
/// - `verify` interleaves a `verify` pass before, between and after the
///   user's passes
/// - `passes` is the user-specified list of invocations in surface syntax
pub fn run_passes(cfg: &mut Cfg, verify: bool, passes: &[String]) -> Result<(), PassError> {
    let mut pm = PassManager::new();

    crate::passes::register_default_passes(&mut pm)?;

    let mut pipeline = Vec::new();

    if verify {
        pipeline.push("verify".to_string());
    }

    for pass in passes {
        pipeline.push(pass.clone());

        if verify {
            pipeline.push("verify".to_string());
        }
    }

    pm.run_pipeline_text(cfg, &pipeline, &Cancellation::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{run_to_exit, VecInput, VecOutput};
    use crate::ir::Value;

    #[test]
    fn parse_optimize_execute_write() {
        let source = r#"
@main:
    %dead = 123
    %n = 6
    %n2 = %n * 7
    write %n2
    exit
"#;
        let mut cfg = parse_il(source).unwrap();

        run_passes(&mut cfg, true, &["dce".to_string()]).unwrap();

        assert_eq!(cfg.block("main").unwrap().num_insts(), 3);

        let mut output = VecOutput::default();
        run_to_exit(&cfg, &mut VecInput::default(), &mut output).unwrap();
        assert_eq!(output.values, [Value::from(42)]);

        // the optimized program still round-trips through the writer
        let reparsed = parse_il(&write_il(&cfg)).unwrap();
        assert_eq!(cfg, reparsed);
    }
}
