//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::pass::{Pass, PassCtx, PassError, PassInfo, Preserved};
use std::any::Any;

/// Re-asserts every CFG structural invariant, failing the pipeline if any
/// is violated. Interleave it between transforms while debugging a pass.
pub struct Verify;

impl Verify {
    /// The registration record: `verify()`.
    pub fn info() -> PassInfo {
        PassInfo::new(
            "verify",
            "Checks every CFG invariant and fails the pipeline on the first \
             violation. Reads nothing and writes nothing.",
            vec![],
            |_| Ok(Box::new(Verify)),
        )
    }
}

impl Pass for Verify {
    fn run(&mut self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError> {
        ctx.cfg_ref().validate()?;

        Ok(Preserved::all())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Cancellation;
    use crate::pass::{Invocation, PassManager};
    use crate::reader::parse_il;

    #[test]
    fn valid_graphs_pass() {
        let mut pm = PassManager::new();
        pm.register(Verify::info()).unwrap();

        let mut cfg = parse_il("@main:\n    write 1\n    exit\n").unwrap();

        pm.run_pipeline(&mut cfg, &[Invocation::bare("verify")], &Cancellation::new())
            .unwrap();
    }

    #[test]
    fn corrupted_graphs_fail_the_pipeline() {
        let mut pm = PassManager::new();
        pm.register(Verify::info()).unwrap();

        let mut cfg = parse_il("@main:\n    write 1\n    exit\n").unwrap();
        cfg.add_block("stray").unwrap();

        let err = pm
            .run_pipeline(&mut cfg, &[Invocation::bare("verify")], &Cancellation::new())
            .unwrap_err();

        assert!(matches!(err, PassError::Ir(_)));
    }
}
