//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Concrete passes shipped with the workbench.
//!
//! `example-stats` and `swap-ops` are the template analysis/transform pair
//! demonstrating parameters, metadata at every scope, `require` and
//! preservation; `dce` is a real cleanup; `verify` re-checks structural
//! invariants mid-pipeline.

mod dce;
mod example;
mod verify;

pub use dce::*;
pub use example::*;
pub use verify::*;

use crate::pass::{PassError, PassManager};

/// Registers every pass shipped with the workbench. Call once at program
/// startup on a fresh manager; a second call on the same manager reports
/// [`PassError::DuplicateId`].
pub fn register_default_passes(pm: &mut PassManager) -> Result<(), PassError> {
    pm.register(ExampleStats::info())?;
    pm.register(SwapOps::info())?;
    pm.register(Dce::info())?;
    pm.register(Verify::info())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registration_is_unique() {
        let mut pm = PassManager::new();

        register_default_passes(&mut pm).unwrap();
        assert_eq!(pm.list(), ["dce", "example-stats", "swap-ops", "verify"]);

        assert!(register_default_passes(&mut pm).is_err());
    }
}
