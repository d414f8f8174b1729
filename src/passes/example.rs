//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{BinaryOp, Cfg, Inst};
use crate::pass::{
    ParamSpec, Pass, PassCtx, PassError, PassInfo, PassQuery, Preserved,
};
use std::any::Any;

/// The template analysis: indexes instructions and tracks where the adds
/// (or muls) sit, at all three metadata scopes.
///
/// CFG scope gets `example-stats/num_blocks` (or `num_instructions`
/// under `count=instructions`), each block gets
/// `example-stats/<op>_indices`, and each instruction gets
/// `example-stats/index`.
pub struct ExampleStats {
    op: BinaryOp,
    var: &'static str,
    count: CountMode,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum CountMode {
    Blocks,
    Instructions,
}

impl ExampleStats {
    /// The registration record: `example-stats(op, *, count=blocks)`.
    pub fn info() -> PassInfo {
        PassInfo::new(
            "example-stats",
            "Indexes every instruction and tracks add (or mul) positions per \
             block; counts blocks or instructions at CFG scope.",
            vec![
                ParamSpec::positional("op", "add"),
                ParamSpec::keyword("count", "blocks"),
            ],
            |args| {
                let (op, var) = match args.get("op") {
                    "add" => (BinaryOp::Add, "add_indices"),
                    "mul" => (BinaryOp::Mul, "mul_indices"),
                    other => {
                        return Err(PassError::BadArgument {
                            name: "op".to_string(),
                            reason: format!("expected `add` or `mul`, got `{other}`"),
                        })
                    }
                };

                let count = match args.get("count") {
                    "blocks" => CountMode::Blocks,
                    "instructions" => CountMode::Instructions,
                    other => {
                        return Err(PassError::BadArgument {
                            name: "count".to_string(),
                            reason: format!("expected `blocks` or `instructions`, got `{other}`"),
                        })
                    }
                };

                Ok(Box::new(ExampleStats { op, var, count }))
            },
        )
    }

    /// Getter: the counted total, whichever mode was configured.
    /// Valid only after a run against the current CFG.
    pub fn count(&self, cfg: &Cfg) -> Option<usize> {
        let key = match self.count {
            CountMode::Blocks => "example-stats/num_blocks",
            CountMode::Instructions => "example-stats/num_instructions",
        };

        cfg.meta().get(key)?.first()?.parse().ok()
    }

    /// Getter: the tracked instruction indices for one block.
    pub fn op_indices(&self, cfg: &Cfg, block: &str) -> Vec<usize> {
        let key = format!("example-stats/{}", self.var);

        cfg.block(block)
            .and_then(|b| b.meta().get(&key))
            .map(|values| values.iter().filter_map(|v| v.parse().ok()).collect())
            .unwrap_or_default()
    }
}

impl Pass for ExampleStats {
    fn run(&mut self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError> {
        let cfg = ctx.cfg();

        let (key, total) = match self.count {
            CountMode::Blocks => ("example-stats/num_blocks", cfg.len()),
            CountMode::Instructions => (
                "example-stats/num_instructions",
                cfg.blocks().map(|b| b.num_insts() + 1).sum(),
            ),
        };

        cfg.meta_mut().set(key, [total.to_string()]);

        let labels: Vec<String> = cfg.labels().map(str::to_string).collect();
        let var = format!("example-stats/{}", self.var);

        for label in labels {
            let block = cfg.block_mut(&label).unwrap();

            let indices: Vec<String> = block
                .insts()
                .iter()
                .enumerate()
                .filter(|(_, inst)| matches!(inst, Inst::Binary { op, .. } if *op == self.op))
                .map(|(i, _)| i.to_string())
                .collect();

            // a set (not append) so stale data from an invalidated run
            // cannot survive underneath
            block.meta_mut().set(var.clone(), indices);

            for i in 0..=block.num_insts() {
                if let Some(meta) = block.inst_meta_mut(i) {
                    meta.set("example-stats/index", [i.to_string()]);
                }
            }
        }

        ctx.debug(format_args!("counted {total}"));

        // a pure analysis changes nothing, everything is preserved
        Ok(Preserved::all())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The template transformation: swaps the operands of every add (or mul),
/// and optionally cuts blocks down to a maximum size by chaining them
/// through fresh `goto` blocks.
pub struct SwapOps {
    op: String,
    limit: i64,
}

impl SwapOps {
    /// The registration record: `swap-ops(op, *, limit=-1)`.
    pub fn info() -> PassInfo {
        PassInfo::new(
            "swap-ops",
            "Swaps the operands of every add (or mul) using the indices \
             computed by example-stats; limit=N additionally cuts blocks \
             to at most N instructions (N >= 2, -1 disables).",
            vec![
                ParamSpec::positional("op", "add"),
                ParamSpec::keyword("limit", "-1"),
            ],
            |args| {
                let op = args.get("op");

                if op != "add" && op != "mul" {
                    return Err(PassError::BadArgument {
                        name: "op".to_string(),
                        reason: format!("expected `add` or `mul`, got `{op}`"),
                    });
                }

                let limit: i64 = args.get("limit").parse().map_err(|_| PassError::BadArgument {
                    name: "limit".to_string(),
                    reason: format!("expected an integer, got `{}`", args.get("limit")),
                })?;

                if limit != -1 && limit < 2 {
                    return Err(PassError::BadArgument {
                        name: "limit".to_string(),
                        reason: "must be at least 2, or -1 to disable".to_string(),
                    });
                }

                Ok(Box::new(SwapOps {
                    op: op.to_string(),
                    limit,
                }))
            },
        )
    }

    fn swap(&self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError> {
        let stats = ctx.require(
            &PassQuery::new("example-stats")
                .pos(self.op.clone())
                .kw_any("count"),
        )?;

        let key = format!("example-stats/{}_indices", self.op);
        let cfg = ctx.cfg();
        let labels: Vec<String> = cfg.labels().map(str::to_string).collect();

        for label in labels {
            let block = cfg.block_mut(&label).unwrap();

            let indices: Vec<usize> = block
                .meta()
                .get(&key)
                .map(|values| values.iter().filter_map(|v| v.parse().ok()).collect())
                .unwrap_or_default();

            for i in indices {
                let swapped = match block.insts().get(i) {
                    Some(Inst::Binary { dst, op, lhs, rhs }) => {
                        Inst::binary(*op, dst.clone(), rhs.clone(), lhs.clone())?
                    }
                    _ => continue,
                };

                block.replace(i, swapped)?;
            }
        }

        // swapping commutative operands moves nothing the analysis tracks
        Ok(Preserved::none().with(stats))
    }

    fn trim(&self, ctx: &mut PassCtx<'_>) -> Result<bool, PassError> {
        let limit = self.limit as usize;
        let cfg = ctx.cfg();
        let labels: Vec<String> = cfg.labels().map(str::to_string).collect();
        let mut changed = false;

        for label in labels {
            let mut current = label;

            // each iteration slices one chunk off the front of `current`
            // and chains the rest behind a fresh goto
            while cfg.block(&current).unwrap().num_insts() + 1 > limit {
                let tail_label = cfg.fresh_label(&format!("{current}.cut"));
                changed = true;

                cfg.add_block(tail_label.clone())?;

                let block = cfg.block_mut(&current).unwrap();
                let mut tail = Vec::new();

                while block.num_insts() + 1 > limit {
                    tail.push(block.remove(limit - 1)?);
                }

                let old_term = block
                    .set_terminator(Inst::goto(tail_label.clone())?)?
                    .expect("blocks always carry a terminator here");

                let successors: Vec<String> =
                    old_term.successors().iter().map(|s| s.to_string()).collect();

                let tail_block = cfg.block_mut(&tail_label).unwrap();

                for inst in tail {
                    tail_block.append(inst)?;
                }

                tail_block.set_terminator(old_term)?;

                // phi entries in the old successors now arrive from the tail
                for succ in successors {
                    if let Some(s) = cfg.block_mut(&succ) {
                        s.rename_pred(&current, &tail_label);
                    }
                }

                current = tail_label;
            }
        }

        if changed {
            cfg.recompute_preds();
        }

        Ok(changed)
    }
}

impl Pass for SwapOps {
    fn run(&mut self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError> {
        let preserved = self.swap(ctx)?;

        if self.limit == -1 {
            return Ok(preserved);
        }

        if self.trim(ctx)? {
            // block structure changed underneath every analysis
            ctx.debug(format_args!("cut blocks to at most {}", self.limit));

            return Ok(Preserved::none());
        }

        Ok(preserved)
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

    const PROGRAM: &str = r#"
@main:
    %a = 1 + 2
    %b = %a * 3
    %c = %a + %b
    goto @end
@end:
    write %c
    exit
"#;

    fn manager() -> PassManager {
        let mut pm = PassManager::new();
        pm.register(ExampleStats::info()).unwrap();
        pm.register(SwapOps::info()).unwrap();

        pm
    }

    #[test]
    fn stats_writes_all_three_scopes() {
        let pm = manager();
        let mut cfg = parse_il(PROGRAM).unwrap();

        let instance = pm
            .valid_instance(
                &PassQuery::new("example-stats"),
                &mut cfg,
                &Cancellation::new(),
            )
            .unwrap();

        let stats = instance.get::<ExampleStats>();

        assert_eq!(stats.count(&cfg), Some(2));
        assert_eq!(stats.op_indices(&cfg, "main"), [0, 2]);
        assert_eq!(stats.op_indices(&cfg, "end"), Vec::<usize>::new());

        assert_eq!(
            cfg.block("main").unwrap().inst_meta(1).unwrap().get("example-stats/index"),
            Some(&["1".to_string()][..])
        );
    }

    #[test]
    fn stats_counts_instructions_when_asked() {
        let pm = manager();
        let mut cfg = parse_il(PROGRAM).unwrap();

        let instance = pm
            .valid_instance(
                &PassQuery::new("example-stats").kw("count", "instructions"),
                &mut cfg,
                &Cancellation::new(),
            )
            .unwrap();

        // 4 in @main plus 2 in @end, terminators included
        assert_eq!(instance.get::<ExampleStats>().count(&cfg), Some(6));
    }

    #[test]
    fn bad_arguments_are_value_checked() {
        let pm = manager();

        assert!(matches!(
            pm.resolve_invocation(&Invocation::bare("example-stats").pos("sub")),
            Err(PassError::BadArgument { .. })
        ));
        assert!(matches!(
            pm.resolve_invocation(&Invocation::bare("swap-ops").kw("limit", "1")),
            Err(PassError::BadArgument { .. })
        ));
    }

    #[test]
    fn swap_flips_adds_and_preserves_the_analysis() {
        let pm = manager();
        let mut cfg = parse_il(PROGRAM).unwrap();
        let cancel = Cancellation::new();

        pm.run_pipeline(&mut cfg, &[Invocation::bare("swap-ops")], &cancel)
            .unwrap();

        let main = cfg.block("main").unwrap();

        assert_eq!(main.insts()[0].to_string(), "%a = 2 + 1");
        assert_eq!(main.insts()[2].to_string(), "%c = %b + %a");
        // muls untouched
        assert_eq!(main.insts()[1].to_string(), "%b = %a * 3");

        // the analysis the swap required is still valid
        let stats = pm
            .resolve_query(&PassQuery::new("example-stats").pos("add").kw_any("count"))
            .unwrap();
        assert!(pm.instance(stats).valid());
    }

    #[test]
    fn trim_cuts_blocks_and_invalidates() {
        let pm = manager();
        let mut cfg = parse_il(PROGRAM).unwrap();
        let cancel = Cancellation::new();

        pm.run_pipeline(
            &mut cfg,
            &[
                Invocation::bare("example-stats"),
                Invocation::bare("swap-ops").kw("limit", "2"),
            ],
            &cancel,
        )
        .unwrap();

        cfg.validate().unwrap();

        // @main had 3 instructions + goto, limit 2 forces two cuts
        assert!(cfg.len() > 2);

        for block in cfg.blocks() {
            assert!(block.num_insts() + 1 <= 2);
        }

        // trimming preserved nothing
        let stats = pm.resolve_query(&PassQuery::new("example-stats")).unwrap();
        assert!(!pm.instance(stats).valid());

        // and the program still means the same thing
        let mut input = crate::interp::VecInput::default();
        let mut output = crate::interp::VecOutput::default();
        crate::interp::run_to_exit(&cfg, &mut input, &mut output).unwrap();
        assert_eq!(output.values, [crate::ir::Value::from(12)]);
    }
}
