//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::ir::{Cfg, Inst};
use crate::pass::{Pass, PassCtx, PassError, PassInfo, Preserved};
use crate::utility::SaHashSet;
use std::any::Any;

/// Dead code elimination built on observability: a register matters only
/// if it eventually feeds a branch condition or a `write`. Definitions of
/// unobservable registers are removed; `read`s stay, they consume input.
///
/// Observability is a backward flow to a fixpoint:
///
/// ```text
/// obs-out[I] = union(obs-in[I'] for successors I' of I)
/// obs-in[I]  = (obs-out[I] - defs[I]) + obs-uses[I]
/// ```
///
/// where `obs-uses[I]` contributes only when `I`'s definition is itself
/// observable, or `I` has an effect of its own.
pub struct Dce;

impl Dce {
    /// The registration record: `dce()`.
    pub fn info() -> PassInfo {
        PassInfo::new(
            "dce",
            "Eliminates definitions that never reach a branch condition or \
             a write to output.",
            vec![],
            |_| Ok(Box::new(Dce)),
        )
    }
}

// per-instruction observability sets for one block, index
// `num_insts()` being the terminator
struct BlockFlow {
    ins: Vec<SaHashSet<String>>,
    outs: Vec<SaHashSet<String>>,
}

fn value_uses(inst: &Inst) -> SaHashSet<String> {
    inst.uses()
        .iter()
        .filter_map(|operand| operand.as_register().map(str::to_string))
        .collect()
}

fn has_effect(inst: &Inst) -> bool {
    matches!(
        inst,
        Inst::Write { .. } | Inst::Read { .. } | Inst::Branch { .. } | Inst::Brkpt { .. }
    )
}

impl Pass for Dce {
    fn run(&mut self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError> {
        let cfg = ctx.cfg();
        let order = cfg.blocks_in_reverse_postorder();

        let mut flows: Vec<BlockFlow> = order
            .iter()
            .map(|label| {
                let n = cfg.block(label).unwrap().num_insts() + 1;

                BlockFlow {
                    ins: vec![SaHashSet::default(); n],
                    outs: vec![SaHashSet::default(); n],
                }
            })
            .collect();

        let index_of = |label: &str| order.iter().position(|l| l == label);

        // iterate the backward flow to a fixpoint; visiting in postorder
        // (reverse of `order`) converges quickly on reducible graphs
        loop {
            let mut changed = false;

            for (b, label) in order.iter().enumerate().rev() {
                let block = cfg.block(label).unwrap();
                let last = block.num_insts();

                let mut exit_out = SaHashSet::default();

                if let Some(term) = block.terminator() {
                    for succ in term.successors() {
                        if let Some(s) = index_of(succ) {
                            exit_out.extend(flows[s].ins[0].iter().cloned());
                        }
                    }
                }

                for i in (0..=last).rev() {
                    let out = if i == last {
                        exit_out.clone()
                    } else {
                        flows[b].ins[i + 1].clone()
                    };

                    let inst = block.inst(i).unwrap();
                    let def = inst.def();

                    let observable = def.map_or(true, |d| out.contains(d)) || has_effect(inst);

                    let mut new_in = out.clone();

                    if let Some(d) = def {
                        new_in.remove(d);
                    }

                    if observable {
                        new_in.extend(value_uses(inst));
                    }

                    if new_in != flows[b].ins[i] || out != flows[b].outs[i] {
                        changed = true;
                        flows[b].ins[i] = new_in;
                        flows[b].outs[i] = out;
                    }
                }
            }

            if !changed {
                break;
            }
        }

        // drop every unobservable definition; reads stay
        let mut removed = 0usize;

        for (b, label) in order.iter().enumerate() {
            let to_delete: Vec<usize> = {
                let block = cfg.block(label).unwrap();

                block
                    .insts()
                    .iter()
                    .enumerate()
                    .filter(|(i, inst)| {
                        inst.def()
                            .is_some_and(|d| !flows[b].outs[*i].contains(d))
                            && !matches!(inst, Inst::Read { .. })
                    })
                    .map(|(i, _)| i)
                    .collect()
            };

            let block = cfg.block_mut(label).unwrap();

            for i in to_delete.into_iter().rev() {
                block.remove(i)?;
                removed += 1;
            }
        }

        ctx.debug(format_args!("removed {removed} dead definitions"));

        if removed == 0 {
            Ok(Preserved::all())
        } else {
            Ok(Preserved::none())
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Standalone convenience for callers outside a pass manager.
pub fn eliminate_dead_code(cfg: &mut Cfg) -> Result<(), PassError> {
    use crate::interp::Cancellation;
    use crate::pass::PassManager;

    let mut pm = PassManager::new();
    pm.register(Dce::info())?;

    pm.run_pipeline_text(cfg, &["dce".to_string()], &Cancellation::new())
}
