//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use crate::interp::Cancellation;
use crate::ir::Cfg;
use crate::pass::{
    DebugSink, InstanceId, Invocation, Pass, PassArgs, PassCtx, PassError, PassInfo, PassQuery,
};
use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// One memoized pass instance: a pass object plus the fully-resolved
/// argument tuple that identifies it, and its validity flag.
///
/// Validity starts false, flips true only after a successful `run`, and
/// flips back whenever some other pass runs without preserving this one.
pub struct Instance {
    pass_id: String,
    args: PassArgs,
    pass: RefCell<Box<dyn Pass>>,
    valid: Cell<bool>,
}

impl Instance {
    /// The pass ID this instance was built from.
    pub fn pass_id(&self) -> &str {
        &self.pass_id
    }

    /// The fully-resolved argument tuple.
    pub fn args(&self) -> &PassArgs {
        &self.args
    }

    /// Whether the instance's results reflect the current CFG.
    pub fn valid(&self) -> bool {
        self.valid.get()
    }

    /// Typed access to the pass object for getter calls. The caller names
    /// the concrete type registered under this ID; naming anything else
    /// is a bug and panics.
    pub fn get<T: Pass>(&self) -> Ref<'_, T> {
        Ref::map(self.pass.borrow(), |p| {
            p.as_any().downcast_ref::<T>().unwrap()
        })
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("pass_id", &self.pass_id)
            .field("args", &self.args)
            .field("valid", &self.valid.get())
            .finish()
    }
}

/// The pass manager: registry, instance memoization, validity tracking
/// and pipeline execution.
///
/// The manager owns the CFG and metadata for the duration of a pipeline
/// run; whichever pass is currently executing holds them exclusively
/// through its [`PassCtx`]. Nothing here is `Send`, the whole machine is
/// single-threaded.
#[derive(Debug, Default)]
pub struct PassManager {
    registry: BTreeMap<String, PassInfo>,
    instances: RefCell<Vec<Rc<Instance>>>,
    running: RefCell<Vec<InstanceId>>,
    debug: DebugSink,
}

impl PassManager {
    /// A manager with no passes registered and the debug channel off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the debug sink.
    pub fn set_debug(&mut self, debug: DebugSink) {
        self.debug = debug;
    }

    /// The debug sink.
    pub fn debug(&self) -> &DebugSink {
        &self.debug
    }

    /// Registers a pass. IDs are globally unique within the manager.
    pub fn register(&mut self, info: PassInfo) -> Result<(), PassError> {
        if info.id.is_empty()
            || !info
                .id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        {
            return Err(PassError::BadArguments(format!(
                "`{}` is not a valid pass id",
                info.id
            )));
        }

        if self.registry.contains_key(&info.id) {
            return Err(PassError::DuplicateId(info.id));
        }

        self.registry.insert(info.id.clone(), info);

        Ok(())
    }

    /// All registered pass IDs in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.registry.keys().map(String::as_str).collect()
    }

    /// The signature string and docstring for one pass.
    pub fn explain(&self, id: &str) -> Result<String, PassError> {
        let info = self
            .registry
            .get(id)
            .ok_or_else(|| PassError::UnknownPass(id.to_string()))?;

        Ok(format!("{}\n{}", info.signature(), info.doc))
    }

    /// Resolves an invocation to its memoized instance, constructing (and
    /// argument-checking) a new one on first sight of the resolved tuple.
    pub fn resolve_invocation(&self, invocation: &Invocation) -> Result<InstanceId, PassError> {
        let info = self
            .registry
            .get(&invocation.id)
            .ok_or_else(|| PassError::UnknownPass(invocation.id.clone()))?;

        let args = info.bind(invocation)?;

        self.intern(&invocation.id, args)
    }

    /// Resolves a wildcard query: the first existing instance whose fixed
    /// arguments agree, or a fresh instance with defaults substituted for
    /// the wildcards.
    pub fn resolve_query(&self, query: &PassQuery) -> Result<InstanceId, PassError> {
        let info = self
            .registry
            .get(&query.id)
            .ok_or_else(|| PassError::UnknownPass(query.id.clone()))?;

        let positionals: Vec<_> = info.params.iter().filter(|p| !p.keyword).collect();

        if query.positional.len() > positionals.len() {
            return Err(PassError::BadArguments(format!(
                "`{}` has only {} positional parameter{}",
                query.id,
                positionals.len(),
                if positionals.len() == 1 { "" } else { "s" }
            )));
        }

        for name in query.keyword.keys() {
            if !info.params.iter().any(|p| p.keyword && p.name == name) {
                return Err(PassError::BadArguments(format!(
                    "`{}` has no keyword parameter `{name}`",
                    query.id
                )));
            }
        }

        // first existing instance agreeing on every fixed argument wins
        for (index, instance) in self.instances.borrow().iter().enumerate() {
            if instance.pass_id != query.id {
                continue;
            }

            let positional_ok = query.positional.iter().enumerate().all(|(i, c)| match c {
                Some(v) => instance.args.get(positionals[i].name) == v.as_str(),
                None => true,
            });

            let keyword_ok = query.keyword.iter().all(|(name, c)| match c {
                Some(v) => instance.args.get(name) == v.as_str(),
                None => true,
            });

            if positional_ok && keyword_ok {
                return Ok(InstanceId(index as u32));
            }
        }

        // none exists: wildcards take default values
        let mut invocation = Invocation::bare(query.id.clone());

        for (i, constraint) in query.positional.iter().enumerate() {
            let value = match constraint {
                Some(v) => v.clone(),
                None => positionals[i].default.to_string(),
            };

            invocation = invocation.pos(value);
        }

        for (name, constraint) in query.keyword.iter() {
            if let Some(v) = constraint {
                invocation = invocation.kw(name.clone(), v.clone());
            }
        }

        let args = info.bind(&invocation)?;

        self.intern(&query.id, args)
    }

    fn intern(&self, pass_id: &str, args: PassArgs) -> Result<InstanceId, PassError> {
        {
            let instances = self.instances.borrow();

            for (index, instance) in instances.iter().enumerate() {
                if instance.pass_id == pass_id && instance.args == args {
                    return Ok(InstanceId(index as u32));
                }
            }
        }

        let info = self.registry.get(pass_id).unwrap();
        let pass = info.build(&args)?;

        self.debug
            .emit(pass_id, format_args!("initialising instance ({args})"));

        let mut instances = self.instances.borrow_mut();

        instances.push(Rc::new(Instance {
            pass_id: pass_id.to_string(),
            args,
            pass: RefCell::new(pass),
            valid: Cell::new(false),
        }));

        Ok(InstanceId((instances.len() - 1) as u32))
    }

    /// The instance object behind an id.
    pub fn instance(&self, id: InstanceId) -> Rc<Instance> {
        Rc::clone(&self.instances.borrow()[id.0 as usize])
    }

    /// Every instance created so far, in creation order.
    pub fn instances(&self) -> Vec<Rc<Instance>> {
        self.instances.borrow().clone()
    }

    /// Runs the instance if (and only if) it is not currently valid, then
    /// applies its preservation verdict to every known instance.
    ///
    /// This is `require` seen from the outside: passes reach it through
    /// [`PassCtx::require`], embedders call it before getter access.
    pub fn ensure_valid(
        &self,
        id: InstanceId,
        cfg: &mut Cfg,
        cancel: &Cancellation,
    ) -> Result<(), PassError> {
        let instance = self.instance(id);

        if instance.valid() {
            return Ok(());
        }

        if self.running.borrow().contains(&id) {
            return Err(PassError::DependencyCycle(instance.pass_id().to_string()));
        }

        self.debug.emit(
            instance.pass_id(),
            format_args!("running ({})", instance.args()),
        );

        self.running.borrow_mut().push(id);

        let result = instance.pass.borrow_mut().run(&mut PassCtx {
            manager: self,
            cfg,
            cancel,
        });

        self.running.borrow_mut().pop();

        let preserved = match result {
            Ok(preserved) => preserved,
            Err(e) => {
                // a pass that started and did not complete leaves partial
                // mutations in place and stays invalid
                instance.valid.set(false);
                self.debug
                    .emit("error", format_args!("{} failed: {e}", instance.pass_id()));

                return Err(e);
            }
        };

        for (index, other) in self.instances.borrow().iter().enumerate() {
            let other_id = InstanceId(index as u32);

            if other_id == id || !other.valid() {
                continue;
            }

            if !preserved.is_preserved(other_id) {
                self.debug.emit(
                    instance.pass_id(),
                    format_args!("invalidating {} ({})", other.pass_id(), other.args()),
                );
                other.valid.set(false);
            }
        }

        instance.valid.set(true);

        Ok(())
    }

    /// Resolves a query and ensures the instance is valid, running it if
    /// needed. This is the entry point for getter access from outside a
    /// pipeline.
    pub fn valid_instance(
        &self,
        query: &PassQuery,
        cfg: &mut Cfg,
        cancel: &Cancellation,
    ) -> Result<Rc<Instance>, PassError> {
        let id = self.resolve_query(query)?;

        self.ensure_valid(id, cfg, cancel)?;

        Ok(self.instance(id))
    }

    /// Runs a pipeline: each invocation in order is resolved and made
    /// valid. An error in pass `i` stops the pipeline with the CFG
    /// reflecting whatever that pass changed before failing; cancellation
    /// between passes reports the index that did not get to run.
    pub fn run_pipeline(
        &self,
        cfg: &mut Cfg,
        pipeline: &[Invocation],
        cancel: &Cancellation,
    ) -> Result<(), PassError> {
        for (index, invocation) in pipeline.iter().enumerate() {
            if cancel.is_cancelled() {
                self.debug
                    .emit("pipeline", format_args!("cancelled before `{invocation}`"));

                return Err(PassError::Cancelled { index });
            }

            let id = self.resolve_invocation(invocation).map_err(|e| {
                self.debug.emit("error", format_args!("`{invocation}`: {e}"));
                e
            })?;

            self.ensure_valid(id, cfg, cancel)?;
        }

        Ok(())
    }

    /// Parses and runs a pipeline given in surface syntax, the
    /// convenience used by the CLI front-ends.
    pub fn run_pipeline_text(
        &self,
        cfg: &mut Cfg,
        invocations: &[String],
        cancel: &Cancellation,
    ) -> Result<(), PassError> {
        let mut pipeline = Vec::with_capacity(invocations.len());

        for text in invocations {
            pipeline.push(Invocation::parse(text).map_err(|e| {
                self.debug.emit("error", format_args!("`{text}`: {e}"));
                e
            })?);
        }

        self.run_pipeline(cfg, &pipeline, cancel)
    }

    pub(crate) fn debug_from_running(&self, args: fmt::Arguments<'_>) {
        if !self.debug.enabled() {
            return;
        }

        let label = self
            .running
            .borrow()
            .last()
            .map(|id| self.instance(*id).pass_id().to_string())
            .unwrap_or_else(|| "manager".to_string());

        self.debug.emit(&label, args);
    }
}
