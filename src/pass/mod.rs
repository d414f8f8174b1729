//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! The pass framework: registration, string-argument binding, instance
//! identity, validity tracking and pipelines.
//!
//! A pass is registered as a [`PassInfo`]: an ID, a docstring, parameter
//! metadata declared as data, and a builder closure. Invoking a pass with
//! a fully-resolved argument tuple yields an *instance*; identical tuples
//! are memoized to the same instance. Instances carry a validity flag
//! driven by the [`Preserved`] sets that `run` returns.
//!
//! Everything here is single-threaded by construction.

mod manager;

pub use manager::*;

use crate::interp::Cancellation;
use crate::ir::{Cfg, IrError};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use smallvec::SmallVec;
use std::fmt;
use std::io::{self, Write as _};

/// The registration and argument error taxonomy of the pass manager.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A pass was registered under an ID that is already taken
    #[error("pass id `{0}` is already registered")]
    DuplicateId(String),

    /// An invocation or query named a pass that is not registered
    #[error("unknown pass `{0}`")]
    UnknownPass(String),

    /// An invocation had the wrong shape: bad syntax, too many
    /// positionals, or an unrecognized keyword
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// A pass rejected an argument's value
    #[error("bad argument `{name}`: {reason}")]
    BadArgument {
        /// The formal parameter that received the value
        name: String,
        /// Why the pass rejected it
        reason: String,
    },

    /// A pass (transitively) required itself while running
    #[error("dependency cycle through pass `{0}`")]
    DependencyCycle(String),

    /// The pipeline was cancelled; `index` is the invocation about to run
    #[error("pipeline cancelled before pass {index}")]
    Cancelled {
        /// Index into the pipeline of the pass that did not get to run
        index: usize,
    },

    /// A structural IR error raised while a pass was transforming
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// One formal parameter of a pass: a name, a default (all argument values
/// are strings), and whether it binds positionally or by keyword.
#[derive(Debug, Copy, Clone)]
pub struct ParamSpec {
    /// The parameter's name
    pub name: &'static str,
    /// The value used when the invocation leaves it unbound
    pub default: &'static str,
    /// Keyword parameters bind by `name=value` only
    pub keyword: bool,
}

impl ParamSpec {
    /// A positional parameter.
    pub const fn positional(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            default,
            keyword: false,
        }
    }

    /// A keyword parameter.
    pub const fn keyword(name: &'static str, default: &'static str) -> Self {
        Self {
            name,
            default,
            keyword: true,
        }
    }
}

/// The fully-resolved arguments of a pass instance: every formal bound to
/// a string value, defaults filled in. Two invocations resolving to equal
/// `PassArgs` are the same instance.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct PassArgs {
    values: BTreeMap<String, String>,
}

impl PassArgs {
    pub(crate) fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// The value bound to a formal parameter. Panics for a name that is
    /// not a formal of the pass, that is a registration bug.
    pub fn get(&self, name: &str) -> &str {
        self.values
            .get(name)
            .unwrap_or_else(|| panic!("no formal parameter named `{name}`"))
    }

    /// Iterates `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for PassArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.iter().enumerate() {
            let sep = if i == 0 { "" } else { ", " };
            write!(f, "{sep}{name}={value}")?;
        }

        Ok(())
    }
}

/// The registration record for one pass: identity, documentation,
/// parameter metadata and a builder.
///
/// The builder validates domain-specific constraints on the (already
/// shape-checked) arguments and returns the pass object; it reports value
/// problems as [`PassError::BadArgument`].
pub struct PassInfo {
    /// The globally unique pass ID
    pub id: String,
    /// The human docstring shown by `explain`
    pub doc: String,
    /// The formal parameters, positionals first
    pub params: Vec<ParamSpec>,
    builder: Builder,
}

type Builder = Box<dyn Fn(&PassArgs) -> Result<Box<dyn Pass>, PassError>>;

impl PassInfo {
    /// Creates a registration record.
    pub fn new(
        id: impl Into<String>,
        doc: impl Into<String>,
        params: Vec<ParamSpec>,
        builder: impl Fn(&PassArgs) -> Result<Box<dyn Pass>, PassError> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            doc: doc.into(),
            params,
            builder: Box::new(builder),
        }
    }

    /// The computed signature string, e.g. `swap-ops(op, *, limit=-1)`.
    pub fn signature(&self) -> String {
        let mut sig = format!("{}(", self.id);
        let mut first = true;
        let mut starred = false;

        for param in self.params.iter() {
            if !first {
                sig.push_str(", ");
            }

            if param.keyword && !starred {
                sig.push_str("*, ");
                starred = true;
            }

            if param.keyword {
                sig.push_str(&format!("{}={}", param.name, param.default));
            } else {
                sig.push_str(param.name);
            }

            first = false;
        }

        sig.push(')');
        sig
    }

    pub(crate) fn build(&self, args: &PassArgs) -> Result<Box<dyn Pass>, PassError> {
        (self.builder)(args)
    }

    /// Binds an invocation's arguments against the formals, filling
    /// defaults. Shape violations report [`PassError::BadArguments`].
    pub fn bind(&self, invocation: &Invocation) -> Result<PassArgs, PassError> {
        let positionals: Vec<&ParamSpec> = self.params.iter().filter(|p| !p.keyword).collect();

        if invocation.positional.len() > positionals.len() {
            return Err(PassError::BadArguments(format!(
                "`{}` expects at most {} positional argument{}; received {}",
                self.id,
                positionals.len(),
                if positionals.len() == 1 { "" } else { "s" },
                invocation.positional.len()
            )));
        }

        let mut values = BTreeMap::new();

        for (i, param) in positionals.iter().enumerate() {
            let value = invocation
                .positional
                .get(i)
                .cloned()
                .unwrap_or_else(|| param.default.to_string());

            values.insert(param.name.to_string(), value);
        }

        for param in self.params.iter().filter(|p| p.keyword) {
            values.insert(param.name.to_string(), param.default.to_string());
        }

        for (name, value) in invocation.keyword.iter() {
            let formal = self.params.iter().find(|p| p.keyword && p.name == name);

            if formal.is_none() {
                return Err(PassError::BadArguments(format!(
                    "unrecognised keyword argument `{name}` passed to `{}`",
                    self.id
                )));
            }

            values.insert(name.clone(), value.clone());
        }

        Ok(PassArgs::new(values))
    }
}

impl fmt::Debug for PassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassInfo")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

fn is_valid_pass_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
}

/// One surface-form pass invocation, `id` or `id(a0, a1, k=v)`.
///
/// All argument values are strings; commas and parentheses cannot appear
/// inside them, so no escaping exists.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Invocation {
    /// The pass ID
    pub id: String,
    /// Positional arguments in order
    pub positional: Vec<String>,
    /// Keyword arguments in written order
    pub keyword: Vec<(String, String)>,
}

impl Invocation {
    /// An invocation with no arguments.
    pub fn bare(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Adds a positional argument.
    pub fn pos(mut self, value: impl Into<String>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Adds a keyword argument.
    pub fn kw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }

    /// Parses the surface form.
    pub fn parse(text: &str) -> Result<Self, PassError> {
        let text = text.trim();

        let (id, args) = match text.split_once('(') {
            None => (text, None),
            Some((id, rest)) => {
                let Some(inner) = rest.strip_suffix(')') else {
                    return Err(PassError::BadArguments(format!(
                        "`{text}` is missing a closing parenthesis"
                    )));
                };

                (id, Some(inner))
            }
        };

        if !is_valid_pass_id(id) {
            return Err(PassError::BadArguments(format!(
                "`{id}` is not a valid pass id"
            )));
        }

        let mut invocation = Invocation::bare(id);

        let Some(args) = args else {
            return Ok(invocation);
        };

        if args.trim().is_empty() {
            return Ok(invocation);
        }

        for arg in args.split(',') {
            let arg = arg.trim();

            if arg.is_empty() {
                return Err(PassError::BadArguments(format!(
                    "empty argument in `{text}`"
                )));
            }

            match arg.split_once('=') {
                Some((name, value)) => {
                    let name = name.trim();
                    let value = value.trim();

                    if invocation.keyword.iter().any(|(n, _)| n == name) {
                        return Err(PassError::BadArguments(format!(
                            "keyword argument `{name}` given twice"
                        )));
                    }

                    invocation = invocation.kw(name, value);
                }
                None => invocation = invocation.pos(arg),
            }
        }

        Ok(invocation)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;

        if self.positional.is_empty() && self.keyword.is_empty() {
            return Ok(());
        }

        write!(f, "(")?;

        let mut first = true;

        for value in self.positional.iter() {
            let sep = if first { "" } else { ", " };
            write!(f, "{sep}{value}")?;
            first = false;
        }

        for (name, value) in self.keyword.iter() {
            let sep = if first { "" } else { ", " };
            write!(f, "{sep}{name}={value}")?;
            first = false;
        }

        write!(f, ")")
    }
}

/// A wildcard-capable request for a pass instance, used by `require`.
///
/// `None` in a position means "any value": the manager returns the first
/// existing instance whose bound arguments agree on every fixed position,
/// or constructs a new one substituting defaults for the wildcards.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct PassQuery {
    /// The pass ID
    pub id: String,
    /// Positional constraints; `None` is a wildcard
    pub positional: Vec<Option<String>>,
    /// Keyword constraints; `None` is a wildcard (and so is absence)
    pub keyword: BTreeMap<String, Option<String>>,
}

impl PassQuery {
    /// A query with no constraints beyond the pass ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Constrains the next positional argument to a fixed value.
    pub fn pos(mut self, value: impl Into<String>) -> Self {
        self.positional.push(Some(value.into()));
        self
    }

    /// Leaves the next positional argument as a wildcard.
    pub fn pos_any(mut self) -> Self {
        self.positional.push(None);
        self
    }

    /// Constrains a keyword argument to a fixed value.
    pub fn kw(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.keyword.insert(name.into(), Some(value.into()));
        self
    }

    /// Explicitly marks a keyword argument as a wildcard.
    pub fn kw_any(mut self, name: impl Into<String>) -> Self {
        self.keyword.insert(name.into(), None);
        self
    }
}

/// Identifies one memoized pass instance within its manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct InstanceId(pub(crate) u32);

/// The set of instances whose results a just-run pass promises still
/// hold. Anything outside the set is invalidated by the manager.
///
/// This is not checked: a transform that reports preservation incorrectly
/// produces wrong compilations downstream, exactly as in any other pass
/// pipeline.
#[derive(Debug, Clone)]
pub struct Preserved {
    all: bool,
    // sorted so we can binary_search for `is_preserved`
    ids: SmallVec<[InstanceId; 4]>,
}

impl Preserved {
    /// Marks every instance as preserved. This is the correct return for
    /// a pure analysis, which changes nothing.
    pub fn all() -> Self {
        Self {
            all: true,
            ids: SmallVec::new(),
        }
    }

    /// Marks every instance as invalidated.
    pub fn none() -> Self {
        Self {
            all: false,
            ids: SmallVec::new(),
        }
    }

    /// Adds one instance to the preserved set.
    pub fn preserve(&mut self, id: InstanceId) {
        if self.all {
            return;
        }

        if let Err(pos) = self.ids.binary_search(&id) {
            self.ids.insert(pos, id);
        }
    }

    /// Builder-style [`Self::preserve`].
    pub fn with(mut self, id: InstanceId) -> Self {
        self.preserve(id);
        self
    }

    /// Whether an instance survives this set.
    pub fn is_preserved(&self, id: InstanceId) -> bool {
        self.all || self.ids.binary_search(&id).is_ok()
    }
}

/// A single analysis or transformation over a CFG.
///
/// Implementations access the CFG and the rest of the machinery through
/// the [`PassCtx`] handed to `run`: the CFG itself, `require` for
/// dependencies, and the debug channel. Getter methods exposing computed
/// results are ordinary methods reached by downcasting via
/// [`Instance::get`] after the manager has ensured validity.
pub trait Pass: Any {
    /// Runs the pass and reports which instances' results still hold.
    fn run(&mut self, ctx: &mut PassCtx<'_>) -> Result<Preserved, PassError>;

    /// The escape hatch for typed getter access.
    fn as_any(&self) -> &dyn Any;
}

/// The structured debug channel. Disabled emission costs one branch.
///
/// Records are `id :: message` lines; the manager also records every
/// pipeline error here whether or not the embedder reports it.
#[derive(Default)]
pub struct DebugSink {
    out: Option<RefCell<Box<dyn io::Write>>>,
}

impl DebugSink {
    /// A disabled sink; every emission is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink writing `id :: message` lines to `writer`.
    pub fn to_writer(writer: impl io::Write + 'static) -> Self {
        Self {
            out: Some(RefCell::new(Box::new(writer))),
        }
    }

    /// Whether emissions go anywhere.
    pub fn enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Emits one record.
    pub fn emit(&self, id: &str, args: fmt::Arguments<'_>) {
        if let Some(out) = self.out.as_ref() {
            let _ = writeln!(out.borrow_mut(), "{id} :: {args}");
        }
    }
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSink")
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Everything a running pass may touch: the CFG it is transforming, its
/// manager (for `require`) and the cancellation token.
///
/// Only the currently running pass holds this context, which is what makes
/// its CFG access exclusive.
pub struct PassCtx<'a> {
    pub(crate) manager: &'a PassManager,
    pub(crate) cfg: &'a mut Cfg,
    pub(crate) cancel: &'a Cancellation,
}

impl PassCtx<'_> {
    /// The CFG being worked on.
    pub fn cfg(&mut self) -> &mut Cfg {
        self.cfg
    }

    /// Read-only access to the CFG.
    pub fn cfg_ref(&self) -> &Cfg {
        self.cfg
    }

    /// Resolves a dependency, running it first if it is invalid.
    ///
    /// Call this before mutating the CFG: requiring an invalid pass from
    /// the middle of a transformation hands the dependency a half-edited
    /// CFG, and what it computes from that is unspecified.
    pub fn require(&mut self, query: &PassQuery) -> Result<InstanceId, PassError> {
        let id = self.manager.resolve_query(query)?;

        self.manager.ensure_valid(id, self.cfg, self.cancel)?;

        Ok(id)
    }

    /// The instance object for a resolved dependency, for getter access.
    pub fn instance(&self, id: InstanceId) -> std::rc::Rc<Instance> {
        self.manager.instance(id)
    }

    /// Emits a record on the manager's debug channel, prefixed with the
    /// running pass's ID.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.manager.debug_from_running(args);
    }
}
