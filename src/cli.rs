//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! Contains utility code specifically for the CLI tools located in
//! the `tools/` subdirectory.
//!
//! All of these tools have similar command-line arguments and they all
//! should look/feel uniform, so most of the code is pulled into this
//! module and then used in the drivers of the different tools.

use bpaf::{construct, OptionParser, Parser};
use std::path::PathBuf;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Basic options that every CLI tool in the suite takes in.
pub struct BaseOptions {
    /// The file to output results to
    pub output: Option<PathBuf>,
    /// Whether to enable the debug channel / verbose diagnostics
    pub verbose: bool,
    /// The list of inputs given to the tool
    pub inputs: Vec<PathBuf>,
}

/// Returns an [`OptionParser`] preconfigured with the standard options
/// and additional tool-specific options.
pub fn tool_with<T>(
    description: &'static str,
    usage: &'static str,
    additional: impl Parser<T> + 'static,
) -> OptionParser<(T, BaseOptions)> {
    let res = construct!(additional, default());

    res.to_options()
        .descr(description)
        .version(VERSION)
        .usage(usage)
}

/// Gets the baseline default options that every tool needs.
pub fn default() -> impl Parser<BaseOptions> {
    let inputs = inputs();
    let output = output();
    let verbose = verbose();

    construct!(BaseOptions {
        output,
        verbose,
        inputs,
    })
}

/// Gets the output file specified on the CLI, if one exists.
pub fn output() -> impl Parser<Option<PathBuf>> {
    bpaf::long("output")
        .short('o')
        .help("the file to output to")
        .argument::<PathBuf>("FILE")
        .optional()
}

/// Gets the input files specified on the CLI.
pub fn inputs() -> impl Parser<Vec<PathBuf>> {
    bpaf::positional::<PathBuf>("FILES")
        .help("files to read as input to the tool")
        .many()
}

/// Checks for the presence of `-v` or `--verbose`.
pub fn verbose() -> impl Parser<bool> {
    bpaf::long("verbose")
        .short('v')
        .help("enable verbose output on the debug channel")
        .flag(true, false)
}

/// The `-p`/`--pass` list for tools that run pipelines. Each occurrence
/// appends one invocation, `id` or `id(arg0, k=v)`, order-sensitive.
pub fn passes() -> impl Parser<Vec<String>> {
    bpaf::long("pass")
        .short('p')
        .help("append a pass to run (order-sensitive), e.g. `dce` or `swap-ops(mul)`")
        .argument::<String>("PASS")
        .many()
}

/// `--list-passes`: list all registered passes and exit.
pub fn list_passes() -> impl Parser<bool> {
    bpaf::long("list-passes")
        .short('l')
        .help("list all available passes and exit")
        .flag(true, false)
}

/// `--explain PASS`: print a pass's signature and docstring and exit.
pub fn explain() -> impl Parser<Option<String>> {
    bpaf::long("explain")
        .help("print the signature and documentation of a pass, then exit")
        .argument::<String>("PASS")
        .optional()
}

/// `-t`/`--trace`: stream an execution trace to stderr.
pub fn trace() -> impl Parser<bool> {
    bpaf::long("trace")
        .short('t')
        .help("write an execution trace to stderr")
        .flag(true, false)
}

/// `-B`/`--suppress-breakpoints`: treat `brkpt` as a no-op.
pub fn suppress_breakpoints() -> impl Parser<bool> {
    bpaf::long("suppress-breakpoints")
        .short('B')
        .help("ignore breakpoints in the program")
        .flag(true, false)
}

/// Prints a uniformly formatted error to stderr.
pub fn report_error(message: &str) {
    let prefix = ansi_term::Colour::Red.bold().paint("error:");

    eprintln!("{prefix} {message}");
}
