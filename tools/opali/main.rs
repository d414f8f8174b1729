//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use opal::cli::{self, suppress_breakpoints, trace, BaseOptions};
use opal::interp::{
    Cancellation, Halt, Interp, InterpOptions, LineOutput, LineTrace, TokenInput,
};
use opal::reader::format_parse_error;
use std::io::{self, Write};
use std::{fs, process};

fn main() {
    let ((trace, suppress), base) = parse_options();

    assert_eq!(base.inputs.len(), 1, "can only interpret one file at a time");

    let input = base.inputs.last().unwrap();
    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            cli::report_error(&format!("cannot read `{}`: {e}", input.display()));
            process::exit(1);
        }
    };

    let cfg = match opal::parse_il(&source) {
        Ok(cfg) => cfg,
        Err(e) => {
            let name = input.display().to_string();

            eprintln!("{}", format_parse_error(&name, &source, &e));
            process::exit(1);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut input = TokenInput::new(stdin.lock());
    let mut output = LineOutput::new(stdout.lock());
    let mut trace_sink = trace.then(|| LineTrace::new(io::stderr()));
    let cancel = Cancellation::new();

    let mut interp = Interp::new(
        &cfg,
        InterpOptions {
            breakpoints: !suppress,
        },
    );

    loop {
        let halt = interp.run(
            &mut input,
            &mut output,
            trace_sink
                .as_mut()
                .map(|t| t as &mut dyn opal::interp::TraceSink),
            &cancel,
        );

        match halt {
            Ok(Halt::Exited) => break,
            Ok(Halt::Breakpoint(hit)) => {
                // non-interactive debugging: dump the environment, resume
                let mut err = io::stderr().lock();
                let _ = writeln!(err, "breakpoint !{} at {}", hit.name, hit.pc);

                for (name, value) in interp.registers() {
                    let _ = writeln!(err, "  %{name} = {value}");
                }
            }
            Err(e) => {
                cli::report_error(&e.to_string());
                process::exit(1);
            }
        }
    }
}

fn parse_options() -> ((bool, bool), BaseOptions) {
    cli::tool_with(
        "opal IL interpreter",
        "Usage: opali [options] <input il>",
        bpaf::construct!(trace(), suppress_breakpoints()),
    )
    .run()
}
