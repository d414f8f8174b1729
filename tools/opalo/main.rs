//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use opal::cli::{self, explain, list_passes, passes, BaseOptions};
use opal::interp::Cancellation;
use opal::pass::{DebugSink, PassManager};
use opal::reader::format_parse_error;
use std::{fs, io, process};

fn main() {
    let ((passes, list, explain, verify), base) = parse_options();

    let mut pm = PassManager::new();

    if let Err(e) = opal::passes::register_default_passes(&mut pm) {
        cli::report_error(&e.to_string());
        process::exit(1);
    }

    if base.verbose {
        pm.set_debug(DebugSink::to_writer(io::stderr()));
    }

    if list {
        for id in pm.list() {
            println!("{id}");
        }

        return;
    }

    if let Some(id) = explain {
        match pm.explain(&id) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                cli::report_error(&e.to_string());
                process::exit(1);
            }
        }

        return;
    }

    assert_eq!(base.inputs.len(), 1, "can only optimize one file at a time");

    let input = base.inputs.last().unwrap();
    let source = match fs::read_to_string(input) {
        Ok(source) => source,
        Err(e) => {
            cli::report_error(&format!("cannot read `{}`: {e}", input.display()));
            process::exit(1);
        }
    };

    let mut cfg = match opal::parse_il(&source) {
        Ok(cfg) => cfg,
        Err(e) => {
            let name = input.display().to_string();

            eprintln!("{}", format_parse_error(&name, &source, &e));
            process::exit(1);
        }
    };

    let mut pipeline = Vec::new();

    if verify {
        pipeline.push("verify".to_string());
    }

    for pass in passes {
        pipeline.push(pass);

        if verify {
            pipeline.push("verify".to_string());
        }
    }

    if let Err(e) = pm.run_pipeline_text(&mut cfg, &pipeline, &Cancellation::new()) {
        cli::report_error(&e.to_string());
        process::exit(1);
    }

    let text = opal::write_il(&cfg);

    match &base.output {
        Some(path) => {
            if let Err(e) = fs::write(path, text) {
                cli::report_error(&format!("unable to write `{}`: {e}", path.display()));
                process::exit(1);
            }
        }
        None => print!("{text}"),
    }
}

fn parse_options() -> ((Vec<String>, bool, Option<String>, bool), BaseOptions) {
    cli::tool_with(
        "opal .opal -> .opal optimizer and pass runner",
        "Usage: opalo [options] <input il>",
        bpaf::construct!(passes(), list_passes(), explain(), verify()),
    )
    .run()
}

fn verify() -> impl bpaf::Parser<bool> {
    bpaf::long("verify")
        .help("interleave CFG verification between passes")
        .flag(true, false)
}
