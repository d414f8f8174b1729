//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

/// A parse failure with enough position information to render a caret
/// diagnostic. `line == 0` marks a program-level failure (an empty
/// program, or a CFG invariant violated once all blocks were read).
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based source line, 0 for program-level errors
    pub line: u32,
    /// 1-based column of the offending token
    pub col: u32,
    /// Length of the offending token in characters
    pub len: u16,
    /// What went wrong
    pub message: String,
}

/// Formats a [`ParseError`] into a human-readable, caret-underlined string.
pub fn format_parse_error(name: &str, source: &str, err: &ParseError) -> String {
    if err.line == 0 {
        return format!("{name}: {}", err.message);
    }

    // get the line we want as the first element in this iterator
    let mut lines = source.lines().skip((err.line - 1) as usize);
    let line = lines.next().unwrap_or_default();

    let (line_n, col_n) = (err.line.to_string(), err.col.to_string());
    let mut error = String::default();

    let num_padding = " ".repeat(line_n.len());
    let col_padding = " ".repeat((err.col.max(1) - 1) as usize);
    let underline = "^".repeat((err.len.max(1)) as usize);

    error += &format!("  --> {name}:{line_n}:{col_n}\n");
    error += &format!(" {num_padding} |\n");
    error += &format!(" {line_n} | {line}\n");
    error += &format!(" {num_padding} | {col_padding}{underline}\n");
    error += &format!(" {num_padding} |\n");
    error += &format!(" {num_padding} = {}", err.message);

    error
}
