//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

//! A hand-written lexer and parser for IL source text.
//!
//! The grammar is line-oriented: one instruction (or one `@label:` header)
//! per line, `;` comments running to end of line, and metadata directives
//! (`;#!`, `;@!`, `;%!`) living inside comments. The parser produces a
//! fully validated [`Cfg`](crate::ir::Cfg).

mod errors;
mod lex;
mod parse;

pub use errors::*;
pub use lex::*;
pub use parse::*;
