//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use std::iter::Peekable;
use std::str::CharIndices;

/// A binary operator token. `-` is not here, it lexes as
/// [`Token::Minus`] because it doubles as the sign of integer literals
/// and the unary-negation alias.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum OpTok {
    /// `+`
    Plus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `&`
    Amp,
    /// `|`
    Pipe,
    /// `^`
    Caret,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `==`
    EqEq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Leq,
    /// `>`, a surface alias normalized by the parser
    Gt,
    /// `>=`, a surface alias normalized by the parser
    Geq,
}

/// A single token of one source line. Comments never reach the lexer, the
/// parser strips them (and the metadata directives living inside them)
/// beforehand.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Token<'a> {
    /// A register reference, `%name`, stored without the sigil
    Register(&'a str),
    /// A label reference, `@name`, stored without the sigil
    Label(&'a str),
    /// An unsigned integer literal, decimal or `0x` hex, kept as raw text
    Int(&'a str),
    /// A bare word: an opcode keyword, `phi`, or a breakpoint name
    Ident(&'a str),
    /// `=`
    Assign,
    /// `?`
    Question,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `!`
    Bang,
    /// `-`
    Minus,
    /// `~`, the bitwise-not alias normalized by the parser
    Tilde,
    /// A binary operator
    Op(OpTok),
}

static_assertions::assert_eq_size!(Token<'static>, [usize; 3]);

/// A token plus where it sits in its line, for error rendering.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct TokPair<'a> {
    /// The token itself
    pub tok: Token<'a>,
    /// 1-based column of the token's first character
    pub col: u32,
    /// Length of the token in characters
    pub len: u16,
}

/// An unlexable character, reported with its 1-based column.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LexError {
    /// 1-based column of the offending character
    pub col: u32,
    /// What went wrong
    pub message: String,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.'
}

struct Lexer<'a> {
    line: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn name_from(&mut self, start: usize) -> &'a str {
        let mut end = self.line.len();

        while let Some((i, c)) = self.chars.peek().copied() {
            if is_name_char(c) {
                self.chars.next();
            } else {
                end = i;
                break;
            }
        }

        if self.chars.peek().is_some() {
            &self.line[start..end]
        } else {
            &self.line[start..]
        }
    }

    fn int_from(&mut self, start: usize) -> &'a str {
        let hex = self.line[start..].starts_with("0x");

        if hex {
            // consume the `x`
            self.chars.next();
        }

        let mut end = self.line.len();

        while let Some((i, c)) = self.chars.peek().copied() {
            let more = if hex {
                c.is_ascii_hexdigit()
            } else {
                c.is_ascii_digit()
            };

            if more {
                self.chars.next();
            } else {
                end = i;
                break;
            }
        }

        if self.chars.peek().is_some() {
            &self.line[start..end]
        } else {
            &self.line[start..]
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        match self.chars.peek() {
            Some((_, c)) if *c == expected => {
                self.chars.next();
                true
            }
            _ => false,
        }
    }
}

/// Lexes one comment-free source line into tokens.
pub fn lex_line(line: &str) -> Result<Vec<TokPair<'_>>, LexError> {
    let mut lexer = Lexer {
        line,
        chars: line.char_indices().peekable(),
    };
    let mut out = Vec::new();

    while let Some((start, c)) = lexer.chars.next() {
        if c.is_whitespace() {
            continue;
        }

        let col = (start + 1) as u32;
        let tok = match c {
            '%' => match lexer.chars.peek() {
                Some((i, c)) if is_name_char(*c) => {
                    let at = *i;
                    lexer.chars.next();
                    Token::Register(lexer.name_from(at))
                }
                _ => Token::Op(OpTok::Percent),
            },
            '@' => match lexer.chars.peek() {
                Some((i, c)) if is_name_char(*c) => {
                    let at = *i;
                    lexer.chars.next();
                    Token::Label(lexer.name_from(at))
                }
                _ => {
                    return Err(LexError {
                        col,
                        message: "`@` must be followed by a label name".to_string(),
                    })
                }
            },
            '=' if lexer.eat('=') => Token::Op(OpTok::EqEq),
            '=' => Token::Assign,
            '!' if lexer.eat('=') => Token::Op(OpTok::Neq),
            '!' => Token::Bang,
            '<' if lexer.eat('<') => Token::Op(OpTok::Shl),
            '<' if lexer.eat('=') => Token::Op(OpTok::Leq),
            '<' => Token::Op(OpTok::Lt),
            '>' if lexer.eat('>') => Token::Op(OpTok::Shr),
            '>' if lexer.eat('=') => Token::Op(OpTok::Geq),
            '>' => Token::Op(OpTok::Gt),
            '+' => Token::Op(OpTok::Plus),
            '-' => Token::Minus,
            '~' => Token::Tilde,
            '*' => Token::Op(OpTok::Star),
            '/' => Token::Op(OpTok::Slash),
            '&' => Token::Op(OpTok::Amp),
            '|' => Token::Op(OpTok::Pipe),
            '^' => Token::Op(OpTok::Caret),
            '?' => Token::Question,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            c if c.is_ascii_digit() => Token::Int(lexer.int_from(start)),
            c if is_name_start(c) => Token::Ident(lexer.name_from(start)),
            c => {
                return Err(LexError {
                    col,
                    message: format!("unexpected character `{c}`"),
                })
            }
        };

        let len = match tok {
            Token::Register(s) | Token::Label(s) => s.len() + 1,
            Token::Int(s) | Token::Ident(s) => s.len(),
            Token::Op(OpTok::Shl | OpTok::Shr | OpTok::EqEq | OpTok::Neq)
            | Token::Op(OpTok::Leq | OpTok::Geq) => 2,
            _ => 1,
        };

        out.push(TokPair {
            tok,
            col,
            len: len as u16,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(line: &str) -> Vec<Token<'_>> {
        lex_line(line).unwrap().into_iter().map(|p| p.tok).collect()
    }

    #[test]
    fn lexes_an_assignment() {
        assert_eq!(
            toks("%x.1 = %a << 3"),
            [
                Token::Register("x.1"),
                Token::Assign,
                Token::Register("a"),
                Token::Op(OpTok::Shl),
                Token::Int("3"),
            ]
        );
    }

    #[test]
    fn minus_is_its_own_token() {
        assert_eq!(
            toks("write -0x2a"),
            [Token::Ident("write"), Token::Minus, Token::Int("0x2a")]
        );
        assert_eq!(
            toks("%x = %a - 1"),
            [
                Token::Register("x"),
                Token::Assign,
                Token::Register("a"),
                Token::Minus,
                Token::Int("1"),
            ]
        );
    }

    #[test]
    fn compound_operators_take_maximal_munch() {
        assert_eq!(toks("<<")[0], Token::Op(OpTok::Shl));
        assert_eq!(toks("<=")[0], Token::Op(OpTok::Leq));
        assert_eq!(toks("<")[0], Token::Op(OpTok::Lt));
        assert_eq!(toks(">=")[0], Token::Op(OpTok::Geq));
        assert_eq!(toks("!=")[0], Token::Op(OpTok::Neq));
        assert_eq!(toks("==")[0], Token::Op(OpTok::EqEq));
        assert_eq!(toks("=")[0], Token::Assign);
    }

    #[test]
    fn branch_line() {
        assert_eq!(
            toks("branch %c ? @a : @b"),
            [
                Token::Ident("branch"),
                Token::Register("c"),
                Token::Question,
                Token::Label("a"),
                Token::Colon,
                Token::Label("b"),
            ]
        );
    }

    #[test]
    fn percent_is_an_operator_without_a_name() {
        assert_eq!(
            toks("%r = %a % %b"),
            [
                Token::Register("r"),
                Token::Assign,
                Token::Register("a"),
                Token::Op(OpTok::Percent),
                Token::Register("b"),
            ]
        );
    }

    #[test]
    fn columns_are_one_based() {
        let pairs = lex_line("  goto @x").unwrap();

        assert_eq!(pairs[0].col, 3);
        assert_eq!(pairs[1].col, 8);
        assert_eq!(pairs[1].len, 2);
    }

    #[test]
    fn rejects_stray_characters() {
        assert!(lex_line("read %x #").is_err());
        assert!(lex_line("@:").is_err());
    }
}
