//! A minimal byte-to-token scanner.
//!
//! The tokenizer is treated as an external collaborator: a real driver is
//! expected to supply its own linked token stream. This module exists only so the test
//! suite in `tests/` can feed whole C source strings through `preprocess`/`parser`
//! without hand-building `Token` lists for every case; it is deliberately small and does
//! not attempt trigraphs, raw strings, or universal character names.

use crate::diagnostics::Location;
use crate::token::{Token, TokenKind};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    at_bol: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0, line: 1, col: 0, at_bol: true }
    }

    fn peek(&self) -> u8 {
        *self.src.get(self.pos).unwrap_or(&0)
    }

    fn peek_at(&self, off: usize) -> u8 {
        *self.src.get(self.pos + off).unwrap_or(&0)
    }

    fn bump(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        c
    }

    fn loc(&self) -> Location {
        Location { line: self.line, col: self.col }
    }

    /// Skip whitespace and comments; backslash-newline is a line splice, not whitespace
    /// that would set `at_bol`. Returns whether any space (including a splice) was seen.
    fn skip_trivia(&mut self) -> bool {
        let mut saw_space = false;
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.bump();
                    saw_space = true;
                }
                b'\n' => {
                    self.bump();
                    self.at_bol = true;
                    saw_space = true;
                }
                b'\\' if self.peek_at(1) == b'\n' => {
                    self.bump();
                    self.bump();
                    saw_space = true;
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while self.peek() != b'\n' && self.peek() != 0 {
                        self.bump();
                    }
                    saw_space = true;
                }
                b'/' if self.peek_at(1) == b'*' => {
                    self.bump();
                    self.bump();
                    while !(self.peek() == b'*' && self.peek_at(1) == b'/') && self.peek() != 0 {
                        self.bump();
                    }
                    self.bump();
                    self.bump();
                    saw_space = true;
                }
                _ => break,
            }
        }
        saw_space
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let has_space = self.skip_trivia();
            let at_bol = self.at_bol;
            if self.peek() != 0 {
                self.at_bol = false;
            }
            let loc = self.loc();
            let c = self.peek();
            if c == 0 {
                let mut t = Token::eof(loc);
                t.at_bol = at_bol;
                t.has_space = has_space;
                out.push(t);
                break;
            }
            let mut tok = if c.is_ascii_alphabetic() || c == b'_' {
                self.lex_ident(loc)
            } else if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
                self.lex_number(loc)
            } else if c == b'"' {
                self.lex_string(loc)
            } else if c == b'\'' {
                self.lex_char(loc)
            } else {
                self.lex_punct(loc)
            };
            tok.at_bol = at_bol;
            tok.has_space = has_space;
            out.push(tok);
        }
        out
    }

    fn lex_ident(&mut self, loc: Location) -> Token {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token::new(TokenKind::Ident, loc, text)
    }

    fn lex_number(&mut self, loc: Location) -> Token {
        let start = self.pos;
        self.bump();
        while {
            let c = self.peek();
            c.is_ascii_alphanumeric()
                || c == b'.'
                || ((c == b'+' || c == b'-')
                    && matches!(self.src[self.pos - 1], b'e' | b'E' | b'p' | b'P'))
        } {
            self.bump();
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token::new(TokenKind::PpNumber, loc, text)
    }

    fn lex_string(&mut self, loc: Location) -> Token {
        let start = self.pos;
        self.bump();
        while self.peek() != b'"' && self.peek() != 0 {
            if self.peek() == b'\\' {
                self.bump();
            }
            self.bump();
        }
        self.bump();
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token::new(TokenKind::Str, loc, text)
    }

    fn lex_char(&mut self, loc: Location) -> Token {
        let start = self.pos;
        self.bump();
        while self.peek() != b'\'' && self.peek() != 0 {
            if self.peek() == b'\\' {
                self.bump();
            }
            self.bump();
        }
        self.bump();
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        Token::new(TokenKind::Num, loc, text)
    }

    const PUNCTS: &'static [&'static str] = &[
        "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&",
        "||", "*=", "/=", "%=", "+=", "-=", "&=", "^=", "|=", "##",
    ];

    fn lex_punct(&mut self, loc: Location) -> Token {
        let rest = &self.src[self.pos..];
        for p in Self::PUNCTS {
            if rest.starts_with(p.as_bytes()) {
                for _ in 0..p.len() {
                    self.bump();
                }
                return Token::new(TokenKind::Punct, loc, *p);
            }
        }
        let c = self.bump();
        Token::new(TokenKind::Punct, loc, (c as char).to_string())
    }
}

pub fn tokenize(src: &str) -> Vec<Token> {
    Lexer::new(src).tokenize()
}
