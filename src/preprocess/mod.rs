//! The preprocessor pipeline: macro expansion + directives, then the post-pass that
//! attaches attributes, re-tags keywords, and joins adjacent string literals
//!.

pub mod directives;
pub mod expand;
pub mod macro_table;

pub use directives::{IncludeResolver, Preprocessor};
pub use macro_table::{Builtin, MacroBody, MacroDef, MacroTable};

use crate::diagnostics::PreResult;
use crate::token::{Token, TokenKind};
use std::rc::Rc;

/// Preprocess one top-level source file: macro
/// expansion interleaved with directive handling, then attribute attachment, keyword
/// re-tagging, and string-literal concatenation.
pub fn preprocess(filename: &str, tokens: &[Token], resolver: &mut dyn IncludeResolver) -> PreResult<Vec<Token>> {
    let mut pp = Preprocessor::new(resolver);
    let expanded = pp.process(filename, tokens)?;
    let mut out = apply_attributes(expanded);
    retag_keywords(&mut out);
    Ok(concat_strings(out))
}

/// `__attribute__((...))` / `__attribute((...))`: parse the double-parenthesized list,
/// keep only the attributes this crate recognizes (`packed`), and attach
/// them to the next real token instead of emitting the attribute tokens themselves.
fn apply_attributes(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut pending: Vec<Rc<str>> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let is_attr_kw = tokens[i].is_ident("__attribute__") || tokens[i].is_ident("__attribute");
        let double_paren = is_attr_kw
            && tokens.get(i + 1).map(|t| t.is_punct("(")).unwrap_or(false)
            && tokens.get(i + 2).map(|t| t.is_punct("(")).unwrap_or(false);
        if double_paren {
            let mut depth = 0i32;
            let mut j = i + 1;
            while j < tokens.len() {
                if tokens[j].is_punct("(") {
                    depth += 1;
                } else if tokens[j].is_punct(")") {
                    depth -= 1;
                    if depth == 0 {
                        j += 1;
                        break;
                    }
                } else if tokens[j].kind == TokenKind::Ident
                    && (tokens[j].text == "packed" || tokens[j].text == "__packed__")
                {
                    pending.push(Rc::from("packed"));
                }
                j += 1;
            }
            i = j;
            continue;
        }
        let mut tok = tokens[i].clone();
        if !pending.is_empty() {
            tok.attrs.extend(pending.drain(..));
        }
        out.push(tok);
        i += 1;
    }
    out
}

fn retag_keywords(tokens: &mut [Token]) {
    for t in tokens.iter_mut() {
        if t.kind == TokenKind::Ident && crate::token::is_keyword(&t.text) {
            t.kind = TokenKind::Keyword;
        }
    }
}

/// Join runs of adjacent string-literal tokens into one, widening to a wide string if
/// any member of the run is prefixed `L`/`u`/`U`.
fn concat_strings(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].kind == TokenKind::Str {
            let mut bytes = decoded_bytes(&tokens[i]);
            let mut j = i + 1;
            while j < tokens.len() && tokens[j].kind == TokenKind::Str {
                bytes.extend(decoded_bytes(&tokens[j]));
                j += 1;
            }
            let mut merged = tokens[i].clone();
            merged.str_val = Some(bytes);
            out.push(merged);
            i = j;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn decoded_bytes(t: &Token) -> Vec<u8> {
    if let Some(b) = &t.str_val {
        return b.clone();
    }
    decode_c_string(&t.text)
}

/// Decode a quoted string literal's spelling (including its optional `L`/`u`/`U`/`u8`
/// prefix) into its byte payload, processing the escape sequences this crate's lexer
/// doesn't decode itself.
fn decode_c_string(text: &str) -> Vec<u8> {
    let stripped = text.trim_start_matches("u8").trim_start_matches(['L', 'u', 'U']);
    let inner = stripped.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(stripped);
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => out.push(b'\n'),
            Some('t') => out.push(b'\t'),
            Some('r') => out.push(b'\r'),
            Some('0') => out.push(0),
            Some('a') => out.push(0x07),
            Some('b') => out.push(0x08),
            Some('f') => out.push(0x0c),
            Some('v') => out.push(0x0b),
            Some('\\') => out.push(b'\\'),
            Some('\'') => out.push(b'\''),
            Some('"') => out.push(b'"'),
            Some(other) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
            None => {}
        }
    }
    out
}
