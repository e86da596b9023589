//! Directive processing: conditional inclusion, `#include`/`#include_next`, `#define`/
//! `#undef`, `#line`, `#pragma`/`_Pragma`, `#error`/`#warning`, and include-guard
//! detection.

use super::expand::Expander;
use super::macro_table::{MacroBody, MacroDef, MacroTable};
use crate::diagnostics::{err, Location, PreResult, PreprocessError};
use crate::token::{Token, TokenKind};
use std::collections::{HashMap, HashSet};

/// Resolves `#include` targets to file contents. Search-path handling (`-iquote`,
/// current file's directory, `-I`, `-idirafter`) and file I/O are external collaborators
///; this crate only needs back the path to key guard/once state on and the
/// raw source text to tokenize and recurse into.
pub trait IncludeResolver {
    fn resolve_quote(&mut self, name: &str, current_file: &str) -> Option<(String, String)>;
    fn resolve_angle(&mut self, name: &str) -> Option<(String, String)>;
    /// `#include_next`: resume the angle-bracket search after the directory that
    /// produced `current_file`. Defaults to an ordinary angle-bracket search for
    /// resolvers that don't track a per-file search-path cursor.
    fn resolve_next(&mut self, name: &str, current_file: &str) -> Option<(String, String)> {
        let _ = current_file;
        self.resolve_angle(name)
    }
}

const MAX_INCLUDE_DEPTH: u32 = 200;

struct CondFrame {
    parent_active: bool,
    branch_active: bool,
    any_taken: bool,
    saw_else: bool,
}

impl CondFrame {
    fn live(&self) -> bool {
        self.parent_active && self.branch_active
    }
}

pub struct Preprocessor<'r> {
    pub macros: MacroTable,
    resolver: &'r mut dyn IncludeResolver,
    stack: Vec<CondFrame>,
    /// Resolved path -> the macro name an `#ifndef`/`#endif` pair wraps the whole file in.
    guards: HashMap<String, String>,
    once: HashSet<String>,
    include_depth: u32,
}

impl<'r> Preprocessor<'r> {
    pub fn new(resolver: &'r mut dyn IncludeResolver) -> Self {
        Preprocessor {
            macros: MacroTable::with_predefined(),
            resolver,
            stack: Vec::new(),
            guards: HashMap::new(),
            once: HashSet::new(),
            include_depth: 0,
        }
    }

    pub fn process(&mut self, filename: &str, tokens: &[Token]) -> PreResult<Vec<Token>> {
        self.process_file(filename, tokens)
    }

    fn active(&self) -> bool {
        self.stack.last().map(CondFrame::live).unwrap_or(true)
    }

    fn push_frame(&mut self, parent_active: bool, branch_active: bool) {
        self.stack.push(CondFrame { parent_active, branch_active, any_taken: branch_active, saw_else: false });
    }

    fn process_file(&mut self, path: &str, tokens: &[Token]) -> PreResult<Vec<Token>> {
        let entry_depth = self.stack.len();
        let mut out = Vec::new();
        let mut i = 0usize;
        let mut is_first_directive = true;
        let mut guard_name: Option<String> = None;
        let mut guard_frame_depth: Option<usize> = None;
        let mut guard_closed_as_last = false;
        let mut line_delta: i64 = 0;

        while i < tokens.len() && !tokens[i].is_eof() {
            if tokens[i].is_punct("#") && tokens[i].at_bol {
                let dir_loc = tokens[i].loc;
                let (kw, rest, next_i) = split_directive_line(tokens, i);
                guard_closed_as_last = false;

                match kw.as_deref() {
                    None => {
                        // An empty `#` directive is a no-op.
                    }
                    Some("include") => {
                        let included = self.handle_include(path, rest, dir_loc, false)?;
                        out.extend(included);
                        is_first_directive = false;
                    }
                    Some("include_next") => {
                        let included = self.handle_include(path, rest, dir_loc, true)?;
                        out.extend(included);
                        is_first_directive = false;
                    }
                    Some("define") => {
                        if self.active() {
                            self.handle_define(rest, dir_loc)?;
                        }
                        is_first_directive = false;
                    }
                    Some("undef") => {
                        if self.active() {
                            self.handle_undef(rest, dir_loc)?;
                        }
                        is_first_directive = false;
                    }
                    Some("if") => {
                        let parent_active = self.active();
                        let cond = if parent_active { self.eval_pp_expr(rest, dir_loc)? } else { false };
                        self.push_frame(parent_active, cond);
                        is_first_directive = false;
                    }
                    Some(k @ ("ifdef" | "ifndef")) => {
                        let parent_active = self.active();
                        let name = rest
                            .first()
                            .filter(|t| t.kind == TokenKind::Ident)
                            .map(|t| t.text.clone())
                            .ok_or_else(|| PreprocessError {
                                location: dir_loc,
                                message: format!("macro name missing after #{}", k),
                            })?;
                        let defined = self.macros.is_defined(&name);
                        let cond = if k == "ifndef" { !defined } else { defined };
                        if is_first_directive && k == "ifndef" {
                            guard_name = Some(name);
                            guard_frame_depth = Some(self.stack.len() + 1);
                        }
                        self.push_frame(parent_active, cond);
                        is_first_directive = false;
                    }
                    Some("elif") => {
                        is_first_directive = false;
                        let (parent_active, any_taken, saw_else) = {
                            let f = self.stack.last().ok_or_else(|| PreprocessError {
                                location: dir_loc,
                                message: "#elif without #if".to_string(),
                            })?;
                            (f.parent_active, f.any_taken, f.saw_else)
                        };
                        if saw_else {
                            return err!(PreprocessError, dir_loc, "#elif after #else");
                        }
                        let cond = if parent_active && !any_taken {
                            self.eval_pp_expr(rest, dir_loc)?
                        } else {
                            false
                        };
                        let f = self.stack.last_mut().unwrap();
                        if f.any_taken {
                            f.branch_active = false;
                        } else {
                            f.branch_active = cond;
                            if cond {
                                f.any_taken = true;
                            }
                        }
                    }
                    Some("else") => {
                        is_first_directive = false;
                        let (any_taken, saw_else) = {
                            let f = self.stack.last().ok_or_else(|| PreprocessError {
                                location: dir_loc,
                                message: "#else without #if".to_string(),
                            })?;
                            (f.any_taken, f.saw_else)
                        };
                        if saw_else {
                            return err!(PreprocessError, dir_loc, "#else after #else");
                        }
                        let f = self.stack.last_mut().unwrap();
                        f.saw_else = true;
                        f.branch_active = !any_taken;
                        if f.branch_active {
                            f.any_taken = true;
                        }
                    }
                    Some("endif") => {
                        is_first_directive = false;
                        if self.stack.len() <= entry_depth {
                            return err!(PreprocessError, dir_loc, "#endif without #if");
                        }
                        self.stack.pop();
                        if let Some(depth) = guard_frame_depth {
                            if self.stack.len() + 1 == depth
                                && tokens.get(next_i).map(Token::is_eof).unwrap_or(true)
                            {
                                guard_closed_as_last = true;
                            }
                        }
                    }
                    Some("line") => {
                        is_first_directive = false;
                        if self.active() {
                            let n = rest.first().ok_or_else(|| PreprocessError {
                                location: dir_loc,
                                message: "#line requires a line number".to_string(),
                            })?;
                            let requested: i64 = n.text.parse().unwrap_or(0).max(0);
                            line_delta = requested - (dir_loc.line as i64 + 1);
                        }
                    }
                    Some("pragma") => {
                        is_first_directive = false;
                        if self.active() {
                            self.handle_pragma(rest, path);
                        }
                    }
                    Some("error") => {
                        is_first_directive = false;
                        if self.active() {
                            let msg = rest.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
                            return err!(PreprocessError, dir_loc, "#error {}", msg);
                        }
                    }
                    Some("warning") => {
                        is_first_directive = false;
                        if self.active() {
                            let msg = rest.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
                            log::warn!("{}: #warning {}", dir_loc, msg);
                        }
                    }
                    Some(other) => {
                        is_first_directive = false;
                        if self.active() {
                            return err!(PreprocessError, dir_loc, "invalid preprocessing directive #{}", other);
                        }
                    }
                }
                i = next_i;
                continue;
            }

            let mut j = i;
            while j < tokens.len() && !tokens[j].is_eof() && !(tokens[j].is_punct("#") && tokens[j].at_bol) {
                j += 1;
            }
            if j > i {
                is_first_directive = false;
                guard_closed_as_last = false;
            }
            if self.active() {
                let run = &tokens[i..j];
                let mut expanded = {
                    let mut exp = Expander::new(&mut self.macros, path);
                    exp.expand_all(run)?
                };
                if line_delta != 0 {
                    for t in expanded.iter_mut() {
                        if t.loc.line != 0 {
                            t.loc.line = (t.loc.line as i64 + line_delta).max(0) as usize;
                        }
                    }
                }
                out.extend(self.process_pragma_operator(expanded, path));
            }
            i = j;
        }

        if let (Some(name), true) = (guard_name, guard_closed_as_last) {
            self.guards.insert(path.to_string(), name);
        }
        Ok(out)
    }

    fn handle_define(&mut self, rest: &[Token], loc: Location) -> PreResult<()> {
        let name_tok = rest.first().filter(|t| t.kind == TokenKind::Ident);
        let name = match name_tok {
            Some(t) => t.text.clone(),
            None => return err!(PreprocessError, loc, "macro name missing"),
        };
        if rest.len() > 1 && rest[1].is_punct("(") && !rest[1].has_space {
            let mut params = Vec::new();
            let mut variadic_name = None;
            let mut i = 2;
            loop {
                if i >= rest.len() {
                    return err!(PreprocessError, loc, "unterminated macro parameter list");
                }
                if rest[i].is_punct(")") {
                    i += 1;
                    break;
                }
                if rest[i].is_punct("...") {
                    variadic_name = Some("__VA_ARGS__".to_string());
                    i += 1;
                    if !rest.get(i).map(|t| t.is_punct(")")).unwrap_or(false) {
                        return err!(PreprocessError, loc, "expected ')' after '...'");
                    }
                    i += 1;
                    break;
                }
                if rest[i].kind != TokenKind::Ident {
                    return err!(PreprocessError, loc, "expected parameter name");
                }
                if rest.get(i + 1).map(|t| t.is_punct("...")).unwrap_or(false) {
                    variadic_name = Some(rest[i].text.clone());
                    i += 2;
                    if !rest.get(i).map(|t| t.is_punct(")")).unwrap_or(false) {
                        return err!(PreprocessError, loc, "expected ')' after named variadic parameter");
                    }
                    i += 1;
                    break;
                }
                params.push(rest[i].text.clone());
                i += 1;
                if rest.get(i).map(|t| t.is_punct(",")).unwrap_or(false) {
                    i += 1;
                    continue;
                }
                if rest.get(i).map(|t| t.is_punct(")")).unwrap_or(false) {
                    i += 1;
                    break;
                }
                return err!(PreprocessError, loc, "expected ',' or ')' in macro parameter list");
            }
            let body = rest[i..].to_vec();
            self.macros.define(MacroDef {
                name,
                is_function_like: true,
                params,
                variadic_name,
                body: MacroBody::Tokens(body),
            });
        } else {
            let body = rest.get(1..).unwrap_or(&[]).to_vec();
            self.macros.define(MacroDef {
                name,
                is_function_like: false,
                params: Vec::new(),
                variadic_name: None,
                body: MacroBody::Tokens(body),
            });
        }
        Ok(())
    }

    fn handle_undef(&mut self, rest: &[Token], loc: Location) -> PreResult<()> {
        let name = rest
            .first()
            .filter(|t| t.kind == TokenKind::Ident)
            .map(|t| t.text.clone())
            .ok_or_else(|| PreprocessError { location: loc, message: "macro name missing in #undef".to_string() })?;
        self.macros.undef(&name);
        Ok(())
    }

    fn handle_include(&mut self, cur_file: &str, rest: &[Token], loc: Location, next: bool) -> PreResult<Vec<Token>> {
        if !self.active() {
            return Ok(Vec::new());
        }
        let (name, angled) = self.parse_include_target(rest, loc)?;
        let resolved = if next {
            self.resolver.resolve_next(&name, cur_file)
        } else if angled {
            self.resolver.resolve_angle(&name)
        } else {
            self.resolver.resolve_quote(&name, cur_file)
        };
        let (resolved_path, src) = match resolved {
            Some(v) => v,
            None => return err!(PreprocessError, loc, "'{}' file not found", name),
        };
        if self.once.contains(&resolved_path) {
            return Ok(Vec::new());
        }
        if let Some(guard) = self.guards.get(&resolved_path).cloned() {
            if self.macros.is_defined(&guard) {
                return Ok(Vec::new());
            }
        }
        self.include_depth += 1;
        if self.include_depth > MAX_INCLUDE_DEPTH {
            self.include_depth -= 1;
            return err!(PreprocessError, loc, "#include nested too deeply");
        }
        let toks = crate::lexer::tokenize(&src);
        let included = self.process_file(&resolved_path, &toks);
        self.include_depth -= 1;
        included
    }

    fn parse_include_target(&mut self, rest: &[Token], loc: Location) -> PreResult<(String, bool)> {
        if let Some(parsed) = literal_include_target(rest) {
            return Ok(parsed);
        }
        let expanded = {
            let mut exp = Expander::new(&mut self.macros, "");
            exp.expand_all(rest)?
        };
        literal_include_target(&expanded).ok_or_else(|| PreprocessError {
            location: loc,
            message: "expected \"FILENAME\" or <FILENAME>".to_string(),
        })
    }

    /// `_Pragma("text")` behaves as if `#pragma text` appeared at that point in the
    /// source; it produces no tokens of its own.
    fn process_pragma_operator(&mut self, tokens: Vec<Token>, path: &str) -> Vec<Token> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i].is_ident("_Pragma") && tokens.get(i + 1).map(|t| t.is_punct("(")).unwrap_or(false) {
                let str_idx = i + 2;
                if tokens.get(str_idx).map(|t| t.kind == TokenKind::Str).unwrap_or(false)
                    && tokens.get(str_idx + 1).map(|t| t.is_punct(")")).unwrap_or(false)
                {
                    let destringized = destringize(&tokens[str_idx]);
                    let mut pragma_toks = crate::lexer::tokenize(&destringized);
                    pragma_toks.pop(); // drop the synthetic EOF from the nested tokenize
                    self.handle_pragma(&pragma_toks, path);
                    i = str_idx + 2;
                    continue;
                }
            }
            out.push(tokens[i].clone());
            i += 1;
        }
        out
    }

    fn handle_pragma(&mut self, toks: &[Token], path: &str) {
        if toks.first().map(|t| t.is_ident("once")).unwrap_or(false) {
            self.once.insert(path.to_string());
        }
        // Every other pragma (`GCC diagnostic`, `pack`, vendor pragmas, ...) is accepted
        // and otherwise ignored: there is no `-E` passthrough driver in scope to re-emit
        // it to.
    }

    fn eval_pp_expr(&mut self, rest: &[Token], loc: Location) -> PreResult<bool> {
        if rest.is_empty() {
            return err!(PreprocessError, loc, "#if with no expression");
        }
        let substituted = substitute_defined(&self.macros, rest)?;
        let expanded = {
            let mut exp = Expander::new(&mut self.macros, "");
            exp.expand_all(&substituted)?
        };
        let mut p = PpExprParser { toks: &expanded, pos: 0, loc };
        let v = p.parse_expr()?;
        p.expect_end()?;
        Ok(v != 0)
    }
}

fn split_directive_line(tokens: &[Token], hash_idx: usize) -> (Option<String>, &[Token], usize) {
    let j = hash_idx + 1;
    let mut end = j;
    while end < tokens.len() && !tokens[end].is_eof() && !tokens[end].at_bol {
        end += 1;
    }
    if j < end && tokens[j].kind == TokenKind::Ident {
        (Some(tokens[j].text.clone()), &tokens[j + 1..end], end)
    } else {
        (None, &tokens[j..end], end)
    }
}

fn literal_include_target(rest: &[Token]) -> Option<(String, bool)> {
    let first = rest.first()?;
    if first.kind == TokenKind::Str {
        let name = first
            .str_val
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| first.text.trim_matches('"').to_string());
        return Some((name, false));
    }
    if first.is_punct("<") {
        let mut name = String::new();
        let mut i = 1;
        while i < rest.len() && !rest[i].is_punct(">") {
            if !name.is_empty() && rest[i].has_space {
                name.push(' ');
            }
            name.push_str(&rest[i].text);
            i += 1;
        }
        if i >= rest.len() {
            return None;
        }
        return Some((name, true));
    }
    None
}

fn destringize(tok: &Token) -> String {
    let inner = tok.text.trim_start_matches(|c| c == 'L' || c == 'u' || c == 'U');
    let inner = inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(inner);
    let mut s = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '"' || next == '\\' {
                    s.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        s.push(c);
    }
    s
}

/// `defined(X)` / `defined X` must see the raw operand, never a macro-expanded one, so
/// this substitution runs before the general expansion pass.
fn substitute_defined(macros: &MacroTable, rest: &[Token]) -> PreResult<Vec<Token>> {
    let mut out = Vec::with_capacity(rest.len());
    let mut i = 0;
    while i < rest.len() {
        if rest[i].is_ident("defined") {
            let loc = rest[i].loc;
            let (name, next) = if rest.get(i + 1).map(|t| t.is_punct("(")).unwrap_or(false) {
                let name = rest
                    .get(i + 2)
                    .filter(|t| t.kind == TokenKind::Ident)
                    .map(|t| t.text.clone())
                    .ok_or_else(|| PreprocessError { location: loc, message: "operand of \"defined\" missing".to_string() })?;
                if !rest.get(i + 3).map(|t| t.is_punct(")")).unwrap_or(false) {
                    return err!(PreprocessError, loc, "missing ')' after \"defined\"");
                }
                (name, i + 4)
            } else {
                let name = rest
                    .get(i + 1)
                    .filter(|t| t.kind == TokenKind::Ident)
                    .map(|t| t.text.clone())
                    .ok_or_else(|| PreprocessError { location: loc, message: "operand of \"defined\" missing".to_string() })?;
                (name, i + 2)
            };
            let v = if macros.is_defined(&name) { 1 } else { 0 };
            out.push(num_token(v, loc));
            i = next;
            continue;
        }
        out.push(rest[i].clone());
        i += 1;
    }
    Ok(out)
}

fn num_token(v: i64, loc: Location) -> Token {
    let mut t = Token::new(TokenKind::Num, loc, v.to_string());
    t.ival = v;
    t
}

struct PpExprParser<'t> {
    toks: &'t [Token],
    pos: usize,
    loc: Location,
}

impl<'t> PpExprParser<'t> {
    fn peek(&self) -> Option<&Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn at_punct(&self, p: &str) -> bool {
        self.peek().map(|t| t.is_punct(p)).unwrap_or(false)
    }

    fn expect_end(&self) -> PreResult<()> {
        if self.pos < self.toks.len() {
            return err!(PreprocessError, self.toks[self.pos].loc, "extra tokens after #if expression");
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> PreResult<i64> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> PreResult<i64> {
        let cond = self.parse_logor()?;
        if self.at_punct("?") {
            self.bump();
            let then_v = self.parse_expr()?;
            if !self.at_punct(":") {
                return err!(PreprocessError, self.loc, "expected ':' in conditional expression");
            }
            self.bump();
            let else_v = self.parse_conditional()?;
            return Ok(if cond != 0 { then_v } else { else_v });
        }
        Ok(cond)
    }

    fn parse_logor(&mut self) -> PreResult<i64> {
        let mut v = self.parse_logand()?;
        while self.at_punct("||") {
            self.bump();
            let rhs = self.parse_logand()?;
            v = ((v != 0) || (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn parse_logand(&mut self) -> PreResult<i64> {
        let mut v = self.parse_bitor()?;
        while self.at_punct("&&") {
            self.bump();
            let rhs = self.parse_bitor()?;
            v = ((v != 0) && (rhs != 0)) as i64;
        }
        Ok(v)
    }

    fn parse_bitor(&mut self) -> PreResult<i64> {
        let mut v = self.parse_bitxor()?;
        while self.at_punct("|") {
            self.bump();
            v |= self.parse_bitxor()?;
        }
        Ok(v)
    }

    fn parse_bitxor(&mut self) -> PreResult<i64> {
        let mut v = self.parse_bitand()?;
        while self.at_punct("^") {
            self.bump();
            v ^= self.parse_bitand()?;
        }
        Ok(v)
    }

    fn parse_bitand(&mut self) -> PreResult<i64> {
        let mut v = self.parse_eq()?;
        while self.at_punct("&") {
            self.bump();
            v &= self.parse_eq()?;
        }
        Ok(v)
    }

    fn parse_eq(&mut self) -> PreResult<i64> {
        let mut v = self.parse_rel()?;
        loop {
            if self.at_punct("==") {
                self.bump();
                v = (v == self.parse_rel()?) as i64;
            } else if self.at_punct("!=") {
                self.bump();
                v = (v != self.parse_rel()?) as i64;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn parse_rel(&mut self) -> PreResult<i64> {
        let mut v = self.parse_shift()?;
        loop {
            if self.at_punct("<") {
                self.bump();
                v = (v < self.parse_shift()?) as i64;
            } else if self.at_punct("<=") {
                self.bump();
                v = (v <= self.parse_shift()?) as i64;
            } else if self.at_punct(">") {
                self.bump();
                v = (v > self.parse_shift()?) as i64;
            } else if self.at_punct(">=") {
                self.bump();
                v = (v >= self.parse_shift()?) as i64;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn parse_shift(&mut self) -> PreResult<i64> {
        let mut v = self.parse_add()?;
        loop {
            if self.at_punct("<<") {
                self.bump();
                v <<= self.parse_add()?;
            } else if self.at_punct(">>") {
                self.bump();
                v >>= self.parse_add()?;
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn parse_add(&mut self) -> PreResult<i64> {
        let mut v = self.parse_mul()?;
        loop {
            if self.at_punct("+") {
                self.bump();
                v = v.wrapping_add(self.parse_mul()?);
            } else if self.at_punct("-") {
                self.bump();
                v = v.wrapping_sub(self.parse_mul()?);
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn parse_mul(&mut self) -> PreResult<i64> {
        let mut v = self.parse_unary()?;
        loop {
            if self.at_punct("*") {
                self.bump();
                v = v.wrapping_mul(self.parse_unary()?);
            } else if self.at_punct("/") {
                let op_loc = self.peek().map(|t| t.loc).unwrap_or(self.loc);
                self.bump();
                let rhs = self.parse_unary()?;
                if rhs == 0 {
                    return err!(PreprocessError, op_loc, "division by zero in #if");
                }
                v = if v == i64::MIN && rhs == -1 { i64::MIN } else { v / rhs };
            } else if self.at_punct("%") {
                let op_loc = self.peek().map(|t| t.loc).unwrap_or(self.loc);
                self.bump();
                let rhs = self.parse_unary()?;
                if rhs == 0 {
                    return err!(PreprocessError, op_loc, "division by zero in #if");
                }
                v = if v == i64::MIN && rhs == -1 { 0 } else { v % rhs };
            } else {
                break;
            }
        }
        Ok(v)
    }

    fn parse_unary(&mut self) -> PreResult<i64> {
        if self.at_punct("+") {
            self.bump();
            return self.parse_unary();
        }
        if self.at_punct("-") {
            self.bump();
            return Ok(self.parse_unary()?.wrapping_neg());
        }
        if self.at_punct("!") {
            self.bump();
            return Ok((self.parse_unary()? == 0) as i64);
        }
        if self.at_punct("~") {
            self.bump();
            return Ok(!self.parse_unary()?);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PreResult<i64> {
        let t = match self.peek() {
            Some(t) => t.clone(),
            None => return err!(PreprocessError, self.loc, "unexpected end of #if expression"),
        };
        if t.is_punct("(") {
            self.bump();
            let v = self.parse_expr()?;
            if !self.at_punct(")") {
                return err!(PreprocessError, t.loc, "expected ')'");
            }
            self.bump();
            return Ok(v);
        }
        if t.kind == TokenKind::Num || t.kind == TokenKind::PpNumber {
            self.bump();
            return parse_pp_int(&t);
        }
        if t.kind == TokenKind::Ident {
            // Any identifier surviving macro expansion (including unexpanded keywords
            // like `sizeof`, which this evaluator doesn't implement) is 0.
            self.bump();
            return Ok(0);
        }
        err!(PreprocessError, t.loc, "invalid token in #if expression: \"{}\"", t.text)
    }
}

fn parse_pp_int(t: &Token) -> PreResult<i64> {
    let text = t.text.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let is_hex = text.len() > 2 && (text.starts_with("0x") || text.starts_with("0X"));
    if !is_hex && (text.contains('.') || text.contains('e') || text.contains('E') || text.contains('p') || text.contains('P')) {
        return err!(PreprocessError, t.loc, "floating constant in preprocessor expression");
    }
    let parsed = if is_hex {
        i64::from_str_radix(&text[2..], 16)
    } else if text.len() > 1 && text.starts_with('0') {
        i64::from_str_radix(&text[1..], 8)
    } else {
        text.parse::<i64>()
    };
    parsed.map_err(|_| PreprocessError { location: t.loc, message: format!("invalid integer constant \"{}\"", t.text) })
}
