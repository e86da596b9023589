//! Statement grammar: a block's declarations and statements are
//! threaded as a singly linked list (`Node::next`) hanging off the block's `Node::body`,
//! `while`/`do` desugar to `For`, and a `switch`'s `case`/`default` labels nest as plain
//! recursive `Case` nodes in the body rather than a side table, so Duff's-device-style
//! fallthrough falls out of the recursion for free.

use super::Parser;
use crate::ast::{NodeKind, NodeRef, Obj};
use crate::diagnostics::{err, Location, ParseError, ParseResult};
use crate::scope::VarScope;
use crate::token::TokenKind;
use crate::types::Kind;

impl<'a> Parser<'a> {
    /// `{ ... }`, already positioned at the opening brace. Used both for a function body
    /// and for any nested compound statement / statement-expression.
    pub(crate) fn block_stmt_body(&mut self) -> ParseResult<NodeRef> {
        self.expect_punct("{")?;
        let loc = self.loc();
        let block = self.new_node(NodeKind::Block, loc);
        self.ctx.scope.enter_block();
        let entry_vla_depth = self.ctx.vla_depth();
        let mut last: Option<NodeRef> = None;
        while !self.eat_punct("}") {
            self.block_item(block, &mut last)?;
        }
        self.ctx.set_vla_depth(entry_vla_depth);
        self.ctx.scope.exit_block();
        Ok(block)
    }

    fn push_stmt(&mut self, block: NodeRef, last: &mut Option<NodeRef>, stmt: NodeRef) {
        match *last {
            None => self.nodes.get_mut(block).body = Some(stmt),
            Some(prev) => self.nodes.get_mut(prev).next = Some(stmt),
        }
        *last = Some(stmt);
    }

    fn block_item(&mut self, block: NodeRef, last: &mut Option<NodeRef>) -> ParseResult<()> {
        if self.at_decl_start() {
            return self.local_declaration(block, last);
        }
        let stmt = self.statement()?;
        self.push_stmt(block, last, stmt);
        Ok(())
    }

    /// A declaration statement inside a function body: `typedef`s and `static` locals are
    /// registered but emit no runtime node; an ordinary local with an initializer emits one
    /// `ExprStmt` per declarator.
    fn local_declaration(&mut self, block: NodeRef, last: &mut Option<NodeRef>) -> ParseResult<()> {
        let (base_ty, spec) = self.declspec()?;
        if self.eat_punct(";") {
            return Ok(());
        }
        loop {
            let loc = self.loc();
            let (ty, name) = self.declarator(base_ty)?;
            let name = match name {
                Some(n) => n,
                None => return err!(ParseError, loc, "declarator requires a name"),
            };
            if spec.is_typedef {
                let alias = self.types.copy_type(ty);
                self.ctx.scope.declare_var(name, VarScope::Typedef(alias));
            } else if spec.is_static {
                // A function-scoped `static` local is a file-scope object under a
                // mangled name, not a stack slot; its initializer is a constant
                // expression exactly like a global's.
                let label = self.new_label(&format!("static.{}", name));
                let mut o = Obj::new(label, ty);
                o.flags.is_static = true;
                o.flags.is_tentative = true;
                let r = self.objs.push(o);
                self.ctx.scope.declare_var(name, VarScope::Obj(r));
                self.globals.push(r);
                if self.eat_punct("=") {
                    self.objs.get_mut(r).flags.is_tentative = false;
                    self.gvar_initializer(r, ty)?;
                }
            } else {
                let mut o = Obj::new(name.clone(), ty);
                o.flags.is_local = true;
                let r = self.objs.push(o);
                self.ctx.scope.declare_var(name, VarScope::Obj(r));
                self.add_local(r);
                if self.types.get(ty).kind == Kind::Vla {
                    // No initializer is legal here; record where execution reaches
                    // this declaration so codegen knows when to size and carve it.
                    let decl = self.new_node(NodeKind::VlaDecl, loc);
                    self.nodes.get_mut(decl).extra.obj = Some(r);
                    self.push_stmt(block, last, decl);
                    self.ctx.enter_vla_scope();
                } else if self.eat_punct("=") {
                    let init = self.lvar_init_expr(r, ty)?;
                    let stmt = self.new_node(NodeKind::ExprStmt, loc);
                    self.nodes.get_mut(stmt).lhs = Some(init);
                    self.push_stmt(block, last, stmt);
                }
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(())
    }

    pub(crate) fn statement(&mut self) -> ParseResult<NodeRef> {
        let loc = self.loc();
        if self.at_punct("{") {
            return self.block_stmt_body();
        }
        if self.eat_keyword("if") {
            return self.if_stmt(loc);
        }
        if self.eat_keyword("for") {
            return self.for_stmt(loc);
        }
        if self.eat_keyword("while") {
            return self.while_stmt(loc);
        }
        if self.eat_keyword("do") {
            return self.do_stmt(loc);
        }
        if self.eat_keyword("switch") {
            return self.switch_stmt(loc);
        }
        if self.eat_keyword("case") {
            return self.case_stmt(loc);
        }
        if self.at_keyword("default") && self.peek(1).is_punct(":") {
            self.bump();
            return self.default_stmt(loc);
        }
        if self.eat_keyword("break") {
            self.expect_punct(";")?;
            let label = match self.ctx.break_label() {
                Some(l) => l.to_string(),
                None => return err!(ParseError, loc, "'break' statement not in a loop or switch"),
            };
            let node = self.new_node(NodeKind::Goto, loc);
            self.nodes.get_mut(node).extra.label = Some(label);
            return Ok(node);
        }
        if self.eat_keyword("continue") {
            self.expect_punct(";")?;
            let label = match self.ctx.continue_label() {
                Some(l) => l.to_string(),
                None => return err!(ParseError, loc, "'continue' statement not in a loop"),
            };
            let node = self.new_node(NodeKind::Goto, loc);
            self.nodes.get_mut(node).extra.label = Some(label);
            return Ok(node);
        }
        if self.eat_keyword("goto") {
            if self.eat_punct("*") {
                let target = self.expr()?;
                self.expect_punct(";")?;
                let node = self.new_node(NodeKind::GotoExpr, loc);
                self.nodes.get_mut(node).lhs = Some(target);
                return Ok(node);
            }
            let name = self.expect_ident()?;
            self.expect_punct(";")?;
            self.ctx.record_goto(name.clone(), loc);
            let vla_depth = self.ctx.vla_depth();
            let node = self.new_node(NodeKind::Goto, loc);
            let n = self.nodes.get_mut(node);
            n.extra.label = Some(name);
            n.extra.vla_depth = vla_depth;
            return Ok(node);
        }
        if self.eat_keyword("return") {
            let val = if self.at_punct(";") { None } else { Some(self.expr()?) };
            self.expect_punct(";")?;
            let node = self.new_node(NodeKind::Return, loc);
            self.nodes.get_mut(node).lhs = val;
            return Ok(node);
        }
        if self.eat_keyword("asm") {
            return self.asm_stmt(loc);
        }
        if self.cur().kind == TokenKind::Ident && self.peek(1).is_punct(":") {
            let name = self.bump().text.clone();
            self.bump();
            self.ctx.record_label(name.clone());
            let vla_depth = self.ctx.vla_depth();
            let body = self.statement()?;
            let node = self.new_node(NodeKind::Label, loc);
            let n = self.nodes.get_mut(node);
            n.extra.label = Some(name);
            n.extra.vla_depth = vla_depth;
            n.body = Some(body);
            return Ok(node);
        }
        if self.eat_punct(";") {
            return Ok(self.new_node(NodeKind::Null, loc));
        }
        let e = self.expr()?;
        self.expect_punct(";")?;
        let node = self.new_node(NodeKind::ExprStmt, loc);
        self.nodes.get_mut(node).lhs = Some(e);
        Ok(node)
    }

    fn if_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.expect_punct("(")?;
        let cond = self.expr()?;
        self.expect_punct(")")?;
        let then = self.statement()?;
        let els = if self.eat_keyword("else") { Some(self.statement()?) } else { None };
        let node = self.new_node(NodeKind::If, loc);
        let n = self.nodes.get_mut(node);
        n.cond = Some(cond);
        n.then = Some(then);
        n.els = els;
        Ok(node)
    }

    fn while_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.expect_punct("(")?;
        let cond = self.expr()?;
        self.expect_punct(")")?;
        let break_label = self.ctx.new_label("break");
        let continue_label = self.ctx.new_label("continue");
        let vla_depth = self.ctx.vla_depth();
        self.ctx.enter_loop(break_label.clone(), continue_label.clone());
        let body = self.statement();
        self.ctx.exit_loop();
        let body = body?;
        let node = self.new_node(NodeKind::For, loc);
        let n = self.nodes.get_mut(node);
        n.cond = Some(cond);
        n.body = Some(body);
        n.brk_label = Some(break_label);
        n.cont_label = Some(continue_label);
        n.extra.vla_depth = vla_depth;
        Ok(node)
    }

    fn do_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        let break_label = self.ctx.new_label("break");
        let continue_label = self.ctx.new_label("continue");
        let vla_depth = self.ctx.vla_depth();
        self.ctx.enter_loop(break_label.clone(), continue_label.clone());
        let body = self.statement();
        self.ctx.exit_loop();
        let body = body?;
        if !self.eat_keyword("while") {
            return err!(ParseError, self.loc(), "expected 'while' after 'do' body");
        }
        self.expect_punct("(")?;
        let cond = self.expr()?;
        self.expect_punct(")")?;
        self.expect_punct(";")?;
        let node = self.new_node(NodeKind::Do, loc);
        let n = self.nodes.get_mut(node);
        n.cond = Some(cond);
        n.body = Some(body);
        n.brk_label = Some(break_label);
        n.cont_label = Some(continue_label);
        n.extra.vla_depth = vla_depth;
        Ok(node)
    }

    /// `for (init; cond; inc) body` — the init clause's own scope (`for (int i = 0; ...)`)
    /// spans the condition, increment, and body, so it brackets the whole parse rather than
    /// just the declaration.
    fn for_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.expect_punct("(")?;
        // Plain `enter_block`/`exit_block`: the init clause's declared name (if any) must
        // stay visible through `self.statement()` parsing the body below, which needs its
        // own fresh `&mut self` a held `ScopeGuard` couldn't coexist with. A `ParseError`
        // anywhere in here aborts and discards the whole `Parser`, so skipping `exit_block`
        // on an early `?` return is harmless.
        self.ctx.scope.enter_block();
        let init = self.for_init()?;
        let cond = if self.at_punct(";") { None } else { Some(self.expr()?) };
        self.expect_punct(";")?;
        let inc = if self.at_punct(")") { None } else { Some(self.expr()?) };
        self.expect_punct(")")?;
        let break_label = self.ctx.new_label("break");
        let continue_label = self.ctx.new_label("continue");
        let vla_depth = self.ctx.vla_depth();
        self.ctx.enter_loop(break_label.clone(), continue_label.clone());
        let body = self.statement();
        self.ctx.exit_loop();
        let body = body?;
        self.ctx.scope.exit_block();
        let node = self.new_node(NodeKind::For, loc);
        let n = self.nodes.get_mut(node);
        n.init = init;
        n.cond = cond;
        n.inc = inc;
        n.body = Some(body);
        n.brk_label = Some(break_label);
        n.cont_label = Some(continue_label);
        n.extra.vla_depth = vla_depth;
        Ok(node)
    }

    fn for_init(&mut self) -> ParseResult<Option<NodeRef>> {
        if self.eat_punct(";") {
            return Ok(None);
        }
        if self.at_decl_start() {
            let loc = self.loc();
            let dummy = self.new_node(NodeKind::Block, loc);
            let mut last = None;
            self.local_declaration(dummy, &mut last)?;
            return Ok(self.nodes.get(dummy).body);
        }
        let loc = self.loc();
        let e = self.expr()?;
        self.expect_punct(";")?;
        let node = self.new_node(NodeKind::ExprStmt, loc);
        self.nodes.get_mut(node).lhs = Some(e);
        Ok(Some(node))
    }

    fn switch_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.expect_punct("(")?;
        let cond = self.expr()?;
        self.expect_punct(")")?;
        let break_label = self.ctx.new_label("break");
        let vla_depth = self.ctx.vla_depth();
        self.ctx.enter_switch(break_label.clone());
        let body = self.statement();
        let frame = self.ctx.exit_switch();
        let body = body?;
        let node = self.new_node(NodeKind::Switch, loc);
        let n = self.nodes.get_mut(node);
        n.cond = Some(cond);
        n.body = Some(body);
        n.brk_label = Some(break_label);
        n.extra.label = frame.default_label;
        n.extra.vla_depth = vla_depth;
        Ok(node)
    }

    fn case_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        let lo = self.const_expr_i64()?;
        let hi = if self.eat_punct("...") { self.const_expr_i64()? } else { lo };
        self.expect_punct(":")?;
        let label = self.ctx.new_label("case");
        match self.ctx.current_switch_mut() {
            Some(frame) => frame.cases.push((lo, hi, label.clone())),
            None => return err!(ParseError, loc, "'case' label not within a switch statement"),
        }
        let body = self.statement()?;
        let node = self.new_node(NodeKind::Case, loc);
        let n = self.nodes.get_mut(node);
        n.extra.case_lo = lo;
        n.extra.case_hi = hi;
        n.extra.label = Some(label);
        n.body = Some(body);
        Ok(node)
    }

    fn default_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.expect_punct(":")?;
        let label = self.ctx.new_label("default");
        match self.ctx.current_switch_mut() {
            Some(frame) if frame.has_default => return err!(ParseError, loc, "multiple default labels in one switch"),
            Some(frame) => {
                frame.default_label = Some(label.clone());
                frame.has_default = true;
            }
            None => return err!(ParseError, loc, "'default' label not within a switch statement"),
        }
        let body = self.statement()?;
        let node = self.new_node(NodeKind::Case, loc);
        let n = self.nodes.get_mut(node);
        n.extra.label = Some(label);
        n.body = Some(body);
        Ok(node)
    }

    /// GNU `asm("...")`: this subset keeps only the literal instruction text, skipping any
    /// output/input/clobber operand lists — inline asm here is a fixed snippet, not a
    /// register-allocated template.
    fn asm_stmt(&mut self, loc: Location) -> ParseResult<NodeRef> {
        self.eat_keyword("volatile");
        self.expect_punct("(")?;
        let mut text = String::new();
        while self.cur().kind == TokenKind::Str {
            let tok = self.bump().clone();
            let bytes = tok.str_val.clone().unwrap_or_else(|| tok.text.clone().into_bytes());
            text.push_str(&String::from_utf8_lossy(&bytes));
        }
        let mut depth = 0i32;
        loop {
            if self.at_punct("(") {
                depth += 1;
            } else if self.at_punct(")") {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            if self.cur().is_eof() {
                return err!(ParseError, loc, "unterminated asm statement");
            }
            self.bump();
        }
        self.expect_punct(")")?;
        self.expect_punct(";")?;
        let node = self.new_node(NodeKind::Asm, loc);
        self.nodes.get_mut(node).extra.name = Some(text);
        Ok(node)
    }
}
