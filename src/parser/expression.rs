//! Expression grammar: the usual C precedence cascade, with types
//! assigned at each node's construction site rather than in a separate `add_type` pass
//! over the finished tree — each production already has exactly the operand types it
//! needs in hand, so a second traversal would only be re-deriving them.

use super::declarator::is_lvalue_kind;
use super::Parser;
use crate::ast::{NodeKind, NodeRef, Obj};
use crate::diagnostics::{err, Location, ParseError, ParseResult};
use crate::scope::VarScope;
use crate::token::{NumKind, TokenKind};
use crate::types::{Kind, TypeRef};

/// `+`/`-=`/... compound-assignment operators recognized as a single punctuator by the
/// tokenizer, mapped to the plain binary op they expand to at the addressed lvalue.
const COMPOUND_OPS: &[(&str, &'static str)] = &[
    ("+=", "+"),
    ("-=", "-"),
    ("*=", "*"),
    ("/=", "/"),
    ("%=", "%"),
    ("&=", "&"),
    ("|=", "|"),
    ("^=", "^"),
    ("<<=", "<<"),
    (">>=", ">>"),
];

impl<'a> Parser<'a> {
    pub(crate) fn expr(&mut self) -> ParseResult<NodeRef> {
        let mut n = self.assign()?;
        while self.eat_punct(",") {
            let loc = self.loc();
            let rhs = self.assign()?;
            let node = self.new_node(NodeKind::Comma, loc);
            {
                let nn = self.nodes.get_mut(node);
                nn.lhs = Some(n);
                nn.rhs = Some(rhs);
                nn.ty = self.nodes.get(rhs).ty;
            }
            n = node;
        }
        Ok(n)
    }

    pub(crate) fn assign(&mut self) -> ParseResult<NodeRef> {
        let lhs = self.conditional()?;
        if self.at_punct("=") {
            let loc = self.loc();
            self.bump();
            let rhs = self.assign()?;
            return self.make_assign(lhs, rhs, None, loc);
        }
        for &(tok, op) in COMPOUND_OPS {
            if self.at_punct(tok) {
                let loc = self.loc();
                self.bump();
                let rhs = self.assign()?;
                return self.make_assign(lhs, rhs, Some(op), loc);
            }
        }
        Ok(lhs)
    }

    pub(crate) fn make_assign(&mut self, lhs: NodeRef, rhs: NodeRef, op: Option<&'static str>, loc: Location) -> ParseResult<NodeRef> {
        if !is_lvalue_kind(self.nodes.get(lhs).kind) {
            return err!(ParseError, loc, "left-hand side of assignment is not an lvalue");
        }
        let node = self.new_node(NodeKind::Assign, loc);
        let ty = self.nodes.get(lhs).ty;
        let n = self.nodes.get_mut(node);
        n.lhs = Some(lhs);
        n.rhs = Some(rhs);
        n.ty = ty;
        n.extra.compound_op = op;
        Ok(node)
    }

    pub(crate) fn conditional(&mut self) -> ParseResult<NodeRef> {
        let cond = self.logor()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let loc = self.loc();
        let then = self.expr()?;
        self.expect_punct(":")?;
        let els = self.conditional()?;
        let node = self.new_node(NodeKind::Cond, loc);
        let ty = self.result_type_of_branches(then, els);
        let n = self.nodes.get_mut(node);
        n.cond = Some(cond);
        n.then = Some(then);
        n.els = Some(els);
        n.ty = ty;
        Ok(node)
    }

    fn result_type_of_branches(&mut self, a: NodeRef, b: NodeRef) -> Option<TypeRef> {
        match (self.nodes.get(a).ty, self.nodes.get(b).ty) {
            (Some(ta), Some(tb)) => {
                if self.types.get(ta).is_numeric() && self.types.get(tb).is_numeric() {
                    Some(self.types.usual_arith_conv(ta, tb))
                } else {
                    Some(ta)
                }
            }
            (Some(ta), None) => Some(ta),
            (None, tb) => tb,
        }
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> ParseResult<NodeRef>,
        ops: &[(&str, NodeKind)],
    ) -> ParseResult<NodeRef> {
        let mut lhs = next(self)?;
        'outer: loop {
            for &(tok, kind) in ops {
                if self.at_punct(tok) {
                    let loc = self.loc();
                    self.bump();
                    let rhs = next(self)?;
                    lhs = self.make_binary(kind, lhs, rhs, loc)?;
                    continue 'outer;
                }
            }
            break;
        }
        Ok(lhs)
    }

    pub(crate) fn logor(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::logand, &[("||", NodeKind::LogOr)])
    }

    fn logand(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::bitor, &[("&&", NodeKind::LogAnd)])
    }

    fn bitor(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::bitxor, &[("|", NodeKind::BitOr)])
    }

    fn bitxor(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::bitand, &[("^", NodeKind::BitXor)])
    }

    fn bitand(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::equality, &[("&", NodeKind::BitAnd)])
    }

    fn equality(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(Self::relational, &[("==", NodeKind::Eq), ("!=", NodeKind::Ne)])
    }

    fn relational(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(
            Self::shift,
            &[("<", NodeKind::Lt), ("<=", NodeKind::Le), (">", NodeKind::Gt), (">=", NodeKind::Ge)],
        )
    }

    fn shift(&mut self) -> ParseResult<NodeRef> {
        let mut lhs = self.additive()?;
        loop {
            if self.at_punct("<<") {
                let loc = self.loc();
                self.bump();
                let rhs = self.additive()?;
                lhs = self.make_binary(NodeKind::Shl, lhs, rhs, loc)?;
            } else if self.at_punct(">>") {
                let loc = self.loc();
                self.bump();
                let rhs = self.additive()?;
                // Logical vs. arithmetic right shift is decided by the *left* operand's
                // signedness.
                let unsigned = self.nodes.get(lhs).ty.map(|t| self.types.get(t).is_unsigned).unwrap_or(false);
                let kind = if unsigned { NodeKind::Shr } else { NodeKind::Sar };
                lhs = self.make_binary(kind, lhs, rhs, loc)?;
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> ParseResult<NodeRef> {
        let mut lhs = self.multiplicative()?;
        loop {
            let is_add = self.at_punct("+");
            let is_sub = self.at_punct("-");
            if !is_add && !is_sub {
                break;
            }
            let loc = self.loc();
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = self.make_additive(if is_add { NodeKind::Add } else { NodeKind::Sub }, lhs, rhs, loc)?;
        }
        Ok(lhs)
    }

    /// `+`/`-` desugars pointer arithmetic into an explicit `Mul` scaling the integer
    /// operand by the pointee's size, so every later consumer (codegen, `consteval`)
    /// only ever sees plain same-rank addition.
    fn make_additive(&mut self, kind: NodeKind, lhs: NodeRef, rhs: NodeRef, loc: Location) -> ParseResult<NodeRef> {
        let lty = self.nodes.get(lhs).ty;
        let rty = self.nodes.get(rhs).ty;
        let l_ptr = lty.map(|t| self.types.get(t).is_ptr_like()).unwrap_or(false);
        let r_ptr = rty.map(|t| self.types.get(t).is_ptr_like()).unwrap_or(false);
        if l_ptr && r_ptr && kind == NodeKind::Sub {
            // `p - q`: byte difference divided by the shared pointee size.
            let base = self.types.get(lty.unwrap()).base.unwrap();
            let elem_size = self.types.size_of(base, loc).map_err(|e| ParseError { location: e.location, message: e.message })?;
            let sub = self.make_binary(NodeKind::Sub, lhs, rhs, loc)?;
            let scale = self.int_literal(elem_size.max(1), loc);
            let long_ty = self.types.well_known("long");
            return self.make_binary_typed(NodeKind::Div, sub, scale, loc, Some(long_ty));
        }
        if l_ptr && !r_ptr {
            let scaled = self.scale_for_ptr(lty.unwrap(), rhs, loc)?;
            return self.make_binary_typed(kind, lhs, scaled, loc, lty);
        }
        if r_ptr && !l_ptr && kind == NodeKind::Add {
            let scaled = self.scale_for_ptr(rty.unwrap(), lhs, loc)?;
            return self.make_binary_typed(kind, scaled, rhs, loc, rty);
        }
        self.make_binary(kind, lhs, rhs, loc)
    }

    fn scale_for_ptr(&mut self, ptr_ty: TypeRef, operand: NodeRef, loc: Location) -> ParseResult<NodeRef> {
        let base = self.types.get(ptr_ty).base.unwrap();
        let elem_size = self.types.size_of(base, loc).map_err(|e| ParseError { location: e.location, message: e.message })?;
        if elem_size == 1 {
            return Ok(operand);
        }
        let scale = self.int_literal(elem_size, loc);
        let long_ty = self.types.well_known("long");
        self.make_binary_typed(NodeKind::Mul, operand, scale, loc, Some(long_ty))
    }

    pub(crate) fn int_literal(&mut self, v: i64, loc: Location) -> NodeRef {
        let node = self.new_node(NodeKind::Num, loc);
        let long_ty = self.types.well_known("long");
        let n = self.nodes.get_mut(node);
        n.ty = Some(long_ty);
        n.extra.ival = v;
        node
    }

    fn multiplicative(&mut self) -> ParseResult<NodeRef> {
        self.binary_level(
            Self::cast_expr,
            &[("*", NodeKind::Mul), ("/", NodeKind::Div), ("%", NodeKind::Mod)],
        )
    }

    fn make_binary(&mut self, kind: NodeKind, lhs: NodeRef, rhs: NodeRef, loc: Location) -> ParseResult<NodeRef> {
        let ty = self.binary_result_type(kind, lhs, rhs);
        self.make_binary_typed(kind, lhs, rhs, loc, ty)
    }

    fn make_binary_typed(&mut self, kind: NodeKind, lhs: NodeRef, rhs: NodeRef, loc: Location, ty: Option<TypeRef>) -> ParseResult<NodeRef> {
        let node = self.new_node(kind, loc);
        let n = self.nodes.get_mut(node);
        n.lhs = Some(lhs);
        n.rhs = Some(rhs);
        n.ty = ty;
        Ok(node)
    }

    fn binary_result_type(&self, kind: NodeKind, lhs: NodeRef, rhs: NodeRef) -> Option<TypeRef> {
        match kind {
            NodeKind::Eq | NodeKind::Ne | NodeKind::Lt | NodeKind::Le | NodeKind::Gt | NodeKind::Ge | NodeKind::LogAnd | NodeKind::LogOr => {
                Some(self.types.well_known("int"))
            }
            NodeKind::Shl | NodeKind::Shr | NodeKind::Sar => {
                self.nodes.get(lhs).ty.map(|t| self.types.integer_promote(t))
            }
            _ => match (self.nodes.get(lhs).ty, self.nodes.get(rhs).ty) {
                (Some(a), Some(b)) => Some(self.types.usual_arith_conv(a, b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            },
        }
    }

    fn cast_expr(&mut self) -> ParseResult<NodeRef> {
        if self.at_punct("(") && self.peek(1).kind != TokenKind::Eof {
            let mark = self.pos;
            self.bump();
            if self.at_decl_start() {
                let loc = self.loc();
                let (base, _) = self.declspec()?;
                let (ty, _) = self.abstract_declarator(base)?;
                if self.eat_punct(")") {
                    if self.at_punct("{") {
                        // Compound literal: `(T){ ... }`, handled by `initializer.rs`.
                        return self.compound_literal(ty, loc);
                    }
                    let operand = self.cast_expr()?;
                    let node = self.new_node(NodeKind::Cast, loc);
                    let n = self.nodes.get_mut(node);
                    n.lhs = Some(operand);
                    n.ty = Some(ty);
                    return Ok(node);
                }
            }
            self.pos = mark;
        }
        self.unary()
    }

    fn unary(&mut self) -> ParseResult<NodeRef> {
        let loc = self.loc();
        if self.eat_punct("+") {
            return self.cast_expr();
        }
        if self.eat_punct("-") {
            let operand = self.cast_expr()?;
            return self.make_unary(NodeKind::Neg, operand, loc);
        }
        if self.eat_punct("!") {
            let operand = self.cast_expr()?;
            let node = self.new_node(NodeKind::Not, loc);
            let int_ty = self.types.well_known("int");
            let n = self.nodes.get_mut(node);
            n.lhs = Some(operand);
            n.ty = Some(int_ty);
            return Ok(node);
        }
        if self.eat_punct("~") {
            let operand = self.cast_expr()?;
            return self.make_unary(NodeKind::BitNot, operand, loc);
        }
        if self.eat_punct("*") {
            let operand = self.cast_expr()?;
            let pointee = self.nodes.get(operand).ty.and_then(|t| self.types.get(t).base);
            let node = self.new_node(NodeKind::Deref, loc);
            let n = self.nodes.get_mut(node);
            n.lhs = Some(operand);
            n.ty = pointee;
            return Ok(node);
        }
        if self.eat_punct("&") {
            if self.eat_punct("&") {
                // `&&label`: GNU label-as-value.
                let name = self.expect_ident()?;
                let node = self.new_node(NodeKind::LabelVal, loc);
                let voidp = self.types.pointer_to(self.types.well_known("void"));
                let n = self.nodes.get_mut(node);
                n.extra.label = Some(name);
                n.ty = Some(voidp);
                return Ok(node);
            }
            let operand = self.cast_expr()?;
            if !is_lvalue_kind(self.nodes.get(operand).kind) {
                return err!(ParseError, loc, "cannot take the address of a non-lvalue");
            }
            let ty = self.nodes.get(operand).ty;
            let ptr = ty.map(|t| self.types.pointer_to(t));
            let node = self.new_node(NodeKind::Addr, loc);
            let n = self.nodes.get_mut(node);
            n.lhs = Some(operand);
            n.ty = ptr;
            return Ok(node);
        }
        if self.eat_punct("++") {
            let operand = self.cast_expr()?;
            return self.make_incdec(operand, "+", false, loc);
        }
        if self.eat_punct("--") {
            let operand = self.cast_expr()?;
            return self.make_incdec(operand, "-", false, loc);
        }
        if self.at_keyword("sizeof") {
            return self.sizeof_expr();
        }
        if self.at_keyword("_Alignof") || self.cur().is_ident("__alignof__") {
            self.bump();
            self.expect_punct("(")?;
            let loc2 = self.loc();
            let (base, _) = self.declspec()?;
            let (ty, _) = self.abstract_declarator(base)?;
            self.expect_punct(")")?;
            let align = self.types.align_of(ty, loc2).map_err(|e| ParseError { location: e.location, message: e.message })?;
            return Ok(self.int_literal(align, loc2));
        }
        self.postfix()
    }

    fn make_unary(&mut self, kind: NodeKind, operand: NodeRef, loc: Location) -> ParseResult<NodeRef> {
        let ty = self.nodes.get(operand).ty.map(|t| self.types.integer_promote_if_numeric(t));
        let node = self.new_node(kind, loc);
        let n = self.nodes.get_mut(node);
        n.lhs = Some(operand);
        n.ty = self.nodes.get(operand).ty;
        let _ = ty;
        Ok(node)
    }

    fn make_incdec(&mut self, operand: NodeRef, op: &'static str, postfix: bool, loc: Location) -> ParseResult<NodeRef> {
        if !is_lvalue_kind(self.nodes.get(operand).kind) {
            return err!(ParseError, loc, "operand of increment/decrement is not an lvalue");
        }
        let ty = self.nodes.get(operand).ty;
        let one = self.int_literal(1, loc);
        let node = self.new_node(NodeKind::Assign, loc);
        let n = self.nodes.get_mut(node);
        n.lhs = Some(operand);
        n.rhs = Some(one);
        n.ty = ty;
        n.extra.compound_op = Some(op);
        n.extra.is_postfix = postfix;
        Ok(node)
    }

    fn sizeof_expr(&mut self) -> ParseResult<NodeRef> {
        let loc = self.loc();
        self.bump();
        if self.at_punct("(") {
            let mark = self.pos;
            self.bump();
            if self.at_decl_start() {
                let (base, _) = self.declspec()?;
                let (ty, _) = self.abstract_declarator(base)?;
                self.expect_punct(")")?;
                let size = self.types.size_of(ty, loc).map_err(|e| ParseError { location: e.location, message: e.message })?;
                let ulong = self.types.well_known("ulong");
                let node = self.int_literal(size, loc);
                self.nodes.get_mut(node).ty = Some(ulong);
                return Ok(node);
            }
            self.pos = mark;
        }
        let operand = self.unary()?;
        let ty = self.nodes.get(operand).ty.unwrap_or_else(|| self.types.well_known("int"));
        let size = self.types.size_of(ty, loc).map_err(|e| ParseError { location: e.location, message: e.message })?;
        let ulong = self.types.well_known("ulong");
        let node = self.int_literal(size, loc);
        self.nodes.get_mut(node).ty = Some(ulong);
        Ok(node)
    }

    fn postfix(&mut self) -> ParseResult<NodeRef> {
        let mut n = self.primary()?;
        loop {
            let loc = self.loc();
            if self.eat_punct("[") {
                let idx = self.expr()?;
                self.expect_punct("]")?;
                let added = self.make_additive(NodeKind::Add, n, idx, loc)?;
                let pointee = self.nodes.get(added).ty.and_then(|t| self.types.get(t).base);
                let node = self.new_node(NodeKind::Deref, loc);
                let nn = self.nodes.get_mut(node);
                nn.lhs = Some(added);
                nn.ty = pointee;
                n = node;
                continue;
            }
            if self.at_punct(".") || self.at_punct("->") {
                let arrow = self.at_punct("->");
                self.bump();
                let field = self.expect_ident()?;
                let base = if arrow {
                    let pointee = self.nodes.get(n).ty.and_then(|t| self.types.get(t).base);
                    let node = self.new_node(NodeKind::Deref, loc);
                    let nn = self.nodes.get_mut(node);
                    nn.lhs = Some(n);
                    nn.ty = pointee;
                    node
                } else {
                    n
                };
                let struct_ty = self.nodes.get(base).ty;
                let member_ty = struct_ty.and_then(|t| self.types.get(t).members.iter().find(|m| m.name.as_deref() == Some(&field)).map(|m| m.ty));
                if member_ty.is_none() {
                    return err!(ParseError, loc, "no member named '{}'", field);
                }
                let node = self.new_node(NodeKind::Member, loc);
                let nn = self.nodes.get_mut(node);
                nn.lhs = Some(base);
                nn.ty = member_ty;
                nn.extra.name = Some(field);
                n = node;
                continue;
            }
            if self.eat_punct("(") {
                n = self.finish_call(n, loc)?;
                continue;
            }
            if self.at_punct("++") {
                self.bump();
                n = self.make_incdec(n, "+", true, loc)?;
                continue;
            }
            if self.at_punct("--") {
                self.bump();
                n = self.make_incdec(n, "-", true, loc)?;
                continue;
            }
            break;
        }
        Ok(n)
    }

    fn finish_call(&mut self, callee: NodeRef, loc: Location) -> ParseResult<NodeRef> {
        let mut args = Vec::new();
        if !self.at_punct(")") {
            loop {
                args.push(self.assign()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(")")?;
        let callee_ty = self.nodes.get(callee).ty;
        let ret_ty = callee_ty.and_then(|t| {
            let tt = self.types.get(t);
            let func = if tt.kind == Kind::Ptr { self.types.get(tt.base.unwrap()) } else { tt };
            func.return_ty
        });
        if let Some(name) = self.callee_name(callee) {
            if let Some(cur) = self.ctx.current_fn() {
                self.objs.get_mut(cur).refs.push(name);
            }
        }
        let node = self.new_node(NodeKind::FunCall, loc);
        let n = self.nodes.get_mut(node);
        n.lhs = Some(callee);
        n.args = args;
        n.ty = ret_ty;
        Ok(node)
    }

    fn callee_name(&self, callee: NodeRef) -> Option<String> {
        let node = self.nodes.get(callee);
        if node.kind == NodeKind::Var {
            node.extra.obj.map(|r| self.objs.get(r).name.clone())
        } else {
            None
        }
    }

    fn primary(&mut self) -> ParseResult<NodeRef> {
        let loc = self.loc();
        if self.eat_punct("(") {
            if self.at_punct("{") {
                return self.stmt_expr(loc);
            }
            let n = self.expr()?;
            self.expect_punct(")")?;
            return Ok(n);
        }
        let tok = self.cur().clone();
        match tok.kind {
            TokenKind::PpNumber | TokenKind::Num => {
                self.bump();
                return Ok(self.number_literal(&tok, loc));
            }
            TokenKind::Str => {
                self.bump();
                return self.string_literal(&tok, loc);
            }
            TokenKind::Ident | TokenKind::Keyword if tok.is_keyword("__func__") || tok.is_ident("__func__") || tok.is_ident("__FUNCTION__") => {
                self.bump();
                return self.func_name_literal(loc);
            }
            TokenKind::Ident => {
                self.bump();
                return self.ident_primary(&tok.text, loc);
            }
            _ => {}
        }
        err!(ParseError, loc, "expected an expression, got '{}'", tok.text)
    }

    fn ident_primary(&mut self, name: &str, loc: Location) -> ParseResult<NodeRef> {
        match self.builtin_call(name, loc)? {
            Some(n) => return Ok(n),
            None => {}
        }
        match self.ctx.scope.lookup_var(name).cloned() {
            Some(VarScope::Obj(r)) => {
                let obj = self.objs.get(r);
                let ty = obj.ty;
                let node = self.new_node(NodeKind::Var, loc);
                let n = self.nodes.get_mut(node);
                n.ty = Some(ty);
                n.extra.obj = Some(r);
                n.extra.name = Some(name.to_string());
                Ok(node)
            }
            Some(VarScope::Enumerator(v, ty)) => {
                let node = self.int_literal(v, loc);
                self.nodes.get_mut(node).ty = Some(ty);
                Ok(node)
            }
            Some(VarScope::Typedef(_)) => err!(ParseError, loc, "unexpected type name '{}' in expression", name),
            None => err!(ParseError, loc, "use of undeclared identifier '{}'", name),
        }
    }

    fn func_name_literal(&mut self, loc: Location) -> ParseResult<NodeRef> {
        let name = self
            .ctx
            .current_fn()
            .map(|f| self.objs.get(f).name.clone())
            .unwrap_or_default();
        self.string_literal_bytes(name.into_bytes(), loc)
    }

    fn stmt_expr(&mut self, loc: Location) -> ParseResult<NodeRef> {
        // Plain `enter_block`/`exit_block`, not the `ScopeGuard` RAII form: the guard
        // would have to stay alive across `self.block_stmt_body()`, which needs its own
        // fresh `&mut self` borrow that the held guard would conflict with.
        self.ctx.scope.enter_block();
        let body = self.block_stmt_body()?;
        self.ctx.scope.exit_block();
        self.expect_punct(")")?;
        let ty = self.last_expr_stmt_type(body);
        let node = self.new_node(NodeKind::StmtExpr, loc);
        let n = self.nodes.get_mut(node);
        n.body = Some(body);
        n.ty = ty;
        Ok(node)
    }

    fn last_expr_stmt_type(&self, block: NodeRef) -> Option<TypeRef> {
        let mut last_ty = None;
        let mut cur = Some(block);
        while let Some(r) = cur {
            let node = self.nodes.get(r);
            if node.kind == NodeKind::ExprStmt {
                if let Some(e) = node.lhs {
                    last_ty = self.nodes.get(e).ty;
                }
            }
            cur = node.body.or(node.next);
        }
        last_ty
    }

    fn compound_literal(&mut self, ty: TypeRef, loc: Location) -> ParseResult<NodeRef> {
        let name = self.new_label("compound");
        let mut obj = Obj::new(name.clone(), ty);
        let is_local = self.ctx.current_fn().is_some();
        obj.flags.is_local = is_local;
        let r = self.objs.push(obj);
        self.ctx.scope.declare_var(name, VarScope::Obj(r));
        if is_local {
            self.add_local(r);
        } else {
            self.globals.push(r);
        }
        let var_node = self.new_node(NodeKind::Var, loc);
        {
            let n = self.nodes.get_mut(var_node);
            n.ty = Some(ty);
            n.extra.obj = Some(r);
        }
        if !is_local {
            // A file-scope compound literal is a static object: its initializer must be
            // a constant expression, serialized straight into `init_data` like any other
            // global, with no runtime assignment chain to run.
            self.gvar_initializer(r, ty)?;
            return Ok(var_node);
        }
        // `enter_temp`/`exit_temp`, not `push_temp`'s guard: the guard's borrow of
        // `self.ctx.scope` can't stay alive across `self.lvar_init_expr`, which needs
        // its own `&mut self`.
        self.ctx.scope.enter_temp();
        let init_expr = self.lvar_init_expr(r, ty);
        self.ctx.scope.exit_temp();
        let init_expr = init_expr?;
        // The literal's value is the object, but its zero-fill and element assignments
        // must run first; `Comma` expresses that order without a dedicated node kind.
        let node = self.new_node(NodeKind::Comma, loc);
        let n = self.nodes.get_mut(node);
        n.lhs = Some(init_expr);
        n.rhs = Some(var_node);
        n.ty = Some(ty);
        Ok(node)
    }

    fn string_literal(&mut self, tok: &crate::token::Token, loc: Location) -> ParseResult<NodeRef> {
        let bytes = tok.str_val.clone().unwrap_or_else(|| tok.text.clone().into_bytes());
        self.string_literal_bytes(bytes, loc)
    }

    fn string_literal_bytes(&mut self, mut bytes: Vec<u8>, loc: Location) -> ParseResult<NodeRef> {
        bytes.push(0);
        let name = self.new_label("str");
        let char_ty = self.types.well_known("char");
        let arr_ty = self.types.array_of(char_ty, bytes.len() as i64);
        let mut obj = Obj::new(name.clone(), arr_ty);
        obj.flags.is_static = true;
        obj.flags.is_definition = true;
        obj.init_data = bytes;
        let r = self.objs.push(obj);
        self.globals.push(r);
        let node = self.new_node(NodeKind::Var, loc);
        let n = self.nodes.get_mut(node);
        n.ty = Some(arr_ty);
        n.extra.obj = Some(r);
        Ok(node)
    }

    /// Decode a `PpNumber`/`Num` token's spelling into its integer or float payload and
    /// type, the parser-side numeric-literal reader `token.rs` describes. Supports
    /// `0x`/`0` int bases, `u`/`U`/`l`/`L`/`ll`/`LL` integer suffixes, `f`/`F` float
    /// suffix, and a single-quoted char constant's common escapes.
    fn number_literal(&mut self, tok: &crate::token::Token, loc: Location) -> NodeRef {
        let node = self.new_node(NodeKind::Num, loc);
        if tok.text.starts_with('\'') {
            let v = decode_char_literal(&tok.text);
            let ty = self.types.well_known("int");
            let n = self.nodes.get_mut(node);
            n.ty = Some(ty);
            n.extra.ival = v;
            return node;
        }
        let (is_float, ival, fval, kind) = decode_number_text(&tok.text);
        let ty = self.types.well_known(match kind {
            NumKind::Int => "int",
            NumKind::UInt => "uint",
            NumKind::Long => "long",
            NumKind::ULong => "ulong",
            NumKind::Float => "float",
            NumKind::Double => "double",
            NumKind::LongDouble => "longdouble",
        });
        let n = self.nodes.get_mut(node);
        n.ty = Some(ty);
        if is_float {
            n.extra.fval = fval;
        } else {
            n.extra.ival = ival;
        }
        node
    }

    /// `__builtin_alloca`, `__builtin_constant_p`, `__builtin_expect`, `__builtin_offsetof`,
    /// `__builtin_va_start`/`va_copy`/`va_end`/`va_arg`. Returns `None` if
    /// `name` isn't one of these, so the caller falls through to ordinary identifier
    /// lookup.
    fn builtin_call(&mut self, name: &str, loc: Location) -> ParseResult<Option<NodeRef>> {
        match name {
            "__builtin_alloca" => {
                self.expect_punct("(")?;
                let size = self.assign()?;
                self.expect_punct(")")?;
                let voidp = self.types.pointer_to(self.types.well_known("void"));
                let node = self.new_node(NodeKind::Alloca, loc);
                let n = self.nodes.get_mut(node);
                n.lhs = Some(size);
                n.ty = Some(voidp);
                Ok(Some(node))
            }
            "__builtin_constant_p" => {
                self.expect_punct("(")?;
                let e = self.assign()?;
                self.expect_punct(")")?;
                let ce = crate::consteval::ConstEval::new(&self.nodes, &self.objs, &self.types);
                let v = ce.is_const_expr(e) as i64;
                let node = self.int_literal(v, loc);
                Ok(Some(node))
            }
            "__builtin_expect" => {
                self.expect_punct("(")?;
                let e = self.assign()?;
                self.expect_punct(",")?;
                let _hint = self.assign()?;
                self.expect_punct(")")?;
                Ok(Some(e))
            }
            "__builtin_offsetof" => {
                self.expect_punct("(")?;
                let (base, _) = self.declspec()?;
                let (ty, _) = self.abstract_declarator(base)?;
                self.expect_punct(",")?;
                let field = self.expect_ident()?;
                self.expect_punct(")")?;
                let offset = self
                    .types
                    .get(ty)
                    .members
                    .iter()
                    .find(|m| m.name.as_deref() == Some(&field))
                    .map(|m| m.offset)
                    .ok_or(())
                    .or_else(|_| err!(ParseError, loc, "no member named '{}'", field))?;
                let node = self.int_literal(offset, loc);
                let ulong = self.types.well_known("ulong");
                self.nodes.get_mut(node).ty = Some(ulong);
                Ok(Some(node))
            }
            "__builtin_va_start" => {
                self.expect_punct("(")?;
                let ap = self.assign()?;
                if self.eat_punct(",") {
                    let _last_named = self.assign()?;
                }
                self.expect_punct(")")?;
                let node = self.new_node(NodeKind::VaStart, loc);
                self.nodes.get_mut(node).args = vec![ap];
                Ok(Some(node))
            }
            "__builtin_va_end" => {
                self.expect_punct("(")?;
                let ap = self.assign()?;
                self.expect_punct(")")?;
                let node = self.new_node(NodeKind::Null, loc);
                self.nodes.get_mut(node).args = vec![ap];
                Ok(Some(node))
            }
            "__builtin_va_copy" => {
                self.expect_punct("(")?;
                let dst = self.assign()?;
                self.expect_punct(",")?;
                let src = self.assign()?;
                self.expect_punct(")")?;
                let node = self.new_node(NodeKind::VaCopy, loc);
                self.nodes.get_mut(node).args = vec![dst, src];
                Ok(Some(node))
            }
            "__builtin_va_arg" => {
                self.expect_punct("(")?;
                let ap = self.assign()?;
                self.expect_punct(",")?;
                let (base, _) = self.declspec()?;
                let (ty, _) = self.abstract_declarator(base)?;
                self.expect_punct(")")?;
                let node = self.new_node(NodeKind::VaArg, loc);
                let n = self.nodes.get_mut(node);
                n.args = vec![ap];
                n.ty = Some(ty);
                Ok(Some(node))
            }
            _ => Ok(None),
        }
    }
}

impl crate::types::TypeArena {
    /// Integer promotion for an arithmetic-or-other type; non-integers pass through
    /// unchanged (used only to mirror `usual_arith_conv`'s promotion step for unary
    /// `Neg`/`BitNot`, which don't otherwise need a full binary conversion).
    fn integer_promote_if_numeric(&self, r: TypeRef) -> TypeRef {
        if self.get(r).is_integer() {
            self.integer_promote(r)
        } else {
            r
        }
    }
}

fn decode_char_literal(text: &str) -> i64 {
    let inner = text.trim_start_matches(['L', 'u', 'U']).trim_matches('\'');
    let mut chars = inner.chars();
    match chars.next() {
        Some('\\') => match chars.next() {
            Some('n') => b'\n' as i64,
            Some('t') => b'\t' as i64,
            Some('r') => b'\r' as i64,
            Some('0') => 0,
            Some('a') => 0x07,
            Some('b') => 0x08,
            Some('f') => 0x0c,
            Some('v') => 0x0b,
            Some('\\') => b'\\' as i64,
            Some('\'') => b'\'' as i64,
            Some('"') => b'"' as i64,
            Some(other) => other as i64,
            None => 0,
        },
        Some(c) => c as i64,
        None => 0,
    }
}

/// Decode a `PpNumber` spelling's base, digits, and suffix into `(is_float, ival, fval, kind)`.
fn decode_number_text(text: &str) -> (bool, i64, f64, NumKind) {
    let lower = text.to_ascii_lowercase();
    let is_float = lower.contains('.')
        || (lower.contains('e') && !lower.starts_with("0x"))
        || (lower.starts_with("0x") && lower.contains('p'));
    if is_float {
        let suffix_f = lower.ends_with('f');
        let suffix_l = lower.ends_with('l') && !suffix_f;
        let digits = lower.trim_end_matches(['f', 'l']);
        let v: f64 = digits.parse().unwrap_or(0.0);
        let kind = if suffix_f {
            NumKind::Float
        } else if suffix_l {
            NumKind::LongDouble
        } else {
            NumKind::Double
        };
        return (true, 0, v, kind);
    }
    let mut s = lower.as_str();
    let mut unsigned = false;
    let mut long_count = 0u32;
    loop {
        if let Some(rest) = s.strip_suffix('u') {
            unsigned = true;
            s = rest;
        } else if let Some(rest) = s.strip_suffix('l') {
            long_count += 1;
            s = rest;
        } else {
            break;
        }
    }
    let (radix, digits) = if let Some(rest) = s.strip_prefix("0x") {
        (16, rest)
    } else if s.len() > 1 && s.starts_with('0') {
        (8, &s[1..])
    } else {
        (10, s)
    };
    let v = i64::from_str_radix(digits, radix).unwrap_or_else(|_| u64::from_str_radix(digits, radix).map(|u| u as i64).unwrap_or(0));
    let kind = match (unsigned, long_count > 0) {
        (false, false) if v <= i64::from(i32::MAX) => NumKind::Int,
        (true, false) => NumKind::UInt,
        (false, _) => NumKind::Long,
        (true, true) => NumKind::ULong,
    };
    (false, v, 0.0, kind)
}
