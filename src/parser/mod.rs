//! Recursive-descent parser: single-token lookahead over an immutable
//! token slice, assembling `Node`/`Obj`/`Type` trees into the three arenas it owns.
//!
//! This module holds `Parser` itself, `declspec` (the primitive-type-word bitmask),
//! `struct`/`union`/`enum` specifiers, `typeof`, and the translation-unit/function-
//! definition assembly that ties declarator, initializer, statement and expression
//! parsing together. The other `parser::*` submodules extend `impl<'a> Parser<'a>` with
//! the grammar rules for their own corner of the grammar.

pub mod declarator;
pub mod expression;
pub mod initializer;
pub mod statement;

use crate::ast::{Node, NodeArena, NodeKind, NodeRef, Obj, ObjArena, ObjFlags, ObjRef};
use crate::consteval::ConstEval;
use crate::context::ParseContext;
use crate::diagnostics::{err, Location, ParseError, ParseResult};
use crate::scope::VarScope;
use crate::token::{Token, TokenKind};
use crate::types::{Kind, Member, Type, TypeArena, TypeRef};

/// Output of a full parse: the three arenas the parsed translation unit populated, plus
/// the top-level declaration order.
pub struct TranslationUnit {
    pub nodes: NodeArena,
    pub objs: ObjArena,
    pub types: TypeArena,
    pub globals: Vec<ObjRef>,
}

/// Storage-class / qualifier / primitive-type-word accumulator for one `declspec`
///. Primitive words are counted rather than flagged so that
/// `signed long int` and `long signed int` land on the same combination.
#[derive(Default)]
pub(crate) struct DeclSpec {
    pub is_typedef: bool,
    pub is_extern: bool,
    pub is_static: bool,
    pub is_inline: bool,
    pub is_thread_local: bool,
    pub is_packed: bool,
    void: u32,
    boolean: u32,
    char: u32,
    short: u32,
    int: u32,
    long: u32,
    float: u32,
    double: u32,
    signed: u32,
    unsigned: u32,
    /// A `struct`/`union`/`enum` specifier, typedef name, or `typeof` result overrides the
    /// primitive-word counters entirely.
    pub user_type: Option<TypeRef>,
}

pub struct Parser<'a> {
    toks: &'a [Token],
    pos: usize,
    pub nodes: NodeArena,
    pub objs: ObjArena,
    pub types: TypeArena,
    pub ctx: ParseContext,
    globals: Vec<ObjRef>,
    /// Function-scoped static locals and string/compound-literal globals get a unique
    /// numeric suffix from this counter rather than colliding across functions.
    anon_counter: u64,
    /// Locals declared anywhere in the function currently being parsed (params seed it,
    /// `statement`/`expression` append as they go), drained into `Obj.locals` once the
    /// body is fully parsed.
    fn_locals: Vec<ObjRef>,
}

impl<'a> Parser<'a> {
    pub fn new(toks: &'a [Token]) -> Self {
        Parser {
            toks,
            pos: 0,
            nodes: NodeArena::new(),
            objs: ObjArena::new(),
            types: TypeArena::new(),
            ctx: ParseContext::new(),
            globals: Vec::new(),
            anon_counter: 0,
            fn_locals: Vec::new(),
        }
    }

    /// Record a local `Obj` (declared by a block's declaration statement, or synthesized
    /// for a compound literal / VLA size temp) against the function currently being
    /// parsed, so it ends up in that function's `Obj.locals`.
    pub(crate) fn add_local(&mut self, r: ObjRef) {
        if self.ctx.current_fn().is_some() {
            self.fn_locals.push(r);
        }
    }

    // --- token cursor -------------------------------------------------------------

    pub(crate) fn cur(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    pub(crate) fn peek(&self, ahead: usize) -> &Token {
        let i = (self.pos + ahead).min(self.toks.len() - 1);
        &self.toks[i]
    }

    pub(crate) fn loc(&self) -> Location {
        self.cur().loc
    }

    pub(crate) fn bump(&mut self) -> &Token {
        let i = self.pos.min(self.toks.len() - 1);
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        &self.toks[i]
    }

    pub(crate) fn at_punct(&self, s: &str) -> bool {
        self.cur().is_punct(s)
    }

    pub(crate) fn at_keyword(&self, s: &str) -> bool {
        self.cur().is_keyword(s)
    }

    pub(crate) fn eat_punct(&mut self, s: &str) -> bool {
        if self.at_punct(s) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn eat_keyword(&mut self, s: &str) -> bool {
        if self.at_keyword(s) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_punct(&mut self, s: &str) -> ParseResult<()> {
        if self.eat_punct(s) {
            Ok(())
        } else {
            err!(ParseError, self.loc(), "expected '{}', got '{}'", s, self.cur().text)
        }
    }

    pub(crate) fn expect_ident(&mut self) -> ParseResult<String> {
        if self.cur().kind == TokenKind::Ident {
            Ok(self.bump().text.clone())
        } else {
            err!(ParseError, self.loc(), "expected an identifier, got '{}'", self.cur().text)
        }
    }

    pub(crate) fn new_label(&mut self, prefix: &str) -> String {
        self.anon_counter += 1;
        format!(".L.{}.{}", prefix, self.anon_counter)
    }

    fn is_typename_ident(&self, name: &str) -> bool {
        matches!(self.ctx.scope.lookup_var(name), Some(VarScope::Typedef(_)))
    }

    /// True if the current token could start a `declspec` (a type, not an expression) —
    /// used to disambiguate a cast from a parenthesized expression and a declaration
    /// from an expression-statement.
    pub(crate) fn at_decl_start(&self) -> bool {
        let t = self.cur();
        if t.kind == TokenKind::Keyword {
            return matches!(
                t.text.as_str(),
                "void" | "_Bool" | "char" | "short" | "int" | "long" | "float" | "double" | "signed" | "unsigned"
                    | "struct" | "union" | "enum" | "typedef" | "extern" | "static" | "inline" | "_Thread_local"
                    | "const" | "volatile" | "restrict" | "typeof" | "auto" | "register"
            );
        }
        t.kind == TokenKind::Ident && self.is_typename_ident(&t.text)
    }

    // --- declspec -------------------------------------------------------------

    /// Parse storage-class/qualifier/primitive-type words until none remain, resolving
    /// the accumulated counters (or a `user_type`) to a `TypeRef`.
    pub(crate) fn declspec(&mut self) -> ParseResult<(TypeRef, DeclSpec)> {
        let mut spec = DeclSpec::default();
        loop {
            let t = self.cur().clone();
            if t.kind == TokenKind::Attr {
                if t.text.contains("packed") {
                    spec.is_packed = true;
                }
                self.bump();
                continue;
            }
            if t.kind == TokenKind::Ident && spec.user_type.is_none() && is_simple(&spec) {
                if let Some(VarScope::Typedef(ty)) = self.ctx.scope.lookup_var(&t.text).cloned() {
                    spec.user_type = Some(ty);
                    self.bump();
                    continue;
                }
            }
            if t.kind != TokenKind::Keyword {
                break;
            }
            match t.text.as_str() {
                "typedef" => spec.is_typedef = true,
                "extern" => spec.is_extern = true,
                "static" => spec.is_static = true,
                "inline" => spec.is_inline = true,
                "_Thread_local" => spec.is_thread_local = true,
                "auto" | "register" | "const" | "volatile" | "restrict" | "_Noreturn" => {}
                "void" => spec.void += 1,
                "_Bool" => spec.boolean += 1,
                "char" => spec.char += 1,
                "short" => spec.short += 1,
                "int" => spec.int += 1,
                "long" => spec.long += 1,
                "float" => spec.float += 1,
                "double" => spec.double += 1,
                "signed" => spec.signed += 1,
                "unsigned" => spec.unsigned += 1,
                "struct" => {
                    self.bump();
                    spec.user_type = Some(self.struct_union_specifier(false)?);
                    continue;
                }
                "union" => {
                    self.bump();
                    spec.user_type = Some(self.struct_union_specifier(true)?);
                    continue;
                }
                "enum" => {
                    self.bump();
                    spec.user_type = Some(self.enum_specifier()?);
                    continue;
                }
                "typeof" => {
                    self.bump();
                    spec.user_type = Some(self.typeof_specifier()?);
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        let ty = self.resolve_declspec_type(&spec)?;
        Ok((ty, spec))
    }

    fn resolve_declspec_type(&mut self, spec: &DeclSpec) -> ParseResult<TypeRef> {
        if let Some(ty) = spec.user_type {
            return Ok(ty);
        }
        let name = if spec.void > 0 {
            "void"
        } else if spec.boolean > 0 {
            "bool"
        } else if spec.char > 0 {
            if spec.unsigned > 0 { "uchar" } else { "char" }
        } else if spec.double > 0 {
            "double"
        } else if spec.float > 0 {
            "float"
        } else if spec.long >= 2 {
            if spec.unsigned > 0 { "ulonglong" } else { "longlong" }
        } else if spec.long == 1 {
            if spec.unsigned > 0 { "ulong" } else { "long" }
        } else if spec.short > 0 {
            if spec.unsigned > 0 { "ushort" } else { "short" }
        } else if spec.unsigned > 0 {
            "uint"
        } else {
            // No type word at all (or a bare `int`/`signed`) defaults to `int`
            // (pre-C99 implicit-int), matching what K&R-style declarations and
            // old-style function definitions rely on.
            "int"
        };
        Ok(self.types.well_known(name))
    }

    // --- struct/union/enum ------------------------------------------------------

    fn struct_union_specifier(&mut self, is_union: bool) -> ParseResult<TypeRef> {
        let mut packed = false;
        while self.cur().kind == TokenKind::Attr {
            if self.cur().text.contains("packed") {
                packed = true;
            }
            self.bump();
        }
        let tag = if self.cur().kind == TokenKind::Ident {
            Some(self.bump().text.clone())
        } else {
            None
        };
        if !self.at_punct("{") {
            // Reference to a previously declared (possibly still incomplete) tag.
            return match tag.as_deref().and_then(|n| self.ctx.scope.lookup_tag(n)) {
                Some(ty) => Ok(ty),
                None => {
                    let name = tag.unwrap_or_default();
                    let kind = if is_union { Kind::Union } else { Kind::Struct };
                    let placeholder = self.types.push(incomplete_tagged(kind, Some(name.clone())));
                    self.ctx.scope.declare_tag(name, placeholder);
                    Ok(placeholder)
                }
            };
        }
        self.expect_punct("{")?;
        let mut members = Vec::new();
        let mut idx = 0usize;
        while !self.eat_punct("}") {
            let (base_ty, mspec) = self.declspec()?;
            packed |= mspec.is_packed;
            if self.eat_punct(";") {
                // Anonymous struct/union member: inline its fields at this offset
                // (offsets get recomputed relative to the enclosing layout pass).
                members.push(Member { name: None, ty: base_ty, offset: 0, is_bitfield: false, bit_offset: 0, bit_width: 0, idx });
                idx += 1;
                continue;
            }
            loop {
                let (mty, name) = self.declarator(base_ty)?;
                let (is_bitfield, width) = if self.eat_punct(":") {
                    let w = self.const_expr_i64()?;
                    if w < 0 {
                        return err!(ParseError, self.loc(), "bitfield with negative width");
                    }
                    (true, w as u32)
                } else {
                    (false, 0)
                };
                members.push(Member {
                    name,
                    ty: mty,
                    offset: 0,
                    is_bitfield,
                    bit_offset: 0,
                    bit_width: width,
                    idx,
                });
                idx += 1;
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        let ty = if is_union {
            self.types.layout_union(tag.clone(), members)
        } else {
            self.types.layout_struct(tag.clone(), members, packed)
        };
        if let Some(name) = tag {
            self.ctx.scope.declare_tag(name, ty);
        }
        Ok(ty)
    }

    fn enum_specifier(&mut self) -> ParseResult<TypeRef> {
        let tag = if self.cur().kind == TokenKind::Ident {
            Some(self.bump().text.clone())
        } else {
            None
        };
        let underlying = if self.eat_punct(":") {
            Some(self.declspec()?.0)
        } else {
            None
        };
        if !self.at_punct("{") {
            let loc = self.loc();
            return match tag.as_deref().and_then(|n| self.ctx.scope.lookup_tag(n)) {
                Some(ty) => Ok(ty),
                None => err!(ParseError, loc, "undeclared enum tag"),
            };
        }
        self.expect_punct("{")?;
        let mut next_val: i64 = 0;
        let mut values = Vec::new();
        while !self.at_punct("}") {
            let name = self.expect_ident()?;
            if self.eat_punct("=") {
                next_val = self.const_expr_i64()?;
            }
            values.push((name, next_val));
            next_val = next_val.wrapping_add(1);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        let ty = if let Some(u) = underlying {
            let underlying_ty = &self.types.get(u).clone();
            for &(_, v) in &values {
                if v > i64::from(i32::MAX) && !underlying_ty.is_unsigned && underlying_ty.size <= 4 {
                    return err!(ParseError, self.loc(), "enumerator value does not fit in the declared underlying type");
                }
            }
            u
        } else {
            self.types.enum_underlying(values.iter().map(|&(_, v)| v).collect())
        };
        for (name, v) in values {
            self.ctx.scope.declare_var(name, VarScope::Enumerator(v, ty));
        }
        if let Some(name) = tag {
            self.ctx.scope.declare_tag(name, ty);
        }
        Ok(ty)
    }

    fn typeof_specifier(&mut self) -> ParseResult<TypeRef> {
        self.expect_punct("(")?;
        let ty = if self.at_decl_start() {
            let (base, _) = self.declspec()?;
            let (ty, _) = self.abstract_declarator(base)?;
            ty
        } else {
            let n = self.expr()?;
            self.nodes.get(n).ty.unwrap_or_else(|| self.types.well_known("int"))
        };
        self.expect_punct(")")?;
        Ok(ty)
    }

    /// Fold a constant expression to `i64` right now (array dimensions, bitfield
    /// widths, enumerator values, `case` labels).
    pub(crate) fn const_expr_i64(&mut self) -> ParseResult<i64> {
        let n = self.conditional()?;
        let ce = ConstEval::new(&self.nodes, &self.objs, &self.types);
        ce.eval(n).map_err(|e| ParseError { location: e.location, message: e.message })
    }

    pub(crate) fn new_node(&mut self, kind: NodeKind, loc: Location) -> crate::ast::NodeRef {
        self.nodes.push(Node::new(kind, loc))
    }

    // --- translation unit -------------------------------------------------------

    pub fn parse(mut self) -> ParseResult<TranslationUnit> {
        while !self.cur().is_eof() {
            self.top_level_decl()?;
        }
        for &g in &self.globals {
            self.objs.get_mut(g).finish_tentative();
        }
        mark_live(&mut self.objs, &self.globals);
        Ok(TranslationUnit { nodes: self.nodes, objs: self.objs, types: self.types, globals: self.globals })
    }

    fn top_level_decl(&mut self) -> ParseResult<()> {
        let (base_ty, spec) = self.declspec()?;
        if self.eat_punct(";") {
            return Ok(());
        }
        let mut first = true;
        loop {
            let loc = self.loc();
            let (ty, name) = self.declarator(base_ty)?;
            let name = match name {
                Some(n) => n,
                None => return err!(ParseError, loc, "declarator requires a name at file scope"),
            };
            if spec.is_typedef {
                let alias = self.types.copy_type(ty);
                self.ctx.scope.declare_var(name, VarScope::Typedef(alias));
            } else if self.types.get(ty).kind == Kind::Func && (first && self.at_punct("{")) {
                self.function_definition(ty, name, &spec, loc)?;
                return Ok(());
            } else {
                self.global_variable(ty, name, &spec, loc)?;
            }
            first = false;
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";")?;
        Ok(())
    }

    fn global_variable(&mut self, ty: TypeRef, name: String, spec: &DeclSpec, loc: Location) -> ParseResult<()> {
        if self.types.get(ty).kind == Kind::Vla {
            return err!(ParseError, loc, "variably modified type at file scope");
        }
        if self.types.get(ty).kind == Kind::Void {
            return err!(ParseError, loc, "variable declared void");
        }
        let existing = self.ctx.scope.lookup_var(&name).cloned();
        let obj_ref = if let Some(VarScope::Obj(r)) = existing {
            r
        } else {
            let mut o = Obj::new(name.clone(), ty);
            o.flags.is_static = spec.is_static;
            o.flags.is_tls = spec.is_thread_local;
            o.flags.is_tentative = !spec.is_extern;
            let r = self.objs.push(o);
            self.ctx.scope.declare_var(name, VarScope::Obj(r));
            self.globals.push(r);
            r
        };
        if self.eat_punct("=") {
            self.objs.get_mut(obj_ref).flags.is_tentative = false;
            self.objs.get_mut(obj_ref).flags.is_definition = true;
            self.gvar_initializer(obj_ref, ty)?;
        }
        Ok(())
    }

    fn function_definition(&mut self, ty: TypeRef, name: String, spec: &DeclSpec, loc: Location) -> ParseResult<()> {
        let existing = self.ctx.scope.lookup_var(&name).cloned();
        let obj_ref = if let Some(VarScope::Obj(r)) = existing {
            if self.objs.get(r).flags.is_definition {
                return err!(ParseError, loc, "redefinition of function '{}'", name);
            }
            r
        } else {
            let r = self.objs.push(Obj::new(name.clone(), ty));
            self.ctx.scope.declare_var(name, VarScope::Obj(r));
            self.globals.push(r);
            r
        };
        {
            let o = self.objs.get_mut(obj_ref);
            o.ty = ty;
            o.flags.is_function = true;
            o.flags.is_definition = true;
            o.flags.is_static = spec.is_static;
            o.flags.is_inline = spec.is_inline;
        }
        self.ctx.enter_function(obj_ref);
        // `enter_block`/`exit_block` rather than the `ScopeGuard` RAII form: the guard
        // would have to stay alive across `self.block_stmt_body()`, which itself needs a
        // fresh `&mut self` borrow that the held guard's borrow of `self.ctx.scope` would
        // conflict with.
        self.ctx.scope.enter_block();
        let mut func_ty = self.types.get(ty).clone();
        let mut kr_narrow_tys: Vec<Option<TypeRef>> = Vec::new();
        if func_ty.is_oldstyle {
            // K&R old-style definition: the parameter list was just names, typed `int`
            // provisionally; the declaration lines between `)` and `{` (already sitting
            // right here in the token stream) give their real types.
            let names: Vec<String> = func_ty.params.iter().filter_map(|p| p.name.clone()).collect();
            let resolved = self.kr_oldstyle_decls(&names)?;
            let (params, narrow_tys): (Vec<_>, Vec<_>) = resolved.into_iter().unzip();
            kr_narrow_tys = narrow_tys;
            let return_ty = func_ty.return_ty.unwrap();
            let new_ty = self.types.func_type(return_ty, params, false);
            func_ty = self.types.get(new_ty).clone();
            self.objs.get_mut(obj_ref).ty = new_ty;
        }
        let mut params = Vec::new();
        let mut kr_narrow_locals: Vec<ObjRef> = Vec::new();
        let mut pre_calc_head: Option<NodeRef> = None;
        let mut pre_calc_tail: Option<NodeRef> = None;
        for (i, p) in func_ty.params.iter().enumerate() {
            let pname = p.name.clone().unwrap_or_default();
            let mut po = Obj::new(pname.clone(), p.ty);
            po.flags.is_local = true;
            let pr = self.objs.push(po);
            if !pname.is_empty() {
                self.ctx.scope.declare_var(pname.clone(), VarScope::Obj(pr));
            }
            params.push(pr);

            // A K&R parameter narrower than its ABI slot: splice `narrow = (narrow_ty)abi;`
            // ahead of the body, so the declared name resolves to the narrowed copy instead
            // of the promoted ABI value.
            if let Some(Some(narrow_ty)) = kr_narrow_tys.get(i) {
                let loc = self.loc();
                let narrow_name = pname.trim_start_matches(".kr.").to_string();
                let mut narrow_obj = Obj::new(narrow_name.clone(), *narrow_ty);
                narrow_obj.flags.is_local = true;
                let narrow_ref = self.objs.push(narrow_obj);
                self.ctx.scope.declare_var(narrow_name, VarScope::Obj(narrow_ref));
                kr_narrow_locals.push(narrow_ref);

                let abi_var = self.new_node(NodeKind::Var, loc);
                {
                    let n = self.nodes.get_mut(abi_var);
                    n.ty = Some(p.ty);
                    n.extra.obj = Some(pr);
                }
                let cast = self.new_node(NodeKind::Cast, loc);
                {
                    let n = self.nodes.get_mut(cast);
                    n.lhs = Some(abi_var);
                    n.ty = Some(*narrow_ty);
                }
                let narrow_var = self.new_node(NodeKind::Var, loc);
                {
                    let n = self.nodes.get_mut(narrow_var);
                    n.ty = Some(*narrow_ty);
                    n.extra.obj = Some(narrow_ref);
                }
                let assign = self.make_assign(narrow_var, cast, None, loc)?;
                let stmt = self.new_node(NodeKind::ExprStmt, loc);
                self.nodes.get_mut(stmt).lhs = Some(assign);

                match pre_calc_tail {
                    None => pre_calc_head = Some(stmt),
                    Some(prev) => self.nodes.get_mut(prev).next = Some(stmt),
                }
                pre_calc_tail = Some(stmt);
            }
        }
        self.fn_locals = params.clone();
        self.fn_locals.extend(kr_narrow_locals);
        let body = self.block_stmt_body()?;
        self.ctx.resolve_gotos()?;
        self.ctx.scope.exit_block();
        if let Some(head) = pre_calc_head {
            // Stashed on the type, not spliced into `body` itself, the same way
            // `vla_len_node` is: `emit_function` runs it once right after loading the ABI
            // arguments and before generating `body`, mirroring `gen_vla_decl` reconstructing
            // its own stashed `NodeRef` from a raw index.
            use cretus_entity::EntityRef;
            let _ = pre_calc_tail;
            self.types.set_pre_calc(self.objs.get(obj_ref).ty, head.index() as u32);
        }
        let o = self.objs.get_mut(obj_ref);
        o.body = Some(body);
        o.params = params;
        o.locals = self.fn_locals.drain(..).collect();
        Ok(())
    }
}

fn is_simple(spec: &DeclSpec) -> bool {
    spec.void == 0
        && spec.boolean == 0
        && spec.char == 0
        && spec.short == 0
        && spec.int == 0
        && spec.long == 0
        && spec.float == 0
        && spec.double == 0
        && spec.signed == 0
        && spec.unsigned == 0
}

fn incomplete_tagged(kind: Kind, tag: Option<String>) -> Type {
    Type {
        kind,
        size: -1,
        align: 1,
        is_unsigned: false,
        is_packed: false,
        is_flexible: false,
        origin: None,
        base: None,
        array_len: 0,
        vla_len_node: None,
        members: Vec::new(),
        tag,
        return_ty: None,
        params: Vec::new(),
        is_variadic: false,
        is_oldstyle: false,
    }
}

/// Transitive liveness: every non-inline definition is live; anything it (transitively)
/// calls by name becomes live too.
fn mark_live(objs: &mut ObjArena, globals: &[ObjRef]) {
    let mut worklist: Vec<ObjRef> = globals
        .iter()
        .copied()
        .filter(|&r| {
            let o = objs.get(r);
            o.flags.is_definition && (!o.flags.is_function || !o.flags.is_inline || !o.flags.is_static)
        })
        .collect();
    for &r in &worklist {
        objs.get_mut(r).flags.is_live = true;
    }
    while let Some(r) = worklist.pop() {
        let refs = objs.get(r).refs.clone();
        for name in refs {
            if let Some(&target) = globals.iter().find(|&&g| objs.get(g).name == name) {
                if !objs.get(target).flags.is_live {
                    objs.get_mut(target).flags.is_live = true;
                    worklist.push(target);
                }
            }
        }
    }
}
