//! Declarator recursion: pointers, `(` grouping, array/VLA and function-parameter
//! suffixes, and K&R old-style parameter lists.

use super::Parser;
use crate::ast::NodeKind;
use crate::diagnostics::{err, ParseError, ParseResult};
use crate::token::TokenKind;
use crate::types::{Kind, Param, TypeRef};

impl<'a> Parser<'a> {
    /// Consume leading `*` pointer qualifiers (and the `const`/`volatile`/`restrict`
    /// words between them, which this model doesn't track per-pointer-level).
    fn pointers(&mut self, mut base: TypeRef) -> TypeRef {
        while self.eat_punct("*") {
            base = self.types.pointer_to(base);
            while self.eat_keyword("const") || self.eat_keyword("volatile") || self.eat_keyword("restrict") {}
        }
        base
    }

    /// `declarator`: pointers, then either `(` grouping (backtracked two-pass) or a
    /// name, then a type suffix. Returns `(full_type, name)`; `name` is `None` for an
    /// abstract declarator.
    pub(crate) fn declarator(&mut self, base: TypeRef) -> ParseResult<(TypeRef, Option<String>)> {
        let base = self.pointers(base);
        if self.eat_punct("(") {
            // Two-pass grouping: skip the parenthesized inner declarator, parse the
            // suffix that follows it against `base` to get the type the inner
            // declarator should itself be built against, then rewind and parse the
            // inner declarator for real with that computed type.
            let mark = self.pos;
            self.skip_balanced_parens()?;
            let suffixed = self.type_suffix(base)?;
            let end = self.pos;
            self.pos = mark;
            let (inner_ty, name) = self.declarator(suffixed)?;
            self.pos = end;
            return Ok((inner_ty, name));
        }
        let name = if self.cur().kind == TokenKind::Ident {
            Some(self.bump().text.clone())
        } else {
            None
        };
        let ty = self.type_suffix(base)?;
        Ok((ty, name))
    }

    /// An abstract declarator (`sizeof(int*)`, cast target, `typeof` type-name): same
    /// grammar, but the name is always absent and is simply discarded if present.
    pub(crate) fn abstract_declarator(&mut self, base: TypeRef) -> ParseResult<(TypeRef, Option<String>)> {
        self.declarator(base)
    }

    /// Skip from just after a consumed `(` to just after its matching `)`, without
    /// building anything — used by the declarator's grouping backtrack.
    fn skip_balanced_parens(&mut self) -> ParseResult<()> {
        let mut depth = 1i32;
        loop {
            if self.cur().is_eof() {
                return err!(ParseError, self.loc(), "unterminated '(' in declarator");
            }
            if self.at_punct("(") {
                depth += 1;
            } else if self.at_punct(")") {
                depth -= 1;
                if depth == 0 {
                    self.bump();
                    return Ok(());
                }
            }
            self.bump();
        }
    }

    /// `[` array/VLA or `(` function-parameter suffix, recursing first so that e.g.
    /// `int a[3][4]` builds `array_of(array_of(int, 4), 3)` (outer dimension first).
    fn type_suffix(&mut self, base: TypeRef) -> ParseResult<TypeRef> {
        if self.eat_punct("[") {
            while self.eat_keyword("static") || self.eat_keyword("const") || self.eat_keyword("volatile") || self.eat_keyword("restrict")
            {
            }
            let is_unspecified_vla = self.eat_punct("*");
            let len_node = if is_unspecified_vla || self.at_punct("]") {
                None
            } else {
                Some(self.conditional()?)
            };
            self.expect_punct("]")?;
            let elem = self.type_suffix(base)?;
            return if let Some(n) = len_node {
                if self.is_const_expr(n) {
                    let ce = crate::consteval::ConstEval::new(&self.nodes, &self.objs, &self.types);
                    let len = ce.eval(n).map_err(|e| ParseError { location: e.location, message: e.message })?;
                    Ok(self.types.array_of(elem, len))
                } else {
                    Ok(self.types.vla_of(elem, n.as_u32()))
                }
            } else if is_unspecified_vla {
                // `[*]` only appears in a function parameter, which `func_params` decays
                // to a pointer immediately, so this sentinel (no real length node) is
                // never dereferenced.
                Ok(self.types.vla_of(elem, u32::MAX))
            } else {
                Ok(self.types.array_of(elem, -1))
            };
        }
        if self.eat_punct("(") {
            return self.func_params(base);
        }
        Ok(base)
    }

    fn is_const_expr(&self, n: crate::ast::NodeRef) -> bool {
        let ce = crate::consteval::ConstEval::new(&self.nodes, &self.objs, &self.types);
        ce.is_const_expr(n)
    }

    /// Parse the parenthesized parameter list of a function declarator, having already
    /// consumed the opening `(`. Detects K&R old-style identifier lists and leaves them
    /// to be resolved once the following declspec lines (if any) are read by the
    /// function-definition assembler in `mod.rs`.
    fn func_params(&mut self, return_ty: TypeRef) -> ParseResult<TypeRef> {
        if self.eat_punct(")") {
            // `foo()`: no prototype, any arguments accepted.
            return Ok(self.types.func_type(return_ty, Vec::new(), false));
        }
        if self.at_keyword("void") && self.peek(1).is_punct(")") {
            self.bump();
            self.bump();
            return Ok(self.types.func_type(return_ty, Vec::new(), false));
        }
        // K&R heuristic: a bare identifier that isn't a typename, immediately followed
        // by `,` or `)`, can only be an old-style parameter name (a prototype's first
        // token is always a type keyword, a typedef name, or `...`).
        let is_oldstyle = self.cur().kind == TokenKind::Ident
            && !matches!(self.ctx.scope.lookup_var(&self.cur().text), Some(crate::scope::VarScope::Typedef(_)))
            && (self.peek(1).is_punct(",") || self.peek(1).is_punct(")"));
        if is_oldstyle {
            let mut names = Vec::new();
            loop {
                names.push(self.expect_ident()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
            // Each name defaults to `int` until a matching declspec line before the
            // function body overrides it; `function_definition` reads those lines and
            // rebuilds the final parameter list, so this type is provisional.
            let int_ty = self.types.well_known("int");
            let params = names.into_iter().map(|n| Param { name: Some(n), ty: int_ty }).collect();
            let func = self.types.func_type(return_ty, params, false);
            let mut ty = self.types.get(func).clone();
            ty.is_oldstyle = true;
            return Ok(self.types.push(ty));
        }
        let mut params = Vec::new();
        let mut variadic = false;
        loop {
            if self.eat_punct("...") {
                variadic = true;
                break;
            }
            let (pbase, _) = self.declspec()?;
            let (mut pty, pname) = self.declarator(pbase)?;
            // Array/function parameters decay.
            pty = self.types.ptr_decay(pty);
            params.push(Param { name: pname, ty: pty });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(self.types.func_type(return_ty, params, variadic))
    }

    /// Re-read the K&R declaration lines between an old-style parameter list and the
    /// function body (`name1, name2 ... ) decl1; decl2; { ... }`), producing the ABI-facing
    /// parameter list in original identifier order, paired with the declared (possibly
    /// narrower) type the body actually wants for that parameter, if different.
    ///
    /// A call through no prototype (which every K&R-style call is, by definition) applies
    /// default argument promotion: `float` arguments arrive as `double`, and anything
    /// narrower than `int` arrives as `int`. A `float x;`/`char c;` K&R parameter therefore
    /// can't be read directly out of its ABI slot at its declared width, so the `Param`
    /// returned for it carries the promoted type and a hidden name; `function_definition`
    /// uses the paired declared type to splice in a narrowing assignment from that hidden
    /// slot into a second, visible local of the declared type, which is what the body
    /// actually resolves the parameter name to.
    pub(crate) fn kr_oldstyle_decls(&mut self, names: &[String]) -> ParseResult<Vec<(Param, Option<TypeRef>)>> {
        let mut declared: std::collections::HashMap<String, TypeRef> = std::collections::HashMap::new();
        while self.at_decl_start() {
            let (base, _) = self.declspec()?;
            loop {
                let (ty, name) = self.declarator(base)?;
                if let Some(n) = name {
                    declared.insert(n, ty);
                }
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(";")?;
        }
        let int_ty = self.types.well_known("int");
        let double_ty = self.types.well_known("double");
        let int_rank = self.types.get(int_ty).rank();

        Ok(names
            .iter()
            .map(|name| {
                let narrow_ty = declared.get(name).copied().unwrap_or(int_ty);
                let narrow = self.types.get(narrow_ty).clone();
                if narrow.kind == Kind::Float {
                    (Param { name: Some(format!(".kr.{}", name)), ty: double_ty }, Some(narrow_ty))
                } else if narrow.is_integer() && narrow.rank() < int_rank {
                    (Param { name: Some(format!(".kr.{}", name)), ty: int_ty }, Some(narrow_ty))
                } else {
                    (Param { name: Some(name.clone()), ty: narrow_ty }, None)
                }
            })
            .collect())
    }
}

trait NodeRefExt {
    fn as_u32(&self) -> u32;
}

impl NodeRefExt for crate::ast::NodeRef {
    fn as_u32(&self) -> u32 {
        // `cretus_entity::entity_impl!` gives every entity ref a `From<EntityRef> for u32`-
        // shaped `index()` accessor; VLA length nodes are stashed on `Type::vla_len_node`
        // as this raw index since `types.rs` has no dependency on `ast`.
        use cretus_entity::EntityRef;
        self.index() as u32
    }
}

/// Used by `expression.rs` to tell whether a node kind can stand as an lvalue target
/// for `Assign`/`Addr`/compound-assignment lowering.
pub(crate) fn is_lvalue_kind(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Var | NodeKind::Deref | NodeKind::Member)
}
