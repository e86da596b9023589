//! Initializer parsing: braced aggregate initializers with C99
//! designators (`.field =`, `[idx] =`, and the GNU `[lo ... hi] =` range form),
//! scalar/string-literal initializers, and the two consumers that turn a parsed
//! `Initializer` tree into something codegen can use — a static byte buffer with
//! relocations for a global, or a zero-then-assign expression chain for a local.

use super::Parser;
use crate::ast::{Initializer, NodeKind, NodeRef, ObjRef, Relocation};
use crate::consteval::ConstEval;
use crate::diagnostics::{err, Location, ParseError, ParseResult};
use crate::types::{Kind, TypeRef};

impl<'a> Parser<'a> {
    /// Parse an initializer for a value of (possibly incomplete-array) type `ty`,
    /// returning the type actually settled on (an incomplete array's length is
    /// inferred from the initializer) alongside the parsed tree.
    pub(crate) fn initializer(&mut self, ty: TypeRef) -> ParseResult<(TypeRef, Initializer)> {
        let t = self.types.get(ty).clone();
        if t.kind == Kind::Array
            && t.base.map(|b| matches!(self.types.get(b).kind, Kind::Char | Kind::PChar)).unwrap_or(false)
            && self.cur().kind == crate::token::TokenKind::Str
        {
            return self.string_initializer(ty, t);
        }
        if self.at_punct("{") {
            return self.aggregate_initializer(ty, t);
        }
        if matches!(t.kind, Kind::Struct | Kind::Union | Kind::Array) {
            // `struct s x = y;` (copy-initialization from another aggregate of the
            // same type) isn't a braced initializer at all; represent it as a single
            // scalar leaf and let codegen do an aggregate copy.
            let e = self.assign()?;
            return Ok((ty, Initializer::Scalar(e)));
        }
        let e = self.assign()?;
        Ok((ty, Initializer::Scalar(e)))
    }

    fn string_initializer(&mut self, ty: TypeRef, t: crate::types::Type) -> ParseResult<(TypeRef, Initializer)> {
        let loc = self.loc();
        let tok = self.cur().clone();
        self.bump();
        let mut bytes = tok.str_val.clone().unwrap_or_else(|| tok.text.clone().into_bytes());
        bytes.push(0);
        let final_ty = if t.array_len < 0 {
            self.types.array_of(t.base.unwrap(), bytes.len() as i64)
        } else {
            ty
        };
        let len = self.types.get(final_ty).array_len.max(0) as usize;
        let mut slots = Vec::with_capacity(len);
        for i in 0..len {
            let byte = if i < bytes.len() { bytes[i] as i64 } else { 0 };
            let node = self.int_literal(byte, loc);
            let char_ty = t.base.unwrap();
            self.nodes.get_mut(node).ty = Some(char_ty);
            slots.push(Some(Initializer::Scalar(node)));
        }
        Ok((final_ty, Initializer::Aggregate(slots)))
    }

    fn aggregate_initializer(&mut self, ty: TypeRef, t: crate::types::Type) -> ParseResult<(TypeRef, Initializer)> {
        let loc = self.loc();
        self.expect_punct("{")?;
        if t.kind == Kind::Union {
            if self.at_punct("}") {
                self.bump();
                return Ok((ty, Initializer::Aggregate(Vec::new())));
            }
            let (idx, member_ty) = if self.eat_punct(".") {
                let name = self.expect_ident()?;
                self.expect_punct("=")?;
                let idx = t
                    .members
                    .iter()
                    .position(|m| m.name.as_deref() == Some(&name))
                    .ok_or(())
                    .or_else(|_| err!(ParseError, loc, "no member named '{}'", name))?;
                (idx, t.members[idx].ty)
            } else {
                (0, t.members.first().map(|m| m.ty).unwrap_or(ty))
            };
            let (_, init) = self.initializer(member_ty)?;
            self.eat_punct(",");
            self.expect_punct("}")?;
            return Ok((ty, Initializer::Union(idx, Box::new(init))));
        }
        let is_array = t.kind == Kind::Array;
        let mut slots: Vec<Option<Initializer>> = Vec::new();
        let mut next_idx: usize = 0;
        let mut max_idx: usize = 0;
        while !self.at_punct("}") {
            let (lo, hi, elem_ty) = self.read_designator(&t, is_array, next_idx)?;
            if slots.len() <= hi {
                slots.resize(hi + 1, None);
            }
            let (_, init) = self.initializer(elem_ty)?;
            for i in lo..=hi {
                slots[i] = Some(init.clone());
            }
            next_idx = hi + 1;
            max_idx = max_idx.max(hi + 1);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        let final_len = if is_array && t.array_len >= 0 { t.array_len as usize } else if is_array { max_idx } else { t.members.len() };
        if slots.len() < final_len {
            slots.resize(final_len, None);
        }
        let final_ty = if is_array && t.array_len < 0 {
            self.types.array_of(t.base.unwrap(), final_len as i64)
        } else {
            ty
        };
        Ok((final_ty, Initializer::Aggregate(slots)))
    }

    /// Read one designator (`.field =`, `[lo]`/`[lo ... hi] =`, or a bare positional
    /// initializer), returning `(lo_index, hi_index, element_type)`.
    fn read_designator(&mut self, t: &crate::types::Type, is_array: bool, next_idx: usize) -> ParseResult<(usize, usize, TypeRef)> {
        let loc = self.loc();
        if self.eat_punct(".") {
            let name = self.expect_ident()?;
            self.expect_punct("=")?;
            let idx = t
                .members
                .iter()
                .position(|m| m.name.as_deref() == Some(&name))
                .ok_or(())
                .or_else(|_| err!(ParseError, loc, "no member named '{}'", name))?;
            return Ok((idx, idx, t.members[idx].ty));
        }
        if self.eat_punct("[") {
            let lo_node = self.conditional()?;
            let ce = ConstEval::new(&self.nodes, &self.objs, &self.types);
            let lo = ce.eval(lo_node).map_err(|e| ParseError { location: e.location, message: e.message })?;
            let hi = if self.eat_punct("...") {
                let hi_node = self.conditional()?;
                let ce = ConstEval::new(&self.nodes, &self.objs, &self.types);
                ce.eval(hi_node).map_err(|e| ParseError { location: e.location, message: e.message })?
            } else {
                lo
            };
            self.expect_punct("]")?;
            self.expect_punct("=")?;
            let elem_ty = t.base.unwrap();
            return Ok((lo as usize, hi as usize, elem_ty));
        }
        let elem_ty = if is_array {
            t.base.unwrap()
        } else {
            t.members.get(next_idx).map(|m| m.ty).unwrap_or_else(|| self.types.well_known("int"))
        };
        Ok((next_idx, next_idx, elem_ty))
    }

    /// Parse a global's initializer and serialize it directly into `obj.init_data`
    /// plus `obj.relocations`: every leaf must be a constant
    /// expression, resolved with `ConstEval` rather than emitted as runtime code.
    pub(crate) fn gvar_initializer(&mut self, obj: ObjRef, ty: TypeRef) -> ParseResult<()> {
        let (final_ty, init) = self.initializer(ty)?;
        self.objs.get_mut(obj).ty = final_ty;
        let loc = self.loc();
        let size = self.types.size_of(final_ty, loc).map_err(|e| ParseError { location: e.location, message: e.message })?;
        let mut buf = vec![0u8; size.max(0) as usize];
        let mut relocs = Vec::new();
        self.write_initializer(&mut buf, &mut relocs, 0, final_ty, &init)?;
        let o = self.objs.get_mut(obj);
        o.init_data = buf;
        o.relocations = relocs;
        o.flags.is_definition = true;
        Ok(())
    }

    fn write_initializer(&self, buf: &mut [u8], relocs: &mut Vec<Relocation>, offset: i64, ty: TypeRef, init: &Initializer) -> ParseResult<()> {
        let t = self.types.get(ty);
        match init {
            Initializer::Scalar(n) => self.write_scalar(buf, relocs, offset, ty, *n),
            Initializer::Aggregate(children) => {
                if t.kind == Kind::Array {
                    let elem = t.base.unwrap();
                    let elem_size = self.types.get(elem).size.max(0);
                    for (i, c) in children.iter().enumerate() {
                        if let Some(child) = c {
                            self.write_initializer(buf, relocs, offset + i as i64 * elem_size, elem, child)?;
                        }
                    }
                    Ok(())
                } else {
                    let members = t.members.clone();
                    for (i, c) in children.iter().enumerate() {
                        if let (Some(child), Some(m)) = (c, members.get(i)) {
                            self.write_initializer(buf, relocs, offset + m.offset, m.ty, child)?;
                        }
                    }
                    Ok(())
                }
            }
            Initializer::Union(idx, child) => {
                if let Some(m) = t.members.get(*idx).cloned() {
                    self.write_initializer(buf, relocs, offset, m.ty, child)?;
                }
                Ok(())
            }
        }
    }

    fn write_scalar(&self, buf: &mut [u8], relocs: &mut Vec<Relocation>, offset: i64, ty: TypeRef, n: NodeRef) -> ParseResult<()> {
        let t = self.types.get(ty);
        let loc = self.nodes.get(n).loc;
        let start = offset as usize;
        if t.is_flonum() {
            let ce = ConstEval::new(&self.nodes, &self.objs, &self.types);
            let v = ce.eval_double(n).map_err(|e| ParseError { location: e.location, message: e.message })?;
            let bytes: Vec<u8> = if t.size == 4 { (v as f32).to_le_bytes().to_vec() } else { v.to_le_bytes().to_vec() };
            let end = start + bytes.len().min(buf.len() - start);
            buf[start..end].copy_from_slice(&bytes[..end - start]);
            return Ok(());
        }
        let ce = ConstEval::new(&self.nodes, &self.objs, &self.types);
        let mut label = None;
        let v = ce.eval2(n, &mut label).map_err(|e| ParseError { location: e.location, message: e.message })?;
        if let Some(l) = label {
            relocs.push(Relocation { offset, label: l, addend: v });
            return Ok(());
        }
        let size = (t.size.max(1) as usize).min(8);
        let bytes = v.to_le_bytes();
        let end = (start + size).min(buf.len());
        buf[start..end].copy_from_slice(&bytes[..end - start]);
        Ok(())
    }

    /// Build a local's initializer as a runtime expression: zero the whole object
    /// first (`MemZero`), then one `Assign` per initialized leaf, `Comma`-chained in
    /// source order. Untouched aggregate slots stay zero from the first step.
    pub(crate) fn lvar_init_expr(&mut self, obj: ObjRef, ty: TypeRef) -> ParseResult<NodeRef> {
        let (final_ty, init) = self.initializer(ty)?;
        self.objs.get_mut(obj).ty = final_ty;
        let loc = self.loc();
        let zero = self.new_node(NodeKind::MemZero, loc);
        {
            let n = self.nodes.get_mut(zero);
            n.extra.obj = Some(obj);
            n.ty = Some(final_ty);
        }
        let mut chain = zero;
        self.build_assign_chain(&mut chain, obj, 0, final_ty, &init, loc)?;
        Ok(chain)
    }

    fn build_assign_chain(&mut self, chain: &mut NodeRef, obj: ObjRef, offset: i64, ty: TypeRef, init: &Initializer, loc: Location) -> ParseResult<()> {
        match init {
            Initializer::Scalar(val) => {
                let target = self.lvalue_at_offset(obj, offset, ty, loc);
                let assign = self.make_assign(target, *val, None, loc)?;
                self.append_comma(chain, assign, loc);
                Ok(())
            }
            Initializer::Aggregate(children) => {
                let t = self.types.get(ty).clone();
                if t.kind == Kind::Array {
                    let elem = t.base.unwrap();
                    let elem_size = self.types.get(elem).size.max(0);
                    for (i, c) in children.iter().enumerate() {
                        if let Some(child) = c {
                            self.build_assign_chain(chain, obj, offset + i as i64 * elem_size, elem, child, loc)?;
                        }
                    }
                } else {
                    for (i, c) in children.iter().enumerate() {
                        if let Some(child) = c {
                            if let Some(m) = t.members.get(i).cloned() {
                                self.build_assign_chain(chain, obj, offset + m.offset, m.ty, child, loc)?;
                            }
                        }
                    }
                }
                Ok(())
            }
            Initializer::Union(idx, child) => {
                let t = self.types.get(ty).clone();
                if let Some(m) = t.members.get(*idx).cloned() {
                    self.build_assign_chain(chain, obj, offset + m.offset, m.ty, child, loc)?;
                }
                Ok(())
            }
        }
    }

    /// Address `obj` at byte `offset` as type `ty`: the object itself when the
    /// offset is zero and the types already match, otherwise `*(ty*)((char*)&obj +
    /// offset)`.
    fn lvalue_at_offset(&mut self, obj: ObjRef, offset: i64, ty: TypeRef, loc: Location) -> NodeRef {
        let obj_ty = self.objs.get(obj).ty;
        let var = self.new_node(NodeKind::Var, loc);
        {
            let n = self.nodes.get_mut(var);
            n.ty = Some(obj_ty);
            n.extra.obj = Some(obj);
        }
        if offset == 0 && self.types.is_compatible(obj_ty, ty) {
            return var;
        }
        let addr = self.new_node(NodeKind::Addr, loc);
        let obj_ptr = self.types.pointer_to(obj_ty);
        {
            let n = self.nodes.get_mut(addr);
            n.lhs = Some(var);
            n.ty = Some(obj_ptr);
        }
        let char_ptr = self.types.pointer_to(self.types.well_known("char"));
        let cast1 = self.new_node(NodeKind::Cast, loc);
        {
            let n = self.nodes.get_mut(cast1);
            n.lhs = Some(addr);
            n.ty = Some(char_ptr);
        }
        let off_lit = self.int_literal(offset, loc);
        let added = self.new_node(NodeKind::Add, loc);
        {
            let n = self.nodes.get_mut(added);
            n.lhs = Some(cast1);
            n.rhs = Some(off_lit);
            n.ty = Some(char_ptr);
        }
        let target_ptr = self.types.pointer_to(ty);
        let cast2 = self.new_node(NodeKind::Cast, loc);
        {
            let n = self.nodes.get_mut(cast2);
            n.lhs = Some(added);
            n.ty = Some(target_ptr);
        }
        let deref = self.new_node(NodeKind::Deref, loc);
        {
            let n = self.nodes.get_mut(deref);
            n.lhs = Some(cast2);
            n.ty = Some(ty);
        }
        deref
    }

    fn append_comma(&mut self, chain: &mut NodeRef, rhs: NodeRef, loc: Location) {
        let node = self.new_node(NodeKind::Comma, loc);
        let rty = self.nodes.get(rhs).ty;
        {
            let n = self.nodes.get_mut(node);
            n.lhs = Some(*chain);
            n.rhs = Some(rhs);
            n.ty = rty;
        }
        *chain = node;
    }
}
