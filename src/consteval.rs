//! The constant evaluator: integer/float folding with label capture for
//! global initializers.
//!
//! Pointer arithmetic scaling is assumed already desugared into plain `Mul`/`Add` nodes by
//! the parser's `add_type` pass, so `Add`/`Sub` here only ever combine
//! plain integers, or exactly one integer operand with a label.

use crate::ast::{Node, NodeArena, NodeKind, NodeRef, ObjArena};
use crate::diagnostics::{err, ConstEvalError, ConstEvalResult, Location};
use crate::types::{Kind, TypeArena, TypeRef};

/// Folds `Node` trees addressed by `NodeRef` against the arenas that own them.
pub struct ConstEval<'a> {
    nodes: &'a NodeArena,
    objs: &'a ObjArena,
    types: &'a TypeArena,
    recover: bool,
}

impl<'a> ConstEval<'a> {
    pub fn new(nodes: &'a NodeArena, objs: &'a ObjArena, types: &'a TypeArena) -> Self {
        ConstEval { nodes, objs, types, recover: false }
    }

    /// Trial-evaluation mode: failures are expected traffic, not logged.
    pub fn with_recover(mut self) -> Self {
        self.recover = true;
        self
    }

    /// Integer constant, no labels permitted.
    pub fn eval(&self, n: NodeRef) -> ConstEvalResult<i64> {
        self.eval_plain(n).map_err(|e| {
            if !self.recover {
                log::debug!("constant evaluation failed: {}", e.message);
            }
            e
        })
    }

    /// `is_const_expr`: trial evaluation that reports success/failure without surfacing
    /// the error to the caller.
    pub fn is_const_expr(&self, n: NodeRef) -> bool {
        let trial = ConstEval { nodes: self.nodes, objs: self.objs, types: self.types, recover: true };
        trial.eval_plain(n).is_ok()
    }

    /// Integer constant that may also capture a `label + addend` global-initializer
    /// relocation.
    pub fn eval2(&self, n: NodeRef, label: &mut Option<String>) -> ConstEvalResult<i64> {
        let node = self.nodes.get(n);
        let loc = node.loc;
        match node.kind {
            NodeKind::Num => {
                let is_flo = node.ty.map(|t| self.types.get(t).is_flonum()).unwrap_or(false);
                if is_flo {
                    Ok(node.extra.fval as i64)
                } else {
                    Ok(self.trunc(node, node.extra.ival))
                }
            }
            NodeKind::Neg => Ok(self.trunc(node, self.eval2(node.lhs.unwrap(), label)?.wrapping_neg())),
            NodeKind::Pos => self.eval2(node.lhs.unwrap(), label),
            NodeKind::Not => Ok(if self.eval_plain(node.lhs.unwrap())? == 0 { 1 } else { 0 }),
            NodeKind::BitNot => Ok(self.trunc(node, !self.eval_plain(node.lhs.unwrap())?)),

            NodeKind::Add | NodeKind::Sub => {
                let mut llabel = None;
                let lv = self.eval2(node.lhs.unwrap(), &mut llabel)?;
                let mut rlabel = None;
                let rv = self.eval2(node.rhs.unwrap(), &mut rlabel)?;
                let raw = if node.kind == NodeKind::Add { lv.wrapping_add(rv) } else { lv.wrapping_sub(rv) };
                match (llabel, rlabel, node.kind) {
                    (Some(l), None, _) => {
                        *label = Some(l);
                        Ok(self.trunc(node, raw))
                    }
                    (None, Some(r), NodeKind::Add) => {
                        *label = Some(r);
                        Ok(self.trunc(node, raw))
                    }
                    (None, Some(_), NodeKind::Sub) => {
                        err!(ConstEvalError, loc, "cannot subtract a global address from a constant")
                    }
                    (None, None, _) => Ok(self.trunc(node, raw)),
                    (Some(_), Some(_), _) => {
                        err!(ConstEvalError, loc, "sum of two global addresses is not a constant")
                    }
                    _ => unreachable!(),
                }
            }

            NodeKind::Mul
            | NodeKind::Div
            | NodeKind::Mod
            | NodeKind::BitAnd
            | NodeKind::BitOr
            | NodeKind::BitXor
            | NodeKind::Shl
            | NodeKind::Shr
            | NodeKind::Sar
            | NodeKind::Eq
            | NodeKind::Ne
            | NodeKind::Lt
            | NodeKind::Le
            | NodeKind::Gt
            | NodeKind::Ge => {
                let lv = self.eval_plain(node.lhs.unwrap())?;
                let rv = self.eval_plain(node.rhs.unwrap())?;
                self.eval_binary(node, lv, rv)
            }

            NodeKind::LogAnd => {
                if self.eval_plain(node.lhs.unwrap())? == 0 {
                    return Ok(0);
                }
                Ok(if self.eval_plain(node.rhs.unwrap())? != 0 { 1 } else { 0 })
            }
            NodeKind::LogOr => {
                if self.eval_plain(node.lhs.unwrap())? != 0 {
                    return Ok(1);
                }
                Ok(if self.eval_plain(node.rhs.unwrap())? != 0 { 1 } else { 0 })
            }

            NodeKind::Cond => {
                if self.eval_plain(node.cond.unwrap())? != 0 {
                    self.eval2(node.then.unwrap(), label)
                } else {
                    self.eval2(node.els.unwrap(), label)
                }
            }

            NodeKind::Comma | NodeKind::Chain => self.eval2(node.rhs.unwrap(), label),

            NodeKind::Cast => self.eval_cast(node, label),

            // `&&label`: yields 0, writes the label reference through `label`.
            NodeKind::LabelVal => {
                if let Some(l) = &node.extra.label {
                    *label = Some(l.clone());
                }
                Ok(0)
            }

            NodeKind::Addr => {
                let inner = self.nodes.get(node.lhs.unwrap());
                if inner.kind == NodeKind::Var {
                    if let Some(obj_ref) = inner.extra.obj {
                        *label = Some(self.objs.get(obj_ref).name.clone());
                        return Ok(0);
                    }
                }
                err!(ConstEvalError, loc, "address of a non-global is not a compile-time constant")
            }

            // A bare array/function name decays to its own address in a constant context.
            NodeKind::Var => {
                if let Some(obj_ref) = node.extra.obj {
                    let obj = self.objs.get(obj_ref);
                    if matches!(self.types.get(obj.ty).kind, Kind::Array | Kind::Func) {
                        *label = Some(obj.name.clone());
                        return Ok(0);
                    }
                }
                err!(ConstEvalError, loc, "variable reference is not a compile-time constant")
            }

            NodeKind::Assign => err!(ConstEvalError, loc, "assignment is not a compile-time constant"),
            _ => err!(ConstEvalError, loc, "not a compile-time constant expression"),
        }
    }

    /// IEEE `long double`-precision float constant.
    pub fn eval_double(&self, n: NodeRef) -> ConstEvalResult<f64> {
        let node = self.nodes.get(n);
        let loc = node.loc;
        match node.kind {
            NodeKind::Num => Ok(node.extra.fval),
            NodeKind::Neg => Ok(-self.eval_double(node.lhs.unwrap())?),
            NodeKind::Pos => self.eval_double(node.lhs.unwrap()),
            NodeKind::Add => Ok(self.eval_double(node.lhs.unwrap())? + self.eval_double(node.rhs.unwrap())?),
            NodeKind::Sub => Ok(self.eval_double(node.lhs.unwrap())? - self.eval_double(node.rhs.unwrap())?),
            NodeKind::Mul => Ok(self.eval_double(node.lhs.unwrap())? * self.eval_double(node.rhs.unwrap())?),
            NodeKind::Div => Ok(self.eval_double(node.lhs.unwrap())? / self.eval_double(node.rhs.unwrap())?),
            NodeKind::Cond => {
                if self.eval_double(node.cond.unwrap())? != 0.0 {
                    self.eval_double(node.then.unwrap())
                } else {
                    self.eval_double(node.els.unwrap())
                }
            }
            NodeKind::Comma | NodeKind::Chain => self.eval_double(node.rhs.unwrap()),
            NodeKind::Cast => {
                let inner = node.lhs.unwrap();
                if self.is_flonum(self.nodes.get(inner).ty) {
                    self.eval_double(inner)
                } else {
                    Ok(self.eval_plain(inner)? as f64)
                }
            }
            _ => err!(ConstEvalError, loc, "not a compile-time floating constant"),
        }
    }

    fn eval_cast(&self, node: &Node, label: &mut Option<String>) -> ConstEvalResult<i64> {
        let inner = node.lhs.unwrap();
        // Cast-to-bool (also covering a null-pointer check) compares against zero rather
        // than truncating.
        let is_bool = node.ty.map(|t| self.types.get(t).kind == Kind::Bool).unwrap_or(false);
        if self.is_flonum(self.nodes.get(inner).ty) {
            let f = self.eval_double(inner)?;
            return Ok(if is_bool { (f != 0.0) as i64 } else { self.trunc(node, f as i64) });
        }
        let v = self.eval2(inner, label)?;
        if is_bool {
            *label = None;
            return Ok((v != 0) as i64);
        }
        Ok(self.trunc(node, v))
    }

    /// Evaluate `n`, requiring the result to be a plain integer with no captured label.
    fn eval_plain(&self, n: NodeRef) -> ConstEvalResult<i64> {
        let mut label = None;
        let v = self.eval2(n, &mut label)?;
        if label.is_some() {
            let loc = self.nodes.get(n).loc;
            return err!(ConstEvalError, loc, "a global address is not usable as a plain integer constant here");
        }
        Ok(v)
    }

    fn eval_binary(&self, node: &Node, lv: i64, rv: i64) -> ConstEvalResult<i64> {
        let loc = node.loc;
        match node.kind {
            NodeKind::Mul => Ok(self.trunc(node, lv.wrapping_mul(rv))),
            NodeKind::Div => {
                let (size, unsigned) = self.width_unsigned(node.ty);
                self.int_div(loc, lv, rv, size, unsigned, false)
            }
            NodeKind::Mod => {
                let (size, unsigned) = self.width_unsigned(node.ty);
                self.int_div(loc, lv, rv, size, unsigned, true)
            }
            NodeKind::BitAnd => Ok(self.trunc(node, lv & rv)),
            NodeKind::BitOr => Ok(self.trunc(node, lv | rv)),
            NodeKind::BitXor => Ok(self.trunc(node, lv ^ rv)),
            NodeKind::Shl => Ok(self.trunc(node, lv.wrapping_shl(rv as u32 & 63))),
            NodeKind::Shr => {
                let (size, _) = self.width_unsigned(node.ty);
                let zero_extended = mask_to_width(lv, size) as u64;
                Ok(self.trunc(node, (zero_extended >> (rv as u32 & 63)) as i64))
            }
            NodeKind::Sar => Ok(self.trunc(node, lv.wrapping_shr(rv as u32 & 63))),
            NodeKind::Eq => Ok((lv == rv) as i64),
            NodeKind::Ne => Ok((lv != rv) as i64),
            NodeKind::Lt | NodeKind::Le | NodeKind::Gt | NodeKind::Ge => {
                // The comparison's own type is always `int` (the 0/1 result); the operand
                // type that decides signedness lives on the lhs operand node instead.
                let (size, unsigned) = self.width_unsigned(self.nodes.get(node.lhs.unwrap()).ty);
                Ok(self.compare(node.kind, lv, rv, size, unsigned) as i64)
            }
            _ => unreachable!("eval_binary called on non-binary kind {:?}", node.kind),
        }
    }

    fn compare(&self, kind: NodeKind, lv: i64, rv: i64, size: i64, unsigned: bool) -> bool {
        if unsigned {
            let lu = mask_to_width(lv, size) as u64;
            let ru = mask_to_width(rv, size) as u64;
            match kind {
                NodeKind::Lt => lu < ru,
                NodeKind::Le => lu <= ru,
                NodeKind::Gt => lu > ru,
                NodeKind::Ge => lu >= ru,
                _ => unreachable!(),
            }
        } else {
            match kind {
                NodeKind::Lt => lv < rv,
                NodeKind::Le => lv <= rv,
                NodeKind::Gt => lv > rv,
                NodeKind::Ge => lv >= rv,
                _ => unreachable!(),
            }
        }
    }

    fn int_div(
        &self,
        loc: Location,
        lv: i64,
        rv: i64,
        size: i64,
        unsigned: bool,
        modulo: bool,
    ) -> ConstEvalResult<i64> {
        if rv == 0 {
            return err!(ConstEvalError, loc, "division by zero in constant expression");
        }
        if unsigned {
            let lu = mask_to_width(lv, size) as u64;
            let ru = mask_to_width(rv, size) as u64;
            let r = if modulo { lu % ru } else { lu / ru };
            return Ok(wrap(r as i64, size, true));
        }
        // `INT_MIN / -1` (and its per-width analogues): `/` saturates to the minimum,
        // `%` is zero, rather than letting the host division trap.
        let min = signed_min(size);
        if lv == min && rv == -1 {
            return Ok(if modulo { 0 } else { min });
        }
        let r = if modulo { lv.wrapping_rem(rv) } else { lv.wrapping_div(rv) };
        Ok(wrap(r, size, false))
    }

    fn trunc(&self, node: &Node, v: i64) -> i64 {
        let (size, unsigned) = self.width_unsigned(node.ty);
        wrap(v, size, unsigned)
    }

    fn width_unsigned(&self, ty: Option<TypeRef>) -> (i64, bool) {
        match ty {
            Some(r) => {
                let t = self.types.get(r);
                if t.is_ptr_like() {
                    (8, true)
                } else {
                    (t.size.max(1), t.is_unsigned)
                }
            }
            None => (4, false),
        }
    }

    fn is_flonum(&self, ty: Option<TypeRef>) -> bool {
        ty.map(|t| self.types.get(t).is_flonum()).unwrap_or(false)
    }
}

/// Zero-extend `v`'s low `size` bytes into an otherwise-zero 64-bit pattern, independent
/// of whether `v` itself holds a sign-extended negative `i64`.
fn mask_to_width(v: i64, size: i64) -> i64 {
    match size {
        1 => v & 0xff,
        2 => v & 0xffff,
        4 => v & 0xffff_ffff,
        _ => v,
    }
}

fn wrap(v: i64, size: i64, unsigned: bool) -> i64 {
    match size {
        1 => {
            if unsigned {
                (v as u8) as i64
            } else {
                (v as i8) as i64
            }
        }
        2 => {
            if unsigned {
                (v as u16) as i64
            } else {
                (v as i16) as i64
            }
        }
        4 => {
            if unsigned {
                (v as u32) as i64
            } else {
                (v as i32) as i64
            }
        }
        _ => v,
    }
}

fn signed_min(size: i64) -> i64 {
    match size {
        1 => i8::MIN as i64,
        2 => i16::MIN as i64,
        4 => i32::MIN as i64,
        _ => i64::MIN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Node, NodeExtra, Obj};
    use crate::diagnostics::Location;
    use crate::types::TypeArena;

    fn num(arena: &mut NodeArena, ty: TypeRef, v: i64) -> NodeRef {
        let mut n = Node::new(NodeKind::Num, Location::synthetic());
        n.ty = Some(ty);
        n.extra.ival = v;
        arena.push(n)
    }

    #[test]
    fn div_by_zero_is_an_error() {
        let mut nodes = NodeArena::new();
        let objs = ObjArena::new();
        let types = TypeArena::new();
        let i = types.well_known("int");
        let lhs = num(&mut nodes, i, 10);
        let rhs = num(&mut nodes, i, 0);
        let mut div = Node::new(NodeKind::Div, Location::synthetic());
        div.ty = Some(i);
        div.lhs = Some(lhs);
        div.rhs = Some(rhs);
        let div = nodes.push(div);

        let ev = ConstEval::new(&nodes, &objs, &types);
        assert!(ev.eval(div).is_err());
    }

    #[test]
    fn int_min_div_minus_one_saturates() {
        let mut nodes = NodeArena::new();
        let objs = ObjArena::new();
        let types = TypeArena::new();
        let i = types.well_known("int");
        let lhs = num(&mut nodes, i, i32::MIN as i64);
        let rhs = num(&mut nodes, i, -1);
        let mut div = Node::new(NodeKind::Div, Location::synthetic());
        div.ty = Some(i);
        div.lhs = Some(lhs);
        div.rhs = Some(rhs);
        let div = nodes.push(div);

        let ev = ConstEval::new(&nodes, &objs, &types);
        assert_eq!(ev.eval(div).unwrap(), i32::MIN as i64);
    }

    #[test]
    fn address_of_global_captures_label() {
        let mut nodes = NodeArena::new();
        let mut objs = ObjArena::new();
        let types = TypeArena::new();
        let i = types.well_known("int");
        let obj_ref = objs.push(Obj::new("g", i));

        let mut var = Node::new(NodeKind::Var, Location::synthetic());
        var.ty = Some(i);
        var.extra = NodeExtra { obj: Some(obj_ref), ..Default::default() };
        let var = nodes.push(var);

        let mut addr = Node::new(NodeKind::Addr, Location::synthetic());
        addr.lhs = Some(var);
        let addr = nodes.push(addr);

        let ev = ConstEval::new(&nodes, &objs, &types);
        let mut label = None;
        let v = ev.eval2(addr, &mut label).unwrap();
        assert_eq!(v, 0);
        assert_eq!(label.as_deref(), Some("g"));
    }

    #[test]
    fn adding_offset_to_label_keeps_it_as_the_relocation_base() {
        let mut nodes = NodeArena::new();
        let mut objs = ObjArena::new();
        let types = TypeArena::new();
        let i = types.well_known("int");
        let obj_ref = objs.push(Obj::new("g", i));

        let mut var = Node::new(NodeKind::Var, Location::synthetic());
        var.ty = Some(i);
        var.extra = NodeExtra { obj: Some(obj_ref), ..Default::default() };
        let var = nodes.push(var);
        let mut addr = Node::new(NodeKind::Addr, Location::synthetic());
        addr.lhs = Some(var);
        let addr = nodes.push(addr);

        let offset = num(&mut nodes, i, 4);
        let mut add = Node::new(NodeKind::Add, Location::synthetic());
        add.ty = Some(i);
        add.lhs = Some(addr);
        add.rhs = Some(offset);
        let add = nodes.push(add);

        let ev = ConstEval::new(&nodes, &objs, &types);
        let mut label = None;
        let v = ev.eval2(add, &mut label).unwrap();
        assert_eq!(v, 4);
        assert_eq!(label.as_deref(), Some("g"));
    }
}
