//! Expression/statement lowering and the data section — everything
//! that doesn't belong to function entry/exit, bitfields, or VLAs.
//!
//! Values travel in a fixed place by kind: integers and pointers in `%rax` (truncated to
//! the operand width the type calls for), `float`/`double` in `%xmm0`, `long double` on
//! the x87 stack via `%st(0)`. An array, struct, or union "value" is its address, left in
//! `%rax` exactly as an lvalue address would be — the copy only actually happens at the
//! few places that need one (assignment, a by-value argument, a by-value return).

use std::collections::HashMap;

use crate::ast::{Node, NodeKind, NodeRef, ObjRef, Relocation};
use crate::diagnostics::{CodegenError, CodegenResult};
use crate::isa::x86_64::abi::{AbiClassifier, ArgLocation, EightbyteClass, RegBudget, CALL_STACK_ALIGN};
use crate::isa::x86_64::regs::{GPR_ARG, RAX, RCX, XMM_ARG};
use crate::types::{Kind, Member, TypeRef};

use super::Codegen;

fn round_up(n: i64, align: i64) -> i64 {
    if align <= 1 {
        n
    } else {
        (n + align - 1) / align * align
    }
}

/// Registers a value of `kind` is passed around in, used to decide how to spill/reload
/// it across a subexpression that might clobber registers.
#[derive(Clone, Copy, PartialEq)]
enum ValueClass {
    Gpr,
    Xmm,
    X87,
}

fn value_class(t: &crate::types::Type) -> ValueClass {
    match t.kind {
        Kind::Float | Kind::Double => ValueClass::Xmm,
        Kind::LongDouble => ValueClass::X87,
        _ => ValueClass::Gpr,
    }
}

impl Codegen {
    // ---------------------------------------------------------------- data section

    pub(crate) fn emit_global(&mut self, r: ObjRef) -> CodegenResult<()> {
        let o = self.objs.get(r).clone();
        let t = self.types.get(o.ty).clone();
        let size = t.size.max(0);
        let align = t.align.max(1);

        if !o.flags.is_static {
            self.emit(format!("  .globl \"{}\"", o.name));
        }

        if o.init_data.is_empty() && o.relocations.is_empty() {
            let section = if o.flags.is_tls { ".tbss" } else { ".bss" };
            self.emit(format!("  .section {}", section));
            self.emit(format!("  .align {}", align));
            self.emit(format!("\"{}\":", o.name));
            self.emit(format!("  .zero {}", size.max(1)));
            return Ok(());
        }

        let section = if o.flags.is_tls { ".tdata" } else { ".data" };
        self.emit(format!("  .section {}", section));
        self.emit(format!("  .align {}", align));
        self.emit(format!("\"{}\":", o.name));
        self.emit_init_bytes(&o.init_data, &o.relocations);
        Ok(())
    }

    fn emit_init_bytes(&mut self, data: &[u8], relocs: &[Relocation]) {
        let mut i: i64 = 0;
        let len = data.len() as i64;
        while i < len {
            if let Some(r) = relocs.iter().find(|r| r.offset == i) {
                let sign = if r.addend < 0 { "" } else { "+" };
                self.emit(format!("  .quad \"{}\"{}{}", r.label, sign, r.addend));
                i += 8;
            } else {
                self.emit(format!("  .byte {}", data[i as usize]));
                i += 1;
            }
        }
    }

    // ---------------------------------------------------------------- addresses

    /// Leave the runtime address of the lvalue `r` names in `%rax`. Only `Var`, `Deref`,
    /// and `Member` ever reach here — `declarator::is_lvalue_kind` is exactly these three,
    /// so every other node kind is unreachable as an lvalue operand.
    pub(crate) fn gen_addr(&mut self, r: NodeRef) -> CodegenResult<()> {
        let node = self.nodes.get(r).clone();
        match node.kind {
            NodeKind::Var => {
                self.addr_of_obj(node.extra.obj.expect("Var node missing its Obj"));
            }
            NodeKind::Deref => {
                self.gen_expr(node.lhs.unwrap())?;
            }
            NodeKind::Member => {
                self.gen_addr(node.lhs.unwrap())?;
                let base_ty = self.nodes.get(node.lhs.unwrap()).ty.unwrap();
                let name = node.extra.name.clone().unwrap();
                let m = self.find_member(base_ty, &name);
                if m.offset != 0 {
                    self.emit(format!("  add ${}, %rax", m.offset));
                }
            }
            _ => unreachable!("non-lvalue node reached gen_addr"),
        }
        Ok(())
    }

    fn addr_of_obj(&mut self, obj: ObjRef) {
        let o = self.objs.get(obj).clone();
        if o.flags.is_function || !o.flags.is_local {
            if o.flags.is_tls {
                self.emit("  mov %fs:0, %rax");
                self.emit(format!("  add ${}@tpoff, %rax", o.name));
            } else {
                self.emit(format!("  lea \"{}\"(%rip), %rax", o.name));
            }
            return;
        }
        if self.types.get(o.ty).kind == Kind::Vla {
            // A VLA local's slot holds a pointer to its carved-off storage, not the
            // storage itself (`codegen::vla`).
            self.emit(format!("  mov {}(%rbp), %rax", o.stack_offset));
            return;
        }
        self.emit(format!("  lea {}(%rbp), %rax", o.stack_offset));
    }

    fn find_member(&self, struct_ty: TypeRef, name: &str) -> Member {
        self.types
            .get(struct_ty)
            .members
            .iter()
            .find(|m| m.name.as_deref() == Some(name))
            .cloned()
            .expect("member lookup was already validated by the parser")
    }

    fn bitfield_member(&self, node: &Node) -> Option<Member> {
        if node.kind != NodeKind::Member {
            return None;
        }
        let base_ty = self.nodes.get(node.lhs.unwrap()).ty?;
        let name = node.extra.name.as_deref()?;
        let m = self.find_member(base_ty, name);
        if m.is_bitfield {
            Some(m)
        } else {
            None
        }
    }

    // ---------------------------------------------------------------- loads

    /// Dereference the address already in `%rax` according to `ty`. A struct/union/array
    /// "load" is a no-op: its value already is its address.
    fn load(&mut self, ty: Option<TypeRef>) {
        let Some(ty) = ty else { return };
        let t = self.types.get(ty).clone();
        match t.kind {
            Kind::Array | Kind::Vla | Kind::Struct | Kind::Union | Kind::Func => {}
            Kind::Float => self.emit("  movss (%rax), %xmm0"),
            Kind::Double => self.emit("  movsd (%rax), %xmm0"),
            Kind::LongDouble => self.emit("  fldt (%rax)"),
            Kind::Bool => self.emit("  movzbl (%rax), %eax"),
            Kind::Char | Kind::PChar => {
                self.emit(if t.is_unsigned { "  movzbl (%rax), %eax" } else { "  movsbl (%rax), %eax" });
            }
            Kind::Short => {
                self.emit(if t.is_unsigned { "  movzwl (%rax), %eax" } else { "  movswl (%rax), %eax" });
            }
            Kind::Int | Kind::Enum => self.emit("  mov (%rax), %eax"),
            _ => self.emit("  mov (%rax), %rax"),
        }
    }

    /// Store the value already in `%rax`/`%xmm0`/`%st(0)` through the address in `%r11`.
    fn store(&mut self, ty: Option<TypeRef>) {
        let Some(ty) = ty else { return };
        let t = self.types.get(ty).clone();
        match t.kind {
            Kind::Array | Kind::Vla | Kind::Struct | Kind::Union => self.copy_aggregate_via("%r11", "%rax", t.size),
            Kind::Float => self.emit("  movss %xmm0, (%r11)"),
            Kind::Double => self.emit("  movsd %xmm0, (%r11)"),
            Kind::LongDouble => self.emit("  fstpt (%r11)"),
            Kind::Bool => {
                self.emit("  cmp $0, %al");
                self.emit("  setne %al");
                self.emit("  mov %al, (%r11)");
            }
            _ => {
                let reg = RAX.for_size(t.size.max(1).min(8));
                self.emit(format!("  mov {}, (%r11)", reg));
            }
        }
    }

    // ---------------------------------------------------------------- temp spill helpers

    fn spill_gpr(&mut self) -> i64 {
        let off = self.temp_alloc(8, 8);
        self.emit(format!("  mov %rax, {}(%rbp)", off));
        off
    }

    fn reload_gpr(&mut self, off: i64, reg: &str) {
        self.emit(format!("  mov {}(%rbp), {}", off, reg));
    }

    fn spill_value(&mut self, ty: Option<TypeRef>) -> i64 {
        let class = ty.map(|t| value_class(self.types.get(t))).unwrap_or(ValueClass::Gpr);
        match class {
            ValueClass::Gpr => {
                let off = self.temp_alloc(8, 8);
                self.emit(format!("  mov %rax, {}(%rbp)", off));
                off
            }
            ValueClass::Xmm => {
                let off = self.temp_alloc(8, 8);
                self.emit(format!("  movsd %xmm0, {}(%rbp)", off));
                off
            }
            ValueClass::X87 => {
                let off = self.temp_alloc(16, 16);
                self.emit(format!("  fstpt {}(%rbp)", off));
                off
            }
        }
    }

    fn reload_value(&mut self, off: i64, ty: Option<TypeRef>) {
        let class = ty.map(|t| value_class(self.types.get(t))).unwrap_or(ValueClass::Gpr);
        match class {
            ValueClass::Gpr => self.emit(format!("  mov {}(%rbp), %rax", off)),
            ValueClass::Xmm => self.emit(format!("  movsd {}(%rbp), %xmm0", off)),
            ValueClass::X87 => self.emit(format!("  fldt {}(%rbp)", off)),
        }
    }

    // ---------------------------------------------------------------- aggregate copy

    /// Copy `size` bytes from `[src]` to `[dst]`, widest chunk first: 16-byte `movups`
    /// via `%xmm0`, then descending scalar widths for the remainder.
    fn copy_aggregate_via(&mut self, dst: &str, src: &str, size: i64) {
        let mut off: i64 = 0;
        let mut remaining = size.max(0);
        while remaining >= 16 {
            self.emit(format!("  movups {}({}), %xmm0", off, src));
            self.emit(format!("  movups %xmm0, {}({})", off, dst));
            off += 16;
            remaining -= 16;
        }
        for (width, suffix) in [(8, ""), (4, "l"), (2, "w"), (1, "b")] {
            while remaining >= width {
                let reg = RAX.for_size(width);
                let _ = suffix;
                self.emit(format!("  mov {}({}), {}", off, src, reg));
                self.emit(format!("  mov {}, {}({})", reg, off, dst));
                off += width;
                remaining -= width;
            }
        }
    }

    // ---------------------------------------------------------------- expressions

    pub(crate) fn gen_expr(&mut self, r: NodeRef) -> CodegenResult<()> {
        let node = self.nodes.get(r).clone();
        match node.kind {
            NodeKind::Num => self.gen_num(&node),
            NodeKind::Var | NodeKind::Deref | NodeKind::Member => {
                if let Some(m) = self.bitfield_member(&node) {
                    self.gen_addr(node.lhs.unwrap())?;
                    let base_ty = self.nodes.get(node.lhs.unwrap()).ty.unwrap();
                    let off = self.find_member(base_ty, node.extra.name.as_deref().unwrap()).offset;
                    if off != 0 {
                        self.emit(format!("  add ${}, %rax", off));
                    }
                    self.gen_bitfield_load(&m);
                } else {
                    self.gen_addr(r)?;
                    self.load(node.ty);
                }
            }
            NodeKind::Addr => self.gen_addr(node.lhs.unwrap())?,
            NodeKind::Assign => self.gen_assign(&node)?,
            NodeKind::Cast => self.gen_cast(&node)?,
            NodeKind::Cond => self.gen_cond(&node)?,
            NodeKind::Comma => {
                self.gen_expr(node.lhs.unwrap())?;
                self.gen_expr(node.rhs.unwrap())?;
            }
            NodeKind::Not => {
                self.gen_expr(node.lhs.unwrap())?;
                self.cmp_zero(self.nodes.get(node.lhs.unwrap()).ty);
                self.emit("  sete %al");
                self.emit("  movzbl %al, %eax");
            }
            NodeKind::Neg => self.gen_neg(&node)?,
            NodeKind::BitNot => {
                self.gen_expr(node.lhs.unwrap())?;
                let width = node.ty.map(|t| self.types.get(t).size).unwrap_or(4).max(4);
                self.emit(format!("  not {}", RAX.for_size(width)));
            }
            NodeKind::Pos => self.gen_expr(node.lhs.unwrap())?,
            NodeKind::Add | NodeKind::Sub | NodeKind::Mul | NodeKind::Div | NodeKind::Mod | NodeKind::BitAnd
            | NodeKind::BitOr | NodeKind::BitXor | NodeKind::Shl | NodeKind::Shr | NodeKind::Sar | NodeKind::Eq
            | NodeKind::Ne | NodeKind::Lt | NodeKind::Le | NodeKind::Gt | NodeKind::Ge => self.gen_binary(&node)?,
            NodeKind::LogAnd => self.gen_logand(&node)?,
            NodeKind::LogOr => self.gen_logor(&node)?,
            NodeKind::FunCall => self.gen_call(&node)?,
            NodeKind::StmtExpr => {
                if let Some(body) = node.body {
                    self.gen_stmt(body)?;
                }
            }
            NodeKind::MemZero => self.gen_memzero(&node)?,
            NodeKind::Alloca => {
                self.gen_expr(node.lhs.unwrap())?;
                self.emit("  add $15, %rax");
                self.emit("  and $-16, %rax");
                self.emit("  sub %rax, %rsp");
                self.emit("  mov %rsp, %rax");
            }
            NodeKind::LabelVal => {
                let label = self.user_label(node.extra.label.as_deref().unwrap());
                self.emit(format!("  lea \"{}\"(%rip), %rax", label));
            }
            NodeKind::VaStart => self.gen_va_start(&node)?,
            NodeKind::VaCopy => self.gen_va_copy(&node)?,
            NodeKind::VaArg => self.gen_va_arg(&node)?,
            NodeKind::Null => {}
            NodeKind::Chain => {}
            other => {
                return Err(CodegenError {
                    location: node.loc,
                    message: format!("{:?} cannot appear as an expression", other),
                });
            }
        }
        Ok(())
    }

    fn gen_num(&mut self, node: &Node) {
        let ty = node.ty.map(|t| self.types.get(t).clone());
        match ty.as_ref().map(|t| t.kind) {
            Some(Kind::Float) => {
                let bytes = (node.extra.fval as f32).to_le_bytes().to_vec();
                let label = self.float_label(bytes);
                self.emit(format!("  lea \"{}\"(%rip), %rax", label));
                self.emit("  movss (%rax), %xmm0");
            }
            Some(Kind::Double) => {
                let bytes = node.extra.fval.to_le_bytes().to_vec();
                let label = self.float_label(bytes);
                self.emit(format!("  lea \"{}\"(%rip), %rax", label));
                self.emit("  movsd (%rax), %xmm0");
            }
            Some(Kind::LongDouble) => {
                let bytes = f64_to_x87_extended(node.extra.fval);
                let label = self.float_label(bytes);
                self.emit(format!("  lea \"{}\"(%rip), %rax", label));
                self.emit("  fldt (%rax)");
            }
            _ => {
                let width = ty.as_ref().map(|t| t.size).unwrap_or(8).max(4);
                let reg = RAX.for_size(width);
                self.emit(format!("  mov ${}, {}", node.extra.ival, reg));
            }
        }
    }

    fn gen_neg(&mut self, node: &Node) -> CodegenResult<()> {
        self.gen_expr(node.lhs.unwrap())?;
        match node.ty.map(|t| self.types.get(t).kind) {
            Some(Kind::Float) => self.emit("  pxor %xmm1, %xmm1\n  subss %xmm0, %xmm1\n  movaps %xmm1, %xmm0"),
            Some(Kind::Double) => self.emit("  pxor %xmm1, %xmm1\n  subsd %xmm0, %xmm1\n  movaps %xmm1, %xmm0"),
            Some(Kind::LongDouble) => self.emit("  fchs"),
            _ => {
                let width = node.ty.map(|t| self.types.get(t).size).unwrap_or(4).max(4);
                self.emit(format!("  neg {}", RAX.for_size(width)));
            }
        }
        Ok(())
    }

    /// Compare the value in `%rax`/`%xmm0`/`%st(0)` against zero, leaving the flags set
    /// for a `sete`/`setne` to read (used by `Not`, `If`, `&&`/`||`, loop conditions).
    fn cmp_zero(&mut self, ty: Option<TypeRef>) {
        match ty.map(|t| self.types.get(t).kind) {
            Some(Kind::Float) => {
                self.emit("  pxor %xmm1, %xmm1");
                self.emit("  ucomiss %xmm1, %xmm0");
            }
            Some(Kind::Double) => {
                self.emit("  pxor %xmm1, %xmm1");
                self.emit("  ucomisd %xmm1, %xmm0");
            }
            Some(Kind::LongDouble) => {
                self.emit("  fldz");
                self.emit("  fucomip %st(1), %st");
                self.emit("  fstp %st(0)");
            }
            _ => {
                let width = ty.map(|t| self.types.get(t).size).unwrap_or(4).max(4);
                self.emit(format!("  cmp $0, {}", RAX.for_size(width)));
            }
        }
    }

    fn gen_cond(&mut self, node: &Node) -> CodegenResult<()> {
        self.gen_expr(node.cond.unwrap())?;
        self.cmp_zero(self.nodes.get(node.cond.unwrap()).ty);
        let else_label = self.ctx.new_label("else");
        let end_label = self.ctx.new_label("end");
        self.emit(format!("  je \"{}\"", else_label));
        self.gen_expr(node.then.unwrap())?;
        self.emit(format!("  jmp \"{}\"", end_label));
        self.emit(format!("\"{}\":", else_label));
        self.gen_expr(node.els.unwrap())?;
        self.emit(format!("\"{}\":", end_label));
        Ok(())
    }

    fn gen_logand(&mut self, node: &Node) -> CodegenResult<()> {
        let false_label = self.ctx.new_label("false");
        let end_label = self.ctx.new_label("end");
        self.gen_expr(node.lhs.unwrap())?;
        self.cmp_zero(self.nodes.get(node.lhs.unwrap()).ty);
        self.emit(format!("  je \"{}\"", false_label));
        self.gen_expr(node.rhs.unwrap())?;
        self.cmp_zero(self.nodes.get(node.rhs.unwrap()).ty);
        self.emit(format!("  je \"{}\"", false_label));
        self.emit("  mov $1, %eax");
        self.emit(format!("  jmp \"{}\"", end_label));
        self.emit(format!("\"{}\":", false_label));
        self.emit("  mov $0, %eax");
        self.emit(format!("\"{}\":", end_label));
        Ok(())
    }

    fn gen_logor(&mut self, node: &Node) -> CodegenResult<()> {
        let true_label = self.ctx.new_label("true");
        let end_label = self.ctx.new_label("end");
        self.gen_expr(node.lhs.unwrap())?;
        self.cmp_zero(self.nodes.get(node.lhs.unwrap()).ty);
        self.emit(format!("  jne \"{}\"", true_label));
        self.gen_expr(node.rhs.unwrap())?;
        self.cmp_zero(self.nodes.get(node.rhs.unwrap()).ty);
        self.emit(format!("  jne \"{}\"", true_label));
        self.emit("  mov $0, %eax");
        self.emit(format!("  jmp \"{}\"", end_label));
        self.emit(format!("\"{}\":", true_label));
        self.emit("  mov $1, %eax");
        self.emit(format!("\"{}\":", end_label));
        Ok(())
    }

    fn gen_assign(&mut self, node: &Node) -> CodegenResult<()> {
        let lhs = node.lhs.unwrap();
        let rhs = node.rhs.unwrap();
        let lhs_ty = self.nodes.get(lhs).ty;
        let rhs_ty = self.nodes.get(rhs).ty;

        if let Some(m) = self.bitfield_member(&self.nodes.get(lhs).clone()) {
            let lhs_node = self.nodes.get(lhs).clone();
            self.gen_addr(lhs_node.lhs.unwrap())?;
            let base_ty = self.nodes.get(lhs_node.lhs.unwrap()).ty.unwrap();
            let off = self.find_member(base_ty, lhs_node.extra.name.as_deref().unwrap()).offset;
            if off != 0 {
                self.emit(format!("  add ${}, %rax", off));
            }
            let addr_slot = self.spill_gpr();
            if let Some(op) = node.extra.compound_op {
                self.emit("  mov %rax, %r11");
                self.gen_bitfield_load(&m);
                let old_slot = self.spill_value(lhs_ty);
                self.gen_expr(rhs)?;
                self.apply_compound_op(op, old_slot, lhs_ty, rhs_ty);
            } else {
                self.gen_expr(rhs)?;
                self.convert(rhs_ty, lhs_ty);
            }
            self.reload_gpr(addr_slot, "%r11");
            self.gen_bitfield_store(&m);
            return Ok(());
        }

        self.gen_addr(lhs)?;
        let addr_slot = self.spill_gpr();

        if let Some(op) = node.extra.compound_op {
            self.reload_gpr(addr_slot, "%rax");
            self.load(lhs_ty);
            let old_slot = self.spill_value(lhs_ty);
            self.gen_expr(rhs)?;
            self.apply_compound_op(op, old_slot, lhs_ty, rhs_ty);
            let new_slot = self.spill_value(lhs_ty);
            self.reload_gpr(addr_slot, "%r11");
            self.reload_value(new_slot, lhs_ty);
            self.store(lhs_ty);
            if node.extra.is_postfix {
                self.reload_value(old_slot, lhs_ty);
            }
        } else {
            self.gen_expr(rhs)?;
            self.convert(rhs_ty, lhs_ty);
            let value_slot = self.spill_value(lhs_ty);
            self.reload_gpr(addr_slot, "%r11");
            self.reload_value(value_slot, lhs_ty);
            self.store(lhs_ty);
        }
        Ok(())
    }

    /// `lhs op= rhs` / `lhs++` / `lhs--`: combine the already-loaded old value (at
    /// `old_slot`, typed `lhs_ty`) with the freshly evaluated `%rax`/`%xmm0` (typed
    /// `rhs_ty`) via the usual arithmetic conversions, leaving the result converted
    /// back to `lhs_ty` in `%rax`/`%xmm0`.
    fn apply_compound_op(&mut self, op: &str, old_slot: i64, lhs_ty: Option<TypeRef>, rhs_ty: Option<TypeRef>) {
        let (Some(lt), Some(rt)) = (lhs_ty, rhs_ty) else {
            return;
        };
        let common = self.types.usual_arith_conv(lt, rt);
        self.convert(Some(rt), Some(common));
        let rhs_slot = self.spill_value(Some(common));
        self.reload_value(old_slot, lhs_ty);
        self.convert(lhs_ty, Some(common));
        let lhs_common_slot = self.spill_value(Some(common));
        self.reload_value(rhs_slot, Some(common));
        self.emit_binary_op(op, lhs_common_slot, Some(common));
        self.convert(Some(common), lhs_ty);
    }

    fn gen_cast(&mut self, node: &Node) -> CodegenResult<()> {
        let lhs = node.lhs.unwrap();
        let from = self.nodes.get(lhs).ty;
        self.gen_expr(lhs)?;
        self.convert(from, node.ty);
        Ok(())
    }

    /// Convert the value in `%rax`/`%xmm0`/`%st(0)` from `from` to `to`'s representation.
    fn convert(&mut self, from: Option<TypeRef>, to: Option<TypeRef>) {
        let (Some(from), Some(to)) = (from, to) else {
            return;
        };
        if from == to {
            return;
        }
        let ft = self.types.get(from).clone();
        let tt = self.types.get(to).clone();
        if ft.is_aggregate() || tt.is_aggregate() || ft.is_ptr_like() && tt.is_ptr_like() {
            return;
        }
        match (ft.kind, tt.kind) {
            (Kind::Float, Kind::Double) => self.emit("  cvtss2sd %xmm0, %xmm0"),
            (Kind::Double, Kind::Float) => self.emit("  cvtsd2ss %xmm0, %xmm0"),
            (Kind::Float, Kind::LongDouble) => {
                self.emit("  sub $16, %rsp");
                self.emit("  movss %xmm0, (%rsp)");
                self.emit("  flds (%rsp)");
                self.emit("  add $16, %rsp");
            }
            (Kind::Double, Kind::LongDouble) => {
                self.emit("  sub $16, %rsp");
                self.emit("  movsd %xmm0, (%rsp)");
                self.emit("  fldl (%rsp)");
                self.emit("  add $16, %rsp");
            }
            (Kind::LongDouble, Kind::Float) => {
                self.emit("  sub $16, %rsp");
                self.emit("  fstps (%rsp)");
                self.emit("  movss (%rsp), %xmm0");
                self.emit("  add $16, %rsp");
            }
            (Kind::LongDouble, Kind::Double) => {
                self.emit("  sub $16, %rsp");
                self.emit("  fstpl (%rsp)");
                self.emit("  movsd (%rsp), %xmm0");
                self.emit("  add $16, %rsp");
            }
            (Kind::Float, _) if tt.is_integer() => {
                self.emit(if tt.size > 4 { "  cvttss2si %xmm0, %rax" } else { "  cvttss2si %xmm0, %eax" });
            }
            (Kind::Double, _) if tt.is_integer() => {
                self.emit(if tt.size > 4 { "  cvttsd2si %xmm0, %rax" } else { "  cvttsd2si %xmm0, %eax" });
            }
            (Kind::LongDouble, _) if tt.is_integer() => {
                self.emit("  sub $8, %rsp");
                self.emit("  fisttpq (%rsp)");
                self.emit("  mov (%rsp), %rax");
                self.emit("  add $8, %rsp");
            }
            (_, Kind::Float) if ft.is_integer() => {
                self.emit(if ft.size > 4 { "  cvtsi2ssq %rax, %xmm0" } else { "  cvtsi2ssl %eax, %xmm0" });
            }
            (_, Kind::Double) if ft.is_integer() => {
                self.emit(if ft.size > 4 { "  cvtsi2sdq %rax, %xmm0" } else { "  cvtsi2sdl %eax, %xmm0" });
            }
            (_, Kind::LongDouble) if ft.is_integer() => {
                self.emit("  sub $8, %rsp");
                self.emit("  mov %rax, (%rsp)");
                self.emit("  fildq (%rsp)");
                self.emit("  add $8, %rsp");
            }
            (Kind::Bool, _) => {
                self.emit("  cmp $0, %al");
                self.emit("  setne %al");
                self.emit("  movzbl %al, %eax");
            }
            _ if tt.kind == Kind::Bool => {
                self.cmp_zero(Some(from));
                self.emit("  setne %al");
                self.emit("  movzbl %al, %eax");
            }
            _ => self.truncate_or_extend(&tt),
        }
    }

    fn truncate_or_extend(&mut self, to: &crate::types::Type) {
        match to.size {
            1 => self.emit(if to.is_unsigned { "  movzbl %al, %eax" } else { "  movsbl %al, %eax" }),
            2 => self.emit(if to.is_unsigned { "  movzwl %ax, %eax" } else { "  movswl %ax, %eax" }),
            4 => self.emit("  mov %eax, %eax"),
            _ => self.emit(if to.is_unsigned { "  mov %eax, %eax" } else { "  movslq %eax, %rax" }),
        }
    }

    fn gen_binary(&mut self, node: &Node) -> CodegenResult<()> {
        let lhs = node.lhs.unwrap();
        let rhs = node.rhs.unwrap();
        let lty = self.nodes.get(lhs).ty;
        self.gen_expr(lhs)?;
        let lhs_slot = self.spill_value(lty);
        self.gen_expr(rhs)?;
        self.emit_binary_op_kind(node.kind, lhs_slot, lty)
    }

    fn emit_binary_op_kind(&mut self, kind: NodeKind, lhs_slot: i64, lty: Option<TypeRef>) -> CodegenResult<()> {
        let op = match kind {
            NodeKind::Add => "+",
            NodeKind::Sub => "-",
            NodeKind::Mul => "*",
            NodeKind::Div => "/",
            NodeKind::Mod => "%",
            NodeKind::BitAnd => "&",
            NodeKind::BitOr => "|",
            NodeKind::BitXor => "^",
            NodeKind::Shl => "<<",
            NodeKind::Shr => ">>u",
            NodeKind::Sar => ">>s",
            NodeKind::Eq => "==",
            NodeKind::Ne => "!=",
            NodeKind::Lt => "<",
            NodeKind::Le => "<=",
            NodeKind::Gt => ">",
            NodeKind::Ge => ">=",
            _ => unreachable!(),
        };
        self.emit_binary_op(op, lhs_slot, lty);
        Ok(())
    }

    /// Apply `op` to the value at `lhs_slot` (typed `ty`) and the value in
    /// `%rax`/`%xmm0`/`%st(0)`, leaving the result in the same place. Comparisons
    /// always produce a 32-bit `0`/`1` in `%eax` regardless of operand type.
    fn emit_binary_op(&mut self, op: &str, lhs_slot: i64, ty: Option<TypeRef>) {
        let t = ty.map(|t| self.types.get(t).clone());
        match t.as_ref().map(|t| t.kind) {
            Some(Kind::Float) => {
                // Spill slots for `float` are 8 bytes wide (shared with `double`'s path),
                // but `movss`'s upper-bits-preserved semantics only ever look at the low
                // 32, so reloading through `movsd` is harmless here.
                self.emit("  movss %xmm0, %xmm1");
                self.emit(format!("  movsd {}(%rbp), %xmm0", lhs_slot));
                match op {
                    "+" => self.emit("  addss %xmm1, %xmm0"),
                    "-" => self.emit("  subss %xmm1, %xmm0"),
                    "*" => self.emit("  mulss %xmm1, %xmm0"),
                    "/" => self.emit("  divss %xmm1, %xmm0"),
                    _ => self.emit_fp_compare(op, "ss"),
                }
            }
            Some(Kind::Double) => {
                self.emit("  movsd %xmm0, %xmm1");
                self.emit(format!("  movsd {}(%rbp), %xmm0", lhs_slot));
                match op {
                    "+" => self.emit("  addsd %xmm1, %xmm0"),
                    "-" => self.emit("  subsd %xmm1, %xmm0"),
                    "*" => self.emit("  mulsd %xmm1, %xmm0"),
                    "/" => self.emit("  divsd %xmm1, %xmm0"),
                    _ => self.emit_fp_compare(op, "sd"),
                }
            }
            Some(Kind::LongDouble) => {
                self.emit(format!("  fldt {}(%rbp)", lhs_slot));
                match op {
                    "+" => self.emit("  faddp"),
                    "-" => self.emit("  fsubp"),
                    "*" => self.emit("  fmulp"),
                    "/" => self.emit("  fdivp"),
                    _ => {
                        self.emit("  fucomip %st(1), %st");
                        self.emit("  fstp %st(0)");
                        self.emit_set_from_flags(op);
                    }
                }
            }
            _ => self.emit_int_binary(op, lhs_slot, t.as_ref()),
        }
    }

    fn emit_fp_compare(&mut self, op: &str, suffix: &str) {
        self.emit(format!("  ucomi{} %xmm1, %xmm0", suffix));
        self.emit_set_from_flags(op);
    }

    fn emit_set_from_flags(&mut self, op: &str) {
        let setcc = match op {
            "==" => "sete",
            "!=" => "setne",
            "<" => "setb",
            "<=" => "setbe",
            ">" => "seta",
            ">=" => "setae",
            _ => unreachable!("{op} is not a comparison"),
        };
        self.emit(format!("  {} %al", setcc));
        self.emit("  movzbl %al, %eax");
    }

    fn emit_int_binary(&mut self, op: &str, lhs_slot: i64, t: Option<&crate::types::Type>) {
        let size = t.map(|t| t.size).unwrap_or(4).max(4);
        let unsigned = t.map(|t| t.is_unsigned).unwrap_or(false);
        let acc = RAX.for_size(size);
        let counter = RCX.for_size(size);
        self.emit("  mov %rax, %rcx");
        self.emit(format!("  mov {}(%rbp), {}", lhs_slot, acc));
        match op {
            "+" => self.emit(format!("  add {}, {}", counter, acc)),
            "-" => self.emit(format!("  sub {}, {}", counter, acc)),
            "*" => self.emit(format!("  imul {}, {}", counter, acc)),
            "&" => self.emit(format!("  and {}, {}", counter, acc)),
            "|" => self.emit(format!("  or {}, {}", counter, acc)),
            "^" => self.emit(format!("  xor {}, {}", counter, acc)),
            "/" | "%" => self.emit_divmod(op, size, unsigned),
            "<<" => self.emit(format!("  shl %cl, {}", acc)),
            ">>u" => self.emit(format!("  shr %cl, {}", acc)),
            ">>s" => self.emit(format!("  sar %cl, {}", acc)),
            "==" | "!=" | "<" | "<=" | ">" | ">=" => {
                self.emit(format!("  cmp {}, {}", counter, acc));
                let setcc = match (op, unsigned) {
                    ("==", _) => "sete",
                    ("!=", _) => "setne",
                    ("<", false) => "setl",
                    ("<", true) => "setb",
                    ("<=", false) => "setle",
                    ("<=", true) => "setbe",
                    (">", false) => "setg",
                    (">", true) => "seta",
                    (">=", false) => "setge",
                    (">=", true) => "setae",
                    _ => unreachable!(),
                };
                self.emit(format!("  {} %al", setcc));
                self.emit("  movzbl %al, %eax");
            }
            _ => unreachable!("unknown integer operator {op}"),
        }
    }

    /// Integer `/`/`%`. Divides `%rdx:%rax` (or `%edx:%eax`) by the divisor stashed in
    /// `%rcx`, result left in `%rax`/`%eax` for `/`, `%rdx`/`%edx` moved there for `%`.
    fn emit_divmod(&mut self, op: &str, size: i64, unsigned: bool) {
        if size == 8 {
            if unsigned {
                self.emit("  mov $0, %rdx");
                self.emit("  div %rcx");
            } else {
                self.emit("  cqto");
                self.emit("  idiv %rcx");
            }
            if op == "%" {
                self.emit("  mov %rdx, %rax");
            }
        } else {
            if unsigned {
                self.emit("  mov $0, %edx");
                self.emit("  div %ecx");
            } else {
                self.emit("  cltd");
                self.emit("  idiv %ecx");
            }
            if op == "%" {
                self.emit("  mov %edx, %eax");
            }
        }
    }

    fn gen_memzero(&mut self, node: &Node) -> CodegenResult<()> {
        let obj = node.extra.obj.expect("MemZero node missing its Obj");
        self.addr_of_obj(obj);
        let size = node.ty.map(|t| self.types.get(t).size).unwrap_or(0).max(0);
        self.emit("  mov %rax, %r11");
        self.emit(format!("  mov ${}, %r9", size));
        let loop_label = self.ctx.new_label("zero");
        let end_label = self.ctx.new_label("end");
        self.emit(format!("\"{}\":", loop_label));
        self.emit("  cmp $0, %r9");
        self.emit(format!("  je \"{}\"", end_label));
        self.emit("  movb $0, (%r11)");
        self.emit("  inc %r11");
        self.emit("  dec %r9");
        self.emit(format!("  jmp \"{}\"", loop_label));
        self.emit(format!("\"{}\":", end_label));
        Ok(())
    }

    /// Mangle a user `goto`/label-as-value/label-definition name with the enclosing
    /// function, since the source identifier alone isn't unique across the translation
    /// unit. Synthetic labels (`.L.break.3`, ...) never pass through here.
    fn user_label(&self, name: &str) -> String {
        let fname = self.ctx.current_fn.map(|f| self.objs.get(f).name.clone()).unwrap_or_default();
        format!("{}.L_{}", fname, name)
    }

    /// Before jumping to `label` (a `break`/`continue` target or a user `goto`), restore
    /// `%rsp` to the VLA depth the label itself was declared at, if that's shallower than
    /// the depth active right here — the label's own enclosing scope already released
    /// anything deeper the normal way, so jumping there must do the same.
    fn restore_vla_frames_for_jump(&mut self, label: &str) {
        let Some(target_depth) = self.ctx.label_vla_depth(label) else { return };
        let current = self.ctx.vla_frame_count();
        if target_depth < current {
            let restore = self.ctx.vla_slot_at(target_depth).unwrap().to_string();
            self.emit(format!("  mov {}, %rsp", restore));
        }
    }

    // ---------------------------------------------------------------- statements

    pub(crate) fn gen_stmt(&mut self, r: NodeRef) -> CodegenResult<()> {
        let node = self.nodes.get(r).clone();
        match node.kind {
            NodeKind::Block => {
                let vla_frames_before = self.ctx.vla_frame_count();
                let mut cur = node.body;
                while let Some(c) = cur {
                    self.gen_stmt(c)?;
                    cur = self.nodes.get(c).next;
                }
                // Any VLA declared directly in this block goes out of scope here on the
                // normal fall-through path (a loop body reaching its `continue_label` this
                // way is the common case); `break`/`continue`/`goto` out of the block are
                // handled separately below, since they skip this point entirely.
                if self.ctx.vla_frame_count() > vla_frames_before {
                    let restore = self.ctx.vla_slot_at(vla_frames_before).unwrap().to_string();
                    self.emit(format!("  mov {}, %rsp", restore));
                    while self.ctx.vla_frame_count() > vla_frames_before {
                        self.ctx.pop_vla_frame();
                    }
                }
            }
            NodeKind::If => self.gen_if(&node)?,
            NodeKind::For => self.gen_for(&node)?,
            NodeKind::Do => self.gen_do(&node)?,
            NodeKind::Switch => self.gen_switch(&node)?,
            NodeKind::Case => {
                let label = node.extra.label.clone().unwrap();
                self.emit(format!("\"{}\":", label));
                if let Some(body) = node.body {
                    self.gen_stmt(body)?;
                }
            }
            NodeKind::Return => self.gen_return(&node)?,
            NodeKind::Goto => {
                let label = node.extra.label.clone().unwrap();
                self.restore_vla_frames_for_jump(&label);
                if label.starts_with(".L.") {
                    self.emit(format!("  jmp \"{}\"", label));
                } else {
                    let mangled = self.user_label(&label);
                    self.emit(format!("  jmp \"{}\"", mangled));
                }
            }
            NodeKind::GotoExpr => {
                self.gen_expr(node.lhs.unwrap())?;
                // The jump target isn't known statically, so unwind every active VLA
                // frame rather than trying to look one up.
                if self.ctx.vla_frame_count() > 0 {
                    let restore = self.ctx.vla_slot_at(0).unwrap().to_string();
                    self.emit(format!("  mov {}, %rsp", restore));
                }
                self.emit("  jmp *%rax");
            }
            NodeKind::Label => {
                let mangled = self.user_label(node.extra.label.as_deref().unwrap());
                self.emit(format!("\"{}\":", mangled));
                if let Some(body) = node.body {
                    self.gen_stmt(body)?;
                }
            }
            NodeKind::ExprStmt => {
                if let Some(e) = node.lhs {
                    self.gen_expr(e)?;
                }
            }
            NodeKind::Asm => {
                self.emit(node.extra.name.clone().unwrap_or_default());
            }
            NodeKind::Null => {}
            NodeKind::VlaDecl => {
                let obj = node.extra.obj.expect("VlaDecl missing its Obj");
                self.gen_vla_decl(obj)?;
            }
            other => {
                return Err(CodegenError {
                    location: node.loc,
                    message: format!("{:?} cannot appear as a statement", other),
                });
            }
        }
        Ok(())
    }

    fn gen_if(&mut self, node: &Node) -> CodegenResult<()> {
        self.gen_expr(node.cond.unwrap())?;
        self.cmp_zero(self.nodes.get(node.cond.unwrap()).ty);
        let else_label = self.ctx.new_label("else");
        let end_label = self.ctx.new_label("end");
        self.emit(format!("  je \"{}\"", else_label));
        self.gen_stmt(node.then.unwrap())?;
        self.emit(format!("  jmp \"{}\"", end_label));
        self.emit(format!("\"{}\":", else_label));
        if let Some(els) = node.els {
            self.gen_stmt(els)?;
        }
        self.emit(format!("\"{}\":", end_label));
        Ok(())
    }

    fn gen_for(&mut self, node: &Node) -> CodegenResult<()> {
        let mut cur = node.init;
        while let Some(c) = cur {
            self.gen_stmt(c)?;
            cur = self.nodes.get(c).next;
        }
        let begin_label = self.ctx.new_label("begin");
        let break_label = node.brk_label.clone().unwrap();
        let continue_label = node.cont_label.clone().unwrap();
        self.emit(format!("\"{}\":", begin_label));
        if let Some(cond) = node.cond {
            self.gen_expr(cond)?;
            self.cmp_zero(self.nodes.get(cond).ty);
            self.emit(format!("  je \"{}\"", break_label));
        }
        self.gen_stmt(node.body.unwrap())?;
        self.emit(format!("\"{}\":", continue_label));
        if let Some(inc) = node.inc {
            self.gen_expr(inc)?;
        }
        self.emit(format!("  jmp \"{}\"", begin_label));
        self.emit(format!("\"{}\":", break_label));
        Ok(())
    }

    fn gen_do(&mut self, node: &Node) -> CodegenResult<()> {
        let begin_label = self.ctx.new_label("begin");
        let break_label = node.brk_label.clone().unwrap();
        let continue_label = node.cont_label.clone().unwrap();
        self.emit(format!("\"{}\":", begin_label));
        self.gen_stmt(node.body.unwrap())?;
        self.emit(format!("\"{}\":", continue_label));
        let cond = node.cond.unwrap();
        self.gen_expr(cond)?;
        self.cmp_zero(self.nodes.get(cond).ty);
        self.emit(format!("  jne \"{}\"", begin_label));
        self.emit(format!("\"{}\":", break_label));
        Ok(())
    }

    fn gen_switch(&mut self, node: &Node) -> CodegenResult<()> {
        self.gen_expr(node.cond.unwrap())?;
        let cond_ty = self.nodes.get(node.cond.unwrap()).ty;
        let width = cond_ty.map(|t| self.types.get(t).size).unwrap_or(4).max(4);

        let switch_label = node.extra.label.clone();
        let mut cases = Vec::new();
        let mut default_label = None;
        self.collect_cases(node.body, switch_label.as_deref(), &mut cases, &mut default_label);

        let acc = RAX.for_size(width);
        let scratch = crate::isa::x86_64::regs::R11.for_size(width);
        // Subtracting `lo` first turns the inclusive range check into a single unsigned
        // `jbe`, regardless of whether the switch's own controlling type is signed.
        for (lo, hi, label) in &cases {
            self.emit(format!("  mov {}, {}", acc, scratch));
            self.emit(format!("  sub ${}, {}", lo, scratch));
            let span = (*hi - *lo).max(0);
            self.emit(format!("  cmp ${}, {}", span, scratch));
            self.emit(format!("  jbe \"{}\"", label));
        }
        let break_label = node.brk_label.clone().unwrap();
        if let Some(def) = &default_label {
            self.emit(format!("  jmp \"{}\"", def));
        } else {
            self.emit(format!("  jmp \"{}\"", break_label));
        }
        if let Some(body) = node.body {
            self.gen_stmt(body)?;
        }
        self.emit(format!("\"{}\":", break_label));
        Ok(())
    }

    /// Recursively rescan a switch's body for `Case` nodes, stopping at any nested
    /// `Switch` (which owns its own cases). `SwitchFrame.cases`, collected while
    /// parsing, goes unused here by design — codegen rebuilds this list from the tree
    /// itself rather than threading it through.
    fn collect_cases(
        &self,
        start: Option<NodeRef>,
        switch_label: Option<&str>,
        out: &mut Vec<(i64, i64, String)>,
        default: &mut Option<String>,
    ) {
        let mut cur = start;
        while let Some(r) = cur {
            let n = self.nodes.get(r);
            match n.kind {
                NodeKind::Case => {
                    let is_default = switch_label.is_some() && n.extra.label.as_deref() == switch_label;
                    if is_default {
                        *default = n.extra.label.clone();
                    } else {
                        out.push((n.extra.case_lo, n.extra.case_hi, n.extra.label.clone().unwrap()));
                    }
                    self.collect_cases(n.body, switch_label, out, default);
                }
                NodeKind::Block => self.collect_cases(n.body, switch_label, out, default),
                NodeKind::If => {
                    self.collect_cases(n.then, switch_label, out, default);
                    if let Some(e) = n.els {
                        self.collect_cases(Some(e), switch_label, out, default);
                    }
                }
                NodeKind::For | NodeKind::Do | NodeKind::Label => {
                    self.collect_cases(n.body, switch_label, out, default);
                }
                NodeKind::Switch => {}
                _ => {}
            }
            cur = n.next;
        }
    }

    /// Deep walk of a function body collecting every jump target's (label's) VLA nesting
    /// depth: user `name:` labels carry their own depth directly; a loop's or `switch`'s
    /// break/continue labels take the depth recorded on the construct itself, since both
    /// sit just outside whatever the body scope nests. Run once per function before its
    /// body is emitted, so `Goto`/`GotoExpr` can restore `%rsp` to the right depth instead
    /// of leaving that to the epilogue.
    pub(crate) fn collect_label_depths(&self, start: Option<NodeRef>, out: &mut HashMap<String, usize>) {
        let mut cur = start;
        while let Some(r) = cur {
            let n = self.nodes.get(r);
            match n.kind {
                NodeKind::Block => self.collect_label_depths(n.body, out),
                NodeKind::If => {
                    self.collect_label_depths(n.then, out);
                    if let Some(e) = n.els {
                        self.collect_label_depths(Some(e), out);
                    }
                }
                NodeKind::For | NodeKind::Do => {
                    out.insert(n.brk_label.clone().unwrap(), n.extra.vla_depth);
                    out.insert(n.cont_label.clone().unwrap(), n.extra.vla_depth);
                    self.collect_label_depths(n.body, out);
                }
                NodeKind::Switch => {
                    out.insert(n.brk_label.clone().unwrap(), n.extra.vla_depth);
                    self.collect_label_depths(n.body, out);
                }
                NodeKind::Case => self.collect_label_depths(n.body, out),
                NodeKind::Label => {
                    out.insert(n.extra.label.clone().unwrap(), n.extra.vla_depth);
                    self.collect_label_depths(n.body, out);
                }
                _ => {}
            }
            cur = n.next;
        }
    }

    fn gen_return(&mut self, node: &Node) -> CodegenResult<()> {
        if let Some(val) = node.lhs {
            let ty = self.nodes.get(val).ty;
            self.gen_expr(val)?;
            self.gen_return_value(ty);
        }
        let label = self.return_label.clone();
        self.emit(format!("  jmp \"{}\"", label));
        Ok(())
    }

    /// Load the function's return registers. A `Struct`/`Union` result `<= 16` bytes is
    /// assembled eightbyte-by-eightbyte out of the address left in `%rax`; one `> 16`
    /// bytes is copied through the hidden pointer stashed at function entry
    /// (`codegen::prologue`), and the hidden pointer itself is returned in `%rax` too,
    /// per the System V ABI.
    fn gen_return_value(&mut self, ty: Option<TypeRef>) {
        let Some(ty) = ty else { return };
        let t = self.types.get(ty).clone();
        if !t.is_aggregate() {
            return;
        }
        let classifier = AbiClassifier::new(&self.types);
        if classifier.return_needs_hidden_pointer(ty) {
            let slot = self.hidden_ret_slot.expect("hidden return slot missing for large aggregate return");
            self.emit("  mov %rax, %r11");
            self.emit(format!("  mov {}(%rbp), %rax", slot));
            self.copy_aggregate_via("%rax", "%r11", t.size);
            return;
        }
        match classifier.classify(ty) {
            ArgLocation::Aggregate(classes) => {
                self.emit("  mov %rax, %r11");
                let mut gpr = [crate::isa::x86_64::regs::RAX, crate::isa::x86_64::regs::RDX].into_iter();
                let mut xmm = ["%xmm0", "%xmm1"].into_iter();
                for (i, class) in classes.iter().enumerate() {
                    let off = (i as i64) * 8;
                    match class {
                        EightbyteClass::Integer => {
                            let reg = gpr.next().unwrap();
                            self.emit(format!("  mov {}(%r11), {}", off, reg.q));
                        }
                        EightbyteClass::Sse => {
                            let reg = xmm.next().unwrap();
                            self.emit(format!("  movsd {}(%r11), {}", off, reg));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------- calls

    fn gen_call(&mut self, node: &Node) -> CodegenResult<()> {
        let callee = node.lhs.unwrap();
        let classifier = AbiClassifier::new(&self.types);
        let ret_ty = node.ty;
        let hidden_return = ret_ty.map(|t| classifier.return_needs_hidden_pointer(t)).unwrap_or(false);

        // Evaluate every argument first and spill it, left-to-right, so evaluating one
        // argument can never clobber a register already holding a previous one.
        let mut arg_slots = Vec::new();
        for &arg in &node.args {
            let aty = self.nodes.get(arg).ty;
            self.gen_expr(arg)?;
            let is_aggregate = aty.map(|t| self.types.get(t).is_aggregate()).unwrap_or(false);
            if is_aggregate {
                let size = aty.map(|t| self.types.get(t).size).unwrap_or(0).max(0);
                let align = aty.map(|t| self.types.get(t).align).unwrap_or(8).max(1);
                let dest = self.temp_alloc(size.max(1), align);
                self.emit("  mov %rax, %r11");
                self.copy_aggregate_rbp_dest(dest, "%r11", size);
                arg_slots.push((dest, aty, true));
            } else {
                let slot = self.spill_value(aty);
                arg_slots.push((slot, aty, false));
            }
        }

        let mut hidden_slot = None;
        if hidden_return {
            let rty = ret_ty.unwrap();
            let size = self.types.get(rty).size.max(0);
            let align = self.types.get(rty).align.max(1);
            hidden_slot = Some(self.temp_alloc(size.max(1), align));
        }

        let mut budget = RegBudget::full();
        let mut gpr_iter = GPR_ARG.iter();
        let mut xmm_iter = XMM_ARG.iter();
        let mut stack_args: Vec<(i64, Option<TypeRef>, bool)> = Vec::new();
        let mut reg_loads: Vec<String> = Vec::new();

        if let Some(slot) = hidden_slot {
            let reg = gpr_iter.next().unwrap();
            budget.gpr_left -= 1;
            reg_loads.push(format!("  lea {}(%rbp), {}", slot, reg.q));
        }

        for (slot, aty, is_aggregate) in &arg_slots {
            let loc = aty.map(|t| classifier.classify(t)).unwrap_or(ArgLocation::Gpr);
            let fits = budget.reserve(&loc);
            if !fits {
                stack_args.push((*slot, *aty, *is_aggregate));
                continue;
            }
            match loc {
                ArgLocation::Gpr => {
                    let reg = gpr_iter.next().unwrap();
                    reg_loads.push(format!("  mov {}(%rbp), {}", slot, reg.q));
                }
                ArgLocation::Xmm => {
                    let reg = xmm_iter.next().unwrap();
                    reg_loads.push(format!("  movsd {}(%rbp), {}", slot, reg));
                }
                ArgLocation::Aggregate(classes) => {
                    for (i, class) in classes.iter().enumerate() {
                        let off = slot + (i as i64) * 8;
                        match class {
                            EightbyteClass::Integer => {
                                let reg = gpr_iter.next().unwrap();
                                reg_loads.push(format!("  mov {}(%rbp), {}", off, reg.q));
                            }
                            EightbyteClass::Sse => {
                                let reg = xmm_iter.next().unwrap();
                                reg_loads.push(format!("  movsd {}(%rbp), {}", off, reg));
                            }
                        }
                    }
                }
                ArgLocation::Stack => {
                    stack_args.push((*slot, *aty, *is_aggregate));
                }
            }
        }

        let stack_bytes = round_up(stack_args.len() as i64 * 8, CALL_STACK_ALIGN);
        if stack_bytes > 0 {
            self.emit(format!("  sub ${}, %rsp", stack_bytes));
            for (i, (slot, _aty, _agg)) in stack_args.iter().enumerate() {
                self.emit(format!("  mov {}(%rbp), %r11", slot));
                self.emit(format!("  mov %r11, {}(%rsp)", (i as i64) * 8));
            }
        }
        for line in &reg_loads {
            self.emit(line.clone());
        }
        let is_variadic_callee = self.callee_is_variadic(callee);
        if is_variadic_callee {
            let used_xmm = 8 - xmm_iter.count() as i64;
            self.emit(format!("  mov ${}, %al", used_xmm));
        }

        self.gen_call_target(callee)?;

        if stack_bytes > 0 {
            self.emit(format!("  add ${}, %rsp", stack_bytes));
        }
        Ok(())
    }

    fn copy_aggregate_rbp_dest(&mut self, dest_offset: i64, src_reg: &str, size: i64) {
        let mut off: i64 = 0;
        let mut remaining = size.max(0);
        while remaining >= 16 {
            self.emit(format!("  movups {}({}), %xmm0", off, src_reg));
            self.emit(format!("  movups %xmm0, {}(%rbp)", dest_offset + off));
            off += 16;
            remaining -= 16;
        }
        for width in [8, 4, 2, 1] {
            while remaining >= width {
                let reg = RAX.for_size(width);
                self.emit(format!("  mov {}({}), {}", off, src_reg, reg));
                self.emit(format!("  mov {}, {}(%rbp)", reg, dest_offset + off));
                off += width;
                remaining -= width;
            }
        }
    }

    fn callee_is_variadic(&self, callee: NodeRef) -> bool {
        let node = self.nodes.get(callee);
        let Some(ty) = node.ty else { return false };
        let t = self.types.get(ty);
        let func_ty = if t.kind == Kind::Ptr { t.base.map(|b| self.types.get(b)) } else { Some(t) };
        func_ty.map(|f| f.is_variadic).unwrap_or(false)
    }

    /// Indirect calls (`extra.obj` unset, or not a `Var`) go through whatever address
    /// `gen_expr` leaves in `%rax`; a direct call by name uses the symbol itself, since
    /// `call *%rax` through a `lea name(%rip),%rax` round-trip would be needlessly
    /// indirect for the common case.
    fn gen_call_target(&mut self, callee: NodeRef) -> CodegenResult<()> {
        let node = self.nodes.get(callee).clone();
        if node.kind == NodeKind::Var {
            if let Some(obj) = node.extra.obj {
                let name = self.objs.get(obj).name.clone();
                self.emit(format!("  call \"{}\"", name));
                return Ok(());
            }
        }
        self.gen_expr(callee)?;
        self.emit("  call *%rax");
        Ok(())
    }

    // ---------------------------------------------------------------- variadics

    /// `va_list` is the System V 24-byte struct: `gp_offset: u32`, `fp_offset: u32`,
    /// `overflow_arg_area: *void`, `reg_save_area: *void`.
    fn gen_va_start(&mut self, node: &Node) -> CodegenResult<()> {
        let ap = node.args[0];
        self.gen_addr(ap)?;
        self.emit("  mov %rax, %r11");
        let gp_used = self.objs.get(self.ctx.current_fn.unwrap()).params.iter().filter(|&&p| {
            let pt = self.types.get(self.objs.get(p).ty);
            !matches!(pt.kind, Kind::Float | Kind::Double | Kind::LongDouble)
        }).count() as i64;
        let fp_used = self.objs.get(self.ctx.current_fn.unwrap()).params.len() as i64 - gp_used;
        self.emit(format!("  movl ${}, (%r11)", (gp_used * 8).min(48)));
        self.emit(format!("  movl ${}, 4(%r11)", 48 + (fp_used * 16).min(128)));
        self.emit("  lea 16(%rbp), %rax");
        self.emit("  mov %rax, 8(%r11)");
        self.emit(format!("  lea {}(%rbp), %rax", -crate::isa::x86_64::abi::VARIADIC_SAVE_AREA_BYTES));
        self.emit("  mov %rax, 16(%r11)");
        Ok(())
    }

    fn gen_va_copy(&mut self, node: &Node) -> CodegenResult<()> {
        let dst = node.args[0];
        let src = node.args[1];
        self.gen_addr(src)?;
        let src_slot = self.spill_gpr();
        self.gen_addr(dst)?;
        self.emit("  mov %rax, %r11");
        self.reload_gpr(src_slot, "%r10");
        self.emit("  mov (%r10), %eax");
        self.emit("  mov %eax, (%r11)");
        self.emit("  mov 4(%r10), %eax");
        self.emit("  mov %eax, 4(%r11)");
        self.emit("  mov 8(%r10), %rax");
        self.emit("  mov %rax, 8(%r11)");
        self.emit("  mov 16(%r10), %rax");
        self.emit("  mov %rax, 16(%r11)");
        Ok(())
    }

    fn gen_va_arg(&mut self, node: &Node) -> CodegenResult<()> {
        let ap = node.args[0];
        let ty = node.ty.unwrap();
        let is_float = matches!(self.types.get(ty).kind, Kind::Float | Kind::Double);
        self.gen_addr(ap)?;
        self.emit("  mov %rax, %r11");
        let gp_label = self.ctx.new_label("vastack");
        let done_label = self.ctx.new_label("vadone");
        if is_float {
            self.emit("  mov 4(%r11), %eax");
            self.emit("  cmp $176, %eax");
            self.emit(format!("  jae \"{}\"", gp_label));
            self.emit("  mov 16(%r11), %rdx");
            self.emit("  add %rax, %rdx");
            self.emit("  mov %rdx, %rax");
            self.emit("  add $16, 4(%r11)");
            self.emit(format!("  jmp \"{}\"", done_label));
        } else {
            self.emit("  mov (%r11), %eax");
            self.emit("  cmp $48, %eax");
            self.emit(format!("  jae \"{}\"", gp_label));
            self.emit("  mov 16(%r11), %rdx");
            self.emit("  add %rax, %rdx");
            self.emit("  mov %rdx, %rax");
            self.emit("  add $8, (%r11)");
            self.emit(format!("  jmp \"{}\"", done_label));
        }
        self.emit(format!("\"{}\":", gp_label));
        self.emit("  mov 8(%r11), %rax");
        self.emit("  mov %rax, %rdx");
        self.emit(format!("  add ${}, %rdx", 8));
        self.emit("  mov %rdx, 8(%r11)");
        self.emit(format!("\"{}\":", done_label));
        self.load(Some(ty));
        Ok(())
    }
}

/// `long double` literal materialization for a runtime `Num` node: true 80-bit x87
/// extended precision (10 significant bytes plus 6 bytes of padding to the 16-byte
/// slot `TypeArena`'s `longdouble` seed uses), independent of the simpler 8-byte-raw
/// encoding `parser::initializer` uses for a *global*'s `long double` initializer data.
fn f64_to_x87_extended(v: f64) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    if v == 0.0 {
        return out;
    }
    let bits = v.to_bits();
    let sign = (bits >> 63) & 1;
    let biased_exp = ((bits >> 52) & 0x7ff) as i64;
    let mantissa = bits & 0x000f_ffff_ffff_ffff;
    let exp80 = biased_exp - 1023 + 16383;
    // The x87 extended format keeps an explicit integer bit, unlike the implicit-leading-1
    // IEEE-754 double it's converted from.
    let significand: u64 = (1u64 << 63) | (mantissa << 11);
    out[0..8].copy_from_slice(&significand.to_le_bytes());
    let exp_word = ((sign as u16) << 15) | (exp80 as u16 & 0x7fff);
    out[8..10].copy_from_slice(&exp_word.to_le_bytes());
    out
}
