//! Function entry/exit: frame layout, ABI argument loading, the variadic register
//! save area, and the epilogue jump target every `return` shares.

use crate::ast::ObjRef;
use crate::diagnostics::CodegenResult;
use crate::isa::x86_64::abi::{
    AbiClassifier, ArgLocation, EightbyteClass, RegBudget, CALL_STACK_ALIGN, VARIADIC_FP_SAVE_BYTES,
    VARIADIC_GP_SAVE_BYTES, VARIADIC_SAVE_AREA_BYTES,
};
use crate::isa::x86_64::regs::{Gpr, GPR_ARG, XMM_ARG};
use crate::types::{Kind, TypeRef};

use super::Codegen;

/// Width of the zero-padded placeholder `sub $..........,%rsp` patched in once the
/// frame size is known; wide enough for any realistic stack frame.
const FRAME_PLACEHOLDER_WIDTH: usize = 10;

fn round_up(n: i64, align: i64) -> i64 {
    if align <= 1 {
        n
    } else {
        (n + align - 1) / align * align
    }
}

impl Codegen {
    /// Walk `f`'s locals in declaration order (params already at the front, per
    /// the front) assigning each a negative `%rbp` offset. A variadic function's
    /// 176-byte register save area is reserved first, occupying `-176(%rbp)` through
    /// `-1(%rbp)` exactly, so ordinary locals start at `-177(%rbp)` and below.
    fn assign_lvar_offsets(&mut self, f: ObjRef) {
        let o = self.objs.get(f).clone();
        let fn_ty = self.types.get(o.ty).clone();

        let mut bottom: i64 = 0;
        if fn_ty.is_variadic {
            bottom = VARIADIC_SAVE_AREA_BYTES;
        }

        if AbiClassifier::new(&self.types).return_needs_hidden_pointer(fn_ty.return_ty.unwrap()) {
            bottom = round_up(bottom + 8, 8);
            self.hidden_ret_slot = Some(-bottom);
        } else {
            self.hidden_ret_slot = None;
        }

        for &local in &o.locals {
            let lo = self.objs.get(local);
            let lt = self.types.get(lo.ty);
            let (mut size, mut align) = if lt.kind == Kind::Vla {
                (8, 8)
            } else {
                (lt.size.max(0), lt.align.max(1))
            };
            if lt.kind == Kind::Array && size >= 16 {
                align = align.max(16);
            }
            if size == 0 {
                size = 1;
            }
            bottom = round_up(bottom + size, align);
            self.objs.get_mut(local).stack_offset = -bottom;
        }

        self.locals_frame_size = round_up(bottom, 8);
    }

    /// Emit `.globl`/section/label header, prologue, ABI argument stores, the body, and
    /// the shared epilogue, back-patching the frame-size placeholder at the very end.
    pub(crate) fn emit_function(&mut self, f: ObjRef) -> CodegenResult<()> {
        self.ctx.enter_function(f);
        self.assign_lvar_offsets(f);

        let o = self.objs.get(f).clone();
        let fn_ty = self.types.get(o.ty).clone();
        self.return_label = self.ctx.new_label("return");

        if !o.flags.is_static {
            self.emit(format!("  .globl {}", o.name));
        }
        self.emit(format!("  .section .text.\"{}\",\"ax\",@progbits", o.name));
        self.emit(format!("  .type {}, @function", o.name));
        self.emit(format!("\"{}\":", o.name));
        self.emit("  push %rbp");
        self.emit("  mov %rsp, %rbp");
        let placeholder_at = self.out_position();
        self.emit(format!("  sub ${:0width$}, %rsp", 0, width = FRAME_PLACEHOLDER_WIDTH));

        self.load_arguments(f, &o, &fn_ty)?;

        // K&R parameters narrower than their ABI slot need narrowing into their declared
        // width before anything else runs; see `parser::kr_oldstyle_decls`. `pre_calc` is
        // the head of a linked chain of statements, same shape as a `Block`'s body, so it's
        // walked the same way rather than through a single `gen_stmt` call.
        let mut cur = fn_ty.pre_calc.map(|n| crate::ast::NodeRef::new(n as usize));
        while let Some(c) = cur {
            self.gen_stmt(c)?;
            cur = self.nodes.get(c).next;
        }

        if let Some(body) = o.body {
            let mut label_depths = std::collections::HashMap::new();
            self.collect_label_depths(Some(body), &mut label_depths);
            self.ctx.set_label_vla_depths(label_depths);
            self.gen_stmt(body)?;
        }

        self.emit(format!("\"{}\":", self.return_label));
        self.emit("  mov %rbp, %rsp");
        self.emit("  pop %rbp");
        self.emit("  ret");
        self.emit(format!("  .size {}, . - \"{}\"", o.name, o.name));

        let frame = round_up(self.locals_frame_size + self.ctx.tempstack.peak_usage(), CALL_STACK_ALIGN);
        let patch_text = format!("  sub ${:0width$}, %rsp", frame, width = FRAME_PLACEHOLDER_WIDTH);
        self.patch_out(placeholder_at, &patch_text);
        Ok(())
    }

    fn out_position(&self) -> usize {
        self.out.len()
    }

    fn patch_out(&mut self, at: usize, text: &str) {
        use super::AsmSink;
        self.out.patch(at, text);
    }

    /// Store every incoming argument — whether it arrived in a GP/XMM register or on
    /// the caller's stack — into the local slot `assign_lvar_offsets` already gave it,
    /// then (for a variadic function) unconditionally spill all six GP and all eight
    /// XMM argument registers into the fixed reg-save area for `va_arg` to read later.
    fn load_arguments(&mut self, f: ObjRef, o: &crate::ast::Obj, fn_ty: &crate::types::Type) -> CodegenResult<()> {
        let classifier = AbiClassifier::new(&self.types);
        let mut budget = RegBudget::full();
        let mut stack_arg_offset: i64 = 16;
        let mut gpr_iter = GPR_ARG.iter();
        let mut xmm_iter = XMM_ARG.iter();

        if self.hidden_ret_slot.is_some() {
            // The hidden return pointer consumes the first GP argument register.
            budget.gpr_left -= 1;
            let reg = gpr_iter.next().unwrap();
            let slot = self.hidden_ret_slot.unwrap();
            self.emit(format!("  mov {}, {}(%rbp)", reg.q, slot));
        }

        for &param in &o.params {
            let p = self.objs.get(param).clone();
            let loc = classifier.classify(p.ty);
            let pt = self.types.get(p.ty).clone();
            let fits = budget.reserve(&loc);
            let offset = p.stack_offset;
            if !fits {
                self.store_stack_param(offset, pt.size.max(8), &mut stack_arg_offset);
                continue;
            }
            match loc {
                ArgLocation::Gpr => {
                    let reg = gpr_iter.next().unwrap();
                    let width = pt.size.max(4);
                    self.emit(format!("  mov {}, {}(%rbp)", reg.for_size(width), offset));
                }
                ArgLocation::Xmm => {
                    let reg = xmm_iter.next().unwrap();
                    let op = if pt.kind == Kind::Float { "movss" } else { "movsd" };
                    self.emit(format!("  {} {}, {}(%rbp)", op, reg, offset));
                }
                ArgLocation::Aggregate(classes) => {
                    self.store_aggregate_param(&classes, offset, &mut gpr_iter, &mut xmm_iter);
                }
                ArgLocation::Stack => {
                    self.store_stack_param(offset, pt.size.max(8), &mut stack_arg_offset);
                }
            }
        }

        if fn_ty.is_variadic {
            self.spill_variadic_save_area();
        }
        let _ = f;
        Ok(())
    }

    fn store_aggregate_param<'a>(
        &mut self,
        classes: &[EightbyteClass],
        base_offset: i64,
        gpr_iter: &mut std::slice::Iter<'a, Gpr>,
        xmm_iter: &mut std::slice::Iter<'a, &'static str>,
    ) {
        for (i, class) in classes.iter().enumerate() {
            let off = base_offset + (i as i64) * 8;
            match class {
                EightbyteClass::Integer => {
                    let reg = gpr_iter.next().unwrap();
                    self.emit(format!("  mov {}, {}(%rbp)", reg.q, off));
                }
                EightbyteClass::Sse => {
                    let reg = xmm_iter.next().unwrap();
                    self.emit(format!("  movsd {}, {}(%rbp)", reg, off));
                }
            }
        }
    }

    /// Copy a stack-passed argument from the caller's frame (`stack_arg_offset(%rbp)`,
    /// starting at 16 to clear the saved return address and our own saved `%rbp`) into
    /// its local slot, advancing the cursor by one 8-byte-aligned stack slot.
    fn store_stack_param(&mut self, dest_offset: i64, size: i64, stack_arg_offset: &mut i64) {
        let src = *stack_arg_offset;
        let width = if size >= 8 { 8 } else if size >= 4 { 4 } else if size >= 2 { 2 } else { 1 };
        let reg = crate::isa::x86_64::regs::RAX.for_size(width);
        self.emit(format!("  mov {}(%rbp), {}", src, reg));
        self.emit(format!("  mov {}, {}(%rbp)", reg, dest_offset));
        *stack_arg_offset += round_up(size.max(8), 8);
    }

    fn spill_variadic_save_area(&mut self) {
        let base = -VARIADIC_SAVE_AREA_BYTES;
        for (i, reg) in GPR_ARG.iter().enumerate() {
            self.emit(format!("  mov {}, {}(%rbp)", reg.q, base + (i as i64) * 8));
        }
        let skip = self.ctx.new_label("skip");
        self.emit("  test %al, %al");
        self.emit(format!("  je \"{}\"", skip));
        let xmm_base = base + VARIADIC_GP_SAVE_BYTES;
        for (i, reg) in XMM_ARG.iter().enumerate() {
            self.emit(format!("  movaps {}, {}(%rbp)", reg, xmm_base + (i as i64) * 16));
        }
        debug_assert_eq!(xmm_base + 8 * 16, base + VARIADIC_SAVE_AREA_BYTES);
        let _ = VARIADIC_FP_SAVE_BYTES;
        self.emit(format!("\"{}\":", skip));
    }
}

/// `size_of`/`align_of` only ever fail on an incomplete type, which the earlier stages
/// already reject before codegen runs — fall back to a pointer-sized
/// default rather than threading a real error path through every caller.
pub(crate) fn size_of(types: &crate::types::TypeArena, ty: TypeRef) -> i64 {
    types.size_of(ty, crate::diagnostics::Location::synthetic()).unwrap_or(8)
}
