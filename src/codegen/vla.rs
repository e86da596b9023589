//! Runtime-sized local arrays: a VLA local doesn't get a fixed
//! stack slot at all — its slot holds a *pointer*, set once at the `VlaDecl` node by
//! carving `rounded-up-element-count * element-size` bytes off the live `%rsp`.
//!
//! The `%rsp` value just before carving is itself saved into a dedicated temp-stack slot
//! and pushed onto the active VLA frame stack, so `break`/`continue`/`goto` out of the
//! declaring scope (see `codegen::emit`'s `gen_for`/`gen_do`/`Goto`/`GotoExpr` handling)
//! can restore `%rsp` without waiting for the function epilogue's `mov %rbp, %rsp`.

use crate::ast::{NodeRef, ObjRef};
use crate::diagnostics::CodegenResult;
use crate::types::Kind;
use cretus_entity::EntityRef;

use super::Codegen;

impl Codegen {
    /// Evaluate a VLA local's element count, scale by its element size, and allocate
    /// that many bytes below the current `%rsp`, stashing the resulting pointer in the
    /// local's own (fixed, 8-byte) stack slot.
    pub(crate) fn gen_vla_decl(&mut self, obj: ObjRef) -> CodegenResult<()> {
        let o = self.objs.get(obj).clone();
        let vla_ty = self.types.get(o.ty).clone();
        debug_assert_eq!(vla_ty.kind, Kind::Vla);
        let len_node = NodeRef::new(vla_ty.vla_len_node.unwrap() as usize);
        let elem_size = self.types.get(vla_ty.base.unwrap()).size.max(1);

        let save_offset = self.temp_alloc(8, 8);
        self.emit(format!("  mov %rsp, {}(%rbp)", save_offset));
        self.ctx.push_vla_frame(format!("{}(%rbp)", save_offset));

        self.gen_expr(len_node)?;
        self.emit("  movslq %eax, %rax");
        self.emit(format!("  imul ${}, %rax, %rax", elem_size));
        self.emit("  add $15, %rax");
        self.emit("  and $-16, %rax");
        self.emit("  sub %rax, %rsp");
        self.emit("  mov %rsp, %rax");
        self.emit(format!("  mov %rax, {}(%rbp)", o.stack_offset));
        Ok(())
    }
}
