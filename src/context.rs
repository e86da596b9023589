//! `ParseContext`/`CodegenContext`: the threaded parse/codegen state, collected explicitly
//! rather than left ambient (`current_fn`, `current_switch`, break/continue labels, VLA
//! frames, gotos/labels, scope). Both are ordinary structs passed by `&mut` — one instance
//! per `compile()` call — a simplification of "thread-locals" into explicit state, since
//! there is exactly one parse and one codegen pass in flight at a
//! time.
//!
//! Every nested construct (loop, switch, VLA frame) acquires its slice of this state
//! through a guard whose `Drop` restores the enclosing construct's view, the same
//! "scoped resource release" pattern `scope::ScopeGuard` uses.

use std::collections::HashMap;

use crate::ast::ObjRef;
use crate::diagnostics::{err, Location, ParseError, ParseResult};
use crate::isa::x86_64::tempstack::TempStack;
use crate::scope::Scope;

/// A `goto` recorded during parsing, resolved against `labels` once the enclosing
/// function's body is fully parsed.
struct GotoRef {
    name: String,
    loc: Location,
    vla_depth: usize,
}

struct LabelDef {
    name: String,
    vla_depth: usize,
}

/// One `switch`'s accumulated `case`/`default` targets, keyed by the emitted label name
/// codegen will jump to.
#[derive(Default)]
pub struct SwitchFrame {
    pub cases: Vec<(i64, i64, String)>,
    pub default_label: Option<String>,
    pub has_default: bool,
}

pub struct ParseContext {
    pub scope: Scope,
    current_fn: Option<ObjRef>,
    switch_stack: Vec<SwitchFrame>,
    break_stack: Vec<String>,
    continue_stack: Vec<String>,
    vla_depth: usize,
    gotos: Vec<GotoRef>,
    labels: Vec<LabelDef>,
    label_counter: u64,
}

impl ParseContext {
    pub fn new() -> Self {
        ParseContext {
            scope: Scope::new(),
            current_fn: None,
            switch_stack: Vec::new(),
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            vla_depth: 0,
            gotos: Vec::new(),
            labels: Vec::new(),
            label_counter: 0,
        }
    }

    pub fn current_fn(&self) -> Option<ObjRef> {
        self.current_fn
    }

    /// Reset the per-function bookkeeping (switch/break/continue stacks, VLA depth,
    /// collected gotos/labels) on entry to a new function body.
    pub fn enter_function(&mut self, f: ObjRef) {
        self.current_fn = Some(f);
        self.switch_stack.clear();
        self.break_stack.clear();
        self.continue_stack.clear();
        self.vla_depth = 0;
        self.gotos.clear();
        self.labels.clear();
    }

    pub fn new_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!(".L.{}.{}", prefix, self.label_counter)
    }

    pub fn record_goto(&mut self, name: impl Into<String>, loc: Location) {
        self.gotos.push(GotoRef { name: name.into(), loc, vla_depth: self.vla_depth });
    }

    pub fn record_label(&mut self, name: impl Into<String>) {
        self.labels.push(LabelDef { name: name.into(), vla_depth: self.vla_depth });
    }

    /// Match every recorded `goto` against the collected labels once the function body is
    /// complete. A `goto` is rejected if its target sits at a strictly deeper VLA nesting
    /// than the jump itself, since that would skip the VLA size computation the label's
    /// scope depends on.
    pub fn resolve_gotos(&self) -> ParseResult<()> {
        for g in &self.gotos {
            match self.labels.iter().find(|l| l.name == g.name) {
                None => return err!(ParseError, g.loc, "use of undeclared label '{}'", g.name),
                Some(l) if l.vla_depth > g.vla_depth => {
                    return err!(ParseError, g.loc, "jump into scope of variably modified type crosses '{}'", g.name)
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    pub fn break_label(&self) -> Option<&str> {
        self.break_stack.last().map(String::as_str)
    }

    pub fn continue_label(&self) -> Option<&str> {
        self.continue_stack.last().map(String::as_str)
    }

    pub fn current_switch_mut(&mut self) -> Option<&mut SwitchFrame> {
        self.switch_stack.last_mut()
    }

    pub fn push_loop(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) -> LoopGuard<'_> {
        self.break_stack.push(break_label.into());
        self.continue_stack.push(continue_label.into());
        LoopGuard { ctx: self }
    }

    /// `switch` only introduces a break target; `continue` inside a `switch` still targets
    /// the enclosing loop, so the continue stack is left untouched.
    pub fn push_switch(&mut self, break_label: impl Into<String>) -> SwitchGuard<'_> {
        self.break_stack.push(break_label.into());
        self.switch_stack.push(SwitchFrame::default());
        SwitchGuard { ctx: self }
    }

    pub fn enter_vla(&mut self) -> VlaGuard<'_> {
        self.vla_depth += 1;
        VlaGuard { ctx: self }
    }

    // Plain (non-guard) counterparts of the above, for use around a `self.statement()`
    // recursion: a guard's borrow of `self.ctx` can't stay alive across the fresh
    // `&mut self` that call needs, so `statement.rs` pairs these by hand instead.

    pub fn enter_loop(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) {
        self.break_stack.push(break_label.into());
        self.continue_stack.push(continue_label.into());
    }

    pub fn exit_loop(&mut self) {
        self.break_stack.pop();
        self.continue_stack.pop();
    }

    pub fn enter_switch(&mut self, break_label: impl Into<String>) {
        self.break_stack.push(break_label.into());
        self.switch_stack.push(SwitchFrame::default());
    }

    /// Pop and return the just-finished `switch`'s accumulated case table.
    pub fn exit_switch(&mut self) -> SwitchFrame {
        self.break_stack.pop();
        self.switch_stack.pop().unwrap_or_default()
    }

    pub fn enter_vla_scope(&mut self) {
        self.vla_depth += 1;
    }

    pub fn vla_depth(&self) -> usize {
        self.vla_depth
    }

    pub fn set_vla_depth(&mut self, depth: usize) {
        self.vla_depth = depth;
    }
}

impl Default for ParseContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopGuard<'a> {
    ctx: &'a mut ParseContext,
}

impl<'a> std::ops::Deref for LoopGuard<'a> {
    type Target = ParseContext;
    fn deref(&self) -> &ParseContext {
        self.ctx
    }
}
impl<'a> std::ops::DerefMut for LoopGuard<'a> {
    fn deref_mut(&mut self) -> &mut ParseContext {
        self.ctx
    }
}
impl<'a> Drop for LoopGuard<'a> {
    fn drop(&mut self) {
        self.ctx.break_stack.pop();
        self.ctx.continue_stack.pop();
    }
}

pub struct SwitchGuard<'a> {
    ctx: &'a mut ParseContext,
}

impl<'a> std::ops::Deref for SwitchGuard<'a> {
    type Target = ParseContext;
    fn deref(&self) -> &ParseContext {
        self.ctx
    }
}
impl<'a> std::ops::DerefMut for SwitchGuard<'a> {
    fn deref_mut(&mut self) -> &mut ParseContext {
        self.ctx
    }
}
impl<'a> Drop for SwitchGuard<'a> {
    fn drop(&mut self) {
        self.ctx.break_stack.pop();
        self.ctx.switch_stack.pop();
    }
}

pub struct VlaGuard<'a> {
    ctx: &'a mut ParseContext,
}

impl<'a> std::ops::Deref for VlaGuard<'a> {
    type Target = ParseContext;
    fn deref(&self) -> &ParseContext {
        self.ctx
    }
}
impl<'a> std::ops::DerefMut for VlaGuard<'a> {
    fn deref_mut(&mut self) -> &mut ParseContext {
        self.ctx
    }
}
impl<'a> Drop for VlaGuard<'a> {
    fn drop(&mut self) {
        self.ctx.vla_depth -= 1;
    }
}

/// Threaded codegen-side state: the function currently being emitted, its temp-stack
/// manager, and the same break/continue/VLA bookkeeping `ParseContext` collects, now
/// consulted to emit actual jumps and `%rsp` restores instead of just validating gotos.
pub struct CodegenContext {
    pub current_fn: Option<ObjRef>,
    pub tempstack: TempStack,
    break_stack: Vec<String>,
    continue_stack: Vec<String>,
    switch_default: Vec<Option<String>>,
    /// One saved-`%rsp` pseudo-local name per currently active VLA frame, restored on
    /// `break`/`continue`/`goto` that unwinds through it.
    vla_rsp_slots: Vec<String>,
    /// Each named label's VLA nesting depth at the point it was declared, computed once
    /// per function before its body is emitted so a `goto` can restore `%rsp` to the
    /// right depth instead of only the epilogue unwinding it.
    label_vla_depths: HashMap<String, usize>,
    label_counter: u64,
    dont_reuse_stack: bool,
}

impl CodegenContext {
    pub fn new() -> Self {
        CodegenContext {
            current_fn: None,
            tempstack: TempStack::new(),
            break_stack: Vec::new(),
            continue_stack: Vec::new(),
            switch_default: Vec::new(),
            vla_rsp_slots: Vec::new(),
            label_vla_depths: HashMap::new(),
            label_counter: 0,
            dont_reuse_stack: false,
        }
    }

    pub fn enter_function(&mut self, f: ObjRef) {
        self.current_fn = Some(f);
        self.tempstack = TempStack::new();
        self.break_stack.clear();
        self.continue_stack.clear();
        self.switch_default.clear();
        self.vla_rsp_slots.clear();
        self.label_vla_depths.clear();
        self.dont_reuse_stack = false;
    }

    pub fn new_label(&mut self, prefix: &str) -> String {
        self.label_counter += 1;
        format!(".L.{}.{}", prefix, self.label_counter)
    }

    pub fn break_label(&self) -> Option<&str> {
        self.break_stack.last().map(String::as_str)
    }

    pub fn continue_label(&self) -> Option<&str> {
        self.continue_stack.last().map(String::as_str)
    }

    pub fn switch_default(&self) -> Option<&str> {
        self.switch_default.last().and_then(|d| d.as_deref())
    }

    /// `setjmp`/`savectx`/`vfork`/`getcontext` disable temp-stack slot reuse for the rest
    /// of the function, since a longjmp could resume with a stale slot's value still live
    ///.
    pub fn mark_no_stack_reuse(&mut self) {
        self.dont_reuse_stack = true;
        self.tempstack.set_reuse(false);
    }

    pub fn stack_reuse_disabled(&self) -> bool {
        self.dont_reuse_stack
    }

    pub fn push_loop(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) -> CodegenLoopGuard<'_> {
        self.break_stack.push(break_label.into());
        self.continue_stack.push(continue_label.into());
        CodegenLoopGuard { ctx: self }
    }

    pub fn push_switch(&mut self, break_label: impl Into<String>, default_label: Option<String>) -> CodegenSwitchGuard<'_> {
        self.break_stack.push(break_label.into());
        self.switch_default.push(default_label);
        CodegenSwitchGuard { ctx: self }
    }

    // Plain (non-guard) counterparts, for the same reason `ParseContext` grew them: a
    // guard's borrow of `self.ctx` can't stay alive across the fresh `&mut self` that
    // `codegen::emit`'s recursive `gen_stmt` calls need. A VLA frame in particular
    // outlives every sibling statement in its enclosing block, not just one recursive
    // call, so it was never a candidate for the guard form to begin with.

    pub fn push_vla_frame(&mut self, rsp_slot: impl Into<String>) {
        self.vla_rsp_slots.push(rsp_slot.into());
    }

    pub fn pop_vla_frame(&mut self) -> Option<String> {
        self.vla_rsp_slots.pop()
    }

    pub fn vla_frame_count(&self) -> usize {
        self.vla_rsp_slots.len()
    }

    /// The saved-`%rsp` slot for the `depth`-th VLA frame (0 is outermost).
    pub fn vla_slot_at(&self, depth: usize) -> Option<&str> {
        self.vla_rsp_slots.get(depth).map(String::as_str)
    }

    pub fn set_label_vla_depths(&mut self, depths: HashMap<String, usize>) {
        self.label_vla_depths = depths;
    }

    pub fn label_vla_depth(&self, name: &str) -> Option<usize> {
        self.label_vla_depths.get(name).copied()
    }

    pub fn enter_loop(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) {
        self.break_stack.push(break_label.into());
        self.continue_stack.push(continue_label.into());
    }

    pub fn exit_loop(&mut self) {
        self.break_stack.pop();
        self.continue_stack.pop();
    }

    pub fn enter_switch(&mut self, break_label: impl Into<String>, default_label: Option<String>) {
        self.break_stack.push(break_label.into());
        self.switch_default.push(default_label);
    }

    pub fn exit_switch(&mut self) {
        self.break_stack.pop();
        self.switch_default.pop();
    }
}

impl Default for CodegenContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CodegenLoopGuard<'a> {
    ctx: &'a mut CodegenContext,
}
impl<'a> std::ops::Deref for CodegenLoopGuard<'a> {
    type Target = CodegenContext;
    fn deref(&self) -> &CodegenContext {
        self.ctx
    }
}
impl<'a> std::ops::DerefMut for CodegenLoopGuard<'a> {
    fn deref_mut(&mut self) -> &mut CodegenContext {
        self.ctx
    }
}
impl<'a> Drop for CodegenLoopGuard<'a> {
    fn drop(&mut self) {
        self.ctx.break_stack.pop();
        self.ctx.continue_stack.pop();
    }
}

pub struct CodegenSwitchGuard<'a> {
    ctx: &'a mut CodegenContext,
}
impl<'a> std::ops::Deref for CodegenSwitchGuard<'a> {
    type Target = CodegenContext;
    fn deref(&self) -> &CodegenContext {
        self.ctx
    }
}
impl<'a> std::ops::DerefMut for CodegenSwitchGuard<'a> {
    fn deref_mut(&mut self) -> &mut CodegenContext {
        self.ctx
    }
}
impl<'a> Drop for CodegenSwitchGuard<'a> {
    fn drop(&mut self) {
        self.ctx.break_stack.pop();
        self.ctx.switch_default.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_guard_restores_outer_targets() {
        let mut ctx = ParseContext::new();
        {
            let mut g = ctx.push_loop("break1", "cont1");
            assert_eq!(g.break_label(), Some("break1"));
            {
                let g2 = g.push_loop("break2", "cont2");
                assert_eq!(g2.break_label(), Some("break2"));
            }
            assert_eq!(g.break_label(), Some("break1"));
        }
        assert_eq!(ctx.break_label(), None);
    }

    #[test]
    fn goto_into_vla_scope_is_rejected() {
        let mut ctx = ParseContext::new();
        ctx.record_goto("L", Location::synthetic());
        {
            let mut inner = ctx.enter_vla();
            inner.record_label("L");
        }
        assert!(ctx.resolve_gotos().is_err());
    }

    #[test]
    fn goto_within_same_vla_depth_is_accepted() {
        let mut ctx = ParseContext::new();
        ctx.record_goto("L", Location::synthetic());
        ctx.record_label("L");
        assert!(ctx.resolve_gotos().is_ok());
    }
}
