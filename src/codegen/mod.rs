//! Single-pass AST-to-GAS code generator: the last stage, turning a
//! parsed `TranslationUnit` into x86-64 System V assembly text.
//!
//! The work is split the way `prologue`/`bitfield`/`vla`/`emit` divide it: `prologue`
//! owns function entry/exit and ABI argument loading, `bitfield` the packed-member
//! read-modify-write sequences, `vla` the runtime-sized local allocation, and `emit`
//! everything else — expression/statement lowering and the data section.

pub mod bitfield;
pub mod emit;
pub mod prologue;
pub mod vla;

use crate::ast::{NodeArena, ObjArena, ObjRef};
use crate::context::CodegenContext;
use crate::diagnostics::CodegenResult;
use crate::parser::TranslationUnit;
use crate::types::TypeArena;

/// The stream generated GAS text is appended to. The prologue's frame-size placeholder is the one exception to pure
/// append order: its position is recorded, then rewritten once the function body's
/// temp-stack high-water mark is known.
pub trait AsmSink {
    fn emit_line(&mut self, line: &str);
    fn position(&self) -> usize;
    fn patch(&mut self, at: usize, text: &str);
}

impl AsmSink for String {
    fn emit_line(&mut self, line: &str) {
        self.push_str(line);
        self.push('\n');
    }

    fn position(&self) -> usize {
        self.len()
    }

    /// `text` must be exactly as long as the placeholder it replaces; `prologue::emit_function`
    /// pads the placeholder to a fixed width up front so this always holds.
    fn patch(&mut self, at: usize, text: &str) {
        self.replace_range(at..at + text.len(), text);
    }
}

/// One `long double`/`double`/`float` constant pooled into `.rodata`, keyed by a
/// synthetic label rather than deduplicated — two occurrences of the same literal in a
/// large translation unit are rare enough not to bother interning.
struct FloatLit {
    label: String,
    bytes: Vec<u8>,
}

/// Everything threaded through expression/statement emission: the three arenas the
/// parser filled in, plus the codegen-side equivalent of `ParseContext`.
pub struct Codegen {
    pub(crate) nodes: NodeArena,
    pub(crate) objs: ObjArena,
    pub(crate) types: TypeArena,
    pub(crate) ctx: CodegenContext,
    pub(crate) out: String,
    /// Byte size of the current function's locals region (params, locals, the
    /// variadic reg-save area), established once by `prologue::assign_lvar_offsets`
    /// before the body is walked. Temp-stack slots are allocated below this, so the
    /// two regions never overlap.
    pub(crate) locals_frame_size: i64,
    /// `.L.return.<n>`, where every `return` jumps rather than emitting the epilogue
    /// inline, so a function with several `return`s still tears its frame down once.
    pub(crate) return_label: String,
    /// Stack slot (`%rbp` offset) the hidden return-value pointer is stashed into at
    /// entry, for a function whose return type is an aggregate over 16 bytes.
    pub(crate) hidden_ret_slot: Option<i64>,
    floats: Vec<FloatLit>,
    float_counter: u64,
}

impl Codegen {
    fn new(nodes: NodeArena, objs: ObjArena, types: TypeArena) -> Self {
        Codegen {
            nodes,
            objs,
            types,
            ctx: CodegenContext::new(),
            out: String::new(),
            locals_frame_size: 0,
            return_label: String::new(),
            hidden_ret_slot: None,
            floats: Vec::new(),
            float_counter: 0,
        }
    }

    pub(crate) fn emit(&mut self, line: impl AsRef<str>) {
        self.out.emit_line(line.as_ref());
    }

    /// Reserve a temp-stack slot below the locals region and return its `%rbp` offset.
    pub(crate) fn temp_alloc(&mut self, size: i64, align: i64) -> i64 {
        let raw = self.ctx.tempstack.alloc(size, align);
        raw - self.locals_frame_size
    }

    /// Pool a floating-point constant into `.rodata`, returning the label to load it by.
    pub(crate) fn float_label(&mut self, bytes: Vec<u8>) -> String {
        self.float_counter += 1;
        let label = format!(".L..flt.{}", self.float_counter);
        self.floats.push(FloatLit { label: label.clone(), bytes });
        label
    }

    fn emit_float_pool(&mut self) {
        if self.floats.is_empty() {
            return;
        }
        self.emit("  .section .rodata");
        let floats = std::mem::take(&mut self.floats);
        for f in floats {
            self.emit(format!("  .align {}", f.bytes.len().clamp(1, 16)));
            self.emit(format!("{}:", f.label));
            for b in &f.bytes {
                self.emit(format!("  .byte {}", b));
            }
        }
    }
}

/// Lower a parsed translation unit into GAS assembly text. A declaration the parser's `mark_live` pass never reached is skipped
/// entirely — no symbol, no bytes, matching the parser's dead-code elimination.
pub fn compile(tu: TranslationUnit) -> CodegenResult<String> {
    let TranslationUnit { nodes, objs, types, globals } = tu;
    let mut cg = Codegen::new(nodes, objs, types);

    for &g in &globals {
        let o = cg.objs.get(g);
        if o.flags.is_live && !o.flags.is_function {
            cg.emit_global(g)?;
        }
    }
    for &g in &globals {
        let o = cg.objs.get(g);
        if o.flags.is_live && o.flags.is_function && o.body.is_some() {
            cg.emit_function(g)?;
        }
    }
    cg.emit_float_pool();
    Ok(cg.out)
}
