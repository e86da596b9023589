//! x86-64 System V register name tables.
//!
//! A flat table of GAS mnemonics indexed by operand width, reduced to a fixed
//! calling-convention register set instead of a full allocatable bank, since a general
//! register allocator is out of scope.

use std::fmt;

/// One general-purpose register at its four operand widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gpr {
    pub q: &'static str,
    pub d: &'static str,
    pub w: &'static str,
    pub b: &'static str,
}

impl Gpr {
    /// The GAS mnemonic for this register truncated to `size` bytes (1, 2, 4, or 8).
    pub fn for_size(&self, size: i64) -> &'static str {
        match size {
            1 => self.b,
            2 => self.w,
            4 => self.d,
            _ => self.q,
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.q)
    }
}

pub const RAX: Gpr = Gpr { q: "%rax", d: "%eax", w: "%ax", b: "%al" };
pub const RCX: Gpr = Gpr { q: "%rcx", d: "%ecx", w: "%cx", b: "%cl" };
pub const RDX: Gpr = Gpr { q: "%rdx", d: "%edx", w: "%dx", b: "%dl" };
pub const RBX: Gpr = Gpr { q: "%rbx", d: "%ebx", w: "%bx", b: "%bl" };
pub const RSI: Gpr = Gpr { q: "%rsi", d: "%esi", w: "%si", b: "%sil" };
pub const RDI: Gpr = Gpr { q: "%rdi", d: "%edi", w: "%di", b: "%dil" };
pub const RBP: Gpr = Gpr { q: "%rbp", d: "%ebp", w: "%bp", b: "%bpl" };
pub const RSP: Gpr = Gpr { q: "%rsp", d: "%esp", w: "%sp", b: "%spl" };
pub const R8: Gpr = Gpr { q: "%r8", d: "%r8d", w: "%r8w", b: "%r8b" };
pub const R9: Gpr = Gpr { q: "%r9", d: "%r9d", w: "%r9w", b: "%r9b" };
pub const R10: Gpr = Gpr { q: "%r10", d: "%r10d", w: "%r10w", b: "%r10b" };
pub const R11: Gpr = Gpr { q: "%r11", d: "%r11d", w: "%r11w", b: "%r11b" };

/// System V integer argument registers, in passing order (max 6).
pub const GPR_ARG: [Gpr; 6] = [RDI, RSI, RDX, RCX, R8, R9];

/// SSE argument/return registers (max 8).
pub const XMM_ARG: [&str; 8] =
    ["%xmm0", "%xmm1", "%xmm2", "%xmm3", "%xmm4", "%xmm5", "%xmm6", "%xmm7"];

/// `%xmm0`: the floating-point result register.
pub const XMM0: &str = "%xmm0";

/// x87 `st(0)`: the `long double` result register.
pub const ST0: &str = "%st(0)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_selection() {
        assert_eq!(RAX.for_size(8), "%rax");
        assert_eq!(RAX.for_size(4), "%eax");
        assert_eq!(RAX.for_size(2), "%ax");
        assert_eq!(RAX.for_size(1), "%al");
    }

    #[test]
    fn arg_register_order() {
        assert_eq!(GPR_ARG.map(|g| g.q), ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"]);
    }
}
