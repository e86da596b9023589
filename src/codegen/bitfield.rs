//! Packed-member read-modify-write sequences: a bitfield has no
//! address of its own, only the address of the storage unit (byte-granular `offset`)
//! it shares with its siblings, so load and store both route through the unit.

use crate::types::Member;

use super::Codegen;

impl Codegen {
    /// Load a bitfield already addressed (unit base in `%rax`) by shifting its bits to
    /// the top of a 32-bit word and back down, sign- or zero-extending depending on the
    /// field's declared signedness.
    pub(crate) fn gen_bitfield_load(&mut self, m: &Member) {
        self.emit("  mov (%rax), %eax");
        let shift_left = 32 - m.bit_offset - m.bit_width;
        self.emit(format!("  shl ${}, %eax", shift_left));
        let mnemonic = if self.member_is_unsigned(m) { "shr" } else { "sar" };
        self.emit(format!("  {} ${}, %eax", mnemonic, 32 - m.bit_width));
    }

    /// Store `%rax`'s value into the bitfield at `%r11` (the unit's address, stashed
    /// there by the caller before evaluating the right-hand side into `%rax`). The
    /// pre-placement value is left in `%rax` as the assignment expression's result,
    /// — not the byte pattern actually written to memory.
    pub(crate) fn gen_bitfield_store(&mut self, m: &Member) {
        self.emit("  mov %rax, %r10");
        let mask: u32 = if m.bit_width >= 32 { u32::MAX } else { (1u32 << m.bit_width) - 1 };
        self.emit(format!("  and ${}, %r10d", mask));
        self.emit(format!("  shl ${}, %r10d", m.bit_offset));
        self.emit("  mov (%r11), %r9d");
        let keep_mask = !(mask << m.bit_offset);
        self.emit(format!("  and ${}, %r9d", keep_mask));
        self.emit("  or %r10d, %r9d");
        self.emit("  mov %r9d, (%r11)");
    }

    fn member_is_unsigned(&self, m: &Member) -> bool {
        self.types.get(m.ty).is_unsigned
    }
}
