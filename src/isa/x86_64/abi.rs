//! System V argument/return classification.

use crate::types::{Kind, Type, TypeArena, TypeRef};

pub const VARIADIC_GP_SAVE_BYTES: i64 = 48;
pub const VARIADIC_FP_SAVE_BYTES: i64 = 128;
pub const VARIADIC_SAVE_AREA_BYTES: i64 = VARIADIC_GP_SAVE_BYTES + VARIADIC_FP_SAVE_BYTES;
pub const CALL_STACK_ALIGN: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EightbyteClass {
    Sse,
    Integer,
}

/// Where one parameter (or the return value) ultimately lives, before register-budget
/// exhaustion is taken into account.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgLocation {
    /// A single integer/pointer value in one GP register.
    Gpr,
    /// A single `float`/`double` value in one XMM register.
    Xmm,
    /// An aggregate ≤ 16 bytes, classified eightbyte-by-eightbyte.
    Aggregate(Vec<EightbyteClass>),
    /// `long double`, or an aggregate that doesn't fit in registers: passed on the stack.
    Stack,
}

pub struct AbiClassifier<'a> {
    types: &'a TypeArena,
}

impl<'a> AbiClassifier<'a> {
    pub fn new(types: &'a TypeArena) -> Self {
        AbiClassifier { types }
    }

    pub fn classify(&self, ty: TypeRef) -> ArgLocation {
        let t = self.types.get(ty);
        match t.kind {
            Kind::Float | Kind::Double => ArgLocation::Xmm,
            // `long double` is always passed/returned on the stack as two 8-byte halves.
            Kind::LongDouble => ArgLocation::Stack,
            Kind::Struct | Kind::Union => {
                if t.size > 16 || t.size < 0 {
                    ArgLocation::Stack
                } else {
                    let n = (((t.size + 7) / 8).max(1)) as usize;
                    let mut classes = vec![EightbyteClass::Sse; n];
                    self.classify_members(t, 0, &mut classes);
                    ArgLocation::Aggregate(classes)
                }
            }
            _ => ArgLocation::Gpr,
        }
    }

    /// A return value > 16 bytes is returned through a hidden pointer the caller passes in
    /// `%rdi`, which the callee then copies the result through.
    pub fn return_needs_hidden_pointer(&self, ty: TypeRef) -> bool {
        let t = self.types.get(ty);
        matches!(t.kind, Kind::Struct | Kind::Union) && (t.size > 16 || t.size < 0)
    }

    /// Walk `t`'s members (recursing into nested aggregates), merging each scalar's class
    /// into every eightbyte its byte range overlaps. Any non-`float`/`double` scalar in an
    /// eightbyte forces that whole eightbyte to `Integer`.
    fn classify_members(&self, t: &Type, base_offset: i64, classes: &mut [EightbyteClass]) {
        for m in &t.members {
            let mt = self.types.get(m.ty);
            let off = base_offset + m.offset;
            if matches!(mt.kind, Kind::Struct | Kind::Union) {
                self.classify_members(mt, off, classes);
                continue;
            }
            let is_sse = matches!(mt.kind, Kind::Float | Kind::Double);
            if is_sse {
                continue;
            }
            let size = mt.size.max(1);
            let lo = (off / 8).max(0) as usize;
            let hi = ((off + size - 1) / 8).max(0) as usize;
            for eb in classes.iter_mut().take((hi + 1).min(classes.len())).skip(lo) {
                *eb = EightbyteClass::Integer;
            }
        }
    }
}

/// Tracks how many integer/SSE argument registers are still available while classifying a
/// parameter list left to right: if either register class is exhausted, the whole
/// aggregate goes on the stack.
pub struct RegBudget {
    pub gpr_left: u32,
    pub sse_left: u32,
}

impl RegBudget {
    pub fn full() -> Self {
        RegBudget { gpr_left: 6, sse_left: 8 }
    }

    /// Try to reserve the registers `loc` needs. Returns `false` (leaving the budget
    /// untouched) when the needed class doesn't have enough registers left; the caller is
    /// then responsible for treating that argument as `Stack` instead.
    pub fn reserve(&mut self, loc: &ArgLocation) -> bool {
        match loc {
            ArgLocation::Gpr => {
                if self.gpr_left == 0 {
                    return false;
                }
                self.gpr_left -= 1;
                true
            }
            ArgLocation::Xmm => {
                if self.sse_left == 0 {
                    return false;
                }
                self.sse_left -= 1;
                true
            }
            ArgLocation::Aggregate(classes) => {
                let need_gpr = classes.iter().filter(|c| **c == EightbyteClass::Integer).count() as u32;
                let need_sse = classes.len() as u32 - need_gpr;
                if need_gpr > self.gpr_left || need_sse > self.sse_left {
                    return false;
                }
                self.gpr_left -= need_gpr;
                self.sse_left -= need_sse;
                true
            }
            ArgLocation::Stack => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Member;

    #[test]
    fn scalar_classification() {
        let types = TypeArena::new();
        let c = AbiClassifier::new(&types);
        assert_eq!(c.classify(types.well_known("int")), ArgLocation::Gpr);
        assert_eq!(c.classify(types.well_known("double")), ArgLocation::Xmm);
        assert_eq!(c.classify(types.well_known("longdouble")), ArgLocation::Stack);
    }

    #[test]
    fn all_float_small_struct_is_sse_sse() {
        let mut types = TypeArena::new();
        let f = types.well_known("float");
        let members = vec![
            Member { name: Some("x".into()), ty: f, offset: 0, is_bitfield: false, bit_offset: 0, bit_width: 0, idx: 0 },
            Member { name: Some("y".into()), ty: f, offset: 4, is_bitfield: false, bit_offset: 0, bit_width: 0, idx: 1 },
        ];
        let s = types.layout_struct(Some("V2".into()), members, false);
        let c = AbiClassifier::new(&types);
        assert_eq!(c.classify(s), ArgLocation::Aggregate(vec![EightbyteClass::Sse]));
    }

    #[test]
    fn mixed_struct_forces_integer_eightbyte() {
        let mut types = TypeArena::new();
        let f = types.well_known("float");
        let i = types.well_known("int");
        let members = vec![
            Member { name: Some("x".into()), ty: f, offset: 0, is_bitfield: false, bit_offset: 0, bit_width: 0, idx: 0 },
            Member { name: Some("n".into()), ty: i, offset: 4, is_bitfield: false, bit_offset: 0, bit_width: 0, idx: 1 },
        ];
        let s = types.layout_struct(Some("Mixed".into()), members, false);
        let c = AbiClassifier::new(&types);
        assert_eq!(c.classify(s), ArgLocation::Aggregate(vec![EightbyteClass::Integer]));
    }

    #[test]
    fn oversized_struct_goes_on_the_stack() {
        let mut types = TypeArena::new();
        let l = types.well_known("long");
        let members = (0..3)
            .map(|i| Member {
                name: Some(format!("f{}", i)),
                ty: l,
                offset: i * 8,
                is_bitfield: false,
                bit_offset: 0,
                bit_width: 0,
                idx: i as usize,
            })
            .collect();
        let s = types.layout_struct(Some("Big".into()), members, false);
        let c = AbiClassifier::new(&types);
        assert_eq!(c.classify(s), ArgLocation::Stack);
        assert!(c.return_needs_hidden_pointer(s));
    }

    #[test]
    fn register_budget_falls_back_to_stack_when_exhausted() {
        let mut budget = RegBudget { gpr_left: 1, sse_left: 0 };
        assert!(budget.reserve(&ArgLocation::Gpr));
        assert!(!budget.reserve(&ArgLocation::Gpr));
        assert!(!budget.reserve(&ArgLocation::Xmm));
    }
}
