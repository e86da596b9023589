//! x86-64 System V target support: register tables, ABI classification, and the
//! temp-stack manager that back `codegen`.

pub mod abi;
pub mod regs;
pub mod tempstack;
