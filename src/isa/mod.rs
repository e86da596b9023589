//! Target-specific support. Cross-target retargeting is out of scope, so this is a
//! single fixed target rather than a `TargetIsa` trait object.

pub mod x86_64;
