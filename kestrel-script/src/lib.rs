//! The Bitcoin script engine.
//!
//! Scripts are tiny stack programs attached to outputs (lock scripts) and
//! inputs (unlock scripts). Spending an output runs the unlock script, then
//! the lock script over the resulting stack; the spend is authorized when
//! the final stack is truthy and no operation aborted.
//!
//! This crate provides the interpreter (`verify`), the standard script
//! templates the wallet recognizes and synthesizes, and strict signature
//! encoding checks: every signature verified here must be canonical DER
//! with a low S value.

mod error;
mod interpreter;
mod num;
pub mod opcodes;
mod signature;
pub mod template;

#[cfg(test)]
mod tests;

pub use error::ScriptError;
pub use interpreter::{verify, verify_with_flags, VerifyFlags};
pub use num::ScriptNum;
pub use signature::CheckedSignature;
pub use template::{classify, Template, TemplateKind};
