//! lsc-gen - Code-emitting backends.
//!
//! Two emitters consume the optimized, fully-annotated AST: the C backend
//! lowers the whole language to one portable translation unit, and the
//! x86-64 backend handles a restricted subset, reporting
//! `asm-unsupported: <reason>` for anything outside it so the driver can
//! fall back to C.

mod asm;
mod c;

pub use asm::{emit_asm, AsmTarget};
pub use c::emit_c;

use thiserror::Error;

/// Backend failures.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The ASM backend met a construct outside its subset. The reason is
    /// logged so the fallback trigger set can be grown empirically.
    #[error("asm-unsupported: {0}")]
    Unsupported(String),

    /// The module has no resolvable entry function.
    #[error("no entry function named `{0}`")]
    MissingEntry(String),
}
