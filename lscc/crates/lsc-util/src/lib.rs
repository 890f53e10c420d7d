//! lsc-util - Core utilities and foundation types.
//!
//! This crate provides the types shared by every phase of the LineScript
//! compiler: source spans and the source map, the string interner, and the
//! diagnostic infrastructure. Nothing here is process-global; the driver
//! owns one instance of each and threads references through the phases so
//! that multiple compilations in one process stay independent.

pub mod diagnostic;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, ErrorKind, Handler, Level};
pub use span::{FileId, SourceFile, SourceMap, Span};
pub use symbol::{Interner, Symbol};

// Re-export commonly used hash types
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
