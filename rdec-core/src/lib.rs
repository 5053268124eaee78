//! rdec core library
//!
//! Turns a disassembler's per-function control-flow graph (plus its cross-reference
//! and string tables) into structured pseudo-C.
//!
//! The whole pipeline lives under [`decompiler`]; [`DecompilationPipeline`] is the
//! entry point most callers need.

pub mod decompiler;

pub use decompiler::config::{BranchOrder, DecompilerConfig, RenderOptions, RequestContext};
pub use decompiler::error::{DecompilerError, Diagnostics};
pub use decompiler::pipeline::{Decompilation, DecompilationPipeline, RequestData};
