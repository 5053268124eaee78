pub mod error;
pub mod config;
pub mod routine;
pub mod loader;
pub mod binder;
pub mod arch;
pub mod ir;
pub mod analysis;
pub mod structurer;
pub mod optimizer;
pub mod codegen;
pub mod issue;
pub mod pipeline;
