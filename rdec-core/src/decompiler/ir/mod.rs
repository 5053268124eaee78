//! Intermediate representation: statement/expression types and the
//! per-block translation driver.

pub mod builder;
pub mod instruction;
