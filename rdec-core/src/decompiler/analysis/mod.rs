//! Analysis Module
//!
//! Static analyses shared by the structurer and the semantic passes: control
//! flow (dominators, loops), data flow (statement def/use sets, dead stores) and
//! type inference (cast insertion).

pub mod control_flow;
pub mod data_flow;
pub mod type_inference;

pub use control_flow::{ControlFlowAnalyzer, DominatorTree, EdgeType, FlowGraph, Loop, PostDominators};
pub use data_flow::{DataFlowAnalyzer, DefUse};
pub use type_inference::TypeInferenceEngine;
