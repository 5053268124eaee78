//! Semantic Passes
//!
//! Rewrites that turn literal instruction translations into readable code. They
//! run in two phases around control-flow structuring.
//!
//! # Optimization Passes
//!
//! - **Compare Merging** (pre): `cmp a, b; jle x` becomes `if (a <= b)`
//! - **Constant Propagation** (pre): split address loads become the symbol or
//!   string they point at
//! - **Dead-Store Elimination** (pre): overwritten register stores disappear
//! - **Variable Naming** (post): register aliases, `var_N`/`arg_N` stack slots
//! - **Cast Insertion** (post): width-changing assignments get a cast marker
//!
//! Every pass only removes or rewrites statements; none of them invents
//! control flow, so the structurer's statement bookkeeping stays valid.
//!
//! # API Reference
//!
//! ```rust,ignore
//! use rdec_core::decompiler::optimizer::Optimizer;
//!
//! let optimizer = Optimizer::default();
//! let stats = optimizer.pre_structuring(&mut ir, &routine, arch);
//! optimizer.post_structuring(&mut root, arch, &render);
//! ```

pub mod naming;
pub mod post;
pub mod pre;

use crate::decompiler::arch::InstructionTranslator;
use crate::decompiler::config::RenderOptions;
use crate::decompiler::ir::instruction::IrRoutine;
use crate::decompiler::routine::Routine;
use crate::decompiler::structurer::StructuredNode;
use post::{PostPasses, PostStats};
use pre::{PrePasses, PreStats};

/// Semantic pass driver.
///
/// Each pass can be switched off on its own; the default runs all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Optimizer {
    /// Enable compare/flag merging
    pub compare_merging: bool,
    /// Enable constant propagation into addresses
    pub constant_propagation: bool,
    /// Enable dead-store elimination
    pub dead_store_elimination: bool,
    /// Enable register aliases and stack-slot variables
    pub variable_naming: bool,
}

impl Optimizer {
    /// Optimizer with every pass disabled (literal translations only).
    pub fn literal() -> Self {
        Self {
            compare_merging: false,
            constant_propagation: false,
            dead_store_elimination: false,
            variable_naming: false,
        }
    }

    /// Run the enabled pre-structuring passes.
    ///
    /// # Algorithm
    /// 1. Compare merging (needs the raw flag-setting statements)
    /// 2. Constant propagation (needs the split constant loads still present)
    /// 3. Dead-store elimination (cleans up what the first two left behind)
    ///
    /// # Arguments
    /// * `ir` - IR of the routine, rewritten in place
    /// * `routine` - Routine the IR was built from (block graph, symbol table)
    /// * `arch` - Translator of the request's architecture
    ///
    /// # Returns
    /// `PreStats` - What each pass changed
    pub fn pre_structuring(&self, ir: &mut IrRoutine, routine: &Routine, arch: &dyn InstructionTranslator) -> PreStats {
        let passes = PrePasses::new(routine, arch);
        let mut stats = PreStats::default();
        if self.compare_merging {
            stats.merged_compares = passes.merge_compares(ir);
        }
        if self.constant_propagation {
            stats.folded_constants = passes.propagate_constants(ir);
        }
        if self.dead_store_elimination {
            stats.dead_stores = passes.eliminate_dead_stores(ir);
        }
        stats
    }

    /// Run the post-structuring passes on the tree.
    pub fn post_structuring(
        &self,
        root: &mut StructuredNode,
        arch: &dyn InstructionTranslator,
        render: &RenderOptions,
    ) -> PostStats {
        PostPasses::new(arch, render.casts).run(root, self.variable_naming)
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            compare_merging: true,
            constant_propagation: true,
            dead_store_elimination: true,
            variable_naming: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::resolve;
    use crate::decompiler::ir::builder::IrBuilder;
    use crate::decompiler::loader::GraphLoader;
    use serde_json::json;

    fn compare_and_branch() -> Routine {
        GraphLoader::load(&json!([
            { "address": 0x10, "instructions": [
                { "address": 0x10, "mnemonic": "mov", "operands": ["ecx", "1"] },
                { "address": 0x15, "mnemonic": "mov", "operands": ["ecx", "2"] },
                { "address": 0x1a, "mnemonic": "cmp", "operands": ["eax", "ecx"] },
                { "address": 0x1c, "mnemonic": "jne", "operands": ["0x30"] } ],
              "edges": [ { "target": 0x30, "kind": "true" }, { "target": 0x28, "kind": "false" } ] },
            { "address": 0x28, "instructions": [ { "address": 0x28, "mnemonic": "ret" } ] },
            { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
        ]))
        .unwrap()
    }

    #[test]
    fn literal_optimizer_keeps_translations() {
        let routine = compare_and_branch();
        let arch = resolve("x86").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        let before = ir.clone();
        let stats = Optimizer::literal().pre_structuring(&mut ir, &routine, arch.as_ref());
        assert_eq!(stats, PreStats::default());
        assert_eq!(ir, before);
        assert_eq!(ir.statement_count(), 4);
    }

    #[test]
    fn default_optimizer_merges_and_drops() {
        let routine = compare_and_branch();
        let arch = resolve("x86").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        let stats = Optimizer::default().pre_structuring(&mut ir, &routine, arch.as_ref());
        assert_eq!(stats.merged_compares, 1);
        assert_eq!(stats.dead_stores, 1);
        assert!(ir.statement_count() < 4);
    }
}
