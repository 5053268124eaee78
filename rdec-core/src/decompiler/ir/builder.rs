//! IR Builder - Converts a Routine's raw instructions to IR
//!
//! Drives the architecture translator over every block of a [`Routine`] and
//! collects the statements into an [`IrRoutine`] that mirrors the block layout.
//!
//! # Conversion Strategy
//! - **Known mnemonics**: translated by the architecture table into zero or more statements
//! - **Unknown mnemonics**: kept as `Unsupported` placeholders carrying the instruction text
//! - **Delay slots**: the slot instruction is emitted before the branch that owns it
//! - **Statement ids**: handed out sequentially in block order, unique per routine

use crate::decompiler::arch::{translate_with, InstructionTranslator};
use crate::decompiler::ir::instruction::{IrBlock, IrRoutine, Statement};
use crate::decompiler::routine::{Block, Instruction, Routine};

/// IR builder for converting raw instructions to IR.
pub struct IrBuilder;

impl IrBuilder {
    /// Build IR for every block of a routine.
    ///
    /// # Algorithm
    /// 1. Walk blocks in routine order
    /// 2. Translate each instruction; a branch with a delay slot is emitted after
    ///    its slot instruction when the slot lives in the same block
    /// 3. Stamp each statement with a fresh id and its originating address
    ///
    /// # Arguments
    /// * `routine` - Loaded and bound routine
    /// * `arch` - Translator for the routine's instruction set
    ///
    /// # Returns
    /// `(IrRoutine, usize)` - the IR and the number of unsupported placeholders
    pub fn build(routine: &Routine, arch: &dyn InstructionTranslator) -> (IrRoutine, usize) {
        let mut next_id: u32 = 0;
        let mut unsupported: usize = 0;
        let mut blocks: Vec<IrBlock> = Vec::with_capacity(routine.blocks.len());

        for block in &routine.blocks {
            let mut statements: Vec<Statement> = Vec::new();
            for inst in Self::execution_order(block, arch) {
                for kind in translate_with(arch, inst, routine) {
                    let statement = Statement {
                        id: next_id,
                        origin: inst.address,
                        kind,
                    };
                    if statement.is_unsupported() {
                        unsupported += 1;
                    }
                    next_id += 1;
                    statements.push(statement);
                }
            }
            blocks.push(IrBlock {
                address: block.address,
                statements,
            });
        }

        log::debug!(
            "built {} IR statements for {} ({} unsupported)",
            next_id,
            routine.display_name(),
            unsupported
        );
        (IrRoutine { blocks, next_id }, unsupported)
    }

    /// Instructions of a block in the order their effects happen.
    fn execution_order<'a>(block: &'a Block, arch: &dyn InstructionTranslator) -> Vec<&'a Instruction> {
        let mut order: Vec<&Instruction> = Vec::with_capacity(block.instructions.len());
        let mut i: usize = 0;
        while i < block.instructions.len() {
            let inst = &block.instructions[i];
            match block.instructions.get(i + 1) {
                Some(slot) if arch.has_delay_slot(inst) => {
                    order.push(slot);
                    order.push(inst);
                    i += 2;
                }
                _ => {
                    order.push(inst);
                    i += 1;
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::resolve;
    use crate::decompiler::ir::instruction::StatementKind;
    use crate::decompiler::loader::GraphLoader;
    use serde_json::json;

    #[test]
    fn ids_are_sequential_and_unknowns_counted() {
        let routine = GraphLoader::load(&json!([{
            "address": 0x1000,
            "instructions": [
                { "address": 0x1000, "mnemonic": "mov", "operands": ["eax", "1"], "size": 5 },
                { "address": 0x1005, "mnemonic": "vfmadd231ps", "operands": ["ymm0", "ymm1", "ymm2"] },
                { "address": 0x100a, "mnemonic": "ret", "size": 1 }
            ]
        }]))
        .unwrap();
        let arch = resolve("x86").unwrap();
        let (ir, unsupported) = IrBuilder::build(&routine, arch.as_ref());
        assert_eq!(unsupported, 1);
        let ids: Vec<u32> = ir.blocks[0].statements.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(ir.next_id, 3);
        assert!(ir.blocks[0].statements[1].is_unsupported());
    }

    #[test]
    fn delay_slot_runs_before_branch() {
        let routine = GraphLoader::load(&json!([{
            "address": 0x400,
            "instructions": [
                { "address": 0x400, "mnemonic": "jr", "operands": ["$ra"], "size": 4 },
                { "address": 0x404, "mnemonic": "li", "operands": ["$v0", "1"], "size": 4 }
            ]
        }]))
        .unwrap();
        let arch = resolve("mips").unwrap();
        let (ir, _) = IrBuilder::build(&routine, arch.as_ref());
        let statements = &ir.blocks[0].statements;
        assert_eq!(statements[0].origin, 0x404);
        assert!(matches!(statements[1].kind, StatementKind::Return { .. }));
    }
}
