//! Pre-structuring passes
//!
//! Run on the flat statement list of each block before control flow is
//! structured. None of them look across block boundaries, except that a block
//! with a single predecessor inherits the predecessor's pending flags.
//!
//! # Passes
//! - **Compare merging**: pending-flag reads (`Flags(cc)`) are replaced by the
//!   comparison that set them; the compare itself is removed once consumed
//! - **Constant propagation**: register constants built over several
//!   instructions (`lui`/`addiu`, `movw`/`movt`, ...) are folded into the
//!   address they form, and replaced by the bound symbol or string when there is one
//! - **Dead-store elimination**: register stores overwritten before any read
//!   are removed

use crate::decompiler::analysis::{ControlFlowAnalyzer, DataFlowAnalyzer};
use crate::decompiler::arch::InstructionTranslator;
use crate::decompiler::binder::Binding;
use crate::decompiler::ir::instruction::{BinaryOp, CompareKind, Cond, Expr, IrRoutine, Statement, StatementKind, Width};
use crate::decompiler::routine::Routine;
use std::collections::BTreeMap;

/// Smallest value shown as an address rather than a plain number.
const ADDRESS_FLOOR: i64 = 0x10000;

/// What set the pending flags.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FlagSource {
    /// Explicit compare or test.
    Compare { lhs: Expr, rhs: Expr, kind: CompareKind },
    /// Flag-setting arithmetic: flags describe the result against zero.
    Value(Expr),
}

impl FlagSource {
    fn resolve(&self, cond: Cond) -> Option<Expr> {
        match self {
            FlagSource::Compare { lhs, rhs, kind } => {
                let op = BinaryOp::from_cond(cond, *kind == CompareKind::Unsigned)?;
                match kind {
                    CompareKind::Test => {
                        let value = if lhs == rhs {
                            lhs.clone()
                        } else {
                            Expr::binary(BinaryOp::And, lhs.clone(), rhs.clone())
                        };
                        Some(Expr::binary(op, value, zero_like(lhs)))
                    }
                    _ => Some(Expr::binary(op, lhs.clone(), rhs.clone())),
                }
            }
            FlagSource::Value(value) => {
                let op = BinaryOp::from_cond(cond, false)?;
                Some(Expr::binary(op, value.clone(), zero_like(value)))
            }
        }
    }

    fn registers(&self) -> Vec<&str> {
        match self {
            FlagSource::Compare { lhs, rhs, .. } => {
                let mut regs = lhs.registers();
                regs.extend(rhs.registers());
                regs
            }
            FlagSource::Value(value) => value.registers(),
        }
    }
}

fn zero_like(expr: &Expr) -> Expr {
    Expr::constant(0, expr.width().unwrap_or(Width::W32))
}

/// Counters reported by [`PrePasses::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreStats {
    pub merged_compares: usize,
    pub folded_constants: usize,
    pub dead_stores: usize,
}

/// Pre-structuring pass driver.
pub struct PrePasses<'a> {
    routine: &'a Routine,
    arch: &'a dyn InstructionTranslator,
}

impl<'a> PrePasses<'a> {
    pub fn new(routine: &'a Routine, arch: &'a dyn InstructionTranslator) -> Self {
        Self { routine, arch }
    }

    /// Merge compares into the flag reads that consume them.
    ///
    /// # Algorithm
    /// 1. Visit blocks in reverse postorder so a single predecessor is done first
    /// 2. Track the last flag source; a register write that feeds it makes it stale
    /// 3. Replace every `Flags(cc)` read with the resolved comparison
    /// 4. Drop compares that were consumed inside their own block
    ///
    /// # Returns
    /// `usize` - Number of flag reads resolved
    pub fn merge_compares(&self, ir: &mut IrRoutine) -> usize {
        let graph = ControlFlowAnalyzer::build(self.routine);
        let mut order: Vec<u32> = ControlFlowAnalyzer::reverse_postorder(&graph.successors, graph.entry);
        for idx in 0..ir.blocks.len() as u32 {
            if !order.contains(&idx) {
                order.push(idx);
            }
        }

        let mut exit_state: Vec<Option<FlagSource>> = vec![None; ir.blocks.len()];
        let mut merged: usize = 0;

        for idx in order {
            let block = idx as usize;
            let mut pending: Option<FlagSource> = match graph.predecessors.get(block).map(|p| p.as_slice()) {
                Some([pred]) => exit_state[*pred as usize].clone(),
                _ => None,
            };
            let mut source_index: Option<usize> = None;
            let mut consumed: Vec<usize> = Vec::new();

            let statements = &mut ir.blocks[block].statements;
            for (pos, statement) in statements.iter_mut().enumerate() {
                if let Some(source) = &pending {
                    let mut resolved_any = false;
                    for expr in statement.expressions_mut() {
                        expr.rewrite(&mut |e| {
                            if let Expr::Flags(cond) = e {
                                if let Some(resolved) = source.resolve(*cond) {
                                    *e = resolved;
                                    resolved_any = true;
                                }
                            }
                        });
                    }
                    if resolved_any {
                        merged += 1;
                        if let Some(src) = source_index {
                            consumed.push(src);
                        }
                    }
                }

                match &statement.kind {
                    StatementKind::Compare { lhs, rhs, kind } => {
                        pending = Some(FlagSource::Compare {
                            lhs: lhs.clone(),
                            rhs: rhs.clone(),
                            kind: *kind,
                        });
                        source_index = Some(pos);
                    }
                    StatementKind::Assign {
                        dst, sets_flags: true, ..
                    } => {
                        pending = Some(FlagSource::Value(dst.clone()));
                        source_index = None;
                    }
                    StatementKind::Assign {
                        dst: Expr::Register { name, .. },
                        ..
                    } => {
                        let family = self.arch.register_family(name);
                        let stale = pending.as_ref().is_some_and(|p| {
                            p.registers()
                                .iter()
                                .any(|r| self.arch.register_family(r) == family)
                        });
                        if stale {
                            pending = None;
                            source_index = None;
                        }
                    }
                    StatementKind::Call { .. } | StatementKind::Unsupported { .. } => {
                        pending = None;
                        source_index = None;
                    }
                    _ => {}
                }
            }

            exit_state[block] = pending;
            if !consumed.is_empty() {
                let mut pos: usize = 0;
                statements.retain(|_| {
                    let keep = !consumed.contains(&pos);
                    pos += 1;
                    keep
                });
            }
        }
        log::debug!("merged {merged} flag reads");
        merged
    }

    /// Fold register constants that form addresses.
    ///
    /// # Returns
    /// `usize` - Number of expressions replaced
    pub fn propagate_constants(&self, ir: &mut IrRoutine) -> usize {
        let mut folded: usize = 0;
        for block in &mut ir.blocks {
            let mut known: BTreeMap<String, i64> = BTreeMap::new();
            for statement in &mut block.statements {
                folded += self.fold_statement(statement, &known);
                match &statement.kind {
                    StatementKind::Assign {
                        dst: Expr::Register { name, .. },
                        src,
                        ..
                    } => {
                        let family = self.arch.register_family(name).into_owned();
                        known.retain(|reg, _| self.arch.register_family(reg) != family.as_str());
                        if let Some(value) = evaluate(src, &known) {
                            known.insert(name.clone(), value);
                        }
                    }
                    StatementKind::Call { .. } | StatementKind::Unsupported { .. } => known.clear(),
                    _ => {}
                }
            }
        }
        log::debug!("folded {folded} constant addresses");
        folded
    }

    fn fold_statement(&self, statement: &mut Statement, known: &BTreeMap<String, i64>) -> usize {
        let mut folded: usize = 0;
        // Memory addresses anywhere in the statement.
        for expr in statement.expressions_mut() {
            expr.rewrite(&mut |e| {
                if let Expr::Memory { addr, .. } = e {
                    if let Some(replacement) = self.fold(addr, known, false) {
                        **addr = replacement;
                        folded += 1;
                    }
                }
            });
        }
        // Whole values that form an address.
        match &mut statement.kind {
            StatementKind::Assign { src, .. } => {
                if let Some(replacement) = self.fold(src, known, true) {
                    *src = replacement;
                    folded += 1;
                }
            }
            StatementKind::Call { target } | StatementKind::Jump { target } => {
                if let Some(replacement) = self.fold(target, known, false) {
                    *target = replacement;
                    folded += 1;
                }
            }
            _ => {}
        }
        folded
    }

    /// Replacement for an expression that evaluates to an address, if any.
    fn fold(&self, expr: &Expr, known: &BTreeMap<String, i64>, allow_string: bool) -> Option<Expr> {
        if matches!(expr, Expr::Const { .. } | Expr::Symbol(_) | Expr::Str(_)) {
            return None;
        }
        let value = evaluate(expr, known)?;
        match self.routine.symbols.lookup(value as u64) {
            Some(Binding::Symbol(name)) => Some(Expr::Symbol(name.clone())),
            Some(Binding::Str(content)) if allow_string => Some(Expr::Str(content.clone())),
            _ if value >= ADDRESS_FLOOR => Some(Expr::constant(
                value,
                expr.width().unwrap_or_else(|| self.arch.pointer_width()),
            )),
            _ => None,
        }
    }

    /// Remove register stores overwritten before any read.
    ///
    /// # Returns
    /// `usize` - Number of statements removed
    pub fn eliminate_dead_stores(&self, ir: &mut IrRoutine) -> usize {
        let mut removed: usize = 0;
        for block in &mut ir.blocks {
            let dead = DataFlowAnalyzer::dead_stores(&block.statements, self.arch);
            if dead.not_any() {
                continue;
            }
            removed += dead.count_ones();
            let mut pos: usize = 0;
            block.statements.retain(|_| {
                let keep = !dead[pos];
                pos += 1;
                keep
            });
        }
        log::debug!("removed {removed} dead stores");
        removed
    }

    /// Run all pre-structuring passes in order.
    pub fn run(&self, ir: &mut IrRoutine) -> PreStats {
        PreStats {
            merged_compares: self.merge_compares(ir),
            folded_constants: self.propagate_constants(ir),
            dead_stores: self.eliminate_dead_stores(ir),
        }
    }
}

/// Value of an expression built from constants and known registers.
fn evaluate(expr: &Expr, known: &BTreeMap<String, i64>) -> Option<i64> {
    match expr {
        Expr::Const { value, .. } => Some(*value),
        Expr::Register { name, .. } => known.get(name).copied(),
        Expr::Binary { op, lhs, rhs } => {
            let (l, r) = (evaluate(lhs, known)?, evaluate(rhs, known)?);
            match op {
                BinaryOp::Add => Some(l.wrapping_add(r)),
                BinaryOp::Sub => Some(l.wrapping_sub(r)),
                BinaryOp::Mul => Some(l.wrapping_mul(r)),
                BinaryOp::And => Some(l & r),
                BinaryOp::Or => Some(l | r),
                BinaryOp::Xor => Some(l ^ r),
                BinaryOp::Shl if (0..64).contains(&r) => Some(l.wrapping_shl(r as u32)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::resolve;
    use crate::decompiler::binder::Binder;
    use crate::decompiler::ir::builder::IrBuilder;
    use crate::decompiler::loader::GraphLoader;
    use crate::decompiler::routine::StringRef;
    use serde_json::json;

    #[test]
    fn compare_merges_into_branch() {
        let routine = GraphLoader::load(&json!([
            { "address": 0x10, "instructions": [
                { "address": 0x10, "mnemonic": "cmp", "operands": ["eax", "5"] },
                { "address": 0x13, "mnemonic": "jle", "operands": ["0x20"] } ],
              "edges": [ { "target": 0x20, "kind": "true" }, { "target": 0x18, "kind": "false" } ] },
            { "address": 0x18, "instructions": [ { "address": 0x18, "mnemonic": "ret" } ] },
            { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "ret" } ] }
        ]))
        .unwrap();
        let arch = resolve("x86").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        let merged = PrePasses::new(&routine, arch.as_ref()).merge_compares(&mut ir);
        assert_eq!(merged, 1);
        let statements = &ir.blocks[0].statements;
        assert_eq!(statements.len(), 1);
        match &statements[0].kind {
            StatementKind::Branch { cond, .. } => assert_eq!(cond.to_string(), "(eax <= 5)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unsigned_jump_takes_signedness_from_condition() {
        let routine = GraphLoader::load(&json!([
            { "address": 0x10, "instructions": [
                { "address": 0x10, "mnemonic": "cmp", "operands": ["eax", "ebx"] },
                { "address": 0x12, "mnemonic": "jb", "operands": ["0x20"] } ],
              "edges": [ { "target": 0x20, "kind": "true" }, { "target": 0x18, "kind": "false" } ] },
            { "address": 0x18, "instructions": [ { "address": 0x18, "mnemonic": "ret" } ] },
            { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "ret" } ] }
        ]))
        .unwrap();
        let arch = resolve("x86").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        assert_eq!(PrePasses::new(&routine, arch.as_ref()).merge_compares(&mut ir), 1);
        match &ir.blocks[0].statements[0].kind {
            StatementKind::Branch { cond, .. } => {
                assert!(matches!(cond, Expr::Binary { op: BinaryOp::Ult, .. }));
                assert_eq!(cond.to_string(), "(eax < ebx)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn single_predecessor_inherits_flags() {
        let routine = GraphLoader::load(&json!([
            { "address": 0x10, "instructions": [
                { "address": 0x10, "mnemonic": "test", "operands": ["eax", "eax"] },
                { "address": 0x12, "mnemonic": "je", "operands": ["0x30"] } ],
              "edges": [ { "target": 0x30, "kind": "true" }, { "target": 0x20, "kind": "false" } ] },
            { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "js", "operands": ["0x30"] } ],
              "edges": [ { "target": 0x30, "kind": "true" }, { "target": 0x28, "kind": "false" } ] },
            { "address": 0x28, "instructions": [ { "address": 0x28, "mnemonic": "ret" } ] },
            { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
        ]))
        .unwrap();
        let arch = resolve("x86").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        PrePasses::new(&routine, arch.as_ref()).merge_compares(&mut ir);
        match &ir.blocks[1].statements[0].kind {
            StatementKind::Branch { cond, .. } => assert_eq!(cond.to_string(), "(eax < 0)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn split_constant_becomes_string() {
        let mut routine = GraphLoader::load(&json!([
            { "address": 0x400, "instructions": [
                { "address": 0x400, "mnemonic": "lui", "operands": ["$a0", "0x41"] },
                { "address": 0x404, "mnemonic": "addiu", "operands": ["$a0", "$a0", "0x10"] },
                { "address": 0x408, "mnemonic": "jr", "operands": ["$ra"] },
                { "address": 0x40c, "mnemonic": "nop" } ] }
        ]))
        .unwrap();
        Binder::bind(
            &mut routine,
            &[],
            &[StringRef {
                address: 0x410010,
                content: "hi".into(),
                encoding: "ascii".into(),
            }],
        );
        let arch = resolve("mips").unwrap();
        let (mut ir, _) = IrBuilder::build(&routine, arch.as_ref());
        let stats = PrePasses::new(&routine, arch.as_ref()).run(&mut ir);
        assert_eq!(stats.folded_constants, 1);
        assert_eq!(stats.dead_stores, 1);
        let values: Vec<String> = ir.blocks[0]
            .statements
            .iter()
            .filter_map(|s| match &s.kind {
                StatementKind::Assign { src, .. } => Some(src.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec!["\"hi\"".to_string()]);
    }
}
