//! Data Flow Analysis
//!
//! Register def/use sets per IR statement and block-local dead-store detection.
//! Nothing here looks across block boundaries; liveness between blocks is not
//! tracked, so every register is assumed live at block exit.
//!
//! # Memory Optimizations
//! - `DefUse.defs` and `uses` use `SmallVec` (statements rarely touch more than a few registers)
//! - The dead-store result is a `BitVec` over statement positions
//!
//! # Dead Store Algorithm
//! Walk the block backwards keeping the set of registers that are written
//! again later with no read in between:
//! - A register assignment whose destination is in the set is dead
//! - Otherwise its destinations join the set and every register it reads
//!   (compared by register family, so `al` keeps `rax` alive) leaves the set
//! - Calls and unsupported placeholders may read anything and empty the set
//! - Flag-setting assignments are never reported, their flags may be consumed later

use crate::decompiler::arch::InstructionTranslator;
use crate::decompiler::ir::instruction::{Expr, Statement, StatementKind};
use bitvec::prelude::*;
use smallvec::SmallVec;

/// Registers written and read by one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefUse {
    pub defs: SmallVec<[String; 1]>,
    pub uses: SmallVec<[String; 4]>,
    /// Statement may read or write any register (calls, unknown instructions).
    pub opaque: bool,
}

/// Data flow analyzer over IR statements.
pub struct DataFlowAnalyzer;

impl DataFlowAnalyzer {
    /// Def/use sets of a single statement.
    ///
    /// A memory destination defines nothing but reads its address registers.
    pub fn def_use(statement: &Statement) -> DefUse {
        fn read(expr: &Expr, du: &mut DefUse) {
            for name in expr.registers() {
                if !du.uses.iter().any(|u| u == name) {
                    du.uses.push(name.to_string());
                }
            }
        }

        let mut du = DefUse::default();
        match &statement.kind {
            StatementKind::Assign { dst, src, .. } => {
                match dst {
                    Expr::Register { name, .. } => du.defs.push(name.clone()),
                    Expr::Memory { addr, .. } => read(addr, &mut du),
                    other => read(other, &mut du),
                }
                read(src, &mut du);
            }
            StatementKind::Compare { lhs, rhs, .. } => {
                read(lhs, &mut du);
                read(rhs, &mut du);
            }
            StatementKind::Branch { cond, .. } => read(cond, &mut du),
            StatementKind::Jump { target } => read(target, &mut du),
            StatementKind::Return { value } => {
                if let Some(value) = value {
                    read(value, &mut du);
                }
            }
            StatementKind::Call { target } => {
                read(target, &mut du);
                du.opaque = true;
            }
            StatementKind::Unsupported { .. } => du.opaque = true,
        }
        du
    }

    /// Positions of register stores overwritten before any read within the
    /// statement list.
    ///
    /// # Arguments
    /// * `statements` - Statements of one block, in order
    /// * `arch` - Used to compare reads by register family
    ///
    /// # Returns
    /// `BitVec<u32>` - One bit per statement, set when the statement is dead
    pub fn dead_stores(statements: &[Statement], arch: &dyn InstructionTranslator) -> BitVec<u32> {
        let mut dead: BitVec<u32> = bitvec![u32, Lsb0; 0; statements.len()];
        let mut overwritten: Vec<String> = Vec::new();

        for (idx, statement) in statements.iter().enumerate().rev() {
            let du = Self::def_use(statement);
            if du.opaque {
                overwritten.clear();
                continue;
            }
            if let StatementKind::Assign {
                dst: Expr::Register { name, .. },
                sets_flags: false,
                ..
            } = &statement.kind
            {
                if overwritten.iter().any(|o| o == name) {
                    dead.set(idx, true);
                    continue;
                }
            }
            for def in du.defs {
                if !overwritten.contains(&def) {
                    overwritten.push(def);
                }
            }
            for used in &du.uses {
                let family = arch.register_family(used);
                overwritten.retain(|o| arch.register_family(o) != family);
            }
        }
        dead
    }
}
