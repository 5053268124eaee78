//! Variable Naming
//!
//! Gives registers and stack slots the names they are shown under.
//!
//! # Naming Strategy
//! - Registers take the architecture's conventional alias (`r13` → `sp`, `s8` → `fp`)
//! - A memory access at a constant offset from the stack or frame pointer becomes
//!   a local variable: `var_N` for locals, `arg_N` for frame slots above the saved
//!   frame pointer
//! - Slots are numbered in the order they first appear in the rendered output, so
//!   the same routine always yields the same names
//!
//! # Memory Optimizations
//! - Slot table is a `BTreeMap` keyed by (base, offset); a routine rarely has more
//!   than a few dozen slots

use crate::decompiler::arch::InstructionTranslator;
use crate::decompiler::ir::instruction::{BinaryOp, Expr};
use crate::decompiler::structurer::StructuredNode;
use std::collections::BTreeMap;

/// Register the slot offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SlotBase {
    Stack,
    Frame,
}

/// Register and stack-slot namer for one routine.
pub struct VariableNamer<'a> {
    arch: &'a dyn InstructionTranslator,
    /// Map from (base, offset) to variable name
    slots: BTreeMap<(SlotBase, i64), String>,
    next_var: usize,
    next_arg: usize,
}

impl<'a> VariableNamer<'a> {
    pub fn new(arch: &'a dyn InstructionTranslator) -> Self {
        Self {
            arch,
            slots: BTreeMap::new(),
            next_var: 0usize,
            next_arg: 0usize,
        }
    }

    /// Name every register and stack slot in the tree.
    ///
    /// # Returns
    /// `usize` - Number of distinct stack slots turned into variables
    pub fn apply(&mut self, root: &mut StructuredNode) -> usize {
        root.for_each_expr_mut(&mut |expr| {
            expr.rewrite(&mut |e| {
                if let Expr::Register { name, .. } = e {
                    if let Some(alias) = self.arch.register_alias(name) {
                        *name = alias.to_string();
                    }
                }
            });
            expr.rewrite(&mut |e| {
                if let Some(variable) = self.slot_variable(e) {
                    *e = variable;
                }
            });
        });
        log::debug!("named {} stack slots", self.slots.len());
        self.slots.len()
    }

    /// Variable replacing a stack-slot access, if `expr` is one.
    fn slot_variable(&mut self, expr: &Expr) -> Option<Expr> {
        let Expr::Memory { addr, width, .. } = expr else {
            return None;
        };
        let (base, offset) = self.slot(addr)?;
        let name = match self.slots.get(&(base, offset)) {
            Some(name) => name.clone(),
            None => {
                let name = match (base, offset) {
                    (SlotBase::Frame, off) if off > 0 => {
                        self.next_arg += 1;
                        format!("arg_{}", self.next_arg - 1)
                    }
                    _ => {
                        self.next_var += 1;
                        format!("var_{}", self.next_var - 1)
                    }
                };
                self.slots.insert((base, offset), name.clone());
                name
            }
        };
        Some(Expr::reg(name, *width))
    }

    /// Base and offset of `sp ± c` / `fp ± c`. Offset 0 from the frame pointer is
    /// the saved frame pointer itself and is left alone.
    fn slot(&self, addr: &Expr) -> Option<(SlotBase, i64)> {
        let (register, offset) = match addr {
            Expr::Register { name, .. } => (name.as_str(), 0),
            Expr::Binary { op, lhs, rhs } => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Register { name, .. }, Expr::Const { value, .. }) => match op {
                    BinaryOp::Add => (name.as_str(), *value),
                    BinaryOp::Sub => (name.as_str(), value.checked_neg()?),
                    _ => return None,
                },
                _ => return None,
            },
            _ => return None,
        };
        if self.arch.stack_pointers().contains(&register) {
            Some((SlotBase::Stack, offset))
        } else if self.arch.frame_pointers().contains(&register) && offset != 0 {
            Some((SlotBase::Frame, offset))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::{assign, resolve};
    use crate::decompiler::ir::instruction::{Statement, Width};

    fn leaf(id: u32, dst: Expr, src: Expr) -> StructuredNode {
        StructuredNode::Statement(Statement {
            id,
            origin: 0x1000 + id as u64,
            kind: assign(dst, src),
        })
    }

    fn slot(base: &str, op: BinaryOp, off: i64) -> Expr {
        Expr::memory(
            Expr::binary(op, Expr::reg(base, Width::W64), Expr::constant(off, Width::W64)),
            Width::W32,
            false,
        )
    }

    #[test]
    fn frame_slots_become_locals_and_arguments() {
        let arch = resolve("x86_64").unwrap();
        let mut root = StructuredNode::Sequence(vec![
            leaf(0, slot("rbp", BinaryOp::Sub, 4), Expr::constant(1, Width::W32)),
            leaf(1, Expr::reg("eax", Width::W32), slot("rbp", BinaryOp::Add, 0x10)),
            leaf(2, Expr::reg("ecx", Width::W32), slot("rbp", BinaryOp::Sub, 4)),
        ]);
        let named = VariableNamer::new(arch.as_ref()).apply(&mut root);
        assert_eq!(named, 2);
        let rendered: Vec<String> = root
            .statements()
            .iter()
            .flat_map(|s| s.expressions().into_iter().map(|e| e.to_string()).collect::<Vec<_>>())
            .collect();
        assert_eq!(rendered, vec!["var_0", "1", "eax", "arg_0", "ecx", "var_0"]);
    }

    #[test]
    fn aliases_apply_before_slot_detection() {
        let arch = resolve("arm").unwrap();
        let mut root = leaf(
            0,
            Expr::reg("r0", Width::W32),
            Expr::memory(
                Expr::binary(BinaryOp::Add, Expr::reg("r13", Width::W32), Expr::constant(8, Width::W32)),
                Width::W32,
                false,
            ),
        );
        VariableNamer::new(arch.as_ref()).apply(&mut root);
        assert_eq!(root.statements()[0].expressions()[1].to_string(), "var_0");
    }

    #[test]
    fn non_slot_memory_is_untouched() {
        let arch = resolve("x86_64").unwrap();
        let mut root = leaf(
            0,
            Expr::reg("eax", Width::W32),
            Expr::memory(Expr::reg("rdi", Width::W64), Width::W32, false),
        );
        assert_eq!(VariableNamer::new(arch.as_ref()).apply(&mut root), 0);
        assert_eq!(root.statements()[0].expressions()[1].to_string(), "*(rdi)");
    }
}
