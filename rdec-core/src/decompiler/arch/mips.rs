//! MIPS instruction table.
//!
//! Branches and jumps have a delay slot; the IR builder moves the slot
//! instruction in front of the branch, so translations here ignore it. The
//! `hi`/`lo` multiply/divide results are modelled as ordinary registers.

use super::{assign, assign_signed, nothing, not, offset, one, ret, InstructionTranslator, Operands, Translation};
use crate::decompiler::ir::instruction::{BinaryOp, Expr, StatementKind, UnaryOp, Width};
use crate::decompiler::routine::Instruction;
use smallvec::smallvec;

/// MIPS translator; `wide` selects MIPS64.
pub struct Mips {
    wide: bool,
}

impl Mips {
    pub fn new(wide: bool) -> Self {
        Self { wide }
    }

    fn width(&self) -> Width {
        if self.wide {
            Width::W64
        } else {
            Width::W32
        }
    }

    fn three(&self, ops: &Operands<'_>, op: BinaryOp) -> Option<Translation> {
        let w = self.width();
        let src = Expr::binary(op, ops.read(1, w)?, ops.read(2, w)?);
        Some(one(assign(ops.dst(0)?, src)))
    }

    fn load(&self, ops: &Operands<'_>, width: Width, signed: bool) -> Option<Translation> {
        let src = ops.memory(1, width, signed)?;
        let dst = ops.dst(0)?;
        Some(one(if signed {
            assign_signed(dst, src)
        } else {
            assign(dst, src)
        }))
    }

    fn store(&self, ops: &Operands<'_>, width: Width) -> Option<Translation> {
        let dst = ops.memory(1, width, false)?;
        Some(one(assign(dst, ops.read(0, width)?)))
    }

    /// `b<cond> rs, rt, target` / `b<cond>z rs, target`.
    fn branch(&self, ops: &Operands<'_>, op: BinaryOp, against_zero: bool) -> Option<Translation> {
        let w = self.width();
        let lhs = ops.read(0, w)?;
        let (rhs, target_idx) = if against_zero {
            (Expr::constant(0, w), 1)
        } else {
            (ops.read(1, w)?, 2)
        };
        Some(one(StatementKind::Branch {
            cond: Expr::binary(op, lhs, rhs),
            target: ops.target(target_idx)?,
        }))
    }
}

/// Mnemonics followed by a delay slot.
const DELAYED: [&str; 22] = [
    "b", "bal", "beq", "beql", "bne", "bnel", "beqz", "bnez", "blez", "blezl", "bgtz", "bgtzl",
    "bltz", "bltzl", "bgez", "bgezl", "bgezal", "bltzal", "j", "jal", "jalr", "jr",
];

impl InstructionTranslator for Mips {
    fn name(&self) -> &'static str {
        "mips"
    }

    fn pointer_width(&self) -> Width {
        self.width()
    }

    fn has_delay_slot(&self, inst: &Instruction) -> bool {
        DELAYED.contains(&inst.mnemonic.as_str())
    }

    fn register_alias(&self, name: &str) -> Option<&'static str> {
        match name {
            "s8" | "r30" => Some("fp"),
            "r29" => Some("sp"),
            "r31" => Some("ra"),
            "r0" => Some("zero"),
            _ => None,
        }
    }

    fn zero_registers(&self) -> &'static [&'static str] {
        &["zero", "r0"]
    }

    fn stack_pointers(&self) -> &'static [&'static str] {
        &["sp"]
    }

    fn frame_pointers(&self) -> &'static [&'static str] {
        &["fp"]
    }

    fn translate_instruction(&self, ops: &Operands<'_>) -> Option<Translation> {
        let w = self.width();
        match ops.mnemonic() {
            "nop" | "ssnop" | "sync" => Some(nothing()),
            "li" => Some(one(assign(ops.dst(0)?, ops.read(1, w)?))),
            "lui" => {
                let value = ops.immediate(1)?.wrapping_shl(16);
                Some(one(assign(ops.dst(0)?, Expr::constant(value, w))))
            }
            "move" => Some(one(assign(ops.dst(0)?, ops.read(1, w)?))),
            "addiu" | "addi" | "daddiu" | "daddi" => {
                let value = ops.immediate(2)?;
                let src = offset(ops.read(1, w)?, value, w);
                Some(one(assign(ops.dst(0)?, src)))
            }
            "addu" | "add" | "daddu" => self.three(ops, BinaryOp::Add),
            "subu" | "sub" | "dsubu" => self.three(ops, BinaryOp::Sub),
            "and" | "andi" => self.three(ops, BinaryOp::And),
            "or" | "ori" => self.three(ops, BinaryOp::Or),
            "xor" | "xori" => self.three(ops, BinaryOp::Xor),
            "mul" => self.three(ops, BinaryOp::Mul),
            "sll" | "sllv" | "dsll" => self.three(ops, BinaryOp::Shl),
            "srl" | "srlv" | "dsrl" => self.three(ops, BinaryOp::Shr),
            "sra" | "srav" | "dsra" => self.three(ops, BinaryOp::Sar),
            "slt" | "slti" => self.three(ops, BinaryOp::Lt),
            "sltu" | "sltiu" => self.three(ops, BinaryOp::Ult),
            "nor" => {
                let src = not(Expr::binary(BinaryOp::Or, ops.read(1, w)?, ops.read(2, w)?));
                Some(one(assign(ops.dst(0)?, src)))
            }
            "negu" | "neg" => Some(one(assign(
                ops.dst(0)?,
                Expr::unary(UnaryOp::Neg, ops.read(1, w)?),
            ))),
            "not" => Some(one(assign(ops.dst(0)?, not(ops.read(1, w)?)))),
            "mult" | "multu" => {
                let product = Expr::binary(BinaryOp::Mul, ops.read(0, w)?, ops.read(1, w)?);
                Some(one(assign(Expr::reg("lo", w), product)))
            }
            "div" | "divu" if ops.len() == 2 => {
                let (a, b) = (ops.read(0, w)?, ops.read(1, w)?);
                Some(smallvec![
                    assign(Expr::reg("lo", w), Expr::binary(BinaryOp::Div, a.clone(), b.clone())),
                    assign(Expr::reg("hi", w), Expr::binary(BinaryOp::Mod, a, b)),
                ])
            }
            "div" | "divu" => self.three(ops, BinaryOp::Div),
            "mflo" => Some(one(assign(ops.dst(0)?, Expr::reg("lo", w)))),
            "mfhi" => Some(one(assign(ops.dst(0)?, Expr::reg("hi", w)))),
            "lb" => self.load(ops, Width::W8, true),
            "lbu" => self.load(ops, Width::W8, false),
            "lh" => self.load(ops, Width::W16, true),
            "lhu" => self.load(ops, Width::W16, false),
            "lw" => self.load(ops, Width::W32, self.wide),
            "lwu" => self.load(ops, Width::W32, false),
            "ld" => self.load(ops, Width::W64, false),
            "sb" => self.store(ops, Width::W8),
            "sh" => self.store(ops, Width::W16),
            "sw" => self.store(ops, Width::W32),
            "sd" => self.store(ops, Width::W64),
            "beq" | "beql" => self.branch(ops, BinaryOp::Eq, false),
            "bne" | "bnel" => self.branch(ops, BinaryOp::Ne, false),
            "beqz" => self.branch(ops, BinaryOp::Eq, true),
            "bnez" => self.branch(ops, BinaryOp::Ne, true),
            "blez" | "blezl" => self.branch(ops, BinaryOp::Le, true),
            "bgtz" | "bgtzl" => self.branch(ops, BinaryOp::Gt, true),
            "bltz" | "bltzl" => self.branch(ops, BinaryOp::Lt, true),
            "bgez" | "bgezl" => self.branch(ops, BinaryOp::Ge, true),
            "b" | "j" => Some(one(StatementKind::Jump {
                target: Expr::constant(ops.target(0)? as i64, w),
            })),
            "jal" | "bal" | "jalr" | "bgezal" | "bltzal" => {
                let idx = if ops.mnemonic().starts_with("bgez") || ops.mnemonic().starts_with("bltz") {
                    1
                } else {
                    ops.len().saturating_sub(1)
                };
                Some(one(StatementKind::Call {
                    target: ops.call_target(idx)?,
                }))
            }
            "jr" if ops.register_name(0) == Some("ra") => Some(ret()),
            "jr" => Some(one(StatementKind::Jump {
                target: ops.read(0, w)?,
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::translate_with;
    use crate::decompiler::loader::GraphLoader;
    use serde_json::json;

    fn translate(mnemonic: &str, operands: serde_json::Value) -> Translation {
        let routine = GraphLoader::load(&json!([{
            "address": 0x400,
            "instructions": [ { "address": 0x400, "mnemonic": mnemonic, "operands": operands } ]
        }]))
        .unwrap();
        translate_with(&Mips::new(false), &routine.blocks[0].instructions[0], &routine)
    }

    #[test]
    fn lui_shifts_immediate() {
        match &translate("lui", json!(["$a0", "0x40"]))[0] {
            StatementKind::Assign { dst, src, .. } => {
                assert_eq!(dst.to_string(), "a0");
                assert_eq!(src, &Expr::constant(0x400000, Width::W32));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_register_reads_as_constant() {
        match &translate("move", json!(["$v0", "$zero"]))[0] {
            StatementKind::Assign { src, .. } => assert_eq!(src, &Expr::constant(0, Width::W32)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn branch_compares_registers() {
        match &translate("bne", json!(["$a0", "$a1", "0x480"]))[0] {
            StatementKind::Branch { cond, target } => {
                assert_eq!(cond.to_string(), "(a0 != a1)");
                assert_eq!(*target, 0x480);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jr_ra_returns_and_loads_are_sized() {
        assert_eq!(translate("jr", json!(["$ra"]))[0], StatementKind::Return { value: None });
        match &translate("lhu", json!(["$v0", "2($a0)"]))[0] {
            StatementKind::Assign { src: Expr::Memory { width, signed, .. }, .. } => {
                assert_eq!(*width, Width::W16);
                assert!(!signed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn delay_slots_are_declared() {
        let routine = GraphLoader::load(&json!([{
            "address": 0x400,
            "instructions": [ { "address": 0x400, "mnemonic": "jal", "operands": ["0x500"] } ]
        }]))
        .unwrap();
        assert!(Mips::new(false).has_delay_slot(&routine.blocks[0].instructions[0]));
    }
}
