//! ARM / Thumb / AArch64 instruction table.
//!
//! Handles the `s` flag-setting suffix, Thumb `.w`/`.n` width suffixes,
//! conditional branches in both the `beq` and `b.eq` spellings, shifted register
//! operands, and pre/post-indexed addressing (emitted as a separate base update).

use super::{
    assign, assign_flags, assign_signed, nothing, not, offset, one, ret, shifted,
    InstructionTranslator, Operands, Translation,
};
use crate::decompiler::ir::instruction::{BinaryOp, CompareKind, Cond, Expr, StatementKind, UnaryOp, Width};
use crate::decompiler::routine::Operand;
use smallvec::{smallvec, SmallVec};

/// ARM translator; `aarch64` selects 64-bit addresses and `x`/`w` register widths.
pub struct Arm {
    aarch64: bool,
}

impl Arm {
    pub fn new(aarch64: bool) -> Self {
        Self { aarch64 }
    }
}

const FLAG_SETTING: [&str; 15] = [
    "add", "sub", "rsb", "mov", "mvn", "and", "orr", "eor", "bic", "lsl", "lsr", "asr", "mul",
    "neg", "adc",
];

fn condition(code: &str) -> Option<Cond> {
    Some(match code {
        "eq" => Cond::Eq,
        "ne" => Cond::Ne,
        "cs" | "hs" => Cond::AboveEq,
        "cc" | "lo" => Cond::Below,
        "mi" => Cond::Sign,
        "pl" => Cond::NotSign,
        "vs" => Cond::Overflow,
        "vc" => Cond::NoOverflow,
        "hi" => Cond::Above,
        "ls" => Cond::BelowEq,
        "ge" => Cond::Ge,
        "lt" => Cond::Lt,
        "gt" => Cond::Gt,
        "le" => Cond::Le,
        _ => return None,
    })
}

/// Split `adds.w` into (`add`, sets_flags).
fn normalize(mnemonic: &str) -> (&str, bool) {
    let base = mnemonic
        .strip_suffix(".w")
        .or_else(|| mnemonic.strip_suffix(".n"))
        .unwrap_or(mnemonic);
    if let Some(stem) = base.strip_suffix('s') {
        if FLAG_SETTING.contains(&stem) {
            return (stem, true);
        }
    }
    (base, false)
}

/// Load/store access width and signedness from the mnemonic suffix.
fn access(suffix: &str, register: Width) -> Option<(Width, bool)> {
    Some(match suffix {
        "" => (register, false),
        "b" => (Width::W8, false),
        "h" => (Width::W16, false),
        "sb" => (Width::W8, true),
        "sh" => (Width::W16, true),
        "sw" => (Width::W32, true),
        _ => return None,
    })
}

impl Arm {
    /// Flexible second operand: value plus an optional trailing shift.
    fn operand2(&self, ops: &Operands<'_>, idx: usize, width: Width) -> Option<Expr> {
        let value = ops.read(idx, width)?;
        match ops.get(idx + 1) {
            Some(Operand::Shift { op, amount }) => Some(shifted(value, op, *amount)),
            _ => Some(value),
        }
    }

    /// Source operands of a data-processing instruction (`op d, a, b` or the
    /// two-operand Thumb form `op d, b`).
    fn sources(&self, ops: &Operands<'_>, width: Width) -> Option<(Expr, Expr)> {
        let explicit = ops.len() >= 3 && !matches!(ops.get(2), Some(Operand::Shift { .. }));
        if explicit {
            Some((ops.read(1, width)?, self.operand2(ops, 2, width)?))
        } else {
            Some((ops.read(0, width)?, self.operand2(ops, 1, width)?))
        }
    }

    fn data_processing(&self, ops: &Operands<'_>, base: &str, sets_flags: bool) -> Option<Translation> {
        let width = ops.width_of(0);
        let (a, b) = self.sources(ops, width)?;
        let src = match base {
            "add" | "adc" => Expr::binary(BinaryOp::Add, a, b),
            "sub" => Expr::binary(BinaryOp::Sub, a, b),
            "rsb" => Expr::binary(BinaryOp::Sub, b, a),
            "mul" => Expr::binary(BinaryOp::Mul, a, b),
            "sdiv" | "udiv" => Expr::binary(BinaryOp::Div, a, b),
            "and" => Expr::binary(BinaryOp::And, a, b),
            "orr" => Expr::binary(BinaryOp::Or, a, b),
            "orn" => Expr::binary(BinaryOp::Or, a, not(b)),
            "eor" => Expr::binary(BinaryOp::Xor, a, b),
            "bic" => Expr::binary(BinaryOp::And, a, not(b)),
            "lsl" => Expr::binary(BinaryOp::Shl, a, b),
            "lsr" => Expr::binary(BinaryOp::Shr, a, b),
            "asr" => Expr::binary(BinaryOp::Sar, a, b),
            _ => return None,
        };
        // `subs xzr, a, b` is `cmp a, b`
        if sets_flags && ops.is_zero_register(0) {
            if let Expr::Binary { op, lhs, rhs } = src {
                let kind = if op == BinaryOp::And {
                    CompareKind::Test
                } else {
                    CompareKind::Signed
                };
                return Some(one(StatementKind::Compare {
                    lhs: *lhs,
                    rhs: *rhs,
                    kind,
                }));
            }
            return None;
        }
        let dst = ops.dst(0)?;
        Some(one(StatementKind::Assign {
            dst,
            src,
            signed: base == "sdiv" || base == "asr",
            sets_flags,
            cast: None,
        }))
    }

    fn load(&self, ops: &Operands<'_>, suffix: &str) -> Option<Translation> {
        let dst = ops.dst(0)?;
        let (width, signed) = access(suffix, ops.width_of(0))?;
        let mut out: Translation = smallvec![assign(dst, ops.memory(1, width, signed)?)];
        out.extend(self.index_update(ops, 1));
        Some(out)
    }

    fn store(&self, ops: &Operands<'_>, suffix: &str) -> Option<Translation> {
        let (width, _) = access(suffix, ops.width_of(0))?;
        let src = ops.read(0, width)?;
        let mut out: Translation = smallvec![assign(ops.memory(1, width, false)?, src)];
        out.extend(self.index_update(ops, 1));
        Some(out)
    }

    /// `ldp`/`stp`/`ldrd`/`strd`: two registers at consecutive slots.
    fn pair(&self, ops: &Operands<'_>, load: bool) -> Option<Translation> {
        let width = ops.width_of(0);
        let first = ops.memory(2, width, false)?;
        let Expr::Memory { addr, .. } = &first else {
            return None;
        };
        let second = Expr::memory(
            offset((**addr).clone(), i64::from(width.bytes()), self.pointer_width()),
            width,
            false,
        );
        let mut out: Translation = SmallVec::new();
        if load {
            out.push(assign(ops.dst(0)?, first));
            out.push(assign(ops.dst(1)?, second));
        } else {
            out.push(assign(first, ops.read(0, width)?));
            out.push(assign(second, ops.read(1, width)?));
        }
        out.extend(self.index_update(ops, 2));
        Some(out)
    }

    /// Base register update for pre-indexed writeback or a post-index immediate.
    fn index_update(&self, ops: &Operands<'_>, mem: usize) -> Option<StatementKind> {
        if let Some(update) = ops.writeback(mem) {
            return Some(update);
        }
        let delta = ops.immediate(mem + 1)?;
        let base = ops.memory_base(mem)?;
        Some(ops.base_update(base, delta))
    }

    fn register_list_has(ops: &Operands<'_>, register: &str) -> bool {
        ops.inst.operands.iter().any(|op| match op {
            Operand::RegisterList(regs) => regs.iter().any(|r| r == register),
            _ => false,
        })
    }
}

impl InstructionTranslator for Arm {
    fn name(&self) -> &'static str {
        "arm"
    }

    fn pointer_width(&self) -> Width {
        if self.aarch64 {
            Width::W64
        } else {
            Width::W32
        }
    }

    fn register_width(&self, name: &str) -> Width {
        if !self.aarch64 {
            return Width::W32;
        }
        if name.starts_with('w') {
            Width::W32
        } else {
            Width::W64
        }
    }

    fn register_alias(&self, name: &str) -> Option<&'static str> {
        match name {
            "ip" => Some("r12"),
            "r13" => Some("sp"),
            "r14" | "x30" => Some("lr"),
            "r15" => Some("pc"),
            "r11" | "x29" => Some("fp"),
            _ => None,
        }
    }

    fn zero_registers(&self) -> &'static [&'static str] {
        &["xzr", "wzr"]
    }

    fn stack_pointers(&self) -> &'static [&'static str] {
        &["sp"]
    }

    fn frame_pointers(&self) -> &'static [&'static str] {
        &["fp"]
    }

    fn translate_instruction(&self, ops: &Operands<'_>) -> Option<Translation> {
        let (base, sets_flags) = normalize(ops.mnemonic());
        let ptr = self.pointer_width();

        match base {
            "nop" | "push" | "stmdb" | "stmfd" => Some(nothing()),
            "pop" | "ldmia" | "ldmfd" => {
                if Self::register_list_has(ops, "pc") {
                    Some(ret())
                } else {
                    Some(nothing())
                }
            }
            "mov" | "mvn" => {
                let width = ops.width_of(0);
                let mut src = self.operand2(ops, 1, width)?;
                if base == "mvn" {
                    src = not(src);
                }
                let dst = ops.dst(0)?;
                Some(one(if sets_flags {
                    assign_flags(dst, src)
                } else {
                    assign(dst, src)
                }))
            }
            "movw" => Some(one(assign(ops.dst(0)?, ops.read(1, Width::W32)?))),
            "movt" => {
                let dst = ops.dst(0)?;
                let high = ops.immediate(1)? << 16;
                let src = Expr::binary(
                    BinaryOp::Or,
                    Expr::binary(BinaryOp::And, dst.clone(), Expr::constant(0xffff, Width::W32)),
                    Expr::constant(high, Width::W32),
                );
                Some(one(assign(dst, src)))
            }
            "movz" | "movk" | "movn" => {
                let dst = ops.dst(0)?;
                let width = ops.width_of(0);
                let shift = match ops.get(2) {
                    Some(Operand::Shift { amount, .. }) => *amount,
                    _ => 0,
                };
                let value = ops.immediate(1)?.wrapping_shl(shift as u32);
                let src = match base {
                    "movz" => Expr::constant(value, width),
                    "movn" => Expr::constant(!value, width),
                    _ => Expr::binary(
                        BinaryOp::Or,
                        Expr::binary(
                            BinaryOp::And,
                            dst.clone(),
                            Expr::constant(!(0xffffi64.wrapping_shl(shift as u32)), width),
                        ),
                        Expr::constant(value, width),
                    ),
                };
                Some(one(assign(dst, src)))
            }
            "adr" | "adrp" => Some(one(assign(ops.dst(0)?, ops.call_target(1)?))),
            "add" | "adc" | "sub" | "rsb" | "mul" | "sdiv" | "udiv" | "and" | "orr" | "orn"
            | "eor" | "bic" | "lsl" | "lsr" | "asr" => self.data_processing(ops, base, sets_flags),
            "neg" => {
                let width = ops.width_of(0);
                let src = Expr::unary(UnaryOp::Neg, self.operand2(ops, 1, width)?);
                Some(one(if sets_flags {
                    assign_flags(ops.dst(0)?, src)
                } else {
                    assign(ops.dst(0)?, src)
                }))
            }
            "mla" | "mls" => {
                let width = ops.width_of(0);
                let product = Expr::binary(BinaryOp::Mul, ops.read(1, width)?, ops.read(2, width)?);
                let acc = ops.read(3, width)?;
                let src = if base == "mla" {
                    Expr::binary(BinaryOp::Add, product, acc)
                } else {
                    Expr::binary(BinaryOp::Sub, acc, product)
                };
                Some(one(assign(ops.dst(0)?, src)))
            }
            "cmp" | "cmn" | "tst" => {
                let width = ops.width_of(0);
                let lhs = ops.read(0, width)?;
                let mut rhs = self.operand2(ops, 1, width)?;
                let kind = match base {
                    "tst" => CompareKind::Test,
                    "cmn" => {
                        rhs = Expr::unary(UnaryOp::Neg, rhs);
                        CompareKind::Signed
                    }
                    _ => CompareKind::Signed,
                };
                Some(one(StatementKind::Compare { lhs, rhs, kind }))
            }
            "sxtb" | "sxth" | "sxtw" | "uxtb" | "uxth" => {
                let narrow = match &base[3..] {
                    "b" => Width::W8,
                    "h" => Width::W16,
                    _ => Width::W32,
                };
                let src = Expr::reg(ops.register_name(1)?, narrow);
                let dst = ops.dst(0)?;
                Some(one(if base.starts_with('s') {
                    assign_signed(dst, src)
                } else {
                    assign(dst, src)
                }))
            }
            "cset" => {
                let cond = condition(ops.register_name(1)?)?;
                Some(one(assign(ops.dst(0)?, Expr::Flags(cond))))
            }
            "ldp" | "ldrd" => self.pair(ops, true),
            "stp" | "strd" => self.pair(ops, false),
            "b" => Some(one(StatementKind::Jump {
                target: Expr::constant(ops.target(0)? as i64, ptr),
            })),
            "bl" | "blx" | "blr" => Some(one(StatementKind::Call {
                target: ops.call_target(0)?,
            })),
            "bx" if ops.register_name(0) == Some("lr") => Some(ret()),
            "bx" | "br" => Some(one(StatementKind::Jump {
                target: ops.read(0, ptr)?,
            })),
            "ret" => Some(ret()),
            "cbz" | "cbnz" => {
                let value = ops.read(0, ops.width_of(0))?;
                let zero = Expr::constant(0, ops.width_of(0));
                let op = if base == "cbz" { BinaryOp::Eq } else { BinaryOp::Ne };
                Some(one(StatementKind::Branch {
                    cond: Expr::binary(op, value, zero),
                    target: ops.target(1)?,
                }))
            }
            "tbz" | "tbnz" => {
                let width = ops.width_of(0);
                let bit = ops.immediate(1)?;
                let masked = Expr::binary(
                    BinaryOp::And,
                    ops.read(0, width)?,
                    Expr::constant(1i64.wrapping_shl(bit as u32), width),
                );
                let op = if base == "tbz" { BinaryOp::Eq } else { BinaryOp::Ne };
                Some(one(StatementKind::Branch {
                    cond: Expr::binary(op, masked, Expr::constant(0, width)),
                    target: ops.target(2)?,
                }))
            }
            _ => {
                for prefix in ["ldur", "ldr"] {
                    if let Some(suffix) = base.strip_prefix(prefix) {
                        return self.load(ops, suffix);
                    }
                }
                for prefix in ["stur", "str"] {
                    if let Some(suffix) = base.strip_prefix(prefix) {
                        return self.store(ops, suffix);
                    }
                }
                let code = base.strip_prefix("b.").or_else(|| base.strip_prefix('b'))?;
                if code == "al" {
                    return Some(one(StatementKind::Jump {
                        target: Expr::constant(ops.target(0)? as i64, ptr),
                    }));
                }
                let cond = condition(code)?;
                Some(one(super::branch_on(cond, ops.target(0)?)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::translate_with;
    use crate::decompiler::loader::GraphLoader;
    use serde_json::json;

    fn translate(arch: &Arm, mnemonic: &str, operands: serde_json::Value) -> Translation {
        let routine = GraphLoader::load(&json!([{
            "address": 0x100,
            "instructions": [ { "address": 0x100, "mnemonic": mnemonic, "operands": operands } ]
        }]))
        .unwrap();
        translate_with(arch, &routine.blocks[0].instructions[0], &routine)
    }

    #[test]
    fn mnemonic_normalization() {
        assert_eq!(normalize("adds"), ("add", true));
        assert_eq!(normalize("add.w"), ("add", false));
        assert_eq!(normalize("bls"), ("bls", false));
        assert_eq!(normalize("movs"), ("mov", true));
    }

    #[test]
    fn three_operand_arithmetic_with_shift() {
        let out = translate(&Arm::new(false), "add", json!(["r0", "r1", "r2", "lsl #2"]));
        match &out[0] {
            StatementKind::Assign { src, .. } => assert_eq!(src.to_string(), "(r1 + (r2 << 2))"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn signed_byte_load_with_post_index() {
        let out = translate(&Arm::new(false), "ldrsb", json!(["r0", "[r1]", "#1"]));
        assert_eq!(out.len(), 2);
        match &out[0] {
            StatementKind::Assign { src: Expr::Memory { width, signed, .. }, .. } => {
                assert_eq!(*width, Width::W8);
                assert!(*signed);
            }
            other => panic!("unexpected {other:?}"),
        }
        match &out[1] {
            StatementKind::Assign { dst, src, .. } => {
                assert_eq!(dst.to_string(), "r1");
                assert_eq!(src.to_string(), "(r1 + 1)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn branches_and_returns() {
        let arch = Arm::new(false);
        assert_eq!(
            translate(&arch, "bne", json!(["0x200"]))[0],
            super::super::branch_on(Cond::Ne, 0x200)
        );
        assert_eq!(
            translate(&arch, "ble", json!(["0x200"]))[0],
            super::super::branch_on(Cond::Le, 0x200)
        );
        assert!(matches!(translate(&arch, "bl", json!(["0x300"]))[0], StatementKind::Call { .. }));
        assert_eq!(translate(&arch, "bx", json!(["lr"]))[0], StatementKind::Return { value: None });
        assert_eq!(
            translate(&arch, "pop", json!(["{r4, pc}"]))[0],
            StatementKind::Return { value: None }
        );
        assert!(translate(&arch, "push", json!(["{r4, lr}"])).is_empty());
    }

    #[test]
    fn aarch64_compare_through_zero_register() {
        let arch = Arm::new(true);
        let out = translate(&arch, "subs", json!(["xzr", "x0", "#1"]));
        assert!(matches!(out[0], StatementKind::Compare { kind: CompareKind::Signed, .. }));
        let out = translate(&arch, "b.ge", json!(["0x140"]));
        assert_eq!(out[0], super::super::branch_on(Cond::Ge, 0x140));
        assert_eq!(arch.register_width("w3"), Width::W32);
        assert_eq!(arch.register_width("x3"), Width::W64);
    }

    #[test]
    fn cbz_compares_with_zero() {
        let out = translate(&Arm::new(false), "cbz", json!(["r3", "0x180"]));
        match &out[0] {
            StatementKind::Branch { cond, target } => {
                assert_eq!(cond.to_string(), "(r3 == 0)");
                assert_eq!(*target, 0x180);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
