//! PowerPC (32-bit) instruction table.
//!
//! A trailing `.` on a mnemonic records into `cr0` and is modelled as a
//! flag-setting assignment. Branch prediction hints (`+`/`-`) are ignored, as is
//! an explicit condition register field operand (`cmpwi cr7, r3, 0`).

use super::{
    assign, assign_flags, assign_signed, branch_on, nothing, not, offset, one, ret, InstructionTranslator,
    Operands, Translation,
};
use crate::decompiler::ir::instruction::{BinaryOp, CompareKind, Cond, Expr, StatementKind, UnaryOp, Width};
use crate::decompiler::routine::Operand;
use smallvec::smallvec;

const W: Width = Width::W32;

#[derive(Default)]
pub struct PowerPc;

impl PowerPc {
    pub fn new() -> Self {
        Self
    }
}

/// Normalized view of one instruction: bare mnemonic, record bit and the
/// index of the first operand after an optional `crN` field.
struct Form<'m> {
    stem: &'m str,
    record: bool,
    first: usize,
}

fn form<'m>(ops: &'m Operands<'_>) -> Form<'m> {
    let raw = ops.mnemonic().trim_end_matches(['+', '-']);
    let (stem, record) = match raw.strip_suffix('.') {
        Some(stem) => (stem, true),
        None => (raw, false),
    };
    let first = match ops.register_name(0) {
        Some(name) if name.starts_with("cr") && ops.len() > 1 => 1,
        _ => 0,
    };
    Form { stem, record, first }
}

fn write(dst: Expr, src: Expr, record: bool) -> StatementKind {
    if record {
        assign_flags(dst, src)
    } else {
        assign(dst, src)
    }
}

fn three(ops: &Operands<'_>, op: BinaryOp, record: bool) -> Option<Translation> {
    let src = Expr::binary(op, ops.read(1, W)?, ops.read(2, W)?);
    Some(one(write(ops.dst(0)?, src, record)))
}

/// Immediate operand shifted into the upper halfword (`lis`, `addis`, `oris`).
fn high(ops: &Operands<'_>, idx: usize) -> Option<Expr> {
    Some(Expr::constant(ops.immediate(idx)?.wrapping_shl(16), W))
}

fn load(ops: &Operands<'_>, stem: &str) -> Option<Translation> {
    let (width, signed) = match stem.trim_end_matches(['u', 'x']) {
        "lwz" | "lwzu" => (Width::W32, false),
        "lhz" => (Width::W16, false),
        "lha" => (Width::W16, true),
        "lbz" => (Width::W8, false),
        _ => return None,
    };
    let src = if stem.ends_with('x') {
        Expr::memory(
            Expr::binary(BinaryOp::Add, ops.read(1, W)?, ops.read(2, W)?),
            width,
            signed,
        )
    } else {
        ops.memory(1, width, signed)?
    };
    let dst = ops.dst(0)?;
    let mut out: Translation = smallvec![if signed {
        assign_signed(dst, src)
    } else {
        assign(dst, src)
    }];
    if is_update(stem) {
        out.extend(update_base(ops));
    }
    Some(out)
}

fn store(ops: &Operands<'_>, stem: &str) -> Option<Translation> {
    let width = match stem.trim_end_matches(['u', 'x']) {
        "stw" => Width::W32,
        "sth" => Width::W16,
        "stb" => Width::W8,
        _ => return None,
    };
    let dst = if stem.ends_with('x') {
        Expr::memory(
            Expr::binary(BinaryOp::Add, ops.read(1, W)?, ops.read(2, W)?),
            width,
            false,
        )
    } else {
        ops.memory(1, width, false)?
    };
    let mut out: Translation = smallvec![assign(dst, ops.read(0, width)?)];
    if is_update(stem) {
        out.extend(update_base(ops));
    }
    Some(out)
}

fn is_update(stem: &str) -> bool {
    stem.trim_end_matches('x').ends_with('u')
}

/// `rA = rA + d` after an update-form access.
fn update_base(ops: &Operands<'_>) -> Option<StatementKind> {
    let base = ops.memory_base(1)?;
    match ops.get(1)? {
        Operand::Memory { disp, .. } => Some(ops.base_update(base, *disp)),
        _ => None,
    }
}

fn condition(stem: &str) -> Option<Cond> {
    Some(match stem {
        "beq" => Cond::Eq,
        "bne" => Cond::Ne,
        "blt" => Cond::Lt,
        "ble" | "bng" => Cond::Le,
        "bgt" => Cond::Gt,
        "bge" | "bnl" => Cond::Ge,
        "bso" | "bun" => Cond::Overflow,
        "bns" | "bnu" => Cond::NoOverflow,
        _ => return None,
    })
}

impl InstructionTranslator for PowerPc {
    fn name(&self) -> &'static str {
        "ppc"
    }

    fn pointer_width(&self) -> Width {
        W
    }

    fn register_alias(&self, name: &str) -> Option<&'static str> {
        match name {
            "r1" => Some("sp"),
            "r2" => Some("toc"),
            _ => None,
        }
    }

    fn stack_pointers(&self) -> &'static [&'static str] {
        &["sp", "r1"]
    }

    fn frame_pointers(&self) -> &'static [&'static str] {
        &[]
    }

    fn translate_instruction(&self, ops: &Operands<'_>) -> Option<Translation> {
        let Form { stem, record, first } = form(ops);
        match stem {
            "nop" | "sync" | "isync" => Some(nothing()),
            "li" => Some(one(assign(ops.dst(0)?, ops.read(1, W)?))),
            "lis" => Some(one(assign(ops.dst(0)?, high(ops, 1)?))),
            "mr" => Some(one(write(ops.dst(0)?, ops.read(1, W)?, record))),
            "addi" | "addic" => {
                let src = offset(ops.read(1, W)?, ops.immediate(2)?, W);
                Some(one(write(ops.dst(0)?, src, record)))
            }
            "addis" => {
                let src = Expr::binary(BinaryOp::Add, ops.read(1, W)?, high(ops, 2)?);
                Some(one(assign(ops.dst(0)?, src)))
            }
            "add" | "addc" => three(ops, BinaryOp::Add, record),
            // subf rD, rA, rB computes rB - rA.
            "subf" | "subfc" => {
                let src = Expr::binary(BinaryOp::Sub, ops.read(2, W)?, ops.read(1, W)?);
                Some(one(write(ops.dst(0)?, src, record)))
            }
            "sub" => three(ops, BinaryOp::Sub, record),
            "mullw" | "mulli" => three(ops, BinaryOp::Mul, record),
            "divw" | "divwu" => three(ops, BinaryOp::Div, record),
            "and" | "andi" => three(ops, BinaryOp::And, record),
            "or" | "ori" => three(ops, BinaryOp::Or, record),
            "xor" | "xori" => three(ops, BinaryOp::Xor, record),
            "oris" | "xoris" | "andis" => {
                let op = match stem {
                    "oris" => BinaryOp::Or,
                    "xoris" => BinaryOp::Xor,
                    _ => BinaryOp::And,
                };
                let src = Expr::binary(op, ops.read(1, W)?, high(ops, 2)?);
                Some(one(write(ops.dst(0)?, src, record)))
            }
            "nor" => {
                let src = not(Expr::binary(BinaryOp::Or, ops.read(1, W)?, ops.read(2, W)?));
                Some(one(write(ops.dst(0)?, src, record)))
            }
            "not" => Some(one(write(ops.dst(0)?, not(ops.read(1, W)?), record))),
            "neg" => Some(one(write(
                ops.dst(0)?,
                Expr::unary(UnaryOp::Neg, ops.read(1, W)?),
                record,
            ))),
            "slw" | "slwi" => three(ops, BinaryOp::Shl, record),
            "srw" | "srwi" => three(ops, BinaryOp::Shr, record),
            "sraw" | "srawi" => three(ops, BinaryOp::Sar, record),
            "clrlwi" => {
                let bits = ops.immediate(2)?;
                let mask = if (0..32).contains(&bits) {
                    (u32::MAX >> bits) as i64
                } else {
                    return None;
                };
                let src = Expr::binary(BinaryOp::And, ops.read(1, W)?, Expr::constant(mask, W));
                Some(one(write(ops.dst(0)?, src, record)))
            }
            "extsb" | "extsh" => {
                let width = if stem == "extsb" { Width::W8 } else { Width::W16 };
                let name = ops.register_name(1)?;
                Some(one(assign_signed(ops.dst(0)?, Expr::reg(name, width))))
            }
            "cmpw" | "cmpwi" | "cmplw" | "cmplwi" => {
                let kind = if stem.starts_with("cmpl") {
                    CompareKind::Unsigned
                } else {
                    CompareKind::Signed
                };
                Some(one(StatementKind::Compare {
                    lhs: ops.read(first, W)?,
                    rhs: ops.read(first + 1, W)?,
                    kind,
                }))
            }
            "mflr" => Some(one(assign(ops.dst(0)?, Expr::reg("lr", W)))),
            "mtlr" => Some(one(assign(Expr::reg("lr", W), ops.read(0, W)?))),
            "mfctr" => Some(one(assign(ops.dst(0)?, Expr::reg("ctr", W)))),
            "mtctr" => Some(one(assign(Expr::reg("ctr", W), ops.read(0, W)?))),
            "b" => Some(one(StatementKind::Jump {
                target: Expr::constant(ops.target(0)? as i64, W),
            })),
            "bl" => Some(one(StatementKind::Call {
                target: ops.call_target(0)?,
            })),
            "blr" => Some(ret()),
            "bctr" => Some(one(StatementKind::Jump {
                target: Expr::reg("ctr", W),
            })),
            "bctrl" => Some(one(StatementKind::Call {
                target: Expr::reg("ctr", W),
            })),
            _ if stem.starts_with("l") => load(ops, stem),
            _ if stem.starts_with("st") => store(ops, stem),
            _ => {
                let cond = condition(stem)?;
                Some(one(branch_on(cond, ops.target(first)?)))
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

    fn translate(mnemonic: &str, operands: serde_json::Value) -> Translation {
        let routine = GraphLoader::load(&json!([{
            "address": 0x8000_0000u64,
            "instructions": [ { "address": 0x8000_0000u64, "mnemonic": mnemonic, "operands": operands } ]
        }]))
        .unwrap();
        translate_with(&PowerPc::new(), &routine.blocks[0].instructions[0], &routine)
    }

    #[test]
    fn subf_reverses_operands() {
        match &translate("subf", json!(["r3", "r4", "r5"]))[0] {
            StatementKind::Assign { src, .. } => assert_eq!(src.to_string(), "(r5 - r4)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compare_skips_condition_field() {
        match &translate("cmplwi", json!(["cr7", "r3", "0"]))[0] {
            StatementKind::Compare { lhs, kind, .. } => {
                assert_eq!(lhs.to_string(), "r3");
                assert_eq!(*kind, CompareKind::Unsigned);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hinted_branch_uses_flags() {
        assert_eq!(
            translate("bne+", json!(["cr7", "0x80000010"]))[0],
            branch_on(Cond::Ne, 0x8000_0010)
        );
        assert_eq!(translate("blr", json!([]))[0], StatementKind::Return { value: None });
    }

    #[test]
    fn store_with_update_moves_base() {
        let out = translate("stwu", json!(["r1", "-0x20(r1)"]));
        assert_eq!(out.len(), 2);
        match &out[1] {
            StatementKind::Assign { src, .. } => assert_eq!(src.to_string(), "(r1 - 0x20)"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn record_form_sets_flags() {
        match &translate("add.", json!(["r3", "r3", "r4"]))[0] {
            StatementKind::Assign { sets_flags, .. } => assert!(*sets_flags),
            other => panic!("unexpected {other:?}"),
        }
    }
}
