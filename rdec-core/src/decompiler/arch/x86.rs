//! x86 / x86-64 instruction table (Intel syntax).
//!
//! Flag-setting arithmetic is marked with `sets_flags`; `cmp`/`test` become
//! `Compare` statements and `jcc`/`setcc` read the pending flags. Stack
//! bookkeeping (`push`, `pop`, `leave`) produces no statements.

use super::{
    assign, assign_flags, assign_signed, branch_on, nothing, not, one, ret, update,
    InstructionTranslator, Operands, Translation,
};
use crate::decompiler::ir::instruction::{BinaryOp, CompareKind, Cond, Expr, StatementKind, UnaryOp, Width};
use crate::decompiler::routine::Operand;
use smallvec::smallvec;
use std::borrow::Cow;

/// x86 translator; `long_mode` selects 64-bit addresses.
pub struct X86 {
    long_mode: bool,
}

impl X86 {
    pub fn new(long_mode: bool) -> Self {
        Self { long_mode }
    }
}

const GPR64: [&str; 16] = [
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];
const GPR32: [&str; 8] = ["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp"];
const GPR16: [&str; 8] = ["ax", "bx", "cx", "dx", "si", "di", "bp", "sp"];
const GPR8: [&str; 12] = [
    "al", "bl", "cl", "dl", "sil", "dil", "bpl", "spl", "ah", "bh", "ch", "dh",
];

fn condition(code: &str) -> Option<Cond> {
    Some(match code {
        "e" | "z" => Cond::Eq,
        "ne" | "nz" => Cond::Ne,
        "l" | "nge" => Cond::Lt,
        "le" | "ng" => Cond::Le,
        "g" | "nle" => Cond::Gt,
        "ge" | "nl" => Cond::Ge,
        "b" | "nae" | "c" => Cond::Below,
        "be" | "na" => Cond::BelowEq,
        "a" | "nbe" => Cond::Above,
        "ae" | "nb" | "nc" => Cond::AboveEq,
        "s" => Cond::Sign,
        "ns" => Cond::NotSign,
        "o" => Cond::Overflow,
        "no" => Cond::NoOverflow,
        _ => return None,
    })
}

impl X86 {
    /// Width of a two-operand instruction: a register operand decides, memory
    /// operands only when they spell their size.
    fn operation_width(&self, ops: &Operands<'_>) -> Width {
        match (ops.get(0), ops.get(1)) {
            (Some(Operand::Register(_)), _) | (Some(Operand::Memory { size: Some(_), .. }), _) => {
                ops.width_of(0)
            }
            (_, Some(Operand::Register(_))) | (_, Some(Operand::Memory { size: Some(_), .. })) => {
                ops.width_of(1)
            }
            _ => Width::W32,
        }
    }

    fn binary(&self, ops: &Operands<'_>, op: BinaryOp) -> Option<Translation> {
        let width = self.operation_width(ops);
        let dst = ops.read(0, width)?;
        let rhs = ops.read(1, width)?;
        Some(one(update(dst, op, rhs, true)))
    }

    fn division(&self, ops: &Operands<'_>, signed: bool) -> Option<Translation> {
        let width = ops.width_of(0);
        let divisor = ops.read(0, width)?;
        let (quotient, remainder) = match width {
            Width::W64 => ("rax", "rdx"),
            Width::W16 => ("ax", "dx"),
            Width::W8 => ("al", "ah"),
            Width::W32 => ("eax", "edx"),
        };
        let q = Expr::reg(quotient, width);
        let r = Expr::reg(remainder, width);
        let rem = Expr::binary(BinaryOp::Mod, q.clone(), divisor.clone());
        let quo = Expr::binary(BinaryOp::Div, q.clone(), divisor);
        if signed {
            Some(smallvec![assign_signed(r, rem), assign_signed(q, quo)])
        } else {
            Some(smallvec![assign(r, rem), assign(q, quo)])
        }
    }
}

impl InstructionTranslator for X86 {
    fn name(&self) -> &'static str {
        "x86"
    }

    fn pointer_width(&self) -> Width {
        if self.long_mode {
            Width::W64
        } else {
            Width::W32
        }
    }

    fn register_width(&self, name: &str) -> Width {
        if GPR64.contains(&name) || name == "rip" {
            Width::W64
        } else if GPR32.contains(&name) || name == "eip" || (name.starts_with('r') && name.ends_with('d')) {
            Width::W32
        } else if GPR16.contains(&name) || (name.starts_with('r') && name.ends_with('w')) {
            Width::W16
        } else if GPR8.contains(&name) || (name.starts_with('r') && name.ends_with(['b', 'l'])) {
            Width::W8
        } else {
            Width::W32
        }
    }

    fn register_family<'a>(&self, name: &'a str) -> Cow<'a, str> {
        let lookup = |table: &[&str]| table.iter().position(|r| *r == name);
        if let Some(idx) = lookup(&GPR32[..]).or_else(|| lookup(&GPR16[..])) {
            return Cow::Borrowed(GPR64[idx]);
        }
        if let Some(idx) = lookup(&GPR8[..]) {
            return Cow::Borrowed(GPR64[idx % 8]);
        }
        if name.starts_with('r') && name.len() > 2 && name.ends_with(['d', 'w', 'b', 'l']) {
            let stem = &name[..name.len() - 1];
            if GPR64.contains(&stem) {
                return Cow::Owned(stem.to_string());
            }
        }
        Cow::Borrowed(name)
    }

    fn stack_pointers(&self) -> &'static [&'static str] {
        &["rsp", "esp"]
    }

    fn frame_pointers(&self) -> &'static [&'static str] {
        &["rbp", "ebp"]
    }

    fn translate_instruction(&self, ops: &Operands<'_>) -> Option<Translation> {
        let mnemonic: &str = ops.mnemonic();
        let ptr = self.pointer_width();

        match mnemonic {
            "nop" | "endbr64" | "endbr32" | "push" | "pop" | "leave" | "pushfd" | "popfd" => {
                Some(nothing())
            }
            "ret" | "retn" | "retf" => Some(ret()),
            "mov" | "movabs" => {
                let width = self.operation_width(ops);
                let dst = ops.read(0, width)?;
                let src = ops.read(1, width)?;
                Some(one(assign(dst, src)))
            }
            "movzx" | "movsx" | "movsxd" => {
                let dst = ops.read(0, Width::W32)?;
                let signed = mnemonic != "movzx";
                let src_width = match ops.get(1)? {
                    Operand::Memory { size: None, .. } if mnemonic == "movsxd" => Width::W32,
                    Operand::Memory { size: None, .. } => Width::W8,
                    _ => ops.width_of(1),
                };
                let src = match ops.get(1)? {
                    Operand::Memory { .. } => ops.memory(1, src_width, signed)?,
                    _ => ops.read(1, src_width)?,
                };
                Some(one(if signed { assign_signed(dst, src) } else { assign(dst, src) }))
            }
            "cdqe" => Some(one(assign_signed(
                Expr::reg("rax", Width::W64),
                Expr::reg("eax", Width::W32),
            ))),
            "cwde" => Some(one(assign_signed(
                Expr::reg("eax", Width::W32),
                Expr::reg("ax", Width::W16),
            ))),
            "cdq" | "cqo" => Some(nothing()),
            "lea" => {
                let dst = ops.read(0, ptr)?;
                let addr = ops.address(1)?;
                Some(one(assign(dst, addr)))
            }
            "xor" if ops.get(0) == ops.get(1) => {
                let width = ops.width_of(0);
                let dst = ops.read(0, width)?;
                Some(one(assign_flags(dst, Expr::constant(0, width))))
            }
            "sub" if ops.get(0) == ops.get(1) => {
                let width = ops.width_of(0);
                let dst = ops.read(0, width)?;
                Some(one(assign_flags(dst, Expr::constant(0, width))))
            }
            "add" => self.binary(ops, BinaryOp::Add),
            "sub" => self.binary(ops, BinaryOp::Sub),
            "and" => self.binary(ops, BinaryOp::And),
            "or" => self.binary(ops, BinaryOp::Or),
            "xor" => self.binary(ops, BinaryOp::Xor),
            "shl" | "sal" => self.binary(ops, BinaryOp::Shl),
            "shr" => self.binary(ops, BinaryOp::Shr),
            "sar" => self.binary(ops, BinaryOp::Sar),
            "imul" if ops.len() == 3 => {
                let width = ops.width_of(0);
                let dst = ops.read(0, width)?;
                let lhs = ops.read(1, width)?;
                let rhs = ops.read(2, width)?;
                Some(one(assign_flags(dst, Expr::binary(BinaryOp::Mul, lhs, rhs))))
            }
            "imul" if ops.len() == 2 => self.binary(ops, BinaryOp::Mul),
            "imul" | "mul" if ops.len() == 1 => {
                let width = ops.width_of(0);
                let acc = match width {
                    Width::W64 => "rax",
                    Width::W16 => "ax",
                    Width::W8 => "al",
                    Width::W32 => "eax",
                };
                let src = ops.read(0, width)?;
                Some(one(update(Expr::reg(acc, width), BinaryOp::Mul, src, true)))
            }
            "div" => self.division(ops, false),
            "idiv" => self.division(ops, true),
            "inc" | "dec" => {
                let width = ops.width_of(0);
                let dst = ops.read(0, width)?;
                let op = if mnemonic == "inc" { BinaryOp::Add } else { BinaryOp::Sub };
                Some(one(update(dst, op, Expr::constant(1, width), true)))
            }
            "neg" => {
                let dst = ops.read(0, ops.width_of(0))?;
                Some(one(assign_flags(dst.clone(), Expr::unary(UnaryOp::Neg, dst))))
            }
            "not" => {
                let dst = ops.read(0, ops.width_of(0))?;
                Some(one(assign(dst.clone(), not(dst))))
            }
            "cmp" | "test" => {
                let width = self.operation_width(ops);
                let lhs = ops.read(0, width)?;
                let rhs = ops.read(1, width)?;
                let kind = if mnemonic == "cmp" {
                    CompareKind::Signed
                } else {
                    CompareKind::Test
                };
                Some(one(StatementKind::Compare { lhs, rhs, kind }))
            }
            "jmp" => match ops.target(0) {
                Some(target) => Some(one(StatementKind::Jump {
                    target: Expr::constant(target as i64, ptr),
                })),
                None => Some(one(StatementKind::Jump {
                    target: ops.call_target(0)?,
                })),
            },
            "call" => Some(one(StatementKind::Call {
                target: ops.call_target(0)?,
            })),
            _ => {
                if let Some(code) = mnemonic.strip_prefix("set") {
                    let cond = condition(code)?;
                    let dst = ops.read(0, Width::W8)?;
                    return Some(one(assign(dst, Expr::Flags(cond))));
                }
                if let Some(code) = mnemonic.strip_prefix('j') {
                    let cond = condition(code)?;
                    return Some(one(branch_on(cond, ops.target(0)?)));
                }
                None
            }
        }
    }
}
