//! Intermediate Representation (IR) Statements
//!
//! This module defines the architecture-independent statements and expressions the
//! instruction translators produce and every later stage consumes.
//!
//! # Memory Optimizations
//! - `Width`, `Cond`, `UnaryOp` and `BinaryOp` use `#[repr(u8)]`
//! - Expressions are boxed trees; most are two or three nodes deep
//! - Statements carry a `u32` id so structuring can prove that nothing was lost or
//!   duplicated with a `BitVec` instead of a hash set
//!
//! # IR Design
//! - **Statements** are produced per raw instruction and keep its address (`origin`)
//! - **Flags** (`Expr::Flags`) stand for "the condition `cc` of the last flag-setting
//!   statement"; the compare-merging pre-pass replaces them with real comparisons
//! - **Width and signedness** are recorded on registers, constants and memory
//!   accesses so the cast-insertion pass can compare source and destination

use std::fmt;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Width {
    W8 = 1,
    W16 = 2,
    W32 = 4,
    W64 = 8,
}

impl Width {
    pub fn from_bytes(bytes: u8) -> Option<Width> {
        match bytes {
            1 => Some(Width::W8),
            2 => Some(Width::W16),
            4 => Some(Width::W32),
            8 => Some(Width::W64),
            _ => None,
        }
    }

    pub fn bytes(self) -> u8 {
        self as u8
    }

    pub fn bits(self) -> u32 {
        u32::from(self.bytes()) * 8
    }

    /// C99 fixed-width type name.
    pub fn c_type(self, signed: bool) -> &'static str {
        match (self, signed) {
            (Width::W8, true) => "int8_t",
            (Width::W8, false) => "uint8_t",
            (Width::W16, true) => "int16_t",
            (Width::W16, false) => "uint16_t",
            (Width::W32, true) => "int32_t",
            (Width::W32, false) => "uint32_t",
            (Width::W64, true) => "int64_t",
            (Width::W64, false) => "uint64_t",
        }
    }
}

/// Condition code of a flag-consuming instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned less-than (carry set).
    Below,
    BelowEq,
    Above,
    AboveEq,
    /// Result negative.
    Sign,
    NotSign,
    Overflow,
    NoOverflow,
}

impl Cond {
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Le => Cond::Gt,
            Cond::Gt => Cond::Le,
            Cond::Ge => Cond::Lt,
            Cond::Below => Cond::AboveEq,
            Cond::BelowEq => Cond::Above,
            Cond::Above => Cond::BelowEq,
            Cond::AboveEq => Cond::Below,
            Cond::Sign => Cond::NotSign,
            Cond::NotSign => Cond::Sign,
            Cond::Overflow => Cond::NoOverflow,
            Cond::NoOverflow => Cond::Overflow,
        }
    }

    /// Name used when a condition cannot be resolved to a comparison.
    pub fn flag_name(self) -> &'static str {
        match self {
            Cond::Eq => "EQ",
            Cond::Ne => "NE",
            Cond::Lt => "LT",
            Cond::Le => "LE",
            Cond::Gt => "GT",
            Cond::Ge => "GE",
            Cond::Below => "LO",
            Cond::BelowEq => "LS",
            Cond::Above => "HI",
            Cond::AboveEq => "HS",
            Cond::Sign => "MI",
            Cond::NotSign => "PL",
            Cond::Overflow => "VS",
            Cond::NoOverflow => "VC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    /// Arithmetic negation `-x`.
    Neg,
    /// Bitwise complement `~x`.
    Not,
    /// Logical negation `!x`.
    LogicalNot,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "~",
            UnaryOp::LogicalNot => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Unsigned comparisons (rendered with the same operators).
    Ult,
    Ule,
    Ugt,
    Uge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr | BinaryOp::Sar => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt | BinaryOp::Ult => "<",
            BinaryOp::Le | BinaryOp::Ule => "<=",
            BinaryOp::Gt | BinaryOp::Ugt => ">",
            BinaryOp::Ge | BinaryOp::Uge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    /// C operator precedence (higher binds tighter).
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 10,
            BinaryOp::Add | BinaryOp::Sub => 9,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar => 8,
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Ult
            | BinaryOp::Ule
            | BinaryOp::Ugt
            | BinaryOp::Uge => 7,
            BinaryOp::Eq | BinaryOp::Ne => 6,
            BinaryOp::And => 5,
            BinaryOp::Xor => 4,
            BinaryOp::Or => 3,
            BinaryOp::LogicalAnd => 2,
            BinaryOp::LogicalOr => 1,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.negate_comparison().is_some()
    }

    /// Complementary comparison (`<` → `>=`).
    pub fn negate_comparison(self) -> Option<BinaryOp> {
        Some(match self {
            BinaryOp::Eq => BinaryOp::Ne,
            BinaryOp::Ne => BinaryOp::Eq,
            BinaryOp::Lt => BinaryOp::Ge,
            BinaryOp::Le => BinaryOp::Gt,
            BinaryOp::Gt => BinaryOp::Le,
            BinaryOp::Ge => BinaryOp::Lt,
            BinaryOp::Ult => BinaryOp::Uge,
            BinaryOp::Ule => BinaryOp::Ugt,
            BinaryOp::Ugt => BinaryOp::Ule,
            BinaryOp::Uge => BinaryOp::Ult,
            _ => return None,
        })
    }

    /// Comparison operator for a condition code evaluated on `lhs ? rhs`.
    pub fn from_cond(cond: Cond, unsigned: bool) -> Option<BinaryOp> {
        Some(match (cond, unsigned) {
            (Cond::Eq, _) => BinaryOp::Eq,
            (Cond::Ne, _) => BinaryOp::Ne,
            (Cond::Lt, false) | (Cond::Sign, _) => BinaryOp::Lt,
            (Cond::Le, false) => BinaryOp::Le,
            (Cond::Gt, false) => BinaryOp::Gt,
            (Cond::Ge, false) | (Cond::NotSign, _) => BinaryOp::Ge,
            (Cond::Lt, true) | (Cond::Below, _) => BinaryOp::Ult,
            (Cond::Le, true) | (Cond::BelowEq, _) => BinaryOp::Ule,
            (Cond::Gt, true) | (Cond::Above, _) => BinaryOp::Ugt,
            (Cond::Ge, true) | (Cond::AboveEq, _) => BinaryOp::Uge,
            (Cond::Overflow, _) | (Cond::NoOverflow, _) => return None,
        })
    }
}

/// IR expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Register { name: String, width: Width },
    Const { value: i64, width: Width },
    /// Bound symbol name.
    Symbol(String),
    /// Bound string literal.
    Str(String),
    /// Memory access `*(addr)`.
    Memory {
        addr: Box<Expr>,
        width: Width,
        signed: bool,
    },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Pending condition code of the last flag-setting statement.
    Flags(Cond),
    /// Text rendered verbatim (operands the translator cannot model).
    Opaque(String),
}

impl Expr {
    pub fn reg(name: impl Into<String>, width: Width) -> Expr {
        Expr::Register {
            name: name.into(),
            width,
        }
    }

    pub fn constant(value: i64, width: Width) -> Expr {
        Expr::Const { value, width }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn memory(addr: Expr, width: Width, signed: bool) -> Expr {
        Expr::Memory {
            addr: Box::new(addr),
            width,
            signed,
        }
    }

    /// Logical negation with simplification of comparisons and double negation.
    pub fn negate(self) -> Expr {
        match self {
            Expr::Binary { op, lhs, rhs } if op.is_comparison() => Expr::Binary {
                op: op.negate_comparison().unwrap_or(op),
                lhs,
                rhs,
            },
            Expr::Unary {
                op: UnaryOp::LogicalNot,
                operand,
            } => *operand,
            Expr::Flags(cond) => Expr::Flags(cond.negate()),
            other => Expr::unary(UnaryOp::LogicalNot, other),
        }
    }

    /// Width of the value, when known.
    pub fn width(&self) -> Option<Width> {
        match self {
            Expr::Register { width, .. } | Expr::Const { width, .. } | Expr::Memory { width, .. } => {
                Some(*width)
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::LogicalNot => None,
                _ => operand.width(),
            },
            Expr::Binary { op, lhs, rhs } => {
                if op.is_comparison() || matches!(op, BinaryOp::LogicalAnd | BinaryOp::LogicalOr) {
                    None
                } else {
                    match (lhs.width(), rhs.width()) {
                        (Some(l), Some(r)) => Some(l.max(r)),
                        (l, r) => l.or(r),
                    }
                }
            }
            Expr::Symbol(_) | Expr::Str(_) | Expr::Flags(_) | Expr::Opaque(_) => None,
        }
    }

    /// Whether the value is a signed quantity.
    pub fn is_signed(&self) -> bool {
        match self {
            Expr::Memory { signed, .. } => *signed,
            Expr::Const { value, .. } => *value < 0,
            Expr::Binary {
                op: BinaryOp::Sar, ..
            } => true,
            Expr::Unary {
                op: UnaryOp::Neg, ..
            } => true,
            _ => false,
        }
    }

    /// Whether the expression or any sub-expression reads pending flags.
    pub fn contains_flags(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, Expr::Flags(_)));
        found
    }

    /// Pre-order visit of every sub-expression.
    pub fn visit(&self, f: &mut impl FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Memory { addr, .. } => addr.visit(f),
            Expr::Unary { operand, .. } => operand.visit(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.visit(f);
                rhs.visit(f);
            }
            _ => {}
        }
    }

    /// Post-order rewrite of every sub-expression in place.
    pub fn rewrite(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            Expr::Memory { addr, .. } => addr.rewrite(f),
            Expr::Unary { operand, .. } => operand.rewrite(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.rewrite(f);
                rhs.rewrite(f);
            }
            _ => {}
        }
        f(self);
    }

    /// Registers read when this expression is evaluated.
    pub fn registers(&self) -> Vec<&str> {
        let mut regs: Vec<&str> = Vec::new();
        self.collect_registers(&mut regs);
        regs
    }

    fn collect_registers<'a>(&'a self, regs: &mut Vec<&'a str>) {
        match self {
            Expr::Register { name, .. } => regs.push(name),
            Expr::Memory { addr, .. } => addr.collect_registers(regs),
            Expr::Unary { operand, .. } => operand.collect_registers(regs),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_registers(regs);
                rhs.collect_registers(regs);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Expr {
    /// Plain rendering used in logs and tests; the renderer has its own printer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Register { name, .. } => write!(f, "{name}"),
            Expr::Const { value, .. } => {
                if *value < 0 {
                    write!(f, "-0x{:x}", value.unsigned_abs())
                } else if *value < 10 {
                    write!(f, "{value}")
                } else {
                    write!(f, "0x{value:x}")
                }
            }
            Expr::Symbol(name) => write!(f, "{name}"),
            Expr::Str(content) => write!(f, "{content:?}"),
            Expr::Memory { addr, .. } => write!(f, "*({addr})"),
            Expr::Unary { op, operand } => write!(f, "{}({operand})", op.symbol()),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Flags(cond) => write!(f, "{}", cond.flag_name()),
            Expr::Opaque(text) => write!(f, "{text}"),
        }
    }
}

/// Flag semantics of a compare statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    /// `cmp`: flags of `lhs - rhs`, signed condition codes.
    Signed,
    /// Unsigned compare (PowerPC `cmplw`): signed codes read as unsigned.
    Unsigned,
    /// `test`: flags of `lhs & rhs` against zero.
    Test,
}

/// Cast applied to an assignment's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CastMarker {
    pub width: Width,
    pub signed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// `dst = src`. `signed` records a sign-extending source.
    Assign {
        dst: Expr,
        src: Expr,
        signed: bool,
        /// The assigned value also sets the condition flags.
        sets_flags: bool,
        /// Set at most once by the cast-insertion pass.
        cast: Option<CastMarker>,
    },
    /// Flag-setting comparison.
    Compare {
        lhs: Expr,
        rhs: Expr,
        kind: CompareKind,
    },
    /// Conditional branch to a block address.
    Branch { cond: Expr, target: u64 },
    /// Unconditional jump; a `Const` target is direct.
    Jump { target: Expr },
    Call { target: Expr },
    Return { value: Option<Expr> },
    /// Instruction without a translation, kept as a visible placeholder.
    Unsupported { text: String },
}

/// One IR statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    /// Unique within a routine.
    pub id: u32,
    /// Address of the raw instruction that produced it.
    pub origin: u64,
    pub kind: StatementKind,
}

impl Statement {
    /// Every expression of the statement, read or written.
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            StatementKind::Assign { dst, src, .. } => vec![dst, src],
            StatementKind::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            StatementKind::Branch { cond, .. } => vec![cond],
            StatementKind::Jump { target } | StatementKind::Call { target } => vec![target],
            StatementKind::Return { value } => value.iter().collect(),
            StatementKind::Unsupported { .. } => Vec::new(),
        }
    }

    /// Mutable access to every expression of the statement.
    pub fn expressions_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StatementKind::Assign { dst, src, .. } => vec![dst, src],
            StatementKind::Compare { lhs, rhs, .. } => vec![lhs, rhs],
            StatementKind::Branch { cond, .. } => vec![cond],
            StatementKind::Jump { target } | StatementKind::Call { target } => vec![target],
            StatementKind::Return { value } => value.iter_mut().collect(),
            StatementKind::Unsupported { .. } => Vec::new(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.kind, StatementKind::Unsupported { .. })
    }
}

/// IR of one basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrBlock {
    pub address: u64,
    pub statements: Vec<Statement>,
}

/// IR of a whole routine, block for block in routine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrRoutine {
    pub blocks: Vec<IrBlock>,
    /// One past the highest statement id handed out.
    pub next_id: u32,
}

impl IrRoutine {
    pub fn statement_count(&self) -> usize {
        self.blocks.iter().map(|b| b.statements.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_flips_comparisons() {
        let cmp = Expr::binary(
            BinaryOp::Lt,
            Expr::reg("eax", Width::W32),
            Expr::constant(3, Width::W32),
        );
        let negated = cmp.clone().negate();
        assert!(matches!(negated, Expr::Binary { op: BinaryOp::Ge, .. }));
        assert_eq!(negated.negate(), cmp);
    }

    #[test]
    fn negation_of_opaque_wraps() {
        let e = Expr::reg("r0", Width::W32).negate();
        assert!(matches!(e, Expr::Unary { op: UnaryOp::LogicalNot, .. }));
        assert_eq!(e.negate(), Expr::reg("r0", Width::W32));
        assert_eq!(Expr::Flags(Cond::Below).negate(), Expr::Flags(Cond::AboveEq));
    }

    #[test]
    fn widths_propagate_through_arithmetic() {
        let e = Expr::binary(
            BinaryOp::Add,
            Expr::reg("al", Width::W8),
            Expr::reg("ecx", Width::W32),
        );
        assert_eq!(e.width(), Some(Width::W32));
        assert_eq!(Expr::Symbol("x".into()).width(), None);
        assert_eq!(Width::W16.c_type(true), "int16_t");
    }

    #[test]
    fn registers_are_collected() {
        let e = Expr::memory(
            Expr::binary(BinaryOp::Add, Expr::reg("rbx", Width::W64), Expr::reg("rcx", Width::W64)),
            Width::W32,
            false,
        );
        assert_eq!(e.registers(), vec!["rbx", "rcx"]);
        assert!(!e.contains_flags());
    }
}
