//! Architecture Context
//!
//! One [`InstructionTranslator`] per supported instruction set, resolved by name
//! through a fixed registry. Translators map a raw instruction (mnemonic plus typed
//! operands) to zero or more IR statements; anything they do not recognise becomes
//! an `Unsupported` placeholder instead of being dropped.
//!
//! # Registry
//! | Name  | Aliases                          |
//! |-------|----------------------------------|
//! | `arm` | `arm64`, `aarch64`, `thumb`      |
//! | `mips`| `mips64`, `mipsel`               |
//! | `ppc` | `powerpc`, `ppc32`               |
//! | `x86` | `x86_64`, `x64`, `amd64`, `i386` |

pub mod arm;
pub mod mips;
pub mod ppc;
pub mod x86;

use crate::decompiler::binder::Binding;
use crate::decompiler::error::DecompilerError;
use crate::decompiler::ir::instruction::{BinaryOp, Cond, Expr, StatementKind, UnaryOp, Width};
use crate::decompiler::routine::{Instruction, Operand, Routine};
use smallvec::{smallvec, SmallVec};
use std::borrow::Cow;

/// Statements produced for one raw instruction.
pub type Translation = SmallVec<[StatementKind; 2]>;

/// Per-ISA instruction semantics.
pub trait InstructionTranslator {
    /// Canonical architecture name.
    fn name(&self) -> &'static str;

    /// Width of addresses and of registers the translator cannot size.
    fn pointer_width(&self) -> Width;

    /// Width of a named register.
    fn register_width(&self, _name: &str) -> Width {
        self.pointer_width()
    }

    /// Translate one instruction. `None` means "not understood" and turns into an
    /// `Unsupported` placeholder.
    fn translate_instruction(&self, ops: &Operands<'_>) -> Option<Translation>;

    /// Whether the instruction following `inst` executes before it takes effect.
    fn has_delay_slot(&self, _inst: &Instruction) -> bool {
        false
    }

    /// Canonical name for an aliased register (`ip` → `r12`).
    fn register_alias(&self, _name: &str) -> Option<&'static str> {
        None
    }

    /// Full register a (sub-)register belongs to (`al` → `rax`).
    fn register_family<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
    }

    /// Registers that always read as zero.
    fn zero_registers(&self) -> &'static [&'static str] {
        &[]
    }

    /// Stack pointer names (after aliasing).
    fn stack_pointers(&self) -> &'static [&'static str];

    /// Frame pointer names (after aliasing).
    fn frame_pointers(&self) -> &'static [&'static str];

    /// Translate one instruction, falling back to a placeholder.
    fn translate(&self, inst: &Instruction, routine: &Routine) -> Translation
    where
        Self: Sized,
    {
        translate_with(self, inst, routine)
    }
}

/// Translate through a trait object, falling back to a placeholder.
pub fn translate_with(
    arch: &dyn InstructionTranslator,
    inst: &Instruction,
    routine: &Routine,
) -> Translation {
    let ops = Operands::new(inst, routine, arch);
    match arch.translate_instruction(&ops) {
        Some(statements) => statements,
        None => {
            log::debug!("{}: no translation for `{}` at 0x{:x}", arch.name(), inst.text, inst.address);
            smallvec![StatementKind::Unsupported {
                text: inst.text.clone(),
            }]
        }
    }
}

struct ArchEntry {
    name: &'static str,
    aliases: &'static [&'static str],
    build: fn(&str) -> Box<dyn InstructionTranslator>,
}

const REGISTRY: &[ArchEntry] = &[
    ArchEntry {
        name: "arm",
        aliases: &["arm64", "aarch64", "thumb"],
        build: build_arm,
    },
    ArchEntry {
        name: "mips",
        aliases: &["mips64", "mipsel"],
        build: build_mips,
    },
    ArchEntry {
        name: "ppc",
        aliases: &["powerpc", "ppc32"],
        build: build_ppc,
    },
    ArchEntry {
        name: "x86",
        aliases: &["x86_64", "x64", "amd64", "i386"],
        build: build_x86,
    },
];

fn build_arm(alias: &str) -> Box<dyn InstructionTranslator> {
    Box::new(arm::Arm::new(matches!(alias, "arm64" | "aarch64")))
}

fn build_mips(alias: &str) -> Box<dyn InstructionTranslator> {
    Box::new(mips::Mips::new(alias == "mips64"))
}

fn build_ppc(_alias: &str) -> Box<dyn InstructionTranslator> {
    Box::new(ppc::PowerPc::new())
}

fn build_x86(alias: &str) -> Box<dyn InstructionTranslator> {
    Box::new(x86::X86::new(alias != "i386"))
}

/// Resolve an architecture name (case-insensitive, aliases included).
///
/// # Errors
/// `UnsupportedArchitecture` carrying the [`supported`] listing.
pub fn resolve(name: &str) -> Result<Box<dyn InstructionTranslator>, DecompilerError> {
    let key: String = name.trim().to_ascii_lowercase();
    REGISTRY
        .iter()
        .find(|entry| entry.name == key || entry.aliases.contains(&key.as_str()))
        .map(|entry| (entry.build)(&key))
        .ok_or_else(|| DecompilerError::UnsupportedArchitecture {
            name: name.to_string(),
            supported: supported(),
        })
}

/// Canonical names of every supported architecture, sorted.
pub fn supported() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.iter().map(|e| e.name).collect();
    names.sort_unstable();
    names
}

/// Operand accessor handed to translators.
///
/// Wraps one instruction together with the routine's bindings so translators
/// never deal with symbol lookup themselves.
pub struct Operands<'a> {
    pub inst: &'a Instruction,
    routine: &'a Routine,
    arch: &'a dyn InstructionTranslator,
}

impl<'a> Operands<'a> {
    pub fn new(inst: &'a Instruction, routine: &'a Routine, arch: &'a dyn InstructionTranslator) -> Self {
        Self { inst, routine, arch }
    }

    pub fn mnemonic(&self) -> &str {
        &self.inst.mnemonic
    }

    pub fn len(&self) -> usize {
        self.inst.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inst.operands.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&'a Operand> {
        self.inst.operands.get(idx)
    }

    pub fn register_name(&self, idx: usize) -> Option<&'a str> {
        self.get(idx)?.register()
    }

    pub fn immediate(&self, idx: usize) -> Option<i64> {
        self.get(idx)?.immediate()
    }

    /// Register expression (zero registers read as constant 0).
    pub fn register(&self, name: &str) -> Expr {
        let width = self.arch.register_width(name);
        if self.arch.zero_registers().contains(&name) {
            Expr::constant(0, width)
        } else {
            Expr::reg(name, width)
        }
    }

    /// Destination register (zero registers stay registers).
    pub fn dst(&self, idx: usize) -> Option<Expr> {
        let name = self.register_name(idx)?;
        Some(Expr::reg(name, self.arch.register_width(name)))
    }

    pub fn is_zero_register(&self, idx: usize) -> bool {
        self.register_name(idx)
            .map(|name| self.arch.zero_registers().contains(&name))
            .unwrap_or(false)
    }

    pub fn width_of(&self, idx: usize) -> Width {
        match self.get(idx) {
            Some(Operand::Register(name)) => self.arch.register_width(name),
            Some(Operand::Memory { size: Some(size), .. }) => {
                Width::from_bytes(*size).unwrap_or_else(|| self.arch.pointer_width())
            }
            _ => self.arch.pointer_width(),
        }
    }

    /// Value of an operand as read by the instruction. Immediates get `width`,
    /// memory operands default to it unless they spell their own size.
    pub fn read(&self, idx: usize, width: Width) -> Option<Expr> {
        match self.get(idx)? {
            Operand::Register(name) => Some(self.register(name)),
            Operand::Immediate(value) => Some(self.immediate_expr(idx, *value, width)),
            Operand::Memory { size, .. } => {
                let width = size.and_then(Width::from_bytes).unwrap_or(width);
                Some(Expr::memory(self.address(idx)?, width, false))
            }
            Operand::Symbol(name) => Some(Expr::Symbol(name.clone())),
            Operand::RegisterList(_) | Operand::Shift { .. } => None,
        }
    }

    /// Memory operand with an explicit access width and signedness.
    pub fn memory(&self, idx: usize, width: Width, signed: bool) -> Option<Expr> {
        match self.get(idx)? {
            Operand::Memory { .. } => Some(Expr::memory(self.address(idx)?, width, signed)),
            _ => None,
        }
    }

    /// Address computed by a memory operand (what `lea` loads).
    pub fn address(&self, idx: usize) -> Option<Expr> {
        let Operand::Memory {
            base,
            index,
            scale,
            disp,
            ..
        } = self.get(idx)?
        else {
            return None;
        };
        let ptr = self.arch.pointer_width();

        if base.as_deref() == Some("rip") && index.is_none() {
            let absolute = self
                .inst
                .address
                .wrapping_add(u64::from(self.inst.size))
                .wrapping_add(*disp as u64);
            return Some(self.absolute(idx, absolute));
        }
        if base.is_none() && index.is_none() {
            return Some(self.absolute(idx, *disp as u64));
        }

        let mut expr: Option<Expr> = base.as_deref().map(|b| self.register(b));
        if let Some(index) = index {
            let mut term = self.register(index);
            if *scale > 1 {
                term = Expr::binary(BinaryOp::Mul, term, Expr::constant(i64::from(*scale), ptr));
            }
            expr = Some(match expr {
                Some(e) => Expr::binary(BinaryOp::Add, e, term),
                None => term,
            });
        }
        let expr = expr?;
        Some(offset(expr, *disp, ptr))
    }

    /// Absolute address, replaced by its binding when one exists.
    fn absolute(&self, idx: usize, address: u64) -> Expr {
        let binding = self
            .routine
            .binding(self.inst.address, idx)
            .or_else(|| self.routine.symbols.lookup(address));
        match binding {
            Some(Binding::Symbol(name)) => Expr::Symbol(name.clone()),
            Some(Binding::Str(content)) => Expr::Str(content.clone()),
            None => Expr::constant(address as i64, self.arch.pointer_width()),
        }
    }

    fn immediate_expr(&self, idx: usize, value: i64, width: Width) -> Expr {
        match self.routine.binding(self.inst.address, idx) {
            Some(Binding::Symbol(name)) => Expr::Symbol(name.clone()),
            Some(Binding::Str(content)) => Expr::Str(content.clone()),
            None => Expr::constant(value, width),
        }
    }

    /// Direct target address of a branch operand.
    pub fn target(&self, idx: usize) -> Option<u64> {
        match self.get(idx)? {
            Operand::Immediate(value) if *value >= 0 => Some(*value as u64),
            _ => None,
        }
    }

    /// Call/jump target as an expression (symbol, address or register).
    pub fn call_target(&self, idx: usize) -> Option<Expr> {
        let ptr = self.arch.pointer_width();
        match self.get(idx)? {
            Operand::Immediate(value) => Some(self.immediate_expr(idx, *value, ptr)),
            _ => self.read(idx, ptr),
        }
    }

    /// Register written back by a memory operand, with its update
    /// (`[r1, #4]!` → `r1 = r1 + 4`).
    pub fn writeback(&self, idx: usize) -> Option<StatementKind> {
        match self.get(idx)? {
            Operand::Memory {
                base: Some(base),
                disp,
                writeback: true,
                ..
            } => Some(self.base_update(base, *disp)),
            _ => None,
        }
    }

    /// `base = base + delta`.
    pub fn base_update(&self, base: &str, delta: i64) -> StatementKind {
        let width = self.arch.register_width(base);
        assign(
            Expr::reg(base, width),
            offset(Expr::reg(base, width), delta, width),
        )
    }

    /// Memory operand base register.
    pub fn memory_base(&self, idx: usize) -> Option<&'a str> {
        match self.get(idx)? {
            Operand::Memory { base: Some(base), .. } => Some(base),
            _ => None,
        }
    }
}

/// `expr + disp` with the sign folded into the operator.
pub fn offset(expr: Expr, disp: i64, width: Width) -> Expr {
    if disp == 0 {
        expr
    } else if disp < 0 {
        Expr::binary(BinaryOp::Sub, expr, Expr::constant(disp.wrapping_neg(), width))
    } else {
        Expr::binary(BinaryOp::Add, expr, Expr::constant(disp, width))
    }
}

/// Plain assignment.
pub fn assign(dst: Expr, src: Expr) -> StatementKind {
    StatementKind::Assign {
        dst,
        src,
        signed: false,
        sets_flags: false,
        cast: None,
    }
}

/// Assignment from a sign-extending source.
pub fn assign_signed(dst: Expr, src: Expr) -> StatementKind {
    StatementKind::Assign {
        dst,
        src,
        signed: true,
        sets_flags: false,
        cast: None,
    }
}

/// Assignment that also sets the condition flags.
pub fn assign_flags(dst: Expr, src: Expr) -> StatementKind {
    StatementKind::Assign {
        dst,
        src,
        signed: false,
        sets_flags: true,
        cast: None,
    }
}

/// `dst = dst <op> rhs`.
pub fn update(dst: Expr, op: BinaryOp, rhs: Expr, sets_flags: bool) -> StatementKind {
    let src = Expr::binary(op, dst.clone(), rhs);
    if sets_flags {
        assign_flags(dst, src)
    } else {
        assign(dst, src)
    }
}

/// Conditional branch on pending flags.
pub fn branch_on(cond: Cond, target: u64) -> StatementKind {
    StatementKind::Branch {
        cond: Expr::Flags(cond),
        target,
    }
}

/// Shifted register operand (`r2, lsl #2`).
pub fn shifted(value: Expr, op: &str, amount: i64) -> Expr {
    let width = value.width().unwrap_or(Width::W32);
    let binop = match op {
        "lsl" => BinaryOp::Shl,
        "lsr" => BinaryOp::Shr,
        "asr" => BinaryOp::Sar,
        _ => return Expr::Opaque(format!("{value} {op} #{amount}")),
    };
    Expr::binary(binop, value, Expr::constant(amount, width))
}

/// Bitwise complement helper.
pub fn not(expr: Expr) -> Expr {
    Expr::unary(UnaryOp::Not, expr)
}

/// Return without a value.
pub fn ret() -> Translation {
    smallvec![StatementKind::Return { value: None }]
}

/// Nothing to emit (nops, prologue/epilogue bookkeeping).
pub fn nothing() -> Translation {
    SmallVec::new()
}

/// Single-statement translation.
pub fn one(kind: StatementKind) -> Translation {
    smallvec![kind]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_names_and_aliases() {
        assert_eq!(resolve("x86").unwrap().name(), "x86");
        assert_eq!(resolve("AMD64").unwrap().name(), "x86");
        assert_eq!(resolve("aarch64").unwrap().name(), "arm");
        assert_eq!(resolve("mipsel").unwrap().name(), "mips");
        assert_eq!(resolve("powerpc").unwrap().name(), "ppc");
    }

    #[test]
    fn unknown_architecture_is_reported_not_panicked() {
        let err = resolve("z80").err().unwrap();
        match err {
            DecompilerError::UnsupportedArchitecture { name, supported } => {
                assert_eq!(name, "z80");
                assert_eq!(supported, vec!["arm", "mips", "ppc", "x86"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn offsets_fold_sign() {
        let e = offset(Expr::reg("rbp", Width::W64), -8, Width::W64);
        assert_eq!(e.to_string(), "(rbp - 8)");
        assert_eq!(offset(Expr::reg("sp", Width::W32), 0, Width::W32).to_string(), "sp");
    }
}
