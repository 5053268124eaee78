//! Type Inference and Cast Insertion
//!
//! Widths and signedness are recorded by the architecture tables on every
//! expression; this module compares the two sides of an assignment and marks
//! the statement with the cast the renderer should print.
//!
//! # Cast Rules
//! - Only assignments whose destination and source widths are both known and differ get a cast
//! - Constants, symbols and string literals are never cast
//! - The cast is signed when the translator marked the source as sign-extending
//!   or the source expression itself is signed
//! - A statement that already carries a cast is left untouched, so running the
//!   pass again changes nothing

use crate::decompiler::ir::instruction::{CastMarker, Expr, StatementKind};

/// Type inference engine for cast insertion.
pub struct TypeInferenceEngine;

impl TypeInferenceEngine {
    /// Cast an assignment needs, if any.
    pub fn required_cast(kind: &StatementKind) -> Option<CastMarker> {
        let StatementKind::Assign { dst, src, signed, .. } = kind else {
            return None;
        };
        if matches!(src, Expr::Const { .. } | Expr::Symbol(_) | Expr::Str(_)) {
            return None;
        }
        let (dst_width, src_width) = (dst.width()?, src.width()?);
        if dst_width == src_width {
            return None;
        }
        Some(CastMarker {
            width: dst_width,
            signed: *signed || src.is_signed(),
        })
    }

    /// Insert the cast an assignment needs.
    ///
    /// # Returns
    /// `bool` - Whether the statement changed
    pub fn insert_cast(kind: &mut StatementKind) -> bool {
        let required = Self::required_cast(kind);
        match kind {
            StatementKind::Assign { cast: cast @ None, .. } if required.is_some() => {
                *cast = required;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::ir::instruction::Width;

    fn assign(dst: Expr, src: Expr, signed: bool) -> StatementKind {
        StatementKind::Assign {
            dst,
            src,
            signed,
            sets_flags: false,
            cast: None,
        }
    }

    #[test]
    fn widening_load_gets_signed_cast() {
        let mut kind = assign(
            Expr::reg("eax", Width::W32),
            Expr::memory(Expr::reg("ebx", Width::W32), Width::W8, true),
            true,
        );
        assert!(TypeInferenceEngine::insert_cast(&mut kind));
        match kind {
            StatementKind::Assign { cast, .. } => assert_eq!(
                cast,
                Some(CastMarker {
                    width: Width::W32,
                    signed: true
                })
            ),
            _ => unreachable!(),
        }
    }

    #[test]
    fn insertion_is_idempotent() {
        let mut kind = assign(Expr::reg("w0", Width::W32), Expr::reg("x1", Width::W64), false);
        assert!(TypeInferenceEngine::insert_cast(&mut kind));
        let once = kind.clone();
        assert!(!TypeInferenceEngine::insert_cast(&mut kind));
        assert_eq!(kind, once);
    }

    #[test]
    fn constants_and_equal_widths_are_not_cast() {
        let mut constant = assign(Expr::reg("al", Width::W8), Expr::constant(1, Width::W32), false);
        assert!(!TypeInferenceEngine::insert_cast(&mut constant));
        let mut same = assign(Expr::reg("eax", Width::W32), Expr::reg("ecx", Width::W32), false);
        assert!(!TypeInferenceEngine::insert_cast(&mut same));
    }
}
