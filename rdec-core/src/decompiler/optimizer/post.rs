//! Post-structuring passes
//!
//! Run on the structured tree right before rendering.
//!
//! # Passes
//! - **Naming**: register aliases and stack-slot variables ([`VariableNamer`])
//! - **Cast insertion**: width-changing assignments get an explicit cast marker
//!   (only when casts are shown)
//! - **Tidying**: nested sequences are flattened, empty `else` arms dropped, an
//!   empty `then` arm swapped with its `else` under the negated condition, and a
//!   `continue` that ends a loop body removed

use super::naming::VariableNamer;
use crate::decompiler::analysis::TypeInferenceEngine;
use crate::decompiler::arch::InstructionTranslator;
use crate::decompiler::structurer::StructuredNode;

/// Counters reported by [`PostPasses::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostStats {
    pub variables: usize,
    pub casts: usize,
}

pub struct PostPasses<'a> {
    arch: &'a dyn InstructionTranslator,
    casts: bool,
}

impl<'a> PostPasses<'a> {
    pub fn new(arch: &'a dyn InstructionTranslator, casts: bool) -> Self {
        Self { arch, casts }
    }

    pub fn run(&self, root: &mut StructuredNode, naming: bool) -> PostStats {
        let variables = if naming {
            VariableNamer::new(self.arch).apply(root)
        } else {
            0
        };
        let casts = if self.casts { insert_casts(root) } else { 0 };
        tidy(root);
        PostStats { variables, casts }
    }
}

/// Mark every width-changing assignment with its cast.
///
/// # Returns
/// `usize` - Number of casts added (0 on a second run)
pub fn insert_casts(root: &mut StructuredNode) -> usize {
    let mut added: usize = 0;
    root.visit_mut(&mut |node| {
        if let StructuredNode::Statement(statement) = node {
            if TypeInferenceEngine::insert_cast(&mut statement.kind) {
                added += 1;
            }
        }
    });
    log::debug!("inserted {added} casts");
    added
}

/// Cosmetic clean-up of the tree.
pub fn tidy(root: &mut StructuredNode) {
    root.visit_mut(&mut |node| match node {
        StructuredNode::Sequence(nodes) => {
            if nodes.iter().any(|n| matches!(n, StructuredNode::Sequence(_))) {
                let flat: Vec<StructuredNode> = std::mem::take(nodes)
                    .into_iter()
                    .flat_map(|n| match n {
                        StructuredNode::Sequence(inner) => inner,
                        other => vec![other],
                    })
                    .collect();
                *nodes = flat;
            }
        }
        StructuredNode::If { cond, then, otherwise } => {
            if otherwise.as_deref().is_some_and(is_empty) {
                *otherwise = None;
            }
            if is_empty(then) {
                if let Some(other) = otherwise.take() {
                    *then = other;
                    cond.expr = cond.expr.clone().negate();
                }
            }
        }
        StructuredNode::While { body, .. } | StructuredNode::DoWhile { body, .. } | StructuredNode::Loop { body } => {
            if let StructuredNode::Sequence(nodes) = body.as_mut() {
                if matches!(nodes.last(), Some(StructuredNode::Continue)) {
                    nodes.pop();
                }
            }
        }
        _ => {}
    });
}

fn is_empty(node: &StructuredNode) -> bool {
    match node {
        StructuredNode::Sequence(nodes) => nodes.iter().all(is_empty),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::assign;
    use crate::decompiler::ir::instruction::{Expr, Statement, StatementKind, Width};
    use crate::decompiler::structurer::Condition;

    fn widening() -> StructuredNode {
        StructuredNode::Statement(Statement {
            id: 0,
            origin: 0x10,
            kind: assign(
                Expr::reg("rax", Width::W64),
                Expr::memory(Expr::reg("rdi", Width::W64), Width::W32, true),
            ),
        })
    }

    #[test]
    fn casts_are_inserted_once() {
        let mut root = StructuredNode::Sequence(vec![widening()]);
        assert_eq!(insert_casts(&mut root), 1);
        assert_eq!(insert_casts(&mut root), 0);
        match &root.statements()[0].kind {
            StatementKind::Assign { cast: Some(cast), .. } => {
                assert_eq!(cast.width, Width::W64);
                assert!(cast.signed);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_then_arm_is_swapped() {
        let cond = Condition {
            expr: Expr::binary(
                crate::decompiler::ir::instruction::BinaryOp::Eq,
                Expr::reg("eax", Width::W32),
                Expr::constant(0, Width::W32),
            ),
            origin: 0x10,
            id: Some(1),
        };
        let mut root = StructuredNode::Sequence(vec![StructuredNode::Sequence(vec![StructuredNode::If {
            cond,
            then: Box::new(StructuredNode::Sequence(Vec::new())),
            otherwise: Some(Box::new(StructuredNode::Sequence(vec![widening()]))),
        }])]);
        tidy(&mut root);
        match &root {
            StructuredNode::Sequence(nodes) => match &nodes[0] {
                StructuredNode::If { cond, otherwise, .. } => {
                    assert_eq!(cond.expr.to_string(), "(eax != 0)");
                    assert!(otherwise.is_none());
                }
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn trailing_continue_is_dropped() {
        let mut root = StructuredNode::Loop {
            body: Box::new(StructuredNode::Sequence(vec![widening(), StructuredNode::Continue])),
        };
        tidy(&mut root);
        match &root {
            StructuredNode::Loop { body } => assert_eq!(**body, StructuredNode::Sequence(vec![widening()])),
            other => panic!("unexpected {other:?}"),
        }
    }
}
