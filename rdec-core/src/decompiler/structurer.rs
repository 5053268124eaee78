//! Control-Flow Structurer
//!
//! Turns the block graph of a routine (with its IR) into a tree of nested
//! statements: sequences, if/else, while, do/while, endless loops with
//! break/continue, and switches.
//!
//! # Algorithm
//! 1. Compute dominators, post-dominators and natural loops of the block graph
//! 2. Walk the graph from the entry, emitting each block once:
//!    - a loop header opens a loop context and its body is structured as a
//!      region that ends when control returns to the header
//!    - a two-way block becomes an `If` whose arms are regions ending at the
//!      block's immediate post-dominator (clamped to the enclosing loop)
//!    - a switch block becomes a `Switch` whose cases end at its post-dominator
//! 3. Reaching the innermost loop's header or follow emits `Continue` or
//!    `Break`; reaching anything already emitted (or an outer loop) emits a
//!    `Goto` and counts an approximate region
//! 4. Blocks never reached from the entry are appended under their labels
//! 5. Labels nobody jumps to are dropped, and every IR statement is checked to
//!    appear exactly once
//!
//! # Branch Order
//! When both arms of a conditional have to be emitted, the arm with fewer
//! instructions becomes the `then` arm (ties go to the true edge) unless
//! [`BranchOrder::TrueBranchFirst`] is configured.

use crate::decompiler::analysis::{ControlFlowAnalyzer, DominatorTree, FlowGraph, Loop, PostDominators};
use crate::decompiler::config::{BranchOrder, StructuringOptions};
use crate::decompiler::error::DecompilerError;
use crate::decompiler::ir::instruction::{BinaryOp, Expr, IrRoutine, Statement, StatementKind};
use crate::decompiler::routine::{EdgeKind, Routine};
use bitvec::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// Condition of an `If`/`While`/`DoWhile`, with the statement it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub expr: Expr,
    /// Address of the branch instruction.
    pub origin: u64,
    /// Id of the consumed branch statement, if there was one.
    pub id: Option<u32>,
}

/// One `case` arm of a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCase {
    pub values: SmallVec<[i64; 2]>,
    pub body: StructuredNode,
}

/// Structured statement tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredNode {
    Sequence(Vec<StructuredNode>),
    If {
        cond: Condition,
        then: Box<StructuredNode>,
        otherwise: Option<Box<StructuredNode>>,
    },
    While {
        cond: Condition,
        body: Box<StructuredNode>,
    },
    DoWhile {
        body: Box<StructuredNode>,
        cond: Condition,
    },
    /// Endless loop, left through `Break` or a return.
    Loop {
        body: Box<StructuredNode>,
    },
    Switch {
        selector: Expr,
        origin: u64,
        cases: Vec<SwitchCase>,
        default: Option<Box<StructuredNode>>,
    },
    Break,
    Continue,
    Goto(u64),
    Label(u64),
    Statement(Statement),
}

impl StructuredNode {
    /// Pre-order visit of every node.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a StructuredNode)) {
        f(self);
        match self {
            StructuredNode::Sequence(nodes) => nodes.iter().for_each(|n| n.visit(f)),
            StructuredNode::If { then, otherwise, .. } => {
                then.visit(f);
                if let Some(otherwise) = otherwise {
                    otherwise.visit(f);
                }
            }
            StructuredNode::While { body, .. }
            | StructuredNode::DoWhile { body, .. }
            | StructuredNode::Loop { body } => body.visit(f),
            StructuredNode::Switch { cases, default, .. } => {
                cases.iter().for_each(|c| c.body.visit(f));
                if let Some(default) = default {
                    default.visit(f);
                }
            }
            _ => {}
        }
    }

    /// Mutable visit of every node, children before parents.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut StructuredNode)) {
        match self {
            StructuredNode::Sequence(nodes) => nodes.iter_mut().for_each(|n| n.visit_mut(f)),
            StructuredNode::If { then, otherwise, .. } => {
                then.visit_mut(f);
                if let Some(otherwise) = otherwise {
                    otherwise.visit_mut(f);
                }
            }
            StructuredNode::While { body, .. }
            | StructuredNode::DoWhile { body, .. }
            | StructuredNode::Loop { body } => body.visit_mut(f),
            StructuredNode::Switch { cases, default, .. } => {
                cases.iter_mut().for_each(|c| c.body.visit_mut(f));
                if let Some(default) = default {
                    default.visit_mut(f);
                }
            }
            _ => {}
        }
        f(self);
    }

    /// Every expression in the order the renderer prints them, mutably.
    pub fn for_each_expr_mut(&mut self, f: &mut impl FnMut(&mut Expr)) {
        match self {
            StructuredNode::Sequence(nodes) => nodes.iter_mut().for_each(|n| n.for_each_expr_mut(f)),
            StructuredNode::If { cond, then, otherwise } => {
                f(&mut cond.expr);
                then.for_each_expr_mut(f);
                if let Some(otherwise) = otherwise {
                    otherwise.for_each_expr_mut(f);
                }
            }
            StructuredNode::While { cond, body } => {
                f(&mut cond.expr);
                body.for_each_expr_mut(f);
            }
            StructuredNode::DoWhile { body, cond } => {
                body.for_each_expr_mut(f);
                f(&mut cond.expr);
            }
            StructuredNode::Loop { body } => body.for_each_expr_mut(f),
            StructuredNode::Switch {
                selector,
                cases,
                default,
                ..
            } => {
                f(selector);
                cases.iter_mut().for_each(|c| c.body.for_each_expr_mut(f));
                if let Some(default) = default {
                    default.for_each_expr_mut(f);
                }
            }
            StructuredNode::Statement(statement) => statement.expressions_mut().into_iter().for_each(|e| f(e)),
            StructuredNode::Break | StructuredNode::Continue | StructuredNode::Goto(_) | StructuredNode::Label(_) => {}
        }
    }

    /// Leaf statements in tree order.
    pub fn statements(&self) -> Vec<&Statement> {
        let mut out: Vec<&Statement> = Vec::new();
        self.visit(&mut |node| {
            if let StructuredNode::Statement(statement) = node {
                out.push(statement);
            }
        });
        out
    }

    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            StructuredNode::While { .. } | StructuredNode::DoWhile { .. } | StructuredNode::Loop { .. }
        )
    }

    /// `break`, `continue` or `goto`: transfers control and never falls through.
    fn is_jump(&self) -> bool {
        match self {
            StructuredNode::Break | StructuredNode::Continue | StructuredNode::Goto(_) => true,
            StructuredNode::Sequence(nodes) => matches!(nodes.as_slice(), [only] if only.is_jump()),
            _ => false,
        }
    }
}

/// Result of structuring a routine.
#[derive(Debug, Clone)]
pub struct StructuredRoutine {
    pub root: StructuredNode,
    /// Places where control flow could only be expressed with `goto`.
    pub approximate_regions: usize,
}

enum Context {
    Loop {
        header: u32,
        follow: Option<u32>,
        body: BitVec<u32>,
    },
    Switch {
        follow: Option<u32>,
    },
}

/// Statements emitted for a region and whether it ended at its stop block.
struct Region {
    nodes: Vec<StructuredNode>,
    reached_stop: bool,
}

/// Control-flow structurer.
pub struct Structurer<'a> {
    routine: &'a Routine,
    ir: &'a IrRoutine,
    options: StructuringOptions,
    graph: FlowGraph,
    doms: DominatorTree,
    pdoms: PostDominators,
    loops: BTreeMap<u32, Loop>,
    emitted: BitVec<u32>,
    seen: BitVec<u32>,
    contexts: Vec<Context>,
    approximate: usize,
}

impl<'a> Structurer<'a> {
    /// Structure a routine.
    ///
    /// # Arguments
    /// * `routine` - Loaded routine (block graph)
    /// * `ir` - IR of the routine, block for block
    /// * `options` - Branch order policy
    ///
    /// # Returns
    /// `StructuredRoutine` - Root `Sequence` plus the approximate-region count
    ///
    /// # Errors
    /// `Internal` when the tree lost or duplicated an IR statement.
    pub fn structure(
        routine: &'a Routine,
        ir: &'a IrRoutine,
        options: &StructuringOptions,
    ) -> Result<StructuredRoutine, DecompilerError> {
        let graph: FlowGraph = ControlFlowAnalyzer::build(routine);
        let doms: DominatorTree = ControlFlowAnalyzer::dominators(&graph);
        let pdoms: PostDominators = ControlFlowAnalyzer::post_dominators(&graph);
        let loops: BTreeMap<u32, Loop> = ControlFlowAnalyzer::detect_loops(&graph)
            .into_iter()
            .map(|l| (l.header, l))
            .collect();
        let blocks: usize = routine.blocks.len();

        let mut structurer = Structurer {
            routine,
            ir,
            options: *options,
            graph,
            doms,
            pdoms,
            loops,
            emitted: bitvec![u32, Lsb0; 0; blocks],
            seen: bitvec![u32, Lsb0; 0; ir.next_id as usize],
            contexts: Vec::new(),
            approximate: 0,
        };

        let mut nodes: Vec<StructuredNode> = Vec::new();
        if blocks > 0 {
            let entry: u32 = structurer.graph.entry;
            nodes = structurer.region(entry, None, false).nodes;
        }

        // Blocks never reached from the entry keep their labels so stray
        // jumps into them still resolve.
        let mut unreached: BTreeSet<u64> = BTreeSet::new();
        for idx in 0..blocks {
            if !structurer.emitted[idx] {
                if structurer.doms.is_reachable(idx as u32) {
                    log::warn!("block 0x{:x} was not placed in any region", routine.blocks[idx].address);
                } else {
                    log::warn!("block 0x{:x} is unreachable from the entry", routine.blocks[idx].address);
                }
                structurer.approximate += 1;
                unreached.insert(routine.blocks[idx].address);
                nodes.extend(structurer.region(idx as u32, None, false).nodes);
            }
        }

        let mut root = StructuredNode::Sequence(nodes);
        prune_labels(&mut root, &unreached);
        structurer.check_statements(&root)?;

        log::debug!(
            "structured {} blocks ({} approximate regions)",
            blocks,
            structurer.approximate
        );
        Ok(StructuredRoutine {
            root,
            approximate_regions: structurer.approximate,
        })
    }

    /// Emit blocks from `start` until `stop`, a return, or a jump.
    ///
    /// With `at_header` set, `start` is the header of the loop being built and
    /// is emitted as a plain block.
    fn region(&mut self, start: u32, stop: Option<u32>, at_header: bool) -> Region {
        let mut nodes: Vec<StructuredNode> = Vec::new();
        let mut current: Option<u32> = Some(start);
        let mut first: bool = true;

        while let Some(block) = current {
            let header_entry = first && at_header;
            first = false;

            if Some(block) == stop && !header_entry {
                return Region {
                    nodes,
                    reached_stop: true,
                };
            }
            if !header_entry {
                if let Some(jump) = self.context_jump(block) {
                    nodes.push(jump);
                    break;
                }
                if self.emitted[block as usize] {
                    nodes.push(self.goto(block));
                    break;
                }
                if self.loops.contains_key(&block) {
                    let (node, next) = self.structure_loop(block);
                    nodes.extend(node);
                    current = next;
                    continue;
                }
            }
            let (emitted, next) = self.structure_block(block, stop);
            nodes.extend(emitted);
            current = next;
        }

        Region {
            nodes,
            reached_stop: false,
        }
    }

    fn goto(&mut self, block: u32) -> StructuredNode {
        self.approximate += 1;
        StructuredNode::Goto(self.address(block))
    }

    fn address(&self, block: u32) -> u64 {
        self.routine.blocks[block as usize].address
    }

    /// `continue`/`break`/`goto` when `block` is a header or follow of an
    /// enclosing construct.
    fn context_jump(&mut self, block: u32) -> Option<StructuredNode> {
        let mut innermost_loop: bool = true;
        for (depth, ctx) in self.contexts.iter().enumerate().rev() {
            let innermost = depth + 1 == self.contexts.len();
            match ctx {
                Context::Loop { header, follow, .. } => {
                    if *header == block {
                        return Some(if innermost_loop {
                            StructuredNode::Continue
                        } else {
                            self.approximate += 1;
                            StructuredNode::Goto(self.routine.blocks[block as usize].address)
                        });
                    }
                    if *follow == Some(block) {
                        return Some(if innermost {
                            StructuredNode::Break
                        } else {
                            self.approximate += 1;
                            StructuredNode::Goto(self.routine.blocks[block as usize].address)
                        });
                    }
                    innermost_loop = false;
                }
                Context::Switch { follow } => {
                    if *follow == Some(block) {
                        return Some(if innermost {
                            StructuredNode::Break
                        } else {
                            self.approximate += 1;
                            StructuredNode::Goto(self.routine.blocks[block as usize].address)
                        });
                    }
                }
            }
        }
        None
    }

    fn mark(&mut self, id: u32) {
        if (id as usize) < self.seen.len() {
            self.seen.set(id as usize, true);
        }
    }

    /// Emit one block and whatever conditional/switch construct it heads.
    /// Returns the nodes and the block where the enclosing region continues.
    fn structure_block(&mut self, block: u32, stop: Option<u32>) -> (Vec<StructuredNode>, Option<u32>) {
        self.emitted.set(block as usize, true);
        let (routine, ir): (&'a Routine, &'a IrRoutine) = (self.routine, self.ir);
        let raw = &routine.blocks[block as usize];
        let statements: &'a [Statement] = &ir.blocks[block as usize].statements;
        let mut nodes: Vec<StructuredNode> = vec![StructuredNode::Label(raw.address)];

        if raw.is_switch() {
            let (body, terminator) = split_terminator(statements, |k| matches!(k, StatementKind::Jump { .. }));
            self.emit_statements(&mut nodes, body);
            let (node, next) = self.structure_switch(block, terminator, stop);
            nodes.push(node);
            return (nodes, next);
        }

        if raw.is_conditional() {
            let (body, terminator) = split_terminator(statements, |k| matches!(k, StatementKind::Branch { .. }));
            self.emit_statements(&mut nodes, body);
            let cond = self.condition(block, terminator, EdgeKind::True);
            let next = self.structure_if(block, cond, stop, &mut nodes);
            return (nodes, next);
        }

        let successor: Option<u32> = self.graph.successors[block as usize].first().copied();
        let (body, terminator) = match successor {
            Some(_) => split_terminator(statements, is_direct_jump),
            None => (statements, None),
        };
        self.emit_statements(&mut nodes, body);
        if let Some(jump) = terminator {
            self.mark(jump.id);
        }
        (nodes, successor)
    }

    fn emit_statements(&mut self, nodes: &mut Vec<StructuredNode>, statements: &[Statement]) {
        for statement in statements {
            self.mark(statement.id);
            nodes.push(StructuredNode::Statement(statement.clone()));
        }
    }

    /// Condition under which `block` takes the edge of `kind`.
    fn condition(&mut self, block: u32, terminator: Option<&Statement>, kind: EdgeKind) -> Condition {
        let routine: &'a Routine = self.routine;
        let raw = &routine.blocks[block as usize];
        let origin = raw.instructions.last().map(|i| i.address).unwrap_or(raw.address);
        let Some(Statement {
            id,
            origin,
            kind: StatementKind::Branch { cond, target },
        }) = terminator
        else {
            return Condition {
                expr: Expr::Opaque("?".to_string()),
                origin,
                id: None,
            };
        };
        self.mark(*id);
        let true_target = raw.edge(EdgeKind::True);
        let false_target = raw.edge(EdgeKind::False);
        // The branch may point at the false edge when the loader paired them
        // the other way round.
        let holds_on_true = Some(*target) == true_target || Some(*target) != false_target;
        let wanted_true = kind == EdgeKind::True;
        let expr = if holds_on_true == wanted_true {
            cond.clone()
        } else {
            cond.clone().negate()
        };
        Condition {
            expr,
            origin: *origin,
            id: Some(*id),
        }
    }

    fn target_index(&self, block: u32, kind: EdgeKind) -> Option<u32> {
        let target = self.routine.blocks[block as usize].edge(kind)?;
        self.routine.block_index(target).map(|i| i as u32)
    }

    /// Join point of a two-way or switch block, limited to the innermost loop.
    fn join(&self, block: u32) -> Option<u32> {
        let join = self.pdoms.ipdom(block)?;
        for ctx in self.contexts.iter().rev() {
            if let Context::Loop { header, body, .. } = ctx {
                if join == *header || !body[join as usize] {
                    return None;
                }
                break;
            }
        }
        Some(join)
    }

    /// Instructions in the blocks an arm head dominates.
    fn arm_size(&self, head: u32) -> usize {
        self.routine
            .blocks
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.doms.dominates(head, *idx as u32))
            .map(|(_, block)| block.instructions.len())
            .sum()
    }

    fn structure_if(
        &mut self,
        block: u32,
        cond: Condition,
        stop: Option<u32>,
        nodes: &mut Vec<StructuredNode>,
    ) -> Option<u32> {
        let (Some(on_true), Some(on_false)) = (
            self.target_index(block, EdgeKind::True),
            self.target_index(block, EdgeKind::False),
        ) else {
            return None;
        };
        if on_true == on_false {
            return Some(on_true);
        }

        let join = self.join(block);
        let arm_stop = join.or(stop);

        if join == Some(on_true) || join == Some(on_false) {
            // One arm is empty: `if (c) { ... }`.
            let (head, cond) = if join == Some(on_true) {
                (on_false, negated(cond))
            } else {
                (on_true, cond)
            };
            let arm = self.region(head, arm_stop, false);
            nodes.push(StructuredNode::If {
                cond,
                then: Box::new(StructuredNode::Sequence(arm.nodes)),
                otherwise: None,
            });
            return join;
        }

        let true_first = match self.options.branch_order {
            BranchOrder::TrueBranchFirst => true,
            BranchOrder::FewerInstructionsFirst => self.arm_size(on_true) <= self.arm_size(on_false),
        };
        let (first, second, cond) = if true_first {
            (on_true, on_false, cond)
        } else {
            (on_false, on_true, negated(cond))
        };

        let then = self.region(first, arm_stop, false);
        let otherwise = self.region(second, arm_stop, false);
        let then_node = StructuredNode::Sequence(then.nodes);

        if join.is_none() && then_node.is_jump() {
            // `if (c) { break; }` followed by the other arm at the same level.
            nodes.push(StructuredNode::If {
                cond,
                then: Box::new(then_node),
                otherwise: None,
            });
            nodes.extend(otherwise.nodes);
            return if otherwise.reached_stop { stop } else { None };
        }

        nodes.push(StructuredNode::If {
            cond,
            then: Box::new(then_node),
            otherwise: (!otherwise.nodes.is_empty()).then(|| Box::new(StructuredNode::Sequence(otherwise.nodes))),
        });
        // Without a join, an arm that does not reach `stop` never falls through.
        if join.is_none() && (then.reached_stop || otherwise.reached_stop) {
            return stop;
        }
        join
    }

    fn structure_switch(
        &mut self,
        block: u32,
        terminator: Option<&'a Statement>,
        stop: Option<u32>,
    ) -> (StructuredNode, Option<u32>) {
        let routine: &'a Routine = self.routine;
        let raw = &routine.blocks[block as usize];
        let origin = raw.instructions.last().map(|i| i.address).unwrap_or(raw.address);
        let selector = match terminator {
            Some(Statement {
                id,
                kind: StatementKind::Jump { target },
                ..
            }) => {
                self.mark(*id);
                switch_selector(target)
            }
            _ => Expr::Opaque("?".to_string()),
        };

        let follow = self.join(block).or(stop);
        let mut groups: Vec<(u32, SmallVec<[i64; 2]>)> = Vec::new();
        let mut default_target: Option<u32> = None;
        for edge in &raw.edges {
            let Some(target) = self.routine.block_index(edge.target).map(|i| i as u32) else {
                continue;
            };
            match edge.kind {
                EdgeKind::Case(value) => match groups.iter_mut().find(|(t, _)| *t == target) {
                    Some((_, values)) => values.push(value),
                    None => groups.push((target, SmallVec::from_slice(&[value]))),
                },
                _ => default_target = Some(target),
            }
        }

        self.contexts.push(Context::Switch { follow });
        let mut cases: Vec<SwitchCase> = Vec::new();
        for (target, values) in groups {
            let body = self.case_body(target, follow);
            cases.push(SwitchCase { values, body });
        }
        let default = match default_target {
            Some(target) if Some(target) != follow => Some(Box::new(self.case_body(target, follow))),
            _ => None,
        };
        self.contexts.pop();

        (
            StructuredNode::Switch {
                selector,
                origin,
                cases,
                default,
            },
            follow,
        )
    }

    fn case_body(&mut self, target: u32, follow: Option<u32>) -> StructuredNode {
        if Some(target) == follow {
            return StructuredNode::Sequence(vec![StructuredNode::Break]);
        }
        let mut region = self.region(target, follow, false);
        if region.reached_stop {
            region.nodes.push(StructuredNode::Break);
        }
        StructuredNode::Sequence(region.nodes)
    }

    /// Block where control continues after the loop headed by `header`.
    fn loop_follow(&self, lp: &Loop) -> Option<u32> {
        let outside = |block: u32| -> Option<u32> {
            let succs = &self.graph.successors[block as usize];
            if succs.len() != 2 {
                return None;
            }
            let out: SmallVec<[u32; 2]> = succs.iter().copied().filter(|s| !lp.contains(*s)).collect();
            (out.len() == 1).then(|| out[0])
        };
        outside(lp.header)
            .or_else(|| match lp.latches.as_slice() {
                [latch] => outside(*latch),
                _ => None,
            })
            .or_else(|| lp.exits.iter().copied().min_by_key(|&e| self.doms.rank(e)))
    }

    fn structure_loop(&mut self, header: u32) -> (Vec<StructuredNode>, Option<u32>) {
        let Some(lp) = self.loops.get(&header).cloned() else {
            return self.structure_block(header, None);
        };
        let follow = self.loop_follow(&lp);
        self.contexts.push(Context::Loop {
            header,
            follow,
            body: lp.body.clone(),
        });

        let node = if let Some(node) = self.try_while(&lp, follow) {
            node
        } else if let Some(node) = self.try_do_while(&lp, follow) {
            node
        } else {
            let body = self.region(header, Some(header), true);
            vec![StructuredNode::Loop {
                body: Box::new(StructuredNode::Sequence(body.nodes)),
            }]
        };
        self.contexts.pop();
        (node, follow)
    }

    /// Header holding nothing but the exit test: `while (c) { ... }`.
    fn try_while(&mut self, lp: &Loop, follow: Option<u32>) -> Option<Vec<StructuredNode>> {
        let header = lp.header;
        let (routine, ir): (&'a Routine, &'a IrRoutine) = (self.routine, self.ir);
        let raw = &routine.blocks[header as usize];
        if !raw.is_conditional() || header_is_latch(lp) {
            return None;
        }
        let statements: &'a [Statement] = &ir.blocks[header as usize].statements;
        let (body, terminator) = split_terminator(statements, |k| matches!(k, StatementKind::Branch { .. }));
        if !body.is_empty() || terminator.is_none() {
            return None;
        }
        let on_true = self.target_index(header, EdgeKind::True)?;
        let on_false = self.target_index(header, EdgeKind::False)?;
        let (inside, kind) = if lp.contains(on_true) && Some(on_false) == follow {
            (on_true, EdgeKind::True)
        } else if lp.contains(on_false) && Some(on_true) == follow {
            (on_false, EdgeKind::False)
        } else {
            return None;
        };

        self.emitted.set(header as usize, true);
        let cond = self.condition(header, terminator, kind);
        let body = self.region(inside, Some(header), false);
        Some(vec![
            StructuredNode::Label(raw.address),
            StructuredNode::While {
                cond,
                body: Box::new(StructuredNode::Sequence(body.nodes)),
            },
        ])
    }

    /// Single latch testing the loop condition: `do { ... } while (c);`.
    fn try_do_while(&mut self, lp: &Loop, follow: Option<u32>) -> Option<Vec<StructuredNode>> {
        let [latch] = lp.latches.as_slice() else {
            return None;
        };
        let latch = *latch;
        let (routine, ir): (&'a Routine, &'a IrRoutine) = (self.routine, self.ir);
        let raw = &routine.blocks[latch as usize];
        if !raw.is_conditional() {
            return None;
        }
        let on_true = self.target_index(latch, EdgeKind::True)?;
        let on_false = self.target_index(latch, EdgeKind::False)?;
        let kind = if on_true == lp.header && Some(on_false) == follow {
            EdgeKind::True
        } else if on_false == lp.header && Some(on_true) == follow {
            EdgeKind::False
        } else {
            return None;
        };

        let statements: &'a [Statement] = &ir.blocks[latch as usize].statements;
        let (latch_body, terminator) =
            split_terminator(statements, |k| matches!(k, StatementKind::Branch { .. }));

        let mut nodes: Vec<StructuredNode> = Vec::new();
        if latch != lp.header {
            let body = self.region(lp.header, Some(latch), true);
            nodes.extend(body.nodes);
            if !body.reached_stop {
                // Some path left the body before the latch test; give up on the
                // do/while shape for the latch and jump to it.
                nodes.push(self.goto(latch));
                return Some(vec![StructuredNode::Loop {
                    body: Box::new(StructuredNode::Sequence(nodes)),
                }]);
            }
        }
        self.emitted.set(latch as usize, true);
        nodes.push(StructuredNode::Label(raw.address));
        self.emit_statements(&mut nodes, latch_body);
        let cond = self.condition(latch, terminator, kind);
        Some(vec![StructuredNode::DoWhile {
            body: Box::new(StructuredNode::Sequence(nodes)),
            cond,
        }])
    }

    /// Every IR statement must show up exactly once, as a leaf or as a
    /// consumed branch or jump.
    fn check_statements(&self, root: &StructuredNode) -> Result<(), DecompilerError> {
        let mut count: Vec<u8> = vec![0; self.ir.next_id as usize];
        let mut bump = |id: u32| -> Result<(), DecompilerError> {
            let slot = count
                .get_mut(id as usize)
                .ok_or_else(|| DecompilerError::internal(format!("statement id {id} out of range")))?;
            *slot = slot.saturating_add(1);
            Ok(())
        };
        let mut ids: Vec<u32> = Vec::new();
        root.visit(&mut |node| match node {
            StructuredNode::Statement(statement) => ids.push(statement.id),
            StructuredNode::If { cond, .. }
            | StructuredNode::While { cond, .. }
            | StructuredNode::DoWhile { cond, .. } => ids.extend(cond.id),
            _ => {}
        });
        for id in ids {
            bump(id)?;
        }
        // Consumed jumps and switch dispatches only exist as marks.
        for block in &self.ir.blocks {
            for statement in &block.statements {
                let id = statement.id as usize;
                let marked = self.seen.get(id).map(|b| *b).unwrap_or(false);
                match count.get(id).copied().unwrap_or(0) {
                    0 if marked && consumable(&statement.kind) => {}
                    0 => {
                        return Err(DecompilerError::internal(format!(
                            "statement {} at 0x{:x} missing from the structured tree",
                            statement.id, statement.origin
                        )))
                    }
                    1 => {}
                    _ => {
                        return Err(DecompilerError::internal(format!(
                            "statement {} at 0x{:x} emitted more than once",
                            statement.id, statement.origin
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

fn negated(cond: Condition) -> Condition {
    Condition {
        expr: cond.expr.negate(),
        ..cond
    }
}

fn header_is_latch(lp: &Loop) -> bool {
    lp.latches.contains(&lp.header)
}

fn is_direct_jump(kind: &StatementKind) -> bool {
    matches!(
        kind,
        StatementKind::Jump {
            target: Expr::Const { .. } | Expr::Symbol(_)
        }
    )
}

fn consumable(kind: &StatementKind) -> bool {
    matches!(kind, StatementKind::Jump { .. } | StatementKind::Branch { .. })
}

/// Split off the last statement when it satisfies `is_terminator`.
fn split_terminator(
    statements: &[Statement],
    is_terminator: impl Fn(&StatementKind) -> bool,
) -> (&[Statement], Option<&Statement>) {
    match statements.split_last() {
        Some((last, rest)) if is_terminator(&last.kind) => (rest, Some(last)),
        _ => (statements, None),
    }
}

/// Index register of a jump-table load, or the whole target expression.
fn switch_selector(target: &Expr) -> Expr {
    let mut index: Option<Expr> = None;
    target.visit(&mut |e| {
        if let Expr::Binary {
            op: BinaryOp::Mul,
            lhs,
            ..
        } = e
        {
            if index.is_none() && matches!(**lhs, Expr::Register { .. }) {
                index = Some((**lhs).clone());
            }
        }
    });
    index.unwrap_or_else(|| target.clone())
}

/// Drop labels no `goto` or leaf jump refers to.
fn prune_labels(root: &mut StructuredNode, keep: &BTreeSet<u64>) {
    let mut referenced: BTreeSet<u64> = keep.clone();
    root.visit(&mut |node| match node {
        StructuredNode::Goto(target) => {
            referenced.insert(*target);
        }
        StructuredNode::Statement(Statement { kind, .. }) => match kind {
            StatementKind::Branch { target, .. } => {
                referenced.insert(*target);
            }
            StatementKind::Jump {
                target: Expr::Const { value, .. },
            } => {
                referenced.insert(*value as u64);
            }
            _ => {}
        },
        _ => {}
    });
    root.visit_mut(&mut |node| {
        if let StructuredNode::Sequence(nodes) = node {
            nodes.retain(|n| !matches!(n, StructuredNode::Label(addr) if !referenced.contains(addr)));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompiler::arch::resolve;
    use crate::decompiler::ir::builder::IrBuilder;
    use crate::decompiler::loader::GraphLoader;
    use serde_json::{json, Value};

    fn structure(graph: Value, order: BranchOrder) -> StructuredRoutine {
        let routine = GraphLoader::load(&graph).unwrap();
        let arch = resolve("x86").unwrap();
        let (ir, _) = IrBuilder::build(&routine, arch.as_ref());
        Structurer::structure(&routine, &ir, &StructuringOptions { branch_order: order }).unwrap()
    }

    fn count(node: &StructuredNode, pred: impl Fn(&StructuredNode) -> bool) -> usize {
        let mut n = 0;
        node.visit(&mut |x| {
            if pred(x) {
                n += 1;
            }
        });
        n
    }

    fn diamond(then_len: usize) -> Value {
        let then_insts: Vec<Value> = (0..then_len)
            .map(|i| json!({ "address": 0x20 + i as u64, "mnemonic": "inc", "operands": ["eax"] }))
            .collect();
        json!([
            { "address": 0x10, "instructions": [
                { "address": 0x10, "mnemonic": "cmp", "operands": ["eax", "1"] },
                { "address": 0x12, "mnemonic": "je", "operands": ["0x20"] } ],
              "edges": [ { "target": 0x20, "kind": "true" }, { "target": 0x30, "kind": "false" } ] },
            { "address": 0x20, "instructions": then_insts, "edges": [ { "target": 0x40 } ] },
            { "address": 0x30, "instructions": [
                { "address": 0x30, "mnemonic": "dec", "operands": ["eax"] },
                { "address": 0x31, "mnemonic": "dec", "operands": ["eax"] } ],
              "edges": [ { "target": 0x40 } ] },
            { "address": 0x40, "instructions": [ { "address": 0x40, "mnemonic": "ret" } ] }
        ])
    }

    #[test]
    fn diamond_becomes_if_else() {
        let result = structure(diamond(2), BranchOrder::FewerInstructionsFirst);
        let StructuredNode::Sequence(nodes) = &result.root else {
            panic!("root must be a sequence");
        };
        let if_pos = nodes
            .iter()
            .position(|n| matches!(n, StructuredNode::If { otherwise: Some(_), .. }))
            .expect("if/else");
        assert!(matches!(
            nodes[if_pos + 1..].iter().find(|n| matches!(n, StructuredNode::Statement(_))),
            Some(StructuredNode::Statement(Statement { kind: StatementKind::Return { .. }, .. }))
        ));
        assert_eq!(result.approximate_regions, 0);
    }

    #[test]
    fn shorter_arm_comes_first() {
        let result = structure(diamond(3), BranchOrder::FewerInstructionsFirst);
        let mut first_then: Option<usize> = None;
        result.root.visit(&mut |n| {
            if let StructuredNode::If { then, .. } = n {
                first_then.get_or_insert(then.statements().len());
            }
        });
        assert_eq!(first_then, Some(2));

        let result = structure(diamond(3), BranchOrder::TrueBranchFirst);
        let mut first_then: Option<usize> = None;
        result.root.visit(&mut |n| {
            if let StructuredNode::If { then, .. } = n {
                first_then.get_or_insert(then.statements().len());
            }
        });
        assert_eq!(first_then, Some(3));
    }

    #[test]
    fn counting_loop_becomes_do_while() {
        let result = structure(
            json!([
                { "address": 0x10, "instructions": [ { "address": 0x10, "mnemonic": "xor", "operands": ["ecx", "ecx"] } ],
                  "edges": [ { "target": 0x20 } ] },
                { "address": 0x20, "instructions": [
                    { "address": 0x20, "mnemonic": "inc", "operands": ["ecx"] },
                    { "address": 0x21, "mnemonic": "cmp", "operands": ["ecx", "10"] },
                    { "address": 0x24, "mnemonic": "jl", "operands": ["0x20"] } ],
                  "edges": [ { "target": 0x20, "kind": "true" }, { "target": 0x30, "kind": "false" } ] },
                { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
            ]),
            BranchOrder::FewerInstructionsFirst,
        );
        assert_eq!(count(&result.root, |n| matches!(n, StructuredNode::DoWhile { .. })), 1);
        assert_eq!(count(&result.root, |n| matches!(n, StructuredNode::Goto(_))), 0);
    }

    #[test]
    fn test_at_top_becomes_while() {
        let result = structure(
            json!([
                { "address": 0x10, "instructions": [ { "address": 0x10, "mnemonic": "nop" } ],
                  "edges": [ { "target": 0x20 } ] },
                { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "jne", "operands": ["0x30"] } ],
                  "edges": [ { "target": 0x30, "kind": "true" }, { "target": 0x40, "kind": "false" } ] },
                { "address": 0x30, "instructions": [
                    { "address": 0x30, "mnemonic": "dec", "operands": ["eax"] },
                    { "address": 0x31, "mnemonic": "jmp", "operands": ["0x20"] } ],
                  "edges": [ { "target": 0x20 } ] },
                { "address": 0x40, "instructions": [ { "address": 0x40, "mnemonic": "ret" } ] }
            ]),
            BranchOrder::FewerInstructionsFirst,
        );
        assert_eq!(count(&result.root, |n| matches!(n, StructuredNode::While { .. })), 1);
        assert_eq!(result.approximate_regions, 0);
    }

    #[test]
    fn linear_chain_is_one_sequence_in_block_order() {
        let result = structure(
            json!([
                { "address": 0x10, "instructions": [ { "address": 0x10, "mnemonic": "inc", "operands": ["eax"] } ],
                  "edges": [ { "target": 0x20 } ] },
                { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "inc", "operands": ["ecx"] } ],
                  "edges": [ { "target": 0x30 } ] },
                { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
            ]),
            BranchOrder::FewerInstructionsFirst,
        );
        let StructuredNode::Sequence(nodes) = &result.root else {
            panic!("root must be a sequence");
        };
        let origins: Vec<u64> = nodes
            .iter()
            .map(|n| match n {
                StructuredNode::Statement(s) => s.origin,
                other => panic!("unexpected node {other:?}"),
            })
            .collect();
        assert_eq!(origins, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn unreachable_block_is_appended_with_label() {
        let result = structure(
            json!([
                { "address": 0x10, "instructions": [ { "address": 0x10, "mnemonic": "ret" } ] },
                { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "nop" },
                                                     { "address": 0x21, "mnemonic": "ret" } ] }
            ]),
            BranchOrder::FewerInstructionsFirst,
        );
        assert_eq!(result.approximate_regions, 1);
        assert_eq!(count(&result.root, |n| matches!(n, StructuredNode::Label(0x20))), 1);
    }
}
