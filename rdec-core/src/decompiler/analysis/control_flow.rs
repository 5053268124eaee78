//! Control Flow Analysis
//!
//! Graph analyses over a loaded [`Routine`]: successor/predecessor lists by block
//! index, reverse postorder, dominators, post-dominators, edge classification and
//! natural loops. The structurer consumes all of them.
//!
//! # Memory Optimizations
//! - `EdgeType` uses `#[repr(u8)]`
//! - Successor and predecessor lists use `SmallVec<[u32; 2]>` (most blocks have ≤2)
//! - `Loop.body` uses `BitVec` for membership tests instead of `HashSet<usize>`
//! - Block ids are `u32` indices into `Routine::blocks`
//!
//! # Dominator Algorithm
//! Cooper, Harvey and Kennedy's iterative scheme: process blocks in reverse
//! postorder and intersect the dominator chains of processed predecessors until
//! nothing changes. Post-dominators run the same scheme on the reversed graph
//! with a virtual exit node that every returning block flows into.
//!
//! # Loop Detection Algorithm
//! An edge whose target dominates its source is a back edge. The natural loop of
//! a back edge is the header plus every block that reaches the latch without
//! passing through the header. Loops sharing a header are merged.

use crate::decompiler::routine::Routine;
use bitvec::prelude::*;
use smallvec::SmallVec;

/// Successor/predecessor view of a routine's blocks, by block index.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    /// Successor block indices, in edge order, without duplicates.
    pub successors: Vec<SmallVec<[u32; 2]>>,
    /// Predecessor block indices, without duplicates.
    pub predecessors: Vec<SmallVec<[u32; 2]>>,
    /// Every edge with its classification.
    pub edges: Vec<FlowEdge>,
    /// Entry block index.
    pub entry: u32,
}

/// Classified control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowEdge {
    pub from: u32,
    pub to: u32,
    pub edge_type: EdgeType,
}

/// Edge classification relative to the dominator tree.
///
/// # Memory Optimization
/// Uses `#[repr(u8)]` (1 byte instead of the default enum size).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EdgeType {
    /// Target comes later in reverse postorder.
    Forward = 0,
    /// Target dominates the source (loop edge).
    Back = 1,
    /// Anything else, including retreating edges of irreducible regions.
    Cross = 2,
}

/// Natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// Loop header block index.
    pub header: u32,
    /// Sources of the back edges into the header.
    pub latches: SmallVec<[u32; 2]>,
    /// Blocks of the loop, header included.
    pub body: BitVec<u32>,
    /// Blocks outside the loop reached directly from inside it.
    pub exits: SmallVec<[u32; 2]>,
}

impl Loop {
    pub fn contains(&self, block: u32) -> bool {
        self.body.get(block as usize).map(|b| *b).unwrap_or(false)
    }
}

/// Immediate (post-)dominator tree.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator per node; `None` for unreachable nodes. The root
    /// maps to itself.
    idom: Vec<Option<u32>>,
    /// Position of each node in the traversal order, for chain walks.
    order: Vec<u32>,
    root: u32,
}

impl DominatorTree {
    pub fn idom(&self, node: u32) -> Option<u32> {
        match self.idom.get(node as usize).copied().flatten() {
            Some(parent) if node != self.root => Some(parent),
            _ => None,
        }
    }

    /// Whether `a` dominates `b` (reflexive).
    pub fn dominates(&self, a: u32, b: u32) -> bool {
        if self.idom.get(b as usize).copied().flatten().is_none() {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }

    pub fn is_reachable(&self, node: u32) -> bool {
        self.idom.get(node as usize).copied().flatten().is_some()
    }

    /// Rank of a node in the order the tree was built from (lower is earlier).
    pub fn rank(&self, node: u32) -> u32 {
        self.order.get(node as usize).copied().unwrap_or(u32::MAX)
    }
}

/// Post-dominator tree plus the index of the virtual exit node.
#[derive(Debug, Clone)]
pub struct PostDominators {
    pub tree: DominatorTree,
    pub exit: u32,
}

impl PostDominators {
    /// Immediate post-dominator; `None` when it is the virtual exit or unknown.
    pub fn ipdom(&self, node: u32) -> Option<u32> {
        self.tree.idom(node).filter(|&p| p != self.exit)
    }
}

/// Control flow analyzer for building and analyzing flow graphs.
pub struct ControlFlowAnalyzer;

impl ControlFlowAnalyzer {
    /// Build the flow graph of a routine.
    ///
    /// # Arguments
    /// * `routine` - Loaded routine (edge targets already validated)
    ///
    /// # Returns
    /// `FlowGraph` - Successors and predecessors by block index with edges
    /// classified against the dominator tree
    pub fn build(routine: &Routine) -> FlowGraph {
        let n: usize = routine.blocks.len();
        let mut successors: Vec<SmallVec<[u32; 2]>> = vec![SmallVec::new(); n];
        let mut predecessors: Vec<SmallVec<[u32; 2]>> = vec![SmallVec::new(); n];

        for (idx, block) in routine.blocks.iter().enumerate() {
            for edge in &block.edges {
                let Some(target) = routine.block_index(edge.target) else {
                    continue;
                };
                let target = target as u32;
                if !successors[idx].contains(&target) {
                    successors[idx].push(target);
                }
                if !predecessors[target as usize].contains(&(idx as u32)) {
                    predecessors[target as usize].push(idx as u32);
                }
            }
        }

        let entry: u32 = routine.block_index(routine.entry).unwrap_or(0) as u32;
        let mut graph = FlowGraph {
            successors,
            predecessors,
            edges: Vec::new(),
            entry,
        };
        graph.edges = Self::classify_edges(&graph, &Self::dominators(&graph));
        graph
    }

    /// Reverse postorder of the blocks reachable from `root` over `succs`.
    pub fn reverse_postorder(succs: &[SmallVec<[u32; 2]>], root: u32) -> Vec<u32> {
        let n: usize = succs.len();
        let mut visited: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
        let mut postorder: Vec<u32> = Vec::with_capacity(n);
        if (root as usize) >= n {
            return postorder;
        }
        // Explicit stack of (node, next successor index) instead of recursion.
        let mut stack: Vec<(u32, usize)> = vec![(root, 0)];
        visited.set(root as usize, true);
        while let Some(top) = stack.last_mut() {
            let node: u32 = top.0;
            if let Some(&succ) = succs[node as usize].get(top.1) {
                top.1 += 1;
                if !visited[succ as usize] {
                    visited.set(succ as usize, true);
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(node);
                stack.pop();
            }
        }
        postorder.reverse();
        postorder
    }

    /// Dominator tree of the flow graph, rooted at the entry block.
    pub fn dominators(graph: &FlowGraph) -> DominatorTree {
        Self::dominator_tree(&graph.successors, &graph.predecessors, graph.entry)
    }

    /// Post-dominator tree, computed on the reversed graph with a virtual exit.
    ///
    /// # Algorithm
    /// 1. Add node `n` (the virtual exit) with an edge from every block without successors
    /// 2. Reverse all edges and run the dominator computation from the virtual exit
    ///
    /// Blocks that never reach a return (infinite loops) stay unreachable in the
    /// reversed graph and have no post-dominator.
    pub fn post_dominators(graph: &FlowGraph) -> PostDominators {
        let n: usize = graph.successors.len();
        let exit: u32 = n as u32;
        let mut rev_succs: Vec<SmallVec<[u32; 2]>> = graph.predecessors.clone();
        let mut rev_preds: Vec<SmallVec<[u32; 2]>> = graph.successors.clone();
        let mut terminals: SmallVec<[u32; 2]> = SmallVec::new();
        for (idx, succs) in graph.successors.iter().enumerate() {
            if succs.is_empty() {
                terminals.push(idx as u32);
                rev_preds[idx].push(exit);
            }
        }
        rev_succs.push(terminals);
        rev_preds.push(SmallVec::new());
        PostDominators {
            tree: Self::dominator_tree(&rev_succs, &rev_preds, exit),
            exit,
        }
    }

    fn dominator_tree(succs: &[SmallVec<[u32; 2]>], preds: &[SmallVec<[u32; 2]>], root: u32) -> DominatorTree {
        let n: usize = succs.len();
        let rpo: Vec<u32> = Self::reverse_postorder(succs, root);
        let mut order: Vec<u32> = vec![u32::MAX; n];
        for (pos, &node) in rpo.iter().enumerate() {
            order[node as usize] = pos as u32;
        }

        let mut idom: Vec<Option<u32>> = vec![None; n];
        if (root as usize) < n {
            idom[root as usize] = Some(root);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let mut new_idom: Option<u32> = None;
                for &pred in &preds[node as usize] {
                    if idom[pred as usize].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &order, pred, current),
                    });
                }
                if new_idom.is_some() && idom[node as usize] != new_idom {
                    idom[node as usize] = new_idom;
                    changed = true;
                }
            }
        }

        DominatorTree { idom, order, root }
    }

    fn intersect(idom: &[Option<u32>], order: &[u32], mut a: u32, mut b: u32) -> u32 {
        while a != b {
            while order[a as usize] > order[b as usize] {
                match idom[a as usize] {
                    Some(parent) => a = parent,
                    None => return b,
                }
            }
            while order[b as usize] > order[a as usize] {
                match idom[b as usize] {
                    Some(parent) => b = parent,
                    None => return a,
                }
            }
        }
        a
    }

    fn classify_edges(graph: &FlowGraph, doms: &DominatorTree) -> Vec<FlowEdge> {
        let mut edges: Vec<FlowEdge> = Vec::new();
        for (from, succs) in graph.successors.iter().enumerate() {
            let from = from as u32;
            for &to in succs {
                let edge_type = if doms.dominates(to, from) {
                    EdgeType::Back
                } else if doms.rank(from) < doms.rank(to) {
                    EdgeType::Forward
                } else {
                    EdgeType::Cross
                };
                edges.push(FlowEdge { from, to, edge_type });
            }
        }
        edges
    }

    /// Detect natural loops.
    ///
    /// # Arguments
    /// * `graph` - Flow graph with classified edges
    ///
    /// # Returns
    /// `Vec<Loop>` - One loop per header, sorted by header block index
    pub fn detect_loops(graph: &FlowGraph) -> Vec<Loop> {
        let n: usize = graph.successors.len();
        let mut loops: Vec<Loop> = Vec::new();

        for edge in graph.edges.iter().filter(|e| e.edge_type == EdgeType::Back) {
            let idx = match loops.iter().position(|l| l.header == edge.to) {
                Some(idx) => idx,
                None => {
                    let mut body: BitVec<u32> = bitvec![u32, Lsb0; 0; n];
                    body.set(edge.to as usize, true);
                    loops.push(Loop {
                        header: edge.to,
                        latches: SmallVec::new(),
                        body,
                        exits: SmallVec::new(),
                    });
                    loops.len() - 1
                }
            };
            let lp = &mut loops[idx];
            if !lp.latches.contains(&edge.from) {
                lp.latches.push(edge.from);
            }
            let mut work: Vec<u32> = vec![edge.from];
            while let Some(node) = work.pop() {
                if lp.body[node as usize] {
                    continue;
                }
                lp.body.set(node as usize, true);
                work.extend(graph.predecessors[node as usize].iter().copied());
            }
        }

        for lp in &mut loops {
            for node in lp.body.iter_ones() {
                for &succ in &graph.successors[node] {
                    if !lp.body[succ as usize] && !lp.exits.contains(&succ) {
                        lp.exits.push(succ);
                    }
                }
            }
            lp.exits.sort_unstable();
        }
        loops.sort_by_key(|l| l.header);
        log::debug!("detected {} loop(s)", loops.len());
        loops
    }
}
