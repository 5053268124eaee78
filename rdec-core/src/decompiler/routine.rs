//! Routine Model
//!
//! The architecture-agnostic model of one function as delivered by the analyzer:
//! a [`Routine`] owns its [`Block`]s, each block owns its raw [`Instruction`]s and
//! its outgoing [`Edge`]s.
//!
//! # Memory Optimizations
//! - `Instruction.operands` uses `SmallVec<[Operand; 4]>` (almost every ISA has ≤4 operands)
//! - `Block.edges` and `Block.predecessors` use `SmallVec<[_; 2]>` (most blocks have ≤2)
//! - Address lookups use `BTreeMap` so every iteration order is deterministic
//!
//! Instructions are immutable once loaded. Symbol and string annotations live in
//! [`Routine::bindings`], keyed by instruction address and operand position.

use crate::decompiler::binder::{Binding, SymbolTable};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// One typed instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Register name, lower-cased, without any `$`/`%` sigil.
    Register(String),
    /// Immediate value (`#`/`$` prefixes stripped).
    Immediate(i64),
    /// Memory reference: `[base + index*scale + disp]` or `disp(base)`.
    Memory {
        base: Option<String>,
        index: Option<String>,
        scale: u8,
        disp: i64,
        /// Access size in bytes when the operand spells it (`dword ptr`).
        size: Option<u8>,
        /// Pre-indexed with writeback (`[r1, #4]!`).
        writeback: bool,
    },
    /// Register list (`{r4, r5, lr}`).
    RegisterList(SmallVec<[String; 4]>),
    /// Shifted-register modifier (`lsl #2`).
    Shift { op: String, amount: i64 },
    /// Named symbol emitted by the analyzer (`sym.imp.puts`).
    Symbol(String),
}

impl Operand {
    /// Absolute address this operand refers to, if it is one.
    ///
    /// Immediates and memory references without base/index registers qualify.
    pub fn absolute_address(&self) -> Option<u64> {
        match self {
            Operand::Immediate(value) if *value >= 0 => Some(*value as u64),
            Operand::Memory {
                base: None,
                index: None,
                disp,
                ..
            } if *disp >= 0 => Some(*disp as u64),
            _ => None,
        }
    }

    pub fn register(&self) -> Option<&str> {
        match self {
            Operand::Register(name) => Some(name),
            _ => None,
        }
    }

    pub fn immediate(&self) -> Option<i64> {
        match self {
            Operand::Immediate(value) => Some(*value),
            _ => None,
        }
    }
}

/// One decoded raw instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    /// Lower-cased mnemonic.
    pub mnemonic: String,
    pub operands: SmallVec<[Operand; 4]>,
    /// Byte length (0 when the analyzer did not provide one).
    pub size: u32,
    /// Physical (file) address, when the analyzer reported one.
    pub paddr: Option<u64>,
    /// Original textual form, used for the assembly column and `__asm` placeholders.
    pub text: String,
}

impl Instruction {
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}

/// Kind of a control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Only successor (jump or fall-through).
    Unconditional,
    /// Taken when the branch condition holds.
    True,
    /// Taken when the branch condition fails.
    False,
    /// Switch case with its selector value.
    Case(i64),
    /// Switch default.
    Default,
}

impl EdgeKind {
    pub fn is_switch(self) -> bool {
        matches!(self, EdgeKind::Case(_) | EdgeKind::Default)
    }
}

/// Outgoing control-flow edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub target: u64,
    pub kind: EdgeKind,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub address: u64,
    pub instructions: Vec<Instruction>,
    pub edges: SmallVec<[Edge; 2]>,
    /// Addresses of the blocks with an edge into this one (not owning).
    pub predecessors: SmallVec<[u64; 2]>,
}

impl Block {
    /// Target of the edge with the given kind.
    pub fn edge(&self, kind: EdgeKind) -> Option<u64> {
        self.edges.iter().find(|e| e.kind == kind).map(|e| e.target)
    }

    pub fn is_switch(&self) -> bool {
        self.edges.iter().any(|e| e.kind.is_switch())
    }

    pub fn is_conditional(&self) -> bool {
        self.edge(EdgeKind::True).is_some() && self.edge(EdgeKind::False).is_some()
    }
}

/// Kind of a cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XrefKind {
    Call,
    Data,
    String,
}

impl XrefKind {
    pub fn as_str(self) -> &'static str {
        match self {
            XrefKind::Call => "call",
            XrefKind::Data => "data",
            XrefKind::String => "string",
        }
    }
}

/// Address pair plus kind, optionally named by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Xref {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
    pub name: Option<String>,
}

/// String literal found by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRef {
    pub address: u64,
    pub content: String,
    pub encoding: String,
}

/// One function under decompilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub name: Option<String>,
    /// Address of the first block record.
    pub entry: u64,
    /// Blocks in input order; the entry block is first.
    pub blocks: Vec<Block>,
    block_index: BTreeMap<u64, usize>,
    instruction_index: BTreeMap<u64, (usize, usize)>,
    /// Address-to-name table built by the binder.
    pub symbols: SymbolTable,
    /// Operand annotations, keyed by (instruction address, operand index).
    pub bindings: BTreeMap<(u64, usize), Binding>,
    /// Cross-references whose source is an instruction of this routine.
    pub outgoing_xrefs: BTreeMap<u64, Vec<Xref>>,
}

impl Routine {
    /// Build a routine from already validated blocks, computing predecessor sets
    /// and the address indexes.
    pub fn new(name: Option<String>, mut blocks: Vec<Block>) -> Self {
        let entry: u64 = blocks.first().map(|b| b.address).unwrap_or(0);

        let block_index: BTreeMap<u64, usize> = blocks
            .iter()
            .enumerate()
            .map(|(idx, block)| (block.address, idx))
            .collect();

        let mut predecessors: BTreeMap<u64, SmallVec<[u64; 2]>> = BTreeMap::new();
        for block in &blocks {
            for edge in &block.edges {
                let preds = predecessors.entry(edge.target).or_default();
                if !preds.contains(&block.address) {
                    preds.push(block.address);
                }
            }
        }

        let mut instruction_index: BTreeMap<u64, (usize, usize)> = BTreeMap::new();
        for (block_idx, block) in blocks.iter_mut().enumerate() {
            block.predecessors = predecessors.remove(&block.address).unwrap_or_default();
            for (inst_idx, inst) in block.instructions.iter().enumerate() {
                instruction_index.entry(inst.address).or_insert((block_idx, inst_idx));
            }
        }

        Self {
            name,
            entry,
            blocks,
            block_index,
            instruction_index,
            symbols: SymbolTable::default(),
            bindings: BTreeMap::new(),
            outgoing_xrefs: BTreeMap::new(),
        }
    }

    /// Name used in the rendered signature.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("fcn_{:08x}", self.entry),
        }
    }

    pub fn block(&self, address: u64) -> Option<&Block> {
        self.block_index.get(&address).map(|&idx| &self.blocks[idx])
    }

    /// Position of the block starting at `address`.
    pub fn block_index(&self, address: u64) -> Option<usize> {
        self.block_index.get(&address).copied()
    }

    pub fn instruction(&self, address: u64) -> Option<&Instruction> {
        self.instruction_index
            .get(&address)
            .map(|&(b, i)| &self.blocks[b].instructions[i])
    }

    /// Index of the block that contains the instruction at `address`.
    pub fn block_of(&self, address: u64) -> Option<usize> {
        if let Some(&(block, _)) = self.instruction_index.get(&address) {
            return Some(block);
        }
        self.block_index(address)
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_index.len()
    }

    /// Binding attached to an operand by the binder.
    pub fn binding(&self, address: u64, operand: usize) -> Option<&Binding> {
        self.bindings.get(&(address, operand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn inst(address: u64, mnemonic: &str) -> Instruction {
        Instruction {
            address,
            mnemonic: mnemonic.to_string(),
            operands: SmallVec::new(),
            size: 1,
            paddr: None,
            text: mnemonic.to_string(),
        }
    }

    fn block(address: u64, edges: SmallVec<[Edge; 2]>) -> Block {
        Block {
            address,
            instructions: vec![inst(address, "nop")],
            edges,
            predecessors: SmallVec::new(),
        }
    }

    #[test]
    fn predecessors_are_computed_once_per_source() {
        let routine = Routine::new(
            None,
            vec![
                block(
                    0x10,
                    smallvec![
                        Edge { target: 0x20, kind: EdgeKind::True },
                        Edge { target: 0x20, kind: EdgeKind::False },
                    ],
                ),
                block(0x20, SmallVec::new()),
            ],
        );
        assert_eq!(routine.entry, 0x10);
        assert_eq!(routine.block(0x20).unwrap().predecessors.as_slice(), &[0x10]);
        assert!(routine.block(0x10).unwrap().predecessors.is_empty());
    }

    #[test]
    fn display_name_falls_back_to_entry() {
        let routine = Routine::new(None, vec![block(0x401000, SmallVec::new())]);
        assert_eq!(routine.display_name(), "fcn_00401000");
        let named = Routine::new(Some("main".into()), vec![block(0x401000, SmallVec::new())]);
        assert_eq!(named.display_name(), "main");
    }

    #[test]
    fn instruction_lookup_by_address() {
        let routine = Routine::new(None, vec![block(0x10, SmallVec::new())]);
        assert_eq!(routine.instruction(0x10).unwrap().mnemonic, "nop");
        assert_eq!(routine.block_of(0x10), Some(0));
        assert!(routine.instruction(0x11).is_none());
    }

    #[test]
    fn absolute_addresses() {
        assert_eq!(Operand::Immediate(0x4000).absolute_address(), Some(0x4000));
        assert_eq!(Operand::Immediate(-1).absolute_address(), None);
        let mem = Operand::Memory {
            base: Some("rbp".into()),
            index: None,
            scale: 1,
            disp: 8,
            size: None,
            writeback: false,
        };
        assert_eq!(mem.absolute_address(), None);
    }
}
