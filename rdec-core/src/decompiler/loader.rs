//! Graph Loader
//!
//! This module parses the analyzer's JSON documents (graph, cross-references,
//! strings) into the typed [`Routine`] model, rejecting malformed input at the
//! boundary so nothing deeper in the pipeline ever sees loosely shaped data.
//!
//! # Accepted Shapes
//! - Graph: a bare list of block records, or `{ "name": ..., "blocks": [...] }`
//! - Block: `{ address, instructions: [{ address, mnemonic, operands, size, paddr? }], edges: [{ target, kind, value? }] }`
//! - Xref: `{ from, to, kind, name? }`
//! - String: `{ address, content, encoding? }`
//!
//! Addresses may be JSON numbers or strings (`"0x401000"`, `"4198400"`).
//! Missing or `null` xref/string tables are treated as empty.
//!
//! # Validation
//! 1. Every block and instruction address is well-formed
//! 2. Every mnemonic is non-empty
//! 3. Block addresses are unique
//! 4. Every edge target is a block of the routine
//! 5. Edge sets are one of: none, one unconditional edge, one true + one false edge,
//!    or only switch edges (`case` / `default`)

use crate::decompiler::error::DecompilerError;
use crate::decompiler::routine::{
    Block, Edge, EdgeKind, Instruction, Operand, Routine, StringRef, Xref, XrefKind,
};
use serde::Deserialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::BTreeSet;

/// Address as written by the analyzer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAddress {
    Number(u64),
    Text(String),
}

impl RawAddress {
    fn resolve(&self) -> Option<u64> {
        match self {
            RawAddress::Number(value) => Some(*value),
            RawAddress::Text(text) => parse_address(text),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GraphDocument {
    Blocks(Vec<RawBlock>),
    Named {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        blocks: Vec<RawBlock>,
    },
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    address: RawAddress,
    #[serde(default)]
    instructions: Vec<RawInstruction>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

#[derive(Debug, Deserialize)]
struct RawInstruction {
    address: RawAddress,
    #[serde(default)]
    mnemonic: String,
    #[serde(default)]
    operands: Vec<String>,
    #[serde(default)]
    size: u32,
    #[serde(default)]
    paddr: Option<RawAddress>,
}

#[derive(Debug, Deserialize)]
struct RawEdge {
    target: RawAddress,
    #[serde(default = "default_edge_kind")]
    kind: String,
    #[serde(default)]
    value: Option<i64>,
}

fn default_edge_kind() -> String {
    "unconditional".to_string()
}

#[derive(Debug, Deserialize)]
struct RawXref {
    from: RawAddress,
    to: RawAddress,
    #[serde(deserialize_with = "deserialize_xref_kind")]
    kind: XrefKind,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawString {
    #[serde(alias = "vaddr")]
    address: RawAddress,
    #[serde(alias = "string")]
    content: String,
    #[serde(default = "default_encoding", alias = "type")]
    encoding: String,
}

fn default_encoding() -> String {
    "ascii".to_string()
}

/// Xref kinds are matched case-insensitively; the analyzer's `code` kind counts
/// as a call reference.
fn deserialize_xref_kind<'de, D>(deserializer: D) -> Result<XrefKind, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text: String = String::deserialize(deserializer)?;
    match text.to_ascii_lowercase().as_str() {
        "call" | "code" => Ok(XrefKind::Call),
        "data" => Ok(XrefKind::Data),
        "string" | "str" => Ok(XrefKind::String),
        other => Err(serde::de::Error::custom(format!("unknown xref kind `{other}`"))),
    }
}

/// Intermediate edge kind before pairing rules are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Unconditional,
    Jump,
    True,
    False,
    Case(i64),
    Default,
}

/// Graph loader for building routines from analyzer output.
pub struct GraphLoader;

impl GraphLoader {
    /// Build a [`Routine`] from the graph document.
    ///
    /// # Arguments
    /// * `graph` - Graph document (list of blocks or named object)
    ///
    /// # Returns
    /// `Result<Routine, DecompilerError>` - Validated routine; the first block record is the entry
    ///
    /// # Errors
    /// - `EmptyGraph` when the document is `null` or has no blocks
    /// - `MalformedGraph` when any validation rule fails
    pub fn load(graph: &Value) -> Result<Routine, DecompilerError> {
        if graph.is_null() {
            return Err(DecompilerError::EmptyGraph);
        }
        let document: GraphDocument = serde_json::from_value(graph.clone())?;
        let (name, raw_blocks) = match document {
            GraphDocument::Blocks(blocks) => (None, blocks),
            GraphDocument::Named { name, blocks } => (name, blocks),
        };
        if raw_blocks.is_empty() {
            return Err(DecompilerError::EmptyGraph);
        }

        let mut addresses: BTreeSet<u64> = BTreeSet::new();
        let mut blocks: Vec<Block> = Vec::with_capacity(raw_blocks.len());
        let mut pending: Vec<Vec<(u64, PendingKind)>> = Vec::with_capacity(raw_blocks.len());

        for raw in &raw_blocks {
            let address: u64 = raw
                .address
                .resolve()
                .ok_or_else(|| DecompilerError::malformed("invalid block address"))?;
            if !addresses.insert(address) {
                return Err(DecompilerError::malformed_at("duplicate block address", address));
            }

            let mut instructions: Vec<Instruction> = Vec::with_capacity(raw.instructions.len());
            for raw_inst in &raw.instructions {
                instructions.push(Self::load_instruction(raw_inst, address)?);
            }

            let mut edges: Vec<(u64, PendingKind)> = Vec::with_capacity(raw.edges.len());
            for raw_edge in &raw.edges {
                let target: u64 = raw_edge.target.resolve().ok_or_else(|| {
                    DecompilerError::malformed_at("invalid edge target address", address)
                })?;
                edges.push((target, Self::edge_kind(raw_edge, address)?));
            }

            blocks.push(Block {
                address,
                instructions,
                edges: SmallVec::new(),
                predecessors: SmallVec::new(),
            });
            pending.push(edges);
        }

        for (block, edges) in blocks.iter_mut().zip(pending) {
            for (target, _) in &edges {
                if !addresses.contains(target) {
                    return Err(DecompilerError::malformed_at(
                        format!("edge target 0x{target:x} is not a block of this routine"),
                        block.address,
                    ));
                }
            }
            block.edges = Self::pair_edges(&edges, block.address)?;
        }

        let routine = Routine::new(name, blocks);
        log::debug!(
            "loaded routine {} with {} blocks and {} instructions",
            routine.display_name(),
            routine.blocks.len(),
            routine.instruction_count()
        );
        Ok(routine)
    }

    /// Parse the cross-reference table. `null` is an empty table.
    pub fn load_xrefs(value: &Value) -> Result<Vec<Xref>, DecompilerError> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawXref> = serde_json::from_value(value.clone())
            .map_err(|e| DecompilerError::malformed(format!("invalid xref table ({e})")))?;
        raw.into_iter()
            .map(|x| {
                let from = x.from.resolve();
                let to = x.to.resolve();
                match (from, to) {
                    (Some(from), Some(to)) => Ok(Xref {
                        from,
                        to,
                        kind: x.kind,
                        name: x.name.filter(|n| !n.is_empty()),
                    }),
                    _ => Err(DecompilerError::malformed("invalid xref address")),
                }
            })
            .collect()
    }

    /// Parse the string table. `null` is an empty table.
    pub fn load_strings(value: &Value) -> Result<Vec<StringRef>, DecompilerError> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        let raw: Vec<RawString> = serde_json::from_value(value.clone())
            .map_err(|e| DecompilerError::malformed(format!("invalid string table ({e})")))?;
        raw.into_iter()
            .map(|s| {
                let address = s
                    .address
                    .resolve()
                    .ok_or_else(|| DecompilerError::malformed("invalid string address"))?;
                Ok(StringRef {
                    address,
                    content: s.content,
                    encoding: s.encoding,
                })
            })
            .collect()
    }

    fn load_instruction(raw: &RawInstruction, block: u64) -> Result<Instruction, DecompilerError> {
        let address: u64 = raw
            .address
            .resolve()
            .ok_or_else(|| DecompilerError::malformed_at("invalid instruction address", block))?;
        let mnemonic: String = raw.mnemonic.trim().to_ascii_lowercase();
        if mnemonic.is_empty() {
            return Err(DecompilerError::malformed_at("empty mnemonic", address));
        }

        let operands: SmallVec<[Operand; 4]> =
            raw.operands.iter().map(|op| parse_operand(op)).collect();
        let mut text: String = mnemonic.clone();
        if !raw.operands.is_empty() {
            text.push(' ');
            let parts: Vec<&str> = raw.operands.iter().map(|op| op.trim()).collect();
            text.push_str(&parts.join(", "));
        }

        let paddr: Option<u64> = match &raw.paddr {
            Some(paddr) => Some(
                paddr
                    .resolve()
                    .ok_or_else(|| DecompilerError::malformed_at("invalid physical address", address))?,
            ),
            None => None,
        };

        Ok(Instruction {
            address,
            mnemonic,
            operands,
            size: raw.size,
            paddr,
            text,
        })
    }

    fn edge_kind(raw: &RawEdge, block: u64) -> Result<PendingKind, DecompilerError> {
        match raw.kind.trim().to_ascii_lowercase().as_str() {
            "unconditional" | "" => Ok(PendingKind::Unconditional),
            "jump" => Ok(PendingKind::Jump),
            "true" => Ok(PendingKind::True),
            "false" | "fail" => Ok(PendingKind::False),
            "case" => raw
                .value
                .map(PendingKind::Case)
                .ok_or_else(|| DecompilerError::malformed_at("case edge without value", block)),
            "default" => Ok(PendingKind::Default),
            other => Err(DecompilerError::malformed_at(
                format!("unknown edge kind `{other}`"),
                block,
            )),
        }
    }

    /// Apply the edge pairing rules.
    fn pair_edges(
        edges: &[(u64, PendingKind)],
        block: u64,
    ) -> Result<SmallVec<[Edge; 2]>, DecompilerError> {
        let switch_edges: usize = edges
            .iter()
            .filter(|(_, k)| matches!(k, PendingKind::Case(_) | PendingKind::Default))
            .count();
        if switch_edges > 0 {
            if switch_edges != edges.len() {
                return Err(DecompilerError::malformed_at(
                    "switch edges mixed with branch edges",
                    block,
                ));
            }
            return Ok(edges
                .iter()
                .map(|&(target, kind)| Edge {
                    target,
                    kind: match kind {
                        PendingKind::Case(value) => EdgeKind::Case(value),
                        _ => EdgeKind::Default,
                    },
                })
                .collect());
        }

        match edges {
            [] => Ok(SmallVec::new()),
            [(target, kind)] => {
                if matches!(kind, PendingKind::True | PendingKind::False) {
                    log::warn!("block 0x{block:x} has a lone conditional edge, treating it as unconditional");
                }
                let mut out = SmallVec::new();
                out.push(Edge {
                    target: *target,
                    kind: EdgeKind::Unconditional,
                });
                Ok(out)
            }
            [(first, first_kind), (second, second_kind)] => {
                let first_true = matches!(first_kind, PendingKind::True | PendingKind::Jump);
                let second_true = matches!(second_kind, PendingKind::True | PendingKind::Jump);
                let first_false = *first_kind == PendingKind::False;
                let second_false = *second_kind == PendingKind::False;
                let (taken, fail) = if first_true && second_false {
                    (*first, *second)
                } else if first_false && second_true {
                    (*second, *first)
                } else {
                    return Err(DecompilerError::malformed_at(
                        "a two-way branch needs one true and one false edge",
                        block,
                    ));
                };
                let mut out = SmallVec::new();
                out.push(Edge {
                    target: taken,
                    kind: EdgeKind::True,
                });
                out.push(Edge {
                    target: fail,
                    kind: EdgeKind::False,
                });
                Ok(out)
            }
            _ => Err(DecompilerError::malformed_at(
                "more than two branch edges",
                block,
            )),
        }
    }
}

/// Parse an address string: `0x`-prefixed hex or decimal.
pub fn parse_address(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<u64>().ok()
    }
}

/// Parse an integer literal: optional sign, `0x` hex, `h`-suffixed hex or decimal.
/// `#` and numeric `$` prefixes are accepted.
pub fn parse_integer(text: &str) -> Option<i64> {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix('#') {
        text = rest.trim();
    } else if let Some(rest) = text.strip_prefix('$') {
        if !rest.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
            return None;
        }
        text = rest;
    }
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim()),
        None => (false, text.strip_prefix('+').unwrap_or(text).trim()),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude: u64 = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1
        && digits.ends_with(['h', 'H'])
        && digits.starts_with(|c: char| c.is_ascii_digit())
    {
        u64::from_str_radix(&digits[..digits.len() - 1], 16).ok()?
    } else if digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse::<u64>().ok()?
    } else {
        return None;
    };
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

/// Parse one operand string into a typed [`Operand`].
///
/// Parsing never fails: anything that is not recognisably a register, immediate,
/// memory reference, register list or shift is kept as a [`Operand::Symbol`].
pub fn parse_operand(text: &str) -> Operand {
    let trimmed: &str = text.trim();
    let lower: String = trimmed.to_ascii_lowercase();

    if lower.starts_with('{') && lower.ends_with('}') {
        let regs = lower[1..lower.len() - 1]
            .split(',')
            .map(|r| register_name(r.trim()))
            .filter(|r| !r.is_empty())
            .collect();
        return Operand::RegisterList(regs);
    }

    let (size, rest) = strip_size_prefix(&lower);
    if let Some(mem) = parse_bracket_memory(rest, size) {
        return mem;
    }
    if let Some(mem) = parse_displacement_memory(rest, size) {
        return mem;
    }
    if let Some((op, amount)) = parse_shift(&lower) {
        return Operand::Shift { op, amount };
    }
    if let Some(value) = parse_integer(&lower) {
        return Operand::Immediate(value);
    }
    if is_register_like(&lower) {
        return Operand::Register(register_name(&lower));
    }
    Operand::Symbol(trimmed.to_string())
}

fn register_name(text: &str) -> String {
    text.trim_start_matches(['$', '%']).to_string()
}

fn is_register_like(text: &str) -> bool {
    let name = text.trim_start_matches(['$', '%']);
    !name.is_empty()
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn strip_size_prefix(text: &str) -> (Option<u8>, &str) {
    const SIZES: [(&str, u8); 5] = [
        ("byte", 1),
        ("word", 2),
        ("dword", 4),
        ("qword", 8),
        ("xmmword", 16),
    ];
    for (keyword, size) in SIZES {
        if let Some(rest) = text.strip_prefix(keyword) {
            let rest = rest.trim_start();
            let rest = rest.strip_prefix("ptr").unwrap_or(rest).trim_start();
            if rest.starts_with('[') || rest.contains(':') {
                return (Some(size), strip_segment(rest));
            }
        }
    }
    (None, strip_segment(text))
}

/// Drop an x86 segment override (`fs:[0x28]`).
fn strip_segment(text: &str) -> &str {
    match text.split_once(':') {
        Some((segment, rest))
            if segment.len() == 2 && segment.ends_with('s') && rest.trim_start().starts_with('[') =>
        {
            rest.trim_start()
        }
        _ => text,
    }
}

fn parse_bracket_memory(text: &str, size: Option<u8>) -> Option<Operand> {
    let text = text.trim();
    let inner_start = text.strip_prefix('[')?;
    let close = inner_start.find(']')?;
    let inner = inner_start[..close].trim();
    let tail = inner_start[close + 1..].trim();
    let writeback = tail == "!";
    if !tail.is_empty() && !writeback {
        return None;
    }

    let mut base: Option<String> = None;
    let mut index: Option<String> = None;
    let mut scale: u8 = 1;
    let mut disp: i64 = 0;

    if inner.contains(',') {
        // ARM: [rn, #imm] / [rn, rm, lsl #2]
        let mut parts = inner.split(',').map(str::trim);
        let first = parts.next()?;
        if !is_register_like(first) {
            return None;
        }
        base = Some(register_name(first));
        for part in parts {
            if let Some((op, amount)) = parse_shift(part) {
                if op == "lsl" && (0..8).contains(&amount) {
                    scale = 1u8 << amount;
                }
            } else if let Some(value) = parse_integer(part) {
                disp = disp.wrapping_add(value);
            } else if is_register_like(part) {
                index = Some(register_name(part));
            } else {
                return None;
            }
        }
    } else {
        for (negative, term) in split_terms(inner) {
            if let Some((left, right)) = term.split_once('*') {
                let (reg, factor) = match (parse_integer(left), parse_integer(right)) {
                    (None, Some(factor)) => (left.trim(), factor),
                    (Some(factor), None) => (right.trim(), factor),
                    _ => return None,
                };
                if !is_register_like(reg) {
                    return None;
                }
                index = Some(register_name(reg));
                scale = u8::try_from(factor).ok()?;
            } else if let Some(value) = parse_integer(term) {
                disp = if negative {
                    disp.wrapping_sub(value)
                } else {
                    disp.wrapping_add(value)
                };
            } else if is_register_like(term) {
                if base.is_none() {
                    base = Some(register_name(term));
                } else if index.is_none() {
                    index = Some(register_name(term));
                } else {
                    return None;
                }
            } else {
                return None;
            }
        }
    }

    Some(Operand::Memory {
        base,
        index,
        scale,
        disp,
        size,
        writeback,
    })
}

/// Split `rax + rcx*4 - 0x10` into signed terms.
fn split_terms(text: &str) -> Vec<(bool, &str)> {
    let mut terms: Vec<(bool, &str)> = Vec::new();
    let mut negative = false;
    let mut start = 0usize;
    for (idx, c) in text.char_indices() {
        if c == '+' || c == '-' {
            let term = text[start..idx].trim();
            if !term.is_empty() {
                terms.push((negative, term));
            }
            negative = c == '-';
            start = idx + 1;
        }
    }
    let term = text[start..].trim();
    if !term.is_empty() {
        terms.push((negative, term));
    }
    terms
}

/// MIPS/PPC `disp(reg)`.
fn parse_displacement_memory(text: &str, size: Option<u8>) -> Option<Operand> {
    let text = text.trim();
    let body = text.strip_suffix(')')?;
    let (disp_text, reg) = body.split_once('(')?;
    let reg = reg.trim();
    if !is_register_like(reg) {
        return None;
    }
    let disp = if disp_text.trim().is_empty() {
        0
    } else {
        parse_integer(disp_text)?
    };
    Some(Operand::Memory {
        base: Some(register_name(reg)),
        index: None,
        scale: 1,
        disp,
        size,
        writeback: false,
    })
}

fn parse_shift(text: &str) -> Option<(String, i64)> {
    let (op, amount) = text.trim().split_once(' ')?;
    if !matches!(op, "lsl" | "lsr" | "asr" | "ror") {
        return None;
    }
    Some((op.to_string(), parse_integer(amount)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loads_bare_block_list() {
        let graph = json!([
            {
                "address": "0x1000",
                "instructions": [
                    { "address": 4096, "mnemonic": "MOV", "operands": ["eax", "1"], "size": 5 },
                    { "address": "0x1005", "mnemonic": "ret", "size": 1 }
                ],
                "edges": []
            }
        ]);
        let routine = GraphLoader::load(&graph).unwrap();
        assert_eq!(routine.entry, 0x1000);
        let inst = routine.instruction(0x1000).unwrap();
        assert_eq!(inst.mnemonic, "mov");
        assert_eq!(inst.text, "mov eax, 1");
        assert_eq!(inst.operands[0], Operand::Register("eax".into()));
        assert_eq!(inst.operands[1], Operand::Immediate(1));
    }

    #[test]
    fn loads_named_document() {
        let graph = json!({ "name": "main", "blocks": [ { "address": 16, "instructions": [] } ] });
        let routine = GraphLoader::load(&graph).unwrap();
        assert_eq!(routine.display_name(), "main");
    }

    #[test]
    fn empty_inputs_are_empty_graph() {
        assert!(matches!(GraphLoader::load(&json!([])), Err(DecompilerError::EmptyGraph)));
        assert!(matches!(GraphLoader::load(&Value::Null), Err(DecompilerError::EmptyGraph)));
        assert!(matches!(
            GraphLoader::load(&json!({ "name": "f", "blocks": [] })),
            Err(DecompilerError::EmptyGraph)
        ));
    }

    #[test]
    fn physical_address_is_optional() {
        let graph = json!([{ "address": "0x1000", "instructions": [
            { "address": "0x1000", "paddr": "0x400", "mnemonic": "nop" },
            { "address": "0x1001", "mnemonic": "ret" } ] }]);
        let routine = GraphLoader::load(&graph).unwrap();
        assert_eq!(routine.instruction(0x1000).unwrap().paddr, Some(0x400));
        assert_eq!(routine.instruction(0x1001).unwrap().paddr, None);

        let bad = json!([{ "address": 1, "instructions": [ { "address": 1, "paddr": "zz", "mnemonic": "nop" } ] }]);
        assert!(matches!(
            GraphLoader::load(&bad),
            Err(DecompilerError::MalformedGraph { address: Some(1), .. })
        ));
    }

    #[test]
    fn rejects_dangling_edge() {
        let graph = json!([{ "address": 1, "edges": [ { "target": 2, "kind": "unconditional" } ] }]);
        let err = GraphLoader::load(&graph).unwrap_err();
        assert!(matches!(err, DecompilerError::MalformedGraph { address: Some(1), .. }));
    }

    #[test]
    fn rejects_empty_mnemonic_and_duplicates() {
        let graph = json!([{ "address": 1, "instructions": [ { "address": 1, "mnemonic": " " } ] }]);
        assert!(matches!(
            GraphLoader::load(&graph),
            Err(DecompilerError::MalformedGraph { .. })
        ));
        let graph = json!([{ "address": 1 }, { "address": "0x1" }]);
        assert!(matches!(
            GraphLoader::load(&graph),
            Err(DecompilerError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn rejects_bad_addresses() {
        let graph = json!([{ "address": "somewhere" }]);
        assert!(matches!(
            GraphLoader::load(&graph),
            Err(DecompilerError::MalformedGraph { .. })
        ));
        let graph = json!([{ "address": -4 }]);
        assert!(matches!(
            GraphLoader::load(&graph),
            Err(DecompilerError::MalformedGraph { .. })
        ));
    }

    #[test]
    fn pairs_jump_and_fail_edges() {
        let graph = json!([
            { "address": 1, "edges": [ { "target": 3, "kind": "fail" }, { "target": 2, "kind": "jump" } ] },
            { "address": 2 },
            { "address": 3 }
        ]);
        let routine = GraphLoader::load(&graph).unwrap();
        let entry = routine.block(1).unwrap();
        assert_eq!(entry.edge(EdgeKind::True), Some(2));
        assert_eq!(entry.edge(EdgeKind::False), Some(3));
    }

    #[test]
    fn rejects_inconsistent_edge_sets() {
        let two_true = json!([
            { "address": 1, "edges": [ { "target": 2, "kind": "true" }, { "target": 2, "kind": "true" } ] },
            { "address": 2 }
        ]);
        assert!(GraphLoader::load(&two_true).is_err());

        let mixed = json!([
            { "address": 1, "edges": [ { "target": 2, "kind": "case", "value": 1 }, { "target": 2, "kind": "false" } ] },
            { "address": 2 }
        ]);
        assert!(GraphLoader::load(&mixed).is_err());

        let missing_value = json!([
            { "address": 1, "edges": [ { "target": 2, "kind": "case" } ] },
            { "address": 2 }
        ]);
        assert!(GraphLoader::load(&missing_value).is_err());
    }

    #[test]
    fn parses_tables() {
        let xrefs = GraphLoader::load_xrefs(&json!([
            { "from": "0x10", "to": "0x2000", "kind": "CALL", "name": "sym.foo" },
            { "from": 17, "to": 8192, "kind": "data" }
        ]))
        .unwrap();
        assert_eq!(xrefs[0].kind, XrefKind::Call);
        assert_eq!(xrefs[1].name, None);

        let strings = GraphLoader::load_strings(&json!([
            { "address": "0x3000", "content": "hello" }
        ]))
        .unwrap();
        assert_eq!(strings[0].encoding, "ascii");

        assert!(GraphLoader::load_xrefs(&Value::Null).unwrap().is_empty());
        assert!(GraphLoader::load_strings(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn parses_immediates() {
        assert_eq!(parse_integer("#-4"), Some(-4));
        assert_eq!(parse_integer("0x10"), Some(16));
        assert_eq!(parse_integer("$0x10"), Some(16));
        assert_eq!(parse_integer("10h"), Some(16));
        assert_eq!(parse_integer("$sp"), None);
        assert_eq!(parse_integer("eax"), None);
    }

    #[test]
    fn parses_x86_memory() {
        assert_eq!(
            parse_operand("dword ptr [rbp - 0x8]"),
            Operand::Memory {
                base: Some("rbp".into()),
                index: None,
                scale: 1,
                disp: -8,
                size: Some(4),
                writeback: false,
            }
        );
        assert_eq!(
            parse_operand("[rax + rcx*4 + 0x10]"),
            Operand::Memory {
                base: Some("rax".into()),
                index: Some("rcx".into()),
                scale: 4,
                disp: 0x10,
                size: None,
                writeback: false,
            }
        );
        assert_eq!(parse_operand("qword [0x404000]").absolute_address(), Some(0x404000));
    }

    #[test]
    fn parses_risc_memory_and_lists() {
        assert_eq!(
            parse_operand("[r1, #4]!"),
            Operand::Memory {
                base: Some("r1".into()),
                index: None,
                scale: 1,
                disp: 4,
                size: None,
                writeback: true,
            }
        );
        assert_eq!(
            parse_operand("-8($sp)"),
            Operand::Memory {
                base: Some("sp".into()),
                index: None,
                scale: 1,
                disp: -8,
                size: None,
                writeback: false,
            }
        );
        assert_eq!(
            parse_operand("{r4, lr}"),
            Operand::RegisterList(SmallVec::from_vec(vec!["r4".to_string(), "lr".to_string()]))
        );
        assert_eq!(
            parse_operand("lsl #2"),
            Operand::Shift { op: "lsl".into(), amount: 2 }
        );
        assert_eq!(parse_operand("$a0"), Operand::Register("a0".into()));
        assert_eq!(parse_operand("sym.imp.puts"), Operand::Symbol("sym.imp.puts".into()));
    }
}
