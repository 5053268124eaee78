// Structural properties of recovered control flow
use rdec_core::decompiler::arch::resolve;
use rdec_core::decompiler::config::StructuringOptions;
use rdec_core::decompiler::ir::builder::IrBuilder;
use rdec_core::decompiler::loader::GraphLoader;
use rdec_core::decompiler::optimizer::post::insert_casts;
use rdec_core::decompiler::structurer::{StructuredNode, StructuredRoutine, Structurer};
use serde_json::{json, Value};

fn structure(graph: Value) -> StructuredRoutine {
    let routine = GraphLoader::load(&graph).unwrap();
    let arch = resolve("x86").unwrap();
    let (ir, _) = IrBuilder::build(&routine, arch.as_ref());
    Structurer::structure(&routine, &ir, &StructuringOptions::default()).unwrap()
}

fn loops(node: &StructuredNode) -> usize {
    let mut n = 0;
    node.visit(&mut |x| {
        if x.is_loop() {
            n += 1;
        }
    });
    n
}

fn chain() -> Value {
    json!([
        { "address": 0x10, "instructions": [ { "address": 0x10, "mnemonic": "inc", "operands": ["eax"] } ],
          "edges": [ { "target": 0x20 } ] },
        { "address": 0x20, "instructions": [
            { "address": 0x20, "mnemonic": "dec", "operands": ["ebx"] },
            { "address": 0x21, "mnemonic": "jmp", "operands": ["0x30"] } ],
          "edges": [ { "target": 0x30 } ] },
        { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
    ])
}

#[test]
fn linear_chain_is_one_sequence_in_block_order() {
    let result = structure(chain());
    let StructuredNode::Sequence(nodes) = &result.root else {
        panic!("root must be a sequence");
    };
    assert!(nodes
        .iter()
        .all(|n| !matches!(n, StructuredNode::If { .. } | StructuredNode::Switch { .. }) && !n.is_loop()));
    let origins: Vec<u64> = result.root.statements().iter().map(|s| s.origin).collect();
    assert_eq!(origins, vec![0x10, 0x20, 0x30]);
    assert_eq!(result.approximate_regions, 0);
}

#[test]
fn acyclic_graphs_have_no_loops() {
    let diamond = json!([
        { "address": 0x10, "instructions": [
            { "address": 0x10, "mnemonic": "test", "operands": ["eax", "eax"] },
            { "address": 0x12, "mnemonic": "jne", "operands": ["0x20"] } ],
          "edges": [ { "target": 0x20, "kind": "true" }, { "target": 0x30, "kind": "false" } ] },
        { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "inc", "operands": ["ecx"] } ],
          "edges": [ { "target": 0x30 } ] },
        { "address": 0x30, "instructions": [ { "address": 0x30, "mnemonic": "ret" } ] }
    ]);
    assert_eq!(loops(&structure(diamond).root), 0);
    assert_eq!(loops(&structure(chain()).root), 0);
}

#[test]
fn back_edge_produces_a_loop() {
    let graph = json!([
        { "address": 0x08, "instructions": [ { "address": 0x08, "mnemonic": "mov", "operands": ["eax", "0"] } ],
          "edges": [ { "target": 0x10 } ] },
        { "address": 0x10, "instructions": [
            { "address": 0x10, "mnemonic": "inc", "operands": ["eax"] },
            { "address": 0x11, "mnemonic": "cmp", "operands": ["eax", "10"] },
            { "address": 0x14, "mnemonic": "jl", "operands": ["0x10"] } ],
          "edges": [ { "target": 0x10, "kind": "true" }, { "target": 0x20, "kind": "false" } ] },
        { "address": 0x20, "instructions": [ { "address": 0x20, "mnemonic": "ret" } ] }
    ]);
    let result = structure(graph);
    assert_eq!(loops(&result.root), 1);
    assert_eq!(result.approximate_regions, 0);
}

#[test]
fn cast_insertion_is_idempotent() {
    let graph = json!([{ "address": 0x10, "instructions": [
        { "address": 0x10, "mnemonic": "movsx", "operands": ["eax", "byte [rbx]"] },
        { "address": 0x13, "mnemonic": "ret" } ] }]);
    let mut result = structure(graph);
    assert_eq!(insert_casts(&mut result.root), 1);
    let once = result.root.clone();
    assert_eq!(insert_casts(&mut result.root), 0);
    assert_eq!(result.root, once);
}
