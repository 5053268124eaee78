//! Cross-Reference/String Binder
//!
//! Attaches display names to operands that hold an absolute address: a quoted
//! string literal when the string table has an entry at that address, otherwise
//! the symbol name of a cross-reference targeting it.
//!
//! Lookups are exact-match only. An operand without a match stays a plain
//! immediate; that is never an error.

use crate::decompiler::routine::{Routine, StringRef, Xref, XrefKind};
use std::collections::BTreeMap;

/// Display annotation for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Symbol name (`sym.imp.puts`, `fcn_00401020`).
    Symbol(String),
    /// String literal content (rendered quoted).
    Str(String),
}

/// Address-to-binding table for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: BTreeMap<u64, Binding>,
}

impl SymbolTable {
    /// Build the table. Strings take priority over symbol names; among several
    /// xrefs to the same address the first named one wins.
    pub fn build(xrefs: &[Xref], strings: &[StringRef]) -> Self {
        let mut entries: BTreeMap<u64, Binding> = BTreeMap::new();
        for string in strings {
            entries
                .entry(string.address)
                .or_insert_with(|| Binding::Str(string.content.clone()));
        }
        for xref in xrefs.iter().filter(|x| x.name.is_some()) {
            if let Some(name) = &xref.name {
                entries
                    .entry(xref.to)
                    .or_insert_with(|| Binding::Symbol(name.clone()));
            }
        }
        for xref in xrefs.iter().filter(|x| x.name.is_none()) {
            entries
                .entry(xref.to)
                .or_insert_with(|| Binding::Symbol(synthesized_name(xref.kind, xref.to)));
        }
        Self { entries }
    }

    /// Exact-match lookup.
    pub fn lookup(&self, address: u64) -> Option<&Binding> {
        self.entries.get(&address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn synthesized_name(kind: XrefKind, address: u64) -> String {
    match kind {
        XrefKind::Call => format!("fcn_{address:08x}"),
        XrefKind::Data => format!("data_{address:08x}"),
        XrefKind::String => format!("str_{address:08x}"),
    }
}

/// Cross-reference/string binder.
pub struct Binder;

impl Binder {
    /// Bind xref and string names onto the routine's operands.
    ///
    /// # Arguments
    /// * `routine` - Routine to annotate (instructions are left untouched)
    /// * `xrefs` - Cross-reference table
    /// * `strings` - String table
    ///
    /// # Returns
    /// `usize` - Number of operands that received a binding
    pub fn bind(routine: &mut Routine, xrefs: &[Xref], strings: &[StringRef]) -> usize {
        let table = SymbolTable::build(xrefs, strings);
        let mut bindings = BTreeMap::new();

        for block in &routine.blocks {
            for inst in &block.instructions {
                for (idx, operand) in inst.operands.iter().enumerate() {
                    let Some(address) = operand.absolute_address() else {
                        continue;
                    };
                    if let Some(binding) = table.lookup(address) {
                        bindings.insert((inst.address, idx), binding.clone());
                    }
                }
            }
        }

        let mut outgoing: BTreeMap<u64, Vec<Xref>> = BTreeMap::new();
        for xref in xrefs {
            if routine.instruction(xref.from).is_some() {
                outgoing.entry(xref.from).or_default().push(xref.clone());
            }
        }

        let bound = bindings.len();
        log::debug!(
            "bound {bound} operands ({} symbols, {} xref sources)",
            table.len(),
            outgoing.len()
        );
        routine.symbols = table;
        routine.bindings = bindings;
        routine.outgoing_xrefs = outgoing;
        bound
    }
}
