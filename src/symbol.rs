//! Symbol tables for enumerated and bitfield points
//!
//! A symbol maps a numeric wire value to an identifier from the model
//! definition. Enumerated points use the table to resolve their active
//! state, bitfields to name the set bit positions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::Meta;

/// Definition of a single symbol element inside a point definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub value: u32,
    #[serde(flatten)]
    pub meta: Meta,
}

impl SymbolDef {
    /// Strip documentation-only meta fields.
    pub fn simplify(&mut self) {
        self.meta = Meta::default();
    }
}

/// A resolved symbol of a live point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    name: String,
    value: u32,
}

impl Symbol {
    pub fn new<S: Into<String>>(name: S, value: u32) -> Self {
        Self { name: name.into(), value }
    }

    /// The symbol's identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The symbol's numeric wire value
    pub fn value(&self) -> u32 {
        self.value
    }
}

/// Symbol table of a point, keyed by wire value.
///
/// Names need not be unique; lookup by name returns the first match in
/// value order.
#[derive(Debug, Clone, Default)]
pub struct Symbols {
    by_value: BTreeMap<u32, Symbol>,
}

impl Symbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the table from the definition's symbol list.
    pub fn from_defs(defs: &[SymbolDef]) -> Self {
        let mut symbols = Self::new();
        for def in defs {
            symbols.insert(Symbol::new(def.name.clone(), def.value));
        }
        symbols
    }

    pub fn insert(&mut self, symbol: Symbol) {
        self.by_value.insert(symbol.value(), symbol);
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    /// Look up a symbol by its wire value.
    pub fn get(&self, value: u32) -> Option<&Symbol> {
        self.by_value.get(&value)
    }

    /// Look up the first symbol carrying the given name.
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.by_value.values().find(|s| s.name() == name)
    }

    /// Iterate over all symbols in value order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.by_value.values()
    }
}
