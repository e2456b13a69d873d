//! Symbol table: interns identifier bytes to a small `Symbol` handle so
//! that two identifiers compare equal with a single integer comparison
//! (spec.md §4.2). Backed by one arena of owned strings for the table's
//! whole lifetime; no string is ever freed individually.
//!
//! Also carries a generic "payload" slot per symbol, used by the parser to
//! remember the most recent node a label (`'name`) refers to, so that a
//! later `:name` reference can look it up in O(1).

use std::collections::HashMap;

/// A cheap, `Copy` handle for an interned identifier. Equality between two
/// `Symbol`s from the same table is equivalent to string equality of the
/// identifiers they were interned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

pub struct SymbolTable<T> {
    strings: Vec<Box<str>>,
    index: HashMap<Box<str>, Symbol>,
    payload: Vec<Option<T>>,
}

impl<T> Default for SymbolTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SymbolTable<T> {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            index: HashMap::new(),
            payload: Vec::new(),
        }
    }

    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.index.get(s) {
            return sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(s.into());
        self.payload.push(None);
        self.index.insert(s.into(), sym);
        sym
    }

    /// Interns a fixed array of keyword strings, returning their symbols in
    /// the same order (used for wave-kind and pan-literal keyword tables).
    pub fn intern_array(&mut self, strs: &[&str]) -> Vec<Symbol> {
        strs.iter().map(|s| self.intern(s)).collect()
    }

    /// Looks a symbol up without interning; `None` if it was never interned.
    pub fn lookup(&self, s: &str) -> Option<Symbol> {
        self.index.get(s).copied()
    }

    pub fn text(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }

    pub fn attach(&mut self, sym: Symbol, payload: T) {
        self.payload[sym.0 as usize] = Some(payload);
    }

    pub fn payload_of(&self, sym: Symbol) -> Option<&T> {
        self.payload[sym.0 as usize].as_ref()
    }

    pub fn clear_payload(&mut self, sym: Symbol) {
        self.payload[sym.0 as usize] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut t: SymbolTable<()> = SymbolTable::new();
        let a = t.intern("sin");
        let b = t.intern("sin");
        let c = t.intern("sqr");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.text(a), "sin");
    }

    #[test]
    fn payload_round_trips() {
        let mut t: SymbolTable<u32> = SymbolTable::new();
        let a = t.intern("carrier");
        assert_eq!(t.payload_of(a), None);
        t.attach(a, 42);
        assert_eq!(t.payload_of(a), Some(&42));
        t.clear_payload(a);
        assert_eq!(t.payload_of(a), None);
    }
}
