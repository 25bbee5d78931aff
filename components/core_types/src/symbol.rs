//! Interned identifiers.
//!
//! Every property name and variable name is interned once per context and
//! afterwards handled as a small integer, so lookups never compare strings.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Interned string handle.
///
/// Two symbols produced by the same [`SymbolTable`] are equal exactly when
/// their source strings are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Raw index of this symbol inside its table
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// String interning table.
///
/// The table only grows: a symbol stays valid for the lifetime of the table.
///
/// # Examples
///
/// ```
/// use core_types::SymbolTable;
///
/// let mut table = SymbolTable::new();
/// let a = table.intern("width");
/// let b = table.intern("height");
///
/// assert_ne!(a, b);
/// assert_eq!(table.intern("width"), a);
/// assert_eq!(table.resolve(b).as_deref(), Some("height"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    by_name: HashMap<Rc<str>, Symbol>,
    names: Vec<Rc<str>>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing symbol if it was seen before
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(symbol) = self.by_name.get(name) {
            return *symbol;
        }

        let symbol = Symbol(self.names.len() as u32);
        let name: Rc<str> = Rc::from(name);
        self.names.push(name.clone());
        self.by_name.insert(name, symbol);
        symbol
    }

    /// Look up a symbol without interning
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.by_name.get(name).copied()
    }

    /// Get the string a symbol was interned from
    pub fn resolve(&self, symbol: Symbol) -> Option<Rc<str>> {
        self.names.get(symbol.0 as usize).cloned()
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no symbol has been interned yet
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
