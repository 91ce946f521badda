//! Symbols and lexically nested scopes.
//!
//! Declarations live in an arena owned by the `SymbolTable` so that AST
//! nodes can refer to them by index while scopes come and go. The scopes
//! themselves form a stack: the bottom entry is the global scope and each
//! `{` pushes a new one. Lookups are linear scans, in keeping with the
//! modest size of Simple C programs.

use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

/// A named declaration. The offset starts at zero ("not yet allocated");
/// the allocator assigns it exactly once, and a zero offset at code
/// generation time means the symbol is a global addressed by name.
#[derive(Debug)]
pub struct Symbol {
  name: String,
  ty: Type,
  pub offset: i64,
}

impl Symbol {
  pub fn new(name: impl Into<String>, ty: Type) -> Self {
    Self {
      name: name.into(),
      ty,
      offset: 0,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn ty(&self) -> &Type {
    &self.ty
  }
}

#[derive(Debug)]
struct Scope {
  enclosing: Option<ScopeId>,
  symbols: Vec<SymbolId>,
}

/// Arena of symbols plus the scope stack built over them.
#[derive(Debug, Default)]
pub struct SymbolTable {
  symbols: Vec<Symbol>,
  scopes: Vec<Scope>,
  current: Option<ScopeId>,
  global: Option<ScopeId>,
}

impl SymbolTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn symbol(&self, id: SymbolId) -> &Symbol {
    &self.symbols[id.0]
  }

  pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
    &mut self.symbols[id.0]
  }

  /// Create a scope and make it the new top-level scope. The first scope
  /// opened becomes the global scope.
  pub fn open_scope(&mut self) -> ScopeId {
    let id = ScopeId(self.scopes.len());
    self.scopes.push(Scope {
      enclosing: self.current,
      symbols: Vec::new(),
    });
    self.current = Some(id);
    if self.global.is_none() {
      self.global = Some(id);
    }
    id
  }

  /// Pop the top-level scope and return its handle. Symbols stay in the
  /// arena either way; callers that keep the handle (function bodies) can
  /// still reach their declarations through it.
  pub fn close_scope(&mut self) -> ScopeId {
    let id = self.current.expect("no scope to close");
    self.current = self.scopes[id.0].enclosing;
    id
  }

  pub fn global_scope(&self) -> ScopeId {
    self.global.expect("global scope not opened")
  }

  /// Whether the current scope is the outermost one.
  pub fn at_global_scope(&self) -> bool {
    self.current.is_some() && self.current == self.global
  }

  /// Symbols owned by a scope, in declaration order.
  pub fn scope_symbols(&self, scope: ScopeId) -> &[SymbolId] {
    &self.scopes[scope.0].symbols
  }

  fn find_in(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
    self.scopes[scope.0]
      .symbols
      .iter()
      .copied()
      .find(|&id| self.symbols[id.0].name == name)
  }

  /// Search the current scope only.
  pub fn find(&self, name: &str) -> Option<SymbolId> {
    self.find_in(self.current?, name)
  }

  pub fn find_global(&self, name: &str) -> Option<SymbolId> {
    self.find_in(self.global?, name)
  }

  /// Search the current scope, then the chain of enclosing scopes.
  pub fn lookup(&self, name: &str) -> Option<SymbolId> {
    let mut scope = self.current;
    while let Some(id) = scope {
      if let Some(symbol) = self.find_in(id, name) {
        return Some(symbol);
      }
      scope = self.scopes[id.0].enclosing;
    }
    None
  }

  /// Append a symbol to the current scope.
  pub fn insert(&mut self, symbol: Symbol) -> SymbolId {
    let scope = self.current.expect("no open scope");
    self.push_symbol(scope, symbol)
  }

  /// Append a symbol to the global scope regardless of nesting; functions
  /// are always declared there.
  pub fn insert_global(&mut self, symbol: Symbol) -> SymbolId {
    let scope = self.global_scope();
    self.push_symbol(scope, symbol)
  }

  fn push_symbol(&mut self, scope: ScopeId, symbol: Symbol) -> SymbolId {
    let id = SymbolId(self.symbols.len());
    self.symbols.push(symbol);
    self.scopes[scope.0].symbols.push(id);
    id
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn find_is_limited_to_the_current_scope() {
    let mut table = SymbolTable::new();
    table.open_scope();
    table.insert(Symbol::new("x", Type::INT));

    table.open_scope();
    assert!(table.find("x").is_none());
    assert!(table.lookup("x").is_some());
  }

  #[test]
  fn lookup_prefers_the_innermost_declaration() {
    let mut table = SymbolTable::new();
    table.open_scope();
    table.insert(Symbol::new("x", Type::INT));
    table.open_scope();
    let inner = table.insert(Symbol::new("x", Type::LONG));

    assert_eq!(table.lookup("x"), Some(inner));
    table.close_scope();
    let outer = table.lookup("x").unwrap();
    assert_eq!(*table.symbol(outer).ty(), Type::INT);
  }

  #[test]
  fn insertion_order_is_preserved() {
    let mut table = SymbolTable::new();
    let scope = table.open_scope();
    table.insert(Symbol::new("a", Type::INT));
    table.insert(Symbol::new("b", Type::INT));
    table.insert(Symbol::new("c", Type::INT));

    let names: Vec<&str> = table
      .scope_symbols(scope)
      .iter()
      .map(|&id| table.symbol(id).name())
      .collect();
    assert_eq!(names, ["a", "b", "c"]);
  }

  #[test]
  fn globals_land_in_the_outermost_scope() {
    let mut table = SymbolTable::new();
    table.open_scope();
    table.open_scope();
    let id = table.insert_global(Symbol::new("f", Type::INT));
    table.close_scope();
    assert_eq!(table.find("f"), Some(id));
  }
}
