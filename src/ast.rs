//! The abstract syntax tree.
//!
//! Expression nodes live in an arena (`Tree`) and refer to their children by
//! index, which lets the checker splice conversion nodes around existing
//! subtrees and lets the code generator link registers to nodes anywhere in
//! the tree without aliasing trouble. Every expression carries its computed
//! type plus two mutable code-generation annotations: the register currently
//! holding its value and the stack slot it was spilled to. Statements form
//! an ordinary owned tree; only expressions need the arena treatment.

use crate::label::Label;
use crate::register::Reg;
use crate::scope::{ScopeId, SymbolId};
use crate::types::Type;
use std::ops::{Index, IndexMut};

/// Index of an expression node in its `Tree`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExprId(usize);

#[derive(Debug)]
pub enum ExprKind {
  Number {
    value: i64,
  },
  String {
    value: String,
    label: Label,
  },
  Identifier {
    symbol: SymbolId,
  },
  Call {
    callee: SymbolId,
    args: Vec<ExprId>,
  },
  Not {
    operand: ExprId,
  },
  Negate {
    operand: ExprId,
  },
  Dereference {
    operand: ExprId,
  },
  Address {
    operand: ExprId,
  },
  Cast {
    operand: ExprId,
  },
  Add {
    left: ExprId,
    right: ExprId,
  },
  Subtract {
    left: ExprId,
    right: ExprId,
  },
  Multiply {
    left: ExprId,
    right: ExprId,
  },
  Divide {
    left: ExprId,
    right: ExprId,
  },
  Remainder {
    left: ExprId,
    right: ExprId,
  },
  LessThan {
    left: ExprId,
    right: ExprId,
  },
  GreaterThan {
    left: ExprId,
    right: ExprId,
  },
  LessOrEqual {
    left: ExprId,
    right: ExprId,
  },
  GreaterOrEqual {
    left: ExprId,
    right: ExprId,
  },
  Equal {
    left: ExprId,
    right: ExprId,
  },
  NotEqual {
    left: ExprId,
    right: ExprId,
  },
  LogicalAnd {
    left: ExprId,
    right: ExprId,
  },
  LogicalOr {
    left: ExprId,
    right: ExprId,
  },
}

/// An expression node: its variant, result type, and codegen annotations.
#[derive(Debug)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: Type,
  pub reg: Option<Reg>,
  /// Stack slot this value was spilled to; 0 means never spilled.
  pub offset: i64,
}

impl Expr {
  pub fn new(kind: ExprKind, ty: Type) -> Self {
    Self {
      kind,
      ty,
      reg: None,
      offset: 0,
    }
  }

  /// An integer literal has type int unless its value does not fit.
  pub fn number(value: i64) -> Self {
    let ty = if value > i32::MAX as i64 {
      Type::LONG
    } else {
      Type::INT
    };
    Self::new(ExprKind::Number { value }, ty)
  }
}

/// Arena of expression nodes for one translation unit.
#[derive(Debug, Default)]
pub struct Tree {
  nodes: Vec<Expr>,
}

impl Tree {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&mut self, expr: Expr) -> ExprId {
    let id = ExprId(self.nodes.len());
    self.nodes.push(expr);
    id
  }

  pub fn ty(&self, id: ExprId) -> &Type {
    &self.nodes[id.0].ty
  }

  /// The literal value, if this node is a number.
  pub fn as_number(&self, id: ExprId) -> Option<i64> {
    match self.nodes[id.0].kind {
      ExprKind::Number { value } => Some(value),
      _ => None,
    }
  }

  /// The pointer operand, if this node is a dereference.
  pub fn as_dereference(&self, id: ExprId) -> Option<ExprId> {
    match self.nodes[id.0].kind {
      ExprKind::Dereference { operand } => Some(operand),
      _ => None,
    }
  }

  /// An lvalue designates a storage location: an identifier of non-array
  /// type, or any dereference.
  pub fn lvalue(&self, id: ExprId) -> bool {
    match self.nodes[id.0].kind {
      ExprKind::Identifier { .. } => !self.nodes[id.0].ty.is_array(),
      ExprKind::Dereference { .. } => true,
      _ => false,
    }
  }
}

impl Index<ExprId> for Tree {
  type Output = Expr;

  fn index(&self, id: ExprId) -> &Expr {
    &self.nodes[id.0]
  }
}

impl IndexMut<ExprId> for Tree {
  fn index_mut(&mut self, id: ExprId) -> &mut Expr {
    &mut self.nodes[id.0]
  }
}

#[derive(Debug)]
pub enum Stmt {
  Simple(ExprId),
  Assignment {
    left: ExprId,
    right: ExprId,
  },
  Return {
    expr: ExprId,
  },
  Break,
  While {
    cond: ExprId,
    body: Box<Stmt>,
  },
  For {
    init: Box<Stmt>,
    cond: ExprId,
    incr: Box<Stmt>,
    body: Box<Stmt>,
  },
  If {
    cond: ExprId,
    then: Box<Stmt>,
    otherwise: Option<Box<Stmt>>,
  },
  Block {
    scope: ScopeId,
    stmts: Vec<Stmt>,
  },
}

/// A function definition: its symbol and its body block (which retains the
/// declaration scope of parameters and top-level locals).
#[derive(Debug)]
pub struct Function {
  pub symbol: SymbolId,
  pub body: Stmt,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::scope::{Symbol, SymbolTable};
  use crate::types::Specifier;

  #[test]
  fn literal_typing_follows_magnitude() {
    assert_eq!(Expr::number(0).ty, Type::INT);
    assert_eq!(Expr::number(i32::MAX as i64).ty, Type::INT);
    assert_eq!(Expr::number(i32::MAX as i64 + 1).ty, Type::LONG);
  }

  #[test]
  fn capability_predicates() {
    let mut table = SymbolTable::new();
    table.open_scope();
    let x = table.insert(Symbol::new("x", Type::INT));
    let a = table.insert(Symbol::new("a", Type::array(Specifier::Int, 0, 4)));

    let mut tree = Tree::new();
    let num = tree.add(Expr::number(3));
    let var = tree.add(Expr::new(ExprKind::Identifier { symbol: x }, Type::INT));
    let arr = tree.add(Expr::new(
      ExprKind::Identifier { symbol: a },
      Type::array(Specifier::Int, 0, 4),
    ));
    let ptr = tree.add(Expr::new(
      ExprKind::Identifier { symbol: x },
      Type::scalar(Specifier::Int, 1),
    ));
    let deref = tree.add(Expr::new(ExprKind::Dereference { operand: ptr }, Type::INT));

    assert_eq!(tree.as_number(num), Some(3));
    assert_eq!(tree.as_number(var), None);
    assert!(tree.lvalue(var));
    assert!(!tree.lvalue(arr), "array identifiers are not lvalues");
    assert!(tree.lvalue(deref));
    assert!(!tree.lvalue(num));
    assert_eq!(tree.as_dereference(deref), Some(ptr));
    assert_eq!(tree.as_dereference(var), None);
  }
}
