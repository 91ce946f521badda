//! The semantic checker for Simple C.
//!
//! Each `check_*` constructor takes raw subtrees, enforces the typing rules,
//! and returns a new node carrying the inferred result type. Implicit
//! conversions are spliced in by updating the caller's expression slot: a
//! promotion wraps the operand in a cast to int, decay wraps an array in an
//! address-of, and pointer arithmetic multiplies the numeric operand by the
//! element size (folded when the operand is a literal). A failed check
//! reports through the `Reporter` and yields a node with the error type,
//! which keeps later checks on the same subtree quiet.
//!
//! If a symbol is redeclared, the redeclaration is discarded and the
//! original declaration is retained.

use crate::ast::{Expr, ExprId, ExprKind, Stmt, Tree};
use crate::error::Reporter;
use crate::scope::{ScopeId, Symbol, SymbolId, SymbolTable};
use crate::types::Type;
use std::collections::HashSet;

pub struct Checker {
  pub symbols: SymbolTable,
  pub reporter: Reporter,
  defined: HashSet<String>,
}

impl Checker {
  pub fn new() -> Self {
    Self {
      symbols: SymbolTable::new(),
      reporter: Reporter::new(),
      defined: HashSet::new(),
    }
  }

  pub fn open_scope(&mut self) -> ScopeId {
    self.symbols.open_scope()
  }

  pub fn close_scope(&mut self) -> ScopeId {
    self.symbols.close_scope()
  }

  // ----- Conversion helpers -----

  /// Convert the expression to the specified type by inserting a cast if
  /// necessary. No validity checking is done. As an optimization, an int
  /// literal converted to long is simply retyped in place.
  fn cast(&mut self, tree: &mut Tree, expr: &mut ExprId, ty: &Type) {
    if tree.as_number(*expr).is_some()
      && *tree.ty(*expr) == Type::INT
      && *ty == Type::LONG
    {
      tree[*expr].ty = Type::LONG;
      return;
    }

    if tree.ty(*expr) != ty {
      *expr = tree.add(Expr::new(ExprKind::Cast { operand: *expr }, ty.clone()));
    }
  }

  /// Arithmetic promotion: a char expression is cast to int.
  fn promote(&mut self, tree: &mut Tree, expr: &mut ExprId) {
    let promoted = tree.ty(*expr).promote();
    self.cast(tree, expr, &promoted);
  }

  /// Type decay: an array expression is wrapped in an address-of whose type
  /// is the decayed pointer type. Returns the resulting type.
  fn decay(&mut self, tree: &mut Tree, expr: &mut ExprId) -> Type {
    if tree.ty(*expr).is_array() {
      let decayed = tree.ty(*expr).decay();
      *expr = tree.add(Expr::new(ExprKind::Address { operand: *expr }, decayed));
    }
    tree.ty(*expr).clone()
  }

  /// Convert the expression to the given type, but only by sign-extending.
  /// At the minimum, perform arithmetic promotion.
  fn extend(&mut self, tree: &mut Tree, expr: &mut ExprId, ty: &Type) {
    let t = tree.ty(*expr).clone();
    if (t == Type::CHAR || t == Type::INT) && *ty == Type::LONG {
      self.cast(tree, expr, &Type::LONG);
    } else {
      self.promote(tree, expr);
    }
  }

  /// Scale the numeric operand of pointer arithmetic by the element size.
  /// A literal operand is folded; anything else is extended to long and
  /// multiplied at run time.
  fn scale(&mut self, tree: &mut Tree, expr: ExprId, size: u64) -> ExprId {
    let mut expr = expr;

    if size == 1 {
      self.extend(tree, &mut expr, &Type::LONG);
      return expr;
    }

    if let Some(value) = tree.as_number(expr) {
      tree[expr] = Expr::number(value.wrapping_mul(size as i64));
      return expr;
    }

    self.extend(tree, &mut expr, &Type::LONG);
    let factor = tree.add(Expr::number(size as i64));
    tree.add(Expr::new(
      ExprKind::Multiply {
        left: expr,
        right: factor,
      },
      Type::LONG,
    ))
  }

  // ----- Declarations -----

  /// Define a function. A second definition of the same name is an error;
  /// the declaration work is shared with `declare_function`.
  pub fn define_function(&mut self, name: &str, ty: Type) -> SymbolId {
    if self.defined.contains(name) {
      self.reporter.report(format!("redefinition of '{name}'"));
    }
    self.defined.insert(name.to_string());
    self.declare_function(name, ty)
  }

  /// Declare a function, always in the outermost scope. A redeclaration is
  /// discarded, complaining if the types disagree.
  pub fn declare_function(&mut self, name: &str, ty: Type) -> SymbolId {
    match self.symbols.find_global(name) {
      None => self.symbols.insert_global(Symbol::new(name, ty)),
      Some(id) => {
        if *self.symbols.symbol(id).ty() != ty {
          self.reporter.report(format!("conflicting types for '{name}'"));
        }
        id
      }
    }
  }

  /// Declare a variable in the current scope. A redeclaration is discarded.
  pub fn declare_variable(&mut self, name: &str, ty: Type) -> SymbolId {
    match self.symbols.find(name) {
      None => self.symbols.insert(Symbol::new(name, ty)),
      Some(id) => {
        if !self.symbols.at_global_scope() {
          self.reporter.report(format!("redeclaration of '{name}'"));
        } else if *self.symbols.symbol(id).ty() != ty {
          self.reporter.report(format!("conflicting types for '{name}'"));
        }
        id
      }
    }
  }

  /// Resolve a name. An undeclared identifier is reported once and then
  /// declared with the error type so that subsequent uses stay quiet.
  pub fn check_identifier(&mut self, name: &str) -> SymbolId {
    match self.symbols.lookup(name) {
      Some(id) => id,
      None => {
        self.reporter.report(format!("'{name}' undeclared"));
        self.symbols.insert(Symbol::new(name, Type::Error))
      }
    }
  }

  // ----- Expressions -----

  /// Check a call `id(args)`. The callee must have a function type;
  /// arguments before any ellipsis decay and must be compatible with their
  /// parameters, arguments after it promote, decay, and must be scalar.
  pub fn check_call(&mut self, tree: &mut Tree, callee: SymbolId, args: Vec<ExprId>) -> ExprId {
    let t = self.symbols.symbol(callee).ty().clone();
    let mut args = args;
    let mut result = Type::Error;

    if !t.is_error() {
      if !t.is_function() {
        self.reporter.report("called object is not a function");
        return tree.add(Expr::new(ExprKind::Call { callee, args }, Type::Error));
      }

      let params = t.parameters().clone();

      if args.len() < params.types.len()
        || (!params.variadic && args.len() > params.types.len())
      {
        self.reporter.report("invalid arguments to called function");
        return tree.add(Expr::new(ExprKind::Call { callee, args }, Type::Error));
      }

      for (i, param) in params.types.iter().enumerate() {
        if tree.ty(args[i]).is_error() {
          continue;
        }
        let arg_ty = self.decay(tree, &mut args[i]);
        if !param.is_compatible_with(&arg_ty) {
          self.reporter.report("invalid arguments to called function");
          return tree.add(Expr::new(ExprKind::Call { callee, args }, Type::Error));
        }
        self.cast(tree, &mut args[i], param);
      }

      for i in params.types.len()..args.len() {
        if tree.ty(args[i]).is_error() {
          continue;
        }
        self.promote(tree, &mut args[i]);
        if !self.decay(tree, &mut args[i]).is_scalar() {
          self.reporter.report("invalid arguments to called function");
          return tree.add(Expr::new(ExprKind::Call { callee, args }, Type::Error));
        }
      }

      result = Type::scalar(t.specifier(), t.indirection());
    }

    tree.add(Expr::new(ExprKind::Call { callee, args }, result))
  }

  /// Check an index expression `left[right]`, which is rewritten as
  /// `*(left + right * sizeof *left)`.
  pub fn check_array(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let mut left = left;
    let mut right = right;

    self.promote(tree, &mut left);
    let t1 = self.decay(tree, &mut left);
    self.extend(tree, &mut right, &Type::LONG);
    let t2 = self.decay(tree, &mut right);
    let mut result = Type::Error;

    if !t1.is_error() && !t2.is_error() {
      if t1.is_pointer() && t2.is_numeric() {
        right = self.scale(tree, right, t1.dereference().size());
        result = t1.dereference();
      } else {
        self.reporter.report("invalid operands to binary []");
      }
    }

    let sum = tree.add(Expr::new(ExprKind::Add { left, right }, t1));
    tree.add(Expr::new(ExprKind::Dereference { operand: sum }, result))
  }

  pub fn check_not(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let mut expr = expr;
    self.promote(tree, &mut expr);
    let t = self.decay(tree, &mut expr);
    let mut result = Type::Error;

    if !t.is_error() {
      if t.is_scalar() {
        result = Type::INT;
      } else {
        self.reporter.report("invalid operand to unary !");
      }
    }

    tree.add(Expr::new(ExprKind::Not { operand: expr }, result))
  }

  pub fn check_negate(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let mut expr = expr;
    self.promote(tree, &mut expr);
    let t = self.decay(tree, &mut expr);
    let mut result = Type::Error;

    if !t.is_error() {
      if t.is_numeric() {
        result = t;
      } else {
        self.reporter.report("invalid operand to unary -");
      }
    }

    tree.add(Expr::new(ExprKind::Negate { operand: expr }, result))
  }

  pub fn check_dereference(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let mut expr = expr;
    let t = self.decay(tree, &mut expr);
    let mut result = Type::Error;

    if !t.is_error() {
      if t.is_pointer() {
        result = t.dereference();
      } else {
        self.reporter.report("invalid operand to unary *");
      }
    }

    tree.add(Expr::new(ExprKind::Dereference { operand: expr }, result))
  }

  /// Check `&expr`: the operand must be an lvalue, and the result adds one
  /// level of indirection.
  pub fn check_address(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let t = tree.ty(expr).clone();
    let mut result = Type::Error;

    if !t.is_error() {
      if tree.lvalue(expr) {
        result = Type::scalar(t.specifier(), t.indirection() + 1);
      } else {
        self.reporter.report("lvalue required in expression");
      }
    }

    tree.add(Expr::new(ExprKind::Address { operand: expr }, result))
  }

  /// Check `sizeof expr`. The operand is discarded; the result is a plain
  /// number holding the size.
  pub fn check_sizeof(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let t = tree.ty(expr).clone();
    let mut size = 0;

    if !t.is_error() {
      if !t.is_function() {
        size = t.size();
      } else {
        self.reporter.report("invalid operand in sizeof expression");
      }
    }

    tree.add(Expr::number(size as i64))
  }

  /// Check `(type) expr`: both numeric, both pointers, or long and pointer
  /// in either order.
  pub fn check_cast(&mut self, tree: &mut Tree, ty: Type, expr: ExprId) -> ExprId {
    let mut expr = expr;
    let t = self.decay(tree, &mut expr);
    let mut result = Type::Error;

    if !t.is_error() {
      if (ty.is_numeric() && t.is_numeric())
        || (ty.is_pointer() && t.is_pointer())
        || (ty.is_pointer() && t == Type::LONG)
        || (ty == Type::LONG && t.is_pointer())
      {
        result = ty;
      } else {
        self.reporter.report("invalid operand in cast expression");
      }
    }

    self.cast(tree, &mut expr, &result);
    expr
  }

  /// Apply the usual conversions of a binary operator to both operands:
  /// each side is extended toward the other's type and then decayed.
  /// Returns the resulting operand types.
  fn usual_conversions(
    &mut self,
    tree: &mut Tree,
    left: &mut ExprId,
    right: &mut ExprId,
  ) -> (Type, Type) {
    let right_ty = tree.ty(*right).clone();
    self.extend(tree, left, &right_ty);
    let t1 = self.decay(tree, left);
    let left_ty = tree.ty(*left).clone();
    self.extend(tree, right, &left_ty);
    let t2 = self.decay(tree, right);
    (t1, t2)
  }

  fn check_multiplicative(
    &mut self,
    tree: &mut Tree,
    left: &mut ExprId,
    right: &mut ExprId,
    op: &str,
  ) -> Type {
    let (t1, t2) = self.usual_conversions(tree, left, right);

    if !t1.is_error() && !t2.is_error() {
      if t1.is_numeric() && t2.is_numeric() {
        return t1;
      }
      self.reporter.report(format!("invalid operands to binary {op}"));
    }

    Type::Error
  }

  pub fn check_multiply(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_multiplicative(tree, &mut left, &mut right, "*");
    tree.add(Expr::new(ExprKind::Multiply { left, right }, ty))
  }

  pub fn check_divide(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_multiplicative(tree, &mut left, &mut right, "/");
    tree.add(Expr::new(ExprKind::Divide { left, right }, ty))
  }

  pub fn check_remainder(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_multiplicative(tree, &mut left, &mut right, "%");
    tree.add(Expr::new(ExprKind::Remainder { left, right }, ty))
  }

  /// Check `left + right`: numeric plus numeric, or pointer plus scaled
  /// numeric on either side.
  pub fn check_add(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let (t1, t2) = self.usual_conversions(tree, &mut left, &mut right);
    let mut result = Type::Error;

    if !t1.is_error() && !t2.is_error() {
      if t1.is_numeric() && t2.is_numeric() {
        result = t1;
      } else if t1.is_pointer() && t2.is_numeric() {
        right = self.scale(tree, right, t1.dereference().size());
        result = t1;
      } else if t1.is_numeric() && t2.is_pointer() {
        left = self.scale(tree, left, t2.dereference().size());
        result = t2;
      } else {
        self.reporter.report("invalid operands to binary +");
      }
    }

    tree.add(Expr::new(ExprKind::Add { left, right }, result))
  }

  /// Check `left - right`. Identical pointer types subtract to a long
  /// element count, so the difference is divided by the element size.
  pub fn check_subtract(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let (t1, t2) = self.usual_conversions(tree, &mut left, &mut right);
    let mut result = Type::Error;

    if !t1.is_error() && !t2.is_error() {
      if t1.is_numeric() && t2.is_numeric() {
        result = t1.clone();
      } else if t1.is_pointer() && t1 == t2 {
        result = Type::LONG;
      } else if t1.is_pointer() && t2.is_numeric() {
        right = self.scale(tree, right, t1.dereference().size());
        result = t1.clone();
      } else {
        self.reporter.report("invalid operands to binary -");
      }
    }

    let mut expr = tree.add(Expr::new(ExprKind::Subtract { left, right }, result));

    if t1.is_pointer() && t1 == t2 {
      // the divisor must match the long difference so idiv sees rdx:rax
      let size = tree.add(Expr::new(
        ExprKind::Number {
          value: t1.dereference().size() as i64,
        },
        Type::LONG,
      ));
      expr = tree.add(Expr::new(
        ExprKind::Divide {
          left: expr,
          right: size,
        },
        Type::LONG,
      ));
    }

    expr
  }

  fn check_comparative(
    &mut self,
    tree: &mut Tree,
    left: &mut ExprId,
    right: &mut ExprId,
    op: &str,
  ) -> Type {
    let (t1, t2) = self.usual_conversions(tree, left, right);

    if !t1.is_error() && !t2.is_error() {
      if t1.is_compatible_with(&t2) {
        return Type::INT;
      }
      self.reporter.report(format!("invalid operands to binary {op}"));
    }

    Type::Error
  }

  pub fn check_less_than(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, "<");
    tree.add(Expr::new(ExprKind::LessThan { left, right }, ty))
  }

  pub fn check_greater_than(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, ">");
    tree.add(Expr::new(ExprKind::GreaterThan { left, right }, ty))
  }

  pub fn check_less_or_equal(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, "<=");
    tree.add(Expr::new(ExprKind::LessOrEqual { left, right }, ty))
  }

  pub fn check_greater_or_equal(
    &mut self,
    tree: &mut Tree,
    left: ExprId,
    right: ExprId,
  ) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, ">=");
    tree.add(Expr::new(ExprKind::GreaterOrEqual { left, right }, ty))
  }

  pub fn check_equal(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, "==");
    tree.add(Expr::new(ExprKind::Equal { left, right }, ty))
  }

  pub fn check_not_equal(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_comparative(tree, &mut left, &mut right, "!=");
    tree.add(Expr::new(ExprKind::NotEqual { left, right }, ty))
  }

  fn check_logical(
    &mut self,
    tree: &mut Tree,
    left: &mut ExprId,
    right: &mut ExprId,
    op: &str,
  ) -> Type {
    self.promote(tree, left);
    let t1 = self.decay(tree, left);
    self.promote(tree, right);
    let t2 = self.decay(tree, right);

    if !t1.is_error() && !t2.is_error() {
      if t1.is_scalar() && t2.is_scalar() {
        return Type::INT;
      }
      self.reporter.report(format!("invalid operands to binary {op}"));
    }

    Type::Error
  }

  pub fn check_logical_and(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_logical(tree, &mut left, &mut right, "&&");
    tree.add(Expr::new(ExprKind::LogicalAnd { left, right }, ty))
  }

  pub fn check_logical_or(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> ExprId {
    let (mut left, mut right) = (left, right);
    let ty = self.check_logical(tree, &mut left, &mut right, "||");
    tree.add(Expr::new(ExprKind::LogicalOr { left, right }, ty))
  }

  // ----- Statements -----

  /// Test expressions of while, for, and if must have scalar type after the
  /// usual conversions.
  pub fn check_test(&mut self, tree: &mut Tree, expr: ExprId) -> ExprId {
    let mut expr = expr;
    self.promote(tree, &mut expr);
    let t = self.decay(tree, &mut expr);

    if !t.is_error() && !t.is_scalar() {
      self.reporter.report("scalar type required in statement");
    }

    expr
  }

  /// Check `left = right`: the left side must be an lvalue and the types
  /// compatible; the right side is cast to the left's type.
  pub fn check_assignment(&mut self, tree: &mut Tree, left: ExprId, right: ExprId) -> Stmt {
    let t1 = tree.ty(left).clone();
    let mut right = right;
    let t2 = self.decay(tree, &mut right);

    if !t1.is_error() && !t2.is_error() {
      if !tree.lvalue(left) {
        self.reporter.report("lvalue required in expression");
      } else if !t1.is_compatible_with(&t2) {
        self.reporter.report("invalid operands to binary =");
      } else {
        self.cast(tree, &mut right, &t1);
      }
    }

    Stmt::Assignment { left, right }
  }

  /// Check `return expr` against the enclosing function's return type.
  pub fn check_return(&mut self, tree: &mut Tree, expr: ExprId, return_ty: &Type) -> Stmt {
    let mut expr = expr;
    let t = self.decay(tree, &mut expr);

    if !t.is_error() {
      if t.is_compatible_with(return_ty) {
        self.cast(tree, &mut expr, return_ty);
      } else {
        self.reporter.report("invalid return type");
      }
    }

    Stmt::Return { expr }
  }

  /// A break statement is only legal inside a loop; the parser tracks the
  /// nesting depth.
  pub fn check_break(&mut self, depth: u32) -> Stmt {
    if depth == 0 {
      self.reporter.report("break statement not within loop");
    }
    Stmt::Break
  }
}

impl Default for Checker {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Parameters, Specifier};

  fn setup() -> (Checker, Tree) {
    let mut checker = Checker::new();
    checker.open_scope();
    (checker, Tree::new())
  }

  fn var(checker: &mut Checker, tree: &mut Tree, name: &str, ty: Type) -> ExprId {
    let symbol = checker.declare_variable(name, ty.clone());
    tree.add(Expr::new(ExprKind::Identifier { symbol }, ty))
  }

  #[test]
  fn undeclared_identifier_is_reported_once() {
    let (mut checker, _) = setup();
    let first = checker.check_identifier("x");
    assert_eq!(checker.reporter.diagnostics(), ["'x' undeclared"]);
    assert!(checker.symbols.symbol(first).ty().is_error());

    let second = checker.check_identifier("x");
    assert_eq!(first, second);
    assert_eq!(checker.reporter.count(), 1);
  }

  #[test]
  fn redeclaration_keeps_the_original() {
    let (mut checker, _) = setup();
    checker.open_scope();
    let original = checker.declare_variable("x", Type::INT);
    let duplicate = checker.declare_variable("x", Type::LONG);
    assert_eq!(original, duplicate);
    assert_eq!(checker.reporter.diagnostics(), ["redeclaration of 'x'"]);
    assert_eq!(*checker.symbols.symbol(original).ty(), Type::INT);
  }

  #[test]
  fn function_redefinition_and_conflicts() {
    let (mut checker, _) = setup();
    let ty = Type::function(Specifier::Int, 0, Parameters::default());
    checker.define_function("f", ty.clone());
    checker.define_function("f", ty);
    assert_eq!(checker.reporter.diagnostics(), ["redefinition of 'f'"]);

    let other = Type::function(
      Specifier::Long,
      0,
      Parameters {
        variadic: false,
        types: vec![Type::INT],
      },
    );
    checker.declare_function("f", other);
    assert_eq!(checker.reporter.diagnostics()[1], "conflicting types for 'f'");
  }

  #[test]
  fn char_operands_are_promoted_to_int() {
    let (mut checker, mut tree) = setup();
    let c = var(&mut checker, &mut tree, "c", Type::CHAR);
    let one = tree.add(Expr::number(1));

    let sum = checker.check_add(&mut tree, c, one);
    assert_eq!(*tree.ty(sum), Type::INT);

    let ExprKind::Add { left, .. } = tree[sum].kind else {
      panic!("expected an add node");
    };
    assert!(matches!(tree[left].kind, ExprKind::Cast { .. }));
    assert_eq!(*tree.ty(left), Type::INT);
    assert_eq!(checker.reporter.count(), 0);
  }

  #[test]
  fn mixed_int_and_long_widen_to_long() {
    let (mut checker, mut tree) = setup();
    let i = var(&mut checker, &mut tree, "i", Type::INT);
    let l = var(&mut checker, &mut tree, "l", Type::LONG);

    let sum = checker.check_add(&mut tree, i, l);
    assert_eq!(*tree.ty(sum), Type::LONG);

    let ExprKind::Add { left, .. } = tree[sum].kind else {
      panic!("expected an add node");
    };
    assert!(matches!(tree[left].kind, ExprKind::Cast { .. }));
  }

  #[test]
  fn int_literal_widens_without_a_cast_node() {
    let (mut checker, mut tree) = setup();
    let l = var(&mut checker, &mut tree, "l", Type::LONG);
    let two = tree.add(Expr::number(2));

    let sum = checker.check_add(&mut tree, two, l);
    let ExprKind::Add { left, .. } = tree[sum].kind else {
      panic!("expected an add node");
    };
    assert_eq!(tree.as_number(left), Some(2));
    assert_eq!(*tree.ty(left), Type::LONG);
  }

  #[test]
  fn pointer_plus_literal_folds_the_scaling() {
    let (mut checker, mut tree) = setup();
    let p = var(&mut checker, &mut tree, "p", Type::scalar(Specifier::Int, 1));
    let two = tree.add(Expr::number(2));

    let sum = checker.check_add(&mut tree, p, two);
    assert_eq!(*tree.ty(sum), Type::scalar(Specifier::Int, 1));

    let ExprKind::Add { right, .. } = tree[sum].kind else {
      panic!("expected an add node");
    };
    assert_eq!(tree.as_number(right), Some(8), "2 scaled by sizeof(int)");
  }

  #[test]
  fn pointer_plus_variable_multiplies_at_runtime() {
    let (mut checker, mut tree) = setup();
    let p = var(&mut checker, &mut tree, "p", Type::scalar(Specifier::Int, 1));
    let i = var(&mut checker, &mut tree, "i", Type::INT);

    let sum = checker.check_add(&mut tree, p, i);
    let ExprKind::Add { right, .. } = tree[sum].kind else {
      panic!("expected an add node");
    };
    let ExprKind::Multiply { left, right: factor } = tree[right].kind else {
      panic!("expected the index to be scaled");
    };
    assert_eq!(*tree.ty(right), Type::LONG);
    assert!(matches!(tree[left].kind, ExprKind::Cast { .. }));
    assert_eq!(tree.as_number(factor), Some(4));
  }

  #[test]
  fn pointer_difference_divides_by_element_size() {
    let (mut checker, mut tree) = setup();
    let a = var(&mut checker, &mut tree, "a", Type::scalar(Specifier::Int, 1));
    let b = var(&mut checker, &mut tree, "b", Type::scalar(Specifier::Int, 1));

    let diff = checker.check_subtract(&mut tree, a, b);
    assert_eq!(*tree.ty(diff), Type::LONG);

    let ExprKind::Divide { left, right } = &tree[diff].kind else {
      panic!("pointer difference must be divided by the element size");
    };
    assert!(matches!(tree[*left].kind, ExprKind::Subtract { .. }));
    assert_eq!(tree.as_number(*right), Some(4));
    assert_eq!(checker.reporter.count(), 0);
  }

  #[test]
  fn array_identifier_decays_through_address() {
    let (mut checker, mut tree) = setup();
    let a = var(
      &mut checker,
      &mut tree,
      "a",
      Type::array(Specifier::Int, 0, 10),
    );
    let i = var(&mut checker, &mut tree, "i", Type::INT);

    let element = checker.check_array(&mut tree, a, i);
    assert_eq!(*tree.ty(element), Type::INT);
    let ExprKind::Dereference { operand } = tree[element].kind else {
      panic!("indexing lowers to a dereference");
    };
    let ExprKind::Add { left, .. } = tree[operand].kind else {
      panic!("indexing lowers to pointer addition");
    };
    assert!(matches!(tree[left].kind, ExprKind::Address { .. }));
    assert_eq!(checker.reporter.count(), 0);
  }

  #[test]
  fn invalid_operands_are_reported_and_poison_the_result() {
    let (mut checker, mut tree) = setup();
    let p = var(&mut checker, &mut tree, "p", Type::scalar(Specifier::Int, 1));
    let q = var(&mut checker, &mut tree, "q", Type::scalar(Specifier::Int, 1));

    let product = checker.check_multiply(&mut tree, p, q);
    assert!(tree.ty(product).is_error());
    assert_eq!(checker.reporter.diagnostics(), ["invalid operands to binary *"]);

    // The poisoned result stays quiet downstream.
    let one = tree.add(Expr::number(1));
    let sum = checker.check_add(&mut tree, product, one);
    assert!(tree.ty(sum).is_error());
    assert_eq!(checker.reporter.count(), 1);
  }

  #[test]
  fn cast_rules_cover_long_and_pointers() {
    let (mut checker, mut tree) = setup();
    let p = var(&mut checker, &mut tree, "p", Type::scalar(Specifier::Int, 1));
    let cast = checker.check_cast(&mut tree, Type::LONG, p);
    assert_eq!(*tree.ty(cast), Type::LONG);
    assert_eq!(checker.reporter.count(), 0);

    let q = var(&mut checker, &mut tree, "q", Type::scalar(Specifier::Int, 1));
    let bad = checker.check_cast(&mut tree, Type::INT, q);
    assert!(tree.ty(bad).is_error());
    assert_eq!(checker.reporter.diagnostics(), ["invalid operand in cast expression"]);
  }

  #[test]
  fn sizeof_rejects_functions_and_measures_arrays() {
    let (mut checker, mut tree) = setup();
    let a = var(
      &mut checker,
      &mut tree,
      "a",
      Type::array(Specifier::Char, 0, 12),
    );
    let size = checker.check_sizeof(&mut tree, a);
    assert_eq!(tree.as_number(size), Some(12));

    let f = checker.declare_function("f", Type::function(Specifier::Int, 0, Parameters::default()));
    let fid = tree.add(Expr::new(
      ExprKind::Identifier { symbol: f },
      checker.symbols.symbol(f).ty().clone(),
    ));
    let bad = checker.check_sizeof(&mut tree, fid);
    assert_eq!(tree.as_number(bad), Some(0));
    assert_eq!(
      checker.reporter.diagnostics(),
      ["invalid operand in sizeof expression"]
    );
  }

  #[test]
  fn assignment_requires_an_lvalue() {
    let (mut checker, mut tree) = setup();
    let one = tree.add(Expr::number(1));
    let two = tree.add(Expr::number(2));
    checker.check_assignment(&mut tree, one, two);
    assert_eq!(checker.reporter.diagnostics(), ["lvalue required in expression"]);
  }

  #[test]
  fn assignment_casts_the_right_side() {
    let (mut checker, mut tree) = setup();
    let c = var(&mut checker, &mut tree, "c", Type::CHAR);
    let i = var(&mut checker, &mut tree, "i", Type::INT);

    let stmt = checker.check_assignment(&mut tree, c, i);
    let Stmt::Assignment { right, .. } = stmt else {
      panic!("expected an assignment");
    };
    assert!(matches!(tree[right].kind, ExprKind::Cast { .. }));
    assert_eq!(*tree.ty(right), Type::CHAR);
  }

  #[test]
  fn break_outside_a_loop_is_reported() {
    let (mut checker, _) = setup();
    checker.check_break(1);
    assert_eq!(checker.reporter.count(), 0);
    checker.check_break(0);
    assert_eq!(
      checker.reporter.diagnostics(),
      ["break statement not within loop"]
    );
  }

  #[test]
  fn conversions_are_idempotent() {
    let (mut checker, mut tree) = setup();
    let mut i = var(&mut checker, &mut tree, "i", Type::INT);

    let before = i;
    checker.promote(&mut tree, &mut i);
    assert_eq!(i, before, "promoting an int inserts nothing");

    let mut l = var(&mut checker, &mut tree, "l", Type::LONG);
    let before = l;
    checker.extend(&mut tree, &mut l, &Type::LONG);
    assert_eq!(l, before, "extending a long inserts nothing");

    let mut p = var(&mut checker, &mut tree, "p", Type::scalar(Specifier::Int, 1));
    let before = p;
    assert_eq!(checker.decay(&mut tree, &mut p), Type::scalar(Specifier::Int, 1));
    assert_eq!(p, before, "pointers do not decay further");
  }

  #[test]
  fn call_argument_checking() {
    let (mut checker, mut tree) = setup();
    let printf_ty = Type::function(
      Specifier::Int,
      0,
      Parameters {
        variadic: true,
        types: vec![Type::scalar(Specifier::Char, 1)],
      },
    );
    let printf = checker.declare_function("printf", printf_ty);

    let fmt = var(
      &mut checker,
      &mut tree,
      "fmt",
      Type::scalar(Specifier::Char, 1),
    );
    let x = var(&mut checker, &mut tree, "x", Type::INT);
    let call = checker.check_call(&mut tree, printf, vec![fmt, x]);
    assert_eq!(*tree.ty(call), Type::INT);
    assert_eq!(checker.reporter.count(), 0);

    let missing = checker.check_call(&mut tree, printf, vec![]);
    assert!(tree.ty(missing).is_error());
    assert_eq!(
      checker.reporter.diagnostics(),
      ["invalid arguments to called function"]
    );

    let x2 = var(&mut checker, &mut tree, "y", Type::INT);
    let y = checker.symbols.lookup("y").unwrap();
    let not_fn = checker.check_call(&mut tree, y, vec![x2]);
    assert!(tree.ty(not_fn).is_error());
    assert_eq!(checker.reporter.diagnostics()[1], "called object is not a function");
  }
}
