//! Recursive-descent parser for Simple C, and the driver of the whole pass.
//!
//! The parser owns the expression tree, the checker, and the output buffer,
//! because compilation is a single forward pass: every expression is checked
//! the moment it is parsed, and every function is allocated and emitted the
//! moment its closing brace is consumed (provided nothing has been reported
//! so far). Global declarations accumulate in the outermost scope and are
//! emitted after the last function, followed by the string literals.
//!
//! Syntax errors are fatal; there is no error recovery.

use crate::ast::{Expr, ExprId, ExprKind, Function, Stmt, Tree};
use crate::checker::Checker;
use crate::error::{CompileError, CompileResult};
use crate::generator::{self, Generator};
use crate::label::{Label, LabelSource};
use crate::tokenizer::{token_text, unescape, Token, TokenKind};
use crate::types::{Parameters, Specifier, Type};
use crate::Compilation;

/// Parse a token stream and compile it. Returns the generated assembly and
/// any semantic diagnostics; only a syntax error is an `Err`.
pub fn translation_unit(tokens: Vec<Token>, source: &str) -> CompileResult<Compilation> {
  let mut parser = Parser::new(tokens, source);
  parser.checker.open_scope();

  while parser.stream.kind() != TokenKind::Eof {
    parser.function_or_global()?;
  }

  parser.checker.close_scope();
  generator::generate_globals(&parser.checker.symbols, &mut parser.out);
  generator::generate_strings(&parser.strings, &mut parser.out);

  Ok(Compilation {
    assembly: parser.out,
    diagnostics: parser.checker.reporter.into_diagnostics(),
  })
}

fn is_specifier(token: &Token, source: &str) -> bool {
  token.kind == TokenKind::Keyword
    && matches!(token_text(token, source), "char" | "int" | "long")
}

struct Parser<'a> {
  stream: TokenStream<'a>,
  tree: Tree,
  checker: Checker,
  labels: LabelSource,
  strings: Vec<(Label, String)>,
  out: String,
  loop_depth: u32,
  return_type: Type,
}

impl<'a> Parser<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      stream: TokenStream::new(tokens, source),
      tree: Tree::new(),
      checker: Checker::new(),
      labels: LabelSource::new(),
      strings: Vec::new(),
      out: String::new(),
      loop_depth: 0,
      return_type: Type::Error,
    }
  }

  fn error<T>(&self) -> CompileResult<T> {
    Err(if self.stream.kind() == TokenKind::Eof {
      CompileError::SyntaxAtEof
    } else {
      CompileError::Syntax {
        lexeme: self.stream.text().to_string(),
      }
    })
  }

  fn expect(&mut self, symbol: &str) -> CompileResult<()> {
    if self.stream.accept(symbol) {
      Ok(())
    } else {
      self.error()
    }
  }

  // ----- Terminals -----

  fn specifier(&mut self) -> CompileResult<Specifier> {
    if self.stream.kind() == TokenKind::Keyword {
      let spec = match self.stream.text() {
        "char" => Some(Specifier::Char),
        "int" => Some(Specifier::Int),
        "long" => Some(Specifier::Long),
        _ => None,
      };
      if let Some(spec) = spec {
        self.stream.advance();
        return Ok(spec);
      }
    }
    self.error()
  }

  /// Zero or more asterisks.
  fn pointers(&mut self) -> u32 {
    let mut count = 0;
    while self.stream.accept("*") {
      count += 1;
    }
    count
  }

  fn number(&mut self) -> CompileResult<i64> {
    if self.stream.kind() == TokenKind::Num {
      let value = self.stream.peek().value.unwrap_or(0);
      self.stream.advance();
      Ok(value)
    } else {
      self.error()
    }
  }

  fn identifier(&mut self) -> CompileResult<String> {
    if self.stream.kind() == TokenKind::Ident {
      let name = self.stream.text().to_string();
      self.stream.advance();
      Ok(name)
    } else {
      self.error()
    }
  }

  /// Deduplicated label for a string literal's data.
  fn string_label(&mut self, value: &str) -> Label {
    if let Some((label, _)) = self.strings.iter().find(|(_, existing)| existing == value) {
      return *label;
    }
    let label = self.labels.fresh();
    self.strings.push((label, value.to_string()));
    label
  }

  // ----- Declarations -----

  /// declarator: pointers identifier | pointers identifier [ num ]
  fn declarator(&mut self, spec: Specifier) -> CompileResult<()> {
    let indirection = self.pointers();
    let name = self.identifier()?;

    if self.stream.accept("[") {
      let length = self.number()?;
      self
        .checker
        .declare_variable(&name, Type::array(spec, indirection, length as u64));
      self.expect("]")?;
    } else {
      self
        .checker
        .declare_variable(&name, Type::scalar(spec, indirection));
    }

    Ok(())
  }

  /// declaration: specifier declarator-list ;
  fn declaration(&mut self) -> CompileResult<()> {
    let spec = self.specifier()?;
    self.declarator(spec)?;

    while self.stream.accept(",") {
      self.declarator(spec)?;
    }

    self.expect(";")
  }

  fn declarations(&mut self) -> CompileResult<()> {
    while is_specifier(self.stream.peek(), self.stream.source) {
      self.declaration()?;
    }
    Ok(())
  }

  // ----- Expressions -----

  /// primary-expression: ( expression ) | identifier ( args ) | identifier
  /// | num | character | string
  fn primary_expression(&mut self) -> CompileResult<ExprId> {
    if self.stream.accept("(") {
      let expr = self.expression()?;
      self.expect(")")?;
      return Ok(expr);
    }

    match self.stream.kind() {
      TokenKind::StrLit => {
        let text = self.stream.text();
        let value = unescape(&text[1..text.len() - 1]);
        self.stream.advance();
        let label = self.string_label(&value);
        let ty = Type::array(Specifier::Char, 0, value.len() as u64 + 1);
        Ok(self.tree.add(Expr::new(ExprKind::String { value, label }, ty)))
      }

      TokenKind::CharLit => {
        let text = self.stream.text();
        let value = unescape(&text[1..text.len() - 1])
          .into_bytes()
          .first()
          .copied()
          .unwrap_or(0) as i64;
        self.stream.advance();
        Ok(self.tree.add(Expr::number(value)))
      }

      TokenKind::Num => {
        let value = self.number()?;
        Ok(self.tree.add(Expr::number(value)))
      }

      TokenKind::Ident => {
        let name = self.identifier()?;
        let symbol = self.checker.check_identifier(&name);

        if self.stream.accept("(") {
          let mut args = Vec::new();
          if !self.stream.next_is(")") {
            args.push(self.expression()?);
            while self.stream.accept(",") {
              args.push(self.expression()?);
            }
          }
          let call = self.checker.check_call(&mut self.tree, symbol, args);
          self.expect(")")?;
          Ok(call)
        } else {
          let ty = self.checker.symbols.symbol(symbol).ty().clone();
          Ok(self.tree.add(Expr::new(ExprKind::Identifier { symbol }, ty)))
        }
      }

      _ => self.error(),
    }
  }

  /// postfix-expression: primary-expression { [ expression ] }
  fn postfix_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.primary_expression()?;

    while self.stream.accept("[") {
      let right = self.expression()?;
      left = self.checker.check_array(&mut self.tree, left, right);
      self.expect("]")?;
    }

    Ok(left)
  }

  /// prefix-expression: postfix | ! - * & sizeof prefixed forms, casts.
  ///
  /// "sizeof(type) * n" is ambiguous between a multiplication and a cast of
  /// a dereference; the parenthesized type is always consumed as part of
  /// the sizeof, which picks the sensible reading.
  fn prefix_expression(&mut self) -> CompileResult<ExprId> {
    if self.stream.accept("!") {
      let expr = self.prefix_expression()?;
      return Ok(self.checker.check_not(&mut self.tree, expr));
    }

    if self.stream.accept("-") {
      let expr = self.prefix_expression()?;
      return Ok(self.checker.check_negate(&mut self.tree, expr));
    }

    if self.stream.accept("*") {
      let expr = self.prefix_expression()?;
      return Ok(self.checker.check_dereference(&mut self.tree, expr));
    }

    if self.stream.accept("&") {
      let expr = self.prefix_expression()?;
      return Ok(self.checker.check_address(&mut self.tree, expr));
    }

    if self.stream.next_is("sizeof") {
      self.stream.advance();

      if self.stream.next_is("(")
        && is_specifier(self.stream.peek_next(), self.stream.source)
      {
        self.expect("(")?;
        let spec = self.specifier()?;
        let indirection = self.pointers();
        self.expect(")")?;
        let size = Type::scalar(spec, indirection).size();
        return Ok(self.tree.add(Expr::number(size as i64)));
      }

      let expr = self.prefix_expression()?;
      return Ok(self.checker.check_sizeof(&mut self.tree, expr));
    }

    if self.stream.next_is("(") && is_specifier(self.stream.peek_next(), self.stream.source) {
      self.expect("(")?;
      let spec = self.specifier()?;
      let indirection = self.pointers();
      self.expect(")")?;
      let expr = self.prefix_expression()?;
      return Ok(
        self
          .checker
          .check_cast(&mut self.tree, Type::scalar(spec, indirection), expr),
      );
    }

    self.postfix_expression()
  }

  fn multiplicative_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.prefix_expression()?;

    loop {
      if self.stream.accept("*") {
        let right = self.prefix_expression()?;
        left = self.checker.check_multiply(&mut self.tree, left, right);
      } else if self.stream.accept("/") {
        let right = self.prefix_expression()?;
        left = self.checker.check_divide(&mut self.tree, left, right);
      } else if self.stream.accept("%") {
        let right = self.prefix_expression()?;
        left = self.checker.check_remainder(&mut self.tree, left, right);
      } else {
        break;
      }
    }

    Ok(left)
  }

  fn additive_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.multiplicative_expression()?;

    loop {
      if self.stream.accept("+") {
        let right = self.multiplicative_expression()?;
        left = self.checker.check_add(&mut self.tree, left, right);
      } else if self.stream.accept("-") {
        let right = self.multiplicative_expression()?;
        left = self.checker.check_subtract(&mut self.tree, left, right);
      } else {
        break;
      }
    }

    Ok(left)
  }

  /// Simple C has no shift operators, so relational sits directly on
  /// additive.
  fn relational_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.additive_expression()?;

    loop {
      if self.stream.accept("<") {
        let right = self.additive_expression()?;
        left = self.checker.check_less_than(&mut self.tree, left, right);
      } else if self.stream.accept(">") {
        let right = self.additive_expression()?;
        left = self.checker.check_greater_than(&mut self.tree, left, right);
      } else if self.stream.accept("<=") {
        let right = self.additive_expression()?;
        left = self.checker.check_less_or_equal(&mut self.tree, left, right);
      } else if self.stream.accept(">=") {
        let right = self.additive_expression()?;
        left = self
          .checker
          .check_greater_or_equal(&mut self.tree, left, right);
      } else {
        break;
      }
    }

    Ok(left)
  }

  fn equality_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.relational_expression()?;

    loop {
      if self.stream.accept("==") {
        let right = self.relational_expression()?;
        left = self.checker.check_equal(&mut self.tree, left, right);
      } else if self.stream.accept("!=") {
        let right = self.relational_expression()?;
        left = self.checker.check_not_equal(&mut self.tree, left, right);
      } else {
        break;
      }
    }

    Ok(left)
  }

  fn logical_and_expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.equality_expression()?;

    while self.stream.accept("&&") {
      let right = self.equality_expression()?;
      left = self.checker.check_logical_and(&mut self.tree, left, right);
    }

    Ok(left)
  }

  /// expression: logical-or, since Simple C has neither comma nor
  /// assignment expressions.
  fn expression(&mut self) -> CompileResult<ExprId> {
    let mut left = self.logical_and_expression()?;

    while self.stream.accept("||") {
      let right = self.logical_and_expression()?;
      left = self.checker.check_logical_or(&mut self.tree, left, right);
    }

    Ok(left)
  }

  // ----- Statements -----

  /// A statement sequence ends at the closing brace of its block.
  fn statements(&mut self) -> CompileResult<Vec<Stmt>> {
    let mut stmts = Vec::new();

    while !self.stream.next_is("}") {
      stmts.push(self.statement()?);
    }

    Ok(stmts)
  }

  /// assignment: expression = expression | expression
  fn assignment(&mut self) -> CompileResult<Stmt> {
    let expr = self.expression()?;

    if self.stream.accept("=") {
      let right = self.expression()?;
      return Ok(self.checker.check_assignment(&mut self.tree, expr, right));
    }

    Ok(Stmt::Simple(expr))
  }

  fn statement(&mut self) -> CompileResult<Stmt> {
    if self.stream.accept("{") {
      self.checker.open_scope();
      self.declarations()?;
      let stmts = self.statements()?;
      let scope = self.checker.close_scope();
      self.expect("}")?;
      return Ok(Stmt::Block { scope, stmts });
    }

    if self.stream.accept("break") {
      let stmt = self.checker.check_break(self.loop_depth);
      self.expect(";")?;
      return Ok(stmt);
    }

    if self.stream.accept("return") {
      let expr = self.expression()?;
      let return_type = self.return_type.clone();
      let stmt = self.checker.check_return(&mut self.tree, expr, &return_type);
      self.expect(";")?;
      return Ok(stmt);
    }

    if self.stream.accept("while") {
      self.expect("(")?;
      let cond = self.expression()?;
      let cond = self.checker.check_test(&mut self.tree, cond);
      self.expect(")")?;

      self.loop_depth += 1;
      let body = self.statement()?;
      self.loop_depth -= 1;

      return Ok(Stmt::While {
        cond,
        body: Box::new(body),
      });
    }

    if self.stream.accept("for") {
      self.expect("(")?;
      let init = self.assignment()?;
      self.expect(";")?;
      let cond = self.expression()?;
      let cond = self.checker.check_test(&mut self.tree, cond);
      self.expect(";")?;
      let incr = self.assignment()?;
      self.expect(")")?;

      self.loop_depth += 1;
      let body = self.statement()?;
      self.loop_depth -= 1;

      return Ok(Stmt::For {
        init: Box::new(init),
        cond,
        incr: Box::new(incr),
        body: Box::new(body),
      });
    }

    if self.stream.accept("if") {
      self.expect("(")?;
      let cond = self.expression()?;
      let cond = self.checker.check_test(&mut self.tree, cond);
      self.expect(")")?;
      let then = self.statement()?;

      if !self.stream.accept("else") {
        return Ok(Stmt::If {
          cond,
          then: Box::new(then),
          otherwise: None,
        });
      }

      let otherwise = self.statement()?;
      return Ok(Stmt::If {
        cond,
        then: Box::new(then),
        otherwise: Some(Box::new(otherwise)),
      });
    }

    let stmt = self.assignment()?;
    self.expect(";")?;
    Ok(stmt)
  }

  // ----- Functions and globals -----

  /// parameter: specifier pointers identifier
  fn parameter(&mut self) -> CompileResult<Type> {
    let spec = self.specifier()?;
    let indirection = self.pointers();
    let name = self.identifier()?;

    let ty = Type::scalar(spec, indirection);
    self.checker.declare_variable(&name, ty.clone());
    Ok(ty)
  }

  /// parameters: void | parameter-list | parameter-list , ...
  fn parameters(&mut self) -> CompileResult<Parameters> {
    let mut params = Parameters::default();

    if self.stream.accept("void") {
      return Ok(params);
    }

    params.types.push(self.parameter()?);

    while self.stream.accept(",") {
      if self.stream.accept("...") {
        params.variadic = true;
        break;
      }
      params.types.push(self.parameter()?);
    }

    Ok(params)
  }

  /// global-declarator: pointers identifier [ ( parameters ) | [ num ] ]
  fn global_declarator(&mut self, spec: Specifier) -> CompileResult<()> {
    let indirection = self.pointers();
    let name = self.identifier()?;

    if self.stream.accept("(") {
      self.checker.open_scope();
      let params = self.parameters()?;
      self
        .checker
        .declare_function(&name, Type::function(spec, indirection, params));
      self.checker.close_scope();
      self.expect(")")?;
    } else if self.stream.accept("[") {
      let length = self.number()?;
      self
        .checker
        .declare_variable(&name, Type::array(spec, indirection, length as u64));
      self.expect("]")?;
    } else {
      self
        .checker
        .declare_variable(&name, Type::scalar(spec, indirection));
    }

    Ok(())
  }

  /// A top-level item: either a function definition, which is compiled on
  /// the spot, or a list of global declarators.
  fn function_or_global(&mut self) -> CompileResult<()> {
    let spec = self.specifier()?;
    let indirection = self.pointers();
    let name = self.identifier()?;

    if self.stream.accept("(") {
      self.checker.open_scope();
      let params = self.parameters()?;
      self.expect(")")?;

      if self.stream.next_is("{") {
        self.return_type = Type::scalar(spec, indirection);
        let symbol = self
          .checker
          .define_function(&name, Type::function(spec, indirection, params));

        self.expect("{")?;
        self.declarations()?;
        let stmts = self.statements()?;
        let scope = self.checker.close_scope();
        self.expect("}")?;

        let function = Function {
          symbol,
          body: Stmt::Block { scope, stmts },
        };

        if self.checker.reporter.count() == 0 {
          let mut generator = Generator::new(
            &mut self.tree,
            &mut self.checker.symbols,
            &mut self.labels,
            &mut self.out,
          );
          generator.generate_function(&function);
        }

        return Ok(());
      }

      self
        .checker
        .declare_function(&name, Type::function(spec, indirection, params));
      self.checker.close_scope();
    } else if self.stream.accept("[") {
      let length = self.number()?;
      self
        .checker
        .declare_variable(&name, Type::array(spec, indirection, length as u64));
      self.expect("]")?;
    } else {
      self
        .checker
        .declare_variable(&name, Type::scalar(spec, indirection));
    }

    while self.stream.accept(",") {
      self.global_declarator(spec)?;
    }

    self.expect(";")
  }
}

/// Lightweight cursor over the token vector. The vector is always
/// terminated by an `Eof` token, and the cursor never advances past it.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    debug_assert!(matches!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof)));
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn peek(&self) -> &Token {
    &self.tokens[self.pos.min(self.tokens.len() - 1)]
  }

  /// One token past the lookahead, for the cast/sizeof ambiguity.
  fn peek_next(&self) -> &Token {
    &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)]
  }

  fn kind(&self) -> TokenKind {
    self.peek().kind
  }

  fn text(&self) -> &'a str {
    token_text(self.peek(), self.source)
  }

  fn advance(&mut self) {
    if self.pos + 1 < self.tokens.len() {
      self.pos += 1;
    }
  }

  fn next_is(&self, symbol: &str) -> bool {
    let token = self.peek();
    matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword)
      && token_text(token, self.source) == symbol
  }

  fn accept(&mut self, symbol: &str) -> bool {
    if self.next_is(symbol) {
      self.advance();
      true
    } else {
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::compile;

  #[test]
  fn syntax_errors_name_the_offending_lexeme() {
    let err = compile("int main(void { return 0; }").unwrap_err();
    assert_eq!(err.to_string(), "syntax error at '{'");

    let err = compile("int x").unwrap_err();
    assert_eq!(err.to_string(), "syntax error at end of file");

    let err = compile("int f() { return 0; }").unwrap_err();
    assert_eq!(err.to_string(), "syntax error at ')'");
  }

  #[test]
  fn an_empty_translation_unit_is_fine() {
    let compilation = compile("").unwrap();
    assert!(compilation.assembly.is_empty());
    assert!(compilation.diagnostics.is_empty());
  }

  #[test]
  fn sizeof_a_type_folds_to_a_constant() {
    let asm = compile("int main(void) { return sizeof(long); }\n")
      .unwrap()
      .assembly;
    assert!(asm.contains("\tmovl\t$8, %eax"));

    let asm = compile("int main(void) { return sizeof(char **); }\n")
      .unwrap()
      .assembly;
    assert!(asm.contains("\tmovl\t$8, %eax"));
  }

  #[test]
  fn sizeof_an_expression_uses_its_type() {
    let source = "int main(void) { char buffer[12]; return sizeof buffer; }\n";
    let asm = compile(source).unwrap().assembly;
    assert!(asm.contains("\tmovl\t$12, %eax"));
  }

  #[test]
  fn character_literals_become_numbers() {
    let asm = compile("int main(void) { return 'A'; }\n").unwrap().assembly;
    assert!(asm.contains("\tmovl\t$65, %eax"));

    let asm = compile("int main(void) { return '\\n'; }\n").unwrap().assembly;
    assert!(asm.contains("\tmovl\t$10, %eax"));
  }

  #[test]
  fn global_declarator_lists_declare_everything() {
    let compilation = compile("int a, *b, c[3];\n").unwrap();
    assert!(compilation.diagnostics.is_empty());
    assert!(compilation.assembly.contains("\t.comm\ta, 4"));
    assert!(compilation.assembly.contains("\t.comm\tb, 8"));
    assert!(compilation.assembly.contains("\t.comm\tc, 12"));
  }

  #[test]
  fn conflicting_declarations_are_diagnosed() {
    let compilation = compile("int f(void);\nlong f(void);\n").unwrap();
    assert_eq!(compilation.diagnostics, ["conflicting types for 'f'"]);

    let compilation =
      compile("int f(void) { return 0; }\nint f(void) { return 1; }\n").unwrap();
    assert_eq!(compilation.diagnostics, ["redefinition of 'f'"]);
  }

  #[test]
  fn matching_redeclarations_are_silent() {
    let source = "int f(int x);\nint f(int x);\nint main(void) { return f(1); }\n";
    let compilation = compile(source).unwrap();
    assert!(compilation.diagnostics.is_empty());
  }

  #[test]
  fn local_scopes_shadow_and_release() {
    let source = "int main(void) {\n\
                  int x;\n\
                  x = 1;\n\
                  { long x; x = 2; }\n\
                  return x;\n\
                  }\n";
    let compilation = compile(source).unwrap();
    assert!(compilation.diagnostics.is_empty());
    // outer int lives at -4, inner long below it
    assert!(compilation.assembly.contains("\tmovl\t%eax, -4(%rbp)"));
    assert!(compilation.assembly.contains("\tmovq\t%rax, -12(%rbp)"));
  }

  #[test]
  fn cast_expressions_parse_prefix_tight() {
    let source = "int main(void) { long l; l = (long) 3; return (int) l; }\n";
    let compilation = compile(source).unwrap();
    assert!(compilation.diagnostics.is_empty());
  }

  #[test]
  fn test_expressions_must_be_scalar() {
    let source = "int f(void);\nint main(void) { while (f) return 1; return 0; }\n";
    let compilation = compile(source).unwrap();
    assert_eq!(compilation.diagnostics, ["scalar type required in statement"]);
  }

  #[test]
  fn undeclared_use_recovers_quietly() {
    let source = "int main(void) { y = y + 1; return y; }\n";
    let compilation = compile(source).unwrap();
    assert_eq!(compilation.diagnostics, ["'y' undeclared"]);
    assert!(compilation.assembly.is_empty());
  }
}
