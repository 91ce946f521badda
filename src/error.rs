//! Shared error utilities used across the compilation pipeline.
//!
//! Two kinds of failure exist. Lexical and syntactic errors are fatal and
//! travel as `CompileError` values up to the driver. Semantic problems are
//! recoverable: they are handed to a `Reporter`, which records the message
//! and keeps a running count so code generation can be suppressed for
//! functions that failed to check.

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
pub enum CompileError {
  #[snafu(display("syntax error at '{lexeme}'"))]
  Syntax { lexeme: String },

  #[snafu(display("syntax error at end of file"))]
  SyntaxAtEof,

  #[snafu(display("{line}:{column}: {message}"))]
  Lexical {
    line: usize,
    column: usize,
    message: String,
  },
}

impl CompileError {
  /// Construct a lexical error anchored at a byte offset in the source.
  pub fn lexical(source: &str, loc: usize, message: impl Into<String>) -> Self {
    let safe_loc = loc.min(source.len());
    let line = source[..safe_loc].bytes().filter(|&b| b == b'\n').count() + 1;
    let column = source[..safe_loc]
      .rfind('\n')
      .map(|start| safe_loc - start)
      .unwrap_or(safe_loc + 1);
    Self::Lexical {
      line,
      column,
      message: message.into(),
    }
  }
}

/// Sink for semantic diagnostics. Reported messages never abort the pass;
/// they accumulate here and are drained by the driver.
#[derive(Debug, Default)]
pub struct Reporter {
  diagnostics: Vec<String>,
}

impl Reporter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn report(&mut self, message: impl Into<String>) {
    self.diagnostics.push(message.into());
  }

  /// Number of diagnostics reported so far.
  pub fn count(&self) -> usize {
    self.diagnostics.len()
  }

  pub fn diagnostics(&self) -> &[String] {
    &self.diagnostics
  }

  pub fn into_diagnostics(self) -> Vec<String> {
    self.diagnostics
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn syntax_error_names_the_lexeme() {
    let err = CompileError::Syntax {
      lexeme: "}".to_string(),
    };
    assert_eq!(err.to_string(), "syntax error at '}'");
    assert_eq!(
      CompileError::SyntaxAtEof.to_string(),
      "syntax error at end of file"
    );
  }

  #[test]
  fn lexical_error_locates_line_and_column() {
    let source = "int x;\nint @;\n";
    let err = CompileError::lexical(source, source.find('@').unwrap(), "invalid token: '@'");
    assert_eq!(err.to_string(), "2:5: invalid token: '@'");
  }

  #[test]
  fn reporter_counts_messages() {
    let mut reporter = Reporter::new();
    assert_eq!(reporter.count(), 0);
    reporter.report("redefinition of 'f'");
    reporter.report("'x' undeclared");
    assert_eq!(reporter.count(), 2);
    assert_eq!(reporter.diagnostics()[1], "'x' undeclared");
  }
}
