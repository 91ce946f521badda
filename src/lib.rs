//! Crate root: wires together the compilation pipeline.
//!
//! Compilation is one forward pass over the source:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and drives the `checker`, the
//!   `allocator`, and the `generator` as it goes, so each function is
//!   emitted the moment its closing brace is consumed.
//! - `error` centralises the fatal errors and the diagnostic sink shared by
//!   the other modules.
//!
//! Semantic problems do not abort the pass; they are collected as
//! diagnostics and suppress code generation for the functions they taint.

pub mod allocator;
pub mod ast;
pub mod checker;
pub mod error;
pub mod generator;
pub mod label;
pub mod machine;
pub mod parser;
pub mod register;
pub mod scope;
pub mod tokenizer;
pub mod types;

pub use error::{CompileError, CompileResult};

/// Result of compiling one translation unit: the generated assembly and any
/// semantic diagnostics collected along the way.
#[derive(Debug)]
pub struct Compilation {
  pub assembly: String,
  pub diagnostics: Vec<String>,
}

/// Compile a Simple C source string into AT&T x86-64 assembly.
pub fn compile(source: &str) -> CompileResult<Compilation> {
  let tokens = tokenizer::tokenize(source)?;
  parser::translation_unit(tokens, source)
}
