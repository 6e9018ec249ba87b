//! Crate root: wires together the compilation pipeline.
//!
//! The stages run strictly in sequence, each consuming the previous stage's
//! complete output:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the top-level nodes.
//! - `codegen` lowers those nodes into x86-64 Intel-syntax assembly.
//! - `error` centralises the error taxonomy and diagnostic rendering.
//!
//! The intermediate tokens and AST are public values so tooling can inspect
//! them; the pipeline itself only logs them at `debug` level.

pub mod ast;
pub mod error;
pub mod parser;
pub mod tokenizer;

mod codegen;

use tracing::{debug, info};

pub use ast::Node;
pub use error::{CompileError, CompileResult};
pub use parser::parse;
pub use tokenizer::{Token, TokenKind, tokenize};

/// Lower a parsed program into one assembly listing.
pub fn generate(program: &[Node]) -> CompileResult<String> {
  codegen::generate(program)
}

/// Compile a source string into Intel-syntax assembly.
pub fn compile(source: &str) -> CompileResult<String> {
  let tokens = tokenize(source)?;
  debug!(?tokens, "tokenized");
  let program = parse(tokens)?;
  debug!(?program, "parsed");
  let asm = generate(&program)?;
  info!(
    statements = program.len(),
    lines = asm.lines().count(),
    "compiled"
  );
  Ok(asm)
}
