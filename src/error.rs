//! Shared error taxonomy used across the compilation pipeline.
//!
//! Every stage reports through [`CompileError`]. Source-anchored variants
//! carry a byte offset; [`CompileError::render`] turns that into a
//! chibicc-style diagnostic with a caret under the offending character.

use snafu::Snafu;

use crate::ast::Node;
use crate::tokenizer::Token;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  /// A substring that matches no lexical rule.
  #[snafu(display("invalid token: '{text}'"))]
  Tokenize { text: String, loc: usize },

  /// The parser expected one kind of token and found another.
  #[snafu(display("expected {expected}, but got \"{found}\""))]
  Parse {
    expected: String,
    found: String,
    loc: usize,
  },

  /// Parsing stopped before the `Eof` sentinel was reached.
  #[snafu(display(
    "unexpected token \"{}\" after {} statement(s)",
    rest.first().map(|t| t.kind.to_string()).unwrap_or_else(|| "EOF".to_string()),
    nodes.len()
  ))]
  UnconsumedTokens { nodes: Vec<Node>, rest: Vec<Token> },

  #[snafu(display("function '{name}' takes {expected} argument(s), but {found} were given"))]
  ArityMismatch {
    name: String,
    expected: usize,
    found: usize,
  },

  #[snafu(display("function '{name}' is defined more than once"))]
  DuplicateFunction { name: String },

  /// The generator met an AST shape the parser never produces.
  #[snafu(display("internal error: {message}"))]
  Internal { message: String },
}

impl CompileError {
  /// Byte offset in the source this error points at, if any.
  pub fn loc(&self) -> Option<usize> {
    match self {
      Self::Tokenize { loc, .. } | Self::Parse { loc, .. } => Some(*loc),
      Self::UnconsumedTokens { rest, .. } => rest.first().map(|t| t.loc),
      Self::ArityMismatch { .. } | Self::DuplicateFunction { .. } | Self::Internal { .. } => None,
    }
  }

  /// Format the error against the source it came from.
  ///
  /// Located errors quote the source and place a caret beneath the failing
  /// character; everything else is just the message.
  pub fn render(&self, source: &str) -> String {
    let Some(loc) = self.loc() else {
      return self.to_string();
    };
    let expr_line = format!("'{source}'");
    let safe_loc = loc.min(source.len());
    let char_offset = source
      .get(..safe_loc)
      .map(|prefix| prefix.chars().count())
      .unwrap_or(safe_loc)
      + 1; // account for opening quote
    let marker = format!("{}^", " ".repeat(char_offset));
    format!("{expr_line}\n{marker} {self}")
  }
}
