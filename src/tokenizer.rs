//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about grammar beyond recognising keywords,
//! punctuators, identifiers and numeric literals. Keywords are matched before
//! identifiers, and multi-character punctuators before single-character ones.

use std::fmt;

use snafu::OptionExt as _;

use crate::error::{CompileResult, TokenizeSnafu};

/// Punctuators, longest first so `<=` is never split into `<` and `=`.
const PUNCTUATORS: [&str; 17] = [
  "==", "!=", "<=", ">=", "<", ">", "=", "{", "}", "(", ")", ";", ",", "+", "-", "*", "/",
];

/// Words that tokenize as `Reserved` rather than `Ident`.
const RESERVED_WORDS: [&str; 3] = ["if", "else", "def"];

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  Reserved(&'static str),
  Ident(String),
  Num(i64),
  Return,
  Eof,
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Reserved(symbol) => f.write_str(symbol),
      Self::Ident(name) => f.write_str(name),
      Self::Num(value) => write!(f, "{value}"),
      Self::Return => f.write_str("return"),
      Self::Eof => f.write_str("EOF"),
    }
  }
}

/// A token plus the source span it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  pub fn new(kind: TokenKind, loc: usize, len: usize) -> Self {
    Self { kind, loc, len }
  }

  /// True if this is the given reserved symbol or word.
  pub fn is(&self, symbol: &str) -> bool {
    matches!(self.kind, TokenKind::Reserved(s) if s == symbol)
  }
}

/// Lex the input into a flat vector of tokens terminated by an `Eof` marker.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  let mut tokens = Vec::new();
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let text = &input[start..i];
      let value = text.parse::<i64>().ok().context(TokenizeSnafu { text, loc: start })?;
      tokens.push(Token::new(TokenKind::Num(value), start, i - start));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let word = &input[start..i];
      let kind = if word == "return" {
        TokenKind::Return
      } else if let Some(reserved) = RESERVED_WORDS.into_iter().find(|w| *w == word) {
        TokenKind::Reserved(reserved)
      } else {
        TokenKind::Ident(word.to_string())
      };
      tokens.push(Token::new(kind, start, i - start));
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Reserved(op), i, op.len()));
      i += op.len();
      continue;
    }

    let text = input[i..].chars().next().map(String::from).unwrap_or_default();
    return TokenizeSnafu { text, loc: i }.fail();
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0));
  Ok(tokens)
}
