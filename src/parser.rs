//! Recursive-descent parser producing the top-level node list.
//!
//! Each grammar rule is one helper, lowest precedence first:
//!
//! ```text
//! program    = statement*
//! statement  = "if" "(" expr ")" statement ("else" statement)?
//!            | block
//!            | function
//!            | expr ";"?
//! block      = "{" statement* "}"
//! function   = "def" ident "(" (ident ("," ident)*)? ")" block
//! expr       = "return" assign? | assign
//! assign     = equality ("=" (assign | block))?
//! equality   = relational ("==" relational | "!=" relational)*
//! relational = add ("<" add | "<=" add | ">" add | ">=" add)*
//! add        = mul ("+" mul | "-" mul)*
//! mul        = unary ("*" unary | "/" unary)*
//! unary      = ("+" | "-")? primary
//! primary    = num | ident ("(" (assign ("," assign)*)? ")")? | "(" expr ")"
//! ```
//!
//! Left-associative loops fold each new node back in as the next left operand.

use snafu::ensure;
use tracing::trace;

use crate::ast::{BinaryOp, Fdef, Lvar, MAX_ARGS, Node};
use crate::codegen::is_assembler_keyword;
use crate::error::{CompileError, CompileResult, ParseSnafu, UnconsumedTokensSnafu};
use crate::tokenizer::{Token, TokenKind};

/// Parse a token sequence into the program's top-level nodes.
///
/// Fails with `UnconsumedTokens` if parsing stops on a token that cannot
/// begin a statement before the `Eof` sentinel is reached.
pub fn parse(tokens: Vec<Token>) -> CompileResult<Vec<Node>> {
  let mut stream = TokenStream::new(tokens);
  let mut nodes = Vec::new();

  while !stream.is_eof() && stream.starts_statement() {
    nodes.push(parse_stmt(&mut stream)?);
  }

  if !stream.is_eof() {
    let rest = stream.remaining().to_vec();
    return UnconsumedTokensSnafu { nodes, rest }.fail();
  }

  Ok(nodes)
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Node> {
  if stream.equal("if") {
    return parse_if(stream);
  }

  if stream.peek().is("{") {
    return Ok(Node::block(parse_block(stream)?));
  }

  if stream.peek().is("def") {
    return parse_function(stream);
  }

  // The terminator is optional: `a = 1 b = 2` is two statements.
  let node = parse_expr(stream)?;
  stream.equal(";");
  Ok(node)
}

fn parse_if(stream: &mut TokenStream) -> CompileResult<Node> {
  stream.skip("(")?;
  let cond = parse_expr(stream)?;
  stream.skip(")")?;
  let then = parse_stmt(stream)?;
  let els = if stream.equal("else") {
    Some(parse_stmt(stream)?)
  } else {
    None
  };
  Ok(Node::if_else(cond, then, els))
}

fn parse_block(stream: &mut TokenStream) -> CompileResult<Vec<Node>> {
  stream.skip("{")?;
  let mut body = Vec::new();
  while !stream.equal("}") {
    if stream.is_eof() {
      return Err(stream.unexpected("\"}\""));
    }
    body.push(parse_stmt(stream)?);
  }
  Ok(body)
}

fn parse_function(stream: &mut TokenStream) -> CompileResult<Node> {
  stream.skip("def")?;
  let loc = stream.peek().loc;
  let name = stream.get_ident()?;
  ensure_symbol(&name, loc)?;
  stream.skip("(")?;

  let mut params: Vec<String> = Vec::new();
  if !stream.equal(")") {
    loop {
      let loc = stream.peek().loc;
      let param = stream.get_ident()?;
      ensure!(
        params.len() < MAX_ARGS,
        ParseSnafu {
          expected: format!("at most {MAX_ARGS} parameters"),
          found: param,
          loc,
        }
      );
      ensure!(
        !params.contains(&param),
        ParseSnafu {
          expected: "a distinct parameter name",
          found: param,
          loc,
        }
      );
      params.push(param);
      if !stream.equal(",") {
        break;
      }
    }
    stream.skip(")")?;
  }

  let body = parse_block(stream)?;
  trace!(%name, ?params, "parsed function definition");
  Ok(Node::Fdef(Fdef { name, params, body }))
}

fn parse_expr(stream: &mut TokenStream) -> CompileResult<Node> {
  if stream.peek().kind == TokenKind::Return {
    stream.advance();
    let value = if stream.starts_expr() {
      Some(parse_assign(stream)?)
    } else {
      None
    };
    return Ok(Node::ret(value));
  }

  parse_assign(stream)
}

fn parse_assign(stream: &mut TokenStream) -> CompileResult<Node> {
  let start = stream.peek().clone();
  let node = parse_equality(stream)?;

  if stream.equal("=") {
    let Node::Lvar(lhs) = node else {
      return ParseSnafu {
        expected: "a variable on the left of \"=\"",
        found: start.kind.to_string(),
        loc: start.loc,
      }
      .fail();
    };
    let rhs = if stream.peek().is("{") {
      Node::block(parse_block(stream)?)
    } else {
      parse_assign(stream)?
    };
    return Ok(Node::assign(lhs, rhs));
  }

  Ok(node)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_relational(stream)?;

  loop {
    let op = if stream.equal("==") {
      BinaryOp::Eq
    } else if stream.equal("!=") {
      BinaryOp::Ne
    } else {
      break;
    };

    let rhs = parse_relational(stream)?;
    node = Node::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_add(stream)?;

  loop {
    // `a > b` is stored as `b < a`, and `a >= b` as `b <= a`.
    node = if stream.equal("<") {
      Node::binary(BinaryOp::Lt, node, parse_add(stream)?)
    } else if stream.equal("<=") {
      Node::binary(BinaryOp::Le, node, parse_add(stream)?)
    } else if stream.equal(">") {
      Node::binary(BinaryOp::Lt, parse_add(stream)?, node)
    } else if stream.equal(">=") {
      Node::binary(BinaryOp::Le, parse_add(stream)?, node)
    } else {
      break;
    };
  }

  Ok(node)
}

fn parse_add(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_mul(stream)?;

  loop {
    let op = if stream.equal("+") {
      BinaryOp::Add
    } else if stream.equal("-") {
      BinaryOp::Sub
    } else {
      break;
    };

    let rhs = parse_mul(stream)?;
    node = Node::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_mul(stream: &mut TokenStream) -> CompileResult<Node> {
  let mut node = parse_unary(stream)?;

  loop {
    let op = if stream.equal("*") {
      BinaryOp::Mul
    } else if stream.equal("/") {
      BinaryOp::Div
    } else {
      break;
    };

    let rhs = parse_unary(stream)?;
    node = Node::binary(op, node, rhs);
  }

  Ok(node)
}

fn parse_unary(stream: &mut TokenStream) -> CompileResult<Node> {
  if stream.equal("+") {
    return parse_primary(stream);
  }

  if stream.equal("-") {
    let operand = parse_primary(stream)?;
    return Ok(Node::binary(BinaryOp::Sub, Node::number(0), operand));
  }

  parse_primary(stream)
}

/// Function names become bare assembler symbols, so they must not read as
/// registers or operand keywords.
fn ensure_symbol(name: &str, loc: usize) -> CompileResult<()> {
  ensure!(
    !is_assembler_keyword(name),
    ParseSnafu {
      expected: "a function name that is not an assembler keyword",
      found: name,
      loc,
    }
  );
  Ok(())
}

fn parse_primary(stream: &mut TokenStream) -> CompileResult<Node> {
  if stream.equal("(") {
    let node = parse_expr(stream)?;
    stream.skip(")")?;
    return Ok(node);
  }

  if let TokenKind::Ident(_) = stream.peek().kind {
    let loc = stream.peek().loc;
    let name = stream.get_ident()?;
    if stream.equal("(") {
      ensure_symbol(&name, loc)?;
      let args = parse_call_args(stream)?;
      return Ok(Node::call(name, args));
    }
    return Ok(Node::Lvar(Lvar { name }));
  }

  if let TokenKind::Num(value) = stream.peek().kind {
    stream.advance();
    return Ok(Node::number(value));
  }

  Err(stream.unexpected("an expression"))
}

/// Arguments after the opening parenthesis, up to and including `)`.
fn parse_call_args(stream: &mut TokenStream) -> CompileResult<Vec<Node>> {
  let mut args = Vec::new();
  if stream.equal(")") {
    return Ok(args);
  }

  loop {
    if args.len() == MAX_ARGS {
      return Err(stream.unexpected(format!("at most {MAX_ARGS} arguments")));
    }
    args.push(parse_assign(stream)?);
    if !stream.equal(",") {
      break;
    }
  }
  stream.skip(")")?;
  Ok(args)
}

/// Cursor over the token vector. The vector always ends in `Eof`, and the
/// cursor never moves past it.
struct TokenStream {
  tokens: Vec<Token>,
  pos: usize,
}

impl TokenStream {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(mut tokens: Vec<Token>) -> Self {
    if tokens.last().map(|t| &t.kind) != Some(&TokenKind::Eof) {
      let loc = tokens.last().map(|t| t.loc + t.len).unwrap_or(0);
      tokens.push(Token::new(TokenKind::Eof, loc, 0));
    }
    Self { tokens, pos: 0 }
  }

  fn peek(&self) -> &Token {
    &self.tokens[self.pos]
  }

  fn remaining(&self) -> &[Token] {
    &self.tokens[self.pos..]
  }

  fn advance(&mut self) {
    if !self.is_eof() {
      self.pos += 1;
    }
  }

  /// Consume the current token if it is the given reserved symbol or word.
  fn equal(&mut self, op: &str) -> bool {
    if self.peek().is(op) {
      self.advance();
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.unexpected(format!("\"{s}\"")))
    }
  }

  /// Parse the current token as an identifier returning its name and location.
  fn get_ident(&mut self) -> CompileResult<String> {
    if let TokenKind::Ident(name) = &self.peek().kind {
      let name = name.clone();
      self.advance();
      return Ok(name);
    }
    Err(self.unexpected("an identifier"))
  }

  fn unexpected(&self, expected: impl Into<String>) -> CompileError {
    let token = self.peek();
    ParseSnafu {
      expected,
      found: token.kind.to_string(),
      loc: token.loc,
    }
    .build()
  }

  fn starts_expr(&self) -> bool {
    let token = self.peek();
    match token.kind {
      TokenKind::Num(_) | TokenKind::Ident(_) => true,
      TokenKind::Reserved(_) => ["(", "+", "-"].iter().any(|op| token.is(op)),
      TokenKind::Return | TokenKind::Eof => false,
    }
  }

  fn starts_statement(&self) -> bool {
    self.starts_expr()
      || self.peek().kind == TokenKind::Return
      || ["{", "if", "def"].iter().any(|op| self.peek().is(op))
  }

  fn is_eof(&self) -> bool {
    self.peek().kind == TokenKind::Eof
  }
}
