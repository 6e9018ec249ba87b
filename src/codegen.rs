//! Code generation: lower the parsed AST into Intel-syntax x86-64 assembly.
//!
//! The emitter is a simple stack machine: every expression leaves a single
//! value on the stack, binary operators pop the right operand then the left,
//! and statements pop intermediate results as we chain them. Locals live on
//! the stack frame and are addressed relative to `rbp`.
//!
//! Top-level statements become the body of a synthetic `main`; every `def`
//! is hoisted and emitted after it as its own function.

use std::collections::HashMap;

use snafu::{OptionExt as _, ensure};
use tracing::trace;

use crate::ast::{BinaryOp, Farg, Fdef, Lvar, MAX_ARGS, Node};
use crate::error::{ArityMismatchSnafu, CompileResult, DuplicateFunctionSnafu, InternalSnafu};

/// Registers carrying the first six call arguments, in position order.
const ARG_REGS: [&str; MAX_ARGS] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

const ENTRY: &str = "main";

/// Words GAS reads as size keywords or operators in `.intel_syntax noprefix`.
const OPERAND_KEYWORDS: [&str; 29] = [
  "byte", "word", "dword", "fword", "qword", "tbyte", "oword", "xmmword", "ymmword", "zmmword",
  "ptr", "offset", "short", "near", "far", "flat", "and", "or", "not", "xor", "mod", "shl", "shr",
  "eq", "ne", "lt", "le", "gt", "ge",
];

/// Registers spelled without a numeric index.
const NAMED_REGISTERS: [&str; 22] = [
  "al", "ah", "bl", "bh", "cl", "ch", "dl", "dh", "sil", "dil", "bpl", "spl", "rip", "eip", "ip",
  "st", "cs", "ds", "es", "fs", "gs", "ss",
];

/// `ax`-family bases, also valid behind an `e` or `r` prefix.
const WIDE_BASES: [&str; 8] = ["ax", "bx", "cx", "dx", "si", "di", "bp", "sp"];

/// Whether `name` would be read as a register or operator rather than a
/// label if emitted as a bare symbol, as in `call rax`.
pub(crate) fn is_assembler_keyword(name: &str) -> bool {
  let name = name.to_ascii_lowercase();
  let name = name.as_str();

  let wide = WIDE_BASES.contains(&name)
    || name
      .strip_prefix(['r', 'e'])
      .is_some_and(|base| WIDE_BASES.contains(&base));
  // r8 through r15, optionally sized with d/w/b/l.
  let numbered = name
    .strip_prefix('r')
    .map(|rest| rest.trim_end_matches(['d', 'w', 'b', 'l']))
    .and_then(|index| index.parse::<u8>().ok())
    .is_some_and(|index| (8..=15).contains(&index));
  // Vector, x87, mask, control and debug registers.
  let indexed = ["xmm", "ymm", "zmm", "mm", "st", "cr", "dr", "k"]
    .iter()
    .filter_map(|prefix| name.strip_prefix(prefix))
    .any(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()));

  OPERAND_KEYWORDS.contains(&name) || NAMED_REGISTERS.contains(&name) || wide || numbered || indexed
}

/// Emit the full assembly listing for a program.
pub fn generate(program: &[Node]) -> CompileResult<String> {
  let mut defs = Vec::new();
  let mut calls = Vec::new();
  collect_symbols(program, &mut defs, &mut calls);

  let mut signatures = HashMap::new();
  for def in defs.iter().copied() {
    ensure!(
      def.name != ENTRY && signatures.insert(def.name.as_str(), def.params.len()).is_none(),
      DuplicateFunctionSnafu { name: &def.name }
    );
  }

  // The parser rejects these names; an AST built by hand may not have been.
  let names = defs.iter().map(|def| def.name.as_str());
  let mut names = names.chain(calls.iter().map(|&(name, _)| name));
  if let Some(name) = names.find(|name| is_assembler_keyword(name)) {
    return InternalSnafu {
      message: format!("function name '{name}' collides with an assembler keyword"),
    }
    .fail();
  }

  // Every call in the unit is checked, including ones that are never emitted.
  for (name, found) in calls {
    if let Some(&expected) = signatures.get(name) {
      ensure!(
        expected == found,
        ArityMismatchSnafu {
          name,
          expected,
          found,
        }
      );
    }
  }

  let mut codegen = Codegen::new();
  let mut asm = String::new();
  asm.push_str(".intel_syntax noprefix\n");
  asm.push_str(&format!(".global {ENTRY}\n"));

  codegen.emit_function(ENTRY, &[], program, &mut asm)?;
  for def in defs {
    codegen.emit_function(&def.name, &def.params, &def.body, &mut asm)?;
  }

  Ok(asm)
}

/// Gather every `def` and every call (name, argument count) in source
/// order, wherever they are nested.
fn collect_symbols<'a>(
  nodes: &'a [Node],
  defs: &mut Vec<&'a Fdef>,
  calls: &mut Vec<(&'a str, usize)>,
) {
  for node in nodes {
    collect_symbols_in(node, defs, calls);
  }
}

fn collect_symbols_in<'a>(
  node: &'a Node,
  defs: &mut Vec<&'a Fdef>,
  calls: &mut Vec<(&'a str, usize)>,
) {
  match node {
    Node::Num { .. } | Node::Lvar(_) => {}
    Node::Assign { rhs, .. } => collect_symbols_in(rhs, defs, calls),
    Node::Binary { lhs, rhs, .. } => {
      collect_symbols_in(lhs, defs, calls);
      collect_symbols_in(rhs, defs, calls);
    }
    Node::If { cond, then, els } => {
      collect_symbols_in(cond, defs, calls);
      collect_symbols_in(then, defs, calls);
      if let Some(els) = els {
        collect_symbols_in(els, defs, calls);
      }
    }
    Node::Return { value } => {
      if let Some(value) = value {
        collect_symbols_in(value, defs, calls);
      }
    }
    Node::Block { body } => collect_symbols(body, defs, calls),
    Node::Fcall { name, args } => {
      calls.push((name, args.len()));
      for arg in args {
        collect_symbols_in(&arg.value, defs, calls);
      }
    }
    Node::Fdef(def) => {
      defs.push(def);
      collect_symbols(&def.body, defs, calls);
    }
  }
}

/// What the statement driver should do after emitting a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
  Next,
  /// Control has left the function; remaining siblings are not emitted.
  Return,
}

/// Mutable state for one generation pass.
struct Codegen {
  /// Variable name to its frame offset. Offsets are never reused.
  locals: HashMap<String, usize>,
  /// Source of `.L.else.N` / `.L.end.N` label numbers.
  label_count: usize,
  /// Values currently pushed on the evaluation stack.
  depth: usize,
  /// Function being emitted, for its return label.
  current: String,
}

impl Codegen {
  fn new() -> Self {
    Self {
      locals: HashMap::new(),
      label_count: 0,
      depth: 0,
      current: String::new(),
    }
  }

  fn emit_function(
    &mut self,
    name: &str,
    params: &[String],
    body: &[Node],
    asm: &mut String,
  ) -> CompileResult<()> {
    ensure!(
      params.len() <= MAX_ARGS,
      InternalSnafu {
        message: format!("'{name}' has {} parameters", params.len()),
      }
    );
    self.current = name.to_string();
    self.depth = 0;

    // Falling off the end of a body with no expression statement returns 0.
    let mut text = String::from("  mov rax, 0\n");
    for (param, reg) in params.iter().zip(ARG_REGS) {
      let offset = self.offset_of(param);
      text.push_str(&format!("  mov [rbp-{offset}], {reg} # {param}\n"));
    }
    self.emit_block(body, &mut text)?;

    ensure!(
      self.depth == 0,
      InternalSnafu {
        message: format!("{} value(s) left on the stack in '{name}'", self.depth),
      }
    );

    // Every slot seen so far fits in the frame; round to keep calls aligned.
    let stack_size = align_to(self.locals.len() * 8, 16);
    trace!(%name, stack_size, "emitted function");

    asm.push_str(&format!("{name}:\n"));
    asm.push_str("  push rbp\n");
    asm.push_str("  mov rbp, rsp\n");
    if stack_size > 0 {
      asm.push_str(&format!("  sub rsp, {stack_size}\n"));
    }
    asm.push_str(&text);
    asm.push_str(&format!(".L.return.{name}:\n"));
    asm.push_str("  mov rsp, rbp\n");
    asm.push_str("  pop rbp\n");
    asm.push_str("  ret\n");
    Ok(())
  }

  /// Emit statements in order, stopping after the first `return`.
  fn emit_block(&mut self, body: &[Node], asm: &mut String) -> CompileResult<Flow> {
    for stmt in body {
      if self.emit_stmt(stmt, asm)? == Flow::Return {
        return Ok(Flow::Return);
      }
    }
    Ok(Flow::Next)
  }

  /// Emit one statement, leaving the stack as it found it. An expression
  /// statement's value ends up in `rax`.
  fn emit_stmt(&mut self, node: &Node, asm: &mut String) -> CompileResult<Flow> {
    match node {
      // Hoisted; emitted as a separate function.
      Node::Fdef(_) => Ok(Flow::Next),
      Node::Block { body } => self.emit_block(body, asm),
      Node::If { cond, then, els } => self.emit_if(cond, then, els.as_deref(), asm),
      Node::Return { value } => {
        match value {
          Some(value) => {
            self.emit_expr(value, asm)?;
            self.pop(asm, "rax");
          }
          None => asm.push_str("  mov rax, 0\n"),
        }
        asm.push_str(&format!("  jmp .L.return.{}\n", self.current));
        Ok(Flow::Return)
      }
      _ => {
        self.emit_expr(node, asm)?;
        self.pop(asm, "rax");
        Ok(Flow::Next)
      }
    }
  }

  fn emit_if(
    &mut self,
    cond: &Node,
    then: &Node,
    els: Option<&Node>,
    asm: &mut String,
  ) -> CompileResult<Flow> {
    let n = self.label_count;
    self.label_count += 1;

    self.emit_expr(cond, asm)?;
    self.pop(asm, "rax");
    asm.push_str("  cmp rax, 0\n");
    asm.push_str(&format!("  je .L.else.{n}\n"));
    let then_flow = self.emit_stmt(then, asm)?;
    asm.push_str(&format!("  jmp .L.end.{n}\n"));
    asm.push_str(&format!(".L.else.{n}:\n"));
    let else_flow = match els {
      Some(els) => self.emit_stmt(els, asm)?,
      None => Flow::Next,
    };
    asm.push_str(&format!(".L.end.{n}:\n"));

    if then_flow == Flow::Return && else_flow == Flow::Return {
      Ok(Flow::Return)
    } else {
      Ok(Flow::Next)
    }
  }

  /// Emit stack-based code for a node used as a value: exactly one push.
  fn emit_expr(&mut self, node: &Node, asm: &mut String) -> CompileResult<()> {
    match node {
      Node::Num { value } => {
        if i32::try_from(*value).is_ok() {
          self.push(asm, &value.to_string());
        } else {
          asm.push_str(&format!("  mov rax, {value}\n"));
          self.push(asm, "rax");
        }
      }
      Node::Lvar(lvar) => {
        self.emit_addr(lvar, asm);
        self.pop(asm, "rax");
        asm.push_str("  mov rax, [rax]\n");
        self.push(asm, "rax");
      }
      Node::Assign { lhs, rhs } => {
        self.emit_addr(lhs, asm);
        self.emit_expr(rhs, asm)?;
        self.pop(asm, "rdi");
        self.pop(asm, "rax");
        asm.push_str("  mov [rax], rdi\n");
        self.push(asm, "rdi");
      }
      Node::Binary { op, lhs, rhs } => {
        self.emit_expr(lhs, asm)?;
        self.emit_expr(rhs, asm)?;
        self.pop(asm, "rdi");
        self.pop(asm, "rax");
        match op {
          BinaryOp::Add => asm.push_str("  add rax, rdi\n"),
          BinaryOp::Sub => asm.push_str("  sub rax, rdi\n"),
          BinaryOp::Mul => asm.push_str("  imul rax, rdi\n"),
          BinaryOp::Div => {
            asm.push_str("  cqo\n");
            asm.push_str("  idiv rdi\n");
          }
          BinaryOp::Eq => emit_compare("sete", asm),
          BinaryOp::Ne => emit_compare("setne", asm),
          BinaryOp::Lt => emit_compare("setl", asm),
          BinaryOp::Le => emit_compare("setle", asm),
        }
        self.push(asm, "rax");
      }
      Node::Fcall { name, args } => self.emit_call(name, args, asm)?,
      Node::Block { body } => self.emit_block_value(body, asm)?,
      // Statements in value position yield 0. After a `return` the push is
      // unreachable but keeps the depth count consistent.
      Node::If { .. } | Node::Return { .. } | Node::Fdef(_) => {
        self.emit_stmt(node, asm)?;
        self.push(asm, "0");
      }
    }
    Ok(())
  }

  /// A block used as a value, as in `a = { ... }`: the last statement's value,
  /// or 0 if the block does not end in an expression.
  fn emit_block_value(&mut self, body: &[Node], asm: &mut String) -> CompileResult<()> {
    let Some((last, init)) = body.split_last() else {
      self.push(asm, "0");
      return Ok(());
    };

    if self.emit_block(init, asm)? == Flow::Return {
      self.push(asm, "0");
      return Ok(());
    }

    if last.is_expr() {
      self.emit_expr(last, asm)
    } else {
      self.emit_stmt(last, asm)?;
      self.push(asm, "0");
      Ok(())
    }
  }

  fn emit_call(&mut self, name: &str, args: &[Farg], asm: &mut String) -> CompileResult<()> {
    for arg in args {
      self.emit_expr(&arg.value, asm)?;
    }
    // Last argument is on top; each goes to the register its index names.
    for arg in args.iter().rev() {
      let reg = ARG_REGS.get(arg.index).context(InternalSnafu {
        message: format!("argument index {} of '{name}' has no register", arg.index),
      })?;
      self.pop(asm, reg);
    }

    asm.push_str("  mov rax, 0\n");
    if self.depth % 2 == 0 {
      asm.push_str(&format!("  call {name}\n"));
    } else {
      asm.push_str("  sub rsp, 8\n");
      asm.push_str(&format!("  call {name}\n"));
      asm.push_str("  add rsp, 8\n");
    }
    self.push(asm, "rax");
    Ok(())
  }

  /// Push the frame address of a variable, allocating its slot on first use.
  fn emit_addr(&mut self, lvar: &Lvar, asm: &mut String) {
    let offset = self.offset_of(&lvar.name);
    asm.push_str("  mov rax, rbp\n");
    asm.push_str(&format!("  sub rax, {offset} # {}\n", lvar.name));
    self.push(asm, "rax");
  }

  fn offset_of(&mut self, name: &str) -> usize {
    let next = (self.locals.len() + 1) * 8;
    *self.locals.entry(name.to_string()).or_insert(next)
  }

  fn push(&mut self, asm: &mut String, operand: &str) {
    asm.push_str(&format!("  push {operand}\n"));
    self.depth += 1;
  }

  fn pop(&mut self, asm: &mut String, reg: &str) {
    asm.push_str(&format!("  pop {reg}\n"));
    self.depth = self.depth.saturating_sub(1);
  }
}

fn emit_compare(set: &str, asm: &mut String) {
  asm.push_str("  cmp rax, rdi\n");
  asm.push_str(&format!("  {set} al\n"));
  asm.push_str("  movzb rax, al\n");
}

fn align_to(n: usize, align: usize) -> usize {
  n.div_ceil(align) * align
}
