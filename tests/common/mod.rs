//! A tiny interpreter for the Intel-syntax subset the compiler emits, so
//! tests can check what a listing computes rather than how it is spelled.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail, ensure};

/// Initial stack pointer; 16-byte aligned before the fake return address.
const STACK_TOP: i64 = 0x7fff_0000;
/// Return address pushed for `main`; returning to it halts the machine.
const HALT: i64 = -1;
const STEP_LIMIT: usize = 1_000_000;
/// Whatever the loader left in `rax`; a listing must not leak it as a result.
const STALE_RAX: i64 = 0x5eed;

enum Operand {
  Reg(String),
  Mem { base: String, offset: i64 },
  Imm(i64),
}

fn parse_operand(text: &str) -> Result<Operand> {
  if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
    let (base, offset) = match inner.split_once('-') {
      Some((base, offset)) => (base, -offset.parse::<i64>()?),
      None => (inner, 0),
    };
    return Ok(Operand::Mem {
      base: base.to_string(),
      offset,
    });
  }
  if let Ok(value) = text.parse::<i64>() {
    return Ok(Operand::Imm(value));
  }
  Ok(Operand::Reg(text.to_string()))
}

#[derive(Default)]
struct Machine {
  regs: HashMap<String, i64>,
  mem: HashMap<i64, i64>,
  cmp: (i64, i64),
  calls: usize,
}

impl Machine {
  fn reg(&self, name: &str) -> i64 {
    match name {
      "al" => self.reg("rax") & 0xff,
      _ => self.regs.get(name).copied().unwrap_or(0),
    }
  }

  fn set_reg(&mut self, name: &str, value: i64) {
    match name {
      "al" => {
        let rax = self.reg("rax");
        self.regs.insert("rax".into(), (rax & !0xff) | (value & 0xff));
      }
      _ => {
        self.regs.insert(name.to_string(), value);
      }
    }
  }

  fn read(&self, operand: &Operand) -> i64 {
    match operand {
      Operand::Reg(name) => self.reg(name),
      Operand::Mem { base, offset } => {
        let addr = self.reg(base) + offset;
        self.mem.get(&addr).copied().unwrap_or(0)
      }
      Operand::Imm(value) => *value,
    }
  }

  fn write(&mut self, operand: &Operand, value: i64) -> Result<()> {
    match operand {
      Operand::Reg(name) => self.set_reg(name, value),
      Operand::Mem { base, offset } => {
        let addr = self.reg(base) + offset;
        self.mem.insert(addr, value);
      }
      Operand::Imm(_) => bail!("cannot write to an immediate"),
    }
    Ok(())
  }

  fn push(&mut self, value: i64) {
    let rsp = self.reg("rsp") - 8;
    self.set_reg("rsp", rsp);
    self.mem.insert(rsp, value);
  }

  fn pop(&mut self) -> i64 {
    let rsp = self.reg("rsp");
    self.set_reg("rsp", rsp + 8);
    self.mem.get(&rsp).copied().unwrap_or(0)
  }
}

/// Outcome of running a listing.
pub struct Run {
  /// `rax` when `main` returned.
  pub value: i64,
  /// Number of `call` instructions executed.
  pub calls: usize,
}

/// Execute `main` from an assembly listing and return its result.
///
/// Fails on unknown instructions, calls to undefined labels, and calls made
/// with a stack pointer that is not 16-byte aligned.
pub fn run(asm: &str) -> Result<Run> {
  let mut code: Vec<&str> = Vec::new();
  let mut labels: HashMap<&str, usize> = HashMap::new();
  for raw in asm.lines() {
    let line = raw.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
      continue;
    }
    if let Some(label) = line.strip_suffix(':') {
      ensure!(labels.insert(label, code.len()).is_none(), "duplicate label {label}");
      continue;
    }
    if line.starts_with('.') {
      continue;
    }
    code.push(line);
  }

  let target = |name: &str| -> Result<usize> {
    labels
      .get(name)
      .copied()
      .with_context(|| format!("undefined label {name}"))
  };

  let mut m = Machine::default();
  m.set_reg("rsp", STACK_TOP);
  m.set_reg("rax", STALE_RAX);
  m.push(HALT);
  let mut pc = target("main")?;

  for _ in 0..STEP_LIMIT {
    let line = *code.get(pc).with_context(|| format!("fell off the end at {pc}"))?;
    pc += 1;
    let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
    let args = if rest.is_empty() {
      Vec::new()
    } else {
      rest.split(", ").map(parse_operand).collect::<Result<Vec<_>>>()?
    };
    let arg = |i: usize| args.get(i).with_context(|| format!("missing operand in {line:?}"));

    match op {
      "push" => {
        let value = m.read(arg(0)?);
        m.push(value);
      }
      "pop" => {
        let value = m.pop();
        m.write(arg(0)?, value)?;
      }
      "mov" | "movzb" => {
        let value = m.read(arg(1)?);
        let value = if op == "movzb" { value & 0xff } else { value };
        m.write(arg(0)?, value)?;
      }
      "add" | "sub" | "imul" => {
        let (lhs, rhs) = (m.read(arg(0)?), m.read(arg(1)?));
        let value = match op {
          "add" => lhs.wrapping_add(rhs),
          "sub" => lhs.wrapping_sub(rhs),
          _ => lhs.wrapping_mul(rhs),
        };
        m.write(arg(0)?, value)?;
      }
      "cqo" => {
        let sign = if m.reg("rax") < 0 { -1 } else { 0 };
        m.set_reg("rdx", sign);
      }
      "idiv" => {
        let divisor = m.read(arg(0)?);
        ensure!(divisor != 0, "division by zero");
        let dividend = m.reg("rax");
        m.set_reg("rax", dividend.wrapping_div(divisor));
        m.set_reg("rdx", dividend.wrapping_rem(divisor));
      }
      "cmp" => m.cmp = (m.read(arg(0)?), m.read(arg(1)?)),
      "sete" | "setne" | "setl" | "setle" => {
        let (lhs, rhs) = m.cmp;
        let flag = match op {
          "sete" => lhs == rhs,
          "setne" => lhs != rhs,
          "setl" => lhs < rhs,
          _ => lhs <= rhs,
        };
        m.write(arg(0)?, i64::from(flag))?;
      }
      "je" => {
        if m.cmp.0 == m.cmp.1 {
          pc = target(rest)?;
        }
      }
      "jmp" => pc = target(rest)?,
      "call" => {
        ensure!(m.reg("rsp") % 16 == 0, "misaligned stack at call {rest}");
        m.calls += 1;
        m.push(pc as i64);
        pc = target(rest)?;
      }
      "ret" => {
        let addr = m.pop();
        if addr == HALT {
          return Ok(Run {
            value: m.reg("rax"),
            calls: m.calls,
          });
        }
        pc = usize::try_from(addr)?;
      }
      _ => return Err(anyhow!("unknown instruction {line:?}")),
    }
  }

  bail!("step limit exceeded")
}

/// Compile `source` and run it, returning `main`'s result.
pub fn eval(source: &str) -> Result<i64> {
  let asm = ninecc::compile(source).map_err(|err| anyhow!(err.render(source)))?;
  Ok(run(&asm)?.value)
}
