//! Syntax tree produced by the parser and consumed by the code generator.
//!
//! The node set is closed: every construct of the language is one variant of
//! [`Node`], and each node exclusively owns its children.

/// Number of argument-passing registers, and so the most arguments a call
/// (or parameters a definition) may have.
pub const MAX_ARGS: usize = 6;

/// Binary operators. `>` and `>=` never appear here; the parser rewrites
/// them into `Lt`/`Le` with swapped operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Eq,
  Ne,
  Lt,
  Le,
}

/// A local variable reference. Also the only valid assignment target, which
/// is why `Node::Assign` holds one directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lvar {
  pub name: String,
}

/// One call argument, tagged with its zero-based position. The position
/// selects the argument-passing register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Farg {
  pub index: usize,
  pub value: Node,
}

/// A `def` function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fdef {
  pub name: String,
  pub params: Vec<String>,
  pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
  Num {
    value: i64,
  },
  Lvar(Lvar),
  Assign {
    lhs: Lvar,
    rhs: Box<Node>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Node>,
    rhs: Box<Node>,
  },
  If {
    cond: Box<Node>,
    then: Box<Node>,
    els: Option<Box<Node>>,
  },
  Return {
    value: Option<Box<Node>>,
  },
  Block {
    body: Vec<Node>,
  },
  Fcall {
    name: String,
    args: Vec<Farg>,
  },
  Fdef(Fdef),
}

impl Node {
  pub fn number(value: i64) -> Self {
    Self::Num { value }
  }

  pub fn var(name: impl Into<String>) -> Self {
    Self::Lvar(Lvar { name: name.into() })
  }

  pub fn binary(op: BinaryOp, lhs: Node, rhs: Node) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn assign(lhs: Lvar, rhs: Node) -> Self {
    Self::Assign {
      lhs,
      rhs: Box::new(rhs),
    }
  }

  pub fn if_else(cond: Node, then: Node, els: Option<Node>) -> Self {
    Self::If {
      cond: Box::new(cond),
      then: Box::new(then),
      els: els.map(Box::new),
    }
  }

  pub fn ret(value: Option<Node>) -> Self {
    Self::Return {
      value: value.map(Box::new),
    }
  }

  pub fn block(body: Vec<Node>) -> Self {
    Self::Block { body }
  }

  /// Build a call, tagging each argument with its position.
  pub fn call(name: impl Into<String>, args: Vec<Node>) -> Self {
    Self::Fcall {
      name: name.into(),
      args: args
        .into_iter()
        .enumerate()
        .map(|(index, value)| Farg { index, value })
        .collect(),
    }
  }

  /// Whether this node leaves a value on the evaluation stack when generated.
  pub fn is_expr(&self) -> bool {
    matches!(
      self,
      Self::Num { .. } | Self::Lvar(_) | Self::Assign { .. } | Self::Binary { .. } | Self::Fcall { .. }
    )
  }
}
