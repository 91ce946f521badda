//! The machine register pool and its links to expression nodes.
//!
//! Every general-purpose register can hold the value of at most one live
//! expression, and every expression sits in at most one register. The two
//! sides point at each other through indices, and `assign` is the only way
//! the links change, so the bijection cannot be broken piecemeal.

use crate::ast::{ExprId, Tree};

/// Index into the register pool. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg(usize);

pub const RAX: Reg = Reg(0);
pub const RDI: Reg = Reg(1);
pub const RSI: Reg = Reg(2);
pub const RDX: Reg = Reg(3);
pub const RCX: Reg = Reg(4);
pub const R8: Reg = Reg(5);
pub const R9: Reg = Reg(6);

/// Argument registers of the System V calling convention, in order.
pub const PARAMETERS: [Reg; 6] = [RDI, RSI, RDX, RCX, R8, R9];

#[derive(Debug)]
struct Register {
  qword: &'static str,
  dword: &'static str,
  byte: &'static str,
  node: Option<ExprId>,
}

/// The fixed pool. `rax` comes first so that `getreg`-style spilling always
/// victimizes it, and the six parameter registers follow in convention
/// order.
#[derive(Debug)]
pub struct RegisterFile {
  registers: [Register; 9],
}

impl RegisterFile {
  pub fn new() -> Self {
    let register = |qword, dword, byte| Register {
      qword,
      dword,
      byte,
      node: None,
    };
    Self {
      registers: [
        register("%rax", "%eax", "%al"),
        register("%rdi", "%edi", "%dil"),
        register("%rsi", "%esi", "%sil"),
        register("%rdx", "%edx", "%dl"),
        register("%rcx", "%ecx", "%cl"),
        register("%r8", "%r8d", "%r8b"),
        register("%r9", "%r9d", "%r9b"),
        register("%r10", "%r10d", "%r10b"),
        register("%r11", "%r11d", "%r11b"),
      ],
    }
  }

  /// Register name at the given operand size in bytes.
  pub fn name(&self, reg: Reg, size: u64) -> &'static str {
    let register = &self.registers[reg.0];
    match size {
      1 => register.byte,
      4 => register.dword,
      8 => register.qword,
      _ => panic!("no register name for operand size {size}"),
    }
  }

  pub fn byte(&self, reg: Reg) -> &'static str {
    self.registers[reg.0].byte
  }

  pub fn node(&self, reg: Reg) -> Option<ExprId> {
    self.registers[reg.0].node
  }

  /// First register not holding a node, in pool order.
  pub fn first_free(&self) -> Option<Reg> {
    self
      .registers
      .iter()
      .position(|register| register.node.is_none())
      .map(Reg)
  }

  pub fn all(&self) -> impl Iterator<Item = Reg> {
    (0..self.registers.len()).map(Reg)
  }

  pub fn all_free(&self) -> bool {
    self.registers.iter().all(|register| register.node.is_none())
  }

  /// Establish (or sever) the bidirectional expression/register link.
  /// Either side may be absent: `assign(Some(e), None)` detaches the
  /// expression, `assign(None, Some(r))` empties the register.
  pub fn assign(&mut self, tree: &mut Tree, expr: Option<ExprId>, reg: Option<Reg>) {
    if let Some(e) = expr {
      if let Some(old) = tree[e].reg {
        self.registers[old.0].node = None;
      }
      tree[e].reg = reg;
    }
    if let Some(r) = reg {
      if let Some(old) = self.registers[r.0].node {
        tree[old].reg = None;
      }
      self.registers[r.0].node = expr;
    }
  }
}
