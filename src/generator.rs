//! Code generation: lower checked functions into AT&T x86-64 assembly.
//!
//! The emitter walks each expression once, leaving its value in a register
//! and recording the pairing in the register file. When the pool runs dry a
//! register's current occupant is spilled to a fresh stack slot and found
//! again later through its recorded offset. Statements drive the walk and
//! must leave the register file empty, which `generate_stmt` asserts after
//! every one. All global declarations are emitted after the function
//! bodies, followed by the string literals of the translation unit.

use crate::allocator;
use crate::ast::{ExprId, ExprKind, Function, Stmt, Tree};
use crate::label::{Label, LabelSource};
use crate::machine::{
  GLOBAL_PREFIX, GLOBAL_SUFFIX, NUM_PARAM_REGS, PARAM_ALIGNMENT, SIZEOF_REG, STACK_ALIGNMENT,
};
use crate::register::{self, Reg, RegisterFile, PARAMETERS};
use crate::scope::{SymbolId, SymbolTable};
use crate::types::Type;

/// Opcode suffix for an operand size in bytes.
fn suffix(size: u64) -> &'static str {
  match size {
    1 => "b",
    4 => "l",
    8 => "q",
    _ => panic!("no operand size suffix for {size} bytes"),
  }
}

/// Bytes of padding needed to bring `offset` to the stack alignment.
fn align_pad(offset: i64) -> i64 {
  if offset % STACK_ALIGNMENT == 0 {
    0
  } else {
    STACK_ALIGNMENT - offset.abs() % STACK_ALIGNMENT
  }
}

/// Final frame size: the spill depth rounded up to the stack alignment,
/// with one alignment unit as the floor.
fn frame_size(bytes: i64) -> i64 {
  let aligned = (bytes + STACK_ALIGNMENT - 1) / STACK_ALIGNMENT * STACK_ALIGNMENT;
  aligned.max(STACK_ALIGNMENT)
}

/// Per-function emitter. Borrows the expression tree and symbol table so it
/// can annotate nodes with registers and spill slots as it goes.
pub struct Generator<'a> {
  tree: &'a mut Tree,
  symbols: &'a mut SymbolTable,
  labels: &'a mut LabelSource,
  out: &'a mut String,
  regs: RegisterFile,
  offset: i64,
  funcname: String,
  loop_exits: Vec<Label>,
}

impl<'a> Generator<'a> {
  pub fn new(
    tree: &'a mut Tree,
    symbols: &'a mut SymbolTable,
    labels: &'a mut LabelSource,
    out: &'a mut String,
  ) -> Self {
    Self {
      tree,
      symbols,
      labels,
      out,
      regs: RegisterFile::new(),
      offset: 0,
      funcname: String::new(),
      loop_exits: Vec::new(),
    }
  }

  fn emit(&mut self, line: String) {
    self.out.push_str(&line);
    self.out.push('\n');
  }

  fn assign(&mut self, expr: Option<ExprId>, reg: Option<Reg>) {
    self.regs.assign(self.tree, expr, reg);
  }

  /// The assembly operand of an expression: its register if it has one,
  /// else its own addressable location, else the slot it was spilled to.
  fn operand(&self, id: ExprId) -> String {
    let expr = &self.tree[id];
    if let Some(reg) = expr.reg {
      return self.regs.name(reg, expr.ty.size()).to_string();
    }

    match &expr.kind {
      ExprKind::Number { value } => format!("${value}"),
      ExprKind::String { label, .. } => label.to_string(),
      ExprKind::Identifier { symbol } => {
        let symbol = self.symbols.symbol(*symbol);
        if symbol.offset == 0 {
          format!("{GLOBAL_PREFIX}{}{GLOBAL_SUFFIX}", symbol.name())
        } else {
          format!("{}(%rbp)", symbol.offset)
        }
      }
      _ => {
        debug_assert!(expr.offset != 0, "expression has no operand location");
        format!("{}(%rbp)", expr.offset)
      }
    }
  }

  /// Move an expression into a specific register, spilling the current
  /// occupant to a fresh stack slot first. `None` empties the register.
  fn load(&mut self, expr: Option<ExprId>, reg: Reg) {
    if self.regs.node(reg) == expr {
      return;
    }

    if let Some(old) = self.regs.node(reg) {
      let size = self.tree[old].ty.size();
      self.offset -= size as i64;
      self.tree[old].offset = self.offset;
      let name = self.regs.name(reg, size);
      self.emit(format!("\tmov{}\t{}, {}(%rbp)", suffix(size), name, self.offset));
    }

    if let Some(e) = expr {
      let size = self.tree[e].ty.size();
      let src = self.operand(e);
      let dst = self.regs.name(reg, size);
      self.emit(format!("\tmov{}\t{}, {}", suffix(size), src, dst));
    }

    self.assign(expr, Some(reg));
  }

  /// First free register, spilling `rax` when the pool is exhausted.
  fn getreg(&mut self) -> Reg {
    match self.regs.first_free() {
      Some(reg) => reg,
      None => {
        self.load(None, register::RAX);
        register::RAX
      }
    }
  }

  fn ensure_loaded(&mut self, id: ExprId) -> Reg {
    match self.tree[id].reg {
      Some(reg) => reg,
      None => {
        let reg = self.getreg();
        self.load(Some(id), reg);
        reg
      }
    }
  }

  // ----- Expressions -----

  fn generate_expr(&mut self, id: ExprId) {
    match &self.tree[id].kind {
      // Leaves are addressable as-is; consumers load them on demand.
      ExprKind::Number { .. } | ExprKind::String { .. } | ExprKind::Identifier { .. } => {}

      ExprKind::Call { callee, args } => {
        let callee = *callee;
        let args = args.clone();
        self.generate_call(id, callee, args);
      }

      &ExprKind::Not { operand } => {
        self.generate_expr(operand);
        let reg = self.ensure_loaded(operand);
        let size = self.tree[operand].ty.size();
        let op = self.operand(operand);
        self.emit(format!("\tcmp{}\t$0, {}", suffix(size), op));
        self.emit(format!("\tsete\t{}", self.regs.byte(reg)));
        self.emit(format!(
          "\tmovzbl\t{}, {}",
          self.regs.byte(reg),
          self.regs.name(reg, 4)
        ));
        self.assign(Some(id), Some(reg));
      }

      &ExprKind::Negate { operand } => {
        self.generate_expr(operand);
        let reg = self.ensure_loaded(operand);
        let size = self.tree[operand].ty.size();
        let op = self.operand(operand);
        self.emit(format!("\tneg{}\t{}", suffix(size), op));
        self.assign(Some(id), Some(reg));
      }

      &ExprKind::Dereference { operand } => {
        self.generate_expr(operand);
        let reg = self.ensure_loaded(operand);
        let size = self.tree[id].ty.size();
        self.emit(format!(
          "\tmov{}\t({}), {}",
          suffix(size),
          self.regs.name(reg, 8),
          self.regs.name(reg, size)
        ));
        self.assign(Some(id), Some(reg));
      }

      &ExprKind::Address { operand } => {
        // &*p is just p
        if let Some(pointer) = self.tree.as_dereference(operand) {
          self.generate_expr(pointer);
          let reg = self.ensure_loaded(pointer);
          self.assign(Some(id), Some(reg));
        } else {
          let reg = self.getreg();
          self.assign(Some(id), Some(reg));
          let target = self.operand(operand);
          self.emit(format!("\tleaq\t{}, {}", target, self.regs.name(reg, 8)));
        }
      }

      &ExprKind::Cast { operand } => {
        self.generate_expr(operand);
        let reg = self.ensure_loaded(operand);
        let from = self.tree[operand].ty.size();
        let to = self.tree[id].ty.size();
        if to > from {
          self.emit(format!(
            "\tmovs{}{}\t{}, {}",
            suffix(from),
            suffix(to),
            self.regs.name(reg, from),
            self.regs.name(reg, to)
          ));
        }
        self.assign(Some(id), Some(reg));
      }

      &ExprKind::Add { left, right } => self.generate_binary(id, left, right, "add"),
      &ExprKind::Subtract { left, right } => self.generate_binary(id, left, right, "sub"),
      &ExprKind::Multiply { left, right } => self.generate_binary(id, left, right, "imul"),

      &ExprKind::Divide { left, right } => {
        self.generate_division(id, left, right, register::RAX)
      }
      &ExprKind::Remainder { left, right } => {
        self.generate_division(id, left, right, register::RDX)
      }

      &ExprKind::LessThan { left, right } => self.generate_comparison(id, left, right, "setl"),
      &ExprKind::GreaterThan { left, right } => self.generate_comparison(id, left, right, "setg"),
      &ExprKind::LessOrEqual { left, right } => {
        self.generate_comparison(id, left, right, "setle")
      }
      &ExprKind::GreaterOrEqual { left, right } => {
        self.generate_comparison(id, left, right, "setge")
      }
      &ExprKind::Equal { left, right } => self.generate_comparison(id, left, right, "sete"),
      &ExprKind::NotEqual { left, right } => self.generate_comparison(id, left, right, "setne"),

      &ExprKind::LogicalAnd { left, right } => self.generate_logical(id, left, right, false),
      &ExprKind::LogicalOr { left, right } => self.generate_logical(id, left, right, true),
    }
  }

  /// add, sub, and imul share a shape: both sides generated, the left
  /// ensured in a register, one two-operand instruction, and the result
  /// inheriting the left's register.
  fn generate_binary(&mut self, id: ExprId, left: ExprId, right: ExprId, op: &str) {
    self.generate_expr(left);
    self.generate_expr(right);
    self.ensure_loaded(left);

    let size = self.tree[left].ty.size();
    let rhs = self.operand(right);
    let lhs = self.operand(left);
    self.emit(format!("\t{}{}\t{}, {}", op, suffix(size), rhs, lhs));

    self.assign(Some(right), None);
    let reg = self.tree[left].reg;
    self.assign(Some(id), reg);
  }

  /// idiv wants its dividend in rdx:rax and clobbers both, so the left
  /// operand is forced into rax, rdx is vacated, and a homeless right
  /// operand lands in rcx. The quotient and the remainder differ only in
  /// which register holds the result.
  fn generate_division(&mut self, id: ExprId, left: ExprId, right: ExprId, result: Reg) {
    self.generate_expr(left);
    self.generate_expr(right);

    self.load(Some(left), register::RAX);
    self.load(None, register::RDX);
    if self.tree[right].reg.is_none() {
      self.load(Some(right), register::RCX);
    }

    if self.tree[left].ty.size() == 8 {
      self.emit("\tcqto".to_string());
    } else {
      self.emit("\tcltd".to_string());
    }

    let size = self.tree[right].ty.size();
    let rhs = self.operand(right);
    self.emit(format!("\tidiv{}\t{}", suffix(size), rhs));

    self.assign(Some(right), None);
    self.assign(Some(left), None);
    self.assign(Some(id), Some(result));
  }

  fn generate_comparison(&mut self, id: ExprId, left: ExprId, right: ExprId, set: &str) {
    self.generate_expr(left);
    self.generate_expr(right);
    self.ensure_loaded(left);

    let size = self.tree[left].ty.size();
    let rhs = self.operand(right);
    let lhs = self.operand(left);
    self.emit(format!("\tcmp{}\t{}, {}", suffix(size), rhs, lhs));

    self.assign(Some(left), None);
    self.assign(Some(right), None);

    let reg = self.getreg();
    self.emit(format!("\t{}\t{}", set, self.regs.byte(reg)));
    self.emit(format!(
      "\tmovzb{}\t{}, {}",
      suffix(size),
      self.regs.byte(reg),
      self.regs.name(reg, size)
    ));
    self.assign(Some(id), Some(reg));
  }

  /// Short-circuit && and ||: both operands branch to a shared label
  /// through `test`, and the fall-through path materializes the opposite
  /// constant.
  fn generate_logical(&mut self, id: ExprId, left: ExprId, right: ExprId, short_on_true: bool) {
    let short = self.labels.fresh();
    let done = self.labels.fresh();

    self.test(left, short, short_on_true);
    self.test(right, short, short_on_true);

    let reg = self.getreg();
    let fall_through = if short_on_true { 0 } else { 1 };
    self.emit(format!("\tmovl\t${}, {}", fall_through, self.regs.name(reg, 4)));
    self.emit(format!("\tjmp\t{done}"));
    self.emit(format!("{short}:"));
    self.emit(format!("\tmovl\t${}, {}", 1 - fall_through, self.regs.name(reg, 4)));
    self.emit(format!("{done}:"));
    self.assign(Some(id), Some(reg));
  }

  /// The System V conventions do not say what happens to byte arguments;
  /// gcc and clang sign extend to 32 bits and clang relies on it, so we do
  /// the same.
  fn sign_extend_byte_arg(&mut self, arg: ExprId) {
    if self.tree[arg].ty.size() == 1 {
      let op = self.operand(arg);
      let reg = self.tree[arg].reg;
      if let Some(reg) = reg {
        self.emit(format!("\tmovsbl\t{}, {}", op, self.regs.name(reg, 4)));
      }
    }
  }

  /// Function call: arguments are evaluated right to left, the first six
  /// travel in the parameter registers and the rest are pushed (with
  /// padding to keep the stack 16-byte aligned at the call). Every
  /// register is spilled before the call since the callee may clobber all
  /// of them, and a variadic callee is told that no vector registers are
  /// in use.
  fn generate_call(&mut self, id: ExprId, callee: SymbolId, args: Vec<ExprId>) {
    for &arg in args.iter().rev() {
      self.generate_expr(arg);
    }

    let mut num_bytes = 0;
    if args.len() > NUM_PARAM_REGS {
      num_bytes = align_pad((args.len() - NUM_PARAM_REGS) as i64 * PARAM_ALIGNMENT);
      if num_bytes > 0 {
        self.emit(format!("\tsubq\t${num_bytes}, %rsp"));
      }
    }

    for i in (0..args.len()).rev() {
      if i >= NUM_PARAM_REGS {
        num_bytes += PARAM_ALIGNMENT;
        self.load(Some(args[i]), register::RAX);
        self.sign_extend_byte_arg(args[i]);
        self.emit("\tpushq\t%rax".to_string());
      } else {
        self.load(Some(args[i]), PARAMETERS[i]);
        self.sign_extend_byte_arg(args[i]);
      }
      self.assign(Some(args[i]), None);
    }

    let pool: Vec<Reg> = self.regs.all().collect();
    for reg in pool {
      self.load(None, reg);
    }

    let symbol = self.symbols.symbol(callee);
    let name = symbol.name().to_string();
    let variadic = matches!(
      symbol.ty(),
      Type::Function { parameters, .. } if parameters.variadic
    );
    if variadic {
      self.emit("\tmovl\t$0, %eax".to_string());
    }

    self.emit(format!("\tcall\t{GLOBAL_PREFIX}{name}"));
    if num_bytes > 0 {
      self.emit(format!("\taddq\t${num_bytes}, %rsp"));
    }

    self.assign(Some(id), Some(register::RAX));
  }

  /// Branch on an expression: compare against zero and jump to `label`
  /// when the truth value matches `if_true`.
  fn test(&mut self, id: ExprId, label: Label, if_true: bool) {
    self.generate_expr(id);
    self.ensure_loaded(id);

    let size = self.tree[id].ty.size();
    let op = self.operand(id);
    self.emit(format!("\tcmp{}\t$0, {}", suffix(size), op));
    self.emit(format!("\t{}\t{}", if if_true { "jne" } else { "je" }, label));
    self.assign(Some(id), None);
  }

  // ----- Statements -----

  fn generate_stmt(&mut self, stmt: &Stmt) {
    match stmt {
      Stmt::Block { stmts, .. } => {
        for stmt in stmts {
          self.generate_stmt(stmt);
          assert!(self.regs.all_free(), "register leaked across a statement");
        }
      }

      Stmt::Simple(expr) => {
        self.generate_expr(*expr);
        self.assign(Some(*expr), None);
      }

      Stmt::Assignment { left, right } => {
        self.generate_expr(*right);

        if let Some(pointer) = self.tree.as_dereference(*left) {
          self.generate_expr(pointer);
          let preg = self.ensure_loaded(pointer);
          self.ensure_loaded(*right);

          let size = self.tree[*right].ty.size();
          let src = self.operand(*right);
          self.emit(format!(
            "\tmov{}\t{}, ({})",
            suffix(size),
            src,
            self.regs.name(preg, 8)
          ));

          self.assign(Some(*right), None);
          self.assign(Some(pointer), None);
        } else {
          self.ensure_loaded(*right);

          let size = self.tree[*right].ty.size();
          let src = self.operand(*right);
          let dst = self.operand(*left);
          self.emit(format!("\tmov{}\t{}, {}", suffix(size), src, dst));

          self.assign(Some(*right), None);
          self.assign(Some(*left), None);
        }
      }

      Stmt::Return { expr } => {
        self.generate_expr(*expr);
        self.load(Some(*expr), register::RAX);
        self.emit(format!("\tjmp\t{}.exit", self.funcname));
        self.assign(Some(*expr), None);
      }

      Stmt::Break => {
        let Some(&exit) = self.loop_exits.last() else {
          panic!("break outside a loop survived checking");
        };
        self.emit(format!("\tjmp\t{exit}"));
      }

      Stmt::While { cond, body } => {
        let top = self.labels.fresh();
        let exit = self.labels.fresh();

        self.emit(format!("{top}:"));
        self.test(*cond, exit, false);

        self.loop_exits.push(exit);
        self.generate_stmt(body);
        self.loop_exits.pop();

        self.emit(format!("\tjmp\t{top}"));
        self.emit(format!("{exit}:"));
      }

      Stmt::For {
        init,
        cond,
        incr,
        body,
      } => {
        self.generate_stmt(init);

        let top = self.labels.fresh();
        let exit = self.labels.fresh();

        self.emit(format!("{top}:"));
        self.test(*cond, exit, false);

        self.loop_exits.push(exit);
        self.generate_stmt(body);
        self.loop_exits.pop();

        self.generate_stmt(incr);
        self.emit(format!("\tjmp\t{top}"));
        self.emit(format!("{exit}:"));
      }

      Stmt::If {
        cond,
        then,
        otherwise,
      } => match otherwise {
        None => {
          let end = self.labels.fresh();
          self.test(*cond, end, false);
          self.generate_stmt(then);
          self.emit(format!("{end}:"));
        }
        Some(otherwise) => {
          let else_label = self.labels.fresh();
          let end = self.labels.fresh();
          self.test(*cond, else_label, false);
          self.generate_stmt(then);
          self.emit(format!("\tjmp\t{end}"));
          self.emit(format!("{else_label}:"));
          self.generate_stmt(otherwise);
          self.emit(format!("{end}:"));
        }
      },
    }
  }

  // ----- Functions -----

  /// Emit one function: run the allocator, write the prologue, spill the
  /// register parameters into their frame slots, generate the body, and
  /// close with the epilogue and the frame-size directive (which can only
  /// be computed once spilling is done).
  pub fn generate_function(&mut self, func: &Function) {
    let param_offset = 2 * SIZEOF_REG;
    self.offset = param_offset;
    allocator::allocate_function(func, self.symbols, &mut self.offset);

    let symbol = self.symbols.symbol(func.symbol);
    self.funcname = symbol.name().to_string();
    let param_count = symbol.ty().parameters().types.len();

    self.emit(format!("{GLOBAL_PREFIX}{}:", self.funcname));
    self.emit("\tpushq\t%rbp".to_string());
    self.emit("\tmovq\t%rsp, %rbp".to_string());
    self.emit(format!("\tmovl\t${}.size, %eax", self.funcname));
    self.emit("\tsubq\t%rax, %rsp".to_string());

    let Stmt::Block { scope, .. } = &func.body else {
      panic!("function body must be a block");
    };
    let params: Vec<SymbolId> = self
      .symbols
      .scope_symbols(*scope)
      .iter()
      .copied()
      .take(param_count.min(NUM_PARAM_REGS))
      .collect();
    for (i, &param) in params.iter().enumerate() {
      let symbol = self.symbols.symbol(param);
      let size = symbol.ty().size();
      let offset = symbol.offset;
      let src = self.regs.name(PARAMETERS[i], size);
      self.emit(format!("\tmov{}\t{}, {}(%rbp)", suffix(size), src, offset));
    }

    self.generate_stmt(&func.body);

    self.emit(String::new());
    self.emit(format!("{GLOBAL_PREFIX}{}.exit:", self.funcname));
    self.emit("\tmovq\t%rbp, %rsp".to_string());
    self.emit("\tpopq\t%rbp".to_string());
    self.emit("\tret".to_string());
    self.emit(String::new());

    let frame = frame_size(-self.offset);
    self.emit(format!("\t.set\t{}.size, {}", self.funcname, frame));
    self.emit(format!("\t.globl\t{GLOBAL_PREFIX}{}", self.funcname));
    self.emit(String::new());
  }
}

/// Emit a `.comm` directive for every non-function symbol of the global
/// scope.
pub fn generate_globals(symbols: &SymbolTable, out: &mut String) {
  let scope = symbols.global_scope();
  for &id in symbols.scope_symbols(scope) {
    let symbol = symbols.symbol(id);
    if !symbol.ty().is_function() {
      out.push_str(&format!(
        "\t.comm\t{}{}, {}\n",
        GLOBAL_PREFIX,
        symbol.name(),
        symbol.ty().size()
      ));
    }
  }
}

/// Emit the deduplicated string literals of the translation unit.
pub fn generate_strings(strings: &[(Label, String)], out: &mut String) {
  if strings.is_empty() {
    return;
  }
  out.push_str("\t.data\n");
  for (label, value) in strings {
    out.push_str(&format!("{label}:\t.asciz\t\"{}\"\n", escape(value)));
  }
}

/// Re-escape a literal's bytes for the assembler.
fn escape(text: &str) -> String {
  let mut out = String::new();
  for &b in text.as_bytes() {
    match b {
      b'"' => out.push_str("\\\""),
      b'\\' => out.push_str("\\\\"),
      b'\n' => out.push_str("\\n"),
      b'\t' => out.push_str("\\t"),
      0x20..=0x7e => out.push(b as char),
      _ => out.push_str(&format!("\\{b:03o}")),
    }
  }
  out
}
