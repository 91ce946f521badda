//! Storage allocation: assigning frame offsets to every symbol.
//!
//! The walk runs once per function, just before code generation. The first
//! six parameters receive negative offsets (they arrive in registers and
//! are spilled by the prologue); any further parameters already live above
//! the saved base pointer and return address, so they get ascending
//! positive offsets starting at 16. Locals grow downward from zero, and
//! sibling statements restore the running offset so their variables can
//! share stack space; the most negative offset reached becomes the frame
//! size.

use crate::ast::{Function, Stmt};
use crate::machine::{NUM_PARAM_REGS, PARAM_ALIGNMENT};
use crate::scope::SymbolTable;

/// Lay out the parameters of a function and then its body. `offset` must
/// start at the offset of the first stack parameter (two saved registers
/// past the base pointer) and ends at the lowest offset used.
pub fn allocate_function(func: &Function, symbols: &mut SymbolTable, offset: &mut i64) {
  let Stmt::Block { scope, .. } = &func.body else {
    panic!("function body must be a block");
  };
  let param_types = symbols
    .symbol(func.symbol)
    .ty()
    .parameters()
    .types
    .clone();
  let declared = symbols.scope_symbols(*scope).to_vec();

  for i in NUM_PARAM_REGS..param_types.len() {
    symbols.symbol_mut(declared[i]).offset = *offset;
    *offset += param_types[i].size() as i64;

    while *offset % PARAM_ALIGNMENT != 0 {
      *offset += 1;
    }
  }

  *offset = 0;

  for i in 0..param_types.len().min(NUM_PARAM_REGS) {
    *offset -= param_types[i].size() as i64;
    symbols.symbol_mut(declared[i]).offset = *offset;
  }

  allocate_stmt(&func.body, symbols, offset);
}

/// Allocate storage for one statement. Blocks place their own declarations
/// and let each contained statement start from the same offset, keeping the
/// minimum; the control-flow statements just recurse into their bodies.
fn allocate_stmt(stmt: &Stmt, symbols: &mut SymbolTable, offset: &mut i64) {
  match stmt {
    Stmt::Block { scope, stmts } => {
      let declared = symbols.scope_symbols(*scope).to_vec();
      for id in declared {
        // parameters were already placed, so only fresh symbols move
        if symbols.symbol(id).offset == 0 {
          *offset -= symbols.symbol(id).ty().size() as i64;
          symbols.symbol_mut(id).offset = *offset;
        }
      }

      let saved = *offset;
      for stmt in stmts {
        let mut temp = saved;
        allocate_stmt(stmt, symbols, &mut temp);
        *offset = (*offset).min(temp);
      }
    }
    Stmt::While { body, .. } => allocate_stmt(body, symbols, offset),
    Stmt::For { body, .. } => allocate_stmt(body, symbols, offset),
    Stmt::If { then, otherwise, .. } => {
      let saved = *offset;
      allocate_stmt(then, symbols, offset);
      if let Some(otherwise) = otherwise {
        let mut temp = saved;
        allocate_stmt(otherwise, symbols, &mut temp);
        *offset = (*offset).min(temp);
      }
    }
    _ => {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::machine::SIZEOF_REG;
  use crate::scope::Symbol;
  use crate::types::{Parameters, Specifier, Type};

  fn function_with_params(
    symbols: &mut SymbolTable,
    param_types: Vec<Type>,
  ) -> (Function, Vec<crate::scope::SymbolId>) {
    symbols.open_scope();
    let ty = Type::function(
      Specifier::Int,
      0,
      Parameters {
        variadic: false,
        types: param_types.clone(),
      },
    );
    let func_sym = symbols.insert(Symbol::new("f", ty));

    let scope = symbols.open_scope();
    let mut params = Vec::new();
    for (i, ty) in param_types.iter().enumerate() {
      params.push(symbols.insert(Symbol::new(format!("p{i}"), ty.clone())));
    }
    symbols.close_scope();

    (
      Function {
        symbol: func_sym,
        body: Stmt::Block {
          scope,
          stmts: Vec::new(),
        },
      },
      params,
    )
  }

  #[test]
  fn register_parameters_get_descending_negative_offsets() {
    let mut symbols = SymbolTable::new();
    let (func, params) =
      function_with_params(&mut symbols, vec![Type::scalar(Specifier::Int, 1), Type::INT]);

    let mut offset = 2 * SIZEOF_REG;
    allocate_function(&func, &mut symbols, &mut offset);

    assert_eq!(symbols.symbol(params[0]).offset, -8);
    assert_eq!(symbols.symbol(params[1]).offset, -12);
    assert_eq!(offset, -12);
  }

  #[test]
  fn excess_parameters_go_on_the_stack_at_sixteen() {
    let mut symbols = SymbolTable::new();
    let (func, params) = function_with_params(&mut symbols, vec![Type::INT; 8]);

    let mut offset = 2 * SIZEOF_REG;
    allocate_function(&func, &mut symbols, &mut offset);

    let offsets: Vec<i64> = params
      .iter()
      .map(|&id| symbols.symbol(id).offset)
      .collect();
    assert_eq!(offsets, [-4, -8, -12, -16, -20, -24, 16, 24]);
  }

  #[test]
  fn sibling_blocks_share_stack_space() {
    let mut symbols = SymbolTable::new();
    symbols.open_scope();
    let ty = Type::function(Specifier::Int, 0, Parameters::default());
    let func_sym = symbols.insert(Symbol::new("f", ty));

    let outer = symbols.open_scope();
    let a = symbols.insert(Symbol::new("a", Type::INT));

    let first = symbols.open_scope();
    let b = symbols.insert(Symbol::new("b", Type::LONG));
    symbols.close_scope();

    let second = symbols.open_scope();
    let c = symbols.insert(Symbol::new("c", Type::INT));
    symbols.close_scope();
    symbols.close_scope();

    let func = Function {
      symbol: func_sym,
      body: Stmt::Block {
        scope: outer,
        stmts: vec![
          Stmt::Block {
            scope: first,
            stmts: Vec::new(),
          },
          Stmt::Block {
            scope: second,
            stmts: Vec::new(),
          },
        ],
      },
    };

    let mut offset = 2 * SIZEOF_REG;
    allocate_function(&func, &mut symbols, &mut offset);

    assert_eq!(symbols.symbol(a).offset, -4);
    assert_eq!(symbols.symbol(b).offset, -12);
    assert_eq!(symbols.symbol(c).offset, -8, "siblings reuse the same slot");
    assert_eq!(offset, -12, "frame covers the deepest branch");
  }
}
