use std::io::{self, Read};
use std::process;

fn main() {
  let mut source = String::new();
  if let Err(err) = io::stdin().read_to_string(&mut source) {
    eprintln!("rscc: error reading standard input: {err}");
    process::exit(1);
  }

  match rscc::compile(&source) {
    Ok(compilation) => {
      for diagnostic in &compilation.diagnostics {
        eprintln!("{diagnostic}");
      }
      print!("{}", compilation.assembly);
    }
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  }
}
