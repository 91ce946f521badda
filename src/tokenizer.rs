//! Lexical analysis: turns the raw input string into a vector of tokens.
//!
//! The tokenizer knows nothing about semantics beyond recognising keywords,
//! literals, and operators. Multi-character punctuators are matched before
//! single-character ones to avoid ambiguity, and character/string literals
//! keep their quotes in the token text; the parser strips and unescapes
//! them with `unescape`.

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Punctuator,
  Keyword,
  Ident,
  Num,
  CharLit,
  StrLit,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub loc: usize,
  pub len: usize,
  pub value: Option<i64>,
}

impl Token {
  fn new(kind: TokenKind, loc: usize, len: usize, value: Option<i64>) -> Self {
    Self {
      kind,
      loc,
      len,
      value,
    }
  }
}

const KEYWORDS: [&str; 11] = [
  "char", "int", "long", "void", "if", "else", "while", "for", "break", "return", "sizeof",
];

const PUNCTUATORS: [&str; 7] = ["...", "<=", ">=", "==", "!=", "&&", "||"];

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

    if input[i..].starts_with("//") {
      while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
      }
      continue;
    }

    if input[i..].starts_with("/*") {
      let close = input[i + 2..]
        .find("*/")
        .ok_or_else(|| CompileError::lexical(input, i, "unterminated comment"))?;
      i += close + 4;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      let value = input[start..i]
        .parse::<i64>()
        .map_err(|err| CompileError::lexical(input, start, format!("invalid number: {err}")))?;
      tokens.push(Token::new(TokenKind::Num, start, i - start, Some(value)));
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      let text = &input[start..i];
      let kind = if KEYWORDS.contains(&text) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      tokens.push(Token::new(kind, start, i - start, None));
      continue;
    }

    if c == b'\'' || c == b'"' {
      let len = quoted_literal(input, i)?;
      let kind = if c == b'\'' {
        TokenKind::CharLit
      } else {
        TokenKind::StrLit
      };
      tokens.push(Token::new(kind, i, len, None));
      i += len;
      continue;
    }

    if let Some(op) = PUNCTUATORS
      .into_iter()
      .find(|op| input[i..].starts_with(op))
    {
      tokens.push(Token::new(TokenKind::Punctuator, i, op.len(), None));
      i += op.len();
      continue;
    }

    if matches!(
      c,
      b'(' | b')' | b'{' | b'}' | b'[' | b']' | b',' | b';' | b'=' | b'+' | b'-' | b'*' | b'/'
        | b'%' | b'!' | b'&' | b'<' | b'>'
    ) {
      tokens.push(Token::new(TokenKind::Punctuator, i, 1, None));
      i += 1;
      continue;
    }

    let invalid = input[i..].chars().next().unwrap_or('\0');
    return Err(CompileError::lexical(
      input,
      i,
      format!("invalid token: '{invalid}'"),
    ));
  }

  tokens.push(Token::new(TokenKind::Eof, input.len(), 0, None));
  Ok(tokens)
}

/// Measure a quoted literal starting at `start`, including both quotes.
fn quoted_literal(input: &str, start: usize) -> CompileResult<usize> {
  let bytes = input.as_bytes();
  let quote = bytes[start];
  let mut i = start + 1;

  while i < bytes.len() && bytes[i] != quote && bytes[i] != b'\n' {
    if bytes[i] == b'\\' && i + 1 < bytes.len() {
      i += 1;
    }
    i += 1;
  }

  if i >= bytes.len() || bytes[i] != quote {
    let what = if quote == b'\'' { "character" } else { "string" };
    return Err(CompileError::lexical(
      input,
      start,
      format!("unterminated {what} literal"),
    ));
  }

  if quote == b'\'' && i == start + 1 {
    return Err(CompileError::lexical(input, start, "empty character literal"));
  }

  Ok(i + 1 - start)
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  &source[token.loc..token.loc + token.len]
}

/// Resolve the escape sequences in the body of a character or string
/// literal (the quotes must already be stripped). Supports the single
/// character escapes and up to three octal digits; an unknown escape yields
/// the escaped character itself.
pub fn unescape(text: &str) -> String {
  let bytes = text.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] != b'\\' || i + 1 == bytes.len() {
      out.push(bytes[i]);
      i += 1;
      continue;
    }

    i += 1;
    match bytes[i] {
      b'a' => out.push(0x07),
      b'b' => out.push(0x08),
      b'f' => out.push(0x0c),
      b'n' => out.push(b'\n'),
      b'r' => out.push(b'\r'),
      b't' => out.push(b'\t'),
      b'v' => out.push(0x0b),
      b'0'..=b'7' => {
        let mut value = 0u32;
        let mut digits = 0;
        while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
          value = value * 8 + (bytes[i] - b'0') as u32;
          digits += 1;
          i += 1;
        }
        out.push(value as u8);
        continue;
      }
      other => out.push(other),
    }
    i += 1;
  }

  String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
      .unwrap()
      .iter()
      .map(|token| token.kind)
      .collect()
  }

  #[test]
  fn keywords_and_identifiers_are_distinguished() {
    let source = "int main intx";
    let tokens = tokenize(source).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Keyword);
    assert_eq!(tokens[1].kind, TokenKind::Ident);
    assert_eq!(tokens[2].kind, TokenKind::Ident);
    assert_eq!(token_text(&tokens[2], source), "intx");
  }

  #[test]
  fn multi_character_punctuators_win() {
    let source = "<= >= == != && || ... < = !";
    let tokens = tokenize(source).unwrap();
    let texts: Vec<&str> = tokens[..tokens.len() - 1]
      .iter()
      .map(|token| token_text(token, source))
      .collect();
    assert_eq!(texts, ["<=", ">=", "==", "!=", "&&", "||", "...", "<", "=", "!"]);
  }

  #[test]
  fn numbers_carry_their_value() {
    let tokens = tokenize("42 0").unwrap();
    assert_eq!(tokens[0].value, Some(42));
    assert_eq!(tokens[1].value, Some(0));
  }

  #[test]
  fn literals_keep_their_quotes() {
    let source = "\"hi\\n\" 'a'";
    let tokens = tokenize(source).unwrap();
    assert_eq!(tokens[0].kind, TokenKind::StrLit);
    assert_eq!(token_text(&tokens[0], source), "\"hi\\n\"");
    assert_eq!(tokens[1].kind, TokenKind::CharLit);
  }

  #[test]
  fn comments_are_skipped() {
    assert_eq!(
      kinds("int /* a\nb */ x // tail\n;"),
      [
        TokenKind::Keyword,
        TokenKind::Ident,
        TokenKind::Punctuator,
        TokenKind::Eof
      ]
    );
  }

  #[test]
  fn bad_input_is_a_lexical_error() {
    assert!(tokenize("int @;").is_err());
    assert!(tokenize("\"open").is_err());
    assert!(tokenize("''").is_err());
    assert!(tokenize("a | b").is_err(), "lone '|' is not an operator");
  }

  #[test]
  fn escapes_resolve() {
    assert_eq!(unescape("a\\tb"), "a\tb");
    assert_eq!(unescape("\\n"), "\n");
    assert_eq!(unescape("\\101"), "A");
    assert_eq!(unescape("\\0"), "\0");
    assert_eq!(unescape("\\q"), "q");
    assert_eq!(unescape("\\\\"), "\\");
  }

  #[test]
  fn input_always_ends_with_eof() {
    let tokens = tokenize("").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Eof);
  }
}
