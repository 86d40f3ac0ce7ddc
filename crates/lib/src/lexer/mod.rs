//! Line-oriented lexer for build description files.
//!
//! The lexer works on whole files and never recovers: the first malformed
//! construct aborts the run. Blank lines and lines whose first
//! non-whitespace character is `#` produce no tokens. Every emitted token
//! carries the nesting of its line, computed from leading whitespace in
//! units of [`INDENT_WIDTH`] (a tab counts as one full unit).
//!
//! Literal runs split only at the five delimiters and at line ends, never
//! at interior whitespace; each run is trimmed at its edges. A command
//! entry like `rm -r GantryBuild` therefore survives as one token, while
//! list items are separated by commas.

pub mod token;

use thiserror::Error;

use crate::consts::INDENT_WIDTH;
use token::{Token, TokenKind};

/// Errors produced while lexing a description file.
#[derive(Debug, Error)]
pub enum LexError {
  #[error("variable reference opened with '{{' is never closed (line {line})")]
  UnterminatedVariable { line: usize },
  #[error("met '}}' without a matching '{{' (line {line})")]
  StrayVariableEnd { line: usize },
}

/// Lexes a whole description source into a flat token stream.
///
/// # Errors
///
/// Returns [`LexError`] for an unterminated `{name}` reference or a `}`
/// without an opening brace. Both are unrecoverable.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
  let mut tokens = Vec::new();
  for (index, raw) in source.lines().enumerate() {
    let line = index + 1;
    let nesting = line_nesting(raw);
    let content = raw.trim();
    if content.is_empty() || content.starts_with('#') {
      continue;
    }
    lex_line(content, nesting, line, &mut tokens)?;
  }
  Ok(tokens)
}

/// Nesting of a raw line: leading whitespace divided by the indent unit.
fn line_nesting(raw: &str) -> usize {
  let mut units = 0;
  for ch in raw.chars() {
    match ch {
      ' ' => units += 1,
      '\t' => units += INDENT_WIDTH,
      _ => break,
    }
  }
  units / INDENT_WIDTH
}

fn lex_line(content: &str, nesting: usize, line: usize, tokens: &mut Vec<Token>) -> Result<(), LexError> {
  let mut literal = String::new();
  let mut chars = content.chars();
  let flush = |literal: &mut String, tokens: &mut Vec<Token>| {
    let trimmed = literal.trim();
    if !trimmed.is_empty() {
      tokens.push(Token::new(TokenKind::Default(trimmed.to_string()), nesting, line));
    }
    literal.clear();
  };
  while let Some(ch) = chars.next() {
    match ch {
      ',' => {
        flush(&mut literal, tokens);
        tokens.push(Token::new(TokenKind::Comma, nesting, line));
      }
      ':' => {
        flush(&mut literal, tokens);
        tokens.push(Token::new(TokenKind::SubRule, nesting, line));
      }
      '~' => {
        flush(&mut literal, tokens);
        tokens.push(Token::new(TokenKind::Equals, nesting, line));
      }
      '{' => {
        flush(&mut literal, tokens);
        let mut name = String::new();
        loop {
          match chars.next() {
            Some('}') => break,
            Some(inner) => name.push(inner),
            None => return Err(LexError::UnterminatedVariable { line }),
          }
        }
        tokens.push(Token::new(TokenKind::VariableRef(name.trim().to_string()), nesting, line));
      }
      '}' => return Err(LexError::StrayVariableEnd { line }),
      other => literal.push(other),
    }
  }
  flush(&mut literal, tokens);
  Ok(())
}
