//! Recursive-descent parser for build descriptions.
//!
//! Consumes the lexer's token stream and produces a [`Description`]. The
//! language is single-pass and top-to-bottom: a variable must be defined
//! before the first argument list that references it, and `Include` and
//! `Depends` references are handed to the caller the moment they are
//! parsed, through the `spawn` callback. The callback receives the pattern,
//! the operation the child should run, and a snapshot of the defines
//! collected so far; it reports back whether the pattern matched anything.
//!
//! Nesting drives scoping. Section keywords sit at level 0, their entries
//! one level deeper, and nested blocks (`Extensions`, `Link`, conditional
//! defines) one level below their parent entry. An argument list either
//! follows its `:` on the same line or occupies the following strictly
//! deeper lines, one comma-separated list per line.

use std::collections::HashMap;

use thiserror::Error;

use crate::fields::{Description, Operation, TargetKind};
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::{self, LexError};

/// Errors produced while parsing a description. Line numbers refer to the
/// description source; the owning context adds the file path when
/// reporting.
#[derive(Debug, Error)]
pub enum ParseError {
  #[error(transparent)]
  Lex(#[from] LexError),
  #[error("met unexpected token {token}")]
  UnexpectedToken { token: Token },
  #[error("expected ':' (line {line})")]
  ExpectedSubRule { line: usize },
  #[error("included path \"{pattern}\" does not exist (line {line})")]
  IncludeNotFound { pattern: String, line: usize },
  #[error("referenced dependency \"{pattern}\" does not exist (line {line})")]
  DependencyNotFound { pattern: String, line: usize },
  #[error("no right hand side for '~' on \"{key}\" (line {line})")]
  MissingConditionValue { key: String, line: usize },
  #[error("incorrect define line (line {line})")]
  MalformedDefine { line: usize },
  #[error("incorrect type \"{value}\" (choose either StaticLib or Executable) (line {line})")]
  InvalidTargetKind { value: String, line: usize },
  #[error("only one argument is allowed (line {line})")]
  SingleArgumentExpected { line: usize },
  #[error("no {field} is specified (line {line})")]
  MissingValue { field: &'static str, line: usize },
  #[error("compiler redefinition for extension \"{extension}\" (line {line})")]
  CompilerRedefinition { extension: String, line: usize },
  #[error("no options specified for extension \"{extension}\" (line {line})")]
  NoExtensionOptions { extension: String, line: usize },
  #[error("invalid option \"{option}\" for extension \"{extension}\" (line {line})")]
  InvalidExtensionOption { option: String, extension: String, line: usize },
  #[error("unknown Link option \"{option}\" (line {line})")]
  UnknownLinkOption { option: String, line: usize },
  #[error("met unexpected Build subfield \"{field}\" (line {line})")]
  UnexpectedBuildSubfield { field: String, line: usize },
  #[error("variable \"{name}\" was not defined (line {line})")]
  UndefinedVariable { name: String, line: usize },
  #[error("variable reference has no name (line {line})")]
  VariableWithoutName { line: usize },
}

/// Parses one description source.
///
/// `seed_defines` is the spawning parent's define snapshot; the parsed
/// file's own defines land on top of it. `spawn` attaches a child context
/// for every file a pattern resolves to and returns whether anything
/// matched; zero matches is fatal for both `Include` and `Depends`.
///
/// # Errors
///
/// Any lexical or structural violation aborts the parse; the description
/// is never partially applied.
pub fn parse_description<F>(
  source: &str,
  flags: &HashMap<String, String>,
  seed_defines: crate::fields::DefineTable,
  spawn: F,
) -> Result<Description, ParseError>
where
  F: FnMut(&str, Operation, &crate::fields::DefineTable) -> bool,
{
  let tokens = lexer::lex(source)?;
  let mut parser = Parser {
    tokens,
    cursor: 0,
    flags,
    spawn,
    description: Description { defines: seed_defines, ..Description::default() },
  };
  parser.run()?;
  Ok(parser.description)
}

struct Parser<'a, F> {
  tokens: Vec<Token>,
  cursor: usize,
  flags: &'a HashMap<String, String>,
  spawn: F,
  description: Description,
}

/// An entry key: a literal token opening one line of a section.
struct Entry {
  name: String,
  line: usize,
}

impl<F> Parser<'_, F>
where
  F: FnMut(&str, Operation, &crate::fields::DefineTable) -> bool,
{
  fn run(&mut self) -> Result<(), ParseError> {
    while let Some(token) = self.peek() {
      let Some(keyword) = token.text() else {
        return Err(ParseError::UnexpectedToken { token: token.clone() });
      };
      match keyword {
        "Include" => self.parse_include()?,
        "Define" => self.parse_defines()?,
        "Commands" => self.parse_commands()?,
        "Build" => self.parse_build()?,
        "Default" => self.parse_default()?,
        _ => return Err(ParseError::UnexpectedToken { token: token.clone() }),
      }
    }
    Ok(())
  }

  fn parse_include(&mut self) -> Result<(), ParseError> {
    let keyword = self.advance_keyword();
    let anchor = self.expect_sub_rule(keyword.line)?;
    let patterns = self.argument_list(anchor.line, anchor.nesting)?;
    for pattern in patterns {
      if !(self.spawn)(&pattern, Operation::Parse, &self.description.defines) {
        return Err(ParseError::IncludeNotFound { pattern, line: keyword.line });
      }
      self.description.includes.push(pattern);
    }
    Ok(())
  }

  fn parse_defines(&mut self) -> Result<(), ParseError> {
    let keyword = self.advance_keyword();
    self.expect_sub_rule(keyword.line)?;
    self.define_pairs(1, true)
  }

  /// One level of the `Define` block. `save` is false inside a conditional
  /// branch whose flag did not match; values are still parsed (undefined
  /// variable references stay fatal) but not retained. A nested condition
  /// can never turn saving back on once an enclosing branch is false.
  fn define_pairs(&mut self, nesting: usize, save: bool) -> Result<(), ParseError> {
    while let Some(key) = self.next_entry_key(nesting) {
      match self.peek().map(|t| &t.kind) {
        Some(TokenKind::SubRule) => {
          let anchor = self.expect_sub_rule(key.line)?;
          let values = self.argument_list(anchor.line, anchor.nesting)?;
          if save {
            self.description.defines.set(key.name, values);
          }
        }
        Some(TokenKind::Equals) => {
          self.advance();
          let rhs = match self.peek() {
            Some(token) if token.line == key.line => match token.text() {
              Some(text) => text.to_string(),
              None => return Err(ParseError::MissingConditionValue { key: key.name, line: key.line }),
            },
            _ => return Err(ParseError::MissingConditionValue { key: key.name, line: key.line }),
          };
          self.advance();
          let matched = self.flags.get(&key.name).is_some_and(|value| *value == rhs);
          self.define_pairs(nesting + 1, save && matched)?;
        }
        _ => return Err(ParseError::MalformedDefine { line: key.line }),
      }
    }
    Ok(())
  }

  fn parse_commands(&mut self) -> Result<(), ParseError> {
    let keyword = self.advance_keyword();
    self.expect_sub_rule(keyword.line)?;
    while let Some(entry) = self.next_entry_key(1) {
      let anchor = self.expect_sub_rule(entry.line)?;
      let args = self.argument_list(anchor.line, anchor.nesting)?;
      self.description.commands.append_args(entry.name, args);
    }
    Ok(())
  }

  fn parse_build(&mut self) -> Result<(), ParseError> {
    let keyword = self.advance_keyword();
    self.expect_sub_rule(keyword.line)?;
    while let Some(entry) = self.next_entry_key(1) {
      match entry.name.as_str() {
        "Type" => {
          let anchor = self.expect_sub_rule(entry.line)?;
          let value = self.single_argument("type", &anchor, entry.line)?;
          self.description.build.kind = match value.as_str() {
            "Executable" => TargetKind::Executable,
            "StaticLib" => TargetKind::StaticLib,
            _ => return Err(ParseError::InvalidTargetKind { value, line: entry.line }),
          };
        }
        "Depends" => {
          let anchor = self.expect_sub_rule(entry.line)?;
          let patterns = self.argument_list(anchor.line, anchor.nesting)?;
          for pattern in patterns {
            if !(self.spawn)(&pattern, Operation::Build, &self.description.defines) {
              return Err(ParseError::DependencyNotFound { pattern, line: entry.line });
            }
            self.description.build.depends.push(pattern);
          }
        }
        "HeaderFolders" => {
          let anchor = self.expect_sub_rule(entry.line)?;
          let folders = self.argument_list(anchor.line, anchor.nesting)?;
          self.description.build.header_folders.extend(folders);
        }
        "Src" => {
          let anchor = self.expect_sub_rule(entry.line)?;
          let sources = self.argument_list(anchor.line, anchor.nesting)?;
          self.description.build.sources.extend(sources);
        }
        "Extensions" => {
          self.expect_sub_rule(entry.line)?;
          self.parse_extensions()?;
        }
        "Link" => {
          self.expect_sub_rule(entry.line)?;
          self.parse_link()?;
        }
        "Archiver" => {
          let anchor = self.expect_sub_rule(entry.line)?;
          let archiver = self.single_argument("Archiver", &anchor, entry.line)?;
          self.description.build.archiver = Some(archiver);
        }
        _ => {
          return Err(ParseError::UnexpectedBuildSubfield { field: entry.name, line: entry.line });
        }
      }
    }
    Ok(())
  }

  fn parse_extensions(&mut self) -> Result<(), ParseError> {
    while let Some(extension) = self.next_entry_key(2) {
      self.expect_sub_rule(extension.line)?;
      let mut options_specified = false;
      while let Some(option) = self.next_entry_key(3) {
        match option.name.as_str() {
          "Compiler" => {
            let anchor = self.expect_sub_rule(option.line)?;
            let compiler = self.single_argument("compiler", &anchor, option.line)?;
            let entry = self.description.build.extension_entry(&extension.name);
            if entry.compiler.is_some() {
              return Err(ParseError::CompilerRedefinition {
                extension: extension.name,
                line: option.line,
              });
            }
            entry.compiler = Some(compiler);
            options_specified = true;
          }
          "Flags" => {
            let anchor = self.expect_sub_rule(option.line)?;
            let flags = self.argument_list(anchor.line, anchor.nesting)?;
            self.description.build.extension_entry(&extension.name).flags.extend(flags);
            options_specified = true;
          }
          _ => {
            return Err(ParseError::InvalidExtensionOption {
              option: option.name,
              extension: extension.name,
              line: option.line,
            });
          }
        }
      }
      if !options_specified {
        return Err(ParseError::NoExtensionOptions { extension: extension.name, line: extension.line });
      }
    }
    Ok(())
  }

  fn parse_link(&mut self) -> Result<(), ParseError> {
    while let Some(option) = self.next_entry_key(2) {
      match option.name.as_str() {
        "Linker" => {
          let anchor = self.expect_sub_rule(option.line)?;
          let linker = self.single_argument("linker", &anchor, option.line)?;
          self.description.build.linker = Some(linker);
        }
        "Flags" => {
          let anchor = self.expect_sub_rule(option.line)?;
          let flags = self.argument_list(anchor.line, anchor.nesting)?;
          self.description.build.linker_flags.extend(flags);
        }
        _ => return Err(ParseError::UnknownLinkOption { option: option.name, line: option.line }),
      }
    }
    Ok(())
  }

  fn parse_default(&mut self) -> Result<(), ParseError> {
    let keyword = self.advance_keyword();
    let anchor = self.expect_sub_rule(keyword.line)?;
    let sequence = self.argument_list(anchor.line, anchor.nesting)?;
    self.description.default_sequence.extend(sequence);
    Ok(())
  }

  /// Collects one argument list anchored at the given `:` token.
  ///
  /// If the next token shares the anchor's line, the list is that line.
  /// Otherwise, if the next token is strictly deeper than the anchor, one
  /// comma-separated list per line is consumed for as long as lines stay
  /// at that first deeper level and open with literal text or a variable.
  fn argument_list(&mut self, anchor_line: usize, anchor_nesting: usize) -> Result<Vec<String>, ParseError> {
    let mut args = Vec::new();
    let Some(next) = self.peek() else {
      return Ok(args);
    };
    if next.line == anchor_line {
      self.lined_argument_list(anchor_line, &mut args)?;
      return Ok(args);
    }
    if next.nesting > anchor_nesting {
      let lines_nesting = next.nesting;
      while let Some(token) = self.peek() {
        if token.nesting != lines_nesting
          || !matches!(token.kind, TokenKind::Default(_) | TokenKind::VariableRef(_))
        {
          break;
        }
        let line = token.line;
        self.lined_argument_list(line, &mut args)?;
      }
    }
    Ok(args)
  }

  /// One comma-separated list confined to `line`. Consecutive literal
  /// tokens concatenate into a single argument, rejoining runs the lexer
  /// split at variable markers. A variable reference expands to its full
  /// value list, every value its own argument except the last, which keeps
  /// concatenating with adjacent literals. Stops at `:` or `~` without
  /// consuming them.
  fn lined_argument_list(&mut self, line: usize, args: &mut Vec<String>) -> Result<(), ParseError> {
    let mut current: Option<String> = None;
    while let Some(token) = self.peek() {
      if token.line != line {
        break;
      }
      match &token.kind {
        TokenKind::Comma => {
          self.advance();
          if let Some(arg) = current.take() {
            args.push(arg);
          }
        }
        TokenKind::Default(text) => {
          let text = text.clone();
          self.advance();
          match current.as_mut() {
            Some(arg) => arg.push_str(&text),
            None => current = Some(text),
          }
        }
        TokenKind::VariableRef(name) => {
          let name = name.clone();
          let ref_line = token.line;
          self.advance();
          if name.is_empty() {
            return Err(ParseError::VariableWithoutName { line: ref_line });
          }
          let Some(values) = self.description.defines.get(&name) else {
            return Err(ParseError::UndefinedVariable { name, line: ref_line });
          };
          let values = values.to_vec();
          for (index, value) in values.iter().enumerate() {
            match current.as_mut() {
              Some(arg) => arg.push_str(value),
              None => current = Some(value.clone()),
            }
            if index + 1 < values.len()
              && let Some(arg) = current.take()
            {
              args.push(arg);
            }
          }
        }
        TokenKind::SubRule | TokenKind::Equals => break,
      }
    }
    if let Some(arg) = current.take() {
      args.push(arg);
    }
    Ok(())
  }

  /// Exactly one argument; reports on `report_line` when the list is empty
  /// or holds more than one.
  fn single_argument(
    &mut self,
    field: &'static str,
    anchor: &Token,
    report_line: usize,
  ) -> Result<String, ParseError> {
    let mut args = self.argument_list(anchor.line, anchor.nesting)?;
    match args.len() {
      0 => Err(ParseError::MissingValue { field, line: report_line }),
      1 => Ok(args.remove(0)),
      _ => Err(ParseError::SingleArgumentExpected { line: report_line }),
    }
  }

  /// Next entry key at exactly `nesting`: a literal token opening a new
  /// source line. Anything else ends the section without being consumed.
  fn next_entry_key(&mut self, nesting: usize) -> Option<Entry> {
    let token = self.peek()?;
    if !self.starts_new_line() || token.nesting != nesting {
      return None;
    }
    let name = token.text()?.to_string();
    let line = token.line;
    self.advance();
    Some(Entry { name, line })
  }

  fn expect_sub_rule(&mut self, line: usize) -> Result<Token, ParseError> {
    match self.peek() {
      Some(token) if token.kind == TokenKind::SubRule => {
        let token = token.clone();
        self.advance();
        Ok(token)
      }
      _ => Err(ParseError::ExpectedSubRule { line }),
    }
  }

  /// Consumes the already-matched section keyword.
  fn advance_keyword(&mut self) -> Token {
    let token = self.tokens[self.cursor].clone();
    self.cursor += 1;
    token
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.cursor)
  }

  /// Whether the upcoming token starts a new source line relative to the
  /// last consumed token.
  fn starts_new_line(&self) -> bool {
    match (self.cursor.checked_sub(1).and_then(|i| self.tokens.get(i)), self.peek()) {
      (Some(prev), Some(next)) => prev.line != next.line,
      _ => true,
    }
  }

  fn advance(&mut self) {
    self.cursor += 1;
  }
}
