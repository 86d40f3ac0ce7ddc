use std::fmt;

/// What a single token is, with its payload where one exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
  /// A run of literal text.
  Default(String),
  /// A `{name}` reference to a previously defined variable.
  VariableRef(String),
  /// `,`
  Comma,
  /// `:`
  SubRule,
  /// `~`
  Equals,
}

/// One lexed token together with its source position.
///
/// Nesting is part of the token itself: the parser never re-reads the
/// source, it compares the nesting of upcoming tokens against the level it
/// is currently parsing at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  /// Nesting level of the line this token appeared on.
  pub nesting: usize,
  /// 1-based source line.
  pub line: usize,
}

impl Token {
  pub fn new(kind: TokenKind, nesting: usize, line: usize) -> Self {
    Self { kind, nesting, line }
  }

  /// Literal text, if this token is a [`TokenKind::Default`].
  pub fn text(&self) -> Option<&str> {
    match &self.kind {
      TokenKind::Default(text) => Some(text),
      _ => None,
    }
  }
}

impl fmt::Display for TokenKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TokenKind::Default(text) => write!(f, "'{text}'"),
      TokenKind::VariableRef(name) => write!(f, "'{{{name}}}'"),
      TokenKind::Comma => write!(f, "','"),
      TokenKind::SubRule => write!(f, "':'"),
      TokenKind::Equals => write!(f, "'~'"),
    }
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} at line {}", self.kind, self.line)
  }
}
