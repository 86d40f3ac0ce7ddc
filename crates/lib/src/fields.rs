//! Data model shared by the parser and the build contexts.
//!
//! A parsed description is a [`Description`]: variable definitions, named
//! commands, one [`BuildField`], the include patterns and the default
//! command sequence. The two tables carry the merge semantics used when a
//! parent context folds its include children back in: defines append per
//! key, commands overwrite per key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// What a context does with its description once parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
  /// Parse only; the context exists to contribute defines and commands.
  Parse,
  /// Parse, then run the selected commands or the build action.
  Build,
}

/// Declared kind of a build target.
///
/// Stays [`TargetKind::Unknown`] for descriptions without a `Type` field;
/// such contexts can still run commands but never archive or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetKind {
  #[default]
  Unknown,
  Executable,
  StaticLib,
}

/// Field invariant violations, fatal before any compilation starts.
#[derive(Debug, Error)]
pub enum FieldError {
  #[error("an Executable must not declare an Archiver ({path})")]
  ArchiverOnExecutable { path: PathBuf },
  #[error("a StaticLib must not declare Link options ({path})")]
  LinkOnStaticLib { path: PathBuf },
}

/// Named variables, each a list of values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefineTable {
  entries: HashMap<String, Vec<String>>,
}

impl DefineTable {
  pub fn get(&self, name: &str) -> Option<&[String]> {
    self.entries.get(name).map(Vec::as_slice)
  }

  /// Binds `name`, replacing any previous binding in this table.
  pub fn set(&mut self, name: impl Into<String>, values: Vec<String>) {
    self.entries.insert(name.into(), values);
  }

  /// Child-merge: values append per key, existing values stay first.
  pub fn merge_from(&mut self, other: &DefineTable) {
    for (name, values) in &other.entries {
      self.entries.entry(name.clone()).or_default().extend(values.iter().cloned());
    }
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// Named commands, each a list of shell command lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
  entries: HashMap<String, Vec<String>>,
}

impl CommandTable {
  pub fn get(&self, name: &str) -> Option<&[String]> {
    self.entries.get(name).map(Vec::as_slice)
  }

  /// Extends `name` with further lines; two sections naming the same
  /// command concatenate.
  pub fn append_args(&mut self, name: impl Into<String>, args: Vec<String>) {
    self.entries.entry(name.into()).or_default().extend(args);
  }

  /// Child-merge: whole commands overwrite per key, later children win.
  pub fn merge_from(&mut self, other: &CommandTable) {
    for (name, args) in &other.entries {
      self.entries.insert(name.clone(), args.clone());
    }
  }
}

/// Per-extension toolchain selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionOptions {
  pub compiler: Option<String>,
  pub flags: Vec<String>,
}

/// The `Build` section of a description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildField {
  pub kind: TargetKind,
  /// Glob patterns for source files, relative to the description directory.
  pub sources: Vec<String>,
  pub header_folders: Vec<String>,
  /// Patterns of dependency descriptions, as written.
  pub depends: Vec<String>,
  extensions: HashMap<String, ExtensionOptions>,
  pub linker: Option<String>,
  pub linker_flags: Vec<String>,
  pub archiver: Option<String>,
}

impl BuildField {
  /// Entry for an extension name, created on first use. A leading dot is
  /// stripped so `.cpp` and `cpp` address the same entry.
  pub fn extension_entry(&mut self, name: &str) -> &mut ExtensionOptions {
    let key = name.strip_prefix('.').unwrap_or(name);
    self.extensions.entry(key.to_string()).or_default()
  }

  /// Toolchain options for a source file, by its extension.
  pub fn extension_for(&self, file: &Path) -> Option<&ExtensionOptions> {
    let ext = file.extension()?.to_str()?;
    self.extensions.get(ext)
  }

  pub fn has_extensions(&self) -> bool {
    !self.extensions.is_empty()
  }

  /// All registered extensions and their options.
  pub fn extensions(&self) -> &HashMap<String, ExtensionOptions> {
    &self.extensions
  }

  /// Enforces the target kind invariants.
  ///
  /// # Errors
  ///
  /// An `Executable` with an archiver, or a `StaticLib` with a linker or
  /// linker flags, is a description error.
  pub fn validate(&self, path: &Path) -> Result<(), FieldError> {
    match self.kind {
      TargetKind::Executable if self.archiver.is_some() => {
        Err(FieldError::ArchiverOnExecutable { path: path.to_path_buf() })
      }
      TargetKind::StaticLib if self.linker.is_some() || !self.linker_flags.is_empty() => {
        Err(FieldError::LinkOnStaticLib { path: path.to_path_buf() })
      }
      _ => Ok(()),
    }
  }
}

/// Everything a single description file declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
  pub defines: DefineTable,
  pub commands: CommandTable,
  pub build: BuildField,
  /// Include patterns, in source order.
  pub includes: Vec<String>,
  /// Command names of the `Default` section, in source order.
  pub default_sequence: Vec<String>,
}
