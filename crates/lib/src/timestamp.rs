//! Persisted timestamp store for incremental recompilation.
//!
//! One store per build directory, at `GantryBuild/timestamps.ginfo`. The
//! format is one entry per line: the path relative to the description
//! directory, one space, the recorded time in integer seconds. Paths may
//! contain spaces; the line splits on its last space. The store is always
//! rewritten whole, as a superset of what was read, so entries for files
//! that no longer exist are carried along harmlessly.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimestampError {
  #[error("malformed timestamp entry at line {line} of {path}")]
  Malformed { line: usize, path: PathBuf },
  #[error("failed to read timestamp store {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("failed to write timestamp store {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Reads a store file. A missing file is an empty store.
///
/// # Errors
///
/// A line without a final integer field is malformed; the store is never
/// partially applied.
pub fn read_store(path: &Path) -> Result<HashMap<PathBuf, i64>, TimestampError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
    Err(e) => return Err(TimestampError::Read { path: path.to_path_buf(), source: e }),
  };

  let mut store = HashMap::new();
  for (index, line) in content.lines().enumerate() {
    if line.trim().is_empty() {
      continue;
    }
    let entry = line
      .rsplit_once(' ')
      .and_then(|(file, stamp)| stamp.parse::<i64>().ok().map(|stamp| (file, stamp)));
    let Some((file, stamp)) = entry else {
      return Err(TimestampError::Malformed { line: index + 1, path: path.to_path_buf() });
    };
    store.insert(PathBuf::from(file), stamp);
  }
  Ok(store)
}

/// Rewrites the whole store, entries sorted by path.
///
/// Writes to a temp file and renames, so a crash never leaves a torn
/// store behind.
pub fn write_store(path: &Path, store: &HashMap<PathBuf, i64>) -> Result<(), TimestampError> {
  let write_err = |source| TimestampError::Write { path: path.to_path_buf(), source };

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(write_err)?;
  }

  let mut entries: Vec<(&PathBuf, &i64)> = store.iter().collect();
  entries.sort_by(|a, b| a.0.cmp(b.0));
  let mut content = String::new();
  for (file, stamp) in entries {
    content.push_str(&format!("{} {}\n", file.display(), stamp));
  }

  let temp_path = path.with_extension("tmp");
  fs::write(&temp_path, &content).map_err(write_err)?;
  fs::rename(&temp_path, path).map_err(write_err)?;
  Ok(())
}
