//! Transitive include scanning: decides, per source file, whether anything
//! it reaches through `#include` directives changed since the recorded
//! timestamps.
//!
//! One scanner instance serves one build action. Results are memoized per
//! normalized relative path, so shared headers are scanned once however
//! many translation units reach them. A visit stack with an index map
//! catches self-referential include chains before they recurse forever and
//! reports the full chain in discovery order.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use thiserror::Error;

use crate::finder::relative_to;

/// Staleness of one scanned file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeStatus {
  NeedsRecompilation,
  UpToDate,
}

#[derive(Debug, Error)]
pub enum ScanError {
  #[error("detected a circular dependency starting from \"{start}\".\n\nInclude stack:\n\n{trace}")]
  CircularInclude { start: PathBuf, trace: String },
  #[error("can't find relative include file \"{include}\" in {file}")]
  RelativeIncludeNotFound { include: String, file: PathBuf },
  #[error("failed to scan {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One `#include` directive. Quoted includes resolve relative to the
/// including file; angle-bracket includes search the declared header
/// folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
  pub target: String,
  pub global: bool,
}

/// Extracts include directives from one source text. Tolerates spaces
/// between `#` and `include` and directly-attached quotes; everything that
/// is not an include directive is skipped.
pub fn parse_includes(source: &str) -> Vec<IncludeDirective> {
  let mut directives = Vec::new();
  for line in source.lines() {
    let Some(rest) = line.trim_start().strip_prefix('#') else {
      continue;
    };
    let Some(rest) = rest.trim_start().strip_prefix("include") else {
      continue;
    };
    let rest = rest.trim_start();
    if let Some(inner) = rest.strip_prefix('"') {
      if let Some(end) = inner.find('"') {
        directives.push(IncludeDirective { target: inner[..end].to_string(), global: false });
      }
    } else if let Some(inner) = rest.strip_prefix('<')
      && let Some(end) = inner.find('>')
    {
      directives.push(IncludeDirective { target: inner[..end].to_string(), global: true });
    }
  }
  directives
}

/// Memoized include scanner for one build action.
pub struct IncludeScanner<'a> {
  directory: &'a Path,
  header_folders: &'a [String],
  timestamps: &'a HashMap<PathBuf, i64>,
  statuses: HashMap<PathBuf, IncludeStatus>,
  visit_stack: Vec<PathBuf>,
  visit_index: HashMap<PathBuf, usize>,
}

impl<'a> IncludeScanner<'a> {
  pub fn new(
    directory: &'a Path,
    header_folders: &'a [String],
    timestamps: &'a HashMap<PathBuf, i64>,
  ) -> Self {
    Self {
      directory,
      header_folders,
      timestamps,
      statuses: HashMap::new(),
      visit_stack: Vec::new(),
      visit_index: HashMap::new(),
    }
  }

  /// Scans `file` and everything it transitively includes.
  ///
  /// A file is `NeedsRecompilation` when its own modification time is not
  /// older than its recorded timestamp (a file without a record is always
  /// stale) or when any reachable include is. Once a file is known dirty
  /// its remaining includes are not scanned.
  ///
  /// # Errors
  ///
  /// A circular include chain and a missing quoted include are fatal; an
  /// unresolvable angle-bracket include is treated as external and
  /// skipped.
  pub fn scan(&mut self, file: &Path) -> Result<IncludeStatus, ScanError> {
    let key = relative_to(self.directory, file);

    if let Some(&index) = self.visit_index.get(&key) {
      let mut trace: Vec<String> =
        self.visit_stack[index..].iter().map(|p| p.display().to_string()).collect();
      trace.push(key.display().to_string());
      return Err(ScanError::CircularInclude {
        start: file.to_path_buf(),
        trace: trace.join("\n"),
      });
    }

    if let Some(&status) = self.statuses.get(&key) {
      return Ok(status);
    }

    self.visit_index.insert(key.clone(), self.visit_stack.len());
    self.visit_stack.push(key.clone());
    let propagated = self.scan_reachable(file);
    self.visit_stack.pop();
    self.visit_index.remove(&key);

    let status = if propagated? {
      IncludeStatus::NeedsRecompilation
    } else {
      let recorded = self.timestamps.get(&key).copied().unwrap_or(0);
      if modification_time(file)? >= recorded {
        IncludeStatus::NeedsRecompilation
      } else {
        IncludeStatus::UpToDate
      }
    };
    self.statuses.insert(key, status);
    Ok(status)
  }

  /// Scan results collected so far, keyed by path relative to the
  /// description directory. The build action stamps the dirty entries
  /// after compilation.
  pub fn into_statuses(self) -> HashMap<PathBuf, IncludeStatus> {
    self.statuses
  }

  /// Recurses into the includes of `file`; true once any include is dirty.
  fn scan_reachable(&mut self, file: &Path) -> Result<bool, ScanError> {
    let bytes = std::fs::read(file)
      .map_err(|source| ScanError::Read { path: file.to_path_buf(), source })?;
    let source = String::from_utf8_lossy(&bytes);

    for directive in parse_includes(&source) {
      let resolved = if directive.global {
        let directory = self.directory;
        let folders = self.header_folders;
        let found = folders
          .iter()
          .map(|folder| directory.join(folder).join(&directive.target))
          .find(|candidate| candidate.exists());
        match found {
          Some(path) => path,
          // unresolvable angle include: external header, not tracked
          None => continue,
        }
      } else {
        let candidate = file.parent().unwrap_or(Path::new("")).join(&directive.target);
        if !candidate.exists() {
          return Err(ScanError::RelativeIncludeNotFound {
            include: directive.target,
            file: file.to_path_buf(),
          });
        }
        candidate
      };

      if self.scan(&resolved)? == IncludeStatus::NeedsRecompilation {
        return Ok(true);
      }
    }
    Ok(false)
  }
}

fn modification_time(file: &Path) -> Result<i64, ScanError> {
  let map_err = |source| ScanError::Read { path: file.to_path_buf(), source };
  let modified = std::fs::metadata(file).map_err(map_err)?.modified().map_err(map_err)?;
  let seconds = modified.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
  Ok(seconds)
}

#[cfg(test)]
mod tests {
  use super::*;
  use filetime::FileTime;
  use std::fs;
  use tempfile::TempDir;

  const OLD: i64 = 1_000_000_000;
  const STAMP: i64 = 1_500_000_000;

  fn write_old(dir: &Path, rel: &str, content: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(OLD, 0)).unwrap();
    path
  }

  fn stamped(entries: &[&str]) -> HashMap<PathBuf, i64> {
    entries.iter().map(|e| (PathBuf::from(e), STAMP)).collect()
  }

  #[test]
  fn directive_extraction() {
    let source = concat!(
      "#include \"local.h\"\n",
      "# include <vector>\n",
      "#  include\"tight.h\"\n",
      "#pragma once\n",
      "// #include \"commented.h\" does not start with '#'\n",
      "int main() {}\n",
    );
    assert_eq!(
      parse_includes(source),
      vec![
        IncludeDirective { target: "local.h".into(), global: false },
        IncludeDirective { target: "vector".into(), global: true },
        IncludeDirective { target: "tight.h".into(), global: false },
      ]
    );
  }

  #[test]
  fn file_without_record_is_dirty() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "int main() {}\n");
    let timestamps = HashMap::new();
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::NeedsRecompilation);
  }

  #[test]
  fn recorded_file_older_than_its_stamp_is_up_to_date() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "int main() {}\n");
    let timestamps = stamped(&["main.c"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::UpToDate);
  }

  #[test]
  fn modification_in_the_stamped_second_recompiles() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "int main() {}\n");
    filetime::set_file_mtime(&main, FileTime::from_unix_time(STAMP, 0)).unwrap();
    let timestamps = stamped(&["main.c"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::NeedsRecompilation);
  }

  #[test]
  fn dirty_header_propagates_through_the_chain() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "#include \"a.h\"\nint main() {}\n");
    write_old(dir.path(), "a.h", "#include \"b.h\"\n");
    write_old(dir.path(), "b.h", "void b();\n");
    // main.c and a.h are recorded, b.h is not
    let timestamps = stamped(&["main.c", "a.h"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::NeedsRecompilation);
  }

  #[test]
  fn fully_recorded_chain_is_up_to_date() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "#include \"a.h\"\nint main() {}\n");
    write_old(dir.path(), "a.h", "#include \"b.h\"\n");
    write_old(dir.path(), "b.h", "void b();\n");
    let timestamps = stamped(&["main.c", "a.h", "b.h"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::UpToDate);
  }

  #[test]
  fn circular_includes_report_the_discovery_order() {
    let dir = TempDir::new().unwrap();
    let a = write_old(dir.path(), "a.h", "#include \"b.h\"\n");
    write_old(dir.path(), "b.h", "#include \"a.h\"\n");
    let timestamps = HashMap::new();
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    let err = scanner.scan(&a).unwrap_err();
    match err {
      ScanError::CircularInclude { trace, .. } => {
        assert_eq!(trace, "a.h\nb.h\na.h");
      }
      other => panic!("expected a circular include error, got {other}"),
    }
  }

  #[test]
  fn self_include_is_circular() {
    let dir = TempDir::new().unwrap();
    let a = write_old(dir.path(), "a.h", "#include \"a.h\"\n");
    let timestamps = HashMap::new();
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert!(matches!(scanner.scan(&a), Err(ScanError::CircularInclude { .. })));
  }

  #[test]
  fn missing_quoted_include_is_fatal() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "#include \"gone.h\"\n");
    let timestamps = HashMap::new();
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    let err = scanner.scan(&main).unwrap_err();
    assert!(matches!(err, ScanError::RelativeIncludeNotFound { include, .. } if include == "gone.h"));
  }

  #[test]
  fn global_include_uses_first_matching_header_folder() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "#include <x.h>\n");
    write_old(dir.path(), "first/x.h", "void x();\n");
    write_old(dir.path(), "second/x.h", "void x();\n");
    // only the copy in `second` is recorded; the hit in `first` is stale,
    // which proves the declared order decided the lookup
    let mut timestamps = stamped(&["main.c", "second/x.h"]);
    timestamps.insert(PathBuf::from("first/x.h"), 0);
    let folders = vec!["first".to_string(), "second".to_string()];
    let mut scanner = IncludeScanner::new(dir.path(), &folders, &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::NeedsRecompilation);
  }

  #[test]
  fn unresolved_global_include_is_external() {
    let dir = TempDir::new().unwrap();
    let main = write_old(dir.path(), "main.c", "#include <vector>\nint main() {}\n");
    let timestamps = stamped(&["main.c"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    assert_eq!(scanner.scan(&main).unwrap(), IncludeStatus::UpToDate);
  }

  #[test]
  fn shared_headers_are_memoized_across_sources() {
    let dir = TempDir::new().unwrap();
    let a = write_old(dir.path(), "a.c", "#include \"shared.h\"\n");
    let b = write_old(dir.path(), "b.c", "#include \"shared.h\"\n");
    write_old(dir.path(), "shared.h", "void s();\n");
    let timestamps = stamped(&["a.c", "b.c", "shared.h"]);
    let mut scanner = IncludeScanner::new(dir.path(), &[], &timestamps);
    scanner.scan(&a).unwrap();
    scanner.scan(&b).unwrap();
    let statuses = scanner.into_statuses();
    assert_eq!(statuses.len(), 3);
    assert_eq!(statuses.get(Path::new("shared.h")), Some(&IncludeStatus::UpToDate));
  }
}
