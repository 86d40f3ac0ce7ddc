//! Filesystem lookups: glob matching, description discovery and the path
//! algebra used for store keys and object paths.
//!
//! Patterns use `*` and `?` within one path segment and `**` to span
//! segments. All lookups return lexicographically sorted results so child
//! attachment and compile order are deterministic across runs.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::consts::DESCRIPTION_EXTENSION;

#[derive(Debug, Error)]
pub enum FinderError {
  #[error("no build description found in {dir}")]
  NoDescription { dir: PathBuf },
  #[error("multiple build descriptions found in {dir}; keep exactly one")]
  MultipleDescriptions { dir: PathBuf },
}

/// Files matching `pattern` resolved against `dir`, sorted. A pattern
/// without wildcards is a plain path lookup.
pub fn find_files(dir: &Path, pattern: &str) -> Vec<PathBuf> {
  let mut matches: Vec<PathBuf> =
    find_entries(dir, pattern).into_iter().filter(|path| path.is_file()).collect();
  matches.sort();
  matches
}

/// Build descriptions matching `pattern`: description files keep their
/// match, matched directories expand to the description files directly
/// inside them. `Depends: ../libnet` and `Include: mods/*.gantry` both
/// resolve through here.
pub fn find_descriptions(dir: &Path, pattern: &str) -> Vec<PathBuf> {
  let mut out = Vec::new();
  for candidate in find_entries(dir, pattern) {
    if candidate.is_dir() {
      out.extend(descriptions_in(&candidate));
    } else if is_description(&candidate) && candidate.is_file() {
      out.push(candidate);
    }
  }
  out.sort();
  out.dedup();
  out
}

/// Description files directly inside `dir`, sorted.
pub fn descriptions_in(dir: &Path) -> Vec<PathBuf> {
  let mut out: Vec<PathBuf> = match std::fs::read_dir(dir) {
    Ok(entries) => entries
      .filter_map(Result::ok)
      .map(|entry| entry.path())
      .filter(|path| path.is_file() && is_description(path))
      .collect(),
    Err(_) => Vec::new(),
  };
  out.sort();
  out
}

/// The one description file of the working directory.
///
/// # Errors
///
/// Zero or several description files directly in `dir` is a startup error.
pub fn find_root_description(dir: &Path) -> Result<PathBuf, FinderError> {
  let mut descriptions = descriptions_in(dir);
  match descriptions.len() {
    0 => Err(FinderError::NoDescription { dir: dir.to_path_buf() }),
    1 => Ok(descriptions.remove(0)),
    _ => Err(FinderError::MultipleDescriptions { dir: dir.to_path_buf() }),
  }
}

fn is_description(path: &Path) -> bool {
  path.extension().and_then(|ext| ext.to_str()) == Some(DESCRIPTION_EXTENSION)
}

/// Matching entries of any kind. The literal prefix of the pattern moves
/// the walk root; only the wildcard tail is matched segment-wise.
fn find_entries(dir: &Path, pattern: &str) -> Vec<PathBuf> {
  let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
  let first_wild = segments.iter().position(|s| s.contains(['*', '?']));
  let Some(first_wild) = first_wild else {
    let candidate = normalize(&dir.join(pattern));
    return if candidate.exists() { vec![candidate] } else { Vec::new() };
  };

  let mut root = dir.to_path_buf();
  for segment in &segments[..first_wild] {
    root.push(segment);
  }
  let root = normalize(&root);
  let tail = &segments[first_wild..];

  let max_depth = if tail.contains(&"**") { usize::MAX } else { tail.len() };
  let mut matches = Vec::new();
  for entry in WalkDir::new(&root).min_depth(1).max_depth(max_depth).into_iter().filter_map(Result::ok) {
    let rel = relative_to(&root, entry.path());
    let rel_parts: Vec<String> = rel
      .components()
      .filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
      })
      .collect();
    if components_match(tail, &rel_parts) {
      matches.push(entry.into_path());
    }
  }
  matches
}

fn components_match(pattern: &[&str], path: &[String]) -> bool {
  let Some((first, rest)) = pattern.split_first() else {
    return path.is_empty();
  };
  if *first == "**" {
    return (0..=path.len()).any(|skip| components_match(rest, &path[skip..]));
  }
  match path.split_first() {
    Some((segment, remaining)) => segment_match(first, segment) && components_match(rest, remaining),
    None => false,
  }
}

/// `*` and `?` matching within one segment, with star backtracking.
fn segment_match(pattern: &str, text: &str) -> bool {
  let pattern: Vec<char> = pattern.chars().collect();
  let text: Vec<char> = text.chars().collect();
  let (mut pi, mut ti) = (0, 0);
  let mut star: Option<(usize, usize)> = None;
  while ti < text.len() {
    if pi < pattern.len() && (pattern[pi] == '?' || pattern[pi] == text[ti]) {
      pi += 1;
      ti += 1;
    } else if pi < pattern.len() && pattern[pi] == '*' {
      star = Some((pi, ti));
      pi += 1;
    } else if let Some((star_pi, star_ti)) = star {
      pi = star_pi + 1;
      ti = star_ti + 1;
      star = Some((star_pi, star_ti + 1));
    } else {
      return false;
    }
  }
  pattern[pi..].iter().all(|c| *c == '*')
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem. Leading `..` components are kept.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => match out.components().next_back() {
        Some(Component::Normal(_)) => {
          out.pop();
        }
        Some(Component::RootDir) => {}
        _ => out.push(".."),
      },
      other => out.push(other.as_os_str()),
    }
  }
  if out.as_os_str().is_empty() { PathBuf::from(".") } else { out }
}

/// Lexical relative path from `dir` to `path`, both normalized first.
/// Mirrors how store keys and object paths are derived from absolute
/// source paths.
pub fn relative_to(dir: &Path, path: &Path) -> PathBuf {
  let dir = normalize(dir);
  let path = normalize(path);
  let mut dir_parts = dir.components().peekable();
  let mut path_parts = path.components().peekable();
  while let (Some(a), Some(b)) = (dir_parts.peek(), path_parts.peek()) {
    if a == b {
      dir_parts.next();
      path_parts.next();
    } else {
      break;
    }
  }
  let mut rel = PathBuf::new();
  for component in dir_parts {
    // `.` stands for zero directories, nothing to climb out of
    if !matches!(component, Component::RootDir | Component::CurDir) {
      rel.push("..");
    }
  }
  for component in path_parts {
    rel.push(component.as_os_str());
  }
  if rel.as_os_str().is_empty() { PathBuf::from(".") } else { rel }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn touch(dir: &Path, rel: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, b"").unwrap();
    path
  }

  fn names(paths: &[PathBuf], root: &Path) -> Vec<String> {
    paths.iter().map(|p| relative_to(root, p).display().to_string()).collect()
  }

  #[test]
  fn plain_path_lookup_without_wildcards() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "main.cpp");
    assert_eq!(find_files(dir.path(), "main.cpp").len(), 1);
    assert!(find_files(dir.path(), "missing.cpp").is_empty());
  }

  #[test]
  fn star_matches_within_one_segment_only() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "a.cpp");
    touch(dir.path(), "b.cpp");
    touch(dir.path(), "notes.txt");
    touch(dir.path(), "src/deep.cpp");
    let found = find_files(dir.path(), "*.cpp");
    assert_eq!(names(&found, dir.path()), vec!["a.cpp", "b.cpp"]);
  }

  #[test]
  fn double_star_spans_segments() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "top.h");
    touch(dir.path(), "src/a.h");
    touch(dir.path(), "src/nested/b.h");
    let found = find_files(dir.path(), "**/*.h");
    assert_eq!(names(&found, dir.path()), vec!["src/a.h", "src/nested/b.h", "top.h"]);
  }

  #[test]
  fn question_mark_matches_one_character() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "a1.c");
    touch(dir.path(), "a22.c");
    let found = find_files(dir.path(), "a?.c");
    assert_eq!(names(&found, dir.path()), vec!["a1.c"]);
  }

  #[test]
  fn literal_prefix_moves_the_walk_root() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "shared/src/x.cpp");
    touch(dir.path(), "module/unused.cpp");
    let base = dir.path().join("module");
    let found = find_files(&base, "../shared/src/*.cpp");
    assert_eq!(found, vec![normalize(&dir.path().join("shared/src/x.cpp"))]);
  }

  #[test]
  fn results_are_sorted() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "z.c");
    touch(dir.path(), "a.c");
    touch(dir.path(), "m.c");
    assert_eq!(names(&find_files(dir.path(), "*.c"), dir.path()), vec!["a.c", "m.c", "z.c"]);
  }

  #[test]
  fn directory_dependency_expands_to_its_descriptions() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "libnet/libnet.gantry");
    touch(dir.path(), "libnet/readme.md");
    let base = dir.path().join("app");
    fs::create_dir_all(&base).unwrap();
    let found = find_descriptions(&base, "../libnet");
    assert_eq!(found, vec![normalize(&dir.path().join("libnet/libnet.gantry"))]);
  }

  #[test]
  fn description_glob_keeps_only_description_files() {
    let dir = TempDir::new().unwrap();
    touch(dir.path(), "mods/a.gantry");
    touch(dir.path(), "mods/b.gantry");
    touch(dir.path(), "mods/other.txt");
    let found = find_descriptions(dir.path(), "mods/*");
    assert_eq!(names(&found, dir.path()), vec!["mods/a.gantry", "mods/b.gantry"]);
  }

  #[test]
  fn root_description_must_be_unique() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
      find_root_description(dir.path()),
      Err(FinderError::NoDescription { .. })
    ));
    touch(dir.path(), "app.gantry");
    assert!(find_root_description(dir.path()).is_ok());
    touch(dir.path(), "second.gantry");
    assert!(matches!(
      find_root_description(dir.path()),
      Err(FinderError::MultipleDescriptions { .. })
    ));
  }

  #[test]
  fn normalize_resolves_dot_components() {
    assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
    assert_eq!(normalize(Path::new("../../x")), PathBuf::from("../../x"));
    assert_eq!(normalize(Path::new("a/..")), PathBuf::from("."));
  }

  #[test]
  fn relative_to_walks_up_and_down() {
    assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/b/c/d.h")), PathBuf::from("c/d.h"));
    assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/x/y.h")), PathBuf::from("../x/y.h"));
    assert_eq!(relative_to(Path::new("/a/b"), Path::new("/a/b")), PathBuf::from("."));
  }

  #[test]
  fn relative_to_dot_base_keeps_paths_in_place() {
    assert_eq!(relative_to(Path::new("."), Path::new("main.c")), PathBuf::from("main.c"));
    assert_eq!(relative_to(Path::new("."), Path::new("./lib/a.c")), PathBuf::from("lib/a.c"));
    assert_eq!(relative_to(Path::new("."), Path::new("../up.c")), PathBuf::from("../up.c"));
  }
}
