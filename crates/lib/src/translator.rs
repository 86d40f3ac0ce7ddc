//! CMake emission for resolved build contexts.
//!
//! Generate mode writes one `CMakeLists.txt` per Build-kind context,
//! mirroring what the build action would otherwise do: the target over its
//! resolved source list, include directories, subdirectory references for
//! dependency children and link lines for the static libraries among them.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use crate::fields::{Description, Operation, TargetKind};
use crate::finder;

#[derive(Debug, Error)]
pub enum TranslatorError {
  #[error("can't write \"{path}\": {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Writes `CMakeLists.txt` for one context from its frozen description.
///
/// Build-kind children must already be parsed when this runs; the caller
/// waits for them so their target kinds and names are final.
///
/// # Errors
///
/// Only the file write can fail; rendering is infallible.
pub fn generate_cmake(ctx: &Context, description: &Description) -> Result<(), TranslatorError> {
  let path = ctx.directory().join("CMakeLists.txt");
  let content = render(ctx, description);
  std::fs::write(&path, content)
    .map_err(|source| TranslatorError::Write { path: path.clone(), source })?;
  debug!(path = %path.display(), "wrote CMake project");
  Ok(())
}

fn render(ctx: &Context, description: &Description) -> String {
  let build = &description.build;
  let name = ctx.name();
  let mut out = String::new();

  if ctx.is_root() {
    out.push_str("cmake_minimum_required(VERSION 3.16)\n");
    out.push_str(&format!("project({})\n\n", name));
  }

  let mut extensions: Vec<_> = build.extensions().iter().collect();
  extensions.sort_by(|a, b| a.0.cmp(b.0));
  for (extension, options) in extensions {
    if let Some(compiler) = &options.compiler {
      match cmake_lang(extension) {
        Some(lang) => out.push_str(&format!("set(CMAKE_{}_COMPILER {})\n", lang, compiler)),
        None => out.push_str(&format!("# {}: compiled with {}\n", extension, compiler)),
      }
    }
    if !options.flags.is_empty() {
      let flags = options.flags.join(" ");
      match cmake_lang(extension) {
        Some(lang) => out.push_str(&format!("set(CMAKE_{}_FLAGS \"{}\")\n", lang, flags)),
        None => out.push_str(&format!("# {} flags: {}\n", extension, flags)),
      }
    }
  }

  let children = build_children(ctx);
  if !children.is_empty() {
    out.push('\n');
    for child in &children {
      let subdir = finder::relative_to(ctx.directory(), child.directory());
      out.push_str(&format!("add_subdirectory({})\n", subdir.display()));
    }
  }

  if build.kind != TargetKind::Unknown {
    let sources: Vec<String> = build
      .sources
      .iter()
      .flat_map(|pattern| finder::find_files(ctx.directory(), pattern))
      .map(|file| finder::relative_to(ctx.directory(), &file).display().to_string())
      .collect();

    out.push('\n');
    match build.kind {
      TargetKind::StaticLib => {
        out.push_str(&format!("add_library({} STATIC {})\n", name, sources.join(" ")));
      }
      _ => {
        out.push_str(&format!("add_executable({} {})\n", name, sources.join(" ")));
      }
    }

    if !build.header_folders.is_empty() {
      out.push_str(&format!(
        "target_include_directories({} PRIVATE {})\n",
        name,
        build.header_folders.join(" ")
      ));
    }

    let libs: Vec<String> = children
      .iter()
      .filter(|child| child.target_kind() == TargetKind::StaticLib)
      .map(|child| child.name())
      .collect();
    if !libs.is_empty() {
      out.push_str(&format!("target_link_libraries({} PRIVATE {})\n", name, libs.join(" ")));
    }
  }

  out
}

/// Build-kind children in attachment order, each directory once.
fn build_children(ctx: &Context) -> Vec<Arc<Context>> {
  let mut seen = HashSet::new();
  ctx
    .children()
    .into_iter()
    .filter(|child| child.operation() == Operation::Build)
    .filter(|child| seen.insert(child.directory().to_path_buf()))
    .collect()
}

/// CMake language variable infix for a source extension, when one exists.
fn cmake_lang(extension: &str) -> Option<&'static str> {
  match extension {
    "cpp" | "cc" | "cxx" => Some("CXX"),
    "c" => Some("C"),
    "s" | "S" | "asm" => Some("ASM"),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::fs;

  use tempfile::TempDir;

  use crate::config::RunConfig;
  use crate::context::session::Session;

  async fn generate(dir: &TempDir) -> (String, String) {
    let session = Session::new(RunConfig::resolve(["generate".to_string()]));
    let root = session.spawn_root(dir.path().join("app.gantry"));
    root.wait().await;
    for ctx in session.contexts() {
      ctx.wait().await;
    }

    let root_cmake = fs::read_to_string(dir.path().join("CMakeLists.txt")).unwrap();
    let child_cmake = fs::read_to_string(dir.path().join("libx/CMakeLists.txt")).unwrap();
    (root_cmake, child_cmake)
  }

  fn write_project(dir: &TempDir) {
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::create_dir_all(dir.path().join("include")).unwrap();
    fs::create_dir_all(dir.path().join("libx")).unwrap();
    fs::write(dir.path().join("src/main.cpp"), "int main() { return 0; }\n").unwrap();
    fs::write(dir.path().join("libx/impl.c"), "int impl(void) { return 1; }\n").unwrap();
    fs::write(
      dir.path().join("app.gantry"),
      "Build:\n\
       \x20   Type: Executable\n\
       \x20   Src: src/*.cpp\n\
       \x20   HeaderFolders: include\n\
       \x20   Depends: libx\n\
       \x20   Extensions:\n\
       \x20       cpp:\n\
       \x20           Compiler: g++\n\
       \x20           Flags: -O2, -Wall\n\
       \x20   Link:\n\
       \x20       Linker: g++\n",
    )
    .unwrap();
    fs::write(
      dir.path().join("libx/libx.gantry"),
      "Build:\n\
       \x20   Type: StaticLib\n\
       \x20   Src: *.c\n\
       \x20   Extensions:\n\
       \x20       c:\n\
       \x20           Compiler: gcc\n\
       \x20   Archiver: ar\n",
    )
    .unwrap();
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn root_project_references_children_and_sources() {
    let dir = TempDir::new().unwrap();
    write_project(&dir);
    let (root_cmake, _) = generate(&dir).await;

    assert!(root_cmake.contains("cmake_minimum_required"));
    assert!(root_cmake.contains("project(app)"));
    assert!(root_cmake.contains("set(CMAKE_CXX_COMPILER g++)"));
    assert!(root_cmake.contains("set(CMAKE_CXX_FLAGS \"-O2 -Wall\")"));
    assert!(root_cmake.contains("add_subdirectory(libx)"));
    assert!(root_cmake.contains("add_executable(app src/main.cpp)"));
    assert!(root_cmake.contains("target_include_directories(app PRIVATE include)"));
    assert!(root_cmake.contains("target_link_libraries(app PRIVATE libx)"));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn child_projects_skip_the_preamble() {
    let dir = TempDir::new().unwrap();
    write_project(&dir);
    let (_, child_cmake) = generate(&dir).await;

    assert!(!child_cmake.contains("project("));
    assert!(!child_cmake.contains("cmake_minimum_required"));
    assert!(child_cmake.contains("set(CMAKE_C_COMPILER gcc)"));
    assert!(child_cmake.contains("add_library(libx STATIC impl.c)"));
  }
}
