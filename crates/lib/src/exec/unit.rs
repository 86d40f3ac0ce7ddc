//! Work items flowing through the execution queue.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::Context;

/// One external toolchain invocation, tagged by what it produces.
///
/// Compile units update their context's compile counter; Archive and Link
/// units are finalizers and set the finalizer flag instead. Paths are kept
/// relative to the owning context's directory, which is also the working
/// directory of the spawned process.
pub enum ExecUnit {
  /// Compiles one source file into an object.
  Compile {
    ctx: Arc<Context>,
    compiler: String,
    /// Source path relative to the context directory; named in reports and
    /// recorded in the failed-source set on failure.
    source: PathBuf,
    args: Vec<String>,
  },
  /// Archives the context's objects into a static library.
  Archive {
    ctx: Arc<Context>,
    archiver: String,
    /// Archive path relative to the context directory.
    output: String,
    args: Vec<String>,
  },
  /// Links the context's objects into an executable.
  Link {
    ctx: Arc<Context>,
    linker: String,
    /// Executable path relative to the context directory.
    output: String,
    args: Vec<String>,
  },
}

impl ExecUnit {
  /// The context whose counters and state this unit updates.
  pub fn context(&self) -> &Arc<Context> {
    match self {
      ExecUnit::Compile { ctx, .. }
      | ExecUnit::Archive { ctx, .. }
      | ExecUnit::Link { ctx, .. } => ctx,
    }
  }

  /// The program to spawn.
  pub fn tool(&self) -> &str {
    match self {
      ExecUnit::Compile { compiler, .. } => compiler,
      ExecUnit::Archive { archiver, .. } => archiver,
      ExecUnit::Link { linker, .. } => linker,
    }
  }

  pub fn args(&self) -> &[String] {
    match self {
      ExecUnit::Compile { args, .. }
      | ExecUnit::Archive { args, .. }
      | ExecUnit::Link { args, .. } => args,
    }
  }

  /// What status lines call this unit: the source file for compiles, the
  /// produced artifact otherwise.
  pub fn subject(&self) -> String {
    match self {
      ExecUnit::Compile { source, .. } => source.display().to_string(),
      ExecUnit::Archive { output, .. } | ExecUnit::Link { output, .. } => output.clone(),
    }
  }

  pub fn is_compile(&self) -> bool {
    matches!(self, ExecUnit::Compile { .. })
  }
}
