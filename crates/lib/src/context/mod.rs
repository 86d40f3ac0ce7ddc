//! Build contexts: one concurrent task per description file.
//!
//! A context parses its description as soon as it is spawned and folds its
//! include children's tables back in. When its operation is `Build` it then
//! dispatches on the run mode: the build action, a custom command list, or
//! CMake generation. Cross-context waits ride on watch channels: parents
//! wait for child states, the build action waits for the compile counter
//! and the finalizer flag written by the execution queue workers.

pub mod session;

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::RunMode;
use crate::consts::{BUILD_COMMAND, BUILD_DIR, NASM, TIMESTAMPS_FILE};
use crate::exec::{self, ExecUnit};
use crate::fields::{BuildField, DefineTable, Description, FieldError, Operation, TargetKind};
use crate::finder;
use crate::parser::{self, ParseError};
use crate::report;
use crate::scanner::{IncludeScanner, IncludeStatus, ScanError};
use crate::timestamp::{self, TimestampError};
use crate::translator::{self, TranslatorError};

use session::Session;

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  NotStarted,
  /// Description parsed and include children merged; the frozen tables are
  /// readable by other tasks.
  Parsed,
  Built,
  /// A toolchain process failed; the context refuses to finalize.
  BuiltError,
}

/// Errors that abort a context and, with it, the whole run.
#[derive(Debug, Error)]
pub enum ContextError {
  /// The description file could not be read.
  #[error("can't read description: {0}")]
  ReadDescription(#[from] io::Error),

  #[error("{0}")]
  Parse(#[from] ParseError),

  #[error("{0}")]
  Field(#[from] FieldError),

  #[error("{0}")]
  Scan(#[from] ScanError),

  #[error("{0}")]
  Timestamp(#[from] TimestampError),

  #[error("{0}")]
  Translate(#[from] TranslatorError),

  /// A file matched `Src` but no `Extensions` entry covers its extension.
  #[error("no toolchain options registered for \"{path}\"")]
  NoOptionsForFile { path: PathBuf },

  /// The matching `Extensions` entry has flags but no compiler.
  #[error("no compiler registered for \"{path}\"")]
  NoCompilerForFile { path: PathBuf },

  #[error("Type is StaticLib but no Archiver was set")]
  MissingArchiver,

  #[error("a Linker is required to link this target")]
  MissingLinker,

  #[error("can't create \"{path}\": {source}")]
  CreateDirectory {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// One description file being parsed and built.
///
/// Fields written while parsing are frozen once the state reaches
/// [`State::Parsed`]; afterwards the execution queue workers only touch the
/// compile counter, the finalizer flag, the failed-source set and the state.
pub struct Context {
  path: PathBuf,
  directory: PathBuf,
  operation: Operation,
  root: bool,
  seed_defines: DefineTable,
  session: Arc<Session>,
  state: watch::Sender<State>,
  compiles: watch::Sender<usize>,
  finalizer_done: watch::Sender<bool>,
  description: OnceLock<Description>,
  was_any_recompilation: AtomicBool,
  failed_sources: Mutex<HashSet<PathBuf>>,
  children: Mutex<Vec<Arc<Context>>>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
  /// Creates the context and launches its task immediately.
  ///
  /// Registration is the session's job so lookup-or-create stays atomic;
  /// never call this for a path that may already have a context.
  pub(crate) fn spawn(
    session: &Arc<Session>,
    path: PathBuf,
    operation: Operation,
    root: bool,
    seed_defines: DefineTable,
  ) -> Arc<Context> {
    let directory = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
      _ => PathBuf::from("."),
    };

    let ctx = Arc::new(Context {
      path,
      directory,
      operation,
      root,
      seed_defines,
      session: Arc::clone(session),
      state: watch::Sender::new(State::NotStarted),
      compiles: watch::Sender::new(0),
      finalizer_done: watch::Sender::new(false),
      description: OnceLock::new(),
      was_any_recompilation: AtomicBool::new(false),
      failed_sources: Mutex::new(HashSet::new()),
      children: Mutex::new(Vec::new()),
      task: Mutex::new(None),
    });

    let handle = tokio::spawn(Arc::clone(&ctx).run());
    *ctx.task.lock().unwrap() = Some(handle);
    ctx
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn operation(&self) -> Operation {
    self.operation
  }

  pub fn is_root(&self) -> bool {
    self.root
  }

  /// Artifact stem: the description file name without its extension.
  pub fn name(&self) -> String {
    self.path.file_stem().unwrap_or(self.path.as_os_str()).to_string_lossy().into_owned()
  }

  pub fn build_dir(&self) -> PathBuf {
    self.directory.join(BUILD_DIR)
  }

  pub fn timestamps_path(&self) -> PathBuf {
    self.build_dir().join(TIMESTAMPS_FILE)
  }

  pub fn static_library_path(&self) -> PathBuf {
    self.build_dir().join(format!("{}.a", self.name()))
  }

  pub fn executable_path(&self) -> PathBuf {
    self.build_dir().join(self.name())
  }

  /// The declared target kind, [`TargetKind::Unknown`] until parsed.
  pub fn target_kind(&self) -> TargetKind {
    self.description.get().map(|d| d.build.kind).unwrap_or_default()
  }

  /// The frozen description, available from [`State::Parsed`] on.
  pub fn description(&self) -> Option<&Description> {
    self.description.get()
  }

  pub fn state(&self) -> State {
    *self.state.borrow()
  }

  pub fn is_built_error(&self) -> bool {
    self.state() == State::BuiltError
  }

  pub fn was_any_recompilation(&self) -> bool {
    self.was_any_recompilation.load(Ordering::SeqCst)
  }

  /// Snapshot of the attached children, in attachment order.
  pub fn children(&self) -> Vec<Arc<Context>> {
    self.children.lock().unwrap().clone()
  }

  /// Waits for this context's task to finish. The root's task also drains
  /// the execution queue before it returns.
  pub async fn wait(&self) {
    let handle = self.task.lock().unwrap().take();
    if let Some(handle) = handle {
      let _ = handle.await;
    }
  }

  pub(crate) fn attach_child(&self, child: Arc<Context>) {
    self.children.lock().unwrap().push(child);
  }

  pub(crate) fn mark_built_error(&self) {
    self.state.send_replace(State::BuiltError);
  }

  pub(crate) fn add_compile(&self) {
    self.compiles.send_modify(|count| *count += 1);
  }

  pub(crate) fn finish_compile(&self) {
    self.compiles.send_modify(|count| *count = count.saturating_sub(1));
  }

  pub(crate) fn set_finalizer_done(&self) {
    self.finalizer_done.send_replace(true);
  }

  pub(crate) fn record_failed_source(&self, source: PathBuf) {
    self.failed_sources.lock().unwrap().insert(source);
  }

  fn set_state(&self, state: State) {
    self.state.send_replace(state);
  }

  pub(crate) async fn wait_parsed(&self) {
    // The sender lives in this context, the channel cannot close mid-wait.
    let _ = self.state.subscribe().wait_for(|state| *state != State::NotStarted).await;
  }

  pub(crate) async fn wait_terminal(&self) {
    let _ = self
      .state
      .subscribe()
      .wait_for(|state| matches!(state, State::Built | State::BuiltError))
      .await;
  }

  async fn wait_compiles_drained(&self) {
    let _ = self.compiles.subscribe().wait_for(|count| *count == 0).await;
  }

  async fn wait_finalizer_done(&self) {
    let _ = self.finalizer_done.subscribe().wait_for(|done| *done).await;
  }

  async fn run(self: Arc<Self>) {
    debug!(path = %self.path.display(), "context started");
    if let Err(error) = self.process().await {
      report::fatal(&format!("{}: {}", self.path.display(), error));
    }
  }

  async fn process(self: &Arc<Self>) -> Result<(), ContextError> {
    let source = tokio::fs::read_to_string(&self.path).await?;

    let mut description = parser::parse_description(
      &source,
      &self.session.config().flags,
      self.seed_defines.clone(),
      |pattern, operation, defines| self.session.spawn_children(self, pattern, operation, defines),
    )?;

    description.build.validate(&self.path)?;

    self.merge_children(&mut description).await;
    let description = self.description.get_or_init(|| description);
    self.set_state(State::Parsed);

    if self.operation == Operation::Build {
      self.process_by_mode(description).await?;
      if !self.is_built_error() {
        self.set_state(State::Built);
      }
    }

    if self.root {
      self.session.queue().stop();
      self.session.queue().wait().await;
    }
    Ok(())
  }

  /// Folds every `Parse`-kind child's tables into this description, in
  /// attachment order. Defines append per key; commands overwrite, so a
  /// later child shadows an earlier one.
  async fn merge_children(&self, description: &mut Description) {
    for child in self.children() {
      if child.operation() != Operation::Parse {
        continue;
      }
      child.wait_parsed().await;
      if let Some(theirs) = child.description() {
        description.defines.merge_from(&theirs.defines);
        description.commands.merge_from(&theirs.commands);
      }
    }
  }

  async fn process_by_mode(self: &Arc<Self>, description: &Description) -> Result<(), ContextError> {
    match self.session.config().mode {
      RunMode::Default => {
        if description.default_sequence.is_empty() {
          self.process_command(description, BUILD_COMMAND).await?;
        } else {
          for command in &description.default_sequence {
            self.process_command(description, command).await?;
            if self.is_built_error() {
              break;
            }
          }
        }
      }
      RunMode::CommandList => {
        for command in &self.session.config().arguments {
          self.process_command(description, command).await?;
          if self.is_built_error() {
            break;
          }
        }
      }
      RunMode::Generate => {
        self.wait_build_children_parsed().await;
        translator::generate_cmake(self, description)?;
      }
    }
    Ok(())
  }

  /// The literal command name `Build` always means the build action and
  /// shadows any user command of that name. Unknown names warn and no-op.
  async fn process_command(
    self: &Arc<Self>,
    description: &Description,
    name: &str,
  ) -> Result<(), ContextError> {
    if name == BUILD_COMMAND {
      return self.build(description).await;
    }
    match description.commands.get(name) {
      Some(lines) => {
        for line in lines {
          exec::blocking_cmd(line, &self.directory).await;
        }
      }
      None => report::print_warning(&format!("unknown command \"{}\"", name)),
    }
    Ok(())
  }

  async fn wait_build_children_parsed(&self) {
    for child in self.children() {
      if child.operation() == Operation::Build {
        child.wait_parsed().await;
      }
    }
  }

  /// The build action: scan every source, compile what is stale, persist
  /// the timestamps, then archive or link once per pass.
  async fn build(self: &Arc<Self>, description: &Description) -> Result<(), ContextError> {
    let build = &description.build;
    let mut timestamps = timestamp::read_store(&self.timestamps_path())?;

    let mut objects: Vec<String> = Vec::new();
    let mut scanner = IncludeScanner::new(&self.directory, &build.header_folders, &timestamps);

    for pattern in &build.sources {
      for file in finder::find_files(&self.directory, pattern) {
        let relative_source = finder::relative_to(&self.directory, &file);
        let dirty = scanner.scan(&file)? == IncludeStatus::NeedsRecompilation;

        let Some(options) = build.extension_for(&file) else {
          return Err(ContextError::NoOptionsForFile { path: file });
        };

        let object = object_path(&self.build_dir(), &relative_source);
        let relative_object = finder::relative_to(&self.directory, &object).display().to_string();
        objects.push(relative_object.clone());

        let needs_compile = dirty || !object.exists();
        self.was_any_recompilation.fetch_or(needs_compile, Ordering::SeqCst);
        if !needs_compile {
          continue;
        }

        let Some(compiler) = options.compiler.clone() else {
          return Err(ContextError::NoCompilerForFile { path: file });
        };

        if let Some(parent) = object.parent() {
          std::fs::create_dir_all(parent).map_err(|source| ContextError::CreateDirectory {
            path: parent.to_path_buf(),
            source,
          })?;
        }

        let mut args = options.flags.clone();
        if compiler != NASM {
          args.push("-c".to_string());
        }
        args.push(relative_source.display().to_string());
        args.push("-o".to_string());
        args.push(relative_object);

        self.session.queue().enqueue(ExecUnit::Compile {
          ctx: Arc::clone(self),
          compiler,
          source: relative_source,
          args,
        });
      }
    }

    let statuses = scanner.into_statuses();

    self.wait_compiles_drained().await;

    {
      let failed = self.failed_sources.lock().unwrap();
      for (path, status) in &statuses {
        if *status == IncludeStatus::NeedsRecompilation && !failed.contains(path) {
          timestamps.insert(path.clone(), self.session.config().timestamp);
        }
      }
    }
    timestamp::write_store(&self.timestamps_path(), &timestamps)?;

    let children = self.children();
    let mut dependency_libs: Vec<String> = Vec::new();
    for child in &children {
      if child.operation() != Operation::Build {
        continue;
      }
      child.wait_parsed().await;
      if child.target_kind() == TargetKind::StaticLib {
        let lib = finder::relative_to(&self.directory, &child.static_library_path());
        dependency_libs.push(lib.display().to_string());
        child.wait_terminal().await;
        if child.is_built_error() {
          self.mark_built_error();
        }
        if child.was_any_recompilation() {
          self.was_any_recompilation.store(true, Ordering::SeqCst);
        }
      }
    }

    if self.is_built_error() {
      return Ok(());
    }

    if self.was_any_recompilation() && (!objects.is_empty() || !dependency_libs.is_empty()) {
      let unit = self.finalizer_unit(build, objects, dependency_libs)?;
      self.finalizer_done.send_replace(false);
      if self.session.queue().enqueue(unit) {
        self.wait_finalizer_done().await;
      }
    }

    if self.is_built_error() {
      return Ok(());
    }

    for child in &children {
      if child.operation() == Operation::Build && child.target_kind() == TargetKind::Executable {
        child.wait_terminal().await;
        if child.is_built_error() {
          self.mark_built_error();
        }
      }
    }

    if !self.is_built_error() {
      self.set_state(State::Built);
    }
    Ok(())
  }

  /// The single Archive or Link unit closing a build pass. Dependency
  /// libraries bracket the object list so a single-pass linker resolves
  /// symbols between mutually-referencing archives.
  fn finalizer_unit(
    self: &Arc<Self>,
    build: &BuildField,
    objects: Vec<String>,
    dependency_libs: Vec<String>,
  ) -> Result<ExecUnit, ContextError> {
    match build.kind {
      TargetKind::StaticLib => {
        let Some(archiver) = build.archiver.clone() else {
          return Err(ContextError::MissingArchiver);
        };
        let output =
          finder::relative_to(&self.directory, &self.static_library_path()).display().to_string();
        let mut args = vec!["rcs".to_string(), output.clone()];
        args.extend(objects);
        args.extend(dependency_libs);
        Ok(ExecUnit::Archive { ctx: Arc::clone(self), archiver, output, args })
      }
      _ => {
        let Some(linker) = build.linker.clone() else {
          return Err(ContextError::MissingLinker);
        };
        let output =
          finder::relative_to(&self.directory, &self.executable_path()).display().to_string();
        let mut args = build.linker_flags.clone();
        args.extend(dependency_libs.iter().cloned());
        args.extend(objects);
        args.extend(dependency_libs);
        args.push("-o".to_string());
        args.push(output.clone());
        Ok(ExecUnit::Link { ctx: Arc::clone(self), linker, output, args })
      }
    }
  }
}

/// Object artifact for a source: the source path mirrored under the build
/// directory with `.o` appended to the full file name.
fn object_path(build_dir: &Path, relative_source: &Path) -> PathBuf {
  let mut object = build_dir.join(relative_source).into_os_string();
  object.push(".o");
  PathBuf::from(object)
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::fs;

  use tempfile::TempDir;

  use crate::config::RunConfig;

  fn config_with_mode(args: &[&str]) -> RunConfig {
    RunConfig::resolve(args.iter().map(|s| s.to_string()))
  }

  fn spawn_for(dir: &TempDir, name: &str, source: &str) -> Arc<Context> {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    let session = Session::new(config_with_mode(&["generate"]));
    session.spawn_root(path)
  }

  #[test]
  fn object_path_appends_suffix_to_the_full_file_name() {
    let object = object_path(Path::new("GantryBuild"), Path::new("src/main.cpp"));
    assert_eq!(object, Path::new("GantryBuild/src/main.cpp.o"));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn derived_paths_use_the_description_stem() {
    let dir = TempDir::new().unwrap();
    let ctx = spawn_for(&dir, "demo.gantry", "Build:\n    Type: StaticLib\n");
    ctx.wait().await;

    assert_eq!(ctx.name(), "demo");
    assert_eq!(ctx.build_dir(), dir.path().join("GantryBuild"));
    assert_eq!(ctx.static_library_path(), dir.path().join("GantryBuild/demo.a"));
    assert_eq!(ctx.executable_path(), dir.path().join("GantryBuild/demo"));
    assert_eq!(ctx.timestamps_path(), dir.path().join("GantryBuild/timestamps.ginfo"));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn parsed_description_is_frozen_with_target_kind() {
    let dir = TempDir::new().unwrap();
    let ctx = spawn_for(&dir, "lib.gantry", "Build:\n    Type: StaticLib\n");
    ctx.wait().await;

    assert_eq!(ctx.target_kind(), TargetKind::StaticLib);
    assert!(ctx.description().is_some());
    assert_eq!(ctx.state(), State::Built);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn compile_counter_balances_to_zero() {
    let dir = TempDir::new().unwrap();
    let ctx = spawn_for(&dir, "app.gantry", "Build:\n    Type: Executable\n");
    ctx.wait().await;

    ctx.add_compile();
    ctx.add_compile();
    ctx.finish_compile();
    ctx.finish_compile();
    ctx.wait_compiles_drained().await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn built_error_is_terminal_over_built() {
    let dir = TempDir::new().unwrap();
    let ctx = spawn_for(&dir, "app.gantry", "Build:\n    Type: Executable\n");
    ctx.wait().await;

    ctx.mark_built_error();
    assert!(ctx.is_built_error());
    ctx.wait_terminal().await;
  }
}
