//! Process-wide build session shared by every context.
//!
//! The session owns the run configuration, the execution queue, and the
//! path-to-context registry. Lookup and creation happen under one registry
//! lock acquisition, which is what guarantees at most one context per
//! resolved description path no matter how many parents reference it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::RunConfig;
use crate::context::Context;
use crate::exec::ExecQueue;
use crate::fields::{DefineTable, Operation};
use crate::finder;

/// One build run; contexts reach it through an `Arc` for the whole process
/// lifetime.
pub struct Session {
  config: RunConfig,
  queue: ExecQueue,
  registry: Mutex<HashMap<PathBuf, Arc<Context>>>,
}

impl Session {
  pub fn new(config: RunConfig) -> Arc<Session> {
    let queue = ExecQueue::new(config.jobs);
    Arc::new(Session { config, queue, registry: Mutex::new(HashMap::new()) })
  }

  pub fn config(&self) -> &RunConfig {
    &self.config
  }

  pub fn queue(&self) -> &ExecQueue {
    &self.queue
  }

  /// Starts the root context for a description path.
  pub fn spawn_root(self: &Arc<Self>, path: PathBuf) -> Arc<Context> {
    self.get_or_spawn(&path, Operation::Build, true, &DefineTable::default())
  }

  /// Resolves a child pattern against the parent's directory and attaches a
  /// context for every matching description, creating contexts only for
  /// paths never seen before. Returns whether anything matched.
  ///
  /// Called re-entrantly from the parent's own parse, so it must never wait
  /// on any context state.
  pub(crate) fn spawn_children(
    self: &Arc<Self>,
    parent: &Arc<Context>,
    pattern: &str,
    operation: Operation,
    seed_defines: &DefineTable,
  ) -> bool {
    let matches = finder::find_descriptions(parent.directory(), pattern);
    if matches.is_empty() {
      return false;
    }
    for path in matches {
      let child = self.get_or_spawn(&path, operation, false, seed_defines);
      parent.attach_child(child);
    }
    true
  }

  /// True when any registered context ended in a build error; decides the
  /// process exit code.
  pub fn any_built_error(&self) -> bool {
    self.registry.lock().unwrap().values().any(|ctx| ctx.is_built_error())
  }

  /// Snapshot of every registered context.
  pub fn contexts(&self) -> Vec<Arc<Context>> {
    self.registry.lock().unwrap().values().cloned().collect()
  }

  /// Waits until every registered context task has returned. A context
  /// being awaited can still register descendants, so one snapshot is not
  /// enough; passes repeat until the registry stops growing.
  pub async fn wait_all(&self) {
    loop {
      let snapshot = self.contexts();
      for ctx in &snapshot {
        ctx.wait().await;
      }
      if self.registry.lock().unwrap().len() == snapshot.len() {
        return;
      }
    }
  }

  fn get_or_spawn(
    self: &Arc<Self>,
    path: &Path,
    operation: Operation,
    root: bool,
    seed_defines: &DefineTable,
  ) -> Arc<Context> {
    let key = registry_key(path);
    let mut registry = self.registry.lock().unwrap();
    if let Some(existing) = registry.get(&key) {
      debug!(path = %path.display(), "context already registered");
      return Arc::clone(existing);
    }
    let ctx = Context::spawn(self, path.to_path_buf(), operation, root, seed_defines.clone());
    registry.insert(key, Arc::clone(&ctx));
    ctx
  }
}

/// Registry keys resolve symlinks and `..` so every spelling of one
/// description file lands on one context. Falls back to a lexical
/// normalization for paths the OS cannot resolve.
fn registry_key(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| finder::normalize(path))
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::fs;

  use tempfile::TempDir;

  use crate::config::RunConfig;

  fn generate_session() -> Arc<Session> {
    Session::new(RunConfig::resolve(["generate".to_string()]))
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn same_path_through_different_spellings_is_one_context() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("mod.gantry"), "Build:\n    Type: StaticLib\n").unwrap();
    let session = generate_session();

    let direct = session.get_or_spawn(
      &dir.path().join("mod.gantry"),
      Operation::Parse,
      false,
      &DefineTable::default(),
    );
    let dotted = session.get_or_spawn(
      &dir.path().join(".").join("mod.gantry"),
      Operation::Parse,
      false,
      &DefineTable::default(),
    );

    assert!(Arc::ptr_eq(&direct, &dotted));
    direct.wait().await;
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn spawn_children_reports_missing_patterns() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("root.gantry"), "Build:\n    Type: Executable\n").unwrap();
    let session = generate_session();
    let root = session.spawn_root(dir.path().join("root.gantry"));
    root.wait().await;

    assert!(!session.spawn_children(&root, "no-such-dir/*.gantry", Operation::Parse, &DefineTable::default()));
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn concurrent_get_or_spawn_yields_one_context() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("shared.gantry"), "Build:\n    Type: StaticLib\n").unwrap();
    let session = generate_session();
    let path = dir.path().join("shared.gantry");

    let mut handles = Vec::new();
    for _ in 0..8 {
      let session = Arc::clone(&session);
      let path = path.clone();
      handles.push(tokio::spawn(async move {
        session.get_or_spawn(&path, Operation::Parse, false, &DefineTable::default())
      }));
    }

    let mut contexts = Vec::new();
    for handle in handles {
      contexts.push(handle.await.unwrap());
    }
    for ctx in &contexts {
      assert!(Arc::ptr_eq(ctx, &contexts[0]));
    }
    contexts[0].wait().await;
  }
}
