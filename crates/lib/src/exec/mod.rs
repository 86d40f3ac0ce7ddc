//! Bounded worker pool running external toolchain processes.
//!
//! Units are dispatched first-in first-out to a fixed number of workers
//! sharing one channel receiver. A failed unit never cancels queued or
//! in-flight siblings: the pool drains everything it accepted, so one broken
//! source file surfaces alongside every other diagnostic of the same pass.

mod unit;

pub use unit::ExecUnit;

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::report;

type SharedReceiver = Arc<AsyncMutex<UnboundedReceiver<ExecUnit>>>;

/// Fixed number of concurrent execution slots fed from one FIFO channel.
pub struct ExecQueue {
  sender: Mutex<Option<UnboundedSender<ExecUnit>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecQueue {
  /// Starts a pool with `slots` workers.
  pub fn new(slots: usize) -> Self {
    let (sender, receiver) = mpsc::unbounded_channel();
    let receiver: SharedReceiver = Arc::new(AsyncMutex::new(receiver));

    let workers = (0..slots.max(1))
      .map(|_| tokio::spawn(worker(Arc::clone(&receiver))))
      .collect();

    ExecQueue {
      sender: Mutex::new(Some(sender)),
      workers: Mutex::new(workers),
    }
  }

  /// Accepts a unit for execution.
  ///
  /// Compile units are counted against their context before they become
  /// visible to any worker, so the context's drain wait can never observe a
  /// decrement ahead of its increment. Returns `false` when the queue has
  /// already been stopped; the unit is dropped and nothing is counted.
  pub fn enqueue(&self, unit: ExecUnit) -> bool {
    let sender = self.sender.lock().unwrap();
    let Some(sender) = sender.as_ref() else {
      warn!(subject = %unit.subject(), "unit dropped, queue already stopped");
      return false;
    };

    if unit.is_compile() {
      unit.context().add_compile();
    }
    if let Err(rejected) = sender.send(unit) {
      let unit = rejected.0;
      if unit.is_compile() {
        unit.context().finish_compile();
      }
      warn!(subject = %unit.subject(), "unit dropped, workers already exited");
      return false;
    }
    true
  }

  /// Stops accepting work; workers exit once the queue drains. Idempotent.
  pub fn stop(&self) {
    self.sender.lock().unwrap().take();
  }

  /// Waits until every worker has exited. Call after [`ExecQueue::stop`].
  pub async fn wait(&self) {
    let workers = std::mem::take(&mut *self.workers.lock().unwrap());
    for worker in workers {
      if let Err(error) = worker.await {
        warn!(%error, "worker task aborted");
      }
    }
  }
}

async fn worker(receiver: SharedReceiver) {
  loop {
    // Hold the receiver lock only while dequeuing, never while a process
    // runs, so the other slots stay busy.
    let unit = {
      let mut receiver = receiver.lock().await;
      receiver.recv().await
    };
    match unit {
      Some(unit) => run_unit(unit).await,
      None => break,
    }
  }
}

/// Runs one unit's process and applies the result to the owning context.
///
/// The compile-counter decrement and the finalizer flag are written last,
/// after any `BuiltError` mark, so a build action resumed by either gate
/// always observes the failure.
async fn run_unit(unit: ExecUnit) {
  let subject = unit.subject();
  debug!(tool = unit.tool(), subject = %subject, "running unit");

  let result = Command::new(unit.tool())
    .args(unit.args())
    .current_dir(unit.context().directory())
    .output()
    .await;

  match result {
    Ok(output) => {
      if output.status.success() {
        if output.stdout.is_empty() && output.stderr.is_empty() {
          report::print_success(&subject);
        } else {
          report::print_warning(&subject);
        }
      } else {
        report::print_error(&format!("{} failed ({})", subject, output.status));
        fail(&unit);
      }
      report::forward_output(&output.stdout);
      report::forward_output(&output.stderr);
    }
    Err(error) => {
      report::print_error(&format!("{}: {}", subject, error));
      fail(&unit);
    }
  }

  finish(&unit);
}

/// Marks the owning context broken; a failed compile also poisons its source
/// so the next timestamp-store write skips it.
fn fail(unit: &ExecUnit) {
  let ctx = unit.context();
  ctx.mark_built_error();
  if let ExecUnit::Compile { source, .. } = unit {
    ctx.record_failed_source(source.clone());
  }
}

/// Releases whichever gate the owning build action blocks on for this unit.
fn finish(unit: &ExecUnit) {
  match unit {
    ExecUnit::Compile { ctx, .. } => ctx.finish_compile(),
    ExecUnit::Archive { ctx, .. } | ExecUnit::Link { ctx, .. } => ctx.set_finalizer_done(),
  }
}

/// Runs one custom command line through `/bin/sh`, inheriting the standard
/// streams. A non-zero exit is reported as a warning; the command list keeps
/// running either way.
pub async fn blocking_cmd(command: &str, cwd: &Path) {
  debug!(cmd = %command, "running blocking command");
  let result = Command::new("/bin/sh")
    .arg("-c")
    .arg(command)
    .current_dir(cwd)
    .status()
    .await;

  match result {
    Ok(status) if !status.success() => {
      report::print_warning(&format!("{} ({})", command, status));
    }
    Ok(_) => {}
    Err(error) => {
      report::print_warning(&format!("{}: {}", command, error));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use tempfile::TempDir;

  #[tokio::test]
  async fn stopped_queue_drains_and_joins() {
    let queue = ExecQueue::new(2);
    queue.stop();
    queue.stop();
    queue.wait().await;
    queue.wait().await;
  }

  #[tokio::test]
  async fn blocking_cmd_runs_in_the_given_directory() {
    let dir = TempDir::new().unwrap();
    blocking_cmd("touch marker", dir.path()).await;
    assert!(dir.path().join("marker").exists());
  }

  #[tokio::test]
  async fn blocking_cmd_tolerates_failure() {
    let dir = TempDir::new().unwrap();
    blocking_cmd("exit 3", dir.path()).await;
  }
}
