//! Run configuration resolved from the command line.
//!
//! One [`RunConfig`] is built at startup and shared by every context of the
//! run. It fixes the run mode, the conditional-define flags, the timestamp
//! recorded for recompiled sources and the toolchain parallelism.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::GENERATE_COMMAND;

/// What the process was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
  /// No positional arguments: run the root description's default sequence.
  #[default]
  Default,
  /// Positional arguments name commands to run in the order given.
  CommandList,
  /// The single positional `generate`: emit CMake files instead of building.
  Generate,
}

/// Settings shared by every context of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
  pub mode: RunMode,
  /// Positional arguments in the order given.
  pub arguments: Vec<String>,
  /// `-name~value` flags; a bare `-name` maps to the empty string.
  pub flags: HashMap<String, String>,
  /// Seconds since the Unix epoch at startup, recorded for recompiled sources.
  pub timestamp: i64,
  /// Maximum number of toolchain processes running at once.
  pub jobs: usize,
}

impl RunConfig {
  /// Builds a configuration from command-line arguments (program name
  /// excluded).
  ///
  /// Arguments starting with `-` are flags, split at the first `~` into a
  /// name and a value. Everything else is positional: no positionals selects
  /// [`RunMode::Default`], the single word `generate` selects
  /// [`RunMode::Generate`], and any other list is taken as commands to run.
  pub fn resolve<I>(args: I) -> Self
  where
    I: IntoIterator<Item = String>,
  {
    let mut flags = HashMap::new();
    let mut arguments = Vec::new();

    for arg in args {
      if let Some(flag) = arg.strip_prefix('-') {
        let (name, value) = match flag.split_once('~') {
          Some((name, value)) => (name.to_owned(), value.to_owned()),
          None => (flag.to_owned(), String::new()),
        };
        flags.insert(name, value);
      } else {
        arguments.push(arg);
      }
    }

    let mode = match arguments.as_slice() {
      [] => RunMode::Default,
      [only] if only == GENERATE_COMMAND => RunMode::Generate,
      _ => RunMode::CommandList,
    };

    RunConfig {
      mode,
      arguments,
      flags,
      timestamp: unix_now(),
      jobs: num_cpus(),
    }
  }
}

/// Seconds since the Unix epoch, saturating to zero before it.
fn unix_now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_secs() as i64)
    .unwrap_or(0)
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
