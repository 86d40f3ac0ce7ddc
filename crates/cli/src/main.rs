//! The `gantry` binary: resolves the command line, finds the working
//! directory's description file and drives the root context to completion.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use gantry_lib::config::RunConfig;
use gantry_lib::context::session::Session;
use gantry_lib::finder;
use gantry_lib::report;

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let config = RunConfig::resolve(env::args().skip(1));
  debug!(mode = ?config.mode, jobs = config.jobs, "configuration resolved");

  let root_path = match finder::find_root_description(Path::new(".")) {
    Ok(path) => path,
    Err(error) => report::fatal(&error.to_string()),
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let failed = rt.block_on(async {
    let session = Session::new(config);
    session.spawn_root(root_path);
    // Dependency contexts keep running past the root when its command
    // sequence does not build, and a running context can register more of
    // them; the process leaves only once every context task has returned.
    session.wait_all().await;
    session.any_built_error()
  });

  if failed {
    std::process::exit(1);
  }
  Ok(())
}
