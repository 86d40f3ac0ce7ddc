//! User-facing status lines.
//!
//! Every line goes to standard output, colored only when stdout is a
//! terminal. Toolchain output captured from compile and link processes is
//! forwarded verbatim through [`forward_output`] so it interleaves with the
//! status lines in one stream.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  println!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red()),
    message.if_supports_color(Stream::Stdout, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  println!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()),
    message.if_supports_color(Stream::Stdout, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// Prints an error and terminates the process with exit code 1.
pub fn fatal(message: &str) -> ! {
  print_error(message);
  std::process::exit(1);
}

/// Forwards captured toolchain output without decoration.
pub fn forward_output(output: &[u8]) {
  if !output.is_empty() {
    print!("{}", String::from_utf8_lossy(output));
  }
}
