//! CLI output formatting.

use owo_colors::{OwoColorize, Stream};

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    "✓".if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    "✗".if_supports_color(Stream::Stderr, |s| s.red()),
    message
  );
}

pub fn print_step_error(fqn: &str, message: &str) {
  eprintln!(
    "{} {}: {}",
    "✗".if_supports_color(Stream::Stderr, |s| s.red()),
    fqn.if_supports_color(Stream::Stderr, |s| s.bold()),
    message
  );
}
