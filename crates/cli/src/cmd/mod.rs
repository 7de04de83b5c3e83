mod clean;
mod run;

pub use clean::cmd_clean;
pub use run::cmd_run;

use tracing_subscriber::FmtSubscriber;

/// Map the verbosity flag onto the tracing level and install the
/// subscriber. Later calls are no-ops (tests invoke commands repeatedly).
pub(crate) fn init_tracing(verbosity: u8, raw_output: bool) {
  let level = match verbosity {
    0 => tracing::Level::WARN,
    1 => tracing::Level::INFO,
    2 => tracing::Level::DEBUG,
    _ => tracing::Level::TRACE,
  };

  let subscriber = FmtSubscriber::builder()
    .with_max_level(level)
    .with_target(false)
    .with_ansi(!raw_output)
    .without_time()
    .finish();
  let _ = tracing::subscriber::set_global_default(subscriber);
}
