//! zen: the zen build engine CLI.
//!
//! One subcommand per registered script plus `clean`:
//! - `zen build //project/pkg:target` - build targets
//! - `zen deploy -e prod //project/pkg/...` - deploy built targets
//! - `zen test //project/pkg:all` - run target test scripts
//! - `zen clean` - remove cached state

use clap::{Args, Parser, Subcommand};

mod cmd;
mod output;

#[derive(Parser)]
#[command(name = "zen", version, about = "A multi-project, polyglot build engine")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Debug, Clone, Args)]
struct RunFlags {
  /// Target addresses: `//project/package:name`, `:all`, or `/...` spreads.
  targets: Vec<String>,

  /// Verbosity level (repeatable meaning: 0 quiet, 1 info, 2 debug, 3 trace).
  #[arg(short = 'v', long, default_value_t = 0)]
  verbosity: u8,

  /// Stream child output directly.
  #[arg(long)]
  raw_output: bool,

  /// Do not clear task output on completion.
  #[arg(long)]
  keep_output: bool,

  /// Open an interactive shell inside the sandbox (exactly one target).
  #[arg(long)]
  shell: bool,

  /// Delete the targets' caches before running.
  #[arg(long)]
  clean: bool,

  /// Include transitive deps across package boundaries.
  #[arg(long)]
  with_deps: bool,

  /// Deployment environment to use.
  #[arg(short = 'e', long)]
  env: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets.
  Build(RunFlags),

  /// Deploy built targets.
  Deploy(RunFlags),

  /// Run target test scripts.
  Test(RunFlags),

  /// Remove cached state for every configured project.
  Clean {
    #[arg(short = 'v', long, default_value_t = 0)]
    verbosity: u8,
  },
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();

  let result = match cli.command {
    Commands::Build(flags) => cmd::cmd_run("build", &flags).await,
    Commands::Deploy(flags) => cmd::cmd_run("deploy", &flags).await,
    Commands::Test(flags) => cmd::cmd_run("test", &flags).await,
    Commands::Clean { verbosity } => cmd::cmd_clean(verbosity),
  };

  if let Err(err) = result {
    output::print_error(&format!("{err:#}"));
    std::process::exit(1);
  }
}
