//! Interactive target shells.
//!
//! `--shell` swaps a single step's run hook for an interactive `/bin/sh`
//! inside the step's sandbox, with the step's full environment. The rest of
//! the lifecycle (cache staging, env layering) runs unchanged.

use std::sync::Arc;

use zen_core::target::{RuntimeContext, StepError, StepFn, Target};

/// A run hook that opens an interactive shell in the sandbox.
pub fn interactive_shell_run() -> StepFn {
  Arc::new(|target: &mut Target, _ctx: &RuntimeContext| {
    let status = std::process::Command::new("/bin/sh")
      .current_dir(&target.cwd)
      .env_clear()
      .envs(target.env_list())
      .status()?;

    if status.success() {
      Ok(())
    } else {
      Err(StepError::CmdFailed {
        cmd: "/bin/sh".to_string(),
        code: status.code(),
      })
    }
  })
}
