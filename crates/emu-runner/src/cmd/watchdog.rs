use std::path::PathBuf;

use clap::Args;
use emu_device::supervisor::{self, OsProcessHost, WatchdogPlan};
use tracing::info;

use crate::error::RunnerResult;
use crate::lock;

#[derive(Args)]
pub struct WatchdogArgs {
    /// Plan written by `start`
    #[arg(long)]
    pub plan: PathBuf,
}

/// Supervise the emulator and its relays until the emulator exits.
///
/// Blocks in `waitpid` for the whole run; call it from a blocking thread.
/// Holds the session lock so other commands can tell the device is up.
pub fn run_watchdog(args: WatchdogArgs) -> RunnerResult<i32> {
    let plan = WatchdogPlan::load(&args.plan)?;
    supervisor::detach(&plan)?;
    let _guard = lock::lock_now(&plan.lock)?;
    info!(plan = %args.plan.display(), pid = std::process::id(), "watchdog running");
    let code = supervisor::run_watchdog(&mut OsProcessHost, &plan)?;
    info!(code, "watchdog done");
    Ok(code)
}
