mod device;
mod session;
mod start;
mod watchdog;

pub use device::{
    ExecArgs, IdleArgs, InstallArgs, SessionArgs, SnapshotArgs, StopArgs, run_exec, run_idle,
    run_install, run_kill, run_snapshot, run_status, run_stop,
};
pub use start::{StartArgs, run_start};
pub use watchdog::{WatchdogArgs, run_watchdog};
