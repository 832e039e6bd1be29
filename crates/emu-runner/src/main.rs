mod cmd;
mod config;
mod error;
mod lock;
mod paths;

use std::fmt;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::error::{RunnerError, RunnerResult};

/// `EX_TEMPFAIL`: the device was torn down and a fresh start may succeed.
const EXIT_TRANSIENT: u8 = 75;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "emu-runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configure a session and boot its device
    Start(cmd::StartArgs),
    /// Let the device go idle, unmount its disks cleanly and shut it down
    Stop(cmd::StopArgs),
    /// Shut the device down without draining it
    Kill(cmd::SessionArgs),
    /// Save, load or delete emulator snapshots
    Snapshot(cmd::SnapshotArgs),
    /// Run a shell command on the device
    Exec(cmd::ExecArgs),
    /// Install an APK on the device
    Install(cmd::InstallArgs),
    /// Print the device's recent CPU load (0.0 idle to 1.0 busy)
    Idle(cmd::IdleArgs),
    /// Show the recorded state of a session
    Status(cmd::SessionArgs),
    /// Supervise the emulator processes (started by `start`)
    #[command(hide = true)]
    Watchdog(cmd::WatchdogArgs),
}

/// Initialize tracing with a tee writer (stderr + rolling log file).
///
/// Returns the [`tracing_appender::non_blocking::WorkerGuard`] that must be
/// held alive until the process exits so buffered logs are flushed.
fn init_tracing_with_file(
    prefix: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard, Box<dyn std::error::Error>> {
    let home = paths::HomePaths::new()?;
    let log_dir = home.logs_dir();
    std::fs::create_dir_all(&log_dir).map_err(|e| format!("create {}: {e}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(7)
        .build(log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let writer = std::io::stderr.and(non_blocking);

    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(writer)
        .with_ansi(false)
        .init();

    Ok(guard)
}

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();
}

/// The watchdog never returns before the emulator exits, so it gets a
/// blocking thread of its own.
async fn watchdog(args: cmd::WatchdogArgs) -> RunnerResult<ExitCode> {
    let code = tokio::task::spawn_blocking(move || cmd::run_watchdog(args))
        .await
        .map_err(|e| RunnerError::Internal(format!("watchdog task: {e}")))??;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_prefix = match &cli.command {
        Command::Start(args) => Some(format!("start-{}", args.name)),
        Command::Watchdog(_) => Some("watchdog".to_string()),
        _ => None,
    };
    let _guard = match log_prefix {
        Some(prefix) => match init_tracing_with_file(&prefix) {
            Ok(guard) => Some(guard),
            Err(e) => {
                init_tracing_stderr();
                tracing::warn!("file logging unavailable, using stderr only: {e}");
                None
            }
        },
        None => {
            init_tracing_stderr();
            None
        }
    };

    let result = match cli.command {
        Command::Start(args) => cmd::run_start(args).await.map(|()| ExitCode::SUCCESS),
        Command::Stop(args) => cmd::run_stop(args).await.map(|()| ExitCode::SUCCESS),
        Command::Kill(args) => cmd::run_kill(args).await.map(|()| ExitCode::SUCCESS),
        Command::Snapshot(args) => cmd::run_snapshot(args).await.map(|()| ExitCode::SUCCESS),
        Command::Exec(args) => cmd::run_exec(args).await.map(|()| ExitCode::SUCCESS),
        Command::Install(args) => cmd::run_install(args).await.map(|()| ExitCode::SUCCESS),
        Command::Idle(args) => cmd::run_idle(args).await.map(|()| ExitCode::SUCCESS),
        Command::Status(args) => cmd::run_status(args).await.map(|()| ExitCode::SUCCESS),
        Command::Watchdog(args) => watchdog(args).await,
    };

    match result {
        Ok(code) => code,
        Err(e) if e.is_transient() => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_TRANSIENT)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
