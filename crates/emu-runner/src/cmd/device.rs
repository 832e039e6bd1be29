use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use emu_device::lifecycle::DEFAULT_SNAPSHOT;
use emu_device::{DeviceHandle, LifecycleState};
use serde::Serialize;
use tracing::info;

use super::session::Session;
use crate::error::RunnerResult;
use crate::lock;

#[derive(Args)]
pub struct SessionArgs {
    /// Session name
    #[arg(long, short, default_value = "default")]
    pub name: String,
}

#[derive(Args)]
pub struct StopArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Archive the device's disks here once it is down
    #[arg(long)]
    store_userdata: Option<PathBuf>,
}

#[derive(Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    command: SnapshotCommand,
}

#[derive(Subcommand)]
enum SnapshotCommand {
    /// Save the running device and pause it
    Save(SnapshotNameArgs),
    /// Restore a saved snapshot and resume the device
    Load(SnapshotNameArgs),
    /// Delete a saved snapshot
    Delete(SnapshotNameArgs),
}

#[derive(Args)]
struct SnapshotNameArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Snapshot name
    #[arg(long, default_value = DEFAULT_SNAPSHOT)]
    snapshot: String,
}

#[derive(Args)]
pub struct ExecArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Command line run in the device shell
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[derive(Args)]
pub struct InstallArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// APK to install
    apk: PathBuf,
    /// Attempts before giving up on transient failures
    #[arg(long, default_value = "3")]
    max_tries: u32,
    /// Grant every runtime permission the package requests
    #[arg(long)]
    grant_permissions: bool,
}

#[derive(Args)]
pub struct IdleArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Seconds of history the load is computed over
    #[arg(long, default_value = "15")]
    window: u64,
    /// Seconds between uptime samples
    #[arg(long, default_value = "5")]
    interval: u64,
}

pub async fn run_stop(args: StopArgs) -> RunnerResult<()> {
    let mut session = Session::open(&args.session.name).await?;
    session.controller.graceful_stop().await?;
    if let Some(location) = args.store_userdata {
        session.controller.store_userdata(&location).await?;
        info!(location = %location.display(), "userdata stored");
    }
    Ok(())
}

pub async fn run_kill(args: SessionArgs) -> RunnerResult<()> {
    let mut session = Session::open(&args.name).await?;
    session.controller.force_stop().await?;
    Ok(())
}

pub async fn run_snapshot(args: SnapshotArgs) -> RunnerResult<()> {
    match args.command {
        SnapshotCommand::Save(a) => {
            let mut session = Session::open(&a.session.name).await?;
            session.controller.save_snapshot(&a.snapshot).await?;
        }
        SnapshotCommand::Load(a) => {
            let mut session = Session::open(&a.session.name).await?;
            session.controller.load_snapshot(&a.snapshot).await?;
        }
        SnapshotCommand::Delete(a) => {
            let mut session = Session::open(&a.session.name).await?;
            session.controller.delete_snapshot(&a.snapshot).await?;
        }
    }
    Ok(())
}

pub async fn run_exec(args: ExecArgs) -> RunnerResult<()> {
    let mut session = Session::open(&args.session.name).await?;
    let command: Vec<&str> = args.command.iter().map(String::as_str).collect();
    let output = session.controller.exec(&command).await?;
    println!("{output}");
    Ok(())
}

pub async fn run_install(args: InstallArgs) -> RunnerResult<()> {
    let session = Session::open(&args.session.name).await?;
    session
        .controller
        .install_apk(&args.apk, args.max_tries, args.grant_permissions)
        .await?;
    Ok(())
}

pub async fn run_idle(args: IdleArgs) -> RunnerResult<()> {
    let session = Session::peek(&args.session.name).await?;
    let load = session
        .controller
        .recent_load(
            Duration::from_secs(args.window),
            Duration::from_secs(args.interval),
        )
        .await?;
    println!("{load:.3}");
    Ok(())
}

#[derive(Serialize)]
struct Status<'a> {
    #[serde(flatten)]
    handle: &'a DeviceHandle,
    api_level: u32,
    snapshot_present: bool,
    watchdog_running: bool,
    responsive: bool,
}

pub async fn run_status(args: SessionArgs) -> RunnerResult<()> {
    let session = Session::peek(&args.name).await?;
    let controller = &session.controller;
    let watchdog_running = lock::is_held(controller.paths().lock()).await?;
    let responsive = watchdog_running
        && controller.handle().state == LifecycleState::Running
        && controller.ping().await;
    let status = Status {
        handle: controller.handle(),
        api_level: controller.metadata().api_level,
        snapshot_present: controller.metadata().snapshot_present,
        watchdog_running,
        responsive,
    };
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
