//! Device lifecycle: start, stop, snapshots, and the operations a running
//! device supports.
//!
//! [`DeviceController`] owns one session. Every state change is written to
//! `device.json` so a later process can re-attach to a running device.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::boot::{
    BOOTSTRAP_PACKAGE, BootConfig, BootContext, BootHost, BootReport, health_check,
    post_boot_setup, wait_for_boot,
};
use crate::command::{AdbChannel, AdbConfig, CommandChannel};
use crate::console::{ConsoleClient, ConsoleCommands};
use crate::error::{DeviceError, Result};
use crate::idle::IdleStatus;
use crate::install::{self, PackageInstaller};
use crate::metadata::{BootMetadata, DeviceSpec, SourceProperties};
use crate::paths::SessionPaths;
use crate::policy::{CompatPolicy, RestartStrategy};
use crate::stage::{DirectoryStager, ImageStager};
use crate::stopwatch::Stopwatch;
use crate::supervisor::{self, ProcessSpec, WatchdogPlan};

/// Broadcast action the bootstrap package listens for.
pub const DEFAULT_BROADCAST_ACTION: &str = "ACTION_MOBILE_NINJAS_START";

/// `FLAG_RECEIVER_FOREGROUND | FLAG_INCLUDE_STOPPED_PACKAGES`
const BROADCAST_FLAGS: u32 = 0x1000_0020;

pub const DEFAULT_SNAPSHOT: &str = "default-boot";

const RELAY_PAUSE_RETRY: Duration = Duration::from_secs(1);

const RELAY_PIPES: [&str; 4] = ["pull-pipe", "shell-pipe", "push-pipe", "port-forward-manager"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unconfigured,
    Configured,
    Booting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Identifies one device instance and what is known about its processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub name: String,
    pub console_port: u16,
    pub adb_port: u16,
    pub serial: String,
    pub state: LifecycleState,
    pub watchdog_pid: Option<u32>,
    /// The guest is executing (false after a snapshot save).
    pub vm_running: bool,
    pub relays_running: bool,
    #[serde(skip)]
    pub boot_deadline: Option<Instant>,
}

impl DeviceHandle {
    pub fn new(name: impl Into<String>, console_port: u16, adb_port: u16) -> Self {
        Self {
            name: name.into(),
            console_port,
            adb_port,
            serial: format!("localhost:{adb_port}"),
            state: LifecycleState::Unconfigured,
            watchdog_pid: None,
            vm_running: false,
            relays_running: false,
            boot_deadline: None,
        }
    }

    /// A handle with two freshly picked local ports.
    pub fn allocate(name: impl Into<String>) -> Result<Self> {
        let console = pick_unused_port()?;
        let mut adb = pick_unused_port()?;
        while adb == console {
            adb = pick_unused_port()?;
        }
        Ok(Self::new(name, console, adb))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, serde_json::to_vec_pretty(self)?).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&tokio::fs::read(path).await?)?)
    }
}

/// A local TCP port nothing is listening on right now.
pub fn pick_unused_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

/// Starts the detached watchdog and observes it afterwards.
#[async_trait]
pub trait SupervisorLauncher: Send + Sync {
    /// Start a watchdog for the plan stored at `plan_path`. Returns its pid.
    async fn launch(&self, plan_path: &Path) -> Result<u32>;

    fn is_alive(&self, pid: u32) -> bool;

    /// Last resort when the console cannot be reached.
    fn kill(&self, pid: u32);
}

/// Launches the watchdog by re-executing `exe watchdog --plan <path>`.
pub struct DetachedLauncher {
    exe: PathBuf,
    child: Mutex<Option<std::process::Child>>,
}

impl DetachedLauncher {
    pub fn new(exe: PathBuf) -> Self {
        Self {
            exe,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SupervisorLauncher for DetachedLauncher {
    async fn launch(&self, plan_path: &Path) -> Result<u32> {
        let plan = plan_path.display().to_string();
        let child = supervisor::spawn_detached(&self.exe, &["watchdog", "--plan", &plan])?;
        let pid = child.id();
        info!(pid, plan = %plan, "watchdog started");
        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            // Our own child lingers as a zombie until waited for.
            Some(child) if child.id() == pid => matches!(child.try_wait(), Ok(None)),
            _ => supervisor::is_alive(pid),
        }
    }

    fn kill(&self, pid: u32) {
        if let Err(e) = supervisor::kill_group(pid) {
            warn!(pid, error = %e, "failed to kill watchdog group");
        }
    }
}

/// Optional X display the emulator renders into.
#[derive(Debug, Clone)]
pub struct DisplaySpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Value of `DISPLAY` handed to the emulator.
    pub display: String,
}

/// How devices of a session are launched and polled.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub emulator: PathBuf,
    pub relay: PathBuf,
    /// Headless when unset.
    pub display: Option<DisplaySpec>,
    /// Talk to the device through the host adb server instead of relays.
    pub passthrough: bool,
    pub new_process_group: bool,
    /// Let the watchdog delete the staged images once the emulator exits.
    pub delete_temp_on_exit: bool,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub boot_timeout: Duration,
    pub bootstrap_apk: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

/// Collaborators a controller drives the device through.
pub struct DeviceIo {
    pub channel: Arc<dyn CommandChannel>,
    pub installer: Arc<dyn PackageInstaller>,
    pub console: Arc<dyn ConsoleCommands>,
    pub stager: Arc<dyn ImageStager>,
    pub launcher: Arc<dyn SupervisorLauncher>,
}

impl DeviceIo {
    /// The production wiring: adb, the TCP console, directory staging and
    /// a watchdog re-executed from `exe`.
    pub fn adb(adb: AdbConfig, handle: &DeviceHandle, exe: PathBuf) -> Self {
        let channel = Arc::new(AdbChannel::new(adb, handle.relays_running));
        Self {
            channel: channel.clone(),
            installer: channel,
            console: Arc::new(ConsoleClient::new(handle.console_port)),
            stager: Arc::new(DirectoryStager),
            launcher: Arc::new(DetachedLauncher::new(exe)),
        }
    }
}

/// Extra attached to the ready broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraValue {
    Bool(bool),
    Text(String),
}

/// Write the configure-time state of a new session.
///
/// Reads `source.properties` from the system image directory and picks the
/// device's ports.
pub async fn configure(
    paths: &SessionPaths,
    spec: &DeviceSpec,
    name: &str,
) -> Result<(BootMetadata, DeviceHandle)> {
    let source = SourceProperties::load(&spec.system_image_dir.join("source.properties")).await?;
    let metadata = BootMetadata::configure(spec, &source)?;
    paths.create_dirs().await?;
    metadata.save(&paths.metadata()).await?;

    let mut handle = DeviceHandle::allocate(name)?;
    handle.state = LifecycleState::Configured;
    handle.relays_running = true;
    handle.save(&paths.device()).await?;
    info!(
        name,
        api_level = metadata.api_level,
        arch = %metadata.architecture,
        console_port = handle.console_port,
        adb_port = handle.adb_port,
        "device configured"
    );
    Ok((metadata, handle))
}

/// Read back a session written by [`configure`].
pub async fn load_session(paths: &SessionPaths) -> Result<(BootMetadata, DeviceHandle)> {
    let metadata = BootMetadata::load(&paths.metadata()).await?;
    let handle = DeviceHandle::load(&paths.device()).await?;
    Ok((metadata, handle))
}

struct WatchdogHost<'a> {
    launcher: &'a dyn SupervisorLauncher,
    pid: u32,
    paths: &'a SessionPaths,
}

#[async_trait]
impl<'a> BootHost for WatchdogHost<'a> {
    fn primary_alive(&self) -> bool {
        self.launcher.is_alive(self.pid)
    }

    async fn dump_logs(&self) {
        dump_logs(self.paths).await;
    }
}

/// Log the emulator and watchdog output files.
pub async fn dump_logs(paths: &SessionPaths) {
    for path in [paths.emulator_log(), paths.watchdog_out(), paths.watchdog_err()] {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => info!(file = %path.display(), "log below\n{content}"),
            Err(e) => warn!(file = %path.display(), error = %e, "log unavailable"),
        }
    }
}

pub struct DeviceController {
    config: DeviceConfig,
    paths: SessionPaths,
    metadata: BootMetadata,
    handle: DeviceHandle,
    channel: Arc<dyn CommandChannel>,
    installer: Arc<dyn PackageInstaller>,
    console: Arc<dyn ConsoleCommands>,
    stager: Arc<dyn ImageStager>,
    launcher: Arc<dyn SupervisorLauncher>,
}

impl DeviceController {
    pub fn new(
        config: DeviceConfig,
        paths: SessionPaths,
        metadata: BootMetadata,
        handle: DeviceHandle,
        io: DeviceIo,
    ) -> Self {
        Self {
            config,
            paths,
            metadata,
            handle,
            channel: io.channel,
            installer: io.installer,
            console: io.console,
            stager: io.stager,
            launcher: io.launcher,
        }
    }

    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    pub fn metadata(&self) -> &BootMetadata {
        &self.metadata
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn policy(&self) -> CompatPolicy {
        self.metadata.policy()
    }

    async fn save_state(&self) -> Result<()> {
        self.handle.save(&self.paths.device()).await
    }

    fn require_running(&self, op: &str) -> Result<()> {
        if self.handle.state == LifecycleState::Running {
            Ok(())
        } else {
            Err(DeviceError::Invariant(format!(
                "{op} needs a running device, state is {:?}",
                self.handle.state
            )))
        }
    }

    /// Stage images, launch the watchdog and wait for a fully booted device.
    ///
    /// On any error the device is killed (when it was launched) and its
    /// staged images are removed before the error is returned.
    pub async fn start(&mut self) -> Result<BootReport> {
        match self.handle.state {
            LifecycleState::Configured | LifecycleState::Stopped => {}
            other => {
                return Err(DeviceError::Invariant(format!(
                    "cannot start a device that is {other:?}"
                )));
            }
        }
        match self.start_inner().await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "start failed, tearing down");
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<BootReport> {
        let mut timings = Stopwatch::new();
        let deadline = Instant::now() + self.config.boot_timeout;
        self.handle.state = LifecycleState::Booting;
        self.handle.boot_deadline = Some(deadline);
        self.paths.create_dirs().await?;
        self.save_state().await?;

        timings
            .time(
                "STAGE_DATA",
                self.stager.stage(&self.metadata, &self.paths, &self.handle.name),
            )
            .await?;

        let plan = self.watchdog_plan()?;
        plan.check_preconditions()?;
        let plan_path = self.paths.watchdog_plan();
        plan.save(&plan_path)?;
        let pid = timings
            .time("SPAWN_EMULATOR", self.launcher.launch(&plan_path))
            .await?;
        self.handle.watchdog_pid = Some(pid);
        self.save_state().await?;

        let (poll_interval, max_attempts) = self
            .metadata
            .boot_pacing(self.config.poll_interval, self.config.max_attempts);
        let host = WatchdogHost {
            launcher: self.launcher.as_ref(),
            pid,
            paths: &self.paths,
        };
        let ctx = BootContext {
            channel: self.channel.as_ref(),
            installer: self.installer.as_ref(),
            host: &host,
            policy: self.metadata.policy(),
            config: BootConfig {
                poll_interval,
                max_attempts,
                deadline,
                passthrough: self.config.passthrough,
                bootstrap_apk: self.config.bootstrap_apk.clone(),
                ca_cert: self.config.ca_cert.clone(),
            },
        };
        let report = wait_for_boot(&ctx).await?;
        post_boot_setup(ctx.channel, &ctx.policy, &self.paths.sockets()).await;

        timings.merge(&report.timings);
        timings.log_summary("start_device");
        self.metadata.perf_data.push(timings.to_record("start_device"));
        self.metadata.save(&self.paths.metadata()).await?;

        self.handle.state = LifecycleState::Running;
        self.handle.vm_running = true;
        self.handle.relays_running = self.channel.relays_running();
        self.save_state().await?;
        Ok(report)
    }

    /// The processes the watchdog runs for this device.
    pub fn watchdog_plan(&self) -> Result<WatchdogPlan> {
        let images = self.paths.images();
        let sockets = self.paths.sockets();
        let logs = self.paths.logs();
        let home = self.paths.home().display().to_string();
        let tmp = self.paths.tmp().display().to_string();
        let (console, adb) = (self.handle.console_port, self.handle.adb_port);

        let kernel = self
            .metadata
            .system_image_dir
            .join(self.metadata.variant.kernel_file());
        let args = self.metadata.launch_args(
            console,
            adb,
            &self.handle.name,
            &kernel,
            self.config.display.is_none(),
        )?;
        let primary = ProcessSpec::new("emulator", &self.config.emulator)
            .args(args)
            .env("HOME", &home)
            .env("ANDROID_SDK_HOME", &home)
            .env("ANDROID_AVD_HOME", self.paths.avd_dir().display().to_string())
            .env("ANDROID_TMP", &tmp)
            .env("TMPDIR", &tmp)
            .cwd(&images)
            .log(self.paths.emulator_log());

        let relay = &self.config.relay;
        let mut command_relays = Vec::new();
        if !self.config.passthrough {
            command_relays.push(
                ProcessSpec::new("relay-host", relay)
                    .args([
                        "--action".to_string(),
                        "host-service".to_string(),
                        "--device_serial".to_string(),
                        self.handle.serial.clone(),
                        "--emulator_dir".to_string(),
                        images.display().to_string(),
                    ])
                    .cwd(&sockets)
                    .log(logs.join("pipe.log.txt")),
            );
            for alias in [format!("emulator-{console}"), format!("127.0.0.1:{adb}")] {
                for service in RELAY_PIPES {
                    let spec = ProcessSpec::new(format!("relay-{alias}-{service}"), relay).args([
                        "--action=raw".to_string(),
                        "--relay_addr".to_string(),
                        format!("unix:@/turbo/localhost:{adb}/{service}"),
                        "--external_addr".to_string(),
                        format!("unix-listen:@/turbo/{alias}/{service}"),
                        "--frame_relay=false".to_string(),
                    ]);
                    command_relays.push(spec);
                }
            }
        }
        let console_relay = ProcessSpec::new("relay-console", relay)
            .args([
                "--action=raw".to_string(),
                format!("--external_addr=tcp:localhost:{console}"),
                "--relay_addr=unix-listen:qemu.mgmt".to_string(),
                "--frame_relay".to_string(),
            ])
            .cwd(&sockets)
            .log(logs.join("telnet_pipe.log.txt"));

        let (display, display_env) = match &self.config.display {
            Some(d) => (
                Some(
                    ProcessSpec::new("display", &d.program)
                        .args(d.args.iter().cloned())
                        .log(logs.join("display.log.txt")),
                ),
                vec![("DISPLAY".to_string(), d.display.clone())],
            ),
            None => (None, Vec::new()),
        };

        Ok(WatchdogPlan {
            primary,
            command_relays,
            console_relay: Some(console_relay),
            display,
            display_env,
            cleanup_dir: self.config.delete_temp_on_exit.then_some(images),
            new_process_group: self.config.new_process_group,
            lock: self.paths.lock(),
            stdout: self.paths.watchdog_out(),
            stderr: self.paths.watchdog_err(),
        })
    }

    /// Ask the emulator to exit, falling back to killing the watchdog group.
    async fn kill_device(&mut self) {
        if let Err(e) = self.console.run(&["kill"]).await {
            warn!(error = %e, "console kill failed");
            if let Some(pid) = self.handle.watchdog_pid {
                self.launcher.kill(pid);
            }
        }
        self.handle.watchdog_pid = None;
        self.handle.vm_running = false;
        self.handle.relays_running = false;
    }

    async fn remove_temp(&self) {
        for dir in [self.paths.images(), self.paths.tmp()] {
            match tokio::fs::remove_dir_all(&dir).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!(dir = %dir.display(), error = %e, "cleanup failed");
                }
                _ => {}
            }
        }
    }

    async fn teardown(&mut self) {
        if self.handle.watchdog_pid.is_some() {
            self.kill_device().await;
        }
        self.remove_temp().await;
        self.handle.state = LifecycleState::Stopped;
        if let Err(e) = self.save_state().await {
            warn!(error = %e, "failed to record stopped state");
        }
    }

    /// Kill the device and return the transient error to raise.
    pub async fn transient_failure(&mut self, msg: impl Into<String>) -> DeviceError {
        let msg = msg.into();
        error!(reason = %msg, "transient device failure");
        self.kill_device().await;
        self.teardown().await;
        DeviceError::Transient(msg)
    }

    /// Stop the device so its disks can be reused.
    ///
    /// A running guest is drained and its partitions unmounted first; if they
    /// do not unmount cleanly the stop fails as transient.
    pub async fn graceful_stop(&mut self) -> Result<()> {
        let clean = if self.handle.state == LifecycleState::Running && self.handle.vm_running {
            self.handle.state = LifecycleState::ShuttingDown;
            self.save_state().await?;
            self.ensure_relays().await;
            crate::shutdown::drain(
                self.channel.as_ref(),
                &self.policy(),
                self.config.poll_interval,
            )
            .await
        } else {
            true
        };
        self.kill_device().await;
        self.handle.state = LifecycleState::Stopped;
        self.save_state().await?;
        if !clean {
            self.remove_temp().await;
            return Err(DeviceError::Transient("could not cleanly shut down device".into()));
        }
        info!(name = %self.handle.name, "device stopped");
        Ok(())
    }

    pub async fn force_stop(&mut self) -> Result<()> {
        self.kill_device().await;
        self.handle.state = LifecycleState::Stopped;
        self.save_state().await
    }

    /// Stop the relay services. Retried once; a second failure is logged and
    /// the operation goes ahead.
    async fn pause_relays(&mut self) {
        if !self.channel.set_relays(false).await {
            tokio::time::sleep(RELAY_PAUSE_RETRY).await;
            if !self.channel.set_relays(false).await {
                error!("could not stop relay services, snapshot may be broken");
            }
        }
        self.handle.relays_running = false;
    }

    async fn ensure_relays(&mut self) {
        if !self.channel.relays_running() && !self.channel.set_relays(true).await {
            warn!("relay services did not start");
        }
        self.handle.relays_running = self.channel.relays_running();
    }

    pub async fn save_snapshot(&mut self, name: &str) -> Result<()> {
        self.require_running("snapshot save")?;
        self.pause_relays().await;
        let save = format!("avd snapshot save {name}");
        self.console.run(&["avd stop", &save, "exit"]).await?;
        self.metadata.snapshot_present = true;
        self.metadata.save(&self.paths.metadata()).await?;
        self.handle.vm_running = false;
        self.save_state().await?;
        info!(name, "snapshot saved");
        Ok(())
    }

    pub async fn load_snapshot(&mut self, name: &str) -> Result<()> {
        self.require_running("snapshot load")?;
        self.pause_relays().await;
        let load = format!("avd snapshot load {name}");
        self.console.run(&["avd stop", &load, "avd start", "exit"]).await?;
        self.handle.vm_running = true;
        self.save_state().await?;
        info!(name, "snapshot loaded");
        Ok(())
    }

    pub async fn delete_snapshot(&mut self, name: &str) -> Result<()> {
        self.require_running("snapshot delete")?;
        self.pause_relays().await;
        let del = format!("avd snapshot del {name}");
        self.console.run(&[&del, "exit"]).await?;
        self.save_state().await?;
        Ok(())
    }

    /// Run a shell command on the device and return its output.
    pub async fn exec(&mut self, args: &[&str]) -> Result<String> {
        self.require_running("exec")?;
        if !self.handle.relays_running {
            self.ensure_relays().await;
            self.save_state().await?;
        }
        Ok(self.channel.shell(args).await?)
    }

    /// Whether the system server and package manager answer.
    pub async fn ping(&self) -> bool {
        self.handle.state == LifecycleState::Running && health_check(self.channel.as_ref()).await
    }

    pub async fn install_apk(
        &self,
        apk: &Path,
        max_tries: u32,
        grant_permissions: bool,
    ) -> Result<()> {
        self.require_running("install")?;
        install::install_apk(
            self.channel.as_ref(),
            self.installer.as_ref(),
            &self.policy(),
            apk,
            max_tries,
            grant_permissions,
        )
        .await
    }

    pub async fn is_installed(&self, package: &str) -> bool {
        install::is_installed(self.channel.as_ref(), package).await
    }

    /// Sample device load until `window` has passed and report the busiest
    /// interval.
    pub async fn recent_load(&self, window: Duration, interval: Duration) -> Result<f64> {
        self.require_running("idle")?;
        let interval = interval.max(Duration::from_millis(100));
        let mut idle = IdleStatus::new(self.channel.as_ref()).await;
        let started = Instant::now();
        loop {
            tokio::time::sleep(interval).await;
            let load = idle.recent_max_load(window).await;
            if started.elapsed() >= window {
                return Ok(load);
            }
        }
    }

    /// Set the device clock to host local time.
    pub async fn sync_time(&self) -> Result<String> {
        let cmd = self.policy().date_command(&chrono::Local::now());
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        let out = self.channel.shell(&args).await?;
        info!(output = %out, "device time set");
        Ok(out)
    }

    /// Tell on-device listeners the device is ready. Nothing is sent without
    /// extras.
    pub async fn broadcast_ready(
        &self,
        extras: &[(String, ExtraValue)],
        action: Option<&str>,
    ) -> Result<()> {
        if extras.is_empty() {
            return Ok(());
        }
        let action = action.unwrap_or(DEFAULT_BROADCAST_ACTION);
        let flags = BROADCAST_FLAGS.to_string();
        let mut args = vec!["am", "broadcast", "-a", action, "-f", flags.as_str()];
        for (key, value) in extras {
            match value {
                ExtraValue::Bool(b) => {
                    args.extend(["--ez", key.as_str(), if *b { "true" } else { "false" }]);
                }
                ExtraValue::Text(t) => args.extend(["-e", key.as_str(), t.as_str()]),
            }
        }
        if self.metadata.api_level > 10 && action == DEFAULT_BROADCAST_ACTION {
            args.push(BOOTSTRAP_PACKAGE);
        }
        let out = self.channel.shell(&args).await?;
        info!(output = %out, "ready broadcast sent");
        Ok(())
    }

    pub async fn log_to_device(&self, message: &str) -> Result<()> {
        info!(message, "logging to device");
        self.channel
            .shell(&["log", "-p", "i", "-t", "emulated_device", message])
            .await?;
        Ok(())
    }

    /// Restart the Android userspace without rebooting the kernel.
    pub async fn restart_android(&self) -> Result<()> {
        let policy = self.policy();
        let channel = self.channel.as_ref();
        if policy.restart_stops_fingerprintd {
            channel.shell(&["stop fingerprintd"]).await?;
        }
        match policy.restart {
            RestartStrategy::AmRestart => {
                channel.shell(&["am", "restart"]).await?;
            }
            RestartStrategy::StopStart => {
                channel.shell(&["stop"]).await?;
                tokio::time::sleep(Duration::from_secs(1)).await;
                channel.shell(&["start"]).await?;
            }
        }
        if policy.restart_stops_fingerprintd {
            channel.shell(&["start fingerprintd"]).await?;
        }
        Ok(())
    }

    /// Archive the disks of a stopped device to `location`.
    pub async fn store_userdata(&self, location: &Path) -> Result<()> {
        if !matches!(self.handle.state, LifecycleState::Stopped | LifecycleState::Configured) {
            return Err(DeviceError::Invariant(format!(
                "device must be stopped to store userdata, state is {:?}",
                self.handle.state
            )));
        }
        if self.config.delete_temp_on_exit {
            return Err(DeviceError::Invariant(
                "images are deleted when the device exits".into(),
            ));
        }
        let images = self.paths.images();
        if !images.is_dir() {
            return Err(DeviceError::Invariant("device was never started".into()));
        }
        crate::archive::store_userdata(&images, self.metadata.variant, location).await
    }
}
