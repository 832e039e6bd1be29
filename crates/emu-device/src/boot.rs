//! Boot readiness polling.
//!
//! A freshly launched device has no single "ready" signal. Readiness is a
//! chain of checks, each only attempted once every earlier one has passed at
//! least once. All checks run through one [`Attempter`] so the total number
//! of probes and the wall clock bound the whole sequence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::attempter::Attempter;
use crate::command::{CommandChannel, shell_or_empty};
use crate::error::{DeviceError, Result};
use crate::install::{PackageInstaller, ensure_installed};
use crate::policy::CompatPolicy;
use crate::predicates;
use crate::stopwatch::Stopwatch;

/// Package providing the DPI check instrumentation.
pub const BOOTSTRAP_PACKAGE: &str = "com.google.android.apps.common.testing.services.bootstrap";

const STORAGE_VARS: [&str; 3] = ["EMULATED_STORAGE_SOURCE", "EXTERNAL_STORAGE", "ANDROID_STORAGE"];

/// Consecutive DPI check failures tolerated before giving up on this boot.
const MAX_DPI_FAILURES: u32 = 4;

/// The home intent is sent once the launcher check has failed more than
/// this many consecutive times.
const KICK_LAUNCHER_AFTER: u32 = 2;

const LOGCAT_READS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    NotConnected,
    RelayReady,
    HealthCheck,
    TransportConnected,
    StorageMounted,
    BootComplete,
    CertAndLauncherPrereqs,
    DpiCorrect,
    LauncherStarted,
    FullyBooted,
}

impl BootStage {
    /// Stopwatch bucket charged with this stage's probes.
    pub fn timing_tag(self) -> &'static str {
        match self {
            BootStage::NotConnected => "ADB_LISTENING_CHECK",
            BootStage::RelayReady => "RELAY_CHECK",
            BootStage::HealthCheck => "HEALTH_CHECK",
            BootStage::TransportConnected => "TRANSPORT_CONNECT",
            BootStage::StorageMounted => "SD_CARD_MOUNT_CHECK",
            BootStage::BootComplete => "BOOT_COMPLETE_PRESENT",
            BootStage::CertAndLauncherPrereqs => "LAUNCHER_PREREQS",
            BootStage::DpiCorrect => "CHECK_DPI",
            BootStage::LauncherStarted => "LAUNCHER_STARTED",
            BootStage::FullyBooted => "FULLY_BOOTED",
        }
    }

    fn label(self) -> &'static str {
        match self {
            BootStage::NotConnected => "Checking if adb is listening",
            BootStage::RelayReady => "Checking relay services",
            BootStage::HealthCheck => "Checking system server and package manager",
            BootStage::TransportConnected => "Connecting adb transport",
            BootStage::StorageMounted => "Checking external storage",
            BootStage::BootComplete => "Checking for boot complete",
            BootStage::CertAndLauncherPrereqs => "Preparing for launcher",
            BootStage::DpiCorrect => "Checking DPI",
            BootStage::LauncherStarted => "Checking launcher app",
            BootStage::FullyBooted => "Fully booted",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-stage readiness bits. A bit never goes back to false within a boot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessFlags {
    pub adb_listening: bool,
    pub relay_ready: bool,
    pub health_ok: bool,
    pub transport_connected: bool,
    pub storage_mounted: bool,
    pub boot_complete: bool,
    pub prereqs_done: bool,
    pub dpi_ok: bool,
    pub launcher_started: bool,
}

impl ReadinessFlags {
    /// First stage that has not yet passed.
    pub fn next_stage(&self, passthrough: bool) -> BootStage {
        if !self.adb_listening {
            BootStage::NotConnected
        } else if !self.relay_ready {
            BootStage::RelayReady
        } else if !self.health_ok {
            BootStage::HealthCheck
        } else if passthrough && !self.transport_connected {
            BootStage::TransportConnected
        } else if !self.storage_mounted {
            BootStage::StorageMounted
        } else if !self.boot_complete {
            BootStage::BootComplete
        } else if !self.prereqs_done {
            BootStage::CertAndLauncherPrereqs
        } else if !self.dpi_ok {
            BootStage::DpiCorrect
        } else if !self.launcher_started {
            BootStage::LauncherStarted
        } else {
            BootStage::FullyBooted
        }
    }

    fn mark(&mut self, stage: BootStage) {
        match stage {
            BootStage::NotConnected => self.adb_listening = true,
            BootStage::RelayReady => self.relay_ready = true,
            BootStage::HealthCheck => self.health_ok = true,
            BootStage::TransportConnected => self.transport_connected = true,
            BootStage::StorageMounted => self.storage_mounted = true,
            BootStage::BootComplete => self.boot_complete = true,
            BootStage::CertAndLauncherPrereqs => self.prereqs_done = true,
            BootStage::DpiCorrect => self.dpi_ok = true,
            BootStage::LauncherStarted => self.launcher_started = true,
            BootStage::FullyBooted => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub deadline: Instant,
    /// The host adb server has to be connected to the device explicitly.
    pub passthrough: bool,
    pub bootstrap_apk: Option<PathBuf>,
    /// Certificate pushed as a user CA, already named by its subject hash.
    pub ca_cert: Option<PathBuf>,
}

/// What the boot loop needs from the process side.
#[async_trait]
pub trait BootHost: Send + Sync {
    /// Whether the primary device process is still running.
    fn primary_alive(&self) -> bool;

    /// Write the device and watchdog logs to the log for diagnosis.
    async fn dump_logs(&self);
}

/// Everything the boot loop talks to.
pub struct BootContext<'a> {
    pub channel: &'a dyn CommandChannel,
    pub installer: &'a dyn PackageInstaller,
    pub host: &'a dyn BootHost,
    pub policy: CompatPolicy,
    pub config: BootConfig,
}

#[derive(Debug)]
pub struct BootReport {
    pub flags: ReadinessFlags,
    pub total_attempts: u32,
    pub timings: Stopwatch,
}

/// Poll until the device is fully booted.
///
/// Fails with [`DeviceError::DeviceDied`] when the primary process exits,
/// [`DeviceError::BootTimeout`] when the attempt budget or deadline runs out,
/// and [`DeviceError::Transient`] for stages known to wedge. The device and
/// watchdog logs are dumped on every failure. The caller owns teardown in
/// every error case.
pub async fn wait_for_boot(ctx: &BootContext<'_>) -> Result<BootReport> {
    let result = poll_until_booted(ctx).await;
    if let Err(e) = &result {
        error!(error = %e, "boot aborted");
        ctx.host.dump_logs().await;
    }
    result
}

async fn poll_until_booted(ctx: &BootContext<'_>) -> Result<BootReport> {
    let channel = ctx.channel;
    let config = &ctx.config;
    let mut flags = ReadinessFlags::default();
    let mut attempter = Attempter::new(config.poll_interval);
    let mut storage_points: Vec<String> = Vec::new();
    let mut kicked_launcher = false;

    loop {
        let stage = flags.next_stage(config.passthrough);
        if stage == BootStage::FullyBooted {
            break;
        }

        if !ctx.host.primary_alive() {
            return Err(DeviceError::DeviceDied(format!(
                "device process exited while waiting for {stage}"
            )));
        }
        if attempter.total_attempts() >= config.max_attempts || Instant::now() > config.deadline {
            if flags.adb_listening {
                dump_logcat(channel).await;
            }
            return Err(DeviceError::BootTimeout {
                attempts: attempter.total_attempts(),
                stage,
            });
        }

        info!(
            ?flags,
            step_attempts = attempter.step_attempts(),
            total_attempts = attempter.total_attempts(),
            "boot status"
        );

        if flags.relay_ready && check_filesystems(channel).await {
            return Err(DeviceError::Transient(
                "read-write file system has been remounted read-only".into(),
            ));
        }

        let (label, tag) = (stage.label(), stage.timing_tag());
        let passed = match stage {
            BootStage::NotConnected => {
                attempter
                    .attempt_step(label, tag, || channel.transport_listening())
                    .await
            }
            BootStage::RelayReady => {
                attempter
                    .attempt_step(label, tag, || async {
                        channel.relays_running() || channel.set_relays(true).await
                    })
                    .await
            }
            BootStage::HealthCheck => {
                attempter
                    .attempt_step(label, tag, || health_check(channel))
                    .await
            }
            BootStage::TransportConnected => {
                attempter
                    .attempt_step(label, tag, || channel.connect_transport())
                    .await
            }
            BootStage::StorageMounted => {
                if storage_points.is_empty() {
                    storage_points = storage_mount_points(channel).await;
                }
                let points = &storage_points;
                let ok = attempter
                    .attempt_step(label, tag, || async move {
                        if points.is_empty() {
                            return false;
                        }
                        let table = shell_or_empty(channel, &["mount"]).await;
                        let found = predicates::mounted(&table, points);
                        info!(?found, "external storage");
                        !found.is_empty()
                    })
                    .await;
                if !ok && attempter.step_attempts() * 5 > config.max_attempts {
                    return Err(DeviceError::Transient(
                        "external storage never mounted".into(),
                    ));
                }
                ok
            }
            BootStage::BootComplete => {
                attempter
                    .attempt_step(label, tag, || async {
                        predicates::boot_complete(&shell_or_empty(channel, &["getprop"]).await)
                    })
                    .await
            }
            BootStage::CertAndLauncherPrereqs => {
                attempter
                    .attempt_step(label, tag, || launcher_prereqs(ctx))
                    .await
            }
            BootStage::DpiCorrect => {
                if attempter.step_attempts() == 0 {
                    ensure_installed(
                        channel,
                        ctx.installer,
                        &ctx.policy,
                        BOOTSTRAP_PACKAGE,
                        config.bootstrap_apk.as_deref(),
                    )
                    .await?;
                }
                unlock_screen(channel, &ctx.policy).await;
                let ok = attempter
                    .attempt_step(label, tag, || check_dpi(channel, &ctx.policy))
                    .await;
                if !ok && attempter.step_attempts() > MAX_DPI_FAILURES {
                    return Err(DeviceError::Transient(format!(
                        "could not read correct DPI values in {} attempts",
                        attempter.step_attempts()
                    )));
                }
                ok
            }
            BootStage::LauncherStarted => {
                if attempter.step_attempts() > 0 {
                    unlock_screen(channel, &ctx.policy).await;
                }
                if attempter.step_attempts() > KICK_LAUNCHER_AFTER && !kicked_launcher {
                    kick_launcher(channel).await;
                    kicked_launcher = true;
                }
                attempter
                    .attempt_step(label, tag, || async {
                        let out = shell_or_empty(channel, &ctx.policy.launcher_command()).await;
                        let started = predicates::launcher_started(&out);
                        info!(started, "launcher running?");
                        started
                    })
                    .await
            }
            BootStage::FullyBooted => true,
        };
        if passed {
            flags.mark(stage);
        }
    }

    kill_crashed_processes(channel).await;
    info!(total_attempts = attempter.total_attempts(), "device fully booted");
    Ok(BootReport {
        flags,
        total_attempts: attempter.total_attempts(),
        timings: attempter.timings().clone(),
    })
}

/// System server running and package manager answering.
pub async fn health_check(channel: &dyn CommandChannel) -> bool {
    let system_server = predicates::system_server_running(&shell_or_empty(channel, &["ps"]).await);
    info!(system_server, "system_server running?");
    if !system_server {
        return false;
    }
    let pm = predicates::package_manager_running(
        &shell_or_empty(channel, &["pm", "path", "android"]).await,
    );
    info!(pm, "package manager running?");
    pm
}

/// True when `/data` or `/cache` went read-only under us.
async fn check_filesystems(channel: &dyn CommandChannel) -> bool {
    let table = shell_or_empty(channel, &["mount"]).await;
    let broken = predicates::data_remounted_read_only(&table);
    if broken {
        error!(mounts = %table, "data partition remounted read-only");
    }
    broken
}

async fn storage_mount_points(channel: &dyn CommandChannel) -> Vec<String> {
    let mut points = Vec::new();
    for var in STORAGE_VARS {
        let value = shell_or_empty(channel, &["printenv", var]).await;
        points.extend(value.split_whitespace().map(str::to_string));
    }
    points
}

async fn launcher_prereqs(ctx: &BootContext<'_>) -> bool {
    kill_crashed_processes(ctx.channel).await;
    match &ctx.config.ca_cert {
        Some(cert) => install_ca_cert(ctx.channel, &ctx.policy, cert).await,
        None => true,
    }
}

async fn check_dpi(channel: &dyn CommandChannel, policy: &CompatPolicy) -> bool {
    let instrumentation = format!("{BOOTSTRAP_PACKAGE}/.DpiCheck");
    let out = shell_or_empty(channel, &["am", "instrument", "-w", &instrumentation]).await;
    info!(output = %out, "dpi check");
    if predicates::dpi_ok(&out) {
        return true;
    }
    if policy.enforce_dpi {
        return false;
    }
    error!(api_level = policy.api_level, "DPI wrong but this image cannot restart its system");
    true
}

/// Log the device logcat, rereading while logcat reports a read failure.
async fn dump_logcat(channel: &dyn CommandChannel) {
    for _ in 0..LOGCAT_READS {
        let log = shell_or_empty(channel, &["logcat", "-v", "threadtime", "-d"]).await;
        if !predicates::logcat_read_failure(&log) {
            info!("device logcat:\n{log}");
            return;
        }
    }
    warn!(reads = LOGCAT_READS, "device logcat unreadable");
}

/// Kill processes that crashed or stopped responding but have not died.
pub async fn kill_crashed_processes(channel: &dyn CommandChannel) {
    let events = shell_or_empty(
        channel,
        &["logcat", "-d", "-b", "events", "-s", "am_crash:*", "am_anr:*", "am_proc_died:*"],
    )
    .await;
    let pids: Vec<String> = predicates::crashed_pids(&events)
        .iter()
        .map(u32::to_string)
        .collect();
    if pids.is_empty() {
        return;
    }
    info!(?pids, "killing crashed processes");
    let mut args = vec!["kill"];
    args.extend(pids.iter().map(String::as_str));
    shell_or_empty(channel, &args).await;
}

pub async fn unlock_screen(channel: &dyn CommandChannel, policy: &CompatPolicy) {
    shell_or_empty(channel, &policy.unlock_command()).await;
}

async fn kick_launcher(channel: &dyn CommandChannel) {
    info!("kicking launcher");
    shell_or_empty(
        channel,
        &["am", "start", "-a", "android.intent.action.MAIN", "-c", "android.intent.category.HOME"],
    )
    .await;
}

/// Push `cert` into the user CA store.
pub async fn install_ca_cert(
    channel: &dyn CommandChannel,
    policy: &CompatPolicy,
    cert: &Path,
) -> bool {
    let Some(dir) = policy.ca_cert_dir() else {
        warn!(api_level = policy.api_level, "user CA certificates are not supported");
        return true;
    };
    let Some(name) = cert.file_name().and_then(|n| n.to_str()) else {
        warn!(cert = %cert.display(), "certificate path has no file name");
        return true;
    };
    match channel.push(cert, &format!("{dir}/{name}")).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to push CA certificate");
            false
        }
    }
}

/// Device settings applied once the device is fully booted.
pub async fn post_boot_setup(
    channel: &dyn CommandChannel,
    policy: &CompatPolicy,
    sockets_dir: &Path,
) {
    let dir = sockets_dir.display().to_string();
    shell_or_empty(channel, &["setprop", "qemu.host.socket.dir", &dir]).await;

    for (table, name, value) in [
        ("system", "screen_off_timeout", "1800000"),
        ("secure", "lockscreen.disabled", "1"),
        ("secure", "show_ime_with_hard_keyboard", "0"),
    ] {
        let cmd = policy.setting_command(table, name, value);
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        shell_or_empty(channel, &args).await;
    }

    dismiss_stuck_keyguard_scrim(channel, policy).await;
    shell_or_empty(channel, &["mkdir -p /data/anr && chmod -R 777 /data/anr"]).await;
}

async fn dismiss_stuck_keyguard_scrim(channel: &dyn CommandChannel, policy: &CompatPolicy) {
    if !policy.has_keyguard_scrim_bug {
        return;
    }
    for _ in 0..5 {
        let input = shell_or_empty(channel, &["dumpsys", "input"]).await;
        if !predicates::keyguard_scrim_focused(&input) {
            return;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    // Screen off then on again so the scrim is hidden last.
    let power = ["input", "keyevent", "26"];
    shell_or_empty(channel, &power).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    shell_or_empty(channel, &power).await;
    info!("sent power key events to dismiss keyguard scrim");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;
    use crate::testing::{AlwaysInstalls, FakeChannel, healthy_device};

    struct Host {
        alive: AtomicBool,
        dumps: AtomicU32,
    }

    impl Host {
        fn new() -> Self {
            Self {
                alive: AtomicBool::new(true),
                dumps: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BootHost for Host {
        fn primary_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        async fn dump_logs(&self) {
            self.dumps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(max_attempts: u32) -> BootConfig {
        BootConfig {
            poll_interval: Duration::from_secs(1),
            max_attempts,
            deadline: Instant::now() + Duration::from_secs(3600),
            passthrough: false,
            bootstrap_apk: None,
            ca_cert: None,
        }
    }

    fn context<'a>(
        channel: &'a FakeChannel,
        host: &'a Host,
        config: BootConfig,
    ) -> BootContext<'a> {
        BootContext {
            channel,
            installer: &AlwaysInstalls,
            host,
            policy: CompatPolicy::for_api(23),
            config,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_device_boots_in_stage_order() {
        let channel = healthy_device();
        let host = Host::new();
        let report = wait_for_boot(&context(&channel, &host, config(300))).await.unwrap();

        assert_eq!(report.flags.next_stage(false), BootStage::FullyBooted);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 0);
        assert_eq!(report.total_attempts, 8);

        let order = [
            "<listening>",
            "pm path android",
            "printenv",
            "getprop",
            "logcat -d -b events",
            "pm list packages",
            "input keyevent 82",
            "am instrument",
        ];
        let positions: Vec<usize> = order.iter().map(|c| channel.first(c).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
        assert_eq!(channel.count("<connect>"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn later_stage_never_probed_before_earlier_passes() {
        let channel = healthy_device();
        channel.respond("getprop", &["", "", "[dev.bootcomplete]: [1]"]);
        let host = Host::new();
        wait_for_boot(&context(&channel, &host, config(300))).await.unwrap();

        let calls = channel.calls();
        let last_getprop = calls.iter().rposition(|c| c == "getprop").unwrap();
        let first_dpi = channel.first("am instrument").unwrap();
        assert!(last_getprop < first_dpi);
        assert_eq!(channel.count("getprop"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stage_failing_three_times_takes_four_attempts() {
        let channel = healthy_device();
        channel.respond("getprop", &["", "", "", "[sys.boot_completed]: [1]"]);
        let host = Host::new();
        let report = wait_for_boot(&context(&channel, &host, config(300))).await.unwrap();
        assert_eq!(channel.count("getprop"), 4);
        assert_eq!(report.total_attempts, 11);
        let sleep = report.timings.get("BOOT_COMPLETE_PRESENT_FAIL_SLEEP").unwrap();
        assert_eq!(sleep.starts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_listening_stops_after_max_attempts() {
        let channel = healthy_device();
        channel.listening(&[false]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(7))).await.unwrap_err();
        match err {
            DeviceError::BootTimeout { attempts, stage } => {
                assert_eq!(attempts, 7);
                assert_eq!(stage, BootStage::NotConnected);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(channel.count("<listening>"), 7);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
        assert_eq!(channel.count("logcat -v threadtime"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_polling() {
        let channel = healthy_device();
        channel.listening(&[false]);
        let host = Host::new();
        let mut cfg = config(1000);
        cfg.deadline = Instant::now() + Duration::from_millis(4500);
        let err = wait_for_boot(&context(&channel, &host, cfg)).await.unwrap_err();
        assert!(matches!(err, DeviceError::BootTimeout { attempts: 5, .. }), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rereads_failed_logcat() {
        let channel = healthy_device();
        channel
            .respond("getprop", &[""])
            .respond("logcat -v threadtime", &["logcat read failure", "I/boot: still booting"]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(10))).await.unwrap_err();
        assert!(
            matches!(err, DeviceError::BootTimeout { stage: BootStage::BootComplete, .. }),
            "{err}"
        );
        assert_eq!(channel.count("logcat -v threadtime"), 2);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_gives_up_on_unreadable_logcat() {
        let channel = healthy_device();
        channel
            .respond("getprop", &[""])
            .respond("logcat -v threadtime", &["logcat read failure"]);
        let host = Host::new();
        wait_for_boot(&context(&channel, &host, config(10))).await.unwrap_err();
        assert_eq!(channel.count("logcat -v threadtime"), LOGCAT_READS);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_primary_is_fatal() {
        let channel = healthy_device();
        let host = Host::new();
        host.alive.store(false, Ordering::SeqCst);
        let err = wait_for_boot(&context(&channel, &host, config(300))).await.unwrap_err();
        assert!(matches!(err, DeviceError::DeviceDied(_)));
        assert!(!err.is_transient());
        assert!(channel.calls().is_empty());
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn storage_wedge_is_transient() {
        let channel = healthy_device();
        channel.respond("printenv EXTERNAL_STORAGE", &[""]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(20))).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        // 20% of 20 attempts is 4; the fifth consecutive failure escalates.
        assert_eq!(channel.count("printenv EMULATED_STORAGE_SOURCE"), 5);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dpi_failures_are_transient() {
        let channel = healthy_device();
        channel.respond("am instrument", &["INSTRUMENTATION_CODE: 0"]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(300))).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert_eq!(channel.count("am instrument"), 5);
        assert_eq!(channel.count("pm list packages"), 1);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dpi_passes_below_enforcement_level() {
        let channel = healthy_device();
        channel.respond("am instrument", &["INSTRUMENTATION_CODE: 0"]);
        let host = Host::new();
        let mut ctx = context(&channel, &host, config(300));
        ctx.policy = CompatPolicy::for_api(10);
        channel.respond(
            "logcat -d -b events -s activity_launch_time",
            &["I/am_activity_launch_time: [0,1,com.android.launcher]"],
        );
        wait_for_boot(&ctx).await.unwrap();
        assert_eq!(channel.count("am instrument"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launcher_is_kicked_once() {
        let channel = healthy_device();
        channel.respond("ps", &["system_server"]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(20))).await.unwrap_err();
        assert!(matches!(err, DeviceError::BootTimeout { stage: BootStage::LauncherStarted, .. }));
        assert_eq!(channel.count("am start -a android.intent.action.MAIN"), 1);
        // Unlocked once before the DPI check and before every launcher retry.
        let launcher_checks = 20 - 7;
        assert_eq!(channel.count("input keyevent 82"), 1 + launcher_checks - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_data_is_transient() {
        let channel = healthy_device();
        channel.respond("mount", &["/dev/block/vda /data ext4 ro,seclabel 0 0"]);
        let host = Host::new();
        let err = wait_for_boot(&context(&channel, &host, config(300))).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(channel.count("pm path android"), 0);
        assert_eq!(host.dumps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn passthrough_connects_after_health_check() {
        let channel = healthy_device();
        let host = Host::new();
        let mut cfg = config(300);
        cfg.passthrough = true;
        let report = wait_for_boot(&context(&channel, &host, cfg)).await.unwrap();
        assert!(report.flags.transport_connected);
        assert!(channel.first("pm path android").unwrap() < channel.first("<connect>").unwrap());
        assert!(channel.first("<connect>").unwrap() < channel.first("printenv").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_relays_are_restarted() {
        let channel = healthy_device();
        channel.relays(false);
        let host = Host::new();
        wait_for_boot(&context(&channel, &host, config(300))).await.unwrap();
        assert_eq!(channel.count("<relays true>"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn crashed_processes_are_killed() {
        let channel = healthy_device();
        channel.respond("logcat -d -b events", &["I/am_crash( 1): [4321,0,com.example]"]);
        let host = Host::new();
        wait_for_boot(&context(&channel, &host, config(300))).await.unwrap();
        assert_eq!(channel.count("kill 4321"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ca_cert_is_pushed_with_its_name() {
        let channel = healthy_device();
        let host = Host::new();
        let mut cfg = config(300);
        cfg.ca_cert = Some(PathBuf::from("/certs/9a5ba575.0"));
        wait_for_boot(&context(&channel, &host, cfg)).await.unwrap();
        assert_eq!(
            channel.count("push /certs/9a5ba575.0 /data/misc/user/0/cacerts-added/9a5ba575.0"),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn post_boot_setup_dismisses_scrim() {
        let channel = FakeChannel::new();
        channel.respond(
            "dumpsys input",
            &["FocusedWindow: name='Window{KeyguardScrim}'"],
        );
        post_boot_setup(&channel, &CompatPolicy::for_api(22), Path::new("/tmp/s/sockets")).await;
        assert_eq!(channel.count("dumpsys input"), 5);
        assert_eq!(channel.count("input keyevent 26"), 2);
        assert_eq!(channel.count("settings put"), 3);
        assert_eq!(channel.first("setprop qemu.host.socket.dir /tmp/s/sockets"), Some(0));
    }
}
