use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, trace, warn};

/// Upper bound for a single `adb shell` round trip.
const SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for short adb housekeeping calls (connect, service toggles).
const SHORT_TIMEOUT: Duration = Duration::from_secs(20);

/// Error from a failed command, on the device or on the host.
#[derive(Debug, thiserror::Error)]
#[error("command failed: {command}\n{stderr}")]
pub struct CommandError {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
}

impl CommandError {
    fn spawn(command: &str, detail: impl ToString) -> Self {
        Self {
            command: command.to_string(),
            stdout: String::new(),
            stderr: detail.to_string(),
        }
    }
}

/// Executes commands against a running device.
///
/// The returned text is the only signal readiness checks get; callers search
/// it for substrings rather than parsing it. Every method must be safe to
/// call repeatedly while polling.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run `args` (joined by spaces) in the device shell.
    async fn shell(&self, args: &[&str]) -> Result<String, CommandError>;

    /// Copy a host file onto the device.
    async fn push(&self, local: &Path, remote: &str) -> Result<(), CommandError>;

    /// Whether the device transport port accepts TCP connections.
    async fn transport_listening(&self) -> bool;

    /// Attach the host-side transport server to the device.
    ///
    /// Only used with the passthrough transport.
    async fn connect_transport(&self) -> bool;

    /// Whether the on-device relay services are believed to be running.
    fn relays_running(&self) -> bool;

    /// Start or stop the on-device relay services.
    async fn set_relays(&self, running: bool) -> bool;
}

/// Run a device command whose failure only matters as "no output".
pub async fn shell_or_empty(channel: &dyn CommandChannel, args: &[&str]) -> String {
    channel.shell(args).await.unwrap_or_else(|e| {
        warn!(cmd = %e.command, stderr = %e.stderr, "ignoring failed device command");
        e.stdout
    })
}

/// Run a host program and return its trimmed stdout.
///
/// A non-zero exit or an expired `timeout` is reported as [`CommandError`].
pub async fn run_host(
    program: &Path,
    args: &[&str],
    env: &[(String, String)],
    timeout: Duration,
) -> Result<String, CommandError> {
    let cmdline = format!("{} {}", program.display(), args.join(" "));
    trace!(cmd = %cmdline, "run_host");

    let child = Command::new(program)
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| CommandError::spawn(&cmdline, format!("timed out after {timeout:?}")))?
        .map_err(|e| CommandError::spawn(&cmdline, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        Ok(stdout)
    } else {
        Err(CommandError {
            command: cmdline,
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Connection details for talking to one device through adb.
#[derive(Debug, Clone)]
pub struct AdbConfig {
    pub adb: PathBuf,
    pub serial: String,
    pub adb_port: u16,
    pub server_port: u16,
    pub home: Option<PathBuf>,
    /// Test output directory, used as `TMPDIR` for adb when set.
    pub output_dir: Option<PathBuf>,
}

/// [`CommandChannel`] backed by the adb command line client.
pub struct AdbChannel {
    config: AdbConfig,
    env: Vec<(String, String)>,
    relays_running: AtomicBool,
}

impl AdbChannel {
    /// `relays_running` is false after a snapshot restore: the relay
    /// services were stopped before the snapshot was taken.
    pub fn new(config: AdbConfig, relays_running: bool) -> Self {
        let mut env = vec![
            ("ANDROID_ADB_SERVER_PORT".to_string(), config.server_port.to_string()),
            ("ANDROID_ADB".to_string(), config.adb.display().to_string()),
            ("ANDROID_SERIAL".to_string(), config.serial.clone()),
        ];
        if let Some(home) = &config.home {
            env.push(("HOME".into(), home.display().to_string()));
        }
        if let Some(dir) = &config.output_dir {
            env.push(("TMPDIR".into(), dir.display().to_string()));
        }
        Self {
            config,
            env,
            relays_running: AtomicBool::new(relays_running),
        }
    }

    pub fn serial(&self) -> &str {
        &self.config.serial
    }

    /// Environment adb subprocesses must run with.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn adb(&self) -> &Path {
        &self.config.adb
    }

    async fn adb_call(&self, args: &[&str], timeout: Duration) -> Result<String, CommandError> {
        let mut full = vec!["-s", self.config.serial.as_str()];
        full.extend_from_slice(args);
        run_host(&self.config.adb, &full, &self.env, timeout).await
    }
}

#[async_trait]
impl CommandChannel for AdbChannel {
    async fn shell(&self, args: &[&str]) -> Result<String, CommandError> {
        let cmdline = args.join(" ");
        info!(cmd = %cmdline, "executing on device");
        let result = self.adb_call(&["shell", &cmdline], SHELL_TIMEOUT).await;
        if let Err(e) = &result
            && !e.stderr.is_empty()
        {
            warn!(cmd = %cmdline, stderr = %e.stderr, "device command failed");
        }
        result
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), CommandError> {
        let local = local.display().to_string();
        info!(local = %local, remote, "pushing to device");
        self.adb_call(&["push", &local, remote], SHELL_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn transport_listening(&self) -> bool {
        tokio::net::TcpStream::connect(("127.0.0.1", self.config.adb_port))
            .await
            .is_ok()
    }

    async fn connect_transport(&self) -> bool {
        let target = format!("localhost:{}", self.config.adb_port);
        let out = match run_host(
            &self.config.adb,
            &["connect", &target],
            &self.env,
            SHORT_TIMEOUT,
        )
        .await
        {
            Ok(out) => out,
            Err(e) => {
                warn!(error = %e, "adb connect failed");
                return false;
            }
        };
        crate::predicates::transport_connected(&out, self.config.adb_port)
    }

    fn relays_running(&self) -> bool {
        self.relays_running.load(Ordering::SeqCst)
    }

    async fn set_relays(&self, running: bool) -> bool {
        let action = if running { "start" } else { "stop" };
        for service in crate::RELAY_SERVICES {
            let args = ["wait-for-device", "shell", action, service];
            if let Err(e) = self.adb_call(&args, SHORT_TIMEOUT).await {
                warn!(service, action, error = %e, "relay service toggle failed");
                return false;
            }
        }
        self.relays_running.store(running, Ordering::SeqCst);

        if !running
            && let Err(e) = self.adb_call(&["disconnect"], SHORT_TIMEOUT).await
        {
            warn!(error = %e, "adb disconnect failed");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SH: &str = "sh";

    #[tokio::test]
    async fn run_host_returns_trimmed_stdout() {
        let output = run_host(Path::new(SH), &["-c", "echo '  hello  '"], &[], SHORT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(output, "hello");
    }

    #[tokio::test]
    async fn run_host_passes_environment() {
        let env = vec![("EMU_TEST_VALUE".to_string(), "42".to_string())];
        let output = run_host(Path::new(SH), &["-c", "echo $EMU_TEST_VALUE"], &env, SHORT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(output, "42");
    }

    #[tokio::test]
    async fn run_host_error_carries_both_streams() {
        let err = run_host(
            Path::new(SH),
            &["-c", "echo partial; echo oops >&2; exit 3"],
            &[],
            SHORT_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert_eq!(err.stdout, "partial");
        assert!(err.stderr.contains("oops"), "stderr was: {}", err.stderr);
    }

    #[tokio::test]
    async fn run_host_times_out() {
        let err = run_host(
            Path::new(SH),
            &["-c", "sleep 5"],
            &[],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(err.stderr.contains("timed out"), "stderr was: {}", err.stderr);
    }

    #[tokio::test]
    async fn run_host_reports_missing_program() {
        let err = run_host(
            Path::new("/nonexistent/emu-test-binary"),
            &[],
            &[],
            SHORT_TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(err.command.contains("emu-test-binary"));
    }

    #[test]
    fn adb_env_includes_optional_dirs() {
        let channel = AdbChannel::new(
            AdbConfig {
                adb: PathBuf::from("/opt/adb"),
                serial: "localhost:5555".into(),
                adb_port: 5555,
                server_port: 5037,
                home: Some(PathBuf::from("/home/emu")),
                output_dir: Some(PathBuf::from("/tmp/out")),
            },
            true,
        );
        let keys: Vec<&str> = channel.env().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            [
                "ANDROID_ADB_SERVER_PORT",
                "ANDROID_ADB",
                "ANDROID_SERIAL",
                "HOME",
                "TMPDIR"
            ]
        );
        assert!(channel.relays_running());
    }
}
