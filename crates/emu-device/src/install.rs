//! Package installation with retries and hung-install detection.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{info, warn};

use crate::command::{AdbChannel, CommandChannel, CommandError, shell_or_empty};
use crate::error::{DeviceError, Result};
use crate::idle::IdleStatus;
use crate::policy::CompatPolicy;
use crate::predicates;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const LOAD_CHECK_EVERY: u32 = 16;
const HUNG_LOAD_WINDOW: Duration = Duration::from_secs(20);
const HUNG_LOAD: f64 = 0.1;

/// One `adb install` invocation.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub apk: PathBuf,
    pub flags: Vec<&'static str>,
    pub timeout: Duration,
    /// Watch device load while waiting and give up once the device goes
    /// idle without the install returning.
    pub watch_idle: bool,
}

impl InstallRequest {
    /// Arguments after `adb -s <serial>`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["install".to_string()];
        args.extend(self.flags.iter().map(|f| f.to_string()));
        args.push("-r".to_string());
        args.push(self.apk.display().to_string());
        args
    }
}

/// Performs single install attempts.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Run one install and return its output.
    async fn install_once(
        &self,
        request: &InstallRequest,
    ) -> std::result::Result<String, CommandError>;
}

/// Time allowed for one install of a package of `size` bytes.
pub fn install_timeout(size: u64, ahead_of_time: bool) -> Duration {
    if size > 30 << 20 {
        Duration::from_secs(240)
    } else if ahead_of_time && size > 20 << 20 {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(60)
    }
}

pub async fn is_installed(channel: &dyn CommandChannel, package: &str) -> bool {
    let out = shell_or_empty(channel, &["pm", "list", "packages", package]).await;
    predicates::package_listed(&out, package)
}

/// Install `apk`, retrying up to `max_tries` times.
///
/// Output naming a permanent install error stops immediately. Anything else
/// without `Success` is retried after a one second pause.
pub async fn install_apk(
    channel: &dyn CommandChannel,
    installer: &dyn PackageInstaller,
    policy: &CompatPolicy,
    apk: &Path,
    max_tries: u32,
    grant_permissions: bool,
) -> Result<()> {
    let size = tokio::fs::metadata(apk)
        .await
        .map_err(|e| DeviceError::Install {
            path: apk.to_path_buf(),
            detail: format!("cannot read package: {e}"),
        })?
        .len();

    let request = InstallRequest {
        apk: apk.to_path_buf(),
        flags: policy.install_flags(grant_permissions),
        timeout: install_timeout(size, policy.ahead_of_time_install),
        watch_idle: policy.ahead_of_time_install,
    };

    let mut attempts = 0;
    loop {
        info!(apk = %apk.display(), "installing");
        let output = match installer.install_once(&request).await {
            Ok(out) => out,
            Err(e) => format!("{}\n{}", e.stdout, e.stderr),
        };
        attempts += 1;

        if predicates::install_succeeded(&output) {
            info!(apk = %apk.display(), attempts, "install done");
            return Ok(());
        }
        if let Some(reason) = predicates::permanent_install_error(&output) {
            warn!(apk = %apk.display(), reason, "permanent install failure");
            return Err(DeviceError::PermanentInstall {
                path: apk.to_path_buf(),
                output,
            });
        }

        info!(output = %output, "install failed");
        let logcat =
            shell_or_empty(channel, &["logcat", "-v", "threadtime", "-b", "all", "-d"]).await;
        info!(logcat = %logcat, "device log after failed install");

        if attempts >= max_tries {
            return Err(DeviceError::Install {
                path: apk.to_path_buf(),
                detail: format!("gave up after {attempts} attempts: {output}"),
            });
        }
        info!(apk = %apk.display(), attempts, "attempting install again");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Install `apk` unless `package` is already present.
pub async fn ensure_installed(
    channel: &dyn CommandChannel,
    installer: &dyn PackageInstaller,
    policy: &CompatPolicy,
    package: &str,
    apk: Option<&Path>,
) -> Result<()> {
    if is_installed(channel, package).await {
        return Ok(());
    }
    let Some(apk) = apk else {
        warn!(package, "package missing and no apk configured");
        return Ok(());
    };
    install_apk(channel, installer, policy, apk, 5, false).await
}

/// Poll `finished` until it reports true or the device goes idle.
///
/// Returns true when the device looks idle while the work is still running.
pub async fn watch_for_hang(idle: &mut IdleStatus<'_>, mut finished: impl FnMut() -> bool) -> bool {
    let mut polls: u32 = 0;
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;
        if finished() {
            return false;
        }
        polls += 1;
        if polls % LOAD_CHECK_EVERY != 0 {
            continue;
        }
        let load = idle.recent_max_load(HUNG_LOAD_WINDOW).await;
        if load > HUNG_LOAD {
            info!(load, "system still busy");
        } else {
            info!(load, "system idle while install is running");
            return true;
        }
    }
}

async fn drain(stream: Option<impl AsyncRead + Unpin>) -> String {
    let mut out = String::new();
    if let Some(mut s) = stream
        && let Err(e) = s.read_to_string(&mut out).await
    {
        warn!(error = %e, "failed to read install output");
    }
    out
}

#[async_trait]
impl PackageInstaller for AdbChannel {
    async fn install_once(
        &self,
        request: &InstallRequest,
    ) -> std::result::Result<String, CommandError> {
        let mut args = vec!["-s".to_string(), self.serial().to_string()];
        args.extend(request.args());
        let cmdline = format!("{} {}", self.adb().display(), args.join(" "));

        if !request.watch_idle {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            return crate::command::run_host(self.adb(), &args, self.env(), request.timeout).await;
        }

        let mut child = Command::new(self.adb())
            .args(&args)
            .envs(self.env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CommandError {
                command: cmdline.clone(),
                stdout: String::new(),
                stderr: e.to_string(),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let reader = tokio::spawn(async move {
            let (out, err) = tokio::join!(drain(stdout), drain(stderr));
            out + &err
        });

        let watched = tokio::time::timeout(request.timeout, async {
            let mut idle = IdleStatus::new(self).await;
            let hung = watch_for_hang(&mut idle, || !matches!(child.try_wait(), Ok(None))).await;
            if hung {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill hung install");
                }
                return (true, None);
            }
            (false, child.wait().await.ok())
        })
        .await;

        let (hung, status) = match watched {
            Ok(result) => result,
            Err(_) => {
                reader.abort();
                return Err(CommandError {
                    command: cmdline,
                    stdout: String::new(),
                    stderr: format!("timed out after {:?}", request.timeout),
                });
            }
        };
        let output = reader.await.unwrap_or_default();
        info!(cmd = %cmdline, ?status, "install finished");

        if hung {
            return Err(CommandError {
                command: cmdline,
                stdout: output.clone(),
                stderr: format!(
                    "device idle but install still running, system hung? output: {output}"
                ),
            });
        }
        match status {
            Some(s) if s.success() => Ok(output),
            _ => Err(CommandError {
                command: cmdline,
                stdout: output,
                stderr: String::new(),
            }),
        }
    }
}
