//! Watchdog that owns the emulator process and its relays.
//!
//! Runs in its own detached process. It blocks in wait-any-child and
//! reacts to whichever child exited: a relay is brought back, the
//! primary ends the watch.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{DeviceError, Result};

/// One child the watchdog starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// stdout and stderr are appended here; discarded when unset.
    pub log: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            log: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }
}

/// Everything the detached watchdog needs, written to disk before it starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogPlan {
    pub primary: ProcessSpec,
    #[serde(default)]
    pub command_relays: Vec<ProcessSpec>,
    pub console_relay: Option<ProcessSpec>,
    /// Display server started before the primary.
    pub display: Option<ProcessSpec>,
    /// Merged into the primary's environment when a display is started.
    #[serde(default)]
    pub display_env: Vec<(String, String)>,
    /// Removed after the primary exits.
    pub cleanup_dir: Option<PathBuf>,
    pub new_process_group: bool,
    pub lock: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl WatchdogPlan {
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    /// Checks that must hold before the detached watchdog is started.
    pub fn check_preconditions(&self) -> Result<()> {
        let specs = std::iter::once(&self.primary)
            .chain(&self.command_relays)
            .chain(&self.console_relay)
            .chain(&self.display);
        for spec in specs {
            if !spec.program.is_file() {
                return Err(DeviceError::Spawn {
                    program: spec.program.display().to_string(),
                    detail: "executable not found".into(),
                });
            }
            if let Some(cwd) = &spec.cwd
                && !cwd.is_dir()
            {
                return Err(DeviceError::Spawn {
                    program: spec.program.display().to_string(),
                    detail: format!("working directory {} does not exist", cwd.display()),
                });
            }
        }
        for path in [&self.stdout, &self.stderr] {
            if let Some(parent) = path.parent()
                && !parent.is_dir()
            {
                return Err(DeviceError::Spawn {
                    program: self.primary.program.display().to_string(),
                    detail: format!("log directory {} does not exist", parent.display()),
                });
            }
        }
        Ok(())
    }
}

/// A child that was reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: u32,
    /// Exit code, or 128 + signal number.
    pub code: i32,
}

/// OS process operations the watchdog loop needs.
pub trait ProcessHost {
    fn spawn(&mut self, spec: &ProcessSpec) -> Result<u32>;

    /// Block until any child exits.
    fn wait_any(&mut self) -> Result<ChildExit>;

    fn terminate(&mut self, pid: u32) -> Result<()>;

    fn cleanup(&mut self, dir: &Path) -> Result<()>;
}

/// [`ProcessHost`] for the current process's real children.
#[derive(Debug, Default)]
pub struct OsProcessHost;

fn log_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl ProcessHost for OsProcessHost {
    fn spawn(&mut self, spec: &ProcessSpec) -> Result<u32> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        match &spec.log {
            Some(path) => {
                let out = log_file(path)?;
                let err = out.try_clone()?;
                cmd.stdout(out).stderr(err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }
        // Reaped through waitpid(-1); the handle is not needed.
        let child = cmd.spawn().map_err(|e| DeviceError::Spawn {
            program: spec.program.display().to_string(),
            detail: e.to_string(),
        })?;
        let pid = child.id();
        info!(name = %spec.name, pid, "spawned");
        Ok(pid)
    }

    fn wait_any(&mut self) -> Result<ChildExit> {
        loop {
            match waitpid(None, None) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    return Ok(ChildExit {
                        pid: pid.as_raw().unsigned_abs(),
                        code,
                    });
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    return Ok(ChildExit {
                        pid: pid.as_raw().unsigned_abs(),
                        code: 128 + signal as i32,
                    });
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(DeviceError::Io(e.into())),
            }
        }
    }

    fn terminate(&mut self, pid: u32) -> Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| DeviceError::Invariant(format!("pid {pid} out of range")))?;
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DeviceError::Io(e.into())),
        }
    }

    fn cleanup(&mut self, dir: &Path) -> Result<()> {
        match std::fs::remove_dir_all(dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn terminate_quietly(host: &mut dyn ProcessHost, pid: u32, what: &str) {
    if let Err(e) = host.terminate(pid) {
        warn!(pid, what, error = %e, "terminate failed");
    }
}

struct Children {
    primary: u32,
    command_relays: Vec<u32>,
    console_relay: Option<u32>,
    display: Option<u32>,
}

impl Children {
    fn teardown(&mut self, host: &mut dyn ProcessHost) {
        for pid in self.command_relays.drain(..) {
            terminate_quietly(host, pid, "command relay");
        }
        if let Some(pid) = self.console_relay.take() {
            terminate_quietly(host, pid, "console relay");
        }
        if let Some(pid) = self.display.take() {
            terminate_quietly(host, pid, "display");
        }
    }
}

fn spawn_relays(host: &mut dyn ProcessHost, specs: &[ProcessSpec]) -> Vec<u32> {
    specs
        .iter()
        .filter_map(|spec| match host.spawn(spec) {
            Ok(pid) => Some(pid),
            Err(e) => {
                error!(name = %spec.name, error = %e, "relay spawn failed");
                None
            }
        })
        .collect()
}

/// Start every process in `plan` and supervise until the primary exits.
///
/// Returns the primary's exit code. Relay failures are absorbed by
/// respawning; terminate errors are logged and never returned.
pub fn run_watchdog(host: &mut dyn ProcessHost, plan: &WatchdogPlan) -> Result<i32> {
    let mut primary_spec = plan.primary.clone();
    let display_pid = match &plan.display {
        Some(spec) => {
            let pid = host.spawn(spec)?;
            primary_spec.env.extend(plan.display_env.iter().cloned());
            Some(pid)
        }
        None => None,
    };

    let primary = match host.spawn(&primary_spec) {
        Ok(pid) => pid,
        Err(e) => {
            if let Some(pid) = display_pid {
                terminate_quietly(host, pid, "display");
            }
            return Err(e);
        }
    };

    let mut children = Children {
        primary,
        command_relays: spawn_relays(host, &plan.command_relays),
        console_relay: None,
        display: display_pid,
    };
    if let Some(spec) = &plan.console_relay {
        children.console_relay = spawn_relays(host, std::slice::from_ref(spec)).first().copied();
    }

    loop {
        let exit = match host.wait_any() {
            Ok(exit) => exit,
            Err(e) => {
                error!(error = %e, "wait failed, tearing down");
                terminate_quietly(host, children.primary, "primary");
                children.teardown(host);
                return Err(e);
            }
        };

        if exit.pid == children.primary {
            info!(code = exit.code, "primary exited");
            children.teardown(host);
            if let Some(dir) = &plan.cleanup_dir
                && let Err(e) = host.cleanup(dir)
            {
                warn!(dir = %dir.display(), error = %e, "cleanup failed");
            }
            return Ok(exit.code);
        }

        if children.command_relays.contains(&exit.pid) {
            warn!(pid = exit.pid, code = exit.code, "command relay died, restarting the set");
            for pid in std::mem::take(&mut children.command_relays) {
                if pid != exit.pid {
                    terminate_quietly(host, pid, "command relay");
                }
            }
            children.command_relays = spawn_relays(host, &plan.command_relays);
        } else if children.console_relay == Some(exit.pid) {
            warn!(pid = exit.pid, code = exit.code, "console relay died, restarting");
            children.console_relay = plan
                .console_relay
                .as_ref()
                .and_then(|spec| spawn_relays(host, std::slice::from_ref(spec)).first().copied());
        } else {
            info!(pid = exit.pid, code = exit.code, "reaped unknown child");
        }
    }
}

/// Detach from the parent session and route stdout/stderr to the plan's files.
pub fn detach(plan: &WatchdogPlan) -> Result<()> {
    if plan.new_process_group {
        nix::unistd::setsid().map_err(|e| DeviceError::Io(e.into()))?;
    }
    nix::unistd::dup2_stdout(log_file(&plan.stdout)?).map_err(|e| DeviceError::Io(e.into()))?;
    nix::unistd::dup2_stderr(log_file(&plan.stderr)?).map_err(|e| DeviceError::Io(e.into()))?;
    Ok(())
}

/// Start `exe args...` without waiting for it. The child leaves our
/// session itself through [`detach`].
pub fn spawn_detached(exe: &Path, args: &[&str]) -> Result<std::process::Child> {
    Command::new(exe)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| DeviceError::Spawn {
            program: exe.display().to_string(),
            detail: e.to_string(),
        })
}

/// Whether `pid` still names a process. Zombies count as alive.
pub fn is_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
}

/// SIGKILL every process in the group led by `pid`, or just `pid` when it
/// never became a group leader.
pub fn kill_group(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| DeviceError::Invariant(format!("pid {pid} out of range")))?;
    let result = match nix::sys::signal::killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Err(Errno::ESRCH) => kill(Pid::from_raw(raw), Signal::SIGKILL),
        other => other,
    };
    match result {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(DeviceError::Io(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Spawn(String, u32),
        Terminate(u32),
        Cleanup(PathBuf),
    }

    /// Hands out pids from 100 and replays a scripted exit sequence. The
    /// script names processes by spawn order.
    struct FakeHost {
        next_pid: u32,
        exits: VecDeque<usize>,
        spawned: Vec<u32>,
        events: Vec<Event>,
        env_seen: Vec<Vec<(String, String)>>,
    }

    impl FakeHost {
        fn new(exits: &[usize]) -> Self {
            Self {
                next_pid: 100,
                exits: exits.iter().copied().collect(),
                spawned: Vec::new(),
                events: Vec::new(),
                env_seen: Vec::new(),
            }
        }

        fn terminations(&self, pid: u32) -> usize {
            self.events
                .iter()
                .filter(|e| **e == Event::Terminate(pid))
                .count()
        }
    }

    impl ProcessHost for FakeHost {
        fn spawn(&mut self, spec: &ProcessSpec) -> Result<u32> {
            let pid = self.next_pid;
            self.next_pid += 1;
            self.spawned.push(pid);
            self.env_seen.push(spec.env.clone());
            self.events.push(Event::Spawn(spec.name.clone(), pid));
            Ok(pid)
        }

        fn wait_any(&mut self) -> Result<ChildExit> {
            let index = self
                .exits
                .pop_front()
                .ok_or_else(|| DeviceError::Invariant("script exhausted".into()))?;
            Ok(ChildExit {
                pid: self.spawned[index],
                code: 0,
            })
        }

        fn terminate(&mut self, pid: u32) -> Result<()> {
            self.events.push(Event::Terminate(pid));
            Err(DeviceError::Invariant("terminate errors are swallowed".into()))
        }

        fn cleanup(&mut self, dir: &Path) -> Result<()> {
            self.events.push(Event::Cleanup(dir.to_path_buf()));
            Ok(())
        }
    }

    fn plan() -> WatchdogPlan {
        WatchdogPlan {
            primary: ProcessSpec::new("emulator", "/bin/emulator"),
            command_relays: vec![
                ProcessSpec::new("relay-a", "/bin/relay"),
                ProcessSpec::new("relay-b", "/bin/relay"),
            ],
            console_relay: Some(ProcessSpec::new("console", "/bin/relay")),
            display: None,
            display_env: Vec::new(),
            cleanup_dir: Some(PathBuf::from("/tmp/session")),
            new_process_group: true,
            lock: PathBuf::from("/tmp/session.lock"),
            stdout: PathBuf::from("/tmp/watchdog.out"),
            stderr: PathBuf::from("/tmp/watchdog.err"),
        }
    }

    #[test]
    fn primary_exit_terminates_each_relay_once() {
        // pids: emulator 100, relay-a 101, relay-b 102, console 103
        let mut host = FakeHost::new(&[0]);
        let code = run_watchdog(&mut host, &plan()).unwrap();
        assert_eq!(code, 0);
        for pid in [101, 102, 103] {
            assert_eq!(host.terminations(pid), 1, "pid {pid}");
        }
        assert_eq!(host.terminations(100), 0);
        assert_eq!(host.events.last(), Some(&Event::Cleanup(PathBuf::from("/tmp/session"))));
    }

    #[test]
    fn command_relay_death_restarts_the_set() {
        // relay-a (101) dies; relay-b (102) is terminated and both respawn
        // as 104 and 105. Then 102 is reaped as unknown, then the primary.
        let mut host = FakeHost::new(&[1, 2, 0]);
        run_watchdog(&mut host, &plan()).unwrap();

        assert_eq!(host.terminations(101), 0);
        assert_eq!(host.terminations(102), 1);
        let respawned: Vec<&Event> = host
            .events
            .iter()
            .filter(|e| matches!(e, Event::Spawn(_, pid) if *pid >= 104))
            .collect();
        assert_eq!(
            respawned,
            [
                &Event::Spawn("relay-a".into(), 104),
                &Event::Spawn("relay-b".into(), 105)
            ]
        );
        for pid in [103, 104, 105] {
            assert_eq!(host.terminations(pid), 1, "pid {pid}");
        }
    }

    #[test]
    fn console_relay_death_respawns_only_it() {
        let mut host = FakeHost::new(&[3, 0]);
        run_watchdog(&mut host, &plan()).unwrap();
        assert_eq!(host.spawned, [100, 101, 102, 103, 104]);
        assert_eq!(host.terminations(103), 0);
        assert_eq!(host.terminations(104), 1);
        assert_eq!(host.terminations(101), 1);
    }

    #[test]
    fn display_env_reaches_primary() {
        let mut plan = plan();
        plan.display = Some(ProcessSpec::new("xvfb", "/bin/Xvfb"));
        plan.display_env = vec![("DISPLAY".into(), ":3".into())];
        // display 100, emulator 101
        let mut host = FakeHost::new(&[1]);
        run_watchdog(&mut host, &plan).unwrap();
        assert!(host.env_seen[0].is_empty());
        assert_eq!(host.env_seen[1], [("DISPLAY".to_string(), ":3".to_string())]);
        assert_eq!(host.terminations(100), 1);
    }

    #[test]
    fn missing_executable_fails_preconditions() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut plan = plan();
        plan.stdout = dir.path().join("out");
        plan.stderr = dir.path().join("err");
        let err = plan.check_preconditions().unwrap_err();
        assert!(matches!(err, DeviceError::Spawn { .. }), "{err}");

        plan.primary = ProcessSpec::new("sh", "/bin/sh").cwd(dir.path().join("missing"));
        plan.command_relays.clear();
        plan.console_relay = None;
        let err = plan.check_preconditions().unwrap_err();
        assert!(err.to_string().contains("working directory"), "{err}");

        plan.primary = ProcessSpec::new("sh", "/bin/sh").cwd(dir.path());
        plan.check_preconditions().unwrap();
    }

    #[test]
    fn plan_round_trips() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("watchdog.json");
        let mut plan = plan();
        plan.primary = plan.primary.args(["-avd", "dev"]).env("HOME", "/h").log("/l");
        plan.save(&path).unwrap();
        assert_eq!(WatchdogPlan::load(&path).unwrap(), plan);
    }
}
