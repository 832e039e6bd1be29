//! Scripted fakes shared by the unit tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::boot::BOOTSTRAP_PACKAGE;
use crate::command::{CommandChannel, CommandError};
use crate::console::{ConsoleCommands, ConsoleError};
use crate::install::{InstallRequest, PackageInstaller};

/// Prefix of a scripted response that makes the call fail.
pub const FAIL: &str = "!fail:";

struct Rule {
    prefix: String,
    outputs: VecDeque<String>,
}

/// A [`CommandChannel`] answering from per-command scripts.
///
/// Each rule matches commands starting with its prefix (longest prefix
/// wins). Its outputs are returned in order and the last one repeats.
/// Unmatched commands return empty output. Every call is recorded.
#[derive(Default)]
pub struct FakeChannel {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    listening: Mutex<VecDeque<bool>>,
    relays: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.listening.lock().unwrap().push_back(true);
        fake.relays.store(true, Ordering::SeqCst);
        fake
    }

    pub fn respond(&self, prefix: &str, outputs: &[&str]) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        rules.retain(|r| r.prefix != prefix);
        rules.push(Rule {
            prefix: prefix.to_string(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn listening(&self, results: &[bool]) -> &Self {
        *self.listening.lock().unwrap() = results.iter().copied().collect();
        self
    }

    pub fn relays(&self, running: bool) -> &Self {
        self.relays.store(running, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Index of the first recorded call starting with `prefix`.
    pub fn first(&self, prefix: &str) -> Option<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_output(&self, cmd: &str) -> Option<String> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules
            .iter_mut()
            .filter(|r| cmd.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())?;
        if rule.outputs.len() > 1 {
            rule.outputs.pop_front()
        } else {
            rule.outputs.front().cloned()
        }
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn shell(&self, args: &[&str]) -> Result<String, CommandError> {
        let cmd = args.join(" ");
        self.record(cmd.clone());
        match self.next_output(&cmd) {
            Some(out) => match out.strip_prefix(FAIL) {
                Some(stderr) => Err(CommandError {
                    command: cmd,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                }),
                None => Ok(out),
            },
            None => Ok(String::new()),
        }
    }

    async fn push(&self, local: &Path, remote: &str) -> Result<(), CommandError> {
        self.record(format!("push {} {remote}", local.display()));
        Ok(())
    }

    async fn transport_listening(&self) -> bool {
        self.record("<listening>".to_string());
        let mut results = self.listening.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap_or(false)
        } else {
            results.front().copied().unwrap_or(false)
        }
    }

    async fn connect_transport(&self) -> bool {
        self.record("<connect>".to_string());
        true
    }

    fn relays_running(&self) -> bool {
        self.relays.load(Ordering::SeqCst)
    }

    async fn set_relays(&self, running: bool) -> bool {
        self.record(format!("<relays {running}>"));
        self.relays.store(running, Ordering::SeqCst);
        true
    }
}

/// A device that answers every boot check positively.
pub fn healthy_device() -> FakeChannel {
    let channel = FakeChannel::new();
    channel
        .respond("ps", &["system_server\ncom.android.launcher3"])
        .respond("pm path android", &["package:/system/framework/framework-res.apk"])
        .respond("printenv EXTERNAL_STORAGE", &["/sdcard"])
        .respond("mount", &["/dev/block/vda /data ext4 rw 0 0\n/dev/block/vdb /sdcard vfat rw 0 0"])
        .respond("getprop", &["[sys.boot_completed]: [1]"])
        .respond("pm list packages", &[BOOTSTRAP_PACKAGE])
        .respond("am instrument", &["INSTRUMENTATION_CODE: -1"]);
    channel
}

/// Installer whose every attempt succeeds.
pub struct AlwaysInstalls;

#[async_trait]
impl PackageInstaller for AlwaysInstalls {
    async fn install_once(&self, _request: &InstallRequest) -> Result<String, CommandError> {
        Ok("Success".into())
    }
}

/// Records console command batches and answers `OK`.
#[derive(Default)]
pub struct FakeConsole {
    sessions: Mutex<Vec<Vec<String>>>,
    refuse: AtomicBool,
}

impl FakeConsole {
    /// Every connection attempt fails as if the port were closed.
    pub fn refusing() -> Self {
        let console = Self::default();
        console.refuse.store(true, Ordering::SeqCst);
        console
    }

    pub fn sessions(&self) -> Vec<Vec<String>> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsoleCommands for FakeConsole {
    async fn run(&self, commands: &[&str]) -> Result<String, ConsoleError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConsoleError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        self.sessions
            .lock()
            .unwrap()
            .push(commands.iter().map(|c| c.to_string()).collect());
        Ok("OK".into())
    }
}
