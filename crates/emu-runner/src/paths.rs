use std::path::PathBuf;

use emu_device::SessionPaths;
use emu_device::paths::TEST_OUTPUT_ENV;

use crate::error::{RunnerError, RunnerResult};

/// Paths rooted at ~/.emu-runner/.
pub struct HomePaths {
    root: PathBuf,
}

impl HomePaths {
    pub fn new() -> RunnerResult<Self> {
        let home = std::env::var("HOME")
            .map_err(|_| RunnerError::Config("HOME environment variable not set".into()))?;
        Ok(Self {
            root: PathBuf::from(home).join(".emu-runner"),
        })
    }

    #[cfg(test)]
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Serializes runner commands against one session.
    pub fn session_lock(&self, name: &str) -> RunnerResult<PathBuf> {
        Ok(self.locks_dir().join(format!("{}.lock", session_name(name)?)))
    }

    /// Files of session `name`. Emulator logs go to the test output
    /// directory when one is set in the environment.
    pub fn session(&self, name: &str) -> RunnerResult<SessionPaths> {
        let root = self.sessions_dir().join(session_name(name)?);
        let output_dir = std::env::var_os(TEST_OUTPUT_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(SessionPaths::new(root, output_dir))
    }
}

/// Copy of the runner config the session was started with.
pub fn session_config(session: &SessionPaths) -> PathBuf {
    session.root().join("runner.yaml")
}

/// Session names become file names, so only a safe subset is allowed.
fn session_name(name: &str) -> RunnerResult<&str> {
    if name.is_empty()
        || name.starts_with('.')
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return Err(RunnerError::Config(format!(
            "invalid session name '{name}': only alphanumeric, '.', '-', '_' allowed"
        )));
    }
    Ok(name)
}
