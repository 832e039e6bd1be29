use std::path::{Path, PathBuf};

/// Name of the environment variable naming the test output directory.
pub const TEST_OUTPUT_ENV: &str = "TEST_UNDECLARED_OUTPUTS_DIR";

/// Files and directories belonging to one device session.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    root: PathBuf,
    output_dir: Option<PathBuf>,
}

impl SessionPaths {
    /// `output_dir` is the test output directory, when one was declared.
    pub fn new(root: PathBuf, output_dir: Option<PathBuf>) -> Self {
        Self { root, output_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn device(&self) -> PathBuf {
        self.root.join("device.json")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    pub fn watchdog_plan(&self) -> PathBuf {
        self.root.join("watchdog.json")
    }

    /// Held exclusively by the watchdog for as long as it runs.
    pub fn lock(&self) -> PathBuf {
        self.root.join("session.lock")
    }

    /// Working directory of the emulator process.
    pub fn images(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn sockets(&self) -> PathBuf {
        self.images().join("sockets")
    }

    /// Stand-in `HOME` for the emulator and adb.
    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn avd_dir(&self) -> PathBuf {
        self.home().join(".android").join("avd")
    }

    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Log directory, under the test output directory when there is one.
    pub fn logs(&self) -> PathBuf {
        match &self.output_dir {
            Some(dir) => dir.join("emulator_logs"),
            None => self.root.join("logs"),
        }
    }

    pub fn emulator_log(&self) -> PathBuf {
        self.logs().join("emulator.log")
    }

    pub fn watchdog_dir(&self) -> PathBuf {
        self.logs().join("watchdog")
    }

    pub fn watchdog_out(&self) -> PathBuf {
        self.watchdog_dir().join("watchdog.out")
    }

    pub fn watchdog_err(&self) -> PathBuf {
        self.watchdog_dir().join("watchdog.err")
    }

    /// Directories that must exist before the supervisor starts.
    pub fn required_dirs(&self) -> [PathBuf; 6] {
        [
            self.images(),
            self.sockets(),
            self.avd_dir(),
            self.tmp(),
            self.logs(),
            self.watchdog_dir(),
        ]
    }

    pub async fn create_dirs(&self) -> std::io::Result<()> {
        for dir in self.required_dirs() {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// Remove everything under the session directory except the logs kept
    /// in the test output directory.
    pub async fn remove(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
