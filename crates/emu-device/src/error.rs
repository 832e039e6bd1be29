use std::path::PathBuf;

use crate::boot::BootStage;
use crate::command::CommandError;
use crate::console::ConsoleError;

pub type Result<T> = std::result::Result<T, DeviceError>;

/// Every way a device operation can fail.
///
/// [`DeviceError::Transient`] is the only class where an identical retry is
/// expected to succeed. It is always raised after the device has been
/// force-killed and its temporary state removed.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("transient device failure: {0}")]
    Transient(String),

    #[error("device process died: {0}")]
    DeviceDied(String),

    #[error("could not reach ready state after {attempts} attempts (waiting for {stage})")]
    BootTimeout { attempts: u32, stage: BootStage },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("install of {path} failed: {detail}")]
    Install { path: PathBuf, detail: String },

    #[error("permanent install failure for {path}: {output}")]
    PermanentInstall { path: PathBuf, output: String },

    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error("configuration: {0}")]
    Config(String),

    /// Programmer error: an operation was called out of order.
    #[error("invalid state: {0}")]
    Invariant(String),

    #[error("spawn {program}: {detail}")]
    Spawn { program: String, detail: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeviceError {
    /// Whether the caller may retry the whole operation from scratch.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
