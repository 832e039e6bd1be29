use std::fs::File;

use emu_device::lifecycle::load_session;
use emu_device::{BootMetadata, DeviceController, DeviceHandle, DeviceIo, SessionPaths};
use nix::fcntl::Flock;

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::lock;
use crate::paths::{self, HomePaths};

/// A controller re-attached to an existing session.
pub struct Session {
    pub controller: DeviceController,
    _lock: Option<Flock<File>>,
}

impl Session {
    /// Attach to session `name`, waiting for any other runner command on
    /// it to finish first.
    pub async fn open(name: &str) -> RunnerResult<Self> {
        let home = HomePaths::new()?;
        let guard = lock::acquire(home.session_lock(name)?).await?;
        let controller = attach(&home, name).await?;
        Ok(Self {
            controller,
            _lock: Some(guard),
        })
    }

    /// Attach without taking the command lock. For read-only commands.
    pub async fn peek(name: &str) -> RunnerResult<Self> {
        let home = HomePaths::new()?;
        Ok(Self {
            controller: attach(&home, name).await?,
            _lock: None,
        })
    }
}

async fn attach(home: &HomePaths, name: &str) -> RunnerResult<DeviceController> {
    let session = home.session(name)?;
    if !tokio::fs::try_exists(session.device()).await? {
        return Err(RunnerError::Config(format!("no session named '{name}'")));
    }
    let config = RunnerConfig::load(&paths::session_config(&session))?;
    let (metadata, handle) = load_session(&session).await?;
    build_controller(&config, session, metadata, handle)
}

/// Wire a controller to adb, the emulator console and a watchdog re-executed
/// from this binary.
pub fn build_controller(
    config: &RunnerConfig,
    session: SessionPaths,
    metadata: BootMetadata,
    handle: DeviceHandle,
) -> RunnerResult<DeviceController> {
    let exe = std::env::current_exe()?;
    let io = DeviceIo::adb(config.adb_config(&handle, &session)?, &handle, exe);
    Ok(DeviceController::new(
        config.device_config()?,
        session,
        metadata,
        handle,
        io,
    ))
}
