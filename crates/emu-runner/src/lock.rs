use std::fs::File;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::error::{RunnerError, RunnerResult};

fn open_lock_file(path: &Path) -> RunnerResult<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RunnerError::Internal(format!("create lock dir {}: {e}", parent.display()))
        })?;
    }
    File::options()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| RunnerError::Internal(format!("open lock {}: {e}", path.display())))
}

/// Take the exclusive lock, waiting for the current holder to finish.
pub async fn acquire(path: PathBuf) -> RunnerResult<Flock<File>> {
    tokio::task::spawn_blocking(move || {
        let file = open_lock_file(&path)?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_file, e)| RunnerError::Internal(format!("flock {}: {e}", path.display())))
    })
    .await
    .map_err(|e| RunnerError::Internal(format!("lock task: {e}")))?
}

/// Take the exclusive lock or fail at once if another process holds it.
pub async fn try_acquire(path: PathBuf) -> RunnerResult<Flock<File>> {
    tokio::task::spawn_blocking(move || lock_now(&path))
        .await
        .map_err(|e| RunnerError::Internal(format!("lock task: {e}")))?
}

/// Synchronous [`try_acquire`] for the watchdog, which runs outside the
/// async runtime's worker threads.
pub fn lock_now(path: &Path) -> RunnerResult<Flock<File>> {
    let file = open_lock_file(path)?;
    Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, e)| {
        if e == Errno::EWOULDBLOCK {
            RunnerError::Config(format!("{} is held by another process", path.display()))
        } else {
            RunnerError::Internal(format!("flock {}: {e}", path.display()))
        }
    })
}

/// Whether some process currently holds the lock at `path`.
///
/// A missing file counts as free.
pub async fn is_held(path: PathBuf) -> RunnerResult<bool> {
    if !tokio::fs::try_exists(&path).await? {
        return Ok(false);
    }
    match try_acquire(path).await {
        Ok(_guard) => Ok(false),
        Err(RunnerError::Config(_)) => Ok(true),
        Err(e) => Err(e),
    }
}
