//! Orderly device shutdown: drain, stop services, unmount.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::command::{CommandChannel, shell_or_empty};
use crate::idle::IdleStatus;
use crate::policy::CompatPolicy;
use crate::predicates;

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(6);
const IDLE_POLLS: u32 = 20;
const IDLE_WINDOW: Duration = Duration::from_secs(15);
const IDLE_THRESHOLD: f64 = 0.1;
const UMOUNT_TRIES: u32 = 5;

/// Partitions that must be cleanly unmounted for saved state to be usable.
pub const PERSISTENT_MOUNTS: [&str; 2] = ["/data", "/cache"];

/// Wait for the device to go quiet. Gives up silently after two minutes.
pub async fn wait_until_idle(channel: &dyn CommandChannel) {
    let mut idle = IdleStatus::new(channel).await;
    for _ in 0..IDLE_POLLS {
        tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        let load = idle.recent_max_load(IDLE_WINDOW).await;
        if load < IDLE_THRESHOLD {
            info!(load, "device idle");
            return;
        }
    }
    warn!("device never went idle, stopping anyway");
}

/// Stop the Android framework and every init service not needed to talk
/// to the device.
pub async fn stop_services(channel: &dyn CommandChannel) {
    shell_or_empty(channel, &["stop"]).await;
    let props = shell_or_empty(channel, &["getprop"]).await;
    for (service, state) in predicates::init_services(&props) {
        if state == "stopped" || crate::SHUTDOWN_PROTECTED_SERVICES.contains(&service.as_str()) {
            continue;
        }
        shell_or_empty(channel, &["stop", &service]).await;
    }
}

/// Kill install leftovers and report anything else still running.
pub async fn check_leftover_processes(channel: &dyn CommandChannel) {
    let ps = shell_or_empty(channel, &["ps"]).await;
    let leftovers = predicates::leftover_processes(&ps, crate::RELAY_PROCESS);
    for pid in &leftovers.orphans {
        shell_or_empty(channel, &["kill", "-9", pid]).await;
    }
    if !leftovers.others.is_empty() {
        warn!(processes = ?leftovers.others, "processes still running after stop");
    }
}

/// Sync, remount read-only and unmount `point`, then fsck it when possible.
///
/// Returns true only when the unmount succeeded and the filesystem checked
/// clean (or could not be checked on this API level).
pub async fn clean_umount(
    channel: &dyn CommandChannel,
    policy: &CompatPolicy,
    point: &str,
    retry_interval: Duration,
) -> bool {
    shell_or_empty(channel, &["sync", "&&", "sync"]).await;
    let remount = policy.remount_command(point, "ro");
    let remount: Vec<&str> = remount.iter().map(String::as_str).collect();
    shell_or_empty(channel, &remount).await;

    let table = shell_or_empty(channel, &["mount"]).await;
    let entry = predicates::mount_entry(&table, point).map(str::to_string);

    let mut umounted = false;
    for _ in 0..UMOUNT_TRIES {
        shell_or_empty(channel, &["umount", point]).await;
        let table = shell_or_empty(channel, &["mount"]).await;
        umounted = predicates::mount_entry(&table, point).is_none();
        if umounted {
            break;
        }
        tokio::time::sleep(retry_interval).await;
    }
    if !umounted {
        let err = shell_or_empty(channel, &["umount", point]).await;
        warn!(point, error = %err, "could not unmount");
    }

    if !policy.has_fsck {
        return umounted;
    }
    let Some(entry) = entry else {
        warn!(point, "no mount entry, cannot fsck");
        return false;
    };
    if !entry.split_whitespace().any(|f| f == "ext4") {
        return umounted;
    }
    let Some(dev) = entry.split_whitespace().next() else {
        return false;
    };
    let out = shell_or_empty(channel, &["e2fsck", "-v", "-f", "-p", dev]).await;
    if predicates::fsck_inconsistent(&out) {
        error!(point, output = %out, "filesystem corruption");
        return false;
    }
    umounted
}

/// Bring a running device to a state where its disks can be saved.
///
/// Returns false when a persistent partition did not unmount cleanly.
pub async fn drain(
    channel: &dyn CommandChannel,
    policy: &CompatPolicy,
    retry_interval: Duration,
) -> bool {
    wait_until_idle(channel).await;
    stop_services(channel).await;
    check_leftover_processes(channel).await;
    let mut clean = true;
    for point in PERSISTENT_MOUNTS {
        clean &= clean_umount(channel, policy, point, retry_interval).await;
    }
    clean
}
