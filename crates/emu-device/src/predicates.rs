//! Matchers over free-text command output.
//!
//! The device only answers with text, so every readiness and health decision
//! comes down to a substring search over a command's output. Each check lives
//! here as a small named function that can be exercised with captured output.

use std::path::Path;

/// Processes whose presence in a process list means the home screen is up.
pub const LAUNCHER_PACKAGES: [&str; 6] = [
    "com.android.launcher",
    "com.google.android.wearable",
    "com.google.glass.nowtown",
    "com.google.android.googlequicksearchbox",
    "com.google.android.tv",
    "com.android.tv",
];

/// Install failures that will not go away on retry.
pub const PERMANENT_INSTALL_ERRORS: [&str; 7] = [
    "INSTALL_FAILED_INVALID_APK",
    "INSTALL_FAILED_OLDER_SDK",
    "INSTALL_FAILED_INSUFFICIENT_STORAGE",
    "INSTALL_FAILED_NO_MATCHING_ABIS",
    "INSTALL_FAILED_VERSION_DOWNGRADE",
    "INSTALL_FAILED_PERMISSION_MODEL_DOWNGRADE",
    "INSTALL_PARSE_FAILED_MANIFEST_MALFORMED",
];

const AUTH_TOKEN_SUFFIX: &str = ".emulator_auth_token";

/// Output of `adb connect localhost:<port>`.
pub fn transport_connected(out: &str, port: u16) -> bool {
    out.contains("connected") || out.contains(&format!("localhost:{port}:{port}"))
}

/// Output of `getprop`.
pub fn boot_complete(getprop: &str) -> bool {
    getprop.contains("dev.bootcomplete") || getprop.contains("sys.boot_completed")
}

/// Output of `ps`.
pub fn system_server_running(ps: &str) -> bool {
    ps.contains("system_server")
}

/// Output of `pm path android`.
pub fn package_manager_running(pm_path: &str) -> bool {
    pm_path.contains("package:")
}

/// Output of `pm list packages <package>`.
pub fn package_listed(pm_list: &str, package: &str) -> bool {
    pm_list.contains(package)
}

/// Mount points from `points` that appear in the `mount` table.
pub fn mounted<'a>(mount_table: &str, points: &'a [String]) -> Vec<&'a str> {
    points
        .iter()
        .map(String::as_str)
        .filter(|p| mount_table.contains(p))
        .collect()
}

/// Whether `/data` or `/cache` has been remounted read-only.
pub fn data_remounted_read_only(mount_table: &str) -> bool {
    mount_table
        .lines()
        .filter(|line| line.contains("/cache") || line.contains("/data"))
        .filter_map(|line| line.split_whitespace().nth(3))
        .any(|opts| opts.split(',').any(|o| o == "ro"))
}

/// The `mount` line whose fields include exactly `point`.
pub fn mount_entry<'a>(mount_table: &'a str, point: &str) -> Option<&'a str> {
    mount_table
        .lines()
        .find(|line| line.split_whitespace().any(|f| f == point))
}

/// Output of the event log or process list searched for a launcher.
pub fn launcher_started(out: &str) -> bool {
    LAUNCHER_PACKAGES.iter().any(|p| out.contains(p))
}

/// Output of the bootstrap DPI check instrumentation.
pub fn dpi_ok(instrument_out: &str) -> bool {
    instrument_out.contains("INSTRUMENTATION_CODE: -1")
}

pub fn install_succeeded(out: &str) -> bool {
    out.contains("Success")
}

/// The first permanent install error named in `out`.
pub fn permanent_install_error(out: &str) -> Option<&'static str> {
    PERMANENT_INSTALL_ERRORS
        .iter()
        .copied()
        .find(|e| out.contains(e))
}

pub fn logcat_read_failure(out: &str) -> bool {
    out.starts_with("logcat read failure")
}

/// Output of `dumpsys input` while a keyguard scrim holds focus.
pub fn keyguard_scrim_focused(dumpsys_input: &str) -> bool {
    dumpsys_input.lines().any(|line| {
        line.find("FocusedWindow: name=")
            .is_some_and(|at| line.get(at..).is_some_and(|rest| rest.contains("KeyguardScrim")))
    })
}

/// Output of `e2fsck -p` reporting corruption.
pub fn fsck_inconsistent(out: &str) -> bool {
    out.contains("UNEXPECTED INCONSISTENCY")
}

/// The token file named in the console greeting, if it asks for one.
pub fn auth_token_path(banner: &str) -> Option<&Path> {
    let end = banner.find(&format!("{AUTH_TOKEN_SUFFIX}'"))? + AUTH_TOKEN_SUFFIX.len();
    let head = banner.get(..end)?;
    let start = head.rfind('\'')? + 1;
    let path = head.get(start..)?;
    if path.is_empty() || path.contains(char::is_whitespace) {
        return None;
    }
    Some(Path::new(path))
}

/// Init services and their states from `getprop` output.
///
/// Lines look like `[init.svc.vold]: [running]`.
pub fn init_services(getprop: &str) -> Vec<(String, String)> {
    const PREFIX: &str = "[init.svc.";
    getprop
        .lines()
        .filter_map(|line| {
            let rest = line.strip_prefix(PREFIX)?;
            let (name, state) = rest.split_once(':')?;
            let name = name.strip_suffix(']')?;
            let state = state.trim().trim_start_matches('[').trim_end_matches(']');
            Some((name.to_string(), state.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrashTag {
    Crash,
    Anr,
    ProcDied,
}

fn crash_tag(line: &str) -> Option<(CrashTag, usize)> {
    const TAGS: [(&str, CrashTag); 3] = [
        ("/am_proc_died", CrashTag::ProcDied),
        ("/am_crash", CrashTag::Crash),
        ("/am_anr", CrashTag::Anr),
    ];
    TAGS.iter().find_map(|(needle, tag)| {
        let at = line.find(needle)?;
        let before = line.get(..at)?.chars().next_back()?;
        (before.is_alphanumeric() || before == '_').then_some((*tag, at + needle.len()))
    })
}

/// Pids of processes that crashed or stopped responding without dying.
///
/// Reads event log records for `am_crash`, `am_anr` and `am_proc_died`; the
/// first numeric field in the bracketed payload is taken as the pid.
pub fn crashed_pids(event_log: &str) -> Vec<u32> {
    let mut dead = Vec::new();
    let mut crashed = Vec::new();

    for line in event_log.lines() {
        let Some((tag, after)) = crash_tag(line) else {
            continue;
        };
        let Some(rest) = line.get(after..) else {
            continue;
        };
        let payload = rest
            .find('[')
            .zip(rest.rfind(']'))
            .and_then(|(open, close)| rest.get(open + 1..close));
        let pid = payload.and_then(|p| {
            p.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
                .filter_map(|f| f.parse::<u32>().ok())
                .find(|pid| (1..32768).contains(pid))
        });
        match (pid, tag) {
            (Some(pid), CrashTag::ProcDied) => dead.push(pid),
            (Some(pid), _) => {
                if !crashed.contains(&pid) {
                    crashed.push(pid);
                }
            }
            (None, _) => tracing::warn!(record = line, "could not interpret crash record"),
        }
    }

    crashed.retain(|pid| !dead.contains(pid));
    crashed
}

/// Result of inspecting the process list once services are stopped.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LeftoverProcesses {
    /// `app_process` children of the relay, left behind by crashed installs.
    pub orphans: Vec<String>,
    /// Anything else still running.
    pub others: Vec<String>,
}

/// Classify what is still running in `ps` output.
///
/// The `ps` header does not line up with its rows, so only the first four
/// columns and the last one are used. Kernel threads (zero virtual size),
/// init, the relay itself and `ps` are ignored.
pub fn leftover_processes(ps: &str, relay_name: &str) -> LeftoverProcesses {
    let mut lines = ps.lines();
    let Some(header) = lines.next() else {
        return LeftoverProcesses::default();
    };
    let header: Vec<&str> = header.split_whitespace().collect();
    let keys: Vec<&str> = header
        .iter()
        .take(4)
        .chain(header.last())
        .copied()
        .collect();

    struct Proc<'a> {
        pid: &'a str,
        ppid: &'a str,
        name: &'a str,
    }

    let mut relay_pid = None;
    let mut procs = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let values: Vec<&str> = fields.iter().take(4).chain(fields.last()).copied().collect();
        let get = |key: &str| {
            keys.iter()
                .position(|k| *k == key)
                .and_then(|i| values.get(i).copied())
        };
        if get("VSIZE").or_else(|| get("VSZ")) == Some("0") {
            continue;
        }
        let (Some(pid), Some(name)) = (get("PID"), get("NAME")) else {
            continue;
        };
        if pid == "1" || name == "ps" {
            continue;
        }
        if name.rsplit('/').next() == Some(relay_name) {
            relay_pid = Some(pid);
            continue;
        }
        procs.push(Proc {
            pid,
            ppid: get("PPID").unwrap_or_default(),
            name,
        });
    }

    let mut out = LeftoverProcesses::default();
    for p in procs {
        if Some(p.ppid) == relay_pid && p.name == "app_process" {
            out.orphans.push(p.pid.to_string());
        } else {
            out.others.push(format!("{} {}", p.pid, p.name));
        }
    }
    out
}
