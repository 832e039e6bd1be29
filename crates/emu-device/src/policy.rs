//! Per-API-level behaviour of the device image.
//!
//! Device images of different API levels need slightly different commands and
//! checks. All of those thresholds are collected here instead of being spread
//! through the boot and shutdown code.

const SETTINGS_DB: &str = "/data/data/com.android.providers.settings/databases/settings.db";

/// How to tell that the launcher has started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherProbe {
    /// Search the events log for activity launch records.
    EventLog,
    /// Search the process list.
    ProcessList,
}

/// How device settings are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFlavor {
    Sqlite,
    ContentProvider,
    SettingsCommand,
}

/// How the Android userspace is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    StopStart,
    AmRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatPolicy {
    pub api_level: u32,
    pub launcher_probe: LauncherProbe,
    /// A failing DPI check blocks boot only when set.
    pub enforce_dpi: bool,
    pub dismiss_keyguard: bool,
    pub has_fsck: bool,
    /// `mount -o remount` also needs the mount point as the device argument.
    pub legacy_remount: bool,
    pub settings: SettingsFlavor,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
    /// The device compiles packages ahead of time during install.
    pub ahead_of_time_install: bool,
    /// `date MMDDhhmmYYYY.ss` rather than `date -s YYYYMMDD.hhmmss`.
    pub posix_date: bool,
    pub restart: RestartStrategy,
    /// `fingerprintd` must be stopped around a userspace restart.
    pub restart_stops_fingerprintd: bool,
    pub has_keyguard_scrim_bug: bool,
    pub dynamic_ca_certs: bool,
}

impl CompatPolicy {
    pub fn for_api(api_level: u32) -> Self {
        Self {
            api_level,
            launcher_probe: if api_level < 21 {
                LauncherProbe::EventLog
            } else {
                LauncherProbe::ProcessList
            },
            enforce_dpi: api_level > 10,
            dismiss_keyguard: api_level >= 23,
            has_fsck: api_level >= 21,
            legacy_remount: api_level <= 10,
            settings: match api_level {
                0..16 => SettingsFlavor::Sqlite,
                16 => SettingsFlavor::ContentProvider,
                _ => SettingsFlavor::SettingsCommand,
            },
            allow_downgrade: api_level > 20,
            grant_permissions: api_level >= 23,
            ahead_of_time_install: api_level > 20,
            posix_date: api_level >= 23,
            restart: if api_level >= 19 {
                RestartStrategy::AmRestart
            } else {
                RestartStrategy::StopStart
            },
            restart_stops_fingerprintd: api_level >= 23,
            has_keyguard_scrim_bug: api_level >= 21,
            dynamic_ca_certs: api_level > 13,
        }
    }

    /// Shell command that probes for the launcher.
    pub fn launcher_command(&self) -> Vec<&'static str> {
        match self.launcher_probe {
            LauncherProbe::EventLog => vec![
                "logcat",
                "-d",
                "-b",
                "events",
                "-s",
                "activity_launch_time:*",
                "am_activity_launch_time:*",
                "am_on_resume_called:*",
            ],
            LauncherProbe::ProcessList => vec!["ps"],
        }
    }

    pub fn unlock_command(&self) -> Vec<&'static str> {
        let mut cmd = vec!["input", "keyevent", "82", "&&", "input", "keyevent", "4"];
        if self.dismiss_keyguard {
            cmd.extend(["&&", "wm", "dismiss-keyguard"]);
        }
        cmd
    }

    pub fn remount_command(&self, mount_point: &str, mode: &str) -> Vec<String> {
        let mut cmd = vec![
            "mount".to_string(),
            "-o".to_string(),
            format!("remount,{mode}"),
            mount_point.to_string(),
        ];
        if self.legacy_remount {
            cmd.push(mount_point.to_string());
        }
        cmd
    }

    pub fn setting_command(&self, table: &str, name: &str, value: &str) -> Vec<String> {
        match self.settings {
            SettingsFlavor::Sqlite => vec![
                "sqlite3".to_string(),
                SETTINGS_DB.to_string(),
                format!(
                    "\"INSERT OR REPLACE INTO {table} (name, value) VALUES ('{name}', {value});\""
                ),
            ],
            SettingsFlavor::ContentProvider => vec![format!(
                "content insert --uri content://settings/{table} --bind name:s:{name} --bind value:s:{value}"
            )],
            SettingsFlavor::SettingsCommand => vec![format!("settings put {table} {name} {value}")],
        }
    }

    /// `date` invocation setting the device clock to `now`.
    pub fn date_command<Tz>(&self, now: &chrono::DateTime<Tz>) -> Vec<String>
    where
        Tz: chrono::TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        if self.posix_date {
            vec!["date".to_string(), now.format("%m%d%H%M%Y.%S").to_string()]
        } else {
            vec![
                "date".to_string(),
                "-s".to_string(),
                now.format("%Y%m%d.%H%M%S").to_string(),
            ]
        }
    }

    /// Device directory that user-added CA certificates are pushed into.
    pub fn ca_cert_dir(&self) -> Option<&'static str> {
        if !self.dynamic_ca_certs {
            None
        } else if self.api_level < 21 {
            Some("/data/misc/keychain/cacerts-added")
        } else {
            Some("/data/misc/user/0/cacerts-added")
        }
    }

    /// Flags passed to `adb install` before `-r <apk>`.
    pub fn install_flags(&self, grant: bool) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.allow_downgrade {
            flags.push("-d");
        }
        if self.grant_permissions && grant {
            flags.push("-g");
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn thresholds_follow_api_level() {
        let old = CompatPolicy::for_api(10);
        assert_eq!(old.launcher_probe, LauncherProbe::EventLog);
        assert!(!old.enforce_dpi);
        assert!(old.legacy_remount);
        assert_eq!(old.settings, SettingsFlavor::Sqlite);
        assert_eq!(old.restart, RestartStrategy::StopStart);
        assert_eq!(old.ca_cert_dir(), None);

        let jb = CompatPolicy::for_api(16);
        assert_eq!(jb.settings, SettingsFlavor::ContentProvider);
        assert_eq!(jb.ca_cert_dir(), Some("/data/misc/keychain/cacerts-added"));

        let m = CompatPolicy::for_api(23);
        assert_eq!(m.launcher_probe, LauncherProbe::ProcessList);
        assert!(m.enforce_dpi && m.dismiss_keyguard && m.has_fsck);
        assert_eq!(m.settings, SettingsFlavor::SettingsCommand);
        assert_eq!(m.restart, RestartStrategy::AmRestart);
        assert_eq!(m.install_flags(true), ["-d", "-g"]);
        assert_eq!(m.install_flags(false), ["-d"]);
        assert!(CompatPolicy::for_api(19).install_flags(true).is_empty());
    }

    #[test]
    fn unlock_dismisses_keyguard_on_newer_images() {
        assert_eq!(CompatPolicy::for_api(22).unlock_command().len(), 7);
        assert_eq!(
            CompatPolicy::for_api(23).unlock_command().last(),
            Some(&"dismiss-keyguard")
        );
    }

    #[test]
    fn remount_repeats_mount_point_on_legacy_images() {
        assert_eq!(
            CompatPolicy::for_api(10).remount_command("/system", "rw"),
            ["mount", "-o", "remount,rw", "/system", "/system"]
        );
        assert_eq!(
            CompatPolicy::for_api(21).remount_command("/data", "ro"),
            ["mount", "-o", "remount,ro", "/data"]
        );
    }

    #[test]
    fn date_format_depends_on_api() {
        let now = chrono::Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(
            CompatPolicy::for_api(23).date_command(&now),
            ["date", "030507082024.09"]
        );
        assert_eq!(
            CompatPolicy::for_api(19).date_command(&now),
            ["date", "-s", "20240305.070809"]
        );
    }

    #[test]
    fn settings_commands() {
        assert_eq!(
            CompatPolicy::for_api(24).setting_command("system", "screen_off_timeout", "1800000"),
            ["settings put system screen_off_timeout 1800000"]
        );
        let sqlite =
            CompatPolicy::for_api(15).setting_command("secure", "lockscreen.disabled", "1");
        assert_eq!(sqlite.first().map(String::as_str), Some("sqlite3"));
    }
}
