use std::path::{Path, PathBuf};
use std::time::Duration;

use emu_device::metadata::Property;
use emu_device::{
    AdbConfig, DeviceConfig, DeviceHandle, DeviceSpec, DisplaySpec, NetProfile, SessionPaths,
};
use serde::Deserialize;

use crate::error::{RunnerError, RunnerResult};

/// Runner configuration file (YAML).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    pub tools: ToolsConfig,
    pub device: DeviceSection,
    #[serde(default)]
    pub boot: BootSection,
    #[serde(default)]
    pub display: Option<DisplaySection>,
    /// PEM certificate installed into the system trust store after boot.
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    /// Instrumentation APK installed during boot when the device lacks it.
    #[serde(default)]
    pub bootstrap_apk: Option<PathBuf>,
}

/// Host programs. Bare names are looked up on `PATH`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    pub emulator: PathBuf,
    #[serde(default = "default_adb")]
    pub adb: PathBuf,
    pub relay: PathBuf,
    #[serde(default = "default_adb_server_port")]
    pub adb_server_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    pub system_image_dir: PathBuf,
    #[serde(default = "default_skin")]
    pub skin: String,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_density")]
    pub density: u32,
    #[serde(default = "default_vm_heap_mb")]
    pub vm_heap_mb: u32,
    #[serde(default)]
    pub net_profile: NetProfile,
    /// Probed from `/dev/kvm` when unset.
    #[serde(default)]
    pub kvm: Option<bool>,
    /// `name=value` boot properties, in order.
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BootSection {
    pub poll_interval_secs: u64,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    /// Use the host adb server instead of the relay pipes.
    pub passthrough: bool,
    pub new_process_group: bool,
    pub delete_temp_on_exit: bool,
}

impl Default for BootSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_attempts: 180,
            timeout_secs: 900,
            passthrough: false,
            new_process_group: true,
            delete_temp_on_exit: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplaySection {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_display")]
    pub display: String,
}

fn default_adb() -> PathBuf {
    PathBuf::from("adb")
}

fn default_adb_server_port() -> u16 {
    5037
}

fn default_skin() -> String {
    "720x1280".into()
}

fn default_memory_mb() -> u32 {
    2048
}

fn default_density() -> u32 {
    320
}

fn default_vm_heap_mb() -> u32 {
    256
}

fn default_display() -> String {
    ":0".into()
}

impl RunnerConfig {
    pub fn load(path: &Path) -> RunnerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RunnerError::Config(format!("read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> RunnerResult<Self> {
        let config: Self = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> RunnerResult<()> {
        if self.boot.poll_interval_secs == 0 {
            return Err(RunnerError::Config("boot.poll_interval_secs must be > 0".into()));
        }
        if self.boot.max_attempts == 0 {
            return Err(RunnerError::Config("boot.max_attempts must be > 0".into()));
        }
        self.properties()?;
        Ok(())
    }

    fn properties(&self) -> RunnerResult<Vec<Property>> {
        self.device
            .properties
            .iter()
            .map(|p| match p.split_once('=') {
                Some((name, value)) if !name.is_empty() => Ok(Property::new(name, value)),
                _ => Err(RunnerError::Config(format!(
                    "boot property '{p}' is not name=value"
                ))),
            })
            .collect()
    }

    pub fn device_spec(&self) -> RunnerResult<DeviceSpec> {
        Ok(DeviceSpec {
            system_image_dir: self.device.system_image_dir.clone(),
            skin: self.device.skin.clone(),
            memory_mb: self.device.memory_mb,
            density: self.device.density,
            vm_heap_mb: self.device.vm_heap_mb,
            net_profile: self.device.net_profile,
            kvm_present: self
                .device
                .kvm
                .unwrap_or_else(|| Path::new("/dev/kvm").exists()),
            default_properties: self.properties()?,
        })
    }

    /// Launch settings with every tool resolved to an absolute path.
    pub fn device_config(&self) -> RunnerResult<DeviceConfig> {
        let display = match &self.display {
            Some(d) => Some(DisplaySpec {
                program: resolve_tool(&d.program)?,
                args: d.args.clone(),
                display: d.display.clone(),
            }),
            None => None,
        };
        Ok(DeviceConfig {
            emulator: resolve_tool(&self.tools.emulator)?,
            relay: resolve_tool(&self.tools.relay)?,
            display,
            passthrough: self.boot.passthrough,
            new_process_group: self.boot.new_process_group,
            delete_temp_on_exit: self.boot.delete_temp_on_exit,
            poll_interval: Duration::from_secs(self.boot.poll_interval_secs),
            max_attempts: self.boot.max_attempts,
            boot_timeout: Duration::from_secs(self.boot.timeout_secs),
            bootstrap_apk: self.bootstrap_apk.clone(),
            ca_cert: self.ca_cert.clone(),
        })
    }

    pub fn adb_config(
        &self,
        handle: &DeviceHandle,
        session: &SessionPaths,
    ) -> RunnerResult<AdbConfig> {
        Ok(AdbConfig {
            adb: resolve_tool(&self.tools.adb)?,
            serial: handle.serial.clone(),
            adb_port: handle.adb_port,
            server_port: self.tools.adb_server_port,
            home: Some(session.home()),
            output_dir: session.output_dir().map(Path::to_path_buf),
        })
    }
}

/// A path with a directory component is taken as is; a bare name is
/// searched for on `PATH`.
pub fn resolve_tool(tool: &Path) -> RunnerResult<PathBuf> {
    if tool.components().count() > 1 {
        if tool.is_file() {
            return Ok(tool.to_path_buf());
        }
        return Err(RunnerError::Config(format!("{} not found", tool.display())));
    }
    which::which(tool)
        .map_err(|e| RunnerError::Config(format!("{} not found on PATH: {e}", tool.display())))
}
