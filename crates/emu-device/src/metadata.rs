//! Configure-time description of a device.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};
use crate::policy::CompatPolicy;
use crate::stopwatch::PerfRecord;

const SYSTEM_ABI_KEY: &str = "systemimage.abi";
const API_LEVEL_KEY: &str = "androidversion.apilevel";
const EMULATOR_TYPE_KEY: &str = "ro.mobile_ninjas.emulator_type";
const SDCARD_SIZE_KEY: &str = "sdcard_size_mb";
const HEAP_GROWTH_LIMIT_KEY: &str = "dalvik.vm.heapgrowthlimit";
const SELINUX_MODE_KEY: &str = "ro.initial_se_linux_mode";
const AVD_CONFIG_PREFIX: &str = "avd_config_ini.";
const DEFAULT_SDCARD_MB: u32 = 256;

const DENSITY_TVDPI: u32 = 213;
const DENSITY_BUCKETS: [u32; 11] = [120, 160, 240, 280, 320, 360, 400, 420, 480, 560, 640];

/// Emulator engine generation. Selects arguments and image file names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmulatorVariant {
    #[default]
    Qemu,
    Qemu2,
}

impl FromStr for EmulatorVariant {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "QEMU" => Ok(Self::Qemu),
            "QEMU2" => Ok(Self::Qemu2),
            _ => Err(DeviceError::Config(format!("unknown emulator type: {s}"))),
        }
    }
}

impl EmulatorVariant {
    pub fn kernel_file(self) -> &'static str {
        match self {
            Self::Qemu => "kernel-qemu",
            Self::Qemu2 => "kernel-ranchu",
        }
    }

    pub fn system_file(self) -> &'static str {
        match self {
            Self::Qemu => "system-qemu.img",
            Self::Qemu2 => "system.img",
        }
    }
}

/// Simulated network conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetProfile {
    Edge,
    #[default]
    Fastnet,
    Gprs,
    Gsm,
    Hscsd,
    Hsdpa,
    Umts,
}

impl NetProfile {
    /// `-netspeed` value (upload:download kbps).
    pub fn speed(self) -> &'static str {
        match self {
            Self::Edge => "118.4:236.8",
            Self::Fastnet => "full",
            Self::Gprs => "40.0:80.0",
            Self::Gsm => "14.4:14.4",
            Self::Hscsd => "14.4:43.2",
            Self::Hsdpa => "348.0:14400.0",
            Self::Umts => "128.0:1920.0",
        }
    }

    /// `-netdelay` value (min:max ms).
    pub fn delay(self) -> &'static str {
        match self {
            Self::Edge => "80:400",
            Self::Gprs => "150:550",
            Self::Gsm => "300:1000",
            Self::Umts => "35:200",
            Self::Fastnet | Self::Hscsd | Self::Hsdpa => "none",
        }
    }
}

impl FromStr for NetProfile {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "edge" => Self::Edge,
            "fastnet" => Self::Fastnet,
            "gprs" => Self::Gprs,
            "gsm" => Self::Gsm,
            "hscsd" => Self::Hscsd,
            "hsdpa" => Self::Hsdpa,
            "umts" => Self::Umts,
            _ => return Err(DeviceError::Config(format!("unknown network profile: {s}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlDriver {
    NoOpenGl,
    Host,
    Mesa,
    Swiftshader,
    Guest,
}

/// A `name=value` pair. Order is significant and names may repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Contents of a system image's `source.properties`.
#[derive(Debug, Clone, Default)]
pub struct SourceProperties(Vec<Property>);

impl SourceProperties {
    pub fn parse(text: &str) -> Self {
        Self(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .filter_map(|l| l.split_once('='))
                .map(|(k, v)| Property::new(k.trim(), v.trim()))
                .collect(),
        )
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            DeviceError::Config(format!("read {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        lookup(&self.0, key)
    }
}

fn lookup<'a>(props: &'a [Property], key: &str) -> Option<&'a str> {
    props
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(key))
        .map(|p| p.value.as_str())
}

/// Caller-chosen device settings.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub system_image_dir: PathBuf,
    /// `<width>x<height>`
    pub skin: String,
    pub memory_mb: u32,
    pub density: u32,
    pub vm_heap_mb: u32,
    pub net_profile: NetProfile,
    pub kvm_present: bool,
    /// User boot properties, emitted ahead of the defaults.
    pub default_properties: Vec<Property>,
}

/// Everything decided at configure time. Written once, then only the
/// snapshot flag and performance data change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootMetadata {
    pub system_image_dir: PathBuf,
    pub skin: String,
    pub architecture: String,
    pub api_level: u32,
    pub density: u32,
    pub memory_mb: u32,
    pub vm_heap_mb: u32,
    pub sdcard_size_mb: u32,
    pub net_profile: NetProfile,
    pub supports_gpu: bool,
    pub gl_drivers: Vec<GlDriver>,
    pub variant: EmulatorVariant,
    pub with_kvm: bool,
    pub boot_properties: Vec<Property>,
    pub avd_config_properties: Vec<Property>,
    pub emulator_args: Vec<String>,
    pub snapshot_present: bool,
    #[serde(default)]
    pub perf_data: Vec<PerfRecord>,
}

/// Nearest supported density bucket; ties and the upper half round up.
pub fn supported_density(density: u32) -> u32 {
    if density == DENSITY_TVDPI {
        return density;
    }
    for pair in DENSITY_BUCKETS.windows(2) {
        if let [low, high] = pair
            && u64::from(density) * 2 < u64::from(low + high)
        {
            return *low;
        }
    }
    DENSITY_BUCKETS.last().copied().unwrap_or(density)
}

impl BootMetadata {
    pub fn configure(spec: &DeviceSpec, source: &SourceProperties) -> Result<Self> {
        let architecture = source
            .get(SYSTEM_ABI_KEY)
            .ok_or_else(|| {
                DeviceError::Config(format!("source properties missing {SYSTEM_ABI_KEY}"))
            })?
            .to_lowercase();
        if !(architecture.starts_with("x86") || architecture.starts_with("arm")) {
            return Err(DeviceError::Config(format!("unknown architecture: {architecture}")));
        }
        let api_level: u32 = source
            .get(API_LEVEL_KEY)
            .ok_or_else(|| {
                DeviceError::Config(format!("source properties missing {API_LEVEL_KEY}"))
            })?
            .parse()
            .map_err(|e| DeviceError::Config(format!("bad {API_LEVEL_KEY}: {e}")))?;

        let user = &spec.default_properties;
        let variant = match lookup(user, EMULATOR_TYPE_KEY) {
            Some(v) => v.parse()?,
            None => EmulatorVariant::default(),
        };
        let sdcard_size_mb = match lookup(user, SDCARD_SIZE_KEY) {
            Some(v) => v
                .parse()
                .map_err(|e| DeviceError::Config(format!("bad {SDCARD_SIZE_KEY}: {e}")))?,
            None => DEFAULT_SDCARD_MB,
        };

        let is_x86 = architecture == "x86";
        let supports_gpu = is_x86 || api_level > 10;
        let with_kvm = is_x86 && spec.kvm_present;
        let density = supported_density(spec.density);

        let mut gl_drivers = vec![GlDriver::NoOpenGl];
        if supports_gpu {
            gl_drivers.extend([GlDriver::Host, GlDriver::Mesa, GlDriver::Swiftshader]);
        }
        if api_level >= 19 {
            gl_drivers.push(GlDriver::Guest);
        }

        let mut emulator_args = Vec::new();
        if is_x86 {
            if spec.kvm_present {
                emulator_args.push("-enable-kvm".to_string());
                if variant == EmulatorVariant::Qemu {
                    emulator_args.extend(["-append".to_string(), "nopat".to_string()]);
                }
            } else {
                emulator_args.push("-disable-kvm".to_string());
            }
        }
        if architecture == "armeabi-v7a" {
            emulator_args.extend(["-cpu".to_string(), "cortex-a8".to_string()]);
        }

        let mut boot_properties: Vec<Property> = user
            .iter()
            .filter(|p| !p.name.starts_with(AVD_CONFIG_PREFIX))
            .cloned()
            .collect();
        let density_str = density.to_string();
        boot_properties.extend([
            Property::new("debug.sf.nobootanimation", "1"),
            Property::new("ro.test_harness", "1"),
            Property::new("ro.monkey", "1"),
            Property::new("ro.setupwizard.mode", "DISABLED"),
            Property::new("ro.lockscreen.disable.default", "1"),
            Property::new("ro.sf.lcd_density", &density_str),
            Property::new("qemu.sf.lcd_density", &density_str),
            Property::new("qemu.sf.fake_camera", "back"),
            Property::new("service.adb.root", "1"),
        ]);
        if api_level == 19 {
            boot_properties.push(Property::new("debug.hwui.render_dirty_regions", "false"));
        }
        if !boot_properties.iter().any(|p| p.name == HEAP_GROWTH_LIMIT_KEY) {
            boot_properties.push(Property::new(
                HEAP_GROWTH_LIMIT_KEY,
                format!("{}m", spec.vm_heap_mb.min(64)),
            ));
        }
        boot_properties.push(Property::new("dalvik.vm.heapsize", format!("{}m", spec.vm_heap_mb)));
        if api_level <= 20 {
            boot_properties.push(Property::new("dalvik.vm.dexopt-flags", "v=n,o=v"));
        }
        boot_properties.push(Property::new("persist.sys.timezone", "America/Los_Angeles"));

        let avd = |name: &str, fallback: &str| {
            let key = format!("{AVD_CONFIG_PREFIX}{name}");
            let value = lookup(user, &key)
                .or_else(|| source.get(&key))
                .unwrap_or(fallback);
            Property::new(name, value)
        };
        let mut avd_config_properties = vec![avd("hw.mainKeys", "yes"), avd("hw.keyboard", "yes")];
        if api_level != 15 {
            avd_config_properties.push(avd("hw.keyboard.lid", "yes"));
        }
        avd_config_properties.extend([
            Property::new("hw.audioOutput", "yes"),
            Property::new("hw.audioInput", "yes"),
            Property::new("hw.lcd.density", &density_str),
            Property::new("hw.lcd.backlight", "no"),
            Property::new("vm.heapSize", spec.vm_heap_mb.to_string()),
        ]);

        Ok(Self {
            system_image_dir: spec.system_image_dir.clone(),
            skin: spec.skin.clone(),
            architecture,
            api_level,
            density,
            memory_mb: spec.memory_mb,
            vm_heap_mb: spec.vm_heap_mb,
            sdcard_size_mb,
            net_profile: spec.net_profile,
            supports_gpu,
            gl_drivers,
            variant,
            with_kvm,
            boot_properties,
            avd_config_properties,
            emulator_args,
            snapshot_present: false,
            perf_data: Vec::new(),
        })
    }

    pub fn boot_properties(&self) -> &[Property] {
        &self.boot_properties
    }

    pub fn policy(&self) -> CompatPolicy {
        CompatPolicy::for_api(self.api_level)
    }

    /// Poll interval and attempt budget, adjusted for KVM acceleration.
    pub fn boot_pacing(&self, interval: Duration, max_attempts: u32) -> (Duration, u32) {
        if self.with_kvm {
            (interval / 4, max_attempts.saturating_mul(4))
        } else {
            (interval, max_attempts)
        }
    }

    /// Skin width and height.
    pub fn screen_size(&self) -> Result<(&str, &str)> {
        self.skin
            .split_once('x')
            .ok_or_else(|| {
                DeviceError::Config(format!("skin must be WIDTHxHEIGHT, got {}", self.skin))
            })
    }

    /// Lines of the AVD `config.ini`.
    pub fn avd_config_ini(&self) -> Result<String> {
        let (width, height) = self.screen_size()?;
        let mut ini = String::new();
        for p in &self.avd_config_properties {
            ini.push_str(&format!("{p}\n"));
        }
        ini.push_str(&format!("hw.cpu.arch={}\n", self.cpu_arch()));
        ini.push_str(&format!("hw.lcd.width={width}\nhw.lcd.height={height}\n"));
        ini.push_str(&format!("hw.ramSize={}\n", self.memory_mb));
        ini.push_str(&format!("snapshot.present={}\n", self.snapshot_present));
        Ok(ini)
    }

    /// Boot properties as the `default.prop` style text pushed to the ramdisk.
    pub fn boot_properties_text(&self) -> String {
        self.boot_properties
            .iter()
            .map(|p| format!("{p}\n"))
            .collect()
    }

    fn cpu_arch(&self) -> &str {
        if self.architecture.starts_with("arm") {
            "arm"
        } else {
            &self.architecture
        }
    }

    /// Emulator command line after the binary.
    pub fn launch_args(
        &self,
        console_port: u16,
        adb_port: u16,
        avd_name: &str,
        kernel: &Path,
        headless: bool,
    ) -> Result<Vec<String>> {
        let mut args: Vec<String> = [
            "-ports",
            &format!("{console_port},{adb_port}"),
            "-skin",
            &self.skin,
            "-cache",
            "cache.img",
            "-data",
            "userdata-qemu.img",
            "-memory",
            &self.memory_mb.to_string(),
            "-sdcard",
            "sdcard.img",
            "-partition-size",
            "2047",
            "-no-snapshot-save",
            "-verbose",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for pipe in [
            "qemu.mgmt",
            "device-forward-server",
            "tar-pull-server",
            "exec-server",
            "tar-push-server",
        ] {
            args.push("-unix-pipe".into());
            args.push(format!("sockets/{pipe}"));
        }
        args.extend(["-writable-system".into(), "-show-kernel".into()]);

        match self.variant {
            EmulatorVariant::Qemu => {
                args.extend(
                    ["-timezone", "America/Los_Angeles", "-gps", "null", "-audio", "none"]
                        .map(String::from),
                );
            }
            EmulatorVariant::Qemu2 => {
                args.extend([
                    "-engine".into(),
                    "qemu2".into(),
                    "-kernel".into(),
                    kernel.display().to_string(),
                ]);
                args.push("-no-audio".into());
            }
        }
        if headless {
            args.push("-no-window".into());
        }
        args.push("-no-boot-anim".into());

        let selinux: Vec<&Property> = self
            .boot_properties
            .iter()
            .filter(|p| p.name == SELINUX_MODE_KEY)
            .collect();
        match selinux.as_slice() {
            [] => {}
            [mode] if mode.value == "disabled" || mode.value == "permissive" => {
                args.extend(["-selinux".into(), mode.value.clone()]);
            }
            _ => {
                return Err(DeviceError::Config(format!(
                    "{SELINUX_MODE_KEY} must be set once to disabled or permissive"
                )));
            }
        }

        args.push("-fixed-scale".into());
        args.extend([
            "-netdelay".into(),
            self.net_profile.delay().into(),
            "-netspeed".into(),
            self.net_profile.speed().into(),
            "-avd".into(),
            avd_name.into(),
        ]);
        if !self.emulator_args.is_empty() {
            args.push("-qemu".into());
            args.extend(self.emulator_args.iter().cloned());
        }
        Ok(args)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(abi: &str, api: u32) -> SourceProperties {
        SourceProperties::parse(&format!(
            "Pkg.Desc=Android SDK Platform\nSystemImage.Abi={abi}\nAndroidVersion.ApiLevel={api}\n"
        ))
    }

    fn spec(props: Vec<Property>) -> DeviceSpec {
        DeviceSpec {
            system_image_dir: PathBuf::from("/images/x86_23"),
            skin: "720x1280".into(),
            memory_mb: 2048,
            density: 320,
            vm_heap_mb: 256,
            net_profile: NetProfile::Fastnet,
            kvm_present: true,
            default_properties: props,
        }
    }

    #[test]
    fn boot_properties_keep_user_order_and_duplicates() {
        let user = vec![
            Property::new("persist.a", "1"),
            Property::new("persist.b", "2"),
            Property::new("persist.a", "3"),
            Property::new("avd_config_ini.hw.mainkeys", "no"),
        ];
        let meta = BootMetadata::configure(&spec(user.clone()), &source("x86", 23)).unwrap();
        assert_eq!(meta.boot_properties()[..3], user[..3]);
        assert!(!meta.boot_properties().iter().any(|p| p.name.starts_with("avd_config_ini.")));
        assert_eq!(meta.avd_config_properties[0], Property::new("hw.mainKeys", "no"));
        let text = meta.boot_properties_text();
        assert!(text.starts_with("persist.a=1\npersist.b=2\npersist.a=3\n"), "{text}");
    }

    #[test]
    fn default_properties_follow_api_level() {
        let meta = BootMetadata::configure(&spec(vec![]), &source("x86", 19)).unwrap();
        let names: Vec<&str> = meta.boot_properties().iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"debug.hwui.render_dirty_regions"));
        assert!(names.contains(&"dalvik.vm.dexopt-flags"));
        assert_eq!(names.last(), Some(&"persist.sys.timezone"));
        let limit = meta
            .boot_properties()
            .iter()
            .find(|p| p.name == HEAP_GROWTH_LIMIT_KEY)
            .unwrap();
        assert_eq!(limit.value, "64m");

        let meta = BootMetadata::configure(&spec(vec![]), &source("x86", 15)).unwrap();
        assert!(!meta.avd_config_properties.iter().any(|p| p.name == "hw.keyboard.lid"));
    }

    #[test]
    fn user_heap_growth_limit_wins() {
        let user = vec![Property::new(HEAP_GROWTH_LIMIT_KEY, "48m")];
        let meta = BootMetadata::configure(&spec(user), &source("x86", 23)).unwrap();
        let limits: Vec<_> = meta
            .boot_properties()
            .iter()
            .filter(|p| p.name == HEAP_GROWTH_LIMIT_KEY)
            .collect();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].value, "48m");
    }

    #[test]
    fn density_maps_to_nearest_bucket() {
        assert_eq!(supported_density(100), 120);
        assert_eq!(supported_density(139), 120);
        assert_eq!(supported_density(140), 160);
        assert_eq!(supported_density(213), 213);
        assert_eq!(supported_density(230), 240);
        assert_eq!(supported_density(440), 420);
        assert_eq!(supported_density(450), 480);
        assert_eq!(supported_density(1000), 640);
        assert_eq!(supported_density(u32::MAX), 640);
    }

    #[test]
    fn architecture_drives_gpu_and_kvm() {
        let x86 = BootMetadata::configure(&spec(vec![]), &source("X86", 10)).unwrap();
        assert_eq!(x86.architecture, "x86");
        assert!(x86.supports_gpu && x86.with_kvm);
        assert_eq!(x86.emulator_args, ["-enable-kvm", "-append", "nopat"]);
        assert_eq!(
            x86.boot_pacing(Duration::from_secs(1), 300),
            (Duration::from_millis(250), 1200)
        );

        let arm = BootMetadata::configure(&spec(vec![]), &source("armeabi-v7a", 10)).unwrap();
        assert!(!arm.supports_gpu && !arm.with_kvm);
        assert_eq!(arm.gl_drivers, [GlDriver::NoOpenGl]);
        assert_eq!(arm.emulator_args, ["-cpu", "cortex-a8"]);
        assert_eq!(arm.boot_pacing(Duration::from_secs(1), 300), (Duration::from_secs(1), 300));
    }

    #[test]
    fn configuration_errors() {
        let missing_abi = SourceProperties::parse("AndroidVersion.ApiLevel=23\n");
        assert!(matches!(
            BootMetadata::configure(&spec(vec![]), &missing_abi),
            Err(DeviceError::Config(_))
        ));
        let err = BootMetadata::configure(&spec(vec![]), &source("mips", 23)).unwrap_err();
        assert!(
            matches!(&err, DeviceError::Config(msg) if msg.contains("mips")),
            "{err}"
        );
        assert!(BootMetadata::configure(&spec(vec![]), &source("x86_64", 23)).is_ok());
        assert!(BootMetadata::configure(&spec(vec![]), &source("arm64-v8a", 23)).is_ok());
        let bad_type = vec![Property::new(EMULATOR_TYPE_KEY, "bochs")];
        assert!(BootMetadata::configure(&spec(bad_type), &source("x86", 23)).is_err());
        assert!("lte".parse::<NetProfile>().is_err());
        assert_eq!("umts".parse::<NetProfile>().unwrap().delay(), "35:200");
    }

    #[test]
    fn qemu2_launch_args() {
        let user = vec![
            Property::new(EMULATOR_TYPE_KEY, "qemu2"),
            Property::new(SELINUX_MODE_KEY, "permissive"),
        ];
        let meta = BootMetadata::configure(&spec(user), &source("x86", 23)).unwrap();
        assert_eq!(meta.variant, EmulatorVariant::Qemu2);
        let args = meta
            .launch_args(5554, 5555, "dev", Path::new("/img/kernel-ranchu"), true)
            .unwrap();
        let joined = args.join(" ");
        assert!(joined.starts_with("-ports 5554,5555 -skin 720x1280"));
        assert!(joined.contains("-engine qemu2 -kernel /img/kernel-ranchu"));
        assert!(joined.contains("-selinux permissive"));
        assert!(joined.contains("-no-window"));
        assert!(joined.ends_with("-avd dev -qemu -enable-kvm"));
    }

    #[test]
    fn invalid_selinux_mode_is_rejected() {
        let user = vec![Property::new(SELINUX_MODE_KEY, "enforcing")];
        let meta = BootMetadata::configure(&spec(user), &source("x86", 23)).unwrap();
        assert!(meta.launch_args(1, 2, "d", Path::new("k"), false).is_err());
    }

    #[tokio::test]
    async fn metadata_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("metadata.json");
        let mut meta = BootMetadata::configure(&spec(vec![]), &source("x86", 23)).unwrap();
        meta.snapshot_present = true;
        meta.save(&path).await.unwrap();
        assert_eq!(BootMetadata::load(&path).await.unwrap(), meta);
    }

    #[test]
    fn avd_config_contains_screen_size() {
        let meta = BootMetadata::configure(&spec(vec![]), &source("armeabi-v7a", 21)).unwrap();
        let ini = meta.avd_config_ini().unwrap();
        assert!(ini.contains("hw.lcd.width=720\nhw.lcd.height=1280\n"));
        assert!(ini.contains("hw.cpu.arch=arm\n"));
        assert!(ini.contains("snapshot.present=false\n"));
    }
}
