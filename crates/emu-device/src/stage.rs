//! Preparing a session's image directory before launch.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{DeviceError, Result};
use crate::metadata::BootMetadata;
use crate::paths::SessionPaths;

/// Puts the disk images and AVD definition a device boots from in place.
#[async_trait]
pub trait ImageStager: Send + Sync {
    async fn stage(
        &self,
        metadata: &BootMetadata,
        paths: &SessionPaths,
        avd_name: &str,
    ) -> Result<()>;
}

/// Stages by copying the system image directory as is.
///
/// Files already present in the session are kept, so a device restarted
/// from a saved session resumes with its own userdata.
#[derive(Debug, Default)]
pub struct DirectoryStager;

#[async_trait]
impl ImageStager for DirectoryStager {
    async fn stage(
        &self,
        metadata: &BootMetadata,
        paths: &SessionPaths,
        avd_name: &str,
    ) -> Result<()> {
        let source = &metadata.system_image_dir;
        let images = paths.images();
        let mut entries = tokio::fs::read_dir(source).await.map_err(|e| {
            DeviceError::Config(format!("system image dir {}: {e}", source.display()))
        })?;
        let mut copied = 0u32;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let target = images.join(entry.file_name());
            if tokio::fs::try_exists(&target).await? {
                debug!(file = %target.display(), "already staged");
                continue;
            }
            tokio::fs::copy(entry.path(), &target).await?;
            copied += 1;
        }
        write_avd(metadata, &paths.avd_dir(), &images, avd_name).await?;
        info!(copied, images = %images.display(), "images staged");
        Ok(())
    }
}

/// Write `<name>.ini` and `<name>.avd/config.ini` under `avd_dir`.
pub async fn write_avd(
    metadata: &BootMetadata,
    avd_dir: &Path,
    images: &Path,
    name: &str,
) -> Result<()> {
    let content_dir = avd_dir.join(format!("{name}.avd"));
    tokio::fs::create_dir_all(&content_dir).await?;
    tokio::fs::write(
        avd_dir.join(format!("{name}.ini")),
        format!("path={}\ntarget=android-{}\n", content_dir.display(), metadata.api_level),
    )
    .await?;

    let mut config = metadata.avd_config_ini()?;
    config.push_str(&format!("image.sysdir.1={}/\n", images.display()));
    tokio::fs::write(content_dir.join("config.ini"), config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::metadata::{DeviceSpec, NetProfile, SourceProperties};

    fn metadata(system_image_dir: PathBuf) -> BootMetadata {
        let spec = DeviceSpec {
            system_image_dir,
            skin: "480x800".into(),
            memory_mb: 1024,
            density: 240,
            vm_heap_mb: 64,
            net_profile: NetProfile::Fastnet,
            kvm_present: false,
            default_properties: Vec::new(),
        };
        let source = SourceProperties::parse("SystemImage.Abi=x86\nAndroidVersion.ApiLevel=22\n");
        BootMetadata::configure(&spec, &source).unwrap()
    }

    #[tokio::test]
    async fn copies_images_and_writes_avd() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let system = dir.path().join("system");
        std::fs::create_dir(&system).unwrap();
        std::fs::write(system.join("system.img"), "sys").unwrap();
        std::fs::write(system.join("userdata.img"), "fresh").unwrap();
        std::fs::create_dir(system.join("nested")).unwrap();

        let paths = SessionPaths::new(dir.path().join("session"), None);
        paths.create_dirs().await.unwrap();
        std::fs::write(paths.images().join("userdata.img"), "kept").unwrap();

        DirectoryStager
            .stage(&metadata(system), &paths, "dev")
            .await
            .unwrap();

        let images = paths.images();
        assert_eq!(std::fs::read_to_string(images.join("system.img")).unwrap(), "sys");
        assert_eq!(std::fs::read_to_string(images.join("userdata.img")).unwrap(), "kept");
        assert!(!images.join("nested").exists());

        let ini = std::fs::read_to_string(paths.avd_dir().join("dev.ini")).unwrap();
        assert!(ini.contains("target=android-22"));
        let config =
            std::fs::read_to_string(paths.avd_dir().join("dev.avd").join("config.ini")).unwrap();
        assert!(config.contains("hw.lcd.density=240\n"));
        assert!(config.contains("image.sysdir.1="));
    }

    #[tokio::test]
    async fn missing_system_image_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let paths = SessionPaths::new(dir.path().join("session"), None);
        paths.create_dirs().await.unwrap();
        let err = DirectoryStager
            .stage(&metadata(dir.path().join("nope")), &paths, "dev")
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)), "{err}");
    }
}
