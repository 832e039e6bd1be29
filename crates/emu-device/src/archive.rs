//! Saving a stopped device's disks as a compressed tarball.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{info, warn};

use crate::error::{DeviceError, Result};
use crate::metadata::EmulatorVariant;

/// Image files making up a device's mutable state, relative to the
/// session images directory. The flag marks files that may be absent.
pub fn userdata_files(variant: EmulatorVariant) -> Vec<(String, bool)> {
    let suffix = match variant {
        EmulatorVariant::Qemu => "",
        EmulatorVariant::Qemu2 => ".qcow2",
    };
    let mut files = vec![
        (format!("userdata-qemu.img{suffix}"), false),
        (format!("cache.img{suffix}"), false),
        (format!("sdcard.img{suffix}"), false),
        ("snapshots.img".to_string(), true),
        ("ramdisk.img".to_string(), false),
    ];
    if variant == EmulatorVariant::Qemu2 {
        files.push(("version_num.cache".to_string(), true));
    }
    files
}

fn write_archive(images_dir: &Path, files: &[(String, bool)], location: &Path) -> Result<()> {
    let parent = location
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    let encoder = GzEncoder::new(BufWriter::new(tmp.as_file()), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.mode(tar::HeaderMode::Complete);
    for (name, optional) in files {
        let path = images_dir.join(name);
        if *optional && !path.exists() {
            warn!(file = %path.display(), "not present, skipping");
            continue;
        }
        let mut file = File::open(&path).map_err(|e| {
            DeviceError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
        })?;
        builder.append_file(name, &mut file)?;
    }
    let mut writer = builder.into_inner()?.finish()?;
    writer.flush()?;
    drop(writer);
    tmp.persist(location).map_err(|e| DeviceError::Io(e.error))?;
    Ok(())
}

/// Write the device's disk images to `location` as a gzip tarball.
///
/// The archive appears atomically: it is written next to `location` and
/// renamed into place once complete.
pub async fn store_userdata(
    images_dir: &Path,
    variant: EmulatorVariant,
    location: &Path,
) -> Result<()> {
    info!(location = %location.display(), "storing device state");
    let images_dir: PathBuf = images_dir.to_path_buf();
    let location_buf = location.to_path_buf();
    let files = userdata_files(variant);
    tokio::task::spawn_blocking(move || write_archive(&images_dir, &files, &location_buf))
        .await
        .map_err(|e| DeviceError::Invariant(format!("archive task: {e}")))??;
    info!(location = %location.display(), "device state stored");
    Ok(())
}
