//! Directory of raw image files
//!
//! Each image is a plain file named by its id. Data moves between the file
//! and the attached device with dd.

use super::{ImageMeta, ImageService};
use crate::executor::Executor;
use crate::volume::Volume;
use crate::volume_utils;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const MIB: u64 = 1024 * 1024;

/// Raw image store backed by a local directory
#[derive(Debug, Clone)]
pub struct RawImageService {
    dir: PathBuf,
    executor: Executor,
    blocksize: String,
}

impl RawImageService {
    pub fn new(dir: PathBuf, executor: Executor, blocksize: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create image directory: {:?}", dir))?;
        Ok(Self {
            dir,
            executor,
            blocksize: blocksize.into(),
        })
    }

    fn volume_size_mb(volume: &Volume) -> Result<u64> {
        if volume.size_gb == 0 {
            anyhow::bail!("Volume {} has no size", volume.name);
        }
        Ok(volume.size_mb())
    }

    /// Path of an image file. Ids that could escape the directory are rejected.
    pub fn image_path(&self, image_id: &str) -> Result<PathBuf> {
        if image_id.is_empty()
            || image_id.contains('/')
            || image_id.contains('\\')
            || image_id == "."
            || image_id == ".."
        {
            anyhow::bail!("Invalid image id: {:?}", image_id);
        }
        Ok(self.dir.join(image_id))
    }
}

impl ImageService for RawImageService {
    fn fetch_to_raw(&mut self, image_id: &str, dest: &Path, volume: &Volume) -> Result<()> {
        let src = self.image_path(image_id)?;
        let volume_mb = Self::volume_size_mb(volume)?;
        let size = fs::metadata(&src)
            .with_context(|| format!("Image not found: {:?}", src))?
            .len();
        let size_mb = size.div_ceil(MIB);

        if size_mb > volume_mb {
            anyhow::bail!(
                "Image {} ({} MiB) does not fit volume {} ({} MiB)",
                image_id,
                size_mb,
                volume.name,
                volume_mb
            );
        }

        log::info!("Writing image {} ({} MiB) to {:?}", image_id, size_mb, dest);
        volume_utils::copy_volume(&self.executor, &src, dest, size_mb, &self.blocksize, false)
            .with_context(|| format!("Failed to write image {} to {:?}", image_id, dest))
    }

    fn upload_volume(
        &mut self,
        image_meta: &ImageMeta,
        source: &Path,
        volume: &Volume,
    ) -> Result<()> {
        if image_meta.disk_format != "raw" {
            anyhow::bail!("Unsupported disk format for raw store: {}", image_meta.disk_format);
        }
        let size_mb = Self::volume_size_mb(volume)?;

        let dest = self.image_path(&image_meta.id)?;
        if dest.exists() {
            anyhow::bail!("Image already exists: {}", image_meta.id);
        }

        log::info!("Uploading volume {} from {:?} to {:?}", volume.name, source, dest);
        volume_utils::copy_volume(&self.executor, source, &dest, size_mb, &self.blocksize, true)
            .with_context(|| {
                format!("Failed to upload volume {} to image {}", volume.name, image_meta.id)
            })
    }
}
