//! Image transfer through an attachment
//!
//! Both directions share one bracket: gather host properties, open an
//! [`AttachmentSession`], copy against the device path, close the session.
//! The session is closed on every exit path, so a transfer attempt never
//! leaves an attach behind.

pub mod raw;

use crate::attach::{AttachError, AttachmentSession};
use crate::backend::VolumeDriver;
use crate::config::{Config, IscsiConfig};
use crate::connector::{ConnectorFactory, HostConnector};
use crate::volume::Volume;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use raw::RawImageService;

/// Transfer errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("attach failed: {0}")]
    Attach(#[from] AttachError),

    #[error("{direction} copy for volume {volume} failed: {source}")]
    Copy {
        volume: String,
        direction: Direction,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("transfer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Image metadata for uploads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_disk_format")]
    pub disk_format: String,
    #[serde(default = "default_container_format")]
    pub container_format: String,
}

fn default_disk_format() -> String {
    "raw".to_string()
}

fn default_container_format() -> String {
    "bare".to_string()
}

impl ImageMeta {
    pub fn raw(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            disk_format: default_disk_format(),
            container_format: default_container_format(),
        }
    }
}

/// Image store the device data is copied from or to
pub trait ImageService: Send {
    /// Write image `image_id` onto the device at `dest` as raw data
    fn fetch_to_raw(&mut self, image_id: &str, dest: &Path, volume: &Volume) -> anyhow::Result<()>;

    /// Store the contents of the device at `source` as a new image
    fn upload_volume(
        &mut self,
        image_meta: &ImageMeta,
        source: &Path,
        volume: &Volume,
    ) -> anyhow::Result<()>;
}

/// Copy direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ImageToVolume,
    VolumeToImage,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ImageToVolume => f.write_str("image-to-volume"),
            Direction::VolumeToImage => f.write_str("volume-to-image"),
        }
    }
}

/// Record of a finished transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferReport {
    pub volume_id: String,
    pub image_id: String,
    pub direction: Direction,
    pub device_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs image copies inside attachment sessions
pub struct ImageTransferOrchestrator {
    driver: Arc<dyn VolumeDriver>,
    factory: Arc<dyn ConnectorFactory>,
    iscsi: IscsiConfig,
    use_multipath: bool,
}

impl ImageTransferOrchestrator {
    pub fn new(
        driver: Arc<dyn VolumeDriver>,
        factory: Arc<dyn ConnectorFactory>,
        config: &Config,
    ) -> Self {
        Self {
            driver,
            factory,
            iscsi: config.iscsi.clone(),
            use_multipath: config.transfer.use_multipath,
        }
    }

    fn host_properties(&self) -> HostConnector {
        HostConnector::gather(&self.iscsi, self.use_multipath)
    }

    /// Fetch an image and write it onto the volume
    pub fn copy_image_to_volume(
        &self,
        volume: &Volume,
        images: &mut dyn ImageService,
        image_id: &str,
    ) -> Result<TransferReport, TransferError> {
        log::debug!("copy_image_to_volume {}", volume.name);
        self.transfer(volume, Direction::ImageToVolume, image_id, |device| {
            images.fetch_to_raw(image_id, device, volume)
        })
    }

    /// Read the volume and store it as an image
    pub fn copy_volume_to_image(
        &self,
        volume: &Volume,
        images: &mut dyn ImageService,
        image_meta: &ImageMeta,
    ) -> Result<TransferReport, TransferError> {
        log::debug!("copy_volume_to_image {}", volume.name);
        self.transfer(volume, Direction::VolumeToImage, &image_meta.id, |device| {
            images.upload_volume(image_meta, device, volume)
        })
    }

    fn transfer<F>(
        &self,
        volume: &Volume,
        direction: Direction,
        image_id: &str,
        copy: F,
    ) -> Result<TransferReport, TransferError>
    where
        F: FnOnce(&Path) -> anyhow::Result<()>,
    {
        let started_at = Utc::now();
        let mut session = AttachmentSession::new(
            &*self.driver,
            &*self.factory,
            volume.clone(),
            self.host_properties(),
            self.use_multipath,
        );

        let (_, device_path) = match session.open() {
            Ok(attached) => attached,
            Err(e) => {
                session.close_quietly();
                return Err(e.into());
            }
        };

        if let Err(e) = copy(&device_path) {
            log::error!("{} copy for volume {} failed: {:#}", direction, volume.name, e);
            session.close_quietly();
            if direction == Direction::ImageToVolume {
                if let Err(cleanup) = self.driver.clear_download(volume) {
                    log::warn!(
                        "Failed to clear interrupted download on volume {}: {}",
                        volume.name,
                        cleanup
                    );
                }
            }
            return Err(TransferError::Copy {
                volume: volume.name.clone(),
                direction,
                source: e.into(),
            });
        }

        session.close()?;

        let report = TransferReport {
            volume_id: volume.id.clone(),
            image_id: image_id.to_string(),
            direction,
            device_path,
            started_at,
            finished_at: Utc::now(),
        };
        log::info!(
            "{} transfer for volume {} finished in {}s",
            direction,
            volume.name,
            (report.finished_at - report.started_at).num_seconds()
        );
        Ok(report)
    }

    /// [`copy_image_to_volume`](Self::copy_image_to_volume) on the blocking
    /// pool. Teardown runs to completion even if the returned future is
    /// dropped.
    pub async fn copy_image_to_volume_async(
        self: Arc<Self>,
        volume: Volume,
        mut images: Box<dyn ImageService>,
        image_id: String,
    ) -> Result<TransferReport, TransferError> {
        tokio::task::spawn_blocking(move || {
            self.copy_image_to_volume(&volume, images.as_mut(), &image_id)
        })
        .await?
    }

    /// [`copy_volume_to_image`](Self::copy_volume_to_image) on the blocking
    /// pool.
    pub async fn copy_volume_to_image_async(
        self: Arc<Self>,
        volume: Volume,
        mut images: Box<dyn ImageService>,
        image_meta: ImageMeta,
    ) -> Result<TransferReport, TransferError> {
        tokio::task::spawn_blocking(move || {
            self.copy_volume_to_image(&volume, images.as_mut(), &image_meta)
        })
        .await?
    }
}
