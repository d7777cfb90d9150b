// src/sys/traits.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ==============================================================================
// 1. Domain Types
// ==============================================================================

/// One retained boot image, as discovered by a catalog scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    /// Subfolder name, or content file name without its suffix.
    pub name: String,
    /// Content file, relative to the retained folder.
    pub content_file: PathBuf,
    /// Whether `name` is a per-image subfolder that owns the content file.
    pub owns_directory: bool,
    /// Metadata sidecar, relative to the retained folder.
    pub sidecar_file: Option<PathBuf>,
    /// Kernel version parsed from the sidecar, when readable.
    pub kernel_version: Option<String>,
    /// Modification time of the directory entry, used for ordering.
    pub modified_at: DateTime<Utc>,
}

// ==============================================================================
// 2. Image Catalog (Filesystem is the source of truth)
// ==============================================================================

#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Scans `folder` and returns every complete image, newest first.
    /// 🛡️ Never fails: an unreadable folder is reported and yields an empty list.
    async fn list_images(&self, folder: &Path) -> Vec<Image>;
}

// ==============================================================================
// 3. Deletion Executor (SLA: Never touch in-flight transfers)
// ==============================================================================

/// Why an eviction did not fully complete.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("refusing to delete '{0}': transfer still in progress")]
    InFlight(String),

    #[error("refusing to delete '{0}': not a plain entry name")]
    InvalidName(String),

    #[error("failed to remove image content {}: {source}", path.display())]
    Content { path: PathBuf, source: io::Error },

    /// The content is already gone; only the sidecar is left behind.
    #[error("image content removed but sidecar {} remains: {source}", path.display())]
    Sidecar { path: PathBuf, source: io::Error },
}

#[async_trait]
pub trait ImageDeleter: Send + Sync {
    /// Removes the image content, then its sidecar.
    async fn delete_image(&self, folder: &Path, image: &Image) -> Result<(), DeleteError>;

    /// Removes sidecars whose image no longer exists in any form.
    async fn sweep_orphans(&self, folder: &Path) -> usize;
}

// ==============================================================================
// 4. Folder Measurement
// ==============================================================================

#[async_trait]
pub trait FolderMeter: Send + Sync {
    /// Returns the folder size in GiB. Unreadable folders measure as 0.0.
    async fn measure_gib(&self, folder: &Path) -> f64;
}
