// src/sys/deleter.rs

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::config::{ImageLayout, NamingRules};
use crate::sys::traits::{DeleteError, Image, ImageDeleter};

/// 🛡️ Zero-Trust: names come from directory scans, but a name that could
/// climb out of the retained folder is never joined onto it.
fn validate_image_name(name: &str) -> Result<(), DeleteError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(DeleteError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct FsImageDeleter {
    naming: NamingRules,
    layout: ImageLayout,
}

impl FsImageDeleter {
    pub fn new(naming: NamingRules, layout: ImageLayout) -> Self {
        Self { naming, layout }
    }

    /// Entry name that proves `image_name` still has its image on disk.
    fn owner_name(&self, image_name: &str) -> String {
        match self.layout {
            ImageLayout::Subfolder => image_name.to_string(),
            ImageLayout::Flat => format!("{}{}", image_name, self.naming.content_suffix),
        }
    }

    /// Picks the sidecars with no owning entry among `listing` (name, is_file).
    /// A marker-prefixed entry owns a sidecar when its name, marker stripped,
    /// ends with the owner name: `.azDownload-<name>.squashfs` owns `<name>-kernel.json`.
    fn find_orphans<'a>(&self, listing: &'a [(String, bool)]) -> Vec<&'a str> {
        let marker = self.naming.transfer_marker.as_str();
        let present: HashSet<&str> = listing
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| !self.naming.is_in_flight(name))
            .collect();
        let in_flight: Vec<&str> = listing
            .iter()
            .filter_map(|(name, _)| name.strip_prefix(marker))
            .collect();

        listing
            .iter()
            .filter(|(name, is_file)| *is_file && !self.naming.is_in_flight(name))
            .filter_map(|(name, _)| {
                let image_name = name.strip_suffix(self.naming.sidecar_suffix.as_str())?;
                if image_name.is_empty() {
                    return None;
                }
                let owner = self.owner_name(image_name);
                let owned = present.contains(owner.as_str())
                    || in_flight.iter().any(|partial| partial.ends_with(owner.as_str()));
                (!owned).then_some(name.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl ImageDeleter for FsImageDeleter {
    async fn delete_image(&self, folder: &Path, image: &Image) -> Result<(), DeleteError> {
        validate_image_name(&image.name)?;
        if self.naming.is_in_flight(&image.name) {
            return Err(DeleteError::InFlight(image.name.clone()));
        }

        // 1. Content first: the subfolder owns the content file, otherwise the file alone
        let target = if image.owns_directory {
            folder.join(&image.name)
        } else {
            folder.join(&image.content_file)
        };

        info!(folder = %folder.display(), image = %image.name, "Deleting image {}", target.display());

        let removal = if image.owns_directory {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_file(&target).await
        };
        removal.map_err(|source| DeleteError::Content { path: target, source })?;

        // 2. Sidecar second. No rollback: the content removal cannot be undone.
        if let Some(sidecar) = &image.sidecar_file {
            let path = folder.join(sidecar);
            fs::remove_file(&path)
                .await
                .map_err(|source| DeleteError::Sidecar { path, source })?;
        }

        Ok(())
    }

    async fn sweep_orphans(&self, folder: &Path) -> usize {
        let mut entries = match fs::read_dir(folder).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(folder = %folder.display(), "Orphan sweep skipped, folder unreadable: {}", e);
                return 0;
            }
        };

        // A partial listing could hide an owner, so any read error skips the sweep
        let mut listing: Vec<(String, bool)> = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                        continue;
                    };
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    listing.push((name, is_file));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(folder = %folder.display(), "Orphan sweep skipped, listing failed: {}", e);
                    return 0;
                }
            }
        }

        let orphans: Vec<PathBuf> = self
            .find_orphans(&listing)
            .into_iter()
            .map(|name| folder.join(name))
            .collect();

        let mut removed = 0;
        for path in orphans {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    info!(folder = %folder.display(), "Removed orphaned sidecar {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove orphaned sidecar {}: {}", path.display(), e),
            }
        }
        removed
    }
}
