// src/sys/catalog.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::config::{ImageLayout, NamingRules, SidecarPolicy};
use crate::sys::traits::{Image, ImageCatalog};

/// Shape of the `<name>-kernel.json` sidecar written by the image build.
#[derive(Debug, Deserialize)]
struct KernelSidecar {
    version: String,
}

/// An entry that passed layout and transfer-marker checks but has no sidecar resolved yet.
struct Candidate {
    name: String,
    content_file: PathBuf,
    owns_directory: bool,
    modified_at: DateTime<Utc>,
}

pub struct FsImageCatalog {
    naming: NamingRules,
    layout: ImageLayout,
    sidecar: SidecarPolicy,
}

impl FsImageCatalog {
    pub fn new(naming: NamingRules, layout: ImageLayout, sidecar: SidecarPolicy) -> Self {
        Self { naming, layout, sidecar }
    }

    async fn classify(&self, entry: &fs::DirEntry) -> Option<Candidate> {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            debug!(entry = ?entry.path(), "Skipping entry with a non UTF-8 name");
            return None;
        };

        // 🛡️ Partial syncs never become candidates, whatever their suffix
        if self.naming.is_in_flight(&name) {
            info!(entry = %name, "Skipping entry, transfer still in progress");
            return None;
        }

        let metadata = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                warn!(entry = %name, "Failed to stat entry: {}", e);
                return None;
            }
        };

        let modified_at: DateTime<Utc> = match metadata.modified() {
            Ok(time) => time.into(),
            Err(e) => {
                warn!(entry = %name, "Modification time unavailable: {}", e);
                return None;
            }
        };

        match self.layout {
            ImageLayout::Subfolder => {
                if !metadata.is_dir() {
                    return None;
                }
                let content = self.find_content(&entry.path(), &name).await?;
                Some(Candidate {
                    content_file: PathBuf::from(&name).join(content),
                    name,
                    owns_directory: true,
                    modified_at,
                })
            }
            ImageLayout::Flat => {
                if !metadata.is_file() {
                    return None;
                }
                let stem = name.strip_suffix(self.naming.content_suffix.as_str())?;
                if stem.is_empty() {
                    return None;
                }
                Some(Candidate {
                    name: stem.to_string(),
                    content_file: PathBuf::from(&name),
                    owns_directory: false,
                    modified_at,
                })
            }
        }
    }

    /// Looks inside a per-image subfolder for its content file.
    /// Any marker-prefixed name inside the subfolder excludes it entirely.
    async fn find_content(&self, dir: &Path, image_name: &str) -> Option<String> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(image = %image_name, "Failed to read image subfolder: {}", e);
                return None;
            }
        };

        let mut listing: Vec<io::Result<(String, bool)>> = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    if let Some(name) = entry.file_name().to_str() {
                        listing.push(Ok((name.to_string(), is_file)));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    listing.push(Err(e));
                    break;
                }
            }
        }

        self.select_content(image_name, listing)
    }

    /// Decides the content file from a subfolder listing of (name, is_file).
    /// 🛡️ An incomplete listing may hide a marker file, so a read error excludes the image.
    fn select_content<I>(&self, image_name: &str, listing: I) -> Option<String>
    where
        I: IntoIterator<Item = io::Result<(String, bool)>>,
    {
        let mut files: Vec<String> = Vec::new();
        for item in listing {
            let (name, is_file) = match item {
                Ok(item) => item,
                Err(e) => {
                    error!(image = %image_name, "Listing of image subfolder failed, excluding it: {}", e);
                    return None;
                }
            };
            if self.naming.is_in_flight(&name) {
                info!(image = %image_name, file = %name, "Skipping image, could be file in sync");
                return None;
            }
            if is_file {
                files.push(name);
            }
        }

        files.sort();
        let content = files
            .into_iter()
            .find(|name| name.ends_with(self.naming.content_suffix.as_str()));

        if content.is_none() {
            debug!(image = %image_name, "Skipping subfolder without a content file");
        }
        content
    }

    async fn resolve_sidecar(&self, folder: &Path, candidate: Candidate) -> Option<Image> {
        let sidecar_name = self.naming.sidecar_name(&candidate.name);
        let sidecar_path = folder.join(&sidecar_name);

        let exists = fs::try_exists(&sidecar_path).await.unwrap_or_else(|e| {
            warn!(image = %candidate.name, "Sidecar existence check failed: {}", e);
            false
        });

        let (sidecar_file, kernel_version) = if exists {
            let version = read_kernel_version(&sidecar_path).await;
            (Some(PathBuf::from(sidecar_name)), version)
        } else if self.sidecar == SidecarPolicy::Required {
            warn!(
                folder = %folder.display(),
                image = %candidate.name,
                sidecar = %sidecar_name,
                "Excluding image, required sidecar is missing"
            );
            return None;
        } else {
            (None, None)
        };

        Some(Image {
            name: candidate.name,
            content_file: candidate.content_file,
            owns_directory: candidate.owns_directory,
            sidecar_file,
            kernel_version,
            modified_at: candidate.modified_at,
        })
    }
}

#[async_trait]
impl ImageCatalog for FsImageCatalog {
    async fn list_images(&self, folder: &Path) -> Vec<Image> {
        let mut entries = match fs::read_dir(folder).await {
            Ok(dir) => dir,
            Err(e) => {
                error!(folder = %folder.display(), "Error reading folder: {}", e);
                return Vec::new();
            }
        };

        let mut dir_entries = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => dir_entries.push(entry),
                Ok(None) => break,
                Err(e) => {
                    // A truncated listing could misplace the oldest image
                    error!(folder = %folder.display(), "Error listing folder: {}", e);
                    return Vec::new();
                }
            }
        }
        // Name order first so equal timestamps keep a repeatable order
        dir_entries.sort_by_key(|entry| entry.file_name());

        let mut images = Vec::new();
        for entry in &dir_entries {
            let Some(candidate) = self.classify(entry).await else {
                continue;
            };
            if let Some(image) = self.resolve_sidecar(folder, candidate).await {
                images.push(image);
            }
        }

        // 1. Newest first; the oldest image is always the last element
        images.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        images
    }
}

async fn read_kernel_version(path: &Path) -> Option<String> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(sidecar = %path.display(), "Failed to read sidecar: {}", e);
            return None;
        }
    };

    match serde_json::from_slice::<KernelSidecar>(&bytes) {
        Ok(sidecar) => Some(sidecar.version),
        Err(e) => {
            warn!(sidecar = %path.display(), "Malformed sidecar: {}", e);
            None
        }
    }
}
