// src/sys/usage.rs

use async_trait::async_trait;
use nix::sys::statvfs::statvfs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{NamingRules, SizeAccounting};
use crate::sys::traits::FolderMeter;

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn bytes_to_gib(bytes: f64) -> f64 {
    bytes / BYTES_PER_GIB
}

// ==============================================================================
// 1. Folder Size (walkdir)
// ==============================================================================

pub struct WalkingFolderMeter {
    naming: NamingRules,
    accounting: SizeAccounting,
}

impl WalkingFolderMeter {
    pub fn new(naming: NamingRules, accounting: SizeAccounting) -> Self {
        Self { naming, accounting }
    }
}

/// Sums regular-file bytes below `folder`. Under `SizeAccounting::Complete`
/// marker-prefixed files and directories are left out of the total.
fn folder_bytes(folder: &Path, naming: &NamingRules, accounting: SizeAccounting) -> u64 {
    if let Err(e) = std::fs::metadata(folder) {
        error!(folder = %folder.display(), "Error calculating folder size: {}", e);
        return 0;
    }

    let walker = WalkDir::new(folder).into_iter().filter_entry(|entry| {
        accounting == SizeAccounting::All
            || entry.depth() == 0
            || !entry
                .file_name()
                .to_str()
                .is_some_and(|name| naming.is_in_flight(name))
    });

    let mut total: u64 = 0;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(folder = %folder.display(), "Skipping unreadable entry while sizing: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => total += meta.len(),
            Err(e) => warn!(entry = %entry.path().display(), "Failed to stat file: {}", e),
        }
    }
    total
}

#[async_trait]
impl FolderMeter for WalkingFolderMeter {
    async fn measure_gib(&self, folder: &Path) -> f64 {
        let folder = folder.to_path_buf();
        let naming = self.naming.clone();
        let accounting = self.accounting;

        match tokio::task::spawn_blocking(move || folder_bytes(&folder, &naming, accounting)).await {
            Ok(bytes) => bytes_to_gib(bytes as f64),
            Err(e) => {
                error!("Folder size task failed: {}", e);
                0.0
            }
        }
    }
}

// ==============================================================================
// 2. Disk Statistics (statvfs)
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskUsage {
    pub free_bytes: f64,
    pub used_bytes: f64,
    pub total_bytes: f64,
}

impl DiskUsage {
    pub fn free_percent(&self) -> f64 {
        if self.total_bytes == 0.0 {
            return 0.0;
        }
        self.free_bytes / self.total_bytes * 100.0
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0.0 {
            return 0.0;
        }
        self.used_bytes / self.total_bytes * 100.0
    }
}

pub async fn disk_usage(root: &Path) -> Result<DiskUsage, String> {
    let root: PathBuf = root.to_path_buf();
    let stat = tokio::task::spawn_blocking(move || statvfs(root.as_path()))
        .await
        .map_err(|e| format!("Disk usage task failed: {}", e))?
        .map_err(|e| format!("statvfs failed: {}", e))?;

    let fragment = stat.fragment_size() as f64;
    let total_bytes = stat.blocks() as f64 * fragment;
    let free_bytes = stat.blocks_available() as f64 * fragment;
    let used_bytes = (stat.blocks() - stat.blocks_available()) as f64 * fragment;

    Ok(DiskUsage { free_bytes, used_bytes, total_bytes })
}

/// Logs disk usage for the mount holding `root`. Failures are reported, never raised.
pub async fn report_disk_usage(root: &Path) {
    match disk_usage(root).await {
        Ok(usage) => info!(
            "Disk free: {:.2}% ({:.2} GiB), Disk used: {:.2}% ({:.2} GiB), Disk Space total: {:.2} GiB",
            usage.free_percent(),
            bytes_to_gib(usage.free_bytes),
            usage.used_percent(),
            bytes_to_gib(usage.used_bytes),
            bytes_to_gib(usage.total_bytes),
        ),
        Err(e) => error!("Error calculating disk space usage: {}", e),
    }
}
