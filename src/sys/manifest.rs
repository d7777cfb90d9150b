// src/sys/manifest.rs
//
// Publishes each folder's surviving images for the boot-menu renderer.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::sys::traits::Image;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry<'a> {
    image_name: &'a str,
    kernel_version: Option<&'a str>,
}

pub fn manifest_path(dir: &Path, policy_name: &str) -> PathBuf {
    dir.join(format!("{}.json", policy_name))
}

/// Writes `<dir>/<policy_name>.json` atomically (temp file, then rename).
pub async fn write_manifest(dir: &Path, policy_name: &str, images: &[Image]) -> Result<PathBuf, String> {
    let entries: Vec<ManifestEntry<'_>> = images
        .iter()
        .map(|image| ManifestEntry {
            image_name: &image.name,
            kernel_version: image.kernel_version.as_deref(),
        })
        .collect();

    let body = serde_json::to_vec_pretty(&entries)
        .map_err(|e| format!("Failed to serialise manifest: {}", e))?;

    fs::create_dir_all(dir)
        .await
        .map_err(|e| format!("Failed to create manifest directory: {}", e))?;

    let final_path = manifest_path(dir, policy_name);
    let tmp_path = dir.join(format!(".{}.json.tmp", policy_name));

    if let Err(e) = fs::write(&tmp_path, &body).await {
        return Err(format!("Failed to write temp manifest: {}", e));
    }

    if let Err(e) = fs::rename(&tmp_path, &final_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(format!("Failed to perform atomic rename: {}", e));
    }

    Ok(final_path)
}
