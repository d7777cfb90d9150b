// src/sys/fixtures.rs
//
// Test-only helpers that lay out netboot image folders on disk.

use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::Path;

pub const CONTENT_FILE: &str = "dg-thinclient.squashfs";

const BASE_UNIX_TIME: i64 = 1_700_000_000;

fn pin_mtime(path: &Path, age_secs: i64) {
    set_file_mtime(path, FileTime::from_unix_time(BASE_UNIX_TIME - age_secs, 0)).unwrap();
}

/// `<root>/<name>/dg-thinclient.squashfs`, with the subfolder `age_secs` older than the base time.
pub fn subfolder_image(root: &Path, name: &str, age_secs: i64) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(CONTENT_FILE), name.as_bytes()).unwrap();
    pin_mtime(&dir, age_secs);
}

/// A subfolder whose only content is still being synced.
pub fn in_flight_subfolder(root: &Path, name: &str, age_secs: i64) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!(".azDownload-{}", CONTENT_FILE)), b"partial").unwrap();
    pin_mtime(&dir, age_secs);
}

/// `<root>/<name>.squashfs`.
pub fn flat_image(root: &Path, name: &str, age_secs: i64) {
    let file = root.join(format!("{}.squashfs", name));
    fs::write(&file, name.as_bytes()).unwrap();
    pin_mtime(&file, age_secs);
}

/// `<root>/<name>-kernel.json`.
pub fn sidecar(root: &Path, name: &str, version: &str) {
    let body = format!(r#"{{"version": "{}"}}"#, version);
    fs::write(root.join(format!("{}-kernel.json", name)), body).unwrap();
}
