// src/janitor.rs

use tracing::{error, info, warn};

use crate::config::{CleanerConfig, FolderPolicy};
use crate::retention::{evaluate, needs_cleanup, Decision};
use crate::sys::catalog::FsImageCatalog;
use crate::sys::deleter::FsImageDeleter;
use crate::sys::manifest::write_manifest;
use crate::sys::traits::{FolderMeter, Image, ImageCatalog, ImageDeleter};
use crate::sys::usage::{report_disk_usage, WalkingFolderMeter};

/// What one enforcement did to one folder.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderReport {
    pub folder: String,
    pub images_before: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<String>,
    pub size_gib: f64,
    /// The last-image guard fired while the folder was still over a bound.
    pub stuck: bool,
    /// Images left after enforcement, newest first.
    pub survivors: Vec<Image>,
}

pub struct Janitor {
    config: CleanerConfig,
    catalog: Box<dyn ImageCatalog>,
    deleter: Box<dyn ImageDeleter>,
    meter: Box<dyn FolderMeter>,
}

impl Janitor {
    pub fn new(config: CleanerConfig) -> Self {
        Self {
            catalog: Box::new(FsImageCatalog::new(
                config.naming.clone(),
                config.layout,
                config.sidecar,
            )),
            deleter: Box::new(FsImageDeleter::new(config.naming.clone(), config.layout)),
            meter: Box::new(WalkingFolderMeter::new(
                config.naming.clone(),
                config.size_accounting,
            )),
            config,
        }
    }

    #[cfg(test)]
    pub fn with_parts(
        config: CleanerConfig,
        catalog: Box<dyn ImageCatalog>,
        deleter: Box<dyn ImageDeleter>,
        meter: Box<dyn FolderMeter>,
    ) -> Self {
        Self { config, catalog, deleter, meter }
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    /// Brings one folder back within its bounds by repeatedly deleting the oldest image.
    ///
    /// 🛡️ Every decision is made on a freshly rebuilt catalog and size: the victim is
    /// always the oldest image on disk right now, never an index into an earlier scan.
    pub async fn enforce(&self, policy: &FolderPolicy) -> FolderReport {
        let folder = policy.path.as_path();

        if self.config.sweep_orphans {
            let swept = self.deleter.sweep_orphans(folder).await;
            if swept > 0 {
                info!(folder = %policy.name, swept, "Removed orphaned sidecars");
            }
        }

        let mut images = self.catalog.list_images(folder).await;
        let mut size_gib = self.meter.measure_gib(folder).await;

        let mut report = FolderReport {
            folder: policy.name.clone(),
            images_before: images.len(),
            deleted: Vec::new(),
            failures: Vec::new(),
            size_gib,
            stuck: false,
            survivors: Vec::new(),
        };

        loop {
            match evaluate(policy, size_gib, images.len()) {
                Decision::Keep => break,
                Decision::Stuck => {
                    error!(
                        folder = %folder.display(),
                        size_gib,
                        count = images.len(),
                        "Cannot shrink further without deleting the last remaining image. \
                         Leftover partial transfers may be inflating the folder size"
                    );
                    report.stuck = true;
                    break;
                }
                Decision::Evict => {}
            }

            let Some(victim) = images.last().cloned() else {
                break;
            };

            let outcome = self.deleter.delete_image(folder, &victim).await;

            images = self.catalog.list_images(folder).await;
            size_gib = self.meter.measure_gib(folder).await;

            match outcome {
                Ok(()) => {
                    info!(folder = %policy.name, image = %victim.name, size_gib, "Image deleted");
                    report.deleted.push(victim.name);
                }
                Err(e) => {
                    error!(folder = %policy.name, image = %victim.name, "Error deleting image: {}", e);
                    report.failures.push(format!("{}: {}", victim.name, e));

                    // Same oldest image again means the next attempt would fail the same way
                    if images.last().is_some_and(|oldest| oldest.name == victim.name) {
                        error!(
                            folder = %policy.name,
                            image = %victim.name,
                            "Oldest image could not be removed, retrying on the next pass"
                        );
                        break;
                    }
                }
            }
        }

        report.size_gib = size_gib;
        report.survivors = images;
        report
    }

    /// One scheduled pass over every configured folder, in configuration order.
    pub async fn run_pass(&self) -> Vec<FolderReport> {
        report_disk_usage(&self.config.disk_root).await;

        let mut reports = Vec::with_capacity(self.config.policies.len());
        for policy in &self.config.policies {
            let report = self.enforce(policy).await;

            info!(
                folder = %report.folder,
                before = report.images_before,
                after = report.survivors.len(),
                deleted = report.deleted.len(),
                size_gib = report.size_gib,
                "Image count before deletion: {}, after deletion: {}",
                report.images_before,
                report.survivors.len()
            );

            if needs_cleanup(policy, report.size_gib, report.survivors.len()) {
                warn!(folder = %report.folder, "Folder is still over its bounds after this pass");
            }

            if let Some(dir) = &self.config.manifest_dir {
                if let Err(e) = write_manifest(dir, &policy.name, &report.survivors).await {
                    error!(folder = %report.folder, "Failed to publish image manifest: {}", e);
                }
            }

            reports.push(report);
        }

        report_disk_usage(&self.config.disk_root).await;
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImageLayout, LogFormat, NamingRules, SidecarPolicy, SizeAccounting};
    use crate::sys::traits::DeleteError;
    use crate::sys::fixtures;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config_for(policies: Vec<FolderPolicy>, disk_root: &Path) -> CleanerConfig {
        CleanerConfig {
            policies,
            naming: NamingRules::default(),
            layout: ImageLayout::Subfolder,
            sidecar: SidecarPolicy::Optional,
            size_accounting: SizeAccounting::All,
            sweep_orphans: true,
            interval: Duration::from_secs(300),
            manifest_dir: None,
            disk_root: disk_root.to_path_buf(),
            log_format: LogFormat::Text,
        }
    }

    fn policy(name: &str, path: &Path, max_count: usize, max_size_gib: f64) -> FolderPolicy {
        FolderPolicy {
            name: name.to_string(),
            path: path.to_path_buf(),
            max_count,
            max_size_gib,
        }
    }

    fn names(images: &[Image]) -> Vec<&str> {
        images.iter().map(|i| i.name.as_str()).collect()
    }

    /// Deleter that never succeeds and counts its attempts.
    struct RefusingDeleter {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ImageDeleter for RefusingDeleter {
        async fn delete_image(&self, folder: &Path, image: &Image) -> Result<(), DeleteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(DeleteError::Content {
                path: folder.join(&image.name),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
        }

        async fn sweep_orphans(&self, _folder: &Path) -> usize {
            0
        }
    }

    #[tokio::test]
    async fn count_overflow_removes_only_the_oldest() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "oldest", 120);
        fixtures::subfolder_image(root.path(), "middle", 60);
        fixtures::subfolder_image(root.path(), "newest", 0);
        fixtures::sidecar(root.path(), "oldest", "6.1.0");

        let p = policy("dev", root.path(), 2, 100.0);
        let janitor = Janitor::new(config_for(vec![p.clone()], root.path()));
        let report = janitor.enforce(&p).await;

        assert_eq!(report.images_before, 3);
        assert_eq!(report.deleted, vec!["oldest".to_string()]);
        assert!(report.failures.is_empty());
        assert!(!report.stuck);
        assert_eq!(names(&report.survivors), vec!["newest", "middle"]);
        assert!(!root.path().join("oldest").exists());
        assert!(!root.path().join("oldest-kernel.json").exists());
        assert!(!needs_cleanup(&p, report.size_gib, report.survivors.len()));
    }

    #[tokio::test]
    async fn single_image_over_size_is_kept() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "only", 0);

        let p = policy("prod", root.path(), 5, 0.0);
        let janitor = Janitor::new(config_for(vec![p.clone()], root.path()));
        let report = janitor.enforce(&p).await;

        assert!(report.stuck);
        assert!(report.deleted.is_empty());
        assert_eq!(names(&report.survivors), vec!["only"]);
        assert!(root.path().join("only").join(fixtures::CONTENT_FILE).exists());
    }

    #[tokio::test]
    async fn in_flight_entries_are_never_candidates() {
        let root = TempDir::new().unwrap();
        fixtures::in_flight_subfolder(root.path(), "syncing", 600);
        fixtures::subfolder_image(root.path(), "normal", 0);

        let p = policy("dev", root.path(), 0, 100.0);
        let config = config_for(vec![p.clone()], root.path());
        let catalog = FsImageCatalog::new(config.naming.clone(), config.layout, config.sidecar);
        let deleter = FsImageDeleter::new(config.naming.clone(), config.layout);

        let images = catalog.list_images(root.path()).await;
        assert_eq!(names(&images), vec!["normal"]);
        assert!(!needs_cleanup(&p, 0.0, images.len()));

        deleter.delete_image(root.path(), &images[0]).await.unwrap();
        let images = catalog.list_images(root.path()).await;
        assert!(images.is_empty());

        let report = Janitor::new(config).enforce(&p).await;
        assert!(report.deleted.is_empty());
        assert!(report.failures.is_empty());
        assert!(report.survivors.is_empty());
        assert!(root.path().join("syncing").exists());
    }

    #[tokio::test]
    async fn partial_transfers_inflate_size_but_are_not_deleted() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "older", 60);
        fixtures::subfolder_image(root.path(), "newer", 0);
        fixtures::in_flight_subfolder(root.path(), "incoming", 600);

        let p = policy("dev", root.path(), 10, 0.0);
        let report = Janitor::new(config_for(vec![p.clone()], root.path())).enforce(&p).await;

        assert_eq!(report.deleted, vec!["older".to_string()]);
        assert!(report.stuck);
        assert_eq!(names(&report.survivors), vec!["newer"]);
        assert!(root.path().join("incoming").exists());
    }

    #[tokio::test]
    async fn sidecar_failure_does_not_stop_the_loop() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "a-oldest", 120);
        fixtures::subfolder_image(root.path(), "b-middle", 60);
        fixtures::subfolder_image(root.path(), "c-newest", 0);
        let stuck_sidecar = root.path().join("a-oldest-kernel.json");
        std::fs::create_dir(&stuck_sidecar).unwrap();
        std::fs::write(stuck_sidecar.join("keep"), b"x").unwrap();

        let p = policy("dev", root.path(), 1, 100.0);
        let report = Janitor::new(config_for(vec![p.clone()], root.path())).enforce(&p).await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("a-oldest"));
        assert_eq!(report.deleted, vec!["b-middle".to_string()]);
        assert_eq!(names(&report.survivors), vec!["c-newest"]);
    }

    #[tokio::test]
    async fn failing_deletion_stops_after_one_attempt() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "one", 120);
        fixtures::subfolder_image(root.path(), "two", 60);
        fixtures::subfolder_image(root.path(), "three", 0);

        let p = policy("prod", root.path(), 1, 100.0);
        let config = config_for(vec![p.clone()], root.path());
        let attempts = Arc::new(AtomicUsize::new(0));
        let janitor = Janitor::with_parts(
            config.clone(),
            Box::new(FsImageCatalog::new(config.naming.clone(), config.layout, config.sidecar)),
            Box::new(RefusingDeleter { attempts: attempts.clone() }),
            Box::new(WalkingFolderMeter::new(config.naming.clone(), config.size_accounting)),
        );

        let report = janitor.enforce(&p).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.deleted.is_empty());
        assert_eq!(names(&report.survivors), vec!["three", "two", "one"]);
    }

    #[tokio::test]
    async fn orphan_sweep_runs_before_enforcement() {
        let root = TempDir::new().unwrap();
        fixtures::subfolder_image(root.path(), "kept", 0);
        fixtures::sidecar(root.path(), "long-gone", "5.4.0");

        let p = policy("dev", root.path(), 5, 100.0);
        let report = Janitor::new(config_for(vec![p.clone()], root.path())).enforce(&p).await;

        assert_eq!(names(&report.survivors), vec!["kept"]);
        assert!(!root.path().join("long-gone-kernel.json").exists());
    }

    #[tokio::test]
    async fn run_pass_handles_each_folder_and_publishes_manifests() {
        let dev = TempDir::new().unwrap();
        let prod = TempDir::new().unwrap();
        let menus = TempDir::new().unwrap();

        fixtures::subfolder_image(dev.path(), "dev-old", 60);
        fixtures::subfolder_image(dev.path(), "dev-new", 0);
        fixtures::sidecar(dev.path(), "dev-new", "6.8.0");
        fixtures::subfolder_image(prod.path(), "prod-only", 0);

        let mut config = config_for(
            vec![
                policy("dev", dev.path(), 1, 100.0),
                policy("prod", prod.path(), 5, 100.0),
            ],
            menus.path(),
        );
        config.manifest_dir = Some(PathBuf::from(menus.path()));

        let reports = Janitor::new(config).run_pass().await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].folder, "dev");
        assert_eq!(reports[0].deleted, vec!["dev-old".to_string()]);
        assert_eq!(reports[1].folder, "prod");
        assert!(reports[1].deleted.is_empty());

        let dev_manifest: serde_json::Value =
            serde_json::from_slice(&std::fs::read(menus.path().join("dev.json")).unwrap()).unwrap();
        assert_eq!(
            dev_manifest,
            serde_json::json!([{"imageName": "dev-new", "kernelVersion": "6.8.0"}])
        );
        assert!(menus.path().join("prod.json").exists());
    }

    #[tokio::test]
    async fn unreadable_folder_is_a_quiet_no_op() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("missing");

        let p = policy("dev", &missing, 0, 0.0);
        let report = Janitor::new(config_for(vec![p.clone()], root.path())).enforce(&p).await;

        assert_eq!(report.images_before, 0);
        assert!(report.deleted.is_empty());
        assert_eq!(report.size_gib, 0.0);
    }
}
