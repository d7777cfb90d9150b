// src/config.rs

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Raised when a configured value cannot be used. The daemon refuses to start.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How images are laid out inside a retained folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    /// One subdirectory per image, holding the content file.
    Subfolder,
    /// Content files sit directly in the folder root.
    Flat,
}

/// Whether an image without its metadata sidecar still counts as an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarPolicy {
    Optional,
    Required,
}

/// Which bytes count toward the measured folder size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeAccounting {
    /// Every byte on disk, partial transfers included.
    All,
    /// Only bytes of entries that are not mid-transfer.
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

/// Retention bounds for a single folder. Either bound alone triggers cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderPolicy {
    pub name: String,
    pub path: PathBuf,
    pub max_count: usize,
    pub max_size_gib: f64,
}

/// Naming conventions shared by the catalog, the deleter and the size meter.
#[derive(Debug, Clone, PartialEq)]
pub struct NamingRules {
    pub transfer_marker: String,
    pub content_suffix: String,
    pub sidecar_suffix: String,
}

impl NamingRules {
    pub fn is_in_flight(&self, name: &str) -> bool {
        name.starts_with(&self.transfer_marker)
    }

    pub fn sidecar_name(&self, image_name: &str) -> String {
        format!("{}{}", image_name, self.sidecar_suffix)
    }
}

impl Default for NamingRules {
    fn default() -> Self {
        Self {
            transfer_marker: ".azDownload".to_string(),
            content_suffix: ".squashfs".to_string(),
            sidecar_suffix: "-kernel.json".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CleanerConfig {
    // 📂 Retained folders, enforced in this order
    pub policies: Vec<FolderPolicy>,

    // 🧹 Catalog & eviction rules
    pub naming: NamingRules,
    pub layout: ImageLayout,
    pub sidecar: SidecarPolicy,
    pub size_accounting: SizeAccounting,
    pub sweep_orphans: bool,

    // ⏱️ Scheduling & outputs
    pub interval: Duration,
    pub manifest_dir: Option<PathBuf>,
    pub disk_root: PathBuf,
    pub log_format: LogFormat,
}

impl CleanerConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    /// Unset or empty keys fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let dev = FolderPolicy {
            name: "dev".to_string(),
            path: get("CLEANER_DEV_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/cleaning/dev")),
            max_count: parse_or(&get, "THRESHOLD_MAX_IMAGES_COUNT_DEV", 10)?,
            max_size_gib: parse_gib(&get, "MAX_FOLDER_SIZE_IN_GIB_DEV", 15.0)?,
        };

        let prod = FolderPolicy {
            name: "prod".to_string(),
            path: get("CLEANER_PROD_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/cleaning/prod")),
            max_count: parse_or(&get, "THRESHOLD_MAX_IMAGES_COUNT_PROD", 5)?,
            max_size_gib: parse_gib(&get, "MAX_FOLDER_SIZE_IN_GIB_PROD", 10.0)?,
        };

        let defaults = NamingRules::default();
        let naming = NamingRules {
            transfer_marker: get("CLEANER_TRANSFER_MARKER").unwrap_or(defaults.transfer_marker),
            content_suffix: get("CLEANER_CONTENT_SUFFIX").unwrap_or(defaults.content_suffix),
            sidecar_suffix: get("CLEANER_SIDECAR_SUFFIX").unwrap_or(defaults.sidecar_suffix),
        };

        let layout = match get("CLEANER_LAYOUT").as_deref() {
            None | Some("subfolder") => ImageLayout::Subfolder,
            Some("flat") => ImageLayout::Flat,
            Some(other) => return Err(invalid("CLEANER_LAYOUT", other, "expected 'subfolder' or 'flat'")),
        };

        let sidecar = match get("CLEANER_SIDECAR").as_deref() {
            None | Some("optional") => SidecarPolicy::Optional,
            Some("required") => SidecarPolicy::Required,
            Some(other) => return Err(invalid("CLEANER_SIDECAR", other, "expected 'optional' or 'required'")),
        };

        let size_accounting = match get("CLEANER_SIZE_ACCOUNTING").as_deref() {
            None | Some("all") => SizeAccounting::All,
            Some("complete") => SizeAccounting::Complete,
            Some(other) => {
                return Err(invalid("CLEANER_SIZE_ACCOUNTING", other, "expected 'all' or 'complete'"));
            }
        };

        let log_format = match get("CLEANER_LOG_FORMAT").as_deref() {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => return Err(invalid("CLEANER_LOG_FORMAT", other, "expected 'json' or 'text'")),
        };

        let interval_secs: u64 = parse_or(&get, "CLEANER_INTERVAL_SECS", 300)?;
        if interval_secs == 0 {
            return Err(invalid("CLEANER_INTERVAL_SECS", "0", "interval must be positive"));
        }

        Ok(Self {
            policies: vec![dev, prod],
            naming,
            layout,
            sidecar,
            size_accounting,
            sweep_orphans: parse_or(&get, "CLEANER_SWEEP_ORPHANS", true)?,
            interval: Duration::from_secs(interval_secs),
            manifest_dir: get("CLEANER_MANIFEST_DIR").map(PathBuf::from),
            disk_root: get("CLEANER_DISK_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/")),
            log_format,
        })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn parse_gib<G>(get: &G, key: &'static str, default: f64) -> Result<f64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let value = parse_or(get, key, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(key, &value.to_string(), "size must be a finite, non-negative number"));
    }
    Ok(value)
}
