//! Application configuration.
//!
//! Configuration is process-wide and read-only from a request's point of
//! view. It is loaded from a single `thumbnailer.toml` layered over stock
//! defaults, and can be reloaded while the server runs: requests take a
//! point-in-time [`ConfigStore::snapshot`] and never cache values across
//! requests, so a reload takes effect on the next request.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [server]
//! bind = "127.0.0.1:8182"
//!
//! [source]
//! root = "images"           # Directory identifiers are resolved against
//!
//! [cache]
//! # dir = "variants"        # Variant cache directory (omit to disable)
//!
//! [processor]
//! quality = 90              # JPEG quality (1-100)
//!
//! [log]
//! level = "info"            # Overridden by RUST_LOG
//! format = "pretty"         # "pretty" or "json"
//!
//! [delegate]
//! deny = []                 # Identifiers refused before source access
//! # max_pixels = 50000000   # Refuse sources larger than this
//!
//! [delegate.redirect]
//! # "old.jpg" = "/thumbs?identifier=new.jpg"
//!
//! [endpoint.thumbnailer]
//! # format = "jpg"          # Output format of thumbnails
//! ```
//!
//! ## Plugin keys
//!
//! Everything under `[endpoint]` belongs to resource plugins and is only
//! reachable through [`Configuration::get_string`]. Plugins declare the keys
//! they read; the host warns about keys nobody declared. All other unknown
//! keys are rejected to catch typos early.

use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Typed view of the host settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub source: SourceConfig,
    pub cache: CacheConfig,
    pub processor: ProcessorConfig,
    pub log: LogConfig,
    pub delegate: DelegateConfig,
    /// Plugin-scoped keys, read through [`Configuration::get_string`].
    pub endpoint: toml::Table,
}

impl AppConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.processor.quality) {
            return Err(ConfigError::Validation(
                "processor.quality must be 1-100".into(),
            ));
        }
        if self.source.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "source.root must not be empty".into(),
            ));
        }
        if self
            .cache
            .dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(ConfigError::Validation(
                "cache.dir must not be empty when set".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8182)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Directory that identifiers are resolved against.
    pub root: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Variant cache directory. `None` disables the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessorConfig {
    /// JPEG encoding quality (1 = worst, 100 = best).
    pub quality: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Settings for the stock authorization policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DelegateConfig {
    /// Identifiers refused before source access.
    pub deny: Vec<String>,
    /// Identifier → redirect location.
    pub redirect: BTreeMap<String, String>,
    /// Largest source (width × height) allowed through the second checkpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pixels: Option<u64>,
}

/// Fully resolved configuration: typed host settings plus the raw table.
#[derive(Debug, Clone)]
pub struct Configuration {
    app: AppConfig,
    raw: toml::Table,
}

impl Configuration {
    /// Deserialize and validate a merged configuration value.
    pub fn from_value(value: toml::Value) -> Result<Self, ConfigError> {
        let toml::Value::Table(raw) = value else {
            return Err(ConfigError::Validation(
                "configuration root must be a table".into(),
            ));
        };
        let app: AppConfig = toml::Value::Table(raw.clone()).try_into()?;
        app.validate()?;
        Ok(Self { app, raw })
    }

    /// Parse a TOML document and layer it over the stock defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let overlay: toml::Value = toml::from_str(content)?;
        Self::from_value(merge_toml(stock_defaults_value()?, overlay))
    }

    /// Stock defaults only.
    pub fn stock() -> Result<Self, ConfigError> {
        Self::from_value(stock_defaults_value()?)
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    /// Look up a string by dotted key, e.g. `endpoint.thumbnailer.format`.
    ///
    /// Returns `None` if any segment is missing or the value is not a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        let mut segments = key.split('.');
        let first = segments.next()?;
        let mut value = self.raw.get(first)?;
        for segment in segments {
            value = value.as_table()?.get(segment)?;
        }
        value.as_str().map(str::to_string)
    }

    /// Like [`get_string`](Self::get_string) with a fallback.
    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    /// Every leaf key under `[endpoint]`, in dotted form.
    pub fn plugin_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_leaf_keys("endpoint", &self.app.endpoint, &mut keys);
        keys
    }

    /// Plugin keys present in the file that no plugin declared.
    pub fn undeclared_plugin_keys(&self, declared: &BTreeSet<&str>) -> Vec<String> {
        self.plugin_keys()
            .into_iter()
            .filter(|key| !declared.contains(key.as_str()))
            .collect()
    }
}

fn collect_leaf_keys(prefix: &str, table: &toml::Table, out: &mut Vec<String>) {
    for (key, value) in table {
        let dotted = format!("{prefix}.{key}");
        match value {
            toml::Value::Table(inner) => collect_leaf_keys(&dotted, inner, out),
            _ => out.push(dotted),
        }
    }
}

// =============================================================================
// Config loading, merging, and live reload
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer that user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(AppConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load configuration from `path` layered over stock defaults.
///
/// With no path, the stock defaults are used as-is. A path that does not
/// exist is an error: the operator asked for that file.
pub fn load_config(path: Option<&Path>) -> Result<Configuration, ConfigError> {
    match path {
        Some(path) => Configuration::from_toml_str(&fs::read_to_string(path)?),
        None => Configuration::stock(),
    }
}

/// Holder of the current configuration, swappable at runtime.
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Configuration>>,
}

impl ConfigStore {
    pub fn new(config: Configuration, path: Option<PathBuf>) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Load from `path` (or stock defaults) and remember the path for reloads.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = load_config(path.as_deref())?;
        Ok(Self::new(config, path))
    }

    /// The configuration as of now.
    pub fn snapshot(&self) -> Arc<Configuration> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, config: Configuration) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }

    /// Re-read the backing file. On error the current configuration stays.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = load_config(self.path.as_deref())?;
        self.replace(config);
        Ok(())
    }
}

/// Generate a documented config file with all stock defaults.
pub fn stock_config_toml() -> &'static str {
    r##"# Thumbnailer Configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error, except under [endpoint], which belongs
# to resource plugins.

# ---------------------------------------------------------------------------
# HTTP server
# ---------------------------------------------------------------------------
[server]
# Address to listen on.
bind = "127.0.0.1:8182"

# ---------------------------------------------------------------------------
# Source images
# ---------------------------------------------------------------------------
[source]
# Directory that identifiers are resolved against. An identifier is a path
# relative to this directory; ".." and absolute paths are refused.
root = "images"

# ---------------------------------------------------------------------------
# Variant cache
# ---------------------------------------------------------------------------
[cache]
# Directory for encoded thumbnails. Omit to disable caching.
# dir = "variants"

# ---------------------------------------------------------------------------
# Image processing
# ---------------------------------------------------------------------------
[processor]
# JPEG encoding quality (1 = worst, 100 = best).
quality = 90

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[log]
# Default filter directive. RUST_LOG takes precedence when set.
level = "info"
# "pretty" for humans, "json" for log shippers.
format = "pretty"

# ---------------------------------------------------------------------------
# Authorization policy
# ---------------------------------------------------------------------------
[delegate]
# Identifiers refused (403) before the source is touched.
deny = []
# Sources with more pixels than this are refused (403) after identification.
# max_pixels = 50000000

[delegate.redirect]
# Identifiers answered with a 302 to another location.
# "old.jpg" = "/thumbs?identifier=new.jpg"

# ---------------------------------------------------------------------------
# Thumbnail endpoint
# ---------------------------------------------------------------------------
[endpoint.thumbnailer]
# Output format of thumbnails: jpg, png, tif or webp.
# format = "jpg"
"##
}
