//! Site configuration module.
//!
//! Handles loading, validating, and merging `stagehand.toml`. Configuration is
//! layered: the stock defaults are serialized to a TOML table and the user's
//! file is deep-merged on top, so a config file only needs the keys it wants
//! to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! content_dir = "content"        # Root of the content tree
//! output_dir = "public"          # Where the rendered site is written
//! assets_dir = "assets"          # Copied verbatim, relative to content_dir
//! base_url = ""                  # Absolute site URL; the sitemap needs it
//! title = "My Site"
//! extensions = ["md", "markdown", "html"]
//! fail_on_file_error = false     # Non-zero exit when any file fails
//!
//! [processing]
//! max_processes = 4              # Parallel workers (omit to render one file at a time)
//!
//! [plugins]
//! disabled = ["sitemap"]         # Built-in plugins to skip
//!
//! [params]
//! calendars = ["work", "home"]   # Free-form, copied into the registry
//! ```
//!
//! Unknown keys are rejected to catch typos early, except under `[params]`,
//! which exists for plugin-specific settings the core knows nothing about.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "stagehand.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Site configuration loaded from `stagehand.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    pub content_dir: String,
    pub output_dir: String,
    /// Directory under `content_dir` whose files are copied, not rendered.
    pub assets_dir: String,
    /// Absolute URL of the published site. Empty means "not configured".
    pub base_url: String,
    pub title: String,
    /// File extensions (without the dot) that discovery picks up.
    pub extensions: Vec<String>,
    /// Exit non-zero when any single file fails, instead of only logging it.
    pub fail_on_file_error: bool,
    pub processing: ProcessingConfig,
    pub plugins: PluginsConfig,
    /// Free-form values copied verbatim into the registry config namespace.
    pub params: toml::Table,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            content_dir: "content".to_string(),
            output_dir: "public".to_string(),
            assets_dir: "assets".to_string(),
            base_url: String::new(),
            title: "My Site".to_string(),
            extensions: vec!["md".into(), "markdown".into(), "html".into()],
            fail_on_file_error: false,
            processing: ProcessingConfig::default(),
            plugins: PluginsConfig::default(),
            params: toml::Table::new(),
        }
    }
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "content_dir must not be empty".into(),
            ));
        }
        if self.output_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "output_dir must not be empty".into(),
            ));
        }
        if Path::new(&self.content_dir) == Path::new(&self.output_dir) {
            return Err(ConfigError::Validation(
                "output_dir must differ from content_dir".into(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "extensions must not be empty".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if !self.base_url.is_empty()
            && !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of files rendered at once.
    /// When absent, files are rendered sequentially.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsConfig {
    /// Names of plugins that are discovered but never registered.
    pub disabled: Vec<String>,
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
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

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: SiteConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path`, falling back to stock defaults when it is
/// missing.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    if overlay.is_none() {
        log::info!("no config at {}, using defaults", path.display());
    }
    resolve_config(base, overlay)
}

/// Convert a TOML value into the JSON value stored in the registry.
///
/// Datetimes have no JSON counterpart and become their RFC 3339 string.
pub fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        toml::Value::String(s) => Json::String(s.clone()),
        toml::Value::Integer(i) => Json::from(*i),
        toml::Value::Float(f) => {
            serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number)
        }
        toml::Value::Boolean(b) => Json::Bool(*b),
        toml::Value::Datetime(dt) => Json::String(dt.to_string()),
        toml::Value::Array(items) => Json::Array(items.iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Json::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Returns a fully-commented stock `stagehand.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Stagehand Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error, except inside [params].

# Root of the content tree. Every file with a matching extension is rendered.
content_dir = "content"

# Where the rendered site is written.
output_dir = "public"

# Directory inside content_dir that is copied into output_dir untouched.
assets_dir = "assets"

# Absolute URL of the published site, e.g. "https://example.com".
# The sitemap plugin is skipped while this is empty.
base_url = ""

# Site title, used by the page layout.
title = "My Site"

# File extensions (without the dot) picked up by discovery.
extensions = ["md", "markdown", "html"]

# Exit with a non-zero status when any single file fails to build.
# Failed files are always reported; by default the build still succeeds.
fail_on_file_error = false

# ---------------------------------------------------------------------------
# Parallel processing
# ---------------------------------------------------------------------------
[processing]
# Maximum number of files rendered at once.
# Omit to render one file at a time. Values above the core count are
# clamped down.
# max_processes = 4

# ---------------------------------------------------------------------------
# Plugins
# ---------------------------------------------------------------------------
[plugins]
# Built-in plugins to skip: paths, shortcodes, markdown, layout, writer,
# sitemap, assets.
disabled = []

# ---------------------------------------------------------------------------
# Free-form parameters
# ---------------------------------------------------------------------------
# Every key here is copied into the registry under its own name, where
# plugins can read it. A [params.shortcodes] table adds shortcodes.
[params]
"##
}
