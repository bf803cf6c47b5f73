//! Built-in feature plugins.
//!
//! Each plugin lives in its own module and submits itself to
//! [`inventory`] with an ordinal; [`PluginManager::discover_builtins`] picks
//! them up in that order. They use only the public contracts (registry, bus,
//! parameter bag), the same as any third-party plugin would.
//!
//! | Ordinal | Plugin | Events |
//! |---------|--------|--------|
//! | 10 | [`paths`] | `PRE_RENDER` (early) |
//! | 20 | [`shortcodes`] | `SHORTCODES` |
//! | 30 | [`markdown`] | `MARKDOWN` |
//! | 40 | [`layout`] | `TEMPLATE` |
//! | 50 | [`writer`] | `POST_RENDER` (write) |
//! | 60 | [`sitemap`] | `CREATE`, `POST_RENDER`, `POST_LOOP` |
//! | 70 | [`assets`] | `POST_LOOP`, `CONSOLE_INIT`, `console:assets` |
//!
//! [`PluginManager::discover_builtins`]: crate::plugin::PluginManager::discover_builtins

pub mod assets;
pub mod layout;
pub mod markdown;
pub mod paths;
pub mod shortcodes;
pub mod sitemap;
pub mod writer;

use crate::events::ListenerError;
use crate::registry::Registry;
use std::path::PathBuf;

/// A config value every listener of a plugin needs, as a path.
///
/// Missing keys are fatal: validation already required them, so absence here
/// means something removed them mid-build.
pub(crate) fn config_path(registry: &Registry, key: &str) -> Result<PathBuf, ListenerError> {
    registry
        .config_str(key)
        .map(PathBuf::from)
        .ok_or_else(|| ListenerError::fatal(format!("config key {key} is not set")))
}
