//! `{{< name >}}` expansion in raw content.
//!
//! The table of known shortcodes is a lazily built registry service under
//! [`SERVICE`]. It is seeded with `site_title`, `base_url` and `generator`,
//! then every string entry of the `shortcodes` config table (from
//! `[params.shortcodes]`) is added on top.
//!
//! An unknown shortcode is a recoverable error: the file keeps its content
//! unexpanded and the build carries on.

use crate::events::{ListenerError, names, priority};
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use serde_json::Value;
use std::collections::BTreeMap;

/// Registry service key holding the [`ShortcodeTable`].
pub const SERVICE: &str = "shortcodes";
/// Registry config key of user-defined shortcodes.
pub const CONFIG: &str = "shortcodes";

const OPEN: &str = "{{<";
const CLOSE: &str = ">}}";

pub struct Shortcodes;

inventory::submit! {
    BuiltinPlugin::new("shortcodes", 20, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Shortcodes)
}

impl Plugin for Shortcodes {
    fn name(&self) -> &str {
        "shortcodes"
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        let registry = registration.registry();
        let seed = Seed {
            site_title: registry.config_str(keys::SITE_TITLE).unwrap_or_default(),
            base_url: registry.config_str(keys::BASE_URL).unwrap_or_default(),
            custom: registry.config(CONFIG),
        };
        registry.register_factory(SERVICE, move || seed.table())?;
        registration.on(names::SHORTCODES, priority::NORMAL, expand_content);
        Ok(())
    }
}

struct Seed {
    site_title: String,
    base_url: String,
    custom: Option<Value>,
}

impl Seed {
    fn table(&self) -> ShortcodeTable {
        let mut table = ShortcodeTable::default();
        table.insert("site_title", &self.site_title);
        table.insert("base_url", &self.base_url);
        table.insert(
            "generator",
            &format!("stagehand {}", env!("CARGO_PKG_VERSION")),
        );
        if let Some(Value::Object(custom)) = &self.custom {
            for (name, value) in custom {
                match value.as_str() {
                    Some(text) => table.insert(name, text),
                    None => log::warn!("shortcode '{name}' is not a string, ignoring"),
                }
            }
        }
        table
    }
}

/// Known shortcodes and their replacement text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShortcodeTable(BTreeMap<String, String>);

impl ShortcodeTable {
    pub fn insert(&mut self, name: &str, text: &str) {
        self.0.insert(name.to_string(), text.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Replace every `{{< name >}}` in `text`.
    ///
    /// Fails on the first unknown name. An opening `{{<` without a matching
    /// `>}}` is left as literal text.
    pub fn expand(&self, text: &str) -> Result<String, String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            let name = after_open[..end].trim();
            let replacement = self
                .get(name)
                .ok_or_else(|| format!("unknown shortcode '{name}'"))?;
            out.push_str(&rest[..start]);
            out.push_str(replacement);
            rest = &after_open[end + CLOSE.len()..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn expand_content(registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    let Some(content) = params.file_content.as_deref() else {
        return Ok(params);
    };
    if !content.contains(OPEN) {
        return Ok(params);
    }
    let table = registry
        .service::<ShortcodeTable>(SERVICE)
        .ok_or_else(|| ListenerError::fatal("shortcode table is not registered"))?;
    let expanded = table.expand(content).map_err(ListenerError::recoverable)?;
    params.file_content = Some(expanded);
    Ok(params)
}
