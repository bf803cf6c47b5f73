//! Static assets.
//!
//! Copies `CONTENT_DIR/ASSETS_DIR` into the output root verbatim at the end of
//! the build, so `content/assets/favicon.ico` ends up at
//! `public/favicon.ico`. Also contributes the `assets` command, which does the
//! same copy without building anything.

use super::config_path;
use crate::events::{ListenerError, names, priority};
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

pub const COMMAND: &str = "assets";

pub struct Assets;

inventory::submit! {
    BuiltinPlugin::new("assets", 70, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Assets)
}

impl Plugin for Assets {
    fn name(&self) -> &str {
        "assets"
    }

    fn required_config(&self) -> &[&str] {
        &[keys::CONTENT_DIR, keys::OUTPUT_DIR]
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration
            .on(names::POST_LOOP, priority::NORMAL, copy_listener)
            .on(names::CONSOLE_INIT, priority::NORMAL, add_command)
            .on(&names::console(COMMAND), priority::NORMAL, copy_listener);
        Ok(())
    }
}

fn add_command(_registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    let entry = json!({
        "name": COMMAND,
        "about": "Copy static assets into the output directory",
    });
    match params.extra.get_mut("commands") {
        Some(Value::Array(commands)) => commands.push(entry),
        _ => params.set("commands", vec![entry]),
    }
    Ok(params)
}

fn copy_listener(registry: &Registry, params: Params) -> Result<Params, ListenerError> {
    let Some(assets_dir) = registry.config_str(keys::ASSETS_DIR).filter(|d| !d.is_empty()) else {
        return Ok(params);
    };
    let source = config_path(registry, keys::CONTENT_DIR)?.join(assets_dir);
    let output = config_path(registry, keys::OUTPUT_DIR)?;
    let copied = copy_tree(&source, &output)?;
    if copied > 0 {
        log::info!("copied {copied} asset(s) from {}", source.display());
    }
    Ok(params.with("assets_copied", copied))
}

/// Copy every file under `src` into `dst`, keeping relative paths. A missing
/// `src` copies nothing. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<usize, ListenerError> {
    if !src.is_dir() {
        return Ok(0);
    }
    let mut copied = 0;
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| ListenerError::fatal(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ListenerError::fatal(e.to_string()))?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::write_files;
    use tempfile::TempDir;

    fn registry(root: &Path) -> Registry {
        let registry = Registry::new();
        registry.set_config(keys::CONTENT_DIR, root.join("content").to_string_lossy().as_ref());
        registry.set_config(keys::OUTPUT_DIR, root.join("public").to_string_lossy().as_ref());
        registry.set_config(keys::ASSETS_DIR, "assets");
        registry
    }

    #[test]
    fn copies_nested_assets_to_output_root() {
        let tmp = TempDir::new().unwrap();
        write_files(
            &tmp.path().join("content/assets"),
            &[("favicon.ico", "icon"), ("fonts/a.woff2", "font")],
        );

        let params = copy_listener(&registry(tmp.path()), Params::new()).unwrap();

        assert_eq!(params.get("assets_copied"), Some(&json!(2)));
        assert_eq!(
            fs::read_to_string(tmp.path().join("public/fonts/a.woff2")).unwrap(),
            "font"
        );
        assert!(tmp.path().join("public/favicon.ico").exists());
    }

    #[test]
    fn missing_assets_dir_copies_nothing() {
        let tmp = TempDir::new().unwrap();
        let params = copy_listener(&registry(tmp.path()), Params::new()).unwrap();
        assert_eq!(params.get("assets_copied"), Some(&json!(0)));
        assert!(!tmp.path().join("public").exists());
    }

    #[test]
    fn contributes_console_command() {
        let params = Params::new().with("commands", json!([{"name": "other"}]));
        let params = add_command(&Registry::new(), params).unwrap();
        let commands = params.get("commands").unwrap().as_array().unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1]["name"], "assets");
    }
}
