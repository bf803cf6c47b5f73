//! Shared test utilities for the stagehand test suite.
//!
//! Provides a call-order recorder for listeners, a configurable fake plugin,
//! and helpers that lay out a content tree in a temp directory.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let trace = Trace::new();
//! bus.subscribe("E", "a", 10, tag(&trace, "a"));
//! bus.dispatch(&registry, "E", Params::new()).unwrap();
//! assert_eq!(trace.take(), ["a"]);
//! ```

use crate::events::ListenerError;
use crate::params::Params;
use crate::plugin::{Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// =========================================================================
// Call recording
// =========================================================================

/// Ordered log of labels, shared between listeners and the test body.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, label: &str) {
        self.0.lock().unwrap().push(label.to_string());
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// A listener that records `label` and passes the bag through untouched.
pub fn tag(
    trace: &Trace,
    label: &str,
) -> impl Fn(&Registry, Params) -> Result<Params, ListenerError> + Send + Sync + 'static {
    let trace = trace.clone();
    let label = label.to_string();
    move |_, params| {
        trace.push(&label);
        Ok(params)
    }
}

// =========================================================================
// Fake plugin
// =========================================================================

enum Hook {
    Succeeds,
    FailsWith(String),
    Panics,
}

/// A plugin assembled from builder calls, for lifecycle tests.
pub struct TestPlugin {
    name: String,
    config: Vec<&'static str>,
    env: Vec<&'static str>,
    listens: Vec<(String, i32, Option<Trace>)>,
    hook: Hook,
}

impl TestPlugin {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            config: Vec::new(),
            env: Vec::new(),
            listens: Vec::new(),
            hook: Hook::Succeeds,
        }
    }

    pub fn requires_config(mut self, keys: &[&'static str]) -> Self {
        self.config.extend_from_slice(keys);
        self
    }

    pub fn requires_env(mut self, keys: &[&'static str]) -> Self {
        self.env.extend_from_slice(keys);
        self
    }

    /// Subscribe a pass-through listener.
    pub fn listens(mut self, event: &str, priority: i32) -> Self {
        self.listens.push((event.to_string(), priority, None));
        self
    }

    /// Subscribe a listener that records the plugin name in `trace`.
    pub fn traced(mut self, event: &str, priority: i32, trace: &Trace) -> Self {
        self.listens
            .push((event.to_string(), priority, Some(trace.clone())));
        self
    }

    /// Subscribe as configured, then fail the hook.
    pub fn fails_with(mut self, message: &str) -> Self {
        self.hook = Hook::FailsWith(message.to_string());
        self
    }

    pub fn panics(mut self) -> Self {
        self.hook = Hook::Panics;
        self
    }
}

impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_config(&self) -> &[&str] {
        &self.config
    }

    fn required_env(&self) -> &[&str] {
        &self.env
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        for (event, priority, trace) in &self.listens {
            match trace {
                Some(trace) => registration.on(event, *priority, tag(trace, &self.name)),
                None => registration.on(event, *priority, |_, params| Ok(params)),
            };
        }
        match &self.hook {
            Hook::Succeeds => Ok(()),
            Hook::FailsWith(message) => Err(PluginError::registration(message.clone())),
            Hook::Panics => panic!("hook for '{}' exploded", self.name),
        }
    }
}

/// A plugin whose registration hook is a closure.
pub struct FnPlugin<F> {
    name: String,
    hook: F,
}

/// Build a plugin from a name and a hook that subscribes listeners.
pub fn plugin<F>(name: &str, hook: F) -> FnPlugin<F>
where
    F: Fn(&mut Registration<'_>) + Send + Sync,
{
    FnPlugin {
        name: name.to_string(),
        hook,
    }
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&mut Registration<'_>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        (self.hook)(registration);
        Ok(())
    }
}

// =========================================================================
// Content fixtures
// =========================================================================

/// Write `(relative path, contents)` pairs under `root`, creating directories.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, contents).unwrap();
    }
}

/// A temp site with `content/` holding `files`, and a registry pointing
/// `CONTENT_DIR` and `OUTPUT_DIR` into it.
pub fn site_with(files: &[(&str, &str)]) -> (TempDir, Registry) {
    let tmp = TempDir::new().unwrap();
    let content = tmp.path().join("content");
    std::fs::create_dir_all(&content).unwrap();
    write_files(&content, files);

    let registry = Registry::new();
    registry.set_config(keys::CONTENT_DIR, content.to_string_lossy().as_ref());
    registry.set_config(
        keys::OUTPUT_DIR,
        tmp.path().join("public").to_string_lossy().as_ref(),
    );
    registry.set_config(keys::ASSETS_DIR, "assets");
    registry.set_config(keys::SITE_TITLE, "Test Site");
    registry.set_config(keys::EXTENSIONS, vec!["md", "html"]);
    (tmp, registry)
}
