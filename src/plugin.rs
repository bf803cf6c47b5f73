//! Plugin discovery, validation and registration.
//!
//! A plugin is an independently developed feature that hooks into the build
//! by subscribing listeners to events. Each plugin moves through a small
//! state machine, driven by [`PluginManager`]:
//!
//! ```text
//! Discovered ──validate──▶ Validated ──register──▶ Registered
//!      │                       │
//!      └──────────────▶ Skipped ◀──────┘
//! ```
//!
//! - **Discovery**: built-in plugins are compiled into the binary and collected
//!   with [`inventory`]; embedders add their own with [`PluginManager::add`].
//!   A name seen twice is ignored, and names listed in `plugins.disabled` go
//!   straight to `Skipped`.
//! - **Validation**: every key from [`Plugin::required_config`] must be set in
//!   the [`Registry`] and every variable from [`Plugin::required_env`] must be
//!   present in the environment snapshot. A miss skips the whole plugin.
//! - **Registration**: [`Plugin::register`] runs once with a [`Registration`]
//!   handle. Subscriptions made through it are staged and only reach the
//!   [`EventBus`] if the hook returns `Ok`, so a plugin is either fully wired
//!   or not wired at all. A hook that errors or panics skips its plugin and
//!   the manager moves on.
//!
//! Skipping is never fatal: the build proceeds without that plugin.

use crate::events::{EventBus, Listener, ListenerError, panic_message};
use crate::params::Params;
use crate::registry::{Registry, RegistryError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("missing config key(s): {}", .0.join(", "))]
    MissingConfig(Vec<String>),
    #[error("missing environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<String>),
    #[error("disabled in config")]
    Disabled,
    #[error("registration failed: {0}")]
    Registration(String),
    #[error("registration panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl PluginError {
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration(message.into())
    }
}

pub trait Plugin: Send + Sync {
    /// Unique name, used in logs, listener ownership and `plugins.disabled`.
    fn name(&self) -> &str;

    /// Registry config keys that must be set for this plugin to load.
    fn required_config(&self) -> &[&str] {
        &[]
    }

    /// Environment variables that must be present for this plugin to load.
    fn required_env(&self) -> &[&str] {
        &[]
    }

    /// Subscribe listeners and do one-time setup. Called at most once.
    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError>;
}

/// A built-in plugin submitted with `inventory::submit!`.
///
/// Discovery orders built-ins by `(ordinal, name)`, which fixes the
/// subscription order (and therefore tie-breaking between equal priorities)
/// regardless of link order.
pub struct BuiltinPlugin {
    pub name: &'static str,
    pub ordinal: u32,
    pub create: fn() -> Box<dyn Plugin>,
}

impl BuiltinPlugin {
    pub const fn new(name: &'static str, ordinal: u32, create: fn() -> Box<dyn Plugin>) -> Self {
        Self {
            name,
            ordinal,
            create,
        }
    }
}

inventory::collect!(BuiltinPlugin);

/// Handle given to [`Plugin::register`], scoped to one plugin.
pub struct Registration<'a> {
    owner: String,
    registry: &'a Registry,
    declared: Vec<String>,
    pending: Vec<(String, Listener)>,
}

impl<'a> Registration<'a> {
    fn new(owner: &str, registry: &'a Registry) -> Self {
        Self {
            owner: owner.to_string(),
            registry,
            declared: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The build's registry, for one-time setup such as placing services.
    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    /// Declare an event this plugin intends to fire, so others can see it.
    pub fn declare(&mut self, event: &str) -> &mut Self {
        self.declared.push(event.to_string());
        self
    }

    /// Subscribe `handler` to `event`, owned by this plugin.
    pub fn on<F>(&mut self, event: &str, priority: i32, handler: F) -> &mut Self
    where
        F: Fn(&Registry, Params) -> Result<Params, ListenerError> + Send + Sync + 'static,
    {
        self.pending.push((
            event.to_string(),
            Listener::new(self.owner.clone(), priority, handler),
        ));
        self
    }

    fn commit(self, bus: &EventBus) -> usize {
        for event in &self.declared {
            bus.declare(event);
        }
        let count = self.pending.len();
        for (event, listener) in self.pending {
            bus.add_listener(&event, listener);
        }
        count
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PluginState {
    Discovered,
    Validated,
    Registered { listeners: usize },
    Skipped { reason: String },
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => write!(f, "discovered"),
            Self::Validated => write!(f, "validated"),
            Self::Registered { listeners: 1 } => write!(f, "registered (1 listener)"),
            Self::Registered { listeners } => write!(f, "registered ({listeners} listeners)"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

pub struct PluginRecord {
    plugin: Arc<dyn Plugin>,
    state: PluginState,
}

impl PluginRecord {
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn state(&self) -> &PluginState {
        &self.state
    }

    fn skip(&mut self, err: &PluginError) {
        log::warn!("plugin '{}' skipped: {err}", self.plugin.name());
        self.state = PluginState::Skipped {
            reason: err.to_string(),
        };
    }
}

/// Snapshot of the process environment taken once per validation pass.
#[derive(Debug, Clone, Default)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    pub fn capture() -> Self {
        Self(
            std::env::vars_os()
                .map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
                .collect(),
        )
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Default)]
pub struct PluginManager {
    records: Vec<PluginRecord>,
    disabled: BTreeSet<String>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugins with these names are skipped as soon as they are discovered.
    pub fn with_disabled<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            records: Vec::new(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// Add every built-in plugin, ordered by `(ordinal, name)`. Returns how
    /// many were newly discovered.
    pub fn discover_builtins(&mut self) -> usize {
        let mut builtins: Vec<&BuiltinPlugin> = Vec::new();
        for builtin in inventory::iter::<BuiltinPlugin> {
            builtins.push(builtin);
        }
        builtins.sort_by_key(|b| (b.ordinal, b.name));
        let mut added = 0;
        for builtin in builtins {
            if self.add_boxed((builtin.create)()) {
                added += 1;
            }
        }
        added
    }

    /// Add one plugin. Returns `false` (and keeps the first one) if a plugin
    /// with the same name is already known.
    pub fn add(&mut self, plugin: impl Plugin + 'static) -> bool {
        self.add_arc(Arc::new(plugin))
    }

    pub fn add_boxed(&mut self, plugin: Box<dyn Plugin>) -> bool {
        self.add_arc(Arc::from(plugin))
    }

    fn add_arc(&mut self, plugin: Arc<dyn Plugin>) -> bool {
        let name = plugin.name().to_string();
        if self.records.iter().any(|r| r.name() == name) {
            log::warn!("plugin '{name}' discovered twice; keeping the first");
            return false;
        }
        let mut record = PluginRecord {
            plugin,
            state: PluginState::Discovered,
        };
        if self.disabled.contains(&name) {
            record.skip(&PluginError::Disabled);
        } else {
            log::debug!("discovered plugin '{name}'");
        }
        self.records.push(record);
        true
    }

    /// Check prerequisites of every `Discovered` plugin.
    pub fn validate(&mut self, registry: &Registry, env: &Environment) {
        for record in &mut self.records {
            if record.state != PluginState::Discovered {
                continue;
            }
            match check_prerequisites(record.plugin.as_ref(), registry, env) {
                Ok(()) => record.state = PluginState::Validated,
                Err(err) => record.skip(&err),
            }
        }
    }

    /// Run the registration hook of every `Validated` plugin, in discovery
    /// order. Already registered plugins are left alone.
    pub fn register(&mut self, registry: &Registry, bus: &EventBus) {
        for record in &mut self.records {
            if record.state != PluginState::Validated {
                continue;
            }
            let mut registration = Registration::new(record.plugin.name(), registry);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                record.plugin.register(&mut registration)
            }));
            match outcome {
                Ok(Ok(())) => {
                    let listeners = registration.commit(bus);
                    log::info!(
                        "registered plugin '{}' ({listeners} listeners)",
                        record.plugin.name()
                    );
                    record.state = PluginState::Registered { listeners };
                }
                Ok(Err(err)) => record.skip(&err),
                Err(panic) => record.skip(&PluginError::Panicked(panic_message(panic.as_ref()))),
            }
        }
    }

    /// Validate against the live environment, then register.
    pub fn start(&mut self, registry: &Registry, bus: &EventBus) {
        self.validate(registry, &Environment::capture());
        self.register(registry, bus);
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn state(&self, name: &str) -> Option<&PluginState> {
        self.records
            .iter()
            .find(|r| r.name() == name)
            .map(PluginRecord::state)
    }

    pub fn registered(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| matches!(r.state, PluginState::Registered { .. }))
            .map(|r| r.name().to_string())
            .collect()
    }

    /// `(name, reason)` for each skipped plugin, in discovery order.
    pub fn skipped(&self) -> Vec<(String, String)> {
        self.records
            .iter()
            .filter_map(|r| match &r.state {
                PluginState::Skipped { reason } => Some((r.name().to_string(), reason.clone())),
                _ => None,
            })
            .collect()
    }
}

fn check_prerequisites(
    plugin: &dyn Plugin,
    registry: &Registry,
    env: &Environment,
) -> Result<(), PluginError> {
    let missing_config: Vec<String> = plugin
        .required_config()
        .iter()
        .filter(|key| !registry.has_config(key))
        .map(|key| key.to_string())
        .collect();
    if !missing_config.is_empty() {
        return Err(PluginError::MissingConfig(missing_config));
    }
    let missing_env: Vec<String> = plugin
        .required_env()
        .iter()
        .filter(|key| !env.contains(key))
        .map(|key| key.to_string())
        .collect();
    if !missing_env.is_empty() {
        return Err(PluginError::MissingEnv(missing_env));
    }
    Ok(())
}
