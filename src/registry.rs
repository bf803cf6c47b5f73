//! Shared configuration and service store for one build run.
//!
//! The registry holds two independent namespaces:
//!
//! - **Config**: JSON values keyed by name (`OUTPUT_DIR`, `BASE_URL`, ...).
//!   Seeded from `stagehand.toml` at startup, then read (and occasionally
//!   written) by plugins and listeners.
//! - **Services**: long-lived shared objects stored as `Arc<dyn Any>`. A
//!   service is either stored eagerly with [`Registry::set_service`] or as a
//!   factory with [`Registry::register_factory`], in which case it is built on
//!   first access and cached for the rest of the run.
//!
//! There is exactly one registry per build, owned by the
//! [`Pipeline`](crate::pipeline::Pipeline) and handed to every listener by
//! reference. Both namespaces are behind `RwLock`s so listeners running on the
//! worker pool can share it.
//!
//! A missing key is never an error: lookups return `None` and the caller
//! decides whether that matters.

use crate::config::{SiteConfig, effective_threads, toml_to_json};
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

/// Well-known registry keys.
pub mod keys {
    /// Root of the content tree.
    pub const CONTENT_DIR: &str = "CONTENT_DIR";
    /// Root of the rendered site.
    pub const OUTPUT_DIR: &str = "OUTPUT_DIR";
    /// Directory under `CONTENT_DIR` copied verbatim into the output root.
    pub const ASSETS_DIR: &str = "ASSETS_DIR";
    /// Absolute site URL without trailing slash. Absent when not configured.
    pub const BASE_URL: &str = "BASE_URL";
    pub const SITE_TITLE: &str = "SITE_TITLE";
    /// Array of file extensions (without dot) picked up by discovery.
    pub const EXTENSIONS: &str = "EXTENSIONS";
    pub const FAIL_ON_FILE_ERROR: &str = "FAIL_ON_FILE_ERROR";
    /// Worker count for the per-file phase, already clamped to the core count.
    /// Absent means sequential.
    pub const MAX_PROCESSES: &str = "MAX_PROCESSES";

    /// Service key under which the pipeline publishes its event bus.
    pub const EVENT_BUS: &str = "event_bus";
}

/// A shared service instance.
pub type Service = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> Service + Send + Sync>;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("cannot register a factory for '{0}': an eager service already uses that key")]
    ServiceCollision(String),
    #[error("cannot register a factory for '{0}': its service has already been built")]
    AlreadyResolved(String),
}

enum ServiceSlot {
    Ready(Service),
    Lazy {
        cell: Arc<OnceLock<Service>>,
        factory: Factory,
    },
}

#[derive(Default)]
pub struct Registry {
    config: RwLock<BTreeMap<String, Value>>,
    services: RwLock<HashMap<String, ServiceSlot>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services: Vec<String> = read(&self.services).keys().cloned().collect();
        f.debug_struct("Registry")
            .field("config", &*read(&self.config))
            .field("services", &services)
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a registry from a loaded site config.
    ///
    /// `[params]` entries are copied verbatim under their own names, after the
    /// well-known keys, so a param can deliberately override one of them.
    pub fn from_site_config(config: &SiteConfig) -> Self {
        let registry = Self::new();
        registry.set_config(keys::CONTENT_DIR, config.content_dir.as_str());
        registry.set_config(keys::OUTPUT_DIR, config.output_dir.as_str());
        registry.set_config(keys::ASSETS_DIR, config.assets_dir.as_str());
        registry.set_config(keys::SITE_TITLE, config.title.as_str());
        registry.set_config(keys::EXTENSIONS, config.extensions.clone());
        registry.set_config(keys::FAIL_ON_FILE_ERROR, config.fail_on_file_error);
        if config.processing.max_processes.is_some() {
            registry.set_config(keys::MAX_PROCESSES, effective_threads(&config.processing));
        }
        let base_url = config.base_url.trim_end_matches('/');
        if !base_url.is_empty() {
            registry.set_config(keys::BASE_URL, base_url);
        }
        for (key, value) in &config.params {
            registry.set_config(key.as_str(), toml_to_json(value));
        }
        registry
    }

    // =========================================================================
    // Config namespace
    // =========================================================================

    /// Insert or update a config value.
    pub fn set_config(&self, key: impl Into<String>, value: impl Into<Value>) {
        write(&self.config).insert(key.into(), value.into());
    }

    /// Look up a config value. `None` means "not set", which is distinct from
    /// a stored `null`, `false`, `0` or `""`.
    pub fn config(&self, key: &str) -> Option<Value> {
        read(&self.config).get(key).cloned()
    }

    /// String view of a config value; `None` if absent or not a string.
    pub fn config_str(&self, key: &str) -> Option<String> {
        read(&self.config)
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Boolean view of a config value; `None` if absent or not a bool.
    pub fn config_bool(&self, key: &str) -> Option<bool> {
        read(&self.config).get(key).and_then(Value::as_bool)
    }

    pub fn has_config(&self, key: &str) -> bool {
        read(&self.config).contains_key(key)
    }

    // =========================================================================
    // Service namespace
    // =========================================================================

    /// Store an eagerly constructed service, replacing any previous entry
    /// (eager or lazy) under the same key.
    pub fn set_service<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set_service_arc(key, Arc::new(value));
    }

    /// Like [`set_service`](Self::set_service) for a value that is already
    /// shared elsewhere.
    pub fn set_service_arc<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
        let service: Service = value;
        write(&self.services).insert(key.into(), ServiceSlot::Ready(service));
    }

    /// Register a zero-argument constructor invoked on first access.
    ///
    /// The factory runs at most once, even when several threads ask for the
    /// service at the same time. Registering over an unresolved factory
    /// replaces it. Registering over an eager service, or over a factory whose
    /// instance is already handed out, is a wiring bug and is rejected.
    pub fn register_factory<T, F>(&self, key: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = key.into();
        let mut services = write(&self.services);
        match services.get(&key) {
            Some(ServiceSlot::Ready(_)) => return Err(RegistryError::ServiceCollision(key)),
            Some(ServiceSlot::Lazy { cell, .. }) if cell.get().is_some() => {
                return Err(RegistryError::AlreadyResolved(key));
            }
            _ => {}
        }
        let factory: Factory = Arc::new(move || -> Service { Arc::new(factory()) });
        services.insert(
            key,
            ServiceSlot::Lazy {
                cell: Arc::new(OnceLock::new()),
                factory,
            },
        );
        Ok(())
    }

    /// Fetch a service, resolving its factory if this is the first access.
    ///
    /// Returns `None` when the key is unknown or holds a different type. The
    /// registry lock is released before the factory runs, so a factory may
    /// read other registry entries (but must not request its own key).
    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let service = self.resolve(key)?;
        match service.downcast::<T>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                log::debug!(
                    "service '{key}' is not a {}",
                    std::any::type_name::<T>()
                );
                None
            }
        }
    }

    /// True if a service (resolved or not) is registered under `key`.
    /// Never runs a factory.
    pub fn has(&self, key: &str) -> bool {
        read(&self.services).contains_key(key)
    }

    fn resolve(&self, key: &str) -> Option<Service> {
        let (cell, factory) = match read(&self.services).get(key)? {
            ServiceSlot::Ready(service) => return Some(Arc::clone(service)),
            ServiceSlot::Lazy { cell, factory } => (Arc::clone(cell), Arc::clone(factory)),
        };
        Some(Arc::clone(cell.get_or_init(|| {
            log::debug!("constructing service '{key}'");
            factory()
        })))
    }
}

// A listener that panicked while holding a guard must not take the whole
// registry down with it; the maps are still structurally valid.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn absent_config_is_none_not_falsy() {
        let registry = Registry::new();
        registry.set_config("draft", false);
        registry.set_config("count", 0);
        registry.set_config("empty", "");
        registry.set_config("nothing", Value::Null);

        assert_eq!(registry.config("draft"), Some(Value::Bool(false)));
        assert_eq!(registry.config("count"), Some(Value::from(0)));
        assert_eq!(registry.config_str("empty").as_deref(), Some(""));
        assert_eq!(registry.config("nothing"), Some(Value::Null));
        assert_eq!(registry.config("missing"), None);
        assert!(registry.has_config("nothing"));
        assert!(!registry.has_config("missing"));
    }

    #[test]
    fn set_config_updates_existing_key() {
        let registry = Registry::new();
        registry.set_config(keys::OUTPUT_DIR, "public");
        registry.set_config(keys::OUTPUT_DIR, "dist");
        assert_eq!(registry.config_str(keys::OUTPUT_DIR).as_deref(), Some("dist"));
    }

    #[test]
    fn typed_config_views_reject_other_types() {
        let registry = Registry::new();
        registry.set_config("flag", "yes");
        assert_eq!(registry.config_bool("flag"), None);
        assert_eq!(registry.config_str("flag").as_deref(), Some("yes"));
    }

    #[test]
    fn factory_runs_once_and_returns_same_instance() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register_factory("x", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                String::from("built")
            })
            .unwrap();

        let first = registry.service::<String>("x").unwrap();
        let second = registry.service::<String>("x").unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*first, "built");
    }

    #[test]
    fn has_does_not_force_construction() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register_factory("lazy", move || counter.fetch_add(1, Ordering::SeqCst))
            .unwrap();

        assert!(registry.has("lazy"));
        assert!(!registry.has("other"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn factory_over_eager_service_is_rejected() {
        let registry = Registry::new();
        registry.set_service("db", 42u32);
        let err = registry.register_factory("db", || 7u32).unwrap_err();
        assert_eq!(err, RegistryError::ServiceCollision("db".into()));
        assert_eq!(*registry.service::<u32>("db").unwrap(), 42);
    }

    #[test]
    fn unresolved_factory_can_be_replaced() {
        let registry = Registry::new();
        registry.register_factory("svc", || 1u8).unwrap();
        registry.register_factory("svc", || 2u8).unwrap();
        assert_eq!(*registry.service::<u8>("svc").unwrap(), 2);
    }

    #[test]
    fn factory_over_resolved_factory_is_rejected() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register_factory("cache", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                String::from("first")
            })
            .unwrap();
        let held = registry.service::<String>("cache").unwrap();

        let err = registry
            .register_factory("cache", || String::from("second"))
            .unwrap_err();

        assert_eq!(err, RegistryError::AlreadyResolved("cache".into()));
        let again = registry.service::<String>("cache").unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn eager_service_replaces_factory() {
        let registry = Registry::new();
        registry.register_factory("svc", || 1u8).unwrap();
        registry.set_service("svc", 2u8);
        assert_eq!(*registry.service::<u8>("svc").unwrap(), 2);
    }

    #[test]
    fn service_with_wrong_type_is_none() {
        let registry = Registry::new();
        registry.set_service("n", 5u64);
        assert!(registry.service::<String>("n").is_none());
        assert!(registry.service::<u64>("n").is_some());
        assert!(registry.service::<u64>("missing").is_none());
    }

    #[test]
    fn factory_may_read_other_entries() {
        let registry = Arc::new(Registry::new());
        registry.set_config("greeting", "hello");
        registry.set_service("name", String::from("world"));
        // The factory is 'static, so it captures what it needs up front.
        let greeting = registry.config_str("greeting").unwrap();
        registry
            .register_factory("message", move || format!("{greeting}!"))
            .unwrap();
        assert_eq!(*registry.service::<String>("message").unwrap(), "hello!");
    }

    #[test]
    fn concurrent_resolution_constructs_once() {
        let registry = Arc::new(Registry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry
            .register_factory("shared", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                vec![1, 2, 3]
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.service::<Vec<i32>>("shared").unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn from_site_config_seeds_well_known_keys() {
        let mut config = SiteConfig::default();
        config.base_url = "https://example.com/".into();
        config.params.insert("calendars".into(), toml::Value::Boolean(true));

        let registry = Registry::from_site_config(&config);
        assert_eq!(registry.config_str(keys::CONTENT_DIR).as_deref(), Some("content"));
        assert_eq!(registry.config_str(keys::OUTPUT_DIR).as_deref(), Some("public"));
        assert_eq!(
            registry.config_str(keys::BASE_URL).as_deref(),
            Some("https://example.com")
        );
        assert_eq!(registry.config_bool("calendars"), Some(true));
        assert_eq!(registry.config_bool(keys::FAIL_ON_FILE_ERROR), Some(false));
        assert!(!registry.has_config(keys::MAX_PROCESSES));
    }

    #[test]
    fn max_processes_is_clamped_into_registry() {
        let mut config = SiteConfig::default();
        config.processing.max_processes = Some(1);
        let registry = Registry::from_site_config(&config);
        assert_eq!(registry.config(keys::MAX_PROCESSES), Some(Value::from(1)));
    }

    #[test]
    fn empty_base_url_is_left_unset() {
        let registry = Registry::from_site_config(&SiteConfig::default());
        assert!(!registry.has_config(keys::BASE_URL));
    }
}
