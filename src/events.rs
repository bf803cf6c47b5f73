//! Named events with priority-ordered, parameter-transforming listeners.
//!
//! Every extension point in the build is an event name. Plugins subscribe
//! closures to names; the pipeline (or any listener) dispatches a name with a
//! [`Params`] bag, and the bag is folded through each listener in turn:
//!
//! ```text
//! dispatch("POST_RENDER", bag)
//!   → listener(priority 10)   bag → bag'
//!   → listener(priority 100)  bag' → bag''
//!   → listener(priority 1000) bag'' → bag'''   (returned)
//! ```
//!
//! ## Ordering
//!
//! Lower priority values run first. Listeners with equal priority run in the
//! order they were subscribed. The [`priority`] bands are the values the
//! built-in plugins use; third-party listeners should pick values relative to
//! them.
//!
//! ## Failure
//!
//! A listener reports failure through [`ListenerError`]:
//!
//! - **Recoverable**: logged, recorded in the [`Dispatch`] report, and the chain
//!   continues with the bag exactly as it was before that listener ran.
//! - **Fatal** (including I/O errors and panics): dispatch stops and returns a
//!   [`DispatchError`]. What that aborts is the caller's decision; the
//!   pipeline aborts the current file only.
//!
//! Dispatching a name nobody subscribed to returns the bag unchanged.
//!
//! ## Re-entrancy
//!
//! The listener list is cloned out of the lock before the chain runs, so a
//! listener may dispatch another event, or subscribe new listeners, without
//! deadlocking. Ordering guarantees hold per dispatch, not across nested
//! dispatches.

use crate::params::Params;
use crate::registry::Registry;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Event names fired by the pipeline and the CLI.
pub mod names {
    /// Fired once before CLI command dispatch. The bag carries a `commands`
    /// array plugins may append `{ "name", "about" }` objects to.
    pub const CONSOLE_INIT: &str = "CONSOLE_INIT";
    /// One-time plugin setup, after all plugins are registered.
    pub const CREATE: &str = "CREATE";
    pub const PRE_RENDER: &str = "PRE_RENDER";
    pub const SHORTCODES: &str = "SHORTCODES";
    pub const MARKDOWN: &str = "MARKDOWN";
    pub const TEMPLATE: &str = "TEMPLATE";
    pub const POST_RENDER: &str = "POST_RENDER";
    /// Fired once after every file has been processed.
    pub const POST_LOOP: &str = "POST_LOOP";

    pub const WELL_KNOWN: &[&str] = &[
        CONSOLE_INIT,
        CREATE,
        PRE_RENDER,
        SHORTCODES,
        MARKDOWN,
        TEMPLATE,
        POST_RENDER,
        POST_LOOP,
    ];

    /// Event dispatched when the plugin-contributed subcommand `command` runs.
    pub fn console(command: &str) -> String {
        format!("console:{command}")
    }
}

/// Priority bands used by the built-in plugins. Lower runs first.
pub mod priority {
    /// Path and metadata setup other listeners rely on.
    pub const EARLY: i32 = -100;
    pub const NORMAL: i32 = 0;
    /// Listeners that read what `NORMAL` listeners produced.
    pub const LATE: i32 = 100;
    /// Writing the final output to disk.
    pub const WRITE: i32 = 1000;
}

#[derive(Error, Debug)]
pub enum ListenerError {
    /// The listener could not do its job for this bag, but the rest of the
    /// chain can still run.
    #[error("{0}")]
    Recoverable(String),
    #[error("{0}")]
    Fatal(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ListenerError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Recoverable(_))
    }
}

/// A fatal listener failure, with enough context to report it.
#[derive(Error, Debug)]
#[error("'{owner}' failed on {event}: {source}")]
pub struct DispatchError {
    pub event: String,
    pub owner: String,
    #[source]
    pub source: ListenerError,
}

/// A recoverable listener failure that dispatch stepped over.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub event: String,
    pub owner: String,
    pub message: String,
    /// `file_path` of the bag being processed, if any.
    pub file: Option<PathBuf>,
}

/// Result of a dispatch that did not fail fatally.
#[derive(Debug)]
pub struct Dispatch {
    pub params: Params,
    pub recovered: Vec<Recovered>,
}

pub type Handler = dyn Fn(&Registry, Params) -> Result<Params, ListenerError> + Send + Sync;

#[derive(Clone)]
pub struct Listener {
    owner: String,
    priority: i32,
    handler: Arc<Handler>,
}

impl Listener {
    pub fn new<F>(owner: impl Into<String>, priority: i32, handler: F) -> Self
    where
        F: Fn(&Registry, Params) -> Result<Params, ListenerError> + Send + Sync + 'static,
    {
        Self {
            owner: owner.into(),
            priority,
            handler: Arc::new(handler),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("owner", &self.owner)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    events: RwLock<BTreeMap<String, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus with every [`names::WELL_KNOWN`] event declared.
    pub fn with_well_known() -> Self {
        let bus = Self::new();
        for name in names::WELL_KNOWN {
            bus.declare(name);
        }
        bus
    }

    /// Declare an event with no listeners. Returns `false` if it already
    /// existed (declaring twice is harmless).
    pub fn declare(&self, event: &str) -> bool {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.contains_key(event) {
            return false;
        }
        events.insert(event.to_string(), Vec::new());
        true
    }

    pub fn is_declared(&self, event: &str) -> bool {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event)
    }

    /// Subscribe a closure, declaring the event if needed.
    pub fn subscribe<F>(&self, event: &str, owner: impl Into<String>, priority: i32, handler: F)
    where
        F: Fn(&Registry, Params) -> Result<Params, ListenerError> + Send + Sync + 'static,
    {
        self.add_listener(event, Listener::new(owner, priority, handler));
    }

    /// Insert a listener after every existing listener with the same or lower
    /// priority, which keeps equal priorities in subscription order.
    pub fn add_listener(&self, event: &str, listener: Listener) {
        log::debug!(
            "{} subscribes to {event} at priority {}",
            listener.owner,
            listener.priority
        );
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let listeners = events.entry(event.to_string()).or_default();
        let at = listeners.partition_point(|l| l.priority <= listener.priority);
        listeners.insert(at, listener);
    }

    /// `(owner, priority)` for each listener of `event`, in run order.
    pub fn listeners(&self, event: &str) -> Vec<(String, i32)> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(|ls| ls.iter().map(|l| (l.owner.clone(), l.priority)).collect())
            .unwrap_or_default()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// All declared event names, sorted.
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Run `event`'s listener chain over `params` and return the final bag.
    ///
    /// Recoverable failures are logged at warn level and skipped; use
    /// [`dispatch_with_report`](Self::dispatch_with_report) to collect them.
    pub fn dispatch(
        &self,
        registry: &Registry,
        event: &str,
        params: Params,
    ) -> Result<Params, DispatchError> {
        self.dispatch_with_report(registry, event, params)
            .map(|dispatch| dispatch.params)
    }

    pub fn dispatch_with_report(
        &self,
        registry: &Registry,
        event: &str,
        params: Params,
    ) -> Result<Dispatch, DispatchError> {
        let listeners = match self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
        {
            Some(listeners) if !listeners.is_empty() => listeners.clone(),
            _ => {
                return Ok(Dispatch {
                    params,
                    recovered: Vec::new(),
                });
            }
        };

        let mut params = params;
        let mut recovered = Vec::new();
        for listener in &listeners {
            let snapshot = params.clone();
            log::trace!("{event}: running {} ({})", listener.owner, listener.priority);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                (listener.handler)(registry, params)
            }));
            match outcome {
                Ok(Ok(next)) => params = next,
                Ok(Err(err)) if !err.is_fatal() => {
                    let failure = Recovered {
                        event: event.to_string(),
                        owner: listener.owner.clone(),
                        message: err.to_string(),
                        file: snapshot.file_path.clone(),
                    };
                    log::warn!("{}", describe_recovered(&failure));
                    recovered.push(failure);
                    params = snapshot;
                }
                Ok(Err(source)) => {
                    return Err(DispatchError {
                        event: event.to_string(),
                        owner: listener.owner.clone(),
                        source,
                    });
                }
                Err(panic) => {
                    return Err(DispatchError {
                        event: event.to_string(),
                        owner: listener.owner.clone(),
                        source: ListenerError::Fatal(format!(
                            "panicked: {}",
                            panic_message(panic.as_ref())
                        )),
                    });
                }
            }
        }

        Ok(Dispatch { params, recovered })
    }
}

fn describe_recovered(failure: &Recovered) -> String {
    match &failure.file {
        Some(file) => format!(
            "{}: '{}' skipped on {}: {}",
            file.display(),
            failure.owner,
            failure.event,
            failure.message
        ),
        None => format!(
            "'{}' skipped on {}: {}",
            failure.owner, failure.event, failure.message
        ),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
