//! # Stagehand
//!
//! A static site builder whose features are all plugins. The core knows
//! nothing about markdown, templates or sitemaps; it provides four pieces of
//! plumbing and a fixed phase sequence, and every feature hooks in through
//! them.
//!
//! # Architecture: Registry, Bus, Plugins, Pipeline
//!
//! ```text
//!             ┌──────────────┐  discover / validate / register
//! plugins ──▶ │ PluginManager │ ─────────────────────────────┐
//!             └──────────────┘                               ▼
//!  stagehand.toml ──▶ Registry ◀── listeners ──▶ EventBus (named events)
//!                        ▲                           ▲
//!                        └──────── Pipeline ─────────┘
//!                 CREATE → per file (PRE_RENDER … POST_RENDER) → POST_LOOP
//! ```
//!
//! - The **registry** holds config values and shared services for one run.
//! - The **event bus** maps event names to priority-ordered listeners that
//!   each take the parameter bag and return it, possibly changed.
//! - The **plugin manager** finds plugins, checks their prerequisites and lets
//!   each subscribe its listeners exactly once.
//! - The **pipeline** fires the phases in order over every discovered file.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`registry`] | Config values and lazily constructed services shared by all listeners |
//! | [`events`] | Event bus: subscription, priority ordering, dispatch, failure policy |
//! | [`params`] | The parameter bag threaded through every listener chain |
//! | [`plugin`] | Plugin trait, built-in discovery, validation and registration |
//! | [`pipeline`] | Phase sequence, per-file isolation, optional parallel fan-out |
//! | [`discover`] | Content sources: filesystem walk and front matter |
//! | [`config`] | `stagehand.toml` loading, validation and merging |
//! | [`naming`] | `NNN-name` convention and page routes |
//! | [`plugins`] | Built-in features: paths, shortcodes, markdown, layout, writer, sitemap, assets |
//! | [`output`] | CLI output formatting for build, check and plugin listings |
//!
//! # Design Decisions
//!
//! ## Listeners Are Closures, Not Method Names
//!
//! A listener is an `Arc<dyn Fn(&Registry, Params) -> Result<Params, _>>`
//! captured when the plugin registers. There is no lookup by name at dispatch
//! time, so a typo is a compile error and the bus never has to guess how to
//! call into a plugin.
//!
//! ## One Registry Per Run, Passed Explicitly
//!
//! The registry is an `Arc<Registry>` owned by the [`pipeline::Pipeline`] and
//! handed to each listener by reference. Nothing is global, so tests build as
//! many independent pipelines as they like.
//!
//! ## Fail the File, Not the Build
//!
//! A fatal listener error while processing one file stops that file only. The
//! writer is the last `POST_RENDER` listener, so a file that failed earlier in
//! its chain produces no output at all rather than a half-rendered page. A
//! file discovery cannot read, or whose front matter does not parse, fails
//! the same way. Whether failed files turn into a non-zero exit is a config switch
//! (`fail_on_file_error`).
//!
//! ## Built-ins Are Ordinary Plugins
//!
//! Every feature in [`plugins`] goes through the same `Plugin` trait a third
//! party would use and registers itself with `inventory`. Disabling one is a
//! config entry, not a code change.

pub mod config;
pub mod discover;
pub mod events;
pub mod naming;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod registry;

pub use discover::{ContentSource, Discovery, FsSource, MemorySource, Rejected, SourceFile};
pub use events::{EventBus, ListenerError};
pub use params::Params;
pub use pipeline::{BuildError, BuildReport, Pipeline};
pub use plugin::{Plugin, PluginError, PluginManager, Registration};
pub use registry::Registry;

#[cfg(test)]
pub(crate) mod test_helpers;
