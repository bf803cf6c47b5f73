//! The build orchestrator.
//!
//! A [`Pipeline`] owns the registry, the event bus and the plugin manager for
//! one run, and fires the fixed phase sequence:
//!
//! ```text
//! start        plugins validated and registered
//! CREATE       once, one-time plugin setup
//! discovery    ContentSource::discover
//! per file     PRE_RENDER → SHORTCODES → MARKDOWN → TEMPLATE → POST_RENDER
//! POST_LOOP    once, aggregate outputs
//! ```
//!
//! A fatal listener error in `CREATE` or `POST_LOOP` aborts the build with a
//! [`BuildError`], as does a content root that cannot be walked. A fatal
//! error while processing one file only stops that file: it is recorded as a
//! [`FileFailure`] and the next file proceeds. A file that discovery could not
//! load is recorded the same way, under the [`DISCOVERY`] pseudo-event. Since
//! the writer runs last in `POST_RENDER`, a failed file leaves no output
//! behind.
//!
//! ## Parallelism
//!
//! When `MAX_PROCESSES` is above 1 the per-file phase runs on a dedicated
//! rayon pool of that size. `PRE_RENDER` still runs for every file on the
//! calling thread, in discovery order, before the rest of the chains fan
//! out, so route claims resolve the same way as in a sequential build.
//! `CREATE` and `POST_LOOP` stay on the calling thread, and outcomes are
//! reported in discovery order either way.

use crate::config::SiteConfig;
use crate::discover::{ContentSource, DiscoveryError, Rejected, SourceFile};
use crate::events::{DispatchError, EventBus, Recovered, names};
use crate::params::Params;
use crate::plugin::PluginManager;
use crate::registry::{Registry, keys};
use rayon::prelude::*;
use serde_json::{Value, json};
use std::fmt;
use std::iter;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("{phase} failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: DispatchError,
    },
    #[error("could not start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Event name recorded on failures of files discovery could not load.
pub const DISCOVERY: &str = "DISCOVERY";

impl BuildError {
    fn phase(phase: &str, source: DispatchError) -> Self {
        Self::Phase {
            phase: phase.to_string(),
            source,
        }
    }
}

/// A file whose processing was stopped by a fatal listener error.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub event: String,
    pub owner: String,
    pub message: String,
}

impl FileFailure {
    fn rejected(rejected: Rejected) -> Self {
        Self {
            path: rejected.path,
            event: DISCOVERY.to_string(),
            owner: "discovery".to_string(),
            message: rejected.error.to_string(),
        }
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: '{}' failed on {}: {}",
            self.path.display(),
            self.owner,
            self.event,
            self.message
        )
    }
}

/// What happened to one file.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    /// The final bag, or the failure that stopped the chain.
    pub result: Result<Params, FileFailure>,
    /// Recoverable listener errors hit along the way, including those before
    /// a failure.
    pub recovered: Vec<Recovered>,
}

/// A subcommand contributed by a plugin during `CONSOLE_INIT`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleCommand {
    pub name: String,
    pub about: String,
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub registered: Vec<String>,
    pub skipped: Vec<(String, String)>,
    /// Source paths of files that went through the whole chain.
    pub processed: Vec<PathBuf>,
    /// The subset of `processed` whose page was written.
    pub written: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub recovered: Vec<Recovered>,
    pub fail_on_file_error: bool,
}

impl BuildReport {
    /// True when the run should exit non-zero.
    pub fn should_fail(&self) -> bool {
        self.fail_on_file_error && !self.failures.is_empty()
    }

    /// Files that completed their chain without a page on disk.
    pub fn unwritten(&self) -> Vec<&PathBuf> {
        self.processed
            .iter()
            .filter(|path| !self.written.contains(path))
            .collect()
    }
}

/// Result of `check`: plugin states and the files a build would process.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub registered: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub files: Vec<PathBuf>,
    /// Files that were found but could not be loaded.
    pub failures: Vec<FileFailure>,
}

pub struct Pipeline {
    registry: Arc<Registry>,
    bus: Arc<EventBus>,
    plugins: PluginManager,
    transforms: Vec<String>,
    started: bool,
    commands: Option<Vec<ConsoleCommand>>,
}

impl Pipeline {
    /// Wire a pipeline around an existing registry and plugin set.
    ///
    /// The bus is published in the registry under [`keys::EVENT_BUS`] so
    /// listeners can dispatch nested events.
    pub fn new(registry: Arc<Registry>, plugins: PluginManager) -> Self {
        let bus = Arc::new(EventBus::with_well_known());
        registry.set_service_arc(keys::EVENT_BUS, Arc::clone(&bus));
        Self {
            registry,
            bus,
            plugins,
            transforms: vec![
                names::SHORTCODES.to_string(),
                names::MARKDOWN.to_string(),
                names::TEMPLATE.to_string(),
            ],
            started: false,
            commands: None,
        }
    }

    /// A pipeline seeded from config with every enabled built-in plugin.
    pub fn from_site_config(config: &SiteConfig) -> Self {
        let mut plugins = PluginManager::with_disabled(config.plugins.disabled.iter().cloned());
        plugins.discover_builtins();
        Self::new(Arc::new(Registry::from_site_config(config)), plugins)
    }

    /// Append a content-transform event to the per-file chain, after the
    /// ones already present and before `POST_RENDER`.
    pub fn with_transform(mut self, event: &str) -> Self {
        self.bus.declare(event);
        self.transforms.push(event.to_string());
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// For adding plugins before the pipeline starts.
    pub fn plugins_mut(&mut self) -> &mut PluginManager {
        &mut self.plugins
    }

    /// The per-file event chain, in dispatch order.
    pub fn chain(&self) -> Vec<&str> {
        iter::once(names::PRE_RENDER)
            .chain(self.transforms.iter().map(String::as_str))
            .chain(iter::once(names::POST_RENDER))
            .collect()
    }

    /// Validate and register plugins. Runs once; later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.plugins.start(&self.registry, &self.bus);
        self.started = true;
        log::info!(
            "{} plugin(s) registered, {} skipped",
            self.plugins.registered().len(),
            self.plugins.skipped().len()
        );
    }

    /// Fire `CONSOLE_INIT` once and collect plugin-contributed commands.
    ///
    /// Entries without a string `name` are ignored.
    pub fn console_init(&mut self) -> Result<Vec<ConsoleCommand>, BuildError> {
        self.start();
        if let Some(commands) = &self.commands {
            return Ok(commands.clone());
        }
        let params = Params::new().with("commands", json!([]));
        let params = self
            .bus
            .dispatch(&self.registry, names::CONSOLE_INIT, params)
            .map_err(|e| BuildError::phase(names::CONSOLE_INIT, e))?;
        let commands: Vec<ConsoleCommand> = match params.get("commands") {
            Some(Value::Array(items)) => items.iter().filter_map(parse_command).collect(),
            _ => Vec::new(),
        };
        log::debug!("{} console command(s) contributed", commands.len());
        self.commands = Some(commands.clone());
        Ok(commands)
    }

    /// Dispatch `console:<name>` for a plugin-contributed command.
    pub fn run_console_command(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<Params, BuildError> {
        let commands = self.console_init()?;
        if !commands.iter().any(|c| c.name == name) {
            return Err(BuildError::UnknownCommand(name.to_string()));
        }
        let event = names::console(name);
        let params = Params::new().with("args", args.to_vec());
        self.bus
            .dispatch(&self.registry, &event, params)
            .map_err(|e| BuildError::phase(&event, e))
    }

    /// Start plugins and run discovery without firing any build event.
    pub fn check(&mut self, source: &dyn ContentSource) -> Result<CheckReport, BuildError> {
        self.start();
        let discovery = source.discover(&self.registry)?;
        Ok(CheckReport {
            registered: self.plugins.registered(),
            skipped: self.plugins.skipped(),
            files: discovery.files.into_iter().map(|f| f.path).collect(),
            failures: discovery
                .rejected
                .into_iter()
                .map(FileFailure::rejected)
                .collect(),
        })
    }

    /// Run the full phase sequence over everything `source` discovers.
    pub fn build(&mut self, source: &dyn ContentSource) -> Result<BuildReport, BuildError> {
        self.start();
        let mut report = BuildReport {
            registered: self.plugins.registered(),
            skipped: self.plugins.skipped(),
            fail_on_file_error: self
                .registry
                .config_bool(keys::FAIL_ON_FILE_ERROR)
                .unwrap_or(false),
            ..BuildReport::default()
        };

        log::info!("phase {}", names::CREATE);
        let created = self
            .bus
            .dispatch_with_report(&self.registry, names::CREATE, Params::new())
            .map_err(|e| BuildError::phase(names::CREATE, e))?;
        report.recovered.extend(created.recovered);

        let discovery = source.discover(&self.registry)?;
        for rejected in discovery.rejected {
            let failure = FileFailure::rejected(rejected);
            log::error!("{failure}");
            report.failures.push(failure);
        }
        log::info!("processing {} file(s)", discovery.files.len());

        for outcome in self.process_all(discovery.files)? {
            report.recovered.extend(outcome.recovered);
            match outcome.result {
                Ok(params) => {
                    if params.is_written() {
                        report.written.push(outcome.path.clone());
                    }
                    report.processed.push(outcome.path);
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        log::info!("phase {}", names::POST_LOOP);
        let summary = Params::new()
            .with("files_processed", report.processed.len())
            .with("files_written", report.written.len())
            .with("files_failed", report.failures.len());
        let finished = self
            .bus
            .dispatch_with_report(&self.registry, names::POST_LOOP, summary)
            .map_err(|e| BuildError::phase(names::POST_LOOP, e))?;
        report.recovered.extend(finished.recovered);

        Ok(report)
    }

    /// Run one file through the per-file chain, starting from a fresh bag.
    pub fn process_file(&self, file: SourceFile) -> FileOutcome {
        match self.advance(InFlight::new(file), &self.chain()) {
            Ok(flight) => flight.finish(),
            Err(outcome) => outcome,
        }
    }

    /// Dispatch `events` in order, stopping at the first fatal error.
    fn advance(&self, mut flight: InFlight, events: &[&str]) -> Result<InFlight, FileOutcome> {
        for event in events {
            match self.bus.dispatch_with_report(&self.registry, event, flight.params) {
                Ok(dispatch) => {
                    flight.params = dispatch.params;
                    flight.recovered.extend(dispatch.recovered);
                }
                Err(err) => {
                    let failure = FileFailure {
                        path: flight.path.clone(),
                        event: err.event,
                        owner: err.owner,
                        message: err.source.to_string(),
                    };
                    log::error!("{failure}");
                    return Err(FileOutcome {
                        path: flight.path,
                        result: Err(failure),
                        recovered: flight.recovered,
                    });
                }
            }
        }
        Ok(flight)
    }

    fn process_all(&self, files: Vec<SourceFile>) -> Result<Vec<FileOutcome>, BuildError> {
        let threads = self
            .registry
            .config(keys::MAX_PROCESSES)
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as usize;
        if threads <= 1 || files.len() <= 1 {
            return Ok(files.into_iter().map(|f| self.process_file(f)).collect());
        }
        log::debug!("rendering on {threads} worker(s)");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;

        // Routes are claimed in PRE_RENDER, which therefore stays in discovery order.
        let chain = self.chain();
        let (routing, rest) = chain.split_at(1);
        let routed: Vec<Result<InFlight, FileOutcome>> = files
            .into_iter()
            .map(|f| self.advance(InFlight::new(f), routing))
            .collect();
        Ok(pool.install(|| {
            routed
                .into_par_iter()
                .map(|flight| match flight.and_then(|f| self.advance(f, rest)) {
                    Ok(flight) => flight.finish(),
                    Err(outcome) => outcome,
                })
                .collect::<Vec<_>>()
        }))
    }
}

/// A file partway through its chain.
struct InFlight {
    path: PathBuf,
    params: Params,
    recovered: Vec<Recovered>,
}

impl InFlight {
    fn new(file: SourceFile) -> Self {
        Self {
            path: file.path.clone(),
            params: Params::for_file(file),
            recovered: Vec::new(),
        }
    }

    fn finish(self) -> FileOutcome {
        log::debug!("processed {}", self.path.display());
        FileOutcome {
            path: self.path,
            result: Ok(self.params),
            recovered: self.recovered,
        }
    }
}

fn parse_command(value: &Value) -> Option<ConsoleCommand> {
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    Some(ConsoleCommand {
        name: name.to_string(),
        about: value
            .get("about")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}
