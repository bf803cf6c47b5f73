//! Writes rendered pages to disk.
//!
//! Subscribed at [`priority::WRITE`], after every other `POST_RENDER`
//! listener has had its chance to adjust `output_path`. A bag without
//! `rendered_content` or `output_path` is left alone; a written one is marked
//! with [`Params::mark_written`] so the build report can tell them apart.

use crate::events::{ListenerError, names, priority};
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::Registry;
use std::fs;

pub struct Writer;

inventory::submit! {
    BuiltinPlugin::new("writer", 50, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Writer)
}

impl Plugin for Writer {
    fn name(&self) -> &str {
        "writer"
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration.on(names::POST_RENDER, priority::WRITE, write_page);
        Ok(())
    }
}

fn write_page(_registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    let (Some(content), Some(path)) = (&params.rendered_content, &params.output_path) else {
        return Ok(params);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    log::debug!("wrote {}", path.display());
    params.mark_written();
    Ok(params)
}
