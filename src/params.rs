//! The parameter bag threaded through every listener chain.
//!
//! A `Params` value is the working state of one content file (or one
//! whole-build phase such as `CREATE`) while it moves through the event bus.
//! The fields every stage agrees on are typed; anything feature-specific goes
//! in `extra`, keyed by name.
//!
//! By convention the fields fill up in pipeline order:
//!
//! ```text
//! discovery     file_path, file_content, metadata
//! PRE_RENDER    output_path, extra.url
//! MARKDOWN      html_content
//! TEMPLATE      rendered_content
//! POST_RENDER   written to output_path, extra.written
//! ```
//!
//! The core never reads these fields itself. It only looks at
//! `extra.written` to tell pages that reached the disk from files that went
//! through the chain without output (drafts, or no layout).

use crate::discover::SourceFile;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// `extra` key set by the listener that persisted the page.
pub const WRITTEN: &str = "written";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Feature-specific values that have no dedicated field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh bag for one discovered file. Nothing from any other file's bag
    /// is carried over.
    pub fn for_file(file: SourceFile) -> Self {
        Self {
            file_path: Some(file.path),
            file_content: Some(file.content),
            metadata: file.metadata,
            ..Self::default()
        }
    }

    /// Builder-style insert into `extra`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn meta_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(Value::as_bool)
    }

    pub fn mark_written(&mut self) {
        self.set(WRITTEN, true);
    }

    /// True once some listener has put this page on disk.
    pub fn is_written(&self) -> bool {
        self.get(WRITTEN).and_then(Value::as_bool).unwrap_or(false)
    }
}
