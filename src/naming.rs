//! Centralized filename parsing for the NNN-name convention.
//!
//! Content files and directories may carry an optional numeric prefix
//! (`NNN-`) that orders them on disk without leaking into URLs. This module
//! parses that convention and maps a content-relative path to the route a page
//! is published under.
//!
//! ## Routes
//!
//! ```text
//! index.md                  → index.html               /
//! 010-about.md              → about/index.html         /about/
//! 020-blog/index.md         → blog/index.html          /blog/
//! 020-blog/010-hello.md     → blog/hello/index.html    /blog/hello/
//! ```
//!
//! Dashes in the name portion are converted to spaces for display:
//! `040-who-am-i.md` → "who am i".

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Result of parsing a numbered entry name like `020-Release-Notes`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    /// Number prefix if present (e.g., `20` from `020-Release-Notes`)
    pub number: Option<u32>,
    /// Raw name part after `NNN-`, dashes preserved. Empty if number-only.
    /// For unnumbered entries, this is the full input.
    pub name: String,
    /// Display title: name with dashes converted to spaces.
    pub display_title: String,
}

/// Parse an entry name following the `NNN-name` convention.
///
/// Handles these patterns:
/// - `"020-Release-Notes"` → number=Some(20), name="Release-Notes", display_title="Release Notes"
/// - `"010-blog"` → number=Some(10), name="blog", display_title="blog"
/// - `"001"` → number=Some(1), name="", display_title=""
/// - `"001-"` → number=Some(1), name="", display_title=""
/// - `"about"` → number=None, name="about", display_title="about"
/// - `"wip-drafts"` → number=None, name="wip-drafts", display_title="wip drafts"
pub fn parse_entry_name(name: &str) -> ParsedName {
    // Try splitting on first dash
    if let Some(dash_pos) = name.find('-') {
        let prefix = &name[..dash_pos];
        if let Ok(num) = prefix.parse::<u32>() {
            let raw = &name[dash_pos + 1..];
            return ParsedName {
                number: Some(num),
                name: raw.to_string(),
                display_title: raw.replace('-', " "),
            };
        }
    }
    // Check if the entire string is a pure number (no dash)
    if let Ok(num) = name.parse::<u32>() {
        return ParsedName {
            number: Some(num),
            name: String::new(),
            display_title: String::new(),
        };
    }
    // No number prefix
    ParsedName {
        number: None,
        name: name.to_string(),
        display_title: name.replace('-', " "),
    }
}

/// Where a page is published, relative to the output root.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Output file relative to the output root, always ending in `index.html`.
    pub file: PathBuf,
    /// Site-relative URL with leading and trailing slash.
    pub url: String,
}

/// A front-matter slug that would publish outside the page's own directory.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid slug '{0}': only plain relative path segments are allowed")]
pub struct InvalidSlug(pub String);

/// Route for a content file given its path relative to the content root.
///
/// Every directory segment and the file stem go through [`parse_entry_name`].
/// `slug` replaces the file's own segment when set and may span several
/// segments (`2024/launch`). A slug with `..`, a root or a drive prefix is
/// rejected. A stem of `index` (and no slug) publishes at its directory.
pub fn route(relative: &Path, slug: Option<&str>) -> Result<Route, InvalidSlug> {
    let mut segments: Vec<String> = Vec::new();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            if let Component::Normal(dir) = component {
                segments.push(clean_segment(&dir.to_string_lossy()));
            }
        }
    }

    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => segments.extend(slug_segments(slug)?),
        None if stem == "index" => {}
        None => segments.push(clean_segment(&stem)),
    }
    segments.retain(|s| !s.is_empty());

    let mut file = PathBuf::new();
    for segment in &segments {
        file.push(segment);
    }
    file.push("index.html");

    let url = if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    };
    Ok(Route { file, url })
}

/// Split a slug into path segments, refusing anything but normal components.
fn slug_segments(slug: &str) -> Result<Vec<String>, InvalidSlug> {
    let mut segments = Vec::new();
    for component in Path::new(slug.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(InvalidSlug(slug.to_string()));
            }
        }
    }
    Ok(segments)
}

/// Strip the number prefix, keeping the raw segment when nothing else is left.
fn clean_segment(segment: &str) -> String {
    let parsed = parse_entry_name(segment);
    if parsed.name.is_empty() {
        segment.to_string()
    } else {
        parsed.name
    }
}
