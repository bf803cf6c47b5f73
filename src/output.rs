//! CLI output formatting for build results.
//!
//! # Information-First Display
//!
//! Output lists what happened to each entity (plugin, file) with a positional
//! index, and puts detail such as skip reasons and error messages on indented
//! context lines underneath. Paths are shown relative to the content root.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Plugins
//! 001 paths
//! 002 markdown
//!     Skipped: sitemap (missing config key(s): BASE_URL)
//!
//! Built
//! 001 010-about.md
//! 002 020-blog/010-hello.md
//!
//! Not written
//! 001 020-blog/030-wip.md
//!
//! Failed
//! 001 020-blog/020-broken.md
//!     'markdown' failed on MARKDOWN: cannot parse
//!
//! Warnings
//!     020-blog/030-wip.md: 'layout' on TEMPLATE: draft, not rendered
//!
//! Built 2 files, 1 not written, 1 failed, 1 warning
//! ```
//!
//! The "not written" count only appears when some file finished its chain
//! without output.
//!
//! ## Plugins
//!
//! ```text
//! 001 paths        registered (1 listener)
//! 006 sitemap      skipped: missing config key(s): BASE_URL
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::events::Recovered;
use crate::pipeline::{BuildReport, CheckReport, ConsoleCommand, FileFailure};
use crate::plugin::PluginRecord;
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Truncate text to `max` characters, appending `...` if truncated.
fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `path` relative to `root` when it lives underneath, otherwise as given.
fn display_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn recovered_line(recovered: &Recovered, root: &Path) -> String {
    let message = truncate(&recovered.message, 120);
    match &recovered.file {
        Some(file) => format!(
            "{}{}: '{}' on {}: {}",
            indent(1),
            display_path(file, root),
            recovered.owner,
            recovered.event,
            message
        ),
        None => format!(
            "{}'{}' on {}: {}",
            indent(1),
            recovered.owner,
            recovered.event,
            message
        ),
    }
}

fn path_section<P: AsRef<Path>>(lines: &mut Vec<String>, title: &str, paths: &[P], root: &Path) {
    if paths.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(title.to_string());
    for (i, path) in paths.iter().enumerate() {
        lines.push(format!(
            "{} {}",
            format_index(i + 1),
            display_path(path.as_ref(), root)
        ));
    }
}

fn failure_section(lines: &mut Vec<String>, failures: &[FileFailure], root: &Path) {
    if failures.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push("Failed".to_string());
    for (i, failure) in failures.iter().enumerate() {
        lines.push(format!(
            "{} {}",
            format_index(i + 1),
            display_path(&failure.path, root)
        ));
        lines.push(format!(
            "{}'{}' failed on {}: {}",
            indent(1),
            failure.owner,
            failure.event,
            truncate(&failure.message, 120)
        ));
    }
}

fn plugin_section(registered: &[String], skipped: &[(String, String)]) -> Vec<String> {
    let mut lines = vec!["Plugins".to_string()];
    for (i, name) in registered.iter().enumerate() {
        lines.push(format!("{} {}", format_index(i + 1), name));
    }
    for (name, reason) in skipped {
        lines.push(format!("{}Skipped: {} ({})", indent(1), name, reason));
    }
    lines
}

// ============================================================================
// Build
// ============================================================================

/// Format the end-of-build summary.
pub fn format_build_report(report: &BuildReport, content_root: &Path) -> Vec<String> {
    let mut lines = plugin_section(&report.registered, &report.skipped);

    let unwritten = report.unwritten();
    path_section(&mut lines, "Built", &report.written, content_root);
    path_section(&mut lines, "Not written", &unwritten, content_root);
    failure_section(&mut lines, &report.failures, content_root);

    if !report.recovered.is_empty() {
        lines.push(String::new());
        lines.push("Warnings".to_string());
        for recovered in &report.recovered {
            lines.push(recovered_line(recovered, content_root));
        }
    }

    let not_written = match unwritten.len() {
        0 => String::new(),
        n => format!(", {n} not written"),
    };
    lines.push(String::new());
    lines.push(format!(
        "Built {}{}, {} failed, {}",
        plural(report.written.len(), "file"),
        not_written,
        report.failures.len(),
        plural(report.recovered.len(), "warning")
    ));
    lines
}

/// Print the build summary to stdout.
pub fn print_build_report(report: &BuildReport, content_root: &Path) {
    for line in format_build_report(report, content_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

/// Format the result of `check`: plugin states and the files a build would
/// process.
pub fn format_check_report(report: &CheckReport, content_root: &Path) -> Vec<String> {
    let mut lines = plugin_section(&report.registered, &report.skipped);
    lines.push(String::new());
    lines.push("Content".to_string());
    for (i, path) in report.files.iter().enumerate() {
        lines.push(format!(
            "{} {}",
            format_index(i + 1),
            display_path(path, content_root)
        ));
    }
    failure_section(&mut lines, &report.failures, content_root);
    lines.push(String::new());
    lines.push(format!(
        "Found {}, {} unreadable",
        plural(report.files.len(), "file"),
        report.failures.len()
    ));
    lines
}

pub fn print_check_report(report: &CheckReport, content_root: &Path) {
    for line in format_check_report(report, content_root) {
        println!("{}", line);
    }
}

// ============================================================================
// Plugins and commands
// ============================================================================

/// Format every known plugin with its lifecycle state, in discovery order.
pub fn format_plugins(records: &[PluginRecord]) -> Vec<String> {
    let width = records.iter().map(|r| r.name().len()).max().unwrap_or(0);
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            format!(
                "{} {:<width$}  {}",
                format_index(i + 1),
                record.name(),
                record.state()
            )
        })
        .collect()
}

pub fn print_plugins(records: &[PluginRecord]) {
    for line in format_plugins(records) {
        println!("{}", line);
    }
}

/// Format plugin-contributed commands, one per line.
pub fn format_console_commands(commands: &[ConsoleCommand]) -> Vec<String> {
    if commands.is_empty() {
        return Vec::new();
    }
    let mut lines = vec!["Plugin commands".to_string()];
    for command in commands {
        lines.push(format!("{}{:<12} {}", indent(1), command.name, command.about));
    }
    lines
}

pub fn print_console_commands(commands: &[ConsoleCommand]) {
    for line in format_console_commands(commands) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
