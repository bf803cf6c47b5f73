//! Content discovery.
//!
//! Enumerates the files a build will render. The orchestrator only sees the
//! [`ContentSource`] trait; [`FsSource`] is the on-disk implementation and
//! [`MemorySource`] serves embedders and tests.
//!
//! Only a missing content root or a failed directory walk stops discovery.
//! A single file that cannot be read or whose front matter does not parse is
//! returned as [`Rejected`] next to the files that loaded, and the build
//! reports it like any other file failure.
//!
//! ## Front Matter
//!
//! A source file may open with a TOML block fenced by `+++` lines. Its keys
//! become the file's initial metadata and the block is removed from the
//! content handed to listeners:
//!
//! ```text
//! +++
//! title = "Hello"
//! draft = true
//! +++
//! # Hello
//! ```

use crate::config::toml_to_json;
use crate::registry::{Registry, keys};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const FENCE: &str = "+++";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("content directory not found: {0}")]
    MissingContentDir(PathBuf),
    #[error("config key {0} is not set")]
    MissingConfig(&'static str),
    #[error("invalid front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unterminated front matter in {0}")]
    UnterminatedFrontMatter(PathBuf),
}

/// One discovered content file before any listener has seen it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl SourceFile {
    /// Split front matter off `raw` and build the file record.
    pub fn parse(path: impl Into<PathBuf>, raw: &str) -> Result<Self, DiscoveryError> {
        let path = path.into();
        let (metadata, content) = split_front_matter(&path, raw)?;
        Ok(Self {
            path,
            content: content.to_string(),
            metadata,
        })
    }
}

/// A file that was found but could not be loaded.
#[derive(Debug)]
pub struct Rejected {
    pub path: PathBuf,
    pub error: DiscoveryError,
}

/// Everything a source found.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Files to build, in the order they should be processed.
    pub files: Vec<SourceFile>,
    pub rejected: Vec<Rejected>,
}

impl From<Vec<SourceFile>> for Discovery {
    fn from(files: Vec<SourceFile>) -> Self {
        Self {
            files,
            rejected: Vec::new(),
        }
    }
}

pub trait ContentSource: Send + Sync {
    fn discover(&self, registry: &Registry) -> Result<Discovery, DiscoveryError>;
}

/// Walks `CONTENT_DIR` on disk.
///
/// Files are returned in sorted path order. Hidden entries (leading `.`) and
/// the `ASSETS_DIR` subtree are skipped, and only files whose extension is
/// listed in `EXTENSIONS` are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSource;

impl ContentSource for FsSource {
    fn discover(&self, registry: &Registry) -> Result<Discovery, DiscoveryError> {
        let root = registry
            .config_str(keys::CONTENT_DIR)
            .map(PathBuf::from)
            .ok_or(DiscoveryError::MissingConfig(keys::CONTENT_DIR))?;
        if !root.is_dir() {
            return Err(DiscoveryError::MissingContentDir(root));
        }
        let extensions = extensions(registry);
        let assets = registry
            .config_str(keys::ASSETS_DIR)
            .filter(|dir| !dir.is_empty())
            .map(|dir| root.join(dir));

        let walker = WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(is_hidden(entry.path()) || assets.as_deref() == Some(entry.path()))
            });

        let mut discovery = Discovery::default();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !has_extension(entry.path(), &extensions) {
                continue;
            }
            let path = entry.into_path();
            match load(&path) {
                Ok(file) => discovery.files.push(file),
                Err(error) => {
                    log::warn!("cannot load {}: {error}", path.display());
                    discovery.rejected.push(Rejected { path, error });
                }
            }
        }
        log::debug!(
            "discovered {} file(s) under {}, {} rejected",
            discovery.files.len(),
            root.display(),
            discovery.rejected.len()
        );
        Ok(discovery)
    }
}

fn load(path: &Path) -> Result<SourceFile, DiscoveryError> {
    let raw = fs::read_to_string(path)?;
    SourceFile::parse(path, &raw)
}

/// A fixed list of files, returned as given.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    files: Vec<SourceFile>,
}

impl MemorySource {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self { files }
    }

    /// Add a file, parsing front matter out of `raw`.
    pub fn with_file(mut self, path: impl Into<PathBuf>, raw: &str) -> Result<Self, DiscoveryError> {
        self.files.push(SourceFile::parse(path, raw)?);
        Ok(self)
    }
}

impl ContentSource for MemorySource {
    fn discover(&self, _registry: &Registry) -> Result<Discovery, DiscoveryError> {
        Ok(Discovery::from(self.files.clone()))
    }
}

fn extensions(registry: &Registry) -> Vec<String> {
    match registry.config(keys::EXTENSIONS) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect(),
        _ => vec!["md".to_string()],
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| extensions.contains(&ext))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

fn split_front_matter<'a>(
    path: &Path,
    raw: &'a str,
) -> Result<(Map<String, Value>, &'a str), DiscoveryError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = strip_fence_line(raw) else {
        return Ok((Map::new(), raw));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == FENCE {
            let block = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let table: toml::Table =
                toml::from_str(block).map_err(|source| DiscoveryError::FrontMatter {
                    path: path.to_path_buf(),
                    source,
                })?;
            let metadata = table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect();
            return Ok((metadata, body));
        }
        offset += line.len();
    }
    Err(DiscoveryError::UnterminatedFrontMatter(path.to_path_buf()))
}

/// The text after an opening `+++` line, if `raw` starts with one.
fn strip_fence_line(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(FENCE)?;
    let (line, after) = match rest.find('\n') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (rest, ""),
    };
    line.trim().is_empty().then_some(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::site_with;
    use serde_json::json;

    fn names(files: &[SourceFile], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                f.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn walks_in_sorted_order_with_extension_filter() {
        let (tmp, registry) = site_with(&[
            ("020-blog/010-hello.md", "hi"),
            ("010-about.md", "about"),
            ("020-blog/notes.txt", "skip"),
            ("index.html", "<p>home</p>"),
        ]);
        let files = FsSource.discover(&registry).unwrap().files;
        assert_eq!(
            names(&files, &tmp.path().join("content")),
            ["010-about.md", "020-blog/010-hello.md", "index.html"]
        );
    }

    #[test]
    fn skips_hidden_entries_and_assets() {
        let (tmp, registry) = site_with(&[
            (".draft.md", "x"),
            (".git/config.md", "x"),
            ("assets/readme.md", "x"),
            ("page.md", "y"),
        ]);
        let files = FsSource.discover(&registry).unwrap().files;
        assert_eq!(names(&files, &tmp.path().join("content")), ["page.md"]);
    }

    #[test]
    fn unreadable_files_are_rejected_without_stopping_discovery() {
        let (tmp, registry) = site_with(&[
            ("a.md", "# A"),
            ("b.md", "+++\ntitle = \n+++\n"),
            ("c.md", "# C"),
        ]);
        let content = tmp.path().join("content");
        fs::write(content.join("d.md"), [0xffu8, 0xfe, 0x00, 0x41]).unwrap();

        let discovery = FsSource.discover(&registry).unwrap();

        assert_eq!(names(&discovery.files, &content), ["a.md", "c.md"]);
        let rejected: Vec<_> = discovery
            .rejected
            .iter()
            .map(|r| r.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(rejected, ["b.md", "d.md"]);
        assert!(matches!(
            discovery.rejected[0].error,
            DiscoveryError::FrontMatter { .. }
        ));
        assert!(matches!(discovery.rejected[1].error, DiscoveryError::Io(_)));
    }

    #[test]
    fn missing_content_dir_is_an_error() {
        let registry = Registry::new();
        registry.set_config(keys::CONTENT_DIR, "/definitely/not/here");
        assert!(matches!(
            FsSource.discover(&registry),
            Err(DiscoveryError::MissingContentDir(_))
        ));
    }

    #[test]
    fn unset_content_dir_is_an_error() {
        assert!(matches!(
            FsSource.discover(&Registry::new()),
            Err(DiscoveryError::MissingConfig(keys::CONTENT_DIR))
        ));
    }

    #[test]
    fn front_matter_becomes_metadata() {
        let file = SourceFile::parse(
            "a.md",
            "+++\ntitle = \"Hello\"\ndraft = true\ntags = [\"x\"]\n+++\n# Body\n",
        )
        .unwrap();
        assert_eq!(file.content, "# Body\n");
        assert_eq!(file.metadata.get("title"), Some(&json!("Hello")));
        assert_eq!(file.metadata.get("draft"), Some(&json!(true)));
        assert_eq!(file.metadata.get("tags"), Some(&json!(["x"])));
    }

    #[test]
    fn no_front_matter_keeps_content() {
        let file = SourceFile::parse("a.md", "# Just text\n+++\n").unwrap();
        assert!(file.metadata.is_empty());
        assert_eq!(file.content, "# Just text\n+++\n");
    }

    #[test]
    fn bad_front_matter_names_the_file() {
        let err = SourceFile::parse("bad.md", "+++\ntitle = \n+++\n").unwrap_err();
        assert!(err.to_string().contains("bad.md"));
    }

    #[test]
    fn unterminated_front_matter_is_an_error() {
        assert!(matches!(
            SourceFile::parse("open.md", "+++\ntitle = \"x\"\n"),
            Err(DiscoveryError::UnterminatedFrontMatter(_))
        ));
    }

    #[test]
    fn memory_source_returns_files_in_order() {
        let source = MemorySource::default()
            .with_file("b.md", "B")
            .unwrap()
            .with_file("a.md", "A")
            .unwrap();
        let files = source.discover(&Registry::new()).unwrap().files;
        let paths: Vec<_> = files.iter().map(|f| f.path.clone()).collect();
        assert_eq!(paths, [PathBuf::from("b.md"), PathBuf::from("a.md")]);
    }
}
