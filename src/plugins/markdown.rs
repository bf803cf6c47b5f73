//! Markdown to HTML.
//!
//! Converts `file_content` into `html_content` with pulldown-cmark. Files with
//! an `.html` or `.htm` extension are already HTML and are copied across
//! unchanged. A page without a `title` in its front matter takes the text of
//! its first `# ` heading.

use crate::events::{ListenerError, names, priority};
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::Registry;
use pulldown_cmark::{Options, Parser, html as md_html};
use serde_json::Value;
use std::path::Path;

pub struct Markdown;

inventory::submit! {
    BuiltinPlugin::new("markdown", 30, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Markdown)
}

impl Plugin for Markdown {
    fn name(&self) -> &str {
        "markdown"
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration.on(names::MARKDOWN, priority::NORMAL, convert);
        Ok(())
    }
}

fn convert(_registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    let Some(content) = params.file_content.as_deref() else {
        return Ok(params);
    };

    let html = if params.file_path.as_deref().is_some_and(is_html) {
        content.to_string()
    } else {
        render(content)
    };
    let heading = first_heading(content);

    if !params.metadata.contains_key("title")
        && let Some(title) = heading
    {
        params.metadata.insert("title".into(), Value::String(title));
    }
    params.html_content = Some(html);
    Ok(params)
}

/// Render CommonMark plus tables, footnotes, strikethrough and task lists.
pub fn render(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    let parser = Parser::new_ext(markdown, options);
    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    md_html::push_html(&mut html, parser);
    html
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| ext == "html" || ext == "htm")
}

fn first_heading(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(path: &str, content: &str) -> Params {
        Params {
            file_path: Some(path.into()),
            file_content: Some(content.into()),
            ..Params::default()
        }
    }

    #[test]
    fn markdown_becomes_html() {
        let params = convert(&Registry::new(), bag("a.md", "# Hello\n\nSome *text*.")).unwrap();
        let html = params.html_content.unwrap();
        assert!(html.contains("<h1>Hello</h1>"));
        assert!(html.contains("<em>text</em>"));
    }

    #[test]
    fn title_comes_from_first_heading() {
        let params = convert(&Registry::new(), bag("a.md", "intro\n# Hello World \n# Second")).unwrap();
        assert_eq!(params.meta_str("title"), Some("Hello World"));
    }

    #[test]
    fn front_matter_title_is_kept() {
        let mut params = bag("a.md", "# Heading");
        params.metadata.insert("title".into(), json!("Chosen"));
        let params = convert(&Registry::new(), params).unwrap();
        assert_eq!(params.meta_str("title"), Some("Chosen"));
    }

    #[test]
    fn html_sources_pass_through() {
        let params = convert(&Registry::new(), bag("page.HTML", "<p>*raw*</p>")).unwrap();
        assert_eq!(params.html_content.as_deref(), Some("<p>*raw*</p>"));
    }

    #[test]
    fn tables_are_enabled() {
        let html = render("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn bag_without_content_is_untouched() {
        let params = convert(&Registry::new(), Params::new()).unwrap();
        assert!(params.html_content.is_none());
    }
}
