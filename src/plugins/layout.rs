//! Page layout.
//!
//! Wraps `html_content` in a full HTML document built with Maud and stores it
//! in `rendered_content`. Drafts (`draft = true` in the front matter) are
//! refused with a recoverable error, so they reach `POST_RENDER` without
//! rendered content and the writer skips them.

use crate::events::{ListenerError, names, priority};
use crate::naming::parse_entry_name;
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use maud::{DOCTYPE, Markup, PreEscaped, html};

const CSS: &str = "\
body{max-width:42rem;margin:0 auto;padding:2rem 1rem;font-family:system-ui,sans-serif;line-height:1.6;color:#111}\
header.site-header{margin-bottom:2rem;border-bottom:1px solid #e0e0e0}\
header.site-header a{color:#333;text-decoration:none;font-weight:600}\
pre{overflow-x:auto;background:#f5f5f5;padding:1rem}";

pub struct Layout;

inventory::submit! {
    BuiltinPlugin::new("layout", 40, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Layout)
}

impl Plugin for Layout {
    fn name(&self) -> &str {
        "layout"
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration.on(names::TEMPLATE, priority::NORMAL, render_page);
        Ok(())
    }
}

fn render_page(registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    if params.meta_bool("draft") == Some(true) {
        return Err(ListenerError::recoverable("draft, not rendered"));
    }
    let Some(body) = params.html_content.as_deref() else {
        return Ok(params);
    };

    let site_title = registry.config_str(keys::SITE_TITLE).unwrap_or_default();
    let page_title = page_title(&params).unwrap_or_else(|| site_title.clone());
    let canonical = match (registry.config_str(keys::BASE_URL), params.get_str("url")) {
        (Some(base), Some(url)) => Some(format!("{base}{url}")),
        _ => None,
    };

    let page = base_document(
        &page_title,
        &site_title,
        canonical.as_deref(),
        html! { (PreEscaped(body)) },
    );
    params.rendered_content = Some(page.into_string());
    Ok(params)
}

/// Front-matter title, else the file's display name.
fn page_title(params: &Params) -> Option<String> {
    if let Some(title) = params.meta_str("title") {
        return Some(title.to_string());
    }
    let stem = params.file_path.as_deref()?.file_stem()?.to_string_lossy();
    let parsed = parse_entry_name(&stem);
    (!parsed.display_title.is_empty() && stem != "index").then_some(parsed.display_title)
}

fn base_document(title: &str, site_title: &str, canonical: Option<&str>, content: Markup) -> Markup {
    let full_title = if title == site_title || site_title.is_empty() {
        title.to_string()
    } else {
        format!("{title} | {site_title}")
    };
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { (full_title) }
                @if let Some(href) = canonical {
                    link rel="canonical" href=(href);
                }
                style { (PreEscaped(CSS)) }
            }
            body {
                header.site-header {
                    a href="/" { (site_title) }
                }
                main {
                    article {
                        (content)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.set_config(keys::SITE_TITLE, "Notebook");
        registry
    }

    fn bag(path: &str, html: &str) -> Params {
        Params {
            file_path: Some(path.into()),
            html_content: Some(html.into()),
            ..Params::default()
        }
    }

    #[test]
    fn wraps_body_in_document() {
        let params = render_page(&registry(), bag("a.md", "<p>hi</p>")).unwrap();
        let page = params.rendered_content.unwrap();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<article><p>hi</p></article>"));
        assert!(page.contains("Notebook"));
    }

    #[test]
    fn title_from_metadata_then_filename() {
        let mut params = bag("010-getting-started.md", "");
        let page = render_page(&registry(), params.clone()).unwrap().rendered_content.unwrap();
        assert!(page.contains("<title>getting started | Notebook</title>"));

        params.metadata.insert("title".into(), json!("Welcome"));
        let page = render_page(&registry(), params).unwrap().rendered_content.unwrap();
        assert!(page.contains("<title>Welcome | Notebook</title>"));
    }

    #[test]
    fn index_uses_site_title() {
        let page = render_page(&registry(), bag("index.md", ""))
            .unwrap()
            .rendered_content
            .unwrap();
        assert!(page.contains("<title>Notebook</title>"));
    }

    #[test]
    fn title_is_escaped() {
        let mut params = bag("a.md", "");
        params.metadata.insert("title".into(), json!("<script>"));
        let page = render_page(&registry(), params).unwrap().rendered_content.unwrap();
        assert!(page.contains("&lt;script&gt;"));
    }

    #[test]
    fn canonical_link_needs_base_url() {
        let registry = registry();
        let params = bag("a.md", "").with("url", "/a/");
        let page = render_page(&registry, params.clone()).unwrap().rendered_content.unwrap();
        assert!(!page.contains("canonical"));

        registry.set_config(keys::BASE_URL, "https://example.com");
        let page = render_page(&registry, params).unwrap().rendered_content.unwrap();
        assert!(page.contains(r#"href="https://example.com/a/""#));
    }

    #[test]
    fn drafts_are_refused() {
        let mut params = bag("a.md", "<p>wip</p>");
        params.metadata.insert("draft".into(), json!(true));
        let err = render_page(&registry(), params).unwrap_err();
        assert!(!err.is_fatal());
    }
}
