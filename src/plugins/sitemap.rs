//! `sitemap.xml` for every page that was written.
//!
//! Needs an absolute `BASE_URL`, so the plugin is skipped when none is
//! configured. URLs are gathered in a [`SitemapUrls`] service that `CREATE`
//! replaces with a fresh one, recorded after the writer has run, and written
//! out sorted in `POST_LOOP`.

use super::config_path;
use crate::events::{ListenerError, names, priority};
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use maud::{PreEscaped, html};
use std::collections::BTreeSet;
use std::fs;
use std::sync::{Mutex, PoisonError};

/// Registry service key of the [`SitemapUrls`] collector.
pub const SERVICE: &str = "sitemap_urls";
pub const FILE_NAME: &str = "sitemap.xml";

pub struct Sitemap;

inventory::submit! {
    BuiltinPlugin::new("sitemap", 60, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Sitemap)
}

impl Plugin for Sitemap {
    fn name(&self) -> &str {
        "sitemap"
    }

    fn required_config(&self) -> &[&str] {
        &[keys::BASE_URL, keys::OUTPUT_DIR]
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration
            .on(names::CREATE, priority::NORMAL, |registry, params| {
                registry.set_service(SERVICE, SitemapUrls::default());
                Ok(params)
            })
            .on(names::POST_RENDER, priority::WRITE + 10, record_page)
            .on(names::POST_LOOP, priority::NORMAL, write_sitemap);
        Ok(())
    }
}

/// Site-relative URLs of the pages written during one build.
#[derive(Debug, Default)]
pub struct SitemapUrls(Mutex<BTreeSet<String>>);

impl SitemapUrls {
    pub fn record(&self, url: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string());
    }

    /// Recorded URLs in sorted order.
    pub fn urls(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

fn collector(registry: &Registry) -> Result<std::sync::Arc<SitemapUrls>, ListenerError> {
    registry
        .service::<SitemapUrls>(SERVICE)
        .ok_or_else(|| ListenerError::fatal("sitemap collector missing; CREATE did not run"))
}

fn record_page(registry: &Registry, params: Params) -> Result<Params, ListenerError> {
    if !params.is_written() {
        return Ok(params);
    }
    if let Some(url) = params.get_str("url") {
        collector(registry)?.record(url);
    }
    Ok(params)
}

fn write_sitemap(registry: &Registry, params: Params) -> Result<Params, ListenerError> {
    let base = registry
        .config_str(keys::BASE_URL)
        .ok_or_else(|| ListenerError::fatal("config key BASE_URL is not set"))?;
    let output_dir = config_path(registry, keys::OUTPUT_DIR)?;
    let urls = collector(registry)?.urls();

    fs::create_dir_all(&output_dir)?;
    fs::write(output_dir.join(FILE_NAME), render(&base, &urls))?;
    log::info!("sitemap: {} url(s)", urls.len());
    Ok(params)
}

/// Sitemap XML for `urls`, each prefixed with `base`.
pub fn render(base: &str, urls: &[String]) -> String {
    let base = base.trim_end_matches('/');
    html! {
        (PreEscaped(r#"<?xml version="1.0" encoding="UTF-8"?>"#))
        urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" {
            @for path in urls {
                url { loc { (base) (path) } }
            }
        }
    }
    .into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::plugin::{PluginManager, PluginState};
    use tempfile::TempDir;

    #[test]
    fn render_escapes_and_prefixes() {
        let xml = render("https://example.com/", &["/a/?x=1&y=2".to_string()]);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<loc>https://example.com/a/?x=1&amp;y=2</loc>"));
    }

    #[test]
    fn skipped_without_base_url() {
        let registry = Registry::new();
        registry.set_config(keys::OUTPUT_DIR, "public");
        let bus = EventBus::new();
        let mut manager = PluginManager::new();
        manager.add(Sitemap);
        manager.start(&registry, &bus);

        assert!(matches!(manager.state("sitemap"), Some(PluginState::Skipped { .. })));
        assert_eq!(bus.listener_count(names::POST_LOOP), 0);
    }

    #[test]
    fn records_only_written_pages_and_writes_sorted() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new();
        registry.set_config(keys::BASE_URL, "https://example.com");
        registry.set_config(keys::OUTPUT_DIR, tmp.path().to_string_lossy().as_ref());
        let bus = EventBus::new();
        let mut manager = PluginManager::new();
        manager.add(Sitemap);
        manager.start(&registry, &bus);

        bus.dispatch(&registry, names::CREATE, Params::new()).unwrap();
        for (url, written) in [("/zeta/", true), ("/draft/", false), ("/alpha/", true)] {
            let mut params = Params::new().with("url", url);
            params.rendered_content = Some("<html>".into());
            if written {
                params.mark_written();
            }
            bus.dispatch(&registry, names::POST_RENDER, params).unwrap();
        }
        bus.dispatch(&registry, names::POST_LOOP, Params::new()).unwrap();

        let xml = fs::read_to_string(tmp.path().join(FILE_NAME)).unwrap();
        let alpha = xml.find("https://example.com/alpha/").unwrap();
        let zeta = xml.find("https://example.com/zeta/").unwrap();
        assert!(alpha < zeta);
        assert!(!xml.contains("draft"));
    }

    #[test]
    fn create_resets_the_collector() {
        let registry = Registry::new();
        registry.set_config(keys::BASE_URL, "https://example.com");
        registry.set_config(keys::OUTPUT_DIR, "public");
        let bus = EventBus::new();
        let mut manager = PluginManager::new();
        manager.add(Sitemap);
        manager.start(&registry, &bus);

        bus.dispatch(&registry, names::CREATE, Params::new()).unwrap();
        collector(&registry).unwrap().record("/old/");
        bus.dispatch(&registry, names::CREATE, Params::new()).unwrap();
        assert!(collector(&registry).unwrap().urls().is_empty());
    }
}
