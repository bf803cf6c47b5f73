//! Assigns each page its output path and URL.
//!
//! Runs early in `PRE_RENDER` so later listeners (at any priority) see
//! `output_path` and `extra.url` already set. The route comes from
//! [`naming::route`](crate::naming::route): ordering prefixes are stripped and
//! a `slug` in the front matter replaces the file's own name.
//!
//! Every output path is claimed in a [`RouteClaims`] service that `CREATE`
//! replaces with a fresh one. The first file to claim a route keeps it; a
//! later file with the same route (`010-about.md` and `about.md`, or
//! `about.md` and `about.html`) fails instead of overwriting it.

use super::config_path;
use crate::events::{ListenerError, names, priority};
use crate::naming::route;
use crate::params::Params;
use crate::plugin::{BuiltinPlugin, Plugin, PluginError, Registration};
use crate::registry::{Registry, keys};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Registry service key of the [`RouteClaims`] table.
pub const SERVICE: &str = "route_claims";

pub struct Paths;

inventory::submit! {
    BuiltinPlugin::new("paths", 10, create)
}

fn create() -> Box<dyn Plugin> {
    Box::new(Paths)
}

impl Plugin for Paths {
    fn name(&self) -> &str {
        "paths"
    }

    fn required_config(&self) -> &[&str] {
        &[keys::OUTPUT_DIR]
    }

    fn register(&self, registration: &mut Registration<'_>) -> Result<(), PluginError> {
        registration
            .on(names::CREATE, priority::NORMAL, |registry, params| {
                registry.set_service(SERVICE, RouteClaims::default());
                Ok(params)
            })
            .on(names::PRE_RENDER, priority::EARLY, assign_route);
        Ok(())
    }
}

/// Output paths handed out during one build, with the source that owns each.
#[derive(Debug, Default)]
pub struct RouteClaims(Mutex<BTreeMap<PathBuf, PathBuf>>);

impl RouteClaims {
    /// Claim `output` for `source`. Claiming again for the same source is a
    /// no-op; otherwise the current owner is returned as the error.
    pub fn claim(&self, output: &Path, source: &Path) -> Result<(), PathBuf> {
        let mut claims = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match claims.entry(output.to_path_buf()) {
            Entry::Vacant(slot) => {
                slot.insert(source.to_path_buf());
                Ok(())
            }
            Entry::Occupied(owner) if owner.get() == source => Ok(()),
            Entry::Occupied(owner) => Err(owner.get().clone()),
        }
    }

    /// Owner of `output`, if claimed.
    pub fn owner(&self, output: &Path) -> Option<PathBuf> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(output)
            .cloned()
    }
}

fn claims(registry: &Registry) -> Result<Arc<RouteClaims>, ListenerError> {
    registry
        .service::<RouteClaims>(SERVICE)
        .ok_or_else(|| ListenerError::fatal("route claims missing; CREATE did not run"))
}

fn assign_route(registry: &Registry, mut params: Params) -> Result<Params, ListenerError> {
    let Some(path) = params.file_path.clone() else {
        return Ok(params);
    };
    let output_dir = config_path(registry, keys::OUTPUT_DIR)?;
    let relative = match registry.config_str(keys::CONTENT_DIR) {
        Some(root) => path.strip_prefix(&root).unwrap_or(&path).to_path_buf(),
        None => path.clone(),
    };

    let route = route(&relative, params.meta_str("slug"))
        .map_err(|err| ListenerError::fatal(err.to_string()))?;
    let output = output_dir.join(&route.file);
    if let Err(owner) = claims(registry)?.claim(&output, &path) {
        return Err(ListenerError::fatal(format!(
            "route {} is already taken by {}; {} cannot be published there",
            route.url,
            owner.display(),
            path.display()
        )));
    }
    params.output_path = Some(output);
    params.set("url", route.url);
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry.set_config(keys::CONTENT_DIR, "/site/content");
        registry.set_config(keys::OUTPUT_DIR, "/site/public");
        registry.set_service(SERVICE, RouteClaims::default());
        registry
    }

    fn bag(path: &str) -> Params {
        Params {
            file_path: Some(PathBuf::from(path)),
            ..Params::default()
        }
    }

    #[test]
    fn routes_relative_to_content_dir() {
        let params = assign_route(&registry(), bag("/site/content/020-blog/010-hello.md")).unwrap();
        assert_eq!(
            params.output_path,
            Some(PathBuf::from("/site/public/blog/hello/index.html"))
        );
        assert_eq!(params.get_str("url"), Some("/blog/hello/"));
    }

    #[test]
    fn index_lands_at_output_root() {
        let params = assign_route(&registry(), bag("/site/content/index.md")).unwrap();
        assert_eq!(params.output_path, Some(PathBuf::from("/site/public/index.html")));
        assert_eq!(params.get_str("url"), Some("/"));
    }

    #[test]
    fn slug_metadata_wins() {
        let mut params = bag("/site/content/010-about.md");
        params.metadata.insert("slug".into(), json!("me"));
        let params = assign_route(&registry(), params).unwrap();
        assert_eq!(params.get_str("url"), Some("/me/"));
    }

    #[test]
    fn paths_outside_content_dir_are_used_as_is() {
        let params = assign_route(&registry(), bag("notes/today.md")).unwrap();
        assert_eq!(
            params.output_path,
            Some(PathBuf::from("/site/public/notes/today/index.html"))
        );
    }

    #[test]
    fn slug_cannot_escape_output_dir() {
        let mut params = bag("/site/content/a.md");
        params.metadata.insert("slug".into(), json!("../../escaped"));
        let err = assign_route(&registry(), params).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("../../escaped"));
    }

    #[test]
    fn second_file_on_a_route_fails_naming_both() {
        let registry = registry();
        let first = assign_route(&registry, bag("/site/content/010-about.md")).unwrap();
        let err = assign_route(&registry, bag("/site/content/about.html")).unwrap_err();

        assert!(err.is_fatal());
        let message = err.to_string();
        assert!(message.contains("/about/"), "{message}");
        assert!(message.contains("010-about.md"), "{message}");
        assert!(message.contains("about.html"), "{message}");

        let claims = registry.service::<RouteClaims>(SERVICE).unwrap();
        assert_eq!(
            claims.owner(first.output_path.as_deref().unwrap()),
            Some(PathBuf::from("/site/content/010-about.md"))
        );
    }

    #[test]
    fn same_file_may_claim_its_route_again() {
        let registry = registry();
        assign_route(&registry, bag("/site/content/about.md")).unwrap();
        assert!(assign_route(&registry, bag("/site/content/about.md")).is_ok());
    }

    #[test]
    fn routes_without_claims_table_fail() {
        let registry = Registry::new();
        registry.set_config(keys::OUTPUT_DIR, "/site/public");
        assert!(assign_route(&registry, bag("a.md")).unwrap_err().is_fatal());
    }

    #[test]
    fn bag_without_file_is_untouched() {
        let params = assign_route(&registry(), Params::new()).unwrap();
        assert_eq!(params, Params::new());
    }
}
