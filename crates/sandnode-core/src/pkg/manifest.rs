//! Package manifest (`package.json`) model.
//!
//! Only the fields that drive resolution are modeled. Parsing during
//! resolution is lenient: an unparsable manifest is treated as empty.

use dashmap::DashMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Manifest file name.
pub const MANIFEST_NAME: &str = "package.json";

/// Entry used when a manifest declares neither `main` nor `files`.
pub const DEFAULT_MAIN: &str = "index.js";

/// A package manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default, deserialize_with = "string_or_none")]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "string_or_none")]
    pub version: Option<String>,

    #[serde(default, deserialize_with = "string_or_none")]
    pub main: Option<String>,

    #[serde(default, deserialize_with = "strings_or_empty")]
    pub files: Vec<String>,

    #[serde(default, deserialize_with = "browser_or_none")]
    pub browser: Option<BrowserField>,

    #[serde(default, deserialize_with = "ranges_or_empty")]
    pub dependencies: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "ranges_or_empty")]
    pub dev_dependencies: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "ranges_or_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
}

/// The `browser` field: an alternate entry point or a remapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrowserField {
    Entry(String),
    Map(BTreeMap<String, BrowserTarget>),
}

/// Right-hand side of a `browser` map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrowserTarget {
    Path(String),
    /// `false` disables the module; `true` is ignored.
    Flag(bool),
}

/// Outcome of looking a specifier up in the `browser` map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    Replace(String),
    Disabled,
}

/// How a dependency was declared in the root manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Dev,
    Optional,
    Regular,
}

impl Manifest {
    /// Strict parse.
    ///
    /// # Errors
    /// Returns the JSON error if `text` is not a manifest object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse, logging and falling back to an empty manifest on failure.
    #[must_use]
    pub fn parse_lenient(text: &str, path: &str) -> Self {
        match Self::parse(text) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path, error = %e, "ignoring unparsable package.json");
                Self::default()
            }
        }
    }

    /// Declared entry point: the string `browser` field, else `main`.
    #[must_use]
    pub fn entry_point(&self) -> Option<&str> {
        match &self.browser {
            Some(BrowserField::Entry(entry)) if !entry.is_empty() => Some(entry),
            _ => self.main.as_deref().filter(|m| !m.is_empty()),
        }
    }

    /// Entry point, falling back to the first listed file, then `index.js`.
    #[must_use]
    pub fn main_entry(&self) -> &str {
        self.entry_point()
            .or_else(|| self.files.first().map(String::as_str))
            .unwrap_or(DEFAULT_MAIN)
    }

    /// Look `specifier` up in the `browser` map.
    ///
    /// Relative keys also match with a `.js` suffix added.
    #[must_use]
    pub fn substitute(&self, specifier: &str) -> Option<Substitution> {
        let Some(BrowserField::Map(map)) = &self.browser else {
            return None;
        };
        let target = map.get(specifier).or_else(|| {
            if sandnode_util::vpath::is_relative(specifier) {
                map.get(&format!("{specifier}.js"))
            } else {
                None
            }
        })?;
        match target {
            BrowserTarget::Path(path) => Some(Substitution::Replace(path.clone())),
            BrowserTarget::Flag(false) => Some(Substitution::Disabled),
            BrowserTarget::Flag(true) => None,
        }
    }

    /// Declared dependency names: dev, optional, then regular, deduplicated.
    #[must_use]
    pub fn declared_dependencies(&self) -> Vec<(&str, DependencyKind)> {
        let mut out: Vec<(&str, DependencyKind)> = Vec::new();
        let groups = [
            (&self.dev_dependencies, DependencyKind::Dev),
            (&self.optional_dependencies, DependencyKind::Optional),
            (&self.dependencies, DependencyKind::Regular),
        ];
        for (deps, kind) in groups {
            for name in deps.keys() {
                if let Some(existing) = out.iter_mut().find(|(n, _)| *n == name.as_str()) {
                    // A regular declaration overrides an earlier optional one.
                    if kind == DependencyKind::Regular {
                        existing.1 = kind;
                    }
                } else {
                    out.push((name.as_str(), kind));
                }
            }
        }
        out
    }

    /// `name@version`, with an empty version when none is declared.
    #[must_use]
    pub fn id(&self) -> String {
        format!(
            "{}@{}",
            self.name.as_deref().unwrap_or_default(),
            self.version.as_deref().unwrap_or_default()
        )
    }
}

/// Session cache of manifests keyed by `name@version`.
#[derive(Debug, Default)]
pub struct ManifestCache {
    entries: DashMap<String, Arc<Manifest>>,
}

impl ManifestCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<Manifest>> {
        self.entries.get(key).map(|m| Arc::clone(m.value()))
    }

    /// Store a manifest, keeping an earlier entry for the same key.
    pub fn insert(&self, key: String, manifest: Manifest) -> Arc<Manifest> {
        Arc::clone(
            self.entries
                .entry(key)
                .or_insert_with(|| Arc::new(manifest))
                .value(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn string_or_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value.as_str().map(str::to_string))
}

fn strings_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

fn ranges_or_empty<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
                .collect()
        })
        .unwrap_or_default())
}

fn browser_or_none<'de, D: Deserializer<'de>>(d: D) -> Result<Option<BrowserField>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    match value {
        serde_json::Value::String(_) | serde_json::Value::Object(_) => {
            BrowserField::deserialize(value)
                .map(Some)
                .map_err(de::Error::custom)
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_entry_fallbacks() {
        let m = Manifest::parse(r#"{"name":"a","main":"lib/a.js"}"#).unwrap();
        assert_eq!(m.main_entry(), "lib/a.js");

        let m = Manifest::parse(r#"{"name":"a","files":["dist/a.js"]}"#).unwrap();
        assert_eq!(m.main_entry(), "dist/a.js");

        let m = Manifest::parse(r#"{"name":"a"}"#).unwrap();
        assert_eq!(m.main_entry(), "index.js");

        let m = Manifest::parse(r#"{"main":"node.js","browser":"browser.js"}"#).unwrap();
        assert_eq!(m.main_entry(), "browser.js");
    }

    #[test]
    fn test_browser_map_substitution() {
        let m = Manifest::parse(
            r#"{"browser":{"fs":false,"./lib/node.js":"./lib/web.js","os":"os-browserify"}}"#,
        )
        .unwrap();
        assert_eq!(m.substitute("fs"), Some(Substitution::Disabled));
        assert_eq!(
            m.substitute("os"),
            Some(Substitution::Replace("os-browserify".into()))
        );
        assert_eq!(
            m.substitute("./lib/node"),
            Some(Substitution::Replace("./lib/web.js".into()))
        );
        assert_eq!(m.substitute("path"), None);
        // The map form does not provide an entry point.
        assert_eq!(m.entry_point(), None);
    }

    #[test]
    fn test_lenient_field_types() {
        let m = Manifest::parse(
            r#"{"name":"a","main":["x"],"files":"nope","dependencies":{"b":1},"browser":7}"#,
        )
        .unwrap();
        assert_eq!(m.main, None);
        assert!(m.files.is_empty());
        assert_eq!(m.dependencies.get("b").map(String::as_str), Some(""));
        assert_eq!(m.browser, None);
    }

    #[test]
    fn test_parse_lenient_invalid_json() {
        let m = Manifest::parse_lenient("{ not json", "/package.json");
        assert_eq!(m, Manifest::default());
    }

    #[test]
    fn test_declared_dependencies_order_and_dedup() {
        let m = Manifest::parse(
            r#"{"dependencies":{"b":"1","a":"1"},"devDependencies":{"t":"1"},"optionalDependencies":{"a":"1"}}"#,
        )
        .unwrap();
        let deps = m.declared_dependencies();
        assert_eq!(
            deps,
            vec![
                ("t", DependencyKind::Dev),
                ("a", DependencyKind::Regular),
                ("b", DependencyKind::Regular),
            ]
        );
    }

    #[test]
    fn test_manifest_cache_keeps_first() {
        let cache = ManifestCache::new();
        let first = cache.insert("a@1".into(), Manifest::parse(r#"{"main":"x"}"#).unwrap());
        let second = cache.insert("a@1".into(), Manifest::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }
}
