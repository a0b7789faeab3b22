//! Lockfile model and address lookup.
//!
//! Entries are indexed by *address*: the colon-joined chain of package names
//! from the root to the installed copy (`a:b` is `b` nested under `a`). Three
//! on-disk shapes are accepted and flattened into that index:
//!
//! - nested `dependencies` maps (lockfile v1),
//! - `dependencies` keys that are already addresses (`"a:b": {...}`),
//! - `packages` maps keyed by `node_modules/a/node_modules/b` (v2/v3).

use crate::error::Error;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};

/// Lockfile name read from the work dir.
pub const LOCKFILE_NAME: &str = "package-lock.json";

/// Address separator.
pub const ADDRESS_SEP: char = ':';

/// One installed package occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LockEntry {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resolved: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
    #[serde(default)]
    pub dev: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub bundled: bool,

    /// Names this package depends on, with their ranges.
    #[serde(default, deserialize_with = "map_or_empty")]
    pub requires: BTreeMap<String, String>,

    /// Nested entries; moved into the address index on load.
    #[serde(default)]
    dependencies: BTreeMap<String, LockEntry>,

    /// Names of nested entries, kept after flattening.
    #[serde(skip)]
    pub nested: Vec<String>,

    /// Required names that may be absent from the install.
    #[serde(skip)]
    pub optional_requires: BTreeSet<String>,
}

impl LockEntry {
    /// Names to link as children: `requires` then nested entries.
    #[must_use]
    pub fn child_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.requires.keys().map(String::as_str).collect();
        for name in &self.nested {
            if !self.requires.contains_key(name) {
                names.push(name);
            }
        }
        names
    }

    #[must_use]
    pub fn is_optional_require(&self, name: &str) -> bool {
        self.optional_requires.contains(name)
    }
}

/// `packages` entry of a v2/v3 lockfile.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackagesEntry {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    resolved: Option<String>,
    #[serde(default)]
    integrity: Option<String>,
    #[serde(default)]
    dev: bool,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    in_bundle: bool,
    #[serde(default, deserialize_with = "map_or_empty")]
    dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "map_or_empty")]
    optional_dependencies: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "map_or_empty")]
    peer_dependencies: BTreeMap<String, String>,
}

impl From<PackagesEntry> for LockEntry {
    fn from(p: PackagesEntry) -> Self {
        let mut requires = p.dependencies;
        let mut optional_requires = BTreeSet::new();
        for (name, range) in p.optional_dependencies.into_iter().chain(p.peer_dependencies) {
            if !requires.contains_key(&name) {
                optional_requires.insert(name.clone());
                requires.insert(name, range);
            }
        }
        Self {
            version: p.version,
            resolved: p.resolved,
            integrity: p.integrity,
            dev: p.dev,
            optional: p.optional,
            bundled: p.in_bundle,
            requires,
            dependencies: BTreeMap::new(),
            nested: Vec::new(),
            optional_requires,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLockfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    lockfile_version: Option<u32>,
    #[serde(default)]
    dependencies: BTreeMap<String, LockEntry>,
    #[serde(default)]
    packages: BTreeMap<String, PackagesEntry>,
}

/// Parsed lockfile with an address index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lockfile {
    pub name: Option<String>,
    pub version: Option<String>,
    pub lockfile_version: Option<u32>,
    entries: BTreeMap<String, LockEntry>,
}

impl Lockfile {
    /// Lockfile with no entries, used when none exists.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse lockfile text.
    ///
    /// # Errors
    /// Returns the JSON error if `text` is not a lockfile object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawLockfile = serde_json::from_str(text)?;
        let mut entries = BTreeMap::new();

        let mut stack: Vec<(String, LockEntry)> = raw.dependencies.into_iter().collect();
        while let Some((address, mut entry)) = stack.pop() {
            let nested = std::mem::take(&mut entry.dependencies);
            entry.nested = nested.keys().cloned().collect();
            for (name, child) in nested {
                stack.push((format!("{address}{ADDRESS_SEP}{name}"), child));
            }
            entries.insert(address, entry);
        }

        for (path, pkg) in raw.packages {
            let Some(address) = packages_key_to_address(&path) else {
                continue;
            };
            entries.entry(address).or_insert_with(|| pkg.into());
        }

        Ok(Self {
            name: raw.name,
            version: raw.version,
            lockfile_version: raw.lockfile_version,
            entries,
        })
    }

    /// Entry installed at `address`.
    #[must_use]
    pub fn at_addr(&self, address: &str) -> Option<&LockEntry> {
        self.entries.get(address)
    }

    /// Address of `name` as seen from the package at `from`.
    ///
    /// Looks for `from:name`, then walks `from` upward one segment at a time,
    /// ending at the top-level `name`.
    ///
    /// # Errors
    /// Returns [`Error::DependencyNotFound`] when no ancestor has `name`.
    pub fn req_addr(&self, from: &str, name: &str) -> Result<String, Error> {
        let mut scope = from;
        loop {
            let candidate = if scope.is_empty() {
                name.to_string()
            } else {
                format!("{scope}{ADDRESS_SEP}{name}")
            };
            if self.entries.contains_key(&candidate) {
                return Ok(candidate);
            }
            if scope.is_empty() {
                return Err(Error::DependencyNotFound {
                    name: name.to_string(),
                    from: from.to_string(),
                });
            }
            scope = scope.rfind(ADDRESS_SEP).map_or("", |idx| &scope[..idx]);
        }
    }

    /// All indexed addresses, sorted.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
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

/// `node_modules/a/node_modules/@s/b` → `a:@s/b`. Non-`node_modules` keys
/// (the root `""`, workspace folders) have no address.
fn packages_key_to_address(path: &str) -> Option<String> {
    let rest = path.strip_prefix("node_modules/")?;
    let names: Vec<&str> = rest.split("/node_modules/").collect();
    if names.iter().any(|n| n.is_empty()) {
        return None;
    }
    Some(names.join(&ADDRESS_SEP.to_string()))
}

/// Accept a string map, treating any other JSON value as empty.
fn map_or_empty<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
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

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED: &str = r#"{
        "name": "app",
        "version": "1.0.0",
        "lockfileVersion": 1,
        "requires": true,
        "dependencies": {
            "a": {
                "version": "1.0.0",
                "requires": { "b": "^2.0.0", "c": "^1.0.0" },
                "dependencies": {
                    "b": { "version": "2.0.0", "requires": { "c": "^1.0.0" } }
                }
            },
            "b": { "version": "1.0.0" },
            "c": { "version": "1.0.0", "dev": true }
        }
    }"#;

    #[test]
    fn test_parse_nested_flattens_addresses() {
        let lock = Lockfile::parse(NESTED).unwrap();
        let addrs: Vec<_> = lock.addresses().collect();
        assert_eq!(addrs, vec!["a", "a:b", "b", "c"]);
        assert_eq!(lock.at_addr("a:b").unwrap().version.as_deref(), Some("2.0.0"));
        assert_eq!(lock.at_addr("a").unwrap().nested, vec!["b".to_string()]);
        assert!(lock.at_addr("c").unwrap().dev);
        assert_eq!(lock.lockfile_version, Some(1));
    }

    #[test]
    fn test_req_addr_walks_up() {
        let lock = Lockfile::parse(NESTED).unwrap();
        assert_eq!(lock.req_addr("a", "b").unwrap(), "a:b");
        assert_eq!(lock.req_addr("a:b", "c").unwrap(), "c");
        assert_eq!(lock.req_addr("", "b").unwrap(), "b");
    }

    #[test]
    fn test_req_addr_not_found() {
        let lock = Lockfile::parse(NESTED).unwrap();
        let err = lock.req_addr("a:b", "zzz").unwrap_err();
        assert_eq!(err.to_string(), "zzz not accessible from a:b");
    }

    #[test]
    fn test_parse_flat_addresses() {
        let lock = Lockfile::parse(
            r#"{"dependencies":{"a":{"version":"1.0.0","requires":{"b":"1"}},"a:b":{"version":"1.0.0"}}}"#,
        )
        .unwrap();
        assert_eq!(lock.req_addr("a", "b").unwrap(), "a:b");
    }

    #[test]
    fn test_parse_packages_v2() {
        let lock = Lockfile::parse(
            r#"{
                "lockfileVersion": 3,
                "packages": {
                    "": { "name": "app", "dependencies": { "a": "^1" } },
                    "node_modules/a": {
                        "version": "1.0.0",
                        "dependencies": { "@s/b": "^1" },
                        "optionalDependencies": { "fsevents": "^2" }
                    },
                    "node_modules/a/node_modules/@s/b": { "version": "1.2.0", "inBundle": true },
                    "packages/local": { "version": "0.0.0" }
                }
            }"#,
        )
        .unwrap();
        let addrs: Vec<_> = lock.addresses().collect();
        assert_eq!(addrs, vec!["a", "a:@s/b"]);
        let a = lock.at_addr("a").unwrap();
        assert_eq!(a.child_names(), vec!["@s/b", "fsevents"]);
        assert!(a.is_optional_require("fsevents"));
        assert!(lock.at_addr("a:@s/b").unwrap().bundled);
    }

    #[test]
    fn test_requires_non_map_tolerated() {
        let lock = Lockfile::parse(r#"{"dependencies":{"a":{"version":"1","requires":true}}}"#)
            .unwrap();
        assert!(lock.at_addr("a").unwrap().requires.is_empty());
    }
}
