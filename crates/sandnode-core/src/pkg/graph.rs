//! Installed package graph.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Forward edges map a
//! dependency name to a node; back edges (`required_by`) are plain ids, so
//! cycles in the install tree need no shared ownership.

use super::lockfile::{LockEntry, Lockfile, ADDRESS_SEP, LOCKFILE_NAME};
use super::manifest::{DependencyKind, Manifest, MANIFEST_NAME};
use crate::error::{Error, Result};
use crate::vfs::{read_text, FileMap};
use sandnode_util::vpath;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

/// Index of a node in a [`PackageGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One installed package occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct PackageNode {
    pub name: String,
    pub version: Option<String>,
    /// Colon-joined ancestor names; empty for the root.
    pub address: String,
    pub resolved: Option<String>,
    pub integrity: Option<String>,
    pub dev: bool,
    pub optional: bool,
    pub bundled: bool,
    pub dependencies: BTreeMap<String, NodeId>,
    pub required_by: BTreeSet<NodeId>,
}

impl PackageNode {
    fn new(name: &str, address: String, entry: Option<&LockEntry>) -> Self {
        Self {
            name: name.to_string(),
            version: entry.and_then(|e| e.version.clone()),
            address,
            resolved: entry.and_then(|e| e.resolved.clone()),
            integrity: entry.and_then(|e| e.integrity.clone()),
            dev: entry.is_some_and(|e| e.dev),
            optional: entry.is_some_and(|e| e.optional),
            bundled: entry.is_some_and(|e| e.bundled),
            dependencies: BTreeMap::new(),
            required_by: BTreeSet::new(),
        }
    }

    /// The root is the only node nothing requires.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.required_by.is_empty()
    }

    /// `name@version`; shared by every copy of the same release.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version.as_deref().unwrap_or_default())
    }
}

/// Package graph built from a manifest and a lockfile.
#[derive(Debug, Clone)]
pub struct PackageGraph {
    nodes: Vec<PackageNode>,
    by_address: HashMap<String, NodeId>,
    root: NodeId,
}

impl PackageGraph {
    /// Build the graph for `manifest` from the entries in `lock`.
    ///
    /// # Errors
    /// Returns [`Error::DependencyNotFound`] when a required package has no
    /// lockfile entry reachable from the requiring package. Missing optional
    /// packages are skipped.
    pub fn build(manifest: &Manifest, lock: &Lockfile) -> Result<Self> {
        let mut root = PackageNode::new(
            manifest.name.as_deref().unwrap_or_default(),
            String::new(),
            None,
        );
        root.version.clone_from(&manifest.version);

        let mut graph = Self {
            nodes: vec![root],
            by_address: HashMap::new(),
            root: NodeId(0),
        };
        let mut pending: Vec<NodeId> = Vec::new();

        for (name, kind) in manifest.declared_dependencies() {
            let id = if let Some(id) = graph.by_address.get(name) {
                *id
            } else if let Some(entry) = lock.at_addr(name) {
                let id = graph.push(PackageNode::new(name, name.to_string(), Some(entry)));
                pending.push(id);
                id
            } else if kind == DependencyKind::Optional {
                debug!(name, "optional dependency not installed");
                continue;
            } else {
                return Err(Error::DependencyNotFound {
                    name: name.to_string(),
                    from: graph.nodes[0].name.clone(),
                });
            };
            graph.link(graph.root, name, id);
        }

        while let Some(id) = pending.pop() {
            let address = graph.nodes[id.0].address.clone();
            let Some(entry) = lock.at_addr(&address) else {
                continue;
            };
            for child in entry.child_names() {
                let child_address = match lock.req_addr(&address, child) {
                    Ok(a) => a,
                    Err(_) if entry.is_optional_require(child) => {
                        trace!(address, child, "optional require not installed");
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                let child_id = if let Some(existing) = graph.by_address.get(&child_address) {
                    *existing
                } else {
                    let child_entry = lock.at_addr(&child_address);
                    let id = graph.push(PackageNode::new(child, child_address, child_entry));
                    pending.push(id);
                    id
                };
                graph.link(id, child, child_id);
            }
        }

        debug!(
            root = %graph.nodes[0].name,
            packages = graph.nodes.len() - 1,
            "package graph built"
        );
        Ok(graph)
    }

    /// Parse manifest and lockfile text and build the graph.
    ///
    /// # Errors
    /// Returns parse errors for either file, or any [`Self::build`] error.
    pub fn from_texts(manifest: &str, lockfile: Option<&str>) -> Result<(Self, Manifest)> {
        let manifest = Manifest::parse(manifest).map_err(|source| Error::ManifestParse {
            path: MANIFEST_NAME.to_string(),
            source,
        })?;
        let lock = match lockfile {
            Some(text) => Lockfile::parse(text).map_err(|source| Error::LockfileParse {
                path: LOCKFILE_NAME.to_string(),
                source,
            })?,
            None => Lockfile::empty(),
        };
        let graph = Self::build(&manifest, &lock)?;
        Ok((graph, manifest))
    }

    /// Read `package.json` and `package-lock.json` from `work_dir`.
    ///
    /// A missing lockfile is treated as empty.
    ///
    /// # Errors
    /// Returns [`Error::ManifestNotFound`] if the manifest is missing, or any
    /// parse or build error.
    pub fn load<F: FileMap + ?Sized>(fs: &F, work_dir: &str) -> Result<(Self, Manifest)> {
        let manifest_path = vpath::join(work_dir, MANIFEST_NAME);
        let lock_path = vpath::join(work_dir, LOCKFILE_NAME);

        let manifest_text = read_text(fs, &manifest_path).ok_or_else(|| Error::ManifestNotFound {
            path: manifest_path.clone(),
        })?;
        let manifest = Manifest::parse(&manifest_text).map_err(|source| Error::ManifestParse {
            path: manifest_path,
            source,
        })?;

        let lock = match read_text(fs, &lock_path) {
            Some(text) => Lockfile::parse(&text).map_err(|source| Error::LockfileParse {
                path: lock_path,
                source,
            })?,
            None => {
                debug!(path = %lock_path, "no lockfile, using empty lockfile");
                Lockfile::empty()
            }
        };

        let graph = Self::build(&manifest, &lock)?;
        Ok((graph, manifest))
    }

    fn push(&mut self, node: PackageNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_address.insert(node.address.clone(), id);
        self.nodes.push(node);
        id
    }

    fn link(&mut self, parent: NodeId, name: &str, child: NodeId) {
        self.nodes[parent.0]
            .dependencies
            .insert(name.to_string(), child);
        self.nodes[child.0].required_by.insert(parent);
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[must_use]
    pub fn is_root(&self, id: NodeId) -> bool {
        id == self.root
    }

    /// The node for `id`.
    ///
    /// # Panics
    /// Panics if `id` came from a different graph.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &PackageNode {
        &self.nodes[id.0]
    }

    #[must_use]
    pub fn node_at(&self, address: &str) -> Option<NodeId> {
        if address.is_empty() {
            return Some(self.root);
        }
        self.by_address.get(address).copied()
    }

    /// Direct dependency `name` of `id`.
    #[must_use]
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id.0].dependencies.get(name).copied()
    }

    /// Every non-root node by address, sorted.
    #[must_use]
    pub fn addresses(&self) -> BTreeMap<&str, NodeId> {
        self.by_address
            .iter()
            .map(|(address, id)| (address.as_str(), *id))
            .collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &PackageNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit every node reachable from the root once, parents first.
    pub fn walk(&self, mut visit: impl FnMut(NodeId, &PackageNode)) {
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            let node = &self.nodes[id.0];
            visit(id, node);
            queue.extend(node.dependencies.values().copied());
        }
    }

    /// Whether some dependency chain starting at `id` leads back to `id`.
    #[must_use]
    pub fn has_cycle(&self, id: NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = self.nodes[id.0].dependencies.values().copied().collect();
        while let Some(next) = stack.pop() {
            if next == id {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.nodes[next.0].dependencies.values().copied());
            }
        }
        false
    }

    /// Installed directory of `id` under `prefix`.
    ///
    /// The root lives at `prefix`; `a:b` lives at
    /// `prefix/node_modules/a/node_modules/b`.
    #[must_use]
    pub fn package_dir(&self, id: NodeId, prefix: &str) -> String {
        let address = &self.nodes[id.0].address;
        if address.is_empty() {
            return vpath::normalize(prefix);
        }
        let mut dir = vpath::normalize(prefix);
        for name in address.split(ADDRESS_SEP) {
            dir = vpath::join_all([dir.as_str(), "node_modules", name]);
        }
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFs;

    const MANIFEST: &str = r#"{
        "name": "app",
        "version": "1.0.0",
        "dependencies": { "a": "^1", "d": "^1" },
        "optionalDependencies": { "fsevents": "^2" }
    }"#;

    const LOCK: &str = r#"{
        "dependencies": {
            "a": { "version": "1.0.0", "requires": { "b": "^1", "c": "^1" },
                   "dependencies": { "c": { "version": "2.0.0" } } },
            "b": { "version": "1.0.0", "requires": { "a": "^1" } },
            "c": { "version": "1.0.0" },
            "d": { "version": "1.0.0", "requires": { "b": "^1" } }
        }
    }"#;

    fn graph() -> PackageGraph {
        PackageGraph::from_texts(MANIFEST, Some(LOCK)).unwrap().0
    }

    #[test]
    fn test_build_shares_diamond_nodes() {
        let g = graph();
        let a = g.node_at("a").unwrap();
        let d = g.node_at("d").unwrap();
        let b = g.node_at("b").unwrap();
        assert_eq!(g.child(a, "b"), Some(b));
        assert_eq!(g.child(d, "b"), Some(b));
        let parents: Vec<_> = g.node(b).required_by.iter().copied().collect();
        assert_eq!(parents, {
            let mut v = vec![a, d];
            v.sort();
            v
        });
    }

    #[test]
    fn test_build_prefers_nested_copy() {
        let g = graph();
        let a = g.node_at("a").unwrap();
        let nested = g.child(a, "c").unwrap();
        assert_eq!(g.node(nested).address, "a:c");
        assert_eq!(g.node(nested).version.as_deref(), Some("2.0.0"));
        // The top-level c is never required, so it is not in the graph.
        assert_eq!(g.node_at("c"), None);
    }

    #[test]
    fn test_root_and_optional() {
        let g = graph();
        let root = g.node(g.root());
        assert!(root.is_root());
        assert_eq!(root.id(), "app@1.0.0");
        assert!(g.child(g.root(), "fsevents").is_none());
        assert!(!g.node(g.node_at("a").unwrap()).is_root());
    }

    #[test]
    fn test_missing_dependency_fails() {
        let err = PackageGraph::from_texts(
            r#"{"name":"app","dependencies":{"a":"1"}}"#,
            Some(r#"{"dependencies":{"a":{"version":"1","requires":{"zz":"1"}}}}"#),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { ref name, ref from } if name == "zz" && from == "a"));
    }

    #[test]
    fn test_has_cycle() {
        let g = graph();
        let a = g.node_at("a").unwrap();
        let b = g.node_at("b").unwrap();
        let d = g.node_at("d").unwrap();
        assert!(g.has_cycle(a));
        assert!(g.has_cycle(b));
        // d reaches the a <-> b cycle but is not part of it.
        assert!(!g.has_cycle(d));
        assert!(!g.has_cycle(g.root()));
    }

    #[test]
    fn test_addresses_unique_versions() {
        let g = graph();
        let addresses = g.addresses();
        assert_eq!(
            addresses.keys().copied().collect::<Vec<_>>(),
            vec!["a", "a:c", "b", "d"]
        );
        for (address, id) in &addresses {
            assert_eq!(g.node(*id).address, *address);
        }
    }

    #[test]
    fn test_walk_visits_once() {
        let g = graph();
        let mut visited = Vec::new();
        g.walk(|id, _| visited.push(id));
        assert_eq!(visited.len(), g.len());
        let unique: HashSet<_> = visited.iter().collect();
        assert_eq!(unique.len(), visited.len());
    }

    #[test]
    fn test_package_dir() {
        let g = graph();
        let nested = g.node_at("a:c").unwrap();
        assert_eq!(g.package_dir(nested, "/"), "/node_modules/a/node_modules/c");
        assert_eq!(g.package_dir(g.root(), "/app"), "/app");
    }

    #[test]
    fn test_load_without_lockfile() {
        let fs = MemoryFs::with_files([("/package.json", r#"{"name":"app","main":"src/x"}"#)]);
        let (g, manifest) = PackageGraph::load(&fs, "/").unwrap();
        assert_eq!(g.len(), 1);
        assert_eq!(manifest.main.as_deref(), Some("src/x"));
    }

    #[test]
    fn test_load_missing_manifest() {
        let fs = MemoryFs::new();
        let err = PackageGraph::load(&fs, "/").unwrap_err();
        assert!(matches!(err, Error::ManifestNotFound { .. }));
    }
}
