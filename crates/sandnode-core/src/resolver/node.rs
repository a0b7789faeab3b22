//! Node-style file resolution over a [`FileMap`].
//!
//! Supports:
//! - Relative (`./`, `../`, `.\`, `..\`) and absolute specifiers
//! - Bare specifiers with a `node_modules` walk-up
//! - Exact match, then extension lookup
//! - Directory resolution (`package.json` `main`, then `index.<ext>`)
//! - Link canonicalization unless links are preserved
//!
//! Results, including misses, are cached per `(specifier, parent)`.

use crate::config::RuntimeConfig;
use crate::vfs::{read_text, FileMap};
use dashmap::DashMap;
use sandnode_util::vpath;
use serde_json::Value;
use tracing::{trace, warn};

/// Options controlling [`PathResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Extensions looked up after the exact path, in order.
    pub extensions: Vec<String>,
    pub preserve_symlinks: bool,
    pub preserve_symlinks_main: bool,
    /// Accept `<dir>/index` with no extension.
    pub allow_bare_index: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

impl From<&RuntimeConfig> for ResolveOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            extensions: config.extensions.clone(),
            preserve_symlinks: config.preserve_symlinks,
            preserve_symlinks_main: config.preserve_symlinks_main,
            allow_bare_index: config.allow_bare_index,
        }
    }
}

/// Cache key: specifier, the id (path) of the requesting file, and whether
/// this is entry-point resolution (which canonicalizes links differently).
type PathKey = (String, String, bool);

/// Resolves specifiers to file paths, memoizing every answer.
#[derive(Debug, Default)]
pub struct PathResolver {
    options: ResolveOptions,
    path_cache: DashMap<PathKey, Option<String>>,
    main_cache: DashMap<String, Option<String>>,
}

impl PathResolver {
    #[must_use]
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            path_cache: DashMap::new(),
            main_cache: DashMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve `request` as imported from the file `parent_id`.
    ///
    /// `is_main` marks entry-point resolution, which honours
    /// `preserve_symlinks_main` instead of `preserve_symlinks`.
    /// Returns `None` when nothing matches.
    pub fn resolve<F: FileMap + ?Sized>(
        &self,
        fs: &F,
        request: &str,
        parent_id: &str,
        is_main: bool,
    ) -> Option<String> {
        let key = (request.to_string(), parent_id.to_string(), is_main);
        if let Some(cached) = self.path_cache.get(&key) {
            trace!(request, parent_id, hit = ?cached.value(), "resolve cache hit");
            return cached.value().clone();
        }

        let base = vpath::dirname(parent_id);
        let found = if vpath::is_relative(request) || vpath::is_absolute(request) {
            let target = vpath::resolve(&base, &request.replace('\\', "/"));
            self.load_path(fs, request, &target)
        } else {
            self.load_node_modules(fs, request, &base)
        };
        let result = found.map(|path| self.try_realpath(fs, path, is_main));

        trace!(request, parent_id, resolved = ?result, "resolved");
        self.path_cache.insert(key, result.clone());
        result
    }

    /// File, then directory, unless the request ends in a separator.
    fn load_path<F: FileMap + ?Sized>(&self, fs: &F, request: &str, target: &str) -> Option<String> {
        if !vpath::has_trailing_separator(request) {
            if let Some(found) = self.load_as_file(fs, target, true) {
                return Some(found);
            }
        }
        self.load_as_directory(fs, target)
    }

    /// Exact match (when `exact`), then each configured extension.
    pub fn load_as_file<F: FileMap + ?Sized>(
        &self,
        fs: &F,
        path: &str,
        exact: bool,
    ) -> Option<String> {
        let path = path.trim_end_matches('/');
        if exact && fs.has(path) {
            return Some(path.to_string());
        }
        self.options
            .extensions
            .iter()
            .map(|ext| format!("{path}{ext}"))
            .find(|candidate| fs.has(candidate))
    }

    /// `<dir>/index.<ext>`.
    pub fn load_as_index<F: FileMap + ?Sized>(&self, fs: &F, dir: &str) -> Option<String> {
        let index = vpath::join(dir, "index");
        self.load_as_file(fs, &index, self.options.allow_bare_index)
    }

    /// Directory with a manifest `main`, falling back to its index.
    pub fn load_as_directory<F: FileMap + ?Sized>(&self, fs: &F, dir: &str) -> Option<String> {
        if let Some(main) = self.manifest_main(fs, dir) {
            let target = vpath::join(dir, &main);
            if let Some(found) = self
                .load_as_file(fs, &target, true)
                .or_else(|| self.load_as_index(fs, &target))
            {
                return Some(found);
            }
        }
        self.load_as_index(fs, dir)
    }

    fn load_node_modules<F: FileMap + ?Sized>(
        &self,
        fs: &F,
        request: &str,
        start: &str,
    ) -> Option<String> {
        node_modules_paths(start).into_iter().find_map(|dir| {
            let target = vpath::join(&dir, request);
            self.load_path(fs, request, &target)
        })
    }

    /// `main` declared by `<dir>/package.json`, cached per manifest path.
    fn manifest_main<F: FileMap + ?Sized>(&self, fs: &F, dir: &str) -> Option<String> {
        let manifest_path = vpath::join(dir, "package.json");
        if let Some(cached) = self.main_cache.get(&manifest_path) {
            return cached.value().clone();
        }
        let main = read_text(fs, &manifest_path).and_then(|text| {
            gentle_json(&text, &manifest_path)?
                .get("main")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        });
        self.main_cache.insert(manifest_path, main.clone());
        main
    }

    fn try_realpath<F: FileMap + ?Sized>(&self, fs: &F, path: String, is_main: bool) -> String {
        let preserve = if is_main {
            self.options.preserve_symlinks_main
        } else {
            self.options.preserve_symlinks
        };
        if preserve {
            return path;
        }
        fs.realpath(&path).unwrap_or(path)
    }

    /// Number of memoized `(specifier, parent, is_main)` answers.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.path_cache.len()
    }
}

/// Candidate `node_modules` directories from `dir` up to the root.
///
/// Levels that are themselves `node_modules` are skipped.
#[must_use]
pub fn node_modules_paths(dir: &str) -> Vec<String> {
    let normalized = vpath::normalize(dir);
    let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    let mut paths = Vec::with_capacity(segments.len() + 1);
    for end in (0..=segments.len()).rev() {
        if end > 0 && segments[end - 1] == "node_modules" {
            continue;
        }
        let prefix = format!("/{}", segments[..end].join("/"));
        paths.push(vpath::join(&prefix, "node_modules"));
    }
    paths
}

/// Parse JSON, logging and returning `None` on failure.
fn gentle_json(text: &str, path: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path, error = %e, "ignoring unparsable package.json");
            None
        }
    }
}
