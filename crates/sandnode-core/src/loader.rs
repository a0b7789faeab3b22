//! Module source loading and dependency extraction.
//!
//! Text comes from the virtual filesystem when present. Files of installed
//! packages that are missing locally are fetched from the CDN, their source
//! map reference is made absolute, and the text is written back to the
//! virtual filesystem. Root package files must exist locally and pass through
//! the first matching transpiler hook.

use crate::convert::{ModuleKind, ModuleReference};
use crate::error::{Error, Result};
use crate::fetch::cdn_url;
use crate::imports::scan_requires;
use crate::pkg::manifest::{Manifest, Substitution};
use crate::runtime::Session;
use crate::vfs::read_text;
use regex::Regex;
use sandnode_util::vpath;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

/// Signature of a transpiler: `(path, text) -> text`.
pub type TranspileFn = dyn Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync;

/// Source-to-source hook for root package files whose path matches `matcher`.
#[derive(Clone)]
pub struct TranspilerHook {
    matcher: Regex,
    transpile: Arc<TranspileFn>,
}

impl TranspilerHook {
    pub fn new(
        matcher: Regex,
        transpile: impl Fn(&str, &str) -> std::result::Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            matcher,
            transpile: Arc::new(transpile),
        }
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

impl fmt::Debug for TranspilerHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranspilerHook")
            .field("matcher", &self.matcher.as_str())
            .finish_non_exhaustive()
    }
}

/// One `require` found in a module, after `browser` substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written in the source.
    pub literal: String,
    /// Specifier to resolve; `None` when the `browser` map disables it.
    pub request: Option<String>,
}

/// Extract dependencies from `source` and apply the owning manifest's
/// `browser` map.
#[must_use]
pub fn extract_dependencies(source: &str, manifest: &Manifest) -> Vec<Dependency> {
    scan_requires(source)
        .into_iter()
        .map(|literal| {
            let request = match manifest.substitute(&literal) {
                Some(Substitution::Replace(target)) => Some(target),
                Some(Substitution::Disabled) => None,
                None => Some(literal.clone()),
            };
            Dependency { literal, request }
        })
        .collect()
}

/// Absolute virtual path of the file `reference` names.
pub(crate) fn module_path(session: &Session, reference: &ModuleReference) -> String {
    vpath::join(
        &session.package_dir(reference.owning_package),
        reference.file_path(),
    )
}

/// CDN URL for `reference` when it must come from the network: an installed
/// package file missing from the virtual filesystem.
pub(crate) fn remote_url(session: &Session, reference: &ModuleReference) -> Option<String> {
    if reference.kind == ModuleKind::Builtin || session.graph.is_root(reference.owning_package) {
        return None;
    }
    if session.fs.has(&module_path(session, reference)) {
        return None;
    }
    let node = session.graph.node(reference.owning_package);
    let version = node.version.as_deref()?;
    Some(cdn_url(
        &session.config.cdn_origin,
        &node.name,
        version,
        reference.file_path(),
    ))
}

/// Load the text of `reference`.
///
/// # Errors
/// Returns [`Error::PathResolution`] for a missing root file or an unversioned
/// package file, [`Error::Fetch`] when the CDN request fails, and
/// [`Error::Other`] when a transpiler rejects the text.
pub(crate) async fn load_source(session: &Session, reference: &ModuleReference) -> Result<String> {
    let path = module_path(session, reference);
    let owner = reference.owning_package;
    let is_root = session.graph.is_root(owner);

    if let Some(text) = read_text(session.fs.as_ref(), &path) {
        trace!(path, "loaded from virtual filesystem");
        return if is_root {
            transpile(session, &path, text)
        } else {
            Ok(text)
        };
    }

    let missing = || Error::PathResolution {
        specifier: reference.specified_path.clone(),
        path: path.clone(),
    };
    if is_root {
        return Err(missing());
    }
    let node = session.graph.node(owner);
    let Some(version) = node.version.as_deref() else {
        return Err(missing());
    };

    let url = cdn_url(
        &session.config.cdn_origin,
        &node.name,
        version,
        reference.file_path(),
    );
    let text = session.sources.get(&url).await?;
    let text = rewrite_source_map(
        &text,
        &session.config.cdn_origin,
        &node.name,
        version,
        reference.file_path(),
    );
    debug!(url, path, "fetched module source");
    session.persist(&path, &text);
    Ok(text)
}

fn transpile(session: &Session, path: &str, text: String) -> Result<String> {
    match session.transpilers.iter().find(|hook| hook.matches(path)) {
        Some(hook) => {
            trace!(path, matcher = hook.matcher.as_str(), "transpiling");
            (hook.transpile)(path, &text)
                .map_err(|message| Error::other(format!("Transpiling {path} failed: {message}")))
        }
        None => Ok(text),
    }
}

fn source_map_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^[ \t]*//[#@][ \t]+sourceMappingURL=([^\s'"]+)[ \t]*$"#).ok()
    })
    .as_ref()
}

/// Point the last `sourceMappingURL` comment of a fetched file at the CDN.
///
/// Data URLs and URLs that are already absolute are left alone.
#[must_use]
pub fn rewrite_source_map(
    text: &str,
    origin: &str,
    name: &str,
    version: &str,
    file_path: &str,
) -> String {
    let Some(re) = source_map_regex() else {
        return text.to_string();
    };
    let Some(url) = re.captures_iter(text).last().and_then(|caps| caps.get(1)) else {
        return text.to_string();
    };
    let value = url.as_str();
    if value.starts_with("data:") || value.starts_with('/') || value.contains("://") {
        return text.to_string();
    }
    let target = vpath::join(&vpath::dirname(file_path), value);
    let absolute = cdn_url(origin, name, version, &target);
    format!("{}{absolute}{}", &text[..url.start()], &text[url.end()..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_relative_source_map() {
        let text = "module.exports = 1;\n//# sourceMappingURL=index.js.map\n";
        let out = rewrite_source_map(text, "https://cdn.test/npm", "pkg", "1.0.0", "lib/index.js");
        assert_eq!(
            out,
            "module.exports = 1;\n//# sourceMappingURL=https://cdn.test/npm/pkg@1.0.0/lib/index.js.map\n"
        );
    }

    #[test]
    fn test_rewrite_keeps_data_and_absolute_urls() {
        let data = "x\n//# sourceMappingURL=data:application/json;base64,AAAA\n";
        assert_eq!(rewrite_source_map(data, "o", "p", "1", "a.js"), data);
        let abs = "x\n//# sourceMappingURL=https://elsewhere/a.map";
        assert_eq!(rewrite_source_map(abs, "o", "p", "1", "a.js"), abs);
        let none = "x = 1;";
        assert_eq!(rewrite_source_map(none, "o", "p", "1", "a.js"), none);
    }

    #[test]
    fn test_rewrite_only_last_comment() {
        let text = "//# sourceMappingURL=a.map\nx\n//@ sourceMappingURL=b.map";
        let out = rewrite_source_map(text, "https://c", "p", "2.0.0", "index.js");
        assert_eq!(
            out,
            "//# sourceMappingURL=a.map\nx\n//@ sourceMappingURL=https://c/p@2.0.0/b.map"
        );
    }

    #[test]
    fn test_extract_dependencies_applies_browser_map() {
        let manifest = Manifest::parse(
            r#"{"name":"p","browser":{"./node.js":"./browser.js","fs":false,"./lib/net":false}}"#,
        )
        .unwrap();
        let source = "require('./node.js'); require('fs'); require('./lib/net'); require('x');";
        let deps = extract_dependencies(source, &manifest);
        assert_eq!(
            deps,
            vec![
                Dependency {
                    literal: "./node.js".into(),
                    request: Some("./browser.js".into())
                },
                Dependency {
                    literal: "fs".into(),
                    request: None
                },
                Dependency {
                    literal: "./lib/net".into(),
                    request: None
                },
                Dependency {
                    literal: "x".into(),
                    request: Some("x".into())
                },
            ]
        );
    }

    #[test]
    fn test_transpiler_hook_matching() {
        let hook = TranspilerHook::new(Regex::new(r"\.ts$").unwrap(), |_, text| {
            Ok(text.replace(": number", ""))
        });
        assert!(hook.matches("/src/a.ts"));
        assert!(!hook.matches("/src/a.js"));
        assert_eq!((hook.transpile)("/src/a.ts", "let a: number = 1").unwrap(), "let a = 1");
        assert!(format!("{hook:?}").contains(r"\.ts$"));
    }
}
