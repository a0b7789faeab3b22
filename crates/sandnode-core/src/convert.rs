//! Specifier to module reference conversion.
//!
//! Combines the package graph with specifier syntax. Builtins never touch the
//! filesystem. Relative and absolute specifiers stay inside the requesting
//! package. Bare specifiers are looked up in the requesting package's
//! dependencies, then the root's (hoisting), then the root itself (self
//! reference). File existence is looked up with the path resolver against the
//! owning package's directory, falling back to manifest `main` fields, a
//! CDN-only directory index, and finally the path as written.

use crate::builtins::builtin_name;
use crate::error::{Error, Result};
use crate::pkg::manifest::MANIFEST_NAME;
use crate::pkg::NodeId;
use crate::runtime::Session;
use sandnode_util::vpath;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    Builtin,
    Package,
    LocalSource,
}

/// Resolution of one specifier occurrence.
#[derive(Debug, Clone)]
pub struct ModuleReference {
    pub kind: ModuleKind,
    /// The specifier as written.
    pub specified_path: String,
    /// Path inside the owning package, without a leading `./`. Builtins keep
    /// the specifier.
    pub resolved_path: String,
    pub owning_package: NodeId,
    /// The importing reference; diagnostics only.
    pub parent: Option<Arc<ModuleReference>>,
    file_path: String,
}

impl ModuleReference {
    fn new(
        kind: ModuleKind,
        specified_path: &str,
        resolved_path: String,
        owning_package: NodeId,
        parent: Option<Arc<ModuleReference>>,
        session: &Session,
    ) -> Self {
        let file_path = if kind == ModuleKind::Builtin
            || session
                .config
                .is_source_extension(vpath::extname(&resolved_path))
        {
            resolved_path.clone()
        } else {
            format!("{resolved_path}.js")
        };
        Self {
            kind,
            specified_path: specified_path.to_string(),
            resolved_path,
            owning_package,
            parent,
            file_path,
        }
    }

    /// Path of the file to load, relative to the owning package directory.
    #[must_use]
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// Specifiers from the top-level request down to this one.
    #[must_use]
    pub fn chain(&self) -> Vec<String> {
        let mut chain = vec![self.specified_path.clone()];
        let mut current = self.parent.as_deref();
        while let Some(reference) = current {
            chain.push(reference.specified_path.clone());
            current = reference.parent.as_deref();
        }
        chain.reverse();
        chain
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.specified_path, self.file_path)
    }
}

/// Split a bare specifier into package name and sub path.
///
/// `@scope/pkg/a/b` → `("@scope/pkg", "a/b")`, `pkg` → `("pkg", "")`.
#[must_use]
pub fn parse_package_specifier(specifier: &str) -> (&str, &str) {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or_default();
    if first.starts_with('@') {
        if let Some(second) = parts.next() {
            let name_len = first.len() + 1 + second.len();
            let rest = specifier.get(name_len + 1..).unwrap_or_default();
            return (&specifier[..name_len], rest);
        }
        return (specifier, "");
    }
    match specifier.split_once('/') {
        Some((name, rest)) => (name, rest),
        None => (specifier, ""),
    }
}

/// Convert `specifier`, imported by `parent` inside package `requesting`.
///
/// # Errors
/// Returns [`Error::UnresolvedDependency`] when a bare specifier names a
/// package that is neither a dependency of `requesting`, hoisted to the root,
/// nor the root itself.
pub async fn convert(
    session: &Session,
    specifier: &str,
    requesting: NodeId,
    parent: Option<Arc<ModuleReference>>,
) -> Result<ModuleReference> {
    if builtin_name(specifier).is_some() {
        return Ok(ModuleReference::new(
            ModuleKind::Builtin,
            specifier,
            specifier.to_string(),
            requesting,
            parent,
            session,
        ));
    }

    let normalized = specifier.replace('\\', "/");

    if vpath::is_relative(&normalized) {
        let base = match parent.as_deref() {
            Some(p) if p.owning_package == requesting && p.kind != ModuleKind::Builtin => {
                vpath::dirname(&p.resolved_path)
            }
            _ => String::new(),
        };
        let rel = vpath::join(&base, &normalized);
        let resolved = resolve_local(session, requesting, &rel).await;
        let reference = ModuleReference::new(
            ModuleKind::LocalSource,
            specifier,
            resolved,
            requesting,
            parent,
            session,
        );
        trace!(specifier, resolved = %reference.resolved_path, "converted relative specifier");
        return Ok(reference);
    }

    if vpath::is_absolute(&normalized) {
        let root = session.graph.root();
        let absolute = vpath::normalize(&normalized);
        let rel = vpath::strip_dir(&absolute, &session.config.work_dir)
            .unwrap_or_else(|| absolute.trim_start_matches('/'))
            .to_string();
        let resolved = resolve_local(session, root, &rel).await;
        return Ok(ModuleReference::new(
            ModuleKind::LocalSource,
            specifier,
            resolved,
            root,
            parent,
            session,
        ));
    }

    let (package_name, sub_path) = parse_package_specifier(&normalized);
    let graph = &session.graph;
    let root = graph.root();
    let owner = graph
        .child(requesting, package_name)
        .or_else(|| graph.child(root, package_name))
        .or_else(|| {
            (session.root_manifest.name.as_deref() == Some(package_name)).then_some(root)
        })
        .ok_or_else(|| Error::UnresolvedDependency {
            specifier: specifier.to_string(),
            package: graph.node(requesting).id(),
        })?;

    let kind = if graph.is_root(owner) {
        ModuleKind::LocalSource
    } else {
        ModuleKind::Package
    };
    let package_dir = session.package_dir(owner);
    let parent_id = vpath::join(&package_dir, MANIFEST_NAME);

    let resolved = if sub_path.is_empty() {
        let manifest = session.manifest(owner).await;
        let entry = vpath::normalize(manifest.main_entry());
        match locate(session, &package_dir, &parent_id, &entry, parent.is_none()) {
            Some(found) => found,
            None => remote_or_written(session, owner, entry.trim_start_matches("./")).await,
        }
    } else {
        let sub = vpath::normalize(sub_path);
        match locate(session, &package_dir, &parent_id, &sub, false) {
            Some(found) => found,
            None => match session.directory_main(owner, &sub).await {
                Some(main) => vpath::join(&sub, &main),
                None => remote_or_written(session, owner, &sub).await,
            },
        }
    };

    trace!(
        specifier,
        package = %graph.node(owner).id(),
        resolved = %resolved,
        "converted package specifier"
    );
    Ok(ModuleReference::new(
        kind, specifier, resolved, owner, parent, session,
    ))
}

/// Resolve a package-relative path inside `owner`, falling back to a
/// directory manifest `main` present on the virtual filesystem, then to a
/// directory index only the CDN has, then to the path itself.
async fn resolve_local(session: &Session, owner: NodeId, rel: &str) -> String {
    let package_dir = session.package_dir(owner);
    let parent_id = vpath::join(&package_dir, MANIFEST_NAME);
    if let Some(found) = locate(session, &package_dir, &parent_id, rel, false) {
        return found;
    }
    let rel = rel.trim_end_matches('/');
    match session.local_manifest_main(owner, rel) {
        Some(main) => vpath::join(rel, &main),
        None => remote_or_written(session, owner, rel).await,
    }
}

/// `<rel>/index.js` when only that exists on the CDN, otherwise `rel`.
async fn remote_or_written(session: &Session, owner: NodeId, rel: &str) -> String {
    match session.remote_directory_index(owner, rel).await {
        Some(index) => index,
        None => rel.to_string(),
    }
}

/// Look up `rel` with the path resolver; the result is relative to
/// `package_dir`, or `None` when nothing exists inside it.
fn locate(
    session: &Session,
    package_dir: &str,
    parent_id: &str,
    rel: &str,
    is_main: bool,
) -> Option<String> {
    let request = format!("./{}", rel.trim_start_matches("./"));
    let found = session
        .resolver
        .resolve(session.fs.as_ref(), &request, parent_id, is_main)?;
    let inside = vpath::strip_dir(&found, package_dir)?;
    if inside.is_empty() {
        return None;
    }
    Some(inside.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_specifier() {
        assert_eq!(parse_package_specifier("react"), ("react", ""));
        assert_eq!(parse_package_specifier("react/jsx"), ("react", "jsx"));
        assert_eq!(
            parse_package_specifier("@scope/pkg/sub/file"),
            ("@scope/pkg", "sub/file")
        );
        assert_eq!(parse_package_specifier("@scope/pkg"), ("@scope/pkg", ""));
        assert_eq!(parse_package_specifier("@scope"), ("@scope", ""));
    }
}
