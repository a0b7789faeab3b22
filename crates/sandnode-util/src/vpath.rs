//! POSIX-style path helpers for virtual filesystem paths.
//!
//! Virtual paths are plain `/`-separated strings, independent of the host
//! platform. These helpers follow the semantics of the host package runtime's
//! `path.posix` module so that resolution results match byte for byte.

/// Path separator for virtual paths.
pub const SEP: char = '/';

/// Normalize a path: collapse duplicate separators, resolve `.` and `..`.
///
/// A trailing separator is preserved. An empty path normalizes to `.`.
#[must_use]
pub fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with(SEP);
    let trailing = path.ends_with(SEP);
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split(SEP) {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, SEP);
    }
    if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with(SEP) {
        out.push(SEP);
    }
    out
}

/// Join path segments and normalize the result.
///
/// Empty segments are ignored; joining nothing yields `.`.
#[must_use]
pub fn join(base: &str, rest: &str) -> String {
    match (base.is_empty(), rest.is_empty()) {
        (true, true) => ".".to_string(),
        (true, false) => normalize(rest),
        (false, true) => normalize(base),
        (false, false) => normalize(&format!("{base}/{rest}")),
    }
}

/// Join any number of segments.
#[must_use]
pub fn join_all<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    let joined = segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    normalize(&joined)
}

/// Resolve `path` against `base` unless it is already absolute.
#[must_use]
pub fn resolve(base: &str, path: &str) -> String {
    if is_absolute(path) {
        normalize(path)
    } else {
        join(base, path)
    }
}

/// Directory portion of a path.
///
/// `/a/b` → `/a`, `/a` → `/`, `a` → `.`, `a/b/` → `a`.
#[must_use]
pub fn dirname(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches(SEP);
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind(SEP) {
        None => ".".to_string(),
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].trim_end_matches(SEP).to_string(),
    }
}

/// Last segment of a path, ignoring trailing separators.
#[must_use]
pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEP);
    match trimmed.rfind(SEP) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Extension of the last segment including the leading dot, or `""`.
///
/// Dotfiles such as `.bashrc` have no extension.
#[must_use]
pub fn extname(path: &str) -> &str {
    let base = basename(path);
    match base.rfind('.') {
        Some(0) | None => "",
        Some(idx) => &base[idx..],
    }
}

/// Whether the path starts at the root.
#[must_use]
pub fn is_absolute(path: &str) -> bool {
    path.starts_with(SEP)
}

/// Whether a specifier is relative (`./`, `../`, `.\`, `..\`, `.` or `..`).
#[must_use]
pub fn is_relative(spec: &str) -> bool {
    spec == "."
        || spec == ".."
        || spec.starts_with("./")
        || spec.starts_with("../")
        || spec.starts_with(".\\")
        || spec.starts_with("..\\")
}

/// Whether a specifier ends with a path separator.
#[must_use]
pub fn has_trailing_separator(spec: &str) -> bool {
    spec.ends_with('/') || spec.ends_with('\\')
}

/// Strip a directory prefix from `path`, returning the remainder without a
/// leading separator. Returns `None` when `path` is not inside `dir`.
#[must_use]
pub fn strip_dir<'a>(path: &'a str, dir: &str) -> Option<&'a str> {
    let dir = dir.trim_end_matches(SEP);
    if dir.is_empty() {
        return Some(path.trim_start_matches(SEP));
    }
    let rest = path.strip_prefix(dir)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix(SEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/a//b/./c/../d"), "/a/b/d");
        assert_eq!(normalize("./a/b"), "a/b");
        assert_eq!(normalize("../a"), "../a");
        assert_eq!(normalize("/../a"), "/a");
        assert_eq!(normalize("a/b/"), "a/b/");
        assert_eq!(normalize(""), ".");
        assert_eq!(normalize("a/.."), ".");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/", "a.js"), "/a.js");
        assert_eq!(join("/pkg", "./lib/x"), "/pkg/lib/x");
        assert_eq!(join("/pkg/lib", "../index.js"), "/pkg/index.js");
        assert_eq!(join("", ""), ".");
        assert_eq!(join_all(["/", "node_modules", "", "a"]), "/node_modules/a");
    }

    #[test]
    fn test_dirname() {
        assert_eq!(dirname("/a/b"), "/a");
        assert_eq!(dirname("/a"), "/");
        assert_eq!(dirname("a"), ".");
        assert_eq!(dirname("a/b/"), "a");
        assert_eq!(dirname("/"), "/");
    }

    #[test]
    fn test_basename_and_extname() {
        assert_eq!(basename("/a/b.js"), "b.js");
        assert_eq!(basename("/a/b/"), "b");
        assert_eq!(extname("index.js"), ".js");
        assert_eq!(extname("/a/b.min.js"), ".js");
        assert_eq!(extname(".bashrc"), "");
        assert_eq!(extname("src/x"), "");
    }

    #[test]
    fn test_is_relative() {
        assert!(is_relative("./a"));
        assert!(is_relative("../a"));
        assert!(is_relative(".\\a"));
        assert!(is_relative(".."));
        assert!(!is_relative("a"));
        assert!(!is_relative("/a"));
        assert!(!is_relative(".a"));
    }

    #[test]
    fn test_strip_dir() {
        assert_eq!(strip_dir("/app/src/x.js", "/app"), Some("src/x.js"));
        assert_eq!(strip_dir("/src/x.js", "/"), Some("src/x.js"));
        assert_eq!(strip_dir("/application/x", "/app"), None);
    }
}
