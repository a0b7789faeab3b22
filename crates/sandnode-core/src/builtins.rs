//! Builtin module allow-list.
//!
//! A specifier naming a builtin never touches the filesystem; `require`
//! returns the evaluator's stand-in for it. `process`, `buffer` and `path`
//! have working stand-ins, the rest are empty objects.

/// Builtin modules with a stand-in.
pub const BUILTINS: &[&str] = &[
    "process",
    "buffer",
    "stream",
    "perf_hooks",
    "cluster",
    "crypto",
    "path",
    "fs",
];

/// Builtin name for `specifier`, accepting a `node:` prefix.
#[must_use]
pub fn builtin_name(specifier: &str) -> Option<&'static str> {
    let name = specifier.strip_prefix("node:").unwrap_or(specifier);
    BUILTINS.iter().copied().find(|b| *b == name)
}

#[must_use]
pub fn is_builtin(specifier: &str) -> bool {
    builtin_name(specifier).is_some()
}

/// Key under which the evaluator exposes a builtin's stand-in.
#[must_use]
pub fn builtin_key(name: &str) -> String {
    format!("node:{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_name() {
        assert_eq!(builtin_name("path"), Some("path"));
        assert_eq!(builtin_name("node:fs"), Some("fs"));
        assert_eq!(builtin_name("node:os"), None);
        assert!(!is_builtin("lodash"));
        assert!(!is_builtin("./path"));
        assert_eq!(builtin_key("crypto"), "node:crypto");
    }
}
