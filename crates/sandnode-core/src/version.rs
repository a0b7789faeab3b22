use std::fmt::Write;

/// The current version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version string with the build hash appended when one was provided.
#[must_use]
pub fn version_string() -> String {
    let mut s = format!("sandnode {VERSION}");

    if let Some(hash) = option_env!("SANDNODE_BUILD_GIT_HASH") {
        let _ = write!(s, " ({hash})");
    }

    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_contains_version() {
        let vs = version_string();
        assert!(vs.contains(VERSION));
        assert!(vs.starts_with("sandnode "));
    }
}
