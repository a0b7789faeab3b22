use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default CDN origin serving package files as `<origin>/<name>@<version>/<path>`.
pub const DEFAULT_CDN_ORIGIN: &str = "https://cdn.jsdelivr.net/npm";

/// Environment variable overriding the CDN origin.
pub const CDN_ORIGIN_ENV: &str = "SANDNODE_CDN_ORIGIN";

/// Source extensions looked up during resolution, in order.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".js", ".jsx", ".json", ".ts", ".tsx"];

/// Configuration for the sandnode CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host directory mapped to the virtual work dir.
    pub cwd: PathBuf,

    /// Whether to emit JSON logs.
    pub json_logs: bool,

    /// Verbosity level (0 = INFO, 1 = DEBUG, 2+ = TRACE).
    pub verbosity: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            json_logs: false,
            verbosity: 0,
        }
    }
}

impl Config {
    /// Create a new config with the given working directory.
    #[must_use]
    pub fn new(cwd: PathBuf) -> Self {
        Self {
            cwd,
            ..Default::default()
        }
    }

    /// Set verbosity level.
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set JSON log output.
    #[must_use]
    pub fn with_json_logs(mut self, json: bool) -> Self {
        self.json_logs = json;
        self
    }
}

/// Session configuration for a [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Virtual directory holding the root manifest and `node_modules`.
    pub work_dir: String,

    /// CDN origin for files missing from the virtual filesystem.
    pub cdn_origin: String,

    /// Extensions looked up after an exact match, in order.
    pub extensions: Vec<String>,

    /// Keep link paths instead of canonicalizing them.
    pub preserve_symlinks: bool,

    /// Same as `preserve_symlinks`, for entry-point resolution.
    pub preserve_symlinks_main: bool,

    /// Accept an extensionless `index` file during directory resolution.
    pub allow_bare_index: bool,

    /// Value of `process.env.NODE_ENV` inside modules.
    pub node_env: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            work_dir: "/".to_string(),
            cdn_origin: DEFAULT_CDN_ORIGIN.to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| (*s).to_string()).collect(),
            preserve_symlinks: false,
            preserve_symlinks_main: false,
            allow_bare_index: false,
            node_env: "development".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults, with the CDN origin taken from `SANDNODE_CDN_ORIGIN` when set.
    #[must_use]
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(CDN_ORIGIN_ENV) {
            Ok(origin) if !origin.trim().is_empty() => config.with_cdn_origin(origin),
            _ => config,
        }
    }

    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        let dir = sandnode_util::vpath::normalize(&work_dir.into());
        self.work_dir = if dir.len() > 1 {
            dir.trim_end_matches('/').to_string()
        } else {
            dir
        };
        self
    }

    /// Set the CDN origin. A trailing slash is dropped.
    #[must_use]
    pub fn with_cdn_origin(mut self, origin: impl Into<String>) -> Self {
        self.cdn_origin = origin.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|s| (*s).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_preserve_symlinks(mut self, preserve: bool) -> Self {
        self.preserve_symlinks = preserve;
        self
    }

    #[must_use]
    pub fn with_preserve_symlinks_main(mut self, preserve: bool) -> Self {
        self.preserve_symlinks_main = preserve;
        self
    }

    #[must_use]
    pub fn with_allow_bare_index(mut self, allow: bool) -> Self {
        self.allow_bare_index = allow;
        self
    }

    #[must_use]
    pub fn with_node_env(mut self, node_env: impl Into<String>) -> Self {
        self.node_env = node_env.into();
        self
    }

    /// Whether `ext` (with leading dot) is a configured source extension.
    #[must_use]
    pub fn is_source_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.work_dir, "/");
        assert_eq!(config.cdn_origin, DEFAULT_CDN_ORIGIN);
        assert!(config.is_source_extension(".tsx"));
        assert!(!config.is_source_extension(".mjs"));
    }

    #[test]
    fn test_runtime_config_builders() {
        let config = RuntimeConfig::default()
            .with_work_dir("/app/")
            .with_cdn_origin("http://localhost:8080/npm/")
            .with_preserve_symlinks(true);
        assert_eq!(config.work_dir, "/app");
        assert_eq!(config.cdn_origin, "http://localhost:8080/npm");
        assert!(config.preserve_symlinks);
        assert!(!config.preserve_symlinks_main);
    }
}
