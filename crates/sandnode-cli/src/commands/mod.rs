pub mod graph;
pub mod import;
pub mod resolve;
pub mod version;

use miette::{IntoDiagnostic, Result};
use sandnode_core::{DiskFs, Error, OfflineFetcher, Runtime, RuntimeConfig};
use std::path::Path;
use std::sync::Arc;

/// Options shared by commands that open a runtime session.
#[derive(clap::Args, Debug, Clone)]
pub struct SessionArgs {
    /// CDN origin serving `<name>@<version>/<path>` [default: $SANDNODE_CDN_ORIGIN]
    #[arg(long, value_name = "URL")]
    pub cdn: Option<String>,

    /// Never fetch from the network; missing package files are errors
    #[arg(long)]
    pub offline: bool,

    /// Value of `process.env.NODE_ENV` inside modules
    #[arg(long, default_value = "development")]
    pub node_env: String,

    /// Keep symlinked paths instead of resolving them to their targets
    #[arg(long)]
    pub preserve_symlinks: bool,
}

impl SessionArgs {
    pub fn runtime_config(&self) -> RuntimeConfig {
        let config = RuntimeConfig::from_env()
            .with_node_env(self.node_env.as_str())
            .with_preserve_symlinks(self.preserve_symlinks);
        match self.cdn.as_deref().map(str::trim) {
            Some(cdn) if !cdn.is_empty() => config.with_cdn_origin(cdn),
            _ => config,
        }
    }

    /// Open a session over the project directory `cwd`.
    pub fn open(&self, cwd: &Path) -> Result<Runtime> {
        let fs = open_fs(cwd)?;
        let mut builder = Runtime::builder(fs).config(self.runtime_config());
        if self.offline {
            builder = builder.fetcher(Arc::new(OfflineFetcher));
        }
        builder.load().map_err(report)
    }
}

/// Map the host directory `cwd` to the virtual root.
pub fn open_fs(cwd: &Path) -> Result<Arc<DiskFs>> {
    Ok(Arc::new(DiskFs::new(cwd).into_diagnostic()?))
}

/// Convert a core error into a diagnostic carrying its stable code.
pub fn report(err: Error) -> miette::Report {
    miette::miette!(code = err.code(), "{err}")
}

pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cdn: Option<&str>) -> SessionArgs {
        SessionArgs {
            cdn: cdn.map(str::to_string),
            offline: true,
            node_env: "production".to_string(),
            preserve_symlinks: true,
        }
    }

    #[test]
    fn test_runtime_config_flags() {
        let config = args(Some("http://localhost:9000/npm/")).runtime_config();
        assert_eq!(config.cdn_origin, "http://localhost:9000/npm");
        assert_eq!(config.node_env, "production");
        assert!(config.preserve_symlinks);
    }

    #[test]
    fn test_runtime_config_blank_cdn_keeps_environment_origin() {
        let config = args(Some("  ")).runtime_config();
        assert_eq!(config.cdn_origin, RuntimeConfig::from_env().cdn_origin);
    }
}
