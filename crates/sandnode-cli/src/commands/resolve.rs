use super::{open_fs, print_json, report, SessionArgs};
use miette::{IntoDiagnostic, Result};
use sandnode_core::{Config, ModuleKind, PathResolver, ResolveOptions};
use sandnode_util::vpath;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Resolution<'a> {
    specifier: &'a str,
    kind: ModuleKind,
    package: String,
    resolved_path: &'a str,
    file: String,
}

/// Resolve `specifier`. With `from`, plain Node resolution relative to that
/// virtual file; otherwise package-aware resolution from the root package.
pub fn run(config: &Config, specifier: &str, from: Option<&str>, args: &SessionArgs) -> Result<()> {
    if let Some(from) = from {
        return resolve_from(config, specifier, from, args);
    }

    let runtime = args.open(&config.cwd)?;
    let tokio = tokio::runtime::Runtime::new().into_diagnostic()?;
    let reference = tokio
        .block_on(runtime.resolve(specifier))
        .map_err(report)?;

    let resolution = Resolution {
        specifier,
        kind: reference.kind,
        package: runtime.graph().node(reference.owning_package).id(),
        resolved_path: &reference.resolved_path,
        file: runtime.module_path(&reference),
    };
    if config.json_logs {
        return print_json(&resolution);
    }
    println!("{}", resolution.file);
    println!("  package: {}", resolution.package);
    Ok(())
}

fn resolve_from(config: &Config, specifier: &str, from: &str, args: &SessionArgs) -> Result<()> {
    let fs = open_fs(&config.cwd)?;
    let parent = vpath::resolve("/", from);
    let resolver = PathResolver::new(ResolveOptions::from(&args.runtime_config()));
    let found = resolver.resolve(fs.as_ref(), specifier, &parent, false);

    if config.json_logs {
        return print_json(&serde_json::json!({
            "specifier": specifier,
            "from": parent,
            "path": found,
        }));
    }
    match found {
        Some(path) => {
            println!("{path}");
            Ok(())
        }
        None => Err(miette::miette!(
            code = "PATH_RESOLUTION",
            "Cannot find module '{specifier}' from {parent}"
        )),
    }
}
