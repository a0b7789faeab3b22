use super::{print_json, report, SessionArgs};
use miette::{IntoDiagnostic, Result};
use sandnode_core::Config;
use tracing::info;

/// Import `specifier` from the root package and print its exports as JSON.
pub fn run(config: &Config, specifier: &str, args: &SessionArgs) -> Result<()> {
    let runtime = args.open(&config.cwd)?;
    let tokio = tokio::runtime::Runtime::new().into_diagnostic()?;
    let exports = tokio
        .block_on(async {
            let exports = runtime.import_module(specifier).await?;
            exports.to_json().await
        })
        .map_err(report)?;
    info!(specifier, modules = runtime.module_count(), "import complete");

    if config.json_logs {
        return print_json(&serde_json::json!({
            "specifier": specifier,
            "modules": runtime.module_count(),
            "exports": exports,
        }));
    }
    match &exports {
        serde_json::Value::String(text) => println!("{text}"),
        other => print_json(other)?,
    }
    Ok(())
}
