use std::sync::Arc;

use ferry_core::{config::Config, plugins::PluginRegistry};

#[tokio::main]
async fn main() -> Result<(), ferry_core::Error> {
    ferry_core::logging::init("ferry")?;

    let cfg = Arc::new(Config::load()?);

    let plugins = PluginRegistry::new()
        .register("zoho", ferry_zoho::setup)
        .register("gsheets", ferry_sheets::setup)
        .build(&cfg)?;
    tracing::info!(count = plugins.len(), "plugins ready");

    ferry_telegram::router::run_polling(cfg, plugins)
        .await
        .map_err(|e| ferry_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
