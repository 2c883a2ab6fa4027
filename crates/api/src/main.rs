//! SafeWatch - Main Entry Point
//!
//! Usage: `safewatch [config.toml]`. Settings not in the file come from
//! defaults or `SAFEWATCH__*` environment variables.

use alerting::{AlertDispatcher, LogNotifier, StaticDirectory, TracingActivityLog};
use anyhow::Context;
use api::{init_logging, run_server, AppState, ServerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use monitor::{config::load_settings, FeedRegistry, MonitorConfig, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let json = std::env::var("SAFEWATCH_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    init_logging(json);

    info!("=== SafeWatch v{} ===", env!("CARGO_PKG_VERSION"));

    let path = std::env::args().nth(1).map(PathBuf::from);
    let settings = load_settings(path.as_deref())?;
    let config = MonitorConfig::from_settings(&settings)?;
    let server: ServerConfig = match settings.get("server") {
        Ok(server) => server,
        Err(config::ConfigError::NotFound(_)) => ServerConfig::default(),
        Err(e) => return Err(e).context("invalid [server] section"),
    };

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let directory = StaticDirectory::new(config.contacts.clone());
    let dispatcher = Arc::new(AlertDispatcher::new(
        config.alerting.clone(),
        Arc::new(LogNotifier),
        Arc::new(directory),
        Arc::new(TracingActivityLog),
    ));
    let feeds = Arc::new(FeedRegistry::new(config.session.reading_max_age()));
    let manager = Arc::new(SessionManager::new(config, feeds.clone(), dispatcher)?);

    let state = Arc::new(AppState::new(manager, feeds).with_metrics(metrics));
    run_server(state, &server.bind).await?;

    Ok(())
}
