use chrono::Utc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttn_fleet::common::AppState;
use ttn_fleet::config::Config;
use ttn_fleet::render;
use ttn_fleet::sync;
use ttn_fleet::ttn::TtnClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ttn_fleet=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    tracing::info!("Starting ttn-fleet...");

    // Load configuration (fail-fast)
    let config = Config::from_env()?;
    tracing::info!(
        app = %config.app_id,
        region = %config.region,
        lookback_hours = config.lookback_hours,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    let client = TtnClient::new(&config)?;
    let state = AppState::new(config, client);

    let report = sync::run_fleet(&state, Utc::now()).await;
    render::write_all(&state.config.docs_dir, &report)?;

    tracing::info!(devices = report.devices.len(), "Run finished");
    Ok(())
}
