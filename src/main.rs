use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use noor::config::AppConfig;
use noor::db;
use noor::handlers;
use noor::services::booking::BookingTools;
use noor::services::catalog::ServiceCatalog;
use noor::services::scheduling::clinic::ClinicApiClient;
use noor::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.admin_token == "changeme" {
        tracing::warn!("ADMIN_TOKEN is not set, using the default token");
    }

    let conn = db::init_db(&config.database_url)?;

    let api = ClinicApiClient::new(
        config.clinic_api_base.clone(),
        config.clinic_api_token.clone(),
        config.clinic_api_timeout_secs,
    )?;
    tracing::info!("using clinic scheduling API at {}", config.clinic_api_base);

    let tools = BookingTools::new(
        Arc::new(api),
        Arc::new(ServiceCatalog::clinic()),
        config.price_currency.clone(),
        config.utc_offset_minutes,
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        tools,
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
