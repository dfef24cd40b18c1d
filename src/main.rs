use std::sync::{Arc, Mutex};

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use randevu::config::AppConfig;
use randevu::db;
use randevu::handlers;
use randevu::services::instructions::{DbInstructionSink, HttpInstructionSink, InstructionSink};
use randevu::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let db = Arc::new(Mutex::new(db::init_db(&config.database_url)?));

    let instructions: Box<dyn InstructionSink> = match &config.instruction_sink_url {
        Some(url) => {
            tracing::info!("forwarding delegation instructions to {url}");
            Box::new(HttpInstructionSink::new(url.clone()))
        }
        None => {
            tracing::info!("storing delegation instructions locally");
            Box::new(DbInstructionSink::new(Arc::clone(&db)))
        }
    };

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        instructions,
    });

    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
