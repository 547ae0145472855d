use std::sync::Arc;

mod auth;
mod config;
mod database;
mod error;
mod handlers;
mod mapping;
mod models;
mod services;

use config::Config;
use database::Database;
use handlers::create_router;
use services::{EndpointService, LeadIngestService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize configuration
    let config = Config::from_env()?;

    // Initialize database
    let db = Arc::new(Database::new(&config.database_path).await?);

    let app_state = handlers::AppState {
        endpoint_service: EndpointService::new(db.clone(), config.base_url.clone()),
        ingest_service: LeadIngestService::new(db),
    };

    // Build the application
    let app = create_router(app_state, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    // Log startup information
    config.log_startup_info();

    axum::serve(listener, app).await?;

    Ok(())
}
