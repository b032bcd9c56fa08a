use std::env;
use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::info;

use server::config::{FxGatewayConfig, WatchdogConfig};
use server::db::{create_pool, run_migrations};
use server::handlers;
use server::middleware::IdempotencyMiddleware;
use server::services::fx_gateway::XeHttpGateway;
use server::{telemetry, AppState};

#[actix_web::main]
async fn main() -> Result<()> {
    telemetry::init();

    let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "gigledger.db".to_string());
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    let pool = Arc::new(create_pool(&database_url)?);
    run_migrations(&pool).context("database migration failed")?;

    let gateway = Arc::new(
        XeHttpGateway::new(FxGatewayConfig::from_env())
            .context("failed to build FX gateway client")?,
    );
    let state = web::Data::new(AppState::build(Arc::clone(&pool), gateway));

    let watchdog_config = WatchdogConfig::from_env();
    let ttl_secs = watchdog_config.idempotency_ttl_secs;
    tokio::spawn(state.watchdog(watchdog_config).start());

    info!(bind_addr = %bind_addr, "starting settlement server");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(IdempotencyMiddleware::new(Arc::clone(&pool), ttl_secs))
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .context("failed to bind server address")?
    .run()
    .await
    .context("server terminated")
}
