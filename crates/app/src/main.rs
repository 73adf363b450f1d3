mod policies;
mod policy_service;
mod problem;
mod product_service;
mod products;
mod router;
mod telemetry;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;

use tracing::{info, warn};

use policy_svc_customer::CustomerClient;
use policy_svc_storage::Database;
use policy_svc_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    let customers = CustomerClient::with_timeout(
        config.customer_service_url.clone(),
        config.customer_timeout,
    )?;
    info!(
        stage = "customer",
        base_url = %customers.base_url(),
        timeout_secs = config.customer_timeout.as_secs(),
        "customer service client configured"
    );

    let state = router::AppState::new(metrics, database, customers);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(stage = "app", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(stage = "app", error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(stage = "app", "shutdown signal received");
}
