mod feedback;
mod overview;
mod problem;
mod router;
mod telemetry;
#[cfg(test)]
mod testutil;
mod worker;

use std::net::SocketAddr;

use tracing::info;

use fbp_directory::DirectoryClient;
use fbp_storage::Database;
use fbp_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    let base_url = url::Url::parse(&config.directory_base_url)?;
    let http = reqwest::Client::builder()
        .timeout(config.directory_timeout)
        .build()?;
    let directory = DirectoryClient::new(base_url, http);

    let state = router::AppState::new(metrics, database.clone(), directory, config.ledger);
    worker::FollowUpWorker::new(database, state.appender(), config.worker).spawn();

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
