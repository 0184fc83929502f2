use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

use boter::{
    backend::{load_seed, MemoryBackend},
    config::{CliArgs, Config, LoggingConfig},
    http::{self, AppState},
    stores::Stores,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let backend = Arc::new(MemoryBackend::new());
    if let Some(seed) = &config.data.seed {
        let documents = load_seed(&backend, seed)?;
        tracing::info!(%seed, documents, "Loaded seed file");
    }

    let stores = Arc::new(Stores::new(backend, &config.collections)?);
    let app = http::router(AppState { stores, metrics }, Arc::new(config.auth.clone()));

    let addr = config.listen_addr()?;
    tracing::info!(%addr, auth = config.auth.enabled, "API listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
