#![forbid(unsafe_code)]

//! Gate daemon entry point.

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use pipeline_gate_daemon::{
    client::{HttpPipelineApi, HttpPipelineLookup},
    config::{ConfigCredentials, GateConfig},
    db::Db,
    http,
    jobs::StoreScheduler,
    service::GateService,
};
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pipeline-gate-daemon", version, about = "Pipeline step gate daemon")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:3100
    #[arg(long, default_value = "127.0.0.1:3100")]
    listen: SocketAddr,

    /// Directory for embedded SurrealDB storage.
    #[arg(long, default_value = ".pipeline-gate/db")]
    db_dir: PathBuf,

    /// Project credentials and job list (toml). Without it no project can
    /// authenticate.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,

    /// Timeout for calls to the pipeline service, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    request_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => GateConfig::load(path)?,
        None => {
            tracing::warn!("no --config given; pipeline API calls will be unauthorized");
            GateConfig::default()
        }
    };

    let db = Db::connect(&args.db_dir).await?;

    let api = HttpPipelineApi::new(
        &config.api.base_url,
        Duration::from_millis(args.request_timeout_ms),
    )
    .context("building pipeline API client")?;
    let credentials = Arc::new(ConfigCredentials::new(config.clone()));
    let lookup = Arc::new(HttpPipelineLookup::new(
        api.clone(),
        config.clone(),
        credentials.clone(),
    ));
    let scheduler = Arc::new(StoreScheduler::new(db.clone(), config.clone()));

    let svc = Arc::new(GateService::new(
        db,
        credentials,
        Arc::new(api),
        lookup,
        scheduler,
    ));
    svc.reattach().await.context("reattaching persisted waiters")?;

    let app = http::router(svc)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(listen = %args.listen, base_url = %config.api.base_url, "daemon starting");
    axum::serve(tokio::net::TcpListener::bind(args.listen).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
