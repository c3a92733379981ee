//! silod entrypoint.

mod config;
mod shutdown;

use config::ServerConfig;
use silo_api::{AppState, create_router};
use silo_cache::{S3Cache, S3Config};
use silo_core::{Cache, OpContext};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ServerConfig::load()?;
    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = aws_sdk_s3::Client::new(&sdk_config);

    let cas = Arc::new(S3Cache::new(
        client.clone(),
        S3Config::new(&cfg.cas_bucket, &cfg.cas_prefix),
    ));
    let ac = Arc::new(S3Cache::new(
        client,
        S3Config::new(&cfg.ac_bucket, &cfg.ac_prefix),
    ));

    let state = AppState::new(
        cas.clone() as Arc<dyn Cache>,
        ac.clone() as Arc<dyn Cache>,
        cfg.request_timeout(),
    );
    let app = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await?;
    info!(address = %cfg.listen, "start http server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::exit_signal())
        .await?;
    info!("stop http server");

    // Wind down in-flight downloads and refresh tasks under one deadline.
    let ctx = OpContext::with_timeout(cfg.shutdown_timeout());
    for (name, cache) in [("cas", &cas), ("ac", &ac)] {
        if let Err(err) = cache.shutdown(&ctx).await {
            warn!(cache = name, error = %err, "cache shutdown incomplete");
        }
    }
    Ok(())
}
