//! OS signal handling for graceful shutdown.

use tracing::info;

/// Resolves when an exit signal (SIGINT, or SIGTERM on unix) is received.
pub async fn exit_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("received interrupt signal"),
        _ = terminate => info!("received terminate signal"),
    }
}
