use anyhow::Context;
use earshot_server::{router, App, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;
    let bind = config.bind;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;

    tracing::info!(address = %listener.local_addr()?, "cell server listening");

    axum::serve(listener, router(App::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(source) = tokio::signal::ctrl_c().await {
        tracing::error!(%source, "failed to install the shutdown handler");
    }
}
