//! Ledger wire protocol server binary

use anyhow::Context;
use ledger_core::{Config, Ledger, LedgerServer};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("LEDGER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting ledger server");

    // Load configuration: optional TOML file, then environment overrides
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("loading {}", path))?
            .with_env_overrides()?,
        Err(_) => Config::from_env()?,
    };
    let listen_addr = config.listen_addr.clone();

    // Open ledger (recovery runs here)
    let ledger = Arc::new(Ledger::open(config).await?);

    // The final flush must run on every exit path from here on
    let served = serve(&listen_addr, ledger.clone()).await;
    let flushed = ledger.shutdown().await;

    tracing::debug!(metrics = %ledger.metrics().encode_text(), "Final metrics");
    tracing::info!("Ledger server stopped");

    served?;
    flushed?;
    Ok(())
}

async fn serve(addr: &str, ledger: Arc<Ledger>) -> anyhow::Result<()> {
    let server = LedgerServer::bind(addr, ledger)
        .await
        .with_context(|| format!("binding {}", addr))?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
