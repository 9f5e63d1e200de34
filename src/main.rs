use aegmall_settlement::orchestration::{ClosingEngine, RetrySweeper};
use aegmall_settlement::wallet::DryRunCreditor;
use aegmall_settlement::{config::Config, init_db, SqliteStore, WalletCreditor};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize database and dependencies
    let pool = match init_db(&config.database_path).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let store = Arc::new(SqliteStore::new(pool));
    let creditor: Arc<dyn WalletCreditor> = Arc::new(DryRunCreditor::new());
    let closing = Arc::new(ClosingEngine::new(
        store.clone(),
        creditor.clone(),
        config.closing_policy(),
    ));
    let sweeper = Arc::new(RetrySweeper::new(
        store.clone(),
        creditor,
        config.sweep_policy(),
    ));

    let mut closing_ticker = tokio::time::interval(Duration::from_secs(config.closing_interval_secs));
    let mut sweep_ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));

    tracing::info!(
        database_path = %config.database_path,
        closing_interval_secs = config.closing_interval_secs,
        sweep_interval_secs = config.sweep_interval_secs,
        "settlement worker started"
    );

    loop {
        tokio::select! {
            _ = closing_ticker.tick() => {
                if let Err(e) = closing.run().await {
                    tracing::error!(error = %e, "closing run failed");
                }
            }
            _ = sweep_ticker.tick() => {
                if let Err(e) = sweeper.sweep().await {
                    tracing::error!(error = %e, "retry sweep failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }
}
