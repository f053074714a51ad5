use std::sync::Arc;

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use vsl_indexer::{ChainManager, DatabaseClient, PostgresClient, Settings};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("Failed to initialize logger")?;

    // Load configuration
    let settings =
        Settings::new().context("Failed to load config.yaml. Please ensure it exists and is valid")?;

    let postgres = PostgresClient::new(settings.postgres.clone())
        .await
        .context("Failed to initialize database connection")?;
    postgres.health_check().await?;
    postgres.migrate().await?;

    let db: Arc<dyn DatabaseClient> = Arc::new(postgres);
    let cancellation_token = CancellationToken::new();

    run_indexer(settings, db, cancellation_token).await
}

async fn run_indexer(
    settings: Settings,
    db: Arc<dyn DatabaseClient>,
    cancellation_token: CancellationToken,
) -> anyhow::Result<()> {
    let chain_manager = ChainManager::new(db, settings.indexer.clone());

    let chain_manager_token = cancellation_token.child_token();
    let mut chain_manager_handle =
        tokio::spawn(async move { chain_manager.run(chain_manager_token).await });

    info!("Chain manager started for {} chain(s)", settings.indexer.chains.len());

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    // Set up graceful shutdown signal handler
    info!("Indexer running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        }
    };

    #[cfg(not(unix))]
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
    };

    // A track that exhausted its retries ends the process; the next start
    // resumes from the committed checkpoints.
    let result = tokio::select! {
        _ = shutdown => {
            info!("Finishing all tasks...");
            cancellation_token.cancel();
            (&mut chain_manager_handle).await
        },
        result = &mut chain_manager_handle => result,
    };

    match result.context("Chain manager panicked")? {
        Ok(()) => {
            info!("All indexers stopped");
            Ok(())
        },
        Err(e) => {
            error!("Chain manager failed: {:#}", e);
            Err(e)
        },
    }
}
