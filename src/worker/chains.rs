use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{ChainClient, RpcChainClient},
    config::{ChainSettings, IndexerSettings, Layer},
    db::DatabaseClient,
    worker::{
        chip_fetcher::{ChipFetcher, RpcChipReader},
        parser::EventHandler,
        worker::{ChainWorker, FinalityMode, WorkerOptions},
    },
};

/// Runs the two tracks of every configured chain.
///
/// Each chain gets an unfinalized and a finalized [`ChainWorker`], sharing
/// one RPC client and one [`EventHandler`]. The tracks run independently;
/// if any of them gives up, all are cancelled and the error is returned.
pub struct ChainManager {
    db: Arc<dyn DatabaseClient>,
    settings: IndexerSettings,
}

impl ChainManager {
    pub fn new(db: Arc<dyn DatabaseClient>, settings: IndexerSettings) -> Self {
        Self {
            db,
            settings,
        }
    }

    /// Build both workers of `chain`, verifying the RPC serves the expected
    /// chain.
    async fn build_workers(&self, chain: &ChainSettings) -> Result<Vec<ChainWorker>> {
        let contracts = chain.contracts()?;

        let client = RpcChainClient::new(&chain.rpc_url)
            .with_context(|| format!("Failed to create RPC client for chain {}", chain.chain_id))?;

        let remote_chain_id = client.chain_id().await.with_context(|| {
            format!("Failed to reach RPC of chain {}. Check the RPC URL.", chain.chain_id)
        })?;
        if remote_chain_id != chain.chain_id {
            bail!(
                "RPC configured for chain {} ({}) serves chain {}",
                chain.chain_id,
                contracts.name,
                remote_chain_id
            );
        }

        let chip_fetcher = match (contracts.layer, contracts.chips, contracts.staking) {
            (Layer::L2, Some(chips), Some(staking)) => {
                let reader = RpcChipReader::new(client.provider().clone(), chips, staking);
                Some(ChipFetcher::new(Arc::new(reader), self.settings.chip_fetch_concurrency))
            },
            _ => None,
        };

        let start_block = contracts.start_block;
        let name = contracts.name;
        let handler = Arc::new(EventHandler::new(chain.chain_id, contracts, chip_fetcher)?);
        let client: Arc<dyn ChainClient> = Arc::new(client);

        info!(
            "Worker initialized successfully for chain {} ({}), starting at block {}",
            name, chain.chain_id, start_block
        );

        Ok([FinalityMode::Unfinalized, FinalityMode::Finalized]
            .into_iter()
            .map(|mode| {
                ChainWorker::new(
                    mode,
                    client.clone(),
                    self.db.clone(),
                    handler.clone(),
                    WorkerOptions::new(&self.settings, start_block),
                )
            })
            .collect())
    }

    /// Run every configured chain until cancelled or until a track fails.
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<()> {
        let mut workers = Vec::with_capacity(self.settings.chains.len() * 2);
        for chain in &self.settings.chains {
            workers.extend(self.build_workers(chain).await?);
        }

        if workers.is_empty() {
            bail!("No chains configured");
        }

        info!("ChainManager: Started {} chain indexer(s)", self.settings.chains.len());

        run_workers(workers, cancellation_token).await
    }
}

/// Run `workers` concurrently. The first failure cancels the others; once
/// every worker has stopped that failure is returned.
pub async fn run_workers(
    workers: Vec<ChainWorker>,
    cancellation_token: CancellationToken,
) -> Result<()> {
    let tracks_token = cancellation_token.child_token();
    let mut tasks = JoinSet::new();

    for worker in workers {
        let token = tracks_token.clone();
        tasks.spawn(async move {
            let label = format!("chain {} ({})", worker.chain_id(), worker.mode());
            worker.run(token).await.with_context(|| format!("Indexer for {} stopped", label))
        });
    }

    let mut failure: Option<anyhow::Error> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(anyhow::Error::from).and_then(|result| result);

        if let Err(e) = result {
            error!("ChainManager: {:#}", e);

            if failure.is_none() {
                tracks_token.cancel();
                failure = Some(e);
            }
        }
    }

    info!("ChainManager: Shutdown complete");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::VSL_MAINNET,
        db::MemoryDatabase,
        testing::{block, rollup_contracts, FakeChain, FakeChipReader},
    };
    use std::time::Duration;

    fn workers(chain: &Arc<FakeChain>, db: &MemoryDatabase, retry_attempts: u32) -> Vec<ChainWorker> {
        let contracts = rollup_contracts();
        let fetcher = ChipFetcher::new(Arc::new(FakeChipReader::new()), 2);
        let handler = Arc::new(EventHandler::new(VSL_MAINNET, contracts, Some(fetcher)).unwrap());
        let options = WorkerOptions {
            start_block: 0,
            poll_interval: Duration::from_millis(5),
            retry_attempts,
            retry_delay: Duration::from_millis(1),
        };

        [FinalityMode::Unfinalized, FinalityMode::Finalized]
            .into_iter()
            .map(|mode| {
                ChainWorker::new(
                    mode,
                    chain.clone(),
                    Arc::new(db.clone()),
                    handler.clone(),
                    options.clone(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_both_tracks_index_and_stop_on_cancel() {
        let chain = Arc::new(FakeChain::new());
        for number in 0..=4 {
            chain.push(block(number), vec![]);
        }
        chain.set_finalized(2);
        let db = MemoryDatabase::new();
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_workers(workers(&chain, &db, 3), token.clone()));

        for _ in 0..200 {
            if db.snapshot().await.checkpoints.len() == 2 {
                let state = db.snapshot().await;
                let heads: Vec<_> =
                    state.checkpoints.iter().map(|c| (c.finalized, c.block_number)).collect();
                if heads.contains(&(false, 4)) && heads.contains(&(true, 2)) {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        handle.await.unwrap().unwrap();

        let state = db.snapshot().await;
        let unfinalized = state.checkpoints.iter().find(|c| !c.finalized).unwrap();
        let finalized = state.checkpoints.iter().find(|c| c.finalized).unwrap();
        assert_eq!(unfinalized.block_number, 4);
        assert_eq!(finalized.block_number, 2);
    }

    #[tokio::test]
    async fn test_failing_track_stops_every_track() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(0), vec![]);
        chain.fail_next_requests(u32::MAX);
        let db = MemoryDatabase::new();

        let err = run_workers(workers(&chain, &db, 2), CancellationToken::new()).await.unwrap_err();

        assert!(format!("{:#}", err).contains("failed 2 times in a row"));
    }
}
