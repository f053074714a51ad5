use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{Block, ChainClient, Receipt},
    config::IndexerSettings,
    db::{models::Checkpoint, DatabaseClient, DatabaseTransaction},
    worker::parser::EventHandler,
};

/// Interval for logging progress updates (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Which head a worker follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinalityMode {
    /// Latest block: low latency, may be reorged.
    Unfinalized,
    /// Block tagged `finalized`: final, rewrites what the unfinalized track
    /// wrote for the same block.
    Finalized,
}

impl FinalityMode {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unfinalized => "unfinalized",
            Self::Finalized => "finalized",
        }
    }
}

impl fmt::Display for FinalityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver loop timing.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// First block indexed when no checkpoint exists.
    pub start_block: u64,
    pub poll_interval: Duration,
    /// Consecutive failed attempts before the worker gives up.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

impl WorkerOptions {
    pub fn new(settings: &IndexerSettings, start_block: u64) -> Self {
        Self {
            start_block,
            poll_interval: Duration::from_millis(settings.poll_interval_milliseconds),
            retry_attempts: settings.retry_attempts,
            retry_delay: Duration::from_millis(settings.retry_delay_milliseconds),
        }
    }
}

/// Outcome of one driver iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The block was processed and its checkpoint committed.
    Indexed(u64),
    /// The next block is beyond the followed head.
    Idle,
    Cancelled,
}

/// Indexes one chain along one track, block by block.
///
/// Each block is written in a single database transaction together with the
/// track's checkpoint, so the checkpoint always names the last block whose
/// rows are fully present. Restarting resumes at `checkpoint + 1`.
pub struct ChainWorker {
    chain_id: u64,
    mode: FinalityMode,
    chain: Arc<dyn ChainClient>,
    db: Arc<dyn DatabaseClient>,
    handler: Arc<EventHandler>,
    options: WorkerOptions,
}

impl ChainWorker {
    pub fn new(
        mode: FinalityMode,
        chain: Arc<dyn ChainClient>,
        db: Arc<dyn DatabaseClient>,
        handler: Arc<EventHandler>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            chain_id: handler.chain_id(),
            mode,
            chain,
            db,
            handler,
            options,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn mode(&self) -> FinalityMode {
        self.mode
    }

    /// Index until cancelled.
    ///
    /// Failed iterations are retried after a fixed delay. After
    /// `retry_attempts` consecutive failures the last error is returned; any
    /// committed block resets the count.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let max_attempts = self.options.retry_attempts.max(1);
        let mut failures: u32 = 0;
        let mut last_progress_log = Instant::now();

        info!(
            "Starting {} indexer for chain {} (start block {})",
            self.mode, self.chain_id, self.options.start_block
        );

        loop {
            match self.index_next(&cancellation_token).await {
                Ok(Step::Indexed(block_number)) => {
                    failures = 0;

                    if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                        info!(
                            "Chain {} ({}): indexed block {}",
                            self.chain_id, self.mode, block_number
                        );
                        last_progress_log = Instant::now();
                    }
                },
                Ok(Step::Idle) => {
                    failures = 0;

                    if !self.sleep(&cancellation_token, self.options.poll_interval).await {
                        break;
                    }
                },
                Ok(Step::Cancelled) => break,
                Err(e) => {
                    failures += 1;

                    if failures >= max_attempts {
                        error!(
                            "Chain {} ({}): giving up after {} consecutive failures: {:#}",
                            self.chain_id, self.mode, failures, e
                        );
                        return Err(e.context(format!(
                            "{} indexer for chain {} failed {} times in a row",
                            self.mode, self.chain_id, failures
                        )));
                    }

                    warn!(
                        "Chain {} ({}): attempt {}/{} failed, retrying in {:?}: {:#}",
                        self.chain_id, self.mode, failures, max_attempts, self.options.retry_delay, e
                    );

                    if !self.sleep(&cancellation_token, self.options.retry_delay).await {
                        break;
                    }
                },
            }
        }

        info!("Indexer for chain {} ({}) received cancellation signal", self.chain_id, self.mode);
        Ok(())
    }

    /// Sleep for `duration`; `false` if cancelled first.
    async fn sleep(&self, cancellation_token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Run one iteration: index the block after the checkpoint if the followed
    /// head has reached it.
    pub async fn index_next(&self, cancellation_token: &CancellationToken) -> Result<Step> {
        // Nothing is written while fetching, so cancelling here is a plain drop.
        let fetched = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(Step::Cancelled),
            fetched = self.fetch_next() => fetched?,
        };

        match fetched {
            Some((block, receipts)) => self.write_block(cancellation_token, &block, &receipts).await,
            None => Ok(Step::Idle),
        }
    }

    async fn fetch_next(&self) -> Result<Option<(Block, Vec<Receipt>)>> {
        let checkpoint = self.load_checkpoint().await?;
        let next = match &checkpoint {
            Some(checkpoint) => checkpoint.block_number + 1,
            None => self.options.start_block,
        };

        let head = match self.mode {
            FinalityMode::Unfinalized => self.chain.block_number().await,
            FinalityMode::Finalized => self.chain.finalized_block_number().await,
        }
        .with_context(|| format!("Failed to refresh {} head", self.mode))?;

        if next > head {
            debug!("Chain {} ({}): waiting for block {} (head {})", self.chain_id, self.mode, next, head);
            return Ok(None);
        }

        let block = self.chain.block_by_number(next).await?;
        if block.number != next {
            bail!("requested block {} but node returned {}", next, block.number);
        }

        if let Some(checkpoint) = &checkpoint {
            if block.parent_hash != checkpoint.block_hash {
                warn!(
                    "Chain {} ({}): block {} does not extend checkpoint {} (parent {}, expected {}), reorg observed",
                    self.chain_id,
                    self.mode,
                    block.number,
                    checkpoint.block_number,
                    block.parent_hash,
                    checkpoint.block_hash
                );
            }
        }

        let receipts = self.chain.block_receipts(&block).await?;

        Ok(Some((block, receipts)))
    }

    async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let mut tx = self.db.begin().await?;
        let checkpoint = tx.find_checkpoint(self.chain_id, self.mode.is_finalized()).await;
        tx.rollback().await?;

        checkpoint.with_context(|| format!("Failed to load {} checkpoint", self.mode))
    }

    /// Write `block` and its checkpoint in one transaction.
    ///
    /// Any failure, and cancellation, rolls the transaction back.
    async fn write_block(
        &self,
        cancellation_token: &CancellationToken,
        block: &Block,
        receipts: &[Receipt],
    ) -> Result<Step> {
        let mut tx = self.db.begin().await?;

        let result = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => None,
            result = self.process_block(tx.as_mut(), block, receipts) => Some(result),
        };

        match result {
            None => {
                tx.rollback().await.context("Failed to roll back cancelled block")?;
                info!(
                    "Chain {} ({}): block {} rolled back on cancellation",
                    self.chain_id, self.mode, block.number
                );
                Ok(Step::Cancelled)
            },
            Some(Err(e)) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Failed to roll back block {}: {:#}", block.number, rollback_err);
                }
                Err(e.context(format!("Failed to index block {}", block.number)))
            },
            Some(Ok(())) => {
                tx.commit()
                    .await
                    .with_context(|| format!("Failed to commit block {}", block.number))?;
                Ok(Step::Indexed(block.number))
            },
        }
    }

    async fn process_block(
        &self,
        tx: &mut dyn DatabaseTransaction,
        block: &Block,
        receipts: &[Receipt],
    ) -> Result<()> {
        let finalized = self.mode.is_finalized();
        let checkpoint = Checkpoint::new(self.chain_id, finalized, block.number, block.hash);

        // Both tracks rewrite the same rows; hold the chain until commit.
        tx.lock_chain(self.chain_id).await?;

        match tx.find_checkpoint(self.chain_id, finalized).await? {
            Some(previous) if !previous.is_followed_by(&checkpoint) => {
                bail!(
                    "{} checkpoint of chain {} is at {}, refusing to move it to {}",
                    self.mode,
                    self.chain_id,
                    previous.block_number,
                    block.number
                );
            },
            None if block.number != self.options.start_block => {
                bail!(
                    "no {} checkpoint for chain {}, refusing to start at {}",
                    self.mode,
                    self.chain_id,
                    block.number
                );
            },
            _ => {},
        }

        if !finalized {
            if let Some(head) = tx.find_checkpoint(self.chain_id, true).await? {
                if head.block_number >= block.number {
                    debug!(
                        "Chain {} ({}): block {} is already finalized, keeping its rows",
                        self.chain_id, self.mode, block.number
                    );
                    return tx.save_checkpoint(&checkpoint).await;
                }
            }
        }

        self.handler.process(block, receipts, self.mode, tx).await?;
        tx.save_checkpoint(&checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abis::staking_v1::{Deposited, Staked},
        config::VSL_MAINNET,
        db::{memory::MemoryState, MemoryDatabase},
        testing::{block, event_log, receipt, rollup_contracts, FakeChain, FakeChipReader},
        worker::chip_fetcher::ChipFetcher,
    };
    use alloy::primitives::{Address, B256, U256};

    fn options(start_block: u64, retry_attempts: u32) -> WorkerOptions {
        WorkerOptions {
            start_block,
            poll_interval: Duration::from_millis(5),
            retry_attempts,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn handler(reader: FakeChipReader) -> Arc<EventHandler> {
        let fetcher = ChipFetcher::new(Arc::new(reader), 4);
        Arc::new(EventHandler::new(VSL_MAINNET, rollup_contracts(), Some(fetcher)).unwrap())
    }

    fn staking() -> Address {
        rollup_contracts().staking.unwrap()
    }

    fn deposit_receipt(block_number: u64, amount: u64) -> crate::chain::Receipt {
        let event = Deposited {
            nodeAddr: Address::repeat_byte(0xaa),
            amount: U256::from(amount),
        };
        receipt(block_number, 0, staking(), vec![event_log(staking(), &event, 0)])
    }

    fn worker(
        mode: FinalityMode,
        chain: &Arc<FakeChain>,
        db: &MemoryDatabase,
        options: WorkerOptions,
    ) -> ChainWorker {
        ChainWorker::new(
            mode,
            chain.clone(),
            Arc::new(db.clone()),
            handler(FakeChipReader::new()),
            options,
        )
    }

    fn checkpoint(state: &MemoryState, finalized: bool) -> Option<u64> {
        state.checkpoints.iter().find(|c| c.finalized == finalized).map(|c| c.block_number)
    }

    #[tokio::test]
    async fn test_checkpoint_advances_one_block_at_a_time() {
        let chain = Arc::new(FakeChain::new());
        for number in 5..=7 {
            chain.push(block(number), vec![deposit_receipt(number, number)]);
        }
        let db = MemoryDatabase::new();
        let worker = worker(FinalityMode::Unfinalized, &chain, &db, options(5, 3));
        let token = CancellationToken::new();

        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(5));
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(6));
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(7));
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Idle);

        let state = db.snapshot().await;
        assert_eq!(checkpoint(&state, false), Some(7));
        assert_eq!(checkpoint(&state, true), None);
        assert_eq!(state.checkpoints[0].block_hash, block(7).hash);
        assert_eq!(state.stake_transactions.len(), 3);
    }

    #[tokio::test]
    async fn test_finalized_track_follows_finalized_head() {
        let chain = Arc::new(FakeChain::new());
        for number in 0..=3 {
            chain.push(block(number), vec![deposit_receipt(number, 1)]);
        }
        chain.set_finalized(1);
        let db = MemoryDatabase::new();
        let worker = worker(FinalityMode::Finalized, &chain, &db, options(0, 3));
        let token = CancellationToken::new();

        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(0));
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(1));
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Idle);

        let state = db.snapshot().await;
        assert_eq!(checkpoint(&state, true), Some(1));
        assert!(state.stake_events.iter().all(|e| e.origin.finalized));
    }

    #[tokio::test]
    async fn test_unfinalized_track_keeps_finalized_rows() {
        let chain = Arc::new(FakeChain::new());
        for number in 0..=1 {
            chain.push(block(number), vec![deposit_receipt(number, 1)]);
        }
        let db = MemoryDatabase::new();
        let finalized = worker(FinalityMode::Finalized, &chain, &db, options(0, 3));
        let unfinalized = worker(FinalityMode::Unfinalized, &chain, &db, options(0, 3));
        let token = CancellationToken::new();

        // Cold start: the finalized track gets ahead during backfill.
        assert_eq!(finalized.index_next(&token).await.unwrap(), Step::Indexed(0));
        assert_eq!(finalized.index_next(&token).await.unwrap(), Step::Indexed(1));
        assert_eq!(unfinalized.index_next(&token).await.unwrap(), Step::Indexed(0));
        assert_eq!(unfinalized.index_next(&token).await.unwrap(), Step::Indexed(1));

        let state = db.snapshot().await;
        assert_eq!(checkpoint(&state, false), Some(1));
        assert_eq!(checkpoint(&state, true), Some(1));
        assert_eq!(state.stake_events.len(), 2);
        assert!(state.stake_events.iter().all(|e| e.origin.finalized));

        // Past the finalized head the unfinalized track writes again.
        chain.push(block(2), vec![deposit_receipt(2, 1)]);
        chain.set_finalized(1);
        assert_eq!(unfinalized.index_next(&token).await.unwrap(), Step::Indexed(2));

        let state = db.snapshot().await;
        let latest = state.stake_events.iter().find(|e| e.origin.block_number == 2).unwrap();
        assert!(!latest.origin.finalized);
    }

    #[tokio::test]
    async fn test_failed_block_keeps_previous_checkpoint() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(1), vec![deposit_receipt(1, 1)]);
        let staked = Staked {
            user: Address::repeat_byte(0x01),
            nodeAddr: Address::repeat_byte(0xaa),
            amount: U256::from(1u64),
            startTokenId: U256::from(4u64),
            endTokenId: U256::from(6u64),
        };
        chain.push(block(2), vec![receipt(2, 0, staking(), vec![event_log(staking(), &staked, 0)])]);

        let db = MemoryDatabase::new();
        let worker = ChainWorker::new(
            FinalityMode::Unfinalized,
            chain.clone(),
            Arc::new(db.clone()),
            handler(FakeChipReader::failing_on(U256::from(5u64))),
            options(1, 3),
        );
        let token = CancellationToken::new();

        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(1));
        let before = db.snapshot().await;

        assert!(worker.index_next(&token).await.is_err());
        assert_eq!(db.snapshot().await, before);
        assert_eq!(checkpoint(&before, false), Some(1));
    }

    #[tokio::test]
    async fn test_checkpoint_never_skips_blocks() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(3), vec![]);
        let db = MemoryDatabase::new();

        // Checkpoint at 1 while the next block handed over is 3.
        let mut tx = db.begin().await.unwrap();
        tx.save_checkpoint(&Checkpoint::new(VSL_MAINNET, false, 1, block(1).hash)).await.unwrap();
        tx.commit().await.unwrap();

        let worker = worker(FinalityMode::Unfinalized, &chain, &db, options(0, 3));
        let mut tx = db.begin().await.unwrap();
        let err = worker.process_block(tx.as_mut(), &block(3), &[]).await.unwrap_err();
        assert!(err.to_string().contains("refusing"));
    }

    #[tokio::test]
    async fn test_reorged_parent_is_reindexed_forward() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(1), vec![]);
        let mut orphan_child = block(2);
        orphan_child.parent_hash = B256::repeat_byte(0x99);
        chain.push(orphan_child, vec![]);

        let db = MemoryDatabase::new();
        let worker = worker(FinalityMode::Unfinalized, &chain, &db, options(1, 3));
        let token = CancellationToken::new();

        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(1));
        // Mismatch is logged, the track keeps going; the finalized track reconciles.
        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Indexed(2));
    }

    #[tokio::test]
    async fn test_run_gives_up_after_retry_attempts() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(0), vec![]);
        chain.fail_next_requests(u32::MAX);

        let db = MemoryDatabase::new();
        let worker = worker(FinalityMode::Unfinalized, &chain, &db, options(0, 3));

        let err = worker.run(CancellationToken::new()).await.unwrap_err();

        assert!(format!("{:#}", err).contains("failed 3 times in a row"));
        assert_eq!(chain.failed_requests(), 3);
        assert_eq!(db.snapshot().await, MemoryState::default());
    }

    #[tokio::test]
    async fn test_run_recovers_from_transient_failures() {
        let chain = Arc::new(FakeChain::new());
        chain.push(block(0), vec![deposit_receipt(0, 1)]);
        chain.fail_next_requests(2);

        let db = MemoryDatabase::new();
        let worker = worker(FinalityMode::Unfinalized, &chain, &db, options(0, 3));
        let token = CancellationToken::new();

        let run = {
            let token = token.clone();
            async move { worker.run(token).await }
        };
        let handle = tokio::spawn(run);

        for _ in 0..200 {
            if checkpoint(&db.snapshot().await, false) == Some(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();

        handle.await.unwrap().unwrap();
        assert_eq!(checkpoint(&db.snapshot().await, false), Some(0));
    }

    #[tokio::test]
    async fn test_cancellation_rolls_back_open_block() {
        let chain = Arc::new(FakeChain::new());
        let staked = Staked {
            user: Address::repeat_byte(0x01),
            nodeAddr: Address::repeat_byte(0xaa),
            amount: U256::from(1u64),
            startTokenId: U256::from(1u64),
            endTokenId: U256::from(3u64),
        };
        chain.push(block(0), vec![receipt(0, 0, staking(), vec![event_log(staking(), &staked, 0)])]);

        let reader = FakeChipReader::new().stalled();
        let db = MemoryDatabase::new();
        let worker = ChainWorker::new(
            FinalityMode::Unfinalized,
            chain.clone(),
            Arc::new(db.clone()),
            handler(reader),
            options(0, 3),
        );

        let token = CancellationToken::new();
        let cancel = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        };
        tokio::spawn(cancel);

        assert_eq!(worker.index_next(&token).await.unwrap(), Step::Cancelled);
        assert_eq!(db.snapshot().await, MemoryState::default());
    }
}
