//! Scripted chain and chip fakes plus fixture builders for unit tests.

use alloy::{
    primitives::{address, keccak256, Address, B256, U256},
    sol_types::SolEvent,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use crate::{
    chain::{Block, ChainClient, Log, Receipt},
    config::{contracts_for, ChainContracts, VSL_MAINNET},
    worker::chip_fetcher::ChipReader,
};

pub const CHIPS: Address = address!("00000000000000000000000000000000000000c1");

/// The rollup deployment with the chips proxy filled in.
pub fn rollup_contracts() -> ChainContracts {
    let mut contracts = contracts_for(VSL_MAINNET).cloned().unwrap();
    contracts.chips = Some(CHIPS);
    contracts
}

pub fn block_hash(number: u64) -> B256 {
    keccak256(number.to_be_bytes())
}

/// Block `number` on a chain where every block extends the previous one.
pub fn block(number: u64) -> Block {
    Block {
        number,
        hash: block_hash(number),
        parent_hash: number.checked_sub(1).map(block_hash).unwrap_or_default(),
        timestamp: 1_700_000_000 + number * 2,
        transactions: Vec::new(),
    }
}

/// Successful call to `to` at `(block_number, transaction_index)`.
pub fn receipt(block_number: u64, transaction_index: u64, to: Address, logs: Vec<Log>) -> Receipt {
    let mut key = block_number.to_be_bytes().to_vec();
    key.extend_from_slice(&transaction_index.to_be_bytes());

    Receipt {
        transaction_hash: keccak256(key),
        transaction_index,
        from: Address::repeat_byte(0xf0),
        to: Some(to),
        status: true,
        logs,
    }
}

pub fn event_log<E: SolEvent>(address: Address, event: &E, log_index: u64) -> Log {
    Log::new(address, event.encode_log_data(), log_index)
}

/// In-memory chain. The head is the highest pushed block; the finalized head
/// defaults to it.
#[derive(Default)]
pub struct FakeChain {
    blocks: Mutex<BTreeMap<u64, (Block, Vec<Receipt>)>>,
    finalized: Mutex<Option<u64>>,
    fail_remaining: AtomicU32,
    failed: AtomicU32,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mut block: Block, receipts: Vec<Receipt>) {
        block.transactions = receipts.iter().map(|r| r.transaction_hash).collect();
        self.blocks.lock().unwrap().insert(block.number, (block, receipts));
    }

    pub fn set_finalized(&self, number: u64) {
        *self.finalized.lock().unwrap() = Some(number);
    }

    /// Make the next `count` requests fail.
    pub fn fail_next_requests(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn failed_requests(&self) -> u32 {
        self.failed.load(Ordering::SeqCst)
    }

    fn request(&self) -> Result<()> {
        let injected = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected {
            self.failed.fetch_add(1, Ordering::SeqCst);
            return Err(anyhow!("injected RPC failure"));
        }

        Ok(())
    }

    fn head(&self) -> u64 {
        self.blocks.lock().unwrap().keys().next_back().copied().unwrap_or_default()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> Result<u64> {
        self.request()?;
        Ok(VSL_MAINNET)
    }

    async fn block_number(&self) -> Result<u64> {
        self.request()?;
        Ok(self.head())
    }

    async fn finalized_block_number(&self) -> Result<u64> {
        self.request()?;
        let finalized = *self.finalized.lock().unwrap();
        Ok(finalized.unwrap_or_else(|| self.head()))
    }

    async fn block_by_number(&self, number: u64) -> Result<Block> {
        self.request()?;
        self.blocks
            .lock()
            .unwrap()
            .get(&number)
            .map(|(block, _)| block.clone())
            .ok_or_else(|| anyhow!("block {} not found", number))
    }

    async fn block_receipts(&self, block: &Block) -> Result<Vec<Receipt>> {
        self.request()?;
        self.blocks
            .lock()
            .unwrap()
            .get(&block.number)
            .map(|(_, receipts)| receipts.clone())
            .ok_or_else(|| anyhow!("receipts of block {} not found", block.number))
    }
}

/// Chip reader answering from a formula. Lookups of `failing` error out;
/// a stalled reader never answers.
#[derive(Default)]
pub struct FakeChipReader {
    failing: Option<U256>,
    stalled: bool,
    last_block: Mutex<Option<u64>>,
}

impl FakeChipReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(token_id: U256) -> Self {
        Self {
            failing: Some(token_id),
            ..Self::default()
        }
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn token_uri_of(token_id: U256) -> String {
        format!("ipfs://chips/{}", token_id)
    }

    pub fn value_of(token_id: U256) -> U256 {
        token_id * U256::from(1_000u64)
    }

    /// Block height of the latest lookup.
    pub fn last_block(&self) -> Option<u64> {
        *self.last_block.lock().unwrap()
    }

    async fn lookup(&self, token_id: U256, block_number: u64) -> Result<()> {
        *self.last_block.lock().unwrap() = Some(block_number);

        if self.stalled {
            std::future::pending::<()>().await;
        }
        if self.failing == Some(token_id) {
            return Err(anyhow!("chip {} is unreadable", token_id));
        }

        Ok(())
    }
}

#[async_trait]
impl ChipReader for FakeChipReader {
    async fn token_uri(&self, token_id: U256, block_number: u64) -> Result<String> {
        self.lookup(token_id, block_number).await?;
        Ok(Self::token_uri_of(token_id))
    }

    async fn chip_value(&self, token_id: U256, block_number: u64) -> Result<U256> {
        self.lookup(token_id, block_number).await?;
        Ok(Self::value_of(token_id))
    }
}
