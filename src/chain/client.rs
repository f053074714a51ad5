use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    network::{AnyNetwork, AnyRpcBlock, AnyTransactionReceipt},
    providers::{DynProvider, Provider, ProviderBuilder},
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::chain::types::{Block, Log, Receipt};

/// Timeout for individual RPC calls (30 seconds)
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only view of a chain used by the indexer.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Latest block number.
    async fn block_number(&self) -> Result<u64>;

    /// Number of the latest block tagged `finalized` by the node.
    async fn finalized_block_number(&self) -> Result<u64>;

    async fn block_by_number(&self, number: u64) -> Result<Block>;

    /// Receipts of every transaction in the block, in transaction order.
    async fn block_receipts(&self, block: &Block) -> Result<Vec<Receipt>>;
}

/// JSON-RPC implementation of [`ChainClient`] on top of an alloy provider.
///
/// The provider speaks [`AnyNetwork`]: rollup blocks open with an L1
/// attributes deposit transaction (type `0x7e`) that the Ethereum network
/// types reject.
#[derive(Clone)]
pub struct RpcChainClient {
    provider: DynProvider<AnyNetwork>,
}

impl RpcChainClient {
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url = Url::parse(rpc_url).context("Invalid RPC URL")?;
        let provider =
            DynProvider::new(ProviderBuilder::new().network::<AnyNetwork>().connect_http(url));

        Ok(Self {
            provider,
        })
    }

    /// Underlying provider, shared with the contract bindings.
    pub fn provider(&self) -> &DynProvider<AnyNetwork> {
        &self.provider
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn chain_id(&self) -> Result<u64> {
        tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.get_chain_id())
            .await
            .context("eth_chainId timeout")?
            .context("eth_chainId failed")
    }

    async fn block_number(&self) -> Result<u64> {
        tokio::time::timeout(RPC_CALL_TIMEOUT, self.provider.get_block_number())
            .await
            .context("eth_blockNumber timeout")?
            .context("eth_blockNumber failed")
    }

    async fn finalized_block_number(&self) -> Result<u64> {
        let header = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.provider.get_block_by_number(BlockNumberOrTag::Finalized),
        )
        .await
        .context("finalized block timeout")?
        .context("Failed to get finalized block")?
        .ok_or_else(|| anyhow!("node returned no finalized block"))?;

        Ok(header.header.number)
    }

    async fn block_by_number(&self, number: u64) -> Result<Block> {
        let block = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.provider.get_block_by_number(BlockNumberOrTag::Number(number)),
        )
        .await
        .with_context(|| format!("eth_getBlockByNumber({}) timeout", number))?
        .with_context(|| format!("Failed to get block {}", number))?
        .ok_or_else(|| anyhow!("block {} not found", number))?;

        Ok(block_from_rpc(&block))
    }

    async fn block_receipts(&self, block: &Block) -> Result<Vec<Receipt>> {
        let receipts = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.provider.get_block_receipts(BlockId::from(block.hash)),
        )
        .await
        .with_context(|| format!("eth_getBlockReceipts({}) timeout", block.number))?
        .with_context(|| format!("Failed to get receipts of block {}", block.number))?
        .ok_or_else(|| anyhow!("receipts of block {} not found", block.number))?;

        if receipts.len() != block.transactions.len() {
            return Err(anyhow!(
                "block {} has {} transactions but {} receipts",
                block.number,
                block.transactions.len(),
                receipts.len()
            ));
        }

        receipts.iter().map(receipt_from_rpc).collect()
    }
}

fn block_from_rpc(block: &AnyRpcBlock) -> Block {
    Block {
        number: block.header.number,
        hash: block.header.hash,
        parent_hash: block.header.parent_hash,
        timestamp: block.header.timestamp,
        transactions: block.transactions.hashes().collect(),
    }
}

fn receipt_from_rpc(receipt: &AnyTransactionReceipt) -> Result<Receipt> {
    let transaction_index = receipt
        .transaction_index
        .ok_or_else(|| anyhow!("receipt {} has no transaction index", receipt.transaction_hash))?;
    let envelope = &receipt.inner.inner;

    let logs = envelope
        .logs()
        .iter()
        .map(|log| {
            let log_index = log
                .log_index
                .ok_or_else(|| anyhow!("log of {} has no log index", receipt.transaction_hash))?;
            Ok(Log {
                address: log.inner.address,
                data: log.inner.data.clone(),
                log_index,
                removed: log.removed,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Receipt {
        transaction_hash: receipt.transaction_hash,
        transaction_index,
        from: receipt.from,
        to: receipt.to,
        status: envelope.status(),
        logs,
    })
}
