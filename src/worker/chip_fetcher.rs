use alloy::{
    eips::BlockId,
    network::AnyNetwork,
    primitives::{Address, U256},
    providers::DynProvider,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::{
    abis::{
        chips::IChips::IChipsInstance, staking_v1::IStaking::IStakingInstance, IChips, IStaking,
    },
    chain::client::RPC_CALL_TIMEOUT,
};

/// Read-only chip lookups, pinned to a block height.
#[async_trait]
pub trait ChipReader: Send + Sync {
    async fn token_uri(&self, token_id: U256, block_number: u64) -> Result<String>;

    /// Stake currently backing the chip.
    async fn chip_value(&self, token_id: U256, block_number: u64) -> Result<U256>;
}

/// [`ChipReader`] backed by the chips and staking contracts.
#[derive(Clone)]
pub struct RpcChipReader {
    chips: IChipsInstance<DynProvider<AnyNetwork>, AnyNetwork>,
    staking: IStakingInstance<DynProvider<AnyNetwork>, AnyNetwork>,
}

impl RpcChipReader {
    pub fn new(provider: DynProvider<AnyNetwork>, chips: Address, staking: Address) -> Self {
        Self {
            chips: IChips::new(chips, provider.clone()),
            staking: IStaking::new(staking, provider),
        }
    }
}

#[async_trait]
impl ChipReader for RpcChipReader {
    async fn token_uri(&self, token_id: U256, block_number: u64) -> Result<String> {
        tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.chips.tokenURI(token_id).block(BlockId::number(block_number)).call(),
        )
        .await
        .with_context(|| format!("tokenURI({}) timeout", token_id))?
        .with_context(|| format!("tokenURI({}) at block {} failed", token_id, block_number))
    }

    async fn chip_value(&self, token_id: U256, block_number: u64) -> Result<U256> {
        let info = tokio::time::timeout(
            RPC_CALL_TIMEOUT,
            self.staking.getChipInfo(token_id).block(BlockId::number(block_number)).call(),
        )
        .await
        .with_context(|| format!("getChipInfo({}) timeout", token_id))?
        .with_context(|| format!("getChipInfo({}) at block {} failed", token_id, block_number))?;

        Ok(info.tokens)
    }
}

/// Chip fields read from chain during enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipDetails {
    pub id: U256,
    pub metadata: String,
    pub value: U256,
}

/// Fetches chip details with bounded concurrency.
#[derive(Clone)]
pub struct ChipFetcher {
    reader: Arc<dyn ChipReader>,
    concurrency: usize,
}

impl ChipFetcher {
    pub fn new(reader: Arc<dyn ChipReader>, concurrency: usize) -> Self {
        Self {
            reader,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch details of every chip in `ids`, in input order.
    ///
    /// At most `concurrency` lookups are in flight. The first failure drops
    /// the lookups still pending and is returned; no partial result escapes.
    pub async fn fetch(&self, ids: &[U256], block_number: u64) -> Result<Vec<ChipDetails>> {
        let reader = self.reader.as_ref();

        futures::stream::iter(ids.iter().copied())
            .map(|id| async move {
                let (metadata, value) = tokio::try_join!(
                    reader.token_uri(id, block_number),
                    reader.chip_value(id, block_number)
                )?;

                Ok::<_, anyhow::Error>(ChipDetails {
                    id,
                    metadata,
                    value,
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}
