//! Block processing: routes every log of a block to its handler.
//!
//! Processing is delete-then-insert. All rows previously derived from the
//! block number are removed first, then rebuilt from the receipts, so
//! reprocessing a block (restart, finalized pass after an unfinalized one,
//! reorg) always converges on the rows of the block seen last.

use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use log::debug;
use rustc_hash::FxHashMap;

use crate::{
    chain::{Block, Log, Receipt},
    config::{ChainContracts, Layer, StakingVersion},
    db::DatabaseTransaction,
    worker::{
        chip_fetcher::ChipFetcher,
        handlers::{self, HandlerRegistry, LogContext},
        FinalityMode,
    },
};

/// Contract family a log address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Bridge,
    Staking,
    Chips,
}

/// Routes logs of one chain to the handlers of its contracts.
pub struct EventHandler {
    chain_id: u64,
    contracts: ChainContracts,
    routes: FxHashMap<Address, Family>,
    bridge: HandlerRegistry,
    staking_v1: HandlerRegistry,
    staking_v2: HandlerRegistry,
    chips: HandlerRegistry,
}

impl EventHandler {
    /// Build the routing table for `contracts`.
    ///
    /// Rollup chains need `chip_fetcher` for stake enrichment; settlement
    /// chains only carry the bridge and ignore it.
    pub fn new(
        chain_id: u64,
        contracts: ChainContracts,
        chip_fetcher: Option<ChipFetcher>,
    ) -> Result<Self> {
        let mut routes = FxHashMap::default();
        routes.insert(contracts.standard_bridge, Family::Bridge);
        if let Some(portal) = contracts.optimism_portal {
            routes.insert(portal, Family::Bridge);
        }

        let bridge = handlers::bridge::registry(&contracts)?;
        let mut staking_v1 = HandlerRegistry::new();
        let mut staking_v2 = HandlerRegistry::new();
        let mut chips = HandlerRegistry::new();

        if contracts.layer == Layer::L2 {
            let staking = contracts
                .staking
                .ok_or_else(|| anyhow!("{} has no staking contract", contracts.name))?;
            let chips_address = contracts
                .chips
                .ok_or_else(|| anyhow!("{} has no chips contract", contracts.name))?;
            let fetcher = chip_fetcher
                .ok_or_else(|| anyhow!("{} needs a chip fetcher", contracts.name))?;

            routes.insert(staking, Family::Staking);
            routes.insert(chips_address, Family::Chips);

            staking_v1 = handlers::staking::registry(fetcher.clone());
            staking_v2 = handlers::staking_v2::registry(&staking_v1, fetcher);
            chips = handlers::chips::registry();
        }

        Ok(Self {
            chain_id,
            contracts,
            routes,
            bridge,
            staking_v1,
            staking_v2,
            chips,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Rewrite every row derived from `block` inside `tx`.
    pub async fn process(
        &self,
        block: &Block,
        receipts: &[Receipt],
        finality: FinalityMode,
        tx: &mut dyn DatabaseTransaction,
    ) -> Result<()> {
        self.delete_block(block.number, tx).await?;

        let mut receipts: Vec<&Receipt> = receipts.iter().collect();
        receipts.sort_by_key(|receipt| receipt.transaction_index);

        for receipt in receipts {
            if !receipt.is_indexable() {
                debug!(
                    "Skipping tx {} (status: {}, contract creation: {})",
                    receipt.transaction_hash,
                    receipt.status,
                    receipt.to.is_none()
                );
                continue;
            }

            let mut logs = receipt.logs.clone();
            logs.sort_by_key(|log| log.log_index);

            for position in 0..logs.len() {
                let ctx = LogContext {
                    chain_id: self.chain_id,
                    finality,
                    block,
                    receipt,
                    logs: &logs,
                    position,
                };
                self.process_log(&ctx, tx).await?;
            }
        }

        Ok(())
    }

    async fn delete_block(
        &self,
        block_number: u64,
        tx: &mut dyn DatabaseTransaction,
    ) -> Result<()> {
        let chain_id = self.chain_id;

        tx.delete_stake_transactions_by_block_number(chain_id, block_number).await?;
        tx.delete_stake_events_by_block_number(chain_id, block_number).await?;
        tx.delete_bridge_transactions_by_block_number(chain_id, block_number).await?;
        tx.delete_bridge_events_by_block_number(chain_id, block_number).await?;
        tx.delete_node_events_by_block_number(chain_id, block_number).await?;

        Ok(())
    }

    async fn process_log(
        &self,
        ctx: &LogContext<'_>,
        tx: &mut dyn DatabaseTransaction,
    ) -> Result<()> {
        let log = ctx.log();

        if log.removed {
            debug!("Skipping removed log {} of tx {}", log.log_index, ctx.receipt.transaction_hash);
            return Ok(());
        }

        let Some(topic0) = log.topic0() else {
            return Ok(());
        };

        let Some(registry) = self.registry_for(ctx, log) else {
            return Ok(());
        };

        let Some(handler) = registry.get(topic0) else {
            debug!(
                "No handler for event {} from {} at block {}",
                topic0, log.address, ctx.block.number
            );
            return Ok(());
        };

        handler.handle(ctx, tx).await.with_context(|| {
            format!(
                "Failed to handle log {} of tx {} in block {}",
                log.log_index, ctx.receipt.transaction_hash, ctx.block.number
            )
        })
    }

    /// Handlers for the contract that emitted `log`, at the ABI version in
    /// force for its transaction.
    fn registry_for(&self, ctx: &LogContext<'_>, log: &Log) -> Option<&HandlerRegistry> {
        let family = self.routes.get(&log.address)?;

        Some(match family {
            Family::Bridge => &self.bridge,
            Family::Chips => &self.chips,
            Family::Staking => {
                match self
                    .contracts
                    .staking_version_at(ctx.block.number, ctx.receipt.transaction_index)
                {
                    StakingVersion::V1 => &self.staking_v1,
                    StakingVersion::V2 => &self.staking_v2,
                }
            },
        })
    }
}
