//! Staking contract handlers, v2 ABI.
//!
//! v2 kept every v1 event and added chip merging and a dedicated tax rate
//! setter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use crate::{
    abis::staking_v2::{ChipsMerged, NodeTaxRateBasisPointsSet},
    db::{
        models::{NodeEventType, NodeUpdate, StakeEventType},
        DatabaseTransaction,
    },
    worker::{
        chip_fetcher::ChipFetcher,
        handlers::{
            staking::{minted_chips, save_node_event, save_stake},
            HandlerRegistry, LogContext, LogHandler,
        },
    },
};

/// The v1 handlers plus the v2-only events.
pub fn registry(v1: &HandlerRegistry, chips: ChipFetcher) -> HandlerRegistry {
    let mut registry = v1.clone();

    registry
        .on::<ChipsMerged>(ChipsMergedHandler {
            chips,
        })
        .on::<NodeTaxRateBasisPointsSet>(NodeTaxRateBasisPointsSetHandler);

    registry
}

/// Burns `burnedTokenIds` into a freshly minted chip. The burned chips follow
/// their own Transfer events to the zero address.
struct ChipsMergedHandler {
    chips: ChipFetcher,
}

#[async_trait]
impl LogHandler for ChipsMergedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<ChipsMerged>()?;

        let details = self
            .chips
            .fetch(&[event.newTokenId], ctx.block.number)
            .await
            .with_context(|| format!("Failed to fetch merged chip {}", event.newTokenId))?;
        let value = details.first().map(|chip| chip.value).unwrap_or_default();

        save_stake(
            ctx,
            tx,
            ctx.receipt.transaction_hash,
            StakeEventType::MergeChipsMerged,
            event.user,
            event.nodeAddr,
            value,
            event.burnedTokenIds,
        )
        .await?;

        tx.save_stake_chips(&minted_chips(ctx, details, event.user, event.nodeAddr)).await
    }
}

struct NodeTaxRateBasisPointsSetHandler;

#[async_trait]
impl LogHandler for NodeTaxRateBasisPointsSetHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<NodeTaxRateBasisPointsSet>()?;

        let metadata = json!({ "taxRateBasisPoints": event.taxRateBasisPoints });
        save_node_event(ctx, tx, event.nodeAddr, NodeEventType::TaxRateUpdated, metadata).await?;

        if !ctx.is_finalized() {
            return Ok(());
        }

        tx.batch_update_nodes(&[NodeUpdate {
            address: event.nodeAddr,
            tax_rate_basis_points: Some(event.taxRateBasisPoints),
            ..Default::default()
        }])
        .await
    }
}
