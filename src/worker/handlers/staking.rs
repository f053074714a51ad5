//! Staking contract handlers, v1 ABI.
//!
//! Single-step actions (deposit, stake) are keyed by transaction hash.
//! Two-step ones (withdraw, unstake) are keyed by the on-chain request ID so
//! the claim, emitted in a later transaction, lands on the same record.

use alloy::primitives::{Address, B256, U256};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::json;

use crate::{
    abis::staking_v1::{
        Deposited, NodeCreated, NodeUpdated, RewardDistributed, Staked, UnstakeClaimed,
        UnstakeRequested, WithdrawRequested, WithdrawalClaimed,
    },
    db::{
        models::{
            Epoch, Node, NodeEvent, NodeEventType, NodeUpdate, RewardedNode, StakeChip,
            StakeEvent, StakeEventType, StakeTransaction,
        },
        DatabaseTransaction,
    },
    utils::{timestamp_to_datetime, u256_to_b256},
    worker::{
        chip_fetcher::{ChipDetails, ChipFetcher},
        handlers::{HandlerRegistry, LogContext, LogHandler},
    },
};

/// Handlers for every event of the v1 staking ABI.
pub fn registry(chips: ChipFetcher) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry
        .on::<Deposited>(DepositedHandler)
        .on::<WithdrawRequested>(WithdrawRequestedHandler)
        .on::<WithdrawalClaimed>(WithdrawalClaimedHandler)
        .on::<Staked>(StakedHandler {
            chips,
        })
        .on::<UnstakeRequested>(UnstakeRequestedHandler)
        .on::<UnstakeClaimed>(UnstakeClaimedHandler)
        .on::<RewardDistributed>(RewardDistributedHandler)
        .on::<NodeCreated>(NodeCreatedHandler)
        .on::<NodeUpdated>(NodeUpdatedHandler);

    registry
}

/// Write a stake transaction and the event that opened it.
#[allow(clippy::too_many_arguments)]
pub(super) async fn save_stake(
    ctx: &LogContext<'_>,
    tx: &mut dyn DatabaseTransaction,
    id: B256,
    event_type: StakeEventType,
    user: Address,
    node: Address,
    value: U256,
    chips: Vec<U256>,
) -> Result<()> {
    let transaction = StakeTransaction {
        id,
        transaction_type: event_type.transaction_type(),
        chain_id: ctx.chain_id,
        user,
        node,
        value,
        chips,
        block_timestamp: ctx.block_timestamp(),
        block_number: ctx.block.number,
        transaction_index: ctx.receipt.transaction_index,
    };

    tx.save_stake_transaction(&transaction).await?;
    save_stake_event(ctx, tx, id, event_type).await
}

pub(super) async fn save_stake_event(
    ctx: &LogContext<'_>,
    tx: &mut dyn DatabaseTransaction,
    id: B256,
    event_type: StakeEventType,
) -> Result<()> {
    tx.save_stake_event(&StakeEvent::new(id, event_type, ctx.origin())).await
}

/// Chips minted to `owner` by the handled log.
pub(super) fn minted_chips(
    ctx: &LogContext<'_>,
    details: Vec<ChipDetails>,
    owner: Address,
    node: Address,
) -> Vec<StakeChip> {
    details
        .into_iter()
        .map(|chip| StakeChip {
            id: chip.id,
            owner,
            node,
            value: chip.value,
            metadata: chip.metadata,
            block_number: ctx.block.number,
            owner_block_number: ctx.block.number,
            owner_log_index: ctx.log().log_index,
            owner_finalized: ctx.is_finalized(),
        })
        .collect()
}

/// Upper bound on the chips a single `Staked` event may mint.
const MAX_STAKED_CHIPS: u64 = 10_000;

/// Token IDs `start..=end`.
fn chip_range(start: U256, end: U256) -> Result<Vec<U256>> {
    if end < start {
        bail!("invalid chip range {}..={}", start, end);
    }
    if end - start >= U256::from(MAX_STAKED_CHIPS) {
        bail!(
            "failed to decode chip range {}..={}: more than {} chips",
            start,
            end,
            MAX_STAKED_CHIPS
        );
    }

    Ok(std::iter::successors(Some(start), |id| id.checked_add(U256::from(1u8)))
        .take_while(|id| *id <= end)
        .collect())
}

struct DepositedHandler;

#[async_trait]
impl LogHandler for DepositedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<Deposited>()?;

        save_stake(
            ctx,
            tx,
            ctx.receipt.transaction_hash,
            StakeEventType::DepositDeposited,
            ctx.receipt.from,
            event.nodeAddr,
            event.amount,
            Vec::new(),
        )
        .await
    }
}

struct WithdrawRequestedHandler;

#[async_trait]
impl LogHandler for WithdrawRequestedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<WithdrawRequested>()?;

        save_stake(
            ctx,
            tx,
            u256_to_b256(event.requestId),
            StakeEventType::WithdrawRequested,
            ctx.receipt.from,
            event.nodeAddr,
            event.amount,
            Vec::new(),
        )
        .await
    }
}

struct WithdrawalClaimedHandler;

#[async_trait]
impl LogHandler for WithdrawalClaimedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<WithdrawalClaimed>()?;
        save_stake_event(ctx, tx, u256_to_b256(event.requestId), StakeEventType::WithdrawClaimed)
            .await
    }
}

struct StakedHandler {
    chips: ChipFetcher,
}

#[async_trait]
impl LogHandler for StakedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<Staked>()?;
        let ids = chip_range(event.startTokenId, event.endTokenId)?;

        let details = self.chips.fetch(&ids, ctx.block.number).await.with_context(|| {
            format!("Failed to fetch chips of stake {}", ctx.receipt.transaction_hash)
        })?;

        save_stake(
            ctx,
            tx,
            ctx.receipt.transaction_hash,
            StakeEventType::StakeStaked,
            event.user,
            event.nodeAddr,
            event.amount,
            ids,
        )
        .await?;

        tx.save_stake_chips(&minted_chips(ctx, details, event.user, event.nodeAddr)).await
    }
}

struct UnstakeRequestedHandler;

#[async_trait]
impl LogHandler for UnstakeRequestedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<UnstakeRequested>()?;

        save_stake(
            ctx,
            tx,
            u256_to_b256(event.requestId),
            StakeEventType::UnstakeRequested,
            event.user,
            event.nodeAddr,
            event.unstakeAmount,
            event.chipsIds,
        )
        .await
    }
}

struct UnstakeClaimedHandler;

#[async_trait]
impl LogHandler for UnstakeClaimedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<UnstakeClaimed>()?;
        save_stake_event(ctx, tx, u256_to_b256(event.requestId), StakeEventType::UnstakeClaimed)
            .await
    }
}

/// Epoch rows are read as final by settlement, so only the finalized track
/// writes them.
struct RewardDistributedHandler;

#[async_trait]
impl LogHandler for RewardDistributedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        if !ctx.is_finalized() {
            debug!(
                "Deferring RewardDistributed of block {} to the finalized track",
                ctx.block.number
            );
            return Ok(());
        }

        let event = ctx.decode::<RewardDistributed>()?;
        tx.save_epoch(&epoch(ctx, event)?).await
    }
}

fn epoch(ctx: &LogContext<'_>, event: RewardDistributed) -> Result<Epoch> {
    let nodes = event.nodeAddrs.len();
    if [
        event.operationRewards.len(),
        event.stakingRewards.len(),
        event.taxCollected.len(),
        event.requestCounts.len(),
    ]
    .iter()
    .any(|len| *len != nodes)
    {
        bail!("RewardDistributed for epoch {} has mismatched array lengths", event.epoch);
    }

    let id = u64::try_from(event.epoch).context("epoch number overflows u64")?;
    let start = u64::try_from(event.startTimestamp).context("epoch start overflows u64")?;
    let end = u64::try_from(event.endTimestamp).context("epoch end overflows u64")?;

    let sum = |values: &[U256]| -> Result<U256> {
        values.iter().try_fold(U256::ZERO, |total, value| {
            total.checked_add(*value).context("epoch total overflows uint256")
        })
    };

    let reward_items = (0..nodes)
        .map(|i| RewardedNode {
            epoch_id: id,
            index: i as u64,
            transaction_hash: ctx.receipt.transaction_hash,
            node_address: event.nodeAddrs[i],
            operation_rewards: event.operationRewards[i],
            staking_rewards: event.stakingRewards[i],
            tax_collected: event.taxCollected[i],
            request_count: event.requestCounts[i],
        })
        .collect();

    Ok(Epoch {
        id,
        chain_id: ctx.chain_id,
        start_timestamp: timestamp_to_datetime(start),
        end_timestamp: timestamp_to_datetime(end),
        transaction_hash: ctx.receipt.transaction_hash,
        transaction_index: ctx.receipt.transaction_index,
        block_hash: ctx.block.hash,
        block_number: ctx.block.number,
        block_timestamp: ctx.block_timestamp(),
        total_operation_rewards: sum(&event.operationRewards)?,
        total_staking_rewards: sum(&event.stakingRewards)?,
        total_rewarded_nodes: nodes as u64,
        total_request_counts: sum(&event.requestCounts)?,
        reward_items,
    })
}

pub(super) async fn save_node_event(
    ctx: &LogContext<'_>,
    tx: &mut dyn DatabaseTransaction,
    address: Address,
    event_type: NodeEventType,
    metadata: serde_json::Value,
) -> Result<()> {
    tx.save_node_event(&NodeEvent {
        address,
        event_type,
        metadata,
        origin: ctx.origin(),
    })
    .await
}

struct NodeCreatedHandler;

#[async_trait]
impl LogHandler for NodeCreatedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<NodeCreated>()?;

        let metadata = json!({
            "nodeId": event.nodeId.to_string(),
            "name": event.name.clone(),
            "description": event.description.clone(),
            "taxRateBasisPoints": event.taxRateBasisPoints,
            "publicGood": event.publicGood,
            "alpha": event.alpha,
        });
        save_node_event(ctx, tx, event.nodeAddr, NodeEventType::Created, metadata).await?;

        if !ctx.is_finalized() {
            return Ok(());
        }

        tx.save_node(&Node {
            address: event.nodeAddr,
            id: event.nodeId,
            name: event.name,
            description: event.description,
            tax_rate_basis_points: event.taxRateBasisPoints,
            is_public_good: event.publicGood,
            alpha: event.alpha,
            created_at_block: ctx.block.number,
            created_at: ctx.block_timestamp(),
        })
        .await
    }
}

struct NodeUpdatedHandler;

#[async_trait]
impl LogHandler for NodeUpdatedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<NodeUpdated>()?;

        let metadata = json!({
            "name": event.name.clone(),
            "description": event.description.clone(),
        });
        save_node_event(ctx, tx, event.nodeAddr, NodeEventType::Updated, metadata).await?;

        if !ctx.is_finalized() {
            return Ok(());
        }

        tx.batch_update_nodes(&[NodeUpdate {
            address: event.nodeAddr,
            name: Some(event.name),
            description: Some(event.description),
            ..Default::default()
        }])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_range_is_inclusive() {
        let ids = chip_range(U256::from(10u64), U256::from(12u64)).unwrap();
        assert_eq!(ids, vec![U256::from(10u64), U256::from(11u64), U256::from(12u64)]);

        assert_eq!(chip_range(U256::from(7u64), U256::from(7u64)).unwrap().len(), 1);
        assert!(chip_range(U256::from(12u64), U256::from(10u64)).is_err());
        assert_eq!(chip_range(U256::MAX, U256::MAX).unwrap(), vec![U256::MAX]);
    }

    #[test]
    fn test_chip_range_is_capped() {
        let start = U256::from(1u64);
        let last = start + U256::from(MAX_STAKED_CHIPS - 1);
        assert_eq!(chip_range(start, last).unwrap().len(), MAX_STAKED_CHIPS as usize);

        let err = chip_range(start, last + U256::from(1u64)).unwrap_err();
        assert!(err.to_string().contains("more than 10000 chips"));
        assert!(chip_range(U256::ZERO, U256::MAX).is_err());
    }
}
