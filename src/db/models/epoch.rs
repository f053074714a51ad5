use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reward distribution (PostgreSQL)
///
/// Primary Key: (id, transaction_hash)
///
/// Only written by the finalized track: settlement reads these rows as final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: u64,
    pub chain_id: u64,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub total_operation_rewards: U256,
    pub total_staking_rewards: U256,
    pub total_rewarded_nodes: u64,
    pub total_request_counts: U256,
    pub reward_items: Vec<RewardedNode>,
}

/// Per-node share of an [`Epoch`] (PostgreSQL)
///
/// Primary Key: (epoch_id, transaction_hash, index)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardedNode {
    pub epoch_id: u64,
    pub index: u64,
    pub transaction_hash: B256,
    pub node_address: Address,
    pub operation_rewards: U256,
    pub staking_rewards: U256,
    pub tax_collected: U256,
    pub request_count: U256,
}
