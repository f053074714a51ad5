use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::EventOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeTransactionType {
    Deposit,
    Withdraw,
    Stake,
    Unstake,
    MergeChips,
}

impl StakeTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::MergeChips => "merge_chips",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeEventType {
    DepositDeposited,
    WithdrawRequested,
    WithdrawClaimed,
    StakeStaked,
    UnstakeRequested,
    UnstakeClaimed,
    MergeChipsMerged,
}

impl StakeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepositDeposited => "deposited",
            Self::WithdrawRequested => "withdraw_requested",
            Self::WithdrawClaimed => "withdraw_claimed",
            Self::StakeStaked => "staked",
            Self::UnstakeRequested => "unstake_requested",
            Self::UnstakeClaimed => "unstake_claimed",
            Self::MergeChipsMerged => "merged",
        }
    }

    /// Transaction family the event belongs to.
    pub fn transaction_type(&self) -> StakeTransactionType {
        match self {
            Self::DepositDeposited => StakeTransactionType::Deposit,
            Self::WithdrawRequested | Self::WithdrawClaimed => StakeTransactionType::Withdraw,
            Self::StakeStaked => StakeTransactionType::Stake,
            Self::UnstakeRequested | Self::UnstakeClaimed => StakeTransactionType::Unstake,
            Self::MergeChipsMerged => StakeTransactionType::MergeChips,
        }
    }
}

/// A user-facing staking action (PostgreSQL)
///
/// Primary Key: (id, type)
///
/// `id` is the transaction hash for single-step actions (deposit, stake,
/// merge) and the on-chain request ID for two-step ones (withdraw, unstake),
/// so the later claim event can be joined back to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeTransaction {
    pub id: B256,
    pub transaction_type: StakeTransactionType,
    pub chain_id: u64,
    pub user: Address,
    pub node: Address,
    pub value: U256,
    pub chips: Vec<U256>,
    pub block_timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub transaction_index: u64,
}

/// One step of a [`StakeTransaction`] (PostgreSQL)
///
/// Primary Key: (id, type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEvent {
    pub id: B256,
    pub event_type: StakeEventType,
    #[serde(flatten)]
    pub origin: EventOrigin,
}

impl StakeEvent {
    pub fn new(id: B256, event_type: StakeEventType, origin: EventOrigin) -> Self {
        Self {
            id,
            event_type,
            origin,
        }
    }

    pub fn transaction_type(&self) -> StakeTransactionType {
        self.event_type.transaction_type()
    }
}
