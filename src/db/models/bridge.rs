use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::models::EventOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeTransactionType {
    /// L1 → L2
    Deposit,
    /// L2 → L1
    Withdraw,
}

impl BridgeTransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BridgeEventType {
    Initialized,
    /// Withdrawals only: proof submitted to the L1 portal.
    Proved,
    Finalized,
}

impl BridgeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Proved => "proved",
            Self::Finalized => "finalized",
        }
    }
}

/// A cross-chain transfer, written by the chain it was initiated on (PostgreSQL)
///
/// Primary Key: (id, type)
///
/// `id` is the cross-domain message hash for deposits and the withdrawal hash
/// for withdrawals: the identifiers both sides of the bridge agree on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: B256,
    pub transaction_type: BridgeTransactionType,
    pub chain_id: u64,
    pub sender: Address,
    pub receiver: Address,
    /// `None` for native ETH deposits.
    pub token_address_l1: Option<Address>,
    pub token_address_l2: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub block_timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub transaction_index: u64,
}

/// One step of a [`BridgeTransaction`], on either chain (PostgreSQL)
///
/// Primary Key: (id, type, event_type)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub id: B256,
    pub transaction_type: BridgeTransactionType,
    pub event_type: BridgeEventType,
    #[serde(flatten)]
    pub origin: EventOrigin,
}

impl BridgeEvent {
    pub fn new(
        id: B256,
        transaction_type: BridgeTransactionType,
        event_type: BridgeEventType,
        origin: EventOrigin,
    ) -> Self {
        Self {
            id,
            transaction_type,
            event_type,
            origin,
        }
    }
}
