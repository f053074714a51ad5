use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an indexed event came from, shared by every event row.
///
/// `block_number` is the reindex key: every row carrying an origin is deleted
/// and rewritten when its block is processed again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOrigin {
    pub chain_id: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub block_timestamp: DateTime<Utc>,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub transaction_status: bool,
    pub log_index: u64,
    /// Written by the finalized track.
    pub finalized: bool,
}
