use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexer progress for one (chain, track) pair (PostgreSQL).
///
/// Primary Key: (chain_id, finalized)
///
/// Points at the last block whose derived rows were committed in the same
/// transaction as this row. Used to resume after restarts without missing or
/// duplicating blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain_id: u64,
    pub finalized: bool,
    pub block_number: u64,
    pub block_hash: B256,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(chain_id: u64, finalized: bool, block_number: u64, block_hash: B256) -> Self {
        Self {
            chain_id,
            finalized,
            block_number,
            block_hash,
            updated_at: Utc::now(),
        }
    }

    /// Whether `next` may replace this checkpoint: exactly one block further.
    pub fn is_followed_by(&self, next: &Checkpoint) -> bool {
        self.chain_id == next.chain_id
            && self.finalized == next.finalized
            && self.block_number.checked_add(1) == Some(next.block_number)
    }
}
