use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A stake chip: the NFT minted for a staked position (PostgreSQL)
///
/// Primary Key: id
///
/// Chips are not tied to a block's delete-then-insert cycle; they are upserted.
/// The owner is last-writer-wins ordered by `(owner_block_number,
/// owner_log_index)` so reprocessing an old block never rolls back a newer
/// transfer. A finalized write also replaces an unfinalized owner recorded at
/// the same or a later block, which may come from a reorged-out block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeChip {
    pub id: U256,
    pub owner: Address,
    pub node: Address,
    pub value: U256,
    /// `tokenURI` as returned by the chips contract.
    pub metadata: String,
    /// Block the chip was minted in.
    pub block_number: u64,
    pub owner_block_number: u64,
    pub owner_log_index: u64,
    /// Whether the recorded owner comes from a finalized block.
    pub owner_finalized: bool,
}

impl StakeChip {
    /// Whether an ownership change at `(block_number, log_index)` replaces
    /// the one currently recorded.
    pub fn accepts_owner_change(&self, block_number: u64, log_index: u64, finalized: bool) -> bool {
        (block_number, log_index) >= (self.owner_block_number, self.owner_log_index)
            || (finalized && !self.owner_finalized && block_number <= self.owner_block_number)
    }

    pub fn set_owner(&mut self, owner: Address, block_number: u64, log_index: u64, finalized: bool) {
        self.owner = owner;
        self.owner_block_number = block_number;
        self.owner_log_index = log_index;
        self.owner_finalized = finalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(owner_block_number: u64, owner_log_index: u64, owner_finalized: bool) -> StakeChip {
        StakeChip {
            id: U256::from(1u64),
            owner: Address::repeat_byte(0x01),
            node: Address::repeat_byte(0xaa),
            value: U256::from(500u64),
            metadata: String::new(),
            block_number: 9,
            owner_block_number,
            owner_log_index,
            owner_finalized,
        }
    }

    #[test]
    fn test_finalized_owner_only_moves_forward() {
        let chip = chip(10, 5, true);
        assert!(chip.accepts_owner_change(10, 5, true));
        assert!(chip.accepts_owner_change(11, 0, false));
        assert!(!chip.accepts_owner_change(10, 2, true));
        assert!(!chip.accepts_owner_change(9, 7, false));
    }

    #[test]
    fn test_finalized_write_replaces_unfinalized_owner() {
        let chip = chip(10, 5, false);
        assert!(chip.accepts_owner_change(10, 2, true));
        assert!(chip.accepts_owner_change(8, 0, true));
        assert!(!chip.accepts_owner_change(10, 2, false));
    }
}
