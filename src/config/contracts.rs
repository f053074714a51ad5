//! Compiled-in contract deployments per chain.
//!
//! The indexer only understands the chains listed here: addresses and the
//! staking upgrade coordinates are part of the release. Only deployments
//! known for certain are listed; a missing L2 contract must be supplied in
//! the chain's settings.

use alloy::primitives::{address, Address};
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

/// Which side of the bridge a chain is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Settlement chain: L1 standard bridge and portal.
    L1,
    /// The rollup: L2 standard bridge, staking and chips.
    L2,
}

/// Staking contract ABI generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StakingVersion {
    V1,
    V2,
}

/// Position of the first transaction executed against the v2 staking
/// implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCutover {
    pub block_number: u64,
    pub transaction_index: u64,
}

impl VersionCutover {
    pub const fn new(block_number: u64, transaction_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
        }
    }

    /// Binding version for a log emitted at `(block_number, transaction_index)`.
    pub fn version_at(&self, block_number: u64, transaction_index: u64) -> StakingVersion {
        if (block_number, transaction_index) < (self.block_number, self.transaction_index) {
            StakingVersion::V1
        } else {
            StakingVersion::V2
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainContracts {
    pub name: &'static str,
    pub layer: Layer,
    /// First block worth indexing (deployment of the earliest contract).
    pub start_block: u64,
    pub standard_bridge: Address,
    /// L2 only. L1 deposits find the messenger through its `SentMessage`.
    pub cross_domain_messenger: Option<Address>,
    /// L2 only.
    pub message_passer: Option<Address>,
    /// L1 only.
    pub optimism_portal: Option<Address>,
    /// L2 only.
    pub staking: Option<Address>,
    /// L2 only.
    pub chips: Option<Address>,
    /// `None` when the staking proxy was never upgraded on this chain.
    pub staking_v2_cutover: Option<VersionCutover>,
}

impl ChainContracts {
    pub fn staking_version_at(&self, block_number: u64, transaction_index: u64) -> StakingVersion {
        self.staking_v2_cutover
            .map(|cutover| cutover.version_at(block_number, transaction_index))
            .unwrap_or(StakingVersion::V1)
    }
}

/// OP Stack predeploys shared by every rollup.
pub const L2_STANDARD_BRIDGE: Address = address!("4200000000000000000000000000000000000010");
pub const L2_CROSS_DOMAIN_MESSENGER: Address =
    address!("4200000000000000000000000000000000000007");
pub const L2_TO_L1_MESSAGE_PASSER: Address = address!("4200000000000000000000000000000000000016");

pub const ETHEREUM_MAINNET: u64 = 1;
pub const VSL_MAINNET: u64 = 12_553;

static CHAIN_CONTRACTS: Lazy<FxHashMap<u64, ChainContracts>> = Lazy::new(|| {
    let mut chains = FxHashMap::default();

    chains.insert(
        ETHEREUM_MAINNET,
        ChainContracts {
            name: "ethereum",
            layer: Layer::L1,
            start_block: 19_386_700,
            standard_bridge: address!("4cbab69108aa72151eda5a3c9c33b7d5dba2f5d9"),
            cross_domain_messenger: None,
            message_passer: None,
            optimism_portal: Some(address!("6a12432491bbbe8d3babf75f759766774c778db4")),
            staking: None,
            chips: None,
            staking_v2_cutover: None,
        },
    );

    chains.insert(
        VSL_MAINNET,
        ChainContracts {
            name: "vsl-mainnet",
            layer: Layer::L2,
            start_block: 0,
            standard_bridge: L2_STANDARD_BRIDGE,
            cross_domain_messenger: Some(L2_CROSS_DOMAIN_MESSENGER),
            message_passer: Some(L2_TO_L1_MESSAGE_PASSER),
            optimism_portal: None,
            staking: Some(address!("28f14d917fddba0c1f2923c406952478dfda5578")),
            // Set through `indexer.chains[].chips`.
            chips: None,
            staking_v2_cutover: Some(VersionCutover::new(3_528_542, 1)),
        },
    );

    chains
});

/// Deployment table for `chain_id`, if the chain is supported.
pub fn contracts_for(chain_id: u64) -> Option<&'static ChainContracts> {
    CHAIN_CONTRACTS.get(&chain_id)
}
