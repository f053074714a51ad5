#[allow(clippy::module_inception)]
pub mod config;
pub mod contracts;

pub use config::{ChainSettings, IndexerSettings, PostgresSettings, Settings};
pub use contracts::{
    contracts_for, ChainContracts, Layer, StakingVersion, VersionCutover, ETHEREUM_MAINNET,
    VSL_MAINNET,
};
