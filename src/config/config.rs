use alloy::primitives::Address;
use anyhow::{anyhow, bail};
use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::config::contracts::{contracts_for, ChainContracts, Layer};

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Staking, bridge, node and epoch records
/// - Stake chips
/// - Per-chain, per-track checkpoints
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// One chain to index. Contract addresses come from the compiled-in table,
/// looked up by `chain_id`; rollup contracts missing there are given here.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub rpc_url: String,
    /// Overrides the compiled-in start block (e.g. for a fresh test database).
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Staking proxy. Rollup chains only.
    #[serde(default)]
    pub staking: Option<Address>,
    /// Chips proxy. Rollup chains only.
    #[serde(default)]
    pub chips: Option<Address>,
}

impl ChainSettings {
    /// Compiled-in deployment of this chain with the configured overrides
    /// applied. Rollup chains must end up with both staking and chips.
    pub fn contracts(&self) -> anyhow::Result<ChainContracts> {
        let mut contracts = contracts_for(self.chain_id)
            .cloned()
            .ok_or_else(|| anyhow!("Chain {} is not supported", self.chain_id))?;

        if let Some(start_block) = self.start_block {
            contracts.start_block = start_block;
        }

        match contracts.layer {
            Layer::L1 => {
                if self.staking.is_some() || self.chips.is_some() {
                    bail!("Chain {} ({}) has no staking or chips", self.chain_id, contracts.name);
                }
            },
            Layer::L2 => {
                contracts.staking = self.staking.or(contracts.staking);
                contracts.chips = self.chips.or(contracts.chips);

                if contracts.staking.is_none() || contracts.chips.is_none() {
                    bail!(
                        "Chain {} ({}) needs `staking` and `chips` addresses in its settings",
                        self.chain_id,
                        contracts.name
                    );
                }
            },
        }

        Ok(contracts)
    }
}

/// Driver loop configuration shared by every chain and track.
#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    pub chains: Vec<ChainSettings>,
    /// Sleep between head polls once a track has caught up.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_milliseconds: u64,
    /// Consecutive failed attempts before a track gives up.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_milliseconds: u64,
    /// Maximum in-flight `tokenURI`/`getChipInfo` calls while enriching chips.
    #[serde(default = "default_chip_fetch_concurrency")]
    pub chip_fetch_concurrency: usize,
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_retry_attempts() -> u32 {
    30
}

fn default_retry_delay() -> u64 {
    5_000
}

fn default_chip_fetch_concurrency() -> usize {
    16
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub indexer: IndexerSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ETHEREUM_MAINNET, VSL_MAINNET};
    use alloy::primitives::address;
    use config::FileFormat;

    fn chain(chain_id: u64) -> ChainSettings {
        ChainSettings {
            chain_id,
            rpc_url: "http://localhost:8545".to_string(),
            start_block: None,
            staking: None,
            chips: None,
        }
    }

    #[test]
    fn test_defaults_are_applied() {
        let yaml = r#"
postgres:
  host: localhost
  port: 5432
  user: indexer
  password: secret
  database: vsl
indexer:
  chains:
    - chain_id: 12553
      rpc_url: http://localhost:8545
"#;
        let settings: Settings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.postgres.pool_size, 16);
        assert_eq!(settings.indexer.poll_interval_milliseconds, 1_000);
        assert_eq!(settings.indexer.retry_attempts, 30);
        assert_eq!(settings.indexer.chip_fetch_concurrency, 16);
        assert_eq!(settings.indexer.chains.len(), 1);
        assert_eq!(settings.indexer.chains[0].start_block, None);
    }

    #[test]
    fn test_chain_overrides_are_parsed() {
        let yaml = r#"
chains:
  - chain_id: 12553
    rpc_url: http://localhost:8545
    start_block: 100
    chips: "0x00000000000000000000000000000000000000c1"
"#;
        let indexer: IndexerSettings = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let contracts = indexer.chains[0].contracts().unwrap();
        assert_eq!(contracts.start_block, 100);
        assert_eq!(contracts.chips, Some(address!("00000000000000000000000000000000000000c1")));
        assert_eq!(contracts.staking, contracts_for(VSL_MAINNET).unwrap().staking);
    }

    #[test]
    fn test_rollup_without_chips_is_rejected() {
        let err = chain(VSL_MAINNET).contracts().unwrap_err();
        assert!(err.to_string().contains("`chips`"));
    }

    #[test]
    fn test_settlement_chain_takes_no_staking_overrides() {
        assert!(chain(ETHEREUM_MAINNET).contracts().is_ok());

        let mut settings = chain(ETHEREUM_MAINNET);
        settings.chips = Some(Address::repeat_byte(0xc1));
        assert!(settings.contracts().is_err());

        assert!(chain(10).contracts().unwrap_err().to_string().contains("not supported"));
    }
}
