//! Persistence seam of the indexer.
//!
//! Every write for a block happens through one [`DatabaseTransaction`] opened
//! by the driver; handlers never see anything else. Two backends exist:
//! [`PostgresClient`] for deployments and [`MemoryDatabase`] for tests and
//! dry runs.

use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryDatabase;
pub use postgres::PostgresClient;

use models::{
    BridgeEvent, BridgeTransaction, Checkpoint, Epoch, Node, NodeEvent, NodeUpdate, StakeChip,
    StakeEvent, StakeTransaction,
};

/// Opens transactions. Shared by every track; implementations are pools.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>>;
}

/// An open transaction. Dropping it without [`commit`](Self::commit) discards
/// every write made through it.
#[async_trait]
pub trait DatabaseTransaction: Send {
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Blocks other transactions that lock `chain_id` until this one ends.
    async fn lock_chain(&mut self, chain_id: u64) -> Result<()>;

    // ==================== CHECKPOINTS ====================

    async fn find_checkpoint(&mut self, chain_id: u64, finalized: bool)
        -> Result<Option<Checkpoint>>;
    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()>;

    // ==================== STAKING ====================

    async fn save_stake_transaction(&mut self, transaction: &StakeTransaction) -> Result<()>;
    async fn save_stake_event(&mut self, event: &StakeEvent) -> Result<()>;
    async fn delete_stake_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()>;
    async fn delete_stake_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()>;

    // ==================== CHIPS ====================

    /// Upsert; the stored owner follows [`StakeChip::accepts_owner_change`].
    async fn save_stake_chips(&mut self, chips: &[StakeChip]) -> Result<()>;
    /// Moves a chip to `owner` when [`StakeChip::accepts_owner_change`] allows
    /// it. Unknown chips are ignored.
    async fn update_stake_chips_owner(
        &mut self,
        owner: Address,
        token_id: U256,
        block_number: u64,
        log_index: u64,
        finalized: bool,
    ) -> Result<()>;

    // ==================== BRIDGE ====================

    async fn save_bridge_transaction(&mut self, transaction: &BridgeTransaction) -> Result<()>;
    async fn save_bridge_event(&mut self, event: &BridgeEvent) -> Result<()>;
    async fn delete_bridge_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()>;
    async fn delete_bridge_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()>;

    // ==================== NODES ====================

    async fn save_node_event(&mut self, event: &NodeEvent) -> Result<()>;
    async fn delete_node_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()>;
    async fn save_node(&mut self, node: &Node) -> Result<()>;
    /// Patches existing nodes; updates for unknown addresses are ignored.
    async fn batch_update_nodes(&mut self, updates: &[NodeUpdate]) -> Result<()>;

    // ==================== EPOCHS ====================

    async fn save_epoch(&mut self, epoch: &Epoch) -> Result<()>;
}
