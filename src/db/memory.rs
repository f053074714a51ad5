//! In-memory storage backend.
//!
//! Keeps every table in RAM with the same keys and upsert rules as the
//! PostgreSQL schema. Transactions are serialized: `begin` takes the state
//! lock and works on a copy that `commit` swaps in, so a dropped or rolled
//! back transaction leaves no trace.

use alloy::primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::{
    models::{
        BridgeEvent, BridgeTransaction, Checkpoint, Epoch, Node, NodeEvent, NodeUpdate, StakeChip,
        StakeEvent, StakeTransaction,
    },
    DatabaseClient, DatabaseTransaction,
};

/// Committed contents of a [`MemoryDatabase`]. Rows keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    pub checkpoints: Vec<Checkpoint>,
    pub stake_transactions: Vec<StakeTransaction>,
    pub stake_events: Vec<StakeEvent>,
    pub stake_chips: Vec<StakeChip>,
    pub bridge_transactions: Vec<BridgeTransaction>,
    pub bridge_events: Vec<BridgeEvent>,
    pub node_events: Vec<NodeEvent>,
    pub nodes: Vec<Node>,
    pub epochs: Vec<Epoch>,
}

/// Replace the row matching `same_key` or append `row`.
fn upsert<T: Clone>(rows: &mut Vec<T>, row: &T, same_key: impl Fn(&T) -> bool) {
    match rows.iter_mut().find(|existing| same_key(existing)) {
        Some(existing) => *existing = row.clone(),
        None => rows.push(row.clone()),
    }
}

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl DatabaseClient for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn DatabaseTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();

        Ok(Box::new(MemoryTransaction {
            guard,
            working,
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard,
            working,
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    async fn lock_chain(&mut self, _chain_id: u64) -> Result<()> {
        // Transactions already hold the whole state.
        Ok(())
    }

    // ==================== CHECKPOINTS ====================

    async fn find_checkpoint(
        &mut self,
        chain_id: u64,
        finalized: bool,
    ) -> Result<Option<Checkpoint>> {
        Ok(self
            .working
            .checkpoints
            .iter()
            .find(|c| c.chain_id == chain_id && c.finalized == finalized)
            .cloned())
    }

    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        upsert(&mut self.working.checkpoints, checkpoint, |c| {
            c.chain_id == checkpoint.chain_id && c.finalized == checkpoint.finalized
        });
        Ok(())
    }

    // ==================== STAKING ====================

    async fn save_stake_transaction(&mut self, transaction: &StakeTransaction) -> Result<()> {
        upsert(&mut self.working.stake_transactions, transaction, |t| {
            t.id == transaction.id && t.transaction_type == transaction.transaction_type
        });
        Ok(())
    }

    async fn save_stake_event(&mut self, event: &StakeEvent) -> Result<()> {
        upsert(&mut self.working.stake_events, event, |e| {
            e.id == event.id && e.event_type == event.event_type
        });
        Ok(())
    }

    async fn delete_stake_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.working
            .stake_transactions
            .retain(|t| !(t.chain_id == chain_id && t.block_number == block_number));
        Ok(())
    }

    async fn delete_stake_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.working.stake_events.retain(|e| {
            !(e.origin.chain_id == chain_id && e.origin.block_number == block_number)
        });
        Ok(())
    }

    // ==================== CHIPS ====================

    async fn save_stake_chips(&mut self, chips: &[StakeChip]) -> Result<()> {
        for chip in chips {
            match self.working.stake_chips.iter_mut().find(|c| c.id == chip.id) {
                Some(existing) => {
                    existing.node = chip.node;
                    existing.value = chip.value;
                    existing.metadata = chip.metadata.clone();
                    existing.block_number = chip.block_number;
                    if existing.accepts_owner_change(
                        chip.owner_block_number,
                        chip.owner_log_index,
                        chip.owner_finalized,
                    ) {
                        existing.set_owner(
                            chip.owner,
                            chip.owner_block_number,
                            chip.owner_log_index,
                            chip.owner_finalized,
                        );
                    }
                },
                None => self.working.stake_chips.push(chip.clone()),
            }
        }
        Ok(())
    }

    async fn update_stake_chips_owner(
        &mut self,
        owner: Address,
        token_id: U256,
        block_number: u64,
        log_index: u64,
        finalized: bool,
    ) -> Result<()> {
        if let Some(chip) = self.working.stake_chips.iter_mut().find(|c| c.id == token_id) {
            if chip.accepts_owner_change(block_number, log_index, finalized) {
                chip.set_owner(owner, block_number, log_index, finalized);
            }
        }
        Ok(())
    }

    // ==================== BRIDGE ====================

    async fn save_bridge_transaction(&mut self, transaction: &BridgeTransaction) -> Result<()> {
        upsert(&mut self.working.bridge_transactions, transaction, |t| {
            t.id == transaction.id && t.transaction_type == transaction.transaction_type
        });
        Ok(())
    }

    async fn save_bridge_event(&mut self, event: &BridgeEvent) -> Result<()> {
        upsert(&mut self.working.bridge_events, event, |e| {
            e.id == event.id
                && e.transaction_type == event.transaction_type
                && e.event_type == event.event_type
        });
        Ok(())
    }

    async fn delete_bridge_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.working
            .bridge_transactions
            .retain(|t| !(t.chain_id == chain_id && t.block_number == block_number));
        Ok(())
    }

    async fn delete_bridge_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.working.bridge_events.retain(|e| {
            !(e.origin.chain_id == chain_id && e.origin.block_number == block_number)
        });
        Ok(())
    }

    // ==================== NODES ====================

    async fn save_node_event(&mut self, event: &NodeEvent) -> Result<()> {
        upsert(&mut self.working.node_events, event, |e| {
            e.origin.transaction_hash == event.origin.transaction_hash
                && e.origin.log_index == event.origin.log_index
        });
        Ok(())
    }

    async fn delete_node_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.working.node_events.retain(|e| {
            !(e.origin.chain_id == chain_id && e.origin.block_number == block_number)
        });
        Ok(())
    }

    async fn save_node(&mut self, node: &Node) -> Result<()> {
        upsert(&mut self.working.nodes, node, |n| n.address == node.address);
        Ok(())
    }

    async fn batch_update_nodes(&mut self, updates: &[NodeUpdate]) -> Result<()> {
        for update in updates {
            if let Some(node) = self.working.nodes.iter_mut().find(|n| n.address == update.address)
            {
                update.apply(node);
            }
        }
        Ok(())
    }

    // ==================== EPOCHS ====================

    async fn save_epoch(&mut self, epoch: &Epoch) -> Result<()> {
        upsert(&mut self.working.epochs, epoch, |e| {
            e.id == epoch.id && e.transaction_hash == epoch.transaction_hash
        });
        Ok(())
    }
}
