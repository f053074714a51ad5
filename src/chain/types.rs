//! Block, receipt and log shapes handed from the chain client to the handlers.
//!
//! These are deliberately smaller than the alloy RPC types: only the fields
//! the handlers read are carried, which also keeps test fixtures short.

use alloy::primitives::{Address, LogData, B256};

/// Block header plus the hashes of its transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub transactions: Vec<B256>,
}

/// Transaction receipt with its ordered logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub status: bool,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub data: LogData,
    pub log_index: u64,
    /// Set by the node when the log belongs to a block dropped by a reorg.
    pub removed: bool,
}

impl Log {
    pub fn new(address: Address, data: LogData, log_index: u64) -> Self {
        Self {
            address,
            data,
            log_index,
            removed: false,
        }
    }

    /// Event signature hash, `None` for anonymous logs.
    pub fn topic0(&self) -> Option<&B256> {
        self.data.topics().first()
    }
}

impl Receipt {
    /// Receipts the handlers look at: successful calls to an existing contract.
    pub fn is_indexable(&self) -> bool {
        self.status && self.to.is_some()
    }
}
