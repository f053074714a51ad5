//! Per-event handlers.
//!
//! Each handler decodes one event signature and writes the rows derived from
//! it through the block's open transaction. Handlers are grouped by the
//! contract family that emits them and looked up by `topics[0]`.

use alloy::{
    primitives::{Address, B256},
    sol_types::SolEvent,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::{
    chain::{Block, Log, Receipt},
    db::{models::EventOrigin, DatabaseTransaction},
    utils::timestamp_to_datetime,
    worker::FinalityMode,
};

pub mod bridge;
pub mod chips;
pub mod staking;
pub mod staking_v2;

/// Everything a handler may read about the log it is handling.
pub struct LogContext<'a> {
    pub chain_id: u64,
    pub finality: FinalityMode,
    pub block: &'a Block,
    pub receipt: &'a Receipt,
    /// Logs of `receipt` in log-index order.
    pub logs: &'a [Log],
    /// Position of the handled log in `logs`.
    pub position: usize,
}

impl<'a> LogContext<'a> {
    pub fn log(&self) -> &'a Log {
        &self.logs[self.position]
    }

    pub fn is_finalized(&self) -> bool {
        self.finality.is_finalized()
    }

    pub fn block_timestamp(&self) -> DateTime<Utc> {
        timestamp_to_datetime(self.block.timestamp)
    }

    pub fn origin(&self) -> EventOrigin {
        EventOrigin {
            chain_id: self.chain_id,
            block_hash: self.block.hash,
            block_number: self.block.number,
            block_timestamp: self.block_timestamp(),
            transaction_hash: self.receipt.transaction_hash,
            transaction_index: self.receipt.transaction_index,
            transaction_status: self.receipt.status,
            log_index: self.log().log_index,
            finalized: self.is_finalized(),
        }
    }

    /// Decode the handled log as `E`.
    pub fn decode<E: SolEvent>(&self) -> Result<E> {
        let log = self.log();
        E::decode_log_data(&log.data).with_context(|| {
            format!(
                "Failed to decode {} (tx {}, log {})",
                E::SIGNATURE,
                self.receipt.transaction_hash,
                log.log_index
            )
        })
    }

    /// First log after this one that `address` emitted as `E`.
    pub fn find_following<E: SolEvent>(&self, address: Address) -> Result<E> {
        self.find_after(self.position, address).map(|(_, event)| event)
    }

    /// First log after `position` that `address` emitted as `E`, with its
    /// position.
    pub fn find_after<E: SolEvent>(&self, position: usize, address: Address) -> Result<(usize, E)> {
        self.find_after_matching(position, |log, _: &E| log.address == address)
    }

    /// First log after `position` that decodes as `E` and satisfies `accept`,
    /// with its position. Logs sharing the signature but not decoding are
    /// passed over.
    pub fn find_after_matching<E: SolEvent>(
        &self,
        position: usize,
        accept: impl Fn(&Log, &E) -> bool,
    ) -> Result<(usize, E)> {
        self.logs
            .iter()
            .enumerate()
            .skip(position + 1)
            .filter(|(_, log)| log.topic0() == Some(&E::SIGNATURE_HASH))
            .find_map(|(index, log)| {
                let event = E::decode_log_data(&log.data).ok()?;
                accept(log, &event).then_some((index, event))
            })
            .ok_or_else(|| {
                anyhow!(
                    "No {} after log {} of tx {}",
                    E::SIGNATURE,
                    self.logs[position].log_index,
                    self.receipt.transaction_hash
                )
            })
    }
}

/// Writes the rows derived from one event signature.
#[async_trait]
pub trait LogHandler: Send + Sync {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()>;
}

/// Handlers keyed by event signature hash.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: FxHashMap<B256, Arc<dyn LogHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for event `E`, replacing any previous registration.
    pub fn on<E: SolEvent>(&mut self, handler: impl LogHandler + 'static) -> &mut Self {
        self.handlers.insert(E::SIGNATURE_HASH, Arc::new(handler));
        self
    }

    pub fn get(&self, signature_hash: &B256) -> Option<&Arc<dyn LogHandler>> {
        self.handlers.get(signature_hash)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
