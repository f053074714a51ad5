//! Chips (ERC-721) handlers.

use anyhow::Result;
use async_trait::async_trait;

use crate::{
    abis::chips::Transfer,
    db::DatabaseTransaction,
    worker::handlers::{HandlerRegistry, LogContext, LogHandler},
};

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.on::<Transfer>(TransferHandler);
    registry
}

/// Moves a chip to its new owner. Mints and burns included: the zero address
/// is recorded like any other owner.
struct TransferHandler;

#[async_trait]
impl LogHandler for TransferHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<Transfer>()?;

        tx.update_stake_chips_owner(
            event.to,
            event.tokenId,
            ctx.block.number,
            ctx.log().log_index,
            ctx.is_finalized(),
        )
        .await
    }
}
