//! Standard bridge handlers for both sides of the rollup.
//!
//! Bridge rows are keyed by the identifiers both chains agree on: the
//! withdrawal hash for L2 → L1 and the cross-domain message hash for
//! L1 → L2. Neither is part of the bridge event itself; each is taken from
//! a messaging log emitted later in the same transaction.

use alloy::{
    primitives::{keccak256, Address, B256},
    sol_types::SolCall,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::{
    abis::bridge::{
        relayMessageCall, DepositFinalized, ERC20DepositInitiated, ETHDepositInitiated,
        MessagePassed, RelayedMessage, SentMessage, SentMessageExtension1, WithdrawalFinalized,
        WithdrawalInitiated, WithdrawalProven,
    },
    config::{ChainContracts, Layer},
    db::{
        models::{BridgeEvent, BridgeEventType, BridgeTransaction, BridgeTransactionType},
        DatabaseTransaction,
    },
    worker::handlers::{HandlerRegistry, LogContext, LogHandler},
};

/// Bridge handlers for the layer `contracts` describes.
pub fn registry(contracts: &ChainContracts) -> Result<HandlerRegistry> {
    let bridge = contracts.standard_bridge;
    let mut registry = HandlerRegistry::new();

    match contracts.layer {
        Layer::L2 => {
            let message_passer = contracts
                .message_passer
                .ok_or_else(|| anyhow!("{} has no message passer", contracts.name))?;
            let messenger = contracts
                .cross_domain_messenger
                .ok_or_else(|| anyhow!("{} has no cross-domain messenger", contracts.name))?;

            registry
                .on::<WithdrawalInitiated>(WithdrawalInitiatedHandler {
                    message_passer,
                })
                .on::<DepositFinalized>(DepositFinalizedHandler {
                    messenger,
                });
        },
        Layer::L1 => {
            registry
                .on::<ETHDepositInitiated>(EthDepositInitiatedHandler {
                    bridge,
                })
                .on::<ERC20DepositInitiated>(Erc20DepositInitiatedHandler {
                    bridge,
                })
                .on::<WithdrawalProven>(WithdrawalProvenHandler)
                .on::<WithdrawalFinalized>(WithdrawalFinalizedHandler);
        },
    }

    Ok(registry)
}

/// Hash of the message the L1 messenger sent for the deposit being handled.
///
/// Rebuilt from the first `SentMessage` sent by `bridge` and the
/// `SentMessageExtension1` the same messenger emits after it, exactly as the
/// L2 messenger hashes it before emitting `RelayedMessage`.
fn deposit_message_hash(ctx: &LogContext<'_>, bridge: Address) -> Result<B256> {
    let (position, sent) =
        ctx.find_after_matching::<SentMessage>(ctx.position, |_, sent| sent.sender == bridge)?;
    let messenger = ctx.logs[position].address;
    let (_, extension) =
        ctx.find_after_matching::<SentMessageExtension1>(position, |log, extension| {
            log.address == messenger && extension.sender == bridge
        })?;

    let message = relayMessageCall {
        _nonce: sent.messageNonce,
        _sender: sent.sender,
        _target: sent.target,
        _value: extension.value,
        _minGasLimit: sent.gasLimit,
        _message: sent.message,
    }
    .abi_encode();

    Ok(keccak256(message))
}

async fn save_initiated(
    ctx: &LogContext<'_>,
    tx: &mut dyn DatabaseTransaction,
    transaction: BridgeTransaction,
) -> Result<()> {
    let event = BridgeEvent::new(
        transaction.id,
        transaction.transaction_type,
        BridgeEventType::Initialized,
        ctx.origin(),
    );

    tx.save_bridge_transaction(&transaction).await?;
    tx.save_bridge_event(&event).await
}

fn bridge_transaction(
    ctx: &LogContext<'_>,
    id: B256,
    transaction_type: BridgeTransactionType,
) -> BridgeTransaction {
    BridgeTransaction {
        id,
        transaction_type,
        chain_id: ctx.chain_id,
        sender: Address::ZERO,
        receiver: Address::ZERO,
        token_address_l1: None,
        token_address_l2: None,
        value: Default::default(),
        data: Default::default(),
        block_timestamp: ctx.block_timestamp(),
        block_number: ctx.block.number,
        transaction_index: ctx.receipt.transaction_index,
    }
}

// ==================== L2 ====================

struct WithdrawalInitiatedHandler {
    message_passer: Address,
}

#[async_trait]
impl LogHandler for WithdrawalInitiatedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<WithdrawalInitiated>()?;
        let passed = ctx.find_following::<MessagePassed>(self.message_passer)?;

        let transaction = BridgeTransaction {
            sender: event.from,
            receiver: event.to,
            token_address_l1: Some(event.l1Token),
            token_address_l2: Some(event.l2Token),
            value: event.amount,
            data: event.extraData,
            ..bridge_transaction(ctx, passed.withdrawalHash, BridgeTransactionType::Withdraw)
        };

        save_initiated(ctx, tx, transaction).await
    }
}

struct DepositFinalizedHandler {
    messenger: Address,
}

#[async_trait]
impl LogHandler for DepositFinalizedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        ctx.decode::<DepositFinalized>()?;
        let relayed = ctx.find_following::<RelayedMessage>(self.messenger)?;

        let event = BridgeEvent::new(
            relayed.msgHash,
            BridgeTransactionType::Deposit,
            BridgeEventType::Finalized,
            ctx.origin(),
        );

        tx.save_bridge_event(&event).await
    }
}

// ==================== L1 ====================

struct EthDepositInitiatedHandler {
    bridge: Address,
}

#[async_trait]
impl LogHandler for EthDepositInitiatedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<ETHDepositInitiated>()?;
        let id = deposit_message_hash(ctx, self.bridge)?;

        let transaction = BridgeTransaction {
            sender: event.from,
            receiver: event.to,
            value: event.amount,
            data: event.extraData,
            ..bridge_transaction(ctx, id, BridgeTransactionType::Deposit)
        };

        save_initiated(ctx, tx, transaction).await
    }
}

struct Erc20DepositInitiatedHandler {
    bridge: Address,
}

#[async_trait]
impl LogHandler for Erc20DepositInitiatedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<ERC20DepositInitiated>()?;
        let id = deposit_message_hash(ctx, self.bridge)?;

        let transaction = BridgeTransaction {
            sender: event.from,
            receiver: event.to,
            token_address_l1: Some(event.l1Token),
            token_address_l2: Some(event.l2Token),
            value: event.amount,
            data: event.extraData,
            ..bridge_transaction(ctx, id, BridgeTransactionType::Deposit)
        };

        save_initiated(ctx, tx, transaction).await
    }
}

struct WithdrawalProvenHandler;

#[async_trait]
impl LogHandler for WithdrawalProvenHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<WithdrawalProven>()?;

        tx.save_bridge_event(&BridgeEvent::new(
            event.withdrawalHash,
            BridgeTransactionType::Withdraw,
            BridgeEventType::Proved,
            ctx.origin(),
        ))
        .await
    }
}

struct WithdrawalFinalizedHandler;

#[async_trait]
impl LogHandler for WithdrawalFinalizedHandler {
    async fn handle(&self, ctx: &LogContext<'_>, tx: &mut dyn DatabaseTransaction) -> Result<()> {
        let event = ctx.decode::<WithdrawalFinalized>()?;

        tx.save_bridge_event(&BridgeEvent::new(
            event.withdrawalHash,
            BridgeTransactionType::Withdraw,
            BridgeEventType::Finalized,
            ctx.origin(),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{contracts_for, ETHEREUM_MAINNET, VSL_MAINNET},
        db::{DatabaseClient, MemoryDatabase},
        testing::{block, event_log, receipt},
        worker::FinalityMode,
    };
    use alloy::primitives::{address, Bytes, U256};

    const USER: Address = address!("00000000000000000000000000000000000000a1");
    const L1_TOKEN: Address = address!("00000000000000000000000000000000000000b1");
    const L2_TOKEN: Address = address!("00000000000000000000000000000000000000b2");
    const L1_MESSENGER: Address = address!("00000000000000000000000000000000000000c7");

    async fn run(
        contracts: &ChainContracts,
        receipt: &crate::chain::Receipt,
        position: usize,
    ) -> Result<crate::db::memory::MemoryState> {
        let registry = registry(contracts)?;
        let block = block(40);
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await?;

        let ctx = LogContext {
            chain_id: 1,
            finality: FinalityMode::Unfinalized,
            block: &block,
            receipt,
            logs: &receipt.logs,
            position,
        };
        let topic0 = ctx.log().topic0().copied().unwrap_or_default();
        let handler = registry.get(&topic0).ok_or_else(|| anyhow!("not registered"))?;
        handler.handle(&ctx, tx.as_mut()).await?;
        tx.commit().await?;

        Ok(db.snapshot().await)
    }

    fn withdrawal_initiated() -> WithdrawalInitiated {
        WithdrawalInitiated {
            l1Token: L1_TOKEN,
            l2Token: L2_TOKEN,
            from: USER,
            to: USER,
            amount: U256::from(5u64),
            extraData: Bytes::from_static(b"hi"),
        }
    }

    #[tokio::test]
    async fn test_withdrawal_takes_id_from_message_passer() {
        let contracts = contracts_for(VSL_MAINNET).unwrap();
        let withdrawal_hash = B256::repeat_byte(0x77);

        let receipt = receipt(
            40,
            0,
            contracts.standard_bridge,
            vec![
                event_log(contracts.standard_bridge, &withdrawal_initiated(), 0),
                event_log(
                    contracts.message_passer.unwrap(),
                    &MessagePassed {
                        nonce: U256::from(1u64),
                        sender: contracts.cross_domain_messenger.unwrap(),
                        target: Address::repeat_byte(0x99),
                        value: U256::ZERO,
                        gasLimit: U256::from(100_000u64),
                        data: Bytes::new(),
                        withdrawalHash: withdrawal_hash,
                    },
                    1,
                ),
            ],
        );

        let state = run(contracts, &receipt, 0).await.unwrap();

        assert_eq!(state.bridge_transactions.len(), 1);
        let transaction = &state.bridge_transactions[0];
        assert_eq!(transaction.id, withdrawal_hash);
        assert_eq!(transaction.transaction_type, BridgeTransactionType::Withdraw);
        assert_eq!(transaction.token_address_l1, Some(L1_TOKEN));
        assert_eq!(transaction.value, U256::from(5u64));
        assert_eq!(state.bridge_events[0].event_type, BridgeEventType::Initialized);
        assert_eq!(state.bridge_events[0].id, withdrawal_hash);
    }

    #[tokio::test]
    async fn test_withdrawal_without_message_passed_fails() {
        let contracts = contracts_for(VSL_MAINNET).unwrap();
        let receipt = receipt(
            40,
            0,
            contracts.standard_bridge,
            vec![event_log(contracts.standard_bridge, &withdrawal_initiated(), 0)],
        );

        let err = run(contracts, &receipt, 0).await.unwrap_err();
        assert!(err.to_string().contains("MessagePassed"));
    }

    #[tokio::test]
    async fn test_deposit_id_matches_relayed_message_hash() {
        let contracts = contracts_for(ETHEREUM_MAINNET).unwrap();
        let messenger = L1_MESSENGER;
        let l2_bridge = Address::repeat_byte(0x10);
        let message = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);

        let receipt = receipt(
            40,
            3,
            contracts.standard_bridge,
            vec![
                event_log(
                    contracts.standard_bridge,
                    &ETHDepositInitiated {
                        from: USER,
                        to: USER,
                        amount: U256::from(9u64),
                        extraData: Bytes::new(),
                    },
                    10,
                ),
                event_log(
                    messenger,
                    &SentMessage {
                        target: l2_bridge,
                        sender: contracts.standard_bridge,
                        message: message.clone(),
                        messageNonce: U256::from(42u64),
                        gasLimit: U256::from(200_000u64),
                    },
                    11,
                ),
                event_log(
                    messenger,
                    &SentMessageExtension1 {
                        sender: contracts.standard_bridge,
                        value: U256::from(9u64),
                    },
                    12,
                ),
            ],
        );

        let state = run(contracts, &receipt, 0).await.unwrap();

        let expected = keccak256(
            relayMessageCall {
                _nonce: U256::from(42u64),
                _sender: contracts.standard_bridge,
                _target: l2_bridge,
                _value: U256::from(9u64),
                _minGasLimit: U256::from(200_000u64),
                _message: message,
            }
            .abi_encode(),
        );
        assert_eq!(state.bridge_transactions[0].id, expected);
        assert_eq!(state.bridge_transactions[0].token_address_l1, None);
        assert_eq!(state.bridge_events[0].origin.log_index, 10);
    }

    #[tokio::test]
    async fn test_deposit_skips_messages_of_other_senders() {
        let contracts = contracts_for(ETHEREUM_MAINNET).unwrap();
        let other = Address::repeat_byte(0x0e);
        let l2_bridge = Address::repeat_byte(0x10);
        let sent = |sender: Address, nonce: u64, log_index| {
            event_log(
                L1_MESSENGER,
                &SentMessage {
                    target: l2_bridge,
                    sender,
                    message: Bytes::new(),
                    messageNonce: U256::from(nonce),
                    gasLimit: U256::from(200_000u64),
                },
                log_index,
            )
        };
        let extension = |sender: Address, log_index| {
            event_log(
                L1_MESSENGER,
                &SentMessageExtension1 {
                    sender,
                    value: U256::ZERO,
                },
                log_index,
            )
        };

        let receipt = receipt(
            40,
            0,
            contracts.standard_bridge,
            vec![
                event_log(
                    contracts.standard_bridge,
                    &ERC20DepositInitiated {
                        l1Token: L1_TOKEN,
                        l2Token: L2_TOKEN,
                        from: USER,
                        to: USER,
                        amount: U256::from(3u64),
                        extraData: Bytes::new(),
                    },
                    0,
                ),
                sent(other, 1, 1),
                extension(other, 2),
                sent(contracts.standard_bridge, 2, 3),
                extension(contracts.standard_bridge, 4),
            ],
        );

        let state = run(contracts, &receipt, 0).await.unwrap();

        let expected = keccak256(
            relayMessageCall {
                _nonce: U256::from(2u64),
                _sender: contracts.standard_bridge,
                _target: l2_bridge,
                _value: U256::ZERO,
                _minGasLimit: U256::from(200_000u64),
                _message: Bytes::new(),
            }
            .abi_encode(),
        );
        assert_eq!(state.bridge_transactions[0].id, expected);
        assert_eq!(state.bridge_transactions[0].token_address_l2, Some(L2_TOKEN));
    }

    #[tokio::test]
    async fn test_deposit_requires_extension_after_sent_message() {
        let contracts = contracts_for(ETHEREUM_MAINNET).unwrap();
        let messenger = L1_MESSENGER;

        let receipt = receipt(
            40,
            0,
            contracts.standard_bridge,
            vec![
                event_log(
                    messenger,
                    &SentMessageExtension1 {
                        sender: contracts.standard_bridge,
                        value: U256::ZERO,
                    },
                    0,
                ),
                event_log(
                    contracts.standard_bridge,
                    &ETHDepositInitiated {
                        from: USER,
                        to: USER,
                        amount: U256::ZERO,
                        extraData: Bytes::new(),
                    },
                    1,
                ),
                event_log(
                    messenger,
                    &SentMessage {
                        target: Address::ZERO,
                        sender: contracts.standard_bridge,
                        message: Bytes::new(),
                        messageNonce: U256::ZERO,
                        gasLimit: U256::ZERO,
                    },
                    2,
                ),
            ],
        );

        let err = run(contracts, &receipt, 1).await.unwrap_err();
        assert!(err.to_string().contains("SentMessageExtension1"));
    }

    #[tokio::test]
    async fn test_portal_events_key_by_withdrawal_hash() {
        let contracts = contracts_for(ETHEREUM_MAINNET).unwrap();
        let portal = contracts.optimism_portal.unwrap();
        let withdrawal_hash = B256::repeat_byte(0x42);

        let receipt = receipt(
            40,
            0,
            portal,
            vec![event_log(
                portal,
                &WithdrawalFinalized {
                    withdrawalHash: withdrawal_hash,
                    success: true,
                },
                0,
            )],
        );

        let state = run(contracts, &receipt, 0).await.unwrap();

        assert!(state.bridge_transactions.is_empty());
        assert_eq!(state.bridge_events.len(), 1);
        assert_eq!(state.bridge_events[0].id, withdrawal_hash);
        assert_eq!(state.bridge_events[0].transaction_type, BridgeTransactionType::Withdraw);
        assert_eq!(state.bridge_events[0].event_type, BridgeEventType::Finalized);
    }
}
