use alloy::primitives::{Address, B256, U256};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use deadpool_postgres::Object;
use log::{error, warn};
use std::str::FromStr;
use tokio_postgres::types::ToSql;

use crate::db::models::{
    BridgeEvent, BridgeTransaction, Checkpoint, Epoch, EventOrigin, Node, NodeEvent, NodeUpdate,
    StakeChip, StakeEvent, StakeTransaction,
};
use crate::db::DatabaseTransaction;
use crate::utils::{
    address_to_string, b256_to_string, hex_encode, to_i64, u256_to_string, u256s_to_strings,
};

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

type Param<'a> = &'a (dyn ToSql + Sync);

/// Build `($1, ..., $n), ($n+1, ...)` placeholders for a multi-row insert.
/// `casts[i]` is appended to the i-th placeholder of every row.
fn values_clauses(rows: usize, casts: &[&str]) -> String {
    (0..rows)
        .map(|row| {
            let start = row * casts.len() + 1;
            let placeholders: Vec<String> = casts
                .iter()
                .enumerate()
                .map(|(i, cast)| format!("${}{}", start + i, cast))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column values shared by every event table, in schema order.
struct OriginColumns {
    chain_id: i64,
    transaction_hash: String,
    transaction_index: i64,
    transaction_status: bool,
    block_hash: String,
    block_number: i64,
    block_timestamp: chrono::DateTime<chrono::Utc>,
    log_index: i64,
    finalized: bool,
}

impl OriginColumns {
    fn new(origin: &EventOrigin) -> Result<Self> {
        Ok(Self {
            chain_id: to_i64(origin.chain_id)?,
            transaction_hash: b256_to_string(&origin.transaction_hash),
            transaction_index: to_i64(origin.transaction_index)?,
            transaction_status: origin.transaction_status,
            block_hash: b256_to_string(&origin.block_hash),
            block_number: to_i64(origin.block_number)?,
            block_timestamp: origin.block_timestamp,
            log_index: to_i64(origin.log_index)?,
            finalized: origin.finalized,
        })
    }
}

/// A block-scoped transaction on one pooled connection.
///
/// If dropped while still open (cancelled block, panic) the connection is
/// detached from the pool and closed, which makes the server abort the
/// transaction instead of handing a half-written session to the next user.
pub struct PostgresTransaction {
    conn: Option<Object>,
}

impl PostgresTransaction {
    pub fn new(conn: Object) -> Self {
        Self {
            conn: Some(conn),
        }
    }

    fn client(&self) -> Result<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("PostgreSQL transaction already finished"))
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| anyhow!("PostgreSQL transaction already finished"))?;

        if let Err(e) = conn.batch_execute(statement).await {
            // Never return a connection in an unknown transaction state.
            let _ = Object::take(conn);
            return Err(anyhow!("{} failed: {}", statement, e));
        }

        Ok(())
    }

    async fn delete_by_block_number(
        &self,
        table: &str,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        let query = format!(
            "DELETE FROM indexer.{} WHERE chain_id = $1 AND block_number = $2",
            table
        );

        self.client()?
            .execute(&query, &[&to_i64(chain_id)?, &to_i64(block_number)?])
            .await
            .with_context(|| {
                format!("Failed to delete {} of block {} on chain {}", table, block_number, chain_id)
            })?;

        Ok(())
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("PostgreSQL transaction dropped while open, discarding its connection");
            let _ = Object::take(conn);
        }
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    async fn lock_chain(&mut self, chain_id: u64) -> Result<()> {
        self.client()?
            .execute("SELECT pg_advisory_xact_lock($1)", &[&to_i64(chain_id)?])
            .await
            .with_context(|| format!("Failed to lock chain {}", chain_id))?;
        Ok(())
    }

    // ==================== CHECKPOINTS ====================

    async fn find_checkpoint(
        &mut self,
        chain_id: u64,
        finalized: bool,
    ) -> Result<Option<Checkpoint>> {
        let query = r#"
            SELECT chain_id, finalized, block_number, block_hash, updated_at
            FROM indexer.checkpoints
            WHERE chain_id = $1 AND finalized = $2
        "#;

        let row = self.client()?.query_opt(query, &[&to_i64(chain_id)?, &finalized]).await?;

        row.map(|r| -> Result<Checkpoint> {
            let block_number: i64 = r.try_get("block_number")?;
            let block_hash: String = r.try_get("block_hash")?;

            Ok(Checkpoint {
                chain_id,
                finalized: r.try_get("finalized")?,
                block_number: u64::try_from(block_number)
                    .context("negative checkpoint block number")?,
                block_hash: B256::from_str(&block_hash).context("invalid checkpoint block hash")?,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.checkpoints (chain_id, finalized, block_number, block_hash, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, finalized) DO UPDATE SET
                block_number = EXCLUDED.block_number,
                block_hash = EXCLUDED.block_hash,
                updated_at = EXCLUDED.updated_at
        "#;

        self.client()?
            .execute(
                query,
                &[
                    &to_i64(checkpoint.chain_id)?,
                    &checkpoint.finalized,
                    &to_i64(checkpoint.block_number)?,
                    &b256_to_string(&checkpoint.block_hash),
                    &checkpoint.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to save checkpoint for chain {} (finalized: {}): {:?}",
                    checkpoint.chain_id, checkpoint.finalized, e
                );
                e
            })?;

        Ok(())
    }

    // ==================== STAKING ====================

    async fn save_stake_transaction(&mut self, transaction: &StakeTransaction) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.stake_transactions (
                id, type, chain_id, "user", node, value, chips,
                block_timestamp, block_number, transaction_index
            ) VALUES ($1, $2, $3, $4, $5, $6::text::numeric, $7::text[]::numeric[], $8, $9, $10)
            ON CONFLICT (id, type) DO UPDATE SET
                chain_id = EXCLUDED.chain_id,
                "user" = EXCLUDED."user",
                node = EXCLUDED.node,
                value = EXCLUDED.value,
                chips = EXCLUDED.chips,
                block_timestamp = EXCLUDED.block_timestamp,
                block_number = EXCLUDED.block_number,
                transaction_index = EXCLUDED.transaction_index
        "#;

        self.client()?
            .execute(
                query,
                &[
                    &b256_to_string(&transaction.id),
                    &transaction.transaction_type.as_str(),
                    &to_i64(transaction.chain_id)?,
                    &address_to_string(&transaction.user),
                    &address_to_string(&transaction.node),
                    &u256_to_string(&transaction.value),
                    &u256s_to_strings(&transaction.chips),
                    &transaction.block_timestamp,
                    &to_i64(transaction.block_number)?,
                    &to_i64(transaction.transaction_index)?,
                ],
            )
            .await
            .with_context(|| format!("Failed to save stake transaction {}", transaction.id))?;

        Ok(())
    }

    async fn save_stake_event(&mut self, event: &StakeEvent) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.stake_events (
                id, type, transaction_type, chain_id, transaction_hash, transaction_index,
                transaction_status, block_hash, block_number, block_timestamp, log_index, finalized
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id, type) DO UPDATE SET
                transaction_type = EXCLUDED.transaction_type,
                chain_id = EXCLUDED.chain_id,
                transaction_hash = EXCLUDED.transaction_hash,
                transaction_index = EXCLUDED.transaction_index,
                transaction_status = EXCLUDED.transaction_status,
                block_hash = EXCLUDED.block_hash,
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp,
                log_index = EXCLUDED.log_index,
                finalized = EXCLUDED.finalized
        "#;

        let origin = OriginColumns::new(&event.origin)?;

        self.client()?
            .execute(
                query,
                &[
                    &b256_to_string(&event.id),
                    &event.event_type.as_str(),
                    &event.transaction_type().as_str(),
                    &origin.chain_id,
                    &origin.transaction_hash,
                    &origin.transaction_index,
                    &origin.transaction_status,
                    &origin.block_hash,
                    &origin.block_number,
                    &origin.block_timestamp,
                    &origin.log_index,
                    &origin.finalized,
                ],
            )
            .await
            .with_context(|| format!("Failed to save stake event {}", event.id))?;

        Ok(())
    }

    async fn delete_stake_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.delete_by_block_number("stake_transactions", chain_id, block_number).await
    }

    async fn delete_stake_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.delete_by_block_number("stake_events", chain_id, block_number).await
    }

    // ==================== CHIPS ====================

    /// Batch upsert (multi-row VALUES). The owner columns are only replaced
    /// when [`StakeChip::accepts_owner_change`] holds for the incoming row.
    async fn save_stake_chips(&mut self, chips: &[StakeChip]) -> Result<()> {
        if chips.is_empty() {
            return Ok(());
        }

        const CASTS: [&str; 9] = ["::text::numeric", "", "", "::text::numeric", "", "", "", "", ""];
        const BATCH_SIZE: usize = 500;
        const ACCEPTS_OWNER: &str = "(EXCLUDED.owner_block_number, EXCLUDED.owner_log_index) \
            >= (c.owner_block_number, c.owner_log_index) \
            OR (EXCLUDED.owner_finalized AND NOT c.owner_finalized \
                AND EXCLUDED.owner_block_number <= c.owner_block_number)";

        struct ChipColumns {
            id: String,
            owner: String,
            node: String,
            value: String,
            metadata: String,
            block_number: i64,
            owner_block_number: i64,
            owner_log_index: i64,
            owner_finalized: bool,
        }

        let client = self.client()?;

        for chunk in chips.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO indexer.stake_chips AS c (
                    id, owner, node, value, metadata,
                    block_number, owner_block_number, owner_log_index, owner_finalized
                ) VALUES {values}
                ON CONFLICT (id) DO UPDATE SET
                    node = EXCLUDED.node,
                    value = EXCLUDED.value,
                    metadata = EXCLUDED.metadata,
                    block_number = EXCLUDED.block_number,
                    owner = CASE WHEN {accepts}
                        THEN EXCLUDED.owner ELSE c.owner END,
                    owner_block_number = CASE WHEN {accepts}
                        THEN EXCLUDED.owner_block_number ELSE c.owner_block_number END,
                    owner_log_index = CASE WHEN {accepts}
                        THEN EXCLUDED.owner_log_index ELSE c.owner_log_index END,
                    owner_finalized = CASE WHEN {accepts}
                        THEN EXCLUDED.owner_finalized ELSE c.owner_finalized END
                "#,
                values = values_clauses(chunk.len(), &CASTS),
                accepts = ACCEPTS_OWNER,
            );

            let columns = chunk
                .iter()
                .map(|chip| {
                    Ok(ChipColumns {
                        id: u256_to_string(&chip.id),
                        owner: address_to_string(&chip.owner),
                        node: address_to_string(&chip.node),
                        value: u256_to_string(&chip.value),
                        metadata: sanitize_string(&chip.metadata),
                        block_number: to_i64(chip.block_number)?,
                        owner_block_number: to_i64(chip.owner_block_number)?,
                        owner_log_index: to_i64(chip.owner_log_index)?,
                        owner_finalized: chip.owner_finalized,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let mut params: Vec<Param> = Vec::with_capacity(chunk.len() * CASTS.len());
            for chip in &columns {
                params.push(&chip.id);
                params.push(&chip.owner);
                params.push(&chip.node);
                params.push(&chip.value);
                params.push(&chip.metadata);
                params.push(&chip.block_number);
                params.push(&chip.owner_block_number);
                params.push(&chip.owner_log_index);
                params.push(&chip.owner_finalized);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!("Failed to batch insert {} stake chips: {:?}", chunk.len(), e);
                e
            })?;
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
        let query = r#"
            UPDATE indexer.stake_chips
            SET owner = $1, owner_block_number = $3, owner_log_index = $4, owner_finalized = $5
            WHERE id = $2::text::numeric
              AND ((owner_block_number, owner_log_index) <= ($3, $4)
                OR ($5 AND NOT owner_finalized AND owner_block_number >= $3))
        "#;

        self.client()?
            .execute(
                query,
                &[
                    &address_to_string(&owner),
                    &u256_to_string(&token_id),
                    &to_i64(block_number)?,
                    &to_i64(log_index)?,
                    &finalized,
                ],
            )
            .await
            .with_context(|| format!("Failed to update owner of chip {}", token_id))?;

        Ok(())
    }

    // ==================== BRIDGE ====================

    async fn save_bridge_transaction(&mut self, transaction: &BridgeTransaction) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.bridge_transactions (
                id, type, chain_id, sender, receiver, token_address_l1, token_address_l2,
                value, data, block_timestamp, block_number, transaction_index
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8::text::numeric, $9, $10, $11, $12)
            ON CONFLICT (id, type) DO UPDATE SET
                chain_id = EXCLUDED.chain_id,
                sender = EXCLUDED.sender,
                receiver = EXCLUDED.receiver,
                token_address_l1 = EXCLUDED.token_address_l1,
                token_address_l2 = EXCLUDED.token_address_l2,
                value = EXCLUDED.value,
                data = EXCLUDED.data,
                block_timestamp = EXCLUDED.block_timestamp,
                block_number = EXCLUDED.block_number,
                transaction_index = EXCLUDED.transaction_index
        "#;

        self.client()?
            .execute(
                query,
                &[
                    &b256_to_string(&transaction.id),
                    &transaction.transaction_type.as_str(),
                    &to_i64(transaction.chain_id)?,
                    &address_to_string(&transaction.sender),
                    &address_to_string(&transaction.receiver),
                    &transaction.token_address_l1.as_ref().map(address_to_string),
                    &transaction.token_address_l2.as_ref().map(address_to_string),
                    &u256_to_string(&transaction.value),
                    &hex_encode(&transaction.data),
                    &transaction.block_timestamp,
                    &to_i64(transaction.block_number)?,
                    &to_i64(transaction.transaction_index)?,
                ],
            )
            .await
            .with_context(|| format!("Failed to save bridge transaction {}", transaction.id))?;

        Ok(())
    }

    async fn save_bridge_event(&mut self, event: &BridgeEvent) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.bridge_events (
                id, type, event_type, chain_id, transaction_hash, transaction_index,
                transaction_status, block_hash, block_number, block_timestamp, log_index, finalized
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id, type, event_type) DO UPDATE SET
                chain_id = EXCLUDED.chain_id,
                transaction_hash = EXCLUDED.transaction_hash,
                transaction_index = EXCLUDED.transaction_index,
                transaction_status = EXCLUDED.transaction_status,
                block_hash = EXCLUDED.block_hash,
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp,
                log_index = EXCLUDED.log_index,
                finalized = EXCLUDED.finalized
        "#;

        let origin = OriginColumns::new(&event.origin)?;

        self.client()?
            .execute(
                query,
                &[
                    &b256_to_string(&event.id),
                    &event.transaction_type.as_str(),
                    &event.event_type.as_str(),
                    &origin.chain_id,
                    &origin.transaction_hash,
                    &origin.transaction_index,
                    &origin.transaction_status,
                    &origin.block_hash,
                    &origin.block_number,
                    &origin.block_timestamp,
                    &origin.log_index,
                    &origin.finalized,
                ],
            )
            .await
            .with_context(|| format!("Failed to save bridge event {}", event.id))?;

        Ok(())
    }

    async fn delete_bridge_transactions_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.delete_by_block_number("bridge_transactions", chain_id, block_number).await
    }

    async fn delete_bridge_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.delete_by_block_number("bridge_events", chain_id, block_number).await
    }

    // ==================== NODES ====================

    async fn save_node_event(&mut self, event: &NodeEvent) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.node_events (
                transaction_hash, log_index, address, type, metadata, chain_id, transaction_index,
                transaction_status, block_hash, block_number, block_timestamp, finalized
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (transaction_hash, log_index) DO UPDATE SET
                address = EXCLUDED.address,
                type = EXCLUDED.type,
                metadata = EXCLUDED.metadata,
                chain_id = EXCLUDED.chain_id,
                transaction_index = EXCLUDED.transaction_index,
                transaction_status = EXCLUDED.transaction_status,
                block_hash = EXCLUDED.block_hash,
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp,
                finalized = EXCLUDED.finalized
        "#;

        let origin = OriginColumns::new(&event.origin)?;

        self.client()?
            .execute(
                query,
                &[
                    &origin.transaction_hash,
                    &origin.log_index,
                    &address_to_string(&event.address),
                    &event.event_type.as_str(),
                    &event.metadata,
                    &origin.chain_id,
                    &origin.transaction_index,
                    &origin.transaction_status,
                    &origin.block_hash,
                    &origin.block_number,
                    &origin.block_timestamp,
                    &origin.finalized,
                ],
            )
            .await
            .with_context(|| format!("Failed to save node event of {}", event.address))?;

        Ok(())
    }

    async fn delete_node_events_by_block_number(
        &mut self,
        chain_id: u64,
        block_number: u64,
    ) -> Result<()> {
        self.delete_by_block_number("node_events", chain_id, block_number).await
    }

    async fn save_node(&mut self, node: &Node) -> Result<()> {
        let query = r#"
            INSERT INTO indexer.nodes (
                address, id, name, description, tax_rate_basis_points,
                is_public_good, alpha, created_at_block, created_at, updated_at
            ) VALUES ($1, $2::text::numeric, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (address) DO UPDATE SET
                id = EXCLUDED.id,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                tax_rate_basis_points = EXCLUDED.tax_rate_basis_points,
                is_public_good = EXCLUDED.is_public_good,
                alpha = EXCLUDED.alpha,
                created_at_block = EXCLUDED.created_at_block,
                created_at = EXCLUDED.created_at,
                updated_at = NOW()
        "#;

        self.client()?
            .execute(
                query,
                &[
                    &address_to_string(&node.address),
                    &u256_to_string(&node.id),
                    &sanitize_string(&node.name),
                    &sanitize_string(&node.description),
                    &to_i64(node.tax_rate_basis_points)?,
                    &node.is_public_good,
                    &node.alpha,
                    &to_i64(node.created_at_block)?,
                    &node.created_at,
                ],
            )
            .await
            .with_context(|| format!("Failed to save node {}", node.address))?;

        Ok(())
    }

    async fn batch_update_nodes(&mut self, updates: &[NodeUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let client = self.client()?;
        let statement = client
            .prepare(
                r#"
                UPDATE indexer.nodes SET
                    name = COALESCE($2, name),
                    description = COALESCE($3, description),
                    tax_rate_basis_points = COALESCE($4, tax_rate_basis_points),
                    updated_at = NOW()
                WHERE address = $1
                "#,
            )
            .await?;

        for update in updates {
            let tax_rate = update.tax_rate_basis_points.map(to_i64).transpose()?;
            client
                .execute(
                    &statement,
                    &[
                        &address_to_string(&update.address),
                        &update.name.as_deref().map(sanitize_string),
                        &update.description.as_deref().map(sanitize_string),
                        &tax_rate,
                    ],
                )
                .await
                .with_context(|| format!("Failed to update node {}", update.address))?;
        }

        Ok(())
    }

    // ==================== EPOCHS ====================

    async fn save_epoch(&mut self, epoch: &Epoch) -> Result<()> {
        let client = self.client()?;
        let epoch_id = to_i64(epoch.id)?;
        let transaction_hash = b256_to_string(&epoch.transaction_hash);

        let query = r#"
            INSERT INTO indexer.epochs (
                id, transaction_hash, chain_id, start_timestamp, end_timestamp,
                transaction_index, block_hash, block_number, block_timestamp,
                total_operation_rewards, total_staking_rewards, total_rewarded_nodes,
                total_request_counts
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                $10::text::numeric, $11::text::numeric, $12, $13::text::numeric)
            ON CONFLICT (id, transaction_hash) DO UPDATE SET
                chain_id = EXCLUDED.chain_id,
                start_timestamp = EXCLUDED.start_timestamp,
                end_timestamp = EXCLUDED.end_timestamp,
                transaction_index = EXCLUDED.transaction_index,
                block_hash = EXCLUDED.block_hash,
                block_number = EXCLUDED.block_number,
                block_timestamp = EXCLUDED.block_timestamp,
                total_operation_rewards = EXCLUDED.total_operation_rewards,
                total_staking_rewards = EXCLUDED.total_staking_rewards,
                total_rewarded_nodes = EXCLUDED.total_rewarded_nodes,
                total_request_counts = EXCLUDED.total_request_counts
        "#;

        client
            .execute(
                query,
                &[
                    &epoch_id,
                    &transaction_hash,
                    &to_i64(epoch.chain_id)?,
                    &epoch.start_timestamp,
                    &epoch.end_timestamp,
                    &to_i64(epoch.transaction_index)?,
                    &b256_to_string(&epoch.block_hash),
                    &to_i64(epoch.block_number)?,
                    &epoch.block_timestamp,
                    &u256_to_string(&epoch.total_operation_rewards),
                    &u256_to_string(&epoch.total_staking_rewards),
                    &to_i64(epoch.total_rewarded_nodes)?,
                    &u256_to_string(&epoch.total_request_counts),
                ],
            )
            .await
            .with_context(|| format!("Failed to save epoch {}", epoch.id))?;

        client
            .execute(
                "DELETE FROM indexer.epoch_items WHERE epoch_id = $1 AND transaction_hash = $2",
                &[&epoch_id, &transaction_hash],
            )
            .await
            .with_context(|| format!("Failed to clear items of epoch {}", epoch.id))?;

        if epoch.reward_items.is_empty() {
            return Ok(());
        }

        const CASTS: [&str; 8] = [
            "",
            "",
            "",
            "",
            "::text::numeric",
            "::text::numeric",
            "::text::numeric",
            "::text::numeric",
        ];
        const BATCH_SIZE: usize = 500;

        struct ItemColumns {
            index: i64,
            node_address: String,
            operation_rewards: String,
            staking_rewards: String,
            tax_collected: String,
            request_count: String,
        }

        for chunk in epoch.reward_items.chunks(BATCH_SIZE) {
            let query = format!(
                r#"
                INSERT INTO indexer.epoch_items (
                    epoch_id, transaction_hash, index, node_address,
                    operation_rewards, staking_rewards, tax_collected, request_count
                ) VALUES {}
                "#,
                values_clauses(chunk.len(), &CASTS)
            );

            let columns = chunk
                .iter()
                .map(|item| {
                    Ok(ItemColumns {
                        index: to_i64(item.index)?,
                        node_address: address_to_string(&item.node_address),
                        operation_rewards: u256_to_string(&item.operation_rewards),
                        staking_rewards: u256_to_string(&item.staking_rewards),
                        tax_collected: u256_to_string(&item.tax_collected),
                        request_count: u256_to_string(&item.request_count),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let mut params: Vec<Param> = Vec::with_capacity(chunk.len() * CASTS.len());
            for item in &columns {
                params.push(&epoch_id);
                params.push(&transaction_hash);
                params.push(&item.index);
                params.push(&item.node_address);
                params.push(&item.operation_rewards);
                params.push(&item.staking_rewards);
                params.push(&item.tax_collected);
                params.push(&item.request_count);
            }

            client.execute(&query, &params).await.map_err(|e| {
                error!(
                    "Failed to batch insert {} items of epoch {}: {:?}",
                    chunk.len(),
                    epoch.id,
                    e
                );
                e
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_clauses_number_rows_consecutively() {
        assert_eq!(values_clauses(1, &["", "::text::numeric"]), "($1, $2::text::numeric)");
        assert_eq!(
            values_clauses(2, &["", "", ""]),
            "($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn test_sanitize_string_strips_nul() {
        assert_eq!(sanitize_string("node\0one"), "nodeone");
    }
}
