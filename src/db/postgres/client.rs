use anyhow::Context;
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use std::time::Duration;
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;
use crate::db::{postgres::PostgresTransaction, DatabaseClient, DatabaseTransaction};

const SCHEMA: &str = include_str!("../../../schema/postgres.sql");
const CONNECT_ATTEMPTS: u32 = 3;

/// PostgreSQL client with connection pooling.
///
/// Every indexer track borrows one connection per block and runs the whole
/// block inside a single transaction on it. Uses `deadpool-postgres` for
/// connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL at {}:{}", settings.host, settings.port);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database)
            .connect_timeout(Duration::from_secs(5));

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        let mut attempt = 1;
        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self {
                        pool,
                    });
                },
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}: {}",
                        attempt, CONNECT_ATTEMPTS, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to connect to PostgreSQL after {} attempts", CONNECT_ATTEMPTS)
                    });
                },
            }
        }
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .context("PostgreSQL health check failed")?;
        Ok(())
    }

    /// Apply `schema/postgres.sql`. Every statement is idempotent.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        client
            .batch_execute(SCHEMA)
            .await
            .context("Failed to apply schema/postgres.sql")?;

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseTransaction>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get PostgreSQL connection")?;

        conn.batch_execute("BEGIN")
            .await
            .context("Failed to begin transaction")?;

        Ok(Box::new(PostgresTransaction::new(conn)))
    }
}
