pub mod abis;
pub mod chain;
pub mod config;
pub mod db;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use db::{DatabaseClient, MemoryDatabase, PostgresClient};
pub use worker::{ChainManager, ChainWorker, EventHandler};
