pub mod client;
pub mod types;

pub use client::{ChainClient, RpcChainClient};
pub use types::{Block, Log, Receipt};
