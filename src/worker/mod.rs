pub mod chains;
pub mod chip_fetcher;
pub mod handlers;
pub mod parser;
#[allow(clippy::module_inception)]
pub mod worker;

pub use chains::ChainManager;
pub use chip_fetcher::{ChipFetcher, ChipReader, RpcChipReader};
pub use parser::EventHandler;
pub use worker::{ChainWorker, FinalityMode, Step, WorkerOptions};
