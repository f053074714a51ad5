pub mod bridge;
pub mod chips;
pub mod staking_v1;
pub mod staking_v2;

pub use chips::IChips;
pub use staking_v1::IStaking;
