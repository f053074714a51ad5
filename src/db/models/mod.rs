pub mod bridge;
pub mod checkpoint;
pub mod chip;
pub mod epoch;
pub mod node;
pub mod origin;
pub mod stake;

pub use bridge::{BridgeEvent, BridgeEventType, BridgeTransaction, BridgeTransactionType};
pub use checkpoint::Checkpoint;
pub use chip::StakeChip;
pub use epoch::{Epoch, RewardedNode};
pub use node::{Node, NodeEvent, NodeEventType, NodeUpdate};
pub use origin::EventOrigin;
pub use stake::{StakeEvent, StakeEventType, StakeTransaction, StakeTransactionType};
