//! In-process network for running scenarios without containers.
//!
//! [`SimulatedNetwork`] implements [`NetworkProvisioner`](crate::client::NetworkProvisioner)
//! and hands out [`SimulatedNode`]s as node handles. Nodes keep a pending
//! deploy pool, propose blocks that continue each account's nonce sequence,
//! and flood new blocks to their direct peers after a clock-driven
//! `delay ± jitter`. Everything sleeps through the injected clock, so whole
//! multi-node scenarios finish instantly under paused tokio time.

mod network;
mod node;

pub use network::SimulatedNetwork;
pub use node::{SimulatedBlock, SimulatedNode, NEGLECTED_INVALID_BLOCK};
