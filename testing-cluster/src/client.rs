// File: testing-cluster/src/client.rs
//
// Node client seam
//
// The harness never talks to a node directly: it goes through NodeClient,
// whether the node is a container behind a CLI, a remote RPC endpoint or
// the in-process simulation. Node lifecycle belongs to a
// NetworkProvisioner; the core only borrows the handles it returns.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::NodeError;
use crate::topology::TopologySpec;
use crate::types::{BlockHash, BlockSummary, DeployRequest, StateQuery};

/// Operations the harness needs from one running node.
///
/// # Error classification
///
/// Implementations decide which failures are contention (retry-safe,
/// `NodeError::Contention`) and which are hard (`NodeError::Hard`). A
/// non-success exit from the node's client tool is normally contention; a
/// malformed command or an unreachable node is hard.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Stable node name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Submit a deploy to the node's pending pool
    async fn deploy(&self, request: &DeployRequest) -> Result<(), NodeError>;

    /// Ask the node to propose a block from its pending deploys
    async fn propose(&self) -> Result<BlockHash, NodeError>;

    /// Most recent blocks visible to the node, newest first
    async fn show_blocks(&self, depth: usize) -> Result<Vec<BlockSummary>, NodeError>;

    /// Global state lookup at a block
    async fn query_state(&self, query: &StateQuery) -> Result<serde_json::Value, NodeError>;

    /// Node process logs
    async fn logs(&self) -> Result<String, NodeError>;
}

/// Shared handle to a running node
pub type NodeHandle = Arc<dyn NodeClient>;

/// External collaborator that starts and stops node processes.
#[async_trait]
pub trait NetworkProvisioner: Send + Sync {
    /// Start `spec.node_count` nodes peered according to `spec.kind`
    async fn start(&self, spec: &TopologySpec) -> anyhow::Result<Vec<NodeHandle>>;

    /// Stop a single node
    async fn stop(&self, node: &NodeHandle) -> anyhow::Result<()>;

    /// Remove every transient resource (volumes, networks, tasks)
    async fn teardown(&self) -> anyhow::Result<()>;
}
