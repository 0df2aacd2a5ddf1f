// File: testing-cluster/src/error.rs
//
// Error taxonomy for cluster orchestration.
//
// Node clients report `NodeError`, split into contention (retry-safe) and
// hard failures. Everything the core hands back to a scenario is a
// `HarnessError`, which always names the node, and the account where one
// is involved, so a failure can be diagnosed without re-running.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{AccountId, BlockHash, Operation};

/// Failure reported by a node client.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum NodeError {
    /// Transient conflict: nonce claimed by a concurrent block, propose slot
    /// held by another node, nothing proposable yet
    #[error("{operation} on {node} hit contention (status {status}): {output}")]
    Contention {
        operation: Operation,
        node: String,
        status: i32,
        output: String,
    },

    /// Malformed command, unreachable node, anything not retry-safe
    #[error("{operation} on {node} failed: {reason}")]
    Hard {
        operation: Operation,
        node: String,
        reason: String,
    },
}

impl NodeError {
    /// Build a contention error
    pub fn contention(
        operation: Operation,
        node: impl Into<String>,
        status: i32,
        output: impl Into<String>,
    ) -> Self {
        NodeError::Contention {
            operation,
            node: node.into(),
            status,
            output: output.into(),
        }
    }

    /// Build a hard error
    pub fn hard(operation: Operation, node: impl Into<String>, reason: impl Into<String>) -> Self {
        NodeError::Hard {
            operation,
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether the bounded retry wrapper may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Contention { .. })
    }

    /// Operation that failed
    pub fn operation(&self) -> &Operation {
        match self {
            NodeError::Contention { operation, .. } | NodeError::Hard { operation, .. } => {
                operation
            }
        }
    }

    /// Node that reported the failure
    pub fn node(&self) -> &str {
        match self {
            NodeError::Contention { node, .. } | NodeError::Hard { node, .. } => node,
        }
    }
}

/// Invalid topology construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum TopologyError {
    /// Topology needs at least one node
    #[error("topology has no nodes")]
    Empty,

    /// Variant requires a specific node count
    #[error("{variant} topology requires {expected} node(s), got {actual}")]
    NodeCount {
        variant: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Edge endpoint beyond the node set
    #[error("edge ({from}, {to}) references a node outside 0..{node_count}")]
    EdgeOutOfRange {
        from: usize,
        to: usize,
        node_count: usize,
    },

    /// Edge connecting a node to itself
    #[error("self-loop on node {0}")]
    SelfLoop(usize),

    /// Star hub beyond the node set
    #[error("star center {center} is outside 0..{node_count}")]
    CenterOutOfRange { center: usize, node_count: usize },

    /// Provisioner returned a different number of handles than requested
    #[error("provisioner started {actual} node(s), expected {expected}")]
    ProvisionMismatch { expected: usize, actual: usize },
}

/// Hashes one node never observed before the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlocks {
    /// Node name
    pub node: String,
    /// Target hashes the node never showed
    pub hashes: Vec<BlockHash>,
    /// Last error seen while polling the node, if any
    pub last_error: Option<String>,
}

/// Diagnostic for a failed convergence wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceFailure {
    /// Nodes that were still missing hashes, in node order
    pub missing: Vec<MissingBlocks>,
    /// Configured timeout
    pub timeout: Duration,
}

impl ConvergenceFailure {
    /// Names of the lagging nodes
    pub fn nodes(&self) -> Vec<&str> {
        self.missing.iter().map(|m| m.node.as_str()).collect()
    }

    /// Whether `node` was missing `hash` at the deadline
    pub fn is_missing(&self, node: &str, hash: &BlockHash) -> bool {
        self.missing
            .iter()
            .any(|m| m.node == node && m.hashes.contains(hash))
    }
}

impl fmt::Display for ConvergenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocks not observed after {:?}:", self.timeout)?;
        for missing in &self.missing {
            let hashes: Vec<&str> = missing.hashes.iter().map(|h| h.short()).collect();
            write!(f, " {} missing [{}]", missing.node, hashes.join(", "))?;
            if let Some(err) = &missing.last_error {
                write!(f, " (last error: {})", err)?;
            }
            write!(f, ";")?;
        }
        Ok(())
    }
}

/// Error surfaced by the orchestration core.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum HarnessError {
    /// Non-retryable node failure, propagated on first occurrence
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Every permitted attempt failed with contention
    #[error("gave up after {attempts} attempt(s): {last}")]
    RetryExhausted { attempts: u64, last: NodeError },

    /// Nodes did not converge on the required blocks in time
    #[error("convergence timeout: {0}")]
    ConvergenceTimeout(ConvergenceFailure),

    /// Every nonce for the account has been handed out
    #[error("nonce space exhausted for account {account}")]
    NonceExhausted { account: AccountId },

    /// Timed-start worker was asked to start in the past
    #[error("worker {worker} start time is {late_by:?} in the past")]
    Scheduling { worker: String, late_by: Duration },

    /// Cancellation token fired before the operation finished
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    /// Worker task panicked or was aborted
    #[error("worker {worker} did not finish: {reason}")]
    WorkerPanicked { worker: String, reason: String },

    /// Invalid topology
    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    /// Caller passed something unusable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HarnessError {
    /// Underlying node error, if the failure came from a node
    pub fn node_error(&self) -> Option<&NodeError> {
        match self {
            HarnessError::Node(err) => Some(err),
            HarnessError::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Convergence diagnostic, if this is a convergence timeout
    pub fn convergence_failure(&self) -> Option<&ConvergenceFailure> {
        match self {
            HarnessError::ConvergenceTimeout(failure) => Some(failure),
            _ => None,
        }
    }
}
