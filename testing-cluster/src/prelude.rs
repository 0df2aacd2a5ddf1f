//! Common imports for cluster tests.

pub use std::sync::Arc;
pub use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

pub use crate::client::{NetworkProvisioner, NodeClient, NodeHandle};
pub use crate::clock::{Clock, PausedClock, SystemClock};
pub use crate::config::{FailurePolicy, HarnessConfig};
pub use crate::convergence::ConvergencePoller;
pub use crate::deploy::Deployer;
pub use crate::error::{ConvergenceFailure, HarnessError, MissingBlocks, NodeError, TopologyError};
pub use crate::nonce::NonceRegistry;
pub use crate::orchestrator::{
    DeployOrchestrator, OrchestrationReport, TimedJob, TimedReport, TimedWorker, WorkerPlan,
    WorkerReport,
};
pub use crate::retry::{Retrier, RetryPolicy};
pub use crate::rng::TestRng;
pub use crate::simulation::{SimulatedNetwork, SimulatedNode};
pub use crate::topology::{NetworkTopology, Topology, TopologySpec};
pub use crate::types::{
    AccountId, BlockHash, BlockSummary, Contract, DeployRequest, DeploySpec, KeyType, StateQuery,
};
