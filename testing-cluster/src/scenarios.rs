// File: testing-cluster/src/scenarios.rs
//
// Multi-node Scenarios
//
// Reusable end-to-end flows over a provisioned topology: deploy and wait
// for propagation, call a stored contract from every node, simultaneous
// deploy bursts, and concurrent deploy workers with a block-shape check.
// Each flow returns a report; deciding pass/fail is left to the caller.

use std::time::Duration;

use crate::config::HarnessConfig;
use crate::convergence::ConvergencePoller;
use crate::deploy::Deployer;
use crate::error::{ConvergenceFailure, HarnessError};
use crate::orchestrator::{DeployOrchestrator, OrchestrationReport, TimedJob, TimedReport, WorkerPlan};
use crate::topology::Topology;
use crate::types::{BlockHash, DeploySpec, KeyType, StateQuery};

/// Log fragment a node writes when it drops a block for reusing a nonce
pub const DEFAULT_FORBIDDEN_MARKER: &str = crate::simulation::NEGLECTED_INVALID_BLOCK;

/// Deploy `spec` on one node and wait until every node has the block.
pub async fn deploy_and_propagate(
    topology: &Topology,
    deployer: &Deployer,
    poller: &ConvergencePoller,
    node_index: usize,
    spec: DeploySpec,
    timeout: Duration,
) -> Result<BlockHash, HarnessError> {
    if node_index >= topology.len() {
        return Err(HarnessError::InvalidArgument(format!(
            "node index {} out of range for {} node(s)",
            node_index,
            topology.len()
        )));
    }

    let block_hash = deployer
        .deploy_and_get_block_hash(topology.node(node_index), spec)
        .await?;
    poller
        .await_hash(topology.nodes(), &block_hash, timeout)
        .await?;
    Ok(block_hash)
}

/// State location read after each call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLocation {
    /// Root key, usually the calling account
    pub key: String,
    /// Root key type
    pub key_type: KeyType,
    /// Path below the key
    pub path: String,
}

impl StateLocation {
    /// Path under an account address
    pub fn address(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            key_type: KeyType::Address,
            path: path.into(),
        }
    }

    fn at(&self, block_hash: &BlockHash) -> StateQuery {
        StateQuery {
            block_hash: block_hash.clone(),
            key: self.key.clone(),
            key_type: self.key_type,
            path: self.path.clone(),
        }
    }
}

/// One node's call of a stored contract
#[derive(Debug, Clone)]
pub struct StoredCall {
    /// Calling node
    pub node: String,
    /// Block carrying the call
    pub block_hash: BlockHash,
    /// Value read at that block
    pub value: serde_json::Value,
}

/// Result of [`call_stored_contract`]
#[derive(Debug, Clone)]
pub struct StoredContractReport {
    /// Blocks carrying the definitions, in deploy order
    pub definition_blocks: Vec<BlockHash>,
    /// One entry per node, in node order
    pub calls: Vec<StoredCall>,
}

impl StoredContractReport {
    /// Values read after each call, in node order
    pub fn values(&self) -> Vec<&serde_json::Value> {
        self.calls.iter().map(|c| &c.value).collect()
    }
}

/// Define contracts on node 0, then call from every node in turn.
///
/// Each call is propagated to the whole cluster before its block's state
/// is read from the calling node, so a counter-style contract yields one
/// increment per node.
pub async fn call_stored_contract(
    topology: &Topology,
    deployer: &Deployer,
    poller: &ConvergencePoller,
    definitions: Vec<DeploySpec>,
    call: DeploySpec,
    location: &StateLocation,
    timeout: Duration,
) -> Result<StoredContractReport, HarnessError> {
    let mut definition_blocks = Vec::with_capacity(definitions.len());
    for definition in definitions {
        definition_blocks
            .push(deploy_and_propagate(topology, deployer, poller, 0, definition, timeout).await?);
    }

    let mut calls = Vec::with_capacity(topology.len());
    for index in 0..topology.len() {
        let block_hash =
            deploy_and_propagate(topology, deployer, poller, index, call.clone(), timeout).await?;
        let node = topology.node(index);
        let value = node.query_state(&location.at(&block_hash)).await?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{} read {} = {} at {}", node.name(), location.path, value, block_hash.short());
        }
        calls.push(StoredCall {
            node: node.name().to_string(),
            block_hash,
            value,
        });
    }

    Ok(StoredContractReport {
        definition_blocks,
        calls,
    })
}

/// Options for [`simultaneous_deploy_cycles`]
#[derive(Debug, Clone)]
pub struct CycleOptions {
    /// Number of deploy bursts
    pub cycles: usize,
    /// Delay between scheduling a burst and its start
    pub lead: Duration,
    /// Convergence timeout for the produced blocks
    pub timeout: Duration,
    /// Log fragment no node may have written
    pub forbidden_marker: String,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            cycles: 4,
            lead: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            forbidden_marker: DEFAULT_FORBIDDEN_MARKER.to_string(),
        }
    }
}

impl CycleOptions {
    /// Defaults with the burst lead and convergence timeout from `config`
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            lead: config.orchestrator.start_lead(),
            timeout: config.convergence.timeout(),
            ..Self::default()
        }
    }
}

/// Result of [`simultaneous_deploy_cycles`]
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Timed reports per cycle
    pub cycles: Vec<Vec<TimedReport>>,
    /// Blocks produced by successful deploys, all cycles
    pub block_hashes: Vec<BlockHash>,
    /// Set when some block never reached some node
    pub convergence: Option<ConvergenceFailure>,
    /// Nodes whose logs contain the forbidden marker
    pub flagged_nodes: Vec<String>,
}

impl CycleReport {
    /// Timed deploys that failed and were left out of the convergence check
    pub fn failed(&self) -> Vec<&TimedReport> {
        self.cycles
            .iter()
            .flatten()
            .filter(|r| r.result.is_err())
            .collect()
    }

    /// Every produced block reached every node
    pub fn converged(&self) -> bool {
        self.convergence.is_none()
    }

    /// Converged, and no node logged the forbidden marker
    pub fn is_clean(&self) -> bool {
        self.converged() && self.flagged_nodes.is_empty()
    }
}

/// Fire one deploy per node at the same instant, `options.cycles` times.
///
/// `contracts[i]` is deployed on node `i` every cycle. Failed deploys are
/// excluded. A convergence timeout on the remaining blocks is recorded in
/// the report rather than raised, so every node's log is still scanned for
/// the forbidden marker.
pub async fn simultaneous_deploy_cycles(
    topology: &Topology,
    orchestrator: &DeployOrchestrator,
    poller: &ConvergencePoller,
    contracts: &[DeploySpec],
    options: &CycleOptions,
) -> Result<CycleReport, HarnessError> {
    if contracts.len() != topology.len() {
        return Err(HarnessError::InvalidArgument(format!(
            "{} contract(s) for {} node(s)",
            contracts.len(),
            topology.len()
        )));
    }

    let mut cycles = Vec::with_capacity(options.cycles);
    let mut block_hashes = Vec::new();
    for cycle in 0..options.cycles {
        if log::log_enabled!(log::Level::Info) {
            log::info!("Deploy/propose cycle {} of {}", cycle + 1, options.cycles);
        }
        let jobs = topology
            .nodes()
            .iter()
            .zip(contracts)
            .map(|(node, spec)| TimedJob::new(node.name(), node.clone(), spec.clone()))
            .collect();
        let start_at = orchestrator.start_in(options.lead);
        let reports = orchestrator.run_simultaneous(start_at, jobs).await?;

        block_hashes.extend(reports.iter().filter_map(|r| r.result.as_ref().ok().cloned()));
        cycles.push(reports);
    }

    let convergence = match poller
        .await_hashes(topology.nodes(), &block_hashes, options.timeout)
        .await
    {
        Ok(()) => None,
        Err(HarnessError::ConvergenceTimeout(failure)) => Some(failure),
        Err(err) => return Err(err),
    };

    let mut flagged_nodes = Vec::new();
    for node in topology.nodes() {
        if node.logs().await?.contains(&options.forbidden_marker) {
            if log::log_enabled!(log::Level::Warn) {
                log::warn!("{} logged {:?}", node.name(), options.forbidden_marker.trim());
            }
            flagged_nodes.push(node.name().to_string());
        }
    }

    Ok(CycleReport {
        cycles,
        block_hashes,
        convergence,
        flagged_nodes,
    })
}

/// Deploy counts one node reported for its most recent blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCountCheck {
    /// Node name
    pub node: String,
    /// Deploy counts of the newest blocks, newest first
    pub observed: Vec<u32>,
    /// Whether `observed` equals the expectation as a multiset
    pub matches: bool,
}

/// Result of [`multiple_deploys_at_once`]
#[derive(Debug, Clone)]
pub struct MultipleDeploysReport {
    /// Worker outcomes
    pub orchestration: OrchestrationReport,
    /// Block-shape check per node
    pub nodes: Vec<DeployCountCheck>,
}

impl MultipleDeploysReport {
    /// Every node showed the expected deploy counts
    pub fn all_match(&self) -> bool {
        self.nodes.iter().all(|n| n.matches)
    }
}

/// Run `batches` on every node concurrently, wait for all produced blocks,
/// then compare the deploy counts of each node's newest blocks against
/// `expected_counts`.
///
/// Only the first `expected_counts.len()` blocks of a
/// `show_blocks(expected_counts.len() * 100)` listing are compared, and
/// order is ignored: how deploys cluster into blocks depends on gossip
/// timing.
pub async fn multiple_deploys_at_once(
    topology: &Topology,
    orchestrator: &DeployOrchestrator,
    poller: &ConvergencePoller,
    batches: &[Vec<DeploySpec>],
    expected_counts: &[u32],
    timeout: Duration,
) -> Result<MultipleDeploysReport, HarnessError> {
    let plans = topology
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, node)| {
            batches.iter().cloned().fold(
                WorkerPlan::new(format!("node{}", i + 1), node.clone()),
                WorkerPlan::with_batch,
            )
        })
        .collect();
    let orchestration = orchestrator.run(plans).await;

    poller
        .await_hashes(topology.nodes(), &orchestration.all_block_hashes(), timeout)
        .await?;

    let n_blocks = expected_counts.len();
    let expected = sorted(expected_counts.to_vec());
    let mut nodes = Vec::with_capacity(topology.len());
    for node in topology.nodes() {
        let observed: Vec<u32> = node
            .show_blocks(n_blocks * 100)
            .await?
            .into_iter()
            .take(n_blocks)
            .map(|b| b.deploy_count)
            .collect();
        let matches = sorted(observed.clone()) == expected;
        if !matches && log::log_enabled!(log::Level::Warn) {
            log::warn!(
                "{} deploy counts {:?} do not match expected {:?}",
                node.name(),
                observed,
                expected_counts
            );
        }
        nodes.push(DeployCountCheck {
            node: node.name().to_string(),
            observed,
            matches,
        });
    }

    Ok(MultipleDeploysReport {
        orchestration,
        nodes,
    })
}

fn sorted(mut counts: Vec<u32>) -> Vec<u32> {
    counts.sort_unstable();
    counts
}
