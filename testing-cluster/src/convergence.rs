// File: testing-cluster/src/convergence.rs
//
// Convergence Waiters
//
// Polls a set of nodes until every node has observed every target block.
// In multi-node tests never assume a block proposed on one node is visible
// on the others: gossip runs at its own pace. A proposed BlockHash only
// counts as evidence once these waiters have seen it on the relevant nodes.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::NodeHandle;
use crate::clock::Clock;
use crate::config::ConvergenceConfig;
use crate::error::{ConvergenceFailure, HarnessError, MissingBlocks};
use crate::types::BlockHash;

/// Default delay between unsuccessful checks of one node
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default show-blocks depth per poll
pub const DEFAULT_DEPTH: usize = 100;

/// Polls nodes until they agree on a set of block hashes.
///
/// Each node is polled independently: a slow node never delays the checks
/// of the others. Observation is cumulative, so a hash that scrolls out of
/// the show-blocks window after being seen still counts.
///
/// # Example
///
/// ```rust,ignore
/// let poller = ConvergencePoller::new(clock.clone());
/// let hash = deployer.deploy_and_get_block_hash(topology.node(0), spec).await?;
/// poller
///     .await_hash(topology.nodes(), &hash, Duration::from_secs(30))
///     .await?;
/// ```
#[derive(Clone)]
pub struct ConvergencePoller {
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    depth: usize,
    cancel: CancellationToken,
}

/// Outcome of polling one node
type NodePoll = Result<Option<MissingBlocks>, HarnessError>;

impl ConvergencePoller {
    /// Poller with default interval and depth
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            depth: DEFAULT_DEPTH,
            cancel: CancellationToken::new(),
        }
    }

    /// Poller configured from the convergence section
    pub fn from_config(clock: Arc<dyn Clock>, config: &ConvergenceConfig) -> Self {
        Self::new(clock)
            .with_poll_interval(config.poll_interval())
            .with_depth(config.depth)
    }

    /// Delay between unsuccessful checks of one node
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Show-blocks depth per poll
    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Stop waiting when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Poll interval in force
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait until every node shows `hash`.
    pub async fn await_hash(
        &self,
        nodes: &[NodeHandle],
        hash: &BlockHash,
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        self.await_hashes(nodes, std::slice::from_ref(hash), timeout)
            .await
    }

    /// Wait until every node shows every hash in `hashes`.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidArgument` if `nodes` is empty
    /// - `HarnessError::ConvergenceTimeout` naming each lagging node and the
    ///   hashes it never showed
    /// - `HarnessError::Cancelled` if the cancellation token fires
    pub async fn await_hashes(
        &self,
        nodes: &[NodeHandle],
        hashes: &[BlockHash],
        timeout: Duration,
    ) -> Result<(), HarnessError> {
        if nodes.is_empty() {
            return Err(HarnessError::InvalidArgument(
                "no nodes provided to await_hashes".to_string(),
            ));
        }

        let targets: IndexSet<BlockHash> = hashes.iter().cloned().collect();
        if targets.is_empty() {
            return Ok(());
        }

        let start = self.clock.now();
        let deadline = start + timeout;

        let polls: Vec<NodePoll> = join_all(
            nodes
                .iter()
                .map(|node| self.poll_node(node, &targets, deadline)),
        )
        .await;

        let mut missing = Vec::new();
        for poll in polls {
            if let Some(lagging) = poll? {
                missing.push(lagging);
            }
        }

        if missing.is_empty() {
            if log::log_enabled!(log::Level::Info) {
                log::info!(
                    "{} block(s) observed on all {} node(s) after {:?}",
                    targets.len(),
                    nodes.len(),
                    self.clock.now() - start
                );
            }
            return Ok(());
        }

        let failure = ConvergenceFailure { missing, timeout };
        if log::log_enabled!(log::Level::Warn) {
            log::warn!("{}", failure);
        }
        Err(HarnessError::ConvergenceTimeout(failure))
    }

    async fn poll_node(
        &self,
        node: &NodeHandle,
        targets: &IndexSet<BlockHash>,
        deadline: Instant,
    ) -> NodePoll {
        let mut pending = targets.clone();
        let mut last_error: Option<String> = None;

        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(HarnessError::Cancelled {
                        operation: format!("convergence wait on {}", node.name()),
                    });
                }
                shown = node.show_blocks(self.depth) => match shown {
                    Ok(blocks) => {
                        for block in &blocks {
                            pending.shift_remove(&block.hash);
                        }
                    }
                    Err(err) => {
                        // node may be briefly unreachable, keep polling
                        if log::log_enabled!(log::Level::Debug) {
                            log::debug!("Failed to list blocks on {}: {}", node.name(), err);
                        }
                        last_error = Some(err.to_string());
                    }
                },
                _ = self.clock.sleep(remaining) => {
                    last_error = Some("show-blocks did not answer before the deadline".to_string());
                }
            }

            if pending.is_empty() {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!("{} observed all {} target block(s)", node.name(), targets.len());
                }
                return Ok(None);
            }

            let now = self.clock.now();
            if now >= deadline {
                return Ok(Some(MissingBlocks {
                    node: node.name().to_string(),
                    hashes: pending.into_iter().collect(),
                    last_error,
                }));
            }

            if log::log_enabled!(log::Level::Debug) {
                log::debug!(
                    "{} still missing {} block(s), next poll in {:?}",
                    node.name(),
                    pending.len(),
                    self.poll_interval
                );
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(HarnessError::Cancelled {
                        operation: format!("convergence wait on {}", node.name()),
                    });
                }
                _ = self.clock.sleep(wait) => {}
            }
        }
    }
}
