use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::node::{Gossip, SimulatedNode};
use crate::client::{NetworkProvisioner, NodeClient, NodeHandle};
use crate::clock::Clock;
use crate::config::{HarnessConfig, SimulationConfig};
use crate::nonce::DEFAULT_NONCE_BASE;
use crate::rng::TestRng;
use crate::topology::TopologySpec;

/// In-process cluster of [`SimulatedNode`]s.
///
/// Nodes are wired along the edges of the requested topology; a block
/// only reaches an indirectly connected node by being relayed hop by hop.
pub struct SimulatedNetwork {
    gossip: Arc<Gossip>,
    nonce_base: u64,
    nodes: Mutex<Vec<Arc<SimulatedNode>>>,
}

impl SimulatedNetwork {
    /// Network whose gossip latency follows `config`
    pub fn new(clock: Arc<dyn Clock>, config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => TestRng::with_seed(seed),
            None => TestRng::new_from_env_or_random(),
        };
        let gossip = Gossip::new(
            clock,
            Arc::new(rng),
            config.gossip_delay(),
            std::time::Duration::from_millis(config.gossip_jitter_ms),
        );
        Self {
            gossip: Arc::new(gossip),
            nonce_base: DEFAULT_NONCE_BASE,
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// Network using the simulation and nonce sections of `config`
    pub fn from_config(clock: Arc<dyn Clock>, config: &HarnessConfig) -> Self {
        Self::new(clock, &config.simulation).with_nonce_base(config.nonce.base)
    }

    /// First nonce every node expects per account
    pub fn with_nonce_base(mut self, base: u64) -> Self {
        self.nonce_base = base;
        self
    }

    /// Seed driving gossip jitter
    pub fn seed(&self) -> u64 {
        self.gossip.seed()
    }

    /// Running and stopped nodes, in index order
    pub fn nodes(&self) -> Vec<Arc<SimulatedNode>> {
        self.nodes.lock().clone()
    }

    /// Node by name
    pub fn node(&self, name: &str) -> Option<Arc<SimulatedNode>> {
        self.nodes.lock().iter().find(|n| n.name() == name).cloned()
    }
}

#[async_trait]
impl NetworkProvisioner for SimulatedNetwork {
    async fn start(&self, spec: &TopologySpec) -> Result<Vec<NodeHandle>> {
        let edges = spec.edges()?;
        let mut nodes = self.nodes.lock();
        if !nodes.is_empty() {
            bail!("simulated network already runs {} node(s)", nodes.len());
        }

        *nodes = (0..spec.node_count)
            .map(|index| Arc::new(SimulatedNode::new(index, self.nonce_base, self.gossip.clone())))
            .collect();
        for &(a, b) in &edges {
            nodes[a].add_peer(&nodes[b]);
            nodes[b].add_peer(&nodes[a]);
        }

        if log::log_enabled!(log::Level::Info) {
            log::info!(
                "Started {} simulated node(s), {} link(s), gossip seed 0x{:016x}",
                nodes.len(),
                edges.len(),
                self.gossip.seed()
            );
        }
        Ok(nodes.iter().map(|n| n.clone() as NodeHandle).collect())
    }

    async fn stop(&self, node: &NodeHandle) -> Result<()> {
        let target = self
            .node(node.name())
            .ok_or_else(|| anyhow!("{} is not part of this network", node.name()))?;
        target.stop();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Stopped {}", node.name());
        }
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        self.gossip.abort_all();
        for node in self.nodes.lock().drain(..) {
            node.stop();
        }
        Ok(())
    }
}

impl Drop for SimulatedNetwork {
    fn drop(&mut self) {
        self.gossip.abort_all();
    }
}
