//! Fixed-size node sets and their connectivity.
//!
//! Orchestration and convergence code only ever sees `Topology::nodes()`;
//! the connectivity relation is there for tests that assert gossip
//! reaches nodes that are not directly peered.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

use anyhow::Context;

use crate::client::{NetworkProvisioner, NodeHandle};
use crate::error::TopologyError;

/// Network topology defining connectivity between nodes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NetworkTopology {
    /// Exactly one node, no peers
    Single,

    /// All nodes can communicate with all other nodes (default)
    #[default]
    FullMesh,

    /// Nodes form a chain (0-1-2-...-N)
    Line,

    /// Nodes form a ring (0-1-2-...-N-0)
    Ring,

    /// Star topology: all nodes connect through a central hub node
    Star {
        /// Index of the center node that connects to all others
        center: usize,
    },

    /// Custom topology defined by an undirected edge list
    Custom(Vec<(usize, usize)>),
}

impl NetworkTopology {
    /// Variant name used in errors
    pub fn name(&self) -> &'static str {
        match self {
            NetworkTopology::Single => "single",
            NetworkTopology::FullMesh => "full-mesh",
            NetworkTopology::Line => "line",
            NetworkTopology::Ring => "ring",
            NetworkTopology::Star { .. } => "star",
            NetworkTopology::Custom(_) => "custom",
        }
    }

    /// Normalized `(low, high)` edge set for `node_count` nodes
    pub fn edges(&self, node_count: usize) -> Result<BTreeSet<(usize, usize)>, TopologyError> {
        if node_count == 0 {
            return Err(TopologyError::Empty);
        }

        let mut edges = BTreeSet::new();
        match self {
            NetworkTopology::Single => {
                if node_count != 1 {
                    return Err(TopologyError::NodeCount {
                        variant: self.name(),
                        expected: 1,
                        actual: node_count,
                    });
                }
            }
            NetworkTopology::FullMesh => {
                for a in 0..node_count {
                    for b in (a + 1)..node_count {
                        edges.insert((a, b));
                    }
                }
            }
            NetworkTopology::Line => {
                for a in 1..node_count {
                    edges.insert((a - 1, a));
                }
            }
            NetworkTopology::Ring => {
                for a in 1..node_count {
                    edges.insert((a - 1, a));
                }
                if node_count > 2 {
                    edges.insert((0, node_count - 1));
                }
            }
            NetworkTopology::Star { center } => {
                if *center >= node_count {
                    return Err(TopologyError::CenterOutOfRange {
                        center: *center,
                        node_count,
                    });
                }
                for leaf in (0..node_count).filter(|n| n != center) {
                    edges.insert(normalize(*center, leaf));
                }
            }
            NetworkTopology::Custom(list) => {
                for &(from, to) in list {
                    if from >= node_count || to >= node_count {
                        return Err(TopologyError::EdgeOutOfRange {
                            from,
                            to,
                            node_count,
                        });
                    }
                    if from == to {
                        return Err(TopologyError::SelfLoop(from));
                    }
                    edges.insert(normalize(from, to));
                }
            }
        }
        Ok(edges)
    }
}

fn normalize(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// What to ask a provisioner for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySpec {
    /// Number of nodes to start
    pub node_count: usize,
    /// How they are peered
    pub kind: NetworkTopology,
}

impl TopologySpec {
    /// Arbitrary node count and connectivity
    pub fn new(node_count: usize, kind: NetworkTopology) -> Self {
        Self { node_count, kind }
    }

    /// One isolated node
    pub fn one_node() -> Self {
        Self::new(1, NetworkTopology::Single)
    }

    /// Two peered nodes
    pub fn two_nodes() -> Self {
        Self::new(2, NetworkTopology::FullMesh)
    }

    /// Three fully peered nodes (bootstrap plus two)
    pub fn three_nodes() -> Self {
        Self::new(3, NetworkTopology::FullMesh)
    }

    /// Hub 0 with `leaves` leaf nodes; leaves reach each other only via the hub
    pub fn star(leaves: usize) -> Self {
        Self::new(leaves + 1, NetworkTopology::Star { center: 0 })
    }

    /// Validated edge set
    pub fn edges(&self) -> Result<BTreeSet<(usize, usize)>, TopologyError> {
        self.kind.edges(self.node_count)
    }
}

/// Node handles for one scenario plus their connectivity.
///
/// Immutable once built; lifecycle stays with the provisioner.
pub struct Topology {
    kind: NetworkTopology,
    nodes: Vec<NodeHandle>,
    edges: BTreeSet<(usize, usize)>,
    adjacency: Vec<Vec<usize>>,
}

impl Topology {
    /// Wrap already-running nodes
    pub fn new(kind: NetworkTopology, nodes: Vec<NodeHandle>) -> Result<Self, TopologyError> {
        let edges = kind.edges(nodes.len())?;
        let mut adjacency = vec![Vec::new(); nodes.len()];
        for &(a, b) in &edges {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
        for peers in &mut adjacency {
            peers.sort_unstable();
        }
        Ok(Self {
            kind,
            nodes,
            edges,
            adjacency,
        })
    }

    /// Start nodes through `provisioner` and wrap them
    pub async fn provision(
        provisioner: &dyn NetworkProvisioner,
        spec: TopologySpec,
    ) -> anyhow::Result<Self> {
        spec.edges()?;
        let nodes = provisioner
            .start(&spec)
            .await
            .with_context(|| format!("Failed to start {} node(s)", spec.node_count))?;

        if nodes.len() != spec.node_count {
            return Err(TopologyError::ProvisionMismatch {
                expected: spec.node_count,
                actual: nodes.len(),
            }
            .into());
        }

        let topology = Self::new(spec.kind, nodes)?;
        if log::log_enabled!(log::Level::Info) {
            log::info!("Provisioned {:?}", topology);
        }
        Ok(topology)
    }

    /// Stop every node, then release transient resources
    pub async fn teardown(self, provisioner: &dyn NetworkProvisioner) -> anyhow::Result<()> {
        for node in &self.nodes {
            provisioner
                .stop(node)
                .await
                .with_context(|| format!("Failed to stop {}", node.name()))?;
        }
        provisioner.teardown().await
    }

    /// Node handles in index order
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Node by index
    ///
    /// # Panics
    ///
    /// Panics if index is out of bounds
    pub fn node(&self, index: usize) -> &NodeHandle {
        &self.nodes[index]
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a constructed topology
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Connectivity variant
    pub fn kind(&self) -> &NetworkTopology {
        &self.kind
    }

    /// Normalized undirected edges
    pub fn edges(&self) -> &BTreeSet<(usize, usize)> {
        &self.edges
    }

    /// Direct peers of `index`, sorted
    pub fn peers(&self, index: usize) -> &[usize] {
        self.adjacency
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether `a` and `b` gossip directly
    pub fn is_connected(&self, a: usize, b: usize) -> bool {
        self.edges.contains(&normalize(a, b))
    }

    /// Gossip hops from `from` to `to` (BFS), `None` if unreachable
    pub fn hops(&self, from: usize, to: usize) -> Option<usize> {
        if from >= self.len() || to >= self.len() {
            return None;
        }
        self.distances_from(from)[to]
    }

    /// Longest shortest path, `None` if some pair is unreachable
    pub fn max_hops(&self) -> Option<usize> {
        let mut max = 0;
        for from in 0..self.len() {
            for distance in self.distances_from(from) {
                max = max.max(distance?);
            }
        }
        Some(max)
    }

    /// Whether every node can eventually hear from every other
    pub fn is_connected_graph(&self) -> bool {
        self.max_hops().is_some()
    }

    /// Scale a per-hop timeout by the topology's diameter
    pub fn gossip_timeout(&self, per_hop: Duration) -> Duration {
        let hops = self.max_hops().unwrap_or(self.len()).max(1);
        per_hop.saturating_mul(hops as u32)
    }

    fn distances_from(&self, from: usize) -> Vec<Option<usize>> {
        let mut distances = vec![None; self.len()];
        let mut queue = VecDeque::new();
        distances[from] = Some(0);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let next = distances[current].unwrap_or(0) + 1;
            for &peer in &self.adjacency[current] {
                if distances[peer].is_none() {
                    distances[peer] = Some(next);
                    queue.push_back(peer);
                }
            }
        }
        distances
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name()).collect();
        f.debug_struct("Topology")
            .field("kind", &self.kind)
            .field("nodes", &names)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use crate::types::{BlockHash, BlockSummary, DeployRequest, Operation, StateQuery};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NamedNode(String);

    #[async_trait]
    impl crate::client::NodeClient for NamedNode {
        fn name(&self) -> &str {
            &self.0
        }

        async fn deploy(&self, _request: &DeployRequest) -> Result<(), NodeError> {
            Ok(())
        }

        async fn propose(&self) -> Result<BlockHash, NodeError> {
            Err(NodeError::hard(Operation::Propose, &self.0, "unsupported"))
        }

        async fn show_blocks(&self, _depth: usize) -> Result<Vec<BlockSummary>, NodeError> {
            Ok(Vec::new())
        }

        async fn query_state(&self, _query: &StateQuery) -> Result<serde_json::Value, NodeError> {
            Ok(serde_json::Value::Null)
        }

        async fn logs(&self) -> Result<String, NodeError> {
            Ok(String::new())
        }
    }

    fn nodes(count: usize) -> Vec<NodeHandle> {
        (0..count)
            .map(|i| Arc::new(NamedNode(format!("node-{}", i))) as NodeHandle)
            .collect()
    }

    #[test]
    fn test_full_mesh_edges() {
        let edges = NetworkTopology::FullMesh.edges(3).unwrap();
        assert_eq!(edges.into_iter().collect::<Vec<_>>(), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_single_requires_one_node() {
        assert!(NetworkTopology::Single.edges(1).unwrap().is_empty());
        assert_eq!(
            NetworkTopology::Single.edges(2),
            Err(TopologyError::NodeCount {
                variant: "single",
                expected: 1,
                actual: 2
            })
        );
        assert_eq!(NetworkTopology::FullMesh.edges(0), Err(TopologyError::Empty));
    }

    #[test]
    fn test_custom_edge_validation() {
        let out_of_range = NetworkTopology::Custom(vec![(0, 5)]);
        assert!(matches!(
            out_of_range.edges(3),
            Err(TopologyError::EdgeOutOfRange { from: 0, to: 5, .. })
        ));

        let self_loop = NetworkTopology::Custom(vec![(1, 1)]);
        assert_eq!(self_loop.edges(3), Err(TopologyError::SelfLoop(1)));

        let star_bad = NetworkTopology::Star { center: 4 };
        assert!(matches!(
            star_bad.edges(4),
            Err(TopologyError::CenterOutOfRange { center: 4, .. })
        ));
    }

    #[test]
    fn test_star_leaves_reach_each_other_through_hub() {
        let spec = TopologySpec::star(3);
        let topology = Topology::new(spec.kind, nodes(spec.node_count)).unwrap();

        assert_eq!(topology.len(), 4);
        assert_eq!(topology.peers(0), &[1, 2, 3]);
        assert_eq!(topology.peers(2), &[0]);
        assert!(topology.is_connected(3, 0));
        assert!(!topology.is_connected(1, 2));
        assert_eq!(topology.hops(1, 2), Some(2));
        assert_eq!(topology.max_hops(), Some(2));
        assert_eq!(
            topology.gossip_timeout(Duration::from_secs(10)),
            Duration::from_secs(20)
        );
    }

    #[test]
    fn test_line_and_ring_diameter() {
        let line = Topology::new(NetworkTopology::Line, nodes(5)).unwrap();
        assert_eq!(line.max_hops(), Some(4));

        let ring = Topology::new(NetworkTopology::Ring, nodes(5)).unwrap();
        assert_eq!(ring.max_hops(), Some(2));
        assert!(ring.is_connected(0, 4));
    }

    #[test]
    fn test_disconnected_custom_graph() {
        let topology =
            Topology::new(NetworkTopology::Custom(vec![(0, 1)]), nodes(3)).unwrap();
        assert_eq!(topology.hops(0, 2), None);
        assert!(!topology.is_connected_graph());
        // falls back to node count
        assert_eq!(
            topology.gossip_timeout(Duration::from_secs(1)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_debug_lists_node_names() {
        let topology = Topology::new(NetworkTopology::Single, nodes(1)).unwrap();
        let debug = format!("{:?}", topology);
        assert!(debug.contains("node-0"));
        assert!(debug.contains("Single"));
    }
}
