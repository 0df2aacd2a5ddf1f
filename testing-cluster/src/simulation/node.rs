//! One in-process node: deploy pool, block store and gossip relay.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sha3::{Digest, Keccak256};
use tokio::task::JoinHandle;

use crate::client::NodeClient;
use crate::clock::Clock;
use crate::error::NodeError;
use crate::rng::TestRng;
use crate::types::{
    AccountId, BlockHash, BlockSummary, DeployRequest, KeyType, Operation, StateQuery,
};

/// Log line fragment written when a received block reuses an included nonce
pub const NEGLECTED_INVALID_BLOCK: &str = " for NeglectedInvalidBlock.";

/// Block produced by a simulated node.
#[derive(Debug, Clone)]
pub struct SimulatedBlock {
    /// Keccak-256 digest, hex encoded
    pub hash: BlockHash,
    /// Name of the proposing node
    pub creator: String,
    /// One above the highest rank the creator knew of
    pub rank: u64,
    /// Included deploys
    pub deploys: Vec<DeployRequest>,
    /// Post-state counters, keyed by `<account>/<session>`
    pub state: BTreeMap<String, u64>,
}

impl SimulatedBlock {
    fn summary(&self) -> BlockSummary {
        BlockSummary {
            hash: self.hash.clone(),
            deploy_count: self.deploys.len() as u32,
            rank: self.rank,
        }
    }
}

fn state_key(account: &str, path: &str) -> String {
    format!("{}/{}", account, path)
}

fn block_hash(creator: &str, sequence: u64, rank: u64, deploys: &[DeployRequest]) -> BlockHash {
    let mut hasher = Keccak256::new();
    hasher.update(creator.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(rank.to_le_bytes());
    for deploy in deploys {
        hasher.update(deploy.account.as_str().as_bytes());
        hasher.update(deploy.nonce.to_le_bytes());
        hasher.update(deploy.contract.session.as_bytes());
    }
    BlockHash::new(hex::encode(hasher.finalize()))
}

/// Latency source and task set shared by every node of one network
pub(crate) struct Gossip {
    clock: Arc<dyn Clock>,
    rng: Arc<TestRng>,
    delay: Duration,
    jitter: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gossip {
    pub(crate) fn new(
        clock: Arc<dyn Clock>,
        rng: Arc<TestRng>,
        delay: Duration,
        jitter: Duration,
    ) -> Self {
        Self {
            clock,
            rng,
            delay,
            jitter,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// `delay ± jitter`, never negative
    fn hop_latency(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        let offset = self.rng.gen_range(0..=2 * jitter_ms);
        (self.delay + Duration::from_millis(offset)).saturating_sub(self.jitter)
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(tokio::spawn(task));
    }

    pub(crate) fn abort_all(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct NodeState {
    running: bool,
    sequence: u64,
    max_rank: u64,
    pending: Vec<DeployRequest>,
    blocks: IndexMap<BlockHash, Arc<SimulatedBlock>>,
    rejected: HashSet<BlockHash>,
    included: HashMap<AccountId, BTreeSet<u64>>,
    counters: BTreeMap<String, u64>,
    log: Vec<String>,
}

impl NodeState {
    fn is_included(&self, account: &AccountId, nonce: u64) -> bool {
        self.included
            .get(account)
            .map_or(false, |nonces| nonces.contains(&nonce))
    }

    /// Lowest nonce of `account` this node has not seen in any block
    fn next_expected(&self, account: &AccountId, base: u64) -> u64 {
        let mut next = base;
        if let Some(nonces) = self.included.get(account) {
            while nonces.contains(&next) {
                next += 1;
            }
        }
        next
    }

    fn apply(&mut self, block: Arc<SimulatedBlock>) {
        for deploy in &block.deploys {
            self.included
                .entry(deploy.account.clone())
                .or_default()
                .insert(deploy.nonce);
            *self
                .counters
                .entry(state_key(deploy.account.as_str(), &deploy.contract.session))
                .or_insert(0) += 1;
        }
        self.max_rank = self.max_rank.max(block.rank);
        self.blocks.insert(block.hash.clone(), block);
    }
}

/// In-process node implementing [`NodeClient`].
///
/// A proposal includes, per account, the pending deploys that continue the
/// nonce sequence this node has already seen in blocks. Deploys that would
/// skip a nonce stay pending until the block carrying the missing nonce
/// arrives by gossip, so concurrent deploys from one account on several
/// nodes produce the same propose contention a real cluster does.
pub struct SimulatedNode {
    name: String,
    index: usize,
    nonce_base: u64,
    gossip: Arc<Gossip>,
    peers: Mutex<Vec<Weak<SimulatedNode>>>,
    state: Mutex<NodeState>,
}

impl SimulatedNode {
    pub(crate) fn new(index: usize, nonce_base: u64, gossip: Arc<Gossip>) -> Self {
        Self {
            name: format!("node-{}", index),
            index,
            nonce_base,
            gossip,
            peers: Mutex::new(Vec::new()),
            state: Mutex::new(NodeState {
                running: true,
                ..NodeState::default()
            }),
        }
    }

    /// Position in the network
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the node still answers requests
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of blocks this node knows
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Whether this node has accepted `hash`
    pub fn has_block(&self, hash: &BlockHash) -> bool {
        self.state.lock().blocks.contains_key(hash)
    }

    /// Deploys waiting for a proposal
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Indices of directly connected peers
    pub fn peer_indices(&self) -> Vec<usize> {
        self.peers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|peer| peer.index)
            .collect()
    }

    pub(crate) fn add_peer(&self, peer: &Arc<SimulatedNode>) {
        self.peers.lock().push(Arc::downgrade(peer));
    }

    /// Stop answering; pending deploys are dropped
    pub(crate) fn stop(&self) {
        let mut state = self.state.lock();
        if state.running {
            state.running = false;
            state.pending.clear();
            state.log.push("Node stopped".to_string());
        }
    }

    fn unreachable(&self, operation: Operation) -> NodeError {
        NodeError::hard(operation, &self.name, "node is not running")
    }

    /// Send `block` to every peer except `except`, each after one hop latency
    fn broadcast(&self, block: &Arc<SimulatedBlock>, except: Option<usize>) {
        let peers: Vec<Weak<SimulatedNode>> = self.peers.lock().clone();
        for peer in peers {
            let Some(target) = peer.upgrade() else {
                continue;
            };
            if Some(target.index) == except {
                continue;
            }
            drop(target);

            let latency = self.gossip.hop_latency();
            let clock = self.gossip.clock.clone();
            let block = block.clone();
            let from = self.index;
            let from_name = self.name.clone();
            self.gossip.spawn(async move {
                clock.sleep(latency).await;
                if let Some(target) = peer.upgrade() {
                    target.receive(block, from, &from_name);
                }
            });
        }
    }

    /// Gossip delivery: accept, reject or ignore a block, then relay it
    fn receive(&self, block: Arc<SimulatedBlock>, from: usize, from_name: &str) {
        {
            let mut state = self.state.lock();
            if !state.running
                || state.blocks.contains_key(&block.hash)
                || state.rejected.contains(&block.hash)
            {
                return;
            }

            let conflict = block
                .deploys
                .iter()
                .find(|d| state.is_included(&d.account, d.nonce))
                .map(|d| (d.account.clone(), d.nonce));
            if let Some((account, nonce)) = conflict {
                state.rejected.insert(block.hash.clone());
                state.log.push(format!(
                    "Ignoring block {} from {} reusing nonce {} of {}{}",
                    block.hash.short(),
                    from_name,
                    nonce,
                    account,
                    NEGLECTED_INVALID_BLOCK
                ));
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!(
                        "{} rejected block {} from {}: nonce {} of {} already included",
                        self.name,
                        block.hash.short(),
                        from_name,
                        nonce,
                        account
                    );
                }
                return;
            }

            state.log.push(format!(
                "Received block {} from {} with {} deploy(s)",
                block.hash.short(),
                from_name,
                block.deploys.len()
            ));
            state.apply(block.clone());
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("{} received block {} from {}", self.name, block.hash.short(), from_name);
        }
        self.broadcast(&block, Some(from));
    }
}

#[async_trait]
impl NodeClient for SimulatedNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<(), NodeError> {
        let operation = || Operation::Deploy {
            account: request.account.clone(),
            nonce: request.nonce,
        };
        let mut state = self.state.lock();
        if !state.running {
            return Err(self.unreachable(operation()));
        }
        if request.contract.is_malformed() {
            return Err(NodeError::hard(operation(), &self.name, "missing session contract"));
        }
        let pending_dup = state
            .pending
            .iter()
            .any(|d| d.account == request.account && d.nonce == request.nonce);
        if pending_dup || state.is_included(&request.account, request.nonce) {
            return Err(NodeError::hard(
                operation(),
                &self.name,
                format!("nonce {} already used", request.nonce),
            ));
        }

        state.log.push(format!(
            "Received deploy {} from {} with nonce {}",
            request.contract.session, request.account, request.nonce
        ));
        state.pending.push(request.clone());
        Ok(())
    }

    async fn propose(&self) -> Result<BlockHash, NodeError> {
        let block = {
            let mut state = self.state.lock();
            if !state.running {
                return Err(self.unreachable(Operation::Propose));
            }

            let pending = std::mem::take(&mut state.pending);
            let (stale, mut pending): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|d| state.is_included(&d.account, d.nonce));
            for deploy in stale {
                state.log.push(format!(
                    "Dropping deploy with nonce {} of {}: already included",
                    deploy.nonce, deploy.account
                ));
            }
            if pending.is_empty() {
                return Err(NodeError::contention(
                    Operation::Propose,
                    &self.name,
                    1,
                    "No new deploys.",
                ));
            }

            pending.sort_by(|a, b| (&a.account, a.nonce).cmp(&(&b.account, b.nonce)));
            let mut expected: HashMap<AccountId, u64> = HashMap::new();
            let mut selected = Vec::new();
            let mut waiting = Vec::new();
            for deploy in pending {
                let next = expected
                    .entry(deploy.account.clone())
                    .or_insert_with(|| state.next_expected(&deploy.account, self.nonce_base));
                if deploy.nonce == *next {
                    *next += 1;
                    selected.push(deploy);
                } else {
                    waiting.push(deploy);
                }
            }

            if selected.is_empty() {
                let output = format!(
                    "{} pending deploy(s) wait for earlier nonces (next expected {})",
                    waiting.len(),
                    waiting
                        .first()
                        .map(|d| state.next_expected(&d.account, self.nonce_base))
                        .unwrap_or(self.nonce_base)
                );
                state.pending = waiting;
                return Err(NodeError::contention(Operation::Propose, &self.name, 1, output));
            }

            state.sequence += 1;
            let rank = state.max_rank + 1;
            let mut snapshot = state.counters.clone();
            for deploy in &selected {
                *snapshot
                    .entry(state_key(deploy.account.as_str(), &deploy.contract.session))
                    .or_insert(0) += 1;
            }
            let block = Arc::new(SimulatedBlock {
                hash: block_hash(&self.name, state.sequence, rank, &selected),
                creator: self.name.clone(),
                rank,
                deploys: selected,
                state: snapshot,
            });

            state.log.push(format!(
                "Proposed block {} at rank {} with {} deploy(s)",
                block.hash.short(),
                rank,
                block.deploys.len()
            ));
            state.pending = waiting;
            state.apply(block.clone());
            block
        };

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "{} proposed block {} with {} deploy(s)",
                self.name,
                block.hash.short(),
                block.deploys.len()
            );
        }
        self.broadcast(&block, None);
        Ok(block.hash.clone())
    }

    async fn show_blocks(&self, depth: usize) -> Result<Vec<BlockSummary>, NodeError> {
        let state = self.state.lock();
        if !state.running {
            return Err(self.unreachable(Operation::ShowBlocks { depth }));
        }
        Ok(state
            .blocks
            .values()
            .rev()
            .take(depth)
            .map(|block| block.summary())
            .collect())
    }

    async fn query_state(&self, query: &StateQuery) -> Result<serde_json::Value, NodeError> {
        let operation = || Operation::QueryState {
            path: query.path.clone(),
        };
        let state = self.state.lock();
        if !state.running {
            return Err(self.unreachable(operation()));
        }
        if query.key_type != KeyType::Address {
            return Err(NodeError::hard(
                operation(),
                &self.name,
                format!("unsupported key type {}", query.key_type),
            ));
        }
        let block = state.blocks.get(&query.block_hash).ok_or_else(|| {
            NodeError::hard(
                operation(),
                &self.name,
                format!("block {} not found", query.block_hash.short()),
            )
        })?;
        block
            .state
            .get(&state_key(&query.key, &query.path))
            .map(|count| serde_json::Value::from(*count))
            .ok_or_else(|| {
                NodeError::hard(
                    operation(),
                    &self.name,
                    format!("no value under {} at {}", query.key, query.path),
                )
            })
    }

    async fn logs(&self) -> Result<String, NodeError> {
        let state = self.state.lock();
        if !state.running {
            return Err(self.unreachable(Operation::Logs));
        }
        Ok(state.log.join("\n"))
    }
}
