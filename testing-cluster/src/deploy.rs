//! One deploy-then-propose cycle against a single node.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::client::NodeHandle;
use crate::error::HarnessError;
use crate::nonce::NonceRegistry;
use crate::retry::Retrier;
use crate::types::{BlockHash, DeploySpec};

/// Submits deploys and proposes blocks, absorbing contention.
///
/// Cheap to clone; every worker gets its own copy sharing the same
/// nonce registry.
#[derive(Clone)]
pub struct Deployer {
    registry: Arc<NonceRegistry>,
    retrier: Retrier,
}

impl Deployer {
    /// Deployer allocating nonces from `registry`
    pub fn new(registry: Arc<NonceRegistry>, retrier: Retrier) -> Self {
        Self { registry, retrier }
    }

    /// Same deployer whose retry backoff stops when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.retrier = self.retrier.with_cancellation(cancel);
        self
    }

    /// Shared nonce registry
    pub fn registry(&self) -> &Arc<NonceRegistry> {
        &self.registry
    }

    /// Retry wrapper in use
    pub fn retrier(&self) -> &Retrier {
        &self.retrier
    }

    /// Deploy `spec` on `node`, then propose; returns the proposed block.
    ///
    /// The nonce is resolved once (explicit override or registry) and
    /// reused if the deploy itself has to be retried. With several nodes
    /// deploying from one account the nonces interleave, and only the node
    /// holding the next nonce can propose; the others retry until the
    /// missing block reaches them.
    pub async fn deploy_and_get_block_hash(
        &self,
        node: &NodeHandle,
        spec: DeploySpec,
    ) -> Result<BlockHash, HarnessError> {
        let nonce = match spec.nonce {
            Some(nonce) => nonce,
            None => self.registry.next(&spec.account)?,
        };
        let request = spec.into_request(nonce);

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Deploying {} on {} (account={}, nonce={})",
                request.contract.session,
                node.name(),
                request.account,
                nonce
            );
        }

        self.retrier.run(|| node.deploy(&request)).await?;
        let block_hash = self.retrier.run(|| node.propose()).await?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "{} proposed block {} (account={}, nonce={})",
                node.name(),
                block_hash.short(),
                request.account,
                nonce
            );
        }
        Ok(block_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PausedClock;
    use crate::error::NodeError;
    use crate::retry::RetryPolicy;
    use crate::types::{AccountId, BlockSummary, Contract, DeployRequest, Operation, StateQuery};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records deploys; propose fails with contention `busy_proposals` times
    struct RecordingNode {
        deploys: Mutex<Vec<DeployRequest>>,
        busy_proposals: Mutex<u32>,
    }

    impl RecordingNode {
        fn new(busy_proposals: u32) -> Self {
            Self {
                deploys: Mutex::new(Vec::new()),
                busy_proposals: Mutex::new(busy_proposals),
            }
        }
    }

    #[async_trait]
    impl crate::client::NodeClient for RecordingNode {
        fn name(&self) -> &str {
            "node-0"
        }

        async fn deploy(&self, request: &DeployRequest) -> Result<(), NodeError> {
            if request.contract.is_malformed() {
                return Err(NodeError::hard(
                    Operation::Deploy {
                        account: request.account.clone(),
                        nonce: request.nonce,
                    },
                    "node-0",
                    "missing session contract",
                ));
            }
            self.deploys.lock().push(request.clone());
            Ok(())
        }

        async fn propose(&self) -> Result<BlockHash, NodeError> {
            let mut busy = self.busy_proposals.lock();
            if *busy > 0 {
                *busy -= 1;
                return Err(NodeError::contention(Operation::Propose, "node-0", 1, "busy"));
            }
            Ok(BlockHash::new(format!("block-{}", self.deploys.lock().len())))
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

    fn deployer() -> Deployer {
        Deployer::new(
            Arc::new(NonceRegistry::new()),
            Retrier::new(
                RetryPolicy::new(3, Duration::from_secs(1)),
                Arc::new(PausedClock::attach()),
            ),
        )
    }

    fn spec() -> DeploySpec {
        DeploySpec::new(AccountId::new("genesis"), Contract::new("helloname.wasm"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_nonces_then_propose_retry() {
        let recording = Arc::new(RecordingNode::new(2));
        let node: NodeHandle = recording.clone();
        let deployer = deployer();

        let first = deployer.deploy_and_get_block_hash(&node, spec()).await.unwrap();
        let second = deployer.deploy_and_get_block_hash(&node, spec()).await.unwrap();

        assert_eq!(first, BlockHash::new("block-1"));
        assert_eq!(second, BlockHash::new("block-2"));
        let nonces: Vec<u64> = recording.deploys.lock().iter().map(|d| d.nonce).collect();
        assert_eq!(nonces, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_nonce_bypasses_registry() {
        let recording = Arc::new(RecordingNode::new(0));
        let node: NodeHandle = recording.clone();
        let deployer = deployer();

        deployer
            .deploy_and_get_block_hash(&node, spec().with_nonce(42))
            .await
            .unwrap();

        assert_eq!(recording.deploys.lock()[0].nonce, 42);
        assert_eq!(deployer.registry().last_issued(&AccountId::new("genesis")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_registry_fails_before_deploying() {
        let recording = Arc::new(RecordingNode::new(0));
        let node: NodeHandle = recording.clone();
        let deployer = Deployer::new(
            Arc::new(NonceRegistry::with_base(u64::MAX)),
            Retrier::new(RetryPolicy::no_retry(), Arc::new(PausedClock::attach())),
        );

        deployer.deploy_and_get_block_hash(&node, spec()).await.unwrap();
        let err = deployer
            .deploy_and_get_block_hash(&node, spec())
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::NonceExhausted { .. }));
        assert!(err.to_string().contains("genesis"));
        let nonces: Vec<u64> = recording.deploys.lock().iter().map(|d| d.nonce).collect();
        assert_eq!(nonces, vec![u64::MAX]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_deploy_fails_hard_without_propose() {
        let recording = Arc::new(RecordingNode::new(0));
        let node: NodeHandle = recording.clone();

        let bad = DeploySpec::new(AccountId::new("genesis"), Contract::new(""));
        let err = deployer().deploy_and_get_block_hash(&node, bad).await.unwrap_err();

        assert!(matches!(err, HarnessError::Node(NodeError::Hard { .. })));
        assert!(err.to_string().contains("account=genesis"));
        assert!(recording.deploys.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_propose_exhaustion_surfaces_last_contention() {
        let node: NodeHandle = Arc::new(RecordingNode::new(10));

        let err = deployer()
            .deploy_and_get_block_hash(&node, spec())
            .await
            .unwrap_err();

        match err {
            HarnessError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert_eq!(last.operation(), &Operation::Propose);
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }
}
