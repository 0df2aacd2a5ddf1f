// File: testing-cluster/src/orchestrator.rs
//
// Concurrent Deploy Orchestration
//
// One worker task per node. A worker submits its batches strictly in order;
// workers for different nodes race freely. The only state they share is the
// nonce registry inside the Deployer. A worker's failure is reported as that
// worker's result and never stops its siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::NodeHandle;
use crate::clock::Clock;
use crate::config::{FailurePolicy, HarnessConfig};
use crate::deploy::Deployer;
use crate::error::HarnessError;
use crate::nonce::NonceRegistry;
use crate::retry::{Retrier, RetryPolicy};
use crate::types::{BlockHash, DeploySpec};

/// How often a timed worker re-checks the clock while waiting to start
pub const SPIN_INTERVAL: Duration = Duration::from_millis(1);

/// Deploys one worker should submit against one node.
#[derive(Clone)]
pub struct WorkerPlan {
    /// Worker name used in logs and reports
    pub name: String,
    /// Target node
    pub node: NodeHandle,
    /// Batches, processed strictly in order
    pub batches: Vec<Vec<DeploySpec>>,
}

impl WorkerPlan {
    /// Empty plan for `node`
    pub fn new(name: impl Into<String>, node: NodeHandle) -> Self {
        Self {
            name: name.into(),
            node,
            batches: Vec::new(),
        }
    }

    /// Append a batch
    pub fn with_batch(mut self, batch: Vec<DeploySpec>) -> Self {
        self.batches.push(batch);
        self
    }

    /// Total deploys across all batches
    pub fn deploy_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }
}

/// Result of one deploy+propose cycle.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// Batch index within the worker's plan
    pub batch: usize,
    /// Position within the batch
    pub index: usize,
    /// Proposed block or the unrecovered failure
    pub result: Result<BlockHash, HarnessError>,
}

/// Everything one worker did, in submission order.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    /// Worker name
    pub worker: String,
    /// Node the worker drove
    pub node: String,
    /// Attempted deploys in submission order
    pub deploys: Vec<DeployOutcome>,
    /// Set when the worker task itself died (panic, abort)
    pub aborted: Option<HarnessError>,
}

impl WorkerReport {
    /// Block hashes of successful deploys, in submission order
    pub fn block_hashes(&self) -> Vec<BlockHash> {
        self.deploys
            .iter()
            .filter_map(|d| d.result.as_ref().ok().cloned())
            .collect()
    }

    /// First failure: task abort, or the first failed deploy
    pub fn error(&self) -> Option<&HarnessError> {
        self.aborted
            .as_ref()
            .or_else(|| self.deploys.iter().find_map(|d| d.result.as_ref().err()))
    }

    /// Whether every attempted deploy succeeded
    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }
}

/// Reports for every worker, in plan order.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationReport {
    /// Per-worker reports
    pub workers: Vec<WorkerReport>,
}

impl OrchestrationReport {
    /// Successful block hashes of all workers, worker by worker
    pub fn all_block_hashes(&self) -> Vec<BlockHash> {
        self.workers.iter().flat_map(|w| w.block_hashes()).collect()
    }

    /// Distinct successful block hashes, first occurrence order
    pub fn unique_block_hashes(&self) -> IndexSet<BlockHash> {
        self.all_block_hashes().into_iter().collect()
    }

    /// Worker name to its ordered block hashes
    pub fn by_worker(&self) -> IndexMap<String, Vec<BlockHash>> {
        self.workers
            .iter()
            .map(|w| (w.worker.clone(), w.block_hashes()))
            .collect()
    }

    /// Report for the named worker
    pub fn worker(&self, name: &str) -> Option<&WorkerReport> {
        self.workers.iter().find(|w| w.worker == name)
    }

    /// Workers with at least one failure
    pub fn failed_workers(&self) -> Vec<&WorkerReport> {
        self.workers.iter().filter(|w| !w.is_success()).collect()
    }

    /// Whether every worker completed every deploy
    pub fn is_success(&self) -> bool {
        self.workers.iter().all(WorkerReport::is_success)
    }
}

/// Single deploy scheduled for a synchronized start.
#[derive(Clone)]
pub struct TimedJob {
    /// Worker name
    pub name: String,
    /// Target node
    pub node: NodeHandle,
    /// Deploy to submit at the start instant
    pub spec: DeploySpec,
}

impl TimedJob {
    /// Job deploying `spec` on `node`
    pub fn new(name: impl Into<String>, node: NodeHandle, spec: DeploySpec) -> Self {
        Self {
            name: name.into(),
            node,
            spec,
        }
    }
}

/// Outcome of a timed job.
#[derive(Debug, Clone)]
pub struct TimedReport {
    /// Worker name
    pub worker: String,
    /// Node the job ran against
    pub node: String,
    /// Proposed block or failure
    pub result: Result<BlockHash, HarnessError>,
}

/// Waits for a start instant, then runs one injected action exactly once.
///
/// Used to approximate a simultaneous burst across independently scheduled
/// workers. A start instant that has already passed is rejected, both at
/// construction and again when the worker starts running.
pub struct TimedWorker<F> {
    name: String,
    start_at: Instant,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    action: F,
}

impl<F, Fut, T> TimedWorker<F>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    /// Schedule `action` for `start_at`.
    ///
    /// # Errors
    ///
    /// `HarnessError::Scheduling` if `start_at` is not in the future.
    pub fn new(
        name: impl Into<String>,
        start_at: Instant,
        clock: Arc<dyn Clock>,
        action: F,
    ) -> Result<Self, HarnessError> {
        let worker = Self {
            name: name.into(),
            start_at,
            clock,
            cancel: CancellationToken::new(),
            action,
        };
        worker.ensure_in_future()?;
        Ok(worker)
    }

    /// Abort the wait when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Scheduled start
    pub fn start_at(&self) -> Instant {
        self.start_at
    }

    /// Spin until the start instant, then run the action.
    pub async fn run(self) -> Result<T, HarnessError> {
        self.ensure_in_future()?;

        loop {
            let now = self.clock.now();
            if now >= self.start_at {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(HarnessError::Cancelled {
                        operation: format!("timed start of {}", self.name),
                    });
                }
                _ = self.clock.sleep(SPIN_INTERVAL.min(self.start_at - now)) => {}
            }
        }

        (self.action)().await
    }

    fn ensure_in_future(&self) -> Result<(), HarnessError> {
        let now = self.clock.now();
        if self.start_at <= now {
            return Err(HarnessError::Scheduling {
                worker: self.name.clone(),
                late_by: now - self.start_at,
            });
        }
        Ok(())
    }
}

/// Fans deploy work out over one task per node and joins the results.
///
/// # Example
///
/// ```rust,ignore
/// let orchestrator = DeployOrchestrator::from_config(&config, registry, clock.clone());
/// let plans = topology
///     .nodes()
///     .iter()
///     .enumerate()
///     .map(|(i, node)| {
///         WorkerPlan::new(format!("node{}", i + 1), node.clone())
///             .with_batch(vec![spec.clone(), spec.clone()])
///     })
///     .collect();
///
/// let report = orchestrator.run(plans).await;
/// poller
///     .await_hashes(topology.nodes(), &report.all_block_hashes(), timeout)
///     .await?;
/// ```
#[derive(Clone)]
pub struct DeployOrchestrator {
    deployer: Deployer,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
    cancel: CancellationToken,
}

impl DeployOrchestrator {
    /// Orchestrator sharing `registry` across its workers
    pub fn new(registry: Arc<NonceRegistry>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let retrier = Retrier::new(retry, clock.clone());
        Self {
            deployer: Deployer::new(registry, retrier),
            clock,
            failure_policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Orchestrator configured from the retry and orchestrator sections
    pub fn from_config(
        config: &HarnessConfig,
        registry: Arc<NonceRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(registry, config.retry.policy(), clock)
            .with_failure_policy(config.orchestrator.failure_policy)
    }

    /// What a worker does after an unrecovered failure
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Propagate `cancel` into every worker and retry backoff
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.deployer = self.deployer.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Deployer shared by the workers
    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// Instant `lead` from now, for `run_simultaneous`
    pub fn start_in(&self, lead: Duration) -> Instant {
        self.clock.now() + lead
    }

    /// Run every plan on its own task and wait for all of them.
    ///
    /// Never fails as a whole: each worker's outcome is in its report.
    pub async fn run(&self, plans: Vec<WorkerPlan>) -> OrchestrationReport {
        if log::log_enabled!(log::Level::Info) {
            let total: usize = plans.iter().map(WorkerPlan::deploy_count).sum();
            log::info!("Starting {} worker(s), {} deploy(s) in total", plans.len(), total);
        }

        let handles: Vec<(String, String, JoinHandle<WorkerReport>)> = plans
            .into_iter()
            .map(|plan| {
                let name = plan.name.clone();
                let node = plan.node.name().to_string();
                let task = tokio::spawn(run_worker(
                    self.deployer.clone(),
                    self.failure_policy,
                    self.cancel.clone(),
                    plan,
                ));
                (name, node, task)
            })
            .collect();

        let mut workers = Vec::with_capacity(handles.len());
        for (worker, node, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_err) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!("Worker {} on {} died: {}", worker, node, join_err);
                    }
                    WorkerReport {
                        aborted: Some(HarnessError::WorkerPanicked {
                            worker: worker.clone(),
                            reason: join_err.to_string(),
                        }),
                        worker,
                        node,
                        deploys: Vec::new(),
                    }
                }
            };
            workers.push(report);
        }

        OrchestrationReport { workers }
    }

    /// Deploy every job once, all starting at `start_at`.
    ///
    /// Every worker is constructed before any is spawned, so a start
    /// instant in the past fails before a single deploy is attempted.
    ///
    /// # Errors
    ///
    /// `HarnessError::Scheduling` if `start_at` has already passed.
    /// Per-job failures are reported in the returned `TimedReport`s.
    pub async fn run_simultaneous(
        &self,
        start_at: Instant,
        jobs: Vec<TimedJob>,
    ) -> Result<Vec<TimedReport>, HarnessError> {
        let mut workers = Vec::with_capacity(jobs.len());
        for job in jobs {
            let deployer = self.deployer.clone();
            let node = job.node.clone();
            let spec = job.spec;
            let worker = TimedWorker::new(job.name.clone(), start_at, self.clock.clone(), move || {
                async move { deployer.deploy_and_get_block_hash(&node, spec).await }
            })?
            .with_cancellation(self.cancel.clone());
            workers.push((job.name, job.node.name().to_string(), worker));
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Scheduled {} simultaneous deploy(s) in {:?}",
                workers.len(),
                start_at.saturating_duration_since(self.clock.now())
            );
        }

        let handles: Vec<_> = workers
            .into_iter()
            .map(|(name, node, worker)| (name, node, tokio::spawn(worker.run())))
            .collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (worker, node, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(HarnessError::WorkerPanicked {
                    worker: worker.clone(),
                    reason: join_err.to_string(),
                }),
            };
            if let Err(err) = &result {
                if log::log_enabled!(log::Level::Warn) {
                    log::warn!("Timed deploy {} on {} failed: {}", worker, node, err);
                }
            }
            reports.push(TimedReport {
                worker,
                node,
                result,
            });
        }
        Ok(reports)
    }
}

async fn run_worker(
    deployer: Deployer,
    failure_policy: FailurePolicy,
    cancel: CancellationToken,
    plan: WorkerPlan,
) -> WorkerReport {
    let WorkerPlan {
        name,
        node,
        batches,
    } = plan;
    let mut deploys = Vec::new();

    'batches: for (batch, specs) in batches.into_iter().enumerate() {
        for (index, spec) in specs.into_iter().enumerate() {
            if cancel.is_cancelled() {
                deploys.push(DeployOutcome {
                    batch,
                    index,
                    result: Err(HarnessError::Cancelled {
                        operation: format!("worker {}", name),
                    }),
                });
                break 'batches;
            }

            let result = deployer.deploy_and_get_block_hash(&node, spec).await;
            let stop = match &result {
                Ok(_) => false,
                Err(HarnessError::Cancelled { .. }) => true,
                Err(err) => {
                    if log::log_enabled!(log::Level::Warn) {
                        log::warn!(
                            "Worker {} deploy {}/{} on {} failed: {}",
                            name,
                            batch,
                            index,
                            node.name(),
                            err
                        );
                    }
                    failure_policy == FailurePolicy::StopWorker
                }
            };
            deploys.push(DeployOutcome {
                batch,
                index,
                result,
            });
            if stop {
                break 'batches;
            }
        }
    }

    let report = WorkerReport {
        worker: name,
        node: node.name().to_string(),
        deploys,
        aborted: None,
    };
    if log::log_enabled!(log::Level::Info) {
        log::info!(
            "Worker {} finished on {}: {} block(s), {}",
            report.worker,
            report.node,
            report.block_hashes().len(),
            if report.is_success() { "ok" } else { "failed" }
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PausedClock;
    use crate::error::NodeError;
    use crate::types::{
        AccountId, BlockSummary, Contract, DeployRequest, Operation, StateQuery,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock node: each propose yields `<name>-<n>`; sessions named
    /// "bad" fail hard and "panic" panic the worker
    struct MockNode {
        name: String,
        latency: Duration,
        proposals: AtomicU32,
        deploys: Mutex<Vec<(String, Instant)>>,
    }

    impl MockNode {
        fn new(name: &str, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                latency,
                proposals: AtomicU32::new(0),
                deploys: Mutex::new(Vec::new()),
            })
        }

        fn sessions(&self) -> Vec<String> {
            self.deploys.lock().iter().map(|(s, _)| s.clone()).collect()
        }
    }

    #[async_trait]
    impl crate::client::NodeClient for MockNode {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deploy(&self, request: &DeployRequest) -> Result<(), NodeError> {
            match request.contract.session.as_str() {
                "bad" => {
                    return Err(NodeError::hard(
                        Operation::Deploy {
                            account: request.account.clone(),
                            nonce: request.nonce,
                        },
                        &self.name,
                        "malformed session",
                    ))
                }
                "panic" => panic!("node crashed"),
                _ => {}
            }
            self.deploys
                .lock()
                .push((request.contract.session.clone(), Instant::now()));
            tokio::time::sleep(self.latency).await;
            Ok(())
        }

        async fn propose(&self) -> Result<BlockHash, NodeError> {
            let n = self.proposals.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BlockHash::new(format!("{}-{}", self.name, n)))
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

    fn orchestrator() -> DeployOrchestrator {
        DeployOrchestrator::new(
            Arc::new(NonceRegistry::new()),
            RetryPolicy::new(2, Duration::from_millis(100)),
            Arc::new(PausedClock::attach()),
        )
    }

    fn deploy(session: &str) -> DeploySpec {
        DeploySpec::new(AccountId::new("genesis"), Contract::new(session))
    }

    fn plan(name: &str, node: &Arc<MockNode>, batches: Vec<Vec<DeploySpec>>) -> WorkerPlan {
        let handle: NodeHandle = node.clone();
        batches
            .into_iter()
            .fold(WorkerPlan::new(name, handle), WorkerPlan::with_batch)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_workers_two_deploys_each() {
        let nodes: Vec<_> = (0..3)
            .map(|i| MockNode::new(&format!("node-{}", i), Duration::from_millis(10)))
            .collect();
        let plans = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| plan(&format!("node{}", i + 1), n, vec![vec![deploy("a"), deploy("b")]]))
            .collect();

        let report = orchestrator().run(plans).await;

        assert!(report.is_success());
        assert_eq!(report.all_block_hashes().len(), 6);
        assert_eq!(report.unique_block_hashes().len(), 6);
        for (i, worker) in report.workers.iter().enumerate() {
            assert_eq!(worker.worker, format!("node{}", i + 1));
            assert_eq!(
                worker.block_hashes(),
                vec![
                    BlockHash::new(format!("node-{}-1", i)),
                    BlockHash::new(format!("node-{}-2", i)),
                ]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonces_are_unique_across_workers() {
        let nodes: Vec<_> = (0..3)
            .map(|i| MockNode::new(&format!("node-{}", i), Duration::from_millis(5)))
            .collect();
        let plans = nodes
            .iter()
            .map(|n| plan(n.name.as_str(), n, vec![vec![deploy("a"); 4]]))
            .collect();

        let orchestrator = orchestrator();
        let report = orchestrator.run(plans).await;

        assert!(report.is_success());
        let registry = orchestrator.deployer().registry();
        assert_eq!(registry.last_issued(&AccountId::new("genesis")), Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_run_in_parallel() {
        let nodes: Vec<_> = (0..3)
            .map(|i| MockNode::new(&format!("node-{}", i), Duration::from_secs(1)))
            .collect();
        let plans = nodes
            .iter()
            .map(|n| plan(n.name.as_str(), n, vec![vec![deploy("a"), deploy("b")]]))
            .collect();

        let start = Instant::now();
        let report = orchestrator().run(plans).await;

        assert!(report.is_success());
        // two sequential deploys per worker, workers overlapping
        assert_eq!(Instant::now() - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_processed_in_order() {
        let node = MockNode::new("node-0", Duration::from_millis(50));
        let plans = vec![plan(
            "node1",
            &node,
            vec![
                vec![deploy("b0-0"), deploy("b0-1")],
                vec![deploy("b1-0")],
                vec![deploy("b2-0"), deploy("b2-1")],
            ],
        )];

        let report = orchestrator().run(plans).await;

        assert!(report.is_success());
        assert_eq!(node.sessions(), vec!["b0-0", "b0-1", "b1-0", "b2-0", "b2-1"]);
        let positions: Vec<(usize, usize)> = report.workers[0]
            .deploys
            .iter()
            .map(|d| (d.batch, d.index))
            .collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (2, 0), (2, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_worker_does_not_stop_siblings() {
        let good_a = MockNode::new("node-0", Duration::from_millis(10));
        let broken = MockNode::new("node-1", Duration::from_millis(10));
        let good_b = MockNode::new("node-2", Duration::from_millis(10));
        let plans = vec![
            plan("node1", &good_a, vec![vec![deploy("a"), deploy("b")]]),
            plan("node2", &broken, vec![vec![deploy("bad"), deploy("b")]]),
            plan("node3", &good_b, vec![vec![deploy("a"), deploy("b")]]),
        ];

        let report = orchestrator().run(plans).await;

        assert!(!report.is_success());
        let failed = report.failed_workers();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].worker, "node2");
        assert_eq!(failed[0].node, "node-1");
        assert_eq!(failed[0].deploys.len(), 1);
        assert!(failed[0].error().unwrap().to_string().contains("malformed session"));

        let unique = report.unique_block_hashes();
        assert_eq!(unique.len(), 4);
        assert!(unique.len() <= 6);
        assert_eq!(report.by_worker()["node2"], Vec::<BlockHash>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_policy_skips_failed_deploy() {
        let node = MockNode::new("node-0", Duration::from_millis(10));
        let plans = vec![plan("node1", &node, vec![vec![deploy("a"), deploy("bad"), deploy("c")]])];

        let report = orchestrator()
            .with_failure_policy(FailurePolicy::Continue)
            .run(plans)
            .await;

        let worker = report.worker("node1").unwrap();
        assert_eq!(worker.deploys.len(), 3);
        assert_eq!(worker.block_hashes().len(), 2);
        assert!(worker.deploys[1].result.is_err());
        assert!(!worker.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_reported() {
        let good = MockNode::new("node-0", Duration::from_millis(10));
        let crashing = MockNode::new("node-1", Duration::from_millis(10));
        let plans = vec![
            plan("node1", &good, vec![vec![deploy("a")]]),
            plan("node2", &crashing, vec![vec![deploy("panic")]]),
        ];

        let report = orchestrator().run(plans).await;

        assert!(report.worker("node1").unwrap().is_success());
        let crashed = report.worker("node2").unwrap();
        assert!(matches!(
            crashed.error(),
            Some(HarnessError::WorkerPanicked { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_orchestrator_stops_workers() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let node = MockNode::new("node-0", Duration::from_millis(10));
        let plans = vec![plan("node1", &node, vec![vec![deploy("a"), deploy("b")]])];

        let report = orchestrator().with_cancellation(cancel).run(plans).await;

        let worker = report.worker("node1").unwrap();
        assert_eq!(worker.deploys.len(), 1);
        assert!(matches!(worker.error(), Some(HarnessError::Cancelled { .. })));
        assert!(node.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_start_in_past_fails_before_any_deploy() {
        let node = MockNode::new("node-0", Duration::from_millis(10));
        let handle: NodeHandle = node.clone();
        let orchestrator = orchestrator();
        let past = Instant::now() - Duration::from_secs(1);

        let err = orchestrator
            .run_simultaneous(past, vec![TimedJob::new("node1", handle, deploy("a"))])
            .await
            .unwrap_err();

        match err {
            HarnessError::Scheduling { worker, late_by } => {
                assert_eq!(worker, "node1");
                assert_eq!(late_by, Duration::from_secs(1));
            }
            other => panic!("expected Scheduling, got {:?}", other),
        }
        assert!(node.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_worker_rejects_current_instant() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::attach());
        let result = TimedWorker::new("w", clock.now(), clock.clone(), || async { Ok(()) });
        assert!(matches!(result, Err(HarnessError::Scheduling { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_worker_cancelled_while_waiting_never_acts() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::attach());
        let cancel = CancellationToken::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let start = clock.now();
        let flag = ran.clone();
        let worker = TimedWorker::new(
            "w",
            start + Duration::from_secs(10),
            clock.clone(),
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap()
        .with_cancellation(cancel.clone());

        let trigger = async {
            clock.sleep(Duration::from_secs(2)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(worker.run(), trigger);

        match result {
            Err(HarnessError::Cancelled { operation }) => {
                assert_eq!(operation, "timed start of w");
            }
            other => panic!("expected Cancelled, got {:?}", other),
        }
        assert!(!ran.load(Ordering::SeqCst));
        // gave up at the cancel, well before the start instant
        assert!(clock.now() - start < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_worker_with_fired_token_never_acts() {
        let clock: Arc<dyn Clock> = Arc::new(PausedClock::attach());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let worker = TimedWorker::new(
            "w",
            clock.now() + Duration::from_secs(1),
            clock.clone(),
            move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
        )
        .unwrap()
        .with_cancellation(cancel);

        assert!(matches!(worker.run().await, Err(HarnessError::Cancelled { .. })));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simultaneous_deploys_start_together() {
        let nodes: Vec<_> = (0..3)
            .map(|i| MockNode::new(&format!("node-{}", i), Duration::from_millis(10)))
            .collect();
        let orchestrator = orchestrator();
        let start_at = orchestrator.start_in(Duration::from_secs(1));
        let jobs = nodes
            .iter()
            .map(|n| {
                let handle: NodeHandle = n.clone();
                TimedJob::new(n.name.clone(), handle, deploy("contract"))
            })
            .collect();

        let reports = orchestrator.run_simultaneous(start_at, jobs).await.unwrap();

        assert_eq!(reports.len(), 3);
        let hashes: HashSet<BlockHash> =
            reports.iter().map(|r| r.result.clone().unwrap()).collect();
        assert_eq!(hashes.len(), 3);
        for node in &nodes {
            let deploys = node.deploys.lock();
            assert_eq!(deploys.len(), 1);
            assert_eq!(deploys[0].1, start_at);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_failures_are_reported_not_raised() {
        let good = MockNode::new("node-0", Duration::from_millis(10));
        let broken = MockNode::new("node-1", Duration::from_millis(10));
        let orchestrator = orchestrator();
        let start_at = orchestrator.start_in(Duration::from_millis(500));
        let good_handle: NodeHandle = good.clone();
        let broken_handle: NodeHandle = broken.clone();

        let reports = orchestrator
            .run_simultaneous(
                start_at,
                vec![
                    TimedJob::new("node1", good_handle, deploy("a")),
                    TimedJob::new("node2", broken_handle, deploy("bad")),
                ],
            )
            .await
            .unwrap();

        assert!(reports[0].result.is_ok());
        assert!(matches!(reports[1].result, Err(HarnessError::Node(_))));
    }
}
