//! Harness configuration.
//!
//! Loaded from YAML, with every section optional:
//!
//! ```yaml
//! retry:
//!   max_attempts: 5
//!   retry_delay_ms: 3000
//! convergence:
//!   poll_interval_ms: 1000
//!   timeout_ms: 30000
//!   depth: 100
//! nonce:
//!   base: 1
//! orchestrator:
//!   failure_policy: stop_worker
//!   start_lead_ms: 1000
//! simulation:
//!   gossip_delay_ms: 200
//!   gossip_jitter_ms: 100
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::nonce::DEFAULT_NONCE_BASE;
use crate::retry::RetryPolicy;

/// Bounded-retry settings for deploy and propose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 3_000,
        }
    }
}

impl RetryConfig {
    /// Runtime policy
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

/// Convergence polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Delay between unsuccessful checks of one node
    pub poll_interval_ms: u64,
    /// Default wait before declaring a convergence failure
    pub timeout_ms: u64,
    /// Depth passed to show-blocks on each poll
    pub depth: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            timeout_ms: 30_000,
            depth: 100,
        }
    }
}

impl ConvergenceConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Nonce allocation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonceConfig {
    /// First nonce handed out per account
    pub base: u64,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_NONCE_BASE,
        }
    }
}

/// What a worker does after a deploy fails past retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and end the worker
    #[default]
    StopWorker,
    /// Record the failure and carry on with the next deploy
    Continue,
}

/// Worker orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Per-worker failure handling
    pub failure_policy: FailurePolicy,
    /// Lead time before a synchronized start
    pub start_lead_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::StopWorker,
            start_lead_ms: 1_000,
        }
    }
}

impl OrchestratorConfig {
    /// Lead time as a duration
    pub fn start_lead(&self) -> Duration {
        Duration::from_millis(self.start_lead_ms)
    }
}

/// In-process network settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Base latency of one gossip hop
    pub gossip_delay_ms: u64,
    /// Uniform jitter added to each hop
    pub gossip_jitter_ms: u64,
    /// Fixed RNG seed (random when absent)
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            gossip_delay_ms: 200,
            gossip_jitter_ms: 100,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Base hop latency as a duration
    pub fn gossip_delay(&self) -> Duration {
        Duration::from_millis(self.gossip_delay_ms)
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Retry settings
    pub retry: RetryConfig,
    /// Convergence settings
    pub convergence: ConvergenceConfig,
    /// Nonce settings
    pub nonce: NonceConfig,
    /// Orchestrator settings
    pub orchestrator: OrchestratorConfig,
    /// Simulated network settings
    pub simulation: SimulationConfig,
}

impl HarnessConfig {
    /// Parse and validate YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: HarnessConfig =
            serde_yaml::from_str(yaml).context("Failed to parse harness config YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read harness config {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Invalid harness config {}", path.display()))
    }

    /// Reject settings that would make polling meaningless
    pub fn validate(&self) -> Result<()> {
        if self.convergence.poll_interval_ms == 0 {
            bail!("convergence.poll_interval_ms must be greater than zero");
        }
        if self.convergence.timeout_ms < self.convergence.poll_interval_ms {
            bail!(
                "convergence.timeout_ms ({}) is shorter than poll_interval_ms ({})",
                self.convergence.timeout_ms,
                self.convergence.poll_interval_ms
            );
        }
        if self.convergence.depth == 0 {
            bail!("convergence.depth must be greater than zero");
        }
        Ok(())
    }

    /// Set the retry policy
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.retry = RetryConfig {
            max_attempts,
            retry_delay_ms: retry_delay.as_millis() as u64,
        };
        self
    }

    /// Set convergence polling
    pub fn with_convergence(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.convergence.poll_interval_ms = poll_interval.as_millis() as u64;
        self.convergence.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-worker failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.orchestrator.failure_policy = policy;
        self
    }

    /// Set simulated gossip latency
    pub fn with_gossip(mut self, delay: Duration, jitter: Duration) -> Self {
        self.simulation.gossip_delay_ms = delay.as_millis() as u64;
        self.simulation.gossip_jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Fix the simulation seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.simulation.seed = Some(seed);
        self
    }
}
