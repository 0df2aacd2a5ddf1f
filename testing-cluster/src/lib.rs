//! # TOS Testing Cluster
//!
//! Orchestration core for multi-node consensus tests: stand up a topology,
//! fire concurrent deploy/propose cycles at its nodes, and verify that every
//! node converges on the produced blocks within bounded time.
//!
//! ## Architecture Overview
//!
//! - **NonceRegistry**: per-account fetch-and-increment nonce allocation
//! - **Retrier**: bounded fixed-delay retry that absorbs contention errors
//! - **DeployOrchestrator**: one worker task per node, sequential batches,
//!   optional synchronized start
//! - **ConvergencePoller**: independent per-node polling until every node
//!   shows every target block
//! - **Topology**: node handles plus their peering graph
//!
//! Node processes themselves sit behind the [`client::NodeClient`] and
//! [`client::NetworkProvisioner`] traits. [`simulation`] provides an
//! in-process implementation of both.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tos_testing_cluster::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_three_nodes_converge() {
//!     let clock: Arc<dyn Clock> = Arc::new(PausedClock::attach());
//!     let config = HarnessConfig::default();
//!     let network = SimulatedNetwork::from_config(clock.clone(), &config);
//!     let topology = Topology::provision(&network, TopologySpec::three_nodes())
//!         .await
//!         .unwrap();
//!
//!     let orchestrator =
//!         DeployOrchestrator::from_config(&config, Arc::new(NonceRegistry::new()), clock.clone());
//!     let poller = ConvergencePoller::from_config(clock, &config.convergence);
//!     // ...
//! }
//! ```
//!
//! ## Design Principles
//!
//! 1. **Deterministic**: every wait goes through an injected Clock
//! 2. **Partial failure**: one worker's error never stops its siblings
//! 3. **Diagnosable**: failures name the operation, node and account
//! 4. **Bounded**: every blocking path observes a deadline or cancellation token

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Node client and provisioner seams
pub mod client;

/// Clock abstraction for deterministic timing
pub mod clock;

pub mod config;

/// Convergence polling across nodes
pub mod convergence;

pub mod deploy;

/// Error taxonomy
pub mod error;

pub mod nonce;

/// Concurrent and timed deploy workers
pub mod orchestrator;

pub mod retry;

/// Seeded randomness for the simulated network
pub mod rng;

/// Reusable multi-node flows
pub mod scenarios;

pub mod simulation;

pub mod topology;

pub mod types;

// Convenient re-exports for common usage
pub mod prelude;

pub use clock::{Clock, PausedClock, SystemClock};
pub use error::{HarnessError, NodeError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
