//! Value types shared by the orchestration core and node clients.
//!
//! Everything here is plain data: identities, deploy descriptions and the
//! block summaries a node reports back. None of these types own a node or
//! any shared mutable state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default gas limit attached to a deploy when none is given
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// Default gas price attached to a deploy when none is given
pub const DEFAULT_GAS_PRICE: u64 = 1;

/// Public-key-derived account identity (hex encoded).
///
/// Used as the key space for nonce allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an account identity string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque block identifier as reported by a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    /// Wrap a block identifier string
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Borrow the raw identifier string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(10)
            .map(|(idx, _)| idx)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Contract artifacts referenced by a deploy.
///
/// Paths are opaque to the core; the node client decides how to ship them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Session code artifact
    pub session: String,
    /// Payment code artifact (defaults to the session artifact)
    #[serde(default)]
    pub payment: Option<String>,
}

impl Contract {
    /// Contract whose session code also pays for itself
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            payment: None,
        }
    }

    /// Use a separate payment artifact
    pub fn with_payment(mut self, payment: impl Into<String>) -> Self {
        self.payment = Some(payment.into());
        self
    }

    /// Payment artifact actually used
    pub fn payment(&self) -> &str {
        self.payment.as_deref().unwrap_or(&self.session)
    }

    /// A contract without a session artifact cannot be deployed
    pub fn is_malformed(&self) -> bool {
        self.session.trim().is_empty()
    }
}

/// One deploy a worker should submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySpec {
    /// Originating account
    pub account: AccountId,
    /// Contract to deploy
    pub contract: Contract,
    /// Explicit nonce; `None` allocates from the nonce registry
    #[serde(default)]
    pub nonce: Option<u64>,
    /// Gas limit
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Gas price
    #[serde(default = "default_gas_price")]
    pub gas_price: u64,
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_gas_price() -> u64 {
    DEFAULT_GAS_PRICE
}

impl DeploySpec {
    /// Deploy `contract` from `account` with registry-allocated nonce
    pub fn new(account: AccountId, contract: Contract) -> Self {
        Self {
            account,
            contract,
            nonce: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            gas_price: DEFAULT_GAS_PRICE,
        }
    }

    /// Bypass the registry and use this nonce
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Override gas limit and price
    pub fn with_gas(mut self, limit: u64, price: u64) -> Self {
        self.gas_limit = limit;
        self.gas_price = price;
        self
    }

    /// Resolve into the request sent to a node
    pub fn into_request(self, nonce: u64) -> DeployRequest {
        DeployRequest {
            account: self.account,
            contract: self.contract,
            nonce,
            gas_limit: self.gas_limit,
            gas_price: self.gas_price,
        }
    }
}

/// Deploy as submitted to a node, with its nonce resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Originating account
    pub account: AccountId,
    /// Contract to deploy
    pub contract: Contract,
    /// Resolved nonce
    pub nonce: u64,
    /// Gas limit
    pub gas_limit: u64,
    /// Gas price
    pub gas_price: u64,
}

/// Summary of one block as returned by "show blocks".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block identifier
    pub hash: BlockHash,
    /// Number of deploys included in the block
    pub deploy_count: u32,
    /// Rank (DAG layer) of the block
    pub rank: u64,
}

/// Kind of key a state query is rooted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Account address
    Address,
    /// Hash key
    Hash,
    /// Unforgeable reference
    URef,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Address => f.write_str("address"),
            KeyType::Hash => f.write_str("hash"),
            KeyType::URef => f.write_str("uref"),
        }
    }
}

/// Global state lookup at a given block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateQuery {
    /// Block whose post-state is queried
    pub block_hash: BlockHash,
    /// Root key
    pub key: String,
    /// Root key type
    pub key_type: KeyType,
    /// Path below the key (e.g. `counter/count`)
    pub path: String,
}

/// Node-side operation, carried by errors for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Deploy submission
    Deploy {
        /// Originating account
        account: AccountId,
        /// Nonce used
        nonce: u64,
    },
    /// Block proposal
    Propose,
    /// Block listing
    ShowBlocks {
        /// Requested depth
        depth: usize,
    },
    /// Global state lookup
    QueryState {
        /// Queried path
        path: String,
    },
    /// Log retrieval
    Logs,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Deploy { account, nonce } => {
                write!(f, "deploy(account={}, nonce={})", account, nonce)
            }
            Operation::Propose => f.write_str("propose"),
            Operation::ShowBlocks { depth } => write!(f, "show-blocks(depth={})", depth),
            Operation::QueryState { path } => write!(f, "query-state(path={})", path),
            Operation::Logs => f.write_str("logs"),
        }
    }
}
