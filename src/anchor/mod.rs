/// Ledger anchoring for tamper-evident document fingerprints.
///
/// A document hash is registered once on an external ledger (an EVM smart
/// contract) and can later be looked up to prove it existed at a given time
/// and who registered it. The ledger is the sole arbiter of "first writer
/// wins": a duplicate registration comes back as `Rejected` and is final.
///
/// Every registration is signed by this process's own identity, not by the
/// uploading user.
pub mod ethereum;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::DocumentHash;
use crate::error::Result;

/// Receipt returned after a registration is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    /// Transaction reference (0x-prefixed transaction hash).
    pub tx_ref: String,
    /// Block that included the transaction (None if not observed).
    pub block_number: Option<u64>,
    /// Registration time reported by the contract event, in Unix seconds.
    pub registered_at: Option<u64>,
}

/// What the ledger knows about a hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub exists: bool,
    /// Registering identity; None when the hash is unknown.
    pub owner: Option<String>,
    /// Registration time in Unix seconds; None when the hash is unknown.
    pub timestamp: Option<u64>,
}

impl LedgerRecord {
    pub fn absent() -> Self {
        Self {
            exists: false,
            owner: None,
            timestamp: None,
        }
    }
}

/// Client side of the anchoring contract.
///
/// `register` suspends until the transaction is finalized, which can take
/// many seconds. `verify` is read-only. An unregistered hash is a normal
/// `Ok(LedgerRecord { exists: false, .. })`, never an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Address of the identity that signs registrations, if configured.
    fn registrant(&self) -> Option<String>;

    async fn register(&self, hash: &DocumentHash) -> Result<LedgerReceipt>;

    async fn verify(&self, hash: &DocumentHash) -> Result<LedgerRecord>;

    /// Hashes the contract lists as registered by `owner`.
    async fn documents_of(&self, owner: &str) -> Result<Vec<DocumentHash>>;
}
