/// Anchoring orchestrator.
///
/// Coordinates hashing, the ledger client and the document store:
///
/// ```text
/// register:  load ──▶ hash (compute or reuse) ──▶ ledger.register ──▶ persist {hash, tx, verified, at}
/// verify:    store.find_by_hash ──(miss: stop)──▶ ledger.verify ──▶ combined verdict
/// ```
///
/// Per document the lifecycle is `unanchored → anchoring → anchored`, with
/// `anchoring` falling back to `unanchored` on failure. Only the complete
/// anchoring record is ever persisted. Editing hashable fields afterwards
/// makes the document `stale`; that is reported, never silently repaired.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::anchor::{Ledger, LedgerReceipt};
use crate::crypto::hash::DocumentHash;
use crate::error::{MediError, Result};
use crate::state::models::{AnchorRecord, AnchorState, Document};
use crate::state::DocumentStore;

/// Outcome of a successful on-chain registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub document_id: Uuid,
    pub hash: DocumentHash,
    pub tx_ref: String,
    pub block_number: Option<u64>,
    /// When this service persisted the anchor.
    pub anchored_at: DateTime<Utc>,
    /// Registration time recorded by the ledger, in Unix seconds.
    pub ledger_timestamp: Option<u64>,
}

/// Result of comparing a supplied hash with the document's hashes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVerification {
    /// True only if supplied, recomputed and stored hashes all agree.
    pub verified: bool,
    /// Hash of the document's current fields.
    pub hash: DocumentHash,
    pub stored_hash: Option<DocumentHash>,
    pub state: AnchorState,
}

/// Local record match combined with what the ledger reports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub hash: DocumentHash,
    /// A local document carries this hash.
    pub db_matched: bool,
    /// The ledger has a registration for this hash.
    pub verified: bool,
    pub owner: Option<String>,
    pub timestamp: Option<u64>,
    pub document_id: Option<Uuid>,
    pub local_state: Option<AnchorState>,
}

impl ChainVerification {
    fn not_found(hash: DocumentHash) -> Self {
        Self {
            hash,
            db_matched: false,
            verified: false,
            owner: None,
            timestamp: None,
            document_id: None,
            local_state: None,
        }
    }
}

/// The locally stored anchoring record for a hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub hash: DocumentHash,
    pub document_id: Uuid,
    pub transaction_hash: Option<String>,
    pub verified: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub owner: Uuid,
    pub state: AnchorState,
}

pub struct AnchoringOrchestrator {
    store: Arc<dyn DocumentStore>,
    ledger: Arc<dyn Ledger>,
}

impl AnchoringOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, ledger: Arc<dyn Ledger>) -> Self {
        Self { store, ledger }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Load a document, hiding other users' documents as not found.
    async fn load_owned(&self, id: Uuid, owner_id: Uuid) -> Result<Document> {
        match self.store.find_by_id(id).await? {
            Some(doc) if doc.owner_id == owner_id => Ok(doc),
            _ => Err(MediError::NotFound(format!("Document {id}"))),
        }
    }

    /// The stored hash if there is one, otherwise a freshly computed one.
    /// Never persists.
    pub fn ensure_hash(&self, document: &Document) -> DocumentHash {
        document
            .stored_hash()
            .unwrap_or_else(|| document.compute_hash())
    }

    /// Compute and persist a document's hash without touching the ledger.
    ///
    /// An anchored document keeps its anchored hash. A stale one is refused:
    /// overwriting its hash would orphan the ledger registration.
    pub async fn hash_document(&self, id: Uuid, owner_id: Uuid) -> Result<DocumentHash> {
        let doc = self.load_owned(id, owner_id).await?;
        let computed = doc.compute_hash();

        match doc.anchor_state() {
            AnchorState::Anchored => Ok(computed),
            AnchorState::Stale => Err(MediError::InconsistentState(format!(
                "document {id} changed after anchoring; stored hash differs from {computed}"
            ))),
            AnchorState::Unanchored => {
                self.store.record_hash(id, &computed).await?;
                info!(document_id = %id, hash = %computed, "Document hash recorded");
                Ok(computed)
            }
        }
    }

    /// Anchor a document's hash on the ledger and persist the result.
    ///
    /// On any ledger failure the document is left exactly as it was.
    pub async fn register(&self, id: Uuid, owner_id: Uuid) -> Result<Registration> {
        let doc = self.load_owned(id, owner_id).await?;
        let hash = self.ensure_hash(&doc);

        if hash != doc.compute_hash() {
            return Err(MediError::InconsistentState(format!(
                "document {id} changed since its hash {hash} was recorded"
            )));
        }

        info!(document_id = %id, hash = %hash, "Anchoring document");

        let receipt = match self.ledger.register(&hash).await {
            Ok(receipt) => receipt,
            Err(MediError::Unconfirmed { tx_ref }) => self.reconcile_unconfirmed(&hash, tx_ref).await?,
            Err(e) => {
                warn!(document_id = %id, hash = %hash, error = %e, "Anchoring failed");
                return Err(e);
            }
        };

        let record = AnchorRecord {
            hash,
            tx_ref: receipt.tx_ref.clone(),
            verified: true,
            anchored_at: Utc::now(),
        };

        if let Err(e) = self.store.record_anchor(id, &record).await {
            // The ledger already holds the registration; the tx ref is the
            // only local trace left.
            warn!(
                document_id = %id,
                tx_ref = %record.tx_ref,
                error = %e,
                "Anchored on ledger but failed to persist"
            );
            return Err(e);
        }

        info!(document_id = %id, tx_ref = %record.tx_ref, "Document anchored");

        Ok(Registration {
            document_id: id,
            hash,
            tx_ref: receipt.tx_ref,
            block_number: receipt.block_number,
            anchored_at: record.anchored_at,
            ledger_timestamp: receipt.registered_at,
        })
    }

    /// Decide an ambiguous registration by asking the ledger, never by
    /// re-submitting.
    async fn reconcile_unconfirmed(&self, hash: &DocumentHash, tx_ref: String) -> Result<LedgerReceipt> {
        warn!(hash = %hash, tx_ref = %tx_ref, "Registration unconfirmed, querying ledger");

        let record = match self.ledger.verify(hash).await {
            Ok(record) => record,
            Err(e) => {
                warn!(hash = %hash, error = %e, "Could not resolve unconfirmed registration");
                return Err(MediError::Unconfirmed { tx_ref });
            }
        };

        if !record.exists {
            return Err(MediError::Unconfirmed { tx_ref });
        }

        let ours = match (record.owner.as_deref(), self.ledger.registrant()) {
            (Some(owner), Some(me)) => owner.eq_ignore_ascii_case(&me),
            _ => false,
        };

        if ours {
            Ok(LedgerReceipt {
                tx_ref,
                block_number: None,
                registered_at: record.timestamp,
            })
        } else {
            Err(MediError::Rejected(format!(
                "hash already registered by {}",
                record.owner.unwrap_or_else(|| "another identity".into())
            )))
        }
    }

    /// Check a supplied hash against the document's current and stored hashes.
    pub async fn verify_local(&self, id: Uuid, supplied: &str) -> Result<LocalVerification> {
        let supplied: DocumentHash = supplied.parse()?;
        let doc = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| MediError::NotFound(format!("Document {id}")))?;

        let computed = doc.compute_hash();
        let stored = doc.stored_hash();
        let verified = computed == supplied && stored == Some(supplied);

        if !verified {
            info!(
                document_id = %id,
                supplied = %supplied,
                computed = %computed,
                "Local verification mismatch"
            );
        }

        Ok(LocalVerification {
            verified,
            hash: computed,
            stored_hash: stored,
            state: doc.anchor_state(),
        })
    }

    /// Look the hash up locally, then on the ledger.
    ///
    /// Hashes with no local record are answered "not found" without a
    /// ledger call. Ledger failures propagate; they never read as "not
    /// anchored".
    pub async fn verify_on_chain(&self, hash: &str) -> Result<ChainVerification> {
        let hash: DocumentHash = hash.parse()?;

        let Some(doc) = self.store.find_by_hash(&hash).await? else {
            info!(hash = %hash, "No local document for hash, skipping ledger");
            return Ok(ChainVerification::not_found(hash));
        };

        let record = self.ledger.verify(&hash).await?;

        Ok(ChainVerification {
            hash,
            db_matched: true,
            verified: record.exists,
            owner: record.owner,
            timestamp: record.timestamp,
            document_id: Some(doc.id),
            local_state: Some(doc.anchor_state()),
        })
    }

    pub async fn stored_hash(&self, id: Uuid, owner_id: Uuid) -> Result<Option<DocumentHash>> {
        Ok(self.load_owned(id, owner_id).await?.stored_hash())
    }

    pub async fn contract_info(&self, hash: &str) -> Result<ContractInfo> {
        let hash: DocumentHash = hash.parse()?;
        let doc = self
            .store
            .find_by_hash(&hash)
            .await?
            .ok_or_else(|| MediError::NotFound(format!("Anchoring record for {hash}")))?;

        Ok(ContractInfo {
            hash,
            document_id: doc.id,
            transaction_hash: doc.ledger_tx_ref.clone(),
            verified: doc.ledger_verified,
            timestamp: doc.anchored_at,
            owner: doc.owner_id,
            state: doc.anchor_state(),
        })
    }

    /// Hashes the ledger attributes to `owner_address`.
    pub async fn ledger_documents(&self, owner_address: &str) -> Result<Vec<DocumentHash>> {
        self.ledger.documents_of(owner_address).await
    }
}
