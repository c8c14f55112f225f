/// In-process document store.
///
/// Used when no `DATABASE_URL` is configured and throughout the tests.
/// Each operation holds the lock for its whole read-modify-write, which
/// gives the same single-record atomicity as one SQL UPDATE.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::*;
use super::DocumentStore;
use crate::crypto::hash::DocumentHash;
use crate::error::{MediError, Result};

#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    documents: Arc<RwLock<HashMap<Uuid, Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(id: Uuid) -> MediError {
    MediError::NotFound(format!("Document {id}"))
}

fn sort_documents(docs: &mut [Document], sort: DocumentSort) {
    match sort {
        DocumentSort::NewestFirst => docs.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        DocumentSort::OldestFirst => docs.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        // Undated documents go last in both directions, like NULLS LAST.
        DocumentSort::DateDesc => docs.sort_by(|a, b| match (a.date, b.date) {
            (Some(x), Some(y)) => y.cmp(&x).then(b.created_at.cmp(&a.created_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.created_at.cmp(&a.created_at),
        }),
        DocumentSort::DateAsc => docs.sort_by(|a, b| match (a.date, b.date) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.created_at.cmp(&b.created_at)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.created_at.cmp(&b.created_at),
        }),
        DocumentSort::TitleAsc => docs.sort_by(|a, b| a.title.cmp(&b.title)),
        DocumentSort::TitleDesc => docs.sort_by(|a, b| b.title.cmp(&a.title)),
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.documents.read().await.get(&id).cloned())
    }

    async fn find_by_hash(&self, hash: &DocumentHash) -> Result<Option<Document>> {
        let needle = hash.to_string();
        let docs = self.documents.read().await;
        Ok(docs
            .values()
            .filter(|d| d.ledger_hash.as_deref() == Some(needle.as_str()))
            .max_by_key(|d| d.anchored_at)
            .cloned())
    }

    async fn insert(&self, document: Document) -> Result<Document> {
        let mut docs = self.documents.write().await;
        if docs.contains_key(&document.id) {
            return Err(MediError::InvalidInput(format!(
                "Document {} already exists",
                document.id
            )));
        }
        docs.insert(document.id, document.clone());
        Ok(document)
    }

    async fn save(&self, document: &Document) -> Result<Document> {
        let mut docs = self.documents.write().await;
        let slot = docs.get_mut(&document.id).ok_or_else(|| missing(document.id))?;
        let mut updated = document.clone();
        updated.owner_id = slot.owner_id;
        updated.created_at = slot.created_at;
        updated.ledger_hash = slot.ledger_hash.clone();
        updated.ledger_tx_ref = slot.ledger_tx_ref.clone();
        updated.ledger_verified = slot.ledger_verified;
        updated.anchored_at = slot.anchored_at;
        updated.updated_at = Utc::now();
        *slot = updated.clone();
        Ok(updated)
    }

    async fn record_hash(&self, id: Uuid, hash: &DocumentHash) -> Result<Document> {
        let mut docs = self.documents.write().await;
        let doc = docs.get_mut(&id).ok_or_else(|| missing(id))?;
        doc.ledger_hash = Some(hash.to_string());
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn record_anchor(&self, id: Uuid, record: &AnchorRecord) -> Result<Document> {
        let mut docs = self.documents.write().await;
        let doc = docs.get_mut(&id).ok_or_else(|| missing(id))?;
        doc.ledger_hash = Some(record.hash.to_string());
        doc.ledger_tx_ref = Some(record.tx_ref.clone());
        doc.ledger_verified = record.verified;
        doc.anchored_at = Some(record.anchored_at);
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let mut docs = self.documents.write().await;
        match docs.get(&id) {
            Some(doc) if doc.owner_id == owner_id => {
                docs.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, owner_id: Uuid, filter: &DocumentFilter) -> Result<(Vec<Document>, i64)> {
        let docs = self.documents.read().await;
        let mut matching: Vec<Document> = docs
            .values()
            .filter(|d| d.owner_id == owner_id)
            .filter(|d| filter.document_type.map_or(true, |t| d.document_type == t))
            .cloned()
            .collect();
        let total = matching.len() as i64;

        sort_documents(&mut matching, filter.sort);
        matching.truncate(filter.limit.max(0) as usize);
        Ok((matching, total))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn doc(owner: Uuid, title: &str, ty: DocumentType, date: Option<(i32, u32, u32)>) -> Document {
        let mut d = Document::new(owner, title, ty);
        d.date = date.and_then(|(y, m, day)| NaiveDate::from_ymd_opt(y, m, day));
        d
    }

    #[tokio::test]
    async fn test_find_by_hash_matches_stored_hash_only() {
        let store = MemoryDocumentStore::new();
        let owner = Uuid::now_v7();
        let d = store
            .insert(doc(owner, "Blood Test", DocumentType::LabReport, None))
            .await
            .unwrap();
        let hash = d.compute_hash();

        assert!(store.find_by_hash(&hash).await.unwrap().is_none());

        store.record_hash(d.id, &hash).await.unwrap();
        let found = store.find_by_hash(&hash).await.unwrap().unwrap();
        assert_eq!(found.id, d.id);
        assert!(!found.ledger_verified);
    }

    #[tokio::test]
    async fn test_record_anchor_writes_all_fields() {
        let store = MemoryDocumentStore::new();
        let d = store
            .insert(doc(Uuid::now_v7(), "MRI", DocumentType::Mri, None))
            .await
            .unwrap();
        let record = AnchorRecord {
            hash: d.compute_hash(),
            tx_ref: "0xfeed".into(),
            verified: true,
            anchored_at: Utc::now(),
        };

        let updated = store.record_anchor(d.id, &record).await.unwrap();
        assert_eq!(updated.ledger_hash, Some(record.hash.to_string()));
        assert_eq!(updated.ledger_tx_ref.as_deref(), Some("0xfeed"));
        assert!(updated.ledger_verified);
        assert_eq!(updated.anchor_state(), AnchorState::Anchored);
    }

    #[tokio::test]
    async fn test_save_keeps_anchoring_fields() {
        let store = MemoryDocumentStore::new();
        let d = store
            .insert(doc(Uuid::now_v7(), "Blood Test", DocumentType::LabReport, None))
            .await
            .unwrap();
        let stale_copy = d.clone();
        store.record_hash(d.id, &d.compute_hash()).await.unwrap();

        let mut edited = stale_copy;
        edited.notes = Some("repeat".into());
        let saved = store.save(&edited).await.unwrap();
        assert_eq!(saved.notes.as_deref(), Some("repeat"));
        assert_eq!(saved.ledger_hash, Some(d.compute_hash().to_string()));
    }

    #[tokio::test]
    async fn test_save_unknown_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let d = doc(Uuid::now_v7(), "Note", DocumentType::DoctorNote, None);
        assert!(matches!(store.save(&d).await, Err(MediError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = MemoryDocumentStore::new();
        let owner = Uuid::now_v7();
        let d = store
            .insert(doc(owner, "Rx", DocumentType::Prescription, None))
            .await
            .unwrap();

        assert!(!store.delete(d.id, Uuid::now_v7()).await.unwrap());
        assert!(store.delete(d.id, owner).await.unwrap());
        assert!(store.find_by_id(d.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_limits() {
        let store = MemoryDocumentStore::new();
        let owner = Uuid::now_v7();
        store.insert(doc(owner, "A", DocumentType::LabReport, Some((2024, 3, 1)))).await.unwrap();
        store.insert(doc(owner, "B", DocumentType::LabReport, None)).await.unwrap();
        store.insert(doc(owner, "C", DocumentType::LabReport, Some((2024, 5, 1)))).await.unwrap();
        store.insert(doc(owner, "D", DocumentType::Xray, Some((2025, 1, 1)))).await.unwrap();
        store.insert(doc(Uuid::now_v7(), "E", DocumentType::LabReport, None)).await.unwrap();

        let filter = DocumentFilter {
            document_type: Some(DocumentType::LabReport),
            sort: DocumentSort::DateDesc,
            limit: 2,
        };
        let (docs, total) = store.list(owner, &filter).await.unwrap();
        assert_eq!(total, 3);
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["C", "A"]);
    }
}
