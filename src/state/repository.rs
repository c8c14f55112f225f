/// Repository layer: typed PostgreSQL queries for document records.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds.
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;
use super::{Database, DocumentStore};
use crate::crypto::hash::DocumentHash;
use crate::error::{MediError, Result};

/// PostgreSQL-backed document store.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

fn missing(id: Uuid) -> MediError {
    MediError::NotFound(format!("Document {id}"))
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    async fn find_by_hash(&self, hash: &DocumentHash) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE ledger_hash = $1
            ORDER BY anchored_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(hash.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn insert(&self, document: Document) -> Result<Document> {
        let doc = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents
            (id, owner_id, title, document_type, file_name, file_url, file_size, mime_type,
             patient_name, patient_age, patient_gender, doctor_name, hospital_name, date,
             notes, diagnosis, medicines, symptoms, tests, ocr_text, ocr_status, ocr_confidence,
             ledger_hash, ledger_tx_ref, ledger_verified, anchored_at, is_private, tags,
             created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30)
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(document.owner_id)
        .bind(&document.title)
        .bind(document.document_type)
        .bind(&document.file_name)
        .bind(&document.file_url)
        .bind(document.file_size)
        .bind(&document.mime_type)
        .bind(&document.patient_name)
        .bind(&document.patient_age)
        .bind(&document.patient_gender)
        .bind(&document.doctor_name)
        .bind(&document.hospital_name)
        .bind(document.date)
        .bind(&document.notes)
        .bind(&document.diagnosis)
        .bind(&document.medicines)
        .bind(&document.symptoms)
        .bind(&document.tests)
        .bind(&document.ocr_text)
        .bind(document.ocr_status)
        .bind(document.ocr_confidence)
        .bind(&document.ledger_hash)
        .bind(&document.ledger_tx_ref)
        .bind(document.ledger_verified)
        .bind(document.anchored_at)
        .bind(document.is_private)
        .bind(&document.tags)
        .bind(document.created_at)
        .bind(document.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn save(&self, document: &Document) -> Result<Document> {
        sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents
            SET title = $2, document_type = $3, file_name = $4, file_url = $5, file_size = $6,
                mime_type = $7, patient_name = $8, patient_age = $9, patient_gender = $10,
                doctor_name = $11, hospital_name = $12, date = $13, notes = $14, diagnosis = $15,
                medicines = $16, symptoms = $17, tests = $18, ocr_text = $19, ocr_status = $20,
                ocr_confidence = $21, is_private = $22, tags = $23, updated_at = $24
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(&document.title)
        .bind(document.document_type)
        .bind(&document.file_name)
        .bind(&document.file_url)
        .bind(document.file_size)
        .bind(&document.mime_type)
        .bind(&document.patient_name)
        .bind(&document.patient_age)
        .bind(&document.patient_gender)
        .bind(&document.doctor_name)
        .bind(&document.hospital_name)
        .bind(document.date)
        .bind(&document.notes)
        .bind(&document.diagnosis)
        .bind(&document.medicines)
        .bind(&document.symptoms)
        .bind(&document.tests)
        .bind(&document.ocr_text)
        .bind(document.ocr_status)
        .bind(document.ocr_confidence)
        .bind(document.is_private)
        .bind(&document.tags)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| missing(document.id))
    }

    async fn record_hash(&self, id: Uuid, hash: &DocumentHash) -> Result<Document> {
        sqlx::query_as::<_, Document>(
            "UPDATE documents SET ledger_hash = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(hash.to_string())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| missing(id))
    }

    async fn record_anchor(&self, id: Uuid, record: &AnchorRecord) -> Result<Document> {
        sqlx::query_as::<_, Document>(
            r#"
            UPDATE documents
            SET ledger_hash = $2, ledger_tx_ref = $3, ledger_verified = $4,
                anchored_at = $5, updated_at = $6
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(record.hash.to_string())
        .bind(&record.tx_ref)
        .bind(record.verified)
        .bind(record.anchored_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| missing(id))
    }

    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, owner_id: Uuid, filter: &DocumentFilter) -> Result<(Vec<Document>, i64)> {
        let query = format!(
            r#"
            SELECT * FROM documents
            WHERE owner_id = $1 AND ($2::document_type IS NULL OR document_type = $2)
            ORDER BY {}
            LIMIT $3
            "#,
            filter.sort.order_by()
        );

        let docs = sqlx::query_as::<_, Document>(&query)
            .bind(owner_id)
            .bind(filter.document_type)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM documents
            WHERE owner_id = $1 AND ($2::document_type IS NULL OR document_type = $2)
            "#,
        )
        .bind(owner_id)
        .bind(filter.document_type)
        .fetch_one(&self.pool)
        .await?;

        Ok((docs, total))
    }
}
