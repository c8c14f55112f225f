/// Document record store for mediledger.
///
/// The store is a plain persistence service: CRUD by id, listing, and
/// lookup by stored hash. The anchoring orchestrator only relies on atomic
/// single-record updates; no operation spans more than one document.
///
/// Two implementations:
/// - `PgDocumentStore`: PostgreSQL via sqlx (production)
/// - `MemoryDocumentStore`: in-process map (development without a database, tests)
pub mod memory;
pub mod models;
pub mod repository;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto::hash::DocumentHash;
use crate::error::{MediError, Result};
use models::{AnchorRecord, Document, DocumentFilter};

pub use memory::MemoryDocumentStore;
pub use repository::PgDocumentStore;

/// Persistence contract for document records.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>>;

    /// Most recently anchored document whose stored hash equals `hash`.
    async fn find_by_hash(&self, hash: &DocumentHash) -> Result<Option<Document>>;

    async fn insert(&self, document: Document) -> Result<Document>;

    /// Overwrite a record's mutable fields in one atomic update. The
    /// anchoring fields are left alone; only `record_hash` and
    /// `record_anchor` write them. Fails with `NotFound` if the record does
    /// not exist.
    async fn save(&self, document: &Document) -> Result<Document>;

    /// Persist a fingerprint without touching the other anchoring fields.
    async fn record_hash(&self, id: Uuid, hash: &DocumentHash) -> Result<Document>;

    /// Persist all four anchoring fields in one atomic update.
    async fn record_anchor(&self, id: Uuid, record: &AnchorRecord) -> Result<Document>;

    /// Returns whether a record owned by `owner_id` was removed.
    async fn delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool>;

    /// A page of the owner's documents plus the total matching count.
    async fn list(&self, owner_id: Uuid, filter: &DocumentFilter) -> Result<(Vec<Document>, i64)>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| MediError::Io(std::io::Error::other(format!("Migration failed: {e}"))))
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
