/// REST API routes for mediledger.
///
/// JSON bodies use camelCase keys and every response carries `success`.
/// Documents belonging to another user are reported as not found.
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::middleware::{ApiJson, AuthUser};
use super::AppState;
use crate::crypto::hash::{parse_date, DocumentHash};
use crate::error::{MediError, Result};
use crate::ocr::OcrExtraction;
use crate::orchestrator::{ChainVerification, ContractInfo, LocalVerification};
use crate::state::models::{
    AnchorState, Document, DocumentFilter, DocumentSort, DocumentType, OcrStatus,
};

/// Upper bound on `limit` for listings.
const MAX_LIST_LIMIT: i64 = 500;
/// The timeline is a full history, capped to keep responses bounded.
const TIMELINE_LIMIT: i64 = 1000;
/// Largest file accepted by the OCR proxy.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| MediError::InvalidInput(format!("invalid document id `{raw}`")))
}

async fn owned_document(state: &AppState, id: Uuid, user: &AuthUser) -> Result<Document> {
    match state.store.find_by_id(id).await? {
        Some(doc) if doc.owner_id == user.user_id => Ok(doc),
        _ => Err(MediError::NotFound(format!("Document {id}"))),
    }
}

// ─── Health ──────────────────────────────────────────────

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    success: bool,
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Documents ───────────────────────────────────────────

/// Writable document fields. On update, absent fields are left unchanged.
/// The anchoring fields are not writable here.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentInput {
    title: Option<String>,
    document_type: Option<String>,
    file_name: Option<String>,
    file_url: Option<String>,
    file_size: Option<i64>,
    mime_type: Option<String>,
    patient_name: Option<String>,
    patient_age: Option<String>,
    patient_gender: Option<String>,
    doctor_name: Option<String>,
    hospital_name: Option<String>,
    date: Option<String>,
    notes: Option<String>,
    diagnosis: Option<String>,
    medicines: Option<Vec<String>>,
    symptoms: Option<Vec<String>>,
    tests: Option<Vec<String>>,
    ocr_text: Option<String>,
    ocr_confidence: Option<f64>,
    is_private: Option<bool>,
    tags: Option<Vec<String>>,
}

impl DocumentInput {
    fn into_document(mut self, owner_id: Uuid) -> Result<Document> {
        let title = self
            .title
            .take()
            .or_else(|| self.file_name.clone())
            .ok_or_else(|| MediError::InvalidInput("title is required".into()))?;
        let document_type = match self.document_type.take() {
            Some(raw) => raw.parse()?,
            None => DocumentType::Other,
        };

        let mut doc = Document::new(owner_id, "", document_type);
        doc.title = non_blank_title(title)?;
        if self.ocr_text.is_some() {
            doc.ocr_status = OcrStatus::Completed;
        }
        self.apply(&mut doc)?;
        Ok(doc)
    }

    fn apply(self, doc: &mut Document) -> Result<()> {
        if let Some(title) = self.title {
            doc.title = non_blank_title(title)?;
        }
        if let Some(raw) = self.document_type {
            doc.document_type = raw.parse()?;
        }
        if let Some(raw) = self.date {
            doc.date = Some(parse_date(&raw)?);
        }
        if let Some(size) = self.file_size {
            if size < 0 {
                return Err(MediError::InvalidInput("fileSize must not be negative".into()));
            }
            doc.file_size = Some(size);
        }
        if let Some(confidence) = self.ocr_confidence {
            if !(0.0..=100.0).contains(&confidence) {
                return Err(MediError::InvalidInput("ocrConfidence must be within 0..=100".into()));
            }
            doc.ocr_confidence = Some(confidence);
        }
        if let Some(private) = self.is_private {
            doc.is_private = private;
        }

        let text_fields = [
            (self.file_name, &mut doc.file_name),
            (self.file_url, &mut doc.file_url),
            (self.mime_type, &mut doc.mime_type),
            (self.patient_name, &mut doc.patient_name),
            (self.patient_age, &mut doc.patient_age),
            (self.patient_gender, &mut doc.patient_gender),
            (self.doctor_name, &mut doc.doctor_name),
            (self.hospital_name, &mut doc.hospital_name),
            (self.notes, &mut doc.notes),
            (self.diagnosis, &mut doc.diagnosis),
            (self.ocr_text, &mut doc.ocr_text),
        ];
        for (value, slot) in text_fields {
            if value.is_some() {
                *slot = value;
            }
        }

        let list_fields = [
            (self.medicines, &mut doc.medicines),
            (self.symptoms, &mut doc.symptoms),
            (self.tests, &mut doc.tests),
            (self.tags, &mut doc.tags),
        ];
        for (value, slot) in list_fields {
            if let Some(items) = value {
                *slot = items;
            }
        }

        Ok(())
    }
}

fn non_blank_title(title: String) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(MediError::InvalidInput("title must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// A document plus its derived anchoring state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentView {
    #[serde(flatten)]
    document: Document,
    anchor_state: AnchorState,
}

impl From<Document> for DocumentView {
    fn from(document: Document) -> Self {
        let anchor_state = document.anchor_state();
        Self {
            document,
            anchor_state,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreatedResponse {
    success: bool,
    document: DocumentView,
}

#[derive(Debug, Serialize)]
struct DocumentResponse {
    success: bool,
    data: DocumentView,
}

#[derive(Debug, Serialize)]
struct DocumentListResponse {
    success: bool,
    documents: Vec<DocumentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    success: bool,
    message: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    document_type: Option<String>,
    limit: Option<String>,
    sort: Option<String>,
}

impl ListQuery {
    fn document_type(&self) -> Result<Option<DocumentType>> {
        match self.document_type.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some),
        }
    }

    fn into_filter(self) -> Result<DocumentFilter> {
        let mut filter = DocumentFilter {
            document_type: self.document_type()?,
            ..DocumentFilter::default()
        };
        if let Some(sort) = self.sort.as_deref() {
            filter.sort = sort.parse()?;
        }
        if let Some(raw) = self.limit.as_deref() {
            let limit: i64 = raw
                .parse()
                .map_err(|_| MediError::InvalidInput(format!("invalid limit `{raw}`")))?;
            if limit < 1 {
                return Err(MediError::InvalidInput("limit must be positive".into()));
            }
            filter.limit = limit.min(MAX_LIST_LIMIT);
        }
        Ok(filter)
    }
}

/// POST /api/documents
///
/// Create a document record.
async fn create_document(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiJson(input): ApiJson<DocumentInput>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let doc = input.into_document(user.user_id)?;
    let doc = state.store.insert(doc).await?;

    tracing::info!(document_id = %doc.id, document_type = %doc.document_type, "Document created");

    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            success: true,
            document: doc.into(),
        }),
    ))
}

/// GET /api/documents
///
/// List the caller's documents.
async fn list_documents(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>> {
    let filter = query.into_filter()?;
    let (documents, total) = state.store.list(user.user_id, &filter).await?;

    Ok(Json(DocumentListResponse {
        success: true,
        documents: documents.into_iter().map(DocumentView::from).collect(),
        total: Some(total),
    }))
}

/// GET /api/documents/timeline
///
/// The caller's documents, most recent date first.
async fn timeline(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DocumentListResponse>> {
    let filter = DocumentFilter {
        document_type: query.document_type()?,
        sort: DocumentSort::DateDesc,
        limit: TIMELINE_LIMIT,
    };
    let (documents, _) = state.store.list(user.user_id, &filter).await?;

    Ok(Json(DocumentListResponse {
        success: true,
        documents: documents.into_iter().map(DocumentView::from).collect(),
        total: None,
    }))
}

/// GET /api/documents/{id}
async fn get_document(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>> {
    let doc = owned_document(&state, parse_id(&id)?, &user).await?;
    Ok(Json(DocumentResponse {
        success: true,
        data: doc.into(),
    }))
}

/// PUT /api/documents/{id}
///
/// Update fields. Editing hashable fields of an
/// anchored document leaves it stale; nothing is re-hashed.
async fn update_document(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(input): ApiJson<DocumentInput>,
) -> Result<Json<DocumentResponse>> {
    let mut doc = owned_document(&state, parse_id(&id)?, &user).await?;
    input.apply(&mut doc)?;
    let doc = state.store.save(&doc).await?;

    if doc.anchor_state() == AnchorState::Stale {
        tracing::warn!(document_id = %doc.id, "Anchored document edited, stored hash no longer matches");
    }

    Ok(Json(DocumentResponse {
        success: true,
        data: doc.into(),
    }))
}

/// DELETE /api/documents/{id}
async fn delete_document(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>> {
    let id = parse_id(&id)?;
    if !state.store.delete(id, user.user_id).await? {
        return Err(MediError::NotFound(format!("Document {id}")));
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "Document deleted",
    }))
}

pub fn document_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/documents", post(create_document).get(list_documents))
        .route("/api/documents/timeline", get(timeline))
        .route(
            "/api/documents/{id}",
            get(get_document).put(update_document).delete(delete_document),
        )
}

// ─── Blockchain ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRef {
    document_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyLocalRequest {
    document_id: Uuid,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct HashRef {
    hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HashResponse {
    success: bool,
    hash: Option<DocumentHash>,
    document_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    success: bool,
    hash: DocumentHash,
    transaction_hash: String,
    block_number: Option<u64>,
    anchored_at: DateTime<Utc>,
    ledger_timestamp: Option<u64>,
}

#[derive(Debug, Serialize)]
struct Verdict<T> {
    success: bool,
    #[serde(flatten)]
    result: T,
}

#[derive(Debug, Serialize)]
struct ContractResponse {
    success: bool,
    contract: ContractInfo,
}

#[derive(Debug, Serialize)]
struct LedgerDocumentsResponse {
    success: bool,
    owner: String,
    hashes: Vec<DocumentHash>,
}

/// POST /api/blockchain/hash
///
/// Compute and store a document's hash.
async fn hash_document(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DocumentRef>,
) -> Result<Json<HashResponse>> {
    let hash = state
        .orchestrator
        .hash_document(req.document_id, user.user_id)
        .await?;

    Ok(Json(HashResponse {
        success: true,
        hash: Some(hash),
        document_id: req.document_id,
    }))
}

/// POST /api/blockchain/verify
///
/// Compare a hash with the document's hashes.
async fn verify_local(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<VerifyLocalRequest>,
) -> Result<Json<Verdict<LocalVerification>>> {
    let result = state
        .orchestrator
        .verify_local(req.document_id, &req.hash)
        .await?;

    Ok(Json(Verdict {
        success: true,
        result,
    }))
}

/// GET /api/blockchain/hash/{documentId}
async fn get_hash(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<HashResponse>> {
    let document_id = parse_id(&document_id)?;
    let hash = state
        .orchestrator
        .stored_hash(document_id, user.user_id)
        .await?;

    Ok(Json(HashResponse {
        success: true,
        hash,
        document_id,
    }))
}

/// POST /api/blockchain/register
///
/// Anchor a document's hash on the ledger.
async fn register_on_chain(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DocumentRef>,
) -> Result<Json<RegisterResponse>> {
    let registration = state
        .orchestrator
        .register(req.document_id, user.user_id)
        .await?;

    Ok(Json(RegisterResponse {
        success: true,
        hash: registration.hash,
        transaction_hash: registration.tx_ref,
        block_number: registration.block_number,
        anchored_at: registration.anchored_at,
        ledger_timestamp: registration.ledger_timestamp,
    }))
}

/// POST /api/blockchain/verify-chain
///
/// Public check of a hash against the
/// local records and the ledger.
async fn verify_on_chain(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<HashRef>,
) -> Result<Json<Verdict<ChainVerification>>> {
    let result = state.orchestrator.verify_on_chain(&req.hash).await?;

    Ok(Json(Verdict {
        success: true,
        result,
    }))
}

/// GET /api/blockchain/contract/{hash}
///
/// Local anchoring record for a hash.
async fn contract_info(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<ContractResponse>> {
    let contract = state.orchestrator.contract_info(&hash).await?;
    Ok(Json(ContractResponse {
        success: true,
        contract,
    }))
}

/// GET /api/blockchain/documents/{address}
///
/// Hashes the ledger lists for an address.
async fn ledger_documents(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<LedgerDocumentsResponse>> {
    let hashes = state.orchestrator.ledger_documents(&address).await?;
    Ok(Json(LedgerDocumentsResponse {
        success: true,
        owner: address,
        hashes,
    }))
}

pub fn blockchain_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/blockchain/hash", post(hash_document))
        .route("/api/blockchain/verify", post(verify_local))
        .route("/api/blockchain/hash/{document_id}", get(get_hash))
        .route("/api/blockchain/register", post(register_on_chain))
        .route("/api/blockchain/verify-chain", post(verify_on_chain))
        .route("/api/blockchain/contract/{hash}", get(contract_info))
        .route("/api/blockchain/documents/{address}", get(ledger_documents))
}

// ─── OCR ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ExtractResponse {
    success: bool,
    #[serde(flatten)]
    extraction: OcrExtraction,
}

#[derive(Debug, Serialize)]
struct OcrStatusResponse {
    success: bool,
    status: OcrStatus,
    text: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CorrectTextRequest {
    corrected_text: String,
}

/// POST /api/ocr/extract
///
/// Forward an uploaded file to the OCR service.
async fn extract_text(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractResponse>> {
    let mut multipart = multipart.map_err(|e| MediError::InvalidInput(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| MediError::InvalidInput(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| MediError::InvalidInput(e.body_text()))?;

        let extraction = state
            .ocr
            .extract(&file_name, content_type.as_deref(), data.to_vec())
            .await?;

        return Ok(Json(ExtractResponse {
            success: true,
            extraction,
        }));
    }

    Err(MediError::InvalidInput("No file uploaded".into()))
}

/// GET /api/ocr/status/{documentId}
async fn ocr_status(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> Result<Json<OcrStatusResponse>> {
    let doc = owned_document(&state, parse_id(&document_id)?, &user).await?;
    Ok(Json(OcrStatusResponse {
        success: true,
        status: doc.ocr_status,
        text: doc.ocr_text,
        confidence: doc.ocr_confidence,
    }))
}

/// PUT /api/ocr/{documentId}/text
///
/// Replace OCR text with a corrected version.
async fn correct_text(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
    ApiJson(req): ApiJson<CorrectTextRequest>,
) -> Result<Json<DocumentResponse>> {
    let mut doc = owned_document(&state, parse_id(&document_id)?, &user).await?;
    doc.ocr_text = Some(req.corrected_text);
    doc.ocr_status = OcrStatus::Completed;
    let doc = state.store.save(&doc).await?;

    Ok(Json(DocumentResponse {
        success: true,
        data: doc.into(),
    }))
}

pub fn ocr_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/ocr/extract",
            post(extract_text).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/ocr/status/{document_id}", get(ocr_status))
        .route("/api/ocr/{document_id}/text", put(correct_text))
}
