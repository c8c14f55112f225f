use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use mediledger::anchor::ethereum::EthereumLedger;
use mediledger::anchor::{Ledger, LedgerReceipt, LedgerRecord};
use mediledger::config::LedgerConfig;
use mediledger::crypto::hash::DocumentHash;
use mediledger::error::{MediError, Result};
use mediledger::ocr::OcrClient;
use mediledger::server::{auth, build_app, AppState};
use mediledger::state::MemoryDocumentStore;

const SECRET: &str = "test-secret";
const REGISTRANT: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

/// In-memory ledger with first-writer-wins semantics.
#[derive(Default)]
struct StubLedger {
    registered: Mutex<HashMap<DocumentHash, u64>>,
    verify_calls: AtomicUsize,
}

#[async_trait]
impl Ledger for StubLedger {
    fn registrant(&self) -> Option<String> {
        Some(REGISTRANT.to_string())
    }

    async fn register(&self, hash: &DocumentHash) -> Result<LedgerReceipt> {
        let mut registered = self.registered.lock().unwrap();
        if registered.contains_key(hash) {
            return Err(MediError::Rejected("Document already registered".into()));
        }
        registered.insert(*hash, 1_704_067_200);
        Ok(LedgerReceipt {
            tx_ref: format!("0x{}", &hash.to_string()[..16]),
            block_number: Some(registered.len() as u64),
            registered_at: Some(1_704_067_200),
        })
    }

    async fn verify(&self, hash: &DocumentHash) -> Result<LedgerRecord> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.registered.lock().unwrap().get(hash) {
            Some(ts) => LedgerRecord {
                exists: true,
                owner: Some(REGISTRANT.to_string()),
                timestamp: Some(*ts),
            },
            None => LedgerRecord::absent(),
        })
    }

    async fn documents_of(&self, owner: &str) -> Result<Vec<DocumentHash>> {
        if !owner.eq_ignore_ascii_case(REGISTRANT) {
            return Ok(Vec::new());
        }
        Ok(self.registered.lock().unwrap().keys().copied().collect())
    }
}

fn app_with(ledger: Arc<dyn Ledger>) -> Router {
    let store = Arc::new(MemoryDocumentStore::new());
    let state = AppState::new(store, ledger, OcrClient::new("http://127.0.0.1:1"), SECRET);
    build_app(state, None).unwrap()
}

fn token(user: Uuid) -> String {
    auth::issue_token(user, SECRET).unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
    }
    let body = match body {
        Some(v) => {
            req = req.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create(app: &Router, user: Uuid) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/documents",
        Some(user),
        Some(json!({
            "title": "Blood Test",
            "documentType": "lab-report",
            "ocrText": "Glucose 95",
            "date": "2024-01-01",
            "doctorName": "Smith",
            "hospitalName": "General",
            "notes": "fasting"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["document"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app_with(Arc::new(StubLedger::default()));
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_document_routes_require_token() {
    let app = app_with(Arc::new(StubLedger::default()));
    let (status, body) = send(&app, Method::GET, "/api/documents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_document_crud_and_listing() {
    let app = app_with(Arc::new(StubLedger::default()));
    let user = Uuid::now_v7();
    let id = create(&app, user).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/documents/{id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Blood Test");
    assert_eq!(body["data"]["anchorState"], "unanchored");

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/documents/{id}"),
        Some(user),
        Some(json!({ "notes": "repeat in 3 months" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["notes"], "repeat in 3 months");
    assert_eq!(body["data"]["doctorName"], "Smith");

    let (_, body) = send(&app, Method::GET, "/api/documents?documentType=lab-report", Some(user), None).await;
    assert_eq!(body["total"], 1);
    let (_, body) = send(&app, Method::GET, "/api/documents?documentType=xray", Some(user), None).await;
    assert_eq!(body["total"], 0);

    let (_, body) = send(&app, Method::GET, "/api/documents/timeline", Some(user), None).await;
    assert_eq!(body["documents"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/documents/{id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, Method::GET, &format!("/api/documents/{id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_other_users_document_is_not_found() {
    let app = app_with(Arc::new(StubLedger::default()));
    let id = create(&app, Uuid::now_v7()).await;
    let stranger = Uuid::now_v7();

    let (status, _) = send(&app, Method::GET, &format!("/api/documents/{id}"), Some(stranger), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(stranger),
        Some(json!({ "documentId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_anchor_and_verify_flow() {
    let ledger = Arc::new(StubLedger::default());
    let app = app_with(ledger.clone());
    let user = Uuid::now_v7();
    let id = create(&app, user).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let hash = body["hash"].as_str().unwrap().to_string();
    assert_eq!(hash.len(), 64);
    assert!(body["transactionHash"].as_str().unwrap().starts_with("0x"));
    assert_eq!(body["ledgerTimestamp"], 1_704_067_200);
    assert!(body["anchoredAt"].is_string());

    let (_, body) = send(&app, Method::GET, &format!("/api/blockchain/hash/{id}"), Some(user), None).await;
    assert_eq!(body["hash"], hash.as_str());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/verify",
        Some(user),
        Some(json!({ "documentId": id, "hash": hash })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verified"], true);
    assert_eq!(body["state"], "anchored");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/verify-chain",
        None,
        Some(json!({ "hash": hash })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["verified"], true);
    assert_eq!(body["dbMatched"], true);
    assert_eq!(body["owner"], REGISTRANT);

    let (status, body) = send(&app, Method::GET, &format!("/api/blockchain/contract/{hash}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contract"]["documentId"], id.as_str());
    assert_eq!(body["contract"]["verified"], true);

    let (_, body) = send(&app, Method::GET, &format!("/api/blockchain/documents/{REGISTRANT}"), None, None).await;
    assert_eq!(body["hashes"][0], hash.as_str());
}

#[tokio::test]
async fn test_verify_chain_unknown_hash_skips_ledger() {
    let ledger = Arc::new(StubLedger::default());
    let app = app_with(ledger.clone());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/verify-chain",
        None,
        Some(json!({ "hash": "ab".repeat(32) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["verified"], false);
    assert_eq!(body["dbMatched"], false);
    assert_eq!(ledger.verify_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_duplicate_registration_is_conflict() {
    let app = app_with(Arc::new(StubLedger::default()));
    let user = Uuid::now_v7();
    let first = create(&app, user).await;
    let second = create(&app, user).await;

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": first })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Identical hashable fields give an identical hash.
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": second })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "REJECTED");

    let (_, body) = send(&app, Method::GET, &format!("/api/documents/{second}"), Some(user), None).await;
    assert_eq!(body["data"]["anchorState"], "unanchored");
    assert_eq!(body["data"]["ledgerHash"], Value::Null);
}

#[tokio::test]
async fn test_edit_after_anchoring_is_reported_stale() {
    let app = app_with(Arc::new(StubLedger::default()));
    let user = Uuid::now_v7();
    let id = create(&app, user).await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": id })),
    )
    .await;
    let hash = body["hash"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        Method::PUT,
        &format!("/api/documents/{id}"),
        Some(user),
        Some(json!({ "doctorName": "Jones" })),
    )
    .await;
    assert_eq!(body["data"]["anchorState"], "stale");

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/verify",
        Some(user),
        Some(json!({ "documentId": id, "hash": hash })),
    )
    .await;
    assert_eq!(body["verified"], false);
    assert_eq!(body["storedHash"], hash.as_str());
    assert_ne!(body["hash"], hash.as_str());

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "INCONSISTENT_STATE");
}

#[tokio::test]
async fn test_unconfigured_ledger_is_service_unavailable() {
    let app = app_with(Arc::new(EthereumLedger::new(LedgerConfig::default())));
    let user = Uuid::now_v7();
    let id = create(&app, user).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/register",
        Some(user),
        Some(json!({ "documentId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "NOT_CONFIGURED");

    // Hashing alone never needs the ledger.
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/hash",
        Some(user),
        Some(json!({ "documentId": id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hash"].as_str().unwrap().len(), 64);
}

#[tokio::test]
async fn test_malformed_input_is_bad_request() {
    let app = app_with(Arc::new(StubLedger::default()));
    let user = Uuid::now_v7();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/blockchain/verify-chain",
        None,
        Some(json!({ "hash": "not-a-hash" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "INVALID_INPUT");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/blockchain/hash",
        Some(user),
        Some(json!({ "documentId": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/documents",
        Some(user),
        Some(json!({ "title": "X", "documentType": "selfie" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/documents/123", Some(user), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ocr_status_and_correction() {
    let app = app_with(Arc::new(StubLedger::default()));
    let user = Uuid::now_v7();
    let id = create(&app, user).await;

    let (status, body) = send(&app, Method::GET, &format!("/api/ocr/status/{id}"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["text"], "Glucose 95");

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/ocr/{id}/text"),
        Some(user),
        Some(json!({ "correctedText": "Glucose 96" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ocrText"], "Glucose 96");
}
