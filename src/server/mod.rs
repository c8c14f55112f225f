/// HTTP API for mediledger.
///
/// A routing layer over the document store and the anchoring orchestrator:
/// - Document record CRUD, listing and timeline
/// - Hashing, anchoring and verification of document fingerprints
/// - A proxy to the external OCR service
///
/// Callers authenticate with a bearer token issued elsewhere; only public
/// verification routes work without one.
pub mod auth;
pub mod error;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::anchor::Ledger;
use crate::error::{MediError, Result};
use crate::ocr::OcrClient;
use crate::orchestrator::AnchoringOrchestrator;
use crate::state::DocumentStore;

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub orchestrator: Arc<AnchoringOrchestrator>,
    pub ocr: Arc<OcrClient>,
    /// Secret for verifying bearer tokens.
    pub jwt_secret: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        ledger: Arc<dyn Ledger>,
        ocr: OcrClient,
        jwt_secret: impl Into<String>,
    ) -> Self {
        let orchestrator = Arc::new(AnchoringOrchestrator::new(store.clone(), ledger));
        Self {
            store,
            orchestrator,
            ocr: Arc::new(ocr),
            jwt_secret: jwt_secret.into(),
        }
    }
}

fn cors_layer(origin: Option<&str>) -> Result<CorsLayer> {
    let allow_origin = match origin {
        Some(origin) => {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| MediError::InvalidInput(format!("bad CORS origin `{origin}`: {e}")))?;
            AllowOrigin::exact(value)
        }
        None => AllowOrigin::from(Any),
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState, cors_origin: Option<&str>) -> Result<Router> {
    Ok(Router::new()
        .merge(routes::health_routes())
        .merge(routes::document_routes())
        .merge(routes::blockchain_routes())
        .merge(routes::ocr_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors_layer(cors_origin)?)
        .layer(TraceLayer::new_for_http()))
}

/// Start the API server.
pub async fn serve(state: AppState, addr: &str, cors_origin: Option<&str>) -> Result<()> {
    let app = build_app(state, cors_origin)?;

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("mediledger API server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
