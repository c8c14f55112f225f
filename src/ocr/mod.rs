/// Client for the external OCR extraction service.
///
/// The service accepts a multipart upload with a single `file` field at
/// `{base}/api/ocr/extract` and answers with the recognised text, a mean
/// confidence and free-form metadata. Nothing in the anchoring path calls
/// this; the HTTP layer proxies it so users can fill in `ocr_text`.
use std::time::Duration;

use reqwest::multipart;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MediError, Result};

/// Text extracted from one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    #[serde(default)]
    pub text: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub struct OcrClient {
    client: Client,
    base_url: String,
}

impl OcrClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn extract(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        data: Vec<u8>,
    ) -> Result<OcrExtraction> {
        if data.is_empty() {
            return Err(MediError::InvalidInput("No file uploaded".into()));
        }

        let size = data.len();
        let mut part = multipart::Part::bytes(data).file_name(file_name.to_string());
        if let Some(mime) = content_type {
            part = part
                .mime_str(mime)
                .map_err(|e| MediError::InvalidInput(format!("bad content type `{mime}`: {e}")))?;
        }
        let form = multipart::Form::new().part("file", part);

        debug!(file_name, size, "Sending file to OCR service");

        let resp = self
            .client
            .post(format!("{}/api/ocr/extract", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| MediError::Ocr(format!("OCR service unreachable: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "OCR extraction failed");
            return Err(MediError::Ocr(format!("OCR extraction failed ({status}): {body}")));
        }

        resp.json()
            .await
            .map_err(|e| MediError::Serialization(format!("OCR response parse error: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    async fn extract(mut multipart: Multipart) -> Json<Value> {
        let mut name = String::new();
        let mut size = 0;
        while let Some(field) = multipart.next_field().await.unwrap() {
            if field.name() == Some("file") {
                name = field.file_name().unwrap_or_default().to_string();
                size = field.bytes().await.unwrap().len();
            }
        }
        Json(json!({
            "success": true,
            "text": "Glucose 95 mg/dL",
            "confidence": 0.93,
            "metadata": { "file_name": name, "file_size": size }
        }))
    }

    async fn broken() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded")
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_extract_posts_file_field() {
        let url = spawn(Router::new().route("/api/ocr/extract", post(extract))).await;
        let client = OcrClient::new(format!("{url}/"));

        let result = client
            .extract("scan.png", Some("image/png"), vec![1, 2, 3, 4])
            .await
            .unwrap();
        assert_eq!(result.text, "Glucose 95 mg/dL");
        assert_eq!(result.confidence, Some(0.93));
        assert_eq!(result.metadata["file_name"], "scan.png");
        assert_eq!(result.metadata["file_size"], 4);
    }

    #[tokio::test]
    async fn test_service_error_is_ocr_error() {
        let url = spawn(Router::new().route("/api/ocr/extract", post(broken))).await;
        let client = OcrClient::new(url);

        let err = client.extract("scan.png", None, vec![1]).await.unwrap_err();
        assert!(matches!(err, MediError::Ocr(ref m) if m.contains("model not loaded")));
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected_locally() {
        let client = OcrClient::new("http://127.0.0.1:1");
        assert!(matches!(
            client.extract("scan.png", None, Vec::new()).await,
            Err(MediError::InvalidInput(_))
        ));
    }
}
