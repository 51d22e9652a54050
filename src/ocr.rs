//! Remote OCR: send the consolidated PDF, get typed fields back.
//!
//! ## Retry Strategy
//!
//! OCR calls are long and expensive, so the policy is deliberately smaller
//! than the storage one: each attempt is bounded by `ocr_timeout_secs`, and
//! only timeouts, 5xx and connection failures are retried, at most
//! `ocr_max_retries` times with `ocr_backoff_ms * 2^(attempt-1)` between
//! attempts. Exhaustion yields [`OcrError::RetriesExhausted`], which callers
//! treat as terminal.

use crate::config::IntakeConfig;
use crate::error::OcrError;
use crate::fields::{clamp_confidence, FieldMap, FieldRecord, PartType};
use crate::storage::RetryPolicy;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// What the OCR engine is asked to read.
#[derive(Debug, Clone, Copy)]
pub struct OcrRequest<'a> {
    pub document_id: &'a str,
    pub file_name: &'a str,
    pub pdf_bytes: &'a [u8],
}

/// A parsed OCR response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    pub fields: FieldMap,
    /// The response body minus `fields`, kept for audit.
    pub raw: Value,
    /// 1-indexed page the engine identified as the coversheet.
    pub coversheet_page: Option<u32>,
    pub part_type: Option<PartType>,
}

/// Anything that can turn a PDF into fields.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, request: OcrRequest<'_>) -> Result<OcrExtraction, OcrError>;
}

/// JSON-over-HTTP OCR service client.
#[derive(Clone)]
pub struct HttpOcrClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
    max_retries: u32,
    backoff_ms: u64,
}

impl std::fmt::Debug for HttpOcrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpOcrClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpOcrClient {
    /// Build a client from config. Fails with [`OcrError::NotConfigured`]
    /// when no endpoint is set.
    pub fn from_config(config: &IntakeConfig) -> Result<Self, OcrError> {
        let endpoint = config.ocr_endpoint.clone().ok_or(OcrError::NotConfigured)?;
        let client = Client::builder()
            .build()
            .map_err(|e| OcrError::Transient {
                detail: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.ocr_api_key.clone(),
            timeout_secs: config.ocr_timeout_secs,
            max_retries: config.ocr_max_retries,
            backoff_ms: config.ocr_backoff_ms,
        })
    }

    async fn call_once(&self, body: &Value) -> Result<Value, OcrError> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let send = async {
            let response = request.send().await.map_err(|e| OcrError::Transient {
                detail: if e.is_connect() {
                    "connection failed".to_string()
                } else {
                    e.to_string()
                },
            })?;
            let status = response.status();
            if status.is_client_error() {
                return Err(OcrError::Rejected {
                    status: status.as_u16(),
                });
            }
            if !status.is_success() {
                return Err(OcrError::Transient {
                    detail: format!("HTTP {}", status.as_u16()),
                });
            }
            response
                .json::<Value>()
                .await
                .map_err(|e| OcrError::MalformedResponse {
                    detail: e.to_string(),
                })
        };
        match timeout(Duration::from_secs(self.timeout_secs), send).await {
            Ok(result) => result,
            Err(_) => Err(OcrError::Timeout {
                secs: self.timeout_secs,
            }),
        }
    }
}

#[async_trait]
impl OcrEngine for HttpOcrClient {
    async fn extract(&self, request: OcrRequest<'_>) -> Result<OcrExtraction, OcrError> {
        let start = Instant::now();
        let body = json!({
            "document_id": request.document_id,
            "file_name": request.file_name,
            "content_type": "application/pdf",
            "content_base64": STANDARD.encode(request.pdf_bytes),
        });
        let response = retry_ocr(self.max_retries, self.backoff_ms, request.document_id, || {
            self.call_once(&body)
        })
        .await?;
        debug!(
            "OCR for {} answered in {:?}",
            request.document_id,
            start.elapsed()
        );
        parse_ocr_response(response)
    }
}

/// Same saturating schedule as the storage gateway.
fn backoff_delay(max_retries: u32, backoff_ms: u64, attempt: u32) -> Duration {
    RetryPolicy {
        max_retries,
        backoff_ms,
    }
    .delay_for(attempt)
}

/// Run `call` until it succeeds, fails permanently, or retries run out.
pub(crate) async fn retry_ocr<F, Fut, T>(
    max_retries: u32,
    backoff_ms: u64,
    document_id: &str,
    mut call: F,
) -> Result<T, OcrError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OcrError>>,
{
    let mut last_err: Option<OcrError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_delay(max_retries, backoff_ms, attempt);
            warn!(
                "OCR {}: retry {}/{} after {}ms",
                document_id,
                attempt,
                max_retries,
                backoff.as_millis()
            );
            sleep(backoff).await;
        }

        match call().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() => {
                warn!("OCR {}: attempt {} failed: {}", document_id, attempt + 1, e);
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(OcrError::RetriesExhausted {
        attempts: max_retries + 1,
        last_error: last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string()),
    })
}

/// Decode the OCR service's JSON body.
///
/// `fields` must be an object of [`FieldRecord`]s; a bare scalar is accepted
/// as a value with zero confidence.
pub fn parse_ocr_response(body: Value) -> Result<OcrExtraction, OcrError> {
    let Value::Object(mut root) = body else {
        return Err(OcrError::MalformedResponse {
            detail: "response is not a JSON object".into(),
        });
    };
    let raw_fields = match root.remove("fields") {
        Some(Value::Object(f)) => f,
        Some(_) => {
            return Err(OcrError::MalformedResponse {
                detail: "'fields' is not an object".into(),
            })
        }
        None => {
            return Err(OcrError::MalformedResponse {
                detail: "missing 'fields'".into(),
            })
        }
    };

    let mut fields = FieldMap::new();
    for (name, v) in raw_fields {
        let record = match v {
            Value::Object(_) => {
                let mut rec: FieldRecord =
                    serde_json::from_value(v).map_err(|e| OcrError::MalformedResponse {
                        detail: format!("field '{name}': {e}"),
                    })?;
                rec.confidence = clamp_confidence(rec.confidence);
                rec
            }
            Value::Null => FieldRecord::ocr("", 0.0),
            Value::String(s) => FieldRecord::ocr(s, 0.0),
            other => FieldRecord::ocr(other.to_string(), 0.0),
        };
        fields.insert(name, record);
    }

    let coversheet_page = match root.get("coversheet_page") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u32::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|p| *p > 0);

    let part_type = root
        .get("part_type")
        .and_then(Value::as_str)
        .map(PartType::parse);

    Ok(OcrExtraction {
        fields,
        raw: Value::Object(root),
        coversheet_page,
        part_type,
    })
}
