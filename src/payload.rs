//! Inbound package parsing.
//!
//! Two schema generations are accepted:
//!
//! * **legacy**: `ingest_data.raw_payload.documents[]` with a separate
//!   `file_download_data.blob_storage_path` that relative file names hang off;
//! * **current**: a flat root with `documents[]`, each carrying a `blobPath`.
//!
//! [`parse_payload`] walks the whole structure and reports every missing or
//! malformed field at once in a [`PayloadError`]. Problem messages name the
//! field only; values are never echoed.

use crate::blob_path::join_blob_path;
use crate::config::{has_url_scheme, IntakeConfig};
use crate::error::{PayloadError, PayloadProblem};
use crate::storage::StorageGateway;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// The only message type this service consumes.
pub const INGEST_MESSAGE_TYPE: &str = "ingest_file_package";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaGeneration {
    Legacy,
    Current,
}

/// One attachment named by the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub document_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub file_size: Option<u64>,
    /// Absolute URL the bytes are fetched from.
    pub source_url: String,
    pub checksum: Option<String>,
}

/// A fully validated intake request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakePayload {
    pub message_type: String,
    pub decision_tracking_id: String,
    pub unique_id: Option<String>,
    pub submission_metadata: Value,
    pub documents: Vec<SourceDocument>,
    pub schema: SchemaGeneration,
}

/// Where relative blob paths resolve to.
pub struct UrlContext<'a> {
    pub config: &'a IntakeConfig,
    pub gateway: &'a StorageGateway,
}

/// Parse `raw` in either schema generation.
pub fn parse_payload(raw: &Value, ctx: &UrlContext<'_>) -> Result<IntakePayload, PayloadError> {
    let mut problems = Problems::default();

    let Some(root) = raw.as_object() else {
        problems.push("$", "must be a JSON object");
        return Err(problems.into_error());
    };

    let message_type = match root.get("message_type") {
        None | Some(Value::Null) => INGEST_MESSAGE_TYPE.to_string(),
        Some(Value::String(s)) if s == INGEST_MESSAGE_TYPE => s.clone(),
        Some(_) => {
            problems.push("message_type", format!("must be '{INGEST_MESSAGE_TYPE}'"));
            String::new()
        }
    };

    let parsed = if root.contains_key("ingest_data") {
        parse_legacy(root, ctx, &mut problems)
    } else {
        parse_current(root, ctx, &mut problems)
    };

    match parsed {
        Some(mut payload) if problems.is_empty() => {
            payload.message_type = message_type;
            debug!(
                "Parsed {:?} payload for {} with {} document(s)",
                payload.schema,
                payload.decision_tracking_id,
                payload.documents.len()
            );
            Ok(payload)
        }
        _ => Err(problems.into_error()),
    }
}

#[derive(Default)]
struct Problems(Vec<PayloadProblem>);

impl Problems {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(PayloadProblem::new(field, message));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_error(self) -> PayloadError {
        PayloadError { problems: self.0 }
    }

    /// A required, non-blank string (numbers are accepted and stringified).
    fn required_str(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> Option<String> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, "is required");
                None
            }
            Some(v) => match scalar_string(v) {
                Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(_) => {
                    self.push(path, "must not be empty");
                    None
                }
                None => {
                    self.push(path, "must be a string");
                    None
                }
            },
        }
    }

    fn optional_str(&mut self, obj: &Map<String, Value>, key: &str, path: &str) -> Option<String> {
        match obj.get(key) {
            None | Some(Value::Null) => None,
            Some(v) => match scalar_string(v) {
                Some(s) if s.trim().is_empty() => None,
                Some(s) => Some(s.trim().to_string()),
                None => {
                    self.push(path, "must be a string");
                    None
                }
            },
        }
    }

    fn size(&mut self, obj: &Map<String, Value>, key: &str, path: &str, required: bool) -> Option<u64> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                if required {
                    self.push(path, "is required");
                }
                None
            }
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) => Some(v),
                None => {
                    self.push(path, "must be a non-negative integer");
                    None
                }
            },
            Some(Value::String(s)) => match s.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    self.push(path, "must be a non-negative integer");
                    None
                }
            },
            Some(_) => {
                self.push(path, "must be a non-negative integer");
                None
            }
        }
    }

    fn object<'v>(&mut self, obj: &'v Map<String, Value>, key: &str, path: &str) -> Option<&'v Map<String, Value>> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, "is required");
                None
            }
            Some(Value::Object(o)) => Some(o),
            Some(_) => {
                self.push(path, "must be an object");
                None
            }
        }
    }

    fn array<'v>(&mut self, obj: &'v Map<String, Value>, key: &str, path: &str) -> Option<&'v Vec<Value>> {
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(path, "is required");
                None
            }
            Some(Value::Array(a)) => Some(a),
            Some(_) => {
                self.push(path, "must be an array");
                None
            }
        }
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_legacy(
    root: &Map<String, Value>,
    ctx: &UrlContext<'_>,
    problems: &mut Problems,
) -> Option<IntakePayload> {
    let ingest = problems.object(root, "ingest_data", "ingest_data");
    let download = problems.object(root, "file_download_data", "file_download_data");

    let tracking_id = ingest.and_then(|o| {
        problems.required_str(o, "decision_tracking_id", "ingest_data.decision_tracking_id")
    });
    let unique_id =
        ingest.and_then(|o| problems.optional_str(o, "unique_id", "ingest_data.unique_id"));
    let raw_payload =
        ingest.and_then(|o| problems.object(o, "raw_payload", "ingest_data.raw_payload"));
    let docs = raw_payload.and_then(|o| {
        problems.array(o, "documents", "ingest_data.raw_payload.documents")
    });

    let base = download.and_then(|o| {
        problems.required_str(
            o,
            "blob_storage_path",
            "file_download_data.blob_storage_path",
        )
    });
    if let Some(o) = download {
        problems.optional_str(o, "extraction_path", "file_download_data.extraction_path");
    }

    let mut documents = Vec::new();
    let mut seen = HashSet::new();
    for (i, doc) in docs.into_iter().flatten().enumerate() {
        let path = format!("ingest_data.raw_payload.documents[{i}]");
        let Some(doc) = doc.as_object() else {
            problems.push(path, "must be an object");
            continue;
        };
        let id = problems.required_str(doc, "documentUniqueIdentifier", &format!("{path}.documentUniqueIdentifier"));
        let file_name = problems.required_str(doc, "fileName", &format!("{path}.fileName"));
        let mime_type = problems.required_str(doc, "mimeType", &format!("{path}.mimeType"));
        let file_size = problems.size(doc, "fileSize", &format!("{path}.fileSize"), true);
        let relative = problems.optional_str(doc, "relative_path", &format!("{path}.relative_path"));

        if let Some(id) = &id {
            if !seen.insert(id.clone()) {
                problems.push(format!("{path}.documentUniqueIdentifier"), "is duplicated");
            }
        }

        let url = match (&base, relative.as_ref().or(file_name.as_ref())) {
            (Some(base), Some(leaf)) => {
                let url = legacy_url(base, leaf, ctx);
                check_scheme(&url, &format!("{path}.fileName"), problems)
            }
            _ => None,
        };

        if let (Some(document_id), Some(file_name), Some(mime_type), Some(source_url)) =
            (id, file_name, mime_type, url)
        {
            documents.push(SourceDocument {
                document_id,
                file_name,
                mime_type,
                file_size,
                source_url,
                checksum: None,
            });
        }
    }

    Some(IntakePayload {
        message_type: INGEST_MESSAGE_TYPE.to_string(),
        decision_tracking_id: tracking_id?,
        unique_id,
        submission_metadata: Value::Object(Map::new()),
        documents,
        schema: SchemaGeneration::Legacy,
    })
}

fn parse_current(
    root: &Map<String, Value>,
    ctx: &UrlContext<'_>,
    problems: &mut Problems,
) -> Option<IntakePayload> {
    let tracking_id = problems.required_str(root, "decision_tracking_id", "decision_tracking_id");
    let unique_id = problems.optional_str(root, "unique_id", "unique_id");
    let metadata = problems
        .object(root, "submission_metadata", "submission_metadata")
        .cloned();
    let docs = problems.array(root, "documents", "documents");

    let mut documents = Vec::new();
    let mut seen = HashSet::new();
    for (i, doc) in docs.into_iter().flatten().enumerate() {
        let path = format!("documents[{i}]");
        let Some(doc) = doc.as_object() else {
            problems.push(path, "must be an object");
            continue;
        };
        let id = problems.required_str(doc, "document_unique_id", &format!("{path}.document_unique_id"));
        let file_name = problems.required_str(doc, "fileName", &format!("{path}.fileName"));
        let mime_type = problems.required_str(doc, "mimeType", &format!("{path}.mimeType"));
        let file_size = problems.size(doc, "fileSize", &format!("{path}.fileSize"), false);
        let blob_path = problems.required_str(doc, "blobPath", &format!("{path}.blobPath"));
        let checksum = problems.optional_str(doc, "checksum", &format!("{path}.checksum"));

        if let Some(id) = &id {
            if !seen.insert(id.clone()) {
                problems.push(format!("{path}.document_unique_id"), "is duplicated");
            }
        }

        let url = blob_path.and_then(|bp| {
            let url = current_url(&bp, ctx);
            check_scheme(&url, &format!("{path}.blobPath"), problems)
        });

        if let (Some(document_id), Some(file_name), Some(mime_type), Some(source_url)) =
            (id, file_name, mime_type, url)
        {
            documents.push(SourceDocument {
                document_id,
                file_name,
                mime_type,
                file_size,
                source_url,
                checksum,
            });
        }
    }

    Some(IntakePayload {
        message_type: INGEST_MESSAGE_TYPE.to_string(),
        decision_tracking_id: tracking_id?,
        unique_id,
        submission_metadata: Value::Object(metadata?),
        documents,
        schema: SchemaGeneration::Current,
    })
}

fn check_scheme(url: &str, field: &str, problems: &mut Problems) -> Option<String> {
    if has_url_scheme(url) {
        Some(url.to_string())
    } else {
        problems.push(field, "does not resolve to an absolute URL");
        None
    }
}

/// Legacy: `blob_storage_path` is either an absolute URL or a
/// `container/dir` path under the storage account.
fn legacy_url(base: &str, leaf: &str, ctx: &UrlContext<'_>) -> String {
    if has_url_scheme(leaf) {
        return leaf.to_string();
    }
    if has_url_scheme(base) {
        return format!(
            "{}/{}",
            base.trim_end_matches('/'),
            join_blob_path([leaf])
        );
    }
    current_url(&join_blob_path([base, leaf]), ctx)
}

/// Current: an absolute `blobPath` is used verbatim; a relative one lands in
/// the container named by its first segment when that is a known container,
/// else in the default one.
fn current_url(blob_path: &str, ctx: &UrlContext<'_>) -> String {
    if has_url_scheme(blob_path) {
        return blob_path.to_string();
    }
    let trimmed = blob_path.trim().trim_start_matches('/');
    let (container, rest) = match trimmed.split_once('/') {
        Some((first, rest))
            if ctx
                .config
                .channel_containers
                .iter()
                .chain(std::iter::once(&ctx.config.default_container))
                .any(|c| c.trim().eq_ignore_ascii_case(first)) =>
        {
            (first.to_string(), rest.to_string())
        }
        _ => (ctx.config.default_container.clone(), trimmed.to_string()),
    };
    let location = ctx.gateway.location(&container, &rest);
    ctx.gateway.url_for(&location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use serde_json::json;
    use std::sync::Arc;

    fn with_ctx<T>(prefix: Option<&str>, f: impl FnOnce(&UrlContext<'_>) -> T) -> T {
        let mut builder = IntakeConfig::builder()
            .default_container("intake")
            .channel_container("fax-inbound");
        if let Some(p) = prefix {
            builder = builder.blob_prefix(p);
        }
        let config = builder.build().unwrap();
        let gateway = StorageGateway::new(Arc::new(MemoryObjectStore::new("https://acct")), &config);
        f(&UrlContext {
            config: &config,
            gateway: &gateway,
        })
    }

    fn current() -> Value {
        json!({
            "decision_tracking_id": "DT-100",
            "submission_metadata": {"channel": "fax"},
            "documents": [
                {"document_unique_id": "d1", "fileName": "a.pdf", "mimeType": "application/pdf",
                 "fileSize": 120, "blobPath": "fax-inbound/2024/a.pdf"},
                {"document_unique_id": "d2", "fileName": "b.tif", "mimeType": "image/tiff",
                 "blobPath": "2024/b.tif", "checksum": "abc"},
                {"document_unique_id": "d3", "fileName": "c.txt", "mimeType": "text/plain",
                 "blobPath": "https://elsewhere.example/c.txt"}
            ]
        })
    }

    #[test]
    fn current_schema_resolves_containers() {
        let p = with_ctx(Some("dev"), |ctx| parse_payload(&current(), ctx)).unwrap();
        assert_eq!(p.schema, SchemaGeneration::Current);
        assert_eq!(p.message_type, INGEST_MESSAGE_TYPE);
        assert_eq!(p.documents.len(), 3);
        assert_eq!(p.documents[0].source_url, "https://acct/fax-inbound/dev/2024/a.pdf");
        assert_eq!(p.documents[1].source_url, "https://acct/intake/dev/2024/b.tif");
        assert_eq!(p.documents[2].source_url, "https://elsewhere.example/c.txt");
        assert_eq!(p.documents[1].checksum.as_deref(), Some("abc"));
        assert_eq!(p.submission_metadata["channel"], "fax");
    }

    #[test]
    fn legacy_schema() {
        let raw = json!({
            "ingest_data": {
                "decision_tracking_id": 4411,
                "unique_id": "U-1",
                "raw_payload": {"documents": [
                    {"documentUniqueIdentifier": "x1", "fileName": "scan.tiff",
                     "mimeType": "image/tiff", "fileSize": "2048"},
                    {"documentUniqueIdentifier": "x2", "fileName": "letter.pdf",
                     "mimeType": "application/pdf", "fileSize": 10, "relative_path": "sub/letter.pdf"}
                ]}
            },
            "file_download_data": {"extraction_path": "/tmp/x", "blob_storage_path": "intake/4411"}
        });
        let p = with_ctx(None, |ctx| parse_payload(&raw, ctx)).unwrap();
        assert_eq!(p.schema, SchemaGeneration::Legacy);
        assert_eq!(p.decision_tracking_id, "4411");
        assert_eq!(p.documents[0].file_size, Some(2048));
        assert_eq!(p.documents[0].source_url, "https://acct/intake/4411/scan.tiff");
        assert!(p.documents[1].source_url.ends_with("/4411/sub/letter.pdf"));
    }

    #[test]
    fn legacy_absolute_base() {
        let raw = json!({
            "ingest_data": {"decision_tracking_id": "D", "raw_payload": {"documents": [
                {"documentUniqueIdentifier": "x", "fileName": "a.pdf", "mimeType": "application/pdf", "fileSize": 1}
            ]}},
            "file_download_data": {"blob_storage_path": "https://store.example/in/D/"}
        });
        let p = with_ctx(None, |ctx| parse_payload(&raw, ctx)).unwrap();
        assert_eq!(p.documents[0].source_url, "https://store.example/in/D/a.pdf");
    }

    #[test]
    fn every_problem_reported_at_once() {
        let raw = json!({
            "message_type": "something_else",
            "documents": [
                {"fileName": "", "mimeType": true},
                "not-an-object",
                {"document_unique_id": "d", "fileName": "f", "mimeType": "image/png", "blobPath": "p", "fileSize": -3}
            ]
        });
        let err = with_ctx(None, |ctx| parse_payload(&raw, ctx)).unwrap_err();
        let fields = err.fields();
        for expected in [
            "message_type",
            "decision_tracking_id",
            "submission_metadata",
            "documents[0].document_unique_id",
            "documents[0].fileName",
            "documents[0].mimeType",
            "documents[0].blobPath",
            "documents[1]",
            "documents[2].fileSize",
        ] {
            assert!(fields.contains(&expected), "missing {expected} in {fields:?}");
        }
    }

    #[test]
    fn empty_documents_ok_missing_documents_not() {
        let ok = json!({"decision_tracking_id": "D", "submission_metadata": {}, "documents": []});
        let p = with_ctx(None, |ctx| parse_payload(&ok, ctx)).unwrap();
        assert!(p.documents.is_empty());

        let missing = json!({"decision_tracking_id": "D", "submission_metadata": {}});
        let err = with_ctx(None, |ctx| parse_payload(&missing, ctx)).unwrap_err();
        assert_eq!(err.fields(), vec!["documents"]);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let raw = json!({"decision_tracking_id": "D", "submission_metadata": {}, "documents": [
            {"document_unique_id": "d", "fileName": "a", "mimeType": "application/pdf", "blobPath": "a"},
            {"document_unique_id": "d", "fileName": "b", "mimeType": "application/pdf", "blobPath": "b"}
        ]});
        let err = with_ctx(None, |ctx| parse_payload(&raw, ctx)).unwrap_err();
        assert_eq!(err.fields(), vec!["documents[1].document_unique_id"]);
    }

    #[test]
    fn problems_never_echo_values() {
        let raw = json!({"decision_tracking_id": {"ssn": "123-45-6789"}, "submission_metadata": {}, "documents": []});
        let err = with_ctx(None, |ctx| parse_payload(&raw, ctx)).unwrap_err();
        assert!(!err.to_string().contains("123-45-6789"));
    }
}
