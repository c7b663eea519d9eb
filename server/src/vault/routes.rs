//! REST endpoints for depositing and retrieving provenance records.
//!
//! POST /api/provenance/{device_key} : multipart deposit (`provenanceRecord` + `attachment` parts)
//! GET  /api/provenance/{device_key} : all manifests for the key's namespace
//! GET  /api/attachment/{device_key}/{attachment_id} : decrypted attachment bytes
//!
//! The device key travels Base58-encoded in the path. It is decoded per
//! request and never logged; log lines carry the derived namespace.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use futures::TryStreamExt;

use crate::keys::DeviceKey;
use crate::state::AppState;
use crate::vault::address::is_valid_hash;
use crate::vault::record::{parse_relaxed_record, DepositReceipt, ProvenanceRecord, RecordAssembler};
use crate::vault::retrieval::RetrievalEngine;
use crate::vault::{Attachment, VaultError, DEFAULT_CONTENT_TYPE};

/// Multipart field carrying the relaxed-JSON record.
const RECORD_FIELD: &str = "provenanceRecord";
/// Multipart field name for each attachment file.
const ATTACHMENT_FIELD: &str = "attachment";

/// Map a core error to an HTTP rejection, logging it on the way out.
fn reject(context: &str, e: VaultError) -> (StatusCode, String) {
    let status = e.http_status();
    if status.is_server_error() {
        tracing::error!("{} failed: {}", context, e);
    } else if !matches!(e, VaultError::MalformedKey(_)) {
        tracing::warn!("{} rejected: {}", context, e);
    } else {
        tracing::warn!("{} rejected: malformed device key", context);
    }
    (status, e.to_string())
}

fn decode_key(context: &str, encoded: &str) -> Result<DeviceKey, (StatusCode, String)> {
    DeviceKey::from_encoded(encoded).map_err(|e| reject(context, e))
}

/// GET /api/provenance/{device_key}
///
/// Returns every manifest stored under the key as a JSON array. A key that
/// has never deposited anything gets `[]`.
pub async fn list_records_route(
    State(state): State<AppState>,
    Path(device_key): Path<String>,
) -> Result<Json<Vec<ProvenanceRecord>>, (StatusCode, String)> {
    let key = decode_key("list records", &device_key)?;
    let engine = RetrievalEngine::new(state.store.clone());

    let records: Vec<ProvenanceRecord> = engine
        .list_records(&key)
        .await
        .map_err(|e| reject("list records", e))?
        .try_collect()
        .await
        .map_err(|e| reject("list records", e))?;

    tracing::debug!(
        "Listed {} record(s) for namespace {}",
        records.len(),
        key.device_id()
    );
    Ok(Json(records))
}

/// POST /api/provenance/{device_key}
///
/// Multipart body: one `provenanceRecord` text field (JSON5) and zero or
/// more `attachment` file parts. Attachments are stored before the record
/// manifest. Returns the record hash and the attachment hashes.
pub async fn put_record_route(
    State(state): State<AppState>,
    Path(device_key): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<DepositReceipt>, (StatusCode, String)> {
    let key = decode_key("deposit", &device_key)?;

    let mut record_text: Option<String> = None;
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(RECORD_FIELD) => {
                if record_text.is_some() {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        format!("Duplicate {} field", RECORD_FIELD),
                    ));
                }
                let text = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
                record_text = Some(text);
            }
            Some(ATTACHMENT_FIELD) => {
                let content_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;
                attachments.push(Attachment::new(bytes.to_vec(), content_type));
            }
            other => {
                tracing::debug!("Ignoring multipart field {:?}", other);
            }
        }
    }

    let record_text = record_text.ok_or((
        StatusCode::BAD_REQUEST,
        format!("Missing {} field", RECORD_FIELD),
    ))?;
    let record = parse_relaxed_record(&record_text).map_err(|e| reject("deposit", e))?;

    let receipt = RecordAssembler::new(state.store.clone())
        .deposit(&key, record, attachments)
        .await
        .map_err(|e| reject("deposit", e))?;

    Ok(Json(receipt))
}

/// GET /api/attachment/{device_key}/{attachment_id}
///
/// Returns the decrypted attachment with its stored `Content-Type`, or 404.
pub async fn get_attachment_route(
    State(state): State<AppState>,
    Path((device_key, attachment_id)): Path<(String, String)>,
) -> Result<(StatusCode, HeaderMap, Vec<u8>), (StatusCode, String)> {
    let key = decode_key("get attachment", &device_key)?;

    if !is_valid_hash(&attachment_id) {
        return Err((
            StatusCode::BAD_REQUEST,
            "Attachment id must be a 64-character hex string (SHA-256)".to_string(),
        ));
    }

    let attachment = RetrievalEngine::new(state.store.clone())
        .get_attachment(&key, &attachment_id)
        .await
        .map_err(|e| reject("get attachment", e))?;

    let content_type = HeaderValue::from_str(&attachment.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);

    Ok((StatusCode::OK, headers, attachment.bytes))
}
