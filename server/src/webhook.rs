//! Inbound webhook: verification handshake, signed event delivery, and the
//! operator routes that sit next to it.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DecodeError, StoreError},
    types::{AppState, InboundMessage, LeadId},
};

type HmacSha256 = Hmac<Sha256>;

/// Decodes a field, treating a value of the wrong shape like a missing one.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// Decodes a list element by element. Elements that don't fit are logged and
/// dropped; anything other than an array reads as empty.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(index, error = %err, "skipping malformed webhook element");
                None
            }
        })
        .collect())
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default, deserialize_with = "lenient")]
    pub object: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default, deserialize_with = "lenient_list")]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    #[serde(default, deserialize_with = "lenient")]
    pub field: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default, deserialize_with = "lenient_list")]
    pub messages: Vec<InboundEvent>,
}

#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    #[serde(default, deserialize_with = "lenient")]
    pub from: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<TextBody>,
    #[serde(default, deserialize_with = "lenient")]
    pub button: Option<ButtonBody>,
    #[serde(default, deserialize_with = "lenient")]
    pub interactive: Option<InteractiveBody>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    #[serde(default, deserialize_with = "lenient")]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ButtonBody {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InteractiveBody {
    #[serde(default, deserialize_with = "lenient")]
    pub button_reply: Option<ReplyTitle>,
    #[serde(default, deserialize_with = "lenient")]
    pub list_reply: Option<ReplyTitle>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyTitle {
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
}

/// Returns the value untouched unless it is blank.
fn non_blank(value: Option<&String>) -> Option<&String> {
    value.filter(|v| !v.trim().is_empty())
}

impl InboundEvent {
    /// Text content of the event, kept as received. Non-text events are stored
    /// as `Mensagem <type>`.
    pub fn text_content(&self) -> String {
        let reply_title = self.interactive.as_ref().and_then(|i| {
            i.button_reply
                .as_ref()
                .or(i.list_reply.as_ref())
                .and_then(|r| non_blank(r.title.as_ref()))
        });
        non_blank(self.text.as_ref().and_then(|t| t.body.as_ref()))
            .or_else(|| non_blank(self.button.as_ref().and_then(|b| b.text.as_ref())))
            .or(reply_title)
            .cloned()
            .unwrap_or_else(|| match self.kind.as_deref().map(str::trim) {
                Some(kind) if !kind.is_empty() => format!("Mensagem {kind}"),
                _ => "Mensagem desconhecida".to_string(),
            })
    }
}

/// Only bodies that are not JSON at all are rejected. Valid JSON of any other
/// shape decodes to whatever messages it carries, possibly none.
pub fn decode_payload(body: &[u8]) -> Result<WebhookPayload, DecodeError> {
    let value = serde_json::from_slice::<Value>(body)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Flattens `entry[].changes[].value.messages[]` into `(contact, text)` pairs.
pub fn extract_messages(payload: &WebhookPayload) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    for entry in &payload.entry {
        for change in &entry.changes {
            if change.field.as_deref() != Some("messages") {
                continue;
            }
            let Some(value) = &change.value else {
                continue;
            };
            for event in &value.messages {
                let Some(contact) = event.from.as_deref().map(str::trim).filter(|c| !c.is_empty())
                else {
                    warn!(
                        platform_message_id = event.id.as_deref().unwrap_or(""),
                        "skipping inbound message without sender"
                    );
                    continue;
                };
                out.push(InboundMessage {
                    contact: contact.to_string(),
                    text: event.text_content(),
                    platform_message_id: event.id.clone(),
                });
            }
        }
    }
    out
}

pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    if app_secret.is_empty() {
        return true;
    }
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature
        .strip_prefix("sha256=")
        .unwrap_or(signature)
        .trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub async fn webhook_verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    if query.mode.is_none() && query.token.is_none() && query.challenge.is_none() {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "Webhook ativo",
                "message": "Webhook funcionando",
                "timestamp": Utc::now().to_rfc3339(),
            })),
        )
            .into_response();
    }

    if query.mode.as_deref() == Some("subscribe")
        && query.token.as_deref() == Some(state.config.verify_token.as_str())
    {
        info!("webhook verified");
        return (StatusCode::OK, query.challenge.unwrap_or_default()).into_response();
    }

    warn!("webhook verification rejected");
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "Token inválido" })),
    )
        .into_response()
}

pub async fn webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.config.app_secret, signature_header, &body) {
        warn!("webhook signature mismatch");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = match decode_payload(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "undecodable webhook body");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let inbound = extract_messages(&payload);
    debug!(
        object = payload.object.as_deref().unwrap_or(""),
        messages = inbound.len(),
        "webhook received"
    );

    // Always 200 once decoded; per-message failures only show up in the logs.
    let report = state.workflow.handle_batch(&inbound).await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "processed": report.processed,
            "failed": report.failed,
        })),
    )
        .into_response()
}

pub async fn test_db(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timeout = state.config.request_timeout;
    let result = tokio::time::timeout(timeout, state.store.ping())
        .await
        .unwrap_or(Err(StoreError::Timeout(timeout)));
    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Conexão OK",
                "backend": state.config.store.backend_name(),
            })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "store connectivity check failed");
            let status = match &err {
                StoreError::Status { status, .. } => json!(status),
                _ => json!(null),
            };
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Erro na conexão",
                    "status": status,
                    "detail": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": Utc::now().to_rfc3339() }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Constant-time token comparison: both tokens are MACed under the expected one
/// and the tags compared with `verify_slice`.
fn tokens_match(expected: &str, given: &str) -> bool {
    let tag = |token: &str| {
        let mut mac = HmacSha256::new_from_slice(expected.as_bytes()).ok()?;
        mac.update(token.as_bytes());
        Some(mac)
    };
    let (Some(expected_mac), Some(given_mac)) = (tag(expected), tag(given)) else {
        return false;
    };
    given_mac
        .verify_slice(&expected_mac.finalize().into_bytes())
        .is_ok()
}

pub async fn deactivate_lead(
    Path(lead_id): Path<String>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = match (&state.config.admin_token, bearer_token(&headers)) {
        (Some(expected), Some(given)) => tokens_match(expected, given),
        _ => false,
    };
    if !authorized {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response();
    }

    let lead_id = LeadId(lead_id);
    let timeout = state.config.request_timeout;
    let result = tokio::time::timeout(timeout, state.store.deactivate_lead(&lead_id))
        .await
        .unwrap_or(Err(StoreError::Timeout(timeout)));
    match result {
        Ok(()) => {
            info!(lead_id = %lead_id, "lead deactivated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::Referential(detail)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": detail }))).into_response()
        }
        Err(err) => {
            error!(lead_id = %lead_id, error = %err, "lead deactivation failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
