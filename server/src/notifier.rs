//! Outbound replies through the WhatsApp Cloud API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{config::NotifierConfig, error::NotifyError};

const MAX_BUTTONS: usize = 3;
const MAX_BUTTON_TITLE_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuButton {
    pub id: String,
    pub title: String,
}

impl MenuButton {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text { body: String },
    Menu { body: String, buttons: Vec<MenuButton> },
}

impl OutboundPayload {
    /// Graph API message object addressed to `to`.
    pub fn to_graph_json(&self, to: &str) -> Value {
        let mut payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
        });
        match self {
            OutboundPayload::Text { body } => {
                payload["type"] = json!("text");
                payload["text"] = json!({
                    "preview_url": false,
                    "body": body,
                });
            }
            OutboundPayload::Menu { body, buttons } => {
                let buttons = buttons
                    .iter()
                    .take(MAX_BUTTONS)
                    .map(|button| {
                        json!({
                            "type": "reply",
                            "reply": {
                                "id": button.id,
                                "title": button.title.chars().take(MAX_BUTTON_TITLE_CHARS).collect::<String>(),
                            }
                        })
                    })
                    .collect::<Vec<_>>();
                payload["type"] = json!("interactive");
                payload["interactive"] = json!({
                    "type": "button",
                    "body": { "text": body },
                    "action": { "buttons": buttons },
                });
            }
        }
        payload
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, contact: &str, payload: &OutboundPayload) -> Result<Value, NotifyError>;
}

pub struct WhatsAppNotifier {
    http: reqwest::Client,
    config: NotifierConfig,
    timeout: Duration,
}

impl WhatsAppNotifier {
    pub fn new(http: reqwest::Client, config: NotifierConfig, timeout: Duration) -> Self {
        Self {
            http,
            config,
            timeout,
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.api_base, self.config.api_version, self.config.phone_number_id
        )
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, contact: &str, payload: &OutboundPayload) -> Result<Value, NotifyError> {
        if self.config.access_token.is_empty() || self.config.phone_number_id.is_empty() {
            return Err(NotifyError::Disabled);
        }

        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .timeout(self.timeout)
            .json(&payload.to_graph_json(contact))
            .send()
            .await?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: raw_body,
            });
        }
        debug!(contact, status = status.as_u16(), "reply delivered");
        Ok(serde_json::from_str::<Value>(&raw_body).unwrap_or_else(|_| json!({ "raw": raw_body })))
    }
}
