use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::Config, store::LeadStore, workflow::Workflow};

/// Store-assigned identifier of a lead. Opaque: REST backends hand out integers,
/// the postgres and memory backends hand out uuids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: LeadId,
    pub partner_id: i64,
    pub contact: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLead {
    pub partner_id: i64,
    pub contact: String,
    pub active: bool,
}

/// Author of a stored message. Inbound webhook traffic is always `client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Client,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Client => "client",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub lead_id: LeadId,
    pub sender: Sender,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub lead_id: LeadId,
    pub sender: Sender,
    pub body: String,
}

/// A normalized `(contact, text)` pair extracted from a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub contact: String,
    pub text: String,
    pub platform_message_id: Option<String>,
}

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LeadStore>,
    pub workflow: Workflow,
}
