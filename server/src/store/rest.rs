use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};

use super::LeadStore;
use crate::{
    error::StoreError,
    types::{Lead, LeadId, Message, MessageId, NewLead, NewMessage},
};

const LEADS_TABLE: &str = "leads";
const MESSAGES_TABLE: &str = "mensagem";

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

/// PostgREST (Supabase) client for the `leads` and `mensagem` tables.
pub struct RestStore {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct LeadRow {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    id_parceiro: Option<i64>,
    #[serde(default)]
    contacts: Option<String>,
    #[serde(default)]
    status: Option<bool>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Generated ids come back as numbers or strings depending on the column type.
fn opaque_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// Sends numeric ids back as JSON numbers so bigint foreign keys match.
fn id_json(id: &str) -> Value {
    id.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_string()))
}

impl LeadRow {
    fn into_lead(self, contact: &str, partner_id: i64) -> Result<Lead, StoreError> {
        let id = opaque_id(self.id.as_ref()).ok_or(StoreError::MissingId("lead"))?;
        Ok(Lead {
            id: LeadId(id),
            partner_id: self.id_parceiro.unwrap_or(partner_id),
            contact: self.contacts.unwrap_or_else(|| contact.to_string()),
            active: self.status.unwrap_or(true),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

impl RestStore {
    pub fn new(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<PostgrestError>(&body).unwrap_or_default();
        let detail = parsed.message.unwrap_or_else(|| body.clone());
        match parsed.code.as_deref() {
            Some(PG_UNIQUE_VIOLATION) => Err(StoreError::Conflict(detail)),
            Some(PG_FOREIGN_KEY_VIOLATION) => Err(StoreError::Referential(detail)),
            _ => Err(StoreError::Status {
                status: status.as_u16(),
                body,
            }),
        }
    }

    async fn select_lead(
        &self,
        contact: &str,
        active: bool,
    ) -> Result<Option<Lead>, StoreError> {
        let mut query = vec![
            ("contacts", format!("eq.{contact}")),
            ("status", format!("eq.{active}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ];
        if !active {
            query.push(("order", "created_at.desc".to_string()));
        }
        let response = self
            .authorized(self.http.get(self.table_url(LEADS_TABLE)))
            .query(&query)
            .send()
            .await?;
        let rows = Self::checked(response).await?.json::<Vec<LeadRow>>().await?;
        match rows.into_iter().next() {
            Some(row) => row.into_lead(contact, 1).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LeadStore for RestStore {
    async fn find_active_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        self.select_lead(contact, true).await
    }

    async fn find_inactive_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        self.select_lead(contact, false).await
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, StoreError> {
        let response = self
            .authorized(self.http.post(self.table_url(LEADS_TABLE)))
            .header("Prefer", "return=representation")
            .header(header::CONTENT_TYPE, "application/json")
            .json(&json!({
                "id_parceiro": lead.partner_id,
                "contacts": lead.contact,
                "status": lead.active,
            }))
            .send()
            .await?;
        let rows = Self::checked(response).await?.json::<Vec<LeadRow>>().await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(StoreError::MissingId("lead"))?;
        row.into_lead(&lead.contact, lead.partner_id)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let response = self
            .authorized(self.http.post(self.table_url(MESSAGES_TABLE)))
            .header("Prefer", "return=representation")
            .header(header::CONTENT_TYPE, "application/json")
            .json(&json!({
                "id_lead": id_json(&message.lead_id.0),
                "remetente": message.sender.as_str(),
                "mensagem": message.body,
            }))
            .send()
            .await?;
        let rows = Self::checked(response)
            .await?
            .json::<Vec<MessageRow>>()
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(StoreError::MissingId("message"))?;
        let id = opaque_id(row.id.as_ref()).ok_or(StoreError::MissingId("message"))?;
        Ok(Message {
            id: MessageId(id),
            lead_id: message.lead_id,
            sender: message.sender,
            body: message.body,
            created_at: row.created_at.unwrap_or_else(Utc::now),
        })
    }

    async fn deactivate_lead(&self, id: &LeadId) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http.patch(self.table_url(LEADS_TABLE)))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .header(header::CONTENT_TYPE, "application/json")
            .json(&json!({ "status": false }))
            .send()
            .await?;
        let rows = Self::checked(response).await?.json::<Vec<LeadRow>>().await?;
        if rows.is_empty() {
            return Err(StoreError::Referential(format!("lead {id} does not exist")));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .authorized(self.http.get(self.table_url(LEADS_TABLE)))
            .query(&[("limit", "1")])
            .send()
            .await?;
        Self::checked(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::Sender;

    fn store(server: &MockServer) -> RestStore {
        RestStore::new(reqwest::Client::new(), &server.uri(), "anon-key")
    }

    #[tokio::test]
    async fn finds_active_lead_with_equality_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/leads"))
            .and(query_param("contacts", "eq.5511999990000"))
            .and(query_param("status", "eq.true"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 42, "id_parceiro": 1, "contacts": "5511999990000", "status": true }
            ])))
            .mount(&server)
            .await;

        let lead = store(&server)
            .find_active_lead("5511999990000")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lead.id, LeadId("42".into()));
        assert!(lead.active);
        assert_eq!(lead.partner_id, 1);
    }

    #[tokio::test]
    async fn empty_result_means_no_active_lead() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/leads"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        assert!(store(&server).find_active_lead("55").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_without_generated_id_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/leads"))
            .and(header("prefer", "return=representation"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([{ "contacts": "55" }])))
            .mount(&server)
            .await;

        let err = store(&server)
            .insert_lead(NewLead {
                partner_id: 1,
                contact: "55".into(),
                active: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingId("lead")));
    }

    #[tokio::test]
    async fn unique_violation_maps_to_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/leads"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint \"leads_one_active_per_contact\""
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .insert_lead(NewLead {
                partner_id: 1,
                contact: "55".into(),
                active: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn message_insert_sends_numeric_lead_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/mensagem"))
            .and(body_partial_json(json!({
                "id_lead": 42,
                "remetente": "client",
                "mensagem": "oi"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([
                { "id": 7, "id_lead": 42, "remetente": "atendente", "mensagem": "oi" }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let message = store(&server)
            .insert_message(NewMessage {
                lead_id: LeadId("42".into()),
                sender: Sender::Client,
                body: "oi".into(),
            })
            .await
            .unwrap();
        assert_eq!(message.id, MessageId("7".into()));
        assert_eq!(message.sender, Sender::Client);
    }

    #[tokio::test]
    async fn foreign_key_violation_maps_to_referential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/mensagem"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23503",
                "message": "insert or update on table \"mensagem\" violates foreign key constraint"
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .insert_message(NewMessage {
                lead_id: LeadId("999".into()),
                sender: Sender::Client,
                body: "oi".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Referential(_)));
    }

    #[tokio::test]
    async fn message_insert_without_generated_id_is_a_failure() {
        for rows in [json!([{ "mensagem": "oi" }]), json!([])] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/rest/v1/mensagem"))
                .respond_with(ResponseTemplate::new(201).set_body_json(rows))
                .mount(&server)
                .await;

            let err = store(&server)
                .insert_message(NewMessage {
                    lead_id: LeadId("42".into()),
                    sender: Sender::Client,
                    body: "oi".into(),
                })
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::MissingId("message")));
        }
    }

    #[tokio::test]
    async fn server_error_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/leads"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = store(&server).ping().await.unwrap_err();
        match err {
            StoreError::Status { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
