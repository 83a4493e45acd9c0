use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use super::LeadStore;
use crate::{
    error::StoreError,
    types::{Lead, LeadId, Message, MessageId, NewLead, NewMessage},
};

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(|e| StoreError::Transport(format!("failed to run migrations: {e}")))?;

        Ok(Self { db })
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::Referential(db.message().to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Decode(err.to_string())
        }
        _ => StoreError::Transport(err.to_string()),
    }
}

fn parse_lead_row(row: sqlx::postgres::PgRow) -> Lead {
    Lead {
        id: LeadId(row.get("id")),
        partner_id: row.get("id_parceiro"),
        contact: row.get("contacts"),
        active: row.get("status"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

#[async_trait]
impl LeadStore for PgStore {
    async fn find_active_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query(
            "SELECT id, id_parceiro, contacts, status, created_at FROM leads \
             WHERE contacts = $1 AND status = true LIMIT 1",
        )
        .bind(contact)
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(parse_lead_row))
    }

    async fn find_inactive_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query(
            "SELECT id, id_parceiro, contacts, status, created_at FROM leads \
             WHERE contacts = $1 AND status = false \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(contact)
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(parse_lead_row))
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, StoreError> {
        let row = sqlx::query(
            "INSERT INTO leads (id, id_parceiro, contacts, status, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, id_parceiro, contacts, status, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(lead.partner_id)
        .bind(&lead.contact)
        .bind(lead.active)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx_error)?;
        row.map(parse_lead_row).ok_or(StoreError::MissingId("lead"))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let row = sqlx::query(
            "INSERT INTO mensagem (id, id_lead, remetente, mensagem, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, created_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&message.lead_id.0)
        .bind(message.sender.as_str())
        .bind(&message.body)
        .bind(Utc::now())
        .fetch_optional(&self.db)
        .await
        .map_err(map_sqlx_error)?;
        let Some(row) = row else {
            return Err(StoreError::MissingId("message"));
        };
        Ok(Message {
            id: MessageId(row.get("id")),
            lead_id: message.lead_id,
            sender: message.sender,
            body: message.body,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
        })
    }

    async fn deactivate_lead(&self, id: &LeadId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE leads SET status = false WHERE id = $1")
            .bind(&id.0)
            .execute(&self.db)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Referential(format!("lead {id} does not exist")));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.db)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
