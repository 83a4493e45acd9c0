//! Lead/message persistence.
//!
//! The resolver only needs equality lookups on `(contact, active)`, inserts that
//! return generated ids, and a foreign key from messages to leads. Every backend
//! reports a second active lead for one contact as [`StoreError::Conflict`] so the
//! resolver can re-query instead of failing.

mod memory;
mod postgres;
mod rest;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

use crate::{
    config::StoreConfig,
    error::StoreError,
    types::{Lead, LeadId, Message, NewLead, NewMessage},
};

#[async_trait]
pub trait LeadStore: Send + Sync {
    async fn find_active_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError>;

    /// Most recent closed lead for `contact`. Used for logging only.
    async fn find_inactive_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError>;

    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, StoreError>;

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Closes a conversation. Nothing in the inbound path calls this; the trigger
    /// for closing a lead lives outside this service.
    async fn deactivate_lead(&self, id: &LeadId) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub async fn connect(
    config: &StoreConfig,
    http: reqwest::Client,
) -> Result<Arc<dyn LeadStore>, StoreError> {
    let store: Arc<dyn LeadStore> = match config {
        StoreConfig::Rest { url, api_key } => Arc::new(RestStore::new(http, url, api_key)),
        StoreConfig::Postgres { database_url } => Arc::new(PgStore::connect(database_url).await?),
        StoreConfig::Memory => Arc::new(MemoryStore::default()),
    };
    Ok(store)
}
