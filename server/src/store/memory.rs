use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::LeadStore;
use crate::{
    error::StoreError,
    types::{Lead, LeadId, Message, MessageId, NewLead, NewMessage},
};

#[derive(Default)]
struct Tables {
    leads: Vec<Lead>,
    messages: Vec<Message>,
}

/// In-process store with the same constraints as the postgres schema: one active
/// lead per contact and messages referencing an existing lead.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a lead bypassing the uniqueness check, for seeding fixtures.
    pub async fn seed_lead(&self, contact: &str, active: bool) -> Lead {
        let lead = Lead {
            id: LeadId(Uuid::new_v4().to_string()),
            partner_id: 1,
            contact: contact.to_string(),
            active,
            created_at: Utc::now(),
        };
        self.tables.lock().await.leads.push(lead.clone());
        lead
    }

    pub async fn leads_for(&self, contact: &str) -> Vec<Lead> {
        let tables = self.tables.lock().await;
        tables
            .leads
            .iter()
            .filter(|lead| lead.contact == contact)
            .cloned()
            .collect()
    }

    pub async fn messages_for(&self, lead_id: &LeadId) -> Vec<Message> {
        let tables = self.tables.lock().await;
        tables
            .messages
            .iter()
            .filter(|message| &message.lead_id == lead_id)
            .cloned()
            .collect()
    }

    pub async fn message_count(&self) -> usize {
        self.tables.lock().await.messages.len()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn find_active_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .leads
            .iter()
            .find(|lead| lead.active && lead.contact == contact)
            .cloned())
    }

    async fn find_inactive_lead(&self, contact: &str) -> Result<Option<Lead>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .leads
            .iter()
            .filter(|lead| !lead.active && lead.contact == contact)
            .max_by_key(|lead| lead.created_at)
            .cloned())
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<Lead, StoreError> {
        let mut tables = self.tables.lock().await;
        if lead.active
            && tables
                .leads
                .iter()
                .any(|existing| existing.active && existing.contact == lead.contact)
        {
            return Err(StoreError::Conflict(format!(
                "active lead already exists for {}",
                lead.contact
            )));
        }
        let created = Lead {
            id: LeadId(Uuid::new_v4().to_string()),
            partner_id: lead.partner_id,
            contact: lead.contact,
            active: lead.active,
            created_at: Utc::now(),
        };
        tables.leads.push(created.clone());
        Ok(created)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.leads.iter().any(|lead| lead.id == message.lead_id) {
            return Err(StoreError::Referential(format!(
                "lead {} does not exist",
                message.lead_id
            )));
        }
        let created = Message {
            id: MessageId(Uuid::new_v4().to_string()),
            lead_id: message.lead_id,
            sender: message.sender,
            body: message.body,
            created_at: Utc::now(),
        };
        tables.messages.push(created.clone());
        Ok(created)
    }

    async fn deactivate_lead(&self, id: &LeadId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(lead) = tables.leads.iter_mut().find(|lead| &lead.id == id) else {
            return Err(StoreError::Referential(format!("lead {id} does not exist")));
        };
        lead.active = false;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
